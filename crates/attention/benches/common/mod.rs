use std::{fs, path::Path};

/// Renders `rows` as a GitHub-flavoured markdown table.
pub fn format_markdown_table(headers: &[&str], rows: &[Vec<String>]) -> String {
    let mut table = format!("| {} |\n", headers.join(" | "));
    table.push_str(&format!(
        "| {} |\n",
        vec!["---"; headers.len()].join(" | ")
    ));
    for row in rows {
        table.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    table
}

/// Replaces (or appends) the marked `section` of the results file.
pub fn update_results(section: &str, content: &str) -> std::io::Result<()> {
    let tag = section.to_uppercase();
    let start_marker = format!("<!-- {tag}_START -->");
    let end_marker = format!("<!-- {tag}_END -->");
    let block = format!("{start_marker}\n{content}\n{end_marker}\n");

    let path = Path::new("crates/attention/benchmarks/RESULTS.md");
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut body = match fs::read_to_string(path) {
        Ok(existing) => existing,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            "# Attention Variant Benchmarks\n\n".to_string()
        }
        Err(err) => return Err(err),
    };

    match (body.find(&start_marker), body.find(&end_marker)) {
        (Some(start), Some(end)) => body.replace_range(start..end + end_marker.len() + 1, &block),
        _ => {
            if !body.ends_with('\n') {
                body.push('\n');
            }
            body.push_str(&block);
        }
    }
    fs::write(path, body)
}

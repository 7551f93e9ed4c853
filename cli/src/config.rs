//! Run configuration for the `attention-demo` binary.
//!
//! A [`DemoConfig`] is read from a `.toml` or `.json` file (or defaulted) and
//! then patched with command-line overrides before validation.

use std::{fs, path::Path};

use anyhow::{bail, Context, Result};
use attention::{AttentionKind, Config};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    /// Variant to run; `None` runs all of them.
    #[serde(default)]
    pub kind: Option<AttentionKind>,
    #[serde(default = "default_attention")]
    pub attention: Config,
    #[serde(default = "default_batch")]
    pub batch: usize,
    #[serde(default = "default_seq_len")]
    pub seq_len: usize,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Run the forward passes in training mode (dropout active).
    #[serde(default)]
    pub train: bool,
}

fn default_attention() -> Config {
    Config::new(64).with_heads(8).with_kv_heads(2)
}

fn default_batch() -> usize {
    2
}

fn default_seq_len() -> usize {
    10
}

fn default_seed() -> u64 {
    42
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            kind: None,
            attention: default_attention(),
            batch: default_batch(),
            seq_len: default_seq_len(),
            seed: default_seed(),
            train: false,
        }
    }
}

impl DemoConfig {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)
                .with_context(|| format!("invalid json config {}", path.display()))?,
            Some("toml") | None => toml::from_str(&contents)
                .with_context(|| format!("invalid toml config {}", path.display()))?,
            Some(other) => bail!("unsupported configuration extension '{other}'"),
        };
        Ok(config)
    }

    /// Variants selected by this run.
    pub fn kinds(&self) -> Vec<AttentionKind> {
        match self.kind {
            Some(kind) => vec![kind],
            None => AttentionKind::ALL.to_vec(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = Vec::new();
        if self.batch == 0 {
            errors.push("batch must be greater than zero".to_string());
        }
        if self.seq_len == 0 {
            errors.push("seq_len must be greater than zero".to_string());
        }
        for kind in self.kinds() {
            let checked = match kind {
                AttentionKind::SelfAttention | AttentionKind::Causal => {
                    self.attention.validate_single_head()
                }
                AttentionKind::MultiHead => self.attention.validate_multi_head(),
                AttentionKind::GroupedQuery => self.attention.validate_grouped(),
            };
            if let Err(err) = checked {
                errors.push(format!("{kind}: {err}"));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            bail!("invalid demo configuration: {}", errors.join("; "))
        }
    }
}

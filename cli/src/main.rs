mod config;

use std::path::PathBuf;

use anyhow::{bail, Result};
use attention::{build_module, AttentionKind, AttentionOutput, Mode};
use candle_core::{DType, Device, Tensor, D};
use clap::Parser;
use layers::ParamInit;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::config::DemoConfig;

const ROW_SUM_TOLERANCE: f32 = 1e-4;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(err) = run() {
        eprintln!("attention demo failed: {err:#}");
        std::process::exit(1);
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Runs attention variants on random input", long_about = None)]
struct Args {
    #[arg(
        long,
        value_name = "KIND",
        value_parser = parse_kind,
        help = "self-attention, multi-head, grouped-query, causal or all"
    )]
    kind: Option<KindArg>,

    #[arg(short, long, value_name = "PATH", help = "Path to a .toml or .json run config")]
    config: Option<PathBuf>,

    #[arg(long)]
    batch: Option<usize>,

    #[arg(long)]
    seq_len: Option<usize>,

    #[arg(long)]
    d_model: Option<usize>,

    #[arg(long)]
    heads: Option<usize>,

    #[arg(long)]
    kv_heads: Option<usize>,

    #[arg(long, help = "Attention dropout probability")]
    dropout: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, help = "Run the forward passes in training mode")]
    train: bool,
}

#[derive(Debug, Clone, Copy)]
enum KindArg {
    All,
    One(AttentionKind),
}

fn parse_kind(value: &str) -> Result<KindArg, String> {
    if value.trim().eq_ignore_ascii_case("all") {
        Ok(KindArg::All)
    } else {
        value.parse().map(KindArg::One)
    }
}

fn resolve_config(args: &Args) -> Result<DemoConfig> {
    let mut config = match &args.config {
        Some(path) => DemoConfig::from_path(path)?,
        None => DemoConfig::default(),
    };
    match args.kind {
        Some(KindArg::All) => config.kind = None,
        Some(KindArg::One(kind)) => config.kind = Some(kind),
        None => {}
    }
    if let Some(batch) = args.batch {
        config.batch = batch;
    }
    if let Some(seq_len) = args.seq_len {
        config.seq_len = seq_len;
    }
    if let Some(d_model) = args.d_model {
        config.attention.d_model = d_model;
    }
    if let Some(heads) = args.heads {
        config.attention.num_heads = heads;
    }
    if let Some(kv_heads) = args.kv_heads {
        config.attention.num_kv_heads = Some(kv_heads);
    }
    if let Some(dropout) = args.dropout {
        config.attention.dropout_p = Some(dropout);
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    config.train |= args.train;
    config.validate()?;
    Ok(config)
}

fn run() -> Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;
    let device = Device::Cpu;
    let mode = if config.train { Mode::Train } else { Mode::Eval };

    log::info!(
        "running {} variant(s) batch={} seq_len={} d_model={} mode={:?}",
        config.kinds().len(),
        config.batch,
        config.seq_len,
        config.attention.d_model,
        mode
    );

    let input = random_input(&config, &device)?;
    let mut init = ParamInit::seeded(config.seed, &device);
    for kind in config.kinds() {
        let module = build_module(kind, &config.attention, &mut init)?;
        let output = module.forward(&input, None, mode)?;
        report(kind, &config, &input, &output)?;
    }
    Ok(())
}

fn random_input(config: &DemoConfig, device: &Device) -> Result<Tensor> {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let d_model = config.attention.d_model;
    let data: Vec<f32> = (0..config.batch * config.seq_len * d_model)
        .map(|_| rng.gen_range(-1.0..1.0))
        .collect();
    Ok(Tensor::from_vec(
        data,
        (config.batch, config.seq_len, d_model),
        device,
    )?)
}

fn report(
    kind: AttentionKind,
    config: &DemoConfig,
    input: &Tensor,
    output: &AttentionOutput,
) -> Result<()> {
    println!("{kind}");
    println!("  input    {:?}", input.dims());
    println!("  context  {:?}", output.context.dims());
    println!("  weights  {:?}", output.weights.dims());

    match kind {
        AttentionKind::MultiHead => {
            println!(
                "  heads    {} x {}",
                config.attention.num_heads,
                config.attention.head_dim()
            );
        }
        AttentionKind::GroupedQuery => {
            println!(
                "  groups   {} query heads / {} kv heads = {} per group",
                config.attention.num_heads,
                config.attention.kv_heads(),
                config.attention.group_size()
            );
        }
        AttentionKind::Causal => {
            let leaked = future_weight(&output.weights)?;
            println!("  causal   max weight above diagonal = {leaked}");
            if leaked != 0.0 {
                bail!("causal attention attended to future positions");
            }
        }
        AttentionKind::SelfAttention => {}
    }

    // Dropout rescales surviving weights, so rows only sum to one in eval.
    if !config.train {
        let error = row_sum_error(&output.weights)?;
        println!("  rows     max |sum - 1| = {error:.2e}");
        if error > ROW_SUM_TOLERANCE {
            bail!("{kind} attention weights are not normalised");
        }
    }
    Ok(())
}

fn future_weight(weights: &Tensor) -> Result<f32> {
    let (_, q_len, k_len) = weights.dims3()?;
    let above = Tensor::from_vec(
        (0..q_len)
            .flat_map(|i| (0..k_len).map(move |j| if j > i { 1f32 } else { 0.0 }))
            .collect::<Vec<_>>(),
        (q_len, k_len),
        weights.device(),
    )?;
    let leaked = weights
        .to_dtype(DType::F32)?
        .broadcast_mul(&above)?
        .abs()?
        .flatten_all()?
        .max(0)?;
    Ok(leaked.to_scalar::<f32>()?)
}

fn row_sum_error(weights: &Tensor) -> Result<f32> {
    let sums = weights.to_dtype(DType::F32)?.sum(D::Minus1)?;
    let error = sums
        .affine(1.0, -1.0)?
        .abs()?
        .flatten_all()?
        .max(0)?;
    Ok(error.to_scalar::<f32>()?)
}

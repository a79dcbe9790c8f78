//! Command-line entry point: one setup-dispatch-verify run of the GPU array adder.

use std::{env, path::PathBuf};

use adder_core::{data, AdderConfig, RunReport};
use adder_gpu::{AdderController, GpuContext};
use anyhow::{bail, Context, Result};
use tracer::init_tracing;
use tracing::debug;

#[derive(Debug, Default)]
struct CliOptions {
    config_path: Option<PathBuf>,
    report_path: Option<PathBuf>,
    length: Option<usize>,
    seed: Option<u64>,
    timeout_ms: Option<u64>,
    max_group_size: Option<u32>,
}

fn main() -> Result<()> {
    init_tracing();

    let options = parse_options(env::args().skip(1))?;
    let config = build_config(&options)?;

    let gpu = GpuContext::new_blocking(&config).context("failed to acquire a compute device")?;
    println!("Using device: {}", gpu.describe_adapter());

    let mut adder =
        AdderController::new(&gpu, &config).context("failed to build the add pipeline")?;

    let inputs = data::generate(&config).context("failed to generate input data")?;
    println!(
        "Generated {} values per input in [{}, {}]{}",
        inputs.a.len(),
        config.value_min,
        config.value_max,
        seed_suffix(inputs.seed)
    );
    adder
        .prepare_data(&inputs)
        .context("failed to prepare device buffers")?;

    let planned = adder.grid();
    debug!(
        group_size = planned.group_size,
        group_count = planned.group_count,
        "dispatch planned"
    );
    let grid = adder.dispatch().context("compute dispatch failed")?;
    println!(
        "Dispatched {} threads in {} group(s) of {}",
        grid.total_items, grid.group_count, grid.group_size
    );

    let report = adder.verify().context("failed to read back results")?;
    for mismatch in &report.mismatches {
        println!("{mismatch}");
    }
    println!("{}", report.summary());

    if let Some(ref path) = options.report_path {
        let run = RunReport {
            config: config.clone(),
            seed: inputs.seed,
            adapter: gpu.describe_adapter(),
            dispatch: grid,
            verification: report.clone(),
        };
        run.write_json(path)
            .with_context(|| format!("failed to write run report to {}", path.display()))?;
        println!("Wrote run report to {}", path.display());
    }

    println!("Execution finished");

    if !report.passed() {
        bail!(
            "GPU result diverged from host sum at {} index(es)",
            report.mismatches.len()
        );
    }
    Ok(())
}

fn parse_options<I>(args: I) -> Result<CliOptions>
where
    I: IntoIterator<Item = String>,
{
    let mut opts = CliOptions::default();

    for arg in args {
        if let Some(value) = arg.strip_prefix("--length=") {
            opts.length = Some(value.parse().context("invalid --length value")?);
        } else if let Some(value) = arg.strip_prefix("--seed=") {
            opts.seed = Some(parse_seed(value).context("invalid --seed value")?);
        } else if let Some(value) = arg.strip_prefix("--timeout-ms=") {
            opts.timeout_ms = Some(value.parse().context("invalid --timeout-ms value")?);
        } else if let Some(value) = arg.strip_prefix("--max-group-size=") {
            opts.max_group_size = Some(value.parse().context("invalid --max-group-size value")?);
        } else if let Some(value) = arg.strip_prefix("--config=") {
            opts.config_path = Some(PathBuf::from(value));
        } else if let Some(value) = arg.strip_prefix("--report-json=") {
            opts.report_path = Some(PathBuf::from(value));
        } else {
            bail!("unrecognized argument: {arg}");
        }
    }

    Ok(opts)
}

/// Starts from the config file (or defaults) and applies command-line overrides.
fn build_config(options: &CliOptions) -> Result<AdderConfig> {
    let mut config = match options.config_path {
        Some(ref path) => AdderConfig::from_json_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => AdderConfig::default(),
    };
    if let Some(length) = options.length {
        config.array_length = length;
    }
    if options.seed.is_some() {
        config.seed = options.seed;
    }
    if options.timeout_ms.is_some() {
        config.timeout_ms = options.timeout_ms;
    }
    if options.max_group_size.is_some() {
        config.max_group_size = options.max_group_size;
    }
    config.validate().context("invalid configuration")?;
    Ok(config)
}

fn seed_suffix(seed: Option<u64>) -> String {
    match seed {
        Some(seed) => format!(" (seed=0x{seed:X})"),
        None => String::new(),
    }
}

fn parse_seed(value: &str) -> Result<u64> {
    if let Some(hex) = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).context("expected hex literal")
    } else {
        value.parse().context("expected integer seed")
    }
}

mod tracer {
    use tracing_subscriber::EnvFilter;

    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_writer(std::io::stderr)
            .try_init();
    }
}

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use scalebench_rs::charts::{self, RunSeries};
use scalebench_rs::persist;
use scalebench_rs::providers::{ProviderEntry, Registry};
use scalebench_rs::{
    run_sweep, track_status, BenchmarkRun, CancellationToken, HttpTransport, RunStatistics,
    SweepConfig, TargetConfig, TransportLevelRunner,
};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "scalebench",
    about = "Concurrency scaling benchmarks for OpenAI-compatible chat endpoints"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sweep one endpoint across the configured concurrency levels
    Run(RunArgs),
    /// Sweep several providers from a registry file, then chart them
    Suite(SuiteArgs),
    /// Render charts from saved results
    Plot(PlotArgs),
    /// Add a provider to the registry file
    AddProvider(AddProviderArgs),
}

#[derive(Args, Debug, Clone)]
struct SweepArgs {
    /// Comma-separated concurrency levels, e.g. 1,2,4,8
    #[arg(long, value_delimiter = ',')]
    levels: Option<Vec<usize>>,

    /// Per-request timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Pause between levels in seconds
    #[arg(long)]
    cooldown_secs: Option<f64>,

    /// Maximum simultaneously open connections (default: max(level, 100))
    #[arg(long)]
    pool_limit: Option<usize>,

    /// Pause launching after every N attempts (0 disables)
    #[arg(long)]
    stagger_every: Option<usize>,

    /// Length of the launch pause in milliseconds
    #[arg(long)]
    stagger_ms: Option<u64>,

    /// How many failing attempts per level get a diagnostic line
    #[arg(long)]
    diagnostic_sample: Option<usize>,

    /// Directory for result CSVs and charts
    #[arg(long, default_value = "results")]
    results_dir: PathBuf,

    /// Skip chart generation
    #[arg(long)]
    no_plots: bool,

    /// Show a live status block while each level runs
    #[arg(long)]
    progress: bool,
}

impl SweepArgs {
    fn apply(&self, mut config: SweepConfig) -> Result<SweepConfig> {
        if let Some(levels) = &self.levels {
            config = config.with_levels(levels.clone())?;
        }
        if let Some(secs) = self.timeout_secs {
            config = config.with_request_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.cooldown_secs {
            if !secs.is_finite() || secs < 0.0 {
                bail!("--cooldown-secs must be a non-negative number");
            }
            config = config.with_cooldown(Duration::from_secs_f64(secs));
        }
        if let Some(limit) = self.pool_limit {
            config = config.with_pool_limit(limit)?;
        }
        if self.stagger_every.is_some() || self.stagger_ms.is_some() {
            let every = self.stagger_every.unwrap_or(config.stagger_every);
            let pause = self
                .stagger_ms
                .map(Duration::from_millis)
                .unwrap_or(config.stagger_pause);
            config = config.with_stagger(every, pause);
        }
        if let Some(sample) = self.diagnostic_sample {
            config = config.with_diagnostic_sample(sample);
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Full chat-completions URL
    #[arg(long, default_value = "http://localhost:1234/v1/chat/completions")]
    url: String,

    /// Model identifier embedded in each request body
    #[arg(long)]
    model: String,

    /// Label used in result file names
    #[arg(long, default_value = "custom")]
    provider: String,

    /// API key to use; if omitted an environment variable is read
    #[arg(long)]
    api_key: Option<String>,

    /// Environment variable name to read the API key from when --api-key is not supplied
    #[arg(long, default_value = "OPENAI_API_KEY")]
    api_key_env: String,

    /// Prompt sent by every request
    #[arg(long)]
    prompt: Option<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    #[arg(long)]
    temperature: Option<f64>,

    #[command(flatten)]
    sweep: SweepArgs,
}

#[derive(Args, Debug)]
struct SuiteArgs {
    /// Provider registry (YAML)
    #[arg(long, default_value = "providers.yaml")]
    config: PathBuf,

    /// Providers to benchmark, in order
    #[arg(long, num_args = 1..)]
    providers: Vec<String>,

    /// Benchmark every provider in the registry
    #[arg(long, conflicts_with = "providers")]
    all: bool,

    #[command(flatten)]
    sweep: SweepArgs,
}

#[derive(Args, Debug)]
struct PlotArgs {
    /// Plot one results file
    #[arg(long, conflicts_with_all = ["latest", "compare", "provider_comparison"])]
    csv: Option<PathBuf>,

    /// Plot the most recent results file (the default)
    #[arg(long)]
    latest: bool,

    /// Throughput comparison across every results file
    #[arg(long)]
    compare: bool,

    /// Peak-metric bar charts per provider across every results file
    #[arg(long)]
    provider_comparison: bool,

    #[arg(long, default_value = "results")]
    results_dir: PathBuf,
}

#[derive(Args, Debug)]
struct AddProviderArgs {
    /// Letters, numbers and underscores only
    name: String,
    url: String,
    model: String,

    #[arg(long)]
    api_key: Option<String>,

    #[arg(long)]
    api_key_env: Option<String>,

    #[arg(long, default_value = "providers.yaml")]
    config: PathBuf,

    /// Replace an existing provider of the same name
    #[arg(long)]
    force: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run(args) => run_single(args).await,
        Command::Suite(args) => run_suite(args).await,
        Command::Plot(args) => plot(args),
        Command::AddProvider(args) => add_provider(args),
    }
}

fn interrupt_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, abandoning in-flight requests");
            on_signal.cancel();
        }
    });
    cancel
}

async fn run_single(args: RunArgs) -> Result<()> {
    let config = args.sweep.apply(SweepConfig::default())?;
    let api_key = args
        .api_key
        .or_else(|| std::env::var(&args.api_key_env).ok());

    let mut target = TargetConfig::try_new(&args.url, api_key, &args.model)?;
    if let Some(prompt) = args.prompt {
        target = target.with_prompt(prompt);
    }
    if let Some(max_tokens) = args.max_tokens {
        target = target.with_max_tokens(max_tokens);
    }
    if let Some(temperature) = args.temperature {
        target = target.with_temperature(temperature);
    }

    let cancel = interrupt_token();
    let saved = benchmark_target(&args.provider, target, &config, &args.sweep, &cancel).await?;
    let Some(path) = saved else {
        bail!("benchmark produced no results");
    };

    if !args.sweep.no_plots {
        plot_file(&path);
    }
    Ok(())
}

async fn run_suite(args: SuiteArgs) -> Result<()> {
    let registry = Registry::load(&args.config)?;
    let selected = registry.select(&args.providers, args.all)?;
    let base = SweepConfig::default().apply(&registry.sweep)?;
    let config = args.sweep.apply(base)?;

    let names: Vec<&str> = selected.iter().map(|p| p.name.as_str()).collect();
    info!("Selected providers: {}", names.join(", "));

    let cancel = interrupt_token();
    let started = std::time::Instant::now();
    let mut completed = Vec::new();
    for entry in &selected {
        if cancel.is_cancelled() {
            break;
        }
        let target = match entry.target() {
            Ok(target) => target,
            Err(err) => {
                warn!("skipping {}: {:#}", entry.name, err);
                continue;
            }
        };
        match benchmark_target(&entry.name, target, &config, &args.sweep, &cancel).await {
            Ok(Some(path)) => completed.push(path),
            Ok(None) => warn!("{} produced no results", entry.name),
            Err(err) => warn!("{} benchmark failed: {:#}", entry.name, err),
        }
    }

    println!("\n{}", "=".repeat(50));
    println!("BENCHMARK SUITE COMPLETE");
    println!("{}", "=".repeat(50));
    println!("Total duration: {:.1}s", started.elapsed().as_secs_f64());
    println!("Completed benchmarks: {}/{}", completed.len(), selected.len());

    if completed.is_empty() {
        bail!("no benchmarks completed successfully");
    }

    println!("\nResult files:");
    for file in &completed {
        println!("  - {}", file.display());
    }

    if !args.sweep.no_plots {
        if completed.len() > 1 {
            if let Err(err) = compare_files(&completed, &args.sweep.results_dir) {
                warn!("could not generate comparison plot: {:#}", err);
            }
        } else {
            for file in &completed {
                plot_file(file);
            }
        }
    }
    Ok(())
}

/// Sweeps one target and saves its records. `None` when no level produced a record.
async fn benchmark_target(
    provider: &str,
    target: TargetConfig,
    config: &SweepConfig,
    args: &SweepArgs,
    cancel: &CancellationToken,
) -> Result<Option<PathBuf>> {
    println!("Starting {} concurrent scaling benchmark...", provider);
    println!("Target URL: {}", target.endpoint);
    println!("Model: {}", target.model);
    println!("Max tokens per response: {}", target.max_tokens);
    println!("{}", "=".repeat(50));

    let body = target.request_body();
    let transport = Arc::new(HttpTransport::try_new(target, config.request_timeout)?);
    let mut runner = TransportLevelRunner::new(transport, body, config.clone());

    let tracker = if args.progress {
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        runner = runner.with_status(status_tx);
        Some(tokio::spawn(track_status(status_rx)))
    } else {
        None
    };

    let run = run_sweep(provider, config, &mut runner, cancel).await;
    drop(runner);
    if let Some(tracker) = tracker {
        let _ = tracker.await;
    }

    print_run(&run);
    if run.is_empty() {
        return Ok(None);
    }

    let path = persist::results_path(&args.results_dir, provider, &config.timestamp_format)?;
    persist::append_records(&path, &run.records)?;
    println!("Results saved to: {}", path.display());
    Ok(Some(path))
}

fn print_run(run: &BenchmarkRun) {
    println!("\n{}", "=".repeat(50));
    if run.interrupted {
        println!("{} BENCHMARK INTERRUPTED", run.provider.to_uppercase());
    } else {
        println!("{} BENCHMARK COMPLETE", run.provider.to_uppercase());
    }
    println!("{}", "=".repeat(50));
    println!("Concurrent Users | Tokens/Sec | Success Rate");
    println!("{}", "-".repeat(40));
    for record in &run.records {
        println!(
            "{:16} | {:10.2} | {:11.1}%",
            record.concurrency, record.tokens_per_second, record.success_rate_percent
        );
    }
}

fn print_statistics(stats: &RunStatistics) {
    println!("\nSummary Statistics:");
    println!("{}", "=".repeat(50));
    println!(
        "Peak throughput: {:.2} tokens/sec at {} concurrent users",
        stats.peak_tokens_per_second, stats.peak_throughput_concurrency
    );
    println!(
        "Peak request rate: {:.2} requests/sec at {} concurrent users",
        stats.peak_requests_per_second, stats.peak_request_rate_concurrency
    );
    println!("Average success rate: {:.1}%", stats.average_success_rate);
    println!(
        "Minimum success rate: {:.1}% at {} concurrent users",
        stats.min_success_rate, stats.min_success_rate_concurrency
    );
}

/// Chart failures are reported but never fail the command that produced the data.
fn plot_file(path: &Path) {
    if let Err(err) = plot_single(path) {
        warn!("could not generate plots for {}: {:#}", path.display(), err);
    }
}

fn plot_single(path: &Path) -> Result<()> {
    let records = persist::read_records(path)?;
    let title = format!(
        "Benchmark Results: {}",
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    );
    let output = charts::plot_path_for(path);
    charts::plot_run(&records, &title, &output)?;
    println!("Plot saved to: {}", output.display());

    if let Some(stats) = RunStatistics::from_records(&records) {
        print_statistics(&stats);
    }
    Ok(())
}

fn compare_files(files: &[PathBuf], results_dir: &Path) -> Result<()> {
    let series = files
        .iter()
        .map(|path| {
            Ok(RunSeries {
                label: persist::run_label(path),
                records: persist::read_records(path)?,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    let output = results_dir.join("benchmark_comparison.png");
    charts::plot_comparison(&series, &output)?;
    println!("Comparison plot saved to: {}", output.display());
    Ok(())
}

fn compare_providers(files: &[PathBuf], results_dir: &Path) -> Result<()> {
    let mut providers = Vec::new();
    for path in files {
        let records = persist::read_records(path)?;
        let Some(stats) = RunStatistics::from_records(&records) else {
            warn!("{} has no records, skipping", path.display());
            continue;
        };
        providers.push((persist::provider_label(path), stats));
    }

    let output = results_dir.join("provider_comparison.png");
    charts::plot_provider_comparison(&providers, &output)?;
    println!("Provider comparison saved to: {}", output.display());

    println!("\nProvider Performance Summary:");
    println!(
        "{:<20} {:>14} {:>12} {:>12} {:>12}",
        "Provider", "Peak tok/s", "Optimal", "Avg success", "Peak req/s"
    );
    for (name, stats) in &providers {
        println!(
            "{:<20} {:>14.2} {:>12} {:>11.2}% {:>12.2}",
            name,
            stats.peak_tokens_per_second,
            stats.peak_throughput_concurrency,
            stats.average_success_rate,
            stats.peak_requests_per_second
        );
    }
    Ok(())
}

fn plot(args: PlotArgs) -> Result<()> {
    if let Some(csv) = &args.csv {
        if !csv.exists() {
            bail!("file {} not found", csv.display());
        }
        return plot_single(csv);
    }

    if args.compare || args.provider_comparison {
        let files = persist::find_result_files(&args.results_dir)?;
        if files.len() < 2 {
            bail!("need at least 2 benchmark files in {}", args.results_dir.display());
        }
        if args.compare {
            println!("Comparing {} benchmark files", files.len());
            compare_files(&files, &args.results_dir)?;
        }
        if args.provider_comparison {
            println!("Creating provider comparison from {} benchmark files", files.len());
            compare_providers(&files, &args.results_dir)?;
        }
        return Ok(());
    }

    let latest = persist::latest_result_file(&args.results_dir)
        .context("run a benchmark first")?;
    if args.latest {
        println!("Using latest file: {}", latest.display());
    } else {
        println!("No arguments provided, using latest file: {}", latest.display());
    }
    plot_single(&latest)
}

fn add_provider(args: AddProviderArgs) -> Result<()> {
    let mut registry = Registry::load_or_default(&args.config)?;
    let mut entry = ProviderEntry::new(&args.name, &args.url, &args.model);
    entry.api_key = args.api_key;
    entry.api_key_env = args.api_key_env;
    registry
        .add(entry, args.force)
        .map_err(|err| anyhow!("cannot add {}: {:#}", args.name, err))?;
    registry.save(&args.config)?;

    println!("Added {} to {}", args.name, args.config.display());
    println!("  API URL: {}", args.url);
    println!("  Model: {}", args.model);
    println!(
        "\nNext: scalebench suite --config {} --providers {}",
        args.config.display(),
        args.name
    );
    Ok(())
}

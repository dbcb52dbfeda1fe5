// fusillade-cli: Command-line entry point

mod report;
mod tracing_init;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use fusillade_config::{apply_env_overrides, load_from_file, validate_config, Config, Protocol};
use fusillade_engine::Engine;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Multi-protocol load generator
#[derive(Debug, Parser)]
#[command(name = "fusillade", version, about)]
struct Args {
    /// Run configuration file (YAML or JSON)
    #[arg(short = 'f', long, env = "FUSILLADE_CONFIG")]
    config: Option<PathBuf>,

    /// Target URL, overriding the config file
    #[arg(long)]
    target: Option<String>,

    /// Wire protocol: http, websocket, sse, grpc
    #[arg(short, long)]
    protocol: Option<String>,

    /// Number of concurrent workers
    #[arg(short, long)]
    concurrency: Option<usize>,

    /// Stop after this many logical calls
    #[arg(short = 'n', long)]
    total: Option<u64>,

    /// Stop after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Target request rate (requests/second)
    #[arg(short, long)]
    rate: Option<f64>,

    /// Per-attempt timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Extra attempts on retryable failures
    #[arg(long)]
    retries: Option<u32>,

    /// Threshold assertion, repeatable (e.g. "http_req_duration:p95 < 250")
    #[arg(long = "threshold", value_name = "EXPR")]
    thresholds: Vec<String>,

    /// Accept invalid TLS certificates
    #[arg(long)]
    insecure: bool,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => load_from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(target) = &args.target {
        config.target = Some(target.clone());
    }
    if let Some(protocol) = &args.protocol {
        config.protocol = match protocol.to_lowercase().as_str() {
            "http" => Protocol::Http,
            "websocket" | "ws" => Protocol::Websocket,
            "sse" => Protocol::Sse,
            "grpc" => Protocol::Grpc,
            other => anyhow::bail!("unknown protocol {:?}", other),
        };
    }
    if let Some(concurrency) = args.concurrency {
        config.concurrency = concurrency;
    }
    if let Some(total) = args.total {
        config.total = Some(total);
    }
    if let Some(duration) = args.duration {
        config.duration_s = Some(duration);
    }
    if let Some(rate) = args.rate {
        config.rate = Some(rate);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(retries) = args.retries {
        config.retries = retries;
    }
    if !args.thresholds.is_empty() {
        config.thresholds.extend(args.thresholds.iter().cloned());
    }
    if args.insecure {
        config.insecure = true;
    }

    apply_env_overrides(&mut config);
    validate_config(&config).context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_init::init();

    let args = Args::parse();
    let config = build_config(&args)?;

    let engine = Engine::new(&config).context("assembling run")?;

    // Ctrl-C stops dispatch and drains in-flight attempts
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, stopping run");
                cancel.cancel();
            }
        });
    }

    let run = engine.run(cancel).await.context("run failed")?;

    match args.output {
        OutputFormat::Text => report::print_text(&run),
        OutputFormat::Json => report::print_json(&run)?,
    }

    std::process::exit(run.exit_code());
}

mod aggregate;
mod config;
mod events;
mod pipeline;
mod segment;
mod sink;
mod thresholds;

use crate::config::Config;
use crate::pipeline::{run_batch, BatchSettings};
use crate::sink::PgSink;
use crate::thresholds::ThresholdRules;
use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Segments one machine event log into cycles, flags threshold violations and appends hourly summaries."
)]
struct Args {
    /// Bare name of a `.csv` file inside the input directory.
    input_file: String,
    /// Overrides AGGREGATOR_INPUT_DIR.
    #[arg(long)]
    input_dir: Option<PathBuf>,
    /// Overrides AGGREGATOR_THRESHOLDS_PATH.
    #[arg(long)]
    thresholds: Option<PathBuf>,
}

fn parse_args() -> Args {
    match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let code = match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = err.print();
            std::process::exit(code);
        }
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,machine_cycle_aggregator=info".into());
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);

    let otel_layer = match config
        .otlp_endpoint
        .as_deref()
        .map(normalize_otlp_http_endpoint)
        .filter(|endpoint| !endpoint.is_empty())
    {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .http()
                .with_endpoint(endpoint);
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(
                    vec![KeyValue::new("service.name", "machine-cycle-aggregator")],
                )))
                .install_batch(Tokio)?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()?;
    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn run(args: Args, mut config: Config) -> Result<()> {
    if let Some(dir) = args.input_dir {
        config.input_dir = dir;
    }
    if let Some(path) = args.thresholds {
        config.thresholds_path = path;
    }

    let input_path = config.input_path(&args.input_file)?;
    let rules = ThresholdRules::load(&config.thresholds_path)?;

    let options = config.database.connect_options()?;
    let sink = PgSink::connect(options, config.db_pool_size)
        .await
        .context("failed to connect to the output database")?;

    let settings = BatchSettings {
        partition_workers: config.partition_workers,
        write_batch_size: config.write_batch_size,
    };
    tracing::info!(
        input = %input_path.display(),
        thresholds = %config.thresholds_path.display(),
        workers = settings.partition_workers,
        batch_size = settings.write_batch_size,
        "starting batch"
    );
    let report = run_batch(&input_path, rules, &sink, settings).await?;
    report.log();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = parse_args();
    let config = Config::from_env()?;
    init_tracing(&config)?;

    let result = run(args, config).await;
    if let Err(err) = &result {
        tracing::error!(error = ?err, "batch failed");
    }
    opentelemetry::global::shutdown_tracer_provider();
    result
}

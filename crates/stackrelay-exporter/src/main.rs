//! stackrelay binary entrypoint.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use stackrelay_core::{MetricSpec, RelayError};
use stackrelay_exporter::cli::Cli;
use stackrelay_exporter::{
    CollectorRegistry, ExporterConfig, ExporterResult, OutputMode, PollLoop, ScrapeServer,
    SnapshotDispatcher, register_plan,
};
use stackrelay_monitoring::StackdriverClient;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli.into_config())) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ExporterConfig) -> ExporterResult<()> {
    config.validate()?;
    let plan = config.plan()?;

    info!(
        project = %config.project_id,
        output = %config.output,
        metrics = plan.len(),
        "starting stackrelay"
    );
    for spec in &plan {
        info!(metric_type = spec.metric_type(), schedule = spec.schedule_expr(), "plan entry");
    }

    let client = Arc::new(StackdriverClient::new(config.client_config())?);

    match config.output {
        OutputMode::Json => run_json(&config, client, plan).await,
        OutputMode::Prometheus => run_prometheus(&config, client, &plan).await,
    }
}

async fn run_json(
    config: &ExporterConfig,
    client: Arc<StackdriverClient>,
    plan: Vec<MetricSpec>,
) -> ExporterResult<()> {
    let dir = config
        .output_path
        .clone()
        .ok_or_else(|| RelayError::configuration("an output path is required for json output"))?;
    let handles = SnapshotDispatcher::new(client, dir, plan).spawn();
    info!(jobs = handles.len(), "snapshot dispatcher running");

    tokio::signal::ctrl_c().await.map_err(RelayError::from)?;
    warn!("interrupted, stopping");
    Ok(())
}

async fn run_prometheus(
    config: &ExporterConfig,
    client: Arc<StackdriverClient>,
    plan: &[MetricSpec],
) -> ExporterResult<()> {
    let registry = Arc::new(CollectorRegistry::with_prefix(config.namespace.clone()));
    let targets = register_plan(&client, &registry, plan).await?;

    let poll_task = PollLoop::new(client, targets)
        .with_interval(config.poll_interval)
        .spawn();

    ScrapeServer::new(registry, config.handler_path.clone())
        .serve_while(config.listen_addr(), poll_task)
        .await
}

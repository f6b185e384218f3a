//! `arkive`: scan a source tree into work items and drive them into the remote archive.
//!
//! Configuration comes from `ARKIVE_*` environment variables (and `.env`); the flags
//! below only override the run id and the one-shot behaviour.

use std::sync::Arc;

use anyhow::Context;
use arkive_cli::{init_telemetry, json_logs_from_env, resolve_run_id, Backends, StoreKind};
use arkive_core::models::RunSummary;
use arkive_core::Config;
use arkive_services::{create_notifier, Notifier};
use arkive_worker::{RunMonitor, WorkerPool, WorkerPoolConfig};
use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "arkive", about = "Archive scientific data sets into the remote archive service")]
struct Cli {
    /// Record store and queue backend
    #[arg(long, value_enum, default_value_t = StoreKind::Postgres, global = true)]
    store: StoreKind,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Scan the source tree and enqueue new or resumed work items
    Scan {
        /// Run to attach the candidates to (default: ARKIVE_RUN_ID, else a new run)
        #[arg(long)]
        run_id: Option<Uuid>,
    },
    /// Process queued work items until interrupted
    Work {
        /// Run to watch when exiting after it finishes
        #[arg(long)]
        run_id: Option<Uuid>,
        /// Exit once the run's queue drains and its summary is written
        #[arg(long)]
        shutdown_after_run: bool,
    },
    /// Scan, process until the queue drains, write the run summary and exit
    Run {
        #[arg(long)]
        run_id: Option<Uuid>,
    },
    /// Write the summary artifact of a run and print it
    Summary {
        #[arg(long)]
        run_id: Uuid,
    },
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let out = serde_json::to_string_pretty(value).context("Serialize output")?;
    println!("{}", out);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C signal"),
        _ = terminate => tracing::info!("Received terminate signal"),
    }
    tracing::info!("Shutting down gracefully...");
}

async fn scan(
    config: Arc<Config>,
    backends: &Backends,
    notifier: Arc<dyn Notifier>,
    run_id: Uuid,
) -> anyhow::Result<()> {
    let report = backends.scanner(config, notifier).scan(run_id).await?;
    print_json(&serde_json::json!({
        "run_id": run_id,
        "candidates": report.candidates,
        "created": report.created,
        "resumed": report.resumed,
        "replaced": report.replaced,
        "skipped_completed": report.skipped_completed,
        "skipped_fresh": report.skipped_fresh,
        "skipped_gate": report.skipped_gate,
        "flagged": report.flagged,
    }))
}

/// Start the worker pool and keep it running until `until` resolves.
async fn work_until<F>(
    config: Arc<Config>,
    backends: &Backends,
    until: F,
) -> anyhow::Result<Option<RunSummary>>
where
    F: std::future::Future<Output = anyhow::Result<Option<RunSummary>>>,
{
    let executor = Arc::new(backends.executor(config.clone())?);
    let pool = WorkerPool::start(
        backends.queue.clone(),
        executor,
        WorkerPoolConfig::from_config(&config),
    );

    let result = tokio::select! {
        result = until => result,
        _ = shutdown_signal() => Ok(None),
    };

    pool.shutdown().await;
    pool.join().await;
    result
}

/// Close every open run as it finishes. Never returns on its own.
async fn close_finished_runs(
    monitor: &RunMonitor,
    interval: std::time::Duration,
) -> anyhow::Result<Option<RunSummary>> {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = monitor.check_open_runs().await {
            tracing::error!(error = %e, "Run check failed");
        }
    }
}

async fn work(
    config: Arc<Config>,
    backends: &Backends,
    notifier: Arc<dyn Notifier>,
    one_shot_run: Option<Uuid>,
) -> anyhow::Result<()> {
    let monitor = backends.monitor(&config, notifier);
    let interval = std::time::Duration::from_secs(config.run_check_interval_secs.max(1));

    let summary = match one_shot_run {
        Some(run_id) => {
            tracing::info!(%run_id, "Working until the run finishes");
            work_until(config, backends, async { monitor.watch(run_id).await.map(Some) }).await?
        }
        None => work_until(config, backends, close_finished_runs(&monitor, interval)).await?,
    };

    if let Some(summary) = summary {
        print_json(&summary)?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry(json_logs_from_env());
    let cli = Cli::parse();

    let config = Config::from_env()?;
    config.validate()?;
    let config = Arc::new(config);

    let backends = Backends::connect(&config, cli.store).await?;
    let notifier = create_notifier(&config.mail);

    match cli.command {
        Commands::Migrate => {
            // Connecting to PostgreSQL already applied the migrations.
            tracing::info!("Database is up to date");
        }
        Commands::Scan { run_id } => {
            let run_id = resolve_run_id(run_id, config.run_id);
            scan(config, &backends, notifier, run_id).await?;
        }
        Commands::Work {
            run_id,
            shutdown_after_run,
        } => {
            let one_shot = shutdown_after_run || config.shutdown_after_run;
            let run_id = run_id.or(config.run_id);
            if one_shot && run_id.is_none() {
                anyhow::bail!("--shutdown-after-run needs --run-id or ARKIVE_RUN_ID");
            }
            work(config, &backends, notifier, run_id.filter(|_| one_shot)).await?;
        }
        Commands::Run { run_id } => {
            let run_id = resolve_run_id(run_id, config.run_id);
            scan(config.clone(), &backends, notifier.clone(), run_id).await?;
            work(config, &backends, notifier, Some(run_id)).await?;
        }
        Commands::Summary { run_id } => {
            let summaries = backends.summaries(&config);
            let summary = summaries.build(run_id).await?;
            let path = summaries.write(&summary).await?;
            tracing::info!(path = %path.display(), "Summary written");
            print_json(&summary)?;
        }
    }

    Ok(())
}

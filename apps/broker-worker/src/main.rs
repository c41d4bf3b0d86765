mod config;
mod logging;
mod seed;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use clap::{Parser, Subcommand};
use service_broker::infra::audit::TracingEventRecorder;
use service_broker::infra::jobs::InMemoryJobQueue;
use service_broker::infra::storage::InMemoryServiceInstanceRepository;
use service_broker::{DeleteOptions, ServiceBrokerModule, ServiceInstancesApi};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::seed::Seed;

/// Service broker worker - deletes service instances and tracks
/// asynchronous broker operations
#[derive(Parser)]
#[command(name = "broker-worker")]
#[command(about = "Deletes service instances and tracks asynchronous broker operations")]
#[command(version = "0.1.0")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// YAML file with brokers, instances and bindings to load at startup
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Log verbosity level (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the job runner until interrupted
    Run,
    /// Delete service instances, then poll until accepted operations finish
    Delete {
        /// Service instance guids, processed in order
        #[arg(required = true)]
        guids: Vec<Uuid>,

        /// Allow the broker to complete deprovisioning asynchronously
        #[arg(long)]
        accepts_incomplete: Option<bool>,

        /// Report accepted deprovisions as in-progress errors
        #[arg(long)]
        multipart: bool,

        /// Return right after the batch without waiting for polling jobs
        #[arg(long)]
        no_wait: bool,
    },
    /// Validate configuration and seed, then exit
    Check,
}

struct Worker {
    store: InMemoryServiceInstanceRepository,
    queue: Arc<InMemoryJobQueue>,
    module: ServiceBrokerModule,
}

impl Worker {
    async fn start(config: &AppConfig, seed: Option<Seed>) -> Result<Self> {
        let store = InMemoryServiceInstanceRepository::new();
        if let Some(seed) = seed {
            let (instances, bindings) = seed.apply(&store).await?;
            tracing::info!(instances, bindings, "Seed loaded");
        }

        let queue = Arc::new(InMemoryJobQueue::new());
        let module = ServiceBrokerModule::with_http_broker(
            config.service_broker.clone(),
            Arc::new(store.clone()),
            Arc::new(TracingEventRecorder::new()),
            queue.clone(),
        )?;

        Ok(Self {
            store,
            queue,
            module,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Layered config: defaults -> YAML (if provided) -> env (APP__*)
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose)?;

    let seed = cli.seed.as_deref().map(Seed::load).transpose()?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&config, seed).await,
        Commands::Delete {
            guids,
            accepts_incomplete,
            multipart,
            no_wait,
        } => {
            let options = DeleteOptions {
                accepts_incomplete,
                multipart_delete: multipart,
                ..DeleteOptions::default()
            };
            delete(&config, seed, &guids, options, !no_wait).await
        }
        Commands::Check => check(&config, seed),
    }
}

async fn run(config: &AppConfig, seed: Option<Seed>) -> Result<()> {
    let worker = Worker::start(config, seed).await?;
    let cancel = CancellationToken::new();
    let runner = worker.module.job_runner();

    let handle = tokio::spawn({
        let cancel = cancel.clone();
        async move { runner.run(cancel).await }
    });

    tracing::info!("Broker worker running");
    wait_for_shutdown().await?;
    cancel.cancel();
    handle.await?;

    tracing::info!(
        pending_jobs = worker.queue.len(),
        instances = worker.store.instance_count().await,
        "Broker worker stopped"
    );
    Ok(())
}

async fn delete(
    config: &AppConfig,
    seed: Option<Seed>,
    guids: &[Uuid],
    options: DeleteOptions,
    wait: bool,
) -> Result<()> {
    let worker = Worker::start(config, seed).await?;

    let errors = worker
        .module
        .api()
        .delete_service_instances(guids, options)
        .await?;
    for error in &errors {
        println!("{}: {}", error.name(), error.message());
    }

    if wait {
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if wait_for_shutdown().await.is_ok() {
                    cancel.cancel();
                }
            }
        });
        drain(&worker, config.service_broker.job_runner.tick_interval, &cancel).await?;
        watcher.abort();
    }

    println!(
        "{} error(s), {} instance(s) remaining, {} job(s) pending",
        errors.len(),
        worker.store.instance_count().await,
        worker.queue.len()
    );
    Ok(())
}

/// Run due jobs until the queue is empty or `cancel` fires.
async fn drain(worker: &Worker, tick: Duration, cancel: &CancellationToken) -> Result<()> {
    let runner = worker.module.job_runner();
    while !worker.queue.is_empty() {
        runner.run_due(Utc::now()).await?;

        let wait = worker
            .queue
            .next_run_at()
            .and_then(|at| (at - Utc::now()).to_std().ok())
            .map_or(tick, |until| until.max(tick));
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                tracing::warn!(pending_jobs = worker.queue.len(), "Interrupted while polling");
                break;
            }
            () = tokio::time::sleep(wait) => {}
        }
    }
    Ok(())
}

fn check(config: &AppConfig, seed: Option<Seed>) -> Result<()> {
    tracing::info!("Checking configuration...");
    if let Some(seed) = seed {
        let (instances, bindings) = seed.into_models()?;
        println!(
            "Seed is valid: {} instance(s), {} binding(s)",
            instances.len(),
            bindings.len()
        );
    }
    println!("Configuration is valid");
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM.
async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = signal::ctrl_c() => result?,
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received");
    Ok(())
}

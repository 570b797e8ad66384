//! Binary entry point for riskwatch.
//!
//! This binary serves the scoring API and exposes the operator commands.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// Allow print_stderr in main binary for CLI output
#![allow(clippy::print_stderr)]
#![allow(clippy::print_stdout)]
// Allow multiple crate versions from transitive dependencies
#![allow(clippy::multiple_crate_versions)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use riskwatch::alerts::{AlertDispatcher, dispatcher_from_config, http_client};
use riskwatch::config::RiskwatchConfig;
use riskwatch::http::{self, AppState};
use riskwatch::incidents::{IncidentHub, IncidentPoller, build_feeds};
use riskwatch::observability::{self, MetricsHandle};
use riskwatch::services::{FeedbackCountPolicy, scheduler};
use riskwatch::storage::{
    FeedbackStore, FilesystemVersionStore, PredictionLog, SqliteRecordStore, VersionStore, load_csv,
};
use riskwatch::training::{Dataset, LogisticTrainer, ScorerRegistry};
use riskwatch::{
    ActiveVersionCache, FairnessAuditor, PredictionService, RetrainOrchestrator, RetrainOutcome,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Riskwatch - risk scoring with versioned models, retraining and fairness audits.
#[derive(Parser)]
#[command(name = "riskwatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, env = "RISKWATCH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API, background schedulers and the incident poller.
    Serve,

    /// Run one retrain cycle now.
    Retrain {
        /// Skip the drift policy.
        #[arg(long)]
        force: bool,
    },

    /// Run a fairness audit over the prediction history.
    Audit {
        /// Attribute to audit (repeatable). Defaults to the configured ones.
        #[arg(short, long = "attribute")]
        attributes: Vec<String>,
    },

    /// Activate a previously published version.
    Rollback {
        /// Version number.
        version: u64,
    },

    /// Show versions, the current pointer and record counts.
    Status,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match RiskwatchConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        },
    };

    // The recorder only matters for a process that exposes /metrics.
    let mut settings = config.observability.clone();
    settings.metrics = settings.metrics && matches!(cli.command, Commands::Serve);
    let observability = match observability::init(&settings) {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Failed to initialize observability: {e}");
            return ExitCode::FAILURE;
        },
    };

    let result = run_command(cli.command, config, observability.metrics().cloned()).await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        },
    }
}

/// Runs the selected command.
async fn run_command(
    command: Commands,
    config: RiskwatchConfig,
    metrics: Option<MetricsHandle>,
) -> Result<()> {
    let components = Components::build(&config)?;

    match command {
        Commands::Serve => cmd_serve(&config, components, metrics).await,
        Commands::Retrain { force } => cmd_retrain(components, force).await,
        Commands::Audit { attributes } => cmd_audit(&config, components, attributes).await,
        Commands::Rollback { version } => cmd_rollback(components, version).await,
        Commands::Status => cmd_status(&config, &components),
    }
}

/// Services wired from configuration.
struct Components {
    store: Arc<dyn VersionStore>,
    records: Arc<SqliteRecordStore>,
    cache: Arc<ActiveVersionCache>,
    dispatcher: Arc<AlertDispatcher>,
    orchestrator: Arc<RetrainOrchestrator>,
    auditor: Arc<FairnessAuditor>,
}

impl Components {
    fn build(config: &RiskwatchConfig) -> Result<Self> {
        let store: Arc<dyn VersionStore> = Arc::new(
            FilesystemVersionStore::open(&config.storage.model_dir, ScorerRegistry::with_builtin())
                .context("opening model store")?,
        );
        let records = Arc::new(
            SqliteRecordStore::open(&config.storage.database).context("opening record store")?,
        );
        let base = match &config.training.base_dataset {
            Some(path) => load_csv(path, &config.training.label_column)
                .with_context(|| format!("loading base dataset {}", path.display()))?,
            None => Dataset::default(),
        };

        let cache = Arc::new(ActiveVersionCache::empty());
        let dispatcher = Arc::new(dispatcher_from_config(&config.alerts));
        let trainer = Arc::new(LogisticTrainer {
            epochs: config.training.epochs,
            learning_rate: config.training.learning_rate,
            l2: config.training.l2,
        });
        let feedback: Arc<dyn FeedbackStore> = records.clone();
        let orchestrator = Arc::new(
            RetrainOrchestrator::new(
                Arc::clone(&store),
                Arc::clone(&cache),
                feedback,
                trainer,
                Arc::clone(&dispatcher),
            )
            .with_policy(Arc::new(FeedbackCountPolicy {
                min_records: config.training.min_feedback,
            }))
            .with_base_dataset(base),
        );
        let history: Arc<dyn PredictionLog> = records.clone();
        let auditor = Arc::new(
            FairnessAuditor::new(history, Arc::clone(&dispatcher), config.fairness.max_gap)
                .with_window_hours(config.fairness.window_hours),
        );

        tracing::debug!(
            channels = dispatcher.channel_count(),
            model_dir = %config.storage.model_dir.display(),
            "Components built"
        );

        Ok(Self {
            store,
            records,
            cache,
            dispatcher,
            orchestrator,
            auditor,
        })
    }
}

async fn cmd_serve(
    config: &RiskwatchConfig,
    components: Components,
    metrics: Option<MetricsHandle>,
) -> Result<()> {
    let api_token = config
        .server
        .api_token
        .clone()
        .context("server.api_token (or RISKWATCH_API_TOKEN) must be set to serve")?;

    match components.orchestrator.bootstrap(config.training.bootstrap).await {
        Ok(Some(version)) => tracing::info!(version = version.version, "Serving model"),
        Ok(None) => tracing::warn!("No active model; /predict answers no_active_version"),
        Err(e) => tracing::error!(error = %e, "Model bootstrap failed; serving without a model"),
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let hub = Arc::new(IncidentHub::new(config.incidents.subscriber_buffer));
    let mut tasks = Vec::new();

    if let Some(secs) = config.training.retrain_interval_secs {
        tasks.push(scheduler::spawn_retrain_loop(
            Arc::clone(&components.orchestrator),
            Duration::from_secs(secs),
            shutdown_rx.clone(),
        ));
    }
    if let Some(secs) = config.fairness.interval_secs {
        tasks.push(scheduler::spawn_audit_loop(
            Arc::clone(&components.auditor),
            config.fairness.protected_attributes.clone(),
            Duration::from_secs(secs),
            shutdown_rx.clone(),
        ));
    }

    let feeds = build_feeds(
        &config.incidents,
        &config.alerts,
        &http_client(Duration::from_millis(config.alerts.channel_timeout_ms)),
    );
    if !feeds.is_empty() {
        let poller = IncidentPoller::new(
            feeds,
            Arc::clone(&hub),
            Duration::from_secs(config.incidents.poll_interval_secs),
        );
        tracing::info!(feeds = poller.feed_count(), "Incident poller enabled");
        tasks.push(tokio::spawn(poller.run(shutdown_rx.clone())));
    }

    let predictions = Arc::new(PredictionService::new(
        Arc::clone(&components.cache),
        components.records.clone(),
        Arc::clone(&components.dispatcher),
        config.serving.high_risk_probability,
    ));
    let state = AppState {
        predictions,
        orchestrator: Arc::clone(&components.orchestrator),
        auditor: Arc::clone(&components.auditor),
        feedback: components.records.clone(),
        hub,
        api_token: Arc::new(api_token),
        protected_attributes: config.fairness.protected_attributes.clone().into(),
        metrics,
    };

    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = signal_tx.send(true);
        }
    });

    let served = http::serve(&config.server.bind, http::router(state), shutdown_rx).await;

    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }
    served?;
    Ok(())
}

async fn cmd_retrain(components: Components, force: bool) -> Result<()> {
    components.orchestrator.bootstrap(false).await?;
    let ticket = components.orchestrator.begin()?;
    match components.orchestrator.run(ticket, force).await? {
        RetrainOutcome::Retrained { version, threshold } => {
            println!("Retrained: version {version}, threshold {threshold:.4}");
        },
        RetrainOutcome::Skipped { reason } => {
            println!("Skipped: {reason}");
        },
    }
    Ok(())
}

async fn cmd_audit(
    config: &RiskwatchConfig,
    components: Components,
    attributes: Vec<String>,
) -> Result<()> {
    let attributes = if attributes.is_empty() {
        config.fairness.protected_attributes.clone()
    } else {
        attributes
    };
    let results = components.auditor.audit(&attributes).await?;

    if results.is_empty() {
        println!("No attribute had at least two groups in the audited history");
        return Ok(());
    }
    for result in &results {
        let flag = if result.outcome_gap > components.auditor.max_gap() {
            "  EXCEEDS BOUND"
        } else {
            ""
        };
        println!(
            "{:<20} gap {:>6.2}%  groups {:>3}  records {:>6}{flag}",
            result.attribute_name,
            result.outcome_gap * 100.0,
            result.groups,
            result.records,
        );
    }
    Ok(())
}

async fn cmd_rollback(components: Components, version: u64) -> Result<()> {
    let active = components.orchestrator.rollback(version).await?;
    println!(
        "Rolled back to version {} (threshold {:.4})",
        active.version, active.threshold
    );
    Ok(())
}

fn cmd_status(config: &RiskwatchConfig, components: &Components) -> Result<()> {
    println!("Riskwatch Status");
    println!("================");
    match &config.source {
        Some(path) => println!("Config: {}", path.display()),
        None => println!("Config: defaults"),
    }
    println!("Model dir: {}", config.storage.model_dir.display());

    let versions = components.store.versions()?;
    println!("Published versions: {versions:?}");
    match components.store.get_current() {
        Ok(current) => {
            let summary = current.summary();
            println!(
                "Current: v{} ({}), threshold {:.4}, created {}",
                summary.version, summary.scorer_kind, summary.threshold, summary.created_at
            );
        },
        Err(e) => println!("Current: none ({e})"),
    }

    let feedback = components.records.feedback_since(None)?.len();
    let predictions = components.records.predictions_since(None)?.len();
    println!("Feedback records: {feedback}");
    println!("Prediction records: {predictions}");
    println!("Alert channels: {}", components.dispatcher.channel_count());
    Ok(())
}

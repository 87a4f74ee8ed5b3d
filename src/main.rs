use std::{path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::Parser;
use logtrail::{
    config::{
        AppConfig, ConfigError, CountBasedUpdate, ExportUpdate, RetentionPolicyUpdate,
        ScheduleUpdate, TimeBasedUpdate,
    },
    observability::{self, TracingError, metrics::MetricsError},
    retention::{
        RetentionConfigStore, RetentionDuration, RetentionError, RetentionManager,
        RetentionScheduler,
    },
    routes::{self, AppState},
    store::{self, StoreError},
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

/// CLI arguments for logtrail
#[derive(Parser, Debug)]
#[command(version, about = "Log retention service", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file. A missing file means built-in defaults.
    #[arg(short, long, global = true, default_value = "logtrail.toml")]
    config: PathBuf,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the HTTP control surface and the retention scheduler (default)
    Serve,
    /// Print the retention policy and store statistics
    Show,
    /// Run one retention cleanup now
    Cleanup {
        /// Report what would be deleted without exporting or deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Change retention settings. Omitted flags keep their current values.
    Update {
        #[arg(long)]
        time_enabled: Option<bool>,
        /// Retention duration, e.g. "7d", "2d12h", "45m"
        #[arg(long)]
        time_duration: Option<String>,
        #[arg(long)]
        count_enabled: Option<bool>,
        #[arg(long, allow_negative_numbers = true)]
        count_max: Option<i64>,
        #[arg(long)]
        export_enabled: Option<bool>,
        #[arg(long)]
        export_dir: Option<PathBuf>,
        /// Hours between scheduled cleanups; 0 disables periodic runs
        #[arg(long, allow_negative_numbers = true)]
        interval_hours: Option<i64>,
        #[arg(long)]
        on_startup: Option<bool>,
    },
    /// Check a duration string without changing anything
    ValidateDuration {
        duration: String,
    },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Tracing(#[from] TracingError),

    #[error(transparent)]
    Metrics(#[from] MetricsError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Retention(#[from] RetentionError),

    #[error("Failed to bind to {addr}: {source}")]
    Bind {
        addr: std::net::SocketAddr,
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(std::io::Error),

    #[error("Failed to render output: {0}")]
    Output(#[from] serde_json::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Duration checks need neither config nor logging
    if let Some(Command::ValidateDuration { duration }) = &args.command {
        return validate_duration(duration);
    }

    let config = match AppConfig::from_file_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(args.command.unwrap_or(Command::Serve), config).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "logtrail exited with an error");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: AppConfig) -> Result<ExitCode, CliError> {
    observability::init_tracing(&config.observability.logging)?;

    match command {
        Command::Serve => {
            run_server(config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Show => {
            let (manager, _) = build_engine(&config).await?;
            print_json(&manager.get_retention_info().await?)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Cleanup { dry_run } => {
            let (manager, _) = build_engine(&config).await?;
            let result = manager.cleanup_logs(dry_run).await?;
            print_json(&result)?;
            Ok(if result.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Command::Update {
            time_enabled,
            time_duration,
            count_enabled,
            count_max,
            export_enabled,
            export_dir,
            interval_hours,
            on_startup,
        } => {
            let update = RetentionPolicyUpdate {
                time_based: (time_enabled.is_some() || time_duration.is_some()).then(|| {
                    TimeBasedUpdate {
                        enabled: time_enabled,
                        duration: time_duration,
                    }
                }),
                count_based: (count_enabled.is_some() || count_max.is_some()).then(|| {
                    CountBasedUpdate {
                        enabled: count_enabled,
                        max_entries: count_max,
                    }
                }),
                export: (export_enabled.is_some() || export_dir.is_some()).then(|| ExportUpdate {
                    enabled: export_enabled,
                    output_directory: export_dir,
                    ..Default::default()
                }),
                schedule: (interval_hours.is_some() || on_startup.is_some()).then(|| {
                    ScheduleUpdate {
                        on_startup,
                        interval_hours,
                        last_execution: None,
                    }
                }),
            };

            let policy_store = RetentionConfigStore::load(config.retention.policy_path.clone())?;
            let policy = policy_store.update(&update).await?;
            print_json(&*policy)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ValidateDuration { duration } => Ok(validate_duration(&duration)),
    }
}

/// Open the store and the policy file, and wire up a manager.
async fn build_engine(
    config: &AppConfig,
) -> Result<(RetentionManager, Arc<dyn store::LogStore>), CliError> {
    let log_store = store::create_store(&config.database).await?;
    let policy_store = Arc::new(RetentionConfigStore::load(
        config.retention.policy_path.clone(),
    )?);
    let manager = RetentionManager::new(policy_store, Arc::clone(&log_store));
    Ok((manager, log_store))
}

async fn run_server(config: AppConfig) -> Result<(), CliError> {
    observability::metrics::init_metrics(&config.observability.metrics)?;

    let (manager, log_store) = build_engine(&config).await?;

    let shutdown = CancellationToken::new();
    let scheduler = RetentionScheduler::new(manager.clone())
        .with_shutdown(shutdown.clone())
        .spawn();

    let app = routes::router(AppState::new(manager, log_store))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.server.body_limit_bytes));

    let addr = config.server.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| CliError::Bind { addr, source })?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await
        .map_err(CliError::Serve)?;

    // A cleanup in flight finishes on its own task; wait for the scheduler to notice.
    shutdown.cancel();
    match tokio::time::timeout(Duration::from_secs(30), scheduler).await {
        Ok(Ok(())) => tracing::info!("Retention scheduler stopped"),
        Ok(Err(e)) => tracing::warn!(error = %e, "Retention scheduler task failed"),
        Err(_) => tracing::warn!("Timeout waiting for retention scheduler to stop"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
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
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = shutdown.cancelled() => {},
    }

    tracing::info!("Shutdown signal received, stopping retention scheduler...");
    shutdown.cancel();
}

fn validate_duration(text: &str) -> ExitCode {
    match RetentionDuration::parse(text) {
        Ok(duration) => {
            println!(
                "{} = {} ({} seconds)",
                duration,
                duration.human_readable(),
                duration.total_seconds()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

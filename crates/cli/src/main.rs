mod cleanup_commands;
mod db;
mod doctor_commands;
mod policy_commands;

use std::{path::PathBuf, sync::Arc};

use {
    anyhow::{Context, Result},
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
    warmbox_config::{Severity, WarmboxConfig},
    warmbox_metrics::MetricsRecorderConfig,
    warmbox_policy::SqlitePolicyStore,
    warmbox_pool::PoolManager,
    warmbox_runtime::DockerCli,
};

#[derive(Parser)]
#[command(name = "warmbox", about = "warmbox: warm container pool for agent sandboxes")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file to load instead of the discovered one.
    #[arg(long, global = true, env = "WARMBOX_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pool until interrupted (default when no subcommand is provided).
    Serve {
        /// Install the Prometheus recorder and dump metrics on exit.
        #[arg(long, default_value_t = false)]
        metrics: bool,
    },
    /// Check config, container runtime and database health.
    Doctor,
    /// Remove leftover sandbox containers from previous runs.
    Cleanup,
    /// Per-agent resource policy management.
    Policy {
        #[command(subcommand)]
        action: policy_commands::PolicyAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Explicit `--config` must load; otherwise fall back to discovery.
fn load_config(cli: &Cli) -> Result<WarmboxConfig> {
    match cli.config {
        Some(ref path) => warmbox_config::load_config(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(warmbox_config::discover_and_load()),
    }
}

async fn serve(config: WarmboxConfig, metrics: bool) -> Result<()> {
    let validation = warmbox_config::validate(&config);
    for d in &validation.diagnostics {
        match d.severity {
            Severity::Error => warn!(path = %d.path, "config error: {}", d.message),
            Severity::Warning => warn!(path = %d.path, "config warning: {}", d.message),
        }
    }
    if validation.has_errors() {
        anyhow::bail!("configuration is invalid, run `warmbox doctor` for details");
    }

    let metrics_handle = warmbox_metrics::init_metrics(MetricsRecorderConfig {
        enabled: metrics,
        ..Default::default()
    })?;

    let db = db::open(&config).await?;
    let policies = Arc::new(SqlitePolicyStore::new(db, config.limits.clone()));
    let runtime = Arc::new(DockerCli::new(config.runtime.clone()));
    let manager = PoolManager::new(config.pool.clone(), config.limits.clone(), runtime, policies);

    if !manager.initialize().await {
        warn!("container runtime unavailable, assignments will be rejected");
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    let stats = manager.get_pool_stats().await;
    info!(
        total = stats.total,
        warm = stats.warm,
        assigned = stats.assigned,
        "interrupt received, shutting down pool"
    );
    manager.shutdown().await;

    if metrics {
        println!("{}", metrics_handle.render());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "warmbox starting");

    let config = load_config(&cli)?;

    match cli.command {
        None => serve(config, false).await,
        Some(Commands::Serve { metrics }) => serve(config, metrics).await,
        Some(Commands::Doctor) => doctor_commands::handle_doctor(&config).await,
        Some(Commands::Cleanup) => cleanup_commands::handle_cleanup(&config).await,
        Some(Commands::Policy { action }) => policy_commands::handle_policy(&config, action).await,
    }
}

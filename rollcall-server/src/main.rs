//! # Rollcall Server
//!
//! Attendance delivery pipeline.
//!
//! ## Overview
//!
//! - **serve** (default): ingress gate, live observer feed and health check
//! - **worker**: one or more batch committers moving the event log into
//!   PostgreSQL
//! - **db migrate**: apply the relational schema and exit
//!
//! ## Architecture
//!
//! - Redis/Valkey streams as the durable event log
//! - PostgreSQL as the system of record
//! - Axum for HTTP and WebSocket

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use rollcall_core::{
    committer::BatchCommitter,
    log::{EventLog, RedisEventLog},
    store::PostgresAttendanceStore,
};
use rollcall_server::{
    AppState,
    infra::{
        config::{Config, ConfigLoad, ConfigLoader},
        startup::{ProdStartupHooks, StartupHooks},
    },
    routes,
};
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "rollcall-server")]
#[command(
    about = "Attendance ingress gate, live feed and batch committer workers"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run batch committer workers until interrupted
    Worker(WorkerArgs),
    #[command(subcommand)]
    Db(DbCommand),
}

#[derive(ClapArgs, Debug, Clone)]
struct WorkerArgs {
    /// Number of committer instances in this process (overrides config)
    #[arg(long, env = "WORKER_INSTANCES")]
    instances: Option<usize>,

    /// Consumer name prefix; instances are named `<consumer>-<n>`
    #[arg(long, env = "CONSUMER_NAME")]
    consumer: Option<String>,
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    /// Apply database migrations and exit
    Migrate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Command::Worker(args)) => run_workers(args).await,
        Some(Command::Db(DbCommand::Migrate)) => run_db_migrate().await,
        None => run_server(cli.serve).await,
    }
}

fn load_runtime_config() -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } = ConfigLoader::new()
        .load()
        .context("failed to load configuration")?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "configuration file loaded");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => warn!(hint = %hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }

    Ok(config)
}

fn require_database_url(config: &Config) -> anyhow::Result<&str> {
    config.database.primary_url.as_deref().context(
        "no database URL configured; set DATABASE_URL or \
         DATABASE_HOST/DATABASE_USER/DATABASE_NAME",
    )
}

async fn run_db_migrate() -> anyhow::Result<()> {
    let config = load_runtime_config()?;
    let database_url = require_database_url(&config)?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(database_url)
        .await
        .context("failed to connect to PostgreSQL for migration")?;
    rollcall_core::MIGRATOR
        .run(&pool)
        .await
        .context("database migration failed")?;

    info!("Database migrations applied successfully");
    Ok(())
}

async fn run_server(args: ServeArgs) -> anyhow::Result<()> {
    run_server_with_hooks(args, &ProdStartupHooks).await
}

async fn run_server_with_hooks<H>(
    args: ServeArgs,
    hooks: &H,
) -> anyhow::Result<()>
where
    H: StartupHooks,
{
    let mut config = load_runtime_config()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    let config = Arc::new(config);

    // The gate and the bridge each hold their own connection; the bridge's
    // blocking reads must never delay an append. Both connect on first use,
    // so the server comes up even while the log is down.
    let ingress_log: Arc<dyn EventLog> = Arc::new(
        RedisEventLog::connect_lazy(&config.log.url, config.stream_settings())
            .context("invalid event log URL")?,
    );
    let fanout_log: Arc<dyn EventLog> = Arc::new(
        RedisEventLog::connect_lazy(&config.log.url, config.stream_settings())
            .context("invalid event log URL")?,
    );

    let shutdown = CancellationToken::new();
    let state = AppState::new(
        Arc::clone(&config),
        ingress_log,
        fanout_log,
        shutdown.clone(),
    );

    hooks.run(&state).await?;

    let router = routes::create_app(state);
    let addr: SocketAddr =
        format!("{}:{}", config.server.host, config.server.port)
            .parse()
            .context("invalid server address")?;

    info!("Starting Rollcall server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let signal_token = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            signal_token.cancel();
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn run_workers(args: WorkerArgs) -> anyhow::Result<()> {
    let mut config = load_runtime_config()?;
    if let Some(instances) = args.instances {
        anyhow::ensure!(instances > 0, "--instances must be greater than zero");
        config.committer.instances = instances;
    }
    if let Some(consumer) = args.consumer {
        config.committer.consumer = consumer;
    }
    let database_url = require_database_url(&config)?.to_string();

    let cancel = CancellationToken::new();
    let mut workers = JoinSet::new();

    for instance in 1..=config.committer.instances {
        let committer_config = config.committer_config(instance);

        // Every instance owns its own log connection and pool. Both connect
        // on first use; an outage is retried by the committer's backoff.
        let log = RedisEventLog::connect_lazy(
            &config.log.url,
            config.stream_settings(),
        )
        .context("invalid event log URL")?;
        let store = PostgresAttendanceStore::connect_lazy(
            &database_url,
            &config.pool_settings(),
        )
        .context("invalid database URL")?;

        info!(
            consumer = %committer_config.consumer,
            group = %committer_config.group,
            batch_size = committer_config.batch_size,
            "Starting committer"
        );

        let committer = BatchCommitter::new(
            Arc::new(log),
            Arc::new(store),
            committer_config,
        );
        workers.spawn(committer.run(cancel.clone()));
    }

    tokio::select! {
        _ = shutdown_signal() => {
            info!("Shutdown requested; finishing in-flight batches");
            cancel.cancel();
        }
        Some(result) = workers.join_next() => {
            if let Err(err) = result {
                error!(error = %err, "Committer task ended unexpectedly");
            }
            cancel.cancel();
        }
    }

    while let Some(result) = workers.join_next().await {
        if let Err(err) = result {
            error!(error = %err, "Committer task failed during shutdown");
        }
    }

    info!("Workers stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!(error = %err, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

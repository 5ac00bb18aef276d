mod cli;

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use sqlx::PgPool;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cli::{Cli, Commands, DbCommands};
use payflow_core::adapters::Repositories;
use payflow_core::config::{Config, LogFormat};
use payflow_core::health::{DependencyChecker, HealthService, PostgresChecker, ProcessorChecker};
use payflow_core::processor::{self, PaymentProcessor};
use payflow_core::secrets::SecretsManager;
use payflow_core::{create_app, db, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    init_tracing(config.log_format);

    if SecretsManager::is_configured() {
        let secrets = SecretsManager::new().await?;
        secrets.apply_to(&mut config).await?;
    }

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Db(DbCommands::Migrate) => cli::handle_db_migrate(&config).await,
        Commands::Config => {
            let processor = processor::from_config(&config);
            let pool = connect(&config).await?;
            cli::handle_config_validate(&config, pool.as_ref(), processor.as_ref()).await
        }
        Commands::Reconcile => {
            let (state, _pool) = bootstrap(&config).await?;
            cli::handle_reconcile(&state).await
        }
        Commands::Expire => {
            let (state, _pool) = bootstrap(&config).await?;
            cli::handle_expire(&state).await
        }
        Commands::Audit { account_id } => {
            let (state, _pool) = bootstrap(&config).await?;
            cli::handle_audit(&state, account_id).await
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn connect(config: &Config) -> anyhow::Result<Option<PgPool>> {
    match config.database_url.as_deref() {
        Some(url) => Ok(Some(db::create_pool(url).await?)),
        None => Ok(None),
    }
}

/// Storage, processor and services, with migrations applied.
async fn bootstrap(config: &Config) -> anyhow::Result<(AppState, Option<PgPool>)> {
    let processor: Arc<dyn PaymentProcessor> = processor::from_config(config);
    let mut checkers: Vec<Box<dyn DependencyChecker>> =
        vec![Box::new(ProcessorChecker::new(processor.clone()))];

    let pool = connect(config).await?;
    let repos = match &pool {
        Some(pool) => {
            db::run_migrations(pool).await?;
            checkers.push(Box::new(PostgresChecker::new(pool.clone())));
            Repositories::postgres(pool.clone())
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store; state is lost on exit");
            Repositories::in_memory()
        }
    };

    let state = AppState::new(config, repos, processor, HealthService::new(checkers));
    Ok((state, pool))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    config.validate()?;
    let (state, _pool) = bootstrap(&config).await?;

    // Intents left open by a previous run: credited ones are finalized, the
    // rest are polled once. Pending withdrawals with a debit become approved.
    let reconciler = state.reconciler.clone();
    let withdrawals = state.withdrawals.clone();
    tokio::spawn(async move {
        if let Err(e) = reconciler.reconcile_open().await {
            tracing::error!(error = %e, "startup reconciliation failed");
        }
        if let Err(e) = withdrawals.reconcile_pending().await {
            tracing::error!(error = %e, "startup withdrawal recovery failed");
        }
    });

    tokio::spawn(state.watchdog.clone().run());

    let polling = state.polling.clone();
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    polling.stop_all();
    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

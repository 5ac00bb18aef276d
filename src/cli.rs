use clap::{Parser, Subcommand};
use sqlx::PgPool;
use uuid::Uuid;

use payflow_core::config::Config;
use payflow_core::processor::PaymentProcessor;
use payflow_core::startup;
use payflow_core::AppState;

#[derive(Parser)]
#[command(name = "payflow-core")]
#[command(about = "Payflow Core - deposit, withdrawal and balance ledger engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Run one recovery pass over all open deposit intents
    Reconcile,

    /// Run one expiry sweep
    Expire,

    /// Compare an account's cached balance with its ledger
    Audit {
        /// Account UUID
        #[arg(value_name = "ACCOUNT_ID")]
        account_id: Uuid,
    },

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_reconcile(state: &AppState) -> anyhow::Result<()> {
    let report = state.reconciler.reconcile_open().await?;
    let withdrawals = state.withdrawals.reconcile_pending().await?;

    println!("✓ Reconciliation pass complete");
    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("✓ {} pending withdrawal(s) finalized from the ledger", withdrawals);
    if report.errors > 0 {
        anyhow::bail!("{} intent(s) could not be reconciled", report.errors);
    }
    Ok(())
}

pub async fn handle_expire(state: &AppState) -> anyhow::Result<()> {
    let report = state.watchdog.sweep(chrono::Utc::now()).await?;

    println!("✓ Expiry sweep complete");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

pub async fn handle_audit(state: &AppState, account_id: Uuid) -> anyhow::Result<()> {
    let audit = state.ledger.audit(account_id).await?;

    println!("{}", serde_json::to_string_pretty(&audit)?);
    if !audit.consistent {
        anyhow::bail!("Account {} balance does not match its ledger", account_id);
    }
    println!("✓ Account {} is consistent", account_id);
    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let Some(database_url) = config.database_url.as_deref() else {
        anyhow::bail!("DATABASE_URL is required to run migrations");
    };

    let pool = payflow_core::db::create_pool(database_url).await?;
    tracing::info!("Running database migrations...");
    payflow_core::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub async fn handle_config_validate(
    config: &Config,
    pool: Option<&PgPool>,
    processor: &dyn PaymentProcessor,
) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    match &config.database_url {
        Some(url) => println!("  Database URL: {}", mask_password(url)),
        None => println!("  Database URL: (none, in-memory store)"),
    }
    println!("  Processor URL: {}", config.processor_api_url);
    println!(
        "  Processor Mode: {}",
        if config.uses_sandbox() { "sandbox" } else { "live" }
    );
    println!("  Price Currency: {}", config.price_currency);
    println!("  Min Deposit: {}", config.min_deposit_amount);
    println!("  Min Withdrawal: {}", config.min_withdrawal_amount);
    println!(
        "  Bank Deposits: {}",
        if config.bank_iban.is_some() { "enabled" } else { "disabled" }
    );

    let report = startup::validate_environment(config, pool, processor).await;
    report.print();

    if !report.is_valid() {
        anyhow::bail!("Configuration is invalid");
    }
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

use crate::config::Config;
use crate::processor::PaymentProcessor;
use anyhow::{Context, Result};
use sqlx::PgPool;

pub struct ValidationReport {
    pub environment: bool,
    /// `None` when running on the in-memory store.
    pub database: Option<bool>,
    pub processor: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database.unwrap_or(true) && self.processor
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Configuration:         {}", status(self.environment));
        match self.database {
            Some(ok) => println!("Database Connectivity: {}", status(ok)),
            None => println!("Database Connectivity: - (in-memory store)"),
        }
        println!("Processor Reachable:   {}", status(self.processor));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(
    config: &Config,
    pool: Option<&PgPool>,
    processor: &dyn PaymentProcessor,
) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        database: None,
        processor: true,
        errors: Vec::new(),
    };

    if let Err(e) = config.validate() {
        report.environment = false;
        report.errors.push(format!("Configuration: {}", e));
    }

    if let Some(pool) = pool {
        match validate_database(pool).await {
            Ok(()) => report.database = Some(true),
            Err(e) => {
                report.database = Some(false);
                report.errors.push(format!("Database: {:#}", e));
            }
        }
    }

    if let Err(e) = processor.ping().await {
        report.processor = false;
        report.errors.push(format!("Processor: {}", e));
    }

    report
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

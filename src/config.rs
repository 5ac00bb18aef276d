use anyhow::Context;
use bigdecimal::BigDecimal;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::DepositSettings;

pub const DEFAULT_PROCESSOR_URL: &str = "https://api.nowpayments.io/v1";

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Plain,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "plain" | "text" => Ok(LogFormat::Plain),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'plain' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    /// Absent: in-memory store.
    pub database_url: Option<String>,
    pub processor_api_url: String,
    /// Absent: sandbox processor.
    pub processor_api_key: Option<String>,
    pub processor_webhook_secret: String,
    pub processor_callback_url: Option<String>,
    pub admin_api_key: String,
    pub min_deposit_amount: BigDecimal,
    pub min_withdrawal_amount: BigDecimal,
    pub price_currency: String,
    pub poll_interval_secs: u64,
    pub watchdog_interval_secs: u64,
    pub default_expiry_minutes: i64,
    pub bank_deposit_window_hours: i64,
    pub bank_iban: Option<String>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_port: 3000,
            database_url: None,
            processor_api_url: DEFAULT_PROCESSOR_URL.to_string(),
            processor_api_key: None,
            processor_webhook_secret: String::new(),
            processor_callback_url: None,
            admin_api_key: String::new(),
            min_deposit_amount: BigDecimal::from(10),
            min_withdrawal_amount: BigDecimal::from(10),
            price_currency: "usd".to_string(),
            poll_interval_secs: 15,
            watchdog_interval_secs: 30,
            default_expiry_minutes: 20,
            bank_deposit_window_hours: 72,
            bank_iban: None,
            log_format: LogFormat::Plain,
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let defaults = Config::default();
        Ok(Config {
            server_port: parse_var("SERVER_PORT", defaults.server_port)?,
            database_url: optional_var("DATABASE_URL"),
            processor_api_url: optional_var("PROCESSOR_API_URL")
                .unwrap_or(defaults.processor_api_url),
            processor_api_key: optional_var("PROCESSOR_API_KEY"),
            processor_webhook_secret: optional_var("PROCESSOR_WEBHOOK_SECRET").unwrap_or_default(),
            processor_callback_url: optional_var("PROCESSOR_CALLBACK_URL"),
            admin_api_key: optional_var("ADMIN_API_KEY").unwrap_or_default(),
            min_deposit_amount: parse_var("MIN_DEPOSIT_AMOUNT", defaults.min_deposit_amount)?,
            min_withdrawal_amount: parse_var(
                "MIN_WITHDRAWAL_AMOUNT",
                defaults.min_withdrawal_amount,
            )?,
            price_currency: optional_var("PRICE_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or(defaults.price_currency),
            poll_interval_secs: parse_var("POLL_INTERVAL_SECS", defaults.poll_interval_secs)?,
            watchdog_interval_secs: parse_var(
                "WATCHDOG_INTERVAL_SECS",
                defaults.watchdog_interval_secs,
            )?,
            default_expiry_minutes: parse_var(
                "DEFAULT_EXPIRY_MINUTES",
                defaults.default_expiry_minutes,
            )?,
            bank_deposit_window_hours: parse_var(
                "BANK_DEPOSIT_WINDOW_HOURS",
                defaults.bank_deposit_window_hours,
            )?,
            bank_iban: optional_var("BANK_IBAN"),
            log_format: parse_var("LOG_FORMAT", defaults.log_format)?,
        })
    }

    /// Checks the settings the server cannot run without.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.processor_webhook_secret.is_empty() {
            anyhow::bail!("PROCESSOR_WEBHOOK_SECRET is required");
        }
        if self.admin_api_key.is_empty() {
            anyhow::bail!("ADMIN_API_KEY is required");
        }
        if self.server_port == 0 {
            anyhow::bail!("SERVER_PORT must be greater than 0");
        }
        if self.poll_interval_secs == 0 || self.watchdog_interval_secs == 0 {
            anyhow::bail!("POLL_INTERVAL_SECS and WATCHDOG_INTERVAL_SECS must be positive");
        }
        if self.default_expiry_minutes <= 0 || self.bank_deposit_window_hours <= 0 {
            anyhow::bail!("DEFAULT_EXPIRY_MINUTES and BANK_DEPOSIT_WINDOW_HOURS must be positive");
        }
        if self.min_deposit_amount <= BigDecimal::from(0)
            || self.min_withdrawal_amount <= BigDecimal::from(0)
        {
            anyhow::bail!("minimum amounts must be greater than zero");
        }
        url::Url::parse(&self.processor_api_url)
            .context("PROCESSOR_API_URL is not a valid URL")?;
        if let Some(callback) = &self.processor_callback_url {
            url::Url::parse(callback).context("PROCESSOR_CALLBACK_URL is not a valid URL")?;
        }
        if let Some(iban) = &self.bank_iban {
            crate::validation::Network::Bank
                .validate_address(iban)
                .map_err(|e| anyhow::anyhow!("BANK_IBAN is invalid: {}", e))?;
        }
        Ok(())
    }

    pub fn deposit_settings(&self) -> DepositSettings {
        DepositSettings {
            min_amount: self.min_deposit_amount.clone(),
            price_currency: self.price_currency.clone(),
            default_expiry: chrono::Duration::minutes(self.default_expiry_minutes),
            bank_window: chrono::Duration::hours(self.bank_deposit_window_hours),
            bank_iban: self.bank_iban.clone(),
            callback_url: self.processor_callback_url.clone(),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    pub fn uses_sandbox(&self) -> bool {
        self.processor_api_key.is_none()
    }
}

fn optional_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", name, e)),
        None => Ok(default),
    }
}

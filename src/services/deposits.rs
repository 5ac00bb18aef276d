//! Deposit intent creation.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{DepositIntent, DepositStatus, PaymentMethod};
use crate::ports::{DepositRepository, RepositoryError};
use crate::processor::{CreatePaymentRequest, PaymentProcessor};
use crate::services::{EngineError, LedgerService};
use crate::validation::{
    sanitize_string, validate_amount_scale, validate_currency_code, validate_positive_amount,
};

#[derive(Debug, Clone)]
pub struct DepositSettings {
    pub min_amount: BigDecimal,
    pub price_currency: String,
    pub default_expiry: Duration,
    pub bank_window: Duration,
    pub bank_iban: Option<String>,
    pub callback_url: Option<String>,
}

impl Default for DepositSettings {
    fn default() -> Self {
        Self {
            min_amount: BigDecimal::from(10),
            price_currency: "usd".to_string(),
            default_expiry: Duration::minutes(20),
            bank_window: Duration::hours(72),
            bank_iban: None,
            callback_url: None,
        }
    }
}

pub struct DepositTracker {
    deposits: Arc<dyn DepositRepository>,
    ledger: Arc<LedgerService>,
    processor: Arc<dyn PaymentProcessor>,
    settings: DepositSettings,
}

impl DepositTracker {
    pub fn new(
        deposits: Arc<dyn DepositRepository>,
        ledger: Arc<LedgerService>,
        processor: Arc<dyn PaymentProcessor>,
        settings: DepositSettings,
    ) -> Self {
        Self {
            deposits,
            ledger,
            processor,
            settings,
        }
    }

    pub fn settings(&self) -> &DepositSettings {
        &self.settings
    }

    fn check_amount(&self, amount: &BigDecimal) -> Result<(), EngineError> {
        validate_positive_amount(amount)?;
        validate_amount_scale(amount)?;
        if *amount < self.settings.min_amount {
            return Err(EngineError::BelowMinimum {
                amount: amount.clone(),
                minimum: self.settings.min_amount.clone(),
            });
        }
        Ok(())
    }

    /// Opens a processor payment and records it locally in `waiting`.
    ///
    /// Nothing is stored when the processor call fails.
    pub async fn create_deposit(
        &self,
        account_id: Uuid,
        amount: BigDecimal,
        pay_currency: &str,
    ) -> Result<DepositIntent, EngineError> {
        self.check_amount(&amount)?;
        validate_currency_code("pay_currency", pay_currency)?;
        self.ledger.account(account_id).await?;

        let pay_currency = sanitize_string(pay_currency).to_lowercase();
        let intent_id = Uuid::new_v4();
        let request = CreatePaymentRequest {
            price_amount: amount.clone(),
            price_currency: self.settings.price_currency.clone(),
            pay_currency: pay_currency.clone(),
            order_id: intent_id.to_string(),
            callback_url: self.settings.callback_url.clone(),
        };

        let created = self.processor.create_payment(&request).await.map_err(|e| {
            warn!(account_id = %account_id, error = %e, "processor rejected new deposit");
            EngineError::from(e)
        })?;

        let now = Utc::now();
        let intent = DepositIntent {
            id: intent_id,
            account_id,
            method: PaymentMethod::Crypto,
            amount,
            price_currency: self.settings.price_currency.clone(),
            pay_currency,
            payment_id: created.payment_id,
            pay_address: created.pay_address,
            pay_amount: created.pay_amount,
            status: DepositStatus::Waiting,
            expiration_estimate: created
                .expiration_estimate
                .unwrap_or(now + self.settings.default_expiry),
            created_at: now,
            updated_at: now,
        };

        let stored = self.deposits.insert(&intent).await?;
        info!(
            payment_id = %stored.payment_id,
            account_id = %account_id,
            amount = %stored.amount,
            pay_currency = %stored.pay_currency,
            expires_at = %stored.expiration_estimate,
            "deposit intent created"
        );
        Ok(stored)
    }

    /// Records a bank transfer intent. Its status is reported by the bank
    /// back-office rather than the processor.
    pub async fn create_bank_deposit(
        &self,
        account_id: Uuid,
        amount: BigDecimal,
    ) -> Result<DepositIntent, EngineError> {
        let iban = self.settings.bank_iban.clone().ok_or_else(|| {
            EngineError::ProcessorUnavailable("bank deposits are not configured".to_string())
        })?;
        self.check_amount(&amount)?;
        self.ledger.account(account_id).await?;

        let now = Utc::now();
        let intent = DepositIntent {
            id: Uuid::new_v4(),
            account_id,
            method: PaymentMethod::Bank,
            amount: amount.clone(),
            price_currency: self.settings.price_currency.clone(),
            pay_currency: self.settings.price_currency.clone(),
            payment_id: bank_reference(),
            pay_address: iban,
            pay_amount: amount,
            status: DepositStatus::Waiting,
            expiration_estimate: now + self.settings.bank_window,
            created_at: now,
            updated_at: now,
        };

        let stored = self.deposits.insert(&intent).await?;
        info!(
            payment_id = %stored.payment_id,
            account_id = %account_id,
            amount = %stored.amount,
            "bank deposit intent created"
        );
        Ok(stored)
    }

    pub async fn get(&self, payment_id: &str) -> Result<DepositIntent, EngineError> {
        self.deposits
            .get_by_payment_id(payment_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => EngineError::DepositNotFound(payment_id.to_string()),
                other => other.into(),
            })
    }

    pub async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DepositIntent>, EngineError> {
        Ok(self
            .deposits
            .list_for_account(account_id, limit, offset)
            .await?)
    }
}

/// Transfer reference the payer quotes on the bank transfer.
fn bank_reference() -> String {
    let id = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("BANK-{}", &id[..12])
}

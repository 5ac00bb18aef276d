pub mod client;
pub mod sandbox;

pub use client::ProcessorClient;
pub use sandbox::SandboxProcessor;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessorError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Payment not found: {0}")]
    PaymentNotFound(String),
    #[error("Invalid response from processor: {0}")]
    InvalidResponse(String),
    #[error("Processor rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
    #[error("Processor unavailable: {0}")]
    Unavailable(String),
}

impl ProcessorError {
    /// Whether this failure says the processor is unhealthy. Client errors
    /// (4xx other than 429) describe our request, not the upstream.
    pub fn trips_breaker(&self) -> bool {
        match self {
            ProcessorError::PaymentNotFound(_) => false,
            ProcessorError::Rejected { status, .. } => {
                !((400..500).contains(status) && *status != 429)
            }
            _ => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreatePaymentRequest {
    pub price_amount: BigDecimal,
    pub price_currency: String,
    pub pay_currency: String,
    pub order_id: String,
    pub callback_url: Option<String>,
}

/// What the processor hands back for a new payment.
#[derive(Debug, Clone)]
pub struct CreatedPayment {
    pub payment_id: String,
    pub pay_address: String,
    pub pay_amount: BigDecimal,
    pub expiration_estimate: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatedPayment, ProcessorError>;

    /// Raw provider status string for `payment_id`.
    async fn get_payment_status(&self, payment_id: &str) -> Result<String, ProcessorError>;

    /// Cheap reachability check used by startup validation.
    async fn ping(&self) -> Result<(), ProcessorError>;
}

/// The live client when an API key is configured, the sandbox otherwise.
pub fn from_config(config: &crate::config::Config) -> std::sync::Arc<dyn PaymentProcessor> {
    match &config.processor_api_key {
        Some(api_key) => {
            tracing::info!(url = %config.processor_api_url, "using hosted payment processor");
            std::sync::Arc::new(ProcessorClient::new(
                config.processor_api_url.clone(),
                api_key.clone(),
            ))
        }
        None => {
            tracing::warn!("PROCESSOR_API_KEY not set, using sandbox processor");
            std::sync::Arc::new(SandboxProcessor::with_expiry(chrono::Duration::minutes(
                config.default_expiry_minutes,
            )))
        }
    }
}

//! In-process processor for local development and tests.
//!
//! Payments start in `waiting`; statuses are scripted with [`SandboxProcessor::set_status`].

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use super::{CreatePaymentRequest, CreatedPayment, PaymentProcessor, ProcessorError};

pub struct SandboxProcessor {
    statuses: Mutex<HashMap<String, String>>,
    expiry: Duration,
    pending_failures: AtomicU32,
    status_calls: AtomicUsize,
}

impl SandboxProcessor {
    pub fn new() -> Self {
        Self::with_expiry(Duration::minutes(20))
    }

    pub fn with_expiry(expiry: Duration) -> Self {
        Self {
            statuses: Mutex::new(HashMap::new()),
            expiry,
            pending_failures: AtomicU32::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    /// Scripts the status the next polls will observe.
    pub fn set_status(&self, payment_id: &str, status: &str) {
        if let Ok(mut statuses) = self.statuses.lock() {
            statuses.insert(payment_id.to_string(), status.to_string());
        }
    }

    /// Makes the next `count` processor calls fail as if the network was down.
    pub fn fail_next(&self, count: u32) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn address_for(pay_currency: &str, payment_id: &str) -> String {
        let hex = payment_id.replace('-', "");
        match pay_currency.to_lowercase().as_str() {
            "eth" | "usdterc20" | "usdc" => format!("0x{:0<40}", &hex[..hex.len().min(40)]),
            _ => format!("sandbox-{}-{}", pay_currency.to_lowercase(), hex),
        }
    }
}

impl Default for SandboxProcessor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentProcessor for SandboxProcessor {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatedPayment, ProcessorError> {
        if self.take_failure() {
            return Err(ProcessorError::Unavailable("sandbox failure injected".into()));
        }

        let payment_id = Uuid::new_v4().simple().to_string();
        self.set_status(&payment_id, "waiting");

        Ok(CreatedPayment {
            pay_address: Self::address_for(&request.pay_currency, &payment_id),
            pay_amount: request.price_amount.clone(),
            expiration_estimate: Some(Utc::now() + self.expiry),
            payment_id,
        })
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<String, ProcessorError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            return Err(ProcessorError::Unavailable("sandbox failure injected".into()));
        }

        let statuses = self
            .statuses
            .lock()
            .map_err(|_| ProcessorError::Unavailable("sandbox state poisoned".into()))?;
        statuses
            .get(payment_id)
            .cloned()
            .ok_or_else(|| ProcessorError::PaymentNotFound(payment_id.to_string()))
    }

    async fn ping(&self) -> Result<(), ProcessorError> {
        Ok(())
    }
}

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use super::{CreatePaymentRequest, CreatedPayment, PaymentProcessor, ProcessorError};

/// Body of `POST /payment`.
#[derive(Debug, Serialize)]
struct PaymentBody<'a> {
    price_amount: String,
    price_currency: &'a str,
    pay_currency: &'a str,
    order_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ipn_callback_url: Option<&'a str>,
}

/// Response from `POST /payment`
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub payment_id: String,
    pub payment_status: Option<String>,
    pub pay_address: String,
    #[serde(deserialize_with = "string_or_number")]
    pub pay_amount: String,
    pub expiration_estimate_date: Option<String>,
}

/// Response from `GET /payment/{id}`
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentStatusResponse {
    #[serde(deserialize_with = "string_or_number")]
    pub payment_id: String,
    pub payment_status: String,
}

pub(crate) fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// HTTP client for the hosted payment processor.
#[derive(Clone)]
pub struct ProcessorClient {
    client: Client,
    base_url: String,
    api_key: String,
    circuit_breaker: Breaker,
}

impl ProcessorClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self::with_circuit_breaker(base_url, api_key, 3, 60)
    }

    /// Creates a ProcessorClient with custom circuit breaker configuration
    pub fn with_circuit_breaker(
        base_url: String,
        api_key: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        ProcessorClient {
            client,
            base_url,
            api_key,
            circuit_breaker,
        }
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn guarded<T, F>(&self, call: F) -> Result<T, ProcessorError>
    where
        F: Future<Output = Result<T, ProcessorError>>,
    {
        match self
            .circuit_breaker
            .call_with(ProcessorError::trips_breaker, call)
            .await
        {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => Err(ProcessorError::CircuitBreakerOpen(
                "payment processor circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[async_trait]
impl PaymentProcessor for ProcessorClient {
    async fn create_payment(
        &self,
        request: &CreatePaymentRequest,
    ) -> Result<CreatedPayment, ProcessorError> {
        let url = self.url("payment");
        let body = PaymentBody {
            price_amount: request.price_amount.to_string(),
            price_currency: &request.price_currency,
            pay_currency: &request.pay_currency,
            order_id: &request.order_id,
            ipn_callback_url: request.callback_url.as_deref(),
        };

        let response = self
            .guarded(async {
                let response = self
                    .client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .json(&body)
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProcessorError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }

                Ok(response.json::<PaymentResponse>().await?)
            })
            .await?;

        let pay_amount = BigDecimal::from_str(&response.pay_amount).map_err(|e| {
            ProcessorError::InvalidResponse(format!("pay_amount {}: {}", response.pay_amount, e))
        })?;

        let expiration_estimate = match response.expiration_estimate_date.as_deref() {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| {
                        ProcessorError::InvalidResponse(format!(
                            "expiration_estimate_date {}: {}",
                            raw, e
                        ))
                    })?
                    .with_timezone(&Utc),
            ),
            None => None,
        };

        Ok(CreatedPayment {
            payment_id: response.payment_id,
            pay_address: response.pay_address,
            pay_amount,
            expiration_estimate,
        })
    }

    async fn get_payment_status(&self, payment_id: &str) -> Result<String, ProcessorError> {
        let url = self.url(&format!("payment/{}", payment_id));

        let response = self
            .guarded(async {
                let response = self
                    .client
                    .get(&url)
                    .header("x-api-key", &self.api_key)
                    .send()
                    .await?;

                if response.status() == StatusCode::NOT_FOUND {
                    return Err(ProcessorError::PaymentNotFound(payment_id.to_string()));
                }

                let status = response.status();
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ProcessorError::Rejected {
                        status: status.as_u16(),
                        body,
                    });
                }

                Ok(response.json::<PaymentStatusResponse>().await?)
            })
            .await?;

        Ok(response.payment_status)
    }

    async fn ping(&self) -> Result<(), ProcessorError> {
        let response = self.client.get(self.url("status")).send().await?;
        if !response.status().is_success() {
            return Err(ProcessorError::Unavailable(format!(
                "status endpoint returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}

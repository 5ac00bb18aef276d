use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::error::AppError;
use crate::processor::client::string_or_number;
use crate::services::{EngineError, SignalSource};
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-processor-signature";

type HmacSha256 = Hmac<Sha256>;

/// Status notification pushed by the processor.
#[derive(Debug, Deserialize)]
pub struct ProcessorCallback {
    #[serde(deserialize_with = "string_or_number")]
    pub payment_id: String,
    pub payment_status: String,
}

/// The signature is checked against the raw body before anything is parsed.
/// A `200` is returned only once the transition is stored; duplicate and stale
/// signals also get `200` with the unchanged state.
pub async fn processor_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&state.webhook_secret, &body, signature) {
        tracing::warn!(
            body_len = body.len(),
            has_signature = !signature.is_empty(),
            "webhook signature verification failed"
        );
        return Err(EngineError::AuthenticityFailure.into());
    }

    let payload: ProcessorCallback = serde_json::from_slice(&body)
        .map_err(|e| AppError::BadRequest(format!("invalid webhook payload: {}", e)))?;

    tracing::info!(
        payment_id = %payload.payment_id,
        status = %payload.payment_status,
        "processor webhook received"
    );

    let outcome = state
        .reconciler
        .apply_signal(
            &payload.payment_id,
            &payload.payment_status,
            SignalSource::Webhook,
        )
        .await?;

    Ok((StatusCode::OK, Json(outcome)))
}

/// Hex HMAC-SHA256 of `body` under `secret`.
pub fn sign_payload(secret: &str, body: &[u8]) -> String {
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mut mac) => {
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }
        Err(_) => String::new(),
    }
}

/// Constant-time check of a hex signature. An empty secret accepts nothing.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() {
        return false;
    }
    let Ok(expected) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

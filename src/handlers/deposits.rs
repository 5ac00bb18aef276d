use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::DepositIntent;
use crate::error::AppError;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateDepositRequest {
    pub account_id: Uuid,
    pub amount: BigDecimal,
    pub pay_currency: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateBankDepositRequest {
    pub account_id: Uuid,
    pub amount: BigDecimal,
}

#[derive(Debug, Serialize)]
pub struct DepositView {
    #[serde(flatten)]
    pub intent: DepositIntent,
    pub polling: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub payment_id: String,
    pub polling: bool,
}

pub async fn create_deposit(
    State(state): State<AppState>,
    Json(payload): Json<CreateDepositRequest>,
) -> Result<impl IntoResponse, AppError> {
    let intent = state
        .deposits
        .create_deposit(payload.account_id, payload.amount, &payload.pay_currency)
        .await?;

    Ok((StatusCode::CREATED, Json(intent)))
}

pub async fn create_bank_deposit(
    State(state): State<AppState>,
    Json(payload): Json<CreateBankDepositRequest>,
) -> Result<impl IntoResponse, AppError> {
    let intent = state
        .deposits
        .create_bank_deposit(payload.account_id, payload.amount)
        .await?;

    Ok((StatusCode::CREATED, Json(intent)))
}

pub async fn get_deposit(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let intent = state.deposits.get(&payment_id).await?;
    let polling = state.polling.is_active(&payment_id);

    Ok(Json(DepositView { intent, polling }))
}

/// Opens a polling session for a deposit the user is watching.
pub async fn start_session(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let started = state.polling.start(&payment_id).await?;
    let status = if started {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };

    Ok((
        status,
        Json(SessionResponse {
            payment_id,
            polling: true,
        }),
    ))
}

pub async fn stop_session(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !state.polling.stop(&payment_id) {
        return Err(AppError::NotFound(format!(
            "No polling session for {}",
            payment_id
        )));
    }

    Ok(Json(SessionResponse {
        payment_id,
        polling: false,
    }))
}

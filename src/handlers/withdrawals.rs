use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::validation::Network;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateWithdrawalRequest {
    pub account_id: Uuid,
    pub amount: BigDecimal,
    /// Network name or alias (`btc`, `erc20`, `trc20`, `iban`, ...).
    pub network: String,
    pub destination: String,
}

pub async fn create_withdrawal(
    State(state): State<AppState>,
    Json(payload): Json<CreateWithdrawalRequest>,
) -> Result<impl IntoResponse, AppError> {
    let network: Network = payload.network.parse().map_err(AppError::Validation)?;

    let request = state
        .withdrawals
        .create_request(
            payload.account_id,
            payload.amount,
            network,
            &payload.destination,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(request)))
}

pub async fn get_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.withdrawals.get(id).await?;
    Ok(Json(request))
}

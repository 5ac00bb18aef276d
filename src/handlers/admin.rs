//! Back-office endpoints, mounted under `/admin` behind [`crate::middleware::admin_auth`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::{Decision, EntryType, LedgerTransaction, WithdrawalStatus};
use crate::error::AppError;
use crate::handlers::Pagination;
use crate::services::BalanceUpdate;
use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct CreateAccountRequest {
    pub account_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    pub account_id: Uuid,
    pub delta: BigDecimal,
    #[serde(rename = "type")]
    pub entry_type: EntryType,
    pub description: String,
    pub actor_id: String,
    pub reference: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub new_balance: BigDecimal,
    pub transaction: LedgerTransaction,
    pub replayed: bool,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalListQuery {
    pub status: Option<WithdrawalStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    pub reviewer: String,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DepositStatusReport {
    pub status: String,
}

pub async fn create_account(
    State(state): State<AppState>,
    payload: Option<Json<CreateAccountRequest>>,
) -> Result<impl IntoResponse, AppError> {
    let account_id = payload
        .and_then(|Json(p)| p.account_id)
        .unwrap_or_else(Uuid::new_v4);
    let account = state.ledger.create_account(account_id).await?;

    Ok((StatusCode::CREATED, Json(account)))
}

/// Balance RPC: applies a signed delta and returns the new balance.
pub async fn update_balance(
    State(state): State<AppState>,
    Json(payload): Json<BalanceRequest>,
) -> Result<impl IntoResponse, AppError> {
    let applied = state
        .ledger
        .update_balance(BalanceUpdate {
            account_id: payload.account_id,
            delta: payload.delta,
            entry_type: payload.entry_type,
            description: payload.description,
            actor_id: payload.actor_id,
            reference: payload.reference,
        })
        .await?;

    Ok(Json(BalanceResponse {
        new_balance: applied.transaction.new_balance.clone(),
        replayed: applied.replayed,
        transaction: applied.transaction,
    }))
}

pub async fn audit_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let audit = state.ledger.audit(id).await?;
    Ok(Json(audit))
}

pub async fn list_withdrawals(
    State(state): State<AppState>,
    Query(query): Query<WithdrawalListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = Pagination {
        limit: query.limit,
        offset: query.offset,
    };
    let requests = state
        .withdrawals
        .list(
            query.status.unwrap_or(WithdrawalStatus::Pending),
            page.limit(),
            page.offset(),
        )
        .await?;
    Ok(Json(requests))
}

pub async fn decide_withdrawal(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DecisionRequest>,
) -> Result<impl IntoResponse, AppError> {
    let request = state
        .withdrawals
        .decide(id, payload.decision, &payload.reviewer, payload.reason)
        .await?;
    Ok(Json(request))
}

/// Status report from the bank back-office for a bank transfer deposit.
pub async fn report_deposit_status(
    State(state): State<AppState>,
    Path(payment_id): Path<String>,
    Json(payload): Json<DepositStatusReport>,
) -> Result<impl IntoResponse, AppError> {
    let outcome = state
        .reconciler
        .report_back_office(&payment_id, &payload.status)
        .await?;
    Ok(Json(outcome))
}

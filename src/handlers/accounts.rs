use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::error::AppError;
use crate::handlers::Pagination;
use crate::AppState;

pub async fn get_account(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let account = state.ledger.account(id).await?;
    Ok(Json(account))
}

/// Ledger rows for the account, oldest first.
pub async fn get_ledger(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let rows = state
        .ledger
        .history(id, page.limit(), page.offset())
        .await?;
    Ok(Json(rows))
}

pub async fn list_deposits(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(page): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    state.ledger.account(id).await?;
    let intents = state
        .deposits
        .list_for_account(id, page.limit(), page.offset())
        .await?;
    Ok(Json(intents))
}

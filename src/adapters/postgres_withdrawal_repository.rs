//! Postgres implementation of WithdrawalRepository.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{ReviewRecord, WithdrawalRequest, WithdrawalStatus};
use crate::ports::{RepositoryError, RepositoryResult, WithdrawalRepository};

const WITHDRAWAL_COLUMNS: &str = "id, account_id, amount, network, destination, status, \
                                  reviewed_by, reviewed_at, reason, created_at";

#[derive(Clone)]
pub struct PostgresWithdrawalRepository {
    pool: PgPool,
}

impl PostgresWithdrawalRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WithdrawalRepository for PostgresWithdrawalRepository {
    async fn insert(&self, request: &WithdrawalRequest) -> RepositoryResult<WithdrawalRequest> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            r#"
            INSERT INTO withdrawal_requests (
                id, account_id, amount, network, destination, status,
                reviewed_by, reviewed_at, reason, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            WITHDRAWAL_COLUMNS
        ))
        .bind(request.id)
        .bind(request.account_id)
        .bind(&request.amount)
        .bind(request.network.as_str())
        .bind(&request.destination)
        .bind(request.status.as_str())
        .bind(&request.reviewed_by)
        .bind(request.reviewed_at)
        .bind(&request.reason)
        .bind(request.created_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<WithdrawalRequest> {
        let row = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawal_requests WHERE id = $1",
            WITHDRAWAL_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("withdrawal {}", id)))?
            .into_domain()
    }

    async fn record_review(&self, id: Uuid, review: &ReviewRecord) -> RepositoryResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE withdrawal_requests
            SET status = $1, reviewed_by = $2, reviewed_at = $3, reason = $4
            WHERE id = $5 AND status = 'pending'
            "#,
        )
        .bind(review.status.as_str())
        .bind(&review.reviewed_by)
        .bind(review.reviewed_at)
        .bind(&review.reason)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_by_status(
        &self,
        status: WithdrawalStatus,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WithdrawalRequest>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(&format!(
            "SELECT {} FROM withdrawal_requests WHERE status = $1 \
             ORDER BY created_at ASC LIMIT $2 OFFSET $3",
            WITHDRAWAL_COLUMNS
        ))
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(WithdrawalRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WithdrawalRow {
    id: Uuid,
    account_id: Uuid,
    amount: BigDecimal,
    network: String,
    destination: String,
    status: String,
    reviewed_by: Option<String>,
    reviewed_at: Option<DateTime<Utc>>,
    reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl WithdrawalRow {
    fn into_domain(self) -> RepositoryResult<WithdrawalRequest> {
        Ok(WithdrawalRequest {
            id: self.id,
            account_id: self.account_id,
            amount: self.amount,
            network: self.network.parse().map_err(RepositoryError::Corrupt)?,
            destination: self.destination,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            reviewed_by: self.reviewed_by,
            reviewed_at: self.reviewed_at,
            reason: self.reason,
            created_at: self.created_at,
        })
    }
}

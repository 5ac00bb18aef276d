//! Postgres implementation of DepositRepository.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{deposit_reference, DepositIntent, DepositStatus};
use crate::ports::{DepositRepository, RepositoryError, RepositoryResult};

const DEPOSIT_COLUMNS: &str = "id, account_id, method, amount, price_currency, pay_currency, \
                               payment_id, pay_address, pay_amount, status, \
                               expiration_estimate, created_at, updated_at";

const OPEN_FILTER: &str = "status NOT IN ('finished', 'failed', 'expired')";

#[derive(Clone)]
pub struct PostgresDepositRepository {
    pool: PgPool,
}

impl PostgresDepositRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DepositRepository for PostgresDepositRepository {
    async fn insert(&self, intent: &DepositIntent) -> RepositoryResult<DepositIntent> {
        let row = sqlx::query_as::<_, DepositRow>(&format!(
            r#"
            INSERT INTO deposit_intents (
                id, account_id, method, amount, price_currency, pay_currency,
                payment_id, pay_address, pay_amount, status,
                expiration_estimate, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING {}
            "#,
            DEPOSIT_COLUMNS
        ))
        .bind(intent.id)
        .bind(intent.account_id)
        .bind(intent.method.as_str())
        .bind(&intent.amount)
        .bind(&intent.price_currency)
        .bind(&intent.pay_currency)
        .bind(&intent.payment_id)
        .bind(&intent.pay_address)
        .bind(&intent.pay_amount)
        .bind(intent.status.as_str())
        .bind(intent.expiration_estimate)
        .bind(intent.created_at)
        .bind(intent.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn get_by_payment_id(&self, payment_id: &str) -> RepositoryResult<DepositIntent> {
        let row = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {} FROM deposit_intents WHERE payment_id = $1",
            DEPOSIT_COLUMNS
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("deposit {}", payment_id)))?
            .into_domain()
    }

    async fn compare_and_set_status(
        &self,
        payment_id: &str,
        expected: DepositStatus,
        next: DepositStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE deposit_intents SET status = $1, updated_at = $2 \
             WHERE payment_id = $3 AND status = $4",
        )
        .bind(next.as_str())
        .bind(at)
        .bind(payment_id)
        .bind(expected.as_str())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_finished(&self, payment_id: &str, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let result = sqlx::query(
            "UPDATE deposit_intents SET status = 'finished', updated_at = $1 \
             WHERE payment_id = $2 AND status <> 'finished'",
        )
        .bind(at)
        .bind(payment_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn expire_if_uncredited(
        &self,
        payment_id: &str,
        expected: DepositStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        if expected.is_terminal() {
            return Ok(false);
        }

        let result = sqlx::query(
            r#"
            UPDATE deposit_intents SET status = 'expired', updated_at = $1
            WHERE payment_id = $2 AND status = $3
            AND NOT EXISTS (SELECT 1 FROM ledger_transactions WHERE reference = $4)
            "#,
        )
        .bind(at)
        .bind(payment_id)
        .bind(expected.as_str())
        .bind(deposit_reference(payment_id))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_open(&self) -> RepositoryResult<Vec<DepositIntent>> {
        let rows = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {} FROM deposit_intents WHERE {} ORDER BY created_at ASC",
            DEPOSIT_COLUMNS, OPEN_FILTER
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DepositRow::into_domain).collect()
    }

    async fn list_past_expiry(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<DepositIntent>> {
        let rows = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {} FROM deposit_intents WHERE {} AND expiration_estimate < $1 \
             ORDER BY expiration_estimate ASC",
            DEPOSIT_COLUMNS, OPEN_FILTER
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DepositRow::into_domain).collect()
    }

    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<DepositIntent>> {
        let rows = sqlx::query_as::<_, DepositRow>(&format!(
            "SELECT {} FROM deposit_intents WHERE account_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            DEPOSIT_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DepositRow::into_domain).collect()
    }
}

#[derive(Debug, sqlx::FromRow)]
struct DepositRow {
    id: Uuid,
    account_id: Uuid,
    method: String,
    amount: BigDecimal,
    price_currency: String,
    pay_currency: String,
    payment_id: String,
    pay_address: String,
    pay_amount: BigDecimal,
    status: String,
    expiration_estimate: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DepositRow {
    fn into_domain(self) -> RepositoryResult<DepositIntent> {
        Ok(DepositIntent {
            id: self.id,
            account_id: self.account_id,
            method: self.method.parse().map_err(RepositoryError::Corrupt)?,
            amount: self.amount,
            price_currency: self.price_currency,
            pay_currency: self.pay_currency,
            payment_id: self.payment_id,
            pay_address: self.pay_address,
            pay_amount: self.pay_amount,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            expiration_estimate: self.expiration_estimate,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

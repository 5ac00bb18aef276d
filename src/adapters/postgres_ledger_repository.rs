//! Postgres implementation of LedgerRepository.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Account, AppliedDelta, BalanceGuard, LedgerTransaction, NewLedgerEntry};
use crate::ports::{LedgerRepository, RepositoryError, RepositoryResult};

const LEDGER_COLUMNS: &str = "id, seq, account_id, amount, entry_type, description, \
                              new_balance, reference, actor_id, created_at";

/// Postgres-backed ledger. Balance changes take a row lock on the account.
#[derive(Clone)]
pub struct PostgresLedgerRepository {
    pool: PgPool,
}

impl PostgresLedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerRepository for PostgresLedgerRepository {
    async fn ensure_account(&self, account_id: Uuid) -> RepositoryResult<Account> {
        sqlx::query(
            "INSERT INTO accounts (id, balance, created_at, updated_at) \
             VALUES ($1, 0, NOW(), NOW()) ON CONFLICT (id) DO NOTHING",
        )
        .bind(account_id)
        .execute(&self.pool)
        .await?;

        self.get_account(account_id).await
    }

    async fn get_account(&self, account_id: Uuid) -> RepositoryResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, balance, created_at, updated_at FROM accounts WHERE id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(AccountRow::into_domain)
            .ok_or_else(|| RepositoryError::NotFound(format!("account {}", account_id)))
    }

    async fn apply_delta(
        &self,
        entry: NewLedgerEntry,
        guard: BalanceGuard,
    ) -> RepositoryResult<AppliedDelta> {
        let mut tx = self.pool.begin().await?;

        // The account row lock serializes every writer for this account.
        let current: Option<BigDecimal> =
            sqlx::query_scalar("SELECT balance FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(entry.account_id)
                .fetch_optional(&mut *tx)
                .await?;

        let current = current
            .ok_or_else(|| RepositoryError::NotFound(format!("account {}", entry.account_id)))?;

        if let Some(reference) = entry.reference.as_deref() {
            let existing = sqlx::query_as::<_, LedgerRow>(&format!(
                "SELECT {} FROM ledger_transactions WHERE reference = $1",
                LEDGER_COLUMNS
            ))
            .bind(reference)
            .fetch_optional(&mut *tx)
            .await?;

            if let Some(row) = existing {
                tx.rollback().await?;
                let existing = row.into_domain()?;
                if !existing.records(&entry) {
                    return Err(RepositoryError::Conflict(format!(
                        "reference {} already recorded for a different delta",
                        reference
                    )));
                }
                return Ok(AppliedDelta {
                    transaction: existing,
                    replayed: true,
                });
            }
        }

        let new_balance = &current + &entry.amount;
        if !guard.permits(&new_balance) {
            tx.rollback().await?;
            return Err(RepositoryError::GuardRejected {
                balance: current,
                delta: entry.amount,
            });
        }

        let now = Utc::now();
        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            r#"
            INSERT INTO ledger_transactions (
                id, account_id, amount, entry_type, description,
                new_balance, reference, actor_id, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            LEDGER_COLUMNS
        ))
        .bind(Uuid::new_v4())
        .bind(entry.account_id)
        .bind(&entry.amount)
        .bind(entry.entry_type.as_str())
        .bind(&entry.description)
        .bind(&new_balance)
        .bind(&entry.reference)
        .bind(&entry.actor_id)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE accounts SET balance = $1, updated_at = $2 WHERE id = $3")
            .bind(&new_balance)
            .bind(now)
            .bind(entry.account_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(AppliedDelta {
            transaction: row.into_domain()?,
            replayed: false,
        })
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> RepositoryResult<Option<LedgerTransaction>> {
        let row = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM ledger_transactions WHERE reference = $1",
            LEDGER_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(LedgerRow::into_domain).transpose()
    }

    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<LedgerTransaction>> {
        let rows = sqlx::query_as::<_, LedgerRow>(&format!(
            "SELECT {} FROM ledger_transactions WHERE account_id = $1 \
             ORDER BY seq ASC LIMIT $2 OFFSET $3",
            LEDGER_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(LedgerRow::into_domain).collect()
    }

    async fn ledger_totals(
        &self,
        account_id: Uuid,
    ) -> RepositoryResult<(BigDecimal, Option<BigDecimal>, i64)> {
        let (sum, entries): (Option<BigDecimal>, i64) = sqlx::query_as(
            "SELECT SUM(amount), COUNT(*) FROM ledger_transactions WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;

        let latest: Option<BigDecimal> = sqlx::query_scalar(
            "SELECT new_balance FROM ledger_transactions WHERE account_id = $1 \
             ORDER BY seq DESC LIMIT 1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok((sum.unwrap_or_else(|| BigDecimal::from(0)), latest, entries))
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    balance: BigDecimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_domain(self) -> Account {
        Account {
            id: self.id,
            balance: self.balance,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: Uuid,
    seq: i64,
    account_id: Uuid,
    amount: BigDecimal,
    entry_type: String,
    description: String,
    new_balance: BigDecimal,
    reference: Option<String>,
    actor_id: Option<String>,
    created_at: DateTime<Utc>,
}

impl LedgerRow {
    fn into_domain(self) -> RepositoryResult<LedgerTransaction> {
        Ok(LedgerTransaction {
            id: self.id,
            seq: self.seq,
            account_id: self.account_id,
            amount: self.amount,
            entry_type: self.entry_type.parse().map_err(RepositoryError::Corrupt)?,
            description: self.description,
            new_balance: self.new_balance,
            reference: self.reference,
            actor_id: self.actor_id,
            created_at: self.created_at,
        })
    }
}

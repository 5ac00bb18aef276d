//! Storage and processor seams.
//!
//! Services depend on these traits only. `adapters` provides the Postgres and
//! in-memory implementations; `processor` provides the payment processors.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Account, AppliedDelta, BalanceGuard, DepositIntent, DepositStatus, LedgerTransaction,
    NewLedgerEntry, ReviewRecord, WithdrawalRequest, WithdrawalStatus,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Balance guard rejected delta: balance {balance}, delta {delta}")]
    GuardRejected {
        balance: BigDecimal,
        delta: BigDecimal,
    },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::Conflict(db.message().to_string())
            }
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Accounts and the append-only ledger.
#[async_trait]
pub trait LedgerRepository: Send + Sync {
    /// Creates the account with a zero balance, or returns the existing one.
    async fn ensure_account(&self, account_id: Uuid) -> RepositoryResult<Account>;

    async fn get_account(&self, account_id: Uuid) -> RepositoryResult<Account>;

    /// Reads the balance, appends the ledger row and updates the cached
    /// balance as one atomic unit serialized per account.
    ///
    /// When `entry.reference` already exists the stored row is returned with
    /// `replayed = true` and nothing is written.
    async fn apply_delta(
        &self,
        entry: NewLedgerEntry,
        guard: BalanceGuard,
    ) -> RepositoryResult<AppliedDelta>;

    async fn find_by_reference(&self, reference: &str)
        -> RepositoryResult<Option<LedgerTransaction>>;

    /// Rows in ledger order (oldest first).
    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<LedgerTransaction>>;

    /// Sum of all deltas, the latest snapshot and the row count.
    async fn ledger_totals(
        &self,
        account_id: Uuid,
    ) -> RepositoryResult<(BigDecimal, Option<BigDecimal>, i64)>;
}

/// Deposit intents.
#[async_trait]
pub trait DepositRepository: Send + Sync {
    async fn insert(&self, intent: &DepositIntent) -> RepositoryResult<DepositIntent>;

    async fn get_by_payment_id(&self, payment_id: &str) -> RepositoryResult<DepositIntent>;

    /// Conditional update: only applies while the stored status equals
    /// `expected`. Returns whether a row changed.
    async fn compare_and_set_status(
        &self,
        payment_id: &str,
        expected: DepositStatus,
        next: DepositStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    /// Drives a credited intent to `finished` from whatever state it is in.
    async fn mark_finished(&self, payment_id: &str, at: DateTime<Utc>) -> RepositoryResult<bool>;

    /// Moves an open intent to `expired` unless its credit is already in the
    /// ledger.
    async fn expire_if_uncredited(
        &self,
        payment_id: &str,
        expected: DepositStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool>;

    async fn list_open(&self) -> RepositoryResult<Vec<DepositIntent>>;

    async fn list_past_expiry(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<DepositIntent>>;

    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<DepositIntent>>;
}

/// Withdrawal requests.
#[async_trait]
pub trait WithdrawalRepository: Send + Sync {
    async fn insert(&self, request: &WithdrawalRequest) -> RepositoryResult<WithdrawalRequest>;

    async fn get(&self, id: Uuid) -> RepositoryResult<WithdrawalRequest>;

    /// Records the review only while the request is still pending.
    async fn record_review(&self, id: Uuid, review: &ReviewRecord) -> RepositoryResult<bool>;

    async fn list_by_status(
        &self,
        status: WithdrawalStatus,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WithdrawalRequest>>;
}

//! The single entry point for balance changes.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{
    is_reserved_reference, Account, AppliedDelta, BalanceGuard, EntryType, LedgerAudit,
    LedgerTransaction, NewLedgerEntry,
};
use crate::ports::{LedgerRepository, RepositoryError};
use crate::services::EngineError;
use crate::validation::{
    sanitize_string, validate_amount_scale, validate_description, validate_required,
    ValidationError,
};

/// Balance mutator and ledger queries.
///
/// Every credit and debit, whether from a deposit, a withdrawal or an admin
/// adjustment, is written through [`LedgerService::apply_delta`].
pub struct LedgerService {
    ledger: Arc<dyn LedgerRepository>,
}

/// Admin balance adjustment.
#[derive(Debug, Clone)]
pub struct BalanceUpdate {
    pub account_id: Uuid,
    pub delta: BigDecimal,
    pub entry_type: EntryType,
    pub description: String,
    pub actor_id: String,
    pub reference: Option<String>,
}

impl LedgerService {
    pub fn new(ledger: Arc<dyn LedgerRepository>) -> Self {
        Self { ledger }
    }

    pub async fn create_account(&self, account_id: Uuid) -> Result<Account, EngineError> {
        let account = self.ledger.ensure_account(account_id).await?;
        info!(account_id = %account_id, "account ready");
        Ok(account)
    }

    pub async fn account(&self, account_id: Uuid) -> Result<Account, EngineError> {
        self.ledger
            .get_account(account_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => EngineError::AccountNotFound(account_id),
                other => other.into(),
            })
    }

    /// Applies one signed delta atomically and returns the written row.
    pub async fn apply_delta(
        &self,
        entry: NewLedgerEntry,
        guard: BalanceGuard,
    ) -> Result<AppliedDelta, EngineError> {
        let account_id = entry.account_id;
        let reference = entry.reference.clone();

        let applied = self
            .ledger
            .apply_delta(entry, guard)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => EngineError::AccountNotFound(account_id),
                RepositoryError::GuardRejected { balance, delta } => {
                    EngineError::InsufficientFunds {
                        available: balance,
                        requested: -delta,
                    }
                }
                other => other.into(),
            })?;

        if applied.replayed {
            info!(
                account_id = %account_id,
                reference = reference.as_deref().unwrap_or_default(),
                "ledger reference already applied, skipping"
            );
        } else {
            info!(
                account_id = %account_id,
                entry_type = %applied.transaction.entry_type,
                amount = %applied.transaction.amount,
                new_balance = %applied.transaction.new_balance,
                seq = applied.transaction.seq,
                "balance updated"
            );
        }

        Ok(applied)
    }

    /// Admin balance RPC.
    pub async fn update_balance(&self, update: BalanceUpdate) -> Result<AppliedDelta, EngineError> {
        validate_required("actor_id", &update.actor_id)?;
        validate_description(&update.description)?;
        validate_amount_scale(&update.delta)?;
        if update.delta == BigDecimal::from(0) {
            return Err(ValidationError::new("delta", "must not be zero").into());
        }

        let mut entry = NewLedgerEntry::new(
            update.account_id,
            update.delta,
            update.entry_type,
            sanitize_string(&update.description),
        )
        .with_actor(sanitize_string(&update.actor_id));
        if let Some(reference) = update.reference {
            validate_required("reference", &reference)?;
            if is_reserved_reference(&reference) {
                return Err(ValidationError::new(
                    "reference",
                    "deposit: and withdrawal: references are reserved",
                )
                .into());
            }
            entry = entry.with_reference(reference);
        }

        self.apply_delta(entry, BalanceGuard::AllowNegative).await
    }

    pub async fn history(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<LedgerTransaction>, EngineError> {
        self.account(account_id).await?;
        Ok(self
            .ledger
            .list_transactions(account_id, limit, offset)
            .await?)
    }

    pub async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<LedgerTransaction>, EngineError> {
        Ok(self.ledger.find_by_reference(reference).await?)
    }

    /// Compares the cached balance against the ledger.
    pub async fn audit(&self, account_id: Uuid) -> Result<LedgerAudit, EngineError> {
        let account = self.account(account_id).await?;
        let (ledger_sum, latest_snapshot, entries) = self.ledger.ledger_totals(account_id).await?;

        let snapshot_matches = latest_snapshot
            .as_ref()
            .map_or(true, |snapshot| *snapshot == account.balance);
        let consistent = ledger_sum == account.balance && snapshot_matches;

        if !consistent {
            warn!(
                account_id = %account_id,
                balance = %account.balance,
                ledger_sum = %ledger_sum,
                "ledger audit mismatch"
            );
        }

        Ok(LedgerAudit {
            account_id,
            balance: account.balance,
            ledger_sum,
            latest_snapshot,
            entries,
            consistent,
        })
    }
}

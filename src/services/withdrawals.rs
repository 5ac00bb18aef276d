//! Manual review queue for outbound withdrawals.

use std::sync::Arc;

use bigdecimal::BigDecimal;
use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::domain::{
    BalanceGuard, Decision, EntryType, LedgerTransaction, NewLedgerEntry, ReviewRecord,
    WithdrawalRequest, WithdrawalStatus,
};
use crate::ports::{RepositoryError, WithdrawalRepository};
use crate::services::{EngineError, KeyedLocks, LedgerService};
use crate::validation::{
    sanitize_string, validate_amount_scale, validate_max_len, validate_positive_amount,
    validate_required, Network, DESCRIPTION_MAX_LEN,
};

const RECOVERY_PAGE_SIZE: i64 = 100;

pub struct WithdrawalQueue {
    withdrawals: Arc<dyn WithdrawalRepository>,
    ledger: Arc<LedgerService>,
    min_amount: BigDecimal,
    locks: KeyedLocks,
}

impl WithdrawalQueue {
    pub fn new(
        withdrawals: Arc<dyn WithdrawalRepository>,
        ledger: Arc<LedgerService>,
        min_amount: BigDecimal,
    ) -> Self {
        Self {
            withdrawals,
            ledger,
            min_amount,
            locks: KeyedLocks::new(),
        }
    }

    /// Validates and queues a request in `pending`. Nothing is stored on
    /// failure and the balance is not touched until approval.
    pub async fn create_request(
        &self,
        account_id: Uuid,
        amount: BigDecimal,
        network: Network,
        destination: &str,
    ) -> Result<WithdrawalRequest, EngineError> {
        validate_positive_amount(&amount)?;
        validate_amount_scale(&amount)?;
        if amount < self.min_amount {
            return Err(EngineError::BelowMinimum {
                amount,
                minimum: self.min_amount.clone(),
            });
        }

        let destination = sanitize_string(destination);
        network
            .validate_address(&destination)
            .map_err(|e| EngineError::InvalidAddress(e.message))?;

        let account = self.ledger.account(account_id).await?;
        if amount > account.balance {
            info!(
                account_id = %account_id,
                balance = %account.balance,
                amount = %amount,
                "withdrawal rejected for insufficient funds"
            );
            return Err(EngineError::InsufficientFunds {
                available: account.balance,
                requested: amount,
            });
        }

        let request = WithdrawalRequest::new(account_id, amount, network, destination);
        let stored = self.withdrawals.insert(&request).await?;
        info!(
            withdrawal_id = %stored.id,
            account_id = %account_id,
            amount = %stored.amount,
            network = %stored.network,
            "withdrawal request queued"
        );
        Ok(stored)
    }

    /// Applies a reviewer verdict. Legal only while the request is pending.
    pub async fn decide(
        &self,
        id: Uuid,
        decision: Decision,
        reviewer: &str,
        reason: Option<String>,
    ) -> Result<WithdrawalRequest, EngineError> {
        validate_required("reviewer", reviewer)?;
        let reason = reason.map(|r| sanitize_string(&r)).filter(|r| !r.is_empty());
        if let Some(reason) = reason.as_deref() {
            validate_max_len("reason", reason, DESCRIPTION_MAX_LEN)?;
        }

        let _guard = self.locks.lock(&id.to_string()).await;
        let request = self.get(id).await?;
        if request.status.is_terminal() {
            return Err(EngineError::AlreadyDecided(id));
        }

        // A debit without a recorded review means an approval was cut short.
        // The ledger wins: the request is approved whatever this verdict says.
        if let Some(debit) = self.existing_debit(&request).await? {
            self.finalize_debited(&request, &debit).await?;
            return match decision {
                Decision::Approve => self.get(id).await,
                Decision::Reject => Err(EngineError::AlreadyDecided(id)),
            };
        }

        if decision == Decision::Approve {
            let entry = NewLedgerEntry::new(
                request.account_id,
                -request.amount.clone(),
                EntryType::Debit,
                format!(
                    "{} withdrawal to {}",
                    request.network.as_str(),
                    request.destination
                ),
            )
            .with_reference(request.ledger_reference())
            .with_actor(reviewer);
            self.ledger
                .apply_delta(entry, BalanceGuard::RequireNonNegative)
                .await?;
        }

        let review = ReviewRecord {
            status: decision.resulting_status(),
            reviewed_by: sanitize_string(reviewer),
            reviewed_at: Utc::now(),
            reason,
        };
        if !self.withdrawals.record_review(id, &review).await? {
            error!(
                withdrawal_id = %id,
                decision = ?decision,
                "withdrawal decided concurrently by another reviewer"
            );
            return Err(EngineError::AlreadyDecided(id));
        }

        info!(
            withdrawal_id = %id,
            account_id = %request.account_id,
            status = %review.status,
            reviewer = %review.reviewed_by,
            "withdrawal decided"
        );
        self.get(id).await
    }

    /// Approves every pending request whose debit is already in the ledger.
    /// Returns how many were finalized.
    pub async fn reconcile_pending(&self) -> Result<usize, EngineError> {
        let mut pending = Vec::new();
        let mut offset = 0;
        loop {
            let page = self
                .withdrawals
                .list_by_status(WithdrawalStatus::Pending, RECOVERY_PAGE_SIZE, offset)
                .await?;
            let fetched = page.len() as i64;
            pending.extend(page);
            if fetched < RECOVERY_PAGE_SIZE {
                break;
            }
            offset += fetched;
        }

        let mut finalized = 0;
        for candidate in pending {
            let _guard = self.locks.lock(&candidate.id.to_string()).await;
            let request = self.get(candidate.id).await?;
            if request.status.is_terminal() {
                continue;
            }
            match self.existing_debit(&request).await {
                Ok(Some(debit)) => {
                    self.finalize_debited(&request, &debit).await?;
                    finalized += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(withdrawal_id = %request.id, error = %e, "withdrawal recovery skipped")
                }
            }
        }

        info!(finalized, "pending withdrawal recovery complete");
        Ok(finalized)
    }

    async fn existing_debit(
        &self,
        request: &WithdrawalRequest,
    ) -> Result<Option<LedgerTransaction>, EngineError> {
        let Some(debit) = self
            .ledger
            .find_by_reference(&request.ledger_reference())
            .await?
        else {
            return Ok(None);
        };

        if debit.account_id != request.account_id || debit.amount != -request.amount.clone() {
            error!(
                withdrawal_id = %request.id,
                account_id = %request.account_id,
                ledger_account_id = %debit.account_id,
                ledger_amount = %debit.amount,
                "withdrawal reference holds a mismatched ledger row"
            );
            return Err(RepositoryError::Conflict(format!(
                "ledger reference {} does not match withdrawal",
                request.ledger_reference()
            ))
            .into());
        }
        Ok(Some(debit))
    }

    async fn finalize_debited(
        &self,
        request: &WithdrawalRequest,
        debit: &LedgerTransaction,
    ) -> Result<(), EngineError> {
        let review = ReviewRecord {
            status: WithdrawalStatus::Approved,
            reviewed_by: debit
                .actor_id
                .clone()
                .unwrap_or_else(|| "system".to_string()),
            reviewed_at: debit.created_at,
            reason: None,
        };
        if !self.withdrawals.record_review(request.id, &review).await? {
            return Err(EngineError::AlreadyDecided(request.id));
        }

        warn!(
            withdrawal_id = %request.id,
            account_id = %request.account_id,
            transaction_id = %debit.id,
            "withdrawal debit found without a review, finalized as approved"
        );
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Result<WithdrawalRequest, EngineError> {
        self.withdrawals.get(id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => EngineError::WithdrawalNotFound(id),
            other => other.into(),
        })
    }

    pub async fn list(
        &self,
        status: WithdrawalStatus,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WithdrawalRequest>, EngineError> {
        Ok(self.withdrawals.list_by_status(status, limit, offset).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use std::str::FromStr;

    const ETH_ADDRESS: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

    async fn queue_with_balance(balance: &str) -> (WithdrawalQueue, Arc<LedgerService>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Arc::new(LedgerService::new(store.clone()));
        let account = Uuid::new_v4();
        ledger.create_account(account).await.unwrap();
        ledger
            .apply_delta(
                NewLedgerEntry::new(
                    account,
                    BigDecimal::from_str(balance).unwrap(),
                    EntryType::Credit,
                    "seed",
                ),
                BalanceGuard::AllowNegative,
            )
            .await
            .unwrap();
        let queue = WithdrawalQueue::new(store, ledger.clone(), BigDecimal::from(10));
        (queue, ledger, account)
    }

    #[tokio::test]
    async fn test_create_and_approve() {
        let (queue, ledger, account) = queue_with_balance("100").await;

        let request = queue
            .create_request(account, BigDecimal::from(60), Network::Ethereum, ETH_ADDRESS)
            .await
            .unwrap();
        assert_eq!(request.status, WithdrawalStatus::Pending);
        assert_eq!(
            ledger.account(account).await.unwrap().balance,
            BigDecimal::from(100)
        );

        let approved = queue
            .decide(request.id, Decision::Approve, "reviewer-1", None)
            .await
            .unwrap();
        assert_eq!(approved.status, WithdrawalStatus::Approved);
        assert_eq!(approved.reviewed_by.as_deref(), Some("reviewer-1"));
        assert_eq!(
            ledger.account(account).await.unwrap().balance,
            BigDecimal::from(40)
        );
    }

    #[tokio::test]
    async fn test_second_decision_is_rejected() {
        let (queue, ledger, account) = queue_with_balance("100").await;
        let request = queue
            .create_request(account, BigDecimal::from(30), Network::Ethereum, ETH_ADDRESS)
            .await
            .unwrap();

        queue
            .decide(request.id, Decision::Approve, "reviewer-1", None)
            .await
            .unwrap();
        let err = queue
            .decide(request.id, Decision::Approve, "reviewer-2", None)
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::AlreadyDecided(id) if id == request.id));
        assert_eq!(ledger.history(account, 10, 0).await.unwrap().len(), 2);
        assert_eq!(
            ledger.account(account).await.unwrap().balance,
            BigDecimal::from(70)
        );
    }

    #[tokio::test]
    async fn test_reject_keeps_balance_and_reason() {
        let (queue, ledger, account) = queue_with_balance("100").await;
        let request = queue
            .create_request(account, BigDecimal::from(30), Network::Ethereum, ETH_ADDRESS)
            .await
            .unwrap();

        let rejected = queue
            .decide(
                request.id,
                Decision::Reject,
                "reviewer-1",
                Some("destination on watch list".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(rejected.status, WithdrawalStatus::Rejected);
        assert_eq!(rejected.reason.as_deref(), Some("destination on watch list"));
        assert_eq!(
            ledger.account(account).await.unwrap().balance,
            BigDecimal::from(100)
        );
    }

    #[tokio::test]
    async fn test_validation_failures_persist_nothing() {
        let (queue, _ledger, account) = queue_with_balance("40").await;

        let over = queue
            .create_request(account, BigDecimal::from(50), Network::Ethereum, ETH_ADDRESS)
            .await
            .unwrap_err();
        assert!(matches!(over, EngineError::InsufficientFunds { .. }));

        let small = queue
            .create_request(account, BigDecimal::from(5), Network::Ethereum, ETH_ADDRESS)
            .await
            .unwrap_err();
        assert!(matches!(small, EngineError::BelowMinimum { .. }));

        let bad_address = queue
            .create_request(account, BigDecimal::from(20), Network::Bitcoin, ETH_ADDRESS)
            .await
            .unwrap_err();
        assert!(matches!(bad_address, EngineError::InvalidAddress(_)));

        let pending = queue.list(WithdrawalStatus::Pending, 10, 0).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_approval_guard_when_balance_dropped() {
        let (queue, ledger, account) = queue_with_balance("50").await;
        let request = queue
            .create_request(account, BigDecimal::from(50), Network::Ethereum, ETH_ADDRESS)
            .await
            .unwrap();

        ledger
            .apply_delta(
                NewLedgerEntry::new(account, BigDecimal::from(-20), EntryType::Adjustment, "fee"),
                BalanceGuard::AllowNegative,
            )
            .await
            .unwrap();

        let err = queue
            .decide(request.id, Decision::Approve, "reviewer-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InsufficientFunds { .. }));
        assert_eq!(
            queue.get(request.id).await.unwrap().status,
            WithdrawalStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_unknown_withdrawal() {
        let (queue, _ledger, _account) = queue_with_balance("0").await;
        let err = queue
            .decide(Uuid::new_v4(), Decision::Reject, "reviewer-1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::WithdrawalNotFound(_)));
    }

    #[tokio::test]
    async fn test_mismatched_debit_row_blocks_decision() {
        let (queue, ledger, account) = queue_with_balance("100").await;
        let request = queue
            .create_request(account, BigDecimal::from(40), Network::Ethereum, ETH_ADDRESS)
            .await
            .unwrap();
        ledger
            .apply_delta(
                NewLedgerEntry::new(account, BigDecimal::from(-5), EntryType::Debit, "stray")
                    .with_reference(request.ledger_reference()),
                BalanceGuard::RequireNonNegative,
            )
            .await
            .unwrap();

        let err = queue
            .decide(request.id, Decision::Reject, "reviewer-1", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Repository(RepositoryError::Conflict(_))
        ));
        assert_eq!(queue.reconcile_pending().await.unwrap(), 0);
        assert_eq!(
            queue.get(request.id).await.unwrap().status,
            WithdrawalStatus::Pending
        );
    }
}

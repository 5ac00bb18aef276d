//! In-memory implementation of every repository.
//!
//! One mutex guards the whole store, so each call is atomic. Used when no
//! database is configured and by the test suites.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::domain::{
    deposit_reference, Account, AppliedDelta, BalanceGuard, DepositIntent, DepositStatus,
    LedgerTransaction, NewLedgerEntry, ReviewRecord, WithdrawalRequest, WithdrawalStatus,
};
use crate::ports::{
    DepositRepository, LedgerRepository, RepositoryError, RepositoryResult, WithdrawalRepository,
};

#[derive(Default)]
struct Inner {
    accounts: HashMap<Uuid, Account>,
    ledger: Vec<LedgerTransaction>,
    references: HashMap<String, usize>,
    deposits: HashMap<String, DepositIntent>,
    withdrawals: HashMap<Uuid, WithdrawalRequest>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> RepositoryResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| RepositoryError::Database("memory store lock poisoned".to_string()))
    }
}

fn page<T: Clone>(items: impl Iterator<Item = T>, limit: i64, offset: i64) -> Vec<T> {
    items
        .skip(offset.max(0) as usize)
        .take(limit.max(0) as usize)
        .collect()
}

#[async_trait]
impl LedgerRepository for MemoryStore {
    async fn ensure_account(&self, account_id: Uuid) -> RepositoryResult<Account> {
        let mut inner = self.lock()?;
        Ok(inner
            .accounts
            .entry(account_id)
            .or_insert_with(|| Account::new(account_id))
            .clone())
    }

    async fn get_account(&self, account_id: Uuid) -> RepositoryResult<Account> {
        let inner = self.lock()?;
        inner
            .accounts
            .get(&account_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("account {}", account_id)))
    }

    async fn apply_delta(
        &self,
        entry: NewLedgerEntry,
        guard: BalanceGuard,
    ) -> RepositoryResult<AppliedDelta> {
        let mut inner = self.lock()?;

        if let Some(reference) = entry.reference.as_deref() {
            if let Some(&index) = inner.references.get(reference) {
                let existing = inner.ledger[index].clone();
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

        let current = inner
            .accounts
            .get(&entry.account_id)
            .map(|a| a.balance.clone())
            .ok_or_else(|| RepositoryError::NotFound(format!("account {}", entry.account_id)))?;

        let new_balance = &current + &entry.amount;
        if !guard.permits(&new_balance) {
            return Err(RepositoryError::GuardRejected {
                balance: current,
                delta: entry.amount,
            });
        }

        let now = Utc::now();
        let transaction = LedgerTransaction {
            id: Uuid::new_v4(),
            seq: inner.ledger.len() as i64 + 1,
            account_id: entry.account_id,
            amount: entry.amount,
            entry_type: entry.entry_type,
            description: entry.description,
            new_balance: new_balance.clone(),
            reference: entry.reference,
            actor_id: entry.actor_id,
            created_at: now,
        };

        if let Some(account) = inner.accounts.get_mut(&transaction.account_id) {
            account.balance = new_balance;
            account.updated_at = now;
        }
        if let Some(reference) = transaction.reference.clone() {
            let index = inner.ledger.len();
            inner.references.insert(reference, index);
        }
        inner.ledger.push(transaction.clone());

        Ok(AppliedDelta {
            transaction,
            replayed: false,
        })
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> RepositoryResult<Option<LedgerTransaction>> {
        let inner = self.lock()?;
        Ok(inner
            .references
            .get(reference)
            .map(|&index| inner.ledger[index].clone()))
    }

    async fn list_transactions(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<LedgerTransaction>> {
        let inner = self.lock()?;
        Ok(page(
            inner
                .ledger
                .iter()
                .filter(|t| t.account_id == account_id)
                .cloned(),
            limit,
            offset,
        ))
    }

    async fn ledger_totals(
        &self,
        account_id: Uuid,
    ) -> RepositoryResult<(BigDecimal, Option<BigDecimal>, i64)> {
        let inner = self.lock()?;
        let rows: Vec<&LedgerTransaction> = inner
            .ledger
            .iter()
            .filter(|t| t.account_id == account_id)
            .collect();

        let sum = rows
            .iter()
            .fold(BigDecimal::from(0), |acc, t| acc + &t.amount);
        let latest = rows.last().map(|t| t.new_balance.clone());

        Ok((sum, latest, rows.len() as i64))
    }
}

#[async_trait]
impl DepositRepository for MemoryStore {
    async fn insert(&self, intent: &DepositIntent) -> RepositoryResult<DepositIntent> {
        let mut inner = self.lock()?;
        if inner.deposits.contains_key(&intent.payment_id) {
            return Err(RepositoryError::Conflict(format!(
                "payment_id {} already exists",
                intent.payment_id
            )));
        }
        inner
            .deposits
            .insert(intent.payment_id.clone(), intent.clone());
        Ok(intent.clone())
    }

    async fn get_by_payment_id(&self, payment_id: &str) -> RepositoryResult<DepositIntent> {
        let inner = self.lock()?;
        inner
            .deposits
            .get(payment_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("deposit {}", payment_id)))
    }

    async fn compare_and_set_status(
        &self,
        payment_id: &str,
        expected: DepositStatus,
        next: DepositStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut inner = self.lock()?;
        match inner.deposits.get_mut(payment_id) {
            Some(intent) if intent.status == expected => {
                intent.status = next;
                intent.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("deposit {}", payment_id))),
        }
    }

    async fn mark_finished(&self, payment_id: &str, at: DateTime<Utc>) -> RepositoryResult<bool> {
        let mut inner = self.lock()?;
        match inner.deposits.get_mut(payment_id) {
            Some(intent) if intent.status != DepositStatus::Finished => {
                intent.status = DepositStatus::Finished;
                intent.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("deposit {}", payment_id))),
        }
    }

    async fn expire_if_uncredited(
        &self,
        payment_id: &str,
        expected: DepositStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<bool> {
        let mut inner = self.lock()?;
        if inner.references.contains_key(&deposit_reference(payment_id)) {
            return Ok(false);
        }
        match inner.deposits.get_mut(payment_id) {
            Some(intent) if intent.status == expected && !expected.is_terminal() => {
                intent.status = DepositStatus::Expired;
                intent.updated_at = at;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("deposit {}", payment_id))),
        }
    }

    async fn list_open(&self) -> RepositoryResult<Vec<DepositIntent>> {
        let inner = self.lock()?;
        let mut open: Vec<DepositIntent> = inner
            .deposits
            .values()
            .filter(|d| !d.status.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|d| d.created_at);
        Ok(open)
    }

    async fn list_past_expiry(&self, now: DateTime<Utc>) -> RepositoryResult<Vec<DepositIntent>> {
        let inner = self.lock()?;
        let mut stale: Vec<DepositIntent> = inner
            .deposits
            .values()
            .filter(|d| d.is_expired_at(now))
            .cloned()
            .collect();
        stale.sort_by_key(|d| d.expiration_estimate);
        Ok(stale)
    }

    async fn list_for_account(
        &self,
        account_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<DepositIntent>> {
        let inner = self.lock()?;
        let mut owned: Vec<DepositIntent> = inner
            .deposits
            .values()
            .filter(|d| d.account_id == account_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page(owned.into_iter(), limit, offset))
    }
}

#[async_trait]
impl WithdrawalRepository for MemoryStore {
    async fn insert(&self, request: &WithdrawalRequest) -> RepositoryResult<WithdrawalRequest> {
        let mut inner = self.lock()?;
        inner.withdrawals.insert(request.id, request.clone());
        Ok(request.clone())
    }

    async fn get(&self, id: Uuid) -> RepositoryResult<WithdrawalRequest> {
        let inner = self.lock()?;
        inner
            .withdrawals
            .get(&id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("withdrawal {}", id)))
    }

    async fn record_review(&self, id: Uuid, review: &ReviewRecord) -> RepositoryResult<bool> {
        let mut inner = self.lock()?;
        match inner.withdrawals.get_mut(&id) {
            Some(request) if request.status == WithdrawalStatus::Pending => {
                request.status = review.status;
                request.reviewed_by = Some(review.reviewed_by.clone());
                request.reviewed_at = Some(review.reviewed_at);
                request.reason = review.reason.clone();
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(RepositoryError::NotFound(format!("withdrawal {}", id))),
        }
    }

    async fn list_by_status(
        &self,
        status: WithdrawalStatus,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WithdrawalRequest>> {
        let inner = self.lock()?;
        let mut matching: Vec<WithdrawalRequest> = inner
            .withdrawals
            .values()
            .filter(|w| w.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|w| w.created_at);
        Ok(page(matching.into_iter(), limit, offset))
    }
}

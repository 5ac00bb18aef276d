//! Status reconciliation for deposit intents.
//!
//! Polls, webhooks, back-office reports, the expiry watchdog and the recovery
//! pass all feed the same locked transition step. Crediting happens at most
//! once per intent: the per-`payment_id` lock serializes signals in this
//! process, the conditional status update serializes them across processes,
//! and the unique ledger reference makes the credit itself idempotent.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::fmt;
use tracing::{debug, error, info, warn};

use crate::domain::{
    transition, BalanceGuard, DepositIntent, DepositStatus, EntryType, LedgerTransaction,
    NewLedgerEntry, PaymentMethod, ProviderStatus, Transition,
};
use crate::ports::{DepositRepository, RepositoryError};
use crate::processor::PaymentProcessor;
use crate::services::{EngineError, KeyedLocks, LedgerService};
use crate::validation::ValidationError;

/// Open intents examined concurrently by a recovery pass.
const RECOVERY_CONCURRENCY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Poll,
    Webhook,
    BackOffice,
    Watchdog,
    Recovery,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Poll => "poll",
            SignalSource::Webhook => "webhook",
            SignalSource::BackOffice => "back_office",
            SignalSource::Watchdog => "watchdog",
            SignalSource::Recovery => "recovery",
        }
    }

    /// Signals that originate from the payment processor.
    pub fn is_processor(&self) -> bool {
        matches!(self, SignalSource::Poll | SignalSource::Webhook)
    }
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a signal did to an intent.
#[derive(Debug, Clone, Serialize)]
pub struct SignalOutcome {
    pub payment_id: String,
    pub previous: DepositStatus,
    pub status: DepositStatus,
    pub transition: Transition,
    /// A ledger credit was written by this signal.
    pub credited: bool,
}

impl SignalOutcome {
    fn unchanged(intent: &DepositIntent, transition: Transition) -> Self {
        Self {
            payment_id: intent.payment_id.clone(),
            previous: intent.status,
            status: intent.status,
            transition,
            credited: false,
        }
    }

    pub fn changed(&self) -> bool {
        self.previous != self.status
    }
}

/// Summary of one recovery pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub examined: usize,
    pub finalized: usize,
    pub advanced: usize,
    pub unchanged: usize,
    pub errors: usize,
}

pub struct StatusReconciler {
    deposits: Arc<dyn DepositRepository>,
    ledger: Arc<LedgerService>,
    processor: Arc<dyn PaymentProcessor>,
    locks: KeyedLocks,
}

impl StatusReconciler {
    pub fn new(
        deposits: Arc<dyn DepositRepository>,
        ledger: Arc<LedgerService>,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        Self {
            deposits,
            ledger,
            processor,
            locks: KeyedLocks::new(),
        }
    }

    pub async fn intent(&self, payment_id: &str) -> Result<DepositIntent, EngineError> {
        self.deposits
            .get_by_payment_id(payment_id)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => EngineError::DepositNotFound(payment_id.to_string()),
                other => other.into(),
            })
    }

    /// Feeds one provider status into the state machine.
    ///
    /// Duplicates, stale and unrecognized statuses are reported in the
    /// outcome, not as errors. Bank intents accept no processor signals.
    pub async fn apply_signal(
        &self,
        payment_id: &str,
        raw_status: &str,
        source: SignalSource,
    ) -> Result<SignalOutcome, EngineError> {
        let _guard = self.locks.lock(payment_id).await;
        let intent = self.intent(payment_id).await?;
        if intent.method == PaymentMethod::Bank && source.is_processor() {
            warn!(
                payment_id = %payment_id,
                source = %source,
                "processor signal for a bank deposit rejected"
            );
            return Err(ValidationError::new(
                "payment_id",
                "bank deposits are reported by the back-office",
            )
            .into());
        }
        self.apply_locked(&intent, ProviderStatus::parse(raw_status), source, Utc::now())
            .await
    }

    /// Status reported by the bank back-office for a bank transfer intent.
    pub async fn report_back_office(
        &self,
        payment_id: &str,
        raw_status: &str,
    ) -> Result<SignalOutcome, EngineError> {
        let intent = self.intent(payment_id).await?;
        if intent.method != PaymentMethod::Bank {
            return Err(ValidationError::new(
                "payment_id",
                "only bank deposits accept back-office status reports",
            )
            .into());
        }
        self.apply_signal(payment_id, raw_status, SignalSource::BackOffice)
            .await
    }

    /// Asks the processor for the current status and applies it.
    pub async fn poll_once(&self, payment_id: &str) -> Result<SignalOutcome, EngineError> {
        let intent = self.intent(payment_id).await?;
        if intent.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(payment_id.to_string()));
        }
        if intent.method == PaymentMethod::Bank {
            return Err(ValidationError::new(
                "payment_id",
                "bank deposits are reported by the back-office",
            )
            .into());
        }

        let raw = self
            .processor
            .get_payment_status(payment_id)
            .await
            .map_err(|e| {
                warn!(payment_id = %payment_id, error = %e, "status poll failed");
                EngineError::from(e)
            })?;

        self.apply_signal(payment_id, &raw, SignalSource::Poll).await
    }

    /// Moves an overdue open intent to `expired` as of `now`.
    ///
    /// An intent whose credit is already in the ledger is finalized instead.
    pub async fn expire_overdue(
        &self,
        payment_id: &str,
        now: DateTime<Utc>,
    ) -> Result<SignalOutcome, EngineError> {
        let _guard = self.locks.lock(payment_id).await;
        let intent = self.intent(payment_id).await?;
        if !intent.status.is_terminal() && !intent.is_expired_at(now) {
            return Ok(SignalOutcome::unchanged(&intent, Transition::Stale));
        }
        self.apply_locked(
            &intent,
            ProviderStatus::Known(DepositStatus::Expired),
            SignalSource::Watchdog,
            now,
        )
        .await
    }

    /// One pass over every open intent: finalize the ones already credited,
    /// poll the processor for the rest.
    pub async fn reconcile_open(&self) -> Result<ReconcileReport, EngineError> {
        let open = self.deposits.list_open().await?;
        let mut report = ReconcileReport {
            examined: open.len(),
            ..ReconcileReport::default()
        };

        let results: Vec<(String, Result<SignalOutcome, EngineError>)> = stream::iter(open)
            .map(|intent| async move {
                let payment_id = intent.payment_id.clone();
                (payment_id, self.recover(intent).await)
            })
            .buffer_unordered(RECOVERY_CONCURRENCY)
            .collect()
            .await;

        for (payment_id, result) in results {
            match result {
                Ok(outcome) if outcome.changed() && outcome.status == DepositStatus::Finished => {
                    report.finalized += 1
                }
                Ok(outcome) if outcome.changed() => report.advanced += 1,
                Ok(_) => report.unchanged += 1,
                Err(e) if e.is_idempotent_noop() => report.unchanged += 1,
                Err(e) => {
                    warn!(payment_id = %payment_id, error = %e, "recovery failed for intent");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            finalized = report.finalized,
            advanced = report.advanced,
            errors = report.errors,
            "reconciliation pass complete"
        );
        Ok(report)
    }

    async fn recover(&self, intent: DepositIntent) -> Result<SignalOutcome, EngineError> {
        if let Some(outcome) = self.finalize_if_credited(&intent.payment_id).await? {
            return Ok(outcome);
        }
        match intent.method {
            PaymentMethod::Crypto => self.poll_once(&intent.payment_id).await,
            PaymentMethod::Bank => Ok(SignalOutcome::unchanged(&intent, Transition::Duplicate)),
        }
    }

    /// Drives a credited intent whose status write was lost to `finished`.
    async fn finalize_if_credited(
        &self,
        payment_id: &str,
    ) -> Result<Option<SignalOutcome>, EngineError> {
        let _guard = self.locks.lock(payment_id).await;
        let intent = self.intent(payment_id).await?;
        if intent.status == DepositStatus::Finished {
            return Ok(None);
        }
        if self.existing_credit(&intent).await?.is_none() {
            return Ok(None);
        }

        self.deposits
            .mark_finished(payment_id, Utc::now())
            .await?;
        warn!(
            payment_id = %payment_id,
            previous = %intent.status,
            source = %SignalSource::Recovery,
            "credit found without finished status, finalized"
        );
        Ok(Some(SignalOutcome {
            payment_id: payment_id.to_string(),
            previous: intent.status,
            status: DepositStatus::Finished,
            transition: Transition::Advance(DepositStatus::Finished),
            credited: false,
        }))
    }

    /// The credit row for `intent`, if one was written. A row under the
    /// intent's reference that credits another account or amount is a conflict.
    async fn existing_credit(
        &self,
        intent: &DepositIntent,
    ) -> Result<Option<LedgerTransaction>, EngineError> {
        let Some(credit) = self
            .ledger
            .find_by_reference(&intent.ledger_reference())
            .await?
        else {
            return Ok(None);
        };

        if credit.account_id != intent.account_id || credit.amount != intent.amount {
            error!(
                payment_id = %intent.payment_id,
                account_id = %intent.account_id,
                ledger_account_id = %credit.account_id,
                ledger_amount = %credit.amount,
                "deposit reference holds a mismatched ledger row"
            );
            return Err(RepositoryError::Conflict(format!(
                "ledger reference {} does not match deposit",
                intent.ledger_reference()
            ))
            .into());
        }
        Ok(Some(credit))
    }

    async fn apply_locked(
        &self,
        intent: &DepositIntent,
        incoming: ProviderStatus,
        source: SignalSource,
        at: DateTime<Utc>,
    ) -> Result<SignalOutcome, EngineError> {
        let step = transition(intent.status, &incoming);

        match step {
            Transition::Unrecognized => {
                warn!(
                    payment_id = %intent.payment_id,
                    status = %intent.status,
                    incoming = ?incoming,
                    source = %source,
                    "unrecognized provider status ignored"
                );
                Ok(SignalOutcome::unchanged(intent, step))
            }
            Transition::Duplicate => {
                debug!(
                    payment_id = %intent.payment_id,
                    status = %intent.status,
                    source = %source,
                    "duplicate status signal"
                );
                Ok(SignalOutcome::unchanged(intent, step))
            }
            Transition::Stale => {
                info!(
                    payment_id = %intent.payment_id,
                    status = %intent.status,
                    incoming = ?incoming,
                    source = %source,
                    "stale status signal ignored"
                );
                Ok(SignalOutcome::unchanged(intent, step))
            }
            Transition::Advance(DepositStatus::Finished) => self.finalize(intent, source, at).await,
            Transition::Advance(next) if next.is_terminal() => {
                self.close_uncredited(intent, next, source, at).await
            }
            Transition::Advance(next) => {
                let changed = self
                    .deposits
                    .compare_and_set_status(&intent.payment_id, intent.status, next, at)
                    .await?;
                if !changed {
                    return self.lost_race(intent, source).await;
                }

                if next == DepositStatus::PartiallyPaid {
                    warn!(
                        payment_id = %intent.payment_id,
                        account_id = %intent.account_id,
                        source = %source,
                        "deposit partially paid"
                    );
                }
                info!(
                    payment_id = %intent.payment_id,
                    from = %intent.status,
                    to = %next,
                    source = %source,
                    "deposit status advanced"
                );
                Ok(SignalOutcome {
                    payment_id: intent.payment_id.clone(),
                    previous: intent.status,
                    status: next,
                    transition: step,
                    credited: false,
                })
            }
        }
    }

    /// Credits the requested amount, then persists `finished`.
    async fn finalize(
        &self,
        intent: &DepositIntent,
        source: SignalSource,
        at: DateTime<Utc>,
    ) -> Result<SignalOutcome, EngineError> {
        let entry = NewLedgerEntry::new(
            intent.account_id,
            intent.amount.clone(),
            EntryType::Credit,
            format!(
                "{} deposit {}",
                intent.method.as_str(),
                intent.payment_id
            ),
        )
        .with_reference(intent.ledger_reference());

        let applied = self
            .ledger
            .apply_delta(entry, BalanceGuard::AllowNegative)
            .await?;
        self.deposits.mark_finished(&intent.payment_id, at).await?;

        let credited = !applied.replayed;
        info!(
            payment_id = %intent.payment_id,
            account_id = %intent.account_id,
            amount = %intent.amount,
            from = %intent.status,
            source = %source,
            credited,
            "deposit finished"
        );

        Ok(SignalOutcome {
            payment_id: intent.payment_id.clone(),
            previous: intent.status,
            status: DepositStatus::Finished,
            transition: Transition::Advance(DepositStatus::Finished),
            credited,
        })
    }

    /// `failed` or `expired`, unless the credit already landed.
    async fn close_uncredited(
        &self,
        intent: &DepositIntent,
        next: DepositStatus,
        source: SignalSource,
        at: DateTime<Utc>,
    ) -> Result<SignalOutcome, EngineError> {
        if self.existing_credit(intent).await?.is_some() {
            warn!(
                payment_id = %intent.payment_id,
                to = %next,
                source = %source,
                "deposit already credited, finalizing instead"
            );
            return self.finalize(intent, source, at).await;
        }

        let changed = match next {
            DepositStatus::Expired => {
                self.deposits
                    .expire_if_uncredited(&intent.payment_id, intent.status, at)
                    .await?
            }
            _ => {
                self.deposits
                    .compare_and_set_status(&intent.payment_id, intent.status, next, at)
                    .await?
            }
        };
        if !changed {
            return self.lost_race(intent, source).await;
        }

        info!(
            payment_id = %intent.payment_id,
            account_id = %intent.account_id,
            from = %intent.status,
            to = %next,
            source = %source,
            "deposit closed without credit"
        );
        Ok(SignalOutcome {
            payment_id: intent.payment_id.clone(),
            previous: intent.status,
            status: next,
            transition: Transition::Advance(next),
            credited: false,
        })
    }

    /// The stored status moved under us; report the signal as stale.
    async fn lost_race(
        &self,
        intent: &DepositIntent,
        source: SignalSource,
    ) -> Result<SignalOutcome, EngineError> {
        let current = self.intent(&intent.payment_id).await?;
        info!(
            payment_id = %intent.payment_id,
            expected = %intent.status,
            actual = %current.status,
            source = %source,
            "status changed concurrently, signal treated as stale"
        );
        Ok(SignalOutcome {
            payment_id: intent.payment_id.clone(),
            previous: intent.status,
            status: current.status,
            transition: Transition::Stale,
            credited: false,
        })
    }
}

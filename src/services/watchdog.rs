use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::domain::DepositStatus;
use crate::ports::DepositRepository;
use crate::services::{EngineError, StatusReconciler};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub expired: usize,
    pub finalized: usize,
    pub errors: usize,
}

/// Expires overdue deposit intents from stored deadlines, independent of the
/// processor and of polling sessions.
pub struct ExpiryWatchdog {
    deposits: Arc<dyn DepositRepository>,
    reconciler: Arc<StatusReconciler>,
    interval: Duration,
}

impl ExpiryWatchdog {
    pub fn new(
        deposits: Arc<dyn DepositRepository>,
        reconciler: Arc<StatusReconciler>,
        interval: Duration,
    ) -> Self {
        Self {
            deposits,
            reconciler,
            interval,
        }
    }

    /// One pass as of `now`.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, EngineError> {
        let overdue = self.deposits.list_past_expiry(now).await?;
        let mut report = SweepReport {
            examined: overdue.len(),
            ..SweepReport::default()
        };

        for intent in overdue {
            match self.reconciler.expire_overdue(&intent.payment_id, now).await {
                Ok(outcome) if outcome.changed() => match outcome.status {
                    DepositStatus::Expired => report.expired += 1,
                    DepositStatus::Finished => report.finalized += 1,
                    _ => {}
                },
                Ok(_) => {}
                Err(e) => {
                    warn!(payment_id = %intent.payment_id, error = %e, "failed to expire deposit");
                    report.errors += 1;
                }
            }
        }

        if report.examined > 0 {
            info!(
                examined = report.examined,
                expired = report.expired,
                finalized = report.finalized,
                "expiry sweep complete"
            );
        }
        Ok(report)
    }

    /// Runs forever on a fixed interval.
    pub async fn run(self: Arc<Self>) {
        info!(interval_secs = self.interval.as_secs(), "expiry watchdog started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.sweep(Utc::now()).await {
                error!(error = %e, "expiry sweep failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::processor::SandboxProcessor;
    use crate::services::{DepositSettings, DepositTracker, LedgerService};
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_sweep_only_touches_overdue_open_intents() {
        let store = Arc::new(MemoryStore::new());
        let processor = Arc::new(SandboxProcessor::new());
        let ledger = Arc::new(LedgerService::new(store.clone()));
        let account = Uuid::new_v4();
        ledger.create_account(account).await.unwrap();
        let tracker = DepositTracker::new(
            store.clone(),
            ledger.clone(),
            processor.clone(),
            DepositSettings::default(),
        );
        let reconciler = Arc::new(StatusReconciler::new(store.clone(), ledger, processor));
        let watchdog = ExpiryWatchdog::new(store, reconciler, Duration::from_secs(30));

        let intent = tracker
            .create_deposit(account, BigDecimal::from(20), "btc")
            .await
            .unwrap();

        let before = watchdog.sweep(intent.created_at).await.unwrap();
        assert_eq!(before.examined, 0);

        let after = intent.expiration_estimate + chrono::Duration::seconds(1);
        let first = watchdog.sweep(after).await.unwrap();
        assert_eq!(first.expired, 1);

        let second = watchdog.sweep(after).await.unwrap();
        assert_eq!(second.examined, 0);
        assert_eq!(second.expired, 0);
    }
}

//! Polling sessions for deposits a user is actively watching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::services::{EngineError, StatusReconciler};

struct Session {
    id: u64,
    cancel: oneshot::Sender<()>,
}

/// One background task per watched intent. A task stops when its intent turns
/// terminal or its session is closed.
pub struct PollingDriver {
    reconciler: Arc<StatusReconciler>,
    interval: Duration,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    next_id: AtomicU64,
}

impl PollingDriver {
    pub fn new(reconciler: Arc<StatusReconciler>, interval: Duration) -> Self {
        Self {
            reconciler,
            interval,
            sessions: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Starts polling `payment_id`. Returns `false` when a session is already
    /// running.
    pub async fn start(&self, payment_id: &str) -> Result<bool, EngineError> {
        let intent = self.reconciler.intent(payment_id).await?;
        if intent.status.is_terminal() {
            return Err(EngineError::AlreadyTerminal(payment_id.to_string()));
        }

        let (cancel, cancelled) = oneshot::channel();
        let session_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut sessions = lock_sessions(&self.sessions);
            if sessions.contains_key(payment_id) {
                return Ok(false);
            }
            sessions.insert(
                payment_id.to_string(),
                Session {
                    id: session_id,
                    cancel,
                },
            );
        }

        info!(
            payment_id = %payment_id,
            interval_ms = self.interval.as_millis() as u64,
            "polling session started"
        );
        tokio::spawn(poll_loop(
            self.reconciler.clone(),
            self.sessions.clone(),
            payment_id.to_string(),
            session_id,
            self.interval,
            cancelled,
        ));
        Ok(true)
    }

    /// Closes the session. An in-flight poll may still complete.
    pub fn stop(&self, payment_id: &str) -> bool {
        let session = lock_sessions(&self.sessions).remove(payment_id);
        match session {
            Some(session) => {
                let _ = session.cancel.send(());
                info!(payment_id = %payment_id, "polling session stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, payment_id: &str) -> bool {
        lock_sessions(&self.sessions).contains_key(payment_id)
    }

    pub fn active_sessions(&self) -> usize {
        lock_sessions(&self.sessions).len()
    }

    pub fn stop_all(&self) {
        let drained: Vec<(String, Session)> = lock_sessions(&self.sessions).drain().collect();
        for (_, session) in drained {
            let _ = session.cancel.send(());
        }
    }
}

fn lock_sessions(
    sessions: &Mutex<HashMap<String, Session>>,
) -> std::sync::MutexGuard<'_, HashMap<String, Session>> {
    match sessions.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

async fn poll_loop(
    reconciler: Arc<StatusReconciler>,
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    payment_id: String,
    session_id: u64,
    interval: Duration,
    mut cancelled: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = &mut cancelled => {
                debug!(payment_id = %payment_id, "poll loop cancelled");
                return;
            }
            _ = ticker.tick() => {
                match reconciler.poll_once(&payment_id).await {
                    Ok(outcome) if outcome.status.is_terminal() => break,
                    Ok(_) => {}
                    Err(e) if e.is_idempotent_noop() => break,
                    Err(EngineError::DepositNotFound(_)) => break,
                    Err(e) => warn!(payment_id = %payment_id, error = %e, "poll attempt failed"),
                }
            }
        }
    }

    let mut sessions = lock_sessions(&sessions);
    if sessions.get(&payment_id).map(|s| s.id) == Some(session_id) {
        sessions.remove(&payment_id);
    }
    info!(payment_id = %payment_id, "polling session ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::DepositStatus;
    use crate::processor::SandboxProcessor;
    use crate::services::{DepositSettings, DepositTracker, LedgerService};
    use bigdecimal::BigDecimal;
    use uuid::Uuid;

    async fn setup() -> (PollingDriver, Arc<StatusReconciler>, Arc<SandboxProcessor>, String) {
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
        let intent = tracker
            .create_deposit(account, BigDecimal::from(50), "btc")
            .await
            .unwrap();
        let reconciler = Arc::new(StatusReconciler::new(store, ledger, processor.clone()));
        let driver = PollingDriver::new(reconciler.clone(), Duration::from_millis(10));
        (driver, reconciler, processor, intent.payment_id)
    }

    #[tokio::test]
    async fn test_session_ends_when_terminal() {
        let (driver, reconciler, processor, payment_id) = setup().await;

        assert!(driver.start(&payment_id).await.unwrap());
        assert!(!driver.start(&payment_id).await.unwrap());

        processor.set_status(&payment_id, "finished");

        let mut finished = false;
        for _ in 0..200 {
            if reconciler.intent(&payment_id).await.unwrap().status == DepositStatus::Finished
                && !driver.is_active(&payment_id)
            {
                finished = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(finished);
    }

    #[tokio::test]
    async fn test_stop_cancels_session() {
        let (driver, _reconciler, processor, payment_id) = setup().await;

        driver.start(&payment_id).await.unwrap();
        assert!(driver.stop(&payment_id));
        assert!(!driver.stop(&payment_id));
        assert_eq!(driver.active_sessions(), 0);

        tokio::time::sleep(Duration::from_millis(30)).await;
        let calls = processor.status_calls();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(processor.status_calls(), calls);
    }
}

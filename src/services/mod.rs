pub mod balance;
pub mod deposits;
pub mod error;
pub mod locks;
pub mod polling;
pub mod reconciler;
pub mod watchdog;
pub mod withdrawals;

pub use balance::{BalanceUpdate, LedgerService};
pub use deposits::{DepositSettings, DepositTracker};
pub use error::EngineError;
pub use locks::KeyedLocks;
pub use polling::PollingDriver;
pub use reconciler::{ReconcileReport, SignalOutcome, SignalSource, StatusReconciler};
pub use watchdog::{ExpiryWatchdog, SweepReport};
pub use withdrawals::WithdrawalQueue;

//! Framework-agnostic entities of the payment engine.

pub mod deposit;
pub mod ledger;
pub mod withdrawal;

pub use deposit::{
    deposit_reference, transition, DepositIntent, DepositStatus, PaymentMethod, ProviderStatus,
    Transition,
};
pub use ledger::{
    is_reserved_reference, Account, AppliedDelta, BalanceGuard, EntryType, LedgerAudit,
    LedgerTransaction, NewLedgerEntry,
};
pub use withdrawal::{
    withdrawal_reference, Decision, ReviewRecord, WithdrawalRequest, WithdrawalStatus,
};

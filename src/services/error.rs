//! Engine error taxonomy.

use bigdecimal::BigDecimal;
use thiserror::Error;
use uuid::Uuid;

use crate::ports::RepositoryError;
use crate::processor::ProcessorError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum EngineError {
    // === Validation ===
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Amount {amount} is below the minimum of {minimum}")]
    BelowMinimum {
        amount: BigDecimal,
        minimum: BigDecimal,
    },

    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Insufficient funds: balance {available}, requested {requested}")]
    InsufficientFunds {
        available: BigDecimal,
        requested: BigDecimal,
    },

    // === External ===
    #[error("Payment processor unavailable: {0}")]
    ProcessorUnavailable(String),

    #[error("Webhook signature verification failed")]
    AuthenticityFailure,

    // === Idempotency guards ===
    #[error("Withdrawal {0} has already been decided")]
    AlreadyDecided(Uuid),

    #[error("Deposit {0} is already in a terminal state")]
    AlreadyTerminal(String),

    // === Lookups ===
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Deposit not found: {0}")]
    DepositNotFound(String),

    #[error("Withdrawal not found: {0}")]
    WithdrawalNotFound(Uuid),

    // === System ===
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION_ERROR",
            EngineError::BelowMinimum { .. } => "BELOW_MINIMUM",
            EngineError::InvalidAddress(_) => "INVALID_ADDRESS",
            EngineError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            EngineError::ProcessorUnavailable(_) => "PROCESSOR_UNAVAILABLE",
            EngineError::AuthenticityFailure => "AUTHENTICITY_FAILURE",
            EngineError::AlreadyDecided(_) => "ALREADY_DECIDED",
            EngineError::AlreadyTerminal(_) => "ALREADY_TERMINAL",
            EngineError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            EngineError::DepositNotFound(_) => "DEPOSIT_NOT_FOUND",
            EngineError::WithdrawalNotFound(_) => "WITHDRAWAL_NOT_FOUND",
            EngineError::Repository(_) => "STORAGE_ERROR",
        }
    }

    /// Idempotency guards: the desired end state is already reached.
    pub fn is_idempotent_noop(&self) -> bool {
        matches!(
            self,
            EngineError::AlreadyDecided(_) | EngineError::AlreadyTerminal(_)
        )
    }

    /// Retrying the same request later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ProcessorUnavailable(_) | EngineError::Repository(RepositoryError::Database(_))
        )
    }
}

impl From<ProcessorError> for EngineError {
    fn from(e: ProcessorError) -> Self {
        EngineError::ProcessorUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(EngineError::AuthenticityFailure.code(), "AUTHENTICITY_FAILURE");
        assert_eq!(
            EngineError::AlreadyDecided(Uuid::nil()).code(),
            "ALREADY_DECIDED"
        );
        assert_eq!(
            EngineError::InsufficientFunds {
                available: BigDecimal::from(40),
                requested: BigDecimal::from(50),
            }
            .code(),
            "INSUFFICIENT_FUNDS"
        );
    }

    #[test]
    fn test_classification() {
        assert!(EngineError::AlreadyTerminal("p".into()).is_idempotent_noop());
        assert!(!EngineError::AuthenticityFailure.is_idempotent_noop());
        assert!(EngineError::ProcessorUnavailable("down".into()).is_retryable());
        assert!(!EngineError::InvalidAddress("x".into()).is_retryable());
    }

    #[test]
    fn test_processor_error_maps_to_unavailable() {
        let err: EngineError = ProcessorError::CircuitBreakerOpen("open".into()).into();
        assert!(matches!(err, EngineError::ProcessorUnavailable(_)));
    }
}

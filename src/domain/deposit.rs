//! Deposit intent entity and the status transition table.
//!
//! Every status signal, whether it came from a poll, a webhook or the bank
//! back-office, goes through [`transition`]. The table is total: unknown
//! provider strings become [`ProviderStatus::Unrecognized`] and never move
//! the local state.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Local deposit lifecycle states.
///
/// Terminal: `Finished`, `Failed`, `Expired`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepositStatus {
    Waiting,
    Confirming,
    PartiallyPaid,
    Confirmed,
    Sending,
    Finished,
    Failed,
    Expired,
}

impl DepositStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DepositStatus::Finished | DepositStatus::Failed | DepositStatus::Expired
        )
    }

    /// Severity rank used to reject backward moves.
    ///
    /// `Confirming` and `PartiallyPaid` share a rank. The absorbing failure
    /// states rank above everything so nothing can follow them.
    pub fn rank(&self) -> u8 {
        match self {
            DepositStatus::Waiting => 0,
            DepositStatus::Confirming | DepositStatus::PartiallyPaid => 1,
            DepositStatus::Confirmed => 2,
            DepositStatus::Sending => 3,
            DepositStatus::Finished => 4,
            DepositStatus::Failed | DepositStatus::Expired => 5,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DepositStatus::Waiting => "waiting",
            DepositStatus::Confirming => "confirming",
            DepositStatus::PartiallyPaid => "partially_paid",
            DepositStatus::Confirmed => "confirmed",
            DepositStatus::Sending => "sending",
            DepositStatus::Finished => "finished",
            DepositStatus::Failed => "failed",
            DepositStatus::Expired => "expired",
        }
    }

    pub const OPEN: [DepositStatus; 5] = [
        DepositStatus::Waiting,
        DepositStatus::Confirming,
        DepositStatus::PartiallyPaid,
        DepositStatus::Confirmed,
        DepositStatus::Sending,
    ];
}

impl fmt::Display for DepositStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for DepositStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match ProviderStatus::parse(s) {
            ProviderStatus::Known(status) => Ok(status),
            ProviderStatus::Unrecognized(raw) => Err(format!("Invalid deposit status: {}", raw)),
        }
    }
}

/// A status as reported by the processor or back-office.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderStatus {
    Known(DepositStatus),
    Unrecognized(String),
}

impl ProviderStatus {
    /// Maps the provider vocabulary onto local states. Never fails.
    pub fn parse(raw: &str) -> Self {
        let status = match raw.trim().to_ascii_lowercase().as_str() {
            "waiting" => DepositStatus::Waiting,
            "confirming" => DepositStatus::Confirming,
            "partially_paid" => DepositStatus::PartiallyPaid,
            "confirmed" => DepositStatus::Confirmed,
            "sending" => DepositStatus::Sending,
            "finished" => DepositStatus::Finished,
            "failed" => DepositStatus::Failed,
            "expired" => DepositStatus::Expired,
            _ => return ProviderStatus::Unrecognized(raw.to_string()),
        };
        ProviderStatus::Known(status)
    }
}

/// Result of feeding one signal into the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "status")]
pub enum Transition {
    /// Move to the contained state.
    Advance(DepositStatus),
    /// Same status as already recorded.
    Duplicate,
    /// Backward move, or any move out of a terminal state.
    Stale,
    /// Provider status outside the known vocabulary.
    Unrecognized,
}

/// The transition table.
pub fn transition(current: DepositStatus, incoming: &ProviderStatus) -> Transition {
    let next = match incoming {
        ProviderStatus::Known(next) => *next,
        ProviderStatus::Unrecognized(_) => return Transition::Unrecognized,
    };

    if next == current {
        return Transition::Duplicate;
    }
    if current.is_terminal() {
        return Transition::Stale;
    }
    if next.is_terminal() {
        // finished, failed and expired are reachable from every open state
        return Transition::Advance(next);
    }
    if next.rank() < current.rank() {
        return Transition::Stale;
    }
    Transition::Advance(next)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMethod {
    Crypto,
    Bank,
}

impl PaymentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::Bank => "bank",
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crypto" => Ok(PaymentMethod::Crypto),
            "bank" => Ok(PaymentMethod::Bank),
            _ => Err(format!("Invalid payment method: {}", s)),
        }
    }
}

/// Local record of an in-progress incoming payment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepositIntent {
    pub id: Uuid,
    pub account_id: Uuid,
    pub method: PaymentMethod,
    pub amount: BigDecimal,
    pub price_currency: String,
    pub pay_currency: String,
    pub payment_id: String,
    pub pay_address: String,
    pub pay_amount: BigDecimal,
    pub status: DepositStatus,
    pub expiration_estimate: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DepositIntent {
    /// Ledger reference tying the credit row to this intent.
    pub fn ledger_reference(&self) -> String {
        deposit_reference(&self.payment_id)
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.expiration_estimate < now
    }
}

pub fn deposit_reference(payment_id: &str) -> String {
    format!("deposit:{}", payment_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn known(status: DepositStatus) -> ProviderStatus {
        ProviderStatus::Known(status)
    }

    #[test]
    fn test_terminal_states() {
        assert!(DepositStatus::Finished.is_terminal());
        assert!(DepositStatus::Failed.is_terminal());
        assert!(DepositStatus::Expired.is_terminal());

        for status in DepositStatus::OPEN {
            assert!(!status.is_terminal(), "{} should be open", status);
        }
    }

    #[test]
    fn test_provider_vocabulary_is_total() {
        assert_eq!(
            ProviderStatus::parse("partially_paid"),
            known(DepositStatus::PartiallyPaid)
        );
        assert_eq!(ProviderStatus::parse(" FINISHED "), known(DepositStatus::Finished));
        assert_eq!(
            ProviderStatus::parse("refunded"),
            ProviderStatus::Unrecognized("refunded".to_string())
        );
        assert_eq!(
            ProviderStatus::parse(""),
            ProviderStatus::Unrecognized(String::new())
        );
    }

    #[test]
    fn test_forward_path() {
        let path = [
            DepositStatus::Waiting,
            DepositStatus::Confirming,
            DepositStatus::Confirmed,
            DepositStatus::Sending,
            DepositStatus::Finished,
        ];
        for pair in path.windows(2) {
            assert_eq!(
                transition(pair[0], &known(pair[1])),
                Transition::Advance(pair[1])
            );
        }
    }

    #[test]
    fn test_skipping_ahead_is_allowed() {
        assert_eq!(
            transition(DepositStatus::Waiting, &known(DepositStatus::Finished)),
            Transition::Advance(DepositStatus::Finished)
        );
        assert_eq!(
            transition(DepositStatus::Waiting, &known(DepositStatus::Sending)),
            Transition::Advance(DepositStatus::Sending)
        );
    }

    #[test]
    fn test_backward_signal_is_stale() {
        assert_eq!(
            transition(DepositStatus::Confirmed, &known(DepositStatus::Waiting)),
            Transition::Stale
        );
        assert_eq!(
            transition(DepositStatus::Sending, &known(DepositStatus::Confirming)),
            Transition::Stale
        );
    }

    #[test]
    fn test_partially_paid_is_lateral_to_confirming() {
        assert_eq!(
            transition(DepositStatus::Confirming, &known(DepositStatus::PartiallyPaid)),
            Transition::Advance(DepositStatus::PartiallyPaid)
        );
        assert_eq!(
            transition(DepositStatus::PartiallyPaid, &known(DepositStatus::Confirming)),
            Transition::Advance(DepositStatus::Confirming)
        );
        assert_eq!(
            transition(DepositStatus::PartiallyPaid, &known(DepositStatus::Finished)),
            Transition::Advance(DepositStatus::Finished)
        );
    }

    #[test]
    fn test_absorbing_states_from_any_open_state() {
        for status in DepositStatus::OPEN {
            assert_eq!(
                transition(status, &known(DepositStatus::Failed)),
                Transition::Advance(DepositStatus::Failed)
            );
            assert_eq!(
                transition(status, &known(DepositStatus::Expired)),
                Transition::Advance(DepositStatus::Expired)
            );
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        assert_eq!(
            transition(DepositStatus::Finished, &known(DepositStatus::Finished)),
            Transition::Duplicate
        );
        assert_eq!(
            transition(DepositStatus::Finished, &known(DepositStatus::Expired)),
            Transition::Stale
        );
        assert_eq!(
            transition(DepositStatus::Expired, &known(DepositStatus::Finished)),
            Transition::Stale
        );
        assert_eq!(
            transition(DepositStatus::Failed, &known(DepositStatus::Waiting)),
            Transition::Stale
        );
    }

    #[test]
    fn test_unrecognized_never_moves() {
        let raw = ProviderStatus::Unrecognized("chargeback".into());
        assert_eq!(transition(DepositStatus::Waiting, &raw), Transition::Unrecognized);
        assert_eq!(transition(DepositStatus::Finished, &raw), Transition::Unrecognized);
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            DepositStatus::Waiting,
            DepositStatus::PartiallyPaid,
            DepositStatus::Finished,
            DepositStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<DepositStatus>().unwrap(), status);
        }
        assert!("bogus".parse::<DepositStatus>().is_err());
    }
}

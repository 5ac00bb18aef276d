//! Withdrawal request entity.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::validation::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WithdrawalStatus {
    Pending,
    Approved,
    Rejected,
}

impl WithdrawalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, WithdrawalStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WithdrawalStatus::Pending => "pending",
            WithdrawalStatus::Approved => "approved",
            WithdrawalStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for WithdrawalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WithdrawalStatus::Pending),
            "approved" => Ok(WithdrawalStatus::Approved),
            "rejected" => Ok(WithdrawalStatus::Rejected),
            _ => Err(format!("Invalid withdrawal status: {}", s)),
        }
    }
}

/// Reviewer verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn resulting_status(&self) -> WithdrawalStatus {
        match self {
            Decision::Approve => WithdrawalStatus::Approved,
            Decision::Reject => WithdrawalStatus::Rejected,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: Uuid,
    pub account_id: Uuid,
    pub amount: BigDecimal,
    pub network: Network,
    pub destination: String,
    pub status: WithdrawalStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WithdrawalRequest {
    pub fn new(account_id: Uuid, amount: BigDecimal, network: Network, destination: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            amount,
            network,
            destination,
            status: WithdrawalStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            reason: None,
            created_at: Utc::now(),
        }
    }

    pub fn ledger_reference(&self) -> String {
        withdrawal_reference(self.id)
    }
}

pub fn withdrawal_reference(id: Uuid) -> String {
    format!("withdrawal:{}", id)
}

/// Persisted outcome of a reviewer action.
#[derive(Debug, Clone)]
pub struct ReviewRecord {
    pub status: WithdrawalStatus,
    pub reviewed_by: String,
    pub reviewed_at: DateTime<Utc>,
    pub reason: Option<String>,
}

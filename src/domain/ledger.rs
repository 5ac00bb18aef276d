//! Ledger entities.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// An account and its cached balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub balance: BigDecimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: BigDecimal::from(0),
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    Credit,
    Debit,
    Adjustment,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::Credit => "credit",
            EntryType::Debit => "debit",
            EntryType::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "credit" => Ok(EntryType::Credit),
            "debit" => Ok(EntryType::Debit),
            "adjustment" => Ok(EntryType::Adjustment),
            _ => Err(format!("Invalid entry type: {}", s)),
        }
    }
}

/// Immutable, append-only ledger row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    pub seq: i64,
    pub account_id: Uuid,
    pub amount: BigDecimal,
    pub entry_type: EntryType,
    pub description: String,
    pub new_balance: BigDecimal,
    pub reference: Option<String>,
    pub actor_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Same account and same delta as `entry`.
    pub fn records(&self, entry: &NewLedgerEntry) -> bool {
        self.account_id == entry.account_id && self.amount == entry.amount
    }
}

/// Reference namespaces written only by the deposit and withdrawal flows.
pub const RESERVED_REFERENCE_PREFIXES: [&str; 2] = ["deposit:", "withdrawal:"];

pub fn is_reserved_reference(reference: &str) -> bool {
    let reference = reference.trim().to_ascii_lowercase();
    RESERVED_REFERENCE_PREFIXES
        .iter()
        .any(|prefix| reference.starts_with(prefix))
}

/// Guard evaluated against the post-apply balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalanceGuard {
    #[default]
    AllowNegative,
    RequireNonNegative,
}

impl BalanceGuard {
    pub fn permits(&self, new_balance: &BigDecimal) -> bool {
        match self {
            BalanceGuard::AllowNegative => true,
            BalanceGuard::RequireNonNegative => *new_balance >= BigDecimal::from(0),
        }
    }
}

/// Input to the balance mutator.
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub account_id: Uuid,
    pub amount: BigDecimal,
    pub entry_type: EntryType,
    pub description: String,
    pub reference: Option<String>,
    pub actor_id: Option<String>,
}

impl NewLedgerEntry {
    pub fn new(
        account_id: Uuid,
        amount: BigDecimal,
        entry_type: EntryType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            amount,
            entry_type,
            description: description.into(),
            reference: None,
            actor_id: None,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = Some(actor_id.into());
        self
    }
}

/// Outcome of an applied delta.
///
/// `replayed` is set when the reference already existed and nothing new was
/// written.
#[derive(Debug, Clone, Serialize)]
pub struct AppliedDelta {
    pub transaction: LedgerTransaction,
    pub replayed: bool,
}

/// Result of comparing an account's cached balance with its ledger.
#[derive(Debug, Clone, Serialize)]
pub struct LedgerAudit {
    pub account_id: Uuid,
    pub balance: BigDecimal,
    pub ledger_sum: BigDecimal,
    pub latest_snapshot: Option<BigDecimal>,
    pub entries: i64,
    pub consistent: bool,
}

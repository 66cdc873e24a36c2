use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    TopUp,
    LeadPurchase,
    Refund,
}

impl EntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::TopUp => "top_up",
            EntryType::LeadPurchase => "lead_purchase",
            EntryType::Refund => "refund",
        }
    }
}

impl FromStr for EntryType {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "top_up" => Ok(Self::TopUp),
            "lead_purchase" => Ok(Self::LeadPurchase),
            "refund" => Ok(Self::Refund),
            _ => Err(()),
        }
    }
}

/// key: ledger-entry -> immutable balance change
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: i64,
    pub id: Uuid,
    pub company_id: Uuid,
    pub amount: i64,
    pub entry_type: String,
    pub description: String,
    pub external_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn kind(&self) -> Option<EntryType> {
        self.entry_type.parse().ok()
    }
}

#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub company_id: Uuid,
    pub amount: i64,
    pub entry_type: EntryType,
    pub description: String,
    pub external_ref: Option<String>,
}

impl NewLedgerEntry {
    pub fn new(
        company_id: Uuid,
        amount: i64,
        entry_type: EntryType,
        description: impl Into<String>,
    ) -> Self {
        Self {
            company_id,
            amount,
            entry_type,
            description: description.into(),
            external_ref: None,
        }
    }

    pub fn with_external_ref(mut self, external_ref: impl Into<String>) -> Self {
        self.external_ref = Some(external_ref.into());
        self
    }
}

/// Result of applying an entry. A replay carries the entry stored by the first
/// delivery of the same external reference and leaves the balance untouched.
#[derive(Debug, Clone)]
pub enum ApplyOutcome {
    Applied(LedgerEntry),
    AlreadyApplied(LedgerEntry),
}

impl ApplyOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            ApplyOutcome::Applied(entry) | ApplyOutcome::AlreadyApplied(entry) => entry,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            ApplyOutcome::Applied(entry) | ApplyOutcome::AlreadyApplied(entry) => entry,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied(_))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerPage {
    pub entries: Vec<LedgerEntry>,
    pub next_cursor: Option<i64>,
}

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

use crate::coverage::RoutingKey;

/// key: quote-model -> customer move request
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Quote {
    pub id: Uuid,
    pub owner_id: Option<Uuid>,
    pub category: String,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub starting_address: String,
    pub ending_address: String,
    pub move_date: Option<NaiveDate>,
    pub ai_analysis: Value,
    pub interested_in_booking: Option<bool>,
    pub email_1_sent_at: Option<DateTime<Utc>>,
    pub email_2_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Quote {
    pub fn lead_category(&self) -> LeadCategory {
        self.category.parse().unwrap_or(LeadCategory::Removals)
    }
}

/// key: company-model -> lead buyer
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Company {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub is_active: bool,
    pub coverage: Vec<String>,
    pub balance: i64,
    pub plan: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LeadCategory {
    Storage,
    Removals,
}

impl LeadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadCategory::Storage => "storage",
            LeadCategory::Removals => "removals",
        }
    }
}

impl FromStr for LeadCategory {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "storage" => Ok(Self::Storage),
            "removals" => Ok(Self::Removals),
            _ => Err(()),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    New,
    Contacted,
    Won,
    Lost,
}

impl PurchaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PurchaseStatus::New => "new",
            PurchaseStatus::Contacted => "contacted",
            PurchaseStatus::Won => "won",
            PurchaseStatus::Lost => "lost",
        }
    }
}

/// key: lead-purchase-model -> one company charged for one quote
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LeadPurchase {
    pub id: Uuid,
    pub company_id: Uuid,
    pub quote_id: Uuid,
    pub amount_charged: i64,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub starting_address: String,
    pub ending_address: String,
    pub move_date: Option<NaiveDate>,
    pub estimate: Option<f64>,
    pub volume_m3: Option<f64>,
    pub van_count: Option<i32>,
    pub movers: Option<i32>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DistributionStatus {
    Distributed,
    AlreadyDistributed,
    Fallback,
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    UnknownRoutingKey,
    NoEligibleCompany,
    NoCompanyCharged,
}

impl FallbackReason {
    pub fn describe(&self) -> &'static str {
        match self {
            FallbackReason::UnknownRoutingKey => "no routing key could be derived from the address",
            FallbackReason::NoEligibleCompany => "no active company with enough balance covers the area",
            FallbackReason::NoCompanyCharged => "every eligible company failed to be charged",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AlreadyPurchased,
    InsufficientBalance,
    ChargeFailed,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedCompany {
    pub company_id: Uuid,
    pub reason: SkipReason,
}

#[derive(Debug, Clone, Serialize)]
pub struct DistributionResult {
    pub quote_id: Uuid,
    pub status: DistributionStatus,
    pub routing_key: RoutingKey,
    pub price: Option<i64>,
    pub charged: Vec<Uuid>,
    pub skipped: Vec<SkippedCompany>,
    pub fallback_reason: Option<FallbackReason>,
}

impl DistributionResult {
    pub fn fallback(
        quote_id: Uuid,
        routing_key: RoutingKey,
        price: Option<i64>,
        skipped: Vec<SkippedCompany>,
        reason: FallbackReason,
    ) -> Self {
        Self {
            quote_id,
            status: DistributionStatus::Fallback,
            routing_key,
            price,
            charged: Vec::new(),
            skipped,
            fallback_reason: Some(reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.status == DistributionStatus::Fallback
    }
}

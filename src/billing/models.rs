use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// key: billing-subscription-model -> company recurring billing state
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub company_id: Uuid,
    pub status: String,
    pub stripe_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub last_event_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    pub fn status(&self) -> SubscriptionStatus {
        self.status.parse().unwrap_or(SubscriptionStatus::Inactive)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    PastDue,
    Canceled,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Inactive => "inactive",
        }
    }

    /// Collapse the processor's status vocabulary onto ours.
    pub fn from_provider(value: &str) -> Self {
        match value {
            "active" => Self::Active,
            "past_due" => Self::PastDue,
            "canceled" => Self::Canceled,
            _ => Self::Inactive,
        }
    }
}

impl FromStr for SubscriptionStatus {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "active" => Ok(Self::Active),
            "past_due" => Ok(Self::PastDue),
            "canceled" => Ok(Self::Canceled),
            "inactive" => Ok(Self::Inactive),
            _ => Err(()),
        }
    }
}

/// Listing tier a company is on.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartnerPlan {
    Trial,
    Standard,
    Premium,
    Founding,
}

impl PartnerPlan {
    pub fn as_str(&self) -> &'static str {
        match self {
            PartnerPlan::Trial => "trial",
            PartnerPlan::Standard => "standard",
            PartnerPlan::Premium => "premium",
            PartnerPlan::Founding => "founding",
        }
    }
}

impl FromStr for PartnerPlan {
    type Err = ();

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "trial" => Ok(Self::Trial),
            "standard" => Ok(Self::Standard),
            "premium" => Ok(Self::Premium),
            "founding" => Ok(Self::Founding),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct PipelineStage {
    pub id: Uuid,
    pub company_id: Uuid,
    pub name: String,
    pub position: i32,
    pub color: String,
}

/// Stages every company starts with on first activation, in board order.
pub const DEFAULT_PIPELINE_STAGES: &[(&str, &str)] = &[
    ("New Lead", "#3b82f6"),
    ("Contacted", "#8b5cf6"),
    ("Quote Sent", "#f59e0b"),
    ("Booked", "#10b981"),
    ("Completed", "#059669"),
    ("Lost", "#ef4444"),
];

use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use super::models::PartnerPlan;

/// key: billing-events -> processor webhook envelope
#[derive(Debug, Clone, Deserialize)]
pub struct StripeEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, Clone)]
pub enum PaymentEvent {
    CheckoutCompleted(CheckoutSession),
    SubscriptionUpdated(StripeSubscription),
    SubscriptionDeleted(StripeSubscription),
    Unhandled(String),
}

impl StripeEvent {
    pub fn occurred_at(&self) -> DateTime<Utc> {
        from_unix(self.created).unwrap_or_else(Utc::now)
    }

    pub fn parse(self) -> Result<PaymentEvent, serde_json::Error> {
        let event = match self.event_type.as_str() {
            "checkout.session.completed" => {
                PaymentEvent::CheckoutCompleted(serde_json::from_value(self.data.object)?)
            }
            "customer.subscription.updated" => {
                PaymentEvent::SubscriptionUpdated(serde_json::from_value(self.data.object)?)
            }
            "customer.subscription.deleted" => {
                PaymentEvent::SubscriptionDeleted(serde_json::from_value(self.data.object)?)
            }
            _ => PaymentEvent::Unhandled(self.event_type),
        };
        Ok(event)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub customer_details: Option<CustomerDetails>,
    #[serde(default)]
    pub payment_status: Option<String>,
    #[serde(default)]
    pub line_items: Option<LineItemList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CustomerDetails {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItemList {
    #[serde(default)]
    pub data: Vec<LineItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub price: Option<Price>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    #[serde(rename = "type", default)]
    pub price_type: Option<String>,
    #[serde(default)]
    pub recurring: Option<Value>,
    #[serde(default)]
    pub product: Option<ProductRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ProductRef {
    Id(String),
    Expanded {
        #[serde(default)]
        name: Option<String>,
    },
}

impl LineItem {
    pub fn is_recurring(&self) -> bool {
        self.price.as_ref().map_or(false, |price| {
            price.price_type.as_deref() == Some("recurring")
                || price.recurring.as_ref().map_or(false, |value| !value.is_null())
        })
    }

    pub fn product_name(&self) -> String {
        let expanded = self.price.as_ref().and_then(|price| match &price.product {
            Some(ProductRef::Expanded { name }) => name.clone(),
            _ => None,
        });
        expanded
            .or_else(|| self.description.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSubscription {
    pub id: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub customer: Option<String>,
    #[serde(default)]
    pub current_period_start: Option<i64>,
    #[serde(default)]
    pub current_period_end: Option<i64>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl StripeSubscription {
    pub fn period(&self) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        (
            self.current_period_start.and_then(from_unix),
            self.current_period_end.and_then(from_unix),
        )
    }

    pub fn company_id(&self) -> Option<Uuid> {
        metadata_uuid(&self.metadata, "company_id")
    }
}

/// What a completed checkout paid for, from its metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutPurpose {
    BalanceTopUp { company_id: Uuid, amount: i64 },
    QuoteCredits { user_id: Uuid, quantity: i64 },
    Subscription { company_id: Uuid, plan: PartnerPlan },
    PaymentLink,
    Unrecognized(String),
}

impl CheckoutSession {
    pub fn purpose(&self) -> Result<CheckoutPurpose, &'static str> {
        let Some(kind) = self.metadata.get("type").map(|value| value.trim()) else {
            return Ok(CheckoutPurpose::PaymentLink);
        };
        match kind {
            "balance_topup" | "top_up" => {
                let company_id =
                    metadata_uuid(&self.metadata, "company_id").ok_or("metadata.company_id")?;
                let amount = self
                    .amount_total
                    .or_else(|| metadata_i64(&self.metadata, "amount"))
                    .filter(|amount| *amount > 0)
                    .ok_or("amount_total")?;
                Ok(CheckoutPurpose::BalanceTopUp { company_id, amount })
            }
            "quote_credits" | "credits" => {
                let user_id = metadata_uuid(&self.metadata, "user_id").ok_or("metadata.user_id")?;
                let quantity = metadata_i64(&self.metadata, "credits")
                    .or_else(|| metadata_i64(&self.metadata, "quantity"))
                    .filter(|quantity| *quantity > 0)
                    .ok_or("metadata.credits")?;
                Ok(CheckoutPurpose::QuoteCredits { user_id, quantity })
            }
            "subscription" => {
                let company_id =
                    metadata_uuid(&self.metadata, "company_id").ok_or("metadata.company_id")?;
                let plan = self
                    .metadata
                    .get("plan")
                    .and_then(|plan| plan.parse().ok())
                    .unwrap_or(PartnerPlan::Standard);
                Ok(CheckoutPurpose::Subscription { company_id, plan })
            }
            other => Ok(CheckoutPurpose::Unrecognized(other.to_string())),
        }
    }

    pub fn billing_email(&self) -> Option<&str> {
        self.customer_details
            .as_ref()
            .and_then(|details| details.email.as_deref())
            .or(self.customer_email.as_deref())
            .filter(|email| !email.trim().is_empty())
    }

    pub fn is_unpaid(&self) -> bool {
        self.payment_status.as_deref() == Some("unpaid")
    }
}

/// Map purchased line items onto a plan. Recurring items win over one-time ones.
pub fn resolve_plan(items: &[LineItem]) -> Option<PartnerPlan> {
    let recurring = items.iter().find(|item| item.is_recurring()).map(|item| {
        if item.product_name().to_lowercase().contains("premium") {
            PartnerPlan::Premium
        } else {
            PartnerPlan::Standard
        }
    });
    recurring.or_else(|| {
        items.iter().find_map(|item| {
            let name = item.product_name().to_lowercase();
            (name.contains("founding") || name.contains("lifetime")).then_some(PartnerPlan::Founding)
        })
    })
}

fn metadata_uuid(metadata: &HashMap<String, String>, key: &str) -> Option<Uuid> {
    metadata.get(key).and_then(|value| Uuid::parse_str(value.trim()).ok())
}

fn metadata_i64(metadata: &HashMap<String, String>, key: &str) -> Option<i64> {
    metadata.get(key).and_then(|value| value.trim().parse().ok())
}

fn from_unix(seconds: i64) -> Option<DateTime<Utc>> {
    if seconds <= 0 {
        return None;
    }
    Utc.timestamp_opt(seconds, 0).single()
}

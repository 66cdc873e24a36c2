#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leadbroker::ledger::{EntryType, LedgerStore};
use leadbroker::notifications::{Notification, NotificationDispatcher};
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

/// Inserts an active company and funds it through the ledger so the cached
/// balance always has entries behind it.
pub async fn seed_company(pool: &PgPool, email: &str, coverage: &[&str], balance: i64) -> Uuid {
    let id = Uuid::new_v4();
    let coverage: Vec<String> = coverage.iter().map(|key| key.to_string()).collect();
    sqlx::query(
        "INSERT INTO companies (id, name, email, is_active, coverage) VALUES ($1, $2, $3, TRUE, $4)",
    )
    .bind(id)
    .bind(format!("Movers {email}"))
    .bind(email)
    .bind(&coverage)
    .execute(pool)
    .await
    .unwrap();

    if balance > 0 {
        LedgerStore::new(pool.clone())
            .apply_entry(id, balance, EntryType::TopUp, "opening balance", None)
            .await
            .unwrap();
    }
    id
}

pub async fn seed_quote(
    pool: &PgPool,
    starting_address: &str,
    ai_analysis: Value,
    created_at: DateTime<Utc>,
) -> Uuid {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO quotes (
            id, owner_id, category, customer_name, customer_email, customer_phone,
            starting_address, ending_address, ai_analysis, created_at
        ) VALUES ($1, $2, 'removals', 'Sam Customer', $3, '07700900000', $4, 'Leeds LS1 4AP', $5, $6)
        "#,
    )
    .bind(id)
    .bind(Uuid::new_v4())
    .bind(format!("customer-{id}@example.com"))
    .bind(starting_address)
    .bind(ai_analysis)
    .bind(created_at)
    .execute(pool)
    .await
    .unwrap();
    id
}

pub async fn set_lead_price(pool: &PgPool, price: i64) {
    sqlx::query("INSERT INTO lead_pricing (id, price_per_lead, is_active) VALUES ($1, $2, TRUE)")
        .bind(Uuid::new_v4())
        .bind(price)
        .execute(pool)
        .await
        .unwrap();
}

pub async fn balance_of(pool: &PgPool, company_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT balance FROM companies WHERE id = $1")
        .bind(company_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn count(pool: &PgPool, sql: &str, id: Uuid) -> i64 {
    sqlx::query_scalar(sql).bind(id).fetch_one(pool).await.unwrap()
}

/// Captures notifications and fails for any recipient listed in `failing`.
#[derive(Default)]
pub struct RecordingDispatcher {
    pub sent: Mutex<Vec<Notification>>,
    pub failing: Mutex<Vec<String>>,
}

impl RecordingDispatcher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_for(&self, recipient: &str) {
        self.failing.lock().unwrap().push(recipient.to_string());
    }

    pub fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    pub fn follow_ups_to(&self, recipient: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|notification| {
                matches!(notification, Notification::FollowUp { recipient: to, .. } if to == recipient)
            })
            .count()
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<()> {
        if let Notification::FollowUp { recipient, .. } = &notification {
            if self.failing.lock().unwrap().contains(recipient) {
                bail!("mailbox unavailable for {recipient}");
            }
        }
        self.sent.lock().unwrap().push(notification);
        Ok(())
    }
}

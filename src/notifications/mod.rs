//! Outbound email collaborator used by distribution, reconciliation and follow-ups.

mod templates;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::json;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config;
use crate::distribution::{LeadCategory, MoveSummary};
use crate::followups::FollowUpStage;

pub use templates::RenderedEmail;

/// Structured lead data handed to a buying company.
#[derive(Debug, Clone, Serialize)]
pub struct LeadData {
    pub quote_id: Uuid,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub customer_phone: Option<String>,
    pub starting_address: String,
    pub ending_address: String,
    pub move_date: Option<chrono::NaiveDate>,
    pub summary: MoveSummary,
    pub price_paid: i64,
}

#[derive(Debug, Clone)]
pub enum Notification {
    NewLead {
        company_id: Uuid,
        category: LeadCategory,
        lead: LeadData,
    },
    FollowUp {
        quote_id: Uuid,
        stage: FollowUpStage,
        recipient: String,
        customer_name: Option<String>,
    },
    OperatorAlert {
        subject: String,
        body: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::NewLead { .. } => "new_lead",
            Notification::FollowUp { .. } => "follow_up",
            Notification::OperatorAlert { .. } => "operator_alert",
        }
    }
}

/// key: notification-dispatcher -> email boundary
#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<()>;
}

/// Fire-and-forget delivery. Failures are logged and never reach the caller.
pub fn dispatch_best_effort(dispatcher: Arc<dyn NotificationDispatcher>, notification: Notification) {
    tokio::spawn(async move {
        let kind = notification.kind();
        if let Err(err) = dispatcher.dispatch(notification).await {
            warn!(?err, kind, "notification dispatch failed");
        }
    });
}

/// Picks the HTTP email dispatcher when an API key is configured.
pub fn from_env(pool: PgPool) -> Arc<dyn NotificationDispatcher> {
    match config::EMAIL_API_KEY.clone() {
        Some(api_key) => Arc::new(EmailDispatcher::new(
            pool,
            config::EMAIL_API_URL.clone(),
            api_key,
            config::EMAIL_FROM.clone(),
            config::OPERATOR_EMAIL.clone(),
        )),
        None => {
            warn!("EMAIL_API_KEY not set; notifications will only be logged");
            Arc::new(LogDispatcher)
        }
    }
}

const SEND_TIMEOUT: Duration = Duration::from_secs(10);

pub struct EmailDispatcher {
    client: reqwest::Client,
    pool: PgPool,
    endpoint: String,
    api_key: String,
    from: String,
    operator_email: Option<String>,
}

impl EmailDispatcher {
    pub fn new(
        pool: PgPool,
        endpoint: String,
        api_key: String,
        from: String,
        operator_email: Option<String>,
    ) -> Self {
        Self {
            client: http_client(SEND_TIMEOUT),
            pool,
            endpoint,
            api_key,
            from,
            operator_email,
        }
    }

    /// Caps each send so a hung email API cannot stall a follow-up sweep.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.client = http_client(timeout);
        self
    }

    async fn company_email(&self, company_id: Uuid) -> Result<String> {
        let email: Option<String> = sqlx::query_scalar("SELECT email FROM companies WHERE id = $1")
            .bind(company_id)
            .fetch_optional(&self.pool)
            .await
            .context("failed to look up company email")?;
        email.with_context(|| format!("company {company_id} has no email on record"))
    }

    async fn send(&self, email: RenderedEmail) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&json!({
                "from": self.from,
                "to": [email.to],
                "subject": email.subject,
                "html": email.html,
            }))
            .send()
            .await
            .context("email endpoint unreachable")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("email endpoint returned {status}: {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl NotificationDispatcher for EmailDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<()> {
        let email = match notification {
            Notification::NewLead {
                company_id,
                category,
                lead,
            } => {
                let to = self.company_email(company_id).await?;
                templates::new_lead(to, category, &lead)
            }
            Notification::FollowUp {
                quote_id,
                stage,
                recipient,
                customer_name,
            } => templates::follow_up(
                recipient,
                stage,
                quote_id,
                customer_name.as_deref(),
                &config::PUBLIC_APP_URL,
            ),
            Notification::OperatorAlert { subject, body } => {
                let Some(to) = self.operator_email.clone() else {
                    warn!(%subject, "operator alert dropped: OPERATOR_EMAIL not set");
                    return Ok(());
                };
                templates::operator_alert(to, &subject, &body)
            }
        };
        self.send(email).await
    }
}

/// Logs notifications instead of sending them.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<()> {
        info!(kind = notification.kind(), ?notification, "notification (log only)");
        Ok(())
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

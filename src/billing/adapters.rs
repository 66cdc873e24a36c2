use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use crate::config;

use super::events::{LineItem, StripeSubscription};

/// key: billing-adapter -> payment processor lookups
///
/// Only used to enrich webhook payloads; every caller tolerates failure.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription>;
    async fn list_line_items(&self, checkout_session_id: &str) -> Result<Vec<LineItem>>;
}

pub fn from_env() -> Arc<dyn PaymentProvider> {
    match config::STRIPE_API_KEY.clone() {
        Some(api_key) => Arc::new(StripeClient::new(config::STRIPE_API_BASE.clone(), api_key)),
        None => {
            warn!("STRIPE_API_KEY not set; webhook payloads will not be enriched");
            Arc::new(OfflineProvider)
        }
    }
}

/// key: billing-adapter-stripe -> REST client
pub struct StripeClient {
    base: String,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

impl StripeClient {
    pub fn new(base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
        }
    }

    async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = format!("{}/v1/{}", self.base, path);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.api_key)
            .query(query)
            .send()
            .await
            .with_context(|| format!("payment provider unreachable for {path}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("payment provider returned {status} for {path}: {body}");
        }
        response
            .json()
            .await
            .with_context(|| format!("unexpected payload from payment provider for {path}"))
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        self.get(&format!("subscriptions/{subscription_id}"), &[]).await
    }

    async fn list_line_items(&self, checkout_session_id: &str) -> Result<Vec<LineItem>> {
        let list: ListResponse<LineItem> = self
            .get(
                &format!("checkout/sessions/{checkout_session_id}/line_items"),
                &[("expand[]", "data.price.product"), ("limit", "100")],
            )
            .await?;
        Ok(list.data)
    }
}

/// Provider used when no API key is configured. Every lookup fails.
pub struct OfflineProvider;

#[async_trait]
impl PaymentProvider for OfflineProvider {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<StripeSubscription> {
        bail!("payment provider not configured; cannot retrieve {subscription_id}")
    }

    async fn list_line_items(&self, checkout_session_id: &str) -> Result<Vec<LineItem>> {
        bail!("payment provider not configured; cannot list items for {checkout_session_id}")
    }
}

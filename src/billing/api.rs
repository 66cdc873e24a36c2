use std::sync::Arc;

use axum::{body::Bytes, extract::Extension, http::HeaderMap, Json};
use serde::Serialize;
use sqlx::PgPool;

use crate::config;
use crate::error::AppResult;
use crate::notifications::NotificationDispatcher;

use super::adapters::PaymentProvider;
use super::reconciliation::{ReconciliationOutcome, Reconciler};

pub const SIGNATURE_HEADER: &str = "stripe-signature";

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub received: bool,
    pub outcome: ReconciliationOutcome,
}

/// key: billing-api -> payment processor webhook
///
/// Applied synchronously so the status code tells the processor whether to
/// redeliver.
pub async fn stripe_webhook(
    Extension(pool): Extension<PgPool>,
    Extension(provider): Extension<Arc<dyn PaymentProvider>>,
    Extension(notifier): Extension<Arc<dyn NotificationDispatcher>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<WebhookAck>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    let reconciler = Reconciler::new(
        pool,
        provider,
        notifier,
        config::STRIPE_WEBHOOK_SECRET.as_str(),
        *config::STRIPE_WEBHOOK_TOLERANCE_SECS,
    );
    let outcome = reconciler
        .handle(&body, signature, chrono::Utc::now().timestamp())
        .await?;
    Ok(Json(WebhookAck {
        received: true,
        outcome,
    }))
}

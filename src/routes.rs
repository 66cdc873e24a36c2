use std::sync::Arc;

use axum::{
    routing::{get, patch, post},
    Extension, Router,
};
use sqlx::PgPool;

use crate::billing::{self, PaymentProvider};
use crate::notifications::NotificationDispatcher;
use crate::{distribution, followups, ledger};

pub const SERVICE_BANNER: &str = "Lead Broker API";

pub async fn root() -> &'static str {
    SERVICE_BANNER
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/leads/distribute", post(distribution::api::distribute_lead))
        .route("/api/webhooks/stripe", post(billing::stripe_webhook))
        .route("/api/cron/follow-ups", get(followups::api::run_follow_ups))
        .route("/api/companies/:id/balance", get(ledger::api::get_balance))
        .route("/api/companies/:id/ledger", get(ledger::api::list_entries))
        .route(
            "/api/companies/:id/purchases",
            get(distribution::api::list_purchases),
        )
        .route(
            "/api/purchases/:id/status",
            patch(distribution::api::update_purchase_status),
        )
        .route(
            "/api/quotes/:id/interest",
            post(followups::api::record_interest),
        )
}

/// Full application minus the metrics endpoint, which main owns because the
/// Prometheus recorder is process-global.
pub fn app(
    pool: PgPool,
    notifier: Arc<dyn NotificationDispatcher>,
    provider: Arc<dyn PaymentProvider>,
) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(pool))
        .layer(Extension(notifier))
        .layer(Extension(provider))
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::extractor::{AuthUser, IntakeCaller};
use crate::notifications::NotificationDispatcher;

use super::engine::PURCHASE_COLUMNS;
use super::{DistributionEngine, DistributionResult, LeadPurchase, PurchaseStatus};

#[derive(Debug, Deserialize)]
pub struct DistributeRequest {
    #[serde(default)]
    pub quote_id: Option<Uuid>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePurchaseStatusRequest {
    pub status: PurchaseStatus,
}

/// key: distribution-api -> new-quote trigger
pub async fn distribute_lead(
    Extension(pool): Extension<PgPool>,
    Extension(notifier): Extension<Arc<dyn NotificationDispatcher>>,
    _caller: IntakeCaller,
    Json(payload): Json<DistributeRequest>,
) -> AppResult<Json<DistributionResult>> {
    let quote_id = payload
        .quote_id
        .ok_or_else(|| AppError::BadRequest("quote_id required".into()))?;
    let engine = DistributionEngine::new(pool, notifier, *config::DEFAULT_LEAD_PRICE_PENCE);
    let result = engine.distribute(quote_id).await?;
    Ok(Json(result))
}

pub async fn list_purchases(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(company_id): Path<Uuid>,
) -> AppResult<Json<Vec<LeadPurchase>>> {
    user.require_company(company_id)?;
    let purchases = sqlx::query_as::<_, LeadPurchase>(&format!(
        "SELECT {PURCHASE_COLUMNS} FROM lead_purchases WHERE company_id = $1 ORDER BY created_at DESC"
    ))
    .bind(company_id)
    .fetch_all(&pool)
    .await?;
    Ok(Json(purchases))
}

pub async fn update_purchase_status(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(purchase_id): Path<Uuid>,
    Json(payload): Json<UpdatePurchaseStatusRequest>,
) -> AppResult<Json<LeadPurchase>> {
    let owner: Option<Uuid> =
        sqlx::query_scalar("SELECT company_id FROM lead_purchases WHERE id = $1")
            .bind(purchase_id)
            .fetch_optional(&pool)
            .await?;
    let owner = owner.ok_or(AppError::NotFound)?;
    user.require_company(owner)?;

    let purchase = sqlx::query_as::<_, LeadPurchase>(&format!(
        "UPDATE lead_purchases SET status = $2, updated_at = NOW() WHERE id = $1 \
         RETURNING {PURCHASE_COLUMNS}"
    ))
    .bind(purchase_id)
    .bind(payload.status.as_str())
    .fetch_one(&pool)
    .await?;
    Ok(Json(purchase))
}

use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::extractor::{AuthUser, CronCaller};
use crate::notifications::NotificationDispatcher;

use super::{run_sweeps, FollowUpPolicy, FollowUpReport};

/// key: followups-api -> cron tick
pub async fn run_follow_ups(
    Extension(pool): Extension<PgPool>,
    Extension(notifier): Extension<Arc<dyn NotificationDispatcher>>,
    _caller: CronCaller,
) -> AppResult<Json<FollowUpReport>> {
    let policy = FollowUpPolicy::from_config();
    let report = run_sweeps(&pool, notifier.as_ref(), &policy, chrono::Utc::now()).await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
pub struct InterestRequest {
    pub interested: bool,
}

#[derive(Debug, Serialize)]
pub struct InterestResponse {
    pub quote_id: Uuid,
    pub interested_in_booking: bool,
}

/// Records the customer's decision once. Later calls return the stored answer.
pub async fn record_interest(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(quote_id): Path<Uuid>,
    Json(payload): Json<InterestRequest>,
) -> AppResult<Json<InterestResponse>> {
    let owner: Option<Option<Uuid>> = sqlx::query_scalar("SELECT owner_id FROM quotes WHERE id = $1")
        .bind(quote_id)
        .fetch_optional(&pool)
        .await?;
    let owner = owner.ok_or(AppError::NotFound)?;
    if owner != Some(user.user_id) && !user.is_admin() {
        return Err(AppError::Forbidden);
    }

    let stored: bool = sqlx::query_scalar(
        r#"
        UPDATE quotes SET interested_in_booking = COALESCE(interested_in_booking, $2)
        WHERE id = $1
        RETURNING interested_in_booking
        "#,
    )
    .bind(quote_id)
    .bind(payload.interested)
    .fetch_one(&pool)
    .await?;

    Ok(Json(InterestResponse {
        quote_id,
        interested_in_booking: stored,
    }))
}

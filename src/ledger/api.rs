use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::extractor::AuthUser;

use super::{LedgerPage, LedgerStore};

#[derive(Debug, Serialize)]
pub struct BalanceResponse {
    pub company_id: Uuid,
    pub balance: i64,
    pub ledger_sum: i64,
    pub consistent: bool,
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    #[serde(default)]
    pub cursor: Option<i64>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// key: ledger-api -> balance projection with audit sum
pub async fn get_balance(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(company_id): Path<Uuid>,
) -> AppResult<Json<BalanceResponse>> {
    user.require_company(company_id)?;
    let ledger = LedgerStore::new(pool);
    let balance = ledger.current_balance(company_id).await?;
    let ledger_sum = ledger.ledger_sum(company_id).await?;
    if balance != ledger_sum {
        tracing::error!(%company_id, balance, ledger_sum, "balance projection drifted from ledger");
    }
    Ok(Json(BalanceResponse {
        company_id,
        balance,
        ledger_sum,
        consistent: balance == ledger_sum,
    }))
}

pub async fn list_entries(
    Extension(pool): Extension<PgPool>,
    user: AuthUser,
    Path(company_id): Path<Uuid>,
    Query(query): Query<LedgerQuery>,
) -> AppResult<Json<LedgerPage>> {
    user.require_company(company_id)?;
    let page = LedgerStore::new(pool)
        .entries_for(company_id, query.cursor, query.limit.unwrap_or(100))
        .await?;
    Ok(Json(page))
}

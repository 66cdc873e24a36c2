use sqlx::PgPool;

/// Most recently created active price, or `default_price` when none is configured.
pub async fn active_lead_price(pool: &PgPool, default_price: i64) -> Result<i64, sqlx::Error> {
    let price: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT price_per_lead
        FROM lead_pricing
        WHERE is_active = TRUE
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    Ok(price.unwrap_or(default_price))
}

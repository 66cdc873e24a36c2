use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

use super::models::{
    PartnerPlan, PipelineStage, Subscription, SubscriptionStatus, DEFAULT_PIPELINE_STAGES,
};

const SUBSCRIPTION_COLUMNS: &str = "id, company_id, status, stripe_subscription_id, \
    current_period_start, current_period_end, last_event_at, created_at, updated_at";

/// Everything a checkout or payment link tells us about an activation.
#[derive(Debug, Clone, Default)]
pub struct Activation {
    pub plan: Option<PartnerPlan>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub current_period_start: Option<DateTime<Utc>>,
    pub current_period_end: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub enum ActivationOutcome {
    Activated {
        subscription: Subscription,
        seeded_stages: usize,
    },
    /// The same processor subscription was already canceled.
    AlreadyCanceled,
    /// A newer event for this company already landed.
    Superseded,
    CompanyNotFound,
}

#[derive(Debug)]
pub enum SubscriptionChange {
    Updated(Subscription),
    /// A newer event already landed, or the subscription is canceled.
    Stale,
    Unknown,
}

#[derive(Debug, Default)]
pub struct Cancellation {
    pub subscription_company: Option<Uuid>,
    pub deactivated_company: Option<Uuid>,
}

impl Cancellation {
    pub fn matched_anything(&self) -> bool {
        self.subscription_company.is_some() || self.deactivated_company.is_some()
    }
}

/// key: billing-service -> subscription lifecycle and credit packs
#[derive(Clone)]
pub struct BillingService {
    pool: PgPool,
}

impl BillingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn activate_subscription(
        &self,
        company_id: Uuid,
        activation: &Activation,
        occurred_at: DateTime<Utc>,
    ) -> Result<ActivationOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM companies WHERE id = $1 FOR UPDATE")
                .bind(company_id)
                .fetch_optional(&mut tx)
                .await?;
        if exists.is_none() {
            return Ok(ActivationOutcome::CompanyNotFound);
        }

        let current: Option<(String, Option<String>, Option<DateTime<Utc>>)> = sqlx::query_as(
            "SELECT status, stripe_subscription_id, last_event_at FROM subscriptions \
             WHERE company_id = $1 FOR UPDATE",
        )
        .bind(company_id)
        .fetch_optional(&mut tx)
        .await?;

        let mut replaces_canceled = false;
        if let Some((status, current_id, last_event_at)) = &current {
            if status == SubscriptionStatus::Canceled.as_str() {
                // Canceled is terminal for that reference only. A checkout for
                // a different subscription, or a one-time plan, starts over.
                if activation.stripe_subscription_id.is_some()
                    && activation.stripe_subscription_id == *current_id
                {
                    return Ok(ActivationOutcome::AlreadyCanceled);
                }
                replaces_canceled = true;
            } else if last_event_at.map_or(false, |last| last > occurred_at) {
                return Ok(ActivationOutcome::Superseded);
            }
        }

        let subscription = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            INSERT INTO subscriptions (
                id, company_id, status, stripe_subscription_id,
                current_period_start, current_period_end, last_event_at
            ) VALUES ($1, $2, 'active', $3, $4, $5, $6)
            ON CONFLICT (company_id) DO UPDATE SET
                status = 'active',
                stripe_subscription_id = CASE
                    WHEN subscriptions.status = 'canceled' THEN EXCLUDED.stripe_subscription_id
                    ELSE COALESCE(EXCLUDED.stripe_subscription_id, subscriptions.stripe_subscription_id)
                END,
                current_period_start = COALESCE(EXCLUDED.current_period_start, subscriptions.current_period_start),
                current_period_end = COALESCE(EXCLUDED.current_period_end, subscriptions.current_period_end),
                last_event_at = GREATEST(subscriptions.last_event_at, EXCLUDED.last_event_at),
                updated_at = NOW()
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(activation.stripe_subscription_id.as_deref())
        .bind(activation.current_period_start)
        .bind(activation.current_period_end)
        .bind(occurred_at)
        .fetch_one(&mut tx)
        .await?;

        sqlx::query(
            r#"
            UPDATE companies SET
                is_active = TRUE,
                plan = COALESCE($2, plan),
                stripe_customer_id = COALESCE($3, stripe_customer_id),
                stripe_subscription_id = CASE WHEN $5::boolean THEN $4
                    ELSE COALESCE($4, stripe_subscription_id) END,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(company_id)
        .bind(activation.plan.map(|plan| plan.as_str()))
        .bind(activation.stripe_customer_id.as_deref())
        .bind(activation.stripe_subscription_id.as_deref())
        .bind(replaces_canceled)
        .execute(&mut tx)
        .await?;

        let seeded_stages = seed_pipeline_stages(&mut tx, company_id).await?;
        tx.commit().await?;

        info!(
            %company_id,
            subscription_id = %subscription.id,
            seeded_stages,
            "subscription activated"
        );
        Ok(ActivationOutcome::Activated {
            subscription,
            seeded_stages,
        })
    }

    /// Applies the processor's view of a subscription. Events older than the
    /// last applied one are ignored and canceled is never left.
    pub async fn update_subscription(
        &self,
        stripe_subscription_id: &str,
        status: SubscriptionStatus,
        period: (Option<DateTime<Utc>>, Option<DateTime<Utc>>),
        occurred_at: DateTime<Utc>,
    ) -> Result<SubscriptionChange, sqlx::Error> {
        let updated = sqlx::query_as::<_, Subscription>(&format!(
            r#"
            UPDATE subscriptions SET
                status = $2,
                current_period_start = COALESCE($3, current_period_start),
                current_period_end = COALESCE($4, current_period_end),
                last_event_at = $5,
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
              AND status <> 'canceled'
              AND (last_event_at IS NULL OR last_event_at <= $5)
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(stripe_subscription_id)
        .bind(status.as_str())
        .bind(period.0)
        .bind(period.1)
        .bind(occurred_at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(subscription) = updated {
            return Ok(SubscriptionChange::Updated(subscription));
        }

        let known: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM subscriptions WHERE stripe_subscription_id = $1)",
        )
        .bind(stripe_subscription_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(if known {
            SubscriptionChange::Stale
        } else {
            SubscriptionChange::Unknown
        })
    }

    /// Terminal. Also deactivates the company holding this subscription and
    /// drops it back to the trial plan.
    pub async fn cancel_subscription(
        &self,
        stripe_subscription_id: &str,
        occurred_at: DateTime<Utc>,
    ) -> Result<Cancellation, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let subscription_company: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE subscriptions SET
                status = 'canceled',
                last_event_at = GREATEST(last_event_at, $2),
                updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING company_id
            "#,
        )
        .bind(stripe_subscription_id)
        .bind(occurred_at)
        .fetch_optional(&mut tx)
        .await?;

        let deactivated_company: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE companies SET is_active = FALSE, plan = 'trial', updated_at = NOW()
            WHERE stripe_subscription_id = $1
            RETURNING id
            "#,
        )
        .bind(stripe_subscription_id)
        .fetch_optional(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(Cancellation {
            subscription_company,
            deactivated_company,
        })
    }

    /// Adds a purchased credit pack to the user's counter once per checkout
    /// session. Returns false when the session was already credited.
    pub async fn credit_quote_pack(
        &self,
        user_id: Uuid,
        quantity: i64,
        checkout_session_id: &str,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let recorded: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO quote_credit_purchases (checkout_session_id, user_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (checkout_session_id) DO NOTHING
            RETURNING checkout_session_id
            "#,
        )
        .bind(checkout_session_id)
        .bind(user_id)
        .bind(quantity)
        .fetch_optional(&mut tx)
        .await?;

        if recorded.is_none() {
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO quote_credit_balances (user_id, credits)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET
                credits = quote_credit_balances.credits + EXCLUDED.credits,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(quantity)
        .execute(&mut tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn quote_credits(&self, user_id: Uuid) -> Result<i64, sqlx::Error> {
        let credits: Option<i64> =
            sqlx::query_scalar("SELECT credits FROM quote_credit_balances WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(credits.unwrap_or(0))
    }

    /// Case-insensitive. Oldest company wins when an address is shared.
    pub async fn company_by_billing_email(&self, email: &str) -> Result<Option<Uuid>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT id FROM companies WHERE LOWER(email) = LOWER($1) ORDER BY created_at ASC LIMIT 1",
        )
        .bind(email.trim())
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn subscription_for(&self, company_id: Uuid) -> Result<Option<Subscription>, sqlx::Error> {
        sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE company_id = $1"
        ))
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn pipeline_stages(&self, company_id: Uuid) -> Result<Vec<PipelineStage>, sqlx::Error> {
        sqlx::query_as::<_, PipelineStage>(
            "SELECT id, company_id, name, position, color FROM pipeline_stages \
             WHERE company_id = $1 ORDER BY position ASC",
        )
        .bind(company_id)
        .fetch_all(&self.pool)
        .await
    }
}

async fn seed_pipeline_stages(
    tx: &mut Transaction<'_, Postgres>,
    company_id: Uuid,
) -> Result<usize, sqlx::Error> {
    let has_stages: bool =
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM pipeline_stages WHERE company_id = $1)")
            .bind(company_id)
            .fetch_one(&mut *tx)
            .await?;
    if has_stages {
        return Ok(0);
    }

    let mut seeded = 0;
    for (position, (name, color)) in DEFAULT_PIPELINE_STAGES.iter().enumerate() {
        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_stages (id, company_id, name, position, color)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (company_id, name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(company_id)
        .bind(*name)
        .bind(position as i32)
        .bind(*color)
        .execute(&mut *tx)
        .await?;
        seeded += result.rows_affected() as usize;
    }
    Ok(seeded)
}

//! Customer follow-up emails, driven by an external cron tick.

pub mod api;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config;
use crate::notifications::{Notification, NotificationDispatcher};

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FollowUpStage {
    First,
    Second,
}

impl FollowUpStage {
    fn stamp_column(&self) -> &'static str {
        match self {
            FollowUpStage::First => "email_1_sent_at",
            FollowUpStage::Second => "email_2_sent_at",
        }
    }

    /// Quotes the sweep for this stage may pick up. The stamp column doubles
    /// as the one-shot latch.
    fn candidate_filter(&self) -> &'static str {
        match self {
            FollowUpStage::First => "email_1_sent_at IS NULL",
            FollowUpStage::Second => "email_1_sent_at IS NOT NULL AND email_2_sent_at IS NULL",
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FollowUpPolicy {
    pub first_delay: Duration,
    pub second_delay: Duration,
    pub batch_size: i64,
}

impl FollowUpPolicy {
    pub fn from_config() -> Self {
        Self {
            first_delay: Duration::hours(*config::FOLLOW_UP_FIRST_DELAY_HOURS),
            second_delay: Duration::hours(*config::FOLLOW_UP_SECOND_DELAY_HOURS),
            batch_size: *config::FOLLOW_UP_BATCH_SIZE,
        }
    }

    fn delay(&self, stage: FollowUpStage) -> Duration {
        match stage {
            FollowUpStage::First => self.first_delay,
            FollowUpStage::Second => self.second_delay,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub sent: usize,
    pub errors: Vec<SweepFailure>,
}

#[derive(Debug, Serialize)]
pub struct SweepFailure {
    pub quote_id: Uuid,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct FollowUpReport {
    pub first: SweepReport,
    pub second: SweepReport,
}

#[derive(Debug, FromRow)]
struct Candidate {
    id: Uuid,
    customer_email: String,
    customer_name: Option<String>,
}

/// Runs both sweeps. The second runs first so a quote that is already past
/// both thresholds never gets both emails in one tick.
pub async fn run_sweeps(
    pool: &PgPool,
    dispatcher: &dyn NotificationDispatcher,
    policy: &FollowUpPolicy,
    now: DateTime<Utc>,
) -> Result<FollowUpReport, sqlx::Error> {
    let second = sweep(pool, dispatcher, policy, FollowUpStage::Second, now).await?;
    let first = sweep(pool, dispatcher, policy, FollowUpStage::First, now).await?;
    info!(
        first_candidates = first.candidates,
        first_sent = first.sent,
        second_candidates = second.candidates,
        second_sent = second.sent,
        "follow-up sweeps finished"
    );
    Ok(FollowUpReport { first, second })
}

async fn sweep(
    pool: &PgPool,
    dispatcher: &dyn NotificationDispatcher,
    policy: &FollowUpPolicy,
    stage: FollowUpStage,
    now: DateTime<Utc>,
) -> Result<SweepReport, sqlx::Error> {
    let cutoff = now - policy.delay(stage);
    let candidates = sqlx::query_as::<_, Candidate>(&format!(
        r#"
        SELECT id, customer_email, customer_name
        FROM quotes
        WHERE created_at <= $1
          AND interested_in_booking IS NULL
          AND customer_email IS NOT NULL
          AND {}
        ORDER BY follow_up_attempted_at ASC NULLS FIRST, created_at ASC
        LIMIT $2
        "#,
        stage.candidate_filter()
    ))
    .bind(cutoff)
    .bind(policy.batch_size)
    .fetch_all(pool)
    .await?;

    let mut report = SweepReport {
        candidates: candidates.len(),
        ..SweepReport::default()
    };

    for candidate in candidates {
        let notification = Notification::FollowUp {
            quote_id: candidate.id,
            stage,
            recipient: candidate.customer_email,
            customer_name: candidate.customer_name,
        };
        // Unstamped quotes are retried, behind quotes not yet tried.
        if let Err(err) = dispatcher.dispatch(notification).await {
            warn!(?err, quote_id = %candidate.id, ?stage, "follow-up send failed");
            if let Err(err) = record_attempt(pool, candidate.id, now).await {
                warn!(?err, quote_id = %candidate.id, "follow-up attempt not recorded");
            }
            report.errors.push(SweepFailure {
                quote_id: candidate.id,
                error: err.to_string(),
            });
            continue;
        }

        let stamped = sqlx::query(&format!(
            "UPDATE quotes SET {column} = $2, follow_up_attempted_at = NULL \
             WHERE id = $1 AND {column} IS NULL",
            column = stage.stamp_column()
        ))
        .bind(candidate.id)
        .bind(now)
        .execute(pool)
        .await;
        match stamped {
            Ok(_) => report.sent += 1,
            Err(err) => {
                warn!(?err, quote_id = %candidate.id, ?stage, "follow-up sent but not stamped");
                report.errors.push(SweepFailure {
                    quote_id: candidate.id,
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(report)
}

async fn record_attempt(pool: &PgPool, quote_id: Uuid, now: DateTime<Utc>) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE quotes SET follow_up_attempted_at = $2 WHERE id = $1")
        .bind(quote_id)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(())
}

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::coverage::{self, RoutingKey};
use crate::ledger::store::apply_in_tx;
use crate::ledger::{EntryType, LedgerError, NewLedgerEntry};
use crate::notifications::{dispatch_best_effort, LeadData, Notification, NotificationDispatcher};

use super::models::{
    Company, DistributionResult, DistributionStatus, FallbackReason, LeadPurchase, Quote,
    SkipReason, SkippedCompany,
};
use super::pricing;
use super::summary::{derive_summary, MoveSummary};

pub(crate) const QUOTE_COLUMNS: &str = "id, owner_id, category, customer_name, customer_email, \
    customer_phone, starting_address, ending_address, move_date, ai_analysis, \
    interested_in_booking, email_1_sent_at, email_2_sent_at, created_at";

pub(crate) const PURCHASE_COLUMNS: &str = "id, company_id, quote_id, amount_charged, \
    customer_name, customer_email, customer_phone, starting_address, ending_address, move_date, \
    estimate, volume_m3, van_count, movers, status, created_at";

#[derive(Debug, Error)]
pub enum DistributionError {
    #[error("quote {0} not found")]
    QuoteNotFound(Uuid),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

enum ChargeOutcome {
    Charged(LeadPurchase),
    AlreadyPurchased,
}

/// key: distribution-engine -> quote to charged companies
pub struct DistributionEngine {
    pool: PgPool,
    notifier: Arc<dyn NotificationDispatcher>,
    default_price: i64,
}

impl DistributionEngine {
    pub fn new(pool: PgPool, notifier: Arc<dyn NotificationDispatcher>, default_price: i64) -> Self {
        Self {
            pool,
            notifier,
            default_price,
        }
    }

    pub async fn distribute(&self, quote_id: Uuid) -> Result<DistributionResult, DistributionError> {
        let quote = sqlx::query_as::<_, Quote>(&format!(
            "SELECT {QUOTE_COLUMNS} FROM quotes WHERE id = $1"
        ))
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(DistributionError::QuoteNotFound(quote_id))?;

        let routing_key = coverage::routing_key(&quote.starting_address);
        if !routing_key.is_known() {
            let result = DistributionResult::fallback(
                quote_id,
                routing_key,
                None,
                Vec::new(),
                FallbackReason::UnknownRoutingKey,
            );
            self.report_fallback(&quote, &result);
            return Ok(result);
        }

        let price = pricing::active_lead_price(&self.pool, self.default_price).await?;
        let covering = covering_companies(&self.pool, &routing_key).await?;
        let purchased = purchasers_of(&self.pool, quote_id).await?;

        // Buyers of this quote are settled before the balance check, so a
        // re-run never mistakes a spent balance for an unfunded company.
        let mut skipped = Vec::new();
        let mut eligible = Vec::new();
        for company in covering {
            if purchased.contains(&company.id) {
                skipped.push(SkippedCompany {
                    company_id: company.id,
                    reason: SkipReason::AlreadyPurchased,
                });
            } else if company.balance >= price {
                eligible.push(company);
            } else {
                skipped.push(SkippedCompany {
                    company_id: company.id,
                    reason: SkipReason::InsufficientBalance,
                });
            }
        }

        if eligible.is_empty() && !purchased.is_empty() {
            info!(%quote_id, buyers = purchased.len(), "lead already distributed");
            return Ok(DistributionResult {
                quote_id,
                status: DistributionStatus::AlreadyDistributed,
                routing_key,
                price: Some(price),
                charged: Vec::new(),
                skipped,
                fallback_reason: None,
            });
        }

        if eligible.is_empty() {
            let result = DistributionResult::fallback(
                quote_id,
                routing_key,
                Some(price),
                skipped,
                FallbackReason::NoEligibleCompany,
            );
            self.report_fallback(&quote, &result);
            return Ok(result);
        }

        let summary = derive_summary(&quote.ai_analysis);
        let mut charged = Vec::new();
        for company in eligible {
            match self.charge(&quote, &company, price, &routing_key, &summary).await {
                Ok(ChargeOutcome::Charged(purchase)) => {
                    info!(
                        %quote_id,
                        company_id = %company.id,
                        purchase_id = %purchase.id,
                        price,
                        "lead charged"
                    );
                    charged.push(company.id);
                    self.notify_company(&quote, &company, price, &summary);
                }
                Ok(ChargeOutcome::AlreadyPurchased) => skipped.push(SkippedCompany {
                    company_id: company.id,
                    reason: SkipReason::AlreadyPurchased,
                }),
                Err(LedgerError::InsufficientBalance { balance, .. }) => {
                    warn!(
                        %quote_id,
                        company_id = %company.id,
                        balance,
                        price,
                        "balance fell below price before charge"
                    );
                    skipped.push(SkippedCompany {
                        company_id: company.id,
                        reason: SkipReason::InsufficientBalance,
                    });
                }
                Err(err) => {
                    error!(?err, %quote_id, company_id = %company.id, "lead charge failed");
                    skipped.push(SkippedCompany {
                        company_id: company.id,
                        reason: SkipReason::ChargeFailed,
                    });
                }
            }
        }

        let status = if !charged.is_empty() {
            DistributionStatus::Distributed
        } else if skipped
            .iter()
            .any(|skip| skip.reason == SkipReason::AlreadyPurchased)
        {
            DistributionStatus::AlreadyDistributed
        } else {
            let result = DistributionResult::fallback(
                quote_id,
                routing_key,
                Some(price),
                skipped,
                FallbackReason::NoCompanyCharged,
            );
            self.report_fallback(&quote, &result);
            return Ok(result);
        };

        Ok(DistributionResult {
            quote_id,
            status,
            routing_key,
            price: Some(price),
            charged,
            skipped,
            fallback_reason: None,
        })
    }

    /// Purchase row and debit commit together. The purchase insert is the
    /// (company, quote) latch: a second attempt finds it and never debits.
    async fn charge(
        &self,
        quote: &Quote,
        company: &Company,
        price: i64,
        routing_key: &RoutingKey,
        summary: &MoveSummary,
    ) -> Result<ChargeOutcome, LedgerError> {
        let mut tx = self.pool.begin().await?;

        let purchase = sqlx::query_as::<_, LeadPurchase>(&format!(
            r#"
            INSERT INTO lead_purchases (
                id, company_id, quote_id, amount_charged,
                customer_name, customer_email, customer_phone,
                starting_address, ending_address, move_date,
                estimate, volume_m3, van_count, movers, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, 'new')
            ON CONFLICT (company_id, quote_id) DO NOTHING
            RETURNING {PURCHASE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(company.id)
        .bind(quote.id)
        .bind(price)
        .bind(&quote.customer_name)
        .bind(&quote.customer_email)
        .bind(&quote.customer_phone)
        .bind(&quote.starting_address)
        .bind(&quote.ending_address)
        .bind(quote.move_date)
        .bind(summary.estimate)
        .bind(summary.volume_m3)
        .bind(summary.van_count)
        .bind(summary.movers)
        .fetch_optional(&mut tx)
        .await?;

        let Some(purchase) = purchase else {
            return Ok(ChargeOutcome::AlreadyPurchased);
        };

        let entry = NewLedgerEntry::new(
            company.id,
            -price,
            EntryType::LeadPurchase,
            format!("Lead purchase for quote {} ({routing_key})", quote.id),
        )
        .with_external_ref(format!("lead_purchase:{}:{}", quote.id, company.id));
        apply_in_tx(&mut tx, &entry).await?;

        tx.commit().await?;
        Ok(ChargeOutcome::Charged(purchase))
    }

    fn notify_company(&self, quote: &Quote, company: &Company, price: i64, summary: &MoveSummary) {
        let lead = LeadData {
            quote_id: quote.id,
            customer_name: quote.customer_name.clone(),
            customer_email: quote.customer_email.clone(),
            customer_phone: quote.customer_phone.clone(),
            starting_address: quote.starting_address.clone(),
            ending_address: quote.ending_address.clone(),
            move_date: quote.move_date,
            summary: summary.clone(),
            price_paid: price,
        };
        dispatch_best_effort(
            self.notifier.clone(),
            Notification::NewLead {
                company_id: company.id,
                category: quote.lead_category(),
                lead,
            },
        );
    }

    fn report_fallback(&self, quote: &Quote, result: &DistributionResult) {
        let reason = result
            .fallback_reason
            .map(|reason| reason.describe())
            .unwrap_or("unknown");
        warn!(
            quote_id = %quote.id,
            routing_key = %result.routing_key,
            reason,
            "lead not distributed; operator follow-up required"
        );
        dispatch_best_effort(
            self.notifier.clone(),
            Notification::OperatorAlert {
                subject: format!("Lead {} was not distributed", quote.id),
                body: format!(
                    "Quote: {}\nFrom: {}\nTo: {}\nRouting key: {}\nReason: {}",
                    quote.id,
                    quote.starting_address,
                    quote.ending_address,
                    result.routing_key,
                    reason
                ),
            },
        );
    }
}

async fn covering_companies(
    pool: &PgPool,
    routing_key: &RoutingKey,
) -> Result<Vec<Company>, sqlx::Error> {
    sqlx::query_as::<_, Company>(
        r#"
        SELECT id, name, email, is_active, coverage, balance, plan,
               stripe_customer_id, stripe_subscription_id
        FROM companies
        WHERE is_active = TRUE AND $1 = ANY(coverage)
        ORDER BY created_at ASC
        "#,
    )
    .bind(routing_key.as_str())
    .fetch_all(pool)
    .await
}

async fn purchasers_of(pool: &PgPool, quote_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar("SELECT company_id FROM lead_purchases WHERE quote_id = $1")
        .bind(quote_id)
        .fetch_all(pool)
        .await
}

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{EntryType, LedgerError, LedgerStore, NewLedgerEntry};
use crate::notifications::{dispatch_best_effort, Notification, NotificationDispatcher};

use super::adapters::PaymentProvider;
use super::events::{
    resolve_plan, CheckoutPurpose, CheckoutSession, PaymentEvent, StripeEvent, StripeSubscription,
};
use super::models::{PartnerPlan, SubscriptionStatus};
use super::service::{Activation, ActivationOutcome, BillingService, SubscriptionChange};
use super::signature::{verify_signature, SignatureError};

#[derive(Debug, Error)]
pub enum ReconciliationError {
    #[error(transparent)]
    InvalidSignature(#[from] SignatureError),
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("event missing {0}")]
    MissingField(&'static str),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Result of one delivery. Every variant is acknowledged with a 2xx.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconciliationOutcome {
    Applied { action: &'static str },
    AlreadyApplied { action: &'static str },
    /// A newer event or a cancellation already decided this state.
    Stale { action: &'static str },
    ManualIntervention { reason: String },
    Ignored { reason: String },
}

/// key: billing-reconciliation -> webhook state machine
#[derive(Clone)]
pub struct Reconciler {
    ledger: LedgerStore,
    billing: BillingService,
    provider: Arc<dyn PaymentProvider>,
    notifier: Arc<dyn NotificationDispatcher>,
    secret: String,
    tolerance_secs: i64,
}

impl Reconciler {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn PaymentProvider>,
        notifier: Arc<dyn NotificationDispatcher>,
        secret: impl Into<String>,
        tolerance_secs: i64,
    ) -> Self {
        Self {
            ledger: LedgerStore::new(pool.clone()),
            billing: BillingService::new(pool),
            provider,
            notifier,
            secret: secret.into(),
            tolerance_secs,
        }
    }

    /// Verify, then parse, then apply. Nothing is read from the body until the
    /// signature checks out.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature: Option<&str>,
        now: i64,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        verify_signature(payload, signature, &self.secret, self.tolerance_secs, now)?;

        let event: StripeEvent = serde_json::from_slice(payload)?;
        let event_id = event.id.clone();
        let event_type = event.event_type.clone();
        let occurred_at = event.occurred_at();

        let outcome = match event.parse()? {
            PaymentEvent::CheckoutCompleted(session) => {
                self.checkout_completed(session, occurred_at).await?
            }
            PaymentEvent::SubscriptionUpdated(subscription) => {
                self.subscription_updated(subscription, occurred_at).await?
            }
            PaymentEvent::SubscriptionDeleted(subscription) => {
                self.subscription_deleted(subscription, occurred_at).await?
            }
            PaymentEvent::Unhandled(kind) => ReconciliationOutcome::Ignored {
                reason: format!("unhandled event type {kind}"),
            },
        };

        if let ReconciliationOutcome::ManualIntervention { reason } = &outcome {
            self.alert_operator(&event_id, &event_type, reason);
        }
        info!(%event_id, %event_type, ?outcome, "webhook reconciled");
        Ok(outcome)
    }

    async fn checkout_completed(
        &self,
        session: CheckoutSession,
        occurred_at: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        if session.is_unpaid() {
            return Ok(ReconciliationOutcome::Ignored {
                reason: format!("checkout {} not paid yet", session.id),
            });
        }

        match session
            .purpose()
            .map_err(ReconciliationError::MissingField)?
        {
            CheckoutPurpose::BalanceTopUp { company_id, amount } => {
                self.credit_top_up(&session, company_id, amount).await
            }
            CheckoutPurpose::QuoteCredits { user_id, quantity } => {
                let applied = self
                    .billing
                    .credit_quote_pack(user_id, quantity, &session.id)
                    .await?;
                Ok(if applied {
                    info!(%user_id, quantity, session = %session.id, "quote credits added");
                    ReconciliationOutcome::Applied {
                        action: "quote_credits",
                    }
                } else {
                    ReconciliationOutcome::AlreadyApplied {
                        action: "quote_credits",
                    }
                })
            }
            CheckoutPurpose::Subscription { company_id, plan } => {
                let activation = self.activation_for(&session, plan).await;
                self.activate(company_id, &activation, occurred_at).await
            }
            CheckoutPurpose::PaymentLink => self.payment_link(&session, occurred_at).await,
            CheckoutPurpose::Unrecognized(kind) => Ok(ReconciliationOutcome::Ignored {
                reason: format!("unrecognized checkout type {kind}"),
            }),
        }
    }

    async fn credit_top_up(
        &self,
        session: &CheckoutSession,
        company_id: Uuid,
        amount: i64,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let entry = NewLedgerEntry::new(
            company_id,
            amount,
            EntryType::TopUp,
            format!("Balance top-up via checkout {}", session.id),
        )
        .with_external_ref(session.id.clone());

        match self.ledger.apply(&entry).await {
            Ok(outcome) if outcome.was_applied() => Ok(ReconciliationOutcome::Applied {
                action: "balance_top_up",
            }),
            Ok(_) => Ok(ReconciliationOutcome::AlreadyApplied {
                action: "balance_top_up",
            }),
            Err(LedgerError::CompanyNotFound(_)) => Ok(ReconciliationOutcome::ManualIntervention {
                reason: format!(
                    "top-up of {amount} for unknown company {company_id} (checkout {})",
                    session.id
                ),
            }),
            Err(err) => Err(err.into()),
        }
    }

    async fn payment_link(
        &self,
        session: &CheckoutSession,
        occurred_at: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let embedded = session
            .line_items
            .as_ref()
            .map(|list| list.data.clone())
            .unwrap_or_default();
        let items = if embedded.is_empty() {
            match self.provider.list_line_items(&session.id).await {
                Ok(items) => items,
                Err(err) => {
                    warn!(?err, session = %session.id, "line item lookup failed");
                    Vec::new()
                }
            }
        } else {
            embedded
        };

        let Some(plan) = resolve_plan(&items) else {
            return Ok(ReconciliationOutcome::ManualIntervention {
                reason: format!("payment link {} bought no recognizable plan", session.id),
            });
        };
        let Some(email) = session.billing_email() else {
            return Ok(ReconciliationOutcome::ManualIntervention {
                reason: format!("payment link {} has no billing email", session.id),
            });
        };
        let Some(company_id) = self.billing.company_by_billing_email(email).await? else {
            return Ok(ReconciliationOutcome::ManualIntervention {
                reason: format!(
                    "no company matches billing email {email} for {} plan (checkout {})",
                    plan.as_str(),
                    session.id
                ),
            });
        };

        let activation = self.activation_for(session, plan).await;
        self.activate(company_id, &activation, occurred_at).await
    }

    async fn activation_for(&self, session: &CheckoutSession, plan: PartnerPlan) -> Activation {
        let mut activation = Activation {
            plan: Some(plan),
            stripe_customer_id: session.customer.clone(),
            stripe_subscription_id: session.subscription.clone(),
            ..Activation::default()
        };
        if let Some(subscription_id) = &session.subscription {
            match self.provider.retrieve_subscription(subscription_id).await {
                Ok(subscription) => {
                    let (start, end) = subscription.period();
                    activation.current_period_start = start;
                    activation.current_period_end = end;
                }
                Err(err) => warn!(?err, %subscription_id, "subscription lookup failed"),
            }
        }
        activation
    }

    async fn activate(
        &self,
        company_id: Uuid,
        activation: &Activation,
        occurred_at: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let outcome = self
            .billing
            .activate_subscription(company_id, activation, occurred_at)
            .await?;
        Ok(match outcome {
            ActivationOutcome::Activated { .. } => ReconciliationOutcome::Applied {
                action: "subscription_activated",
            },
            ActivationOutcome::AlreadyCanceled | ActivationOutcome::Superseded => {
                ReconciliationOutcome::Stale {
                    action: "subscription_activated",
                }
            }
            ActivationOutcome::CompanyNotFound => ReconciliationOutcome::ManualIntervention {
                reason: format!("subscription checkout for unknown company {company_id}"),
            },
        })
    }

    async fn subscription_updated(
        &self,
        subscription: StripeSubscription,
        occurred_at: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let status = SubscriptionStatus::from_provider(&subscription.status);
        let change = self
            .billing
            .update_subscription(&subscription.id, status, subscription.period(), occurred_at)
            .await?;
        Ok(match change {
            SubscriptionChange::Updated(_) => ReconciliationOutcome::Applied {
                action: "subscription_updated",
            },
            SubscriptionChange::Stale => ReconciliationOutcome::Stale {
                action: "subscription_updated",
            },
            SubscriptionChange::Unknown => ReconciliationOutcome::Ignored {
                reason: format!("unknown subscription {}", subscription.id),
            },
        })
    }

    async fn subscription_deleted(
        &self,
        subscription: StripeSubscription,
        occurred_at: DateTime<Utc>,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let cancellation = self
            .billing
            .cancel_subscription(&subscription.id, occurred_at)
            .await?;
        if let Some(company_id) = cancellation.deactivated_company {
            info!(%company_id, subscription = %subscription.id, "company deactivated");
        }
        Ok(if cancellation.matched_anything() {
            ReconciliationOutcome::Applied {
                action: "subscription_canceled",
            }
        } else {
            ReconciliationOutcome::Ignored {
                reason: format!("unknown subscription {}", subscription.id),
            }
        })
    }

    fn alert_operator(&self, event_id: &str, event_type: &str, reason: &str) {
        warn!(%event_id, %event_type, reason, "webhook needs manual intervention");
        dispatch_best_effort(
            self.notifier.clone(),
            Notification::OperatorAlert {
                subject: format!("Payment event {event_id} needs attention"),
                body: format!("Event: {event_id} ({event_type})\nReason: {reason}"),
            },
        );
    }
}

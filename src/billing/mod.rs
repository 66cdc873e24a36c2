pub mod adapters;
pub mod api;
pub mod events;
pub mod models;
pub mod reconciliation;
pub mod service;
pub mod signature;

pub use adapters::{OfflineProvider, PaymentProvider, StripeClient};
pub use api::stripe_webhook;
pub use events::{resolve_plan, CheckoutPurpose, PaymentEvent, StripeEvent};
pub use models::{PartnerPlan, PipelineStage, Subscription, SubscriptionStatus};
pub use reconciliation::{ReconciliationError, ReconciliationOutcome, Reconciler};
pub use service::{Activation, ActivationOutcome, BillingService, Cancellation, SubscriptionChange};
pub use signature::{sign_payload, verify_signature, SignatureError};

//! Fan-out lead distribution: every active company covering the quote's
//! routing key with enough balance is charged and receives the lead.

pub mod api;
pub mod engine;
pub mod models;
pub mod pricing;
pub mod summary;

pub use engine::{DistributionEngine, DistributionError};
pub use models::{
    Company, DistributionResult, DistributionStatus, FallbackReason, LeadCategory, LeadPurchase,
    PurchaseStatus, Quote, SkipReason, SkippedCompany,
};
pub use summary::{derive_summary, MoveSummary};

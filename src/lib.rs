pub mod billing;
pub mod config;
pub mod coverage;
pub mod distribution;
pub mod error;
pub mod extractor;
pub mod followups;
pub mod ledger;
pub mod notifications;
pub mod routes;

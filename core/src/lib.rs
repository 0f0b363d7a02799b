//! Audit prioritization core.
//!
//! Turns precomputed fraud-risk scores and feature attributions into an
//! auditor's priority queue and per-case explanations.
//!
//! Flow: `repository` (load once) → `tier::classify` → `queue::build`
//! (per filter change) → selection → `explain::explain`.

pub mod config;
pub mod error;
pub mod explain;
pub mod export;
pub mod queue;
pub mod repository;
pub mod rng;
pub mod session;
pub mod store;
pub mod synth;
pub mod tier;
pub mod types;

pub use error::{AuditError, AuditResult};
pub use tier::{classify, RiskTier};

#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/harvest/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Resumable bulk fetching of financial statements.
//!
//! This crate ties the pieces together: it re-exports the core types, the
//! persistence sinks, and (with the `fmp` feature) the Financial Modeling
//! Prep client, and provides the [`Orchestrator`] that drives a run.
//!
//! # Features
//!
//! - `fmp` - Financial Modeling Prep client and universe enumeration
//! - `sqlite` - SQLite persistence sink

// Core types and traits
pub use harvest_core::*;

// Sinks
#[cfg(feature = "sqlite")]
pub use harvest_store::SqliteSink;
pub use harvest_store::{FsSink, InMemorySink, RecoveryReport, snapshot};

// Providers
#[cfg(feature = "fmp")]
pub use harvest_fmp::{
    FmpClient, ListingFilter, RateBudget, RawResponse, ReqwestTransport, Transport,
    country_exchanges, exchange_summary,
};

/// Bulk fetch orchestration.
pub mod orchestrator;
pub use orchestrator::{FailedUnit, Orchestrator, RunSummary, ShutdownHandle};

/// Work planning.
pub mod plan;
pub use plan::{DEFAULT_LIMIT, WorkPlan, interleave_by_country, symbols};

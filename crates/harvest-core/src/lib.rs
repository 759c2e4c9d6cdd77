#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/harvest/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Core traits and types for resumable bulk fetching.
//!
//! This crate provides the foundational abstractions shared by the client,
//! the sinks, and the orchestrator:
//!
//! - [`StatementProvider`](provider::StatementProvider) - Fetches one work unit
//! - [`UniverseProvider`](provider::UniverseProvider) - Enumerates companies
//! - [`PersistenceSink`](sink::PersistenceSink) - Durable payload storage
//! - [`FetchConfig`](config::FetchConfig) - Run configuration

/// Run configuration and backoff policy.
pub mod config;
/// Error types for fetch operations.
pub mod error;
/// Reporting period definitions.
pub mod period;
/// Provider traits for fetching remote data.
pub mod provider;
/// Persistence trait for fetched payloads.
pub mod sink;
/// Core data types (Symbol, WorkUnit, Payload, etc.).
pub mod types;

// Re-export commonly used items at crate root
pub use config::{BackoffPolicy, FetchConfig};
pub use error::{ErrorClass, FetchError, Result};
pub use period::Period;
pub use provider::{Fetched, StatementProvider, UniverseProvider};
pub use sink::PersistenceSink;
pub use types::{
    CompletionRecord, ExchangeSummary, FetchResult, Listing, Payload, PayloadFormat,
    ResourceType, Symbol, UnitState, WorkUnit,
};

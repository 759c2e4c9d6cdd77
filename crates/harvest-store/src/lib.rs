#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/harvest/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Persistence sinks for fetched payloads.
//!
//! This crate provides implementations of the [`PersistenceSink`] trait from `harvest-core`:
//!
//! - [`FsSink`] - Directory of payload files plus completion markers (default)
//! - [`InMemorySink`] - Simple in-memory sink for testing
//! - [`SqliteSink`] - Single-file SQLite sink (requires `sqlite` feature)
//!
//! The [`snapshot`] module saves and reloads the company directory that
//! drives a bulk run.

/// Payload encoding (JSON, CSV, Parquet).
pub mod format;
/// Filesystem sink implementation.
pub mod fs;
/// In-memory sink implementation.
pub mod memory;
/// Company directory snapshots.
pub mod snapshot;

/// SQLite-based sink implementation.
#[cfg(feature = "sqlite")]
pub mod sqlite;

// Re-export the trait for convenience
pub use harvest_core::PersistenceSink;

// Re-export implementations
pub use fs::{FsSink, RecoveryReport};
pub use memory::InMemorySink;
pub use snapshot::{
    companies_file_name, load_exchange_summary, load_listings, save_exchange_summary,
    save_listings,
};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteSink;

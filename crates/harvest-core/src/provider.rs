//! Provider traits for fetching remote data.
//!
//! This module defines the core provider traits:
//!
//! - [`StatementProvider`] - Fetches one work unit per call
//! - [`UniverseProvider`] - Enumerates the companies to cover

use async_trait::async_trait;
use std::fmt::Debug;

use crate::{
    error::Result,
    types::{Listing, Payload, WorkUnit},
};

/// Classified outcome of a single successful round trip.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Fetched {
    /// The source returned records.
    Payload(Payload),
    /// The source has nothing for this unit (404 or empty result set).
    Absent(String),
}

/// Provider that performs one logical fetch for a work unit.
///
/// Implementations are stateless with respect to storage: they never write
/// anything, so they can be exercised against a fake transport.
#[async_trait]
pub trait StatementProvider: Send + Sync + Debug {
    /// Returns the name of this provider (e.g., "FMP").
    fn name(&self) -> &str;

    /// Performs one attempt for `unit`.
    ///
    /// Transport and status problems come back as errors whose
    /// [`class`](crate::FetchError::class) drives the retry policy.
    async fn fetch(&self, unit: &WorkUnit) -> Result<Fetched>;

    /// Issues a cheap request that proves credentials and connectivity.
    async fn probe(&self) -> Result<()>;
}

/// Provider for the company directory used to enumerate work.
#[async_trait]
pub trait UniverseProvider: Send + Sync + Debug {
    /// Fetches every listing known to the provider.
    async fn listings(&self) -> Result<Vec<Listing>>;

    /// Fetches the country codes the provider covers.
    async fn countries(&self) -> Result<Vec<String>>;
}

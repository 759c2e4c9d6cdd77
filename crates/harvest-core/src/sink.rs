//! Persistence trait for fetched payloads.
//!
//! This module defines the [`PersistenceSink`] trait that provides idempotent,
//! crash-safe storage of payloads and their completion markers.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::{
    error::Result,
    types::{CompletionRecord, Payload, PayloadFormat, WorkUnit},
};

/// Trait for storing fetched payloads keyed by work unit identity.
///
/// Callers must invoke [`write`](Self::write) and only after it returns `Ok`
/// call [`mark_complete`](Self::mark_complete). A completion marker therefore
/// never exists without its payload, even if the process dies in between.
#[async_trait]
pub trait PersistenceSink: Send + Sync {
    /// Encoding this sink stores payloads in.
    fn format(&self) -> PayloadFormat;

    /// Returns true iff a valid completion record exists for `unit`.
    async fn exists(&self, unit: &WorkUnit) -> Result<bool>;

    /// Durably stores the payload for `unit`, replacing any partial leftovers.
    ///
    /// Returns the number of bytes stored, which goes into the completion
    /// record.
    async fn write(&self, unit: &WorkUnit, payload: &Payload) -> Result<u64>;

    /// Records that `unit` was fully persisted.
    async fn mark_complete(&self, unit: &WorkUnit, record: &CompletionRecord) -> Result<()>;

    /// Returns the keys of every completed unit.
    async fn completed_keys(&self) -> Result<HashSet<String>>;

    /// Number of completed units.
    ///
    /// Defaults to counting [`completed_keys`](Self::completed_keys); sinks
    /// that can count without collecting should override it.
    async fn completed_count(&self) -> Result<usize> {
        Ok(self.completed_keys().await?.len())
    }
}

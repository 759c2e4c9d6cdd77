//! In-memory sink implementation.

use async_trait::async_trait;
use harvest_core::{
    CompletionRecord, FetchError, Payload, PayloadFormat, PersistenceSink, Result, WorkUnit,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::{debug, instrument};

use crate::format;

/// Simple in-memory sink for testing and development.
///
/// Payloads and records are stored in `RwLock`-protected `HashMap`s and are
/// lost when the sink is dropped. Every successful [`write`](PersistenceSink::write)
/// is counted so tests can assert that a resumed run wrote nothing.
#[derive(Debug, Default)]
pub struct InMemorySink {
    format: PayloadFormat,
    payloads: RwLock<HashMap<String, Vec<u8>>>,
    records: RwLock<HashMap<String, CompletionRecord>>,
    writes: AtomicUsize,
}

impl InMemorySink {
    /// Create a new empty sink storing raw JSON.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty sink storing payloads in `format`.
    #[must_use]
    pub fn with_format(format: PayloadFormat) -> Self {
        Self {
            format,
            ..Default::default()
        }
    }

    /// Number of payload writes performed so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Stored payload bytes for `unit`, whether or not it is complete.
    pub async fn payload(&self, unit: &WorkUnit) -> Option<Vec<u8>> {
        self.payloads.read().await.get(&unit.key()).cloned()
    }

    /// Completion record for `unit`, if any.
    pub async fn record(&self, unit: &WorkUnit) -> Option<CompletionRecord> {
        self.records.read().await.get(&unit.key()).cloned()
    }

    /// Number of stored payloads, complete or not.
    pub async fn payload_count(&self) -> usize {
        self.payloads.read().await.len()
    }
}

#[async_trait]
impl PersistenceSink for InMemorySink {
    fn format(&self) -> PayloadFormat {
        self.format
    }

    async fn exists(&self, unit: &WorkUnit) -> Result<bool> {
        let key = unit.key();
        let records = self.records.read().await;
        let payloads = self.payloads.read().await;
        Ok(match (records.get(&key), payloads.get(&key)) {
            (Some(record), Some(body)) => record.bytes == body.len() as u64,
            _ => false,
        })
    }

    #[instrument(skip(self, payload), fields(unit = %unit))]
    async fn write(&self, unit: &WorkUnit, payload: &Payload) -> Result<u64> {
        let bytes = format::encode(payload, self.format)?;
        let len = bytes.len() as u64;
        self.payloads.write().await.insert(unit.key(), bytes);
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(bytes = len, "Stored payload");
        Ok(len)
    }

    async fn mark_complete(&self, unit: &WorkUnit, record: &CompletionRecord) -> Result<()> {
        let key = unit.key();
        if !self.payloads.read().await.contains_key(&key) {
            return Err(FetchError::Storage(format!("no payload stored for {key}")));
        }
        self.records
            .write()
            .await
            .entry(key)
            .or_insert_with(|| record.clone());
        Ok(())
    }

    async fn completed_keys(&self) -> Result<HashSet<String>> {
        Ok(self.records.read().await.keys().cloned().collect())
    }

    async fn completed_count(&self) -> Result<usize> {
        Ok(self.records.read().await.len())
    }
}

//! Bulk fetch orchestration.
//!
//! The [`Orchestrator`] drives a lazily consumed sequence of [`WorkUnit`]s
//! through a bounded pool of concurrent tasks. Each unit is checked against
//! the sink, fetched through the provider (which owns rate limiting), retried
//! on transient failures, and persisted before being marked complete.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use futures::future;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use harvest_core::{
    CompletionRecord, ErrorClass, FetchConfig, FetchError, FetchResult, Fetched, Payload,
    PersistenceSink, Result, StatementProvider, UnitState, WorkUnit,
};

/// Signals a running [`Orchestrator`] to stop dispatching units.
#[derive(Clone, Debug)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A unit that ended in [`UnitState::Failed`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailedUnit {
    /// Unit key.
    pub key: String,
    /// Final error message.
    pub error: String,
    /// Attempts made, including the first.
    pub attempts: u32,
}

/// Outcome counts of one run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Units fetched and persisted by this run.
    pub completed: usize,
    /// Units already complete before this run, or repeated within it.
    pub skipped: usize,
    /// Units the source has no data for.
    pub not_available: usize,
    /// Units that exhausted retries or hit a permanent error.
    pub failed: usize,
    /// Units drawn from the source but never attempted, or abandoned while
    /// waiting to retry, because the run was stopped.
    ///
    /// Units the source still held when the run stopped were never drawn
    /// and are not counted anywhere.
    pub pending: usize,
    /// Details of every failed unit.
    pub failures: Vec<FailedUnit>,
    /// Whether the run was cancelled.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Total units drawn from the source.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.completed + self.skipped + self.not_available + self.failed + self.pending
    }

    /// Units that reached a terminal state.
    #[must_use]
    pub const fn terminal(&self) -> usize {
        self.total() - self.pending
    }

    /// True if the run was not cancelled and every drawn unit reached a
    /// non-failed terminal state.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failed == 0 && self.pending == 0 && !self.cancelled
    }

    fn record(&mut self, report: UnitReport) {
        match report.state {
            UnitState::Completed => self.completed += 1,
            UnitState::Skipped => self.skipped += 1,
            UnitState::NotAvailable => self.not_available += 1,
            UnitState::Pending | UnitState::InFlight => self.pending += 1,
            UnitState::Failed => {
                self.failed += 1;
                if let Some(FetchResult::Failed { error, attempts }) = report.result {
                    self.failures.push(FailedUnit {
                        key: report.unit.key(),
                        error: error.to_string(),
                        attempts,
                    });
                }
            }
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} units in {:.1}s: {} completed, {} skipped, {} not available, {} failed, {} pending",
            self.total(),
            self.elapsed.as_secs_f64(),
            self.completed,
            self.skipped,
            self.not_available,
            self.failed,
            self.pending
        )?;
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// Terminal state of one unit, with the result that led to it.
struct UnitReport {
    unit: WorkUnit,
    state: UnitState,
    result: Option<FetchResult>,
}

impl UnitReport {
    const fn new(unit: WorkUnit, state: UnitState) -> Self {
        Self {
            unit,
            state,
            result: None,
        }
    }

    fn from_result(unit: WorkUnit, result: FetchResult) -> Self {
        let state = match &result {
            FetchResult::Success { .. } => UnitState::Completed,
            FetchResult::NotAvailable { .. } => UnitState::NotAvailable,
            FetchResult::Failed { .. } => UnitState::Failed,
        };
        Self {
            unit,
            state,
            result: Some(result),
        }
    }
}

/// Per-run stop conditions and the keys already dispatched.
struct Stop {
    shutdown: watch::Receiver<bool>,
    halted: AtomicBool,
    seen: Mutex<HashSet<String>>,
}

impl Stop {
    fn new(shutdown: watch::Receiver<bool>) -> Self {
        Self {
            shutdown,
            halted: AtomicBool::new(false),
            seen: Mutex::new(HashSet::new()),
        }
    }

    /// Claims `unit` for this run. False if its key was claimed before.
    fn claim(&self, unit: &WorkUnit) -> bool {
        let mut seen = self
            .seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        seen.insert(unit.key())
    }

    fn is_set(&self) -> bool {
        *self.shutdown.borrow() || self.halted.load(Ordering::SeqCst)
    }

    /// Resolves once cancellation is requested.
    async fn cancelled(&self) {
        let mut rx = self.shutdown.clone();
        let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// Drives work units from a provider into a sink.
pub struct Orchestrator {
    provider: Arc<dyn StatementProvider>,
    sink: Arc<dyn PersistenceSink>,
    config: FetchConfig,
    shutdown: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("provider", &self.provider.name())
            .field("format", &self.sink.format())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Orchestrator {
    /// Creates an orchestrator over `provider` and `sink`.
    #[must_use]
    pub fn new(
        provider: Arc<dyn StatementProvider>,
        sink: Arc<dyn PersistenceSink>,
        config: FetchConfig,
    ) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            provider,
            sink,
            config,
            shutdown: Arc::new(tx),
        }
    }

    /// Creates an orchestrator fetching from Financial Modeling Prep into a
    /// filesystem sink under `config.output_root`.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid, the HTTP client
    /// cannot be built, or the output directory cannot be prepared.
    #[cfg(feature = "fmp")]
    pub async fn fmp(api_key: impl Into<String>, config: FetchConfig) -> Result<Self> {
        config.validate()?;
        let client = harvest_fmp::FmpClient::new(api_key, &config)?;
        let sink = harvest_store::FsSink::open(&config.output_root, config.format).await?;
        Ok(Self::new(Arc::new(client), Arc::new(sink), config))
    }

    /// The run configuration.
    #[must_use]
    pub const fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Handle for cancelling runs of this orchestrator.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown),
        }
    }

    /// Drives every unit of `units` to a terminal state.
    ///
    /// Units are pulled from the iterator only as pool slots free up, so
    /// `units` may be unbounded. Once cancelled (or halted by a fatal error)
    /// nothing more is drawn; in-flight units finish and the summary is
    /// returned normally. A unit whose key repeats an earlier one is
    /// skipped, so each unit is attempted at most once per run.
    ///
    /// # Errors
    /// Returns [`FetchError::InvalidParameter`] for a bad configuration,
    /// [`FetchError::Fatal`] (or the underlying fatal error) if the probe
    /// fails, and the first fatal unit error if one stops the run midway.
    /// Units completed before a fatal error stay persisted.
    pub async fn run<I>(&self, units: I) -> Result<RunSummary>
    where
        I: IntoIterator<Item = WorkUnit>,
        I::IntoIter: Send,
    {
        self.config.validate()?;
        let started = Instant::now();

        let already = self.sink.completed_count().await?;
        info!(
            provider = self.provider.name(),
            already_completed = already,
            concurrency = self.config.concurrency,
            "Starting bulk fetch"
        );

        self.probe().await?;

        let stop = Stop::new(self.shutdown.subscribe());
        let mut fatal: Option<FetchError> = None;
        let mut summary = RunSummary::default();

        let mut reports = std::pin::pin!(
            stream::iter(units)
                .take_while(|_| future::ready(!stop.is_set()))
                .map(|unit| self.process(unit, &stop))
                .buffer_unordered(self.config.concurrency)
        );

        while let Some(report) = reports.next().await {
            let terminal = report.state.is_terminal();
            match report.result {
                Some(FetchResult::Failed { error, .. }) if error.is_fatal() => {
                    stop.halted.store(true, Ordering::SeqCst);
                    warn!(unit = %report.unit, %error, "Fatal error, stopping dispatch");
                    summary.failed += 1;
                    fatal.get_or_insert(error);
                }
                _ => summary.record(report),
            }

            let every = self.config.progress_every;
            if terminal && every > 0 && summary.terminal() % every == 0 {
                info!(
                    terminal = summary.terminal(),
                    completed = summary.completed,
                    skipped = summary.skipped,
                    not_available = summary.not_available,
                    failed = summary.failed,
                    "Progress"
                );
            }
        }

        summary.cancelled = *stop.shutdown.borrow();
        summary.elapsed = started.elapsed();

        if let Some(error) = fatal {
            warn!(%summary, "Run aborted");
            return Err(error);
        }
        info!(%summary, "Bulk fetch finished");
        Ok(summary)
    }

    /// Verify the source before dispatching anything.
    async fn probe(&self) -> Result<()> {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.provider.probe().await {
                Ok(()) => {
                    debug!(provider = self.provider.name(), "Probe succeeded");
                    return Ok(());
                }
                Err(e) => e,
            };
            if error.is_fatal() {
                return Err(error);
            }
            if !error.is_retryable() || attempt >= max_attempts {
                return Err(FetchError::Fatal(format!(
                    "probe of {} failed after {attempt} attempts: {error}",
                    self.provider.name()
                )));
            }
            let delay = self.config.backoff.delay(attempt, error.retry_after());
            warn!(attempt, ?delay, %error, "Probe failed, retrying");
            tokio::time::sleep(delay).await;
        }
    }

    async fn process(&self, unit: WorkUnit, stop: &Stop) -> UnitReport {
        if stop.is_set() {
            return UnitReport::new(unit, UnitState::Pending);
        }
        if !stop.claim(&unit) {
            debug!(unit = %unit, "Repeated in this run, skipping");
            return UnitReport::new(unit, UnitState::Skipped);
        }

        match self.sink.exists(&unit).await {
            Ok(true) => {
                debug!(unit = %unit, "Already complete, skipping");
                return UnitReport::new(unit, UnitState::Skipped);
            }
            Ok(false) => {}
            Err(error) => warn!(unit = %unit, %error, "Completion check failed, fetching anyway"),
        }

        debug!(unit = %unit, state = ?UnitState::InFlight, "Dispatching");
        match self.drive(&unit, stop).await {
            Some(result) => {
                match &result {
                    FetchResult::Success { payload, retrieved_at } => {
                        debug!(unit = %unit, records = payload.records(), %retrieved_at, "Completed");
                    }
                    FetchResult::NotAvailable { reason } => {
                        debug!(unit = %unit, %reason, "Not available");
                    }
                    FetchResult::Failed { error, attempts } => {
                        warn!(unit = %unit, %error, attempts, "Failed");
                    }
                }
                UnitReport::from_result(unit, result)
            }
            None => UnitReport::new(unit, UnitState::Pending),
        }
    }

    /// Attempt `unit` until it reaches a terminal result, or `None` if the
    /// run was stopped while waiting to retry.
    async fn drive(&self, unit: &WorkUnit, stop: &Stop) -> Option<FetchResult> {
        let max_attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.attempt(unit).await {
                Ok(result) => return Some(result),
                Err(e) => e,
            };

            match error.class() {
                ErrorClass::Absent => {
                    return Some(FetchResult::NotAvailable {
                        reason: error.to_string(),
                    });
                }
                ErrorClass::Transient if attempt < max_attempts => {
                    let delay = self.config.backoff.delay(attempt, error.retry_after());
                    debug!(unit = %unit, attempt, ?delay, %error, "Retrying");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = stop.cancelled() => return None,
                    }
                    if stop.is_set() {
                        return None;
                    }
                }
                _ => {
                    return Some(FetchResult::Failed {
                        error,
                        attempts: attempt,
                    });
                }
            }
        }
    }

    /// One fetch, persisting the payload on success.
    async fn attempt(&self, unit: &WorkUnit) -> Result<FetchResult> {
        match self.provider.fetch(unit).await? {
            Fetched::Absent(reason) => Ok(FetchResult::NotAvailable { reason }),
            Fetched::Payload(payload) => {
                let retrieved_at = Utc::now();
                self.persist(unit, &payload).await?;
                Ok(FetchResult::Success {
                    payload,
                    retrieved_at,
                })
            }
        }
    }

    async fn persist(&self, unit: &WorkUnit, payload: &Payload) -> Result<()> {
        let bytes = self.sink.write(unit, payload).await?;
        let record = CompletionRecord::new(unit, payload.records(), bytes, self.sink.format());
        self.sink.mark_complete(unit, &record).await
    }
}

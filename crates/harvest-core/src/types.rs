//! Core data types for bulk fetching.
//!
//! This module defines the fundamental data structures:
//!
//! - [`Symbol`] - Trading symbol/ticker
//! - [`ResourceType`] - Remote resource (statement) identifier
//! - [`WorkUnit`] - One addressable fetch task
//! - [`Payload`] - Opaque fetched body
//! - [`FetchResult`] - Outcome of driving a unit to a terminal state
//! - [`CompletionRecord`] - Durable proof that a unit was persisted
//! - [`UnitState`] - Lifecycle state of a unit within a run
//! - [`Listing`] - Company directory entry used for enumeration

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use crate::error::FetchError;
use crate::period::Period;

/// A trading symbol/ticker.
///
/// Symbols are automatically uppercased on creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Creates a new symbol from a string, converting to uppercase.
    #[must_use]
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().to_uppercase())
    }

    /// Returns the symbol as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the symbol as a single directory name.
    ///
    /// Separators and control characters become `_`. Names the filesystem
    /// treats specially (empty, `.`, `..`) get a leading `_`, so the result
    /// never escapes or aliases its parent directory.
    #[must_use]
    pub fn path_component(&self) -> String {
        let name: String = self
            .0
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        if name.chars().all(|c| c == '.') {
            format!("_{name}")
        } else {
            name
        }
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Symbol {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Identifier of a remote resource, used verbatim as a URL path segment.
///
/// The core never interprets it beyond addressing; the constants cover the
/// statements FMP serves per company.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceType(Cow<'static, str>);

impl ResourceType {
    /// Income statement.
    pub const INCOME_STATEMENT: Self = Self(Cow::Borrowed("income-statement"));
    /// Balance sheet statement.
    pub const BALANCE_SHEET: Self = Self(Cow::Borrowed("balance-sheet-statement"));
    /// Cash flow statement.
    pub const CASH_FLOW: Self = Self(Cow::Borrowed("cash-flow-statement"));
    /// Financial ratios.
    pub const RATIOS: Self = Self(Cow::Borrowed("ratios"));
    /// Key metrics.
    pub const KEY_METRICS: Self = Self(Cow::Borrowed("key-metrics"));

    /// Creates a resource type from an arbitrary path segment.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    /// Returns the resource name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The three primary financial statements.
    #[must_use]
    pub fn statements() -> Vec<Self> {
        vec![Self::INCOME_STATEMENT, Self::BALANCE_SHEET, Self::CASH_FLOW]
    }

    /// Statements plus ratios and key metrics.
    #[must_use]
    pub fn catalog() -> Vec<Self> {
        let mut all = Self::statements();
        all.extend([Self::RATIOS, Self::KEY_METRICS]);
        all
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One addressable fetch task: entity × resource × period.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Entity identifier.
    pub symbol: Symbol,
    /// Resource to fetch.
    pub resource: ResourceType,
    /// Period granularity.
    pub period: Period,
    /// Maximum number of periods to request, if bounded.
    pub limit: Option<usize>,
}

impl WorkUnit {
    /// Creates a new unbounded work unit.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, resource: ResourceType, period: Period) -> Self {
        Self {
            symbol: symbol.into(),
            resource,
            period,
            limit: None,
        }
    }

    /// Sets the record limit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Deterministic storage key: `{SYMBOL}/{resource}_{period}`.
    #[must_use]
    pub fn key(&self) -> String {
        format!(
            "{}/{}_{}",
            self.symbol.path_component(),
            self.resource,
            self.period
        )
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key())
    }
}

/// Opaque body returned by the remote source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payload {
    body: Vec<u8>,
    records: usize,
}

impl Payload {
    /// Wraps a raw response body holding `records` records.
    #[must_use]
    pub const fn new(body: Vec<u8>, records: usize) -> Self {
        Self { body, records }
    }

    /// Raw bytes as received.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.body
    }

    /// Number of records observed when the body was classified.
    #[must_use]
    pub const fn records(&self) -> usize {
        self.records
    }

    /// Body length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.body.len()
    }

    /// Returns true if the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

/// Outcome of driving one [`WorkUnit`] to a terminal state.
#[derive(Debug)]
pub enum FetchResult {
    /// The payload was fetched.
    Success {
        /// Fetched body.
        payload: Payload,
        /// When the body was received.
        retrieved_at: DateTime<Utc>,
    },
    /// The remote source has no data for this unit.
    NotAvailable {
        /// Why the unit is considered absent.
        reason: String,
    },
    /// The unit could not be fetched or persisted.
    Failed {
        /// Last error observed.
        error: FetchError,
        /// Number of attempts made, including the first.
        attempts: u32,
    },
}

impl FetchResult {
    /// Returns true for [`FetchResult::Success`].
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// On-disk encoding of persisted payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadFormat {
    /// The raw JSON body, unchanged.
    #[default]
    Json,
    /// Tabular CSV, one row per record.
    Csv,
    /// Apache Parquet.
    Parquet,
}

impl PayloadFormat {
    /// File extension for this format.
    #[must_use]
    pub const fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Parquet => "parquet",
        }
    }
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Durable marker proving a unit's payload was fully persisted.
///
/// A record exists if and only if the payload it describes exists and is
/// exactly `bytes` long. Records are created once and never mutated.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionRecord {
    /// Storage key of the unit ([`WorkUnit::key`]).
    pub key: String,
    /// When the payload was persisted.
    pub completed_at: DateTime<Utc>,
    /// Record count of the payload.
    pub records: usize,
    /// Size of the stored payload in bytes.
    pub bytes: u64,
    /// Encoding of the stored payload.
    pub format: PayloadFormat,
}

impl CompletionRecord {
    /// Creates a record for `unit`, stamped now.
    #[must_use]
    pub fn new(unit: &WorkUnit, records: usize, bytes: u64, format: PayloadFormat) -> Self {
        Self {
            key: unit.key(),
            completed_at: Utc::now(),
            records,
            bytes,
            format,
        }
    }
}

/// Lifecycle state of a unit within a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    /// Not yet attempted.
    Pending,
    /// Being fetched or persisted.
    InFlight,
    /// Fetched and persisted in this run.
    Completed,
    /// Already completed by an earlier run.
    Skipped,
    /// The remote source has no data.
    NotAvailable,
    /// Gave up after exhausting retries or on a permanent error.
    Failed,
}

impl UnitState {
    /// Returns true if no further work will happen for the unit in this run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::InFlight)
    }
}

/// Company directory entry used to enumerate work.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Ticker symbol.
    pub symbol: Symbol,
    /// Company name.
    #[serde(default)]
    pub name: String,
    /// Exchange full name.
    #[serde(default)]
    pub exchange: String,
    /// Exchange short code (e.g. "NASDAQ", "KSC").
    #[serde(default)]
    pub exchange_short_name: String,
    /// Country code, when the directory provides one.
    #[serde(default)]
    pub country: Option<String>,
    /// Security type ("stock", "etf", "trust", ...).
    #[serde(default, rename = "type")]
    pub kind: String,
}

impl Listing {
    /// Creates a stock listing.
    #[must_use]
    pub fn new(symbol: impl Into<Symbol>, exchange_short_name: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            exchange_short_name: exchange_short_name.into(),
            kind: "stock".to_string(),
            ..Default::default()
        }
    }

    /// Sets the country code.
    #[must_use]
    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    /// Returns true if this listing is a common stock.
    #[must_use]
    pub fn is_stock(&self) -> bool {
        self.kind.eq_ignore_ascii_case("stock")
    }
}

/// Per-exchange stock count over a set of listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSummary {
    /// Exchange short code.
    pub short_name: String,
    /// Exchange full name.
    pub full_name: String,
    /// Number of stock listings on the exchange.
    pub stock_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_uppercase() {
        let sym = Symbol::new("005930.ks");
        assert_eq!(sym.as_str(), "005930.KS");
    }

    #[test]
    fn test_unit_key_is_deterministic() {
        let unit = WorkUnit::new("aaa", ResourceType::INCOME_STATEMENT, Period::Annual);
        assert_eq!(unit.key(), "AAA/income-statement_annual");
        assert_eq!(unit.key(), unit.clone().with_limit(5).key());
    }

    #[test]
    fn test_unit_key_sanitizes_symbol() {
        let unit = WorkUnit::new("BRK/A", ResourceType::CASH_FLOW, Period::Quarter);
        assert_eq!(unit.key(), "BRK_A/cash-flow-statement_quarter");
    }

    #[test]
    fn test_path_component_never_escapes_parent() {
        assert_eq!(Symbol::new("").path_component(), "_");
        assert_eq!(Symbol::new(".").path_component(), "_.");
        assert_eq!(Symbol::new("..").path_component(), "_..");
        assert_eq!(Symbol::new("../etc").path_component(), ".._ETC");
        assert_eq!(Symbol::new("A\0B").path_component(), "A_B");
        assert_eq!(Symbol::new("BRK.B").path_component(), "BRK.B");

        let unit = WorkUnit::new("..", ResourceType::INCOME_STATEMENT, Period::Annual);
        assert_eq!(unit.key(), "_../income-statement_annual");
    }

    #[test]
    fn test_catalog_contains_statements() {
        let catalog = ResourceType::catalog();
        assert_eq!(catalog.len(), 5);
        for stmt in ResourceType::statements() {
            assert!(catalog.contains(&stmt));
        }
        assert_eq!(ResourceType::new("ratios"), ResourceType::RATIOS);
    }

    #[test]
    fn test_listing_deserializes_fmp_shape() {
        let json = r#"{"symbol":"aapl","name":"Apple Inc.","price":190.1,
            "exchange":"NASDAQ Global Select","exchangeShortName":"NASDAQ","type":"stock"}"#;
        let listing: Listing = serde_json::from_str(json).unwrap();
        assert_eq!(listing.symbol.as_str(), "AAPL");
        assert_eq!(listing.exchange_short_name, "NASDAQ");
        assert!(listing.is_stock());
        assert_eq!(listing.country, None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!UnitState::Pending.is_terminal());
        assert!(!UnitState::InFlight.is_terminal());
        assert!(UnitState::Skipped.is_terminal());
        assert!(UnitState::NotAvailable.is_terminal());
    }
}

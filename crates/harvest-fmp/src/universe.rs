//! Company directory enumeration and filtering.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use harvest_core::{ExchangeSummary, Listing, Result, UniverseProvider};
use tracing::{debug, info};

use crate::FmpClient;

/// Full stock directory endpoint.
const STOCK_LIST_ENDPOINT: &str = "stock/list";

/// Supported countries endpoint.
const COUNTRIES_ENDPOINT: &str = "get-all-countries";

/// Exchanges covered for each supported country code.
const COUNTRY_EXCHANGES: &[(&str, &[&str])] = &[
    ("US", &["NYSE", "NASDAQ", "AMEX"]),
    ("CN", &["SHH", "SHZ"]),
    ("JP", &["JPX"]),
    ("KR", &["KSC", "KOE"]),
];

/// Exchange short codes for a country, if the country is supported.
#[must_use]
pub fn country_exchanges(country: &str) -> Option<&'static [&'static str]> {
    COUNTRY_EXCHANGES
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(country))
        .map(|(_, exchanges)| *exchanges)
}

/// Selects listings by country, exchange, and security type.
///
/// The stock directory carries no country column, so a country is resolved
/// through its exchanges. Matching listings get their `country` filled in.
#[derive(Clone, Debug)]
pub struct ListingFilter {
    countries: Vec<String>,
    exchanges: HashSet<String>,
    stock_only: bool,
}

impl Default for ListingFilter {
    fn default() -> Self {
        Self {
            countries: Vec::new(),
            exchanges: HashSet::new(),
            stock_only: true,
        }
    }
}

impl ListingFilter {
    /// A filter that keeps every stock listing.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict to the exchanges of the given countries.
    ///
    /// # Errors
    /// Returns [`harvest_core::FetchError::InvalidParameter`] for an unsupported
    /// country code.
    pub fn with_countries<I, S>(mut self, countries: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for country in countries {
            let country = country.as_ref().to_ascii_uppercase();
            if country_exchanges(&country).is_none() {
                return Err(harvest_core::FetchError::InvalidParameter(format!(
                    "Unsupported country code: {country}. Supported: US, CN, JP, KR"
                )));
            }
            self.countries.push(country);
        }
        Ok(self)
    }

    /// Restrict to explicit exchange short codes.
    #[must_use]
    pub fn with_exchanges<I, S>(mut self, exchanges: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exchanges
            .extend(exchanges.into_iter().map(|e| e.into().to_ascii_uppercase()));
        self
    }

    /// Include non-stock listings (ETFs, trusts, funds).
    #[must_use]
    pub const fn include_non_stock(mut self) -> Self {
        self.stock_only = false;
        self
    }

    /// Country owning `exchange` among the selected countries, if any.
    fn country_of(&self, exchange: &str) -> Option<&str> {
        self.countries
            .iter()
            .find(|c| {
                country_exchanges(c)
                    .is_some_and(|list| list.iter().any(|e| e.eq_ignore_ascii_case(exchange)))
            })
            .map(String::as_str)
    }

    /// Returns the matching listings, tagging each with its country.
    #[must_use]
    pub fn apply(&self, listings: Vec<Listing>) -> Vec<Listing> {
        listings
            .into_iter()
            .filter(|l| !self.stock_only || l.is_stock())
            .filter(|l| {
                self.exchanges.is_empty()
                    || self
                        .exchanges
                        .contains(&l.exchange_short_name.to_ascii_uppercase())
            })
            .filter_map(|mut l| {
                if self.countries.is_empty() {
                    return Some(l);
                }
                let country = self.country_of(&l.exchange_short_name)?.to_string();
                l.country = Some(country);
                Some(l)
            })
            .collect()
    }
}

/// Per-exchange stock counts, sorted by exchange short code.
#[must_use]
pub fn exchange_summary(listings: &[Listing]) -> Vec<ExchangeSummary> {
    let mut by_exchange: BTreeMap<&str, ExchangeSummary> = BTreeMap::new();
    for listing in listings
        .iter()
        .filter(|l| l.is_stock() && !l.exchange_short_name.is_empty())
    {
        by_exchange
            .entry(listing.exchange_short_name.as_str())
            .or_insert_with(|| ExchangeSummary {
                short_name: listing.exchange_short_name.clone(),
                full_name: listing.exchange.clone(),
                stock_count: 0,
            })
            .stock_count += 1;
    }
    by_exchange.into_values().collect()
}

#[async_trait]
impl UniverseProvider for FmpClient {
    async fn listings(&self) -> Result<Vec<Listing>> {
        let listings: Vec<Listing> = self.get_json(STOCK_LIST_ENDPOINT).await?;
        info!(count = listings.len(), "Fetched FMP stock list");
        Ok(listings)
    }

    async fn countries(&self) -> Result<Vec<String>> {
        let countries: Vec<String> = self.get_json(COUNTRIES_ENDPOINT).await?;
        debug!(count = countries.len(), "Fetched FMP country list");
        Ok(countries)
    }
}

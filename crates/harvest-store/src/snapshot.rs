//! Company directory snapshots.
//!
//! A snapshot directory holds one `{COUNTRY}_{EXCHANGE}_companies.json` file
//! per country and exchange plus an [`EXCHANGES_FILE`] summary. Loading a
//! snapshot lets a bulk run be planned without listing the universe again.

use harvest_core::{ExchangeSummary, FetchError, Listing, Result};
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::fs::{atomic_write, storage_err};

/// File name of the exchange summary.
pub const EXCHANGES_FILE: &str = "exchanges.json";

const COMPANIES_SUFFIX: &str = "_companies.json";

/// Country part of the file name for listings without a country.
const NO_COUNTRY: &str = "ALL";

/// File name holding the listings of `exchange` in `country`.
///
/// Both parts are uppercased; characters other than ASCII letters, digits
/// and `-` become `-`.
#[must_use]
pub fn companies_file_name(country: &str, exchange: &str) -> String {
    format!(
        "{}_{}{COMPANIES_SUFFIX}",
        file_part(country),
        file_part(exchange)
    )
}

fn file_part(raw: &str) -> String {
    let part: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' {
                c.to_ascii_uppercase()
            } else {
                '-'
            }
        })
        .collect();
    if part.is_empty() { "-".to_string() } else { part }
}

/// Writes `listings` into `dir`, one file per country and exchange.
///
/// Files are replaced atomically. Returns the written paths in name order.
///
/// # Errors
/// Returns [`FetchError::Storage`] if a file cannot be encoded or written.
pub async fn save_listings(dir: &Path, listings: &[Listing]) -> Result<Vec<PathBuf>> {
    let mut groups: BTreeMap<String, Vec<&Listing>> = BTreeMap::new();
    for listing in listings {
        let country = listing.country.as_deref().unwrap_or(NO_COUNTRY);
        groups
            .entry(companies_file_name(country, &listing.exchange_short_name))
            .or_default()
            .push(listing);
    }

    let mut written = Vec::with_capacity(groups.len());
    for (name, group) in groups {
        let path = dir.join(name);
        write_json(&path, &group).await?;
        debug!(path = %path.display(), count = group.len(), "Saved listings");
        written.push(path);
    }
    info!(
        dir = %dir.display(),
        files = written.len(),
        listings = listings.len(),
        "Saved listing snapshot"
    );
    Ok(written)
}

/// Reads listings saved by [`save_listings`].
///
/// With a non-empty `countries`, only files of those countries are read
/// (case-insensitive). Listings stored without a country get it back from
/// the file name. Files are read in name order.
///
/// # Errors
/// Returns [`FetchError::Storage`] if `dir` cannot be read or a file does not
/// hold a listing array.
pub async fn load_listings(dir: &Path, countries: &[&str]) -> Result<Vec<Listing>> {
    let mut files = Vec::new();
    let mut entries = fs::read_dir(dir).await.map_err(|e| storage_err(dir, &e))?;
    while let Some(entry) = entries.next_entry().await.map_err(|e| storage_err(dir, &e))? {
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some((country, _)) = name
            .strip_suffix(COMPANIES_SUFFIX)
            .and_then(|stem| stem.split_once('_'))
        else {
            continue;
        };
        if countries.is_empty() || countries.iter().any(|c| c.eq_ignore_ascii_case(country)) {
            files.push((name.clone(), country.to_string()));
        }
    }
    files.sort();

    let mut listings = Vec::new();
    for (name, country) in files {
        let mut group: Vec<Listing> = read_json(&dir.join(&name)).await?;
        if country != NO_COUNTRY {
            for listing in group.iter_mut().filter(|l| l.country.is_none()) {
                listing.country = Some(country.clone());
            }
        }
        listings.append(&mut group);
    }
    info!(dir = %dir.display(), count = listings.len(), "Loaded listing snapshot");
    Ok(listings)
}

/// Writes the exchange summary to `dir/exchanges.json`.
///
/// # Errors
/// Returns [`FetchError::Storage`] if the file cannot be encoded or written.
pub async fn save_exchange_summary(dir: &Path, summary: &[ExchangeSummary]) -> Result<PathBuf> {
    let path = dir.join(EXCHANGES_FILE);
    write_json(&path, summary).await?;
    debug!(path = %path.display(), exchanges = summary.len(), "Saved exchange summary");
    Ok(path)
}

/// Reads the summary written by [`save_exchange_summary`].
///
/// # Errors
/// Returns [`FetchError::Storage`] if the file is missing or malformed.
pub async fn load_exchange_summary(dir: &Path) -> Result<Vec<ExchangeSummary>> {
    read_json(&dir.join(EXCHANGES_FILE)).await
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| FetchError::Storage(format!("{}: {e}", path.display())))?;
    atomic_write(path, &json).await
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = fs::read(path).await.map_err(|e| storage_err(path, &e))?;
    serde_json::from_slice(&raw)
        .map_err(|e| FetchError::Storage(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listings() -> Vec<Listing> {
        vec![
            Listing::new("005930.KS", "KSC").with_country("KR"),
            Listing::new("035720.KQ", "KOE").with_country("KR"),
            Listing::new("000660.KS", "KSC").with_country("KR"),
            Listing::new("AAPL", "NASDAQ").with_country("US"),
            Listing::new("OTCX", ""),
        ]
    }

    #[test]
    fn test_companies_file_name() {
        assert_eq!(companies_file_name("kr", "KSC"), "KR_KSC_companies.json");
        assert_eq!(companies_file_name("US", "NYSE/ARCA"), "US_NYSE-ARCA_companies.json");
        assert_eq!(companies_file_name("US", ""), "US_-_companies.json");
    }

    #[tokio::test]
    async fn test_listing_snapshot_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let written = save_listings(dir.path(), &listings()).await.unwrap();

        let names: Vec<_> = written
            .iter()
            .filter_map(|p| p.file_name()?.to_str())
            .collect();
        assert_eq!(
            names,
            [
                "ALL_-_companies.json",
                "KR_KOE_companies.json",
                "KR_KSC_companies.json",
                "US_NASDAQ_companies.json",
            ]
        );

        let loaded = load_listings(dir.path(), &[]).await.unwrap();
        assert_eq!(loaded.len(), 5);
        let otc = loaded.iter().find(|l| l.symbol.as_str() == "OTCX").unwrap();
        assert_eq!(otc.country, None);

        let mut expected = listings();
        let mut actual = loaded;
        expected.sort_by(|a, b| a.symbol.as_str().cmp(b.symbol.as_str()));
        actual.sort_by(|a, b| a.symbol.as_str().cmp(b.symbol.as_str()));
        assert_eq!(actual, expected);
    }

    #[tokio::test]
    async fn test_load_filters_by_country_and_fills_it_in() {
        let dir = tempfile::tempdir().unwrap();
        save_listings(dir.path(), &listings()).await.unwrap();
        std::fs::write(
            dir.path().join("JP_JPX_companies.json"),
            br#"[{"symbol":"7203.t","exchangeShortName":"JPX","type":"stock"}]"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"not a snapshot").unwrap();

        let kr = load_listings(dir.path(), &["kr"]).await.unwrap();
        let symbols: Vec<_> = kr.iter().map(|l| l.symbol.as_str()).collect();
        assert_eq!(symbols, ["035720.KQ", "005930.KS", "000660.KS"]);

        let jp = load_listings(dir.path(), &["JP"]).await.unwrap();
        assert_eq!(jp.len(), 1);
        assert_eq!(jp[0].symbol.as_str(), "7203.T");
        assert_eq!(jp[0].country.as_deref(), Some("JP"));
    }

    #[tokio::test]
    async fn test_load_rejects_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("KR_KSC_companies.json"), b"{oops").unwrap();
        let err = load_listings(dir.path(), &[]).await.unwrap_err();
        assert!(matches!(err, FetchError::Storage(_)));
    }

    #[tokio::test]
    async fn test_exchange_summary_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let summary = vec![
            ExchangeSummary {
                short_name: "KSC".to_string(),
                full_name: "Korea Stock Exchange".to_string(),
                stock_count: 2,
            },
            ExchangeSummary {
                short_name: "NASDAQ".to_string(),
                full_name: "NASDAQ Global Select".to_string(),
                stock_count: 1,
            },
        ];
        let path = save_exchange_summary(dir.path(), &summary).await.unwrap();
        assert!(path.ends_with(EXCHANGES_FILE));
        assert_eq!(load_exchange_summary(dir.path()).await.unwrap(), summary);
        assert!(load_exchange_summary(&dir.path().join("missing")).await.is_err());
    }
}

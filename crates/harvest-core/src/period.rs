//! Reporting period granularity for statement data.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::FetchError;

/// Period granularity of a fetched statement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Period {
    /// Annual reporting period.
    #[default]
    Annual,
    /// Quarterly reporting period.
    Quarter,
    /// Last twelve months (trailing).
    Ltm,
}

impl Period {
    /// All supported periods.
    pub const ALL: [Self; 3] = [Self::Annual, Self::Quarter, Self::Ltm];

    /// Returns the wire/storage name of this period.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Annual => "annual",
            Self::Quarter => "quarter",
            Self::Ltm => "ltm",
        }
    }

    /// Returns true for trailing-twelve-month data, which has no
    /// `period`/`limit` parameters on the wire.
    #[must_use]
    pub const fn is_trailing(&self) -> bool {
        matches!(self, Self::Ltm)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Period {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "annual" | "fy" => Ok(Self::Annual),
            "quarter" | "quarterly" | "q" => Ok(Self::Quarter),
            "ltm" | "ttm" => Ok(Self::Ltm),
            other => Err(FetchError::InvalidParameter(format!(
                "Unknown period: {other}. Supported: annual, quarter, ltm"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_aliases() {
        assert_eq!("ANNUAL".parse::<Period>().unwrap(), Period::Annual);
        assert_eq!("quarterly".parse::<Period>().unwrap(), Period::Quarter);
        assert_eq!("ttm".parse::<Period>().unwrap(), Period::Ltm);
        assert!("weekly".parse::<Period>().is_err());
    }

    #[test]
    fn test_only_ltm_is_trailing() {
        assert!(Period::Ltm.is_trailing());
        assert!(!Period::Annual.is_trailing());
        assert!(!Period::Quarter.is_trailing());
    }
}

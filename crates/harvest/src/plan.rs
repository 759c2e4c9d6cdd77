//! Work planning: turning a symbol universe into an ordered stream of units.

use std::collections::VecDeque;

use rand::seq::SliceRandom;

use harvest_core::{Listing, Period, ResourceType, Symbol, WorkUnit};

/// Country bucket for listings without one.
const UNKNOWN_COUNTRY: &str = "??";

/// Number of periods requested per unit unless a plan says otherwise.
pub const DEFAULT_LIMIT: usize = 5;

/// Which resources and periods to fetch for every symbol.
///
/// The default plan covers the three primary statements at annual
/// granularity, asking for the latest [`DEFAULT_LIMIT`] periods of each.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkPlan {
    resources: Vec<ResourceType>,
    periods: Vec<Period>,
    limit: Option<usize>,
}

impl Default for WorkPlan {
    fn default() -> Self {
        Self {
            resources: ResourceType::statements(),
            periods: vec![Period::Annual],
            limit: Some(DEFAULT_LIMIT),
        }
    }
}

impl WorkPlan {
    /// Creates the default plan.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the resources to fetch.
    #[must_use]
    pub fn with_resources(mut self, resources: impl IntoIterator<Item = ResourceType>) -> Self {
        self.resources = resources.into_iter().collect();
        self
    }

    /// Replaces the periods to fetch.
    #[must_use]
    pub fn with_periods(mut self, periods: impl IntoIterator<Item = Period>) -> Self {
        self.periods = periods.into_iter().collect();
        self
    }

    /// Caps the number of periods requested per unit.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Requests every period the source has.
    #[must_use]
    pub const fn without_limit(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Number of units generated per symbol.
    #[must_use]
    pub fn units_per_symbol(&self) -> usize {
        self.resources.len() * self.periods.len()
    }

    /// Lazily expands `symbols` into units, symbol-major.
    ///
    /// Nothing is materialized up front, so this is safe to feed with a
    /// universe of any size.
    pub fn units<I>(&self, symbols: I) -> impl Iterator<Item = WorkUnit> + Send + use<I>
    where
        I: IntoIterator<Item = Symbol>,
        I::IntoIter: Send,
    {
        let resources = self.resources.clone();
        let periods = self.periods.clone();
        let limit = self.limit;

        symbols.into_iter().flat_map(move |symbol| {
            let periods = periods.clone();
            resources.clone().into_iter().flat_map(move |resource| {
                let symbol = symbol.clone();
                periods.clone().into_iter().map(move |period| WorkUnit {
                    symbol: symbol.clone(),
                    resource: resource.clone(),
                    period,
                    limit,
                })
            })
        })
    }
}

/// Orders listings round-robin across countries.
///
/// Countries keep the order of their first appearance. With `shuffle`, the
/// listings of each country are shuffled first, so repeated partial runs do
/// not always start with the same companies.
#[must_use]
pub fn interleave_by_country(listings: Vec<Listing>, shuffle: bool) -> Vec<Listing> {
    let total = listings.len();
    let mut buckets: Vec<(String, Vec<Listing>)> = Vec::new();
    for listing in listings {
        let country = listing
            .country
            .clone()
            .unwrap_or_else(|| UNKNOWN_COUNTRY.to_string());
        match buckets.iter_mut().find(|(c, _)| *c == country) {
            Some((_, bucket)) => bucket.push(listing),
            None => buckets.push((country, vec![listing])),
        }
    }

    let mut queues: Vec<VecDeque<Listing>> = buckets
        .into_iter()
        .map(|(_, mut bucket)| {
            if shuffle {
                bucket.shuffle(&mut rand::rng());
            }
            VecDeque::from(bucket)
        })
        .collect();

    let mut ordered = Vec::with_capacity(total);
    while ordered.len() < total {
        for queue in &mut queues {
            if let Some(listing) = queue.pop_front() {
                ordered.push(listing);
            }
        }
    }
    ordered
}

/// Symbols of `listings`, in order.
pub fn symbols(listings: impl IntoIterator<Item = Listing>) -> impl Iterator<Item = Symbol> {
    listings.into_iter().map(|l| l.symbol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_default_plan_covers_statements() {
        let plan = WorkPlan::default();
        let units: Vec<_> = plan.units([Symbol::new("AAA")]).collect();
        assert_eq!(units.len(), 3);
        assert_eq!(plan.units_per_symbol(), 3);
        assert!(units.iter().all(|u| u.period == Period::Annual));
        assert!(units.iter().all(|u| u.limit == Some(DEFAULT_LIMIT)));
        assert_eq!(units[0].key(), "AAA/income-statement_annual");
    }

    #[test]
    fn test_limit_overrides() {
        let symbol = || [Symbol::new("AAA")];
        let unlimited: Vec<_> = WorkPlan::new().without_limit().units(symbol()).collect();
        assert!(unlimited.iter().all(|u| u.limit.is_none()));

        let ten: Vec<_> = WorkPlan::new().with_limit(10).units(symbol()).collect();
        assert!(ten.iter().all(|u| u.limit == Some(10)));
    }

    #[test]
    fn test_units_are_symbol_major_and_unique() {
        let plan = WorkPlan::new()
            .with_resources([ResourceType::RATIOS, ResourceType::KEY_METRICS])
            .with_periods([Period::Annual, Period::Quarter])
            .with_limit(8);
        let units: Vec<_> = plan
            .units(["AAA", "BBB"].into_iter().map(Symbol::new))
            .collect();

        assert_eq!(units.len(), 8);
        assert!(units[..4].iter().all(|u| u.symbol.as_str() == "AAA"));
        assert!(units.iter().all(|u| u.limit == Some(8)));
        let keys: HashSet<_> = units.iter().map(WorkUnit::key).collect();
        assert_eq!(keys.len(), 8);
    }

    #[test]
    fn test_units_are_lazy() {
        let plan = WorkPlan::default();
        let mut iter = plan.units((0..).map(|i| Symbol::new(format!("S{i}"))));
        assert_eq!(iter.next().map(|u| u.key()).as_deref(), Some("S0/income-statement_annual"));
        assert_eq!(iter.nth(3).map(|u| u.symbol), Some(Symbol::new("S1")));
    }

    fn listings() -> Vec<Listing> {
        vec![
            Listing::new("A1", "NYSE").with_country("US"),
            Listing::new("A2", "NASDAQ").with_country("US"),
            Listing::new("A3", "NYSE").with_country("US"),
            Listing::new("K1", "KSC").with_country("KR"),
            Listing::new("J1", "JPX").with_country("JP"),
            Listing::new("J2", "JPX").with_country("JP"),
        ]
    }

    #[test]
    fn test_interleave_round_robin() {
        let ordered: Vec<_> = symbols(interleave_by_country(listings(), false))
            .map(|s| s.as_str().to_string())
            .collect();
        assert_eq!(ordered, ["A1", "K1", "J1", "A2", "J2", "A3"]);
    }

    #[test]
    fn test_interleave_shuffled_keeps_every_listing() {
        let ordered = interleave_by_country(listings(), true);
        assert_eq!(ordered.len(), 6);
        let countries: Vec<_> = ordered
            .iter()
            .take(3)
            .filter_map(|l| l.country.as_deref())
            .collect();
        assert_eq!(countries, ["US", "KR", "JP"]);
    }

    #[test]
    fn test_interleave_without_country() {
        let ordered = interleave_by_country(vec![Listing::new("X", "OTC")], false);
        assert_eq!(ordered[0].symbol.as_str(), "X");
    }
}

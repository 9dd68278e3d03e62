use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};

type Bound = Reverse<Option<DateTime<Utc>>>;

/// Rates are fractions of the subtotal; 1 is 100%
pub const MAX_RATE: Decimal = Decimal::ONE;

/// A tax rate applicable within an optional time window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxConfigurationInTime {
    pub active_from: Option<DateTime<Utc>>,
    pub active_to: Option<DateTime<Utc>>,
    pub rate: Decimal,
}

impl TaxConfigurationInTime {
    pub fn new(
        active_from: Option<DateTime<Utc>>,
        active_to: Option<DateTime<Utc>>,
        rate: Decimal,
    ) -> Result<Self, TaxError> {
        if rate.is_sign_negative() {
            return Err(TaxError::InvalidRate(format!("rate {} is negative", rate)));
        }
        if rate > MAX_RATE {
            return Err(TaxError::InvalidRate(format!("rate {} exceeds {}", rate, MAX_RATE)));
        }
        if let (Some(from), Some(to)) = (active_from, active_to) {
            if from > to {
                return Err(TaxError::InvalidRate(format!("window starts {} after it ends {}", from, to)));
            }
        }

        Ok(Self { active_from, active_to, rate })
    }

    /// Open bounds always match; closed bounds are inclusive.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.active_from.map_or(true, |from| from <= now) && self.active_to.map_or(true, |to| to >= now)
    }

    /// Order two records so the one most applicable at `now` comes first.
    ///
    /// Keys, in order: valid before invalid (invalid records tie), then the
    /// latest explicit start, then the latest explicit end. A missing bound
    /// sorts after any explicit one.
    pub fn compare_at(&self, other: &Self, now: DateTime<Utc>) -> Ordering {
        self.sort_key(now).cmp(&other.sort_key(now))
    }

    fn sort_key(&self, now: DateTime<Utc>) -> (bool, Option<(Bound, Bound)>) {
        if self.is_valid_at(now) {
            (false, Some((Reverse(self.active_from), Reverse(self.active_to))))
        } else {
            (true, None)
        }
    }
}

/// Rate picked from a configuration, ready to be attached to an order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaxRateSnapshot {
    pub tax_name: String,
    pub tax_number: String,
    pub rate: Decimal,
}

/// Named tax template with its rate history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxConfiguration {
    pub configuration_name: String,
    pub tax_name: String,
    pub tax_number: String,
    #[serde(default)]
    rates: Vec<TaxConfigurationInTime>,
}

impl TaxConfiguration {
    pub fn new(configuration_name: impl Into<String>, tax_name: impl Into<String>, tax_number: impl Into<String>) -> Self {
        Self {
            configuration_name: configuration_name.into(),
            tax_name: tax_name.into(),
            tax_number: tax_number.into(),
            rates: Vec::new(),
        }
    }

    /// Add a rate record; an identical record is only stored once.
    pub fn add_rate(&mut self, rate: TaxConfigurationInTime) -> bool {
        if self.rates.contains(&rate) {
            return false;
        }
        self.rates.push(rate);
        true
    }

    pub fn remove_rate(&mut self, rate: &TaxConfigurationInTime) -> bool {
        let before = self.rates.len();
        self.rates.retain(|r| r != rate);
        before != self.rates.len()
    }

    /// Records in insertion order
    pub fn rates(&self) -> &[TaxConfigurationInTime] {
        &self.rates
    }

    /// Records ordered by applicability at `now`; ties keep insertion order.
    pub fn sorted_rates(&self, now: DateTime<Utc>) -> Vec<&TaxConfigurationInTime> {
        let mut sorted: Vec<&TaxConfigurationInTime> = self.rates.iter().collect();
        sorted.sort_by(|a, b| a.compare_at(b, now));
        sorted
    }

    /// The record in effect at `now`, if any
    pub fn effective_rate(&self, now: DateTime<Utc>) -> Option<&TaxConfigurationInTime> {
        self.sorted_rates(now)
            .into_iter()
            .next()
            .filter(|r| r.is_valid_at(now))
    }

    /// Snapshot the effective rate for attaching to an order
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Result<TaxRateSnapshot, TaxError> {
        let effective = self
            .effective_rate(now)
            .ok_or_else(|| TaxError::NoEffectiveRate(self.configuration_name.clone()))?;

        Ok(TaxRateSnapshot {
            tax_name: self.tax_name.clone(),
            tax_number: self.tax_number.clone(),
            rate: effective.rate,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TaxError {
    #[error("No rate in effect for tax configuration: {0}")]
    NoEffectiveRate(String),

    #[error("Tax configuration not found: {0}")]
    NotFound(String),

    #[error("Invalid tax rate: {0}")]
    InvalidRate(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap()
    }

    fn rate(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>, pct: i64) -> TaxConfigurationInTime {
        TaxConfigurationInTime::new(from, to, Decimal::new(pct, 2)).unwrap()
    }

    #[test]
    fn test_validity_window() {
        let now = at(2024, 6, 1);
        assert!(rate(None, None, 5).is_valid_at(now));
        assert!(rate(Some(now), Some(now), 5).is_valid_at(now));
        assert!(!rate(Some(at(2024, 7, 1)), None, 5).is_valid_at(now));
        assert!(!rate(None, Some(at(2024, 5, 31)), 5).is_valid_at(now));
    }

    #[test]
    fn test_explicit_start_beats_unbounded_start() {
        let now = at(2024, 6, 1);
        let a = rate(None, None, 5);
        let b = rate(Some(at(2024, 1, 1)), None, 15);

        assert_eq!(b.compare_at(&a, now), Ordering::Less);
        assert_eq!(a.compare_at(&b, now), Ordering::Greater);
    }

    #[test]
    fn test_most_recent_start_first() {
        let now = at(2024, 6, 1);
        let older = rate(Some(at(2023, 1, 1)), None, 5);
        let newer = rate(Some(at(2024, 1, 1)), None, 7);

        assert_eq!(newer.compare_at(&older, now), Ordering::Less);
    }

    #[test]
    fn test_valid_beats_invalid_and_invalids_tie() {
        let now = at(2024, 6, 1);
        let valid = rate(None, None, 5);
        let future = rate(Some(at(2025, 1, 1)), None, 9);
        let expired = rate(None, Some(at(2020, 1, 1)), 3);

        assert_eq!(valid.compare_at(&future, now), Ordering::Less);
        assert_eq!(future.compare_at(&expired, now), Ordering::Equal);
    }

    #[test]
    fn test_explicit_end_beats_unbounded_end() {
        let now = at(2024, 6, 1);
        let start = Some(at(2024, 1, 1));
        let open = rate(start, None, 5);
        let closed = rate(start, Some(at(2024, 12, 31)), 6);
        let later = rate(start, Some(at(2025, 12, 31)), 7);

        assert_eq!(closed.compare_at(&open, now), Ordering::Less);
        assert_eq!(later.compare_at(&closed, now), Ordering::Less);
    }

    #[test]
    fn test_effective_rate_selection() {
        let now = at(2024, 6, 1);
        let mut config = TaxConfiguration::new("qc-tvq", "TVQ", "TVQ1234567");
        config.add_rate(rate(None, None, 5));
        config.add_rate(rate(Some(at(2024, 1, 1)), None, 15));
        config.add_rate(rate(Some(at(2025, 1, 1)), None, 10));

        assert_eq!(config.effective_rate(now).unwrap().rate, Decimal::new(15, 2));

        let snapshot = config.snapshot_at(now).unwrap();
        assert_eq!(snapshot.tax_name, "TVQ");
        assert_eq!(snapshot.tax_number, "TVQ1234567");
        assert_eq!(snapshot.rate, Decimal::new(15, 2));
    }

    #[test]
    fn test_no_effective_rate() {
        let now = at(2024, 6, 1);
        let mut config = TaxConfiguration::new("future", "GST", "GST1");
        config.add_rate(rate(Some(at(2030, 1, 1)), None, 5));

        assert!(config.effective_rate(now).is_none());
        assert!(matches!(config.snapshot_at(now), Err(TaxError::NoEffectiveRate(_))));
    }

    #[test]
    fn test_duplicate_rates_stored_once() {
        let mut config = TaxConfiguration::new("gst", "GST", "GST1");
        assert!(config.add_rate(rate(None, None, 5)));
        assert!(!config.add_rate(rate(None, None, 5)));
        assert_eq!(config.rates().len(), 1);
        assert!(config.remove_rate(&rate(None, None, 5)));
        assert!(config.rates().is_empty());
    }

    #[test]
    fn test_invalid_records_rejected() {
        assert!(TaxConfigurationInTime::new(None, None, Decimal::new(-1, 2)).is_err());
        assert!(TaxConfigurationInTime::new(Some(at(2024, 2, 1)), Some(at(2024, 1, 1)), Decimal::ONE).is_err());
        assert!(TaxConfigurationInTime::new(None, None, Decimal::MAX).is_err());
        assert!(TaxConfigurationInTime::new(None, None, MAX_RATE).is_ok());
    }

    fn record_strategy() -> impl Strategy<Value = TaxConfigurationInTime> {
        (
            proptest::option::of(-30i64..30),
            proptest::option::of(-30i64..30),
            0i64..100,
        )
            .prop_map(|(from, to, pct)| {
                let base = at(2024, 6, 1);
                TaxConfigurationInTime {
                    active_from: from.map(|d| base + Duration::days(d)),
                    active_to: to.map(|d| base + Duration::days(d)),
                    rate: Decimal::new(pct, 2),
                }
            })
    }

    proptest! {
        #[test]
        fn prop_comparator_is_antisymmetric(a in record_strategy(), b in record_strategy()) {
            let now = at(2024, 6, 1);
            prop_assert_eq!(a.compare_at(&b, now), b.compare_at(&a, now).reverse());
        }

        #[test]
        fn prop_comparator_is_transitive(a in record_strategy(), b in record_strategy(), c in record_strategy()) {
            let now = at(2024, 6, 1);
            if a.compare_at(&b, now) != Ordering::Greater && b.compare_at(&c, now) != Ordering::Greater {
                prop_assert_ne!(a.compare_at(&c, now), Ordering::Greater);
            }
        }

        #[test]
        fn prop_head_is_valid_when_any_is(records in proptest::collection::vec(record_strategy(), 0..12)) {
            let now = at(2024, 6, 1);
            let mut config = TaxConfiguration::new("prop", "TAX", "TAX1");
            for record in records {
                config.add_rate(record);
            }

            let any_valid = config.rates().iter().any(|r| r.is_valid_at(now));
            prop_assert_eq!(config.effective_rate(now).is_some(), any_valid);

            let sorted = config.sorted_rates(now);
            for pair in sorted.windows(2) {
                prop_assert_ne!(pair[0].compare_at(pair[1], now), Ordering::Greater);
            }
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::tax::{TaxConfiguration, TaxError, TaxRateSnapshot};

/// A named group of tax configurations, matched against an order's region code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    #[serde(default)]
    pub tax_configurations: Vec<String>,
}

/// Tax configurations and regions known to the application
#[derive(Debug, Clone, Default)]
pub struct TaxRegistry {
    configurations: HashMap<String, TaxConfiguration>,
    regions: HashMap<String, Region>,
}

impl TaxRegistry {
    pub fn new(configurations: Vec<TaxConfiguration>, regions: Vec<Region>) -> Self {
        Self {
            configurations: configurations
                .into_iter()
                .map(|c| (c.configuration_name.clone(), c))
                .collect(),
            regions: regions.into_iter().map(|r| (r.name.clone(), r)).collect(),
        }
    }

    pub fn configuration(&self, name: &str) -> Result<&TaxConfiguration, TaxError> {
        self.configurations
            .get(name)
            .ok_or_else(|| TaxError::NotFound(name.to_string()))
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.regions.get(name)
    }

    /// Rates in effect at `now` for every configuration of a region.
    ///
    /// Configurations without a rate in effect are skipped; an unknown
    /// region yields no taxes.
    pub fn region_snapshots(&self, region_code: &str, now: DateTime<Utc>) -> Vec<TaxRateSnapshot> {
        let Some(region) = self.regions.get(region_code) else {
            return Vec::new();
        };

        region
            .tax_configurations
            .iter()
            .filter_map(|name| match self.configuration(name).and_then(|c| c.snapshot_at(now)) {
                Ok(snapshot) => Some(snapshot),
                Err(e) => {
                    tracing::warn!("Skipping tax {} for region {}: {}", name, region_code, e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tax::TaxConfigurationInTime;
    use chrono::TimeZone;
    use rust_decimal::Decimal;

    fn registry() -> TaxRegistry {
        let mut gst = TaxConfiguration::new("ca-gst", "GST", "GST-001");
        gst.add_rate(TaxConfigurationInTime::new(None, None, Decimal::new(5, 2)).unwrap());

        let mut qst = TaxConfiguration::new("qc-qst", "QST", "QST-001");
        qst.add_rate(TaxConfigurationInTime::new(None, None, Decimal::new(9975, 5)).unwrap());

        let expired = {
            let mut c = TaxConfiguration::new("old-hst", "HST", "HST-001");
            let end = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
            c.add_rate(TaxConfigurationInTime::new(None, Some(end), Decimal::new(13, 2)).unwrap());
            c
        };

        TaxRegistry::new(
            vec![gst, qst, expired],
            vec![Region {
                name: "QC".to_string(),
                tax_configurations: vec!["ca-gst".into(), "qc-qst".into(), "old-hst".into(), "missing".into()],
            }],
        )
    }

    #[test]
    fn test_region_snapshots_skip_unusable_configurations() {
        let snapshots = registry().region_snapshots("QC", Utc::now());
        let names: Vec<&str> = snapshots.iter().map(|s| s.tax_name.as_str()).collect();

        assert_eq!(names, vec!["GST", "QST"]);
        assert_eq!(snapshots[1].rate, Decimal::new(9975, 5));
    }

    #[test]
    fn test_unknown_region_and_configuration() {
        let registry = registry();
        assert!(registry.region_snapshots("ON", Utc::now()).is_empty());
        assert!(matches!(registry.configuration("nope"), Err(TaxError::NotFound(_))));
    }
}

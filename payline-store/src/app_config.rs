use payline_catalog::{CatalogProduct, Region, TaxConfiguration, TaxConfigurationInTime, TaxRegistry};
use payline_core::RetryPolicy;
use serde::Deserialize;
use std::env;

use crate::StoreError;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub payments: RetryPolicy,
    #[serde(default)]
    pub taxes: Vec<TaxConfiguration>,
    #[serde(default)]
    pub regions: Vec<Region>,
    #[serde(default)]
    pub products: Vec<CatalogProduct>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

/// Without a url orders are kept in memory
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GatewayProvider {
    #[default]
    Mock,
    Stripe,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    #[serde(default)]
    pub provider: GatewayProvider,
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_description")]
    pub description: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: GatewayProvider::default(),
            api_key: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            description: default_description(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.stripe.com".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_description() -> String {
    "Payline charge".to_string()
}

impl Config {
    pub fn load() -> Result<Self, StoreError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Optional per-environment overrides
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Developer overrides, not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Environment overrides; `__` separates nested keys
            .add_source(config::Environment::with_prefix("PAYLINE").separator("__"))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a single TOML document, without file or environment layering
    pub fn from_toml(source: &str) -> Result<Self, StoreError> {
        let s = config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?;

        let config: Self = s.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that deserialization alone cannot enforce
    pub fn validate(&self) -> Result<(), StoreError> {
        for tax in &self.taxes {
            for rate in tax.rates() {
                TaxConfigurationInTime::new(rate.active_from, rate.active_to, rate.rate).map_err(|e| {
                    StoreError::InvalidConfig(format!("tax {}: {}", tax.configuration_name, e))
                })?;
            }
        }

        for region in &self.regions {
            if let Some(missing) = region
                .tax_configurations
                .iter()
                .find(|name| !self.taxes.iter().any(|t| &t.configuration_name == *name))
            {
                return Err(StoreError::InvalidConfig(format!(
                    "region {} references unknown tax configuration {}",
                    region.name, missing
                )));
            }
        }

        if self.gateway.provider == GatewayProvider::Stripe && self.gateway.api_key.is_none() {
            return Err(StoreError::InvalidConfig("gateway.api_key is required for stripe".to_string()));
        }
        Ok(())
    }

    pub fn tax_registry(&self) -> TaxRegistry {
        TaxRegistry::new(self.taxes.clone(), self.regions.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    const SAMPLE: &str = r#"
        [server]
        port = 8080

        [payments]
        max_attempts = 4

        [payments.backoff]
        kind = "fixed"
        delay_ms = 50

        [[taxes]]
        configuration_name = "ca-gst"
        tax_name = "GST"
        tax_number = "123456789RT0001"

        [[taxes.rates]]
        rate = "0.05"

        [[taxes.rates]]
        active_from = "2030-01-01T00:00:00Z"
        rate = "0.06"

        [[regions]]
        name = "CA"
        tax_configurations = ["ca-gst"]
    "#;

    fn parse(source: &str) -> Config {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_sections_and_defaults() {
        let config = Config::from_toml(SAMPLE).unwrap();

        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.database.url.is_none());
        assert_eq!(config.gateway.provider, GatewayProvider::Mock);
        assert_eq!(config.payments.max_attempts, 4);
        assert_eq!(config.taxes[0].rates().len(), 2);
        assert_eq!(config.taxes[0].rates()[0].rate, Decimal::new(5, 2));
    }

    #[test]
    fn test_registry_picks_current_rate() {
        let registry = parse(SAMPLE).tax_registry();
        let snapshots = registry.region_snapshots("CA", chrono::Utc::now());
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].rate, Decimal::new(5, 2));
    }

    #[test]
    fn test_unknown_region_tax_rejected() {
        let source = SAMPLE.replace(r#"tax_configurations = ["ca-gst"]"#, r#"tax_configurations = ["qc-qst"]"#);
        assert!(matches!(parse(&source).validate(), Err(StoreError::InvalidConfig(_))));
    }

    #[test]
    fn test_stripe_requires_key() {
        let source = format!("{}\n[gateway]\nprovider = \"stripe\"\n", SAMPLE);
        assert!(parse(&source).validate().is_err());
    }
}

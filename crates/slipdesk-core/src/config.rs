//! Pipeline configuration
//!
//! Config is loaded with a two-layer resolution:
//! 1. An explicit path (`--config` / `SLIPDESK_CONFIG`), or the override in the
//!    data dir (~/.local/share/slipdesk/config.toml)
//! 2. Compiled-in defaults when no file exists
//!
//! Every key is optional; missing keys keep their defaults.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::normalize::KNOWN_RETAILERS;
use crate::ocr::RetryPolicy;

/// Environment variable pointing at a config file
pub const CONFIG_ENV: &str = "SLIPDESK_CONFIG";

/// Worker pool sizes offered for bulk ingestion
pub const ALLOWED_CONCURRENCY: &[usize] = &[1, 3, 5, 10];

/// What the mapper does with a slip that has no date
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MissingDatePolicy {
    /// Fill with today's date and mark the slip's date as inferred
    #[default]
    Today,
    /// Leave the date empty
    Unknown,
}

/// Upper bounds of the fraud risk bands; anything above `high_max` is critical
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskBands {
    pub low_max: f64,
    pub medium_max: f64,
    pub high_max: f64,
}

impl Default for RiskBands {
    fn default() -> Self {
        Self {
            low_max: 0.25,
            medium_max: 0.50,
            high_max: 0.75,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkConfig {
    pub concurrency: usize,
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self { concurrency: 3 }
    }
}

/// AI call pricing and the currency costs are displayed in
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub input_usd_per_million: f64,
    pub output_usd_per_million: f64,
    /// Multiplier from USD to the display currency
    pub display_rate: f64,
    pub display_currency: String,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            input_usd_per_million: 0.10,
            output_usd_per_million: 0.40,
            display_rate: 18.5,
            display_currency: "ZAR".to_string(),
        }
    }
}

impl CostConfig {
    /// USD cost of a call given its token usage
    pub fn call_cost_usd(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 * self.input_usd_per_million
            + output_tokens as f64 * self.output_usd_per_million)
            / 1_000_000.0
    }

    pub fn to_display(&self, usd: f64) -> f64 {
        usd * self.display_rate
    }
}

/// Settings shared by ingestion, scoring and the bulk queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Canonical retailer names accepted for campaigns
    pub approved_retailers: Vec<String>,
    pub freshness_window_days: i64,
    pub risk_bands: RiskBands,
    pub missing_date: MissingDatePolicy,
    pub retry: RetryPolicy,
    pub bulk: BulkConfig,
    pub cost: CostConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            approved_retailers: KNOWN_RETAILERS.iter().map(|s| s.to_string()).collect(),
            freshness_window_days: 7,
            risk_bands: RiskBands::default(),
            missing_date: MissingDatePolicy::default(),
            retry: RetryPolicy::default(),
            bulk: BulkConfig::default(),
            cost: CostConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Load from an explicit path, `SLIPDESK_CONFIG`, or the data-dir override
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .or_else(default_config_path);

        match candidate {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading pipeline config");
                let content = fs::read_to_string(&path).map_err(|e| {
                    Error::Config(format!("Failed to read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&content)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: PipelineConfig = toml::from_str(content)?;
        config.approved_retailers = config
            .approved_retailers
            .iter()
            .map(|r| r.trim().to_uppercase())
            .filter(|r| !r.is_empty())
            .collect();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let b = &self.risk_bands;
        let ordered = 0.0 <= b.low_max && b.low_max <= b.medium_max && b.medium_max <= b.high_max;
        if !ordered || b.high_max > 1.0 {
            return Err(Error::Config(format!(
                "risk_bands must satisfy 0 <= low_max <= medium_max <= high_max <= 1, got {:?}",
                b
            )));
        }
        if self.freshness_window_days < 0 {
            return Err(Error::Config(
                "freshness_window_days must not be negative".into(),
            ));
        }
        if !ALLOWED_CONCURRENCY.contains(&self.bulk.concurrency) {
            return Err(Error::Config(format!(
                "bulk.concurrency must be one of {:?}, got {}",
                ALLOWED_CONCURRENCY, self.bulk.concurrency
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    pub fn is_approved_retailer(&self, retailer: &str) -> bool {
        let retailer = retailer.trim();
        self.approved_retailers
            .iter()
            .any(|r| r.trim().eq_ignore_ascii_case(retailer))
    }
}

/// Default override location in the platform data dir
pub fn default_config_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|d| d.join("slipdesk").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.freshness_window_days, 7);
        assert_eq!(config.bulk.concurrency, 3);
        assert!(config.is_approved_retailer("SPAR"));
        assert!(!config.is_approved_retailer("CORNER CAFE"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_approved_retailer_ignores_case() {
        let config =
            PipelineConfig::from_toml(r#"approved_retailers = ["Pick n Pay", "spar"]"#).unwrap();
        assert!(config.is_approved_retailer("PICK N PAY"));
        assert!(config.is_approved_retailer(" SPAR "));
        assert!(!config.is_approved_retailer("CHECKERS"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = PipelineConfig::from_toml(
            r#"
            approved_retailers = ["spar", " checkers "]
            missing_date = "unknown"

            [bulk]
            concurrency = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.approved_retailers, vec!["SPAR", "CHECKERS"]);
        assert_eq!(config.missing_date, MissingDatePolicy::Unknown);
        assert_eq!(config.bulk.concurrency, 5);
        assert_eq!(config.risk_bands, RiskBands::default());
        assert_eq!(config.cost.display_currency, "ZAR");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(PipelineConfig::from_toml("[bulk]\nconcurrency = 4").is_err());
        assert!(PipelineConfig::from_toml(
            "[risk_bands]\nlow_max = 0.6\nmedium_max = 0.5\nhigh_max = 0.75"
        )
        .is_err());
        assert!(PipelineConfig::from_toml("freshness_window_days = -1").is_err());
        assert!(PipelineConfig::from_toml("approved_retailers = 3").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "freshness_window_days = 14\n").unwrap();

        let config = PipelineConfig::load(Some(&path)).unwrap();
        assert_eq!(config.freshness_window_days, 14);

        let missing = dir.path().join("missing.toml");
        let config = PipelineConfig::load(Some(&missing)).unwrap();
        assert_eq!(config, PipelineConfig::default());
    }

    #[test]
    fn test_cost_conversion() {
        let cost = CostConfig::default();
        let usd = cost.call_cost_usd(1_000_000, 1_000_000);
        assert!((usd - 0.50).abs() < 1e-9);
        assert!((cost.to_display(usd) - 9.25).abs() < 1e-9);
    }
}

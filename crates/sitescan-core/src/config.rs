//! Scan configuration.
//!
//! A [`ScanConfig`] is built once at startup (defaults, then a TOML file, then
//! CLI overrides), validated, and shared read-only as `Arc<ScanConfig>` with
//! every component that needs it. Nothing reads ambient defaults.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::aggregator::MergeStrategy;
use crate::columns::{default_columns, ColumnDefinition, ReportCategory};
use crate::error::{ScanError, ScanResult};
use crate::route::{GroupRoutesKey, DEFAULT_LOCALES};

/// Top-level scan configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Base URL audited routes are resolved against.
    pub site: Option<String>,
    pub scanner: ScannerConfig,
    pub cluster: ClusterConfig,
    pub client: ClientConfig,
    pub audit: AuditConfig,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            site: None,
            scanner: ScannerConfig::default(),
            cluster: ClusterConfig::default(),
            client: ClientConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

/// Route scope and sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Cap on the number of routes that receive tasks.
    pub max_routes: usize,
    /// Fixed per-route sample count. Takes precedence over dynamic sampling.
    pub samples: Option<u32>,
    pub dynamic_sampling: DynamicSamplingConfig,
    /// Per-path sample count overrides.
    pub custom_sampling: BTreeMap<String, u32>,
    /// Skip locale-prefixed paths such as `/fr/about`.
    pub ignore_i18n_pages: bool,
    /// Language codes recognised as locale prefixes.
    pub locales: Vec<String>,
    pub crawler: bool,
    pub sitemap: bool,
    pub robots_txt: bool,
    pub device: Device,
    pub throttle: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_routes: 200,
            samples: None,
            dynamic_sampling: DynamicSamplingConfig::default(),
            custom_sampling: BTreeMap::new(),
            ignore_i18n_pages: true,
            locales: DEFAULT_LOCALES.iter().map(|l| l.to_string()).collect(),
            crawler: true,
            sitemap: true,
            robots_txt: true,
            device: Device::Mobile,
            throttle: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicSamplingConfig {
    pub enabled: bool,
    /// Ceiling on samples per route; small sites get this many.
    pub max: u32,
}

impl Default for DynamicSamplingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Mobile,
    Desktop,
}

/// Worker pool, retry and timeout settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub max_concurrency: usize,
    pub worker_creation_delay_ms: u64,
    pub retry_limit: u32,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
    pub skip_duplicate_urls: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_concurrency(),
            worker_creation_delay_ms: 500,
            retry_limit: 3,
            retry_delay_ms: 2000,
            timeout_ms: 5 * 60 * 1000,
            skip_duplicate_urls: false,
        }
    }
}

impl ClusterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn worker_creation_delay(&self) -> Duration {
        Duration::from_millis(self.worker_creation_delay_ms)
    }
}

/// Each audit drives a full browser, so only half the cores are used.
pub fn default_concurrency() -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    (cpus / 2).max(1)
}

/// Grouping, merging and column layout of the report model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub group_routes_key: GroupRoutesKey,
    pub merge: MergeStrategy,
    pub columns: BTreeMap<ReportCategory, Vec<ColumnDefinition>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            group_routes_key: GroupRoutesKey::default(),
            merge: MergeStrategy::default(),
            columns: default_columns(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub only_categories: Vec<String>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            only_categories: ["performance", "accessibility", "best-practices", "seo"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ScanConfig {
    /// Parse and validate a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> ScanResult<Self> {
        let config: ScanConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> ScanResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ScanError::ConfigRead {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> ScanResult<String> {
        toml::to_string_pretty(self).map_err(|e| ScanError::ConfigParse(e.to_string()))
    }

    /// Reject configurations no scan can run with.
    pub fn validate(&self) -> ScanResult<()> {
        if let Some(site) = &self.site {
            Url::parse(site)
                .map_err(|e| ScanError::configuration("site", format!("{site}: {e}")))?;
        }
        if self.scanner.max_routes == 0 {
            return Err(ScanError::configuration("scanner.max_routes", "must be at least 1"));
        }
        if self.scanner.samples == Some(0) {
            return Err(ScanError::configuration("scanner.samples", "must be at least 1"));
        }
        if self.scanner.dynamic_sampling.max == 0 {
            return Err(ScanError::configuration(
                "scanner.dynamic_sampling.max",
                "must be at least 1",
            ));
        }
        if let Some((path, _)) = self.scanner.custom_sampling.iter().find(|(_, n)| **n == 0) {
            return Err(ScanError::configuration(
                "scanner.custom_sampling",
                format!("sample count for {path} must be at least 1"),
            ));
        }
        if let Some(locale) = self
            .scanner
            .locales
            .iter()
            .find(|l| l.len() != 2 || !l.chars().all(|c| c.is_ascii_alphabetic()))
        {
            return Err(ScanError::configuration(
                "scanner.locales",
                format!("`{locale}` is not a two-letter language code"),
            ));
        }
        if self.cluster.max_concurrency == 0 {
            return Err(ScanError::configuration("cluster.max_concurrency", "must be at least 1"));
        }
        if self.cluster.timeout_ms == 0 {
            return Err(ScanError::configuration("cluster.timeout_ms", "must be greater than 0"));
        }
        for (category, columns) in &self.client.columns {
            for column in columns {
                if column.key.trim().is_empty() {
                    return Err(ScanError::configuration(
                        format!("client.columns.{category}"),
                        format!("column `{}` has an empty metric key", column.label),
                    ));
                }
                if column.cols == 0 {
                    return Err(ScanError::configuration(
                        format!("client.columns.{category}"),
                        format!("column `{}` must span at least one col", column.label),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Absolute URL handed to the audit engine for `path`.
    pub fn audit_url(&self, path: &str) -> String {
        match self.site.as_deref().map(Url::parse) {
            Some(Ok(base)) => base
                .join(path)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| path.to_string()),
            _ => path.to_string(),
        }
    }
}

//! Pipeline configuration, read once per run from TOML.

use martflow_core::fetch::DEFAULT_RESOLVE_ENDPOINT;
use martflow_core::{StoreRole, TableQuery, SALES_BY_YEAR_TABLE};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("cannot parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("cannot serialize config: {0}")]
    Serialize(String),
}

/// Everything a run needs to know. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Base directory for the source file, relative store paths and run reports.
    pub data_dir: PathBuf,

    #[serde(default = "default_source_subdir")]
    pub source_subdir: String,

    #[serde(default = "default_source_file")]
    pub source_file: String,

    /// Public share key the source file is published under.
    pub share_token: String,

    #[serde(default = "default_raw_table")]
    pub raw_table: String,

    #[serde(default = "default_segment_column")]
    pub segment_column: String,

    #[serde(default = "default_corporate_segment")]
    pub corporate_segment: String,

    /// Query against the core store whose first column lists category names.
    #[serde(default = "default_category_query")]
    pub category_query: String,

    pub yearly_mart_query: String,

    #[serde(default = "default_yearly_mart_table")]
    pub yearly_mart_table: String,

    /// Year filtered on by the per-category sub-category marts.
    #[serde(default = "default_mart_year")]
    pub mart_year: i32,

    #[serde(default)]
    pub dates: DatesConfig,

    #[serde(default)]
    pub stores: StoresConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub await_file: AwaitFileConfig,

    /// Core tables in dependency order: parents before the children that
    /// reference them.
    #[serde(default)]
    pub core_tables: Vec<TableQuery>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatesConfig {
    pub columns: Vec<String>,
    /// chrono format of the dates as they arrive in the source file.
    pub input_format: String,
}

impl Default for DatesConfig {
    fn default() -> Self {
        Self {
            columns: vec!["Order Date".to_string(), "Ship Date".to_string()],
            input_format: "%m/%d/%Y".to_string(),
        }
    }
}

/// SQLite files for the three stores. Relative paths resolve against `data_dir`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoresConfig {
    pub raw: PathBuf,
    pub core: PathBuf,
    pub mart: PathBuf,
}

impl Default for StoresConfig {
    fn default() -> Self {
        Self {
            raw: PathBuf::from("stores/raw.sqlite"),
            core: PathBuf::from("stores/core.sqlite"),
            mart: PathBuf::from("stores/mart.sqlite"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FetchConfig {
    pub resolve_endpoint: String,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            resolve_endpoint: DEFAULT_RESOLVE_ENDPOINT.to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    pub retries: u32,
    pub delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 1,
            delay_secs: 60,
        }
    }
}

/// How long to poke for the source file. A zero timeout checks once.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AwaitFileConfig {
    pub timeout_secs: u64,
    pub poke_interval_secs: u64,
}

impl Default for AwaitFileConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            poke_interval_secs: 5,
        }
    }
}

fn default_source_subdir() -> String {
    "supermarket_1".to_string()
}

fn default_source_file() -> String {
    "Sample_Superstore.csv".to_string()
}

fn default_raw_table() -> String {
    "raw_store".to_string()
}

fn default_segment_column() -> String {
    "Segment".to_string()
}

fn default_corporate_segment() -> String {
    "Corporate".to_string()
}

fn default_category_query() -> String {
    "SELECT category_name FROM category".to_string()
}

fn default_yearly_mart_table() -> String {
    SALES_BY_YEAR_TABLE.to_string()
}

fn default_mart_year() -> i32 {
    2015
}

impl PipelineConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("share_token", &self.share_token),
            ("raw_table", &self.raw_table),
            ("source_subdir", &self.source_subdir),
            ("source_file", &self.source_file),
            ("segment_column", &self.segment_column),
            ("corporate_segment", &self.corporate_segment),
            ("category_query", &self.category_query),
            ("yearly_mart_query", &self.yearly_mart_query),
            ("yearly_mart_table", &self.yearly_mart_table),
            ("dates.input_format", &self.dates.input_format),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }

        let mut seen = HashSet::new();
        for table in &self.core_tables {
            if table.name.trim().is_empty() {
                return Err(ConfigError::Invalid("core table with an empty name".into()));
            }
            if table.query.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "core table '{}' has an empty query",
                    table.name
                )));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "core table '{}' is listed twice",
                    table.name
                )));
            }
        }

        if self.await_file.poke_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "await_file.poke_interval_secs must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn source_dir(&self) -> PathBuf {
        self.data_dir.join(&self.source_subdir)
    }

    /// Canonical location of the source file.
    pub fn source_path(&self) -> PathBuf {
        self.source_dir().join(&self.source_file)
    }

    pub fn store_path(&self, role: StoreRole) -> PathBuf {
        let path = match role {
            StoreRole::Raw => &self.stores.raw,
            StoreRole::Core => &self.stores.core,
            StoreRole::Mart => &self.stores.mart,
        };
        if path.is_absolute() {
            path.clone()
        } else {
            self.data_dir.join(path)
        }
    }

    /// Where run reports are written.
    pub fn runs_dir(&self) -> PathBuf {
        self.data_dir.join("runs")
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch.timeout_secs)
    }

    /// BLAKE3 hex digest of the serialized config.
    ///
    /// Two runs with identical settings share a fingerprint.
    pub fn fingerprint(&self) -> Result<String, ConfigError> {
        let json = serde_json::to_vec(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        Ok(blake3::hash(&json).to_hex().to_string())
    }
}

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Pricing and usage persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsageConfig {
    /// JSON pricing overrides merged over the built-in table.
    #[serde(default)]
    pub pricing_file: Option<PathBuf>,

    /// Model whose rates apply to unknown models.
    #[serde(default)]
    pub default_pricing_model: Option<String>,

    /// Append-only JSON-lines log, one object per run.
    #[serde(default = "default_log_path")]
    pub log_path: PathBuf,

    /// Cumulative Markdown table, one row per run.
    #[serde(default = "default_table_path")]
    pub table_path: PathBuf,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            pricing_file: None,
            default_pricing_model: None,
            log_path: default_log_path(),
            table_path: default_table_path(),
        }
    }
}

impl UsageConfig {
    pub(super) fn validate(&self) -> Result<(), String> {
        if self.log_path == self.table_path {
            return Err("usage.log_path and usage.table_path must differ".into());
        }
        Ok(())
    }
}

fn default_log_path() -> PathBuf {
    PathBuf::from("usage_log.jsonl")
}

fn default_table_path() -> PathBuf {
    PathBuf::from("usage_history.md")
}

use std::{
    fs::{File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

const TABLE_HEADER: &str = "| Timestamp | Run | Input Tokens | Output Tokens | Cached Tokens | Cost (USD) |\n\
                            |-----------|-----|-------------:|--------------:|--------------:|-----------:|\n";

#[derive(Debug, thiserror::Error)]
pub enum UsageStoreError {
    #[error("Failed to write {1}: {0}")]
    Io(std::io::Error, PathBuf),

    #[error("Failed to serialize run entry: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed entry in {path} at line {line}: {source}")]
    Malformed {
        path: PathBuf,
        line: usize,
        source: serde_json::Error,
    },
}

/// Aggregate token counts and cost for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunTotals {
    pub total_input: u64,
    pub total_output: u64,
    pub total_cached: u64,
    pub total_cost: f64,
}

/// One line of the usage log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
    pub timestamp: DateTime<Utc>,
    pub run_label: String,
    #[serde(flatten)]
    pub totals: RunTotals,
}

/// Append-only run history: a JSON-lines log plus a Markdown table.
#[derive(Debug, Clone)]
pub struct UsageStore {
    log_path: PathBuf,
    table_path: PathBuf,
}

impl UsageStore {
    pub fn new(log_path: impl Into<PathBuf>, table_path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: log_path.into(),
            table_path: table_path.into(),
        }
    }

    pub fn from_config(config: &crate::config::UsageConfig) -> Self {
        Self::new(&config.log_path, &config.table_path)
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn table_path(&self) -> &Path {
        &self.table_path
    }

    /// Append one run to both files. The table header is written only when
    /// the table file is new or empty.
    pub fn append_run(&self, run_label: &str, totals: &RunTotals) -> Result<(), UsageStoreError> {
        let entry = RunEntry {
            timestamp: Utc::now(),
            run_label: run_label.to_string(),
            totals: *totals,
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');
        append(&self.log_path, line.as_bytes())?;

        let mut row = String::new();
        if is_missing_or_empty(&self.table_path) {
            row.push_str(TABLE_HEADER);
        }
        row.push_str(&format!(
            "| {} | {} | {} | {} | {} | ${:.6} |\n",
            entry.timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
            table_cell(run_label),
            totals.total_input,
            totals.total_output,
            totals.total_cached,
            totals.total_cost,
        ));
        append(&self.table_path, row.as_bytes())?;

        tracing::info!(
            run_label,
            total_cost = totals.total_cost,
            log = %self.log_path.display(),
            "Persisted run usage"
        );
        Ok(())
    }

    /// Read every run from the log. A missing log yields no runs.
    pub fn read_runs(&self) -> Result<Vec<RunEntry>, UsageStoreError> {
        let file = match File::open(&self.log_path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(UsageStoreError::Io(e, self.log_path.clone())),
        };

        let mut runs = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| UsageStoreError::Io(e, self.log_path.clone()))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry =
                serde_json::from_str(&line).map_err(|source| UsageStoreError::Malformed {
                    path: self.log_path.clone(),
                    line: idx + 1,
                    source,
                })?;
            runs.push(entry);
        }
        Ok(runs)
    }

    /// Sum of all logged runs.
    pub fn cumulative(&self) -> Result<RunTotals, UsageStoreError> {
        Ok(self
            .read_runs()?
            .iter()
            .fold(RunTotals::default(), |mut acc, run| {
                acc.total_input += run.totals.total_input;
                acc.total_output += run.totals.total_output;
                acc.total_cached += run.totals.total_cached;
                acc.total_cost += run.totals.total_cost;
                acc
            }))
    }
}

/// Keep a label on one table row: line breaks become spaces, pipes are escaped.
fn table_cell(text: &str) -> String {
    text.replace("\r\n", " ")
        .replace(['\r', '\n'], " ")
        .replace('|', "\\|")
}

fn is_missing_or_empty(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|meta| meta.len() == 0)
        .unwrap_or(true)
}

fn append(path: &Path, bytes: &[u8]) -> Result<(), UsageStoreError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(|e| UsageStoreError::Io(e, path.to_path_buf()))?;
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| UsageStoreError::Io(e, path.to_path_buf()))?;
    file.write_all(bytes)
        .map_err(|e| UsageStoreError::Io(e, path.to_path_buf()))
}

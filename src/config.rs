//! Pipeline configuration (`sheets.yaml`)
//!
//! ```yaml
//! source: data/Unternehmensplanung.xlsx
//! output: outputs/UnternehmensplanungForecast.xlsx
//! mapping_dir: config
//! log_dir: outputs
//! context_file: data/cases.csv
//! overwrite: protect
//! oracle:
//!   model: llama3:8b
//! sheets:
//!   - name: "BS (2)"
//!     forecast_accounts: ["Forderungen aus L+L", "Vorräte"]
//!     readonly_accounts: ["Summe Aktiva"]
//!     account_column: B
//! ```

use crate::error::{OutlookError, OutlookResult};
use crate::excel::{parse_column, MAX_COLS};
use crate::text::FUZZY_THRESHOLD;
use crate::types::{OverwritePolicy, Period};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// Whole-run configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    /// Input workbook, never modified
    pub source: PathBuf,
    /// Output workbook (copy of `source` with forecasts)
    pub output: PathBuf,
    /// Where `<slug>_accounts.csv` mappings live
    #[serde(default = "default_mapping_dir")]
    pub mapping_dir: PathBuf,
    /// Where decision logs, the oracle run log and the manifest go
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// CSV with a `description` column of external context snippets
    #[serde(default)]
    pub context_file: Option<PathBuf>,
    #[serde(default)]
    pub overwrite: OverwritePolicy,
    /// Abort the run on the first failed sheet
    #[serde(default)]
    pub fail_fast: bool,
    #[serde(default)]
    pub oracle: OracleConfig,
    pub sheets: Vec<SheetConfig>,
}

fn default_mapping_dir() -> PathBuf {
    PathBuf::from("config")
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("outputs")
}

/// Connection settings for the local Ollama server
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct OracleConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_model() -> String {
    "llama3:8b".to_string()
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f64 {
    0.4
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_max_attempts() -> u32 {
    2
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// How labels are compared against the configured account lists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierMode {
    /// Normalized set membership; unmatched rows are ignored
    #[default]
    Exact,
    /// Similarity against forecast labels; everything else is read-only
    Fuzzy,
}

/// Where forecast values come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastStrategy {
    /// Ask the oracle, fall back to the baseline
    #[default]
    Oracle,
    /// CAGR baseline only, no oracle calls
    Baseline,
}

/// A column given as a letter (`"B"`) or a 1-based number (`2`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ColumnSpec {
    Index(u32),
    Letter(String),
}

impl ColumnSpec {
    /// 1-based column index, if it exists in a worksheet
    pub fn resolve(&self) -> Option<u32> {
        match self {
            ColumnSpec::Index(i) => (1..=MAX_COLS).contains(i).then_some(*i),
            ColumnSpec::Letter(s) => parse_column(s),
        }
    }
}

/// Per-sheet settings
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    pub name: String,
    #[serde(default)]
    pub forecast_accounts: Vec<String>,
    #[serde(default)]
    pub readonly_accounts: Vec<String>,
    #[serde(default = "default_header_aliases")]
    pub header_aliases: Vec<String>,
    /// Explicit label column; auto-detected when absent
    #[serde(default)]
    pub account_column: Option<ColumnSpec>,
    /// Right bound of the account column auto-detection window
    #[serde(default = "default_max_scan_col")]
    pub max_scan_col: u32,
    #[serde(default)]
    pub classifier: ClassifierMode,
    #[serde(default = "default_fuzzy_threshold")]
    pub fuzzy_threshold: f64,
    #[serde(default)]
    pub strategy: ForecastStrategy,
    /// Reason column; defaults to the column right of t3
    #[serde(default)]
    pub reason_column: Option<ColumnSpec>,
    /// Header texts for periods whose header is not a plain `t0`-style label
    #[serde(default)]
    pub period_headers: BTreeMap<String, String>,
    /// Sheet-level override of the run's overwrite policy
    #[serde(default)]
    pub overwrite: Option<OverwritePolicy>,
}

fn default_header_aliases() -> Vec<String> {
    vec!["t0".to_string()]
}

fn default_max_scan_col() -> u32 {
    15
}

fn default_fuzzy_threshold() -> f64 {
    FUZZY_THRESHOLD
}

impl SheetConfig {
    /// Sheet with default settings and the given forecast labels
    pub fn new(name: impl Into<String>, forecast_accounts: &[&str]) -> Self {
        Self {
            name: name.into(),
            forecast_accounts: forecast_accounts.iter().map(|s| s.to_string()).collect(),
            readonly_accounts: Vec::new(),
            header_aliases: default_header_aliases(),
            account_column: None,
            max_scan_col: default_max_scan_col(),
            classifier: ClassifierMode::default(),
            fuzzy_threshold: default_fuzzy_threshold(),
            strategy: ForecastStrategy::default(),
            reason_column: None,
            period_headers: BTreeMap::new(),
            overwrite: None,
        }
    }

    pub fn with_readonly(mut self, readonly_accounts: &[&str]) -> Self {
        self.readonly_accounts = readonly_accounts.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_classifier(mut self, mode: ClassifierMode) -> Self {
        self.classifier = mode;
        self
    }

    pub fn with_account_column(mut self, column: ColumnSpec) -> Self {
        self.account_column = Some(column);
        self
    }

    /// Period header overrides keyed by parsed period
    pub fn period_header_overrides(&self) -> Vec<(Period, &str)> {
        self.period_headers
            .iter()
            .filter_map(|(label, text)| Period::from_label(label).map(|p| (p, text.as_str())))
            .collect()
    }

    fn validate(&self) -> OutlookResult<()> {
        let fail = |msg: String| Err(OutlookError::Config(format!("sheet '{}': {}", self.name, msg)));

        if self.name.trim().is_empty() {
            return Err(OutlookError::Config("sheet name must not be empty".to_string()));
        }
        if self.forecast_accounts.is_empty() {
            return fail("forecast_accounts is empty".to_string());
        }
        if self.header_aliases.is_empty() {
            return fail("header_aliases is empty".to_string());
        }
        if self.max_scan_col == 0 {
            return fail("max_scan_col must be at least 1".to_string());
        }
        if !(self.fuzzy_threshold > 0.0 && self.fuzzy_threshold <= 1.0) {
            return fail(format!(
                "fuzzy_threshold {} outside (0, 1]",
                self.fuzzy_threshold
            ));
        }
        if let Some(col) = &self.account_column {
            if col.resolve().is_none() {
                return fail(format!("invalid account_column {:?}", col));
            }
        }
        if let Some(col) = &self.reason_column {
            if col.resolve().is_none() {
                return fail(format!("invalid reason_column {:?}", col));
            }
        }
        for label in self.period_headers.keys() {
            if Period::from_label(label).is_none() {
                return fail(format!("unknown period '{}' in period_headers", label));
            }
        }
        Ok(())
    }
}

impl PipelineConfig {
    /// Load a YAML configuration; relative paths resolve against the file's directory.
    pub fn from_file(path: &Path) -> OutlookResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: PipelineConfig = serde_yaml::from_str(&content)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML without touching paths (tests, embedded configs)
    pub fn from_yaml(content: &str) -> OutlookResult<Self> {
        let config: PipelineConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn resolve_paths(&mut self, base: &Path) {
        let join = |p: &PathBuf| {
            if p.is_absolute() {
                p.clone()
            } else {
                base.join(p)
            }
        };
        self.source = join(&self.source);
        self.output = join(&self.output);
        self.mapping_dir = join(&self.mapping_dir);
        self.log_dir = join(&self.log_dir);
        self.context_file = self.context_file.as_ref().map(join);
    }

    pub fn validate(&self) -> OutlookResult<()> {
        if self.sheets.is_empty() {
            return Err(OutlookError::Config("no sheets configured".to_string()));
        }
        if self.source == self.output {
            return Err(OutlookError::Config(
                "output must differ from source, the source workbook is never modified".to_string(),
            ));
        }
        if self.oracle.max_attempts == 0 {
            return Err(OutlookError::Config(
                "oracle.max_attempts must be at least 1".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for sheet in &self.sheets {
            if !seen.insert(sheet.name.as_str()) {
                return Err(OutlookError::Config(format!(
                    "sheet '{}' configured twice",
                    sheet.name
                )));
            }
            sheet.validate()?;
        }
        Ok(())
    }

    /// Effective overwrite policy for a sheet
    pub fn overwrite_for(&self, sheet: &SheetConfig) -> OverwritePolicy {
        sheet.overwrite.unwrap_or(self.overwrite)
    }

    pub fn sheet(&self, name: &str) -> Option<&SheetConfig> {
        self.sheets.iter().find(|s| s.name == name)
    }

    /// Oracle run log path
    pub fn run_log_path(&self) -> PathBuf {
        self.log_dir.join("llm_debug.txt")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.log_dir.join("run_manifest.json")
    }
}

//! Account classification and the persisted `<slug>_accounts.csv` mapping

use crate::config::{ClassifierMode, SheetConfig};
use crate::error::{OutlookError, OutlookResult};
use crate::excel::locator::SheetLayout;
use crate::excel::Worksheet;
use crate::text::{matches_any, normalize, slug};
use crate::types::{AccountMapping, AccountRow, Category};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

/// CSV record of one classified row
#[derive(Debug, Serialize, Deserialize)]
struct MappingRecord {
    row: u32,
    text: String,
    #[serde(default)]
    category: String,
}

/// Classifies label texts against one sheet's configured account lists
pub struct AccountClassifier {
    mode: ClassifierMode,
    threshold: f64,
    forecast_keys: Vec<String>,
    readonly_keys: HashSet<String>,
}

impl AccountClassifier {
    pub fn new(config: &SheetConfig) -> Self {
        Self {
            mode: config.classifier,
            threshold: config.fuzzy_threshold,
            forecast_keys: config.forecast_accounts.iter().map(|s| normalize(s)).collect(),
            readonly_keys: config.readonly_accounts.iter().map(|s| normalize(s)).collect(),
        }
    }

    /// Category of a single label.
    ///
    /// Exact mode: set membership of the normalized key, forecast before read-only, else none.
    /// Fuzzy mode: forecast at or above the threshold, read-only otherwise.
    pub fn classify(&self, label: &str) -> Category {
        let key = normalize(label);
        match self.mode {
            ClassifierMode::Exact => {
                if self.forecast_keys.contains(&key) {
                    Category::Forecast
                } else if self.readonly_keys.contains(&key) {
                    Category::Readonly
                } else {
                    Category::None
                }
            }
            ClassifierMode::Fuzzy => {
                if matches_any(&key, &self.forecast_keys, self.threshold) {
                    Category::Forecast
                } else {
                    Category::Readonly
                }
            }
        }
    }
}

/// Classify every labeled row below the header.
///
/// Each row with label text in the account column appears exactly once, including rows that
/// match nothing (category none).
pub fn discover(sheet: &Worksheet, config: &SheetConfig) -> OutlookResult<AccountMapping> {
    let layout = SheetLayout::resolve(sheet, config, &[])?;
    let classifier = AccountClassifier::new(config);

    let mapping: AccountMapping = (layout.header_row + 1..=sheet.max_row())
        .filter_map(|row| {
            sheet
                .cell(row, layout.account_column)
                .as_label()
                .map(|text| AccountRow {
                    row,
                    text: text.to_string(),
                    category: classifier.classify(text),
                })
        })
        .collect();

    info!(
        sheet = %config.name,
        rows = mapping.len(),
        forecast = mapping.count(Category::Forecast),
        readonly = mapping.count(Category::Readonly),
        "accounts classified"
    );
    Ok(mapping)
}

/// Location of a sheet's mapping file inside `mapping_dir`
pub fn mapping_path(mapping_dir: &Path, sheet_name: &str) -> PathBuf {
    mapping_dir.join(format!("{}_accounts.csv", slug(sheet_name)))
}

/// Persist a mapping as CSV with columns `row,text,category`
pub fn save_mapping(path: &Path, mapping: &AccountMapping) -> OutlookResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    for account in mapping.rows() {
        writer.serialize(MappingRecord {
            row: account.row,
            text: account.text.clone(),
            category: account.category.as_str().to_string(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// Read a mapping written by [`save_mapping`] (categories are trimmed and case-insensitive)
pub fn load_mapping(path: &Path) -> OutlookResult<AccountMapping> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut mapping = AccountMapping::new();
    for record in reader.deserialize() {
        let record: MappingRecord = record?;
        mapping.insert(AccountRow {
            row: record.row,
            text: record.text,
            category: Category::parse(&record.category),
        });
    }
    Ok(mapping)
}

/// Load the mapping of `sheet_name`, reporting a missing file as a sheet-level error
pub fn load_sheet_mapping(mapping_dir: &Path, sheet_name: &str) -> OutlookResult<AccountMapping> {
    let path = mapping_path(mapping_dir, sheet_name);
    if !path.exists() {
        return Err(OutlookError::MappingMissing {
            sheet: sheet_name.to_string(),
            path: path.display().to_string(),
        });
    }
    load_mapping(&path)
}

/// Classify a sheet and persist the result; returns the mapping and where it was written
pub fn discover_and_save(
    sheet: &Worksheet,
    config: &SheetConfig,
    mapping_dir: &Path,
) -> OutlookResult<(AccountMapping, PathBuf)> {
    let mapping = discover(sheet, config)?;
    let path = mapping_path(mapping_dir, &config.name);
    save_mapping(&path, &mapping)?;
    Ok((mapping, path))
}

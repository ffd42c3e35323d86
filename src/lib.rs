//! Outlook - three-period forecasts for spreadsheet planning models
//!
//! This library locates period columns in planning sheets, classifies account rows,
//! forecasts t1..t3 through a CAGR baseline or a language-model oracle, and writes the results
//! into a copy of the workbook without disturbing formulas or unrelated cells.
//!
//! # Features
//!
//! - Header and period column discovery (`t-2` … `t3`) in arbitrarily formatted sheets
//! - Exact or fuzzy account classification, persisted per sheet as CSV
//! - Oracle adapter with retry and a baseline fallback that never fails
//! - In-place .xlsx cell patching: untouched cells and parts stay byte-identical
//!
//! # Example
//!
//! ```no_run
//! use royalbit_outlook::config::PipelineConfig;
//! use royalbit_outlook::core::{build_advisor, discover_all, Pipeline};
//! use std::path::Path;
//!
//! let config = PipelineConfig::from_file(Path::new("config/sheets.yaml"))?;
//! discover_all(&config)?;
//!
//! let advisor = build_advisor(&config, true)?;
//! let manifest = Pipeline::new(&config, &advisor).run()?;
//! println!("{} cells written", manifest.cells_written);
//! # Ok::<(), royalbit_outlook::error::OutlookError>(())
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod excel;
pub mod text;
pub mod types;

// Re-export commonly used types
pub use error::{OutlookError, OutlookResult};
pub use types::{
    AccountMapping, AccountRow, Category, CellValue, ForecastOrigin, ForecastResult,
    HistoricalTriple, OverwritePolicy, Period, PeriodColumnMap,
};

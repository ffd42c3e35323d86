//! Forecasting engine
//!
//! - [`classifier`]: label rows → forecast / read-only / none, persisted per sheet
//! - [`baseline`]: CAGR projection used directly or as the oracle fallback
//! - [`oracle`]: prompt, oracle call, response parsing, retry and fallback
//! - [`writer`]: per-row state machine writing one sheet
//! - [`pipeline`]: runs every configured sheet against one working copy

pub mod baseline;
pub mod classifier;
pub mod oracle;
pub mod pipeline;
pub mod writer;

pub use classifier::{discover, load_mapping, mapping_path, save_mapping, AccountClassifier};
pub use oracle::{
    parse_forecast_response, ForecastAdvisor, ForecastOracle, ForecastParseError, OllamaOracle,
    OracleError, RunLog, UnavailableOracle,
};
pub use pipeline::{build_advisor, discover_all, Pipeline, RunManifest, SheetStatus};
pub use writer::{RowOutcome, SheetReport, SheetWriter, SkipReason};

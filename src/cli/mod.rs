//! CLI command handlers

pub mod commands;

pub use commands::{check, discover, forecast, parse_row_range, scan, ForecastOptions};

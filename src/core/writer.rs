//! Sheet writer: classify → read history → forecast → write, one row at a time
//!
//! Every mapped row ends in exactly one [`RowOutcome`]. A row never aborts the sheet; only
//! sheet-level configuration problems (header, periods, account column) do.

use super::baseline::{baseline_result, baseline_values};
use super::oracle::ForecastAdvisor;
use crate::config::{ForecastStrategy, SheetConfig};
use crate::error::{OutlookError, OutlookResult};
use crate::excel::locator::{SheetLayout, REQUIRED_PERIODS};
use crate::excel::{
    cell_ref, column_letter, CellWrite, CellWriteError, WorkbookPatcher, Worksheet,
};
use crate::text::{normalize, slug};
use crate::types::{
    AccountMapping, AccountRow, Category, ForecastOrigin, ForecastResult, HistoricalTriple,
    OverwritePolicy, Period,
};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Why a mapped row was left alone
#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    /// Classified as read-only or unmatched
    Category(Category),
    /// The snapshot label no longer matches the mapping; rerun discovery
    StaleMapping { expected: String, found: String },
    /// Every destination cell is protected by the overwrite policy
    Protected,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Category(c) => write!(f, "category {}", c),
            SkipReason::StaleMapping { expected, found } => {
                write!(f, "stale mapping (expected {:?}, found {:?})", expected, found)
            }
            SkipReason::Protected => f.write_str("all destination cells protected"),
        }
    }
}

/// Final state of one row
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Skip(SkipReason),
    /// `t0` is empty or not a number
    MissingData,
    Forecasted {
        cells_written: usize,
        protected: usize,
        origin: ForecastOrigin,
    },
    WriteError(CellWriteError),
}

/// One row's decision, kept for the report
#[derive(Debug, Clone, PartialEq)]
pub struct RowDecision {
    pub row: u32,
    pub label: String,
    pub outcome: RowOutcome,
}

/// What a sheet writer did
#[derive(Debug, Clone, Default, Serialize)]
pub struct SheetReport {
    pub sheet: String,
    pub cells_written: usize,
    pub forecasted: usize,
    pub skipped: usize,
    pub missing_data: usize,
    pub write_errors: usize,
    pub protected_cells: usize,
    #[serde(skip)]
    pub decisions: Vec<RowDecision>,
    #[serde(skip)]
    pub log: Vec<String>,
}

impl SheetReport {
    fn new(sheet: &str) -> Self {
        Self {
            sheet: sheet.to_string(),
            ..Default::default()
        }
    }

    /// Report of a sheet that could not be processed; its log holds only the error
    pub fn failed(sheet: &str, error: &OutlookError) -> Self {
        let mut report = Self::new(sheet);
        report.log.push(format!("Sheet {} | ERROR: {}", sheet, error));
        report
    }

    fn record(&mut self, row: u32, label: &str, outcome: RowOutcome) {
        match &outcome {
            RowOutcome::Skip(_) => self.skipped += 1,
            RowOutcome::MissingData => self.missing_data += 1,
            RowOutcome::Forecasted {
                cells_written,
                protected,
                ..
            } => {
                self.forecasted += 1;
                self.cells_written += cells_written;
                self.protected_cells += protected;
            }
            RowOutcome::WriteError(_) => self.write_errors += 1,
        }
        self.decisions.push(RowDecision {
            row,
            label: label.to_string(),
            outcome,
        });
    }

    /// Rows that were meant to be forecast but were not
    pub fn has_row_failures(&self) -> bool {
        self.missing_data > 0 || self.write_errors > 0
    }

    pub fn outcome(&self, row: u32) -> Option<&RowOutcome> {
        self.decisions
            .iter()
            .find(|d| d.row == row)
            .map(|d| &d.outcome)
    }

    /// Persist the decision log as `<slug>_debug.txt` in `dir`
    pub fn write_log(&self, dir: &Path) -> OutlookResult<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}_debug.txt", slug(&self.sheet)));
        let mut content = self.log.join("\n");
        content.push('\n');
        fs::write(&path, content)?;
        Ok(path)
    }
}

fn fmt_amount(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{:.2}", v))
}

/// Forecast writer for one configured sheet
pub struct SheetWriter<'a> {
    config: &'a SheetConfig,
    policy: OverwritePolicy,
    advisor: &'a ForecastAdvisor,
}

impl<'a> SheetWriter<'a> {
    pub fn new(
        config: &'a SheetConfig,
        policy: OverwritePolicy,
        advisor: &'a ForecastAdvisor,
    ) -> Self {
        Self {
            config,
            policy,
            advisor,
        }
    }

    /// Forecast every mapped row of the sheet.
    ///
    /// History comes from `snapshot` (cached values); destination cells are checked and staged
    /// on `patcher`, the working copy.
    pub fn run(
        &self,
        snapshot: &Worksheet,
        mapping: &AccountMapping,
        patcher: &mut WorkbookPatcher,
    ) -> OutlookResult<SheetReport> {
        let name = self.config.name.as_str();
        let layout = SheetLayout::resolve(snapshot, self.config, &REQUIRED_PERIODS)?;
        // make sure the working copy has the sheet before touching rows
        patcher.sheet(name)?;

        let mut report = SheetReport::new(name);
        report.log.push(format!(
            "Sheet {} | header row {} | {} | accounts in {} | policy {}",
            name,
            layout.header_row,
            layout.columns,
            column_letter(layout.account_column),
            self.policy
        ));
        for period in &layout.inferred {
            let col = layout.columns.get(*period).map(column_letter).unwrap_or_default();
            warn!(
                sheet = %name,
                period = %period,
                column = %col,
                "history header missing, using position"
            );
            report
                .log
                .push(format!("No {} header: reading column {} (left of t0)", period, col));
        }

        let reason_col = self.reason_column(&layout)?;
        for account in mapping.rows() {
            let outcome =
                self.process_row(snapshot, &layout, reason_col, account, patcher, &mut report.log)?;
            report.record(account.row, &account.text, outcome);
        }

        report.log.push(format!("TOTAL writes: {}", report.cells_written));
        info!(
            sheet = %name,
            cells = report.cells_written,
            forecasted = report.forecasted,
            skipped = report.skipped,
            missing = report.missing_data,
            errors = report.write_errors,
            "sheet written"
        );
        Ok(report)
    }

    /// Configured reason column, else the column right of t3
    fn reason_column(&self, layout: &SheetLayout) -> OutlookResult<u32> {
        if let Some(col) = self.config.reason_column.as_ref().and_then(|c| c.resolve()) {
            return Ok(col);
        }
        layout
            .columns
            .get(Period::T3)
            .map(|c| c + 1)
            .ok_or_else(|| OutlookError::MissingPeriods {
                sheet: self.config.name.clone(),
                missing: vec![Period::T3.label().to_string()],
            })
    }

    fn process_row(
        &self,
        snapshot: &Worksheet,
        layout: &SheetLayout,
        reason_col: u32,
        account: &AccountRow,
        patcher: &mut WorkbookPatcher,
        log: &mut Vec<String>,
    ) -> OutlookResult<RowOutcome> {
        let row = account.row;
        let name = self.config.name.as_str();

        if account.category != Category::Forecast {
            let reason = SkipReason::Category(account.category);
            log.push(format!("Skip row {}: {}", row, reason));
            return Ok(RowOutcome::Skip(reason));
        }

        let found = snapshot
            .cell(row, layout.account_column)
            .as_label()
            .unwrap_or_default();
        if normalize(found) != normalize(&account.text) {
            let reason = SkipReason::StaleMapping {
                expected: account.text.clone(),
                found: found.to_string(),
            };
            warn!(sheet = %name, row, "{}", reason);
            log.push(format!("Skip row {}: {}", row, reason));
            return Ok(RowOutcome::Skip(reason));
        }

        let amount = |period: Period| {
            layout
                .columns
                .get(period)
                .and_then(|col| snapshot.cell(row, col).as_amount())
        };
        let t_minus_2 = amount(Period::TMinus2);
        let t_minus_1 = amount(Period::TMinus1);
        let Some(t_zero) = amount(Period::T0) else {
            log.push(format!("Skip row {}: t0 missing ({})", row, account.text));
            return Ok(RowOutcome::MissingData);
        };
        let history = HistoricalTriple::new(t_minus_2, t_minus_1, t_zero);

        // destination cells the policy lets us write
        let mut protected = 0;
        let mut value_cols = Vec::with_capacity(3);
        let working = patcher.sheet(name)?;
        for (idx, period) in Period::FORECAST.iter().enumerate() {
            let Some(col) = layout.columns.get(*period) else {
                continue;
            };
            let existing = working.cell(row, col);
            if self.policy.may_overwrite_value(existing) {
                value_cols.push((idx, col));
            } else {
                protected += 1;
                log.push(format!(
                    "Row {}: {} protected ({})",
                    row,
                    cell_ref(row, col),
                    existing
                ));
            }
        }
        let reason_writable = self.policy.may_overwrite_reason(working.cell(row, reason_col));

        if value_cols.is_empty() && !reason_writable {
            log.push(format!("Skip row {}: {}", row, SkipReason::Protected));
            return Ok(RowOutcome::Skip(SkipReason::Protected));
        }

        let forecast = self.forecast(&account.text, &history);
        let values = forecast.values();

        let mut writes: Vec<(u32, CellWrite)> = value_cols
            .iter()
            .map(|(idx, col)| (*col, CellWrite::Number(values[*idx])))
            .collect();
        if reason_writable {
            writes.push((reason_col, CellWrite::Text(forecast.reason.clone())));
        }

        if let Err(e) = writes
            .iter()
            .try_for_each(|(col, write)| patcher.check(name, row, *col, write))
        {
            warn!(sheet = %name, row, error = %e, "row not written");
            log.push(format!("WRITE ERROR row {}: {}", row, e));
            return Ok(RowOutcome::WriteError(e));
        }
        for (col, write) in writes.iter().cloned() {
            if let Err(e) = patcher.stage(name, row, col, write) {
                log.push(format!("WRITE ERROR row {}: {}", row, e));
                return Ok(RowOutcome::WriteError(e));
            }
        }

        log.push(format!(
            "ROW {} | {} | t-2={} t-1={} t0={:.2} -> t1={:.2} t2={:.2} t3={:.2} [{}] | {}",
            row,
            account.text,
            fmt_amount(t_minus_2),
            fmt_amount(t_minus_1),
            t_zero,
            forecast.t1,
            forecast.t2,
            forecast.t3,
            forecast.origin,
            forecast.reason
        ));
        debug!(sheet = %name, row, origin = %forecast.origin, cells = writes.len(), "row forecast");

        Ok(RowOutcome::Forecasted {
            cells_written: writes.len(),
            protected,
            origin: forecast.origin,
        })
    }

    fn forecast(&self, account: &str, history: &HistoricalTriple) -> ForecastResult {
        match self.config.strategy {
            ForecastStrategy::Baseline => baseline_result(account, history, None),
            ForecastStrategy::Oracle => {
                let baseline = baseline_values(history);
                self.advisor.explain(account, history, Some(&baseline))
            }
        }
    }
}

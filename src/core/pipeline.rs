//! Pipeline orchestration: copy → discover/load mappings → write every sheet → save once

use super::classifier::{discover_and_save, load_sheet_mapping};
use super::oracle::{load_contexts, ForecastAdvisor, OllamaOracle, RunLog, UnavailableOracle};
use super::writer::{SheetReport, SheetWriter};
use crate::config::{PipelineConfig, SheetConfig};
use crate::error::{OutlookError, OutlookResult};
use crate::excel::{CellView, Workbook, WorkbookPatcher};
use crate::types::{AccountMapping, Category};
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Per-sheet result in the run manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SheetStatus {
    /// Every forecast row was written (or deliberately skipped)
    Success,
    /// At least one row had missing data or a write error
    Partial,
    /// The sheet could not be processed at all
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SheetOutcome {
    pub sheet: String,
    pub status: SheetStatus,
    pub cells_written: usize,
    pub forecasted: usize,
    pub skipped: usize,
    pub missing_data: usize,
    pub write_errors: usize,
    pub protected_cells: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

impl SheetOutcome {
    fn from_report(report: &SheetReport, log_file: Option<PathBuf>) -> Self {
        Self {
            sheet: report.sheet.clone(),
            status: if report.has_row_failures() {
                SheetStatus::Partial
            } else {
                SheetStatus::Success
            },
            cells_written: report.cells_written,
            forecasted: report.forecasted,
            skipped: report.skipped,
            missing_data: report.missing_data,
            write_errors: report.write_errors,
            protected_cells: report.protected_cells,
            error: None,
            log_file,
        }
    }

    fn failed(sheet: &str, err: &OutlookError, log_file: Option<PathBuf>) -> Self {
        Self {
            sheet: sheet.to_string(),
            status: SheetStatus::Failed,
            cells_written: 0,
            forecasted: 0,
            skipped: 0,
            missing_data: 0,
            write_errors: 0,
            protected_cells: 0,
            error: Some(err.to_string()),
            log_file,
        }
    }
}

/// Written as `run_manifest.json` after every run
#[derive(Debug, Clone, Serialize)]
pub struct RunManifest {
    pub started_at: String,
    pub finished_at: String,
    pub source: PathBuf,
    pub output: PathBuf,
    pub oracle: String,
    pub cells_written: usize,
    /// False when `fail_fast` stopped the run before saving
    pub saved: bool,
    pub sheets: Vec<SheetOutcome>,
}

impl RunManifest {
    pub fn count(&self, status: SheetStatus) -> usize {
        self.sheets.iter().filter(|s| s.status == status).count()
    }
}

/// Oracle adapter for a run: Ollama (or offline), context snippets, and the run log
pub fn build_advisor(config: &PipelineConfig, offline: bool) -> OutlookResult<ForecastAdvisor> {
    let contexts = match &config.context_file {
        Some(path) => load_contexts(path)?,
        None => Vec::new(),
    };
    let advisor = if offline {
        ForecastAdvisor::new(Box::new(UnavailableOracle), contexts, 1)
    } else {
        ForecastAdvisor::new(
            Box::new(OllamaOracle::new(&config.oracle)?),
            contexts,
            config.oracle.max_attempts,
        )
    };
    let log = RunLog::start(&config.run_log_path(), advisor.oracle_name())?;
    Ok(advisor.with_run_log(log))
}

/// Result of classifying one sheet
#[derive(Debug)]
pub struct Discovery {
    pub sheet: String,
    pub result: OutlookResult<(AccountMapping, PathBuf)>,
}

impl Discovery {
    pub fn forecast_rows(&self) -> usize {
        self.result
            .as_ref()
            .map_or(0, |(m, _)| m.count(Category::Forecast))
    }
}

/// Classify every configured sheet of the source workbook and persist the mappings.
///
/// A sheet that cannot be classified is reported, not fatal.
pub fn discover_all(config: &PipelineConfig) -> OutlookResult<Vec<Discovery>> {
    let snapshot = Workbook::open(&config.source, CellView::Values)?;
    Ok(config
        .sheets
        .iter()
        .map(|sheet| {
            let result = snapshot
                .sheet(&sheet.name)
                .and_then(|ws| discover_and_save(ws, sheet, &config.mapping_dir));
            if let Err(e) = &result {
                warn!(sheet = %sheet.name, error = %e, "discovery failed");
            }
            Discovery {
                sheet: sheet.name.clone(),
                result,
            }
        })
        .collect())
}

/// Runs all sheet writers against one working copy
pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    advisor: &'a ForecastAdvisor,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, advisor: &'a ForecastAdvisor) -> Self {
        Self { config, advisor }
    }

    /// Copy the source, forecast every sheet in order, save, write the manifest.
    ///
    /// Sheet failures are collected in the manifest. With `fail_fast` the first failure aborts
    /// the run before saving; the manifest is still written.
    pub fn run(&self) -> OutlookResult<RunManifest> {
        let started_at = chrono::Local::now().to_rfc3339();
        let config = self.config;

        if let Some(parent) = config.output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&config.source, &config.output)?;
        info!(
            source = %config.source.display(),
            output = %config.output.display(),
            "working copy created"
        );

        let snapshot = Workbook::open(&config.source, CellView::Values)?;
        let mut patcher = WorkbookPatcher::open(&config.output)?;

        let mut manifest = RunManifest {
            started_at,
            finished_at: String::new(),
            source: config.source.clone(),
            output: config.output.clone(),
            oracle: self.advisor.oracle_name().to_string(),
            cells_written: 0,
            saved: false,
            sheets: Vec::with_capacity(config.sheets.len()),
        };

        for sheet in &config.sheets {
            match self.run_sheet(sheet, &snapshot, &mut patcher) {
                Ok(report) => {
                    let log_file = self.write_sheet_log(&report);
                    manifest
                        .sheets
                        .push(SheetOutcome::from_report(&report, log_file));
                }
                Err(e) => {
                    if e.is_sheet_config_error() {
                        warn!(sheet = %sheet.name, error = %e, "sheet skipped");
                    } else {
                        error!(sheet = %sheet.name, error = %e, "sheet failed");
                    }
                    let log_file = self.write_sheet_log(&SheetReport::failed(&sheet.name, &e));
                    manifest
                        .sheets
                        .push(SheetOutcome::failed(&sheet.name, &e, log_file));
                    if config.fail_fast {
                        self.finish(&mut manifest)?;
                        return Err(OutlookError::RunAborted {
                            sheet: sheet.name.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }

        manifest.cells_written = patcher.save()?;
        manifest.saved = true;
        self.finish(&mut manifest)?;
        info!(
            cells = manifest.cells_written,
            failed = manifest.count(SheetStatus::Failed),
            "run complete"
        );
        Ok(manifest)
    }

    fn run_sheet(
        &self,
        sheet: &SheetConfig,
        snapshot: &Workbook,
        patcher: &mut WorkbookPatcher,
    ) -> OutlookResult<SheetReport> {
        let worksheet = snapshot.sheet(&sheet.name)?;
        let mapping = load_sheet_mapping(&self.config.mapping_dir, &sheet.name)?;
        let policy = self.config.overwrite_for(sheet);
        SheetWriter::new(sheet, policy, self.advisor).run(worksheet, &mapping, patcher)
    }

    /// Decision log of one sheet; a log that cannot be written is reported, not fatal
    fn write_sheet_log(&self, report: &SheetReport) -> Option<PathBuf> {
        match report.write_log(&self.config.log_dir) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!(sheet = %report.sheet, error = %e, "cannot write decision log");
                None
            }
        }
    }

    fn finish(&self, manifest: &mut RunManifest) -> OutlookResult<()> {
        manifest.finished_at = chrono::Local::now().to_rfc3339();
        let path = self.config.manifest_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, serde_json::to_string_pretty(manifest)?)?;
        Ok(())
    }
}

use crate::config::PipelineConfig;
use crate::core::classifier::mapping_path;
use crate::core::pipeline::{build_advisor, discover_all, Discovery, Pipeline};
use crate::core::{RunManifest, SheetStatus};
use crate::error::{OutlookError, OutlookResult};
use crate::excel::locator::{scan_text_columns, SheetLayout, REQUIRED_PERIODS};
use crate::excel::{column_letter, CellView, Workbook};
use crate::types::Category;
use colored::Colorize;
use std::path::Path;

/// Values shown per column by `scan`
const SCAN_SAMPLE: usize = 10;

/// Oracle overrides from flags or `OLLAMA_*` variables
#[derive(Debug, Clone, Default)]
pub struct ForecastOptions {
    pub discover: bool,
    pub offline: bool,
    pub model: Option<String>,
    pub url: Option<String>,
    pub temperature: Option<f64>,
}

impl ForecastOptions {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(model) = &self.model {
            config.oracle.model = model.clone();
        }
        if let Some(url) = &self.url {
            config.oracle.base_url = url.clone();
        }
        if let Some(temperature) = self.temperature {
            config.oracle.temperature = temperature;
        }
    }
}

/// Parse `--rows 3..40` (inclusive)
pub fn parse_row_range(s: &str) -> Result<(u32, u32), String> {
    let (first, last) = s
        .split_once("..")
        .ok_or_else(|| format!("expected FIRST..LAST, got '{}'", s))?;
    let first: u32 = first
        .trim()
        .parse()
        .map_err(|_| format!("invalid first row '{}'", first))?;
    let last: u32 = last
        .trim()
        .parse()
        .map_err(|_| format!("invalid last row '{}'", last))?;
    if first == 0 || last < first {
        return Err(format!("empty row range {}..{}", first, last));
    }
    Ok((first, last))
}

fn print_discoveries(discoveries: &[Discovery]) {
    for d in discoveries {
        match &d.result {
            Ok((mapping, path)) => println!(
                "   {} {}: {} rows ({} forecast, {} read-only) → {}",
                "✅".green(),
                d.sheet.bright_blue().bold(),
                mapping.len(),
                d.forecast_rows().to_string().bold(),
                mapping.count(Category::Readonly),
                path.display()
            ),
            Err(e) => println!("   {} {}: {}", "❌".red(), d.sheet.bright_blue().bold(), e),
        }
    }
}

/// Execute the discover command
pub fn discover(config_path: &Path) -> OutlookResult<()> {
    println!("{}", "🔎 Outlook - Discovering accounts".bold().green());
    println!("   Config: {}\n", config_path.display());

    let config = PipelineConfig::from_file(config_path)?;
    println!("   Source: {}", config.source.display());
    println!("   Mappings: {}\n", config.mapping_dir.display());

    let discoveries = discover_all(&config)?;
    print_discoveries(&discoveries);

    let failed = discoveries.iter().filter(|d| d.result.is_err()).count();
    println!();
    if failed > 0 {
        println!(
            "{}",
            format!("⚠️  {} of {} sheets not classified", failed, discoveries.len()).yellow()
        );
    } else {
        println!("{}", "✅ All sheets classified".bold().green());
    }
    Ok(())
}

fn print_manifest(manifest: &RunManifest) {
    println!("{}", "📊 Sheets:".bold().cyan());
    for sheet in &manifest.sheets {
        let icon = match sheet.status {
            SheetStatus::Success => "✅".green(),
            SheetStatus::Partial => "⚠️ ".yellow(),
            SheetStatus::Failed => "❌".red(),
        };
        match &sheet.error {
            Some(err) => println!("   {} {}: {}", icon, sheet.sheet.bright_blue().bold(), err),
            None => println!(
                "   {} {}: {} cells, {} forecast rows, {} skipped, {} missing t0, {} write errors",
                icon,
                sheet.sheet.bright_blue().bold(),
                sheet.cells_written.to_string().bold(),
                sheet.forecasted,
                sheet.skipped,
                sheet.missing_data,
                sheet.write_errors
            ),
        }
    }
    println!();
}

/// Execute the forecast command
pub fn forecast(config_path: &Path, options: ForecastOptions) -> OutlookResult<()> {
    println!("{}", "📈 Outlook - Forecasting t1..t3".bold().green());
    println!("   Config: {}", config_path.display());

    let mut config = PipelineConfig::from_file(config_path)?;
    options.apply(&mut config);
    println!("   Source: {}", config.source.display());
    println!("   Output: {}", config.output.display());
    if options.offline {
        println!("   Oracle: {}", "offline (CAGR baseline)".yellow());
    } else {
        println!(
            "   Oracle: {} @ {}",
            config.oracle.model.bright_yellow(),
            config.oracle.base_url
        );
    }
    println!();

    if options.discover {
        println!("{}", "🔎 Discovering accounts...".cyan());
        print_discoveries(&discover_all(&config)?);
        println!();
    }

    let advisor = build_advisor(&config, options.offline)?;
    let manifest = Pipeline::new(&config, &advisor).run()?;
    print_manifest(&manifest);

    println!(
        "{}",
        format!(
            "✅ {} cells written → {}",
            manifest.cells_written,
            manifest.output.display()
        )
        .bold()
        .green()
    );
    println!("   Logs: {}", config.log_dir.display());
    if manifest.count(SheetStatus::Failed) > 0 {
        println!(
            "{}",
            format!(
                "⚠️  {} sheet(s) failed, see run_manifest.json",
                manifest.count(SheetStatus::Failed)
            )
            .yellow()
        );
    }
    Ok(())
}

/// Execute the scan command
pub fn scan(workbook: &Path, sheet: &str, rows: (u32, u32), max_col: u32) -> OutlookResult<()> {
    println!("{}", "🧭 Outlook - Column scan".bold().green());
    println!("   File: {}", workbook.display());
    println!("   Sheet: {}", sheet.bright_blue().bold());
    println!("   Rows: {}..{}\n", rows.0, rows.1);

    let book = Workbook::open(workbook, CellView::Values)?;
    let ws = book.sheet(sheet)?;
    let columns = scan_text_columns(ws, rows.0, rows.1, max_col, SCAN_SAMPLE);

    if columns.is_empty() {
        println!("{}", "   No text found in the scanned window".yellow());
        return Ok(());
    }
    for (col, values) in columns {
        println!("   {} {}", column_letter(col).bold().cyan(), values.join(" | "));
    }
    Ok(())
}

/// Execute the check command
pub fn check(config_path: &Path) -> OutlookResult<()> {
    println!("{}", "🩺 Outlook - Checking configuration".bold().green());
    println!("   Config: {}\n", config_path.display());

    let config = PipelineConfig::from_file(config_path)?;
    println!("   {} configuration valid ({} sheets)", "✅".green(), config.sheets.len());
    println!("   Overwrite policy: {}\n", config.overwrite);

    let snapshot = Workbook::open(&config.source, CellView::Values)?;
    let mut failures = 0;
    for sheet in &config.sheets {
        let layout = snapshot
            .sheet(&sheet.name)
            .and_then(|ws| SheetLayout::resolve(ws, sheet, &REQUIRED_PERIODS));
        match layout {
            Ok(layout) => {
                println!(
                    "   {} {}: header row {}, {}, accounts in {}",
                    "✅".green(),
                    sheet.name.bright_blue().bold(),
                    layout.header_row,
                    layout.columns,
                    column_letter(layout.account_column)
                );
                let path = mapping_path(&config.mapping_dir, &sheet.name);
                if !path.exists() {
                    println!(
                        "      {}",
                        format!("mapping {} missing, run `outlook discover`", path.display())
                            .yellow()
                    );
                }
            }
            Err(e) => {
                failures += 1;
                println!("   {} {}: {}", "❌".red(), sheet.name.bright_blue().bold(), e);
            }
        }
    }
    println!();

    if failures > 0 {
        return Err(OutlookError::Config(format!(
            "{} of {} sheets failed the layout check",
            failures,
            config.sheets.len()
        )));
    }
    println!("{}", "✅ All sheets resolved".bold().green());
    Ok(())
}

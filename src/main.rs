use clap::{Parser, Subcommand};
use royalbit_outlook::cli::{self, ForecastOptions};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "outlook")]
#[command(about = "Three-period forecasts for spreadsheet planning models.")]
#[command(long_about = "Outlook - t1..t3 forecasts for planning workbooks

Classifies account rows, projects t1-t3 with a CAGR baseline or a local
LLM (Ollama), and writes the values plus a short reason back into a copy
of the workbook. Formulas and authored numbers are left alone.

COMMANDS:
  discover  - Classify account rows and save the mappings
  forecast  - Run the pipeline and write the output workbook
  scan      - Show text per column to pick the account column
  check     - Validate config and resolve every sheet layout

EXAMPLES:
  outlook discover config/sheets.yaml
  outlook forecast config/sheets.yaml --discover
  outlook forecast config/sheets.yaml --offline      # CAGR baseline only
  outlook scan data/plan.xlsx \"BS (2)\" --rows 3..40")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify account rows of every configured sheet and save the mappings
    Discover {
        /// Path to the pipeline configuration (YAML)
        config: PathBuf,
    },

    #[command(long_about = "Run the forecasting pipeline.

Copies the source workbook to the output path, forecasts every row classified
as `forecast`, and saves the output once. Per-sheet decision logs, the oracle
run log and run_manifest.json are written to log_dir.

Oracle settings can be overridden with flags or OLLAMA_MODEL, OLLAMA_URL
and OLLAMA_TEMP.")]
    /// Forecast t1..t3 and write the output workbook
    Forecast {
        /// Path to the pipeline configuration (YAML)
        config: PathBuf,

        /// Classify accounts first (refreshes the mappings)
        #[arg(long)]
        discover: bool,

        /// Do not contact the oracle; every row uses the CAGR baseline
        #[arg(long)]
        offline: bool,

        /// Ollama model
        #[arg(long, env = "OLLAMA_MODEL")]
        model: Option<String>,

        /// Ollama base URL
        #[arg(long, env = "OLLAMA_URL")]
        url: Option<String>,

        /// Sampling temperature
        #[arg(long, env = "OLLAMA_TEMP")]
        temperature: Option<f64>,
    },

    /// Print the first text values of each column in a row window
    Scan {
        /// Workbook (.xlsx)
        workbook: PathBuf,

        /// Sheet name
        sheet: String,

        /// Rows to scan, inclusive
        #[arg(long, default_value = "3..40", value_parser = cli::parse_row_range)]
        rows: (u32, u32),

        /// Number of columns to scan from A
        #[arg(long, default_value = "7")]
        max_col: u32,
    },

    /// Validate the configuration and resolve every sheet without writing
    Check {
        /// Path to the pipeline configuration (YAML)
        config: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "outlook=info,royalbit_outlook=info".into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Discover { config } => cli::discover(&config)?,

        Commands::Forecast {
            config,
            discover,
            offline,
            model,
            url,
            temperature,
        } => cli::forecast(
            &config,
            ForecastOptions {
                discover,
                offline,
                model,
                url,
                temperature,
            },
        )?,

        Commands::Scan {
            workbook,
            sheet,
            rows,
            max_col,
        } => cli::scan(&workbook, &sheet, rows, max_col)?,

        Commands::Check { config } => cli::check(&config)?,
    }

    Ok(())
}

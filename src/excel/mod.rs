//! Workbook access for planning sheets
//!
//! - [`Workbook`]: in-memory cell grid loaded through calamine, either as cached values (the
//!   read-only snapshot) or with formulas visible (the working copy)
//! - [`locator`]: header row, period columns and account column discovery
//! - [`WorkbookPatcher`]: writes staged cells into an existing .xlsx without rewriting anything else

pub mod locator;
mod patcher;

pub use patcher::{CellWrite, CellWriteError, WorkbookPatcher};

use crate::error::{OutlookError, OutlookResult};
use crate::types::CellValue;
use calamine::{open_workbook, Data, Range, Reader, Xlsx};
use std::collections::HashMap;
use std::path::Path;

/// Largest row index of an .xlsx sheet
pub const MAX_ROWS: u32 = 1_048_576;
/// Largest column index of an .xlsx sheet (`XFD`)
pub const MAX_COLS: u32 = 16_384;

static EMPTY: CellValue = CellValue::Empty;

/// Which content a formula cell exposes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellView {
    /// Cached results of formulas (historical truth)
    Values,
    /// Formula text wherever a formula exists
    Formulas,
}

/// One sheet as a sparse grid addressed by 1-based (row, column)
#[derive(Debug, Clone, Default)]
pub struct Worksheet {
    name: String,
    cells: HashMap<(u32, u32), CellValue>,
    max_row: u32,
    max_col: u32,
}

impl Worksheet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cell content; cells outside the used range are `Empty`
    pub fn cell(&self, row: u32, col: u32) -> &CellValue {
        self.cells.get(&(row, col)).unwrap_or(&EMPTY)
    }

    pub fn set(&mut self, row: u32, col: u32, value: CellValue) {
        if matches!(value, CellValue::Empty) {
            self.cells.remove(&(row, col));
            return;
        }
        self.max_row = self.max_row.max(row);
        self.max_col = self.max_col.max(col);
        self.cells.insert((row, col), value);
    }

    /// Last used row (0 for an empty sheet)
    pub fn max_row(&self) -> u32 {
        self.max_row
    }

    /// Last used column (0 for an empty sheet)
    pub fn max_col(&self) -> u32 {
        self.max_col
    }

    fn load_values(&mut self, range: &Range<Data>) {
        let Some((start_row, start_col)) = range.start() else {
            return;
        };
        for (r, c, data) in range.used_cells() {
            let row = start_row + r as u32 + 1;
            let col = start_col + c as u32 + 1;
            self.set(row, col, cell_from_data(data));
        }
    }

    fn load_formulas(&mut self, range: &Range<String>) {
        let Some((start_row, start_col)) = range.start() else {
            return;
        };
        for (r, c, formula) in range.used_cells() {
            if formula.trim().is_empty() {
                continue;
            }
            let row = start_row + r as u32 + 1;
            let col = start_col + c as u32 + 1;
            let text = if formula.starts_with('=') {
                formula.clone()
            } else {
                format!("={}", formula)
            };
            self.set(row, col, CellValue::Formula(text));
        }
    }
}

/// All sheets of a workbook, in workbook order
#[derive(Debug, Clone, Default)]
pub struct Workbook {
    sheets: Vec<Worksheet>,
}

impl Workbook {
    /// Load an .xlsx file through calamine
    pub fn open(path: &Path, view: CellView) -> OutlookResult<Self> {
        let mut xlsx: Xlsx<_> = open_workbook(path).map_err(|e: calamine::XlsxError| {
            OutlookError::Workbook(format!("Failed to open {}: {}", path.display(), e))
        })?;

        let mut workbook = Workbook::default();
        for name in xlsx.sheet_names() {
            let mut sheet = Worksheet::new(name.clone());
            let values = xlsx.worksheet_range(&name)?;
            sheet.load_values(&values);
            if view == CellView::Formulas {
                let formulas = xlsx.worksheet_formula(&name)?;
                sheet.load_formulas(&formulas);
            }
            workbook.sheets.push(sheet);
        }
        Ok(workbook)
    }

    pub fn sheet(&self, name: &str) -> OutlookResult<&Worksheet> {
        self.sheets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| OutlookError::SheetNotFound(name.to_string()))
    }

    pub fn sheet_mut(&mut self, name: &str) -> OutlookResult<&mut Worksheet> {
        self.sheets
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| OutlookError::SheetNotFound(name.to_string()))
    }

    pub fn sheet_names(&self) -> Vec<&str> {
        self.sheets.iter().map(|s| s.name.as_str()).collect()
    }
}

fn cell_from_data(data: &Data) -> CellValue {
    match data {
        Data::Int(i) => CellValue::Number(*i as f64),
        Data::Float(f) => CellValue::Number(*f),
        Data::String(s) if s.is_empty() => CellValue::Empty,
        Data::String(s) => CellValue::Text(s.clone()),
        Data::Bool(b) => CellValue::Text(b.to_string().to_uppercase()),
        Data::DateTime(dt) => CellValue::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => CellValue::Text(s.clone()),
        Data::Error(e) => CellValue::Text(e.to_string()),
        Data::Empty => CellValue::Empty,
    }
}

/// Convert a 1-based column index to letters
///
/// Examples:
/// - 1 → A
/// - 26 → Z
/// - 27 → AA
pub fn column_letter(col: u32) -> String {
    let mut result = String::new();
    let mut idx = col.saturating_sub(1);

    loop {
        let remainder = idx % 26;
        result.insert(0, (b'A' + remainder as u8) as char);
        if idx < 26 {
            break;
        }
        idx = idx / 26 - 1;
    }

    result
}

/// Parse a column given as letters (`"AB"`) or digits (`"28"`), 1-based
pub fn parse_column(s: &str) -> Option<u32> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<u32>() {
        return (1..=MAX_COLS).contains(&n).then_some(n);
    }
    let mut col: u32 = 0;
    for ch in s.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        col = col
            .checked_mul(26)?
            .checked_add(ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1)?;
    }
    (1..=MAX_COLS).contains(&col).then_some(col)
}

/// A1-style reference for a 1-based cell
pub fn cell_ref(row: u32, col: u32) -> String {
    format!("{}{}", column_letter(col), row)
}

/// Split `"F12"` into (row 12, column 6)
pub fn parse_cell_ref(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    let col = parse_column(letters)?;
    let row = digits.parse::<u32>().ok()?;
    (1..=MAX_ROWS).contains(&row).then_some((row, col))
}

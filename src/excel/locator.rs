//! Header row, period column and account column discovery

use super::{column_letter, Worksheet};
use crate::config::SheetConfig;
use crate::error::{OutlookError, OutlookResult};
use crate::types::{CellValue, Period, PeriodColumnMap};
use regex::Regex;
use tracing::debug;

/// Header rows are searched in rows `1..=HEADER_SCAN_ROWS`
pub const HEADER_SCAN_ROWS: u32 = 40;

/// Rows below the header sampled when auto-detecting the account column
pub const ACCOUNT_SAMPLE_ROWS: u32 = 7;

/// Periods every forecast sheet must resolve; `t-2` and `t-1` are optional
pub const REQUIRED_PERIODS: [Period; 4] = [Period::T0, Period::T1, Period::T2, Period::T3];

/// History periods without a header are read this many columns left of `t0`
const HISTORY_OFFSETS: [(Period, u32); 2] = [(Period::TMinus2, 2), (Period::TMinus1, 1)];

/// First row (1-based) containing a cell whose trimmed text equals one of `aliases`.
pub fn find_header_row(sheet: &Worksheet, aliases: &[String]) -> Option<u32> {
    let last = sheet.max_row().min(HEADER_SCAN_ROWS);
    (1..=last).find(|&row| {
        (1..=sheet.max_col()).any(|col| match sheet.cell(row, col) {
            CellValue::Text(s) => aliases.iter().any(|a| a.trim() == s.trim()),
            _ => false,
        })
    })
}

/// Map period labels (`t-2` … `t3`) found in the header row to their columns.
///
/// Cells that do not match `t`, optional `-`, digits are ignored; so are labels outside the
/// six model periods.
pub fn col_map(sheet: &Worksheet, header_row: u32) -> OutlookResult<PeriodColumnMap> {
    let pattern = Regex::new(r"^t-?\d+$")
        .map_err(|e| OutlookError::Config(format!("Regex error: {}", e)))?;

    let mut map = PeriodColumnMap::new();
    for col in 1..=sheet.max_col() {
        if let CellValue::Text(s) = sheet.cell(header_row, col) {
            let label = s.trim();
            if !pattern.is_match(label) {
                continue;
            }
            if let Some(period) = Period::from_label(label) {
                map.insert(period, col);
            }
        }
    }
    Ok(map)
}

/// Resolve header texts such as `"Gesamt 12/t0"` (case-insensitive substring) into `map`.
pub fn apply_period_headers(
    sheet: &Worksheet,
    header_row: u32,
    overrides: &[(Period, &str)],
    map: &mut PeriodColumnMap,
) {
    for (period, needle) in overrides {
        let needle = needle.to_lowercase();
        let found = (1..=sheet.max_col()).find(|&col| match sheet.cell(header_row, col) {
            CellValue::Text(s) => s.to_lowercase().contains(&needle),
            _ => false,
        });
        if let Some(col) = found {
            map.set(*period, col);
        }
    }
}

/// First column in `1..=max_scan_col` with non-empty text in the rows just below the header.
pub fn detect_account_column(sheet: &Worksheet, header_row: u32, max_scan_col: u32) -> Option<u32> {
    (1..=max_scan_col).find(|&col| {
        (header_row + 1..=header_row + ACCOUNT_SAMPLE_ROWS)
            .any(|row| sheet.cell(row, col).as_label().is_some())
    })
}

/// First `limit` non-empty text values per column, for choosing an account column by eye.
pub fn scan_text_columns(
    sheet: &Worksheet,
    first_row: u32,
    last_row: u32,
    max_col: u32,
    limit: usize,
) -> Vec<(u32, Vec<String>)> {
    (1..=max_col)
        .filter_map(|col| {
            let values: Vec<String> = (first_row..=last_row)
                .filter_map(|row| sheet.cell(row, col).as_label().map(str::to_string))
                .take(limit)
                .collect();
            (!values.is_empty()).then_some((col, values))
        })
        .collect()
}

/// Where things are on one sheet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetLayout {
    pub header_row: u32,
    pub columns: PeriodColumnMap,
    pub account_column: u32,
    /// History periods placed by position rather than by header
    pub inferred: Vec<Period>,
}

impl SheetLayout {
    /// Locate header, periods and account column as configured.
    ///
    /// `required` periods must all resolve; pass `&[]` for discovery, which only needs labels.
    pub fn resolve(
        sheet: &Worksheet,
        config: &SheetConfig,
        required: &[Period],
    ) -> OutlookResult<Self> {
        let header_row = find_header_row(sheet, &config.header_aliases).ok_or_else(|| {
            OutlookError::HeaderNotFound {
                sheet: config.name.clone(),
                aliases: config.header_aliases.clone(),
            }
        })?;

        let mut columns = col_map(sheet, header_row)?;
        apply_period_headers(
            sheet,
            header_row,
            &config.period_header_overrides(),
            &mut columns,
        );
        let missing = columns.missing(required);
        if !missing.is_empty() {
            return Err(OutlookError::MissingPeriods {
                sheet: config.name.clone(),
                missing,
            });
        }

        let account_column = match config.account_column.as_ref().and_then(|c| c.resolve()) {
            Some(col) => col,
            None => detect_account_column(sheet, header_row, config.max_scan_col)
                .ok_or_else(|| OutlookError::AccountColumnNotFound(config.name.clone()))?,
        };
        let inferred = infer_history_columns(&mut columns, account_column);

        debug!(
            sheet = %config.name,
            header_row,
            columns = %columns,
            account_column = %column_letter(account_column),
            "sheet layout resolved"
        );

        Ok(Self {
            header_row,
            columns,
            account_column,
            inferred,
        })
    }
}

/// Place unlabeled `t-2`/`t-1` at their offset left of `t0`.
///
/// A position already taken by the account column or another period stays unmapped.
fn infer_history_columns(columns: &mut PeriodColumnMap, account_column: u32) -> Vec<Period> {
    let Some(t0) = columns.get(Period::T0) else {
        return Vec::new();
    };
    let mut inferred = Vec::new();
    for (period, offset) in HISTORY_OFFSETS {
        if columns.get(period).is_some() || t0 <= offset {
            continue;
        }
        let col = t0 - offset;
        if col == account_column || columns.iter().any(|(_, c)| c == col) {
            continue;
        }
        columns.set(period, col);
        inferred.push(period);
    }
    inferred
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> CellValue {
        CellValue::Text(s.to_string())
    }

    fn planning_sheet() -> Worksheet {
        let mut sheet = Worksheet::new("BS (2)");
        sheet.set(1, 1, text("Unternehmensplanung"));
        sheet.set(3, 2, text("Bilanz"));
        for (i, label) in ["t-2", "t-1", "t0", "t1", "t2", "t3"].iter().enumerate() {
            sheet.set(7, 3 + i as u32, text(label));
        }
        sheet.set(8, 2, text("Vorräte"));
        sheet.set(8, 3, CellValue::Number(100.0));
        sheet.set(9, 2, text("Forderungen"));
        sheet
    }

    #[test]
    fn test_find_header_row_first_match() {
        let mut sheet = Worksheet::new("S");
        sheet.set(7, 4, text("t0"));
        sheet.set(12, 1, text("t0"));
        assert_eq!(find_header_row(&sheet, &["t0".to_string()]), Some(7));
    }

    #[test]
    fn test_find_header_row_trims_and_uses_aliases() {
        let mut sheet = Worksheet::new("S");
        sheet.set(4, 2, text(" Gesamt 12/t0 "));
        assert_eq!(find_header_row(&sheet, &["t0".to_string()]), None);
        assert_eq!(find_header_row(&sheet, &["Gesamt 12/t0".to_string()]), Some(4));
    }

    #[test]
    fn test_find_header_row_bounded_window() {
        let mut sheet = Worksheet::new("S");
        sheet.set(41, 1, text("t0"));
        assert_eq!(find_header_row(&sheet, &["t0".to_string()]), None);
    }

    #[test]
    fn test_col_map_ignores_unknown_labels() {
        let mut sheet = planning_sheet();
        sheet.set(7, 9, text("t5"));
        sheet.set(7, 10, text("Kommentar"));
        let map = col_map(&sheet, 7).unwrap();
        assert!(map.missing(&Period::ALL).is_empty());
        assert_eq!(map.get(Period::TMinus2), Some(3));
        assert_eq!(map.get(Period::T0), Some(5));
        assert_eq!(map.get(Period::T3), Some(8));
    }

    #[test]
    fn test_period_header_override() {
        let mut sheet = Worksheet::new("STAFF (2)");
        sheet.set(2, 1, text("Position"));
        sheet.set(2, 4, text("Gesamt 12/t0"));
        sheet.set(2, 5, text("t1"));
        let mut map = col_map(&sheet, 2).unwrap();
        assert_eq!(map.get(Period::T0), None);
        apply_period_headers(&sheet, 2, &[(Period::T0, "gesamt 12/T0")], &mut map);
        assert_eq!(map.get(Period::T0), Some(4));
    }

    #[test]
    fn test_detect_account_column() {
        let sheet = planning_sheet();
        assert_eq!(detect_account_column(&sheet, 7, 15), Some(2));
        assert_eq!(detect_account_column(&sheet, 7, 1), None);
    }

    #[test]
    fn test_layout_requires_forecast_periods() {
        let mut sheet = Worksheet::new("S");
        sheet.set(1, 1, text("t0"));
        sheet.set(1, 2, text("t1"));
        sheet.set(2, 1, text("Umsatz"));
        let config = SheetConfig::new("S", &["Umsatz"]);
        let err = SheetLayout::resolve(&sheet, &config, &REQUIRED_PERIODS).unwrap_err();
        assert!(matches!(err, OutlookError::MissingPeriods { ref missing, .. } if missing == &["t2", "t3"]));
        assert!(SheetLayout::resolve(&sheet, &config, &[]).is_ok());
    }

    #[test]
    fn test_missing_history_headers_fall_back_left_of_t0() {
        let mut sheet = Worksheet::new("STAFF (2)");
        sheet.set(2, 1, text("Position"));
        sheet.set(2, 5, text("Gesamt 12/t0"));
        for (i, label) in ["t1", "t2", "t3"].iter().enumerate() {
            sheet.set(2, 6 + i as u32, text(label));
        }
        sheet.set(3, 1, text("Gehälter"));
        let mut config = SheetConfig::new("STAFF (2)", &["Gehälter"]);
        config.header_aliases = vec!["Gesamt 12/t0".to_string()];
        config.period_headers.insert("t0".to_string(), "Gesamt 12/t0".to_string());

        let layout = SheetLayout::resolve(&sheet, &config, &REQUIRED_PERIODS).unwrap();
        assert_eq!(layout.columns.get(Period::TMinus2), Some(3));
        assert_eq!(layout.columns.get(Period::TMinus1), Some(4));
        assert_eq!(layout.inferred, vec![Period::TMinus2, Period::TMinus1]);
    }

    #[test]
    fn test_history_fallback_never_reuses_a_column() {
        let mut sheet = Worksheet::new("S");
        sheet.set(1, 2, text("t-1"));
        for (i, label) in ["t0", "t1", "t2", "t3"].iter().enumerate() {
            sheet.set(1, 4 + i as u32, text(label));
        }
        sheet.set(2, 1, text("Umsatz"));
        let config = SheetConfig::new("S", &["Umsatz"]);

        // t-2 would land on B, which already holds t-1
        let layout = SheetLayout::resolve(&sheet, &config, &REQUIRED_PERIODS).unwrap();
        assert_eq!(layout.columns.get(Period::TMinus1), Some(2));
        assert_eq!(layout.columns.get(Period::TMinus2), None);
        assert!(layout.inferred.is_empty());

        // t0 in B: the only position left of it is the account column
        let mut narrow = Worksheet::new("S");
        for (i, label) in ["t0", "t1", "t2", "t3"].iter().enumerate() {
            narrow.set(1, 2 + i as u32, text(label));
        }
        narrow.set(2, 1, text("Umsatz"));
        let layout = SheetLayout::resolve(&narrow, &config, &REQUIRED_PERIODS).unwrap();
        assert_eq!(layout.columns.get(Period::TMinus1), None);
        assert!(layout.inferred.is_empty());
    }

    #[test]
    fn test_scan_text_columns() {
        let sheet = planning_sheet();
        let scan = scan_text_columns(&sheet, 3, 40, 7, 10);
        assert_eq!(scan.len(), 6);
        assert_eq!(
            scan[0],
            (2, vec!["Bilanz".to_string(), "Vorräte".to_string(), "Forderungen".to_string()])
        );
        assert_eq!(scan[1], (3, vec!["t-2".to_string()]));
    }
}

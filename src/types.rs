use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

//==============================================================================
// Periods
//==============================================================================

/// One of the six period labels of a planning sheet.
///
/// `t0` is the last historical period; `t1`..`t3` are forecast periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Period {
    TMinus2,
    TMinus1,
    T0,
    T1,
    T2,
    T3,
}

impl Period {
    pub const ALL: [Period; 6] = [
        Period::TMinus2,
        Period::TMinus1,
        Period::T0,
        Period::T1,
        Period::T2,
        Period::T3,
    ];

    /// Forecast periods, in write order
    pub const FORECAST: [Period; 3] = [Period::T1, Period::T2, Period::T3];

    /// Header label as it appears in the sheet
    pub fn label(&self) -> &'static str {
        match self {
            Period::TMinus2 => "t-2",
            Period::TMinus1 => "t-1",
            Period::T0 => "t0",
            Period::T1 => "t1",
            Period::T2 => "t2",
            Period::T3 => "t3",
        }
    }

    /// Parse a header label. Labels outside `t-2..t3` (e.g. `t5`) are not periods of this model.
    pub fn from_label(label: &str) -> Option<Self> {
        Period::ALL.into_iter().find(|p| p.label() == label)
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Period label → 1-based column index, derived from a sheet's header row.
///
/// Columns need not be contiguous or ordered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeriodColumnMap {
    columns: BTreeMap<Period, u32>,
}

impl PeriodColumnMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a column; the leftmost occurrence of a label wins
    pub fn insert(&mut self, period: Period, column: u32) {
        self.columns.entry(period).or_insert(column);
    }

    /// Replace a column unconditionally (explicit header overrides)
    pub fn set(&mut self, period: Period, column: u32) {
        self.columns.insert(period, column);
    }

    pub fn get(&self, period: Period) -> Option<u32> {
        self.columns.get(&period).copied()
    }

    /// Labels from `required` that did not resolve
    pub fn missing(&self, required: &[Period]) -> Vec<String> {
        required
            .iter()
            .filter(|p| !self.columns.contains_key(p))
            .map(|p| p.label().to_string())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Period, u32)> + '_ {
        self.columns.iter().map(|(p, c)| (*p, *c))
    }
}

impl fmt::Display for PeriodColumnMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .iter()
            .map(|(p, c)| format!("{}={}", p, crate::excel::column_letter(c)))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

//==============================================================================
// Account Classification
//==============================================================================

/// Classification of a labeled row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Category {
    /// Future periods are computed by the pipeline
    Forecast,
    /// Recognized but deliberately left untouched
    Readonly,
    /// Not matched by any configured label
    #[default]
    None,
}

impl Category {
    /// Name used in the mapping artifact (`""` for unmatched rows)
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Forecast => "forecast",
            Category::Readonly => "readonly",
            Category::None => "",
        }
    }

    /// Lenient parse: case-insensitive, surrounding whitespace ignored, unknown → `None`
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "forecast" => Category::Forecast,
            "readonly" | "read-only" | "read_only" => Category::Readonly,
            _ => Category::None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::None => f.write_str("none"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// One classified label row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRow {
    pub row: u32,
    pub text: String,
    pub category: Category,
}

/// Rows of one sheet keyed by row number, as produced by the account classifier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountMapping {
    rows: BTreeMap<u32, AccountRow>,
}

impl AccountMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a row; a row number already present is replaced
    pub fn insert(&mut self, row: AccountRow) {
        self.rows.insert(row.row, row);
    }

    pub fn get(&self, row: u32) -> Option<&AccountRow> {
        self.rows.get(&row)
    }

    pub fn category(&self, row: u32) -> Category {
        self.rows.get(&row).map(|r| r.category).unwrap_or_default()
    }

    /// Rows in ascending row order
    pub fn rows(&self) -> impl Iterator<Item = &AccountRow> {
        self.rows.values()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn count(&self, category: Category) -> usize {
        self.rows.values().filter(|r| r.category == category).count()
    }
}

impl FromIterator<AccountRow> for AccountMapping {
    fn from_iter<I: IntoIterator<Item = AccountRow>>(iter: I) -> Self {
        let mut mapping = AccountMapping::new();
        for row in iter {
            mapping.insert(row);
        }
        mapping
    }
}

//==============================================================================
// Forecast Values
//==============================================================================

/// Historical values of one account row. `t_zero` is mandatory.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoricalTriple {
    pub t_minus_2: Option<f64>,
    pub t_minus_1: Option<f64>,
    pub t_zero: f64,
}

impl HistoricalTriple {
    pub fn new(t_minus_2: Option<f64>, t_minus_1: Option<f64>, t_zero: f64) -> Self {
        Self {
            t_minus_2,
            t_minus_1,
            t_zero,
        }
    }

    /// Older periods with missing values degrade to 0.0
    pub fn with_defaults(&self) -> [f64; 3] {
        [
            self.t_minus_2.unwrap_or(0.0),
            self.t_minus_1.unwrap_or(0.0),
            self.t_zero,
        ]
    }
}

/// Where a forecast came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastOrigin {
    /// All values and the reason came from the oracle
    Oracle,
    /// Oracle answered, but some keys were absent and filled from the baseline
    Mixed,
    /// CAGR baseline (strategy or fallback)
    Baseline,
}

impl fmt::Display for ForecastOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastOrigin::Oracle => f.write_str("oracle"),
            ForecastOrigin::Mixed => f.write_str("mixed"),
            ForecastOrigin::Baseline => f.write_str("baseline"),
        }
    }
}

/// Forecast for t1..t3 plus a short justification. Always fully populated.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastResult {
    pub t1: f64,
    pub t2: f64,
    pub t3: f64,
    pub reason: String,
    pub origin: ForecastOrigin,
}

impl ForecastResult {
    pub fn values(&self) -> [f64; 3] {
        [self.t1, self.t2, self.t3]
    }
}

/// Round to cents, the precision written into forecast cells
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

//==============================================================================
// Cell Model
//==============================================================================

/// Texts that stand for "no value yet" in planning sheets
pub const PLACEHOLDERS: &[&str] = &["", "-", "–", "—", ".", "…", "???"];

/// Content of a single cell.
///
/// In the values view a formula cell carries its cached result; in the formulas view it is
/// `Formula` with the formula text.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Number(f64),
    Text(String),
    Empty,
    Formula(String),
}

impl CellValue {
    /// Non-empty trimmed text, if any
    pub fn as_label(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) if !s.trim().is_empty() => Some(s.trim()),
            _ => None,
        }
    }

    /// Numeric reading of the cell.
    ///
    /// Text is read in German notation (`1.234,56`); placeholders and formulas yield `None`.
    pub fn as_amount(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) if n.is_finite() => Some(*n),
            CellValue::Text(s) if !is_placeholder(self) => parse_amount(s),
            _ => None,
        }
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => write!(f, "{}", n),
            CellValue::Text(s) => write!(f, "{:?}", s),
            CellValue::Empty => f.write_str("<empty>"),
            CellValue::Formula(s) => write!(f, "={}", s.trim_start_matches('=')),
        }
    }
}

/// True if the cell holds no authored value: empty, or a placeholder text such as `-`.
pub fn is_placeholder(cell: &CellValue) -> bool {
    match cell {
        CellValue::Empty => true,
        CellValue::Text(s) => PLACEHOLDERS.contains(&s.trim()),
        CellValue::Number(_) | CellValue::Formula(_) => false,
    }
}

/// Parse amounts typed as text, e.g. `"1.234,50 €"` → 1234.5
pub fn parse_amount(text: &str) -> Option<f64> {
    let kept: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, ',' | '.' | '-'))
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let normalized = kept.replace('.', "").replace(',', ".");
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

//==============================================================================
// Writer Policy
//==============================================================================

/// Whether existing destination content blocks a forecast write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverwritePolicy {
    /// Formulas and authored numbers are never replaced; the reason cell only fills placeholders
    #[default]
    Protect,
    /// t1..t3 and the reason column are written for every forecast row
    Always,
}

impl OverwritePolicy {
    /// May a forecast value replace this cell?
    pub fn may_overwrite_value(&self, existing: &CellValue) -> bool {
        match self {
            OverwritePolicy::Always => true,
            OverwritePolicy::Protect => {
                !matches!(existing, CellValue::Formula(_) | CellValue::Number(_))
            }
        }
    }

    /// May the reason text replace this cell?
    pub fn may_overwrite_reason(&self, existing: &CellValue) -> bool {
        match self {
            OverwritePolicy::Always => true,
            OverwritePolicy::Protect => is_placeholder(existing),
        }
    }
}

impl fmt::Display for OverwritePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverwritePolicy::Protect => f.write_str("protect"),
            OverwritePolicy::Always => f.write_str("always"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_labels_roundtrip() {
        for p in Period::ALL {
            assert_eq!(Period::from_label(p.label()), Some(p));
        }
        assert_eq!(Period::from_label("t5"), None);
        assert_eq!(Period::from_label("T0"), None);
    }

    #[test]
    fn test_period_column_map_missing() {
        let mut map = PeriodColumnMap::new();
        map.insert(Period::T0, 5);
        map.insert(Period::T1, 6);
        map.insert(Period::T1, 9);
        assert_eq!(map.get(Period::T1), Some(6));
        assert_eq!(
            map.missing(&[Period::T0, Period::T1, Period::T2, Period::T3]),
            vec!["t2".to_string(), "t3".to_string()]
        );
    }

    #[test]
    fn test_placeholders() {
        assert!(is_placeholder(&CellValue::Empty));
        assert!(is_placeholder(&CellValue::Text(" - ".into())));
        assert!(is_placeholder(&CellValue::Text("???".into())));
        assert!(!is_placeholder(&CellValue::Text("n/a".into())));
        assert!(!is_placeholder(&CellValue::Number(0.0)));
        assert!(!is_placeholder(&CellValue::Formula("=A1".into())));
    }

    #[test]
    fn test_parse_amount_german_notation() {
        assert_eq!(parse_amount("1.234,50"), Some(1234.5));
        assert_eq!(parse_amount("-12,5 T€"), Some(-12.5));
        assert_eq!(parse_amount("abc"), None);
        assert_eq!(CellValue::Text("-".into()).as_amount(), None);
        assert_eq!(CellValue::Number(42.0).as_amount(), Some(42.0));
        assert_eq!(CellValue::Formula("=B2".into()).as_amount(), None);
    }

    #[test]
    fn test_protect_policy() {
        let policy = OverwritePolicy::Protect;
        assert!(!policy.may_overwrite_value(&CellValue::Formula("=F3*2".into())));
        assert!(!policy.may_overwrite_value(&CellValue::Number(10.0)));
        assert!(policy.may_overwrite_value(&CellValue::Empty));
        assert!(policy.may_overwrite_value(&CellValue::Text("-".into())));
        assert!(!policy.may_overwrite_reason(&CellValue::Text("manual note".into())));
        assert!(OverwritePolicy::Always.may_overwrite_value(&CellValue::Formula("=A1".into())));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(Category::parse(" Forecast "), Category::Forecast);
        assert_eq!(Category::parse("readonly"), Category::Readonly);
        assert_eq!(Category::parse(""), Category::None);
        assert_eq!(Category::parse("other"), Category::None);
    }
}

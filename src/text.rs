//! Account label normalization and similarity
//!
//! Two labels name the same account when their normalized keys are equal (exact mode) or
//! when the keys are at least [`FUZZY_THRESHOLD`] similar (fuzzy mode).

use similar::{DiffTag, TextDiff};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization as _;

/// Default similarity required for a fuzzy label match
pub const FUZZY_THRESHOLD: f64 = 0.90;

/// Canonical comparison key for a label.
///
/// Lower-cases, decomposes accented characters and drops the combining marks, then strips
/// everything that is not alphanumeric. `ß` stays as-is (it has no decomposition).
///
/// ```
/// use royalbit_outlook::text::normalize;
///
/// assert_eq!(normalize("Löhne & Gehälter"), "lohnegehalter");
/// assert_eq!(normalize("material-aufwand !!"), "materialaufwand");
/// ```
pub fn normalize(text: &str) -> String {
    text.nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Sequence similarity ratio `2·M / T` of two normalized keys, in `[0, 1]`.
///
/// `M` counts characters in matching runs of a character diff, `T` is the combined length.
/// Appending a suffix to a label costs less than it would under edit distance.
pub fn similarity(a: &str, b: &str) -> f64 {
    let total = a.chars().count() + b.chars().count();
    if total == 0 {
        return 1.0;
    }
    let diff = TextDiff::from_chars(a, b);
    let matched: usize = diff
        .ops()
        .iter()
        .filter(|op| op.tag() == DiffTag::Equal)
        .map(|op| op.old_range().len())
        .sum();
    2.0 * matched as f64 / total as f64
}

/// True if `label_key` matches any of the (already normalized) `keys` at `threshold` or better
pub fn matches_any(label_key: &str, keys: &[String], threshold: f64) -> bool {
    keys.iter()
        .any(|k| k == label_key || similarity(label_key, k) >= threshold)
}

/// File-system friendly name for per-sheet artifacts, e.g. `"BS (2)"` → `"bs2"`
pub fn slug(sheet_name: &str) -> String {
    let key = normalize(sheet_name);
    if key.is_empty() {
        "sheet".to_string()
    } else {
        key
    }
}

//! Closed-form CAGR baseline
//!
//! Both functions are total: degenerate inputs give zero growth, never an error.

use crate::types::{round2, ForecastOrigin, ForecastResult, HistoricalTriple};

/// Forecast horizon in periods (t1, t2, t3)
pub const HORIZON: usize = 3;

/// Periods between t-2 and t0
pub const HISTORY_SPAN: f64 = 2.0;

/// Compound growth rate `(end/start)^(1/years) - 1`.
///
/// Returns 0.0 when `years <= 0`, when either endpoint is missing, zero or not finite, and when
/// the ratio has no real root (sign change between start and end).
pub fn cagr(start: Option<f64>, end: Option<f64>, years: f64) -> f64 {
    let (Some(start), Some(end)) = (start, end) else {
        return 0.0;
    };
    if years <= 0.0 || !years.is_finite() {
        return 0.0;
    }
    if start == 0.0 || end == 0.0 || !start.is_finite() || !end.is_finite() {
        return 0.0;
    }
    let rate = (end / start).powf(1.0 / years) - 1.0;
    if rate.is_finite() {
        rate
    } else {
        0.0
    }
}

/// Geometric projection `end_val * (1 + rate)^i` for `i` in `1..=horizon`
pub fn project(end_val: f64, rate: f64, horizon: usize) -> Vec<f64> {
    (1..=horizon)
        .map(|i| end_val * (1.0 + rate).powi(i as i32))
        .collect()
}

/// CAGR from t-2 to t0, projected over the forecast horizon
pub fn baseline_values(history: &HistoricalTriple) -> Vec<f64> {
    let rate = cagr(history.t_minus_2, Some(history.t_zero), HISTORY_SPAN);
    project(history.t_zero, rate, HORIZON)
}

/// Fixed explanation attached to every baseline forecast
pub fn baseline_reason(account: &str) -> String {
    format!("CAGR baseline for {}", account)
}

/// Baseline forecast as a complete result.
///
/// A supplied `precomputed` projection with at least three entries wins over recomputation.
pub fn baseline_result(
    account: &str,
    history: &HistoricalTriple,
    precomputed: Option<&[f64]>,
) -> ForecastResult {
    let values = match precomputed {
        Some(v) if v.len() >= HORIZON => v.to_vec(),
        _ => baseline_values(history),
    };
    ForecastResult {
        t1: round2(values[0]),
        t2: round2(values[1]),
        t3: round2(values[2]),
        reason: baseline_reason(account),
        origin: ForecastOrigin::Baseline,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_cagr_ten_percent() {
        assert!(close(cagr(Some(100.0), Some(121.0), 2.0), 0.10));
    }

    #[test]
    fn test_cagr_flat_is_zero() {
        for x in [1.0, -3.5, 250_000.0] {
            for n in [1.0, 2.0, 7.0] {
                assert!(close(cagr(Some(x), Some(x), n), 0.0));
            }
        }
    }

    #[test]
    fn test_cagr_guards() {
        assert_eq!(cagr(Some(100.0), Some(121.0), 0.0), 0.0);
        assert_eq!(cagr(Some(100.0), Some(121.0), -1.0), 0.0);
        assert_eq!(cagr(None, Some(121.0), 2.0), 0.0);
        assert_eq!(cagr(Some(100.0), None, 2.0), 0.0);
        assert_eq!(cagr(Some(0.0), Some(121.0), 2.0), 0.0);
        assert_eq!(cagr(Some(100.0), Some(0.0), 2.0), 0.0);
        assert_eq!(cagr(Some(f64::NAN), Some(121.0), 2.0), 0.0);
        // sign change: no real root
        assert_eq!(cagr(Some(-100.0), Some(121.0), 2.0), 0.0);
    }

    #[test]
    fn test_project_is_geometric() {
        let v = 121.0;
        let r = 0.1;
        let p = project(v, r, 3);
        assert_eq!(p.len(), 3);
        for (i, value) in p.iter().enumerate() {
            assert!(close(*value, v * (1.0 + r).powi(i as i32 + 1)));
        }
        // dividing back out recovers t0
        assert!(close(p[0] / (1.0 + r), v));
        assert!(project(v, r, 0).is_empty());
    }

    #[test]
    fn test_baseline_result_ten_percent() {
        let history = HistoricalTriple::new(Some(100.0), Some(110.0), 121.0);
        let result = baseline_result("Umsatzerlöse", &history, None);
        assert_eq!(result.values(), [133.1, 146.41, 161.05]);
        assert!(result.reason.contains("Umsatzerlöse"));
        assert_eq!(result.origin, ForecastOrigin::Baseline);
    }

    #[test]
    fn test_baseline_result_zero_growth_without_t_minus_2() {
        let history = HistoricalTriple::new(None, Some(80.0), 50.0);
        let result = baseline_result("Vorräte", &history, None);
        assert_eq!(result.values(), [50.0, 50.0, 50.0]);
    }

    #[test]
    fn test_baseline_result_prefers_precomputed() {
        let history = HistoricalTriple::new(Some(100.0), None, 121.0);
        let result = baseline_result("X", &history, Some(&[1.0, 2.0, 3.004]));
        assert_eq!(result.values(), [1.0, 2.0, 3.0]);

        let short = baseline_result("X", &history, Some(&[1.0]));
        assert_eq!(short.values(), [133.1, 146.41, 161.05]);
    }
}

//! Plateau detection over recent 1RM estimates, and deload planning
//!
//! The detector fits a least-squares line to trailing windows of the 1RM
//! series and normalizes the slope by the window mean. The longest trailing
//! window that is flat or falling is the "confirmed" plateau; its length
//! against the minimum duration decides between a warning and a confirmed
//! status.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::one_rep_max::round_dp;

/// Number of most recent 1RM samples the online check looks at
pub const PLATEAU_CHECK_WINDOW: usize = 15;

/// Samples required before the online check runs at all
pub const MIN_HISTORY_FOR_PLATEAU_CHECK: usize = 5;

/// Confirmed-window length required by the online check
pub const ONLINE_MIN_DURATION: usize = 3;

/// Default for the explicit analysis endpoint
pub const ANALYSIS_MIN_DURATION: usize = 5;

pub const COOLDOWN_WEEKS: i64 = 3;

/// Load factor applied to the working 1RM when the online check fires
pub const AUTO_DELOAD_FACTOR: f64 = 0.90;
pub const AUTO_DELOAD_PROTOCOL: &str = "auto_deload_10_percent";

/// Relative slope at or below which progress counts as stalled
pub const STAGNATION_THRESHOLD: f64 = 0.005;

/// Relative slope below which a stall counts as regression
pub const REGRESSION_THRESHOLD: f64 = -0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlateauStatus {
    NoPlateau,
    StagnationWarning,
    Stagnation,
    RegressionWarning,
    Regression,
}

impl PlateauStatus {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, PlateauStatus::Stagnation | PlateauStatus::Regression)
    }

    pub fn is_regression(&self) -> bool {
        matches!(self, PlateauStatus::Regression | PlateauStatus::RegressionWarning)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauAnalysis {
    pub status: PlateauStatus,
    /// Least-squares slope (kg per sample) of the confirmed window, or of the whole series
    pub slope: f64,
    pub relative_slope: f64,
    /// Length of the longest trailing flat-or-falling window (0 if none)
    pub confirmed_window: usize,
    pub sample_count: usize,
    pub mean: f64,
    pub min_duration: usize,
    pub plateauing: bool,
}

/// Least-squares slope of `values` against their indices
pub fn linear_slope(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let var_x = xs.iter().variance();
    if !(var_x > 0.0) {
        return 0.0;
    }
    let slope = xs.iter().covariance(values.iter()) / var_x;
    if slope.is_finite() {
        slope
    } else {
        0.0
    }
}

fn relative_slope(values: &[f64]) -> (f64, f64, f64) {
    let slope = linear_slope(values);
    let mean = values.iter().mean();
    let relative = if mean > 0.0 { slope / mean } else { 0.0 };
    (slope, relative, mean)
}

/// Classify a 1RM series (oldest first)
pub fn detect(values: &[f64], min_duration: usize) -> PlateauAnalysis {
    let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    let n = values.len();
    let min_duration = min_duration.max(2);

    let confirmed = (2..=n)
        .rev()
        .map(|k| (k, relative_slope(&values[n - k..])))
        .find(|(_, (_, relative, _))| *relative <= STAGNATION_THRESHOLD);

    let Some((window, (slope, relative, mean))) = confirmed else {
        let (slope, relative, mean) = if n > 0 {
            relative_slope(&values)
        } else {
            (0.0, 0.0, 0.0)
        };
        return PlateauAnalysis {
            status: PlateauStatus::NoPlateau,
            slope,
            relative_slope: relative,
            confirmed_window: 0,
            sample_count: n,
            mean,
            min_duration,
            plateauing: false,
        };
    };

    let regressing = relative < REGRESSION_THRESHOLD;
    let long_enough = window >= min_duration;
    let status = match (regressing, long_enough) {
        (true, true) => PlateauStatus::Regression,
        (true, false) => PlateauStatus::RegressionWarning,
        (false, true) => PlateauStatus::Stagnation,
        (false, false) => PlateauStatus::StagnationWarning,
    };

    PlateauAnalysis {
        status,
        slope,
        relative_slope: relative,
        confirmed_window: window,
        sample_count: n,
        mean,
        min_duration,
        plateauing: long_enough && status.is_confirmed(),
    }
}

/// How deep a deload should go, in [0, 1]
pub fn deload_severity(analysis: &PlateauAnalysis) -> f64 {
    match analysis.status {
        PlateauStatus::NoPlateau => 0.0,
        PlateauStatus::Stagnation | PlateauStatus::StagnationWarning => {
            let excess = analysis.confirmed_window as f64 - analysis.min_duration as f64;
            (0.25 + 0.05 * excess).clamp(0.25, 0.6)
        }
        PlateauStatus::Regression | PlateauStatus::RegressionWarning => {
            (0.5 + 25.0 * analysis.relative_slope.abs()).clamp(0.5, 1.0)
        }
    }
}

pub fn default_deload_weeks(severity: f64) -> u32 {
    if severity < 0.4 {
        1
    } else if severity < 0.7 {
        2
    } else {
        3
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeloadWeek {
    pub week: u32,
    pub volume_multiplier: f64,
    pub intensity_multiplier: f64,
}

/// Week-by-week deload prescription that tapers back toward normal load
pub fn generate_deload_protocol(severity: f64, duration_weeks: u32, recent_fatigue: f64) -> Vec<DeloadWeek> {
    let severity = if severity.is_finite() { severity.clamp(0.0, 1.0) } else { 0.0 };
    let fatigue = if recent_fatigue.is_finite() { recent_fatigue.max(0.0) } else { 0.0 };
    let weeks = duration_weeks.max(1);

    let volume_cut = 0.30 + 0.30 * severity + (fatigue / 1000.0).min(0.10);
    let intensity_cut = 0.05 + 0.10 * severity;

    (0..weeks)
        .map(|i| {
            let taper = 1.0 - f64::from(i) / f64::from(weeks);
            DeloadWeek {
                week: i + 1,
                volume_multiplier: round_dp((1.0 - volume_cut * taper).clamp(0.4, 1.0), 3),
                intensity_multiplier: round_dp((1.0 - intensity_cut * taper).clamp(0.4, 1.0), 3),
            }
        })
        .collect()
}

/// Explicit plateau analysis with a deload prescription
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauReport {
    pub exercise_id: i64,
    pub samples: Vec<f64>,
    pub analysis: PlateauAnalysis,
    pub severity: f64,
    pub recommended_action: String,
    pub deload_protocol: Vec<DeloadWeek>,
    pub current_fatigue: f64,
}

/// Build the analysis report for a 1RM series (oldest first)
pub fn build_report(
    exercise_id: i64,
    samples: Vec<f64>,
    min_duration: usize,
    deload_weeks: Option<u32>,
    current_fatigue: f64,
) -> PlateauReport {
    let analysis = detect(&samples, min_duration);
    let severity = round_dp(deload_severity(&analysis), 3);

    let (recommended_action, deload_protocol) = if analysis.plateauing {
        let weeks = deload_weeks.unwrap_or_else(|| default_deload_weeks(severity));
        ("deload", generate_deload_protocol(severity, weeks, current_fatigue))
    } else if analysis.status == PlateauStatus::NoPlateau {
        ("continue_progression", Vec::new())
    } else {
        ("monitor", Vec::new())
    };

    PlateauReport {
        exercise_id,
        samples,
        analysis,
        severity,
        recommended_action: recommended_action.to_string(),
        deload_protocol,
        current_fatigue,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_flat_series_is_stagnation() {
        let analysis = detect(&[100.0; 10], ONLINE_MIN_DURATION);
        assert_eq!(analysis.status, PlateauStatus::Stagnation);
        assert_eq!(analysis.confirmed_window, 10);
        assert!(analysis.plateauing);
        assert_eq!(analysis.slope, 0.0);
    }

    #[test]
    fn test_progressing_series_has_no_plateau() {
        let values: Vec<f64> = (0..8).map(|i| 100.0 + 2.5 * i as f64).collect();
        let analysis = detect(&values, ONLINE_MIN_DURATION);
        assert_eq!(analysis.status, PlateauStatus::NoPlateau);
        assert!(!analysis.plateauing);
        assert!(analysis.slope > 2.4);
    }

    #[test]
    fn test_falling_series_is_regression() {
        let values: Vec<f64> = (0..6).map(|i| 120.0 - 2.0 * i as f64).collect();
        let analysis = detect(&values, ANALYSIS_MIN_DURATION);
        assert_eq!(analysis.status, PlateauStatus::Regression);
        assert!(analysis.relative_slope < REGRESSION_THRESHOLD);
        assert!(deload_severity(&analysis) > 0.8);
    }

    #[test]
    fn test_short_stall_after_progress_is_warning() {
        let values = [100.0, 105.0, 110.0, 115.0, 120.0, 120.0];
        let analysis = detect(&values, ANALYSIS_MIN_DURATION);
        assert_eq!(analysis.status, PlateauStatus::StagnationWarning);
        assert_eq!(analysis.confirmed_window, 2);
        assert!(!analysis.plateauing);
    }

    #[test]
    fn test_too_few_samples() {
        let analysis = detect(&[100.0], ONLINE_MIN_DURATION);
        assert_eq!(analysis.status, PlateauStatus::NoPlateau);
        assert_eq!(analysis.sample_count, 1);
        assert_eq!(detect(&[], 3).sample_count, 0);
    }

    #[test]
    fn test_severity_and_duration() {
        let analysis = detect(&[100.0; 10], ANALYSIS_MIN_DURATION);
        assert!((deload_severity(&analysis) - 0.5).abs() < 1e-12);
        assert_eq!(default_deload_weeks(0.3), 1);
        assert_eq!(default_deload_weeks(0.5), 2);
        assert_eq!(default_deload_weeks(0.9), 3);
    }

    #[test]
    fn test_protocol_tapers() {
        let protocol = generate_deload_protocol(1.0, 3, 0.0);
        assert_eq!(protocol.len(), 3);
        assert_eq!(protocol[0].volume_multiplier, 0.4);
        assert!((protocol[0].intensity_multiplier - 0.85).abs() < 1e-9);
        assert!(protocol[1].volume_multiplier > protocol[0].volume_multiplier);
        assert!(protocol[2].intensity_multiplier > protocol[1].intensity_multiplier);
    }

    #[test]
    fn test_protocol_has_at_least_one_week() {
        let protocol = generate_deload_protocol(0.25, 0, 50.0);
        assert_eq!(protocol.len(), 1);
        assert!(protocol[0].volume_multiplier < 0.7);
    }

    #[test]
    fn test_report_actions() {
        let report = build_report(1, vec![100.0; 8], ANALYSIS_MIN_DURATION, None, 0.0);
        assert_eq!(report.recommended_action, "deload");
        assert_eq!(report.deload_protocol.len(), 2);

        let report = build_report(1, vec![100.0; 8], ANALYSIS_MIN_DURATION, Some(1), 0.0);
        assert_eq!(report.deload_protocol.len(), 1);

        let report = build_report(1, vec![100.0, 110.0, 120.0], ANALYSIS_MIN_DURATION, None, 0.0);
        assert_eq!(report.recommended_action, "continue_progression");
        assert!(report.deload_protocol.is_empty());
    }

    proptest! {
        #[test]
        fn test_deeper_severity_never_cuts_less(
            low in 0.0f64..1.0,
            delta in 0.0f64..1.0,
            fatigue in 0.0f64..500.0,
        ) {
            let high = (low + delta).min(1.0);
            let light = generate_deload_protocol(low, 1, fatigue);
            let heavy = generate_deload_protocol(high, 1, fatigue);
            prop_assert!(heavy[0].volume_multiplier <= light[0].volume_multiplier);
            prop_assert!(heavy[0].intensity_multiplier <= light[0].intensity_multiplier);
        }
    }
}

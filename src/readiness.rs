//! Subjective readiness multiplier
//!
//! Sleep, stress and HRV (relative to the lifter's own 30-day baseline) are
//! combined into a score in [0, 1]; the score maps linearly onto a load
//! multiplier in [0.93, 1.07]. A score of 0.5 is neutral. Missing inputs add
//! nothing, so sparse data leans conservative instead of inventing signal.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::database::{self, DatabaseError};

pub const SLEEP_WEIGHT: f64 = 0.4;
pub const STRESS_WEIGHT: f64 = 0.3;
pub const HRV_WEIGHT: f64 = 0.3;

/// Hours of sleep that earn the full sleep contribution
pub const TARGET_SLEEP_HOURS: f64 = 8.0;

pub const MIN_MULTIPLIER: f64 = 0.93;
pub const MULTIPLIER_RANGE: f64 = 0.14;

/// Default days of history that form the personal HRV baseline
pub const HRV_BASELINE_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Readiness {
    pub multiplier: f64,
    pub score: f64,
}

/// Score readiness from already-resolved inputs
pub fn score(
    sleep_hours: Option<f64>,
    stress_level: Option<f64>,
    hrv_ms: Option<f64>,
    hrv_baseline: Option<f64>,
) -> Readiness {
    let sleep = sleep_hours
        .filter(|h| h.is_finite() && *h >= 0.0)
        .map(|h| (h / TARGET_SLEEP_HOURS).min(1.0) * SLEEP_WEIGHT)
        .unwrap_or(0.0);

    let stress = stress_level
        .filter(|s| s.is_finite())
        .map(|s| ((10.0 - s.clamp(1.0, 10.0)) / 9.0) * STRESS_WEIGHT)
        .unwrap_or(0.0);

    let hrv = match (hrv_ms, hrv_baseline) {
        (Some(current), Some(baseline)) if baseline > 0.0 && current.is_finite() && current >= 0.0 => {
            (current / baseline).min(1.0) * HRV_WEIGHT
        }
        _ => 0.0,
    };

    let score = (sleep + stress + hrv).clamp(0.0, 1.0);
    Readiness {
        multiplier: MIN_MULTIPLIER + MULTIPLIER_RANGE * score,
        score,
    }
}

/// Score readiness, resolving the HRV baseline from the user's workouts of
/// the last `baseline_days`
pub fn readiness_for_user(
    conn: &Connection,
    user_id: i64,
    sleep_hours: Option<f64>,
    stress_level: Option<f64>,
    hrv_ms: Option<f64>,
    now: DateTime<Utc>,
    baseline_days: i64,
) -> Result<Readiness, DatabaseError> {
    let baseline = match hrv_ms {
        Some(_) => database::hrv_baseline(conn, user_id, now - Duration::days(baseline_days))?,
        None => None,
    };
    Ok(score(sleep_hours, stress_level, hrv_ms, baseline))
}

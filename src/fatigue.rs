//! Muscle-group fatigue with exponential decay
//!
//! Every prior session leaves a residual that decays with a per-muscle time
//! constant, scaled by the lifter's personal recovery multiplier:
//!
//! ```text
//! fatigue = Σ stimulus_i · exp(−Δhours_i / τ)
//! ```
//!
//! A larger τ means slower recovery. Sessions in the future (relative to the
//! evaluation instant) contribute nothing.

use chrono::{DateTime, Duration, Utc};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::database::{self, DatabaseError};
use crate::models::User;
use crate::one_rep_max::round_dp;

/// Time constant used for unknown muscle groups and as a safety fallback
pub const DEFAULT_TAU_HOURS: f64 = 48.0;

/// Muscle groups the engine knows recovery constants for
pub const MUSCLE_GROUPS: [&str; 11] = [
    "chest",
    "back",
    "shoulders",
    "biceps",
    "triceps",
    "quads",
    "hamstrings",
    "glutes",
    "calves",
    "forearms",
    "core",
];

/// Baseline recovery time constants in hours
pub fn default_tau_map() -> HashMap<String, f64> {
    [
        ("chest", 48.0),
        ("back", 48.0),
        ("shoulders", 36.0),
        ("biceps", 36.0),
        ("triceps", 36.0),
        ("quads", 72.0),
        ("hamstrings", 48.0),
        ("glutes", 48.0),
        ("calves", 24.0),
        ("forearms", 24.0),
        ("core", 24.0),
        ("default", DEFAULT_TAU_HOURS),
    ]
    .into_iter()
    .map(|(muscle, tau)| (muscle.to_string(), tau))
    .collect()
}

/// One prior session's stimulus for a muscle group
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StimulusSession {
    pub date: DateTime<Utc>,
    pub stimulus: f64,
}

/// Resolve the effective time constant for a muscle group
pub fn resolve_tau_hours(
    muscle_group: &str,
    baseline_tau_map: &HashMap<String, f64>,
    user_multiplier: f64,
) -> f64 {
    let baseline = baseline_tau_map
        .get(muscle_group)
        .or_else(|| baseline_tau_map.get("default"))
        .copied()
        .unwrap_or(DEFAULT_TAU_HOURS);
    let tau = baseline * user_multiplier;
    if tau.is_finite() && tau > 0.0 {
        tau
    } else {
        DEFAULT_TAU_HOURS
    }
}

/// Accumulated fatigue for `muscle_group` at instant `now`
pub fn fatigue(
    muscle_group: &str,
    sessions: &[StimulusSession],
    baseline_tau_map: &HashMap<String, f64>,
    user_multiplier: f64,
    now: DateTime<Utc>,
) -> f64 {
    let tau_hours = resolve_tau_hours(muscle_group, baseline_tau_map, user_multiplier);

    sessions
        .iter()
        .filter(|session| session.date <= now)
        .filter(|session| session.stimulus.is_finite() && session.stimulus >= 0.0)
        .map(|session| {
            let delta_hours = (now - session.date).num_seconds() as f64 / 3600.0;
            session.stimulus * (-delta_hours / tau_hours).exp()
        })
        .sum()
}

/// Fatigue of one muscle group as reported to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FatigueEntry {
    pub muscle_group: String,
    pub fatigue: f64,
    pub tau_hours: f64,
    pub sessions_considered: usize,
}

/// Fatigue of `muscle_group` for a stored user, from sessions in the lookback window
pub fn fatigue_for_user(
    conn: &Connection,
    user: &User,
    muscle_group: &str,
    now: DateTime<Utc>,
    lookback_days: i64,
) -> Result<FatigueEntry, DatabaseError> {
    let sessions =
        database::stimulus_sessions(conn, user.id, muscle_group, now - Duration::days(lookback_days))?;
    let multiplier = user
        .recovery_multipliers
        .get(muscle_group)
        .copied()
        .unwrap_or(1.0);
    let taus = default_tau_map();

    Ok(FatigueEntry {
        muscle_group: muscle_group.to_string(),
        fatigue: round_dp(fatigue(muscle_group, &sessions, &taus, multiplier, now), 2),
        tau_hours: resolve_tau_hours(muscle_group, &taus, multiplier),
        sessions_considered: sessions.iter().filter(|s| s.date <= now).count(),
    })
}

//! Read path: set recommendations and the analysis queries around them
//!
//! A recommendation composes every model in the engine. The working 1RM comes
//! from history (recomputed with the current bias) or a smart default, gets
//! deloaded when progress has stalled and scaled by the mesocycle phase. The
//! goal slider turns it into a rep range, target RIR and base load; fatigue,
//! the previous set and readiness nudge the load, and the result is snapped to
//! what the lifter can actually load.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use statrs::statistics::Statistics;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineSettings;
use crate::database::{self, Database, DatabaseError};
use crate::defaults::default_one_rm;
use crate::error::{LiftError, Result};
use crate::fatigue::{self, FatigueEntry, MUSCLE_GROUPS};
use crate::models::{Exercise, MesocyclePhase, PlateauEvent, User};
use crate::one_rep_max::{estimate_1rm, round_dp, weight_for_reps_to_failure};
use crate::plateau::{self, PlateauAnalysis, PlateauReport};
use crate::readiness;
use crate::rounding::round_weight;
use crate::{mesocycle, models};

/// Largest single intra-session nudge
pub const MAX_INTRA_SESSION_ADJUSTMENT: f64 = 0.075;

/// Nudge per RIR point of difference from the previous target
pub const INTRA_SESSION_STEP: f64 = 0.025;

/// Fatigue reduction saturates here
pub const MAX_FATIGUE_REDUCTION: f64 = 0.10;

/// Outcome of the previous set in the same session; values may be JSON
/// numbers or numeric strings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreviousSetMetrics {
    #[serde(default)]
    pub prev_actual_rir: Option<Value>,
    #[serde(default)]
    pub prev_target_rir: Option<Value>,
    #[serde(default)]
    pub prev_weight_lifted: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecommendRequest {
    #[serde(default)]
    pub previous_set_metrics: Option<PreviousSetMetrics>,
}

/// Transformations applied to the working 1RM, in order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum E1rmStep {
    History { stored: f64 },
    RecalculatedWithBias { stored: f64, recalculated: f64 },
    RecalculationFallback { stored: f64 },
    Default { exercise_key: String, level: String },
    SexAdjusted { coefficient: f64 },
    PlateauDeload { factor: f64 },
    MesocycleModifier { phase: MesocyclePhase, factor: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentType {
    None,
    Increased,
    Decreased,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntraSessionAdjustment {
    pub adjustment_type: AdjustmentType,
    pub applied: bool,
    pub percent: f64,
    pub rir_difference: Option<f64>,
    pub error: Option<String>,
}

impl IntraSessionAdjustment {
    fn not_requested() -> Self {
        Self {
            adjustment_type: AdjustmentType::None,
            applied: false,
            percent: 0.0,
            rir_difference: None,
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauCheck {
    pub analysis: Option<PlateauAnalysis>,
    pub deload_applied: bool,
    pub event_id: Option<i64>,
    pub note: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MesocycleDetails {
    pub id: i64,
    pub phase: MesocyclePhase,
    pub week_number: u32,
    pub start_date: NaiveDate,
    pub load_modifier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub recommended_weight_kg: f64,
    pub target_reps_low: u32,
    pub target_reps_high: u32,
    /// RIR to aim for as the lifter perceives it (bias-adjusted)
    pub target_rir: u32,
    pub system_target_actual_rir: u32,
    pub estimated_1rm_kg: f64,
    pub e1rm_source: String,
    pub e1rm_transformations: Vec<E1rmStep>,
    pub goal_slider: f64,
    pub target_load_percent: f64,
    pub main_target_muscle_group: String,
    pub current_fatigue: f64,
    pub fatigue_reduction_percent: f64,
    pub user_rir_bias_applied: f64,
    pub confidence_score: Option<f64>,
    pub intra_session_adjustment_details: IntraSessionAdjustment,
    pub plateau_analysis_details: PlateauCheck,
    pub mesocycle_details: MesocycleDetails,
    pub readiness_score_percent: Option<f64>,
    pub readiness_multiplier: f64,
    pub explanation: String,
}

/// Rep range and RIR targets derived from the goal slider
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoalTargets {
    pub load_pct: f64,
    pub target_rir_ideal: f64,
    pub rep_low: u32,
    pub rep_high: u32,
}

pub fn goal_targets(goal_slider: f64) -> GoalTargets {
    let g = goal_slider.clamp(0.0, 1.0);
    let rep_high = round_dp(6.0 + 6.0 * (1.0 - g), 0);
    let rep_low = round_dp((rep_high - 4.0).max(1.0), 0);
    GoalTargets {
        load_pct: 0.60 + 0.35 * g,
        target_rir_ideal: 2.5 - 1.5 * g,
        rep_low: rep_low as u32,
        rep_high: rep_high as u32,
    }
}

/// Reserve the load is computed against: the ideal target shifted by the bias
pub fn effective_target_rir(target_rir_ideal: f64, rir_bias: f64) -> f64 {
    (target_rir_ideal - rir_bias).clamp(0.0, 5.0)
}

/// 1 − coefficient of variation, or `None` with fewer than three samples
pub fn confidence_score(samples: &[f64]) -> Option<f64> {
    if samples.len() < 3 {
        return None;
    }
    let mean = samples.iter().mean();
    if !(mean > 0.0) {
        return None;
    }
    let cv = samples.iter().std_dev() / mean;
    cv.is_finite().then(|| round_dp((1.0 - cv).clamp(0.0, 1.0), 2))
}

fn metric_value(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|v| v.is_finite())
}

/// Nudge from the previous set; returns the replacement base weight, if any
pub fn intra_session_adjustment(metrics: &PreviousSetMetrics) -> (Option<f64>, IntraSessionAdjustment) {
    let parsed = (
        metric_value(metrics.prev_actual_rir.as_ref()),
        metric_value(metrics.prev_target_rir.as_ref()),
        metric_value(metrics.prev_weight_lifted.as_ref()),
    );
    let (Some(actual_rir), Some(target_rir), Some(prev_weight)) = parsed else {
        return (
            None,
            IntraSessionAdjustment {
                error: Some("previous_set_metrics must contain numeric prev_actual_rir, prev_target_rir and prev_weight_lifted".to_string()),
                ..IntraSessionAdjustment::not_requested()
            },
        );
    };

    let diff = actual_rir - target_rir;
    let step = (INTRA_SESSION_STEP * diff.abs()).min(MAX_INTRA_SESSION_ADJUSTMENT);
    let (adjustment_type, factor) = if diff >= 1.0 {
        (AdjustmentType::Increased, 1.0 + step)
    } else if diff <= -1.0 {
        (AdjustmentType::Decreased, 1.0 - step)
    } else {
        (AdjustmentType::None, 1.0)
    };

    (
        Some(prev_weight * factor),
        IntraSessionAdjustment {
            adjustment_type,
            applied: true,
            percent: round_dp((factor - 1.0) * 100.0, 2),
            rir_difference: Some(diff),
            error: None,
        },
    )
}

fn load_user_and_exercise(conn: &rusqlite::Connection, user_id: i64, exercise_id: i64) -> Result<(User, Exercise)> {
    let user = database::load_user(conn, user_id)?.ok_or(LiftError::NotFound {
        entity: "user",
        id: user_id,
    })?;
    let exercise = database::load_exercise(conn, exercise_id)?.ok_or(LiftError::NotFound {
        entity: "exercise",
        id: exercise_id,
    })?;
    Ok((user, exercise))
}

/// Working 1RM before plateau and phase adjustments
fn base_one_rm(conn: &rusqlite::Connection, user: &User, exercise: &Exercise) -> Result<(f64, String, Vec<E1rmStep>)> {
    let Some(record) = database::latest_1rm(conn, user.id, exercise.id)? else {
        let estimate = default_one_rm(&exercise.name, user.experience_level, user.sex);
        let mut steps = vec![E1rmStep::Default {
            exercise_key: estimate.exercise_key.clone(),
            level: estimate.level.as_str().to_string(),
        }];
        if estimate.sex_coefficient != 1.0 {
            steps.push(E1rmStep::SexAdjusted {
                coefficient: estimate.sex_coefficient,
            });
        }
        return Ok((estimate.one_rm, estimate.source_tag(user.sex), steps));
    };

    let stored = record.estimated_1rm;
    match record.source() {
        Some((weight, reps, rir)) => {
            let recalculated = estimate_1rm(weight, reps, rir, user.rir_bias);
            if recalculated.is_finite() && recalculated > 0.0 {
                Ok((
                    recalculated,
                    "history_recalculated_w_bias".to_string(),
                    vec![E1rmStep::RecalculatedWithBias { stored, recalculated }],
                ))
            } else {
                warn!(user_id = user.id, exercise_id = exercise.id, stored, "1RM recalculation failed, using stored value");
                Ok((
                    stored,
                    "history_recalc_fallback".to_string(),
                    vec![E1rmStep::RecalculationFallback { stored }],
                ))
            }
        }
        None => Ok((stored, "history".to_string(), vec![E1rmStep::History { stored }])),
    }
}

/// Online plateau check; may insert a plateau event (subject to cooldown)
fn check_plateau(
    conn: &rusqlite::Connection,
    clock: &dyn Clock,
    settings: &EngineSettings,
    user_id: i64,
    exercise_id: i64,
    samples: &[f64],
) -> PlateauCheck {
    if samples.len() < settings.min_history_for_plateau_check {
        return PlateauCheck {
            analysis: None,
            deload_applied: false,
            event_id: None,
            note: Some(format!(
                "{} of {} samples needed for a plateau check",
                samples.len(),
                settings.min_history_for_plateau_check
            )),
        };
    }

    let analysis = plateau::detect(samples, settings.online_min_duration);
    if !analysis.plateauing {
        return PlateauCheck {
            analysis: Some(analysis),
            deload_applied: false,
            event_id: None,
            note: None,
        };
    }

    let now = clock.now();
    let cooldown_start = now - chrono::Duration::weeks(settings.cooldown_weeks);
    let event: std::result::Result<Option<PlateauEvent>, DatabaseError> =
        database::recent_unacknowledged_plateau_event(conn, user_id, exercise_id, cooldown_start).and_then(
            |existing| match existing {
                Some(_) => Ok(None),
                None => {
                    let details = json!({
                        "status": analysis.status,
                        "slope": analysis.slope,
                        "relative_slope": analysis.relative_slope,
                        "confirmed_window": analysis.confirmed_window,
                        "samples": samples,
                        "deload_factor": plateau::AUTO_DELOAD_FACTOR,
                    });
                    database::insert_plateau_event(
                        conn,
                        user_id,
                        exercise_id,
                        now,
                        analysis.confirmed_window as u32,
                        plateau::AUTO_DELOAD_PROTOCOL,
                        &details,
                    )
                    .map(Some)
                }
            },
        );

    let (event_id, note) = match event {
        Ok(Some(event)) => {
            info!(user_id, exercise_id, event_id = event.id, "plateau detected, auto deload applied");
            (Some(event.id), None)
        }
        Ok(None) => (None, Some("plateau event suppressed by cooldown".to_string())),
        Err(err) => {
            warn!(user_id, exercise_id, error = %err, "failed to record plateau event");
            (None, Some("plateau event could not be recorded".to_string()))
        }
    };

    PlateauCheck {
        analysis: Some(analysis),
        deload_applied: true,
        event_id,
        note,
    }
}

fn explanation(
    rec_weight: f64,
    targets: &GoalTargets,
    perceived_rir: u32,
    meso: &MesocycleDetails,
    plateau: &PlateauCheck,
    fatigue_reduction: f64,
    intra: &IntraSessionAdjustment,
    readiness_percent: Option<f64>,
) -> String {
    let mut parts = vec![format!(
        "{} kg for {}-{} reps, stopping at about {} reps in reserve ({} week {}).",
        rec_weight,
        targets.rep_low,
        targets.rep_high,
        perceived_rir,
        meso.phase,
        meso.week_number
    )];
    if plateau.deload_applied {
        parts.push("Recent estimates have stalled, so the working max was reduced by 10%.".to_string());
    }
    if fatigue_reduction > 0.0 {
        parts.push(format!(
            "Load reduced {:.1}% for residual fatigue.",
            fatigue_reduction * 100.0
        ));
    }
    match intra.adjustment_type {
        AdjustmentType::Increased => parts.push(format!("Previous set felt easier than planned (+{}%).", intra.percent)),
        AdjustmentType::Decreased => parts.push(format!("Previous set felt harder than planned ({}%).", intra.percent)),
        AdjustmentType::None => {}
    }
    if let Some(percent) = readiness_percent {
        parts.push(format!("Readiness {percent:.0}%."));
    }
    parts.join(" ")
}

/// Recommend weight, rep range and RIR for the next set
pub fn recommend(
    db: &mut Database,
    clock: &dyn Clock,
    settings: &EngineSettings,
    user_id: i64,
    exercise_id: i64,
    previous: Option<&PreviousSetMetrics>,
) -> Result<Recommendation> {
    let tx = db.immediate_transaction()?;
    let now = clock.now();

    let (user, exercise) = load_user_and_exercise(&tx, user_id, exercise_id)?;
    let muscle_group = exercise.main_target_muscle_group.clone().ok_or_else(|| {
        LiftError::validation(format!("exercise {exercise_id} has no main target muscle group"))
    })?;

    // 1RM source
    let (mut one_rm, mut source, mut steps) = base_one_rm(&tx, &user, &exercise)?;

    // plateau check over the recent window
    let samples = database::recent_1rm_values(&tx, user_id, exercise_id, settings.plateau_check_window)?;
    let plateau_check = check_plateau(&tx, clock, settings, user_id, exercise_id, &samples);
    if plateau_check.deload_applied {
        one_rm *= plateau::AUTO_DELOAD_FACTOR;
        source.push_str("_plateau_deload");
        steps.push(E1rmStep::PlateauDeload {
            factor: plateau::AUTO_DELOAD_FACTOR,
        });
    }

    // mesocycle phase
    let cycle = mesocycle::get_or_create_current(&tx, user_id, clock.today())?;
    let modifier = cycle.phase.load_modifier();
    if modifier != 1.0 {
        one_rm *= modifier;
        source.push_str(&format!("_meso_{}", cycle.phase));
        steps.push(E1rmStep::MesocycleModifier {
            phase: cycle.phase,
            factor: modifier,
        });
    }
    let meso = MesocycleDetails {
        id: cycle.id,
        phase: cycle.phase,
        week_number: cycle.week_number,
        start_date: cycle.start_date,
        load_modifier: modifier,
    };

    // fatigue
    let fatigue = fatigue::fatigue_for_user(&tx, &user, &muscle_group, now, settings.fatigue_lookback_days)?;
    let fatigue_reduction = (fatigue.fatigue / 10.0 * 0.01).min(MAX_FATIGUE_REDUCTION).max(0.0);

    // goal-driven targets and base load
    let targets = goal_targets(user.goal_slider);
    let effective_rir = effective_target_rir(targets.target_rir_ideal, user.rir_bias);
    let target_rep = f64::from(targets.rep_low + targets.rep_high) / 2.0;
    let mut base_weight = weight_for_reps_to_failure(one_rm, target_rep + effective_rir);

    // previous set in this session
    let intra = match previous {
        Some(metrics) => {
            let (replacement, details) = intra_session_adjustment(metrics);
            if let Some(weight) = replacement {
                base_weight = weight;
            }
            if let Some(error) = &details.error {
                warn!(user_id, exercise_id, error = %error, "ignoring previous set metrics");
            }
            details
        }
        None => IntraSessionAdjustment::not_requested(),
    };

    let mut weight = base_weight * (1.0 - fatigue_reduction);

    // readiness from the latest completed workout
    let latest = database::latest_completed_workout(&tx, user_id)?;
    let readiness = match latest {
        Some(workout) if workout.sleep_hours.is_some() && workout.stress_level.is_some() => Some(
            readiness::readiness_for_user(
                &tx,
                user_id,
                workout.sleep_hours,
                workout.stress_level.map(f64::from),
                workout.hrv_ms,
                now,
                settings.hrv_baseline_days,
            )?,
        ),
        _ => None,
    };
    let readiness_multiplier = readiness.map(|r| r.multiplier).unwrap_or(1.0);
    weight *= readiness_multiplier;

    // snap to loadable weight
    let equipment = exercise.equipment_type.unwrap_or(user.equipment_type);
    let recommended = round_weight(
        weight,
        Some(&user.available_plates),
        Some(user.barbell_weight_kg),
        equipment,
    );

    tx.commit().map_err(DatabaseError::from)?;

    let perceived_rir = round_dp((targets.target_rir_ideal + user.rir_bias).clamp(0.0, 5.0), 0) as u32;
    let system_rir = round_dp(targets.target_rir_ideal, 0) as u32;
    let readiness_percent = readiness.map(|r| round_dp(r.score * 100.0, 1));

    debug!(
        user_id,
        exercise_id,
        one_rm,
        base_weight,
        fatigue = fatigue.fatigue,
        readiness_multiplier,
        unrounded = weight,
        recommended,
        "recommendation computed"
    );

    let explanation = explanation(
        recommended,
        &targets,
        perceived_rir,
        &meso,
        &plateau_check,
        fatigue_reduction,
        &intra,
        readiness_percent,
    );

    Ok(Recommendation {
        recommended_weight_kg: recommended,
        target_reps_low: targets.rep_low,
        target_reps_high: targets.rep_high,
        target_rir: perceived_rir,
        system_target_actual_rir: system_rir,
        estimated_1rm_kg: round_dp(one_rm, 2),
        e1rm_source: source,
        e1rm_transformations: steps,
        goal_slider: user.goal_slider,
        target_load_percent: round_dp(targets.load_pct * 100.0, 1),
        main_target_muscle_group: muscle_group,
        current_fatigue: fatigue.fatigue,
        fatigue_reduction_percent: round_dp(fatigue_reduction * 100.0, 2),
        user_rir_bias_applied: user.rir_bias,
        confidence_score: confidence_score(&samples),
        intra_session_adjustment_details: intra,
        plateau_analysis_details: plateau_check,
        mesocycle_details: meso,
        readiness_score_percent: readiness_percent,
        readiness_multiplier: round_dp(readiness_multiplier, 4),
        explanation,
    })
}

/// Explicit plateau analysis with a deload protocol
pub fn plateau_analysis(
    db: &Database,
    clock: &dyn Clock,
    settings: &EngineSettings,
    user_id: i64,
    exercise_id: i64,
    min_duration: Option<usize>,
    deload_weeks: Option<u32>,
) -> Result<PlateauReport> {
    let conn = db.conn();
    let (user, exercise) = load_user_and_exercise(conn, user_id, exercise_id)?;
    let min_duration = min_duration
        .unwrap_or(settings.analysis_min_duration)
        .clamp(2, plateau::PLATEAU_CHECK_WINDOW);
    if let Some(weeks) = deload_weeks {
        if !(1..=8).contains(&weeks) {
            return Err(LiftError::validation("deload_weeks must be within [1, 8]"));
        }
    }

    let samples = database::recent_1rm_values(conn, user_id, exercise_id, settings.plateau_check_window)?;
    let current_fatigue = match exercise.main_target_muscle_group.as_deref() {
        Some(muscle) => {
            fatigue::fatigue_for_user(conn, &user, muscle, clock.now(), settings.fatigue_lookback_days)?.fatigue
        }
        None => 0.0,
    };

    Ok(plateau::build_report(
        exercise_id,
        samples,
        min_duration,
        deload_weeks.or(settings.default_deload_weeks),
        current_fatigue,
    ))
}

/// Unacknowledged plateau events, newest first
pub fn plateau_notifications(db: &Database, user_id: i64) -> Result<Vec<PlateauEvent>> {
    database::load_user(db.conn(), user_id)?.ok_or(LiftError::NotFound {
        entity: "user",
        id: user_id,
    })?;
    Ok(database::unacknowledged_plateau_events(db.conn(), user_id)?)
}

/// Acknowledge a plateau event owned by `user_id`
pub fn acknowledge_plateau_event(db: &mut Database, clock: &dyn Clock, user_id: i64, event_id: i64) -> Result<PlateauEvent> {
    let tx = db.immediate_transaction()?;
    let not_found = LiftError::NotFound {
        entity: "plateau event",
        id: event_id,
    };
    let event = database::load_plateau_event(&tx, event_id)?
        .filter(|e| e.user_id == user_id)
        .ok_or(not_found)?;
    database::acknowledge_plateau_event(&tx, event.id, clock.now())?;
    let updated = database::load_plateau_event(&tx, event.id)?.ok_or(LiftError::NotFound {
        entity: "plateau event",
        id: event_id,
    })?;
    tx.commit().map_err(DatabaseError::from)?;
    info!(user_id, event_id, "plateau event acknowledged");
    Ok(updated)
}

/// Fatigue per muscle group; every known group when none is named
pub fn fatigue_status(
    db: &Database,
    clock: &dyn Clock,
    settings: &EngineSettings,
    user_id: i64,
    muscle_group: Option<&str>,
) -> Result<Vec<FatigueEntry>> {
    let conn = db.conn();
    let user = database::load_user(conn, user_id)?.ok_or(LiftError::NotFound {
        entity: "user",
        id: user_id,
    })?;
    let groups: Vec<&str> = match muscle_group {
        Some(group) => {
            let group = group.trim();
            if !MUSCLE_GROUPS.contains(&group) {
                return Err(LiftError::validation(format!("unknown muscle group: {group}")));
            }
            vec![group]
        }
        None => MUSCLE_GROUPS.to_vec(),
    };

    let now = clock.now();
    groups
        .into_iter()
        .map(|group| {
            fatigue::fatigue_for_user(conn, &user, group, now, settings.fatigue_lookback_days).map_err(LiftError::from)
        })
        .collect()
}

/// Lifter profile, for display
pub fn load_profile(db: &Database, user_id: i64) -> Result<models::User> {
    database::load_user(db.conn(), user_id)?.ok_or(LiftError::NotFound {
        entity: "user",
        id: user_id,
    })
}

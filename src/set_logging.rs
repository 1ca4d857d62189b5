//! Write path: logging, editing and deleting sets, closing workouts and
//! profile updates
//!
//! `log_set` is the learning step of the engine. One immediate transaction
//! reads the user's bias state, predicts the reps for the logged load, updates
//! the bias, appends a fresh 1RM estimate and stores the set. Any failure
//! rolls everything back, so the bias never moves without the matching 1RM
//! row and set.

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::database::{self, Database, NewSet, OneRmSource, WorkoutWellness};
use crate::error::{LiftError, Result};
use crate::models::{User, UserProfileUpdate, Workout, WorkoutSet};
use crate::one_rep_max::{estimate_1rm, predict_reps, round_dp};
use crate::rir_bias;

/// Reps at RIR above this stop counting as effective
pub const MTI_RIR_CUTOFF: f64 = 4.0;

pub const MAX_LOGGED_RIR: f64 = 10.0;

#[derive(Debug, Clone, Deserialize)]
pub struct LogSetRequest {
    pub weight_kg: f64,
    pub reps: i64,
    pub rir: f64,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone)]
struct ValidSet {
    weight: f64,
    reps: u32,
    rir: f64,
    notes: Option<String>,
    completed_at: DateTime<Utc>,
}

/// Years the store can write and read back as RFC 3339 text
const STORABLE_YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// Accepts RFC 3339, or a naive date-time interpreted as UTC.
///
/// Expanded years (`+10000-…`, negative years) parse in chrono but are
/// rejected here.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    let raw = raw.trim();
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
                .map(|naive| naive.and_utc())
        })
        .ok_or_else(|| LiftError::validation(format!("completed_at is not an ISO-8601 timestamp: {raw}")))?;

    if !STORABLE_YEARS.contains(&parsed.year()) {
        return Err(LiftError::validation(format!(
            "completed_at year must be within 0001-9999: {raw}"
        )));
    }
    Ok(parsed)
}

impl LogSetRequest {
    fn validate(self, now: DateTime<Utc>) -> Result<ValidSet> {
        if !self.weight_kg.is_finite() || self.weight_kg < 0.0 {
            return Err(LiftError::validation("weight_kg must be >= 0"));
        }
        let reps = u32::try_from(self.reps).map_err(|_| LiftError::validation("reps must be >= 0"))?;
        if !self.rir.is_finite() || !(0.0..=MAX_LOGGED_RIR).contains(&self.rir) {
            return Err(LiftError::validation("rir must be within [0, 10]"));
        }
        let completed_at = match self.completed_at.as_deref() {
            Some(raw) => parse_timestamp(raw)?,
            None => now,
        };
        Ok(ValidSet {
            weight: self.weight_kg,
            reps,
            rir: self.rir,
            notes: self.notes,
            completed_at,
        })
    }
}

/// Mechanical-Tension Index: load times the reps that were close enough to failure
pub fn compute_mti(weight: f64, reps: u32, rir: Option<f64>) -> i64 {
    let excess_reserve = (rir.unwrap_or(0.0) - MTI_RIR_CUTOFF).max(0.0);
    let effective_reps = (f64::from(reps) - excess_reserve).max(0.0);
    round_dp(weight * effective_reps, 0) as i64
}

#[derive(Debug, Clone, Serialize)]
pub struct LoggedSet {
    #[serde(flatten)]
    pub set: WorkoutSet,
    pub estimated_1rm: f64,
    pub rir_bias: f64,
    pub rir_bias_error_ema: f64,
    /// Reps the model expected at this load.
    ///
    /// `None` when there was no prior 1RM or the load was not below it. The
    /// set then counted as a neutral observation: predicted was taken equal
    /// to actual, so the bias held and only the error EMA decayed.
    pub predicted_reps: Option<f64>,
}

pub fn log_set(
    db: &mut Database,
    clock: &dyn Clock,
    user_id: i64,
    exercise_id: i64,
    request: LogSetRequest,
) -> Result<LoggedSet> {
    let valid = request.validate(clock.now())?;
    let tx = db.immediate_transaction()?;

    let user = database::load_user(&tx, user_id)?.ok_or(LiftError::NotFound {
        entity: "user",
        id: user_id,
    })?;
    database::load_exercise(&tx, exercise_id)?.ok_or(LiftError::NotFound {
        entity: "exercise",
        id: exercise_id,
    })?;

    let latest_1rm = database::latest_1rm(&tx, user_id, exercise_id)?
        .map(|record| record.estimated_1rm)
        .unwrap_or(0.0);

    // Without a usable prediction the set counts as a neutral observation
    let predicted = predict_reps(latest_1rm, valid.weight, Some(valid.rir), user.rir_bias);
    let actual = f64::from(valid.reps);
    let update = rir_bias::update(
        user.rir_bias,
        predicted.unwrap_or(actual),
        actual,
        user.rir_bias_lr,
        user.rir_bias_error_ema,
    );
    database::update_user_bias(&tx, user_id, update.bias, update.error_ema)?;
    debug!(
        user_id,
        predicted = ?predicted,
        actual,
        error = update.error,
        learning_rate = update.learning_rate,
        bias = update.bias,
        "rir bias updated"
    );

    let estimated_1rm = estimate_1rm(valid.weight, valid.reps, Some(valid.rir), update.bias);
    database::insert_1rm(
        &tx,
        user_id,
        exercise_id,
        estimated_1rm,
        Some(OneRmSource {
            weight: valid.weight,
            reps: valid.reps,
            rir: Some(valid.rir),
        }),
        valid.completed_at,
    )?;

    let workout = match database::find_workout_for_day(&tx, user_id, valid.completed_at.date_naive())? {
        Some(workout) => workout,
        None => database::create_workout(&tx, user_id, valid.completed_at)?,
    };
    let set_number = database::next_set_number(&tx, workout.id, exercise_id)?;

    let set = database::insert_set(
        &tx,
        NewSet {
            workout_id: workout.id,
            exercise_id,
            set_number,
            actual_weight: valid.weight,
            actual_reps: valid.reps,
            actual_rir: Some(valid.rir),
            mti: compute_mti(valid.weight, valid.reps, Some(valid.rir)),
            completed_at: valid.completed_at,
            notes: valid.notes,
        },
    )?;

    tx.commit().map_err(database::DatabaseError::from)?;

    info!(
        user_id,
        exercise_id,
        set_id = set.id,
        workout_id = workout.id,
        set_number,
        estimated_1rm,
        "set logged"
    );

    Ok(LoggedSet {
        set,
        estimated_1rm,
        rir_bias: update.bias,
        rir_bias_error_ema: update.error_ema,
        predicted_reps: predicted,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PatchedSet {
    #[serde(flatten)]
    pub set: WorkoutSet,
    /// Edits never revise 1RM history or the learned bias
    pub history_recalculated: bool,
}

const PATCHABLE_FIELDS: [&str; 4] = ["actual_weight", "actual_reps", "actual_rir", "notes"];

fn apply_patch(set: &mut WorkoutSet, fields: &Map<String, Value>) -> Result<()> {
    if fields.is_empty() {
        return Err(LiftError::validation("update contains no fields"));
    }
    if let Some(unknown) = fields.keys().find(|k| !PATCHABLE_FIELDS.contains(&k.as_str())) {
        return Err(LiftError::validation(format!("field cannot be updated: {unknown}")));
    }

    for (key, value) in fields {
        match key.as_str() {
            "actual_weight" => {
                let weight = value
                    .as_f64()
                    .filter(|w| w.is_finite() && *w >= 0.0)
                    .ok_or_else(|| LiftError::validation("actual_weight must be a number >= 0"))?;
                set.actual_weight = weight;
            }
            "actual_reps" => {
                let reps = value
                    .as_u64()
                    .and_then(|r| u32::try_from(r).ok())
                    .ok_or_else(|| LiftError::validation("actual_reps must be a non-negative integer"))?;
                set.actual_reps = reps;
            }
            "actual_rir" => {
                set.actual_rir = match value {
                    Value::Null => None,
                    other => Some(
                        other
                            .as_f64()
                            .filter(|r| (0.0..=MAX_LOGGED_RIR).contains(r))
                            .ok_or_else(|| LiftError::validation("actual_rir must be a number within [0, 10]"))?,
                    ),
                };
            }
            "notes" => {
                set.notes = match value {
                    Value::Null => None,
                    Value::String(text) => Some(text.clone()),
                    _ => return Err(LiftError::validation("notes must be a string")),
                };
            }
            _ => {}
        }
    }

    set.mti = compute_mti(set.actual_weight, set.actual_reps, set.actual_rir);
    Ok(())
}

/// Edit whitelisted fields of a set owned by `user_id`
pub fn patch_set(db: &mut Database, user_id: i64, set_id: i64, body: &Value) -> Result<PatchedSet> {
    let fields = body
        .as_object()
        .ok_or_else(|| LiftError::validation("update must be a JSON object"))?;

    let tx = db.immediate_transaction()?;
    let mut set = database::load_owned_set(&tx, set_id, user_id)?.ok_or(LiftError::NotFound {
        entity: "set",
        id: set_id,
    })?;
    apply_patch(&mut set, fields)?;
    database::update_set(&tx, &set)?;
    tx.commit().map_err(database::DatabaseError::from)?;

    info!(user_id, set_id, "set edited");
    Ok(PatchedSet {
        set,
        history_recalculated: false,
    })
}

/// Delete a set owned by `user_id`; history and bias are left as they are
pub fn delete_set(db: &mut Database, user_id: i64, set_id: i64) -> Result<()> {
    if !database::delete_owned_set(db.conn(), set_id, user_id)? {
        return Err(LiftError::NotFound {
            entity: "set",
            id: set_id,
        });
    }
    info!(user_id, set_id, "set deleted");
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompleteWorkoutRequest {
    pub sleep_hours: Option<f64>,
    pub stress_level: Option<u8>,
    pub hrv_ms: Option<f64>,
    pub session_rpe: Option<u8>,
}

impl CompleteWorkoutRequest {
    fn validate(&self) -> Result<WorkoutWellness> {
        if let Some(sleep) = self.sleep_hours {
            if !sleep.is_finite() || !(0.0..=24.0).contains(&sleep) {
                return Err(LiftError::validation("sleep_hours must be within [0, 24]"));
            }
        }
        for (name, value) in [("stress_level", self.stress_level), ("session_rpe", self.session_rpe)] {
            if let Some(v) = value {
                if !(1..=10).contains(&v) {
                    return Err(LiftError::validation(format!("{name} must be within [1, 10]")));
                }
            }
        }
        if let Some(hrv) = self.hrv_ms {
            if !hrv.is_finite() || hrv <= 0.0 {
                return Err(LiftError::validation("hrv_ms must be positive"));
            }
        }
        Ok(WorkoutWellness {
            sleep_hours: self.sleep_hours,
            stress_level: self.stress_level,
            hrv_ms: self.hrv_ms,
            session_rpe: self.session_rpe,
        })
    }
}

/// Close a workout and record the wellness inputs that feed readiness
pub fn complete_workout(
    db: &mut Database,
    clock: &dyn Clock,
    user_id: i64,
    workout_id: i64,
    request: &CompleteWorkoutRequest,
) -> Result<Workout> {
    let wellness = request.validate()?;
    let tx = db.immediate_transaction()?;
    let workout = database::load_workout(&tx, workout_id)?
        .filter(|w| w.user_id == user_id)
        .ok_or(LiftError::NotFound {
            entity: "workout",
            id: workout_id,
        })?;
    let completed_at = clock.now();
    database::complete_workout(&tx, workout.id, completed_at, &wellness)?;
    tx.commit().map_err(database::DatabaseError::from)?;

    info!(user_id, workout_id, "workout completed");
    Ok(Workout {
        completed_at: Some(completed_at),
        sleep_hours: wellness.sleep_hours,
        stress_level: wellness.stress_level,
        hrv_ms: wellness.hrv_ms,
        session_rpe: wellness.session_rpe,
        ..workout
    })
}

/// Validate and apply a partial profile update
pub fn update_profile(db: &mut Database, user_id: i64, update: &UserProfileUpdate) -> Result<User> {
    update.validate()?;
    let tx = db.immediate_transaction()?;
    let mut user = database::load_user(&tx, user_id)?.ok_or(LiftError::NotFound {
        entity: "user",
        id: user_id,
    })?;
    update.apply_to(&mut user);
    database::save_profile(&tx, &user)?;
    tx.commit().map_err(database::DatabaseError::from)?;

    info!(user_id, "profile updated");
    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_set() -> WorkoutSet {
        WorkoutSet {
            id: 1,
            workout_id: 1,
            exercise_id: 1,
            set_number: 1,
            actual_weight: 100.0,
            actual_reps: 5,
            actual_rir: Some(2.0),
            mti: 500,
            completed_at: Utc::now(),
            notes: None,
        }
    }

    #[test]
    fn test_mti_cutoff() {
        assert_eq!(compute_mti(100.0, 5, Some(2.0)), 500);
        assert_eq!(compute_mti(100.0, 5, Some(4.0)), 500);
        assert_eq!(compute_mti(100.0, 5, Some(6.0)), 300);
        assert_eq!(compute_mti(100.0, 2, Some(9.0)), 0);
        assert_eq!(compute_mti(62.5, 3, None), 188);
    }

    #[test]
    fn test_request_validation() {
        let now = Utc::now();
        let base = LogSetRequest {
            weight_kg: 80.0,
            reps: 8,
            rir: 2.0,
            notes: None,
            completed_at: None,
        };
        assert_eq!(base.clone().validate(now).unwrap().completed_at, now);
        assert!(LogSetRequest { weight_kg: -1.0, ..base.clone() }.validate(now).is_err());
        assert!(LogSetRequest { reps: -1, ..base.clone() }.validate(now).is_err());
        assert!(LogSetRequest { rir: 10.5, ..base.clone() }.validate(now).is_err());
        assert!(LogSetRequest {
            completed_at: Some("yesterday".into()),
            ..base.clone()
        }
        .validate(now)
        .is_err());
    }

    #[test]
    fn test_timestamp_formats() {
        let a = parse_timestamp("2024-05-01T10:00:00Z").unwrap();
        let b = parse_timestamp("2024-05-01T12:00:00+02:00").unwrap();
        let c = parse_timestamp("2024-05-01T10:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);

        assert!(parse_timestamp("+10000-01-01T00:00:00").is_err());
        assert!(parse_timestamp("-0001-01-01T00:00:00").is_err());
        assert!(parse_timestamp("9999-12-31T23:59:59Z").is_ok());
    }

    #[test]
    fn test_patch_whitelist_and_types() {
        let mut set = sample_set();
        assert!(apply_patch(&mut set, &Map::new()).is_err());
        let body = json!({"set_number": 4});
        assert!(apply_patch(&mut set, body.as_object().unwrap()).is_err());
        let body = json!({"actual_reps": "five"});
        assert!(apply_patch(&mut set, body.as_object().unwrap()).is_err());
        let body = json!({"actual_reps": 2.5});
        assert!(apply_patch(&mut set, body.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_patch_recomputes_mti() {
        let mut set = sample_set();
        let body = json!({"actual_weight": 90.0, "actual_rir": 6, "notes": "grindy"});
        apply_patch(&mut set, body.as_object().unwrap()).unwrap();
        assert_eq!(set.actual_weight, 90.0);
        assert_eq!(set.mti, 270);
        assert_eq!(set.notes.as_deref(), Some("grindy"));
    }

    #[test]
    fn test_wellness_validation() {
        let request = CompleteWorkoutRequest {
            stress_level: Some(11),
            ..Default::default()
        };
        assert!(request.validate().is_err());
        let request = CompleteWorkoutRequest {
            sleep_hours: Some(7.5),
            stress_level: Some(3),
            ..Default::default()
        };
        assert!(request.validate().is_ok());
    }
}

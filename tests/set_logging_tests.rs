//! Integration tests for the set-logging write path
//!
//! Each test runs against a private in-memory store with a pinned clock.

use chrono::{Duration, TimeZone, Utc};
use liftrs::clock::{Clock, FixedClock};
use liftrs::database::{self, Database, OneRmSource};
use liftrs::error::LiftError;
use liftrs::models::{EquipmentType, NewUser};
use liftrs::set_logging::{self, CompleteWorkoutRequest, LogSetRequest};
use serde_json::json;

fn clock() -> FixedClock {
    FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 18, 0, 0).unwrap())
}

fn setup(clock: &FixedClock) -> (Database, i64, i64) {
    let db = Database::open_in_memory().unwrap();
    let user = database::create_user(db.conn(), &NewUser::default(), clock.now()).unwrap();
    let exercise =
        database::create_exercise(db.conn(), "Bench Press", Some(EquipmentType::Barbell), Some("chest"))
            .unwrap();
    (db, user.id, exercise.id)
}

fn request(weight: f64, reps: i64, rir: f64) -> LogSetRequest {
    LogSetRequest {
        weight_kg: weight,
        reps,
        rir,
        notes: None,
        completed_at: None,
    }
}

#[test]
fn test_log_set_end_to_end() {
    let clock = clock();
    let (mut db, user_id, exercise_id) = setup(&clock);
    database::insert_1rm(
        db.conn(),
        user_id,
        exercise_id,
        100.0,
        None,
        Utc.with_ymd_and_hms(2024, 3, 1, 18, 0, 0).unwrap(),
    )
    .unwrap();

    let logged = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(100.0, 5, 2.0)).unwrap();

    assert_eq!(logged.estimated_1rm, 130.40);
    assert_eq!(logged.set.mti, 500);
    assert_eq!(logged.set.set_number, 1);
    assert_eq!(logged.rir_bias, 0.0);
    assert_eq!(logged.rir_bias_error_ema, 0.0);
    assert!(logged.predicted_reps.is_none());

    let latest = database::latest_1rm(db.conn(), user_id, exercise_id).unwrap().unwrap();
    assert_eq!(latest.estimated_1rm, 130.40);
    assert_eq!(latest.source(), Some((100.0, 5, Some(2.0))));
    assert_eq!(database::count_1rm_rows(db.conn(), user_id, exercise_id).unwrap(), 2);
}

#[test]
fn test_bias_learns_from_overperformance() {
    let clock = clock();
    let (mut db, user_id, exercise_id) = setup(&clock);
    database::insert_1rm(
        db.conn(),
        user_id,
        exercise_id,
        120.0,
        None,
        clock.now() - Duration::days(3),
    )
    .unwrap();

    // predicted ≈ (1 − 100/120)/0.0333 − 1 ≈ 4.0 reps, the lifter did 10
    let logged = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(100.0, 10, 1.0)).unwrap();
    let predicted = logged.predicted_reps.unwrap();
    assert!((predicted - 4.005).abs() < 0.01);
    assert!(logged.rir_bias > 0.0);
    assert!(logged.rir_bias_error_ema > 0.0);

    let user = database::load_user(db.conn(), user_id).unwrap().unwrap();
    assert_eq!(user.rir_bias, logged.rir_bias);
    assert_eq!(user.rir_bias_error_ema, logged.rir_bias_error_ema);
}

#[test]
fn test_sets_share_the_day_workout() {
    let clock = clock();
    let (mut db, user_id, exercise_id) = setup(&clock);

    let first = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(60.0, 8, 2.0)).unwrap();
    clock.advance(Duration::minutes(3));
    let second = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(60.0, 8, 1.0)).unwrap();

    assert_eq!(first.set.workout_id, second.set.workout_id);
    assert_eq!(second.set.set_number, 2);

    clock.advance(Duration::days(1));
    let next_day = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(60.0, 8, 2.0)).unwrap();
    assert_ne!(next_day.set.workout_id, first.set.workout_id);
    assert_eq!(next_day.set.set_number, 1);
}

#[test]
fn test_failed_write_rolls_back_everything() {
    let clock = clock();
    let (mut db, user_id, exercise_id) = setup(&clock);
    database::insert_1rm(
        db.conn(),
        user_id,
        exercise_id,
        120.0,
        Some(OneRmSource {
            weight: 100.0,
            reps: 5,
            rir: Some(2.0),
        }),
        clock.now() - Duration::days(2),
    )
    .unwrap();
    db.conn()
        .execute_batch(
            "CREATE TRIGGER fail_set_insert BEFORE INSERT ON workout_sets
             BEGIN SELECT RAISE(ABORT, 'boom'); END;",
        )
        .unwrap();

    let result = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(100.0, 10, 1.0));
    assert!(matches!(result, Err(LiftError::Database(_))));

    let user = database::load_user(db.conn(), user_id).unwrap().unwrap();
    assert_eq!(user.rir_bias, 0.0);
    assert_eq!(user.rir_bias_error_ema, 0.0);
    assert_eq!(database::count_1rm_rows(db.conn(), user_id, exercise_id).unwrap(), 1);
    assert_eq!(database::count_sets(db.conn(), user_id).unwrap(), 0);
}

#[test]
fn test_validation_rejects_bad_input() {
    let clock = clock();
    let (mut db, user_id, exercise_id) = setup(&clock);

    for bad in [request(-1.0, 5, 2.0), request(50.0, -1, 2.0), request(50.0, 5, 11.0)] {
        let err = set_logging::log_set(&mut db, &clock, user_id, exercise_id, bad).unwrap_err();
        assert!(matches!(err, LiftError::Validation(_)), "unexpected error: {err}");
    }

    let mut bad_time = request(50.0, 5, 2.0);
    bad_time.completed_at = Some("yesterday-ish".to_string());
    assert!(set_logging::log_set(&mut db, &clock, user_id, exercise_id, bad_time).is_err());

    let err = set_logging::log_set(&mut db, &clock, user_id, 999, request(50.0, 5, 2.0)).unwrap_err();
    assert_eq!(err.kind().status_code(), 404);
}

#[test]
fn test_expanded_year_is_rejected_before_storage() {
    let clock = clock();
    let (mut db, user_id, exercise_id) = setup(&clock);

    let mut far_future = request(100.0, 5, 2.0);
    far_future.completed_at = Some("+10000-01-01T00:00:00".to_string());
    let err = set_logging::log_set(&mut db, &clock, user_id, exercise_id, far_future).unwrap_err();
    assert_eq!(err.kind().status_code(), 400);
    assert_eq!(database::count_sets(db.conn(), user_id).unwrap(), 0);

    // history stays readable for the next write and the next recommendation
    let logged = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(100.0, 5, 2.0)).unwrap();
    assert_eq!(logged.estimated_1rm, 130.40);
    assert!(database::latest_1rm(db.conn(), user_id, exercise_id).unwrap().is_some());
}

#[test]
fn test_patch_and_delete_respect_ownership() {
    let clock = clock();
    let (mut db, user_id, exercise_id) = setup(&clock);
    let other = database::create_user(db.conn(), &NewUser::default(), clock.now()).unwrap();
    let logged = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(80.0, 6, 5.0)).unwrap();
    // rir 5 exceeds the cutoff by one: 80 · 5
    assert_eq!(logged.set.mti, 400);

    let err = set_logging::patch_set(&mut db, other.id, logged.set.id, &json!({"notes": "mine"})).unwrap_err();
    assert_eq!(err.kind().status_code(), 404);

    let patched =
        set_logging::patch_set(&mut db, user_id, logged.set.id, &json!({"actual_rir": 2, "notes": "easy"}))
            .unwrap();
    assert_eq!(patched.set.mti, 480);
    assert_eq!(patched.set.notes.as_deref(), Some("easy"));
    assert!(!patched.history_recalculated);
    // history is not rewritten by edits
    assert_eq!(database::count_1rm_rows(db.conn(), user_id, exercise_id).unwrap(), 1);

    assert!(set_logging::patch_set(&mut db, user_id, logged.set.id, &json!({})).is_err());
    assert!(set_logging::patch_set(&mut db, user_id, logged.set.id, &json!({"set_number": 3})).is_err());
    assert!(set_logging::patch_set(&mut db, user_id, logged.set.id, &json!({"actual_reps": "six"})).is_err());

    assert!(set_logging::delete_set(&mut db, other.id, logged.set.id).is_err());
    set_logging::delete_set(&mut db, user_id, logged.set.id).unwrap();
    assert_eq!(database::count_sets(db.conn(), user_id).unwrap(), 0);
    assert!(set_logging::delete_set(&mut db, user_id, logged.set.id).is_err());
}

#[test]
fn test_complete_workout_records_wellness() {
    let clock = clock();
    let (mut db, user_id, exercise_id) = setup(&clock);
    let logged = set_logging::log_set(&mut db, &clock, user_id, exercise_id, request(60.0, 8, 2.0)).unwrap();

    let request = CompleteWorkoutRequest {
        sleep_hours: Some(7.5),
        stress_level: Some(3),
        hrv_ms: Some(55.0),
        session_rpe: Some(8),
    };
    let workout =
        set_logging::complete_workout(&mut db, &clock, user_id, logged.set.workout_id, &request).unwrap();
    assert!(workout.completed_at.is_some());

    let stored = database::latest_completed_workout(db.conn(), user_id).unwrap().unwrap();
    assert_eq!(stored.id, logged.set.workout_id);
    assert_eq!(stored.stress_level, Some(3));

    let invalid = CompleteWorkoutRequest {
        stress_level: Some(11),
        ..CompleteWorkoutRequest::default()
    };
    assert!(set_logging::complete_workout(&mut db, &clock, user_id, logged.set.workout_id, &invalid).is_err());
}

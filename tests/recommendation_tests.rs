//! Integration tests for the recommendation read path

use chrono::{Duration, TimeZone, Utc};
use liftrs::clock::{Clock, FixedClock};
use liftrs::config::EngineSettings;
use liftrs::database::{self, Database, OneRmSource};
use liftrs::models::{EquipmentType, ExperienceLevel, NewUser, Sex};
use liftrs::plateau::PlateauStatus;
use liftrs::recommendation::{self, AdjustmentType, E1rmStep, PreviousSetMetrics};
use liftrs::set_logging::{self, CompleteWorkoutRequest, LogSetRequest};
use serde_json::json;

struct Fixture {
    db: Database,
    clock: FixedClock,
    settings: EngineSettings,
    user_id: i64,
    bench_id: i64,
}

fn fixture(new_user: NewUser) -> Fixture {
    let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 9, 2, 17, 30, 0).unwrap());
    let db = Database::open_in_memory().unwrap();
    let user = database::create_user(db.conn(), &new_user, clock.now()).unwrap();
    let bench =
        database::create_exercise(db.conn(), "Bench Press", Some(EquipmentType::Barbell), Some("chest"))
            .unwrap();
    Fixture {
        db,
        clock,
        settings: EngineSettings::default(),
        user_id: user.id,
        bench_id: bench.id,
    }
}

fn seed_history(f: &Fixture, values: &[f64]) {
    for (i, value) in values.iter().enumerate() {
        let at = f.clock.now() - Duration::days((values.len() - i) as i64 * 2);
        database::insert_1rm(f.db.conn(), f.user_id, f.bench_id, *value, None, at).unwrap();
    }
}

#[test]
fn test_plateau_triggers_auto_deload_once() {
    let mut f = fixture(NewUser::default());
    seed_history(&f, &[100.0; 10]);

    let rec =
        recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, f.bench_id, None).unwrap();
    assert_eq!(rec.estimated_1rm_kg, 90.0);
    assert!(rec.e1rm_source.contains("_plateau_deload"));
    assert!(rec.plateau_analysis_details.deload_applied);
    assert!(rec.plateau_analysis_details.event_id.is_some());
    assert_eq!(
        rec.plateau_analysis_details.analysis.as_ref().map(|a| a.status),
        Some(PlateauStatus::Stagnation)
    );
    assert_eq!(rec.confidence_score, Some(1.0));

    f.clock.advance(Duration::days(7));
    let again =
        recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, f.bench_id, None).unwrap();
    assert!(again.plateau_analysis_details.deload_applied);
    assert!(again.plateau_analysis_details.event_id.is_none());

    let events = recommendation::plateau_notifications(&f.db, f.user_id).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].protocol_applied, "auto_deload_10_percent");
}

#[test]
fn test_acknowledged_event_allows_new_one() {
    let mut f = fixture(NewUser::default());
    seed_history(&f, &[100.0; 6]);

    let rec =
        recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, f.bench_id, None).unwrap();
    let event_id = rec.plateau_analysis_details.event_id.unwrap();

    let other = database::create_user(f.db.conn(), &NewUser::default(), f.clock.now()).unwrap();
    let err = recommendation::acknowledge_plateau_event(&mut f.db, &f.clock, other.id, event_id).unwrap_err();
    assert_eq!(err.kind().status_code(), 404);

    let acked = recommendation::acknowledge_plateau_event(&mut f.db, &f.clock, f.user_id, event_id).unwrap();
    assert!(acked.acknowledged_at.is_some());
    assert!(recommendation::plateau_notifications(&f.db, f.user_id).unwrap().is_empty());

    let next =
        recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, f.bench_id, None).unwrap();
    assert!(next.plateau_analysis_details.event_id.is_some());
}

#[test]
fn test_progressing_history_recalculated_with_bias() {
    let mut f = fixture(NewUser::default());
    seed_history(&f, &[90.0, 92.5, 95.0, 97.5]);
    database::insert_1rm(
        f.db.conn(),
        f.user_id,
        f.bench_id,
        130.40,
        Some(OneRmSource {
            weight: 100.0,
            reps: 5,
            rir: Some(2.0),
        }),
        f.clock.now() - Duration::hours(1),
    )
    .unwrap();
    database::update_user_bias(f.db.conn(), f.user_id, 1.0, 0.0).unwrap();

    let rec =
        recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, f.bench_id, None).unwrap();
    assert_eq!(rec.e1rm_source, "history_recalculated_w_bias");
    assert_eq!(rec.estimated_1rm_kg, 124.97);
    assert!(!rec.plateau_analysis_details.deload_applied);
    assert_eq!(
        rec.e1rm_transformations,
        vec![E1rmStep::RecalculatedWithBias {
            stored: 130.40,
            recalculated: 124.97
        }]
    );
    assert_eq!(rec.user_rir_bias_applied, 1.0);
    // goal 0.5: ideal RIR 1.75, shown as round(1.75 + 1.0)
    assert_eq!(rec.target_rir, 3);
    assert_eq!(rec.system_target_actual_rir, 2);
    assert_eq!((rec.target_reps_low, rec.target_reps_high), (5, 9));
}

#[test]
fn test_default_estimate_for_new_lifter() {
    let mut f = fixture(NewUser {
        experience_level: Some(ExperienceLevel::Beginner),
        sex: Some(Sex::Female),
        ..NewUser::default()
    });
    let squat =
        database::create_exercise(f.db.conn(), "Back Squat", Some(EquipmentType::Barbell), Some("quads")).unwrap();

    let rec = recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, squat.id, None).unwrap();
    assert_eq!(rec.e1rm_source, "default_squat_beginner_female");
    assert_eq!(rec.estimated_1rm_kg, 35.0);
    // 35 · (1 − 0.0333·8.75) ≈ 24.8 → bar + 2 × 2.5
    assert_eq!(rec.recommended_weight_kg, 25.0);
    assert!(rec.confidence_score.is_none());
    assert_eq!(rec.readiness_score_percent, None);
    assert_eq!(rec.readiness_multiplier, 1.0);
    assert_eq!(rec.mesocycle_details.week_number, 1);
}

#[test]
fn test_intra_session_adjustment_replaces_base() {
    let mut f = fixture(NewUser::default());
    let previous = PreviousSetMetrics {
        prev_actual_rir: Some(json!("4")),
        prev_target_rir: Some(json!(2)),
        prev_weight_lifted: Some(json!(80.0)),
    };

    let rec = recommendation::recommend(
        &mut f.db,
        &f.clock,
        &f.settings,
        f.user_id,
        f.bench_id,
        Some(&previous),
    )
    .unwrap();
    let details = &rec.intra_session_adjustment_details;
    assert_eq!(details.adjustment_type, AdjustmentType::Increased);
    assert!(details.applied);
    // 80 · 1.05 = 84; 32 kg a side cannot be loaded, 32.5 is closest
    assert_eq!(rec.recommended_weight_kg, 85.0);

    let garbled = PreviousSetMetrics {
        prev_actual_rir: Some(json!({"nested": true})),
        ..previous
    };
    let rec = recommendation::recommend(
        &mut f.db,
        &f.clock,
        &f.settings,
        f.user_id,
        f.bench_id,
        Some(&garbled),
    )
    .unwrap();
    assert_eq!(rec.intra_session_adjustment_details.adjustment_type, AdjustmentType::None);
    assert!(rec.intra_session_adjustment_details.error.is_some());
}

#[test]
fn test_readiness_from_completed_workout() {
    let mut f = fixture(NewUser::default());
    let logged = set_logging::log_set(
        &mut f.db,
        &f.clock,
        f.user_id,
        f.bench_id,
        LogSetRequest {
            weight_kg: 60.0,
            reps: 8,
            rir: 2.0,
            notes: None,
            completed_at: None,
        },
    )
    .unwrap();
    set_logging::complete_workout(
        &mut f.db,
        &f.clock,
        f.user_id,
        logged.set.workout_id,
        &CompleteWorkoutRequest {
            sleep_hours: Some(8.0),
            stress_level: Some(1),
            hrv_ms: None,
            session_rpe: None,
        },
    )
    .unwrap();

    let rec =
        recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, f.bench_id, None).unwrap();
    assert_eq!(rec.readiness_score_percent, Some(70.0));
    assert!((rec.readiness_multiplier - 1.028).abs() < 1e-9);
    // the logged set is still fatiguing the chest
    assert!(rec.current_fatigue > 0.0);
    assert!(rec.fatigue_reduction_percent > 0.0);
}

#[test]
fn test_missing_entities() {
    let mut f = fixture(NewUser::default());
    let err = recommendation::recommend(&mut f.db, &f.clock, &f.settings, 404, f.bench_id, None).unwrap_err();
    assert_eq!(err.kind().status_code(), 404);
    let err = recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, 404, None).unwrap_err();
    assert_eq!(err.kind().status_code(), 404);

    let unlabeled = database::create_exercise(f.db.conn(), "Mystery Move", None, None).unwrap();
    let err =
        recommendation::recommend(&mut f.db, &f.clock, &f.settings, f.user_id, unlabeled.id, None).unwrap_err();
    assert_eq!(err.kind().status_code(), 400);
}

#[test]
fn test_explicit_plateau_analysis() {
    let f = fixture(NewUser::default());
    seed_history(&f, &[100.0; 8]);

    let report =
        recommendation::plateau_analysis(&f.db, &f.clock, &f.settings, f.user_id, f.bench_id, None, None)
            .unwrap();
    assert!(report.analysis.plateauing);
    assert_eq!(report.recommended_action, "deload");
    assert!(!report.deload_protocol.is_empty());
    assert_eq!(report.samples.len(), 8);

    let report =
        recommendation::plateau_analysis(&f.db, &f.clock, &f.settings, f.user_id, f.bench_id, Some(12), Some(3))
            .unwrap();
    assert!(!report.analysis.plateauing);
    assert_eq!(report.recommended_action, "monitor");

    assert!(recommendation::plateau_analysis(
        &f.db,
        &f.clock,
        &f.settings,
        f.user_id,
        f.bench_id,
        None,
        Some(0)
    )
    .is_err());
}

#[test]
fn test_fatigue_status() {
    let mut f = fixture(NewUser::default());
    set_logging::log_set(
        &mut f.db,
        &f.clock,
        f.user_id,
        f.bench_id,
        LogSetRequest {
            weight_kg: 100.0,
            reps: 5,
            rir: 2.0,
            notes: None,
            completed_at: None,
        },
    )
    .unwrap();
    f.clock.advance(Duration::hours(48));

    let all = recommendation::fatigue_status(&f.db, &f.clock, &f.settings, f.user_id, None).unwrap();
    assert_eq!(all.len(), 11);

    let chest = recommendation::fatigue_status(&f.db, &f.clock, &f.settings, f.user_id, Some("chest")).unwrap();
    assert_eq!(chest.len(), 1);
    // 500 MTI → stimulus 5, one tau later
    assert!((chest[0].fatigue - 1.84).abs() < 1e-9);
    assert_eq!(chest[0].sessions_considered, 1);

    let err =
        recommendation::fatigue_status(&f.db, &f.clock, &f.settings, f.user_id, Some("wings")).unwrap_err();
    assert_eq!(err.kind().status_code(), 400);
}

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{ffi, params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use crate::fatigue::StimulusSession;
use crate::models::{
    EquipmentType, Exercise, Mesocycle, MesocyclePhase, NewUser, OneRepMaxRecord, PlateauEvent,
    User, Workout, WorkoutSet,
};

/// Database error types
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Data not found: {0}")]
    NotFound(String),
    #[error("Integrity check failed: {0}")]
    Integrity(String),
}

impl DatabaseError {
    fn sqlite_code(&self) -> Option<ffi::ErrorCode> {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => Some(err.code),
            _ => None,
        }
    }

    /// Lock contention; the same request may succeed if retried
    pub fn is_transient(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ffi::ErrorCode::DatabaseBusy) | Some(ffi::ErrorCode::DatabaseLocked)
        )
    }

    pub fn is_constraint_violation(&self) -> bool {
        self.sqlite_code() == Some(ffi::ErrorCode::ConstraintViolation)
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(err: serde_json::Error) -> Self {
        DatabaseError::Serialization(err.to_string())
    }
}

/// Reference exercises installed by `init-db`
pub const REFERENCE_EXERCISES: [(&str, EquipmentType, &str); 7] = [
    ("Bench Press", EquipmentType::Barbell, "chest"),
    ("Back Squat", EquipmentType::Barbell, "quads"),
    ("Deadlift", EquipmentType::Barbell, "hamstrings"),
    ("Overhead Press", EquipmentType::Barbell, "shoulders"),
    ("Barbell Row", EquipmentType::Barbell, "back"),
    ("Dumbbell Curl", EquipmentType::DumbbellPair, "biceps"),
    ("Leg Press", EquipmentType::Machine, "quads"),
];

/// Database connection and management
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create or open a database at the specified path
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, DatabaseError> {
        let conn = Connection::open(db_path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Private in-memory database (tests, dry runs)
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let db = Self {
            conn: Connection::open_in_memory()?,
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Initialize database schema with tables and indexes
    fn init_schema(&self) -> Result<(), DatabaseError> {
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        self.conn.busy_timeout(std::time::Duration::from_secs(5))?;

        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                goal_slider REAL NOT NULL DEFAULT 0.5 CHECK (goal_slider BETWEEN 0 AND 1),
                rir_bias REAL NOT NULL DEFAULT 0 CHECK (rir_bias BETWEEN -3 AND 3),
                rir_bias_lr REAL NOT NULL DEFAULT 0.1 CHECK (rir_bias_lr > 0),
                rir_bias_error_ema REAL NOT NULL DEFAULT 0,
                recovery_multipliers TEXT NOT NULL DEFAULT '{}',
                available_plates TEXT NOT NULL DEFAULT '[]',
                barbell_weight_kg REAL NOT NULL DEFAULT 20 CHECK (barbell_weight_kg > 0),
                equipment_type TEXT NOT NULL DEFAULT 'barbell',
                experience_level TEXT,
                sex TEXT,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exercises (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                equipment_type TEXT,
                main_target_muscle_group TEXT
            );

            CREATE TABLE IF NOT EXISTS workouts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                sleep_hours REAL,
                stress_level INTEGER CHECK (stress_level BETWEEN 1 AND 10),
                hrv_ms REAL,
                session_rpe INTEGER CHECK (session_rpe BETWEEN 1 AND 10)
            );

            CREATE TABLE IF NOT EXISTS workout_sets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                workout_id INTEGER NOT NULL REFERENCES workouts (id) ON DELETE CASCADE,
                exercise_id INTEGER NOT NULL REFERENCES exercises (id),
                set_number INTEGER NOT NULL,
                actual_weight REAL NOT NULL,
                actual_reps INTEGER NOT NULL,
                actual_rir REAL,
                mti INTEGER NOT NULL DEFAULT 0,
                completed_at TEXT NOT NULL,
                notes TEXT,
                UNIQUE (workout_id, exercise_id, set_number)
            );

            CREATE TABLE IF NOT EXISTS estimated_1rm_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
                exercise_id INTEGER NOT NULL REFERENCES exercises (id),
                estimated_1rm REAL NOT NULL,
                source_weight REAL,
                source_reps INTEGER,
                source_rir REAL,
                calculated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS mesocycles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
                phase TEXT NOT NULL,
                start_date TEXT NOT NULL,
                week_number INTEGER NOT NULL CHECK (week_number >= 1)
            );

            CREATE TABLE IF NOT EXISTS plateau_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users (id) ON DELETE CASCADE,
                exercise_id INTEGER NOT NULL REFERENCES exercises (id),
                detected_at TEXT NOT NULL,
                plateau_duration INTEGER NOT NULL,
                protocol_applied TEXT NOT NULL,
                details TEXT NOT NULL DEFAULT '{}',
                acknowledged_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_workouts_user_started ON workouts (user_id, started_at);
            CREATE INDEX IF NOT EXISTS idx_sets_workout_exercise ON workout_sets (workout_id, exercise_id);
            CREATE INDEX IF NOT EXISTS idx_1rm_user_exercise ON estimated_1rm_history (user_id, exercise_id, calculated_at);
            CREATE INDEX IF NOT EXISTS idx_mesocycles_user ON mesocycles (user_id, start_date);
            CREATE INDEX IF NOT EXISTS idx_plateau_user_exercise ON plateau_events (user_id, exercise_id, detected_at);
            "#,
        )?;

        Ok(())
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// `BEGIN IMMEDIATE`: takes the write lock up front, which serializes
    /// concurrent read-modify-write cycles on the same user's state
    pub fn immediate_transaction(&mut self) -> Result<Transaction<'_>, DatabaseError> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// Install the reference exercise catalogue; existing names are left alone
    pub fn seed_reference_exercises(&self) -> Result<usize, DatabaseError> {
        let mut inserted = 0;
        for (name, equipment, muscle) in REFERENCE_EXERCISES {
            inserted += self.conn.execute(
                "INSERT OR IGNORE INTO exercises (name, equipment_type, main_target_muscle_group)
                 VALUES (?1, ?2, ?3)",
                params![name, equipment.as_str(), muscle],
            )?;
        }
        Ok(inserted)
    }
}

/// Timestamps are stored as fixed-width RFC 3339 text so they sort lexically
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp {raw}: {e}")))
}

fn optional_timestamp_column(row: &Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => timestamp_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn date_column(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| conversion_error(idx, format!("bad date {raw}: {e}")))
}

fn enum_column<T: FromStr>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    raw.parse::<T>()
        .map_err(|_| conversion_error(idx, format!("unexpected value {raw}")))
}

fn optional_enum_column<T: FromStr>(row: &Row, idx: usize) -> rusqlite::Result<Option<T>> {
    match row.get::<_, Option<String>>(idx)? {
        Some(_) => enum_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| conversion_error(idx, format!("bad json: {e}")))
}

// ---------------------------------------------------------------------------
// users

const USER_COLUMNS: &str = "id, goal_slider, rir_bias, rir_bias_lr, rir_bias_error_ema,
    recovery_multipliers, available_plates, barbell_weight_kg, equipment_type,
    experience_level, sex";

fn user_from_row(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        goal_slider: row.get(1)?,
        rir_bias: row.get(2)?,
        rir_bias_lr: row.get(3)?,
        rir_bias_error_ema: row.get(4)?,
        recovery_multipliers: json_column::<HashMap<String, f64>>(row, 5)?,
        available_plates: json_column::<Vec<f64>>(row, 6)?,
        barbell_weight_kg: row.get(7)?,
        equipment_type: enum_column(row, 8)?,
        experience_level: optional_enum_column(row, 9)?,
        sex: optional_enum_column(row, 10)?,
    })
}

pub fn create_user(conn: &Connection, user: &NewUser, now: DateTime<Utc>) -> Result<User, DatabaseError> {
    conn.execute(
        "INSERT INTO users (goal_slider, rir_bias_lr, recovery_multipliers, available_plates,
            barbell_weight_kg, equipment_type, experience_level, sex, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            user.goal_slider,
            user.rir_bias_lr,
            serde_json::to_string(&user.recovery_multipliers)?,
            serde_json::to_string(&crate::models::normalize_plates(&user.available_plates))?,
            user.barbell_weight_kg,
            user.equipment_type.as_str(),
            user.experience_level.map(|l| l.as_str()),
            user.sex.map(|s| s.as_str()),
            format_timestamp(now),
        ],
    )?;
    let id = conn.last_insert_rowid();
    load_user(conn, id)?.ok_or_else(|| DatabaseError::Integrity(format!("user {id} vanished after insert")))
}

pub fn load_user(conn: &Connection, user_id: i64) -> Result<Option<User>, DatabaseError> {
    let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1");
    Ok(conn.query_row(&sql, params![user_id], user_from_row).optional()?)
}

/// Persist the learned bias state of a user
pub fn update_user_bias(
    conn: &Connection,
    user_id: i64,
    rir_bias: f64,
    error_ema: f64,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET rir_bias = ?1, rir_bias_error_ema = ?2 WHERE id = ?3",
        params![rir_bias, error_ema, user_id],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound(format!("user {user_id}")));
    }
    Ok(())
}

/// Persist the profile (dynamic configuration) fields of a user
pub fn save_profile(conn: &Connection, user: &User) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE users SET goal_slider = ?1, rir_bias_lr = ?2, recovery_multipliers = ?3,
            available_plates = ?4, barbell_weight_kg = ?5, equipment_type = ?6,
            experience_level = ?7, sex = ?8
         WHERE id = ?9",
        params![
            user.goal_slider,
            user.rir_bias_lr,
            serde_json::to_string(&user.recovery_multipliers)?,
            serde_json::to_string(&user.available_plates)?,
            user.barbell_weight_kg,
            user.equipment_type.as_str(),
            user.experience_level.map(|l| l.as_str()),
            user.sex.map(|s| s.as_str()),
            user.id,
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound(format!("user {}", user.id)));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// exercises

fn exercise_from_row(row: &Row) -> rusqlite::Result<Exercise> {
    Ok(Exercise {
        id: row.get(0)?,
        name: row.get(1)?,
        equipment_type: optional_enum_column(row, 2)?,
        main_target_muscle_group: row.get(3)?,
    })
}

pub fn create_exercise(
    conn: &Connection,
    name: &str,
    equipment_type: Option<EquipmentType>,
    main_target_muscle_group: Option<&str>,
) -> Result<Exercise, DatabaseError> {
    conn.execute(
        "INSERT INTO exercises (name, equipment_type, main_target_muscle_group) VALUES (?1, ?2, ?3)",
        params![name, equipment_type.map(|e| e.as_str()), main_target_muscle_group],
    )?;
    Ok(Exercise {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        equipment_type,
        main_target_muscle_group: main_target_muscle_group.map(str::to_string),
    })
}

pub fn load_exercise(conn: &Connection, exercise_id: i64) -> Result<Option<Exercise>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, name, equipment_type, main_target_muscle_group FROM exercises WHERE id = ?1",
            params![exercise_id],
            exercise_from_row,
        )
        .optional()?)
}

pub fn list_exercises(conn: &Connection) -> Result<Vec<Exercise>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT id, name, equipment_type, main_target_muscle_group FROM exercises ORDER BY id")?;
    let rows = stmt.query_map([], exercise_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ---------------------------------------------------------------------------
// 1RM history

const ONE_RM_COLUMNS: &str = "id, user_id, exercise_id, estimated_1rm, source_weight, source_reps,
    source_rir, calculated_at";

fn one_rm_from_row(row: &Row) -> rusqlite::Result<OneRepMaxRecord> {
    Ok(OneRepMaxRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        exercise_id: row.get(2)?,
        estimated_1rm: row.get(3)?,
        source_weight: row.get(4)?,
        source_reps: row.get(5)?,
        source_rir: row.get(6)?,
        calculated_at: timestamp_column(row, 7)?,
    })
}

/// Current 1RM: the latest row by `calculated_at`
pub fn latest_1rm(
    conn: &Connection,
    user_id: i64,
    exercise_id: i64,
) -> Result<Option<OneRepMaxRecord>, DatabaseError> {
    let sql = format!(
        "SELECT {ONE_RM_COLUMNS} FROM estimated_1rm_history
         WHERE user_id = ?1 AND exercise_id = ?2
         ORDER BY calculated_at DESC, id DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![user_id, exercise_id], one_rm_from_row)
        .optional()?)
}

/// Up to `limit` most recent estimates, oldest first
pub fn recent_1rm_values(
    conn: &Connection,
    user_id: i64,
    exercise_id: i64,
    limit: usize,
) -> Result<Vec<f64>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT estimated_1rm FROM estimated_1rm_history
         WHERE user_id = ?1 AND exercise_id = ?2
         ORDER BY calculated_at DESC, id DESC LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![user_id, exercise_id, limit as i64], |row| row.get::<_, f64>(0))?;
    let mut values = rows.collect::<rusqlite::Result<Vec<f64>>>()?;
    values.reverse();
    Ok(values)
}

#[derive(Debug, Clone, Copy)]
pub struct OneRmSource {
    pub weight: f64,
    pub reps: u32,
    pub rir: Option<f64>,
}

pub fn insert_1rm(
    conn: &Connection,
    user_id: i64,
    exercise_id: i64,
    estimated_1rm: f64,
    source: Option<OneRmSource>,
    calculated_at: DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO estimated_1rm_history
            (user_id, exercise_id, estimated_1rm, source_weight, source_reps, source_rir, calculated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            user_id,
            exercise_id,
            estimated_1rm,
            source.map(|s| s.weight),
            source.map(|s| s.reps),
            source.and_then(|s| s.rir),
            format_timestamp(calculated_at),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn count_1rm_rows(conn: &Connection, user_id: i64, exercise_id: i64) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM estimated_1rm_history WHERE user_id = ?1 AND exercise_id = ?2",
        params![user_id, exercise_id],
        |row| row.get(0),
    )?)
}

// ---------------------------------------------------------------------------
// workouts

const WORKOUT_COLUMNS: &str =
    "id, user_id, started_at, completed_at, sleep_hours, stress_level, hrv_ms, session_rpe";

fn workout_from_row(row: &Row) -> rusqlite::Result<Workout> {
    Ok(Workout {
        id: row.get(0)?,
        user_id: row.get(1)?,
        started_at: timestamp_column(row, 2)?,
        completed_at: optional_timestamp_column(row, 3)?,
        sleep_hours: row.get(4)?,
        stress_level: row.get(5)?,
        hrv_ms: row.get(6)?,
        session_rpe: row.get(7)?,
    })
}

pub fn load_workout(conn: &Connection, workout_id: i64) -> Result<Option<Workout>, DatabaseError> {
    let sql = format!("SELECT {WORKOUT_COLUMNS} FROM workouts WHERE id = ?1");
    Ok(conn.query_row(&sql, params![workout_id], workout_from_row).optional()?)
}

/// Latest workout of the user that started on the given UTC date
pub fn find_workout_for_day(
    conn: &Connection,
    user_id: i64,
    day: NaiveDate,
) -> Result<Option<Workout>, DatabaseError> {
    let sql = format!(
        "SELECT {WORKOUT_COLUMNS} FROM workouts
         WHERE user_id = ?1 AND substr(started_at, 1, 10) = ?2
         ORDER BY started_at DESC, id DESC LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![user_id, day.format("%Y-%m-%d").to_string()], workout_from_row)
        .optional()?)
}

pub fn create_workout(
    conn: &Connection,
    user_id: i64,
    started_at: DateTime<Utc>,
) -> Result<Workout, DatabaseError> {
    conn.execute(
        "INSERT INTO workouts (user_id, started_at) VALUES (?1, ?2)",
        params![user_id, format_timestamp(started_at)],
    )?;
    Ok(Workout {
        id: conn.last_insert_rowid(),
        user_id,
        started_at,
        completed_at: None,
        sleep_hours: None,
        stress_level: None,
        hrv_ms: None,
        session_rpe: None,
    })
}

/// Wellness data captured when a workout is closed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WorkoutWellness {
    pub sleep_hours: Option<f64>,
    pub stress_level: Option<u8>,
    pub hrv_ms: Option<f64>,
    pub session_rpe: Option<u8>,
}

pub fn complete_workout(
    conn: &Connection,
    workout_id: i64,
    completed_at: DateTime<Utc>,
    wellness: &WorkoutWellness,
) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE workouts SET completed_at = ?1, sleep_hours = ?2, stress_level = ?3,
            hrv_ms = ?4, session_rpe = ?5
         WHERE id = ?6",
        params![
            format_timestamp(completed_at),
            wellness.sleep_hours,
            wellness.stress_level,
            wellness.hrv_ms,
            wellness.session_rpe,
            workout_id,
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound(format!("workout {workout_id}")));
    }
    Ok(())
}

pub fn latest_completed_workout(conn: &Connection, user_id: i64) -> Result<Option<Workout>, DatabaseError> {
    let sql = format!(
        "SELECT {WORKOUT_COLUMNS} FROM workouts
         WHERE user_id = ?1 AND completed_at IS NOT NULL
         ORDER BY completed_at DESC, id DESC LIMIT 1"
    );
    Ok(conn.query_row(&sql, params![user_id], workout_from_row).optional()?)
}

/// Mean of the user's non-null HRV readings since `since`
pub fn hrv_baseline(
    conn: &Connection,
    user_id: i64,
    since: DateTime<Utc>,
) -> Result<Option<f64>, DatabaseError> {
    Ok(conn.query_row(
        "SELECT AVG(hrv_ms) FROM workouts
         WHERE user_id = ?1 AND hrv_ms IS NOT NULL AND started_at >= ?2",
        params![user_id, format_timestamp(since)],
        |row| row.get::<_, Option<f64>>(0),
    )?)
}

// ---------------------------------------------------------------------------
// sets

const SET_COLUMNS: &str = "s.id, s.workout_id, s.exercise_id, s.set_number, s.actual_weight,
    s.actual_reps, s.actual_rir, s.mti, s.completed_at, s.notes";

fn set_from_row(row: &Row) -> rusqlite::Result<WorkoutSet> {
    Ok(WorkoutSet {
        id: row.get(0)?,
        workout_id: row.get(1)?,
        exercise_id: row.get(2)?,
        set_number: row.get(3)?,
        actual_weight: row.get(4)?,
        actual_reps: row.get(5)?,
        actual_rir: row.get(6)?,
        mti: row.get(7)?,
        completed_at: timestamp_column(row, 8)?,
        notes: row.get(9)?,
    })
}

/// Next dense set number within (workout, exercise)
pub fn next_set_number(conn: &Connection, workout_id: i64, exercise_id: i64) -> Result<u32, DatabaseError> {
    let max: i64 = conn.query_row(
        "SELECT COALESCE(MAX(set_number), 0) FROM workout_sets WHERE workout_id = ?1 AND exercise_id = ?2",
        params![workout_id, exercise_id],
        |row| row.get(0),
    )?;
    u32::try_from(max + 1).map_err(|_| DatabaseError::Integrity(format!("set number overflow: {max}")))
}

/// Set fields before the row exists
#[derive(Debug, Clone)]
pub struct NewSet {
    pub workout_id: i64,
    pub exercise_id: i64,
    pub set_number: u32,
    pub actual_weight: f64,
    pub actual_reps: u32,
    pub actual_rir: Option<f64>,
    pub mti: i64,
    pub completed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

pub fn insert_set(conn: &Connection, set: NewSet) -> Result<WorkoutSet, DatabaseError> {
    conn.execute(
        "INSERT INTO workout_sets (workout_id, exercise_id, set_number, actual_weight, actual_reps,
            actual_rir, mti, completed_at, notes)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            set.workout_id,
            set.exercise_id,
            set.set_number,
            set.actual_weight,
            set.actual_reps,
            set.actual_rir,
            set.mti,
            format_timestamp(set.completed_at),
            set.notes,
        ],
    )?;
    Ok(WorkoutSet {
        id: conn.last_insert_rowid(),
        workout_id: set.workout_id,
        exercise_id: set.exercise_id,
        set_number: set.set_number,
        actual_weight: set.actual_weight,
        actual_reps: set.actual_reps,
        actual_rir: set.actual_rir,
        mti: set.mti,
        completed_at: set.completed_at,
        notes: set.notes,
    })
}

/// Load a set only when its workout belongs to `user_id`
pub fn load_owned_set(conn: &Connection, set_id: i64, user_id: i64) -> Result<Option<WorkoutSet>, DatabaseError> {
    let sql = format!(
        "SELECT {SET_COLUMNS} FROM workout_sets s
         JOIN workouts w ON w.id = s.workout_id
         WHERE s.id = ?1 AND w.user_id = ?2"
    );
    Ok(conn.query_row(&sql, params![set_id, user_id], set_from_row).optional()?)
}

pub fn update_set(conn: &Connection, set: &WorkoutSet) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE workout_sets SET actual_weight = ?1, actual_reps = ?2, actual_rir = ?3, mti = ?4, notes = ?5
         WHERE id = ?6",
        params![
            set.actual_weight,
            set.actual_reps,
            set.actual_rir,
            set.mti,
            set.notes,
            set.id,
        ],
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound(format!("set {}", set.id)));
    }
    Ok(())
}

/// Delete a set if owned by `user_id`; returns whether a row went away
pub fn delete_owned_set(conn: &Connection, set_id: i64, user_id: i64) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM workout_sets
         WHERE id = ?1 AND workout_id IN (SELECT id FROM workouts WHERE user_id = ?2)",
        params![set_id, user_id],
    )?;
    Ok(changed > 0)
}

pub fn count_sets(conn: &Connection, user_id: i64) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM workout_sets s JOIN workouts w ON w.id = s.workout_id WHERE w.user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?)
}

/// Per-day stimulus for a muscle group since `since`: the day's MTI on
/// exercises targeting that group, scaled down by 100. The session instant
/// is the last set of the day.
pub fn stimulus_sessions(
    conn: &Connection,
    user_id: i64,
    muscle_group: &str,
    since: DateTime<Utc>,
) -> Result<Vec<StimulusSession>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT MAX(s.completed_at), SUM(s.mti)
         FROM workout_sets s
         JOIN workouts w ON w.id = s.workout_id
         JOIN exercises e ON e.id = s.exercise_id
         WHERE w.user_id = ?1 AND e.main_target_muscle_group = ?2 AND s.completed_at >= ?3
         GROUP BY substr(s.completed_at, 1, 10)
         ORDER BY 1",
    )?;
    let rows = stmt.query_map(params![user_id, muscle_group, format_timestamp(since)], |row| {
        Ok(StimulusSession {
            date: timestamp_column(row, 0)?,
            stimulus: row.get::<_, i64>(1)? as f64 / 100.0,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

// ---------------------------------------------------------------------------
// mesocycles

fn mesocycle_from_row(row: &Row) -> rusqlite::Result<Mesocycle> {
    Ok(Mesocycle {
        id: row.get(0)?,
        user_id: row.get(1)?,
        phase: enum_column::<MesocyclePhase>(row, 2)?,
        start_date: date_column(row, 3)?,
        week_number: row.get(4)?,
    })
}

/// The current cycle row: latest by start date, then id
pub fn latest_mesocycle(conn: &Connection, user_id: i64) -> Result<Option<Mesocycle>, DatabaseError> {
    Ok(conn
        .query_row(
            "SELECT id, user_id, phase, start_date, week_number FROM mesocycles
             WHERE user_id = ?1 ORDER BY start_date DESC, id DESC LIMIT 1",
            params![user_id],
            mesocycle_from_row,
        )
        .optional()?)
}

pub fn insert_mesocycle(
    conn: &Connection,
    user_id: i64,
    phase: MesocyclePhase,
    start_date: NaiveDate,
    week_number: u32,
) -> Result<Mesocycle, DatabaseError> {
    conn.execute(
        "INSERT INTO mesocycles (user_id, phase, start_date, week_number) VALUES (?1, ?2, ?3, ?4)",
        params![user_id, phase.as_str(), start_date.format("%Y-%m-%d").to_string(), week_number],
    )?;
    Ok(Mesocycle {
        id: conn.last_insert_rowid(),
        user_id,
        phase,
        start_date,
        week_number,
    })
}

pub fn update_mesocycle(conn: &Connection, cycle: &Mesocycle) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE mesocycles SET phase = ?1, start_date = ?2, week_number = ?3 WHERE id = ?4",
        params![
            cycle.phase.as_str(),
            cycle.start_date.format("%Y-%m-%d").to_string(),
            cycle.week_number,
            cycle.id,
        ],
    )?;
    Ok(())
}

pub fn count_mesocycles(conn: &Connection, user_id: i64) -> Result<i64, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM mesocycles WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?)
}

// ---------------------------------------------------------------------------
// plateau events

const PLATEAU_COLUMNS: &str = "id, user_id, exercise_id, detected_at, plateau_duration,
    protocol_applied, details, acknowledged_at";

fn plateau_event_from_row(row: &Row) -> rusqlite::Result<PlateauEvent> {
    Ok(PlateauEvent {
        id: row.get(0)?,
        user_id: row.get(1)?,
        exercise_id: row.get(2)?,
        detected_at: timestamp_column(row, 3)?,
        plateau_duration: row.get(4)?,
        protocol_applied: row.get(5)?,
        details: json_column(row, 6)?,
        acknowledged_at: optional_timestamp_column(row, 7)?,
    })
}

/// Unacknowledged event for (user, exercise) detected at or after `since`
pub fn recent_unacknowledged_plateau_event(
    conn: &Connection,
    user_id: i64,
    exercise_id: i64,
    since: DateTime<Utc>,
) -> Result<Option<PlateauEvent>, DatabaseError> {
    let sql = format!(
        "SELECT {PLATEAU_COLUMNS} FROM plateau_events
         WHERE user_id = ?1 AND exercise_id = ?2 AND acknowledged_at IS NULL AND detected_at >= ?3
         ORDER BY detected_at DESC LIMIT 1"
    );
    Ok(conn
        .query_row(
            &sql,
            params![user_id, exercise_id, format_timestamp(since)],
            plateau_event_from_row,
        )
        .optional()?)
}

pub fn insert_plateau_event(
    conn: &Connection,
    user_id: i64,
    exercise_id: i64,
    detected_at: DateTime<Utc>,
    plateau_duration: u32,
    protocol_applied: &str,
    details: &serde_json::Value,
) -> Result<PlateauEvent, DatabaseError> {
    conn.execute(
        "INSERT INTO plateau_events
            (user_id, exercise_id, detected_at, plateau_duration, protocol_applied, details)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user_id,
            exercise_id,
            format_timestamp(detected_at),
            plateau_duration,
            protocol_applied,
            serde_json::to_string(details)?,
        ],
    )?;
    Ok(PlateauEvent {
        id: conn.last_insert_rowid(),
        user_id,
        exercise_id,
        detected_at,
        plateau_duration,
        protocol_applied: protocol_applied.to_string(),
        details: details.clone(),
        acknowledged_at: None,
    })
}

pub fn load_plateau_event(conn: &Connection, event_id: i64) -> Result<Option<PlateauEvent>, DatabaseError> {
    let sql = format!("SELECT {PLATEAU_COLUMNS} FROM plateau_events WHERE id = ?1");
    Ok(conn.query_row(&sql, params![event_id], plateau_event_from_row).optional()?)
}

/// Mark an event acknowledged; already-acknowledged events keep their first timestamp
pub fn acknowledge_plateau_event(
    conn: &Connection,
    event_id: i64,
    at: DateTime<Utc>,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE plateau_events SET acknowledged_at = COALESCE(acknowledged_at, ?1) WHERE id = ?2",
        params![format_timestamp(at), event_id],
    )?;
    Ok(())
}

pub fn unacknowledged_plateau_events(conn: &Connection, user_id: i64) -> Result<Vec<PlateauEvent>, DatabaseError> {
    let sql = format!(
        "SELECT {PLATEAU_COLUMNS} FROM plateau_events
         WHERE user_id = ?1 AND acknowledged_at IS NULL
         ORDER BY detected_at DESC, id DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![user_id], plateau_event_from_row)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn setup() -> (Database, User, Exercise) {
        let db = Database::open_in_memory().unwrap();
        let user = create_user(db.conn(), &NewUser::default(), at(1, 8)).unwrap();
        let exercise =
            create_exercise(db.conn(), "Bench Press", Some(EquipmentType::Barbell), Some("chest")).unwrap();
        (db, user, exercise)
    }

    #[test]
    fn test_user_round_trip() {
        let (db, user, _) = setup();
        let loaded = load_user(db.conn(), user.id).unwrap().unwrap();
        assert_eq!(loaded.goal_slider, 0.5);
        assert_eq!(loaded.available_plates, vec![1.25, 2.5, 5.0, 10.0, 15.0, 20.0, 25.0]);
        assert!(load_user(db.conn(), 999).unwrap().is_none());

        update_user_bias(db.conn(), user.id, 0.75, 0.3).unwrap();
        let loaded = load_user(db.conn(), user.id).unwrap().unwrap();
        assert_eq!(loaded.rir_bias, 0.75);
        assert_eq!(loaded.rir_bias_error_ema, 0.3);
    }

    #[test]
    fn test_duplicate_exercise_name_is_conflict() {
        let (db, _, _) = setup();
        let err = create_exercise(db.conn(), "Bench Press", None, None).unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn test_latest_1rm_and_recent_order() {
        let (db, user, exercise) = setup();
        for (i, value) in [100.0, 102.5, 105.0].iter().enumerate() {
            insert_1rm(db.conn(), user.id, exercise.id, *value, None, at(2 + i as u32, 9)).unwrap();
        }
        let latest = latest_1rm(db.conn(), user.id, exercise.id).unwrap().unwrap();
        assert_eq!(latest.estimated_1rm, 105.0);
        assert!(latest.source().is_none());
        assert_eq!(
            recent_1rm_values(db.conn(), user.id, exercise.id, 2).unwrap(),
            vec![102.5, 105.0]
        );
    }

    #[test]
    fn test_workout_for_day_and_set_numbers() {
        let (db, user, exercise) = setup();
        assert!(find_workout_for_day(db.conn(), user.id, at(3, 0).date_naive()).unwrap().is_none());
        let workout = create_workout(db.conn(), user.id, at(3, 7)).unwrap();
        let found = find_workout_for_day(db.conn(), user.id, at(3, 0).date_naive()).unwrap().unwrap();
        assert_eq!(found.id, workout.id);

        assert_eq!(next_set_number(db.conn(), workout.id, exercise.id).unwrap(), 1);
        insert_set(
            db.conn(),
            NewSet {
                workout_id: workout.id,
                exercise_id: exercise.id,
                set_number: 1,
                actual_weight: 80.0,
                actual_reps: 8,
                actual_rir: Some(2.0),
                mti: 640,
                completed_at: at(3, 8),
                notes: None,
            },
        )
        .unwrap();
        assert_eq!(next_set_number(db.conn(), workout.id, exercise.id).unwrap(), 2);
    }

    #[test]
    fn test_set_ownership() {
        let (db, user, exercise) = setup();
        let other = create_user(db.conn(), &NewUser::default(), at(1, 9)).unwrap();
        let workout = create_workout(db.conn(), user.id, at(3, 7)).unwrap();
        let set = insert_set(
            db.conn(),
            NewSet {
                workout_id: workout.id,
                exercise_id: exercise.id,
                set_number: 1,
                actual_weight: 60.0,
                actual_reps: 10,
                actual_rir: None,
                mti: 600,
                completed_at: at(3, 8),
                notes: Some("warmup".into()),
            },
        )
        .unwrap();

        assert!(load_owned_set(db.conn(), set.id, other.id).unwrap().is_none());
        assert_eq!(load_owned_set(db.conn(), set.id, user.id).unwrap().map(|s| s.id), Some(set.id));
        assert!(!delete_owned_set(db.conn(), set.id, other.id).unwrap());
        assert!(delete_owned_set(db.conn(), set.id, user.id).unwrap());
        assert_eq!(count_sets(db.conn(), user.id).unwrap(), 0);
    }

    #[test]
    fn test_hrv_baseline_window() {
        let (db, user, _) = setup();
        let old = create_workout(db.conn(), user.id, at(1, 7) - Duration::days(40)).unwrap();
        let wellness = WorkoutWellness {
            hrv_ms: Some(100.0),
            ..Default::default()
        };
        complete_workout(db.conn(), old.id, at(1, 8) - Duration::days(40), &wellness).unwrap();
        for (day, hrv) in [(10, 40.0), (11, 60.0)] {
            let w = create_workout(db.conn(), user.id, at(day, 7)).unwrap();
            let wellness = WorkoutWellness {
                hrv_ms: Some(hrv),
                ..Default::default()
            };
            complete_workout(db.conn(), w.id, at(day, 8), &wellness).unwrap();
        }
        let baseline = hrv_baseline(db.conn(), user.id, at(12, 0) - Duration::days(30)).unwrap();
        assert_eq!(baseline, Some(50.0));
        let latest = latest_completed_workout(db.conn(), user.id).unwrap().unwrap();
        assert_eq!(latest.hrv_ms, Some(60.0));
    }

    #[test]
    fn test_seed_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        assert_eq!(db.seed_reference_exercises().unwrap(), REFERENCE_EXERCISES.len());
        assert_eq!(db.seed_reference_exercises().unwrap(), 0);
        assert_eq!(list_exercises(db.conn()).unwrap().len(), REFERENCE_EXERCISES.len());
    }

    #[test]
    fn test_on_disk_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("liftrs.db");
        let user_id = {
            let db = Database::open(&path).unwrap();
            create_user(db.conn(), &NewUser::default(), at(1, 8)).unwrap().id
        };
        let db = Database::open(&path).unwrap();
        assert!(load_user(db.conn(), user_id).unwrap().is_some());
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::LiftError;
use crate::fatigue::MUSCLE_GROUPS;

/// How load is put on the exercise; drives weight rounding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentType {
    Barbell,
    DumbbellPair,
    Machine,
}

impl EquipmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentType::Barbell => "barbell",
            EquipmentType::DumbbellPair => "dumbbell_pair",
            EquipmentType::Machine => "machine",
        }
    }
}

impl FromStr for EquipmentType {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "barbell" => Ok(EquipmentType::Barbell),
            "dumbbell_pair" | "dumbbell" | "dumbbells" => Ok(EquipmentType::DumbbellPair),
            "machine" | "cable" => Ok(EquipmentType::Machine),
            other => Err(LiftError::validation(format!(
                "unknown equipment type: {other}"
            ))),
        }
    }
}

impl fmt::Display for EquipmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Training age of the lifter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceLevel {
    Beginner,
    Intermediate,
    Advanced,
}

impl ExperienceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExperienceLevel::Beginner => "beginner",
            ExperienceLevel::Intermediate => "intermediate",
            ExperienceLevel::Advanced => "advanced",
        }
    }
}

impl FromStr for ExperienceLevel {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "beginner" => Ok(ExperienceLevel::Beginner),
            "intermediate" => Ok(ExperienceLevel::Intermediate),
            "advanced" => Ok(ExperienceLevel::Advanced),
            other => Err(LiftError::validation(format!(
                "unknown experience level: {other}"
            ))),
        }
    }
}

/// Self-reported sex, used only to scale default strength estimates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sex {
    Male,
    Female,
    Other,
    Unknown,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Other => "other",
            Sex::Unknown => "unknown",
        }
    }
}

impl FromStr for Sex {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Sex::Male),
            "female" => Ok(Sex::Female),
            "other" => Ok(Sex::Other),
            "unknown" => Ok(Sex::Unknown),
            other => Err(LiftError::validation(format!("unknown sex: {other}"))),
        }
    }
}

/// Mesocycle phases in cycle order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MesocyclePhase {
    Accumulation,
    Intensification,
    Deload,
}

impl MesocyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MesocyclePhase::Accumulation => "accumulation",
            MesocyclePhase::Intensification => "intensification",
            MesocyclePhase::Deload => "deload",
        }
    }
}

impl FromStr for MesocyclePhase {
    type Err = LiftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accumulation" => Ok(MesocyclePhase::Accumulation),
            "intensification" => Ok(MesocyclePhase::Intensification),
            "deload" => Ok(MesocyclePhase::Deload),
            other => Err(LiftError::validation(format!("unknown phase: {other}"))),
        }
    }
}

impl fmt::Display for MesocyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifter profile plus the per-user learned state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,

    /// 0 = pure hypertrophy, 1 = pure strength
    pub goal_slider: f64,

    /// Learned offset between reported and true RIR, clipped to [-3, 3]
    pub rir_bias: f64,

    /// Base learning rate for the bias updater
    pub rir_bias_lr: f64,

    /// EMA of recent rep-prediction errors
    pub rir_bias_error_ema: f64,

    /// Per-muscle multipliers on the recovery time constant
    pub recovery_multipliers: HashMap<String, f64>,

    /// Plate sizes (kg) the lifter has access to
    pub available_plates: Vec<f64>,

    pub barbell_weight_kg: f64,
    pub equipment_type: EquipmentType,
    pub experience_level: Option<ExperienceLevel>,
    pub sex: Option<Sex>,
}

/// Shared reference data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exercise {
    pub id: i64,
    pub name: String,
    pub equipment_type: Option<EquipmentType>,
    pub main_target_muscle_group: Option<String>,
}

/// A training session; wellness fields feed the readiness scorer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workout {
    pub id: i64,
    pub user_id: i64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub sleep_hours: Option<f64>,
    pub stress_level: Option<u8>,
    pub hrv_ms: Option<f64>,
    pub session_rpe: Option<u8>,
}

/// One logged set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkoutSet {
    pub id: i64,
    pub workout_id: i64,
    pub exercise_id: i64,
    pub set_number: u32,
    pub actual_weight: f64,
    pub actual_reps: u32,
    pub actual_rir: Option<f64>,
    /// Mechanical-Tension Index
    pub mti: i64,
    pub completed_at: DateTime<Utc>,
    pub notes: Option<String>,
}

/// Append-only 1RM estimate, optionally with the set it was derived from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneRepMaxRecord {
    pub id: i64,
    pub user_id: i64,
    pub exercise_id: i64,
    pub estimated_1rm: f64,
    pub source_weight: Option<f64>,
    pub source_reps: Option<u32>,
    pub source_rir: Option<f64>,
    pub calculated_at: DateTime<Utc>,
}

impl OneRepMaxRecord {
    /// The (weight, reps, rir) tuple the estimate came from, when recorded
    pub fn source(&self) -> Option<(f64, u32, Option<f64>)> {
        match (self.source_weight, self.source_reps) {
            (Some(weight), Some(reps)) => Some((weight, reps, self.source_rir)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesocycle {
    pub id: i64,
    pub user_id: i64,
    pub phase: MesocyclePhase,
    /// Start of the current phase
    pub start_date: NaiveDate,
    pub week_number: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlateauEvent {
    pub id: i64,
    pub user_id: i64,
    pub exercise_id: i64,
    pub detected_at: DateTime<Utc>,
    pub plateau_duration: u32,
    pub protocol_applied: String,
    pub details: serde_json::Value,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Fields for creating a user (seed/admin path)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewUser {
    pub goal_slider: f64,
    pub rir_bias_lr: f64,
    pub available_plates: Vec<f64>,
    pub barbell_weight_kg: f64,
    pub equipment_type: EquipmentType,
    pub experience_level: Option<ExperienceLevel>,
    pub sex: Option<Sex>,
    pub recovery_multipliers: HashMap<String, f64>,
}

impl Default for NewUser {
    fn default() -> Self {
        Self {
            goal_slider: 0.5,
            rir_bias_lr: 0.1,
            available_plates: vec![1.25, 2.5, 5.0, 10.0, 15.0, 20.0, 25.0],
            barbell_weight_kg: 20.0,
            equipment_type: EquipmentType::Barbell,
            experience_level: Some(ExperienceLevel::Intermediate),
            sex: None,
            recovery_multipliers: HashMap::new(),
        }
    }
}

/// Partial profile update; every present field is validated before writing
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UserProfileUpdate {
    pub goal_slider: Option<f64>,
    pub rir_bias_lr: Option<f64>,
    pub recovery_multipliers: Option<HashMap<String, f64>>,
    pub available_plates: Option<Vec<f64>>,
    pub barbell_weight_kg: Option<f64>,
    pub equipment_type: Option<EquipmentType>,
    pub experience_level: Option<ExperienceLevel>,
    pub sex: Option<Sex>,
}

impl UserProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self == &UserProfileUpdate::default()
    }

    pub fn validate(&self) -> Result<(), LiftError> {
        if self.is_empty() {
            return Err(LiftError::validation("profile update contains no fields"));
        }
        if let Some(goal) = self.goal_slider {
            validate_goal_slider(goal)?;
        }
        if let Some(lr) = self.rir_bias_lr {
            if !lr.is_finite() || lr <= 0.0 || lr > 1.0 {
                return Err(LiftError::validation("rir_bias_lr must be in (0, 1]"));
            }
        }
        if let Some(multipliers) = &self.recovery_multipliers {
            validate_recovery_multipliers(multipliers)?;
        }
        if let Some(plates) = &self.available_plates {
            validate_plates(plates)?;
        }
        if let Some(bar) = self.barbell_weight_kg {
            if !bar.is_finite() || bar <= 0.0 {
                return Err(LiftError::validation("barbell_weight_kg must be positive"));
            }
        }
        Ok(())
    }

    /// Apply onto an existing user (after validation)
    pub fn apply_to(&self, user: &mut User) {
        if let Some(goal) = self.goal_slider {
            user.goal_slider = goal;
        }
        if let Some(lr) = self.rir_bias_lr {
            user.rir_bias_lr = lr;
        }
        if let Some(multipliers) = &self.recovery_multipliers {
            user.recovery_multipliers = multipliers.clone();
        }
        if let Some(plates) = &self.available_plates {
            user.available_plates = normalize_plates(plates);
        }
        if let Some(bar) = self.barbell_weight_kg {
            user.barbell_weight_kg = bar;
        }
        if let Some(equipment) = self.equipment_type {
            user.equipment_type = equipment;
        }
        if let Some(level) = self.experience_level {
            user.experience_level = Some(level);
        }
        if let Some(sex) = self.sex {
            user.sex = Some(sex);
        }
    }
}

pub fn validate_goal_slider(goal: f64) -> Result<(), LiftError> {
    if !(0.0..=1.0).contains(&goal) {
        return Err(LiftError::validation("goal_slider must be within [0, 1]"));
    }
    Ok(())
}

pub fn validate_recovery_multipliers(multipliers: &HashMap<String, f64>) -> Result<(), LiftError> {
    for (muscle, value) in multipliers {
        if !MUSCLE_GROUPS.contains(&muscle.as_str()) {
            return Err(LiftError::validation(format!(
                "unknown muscle group in recovery_multipliers: {muscle}"
            )));
        }
        if !value.is_finite() || *value <= 0.0 {
            return Err(LiftError::validation(format!(
                "recovery multiplier for {muscle} must be positive"
            )));
        }
    }
    Ok(())
}

pub fn validate_plates(plates: &[f64]) -> Result<(), LiftError> {
    if plates.iter().any(|p| !p.is_finite() || *p <= 0.0) {
        return Err(LiftError::validation("available_plates must all be positive"));
    }
    Ok(())
}

/// Sort ascending and drop duplicates so plates behave as an ordered set
pub fn normalize_plates(plates: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = plates.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted.dedup();
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_string_round_trip() {
        for equipment in [
            EquipmentType::Barbell,
            EquipmentType::DumbbellPair,
            EquipmentType::Machine,
        ] {
            assert_eq!(equipment.as_str().parse::<EquipmentType>().unwrap(), equipment);
        }
        assert_eq!("Dumbbells".parse::<EquipmentType>().unwrap(), EquipmentType::DumbbellPair);
        assert!("kettlebell".parse::<EquipmentType>().is_err());
        assert!("deload".parse::<MesocyclePhase>().is_ok());
    }

    #[test]
    fn test_profile_update_validation() {
        assert!(UserProfileUpdate::default().validate().is_err());

        let update = UserProfileUpdate {
            goal_slider: Some(1.2),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = UserProfileUpdate {
            available_plates: Some(vec![2.5, -1.0]),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let mut multipliers = HashMap::new();
        multipliers.insert("elbows".to_string(), 1.0);
        let update = UserProfileUpdate {
            recovery_multipliers: Some(multipliers),
            ..Default::default()
        };
        assert!(update.validate().is_err());

        let update = UserProfileUpdate {
            goal_slider: Some(0.8),
            available_plates: Some(vec![5.0, 1.25, 2.5, 2.5]),
            ..Default::default()
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn test_apply_normalizes_plates() {
        let mut user = User {
            id: 1,
            goal_slider: 0.5,
            rir_bias: 0.0,
            rir_bias_lr: 0.1,
            rir_bias_error_ema: 0.0,
            recovery_multipliers: HashMap::new(),
            available_plates: vec![],
            barbell_weight_kg: 20.0,
            equipment_type: EquipmentType::Barbell,
            experience_level: None,
            sex: None,
        };
        let update = UserProfileUpdate {
            available_plates: Some(vec![5.0, 1.25, 2.5, 2.5]),
            sex: Some(Sex::Female),
            ..Default::default()
        };
        update.apply_to(&mut user);
        assert_eq!(user.available_plates, vec![1.25, 2.5, 5.0]);
        assert_eq!(user.sex, Some(Sex::Female));
    }
}

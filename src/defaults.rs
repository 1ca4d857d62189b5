//! Starting 1RM estimates for lifters with no history on an exercise

use serde::{Deserialize, Serialize};

use crate::models::{ExperienceLevel, Sex};

/// Used when nothing else matches
pub const GLOBAL_FALLBACK_1RM: f64 = 30.0;

/// Reference table (male, kg): beginner / intermediate / advanced
const DEFAULT_1RM_TABLE: [(&str, [f64; 3]); 6] = [
    ("bench_press", [40.0, 70.0, 100.0]),
    ("squat", [50.0, 90.0, 130.0]),
    ("deadlift", [60.0, 110.0, 160.0]),
    ("overhead_press", [25.0, 45.0, 65.0]),
    ("barbell_row", [35.0, 60.0, 85.0]),
    ("other", [20.0, 35.0, 50.0]),
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultEstimate {
    pub one_rm: f64,
    pub exercise_key: String,
    pub level: ExperienceLevel,
    pub sex_coefficient: f64,
}

impl DefaultEstimate {
    /// Audit tag, e.g. `default_squat_intermediate_female`
    pub fn source_tag(&self, sex: Option<Sex>) -> String {
        let sex = sex.map(|s| s.as_str()).unwrap_or("unknown");
        format!("default_{}_{}_{}", self.exercise_key, self.level.as_str(), sex)
    }
}

/// Map a free-form exercise name onto a table key
pub fn exercise_key(name: &str) -> &'static str {
    let name = name.to_lowercase();
    if name.contains("bench") {
        "bench_press"
    } else if name.contains("squat") {
        "squat"
    } else if name.contains("deadlift") {
        "deadlift"
    } else if name.contains("overhead") || name.contains("military") || name.contains("ohp") {
        "overhead_press"
    } else if name.contains("row") {
        "barbell_row"
    } else {
        "other"
    }
}

pub fn sex_coefficient(sex: Option<Sex>) -> f64 {
    match sex {
        Some(Sex::Male) => 1.0,
        Some(Sex::Female) => 0.7,
        Some(Sex::Other) | Some(Sex::Unknown) | None => 0.85,
    }
}

fn level_index(level: ExperienceLevel) -> usize {
    match level {
        ExperienceLevel::Beginner => 0,
        ExperienceLevel::Intermediate => 1,
        ExperienceLevel::Advanced => 2,
    }
}

/// Smart default 1RM for an exercise name, experience level and sex
pub fn default_one_rm(exercise_name: &str, level: Option<ExperienceLevel>, sex: Option<Sex>) -> DefaultEstimate {
    let key = exercise_key(exercise_name);
    let level = level.unwrap_or(ExperienceLevel::Intermediate);
    let base = DEFAULT_1RM_TABLE
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, row)| row[level_index(level)])
        .unwrap_or(GLOBAL_FALLBACK_1RM);
    let coefficient = sex_coefficient(sex);

    DefaultEstimate {
        one_rm: base * coefficient,
        exercise_key: key.to_string(),
        level,
        sex_coefficient: coefficient,
    }
}

//! Mesocycle phase progression
//!
//! Accumulation (3 weeks) → intensification (3 weeks) → deload (1 week) →
//! next cycle. Progress is a pure function of the calendar: the stored row is
//! advanced lazily whenever it is read. Within a cycle the row is rewritten in
//! place; a cycle boundary closes the row and starts a new one.

use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::database::{self, DatabaseError};
use crate::models::{Mesocycle, MesocyclePhase};

impl MesocyclePhase {
    /// Phase length in weeks
    pub fn duration_weeks(&self) -> i64 {
        match self {
            MesocyclePhase::Accumulation => 3,
            MesocyclePhase::Intensification => 3,
            MesocyclePhase::Deload => 1,
        }
    }

    /// Multiplier applied to the working 1RM while in this phase
    pub fn load_modifier(&self) -> f64 {
        match self {
            MesocyclePhase::Accumulation => 1.00,
            MesocyclePhase::Intensification => 1.02,
            MesocyclePhase::Deload => 0.90,
        }
    }

    pub fn next(&self) -> MesocyclePhase {
        match self {
            MesocyclePhase::Accumulation => MesocyclePhase::Intensification,
            MesocyclePhase::Intensification => MesocyclePhase::Deload,
            MesocyclePhase::Deload => MesocyclePhase::Accumulation,
        }
    }
}

/// Position inside a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: MesocyclePhase,
    pub start_date: NaiveDate,
    pub week_number: u32,
}

/// Result of replaying the calendar from a stored state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Advance {
    pub state: PhaseState,
    /// The last deload the replay walked through, if a cycle boundary was crossed
    pub closed_deload: Option<PhaseState>,
}

fn week_in_phase(start: NaiveDate, today: NaiveDate) -> u32 {
    let days = (today - start).num_days();
    if days < 0 {
        1
    } else {
        (days / 7 + 1) as u32
    }
}

/// Walk phase transitions until reaching the phase that contains `today`
pub fn advance(current: PhaseState, today: NaiveDate) -> Advance {
    let mut state = PhaseState {
        week_number: week_in_phase(current.start_date, today),
        ..current
    };
    let mut closed_deload = None;

    while i64::from(state.week_number) > state.phase.duration_weeks() {
        let next_start = state.start_date + Duration::weeks(state.phase.duration_weeks());
        if next_start > today {
            break;
        }
        if state.phase == MesocyclePhase::Deload {
            closed_deload = Some(PhaseState {
                week_number: 1,
                ..state
            });
        }
        state = PhaseState {
            phase: state.phase.next(),
            start_date: next_start,
            week_number: week_in_phase(next_start, today),
        };
    }

    Advance { state, closed_deload }
}

/// Load the user's current cycle row, advancing or creating it as needed.
///
/// Call inside a write transaction; repeated calls on the same `today` are
/// no-ops after the first.
pub fn get_or_create_current(
    conn: &Connection,
    user_id: i64,
    today: NaiveDate,
) -> Result<Mesocycle, DatabaseError> {
    let Some(row) = database::latest_mesocycle(conn, user_id)? else {
        let created = database::insert_mesocycle(conn, user_id, MesocyclePhase::Accumulation, today, 1)?;
        info!(user_id, cycle_id = created.id, "started first mesocycle");
        return Ok(created);
    };

    if today < row.start_date {
        return Ok(Mesocycle {
            week_number: 1,
            ..row
        });
    }

    let stored = PhaseState {
        phase: row.phase,
        start_date: row.start_date,
        week_number: row.week_number,
    };
    let Advance { state, closed_deload } = advance(stored, today);

    if let Some(deload) = closed_deload {
        let closed = Mesocycle {
            phase: deload.phase,
            start_date: deload.start_date,
            week_number: deload.week_number,
            ..row.clone()
        };
        if closed != row {
            database::update_mesocycle(conn, &closed)?;
        }
        let created =
            database::insert_mesocycle(conn, user_id, state.phase, state.start_date, state.week_number)?;
        info!(
            user_id,
            closed_cycle = row.id,
            cycle_id = created.id,
            phase = %created.phase,
            "started new mesocycle"
        );
        return Ok(created);
    }

    if state == stored {
        return Ok(row);
    }

    let updated = Mesocycle {
        phase: state.phase,
        start_date: state.start_date,
        week_number: state.week_number,
        ..row
    };
    database::update_mesocycle(conn, &updated)?;
    if updated.phase != stored.phase {
        info!(user_id, cycle_id = updated.id, phase = %updated.phase, "mesocycle phase advanced");
    }
    Ok(updated)
}

//! One-rep-max estimation from (weight, reps, RIR)
//!
//! The engine uses an Epley-family relation between a load and the number of
//! reps a lifter could perform to failure with it:
//!
//! ```text
//! weight = 1RM · (1 − 0.0333 · reps_to_failure)
//! ```
//!
//! `reps_to_failure` is the performed reps plus the *true* reps in reserve. The
//! lifter's reported RIR is shifted by their learned bias before it enters the
//! formula. All call sites (estimation, rep prediction, load prescription) go
//! through [`load_fraction`] so the stability cap and the non-positive
//! denominator fallback live in exactly one place.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Slope of the Epley-family relation
pub const EPLEY_COEFFICIENT: f64 = 0.0333;

/// Reps-to-failure at or above this value are capped
pub const MAX_TOTAL_REPS: f64 = 30.0;

/// Value used once the cap kicks in
pub const CAPPED_TOTAL_REPS: f64 = 29.0;

/// RIR assumed when a set was logged without one
pub const DEFAULT_ASSUMED_RIR: f64 = 2.0;

/// Fraction of 1RM that can be lifted for `total_reps` reps to failure.
///
/// Returns `None` when the relation is not usable: no reps at all, or a
/// non-positive denominator.
pub fn load_fraction(total_reps: f64) -> Option<f64> {
    if !total_reps.is_finite() || total_reps <= 0.0 {
        return None;
    }
    let total = if total_reps >= MAX_TOTAL_REPS {
        CAPPED_TOTAL_REPS
    } else {
        total_reps
    };
    let fraction = 1.0 - EPLEY_COEFFICIENT * total;
    (fraction > 0.0).then_some(fraction)
}

/// True reps in reserve after correcting the reported value by the user's bias
pub fn effective_rir(reported_rir: f64, user_bias: f64) -> f64 {
    (reported_rir - user_bias).max(0.0)
}

/// Estimate 1RM (kg, 2 decimals).
///
/// A missing RIR falls back to [`DEFAULT_ASSUMED_RIR`] and deliberately ignores
/// the bias: there is no reported value to correct.
pub fn estimate_1rm(weight: f64, reps: u32, rir: Option<f64>, user_bias: f64) -> f64 {
    let reserve = match rir {
        Some(reported) => effective_rir(reported, user_bias),
        None => DEFAULT_ASSUMED_RIR,
    };
    let total = reps as f64 + reserve;

    match load_fraction(total) {
        Some(fraction) => round_dp(weight / fraction, 2),
        None => weight,
    }
}

/// Predict the reps a lifter should manage at `weight` given their current
/// 1RM, reported RIR and bias.
///
/// Only defined when there is a positive 1RM and the weight is below it;
/// returns `None` otherwise.
pub fn predict_reps(one_rm: f64, weight: f64, reported_rir: Option<f64>, user_bias: f64) -> Option<f64> {
    if !(one_rm > 0.0) || !(weight < one_rm) || weight < 0.0 {
        return None;
    }
    let total = (1.0 - weight / one_rm) / EPLEY_COEFFICIENT;
    let reserve = match reported_rir {
        Some(reported) => effective_rir(reported, user_bias),
        None => DEFAULT_ASSUMED_RIR,
    };
    Some((total - reserve).max(0.0))
}

/// Load that leaves `total_reps` reps to failure at the given 1RM
pub fn weight_for_reps_to_failure(one_rm: f64, total_reps: f64) -> f64 {
    match load_fraction(total_reps) {
        Some(fraction) => one_rm * fraction,
        None => one_rm,
    }
}

/// Round half away from zero to `dp` decimals using exact decimal arithmetic
pub fn round_dp(value: f64, dp: u32) -> f64 {
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(dp, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

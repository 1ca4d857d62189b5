//! Online RIR-bias learner
//!
//! Each logged set compares the reps the model predicted with the reps the
//! lifter actually did. The signed error feeds an exponential moving average;
//! the learning rate shrinks while that average is large so a noisy lifter
//! does not drag the bias around, and recovers toward the base rate once the
//! errors settle. Positive error (overperformance) raises the bias: the lifter
//! was stronger than predicted, i.e. they under-report their reserve.

use serde::{Deserialize, Serialize};

pub const MIN_RIR_BIAS: f64 = -3.0;
pub const MAX_RIR_BIAS: f64 = 3.0;

/// Smoothing factor of the error EMA
pub const ERROR_EMA_ALPHA: f64 = 0.2;

/// The dynamic learning rate never drops below this
pub const MIN_LEARNING_RATE: f64 = 0.02;

/// Outcome of one bias update
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BiasUpdate {
    pub bias: f64,
    pub error_ema: f64,
    pub learning_rate: f64,
    pub error: f64,
}

/// Update the bias from one (predicted, actual) observation
pub fn update(
    old_bias: f64,
    predicted_reps: f64,
    actual_reps: f64,
    base_lr: f64,
    current_error_ema: f64,
) -> BiasUpdate {
    let error = actual_reps - predicted_reps;
    let error_ema = ERROR_EMA_ALPHA * error + (1.0 - ERROR_EMA_ALPHA) * current_error_ema;
    let learning_rate = (base_lr / (1.0 + error_ema.abs())).max(MIN_LEARNING_RATE);
    let bias = (old_bias + error * learning_rate).clamp(MIN_RIR_BIAS, MAX_RIR_BIAS);

    BiasUpdate {
        bias,
        error_ema,
        learning_rate,
        error,
    }
}

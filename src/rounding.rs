//! Equipment-aware weight rounding
//!
//! Snaps a target load to something the lifter can actually put together:
//! plate pairs on a barbell, fixed dumbbells, or machine stack pins. Sums are
//! enumerated breadth-first over the available sizes (each size may be reused)
//! in exact decimal arithmetic, so equidistant candidates resolve to the
//! heavier one deterministically.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::BTreeSet;

use crate::models::EquipmentType;
use crate::one_rep_max::round_dp;

/// Plates assumed when a barbell user has not configured any
pub const DEFAULT_PLATES: [f64; 7] = [1.25, 2.5, 5.0, 10.0, 15.0, 20.0, 25.0];

pub const DEFAULT_BARBELL_KG: f64 = 20.0;

const BARBELL_MAX_PLATES_PER_SIDE: usize = 15;
const BARBELL_MAX_SUMS: usize = 1500;
const INCREMENT_MAX_ITEMS: usize = 20;
const INCREMENT_MAX_SUMS: usize = 1000;

fn to_decimal(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        Decimal::from_f64(value)
    } else {
        None
    }
}

/// Positive, finite sizes as sorted unique decimals
fn usable_increments(increments: Option<&[f64]>) -> Vec<Decimal> {
    let set: BTreeSet<Decimal> = increments
        .unwrap_or(&[])
        .iter()
        .filter(|v| **v > 0.0)
        .filter_map(|v| to_decimal(*v))
        .collect();
    set.into_iter().collect()
}

/// Every sum of at most `max_items` increments not exceeding `bound`,
/// discovered level by level until `max_sums` distinct sums are known
fn achievable_sums(increments: &[Decimal], bound: Decimal, max_items: usize, max_sums: usize) -> BTreeSet<Decimal> {
    let mut sums = BTreeSet::from([Decimal::ZERO]);
    let mut frontier = vec![Decimal::ZERO];

    for _ in 0..max_items {
        let mut next = Vec::new();
        for base in &frontier {
            for increment in increments {
                let candidate = *base + *increment;
                if candidate > bound || sums.contains(&candidate) {
                    continue;
                }
                if sums.len() >= max_sums {
                    return sums;
                }
                sums.insert(candidate);
                next.push(candidate);
            }
        }
        if next.is_empty() {
            break;
        }
        frontier = next;
    }

    sums
}

/// Closest candidate to `target`; equidistant candidates go to the heavier one
fn closest(candidates: impl Iterator<Item = Decimal>, target: Decimal) -> Option<Decimal> {
    candidates.fold(None, |best: Option<Decimal>, candidate| match best {
        None => Some(candidate),
        Some(current) => {
            let d_candidate = (candidate - target).abs();
            let d_current = (current - target).abs();
            if d_candidate < d_current || (d_candidate == d_current && candidate > current) {
                Some(candidate)
            } else {
                Some(current)
            }
        }
    })
}

fn nearest_half_kg(target: f64) -> f64 {
    round_dp(target * 2.0, 0) / 2.0
}

fn round_barbell(target: f64, plates: Option<&[f64]>, barbell_kg: Option<f64>) -> f64 {
    let bar = barbell_kg.filter(|b| b.is_finite() && *b > 0.0).unwrap_or(DEFAULT_BARBELL_KG);
    if target <= bar {
        return bar;
    }

    let mut increments = usable_increments(plates);
    if increments.is_empty() {
        increments = usable_increments(Some(&DEFAULT_PLATES));
    }

    let (Some(target_d), Some(bar_d)) = (to_decimal(target), to_decimal(bar)) else {
        return nearest_half_kg(target);
    };
    let one_side_bound = (target_d * Decimal::new(12, 1) - bar_d) / Decimal::TWO + Decimal::TEN;
    let sums = achievable_sums(
        &increments,
        one_side_bound,
        BARBELL_MAX_PLATES_PER_SIDE,
        BARBELL_MAX_SUMS,
    );
    if sums.len() <= 1 {
        return nearest_half_kg(target);
    }

    closest(sums.iter().map(|side| bar_d + Decimal::TWO * *side), target_d)
        .and_then(|d| d.to_f64())
        .unwrap_or_else(|| nearest_half_kg(target))
}

fn round_increments(target: f64, increments: Option<&[f64]>) -> f64 {
    let increments = usable_increments(increments);
    let Some(target_d) = to_decimal(target) else {
        return 0.0;
    };
    if increments.is_empty() {
        return round_dp(target, 0);
    }

    let bound = target_d * Decimal::new(12, 1) + Decimal::TEN;
    let sums = achievable_sums(&increments, bound, INCREMENT_MAX_ITEMS, INCREMENT_MAX_SUMS);

    closest(sums.into_iter().filter(|s| !s.is_zero()), target_d)
        .and_then(|d| d.to_f64())
        .unwrap_or_else(|| round_dp(target, 0))
}

/// Round `target_kg` to an achievable load.
///
/// For a dumbbell pair the target is the weight of one dumbbell; for a
/// machine the increments are stack pin positions.
pub fn round_weight(
    target_kg: f64,
    available_increments: Option<&[f64]>,
    barbell_kg: Option<f64>,
    equipment: EquipmentType,
) -> f64 {
    if !target_kg.is_finite() {
        return 0.0;
    }
    match equipment {
        EquipmentType::Barbell => round_barbell(target_kg, available_increments, barbell_kg),
        EquipmentType::DumbbellPair | EquipmentType::Machine => {
            if target_kg <= 0.0 {
                return 0.0;
            }
            round_increments(target_kg, available_increments)
        }
    }
}

//! # ASERT Difficulty Retargeting
//!
//! Absolutely Scheduled Exponentially-weighted Retarget: the next target is
//! the anchor target scaled by `2^(drift / tau)`, where drift is how far the
//! chain tip's timestamp has slipped from the anchor's ideal schedule and
//! `tau = half_life_blocks * target_block_time`.
//!
//! **IMPORTANT**: the target is a CEILING. A positive drift (blocks too
//! slow) raises the target, making blocks easier; a negative drift lowers
//! it.
//!
//! Fixed-point arithmetic with a 16-bit scale. The fractional part of the
//! exponent uses a cubic approximation of `2^x` for `0 <= x < 1`:
//! `1 + 0.695x + 0.226x^2 + 0.078x^3`, coefficients scaled by `2^16`. The
//! integer part is applied as a bit shift clamped to ±256.

use crate::errors::ChainError;
use primitive_types::U256;
use shared_types::NetworkParamsState;

/// Q16 coefficients of the cubic `2^x` approximation.
const C1_Q16: u128 = 45_549; // 0.695 * 65536
const C2_Q16: u128 = 14_811; // 0.226 * 65536
const C3_Q16: u128 = 5_112; // 0.078 * 65536

const Q16_ONE: u128 = 1 << 16;

/// Maximum applied exponent shift, preventing runaway targets.
const MAX_SHIFT: i128 = 256;

/// The block the schedule is anchored at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnchorInfo {
    pub height: u64,
    pub timestamp_ms: u64,
    pub difficulty: U256,
}

/// Difficulty required of the block at `parent_height + 1`.
pub fn next_difficulty(
    parent_height: u64,
    parent_timestamp_ms: u64,
    anchor: &AnchorInfo,
    params: &NetworkParamsState,
) -> Result<U256, ChainError> {
    if parent_height < anchor.height {
        return Err(ChainError::MissingAnchor(anchor.height));
    }

    let target_ms = params.target_mining_time_ms.max(1) as i128;
    let tau_ms = (params.asert_half_life_blocks.max(1) as i128) * target_ms;

    let height_delta = (parent_height + 1 - anchor.height) as i128;
    let actual_ms = parent_timestamp_ms as i128 - anchor.timestamp_ms as i128;
    let drift = actual_ms - height_delta * target_ms;

    // exponent = drift / tau in Q16; split into integer shifts and fraction.
    let exponent_q16 = (drift * Q16_ONE as i128) / tau_ms;
    let mut shifts = exponent_q16 >> 16;
    let frac = (exponent_q16 - (shifts << 16)) as u128; // 0 <= frac < 2^16

    let term1 = C1_Q16 * frac;
    let term2 = (C2_Q16 * frac * frac) >> 16;
    let term3 = (C3_Q16 * frac * frac * frac) >> 32;
    let factor_q16 = Q16_ONE + ((term1 + term2 + term3) >> 16);

    shifts = shifts.clamp(-MAX_SHIFT, MAX_SHIFT);

    let anchor_target = target_from(anchor.difficulty);

    // target * factor / 2^16, saturating at the field maximum.
    let factor = U256::from(factor_q16);
    let high = anchor_target >> 16;
    let low = anchor_target & U256::from(0xFFFFu64);
    let mut target = match high.checked_mul(factor) {
        Some(scaled) => scaled.saturating_add((low * factor) >> 16),
        None => U256::MAX,
    };

    target = apply_shift(target, shifts);

    if target.is_zero() {
        target = U256::one();
    }

    let difficulty = U256::MAX / target;
    Ok(difficulty.max(params.min_difficulty))
}

fn target_from(difficulty: U256) -> U256 {
    if difficulty.is_zero() {
        U256::MAX
    } else {
        U256::MAX / difficulty
    }
}

fn apply_shift(target: U256, shifts: i128) -> U256 {
    if shifts >= 0 {
        let shifts = shifts as usize;
        if shifts >= 256 || target.leading_zeros() < shifts as u32 {
            return U256::MAX;
        }
        target << shifts
    } else {
        let shifts = (-shifts) as usize;
        if shifts >= 256 {
            return U256::zero();
        }
        target >> shifts
    }
}

//! Linear-interpolation difficulty retargeting (SPEC_FULL.md §4.4). Replaces
//! the donor's LWMA algorithm outright — different formula entirely — while
//! keeping that module's shape: a constants block, a plain sample struct, a
//! pure function, and dense unit-test coverage of the edge cases.

use num_bigint::BigUint;

/// Spacing, in blocks, between consecutive retargeting samples.
pub const EPOCH_LENGTH: i64 = 32;

/// Number of samples the retargeting window looks at.
pub const RETARGETING_EPOCHS_QTY: usize = 32;

/// Target time between blocks, in milliseconds.
pub const DESIRED_BLOCK_INTERVAL_MS: u64 = 60_000;

/// Difficulty assigned before enough history exists to retarget.
pub const INITIAL_DIFFICULTY: u64 = 1_000;

/// Fixed-point precision used by the least-squares regression.
const PRECISION: i128 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct Sample {
    pub height: i64,
    pub difficulty: BigUint,
    pub timestamp: u64,
}

/// The heights a `parent.height` retargeting decision needs samples at,
/// descending from `parent_height` down in steps of `EPOCH_LENGTH`. Heights
/// below zero are omitted — callers with a truncated result below
/// `RETARGETING_EPOCHS_QTY` must fall back to the parent's own difficulty.
pub fn heights_for_retargeting_at(parent_height: i64) -> Vec<i64> {
    (0..RETARGETING_EPOCHS_QTY as i64)
        .map(|i| parent_height - i * EPOCH_LENGTH)
        .filter(|h| *h >= 0)
        .collect()
}

fn biguint_to_i128(value: &BigUint) -> i128 {
    let digits = value.to_bytes_be();
    let mut out: i128 = 0;
    for byte in digits {
        out = out.saturating_mul(256).saturating_add(byte as i128);
    }
    out
}

/// Computes the next difficulty from an ascending-height sample series.
/// Returns `None` if there were fewer than two samples, or if the fitted
/// prediction fell below 1 (callers substitute `INITIAL_DIFFICULTY`).
pub fn linear_retarget(samples: &[Sample]) -> Option<BigUint> {
    if samples.len() < 2 {
        return None;
    }

    let mut points: Vec<(i64, i128)> = Vec::with_capacity(samples.len() - 1);
    for pair in samples.windows(2) {
        let (start, end) = (&pair[0], &pair[1]);
        let dt = end.timestamp.saturating_sub(start.timestamp).max(1) as i128;
        let d_end = biguint_to_i128(&end.difficulty);
        let effective = d_end
            .saturating_mul(DESIRED_BLOCK_INTERVAL_MS as i128)
            .saturating_mul(EPOCH_LENGTH as i128)
            / dt;
        points.push((end.height, effective));
    }

    let n = points.len() as i128;
    let sum_x: i128 = points.iter().map(|(x, _)| *x as i128).sum();
    let sum_y: i128 = points.iter().map(|(_, y)| *y).sum();
    let sum_xx: i128 = points.iter().map(|(x, _)| (*x as i128) * (*x as i128)).sum();
    let sum_xy: i128 = points.iter().map(|(x, y)| (*x as i128) * y).sum();

    let denom = n * sum_xx - sum_x * sum_x;
    let predict_x = points.last().unwrap().0 + EPOCH_LENGTH;

    let predicted = if denom == 0 {
        // All samples at the same height (degenerate window): fall back to
        // the plain average of observed effective difficulties.
        sum_y / n
    } else {
        let b_scaled = (n * sum_xy - sum_x * sum_y) * PRECISION / denom;
        let a_scaled = (sum_y * PRECISION - b_scaled * sum_x) / n;
        let predicted_scaled = a_scaled + b_scaled * predict_x as i128;
        predicted_scaled / PRECISION
    };

    if predicted < 1 {
        None
    } else {
        Some(BigUint::from(predicted as u128))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(height: i64, difficulty: u64, timestamp: u64) -> Sample {
        Sample {
            height,
            difficulty: BigUint::from(difficulty),
            timestamp,
        }
    }

    #[test]
    fn fewer_than_two_samples_yields_none() {
        assert!(linear_retarget(&[sample(0, 1000, 0)]).is_none());
        assert!(linear_retarget(&[]).is_none());
    }

    #[test]
    fn steady_block_time_holds_difficulty_roughly_constant() {
        let mut samples = Vec::new();
        let mut t = 0u64;
        for h in (0..=(EPOCH_LENGTH * 3)).step_by(EPOCH_LENGTH as usize) {
            samples.push(sample(h, 2_000, t));
            t += DESIRED_BLOCK_INTERVAL_MS * EPOCH_LENGTH as u64;
        }
        let next = linear_retarget(&samples).expect("steady series should retarget");
        let next_val = biguint_to_i128(&next) as f64;
        assert!((next_val - 2_000.0).abs() / 2_000.0 < 0.05);
    }

    #[test]
    fn doubled_interval_halves_effective_difficulty() {
        let samples = vec![sample(0, 4_000, 0), sample(EPOCH_LENGTH, 4_000, DESIRED_BLOCK_INTERVAL_MS * EPOCH_LENGTH as u64 * 2)];
        let next = linear_retarget(&samples).expect("should retarget");
        let next_val = biguint_to_i128(&next);
        assert!(next_val < 2_500 && next_val > 1_500);
    }

    #[test]
    fn prediction_below_one_returns_none() {
        let samples = vec![sample(0, 1, 0), sample(EPOCH_LENGTH, 1, u64::MAX / 2)];
        assert!(linear_retarget(&samples).is_none());
    }

    #[test]
    fn heights_for_retargeting_descend_from_parent_and_drop_negatives() {
        let heights = heights_for_retargeting_at(10);
        assert_eq!(heights[0], 10);
        assert!(heights.iter().all(|h| *h >= 0));
        assert!(heights.len() < RETARGETING_EPOCHS_QTY);
    }

    #[test]
    fn full_window_has_expected_length_and_spacing() {
        let parent_height = (RETARGETING_EPOCHS_QTY as i64 - 1) * EPOCH_LENGTH + 5;
        let heights = heights_for_retargeting_at(parent_height);
        assert_eq!(heights.len(), RETARGETING_EPOCHS_QTY);
        assert_eq!(heights[0], parent_height);
        assert_eq!(*heights.last().unwrap(), parent_height - (RETARGETING_EPOCHS_QTY as i64 - 1) * EPOCH_LENGTH);
    }
}

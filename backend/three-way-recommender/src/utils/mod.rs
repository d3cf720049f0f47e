// Utility functions for three-way-recommender

use crate::models::{ItemId, Quota, StageSelection};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Derives an independent per-user seed from a run seed.
///
/// The run seed is finalized before the user is mixed in, so
/// `(seed + 1, user)` and `(seed, user + 1)` land far apart.
pub fn derive_user_seed(seed: u64, user: usize) -> u64 {
    let mixed = splitmix64(seed) ^ (user as u64).wrapping_mul(0x517C_C1B7_2722_0A95);
    splitmix64(mixed)
}

fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Dedicated RNG for one user task.
pub fn user_rng(seed: u64, user: usize) -> StdRng {
    StdRng::seed_from_u64(derive_user_seed(seed, user))
}

/// Uniformly samples `count` distinct elements of `pool`.
///
/// Returns `None` when the pool is smaller than `count`.
pub fn sample_without_replacement<T: Copy>(
    pool: &[T],
    count: usize,
    rng: &mut StdRng,
) -> Option<Vec<T>> {
    if pool.len() < count {
        return None;
    }
    Some(pool.choose_multiple(rng, count).copied().collect())
}

/// Draws `quota.num_recommend` items from `recommend_pool` and
/// `quota.num_promote` from `promote_pool`.
///
/// `None` when either pool is too small; nothing is drawn in that case.
pub fn sample_stage(
    recommend_pool: &[ItemId],
    promote_pool: &[ItemId],
    quota: Quota,
    rng: &mut StdRng,
) -> Option<StageSelection> {
    if recommend_pool.len() < quota.num_recommend || promote_pool.len() < quota.num_promote {
        return None;
    }
    let recommended = sample_without_replacement(recommend_pool, quota.num_recommend, rng)?;
    let promoted = sample_without_replacement(promote_pool, quota.num_promote, rng)?;
    Some(StageSelection {
        recommended,
        promoted,
    })
}

/// Mean and population standard deviation.
pub fn mean_and_std_dev(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

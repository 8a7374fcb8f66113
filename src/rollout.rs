//! Rollout percentage evaluation with stable per-user bucketing.
//!
//! A user id is hashed with a 31-multiplier rolling hash over its UTF-16 code
//! units, wrapped to a signed 32-bit integer. The absolute value modulo 100 is
//! the user's bucket; the user is in the rollout when `bucket < percentage`.
//! The same id therefore lands in the same bucket across processes and restarts.

use rand::Rng;

/// Number of rollout buckets.
pub const BUCKETS: u32 = 100;

/// Signed 32-bit rolling hash (`h = h * 31 + unit`, wrapping).
pub fn string_hash(input: &str) -> i32 {
    input
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(unit as i32)
        })
}

/// Bucket in `[0, 99]` for a user id.
pub fn bucket_for(user_id: &str) -> u8 {
    (string_hash(user_id).unsigned_abs() % BUCKETS) as u8
}

/// Decide whether a request falls inside a rollout.
///
/// `>= 100` and `0` short-circuit before any hashing. With a user id the answer
/// is deterministic; without one it is a fresh coin flip on every call.
pub fn decide(rollout_percentage: u8, user_id: Option<&str>) -> bool {
    RolloutEvaluator.decide(rollout_percentage, user_id)
}

/// Stateless rollout evaluator.
#[derive(Clone, Copy, Debug, Default)]
pub struct RolloutEvaluator;

impl RolloutEvaluator {
    pub fn decide(&self, rollout_percentage: u8, user_id: Option<&str>) -> bool {
        if rollout_percentage >= 100 {
            return true;
        }
        if rollout_percentage == 0 {
            return false;
        }

        match user_id {
            Some(id) => bucket_for(id) < rollout_percentage,
            // Anonymous path: not sticky, so a caller without a stable id may see
            // the feature flip between requests. Not recommended for production.
            None => rand::rng().random_range(0.0..100.0) < f64::from(rollout_percentage),
        }
    }
}

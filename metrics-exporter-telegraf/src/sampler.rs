//! Probabilistic sampling of observations.
//!
//! Sample rates are expressed as a percentage: a rate of `100` or more always sends, a rate of `0` or less never
//! sends, and anything in between is an independent Bernoulli trial with a probability of `rate / 100`. No state is
//! carried between decisions.

use std::cell::RefCell;

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

/// Sample rate at which every observation is sent.
pub const FULL_SAMPLE_RATE: i32 = 100;

thread_local! {
    static FAST_RNG: RefCell<Xoshiro256StarStar> = RefCell::new(Xoshiro256StarStar::from_rng(&mut rand::rng()));
}

/// Decides whether an observation at the given sample rate should be sent, using a thread-local random source.
pub fn should_send(sample_rate: i32) -> bool {
    // Skip touching the RNG entirely for the boundary cases.
    match sample_rate {
        i32::MIN..=0 => false,
        FULL_SAMPLE_RATE..=i32::MAX => true,
        _ => FAST_RNG.with(|rng| should_send_with(sample_rate, &mut *rng.borrow_mut())),
    }
}

/// Decides whether an observation at the given sample rate should be sent, drawing from the given random source.
///
/// Given the same random source state, the decision is deterministic.
pub fn should_send_with<R: Rng>(sample_rate: i32, rng: &mut R) -> bool {
    if sample_rate <= 0 {
        return false;
    }
    if sample_rate >= FULL_SAMPLE_RATE {
        return true;
    }

    rng.random_range(0..FULL_SAMPLE_RATE) < sample_rate
}

//! Deterministic Randomness
//!
//! Seeded random number generation for RANDOM queue disciplines, so that a
//! run with the same seed enqueues processes in the same order.

//-----------------------------------------------------------------------------
// Imports
//-----------------------------------------------------------------------------

use rand::prelude::{RngCore, SeedableRng, StdRng};
use rand::Rng;

/// A wrapper around a seeded Pseudo-Random Number Generator (PRNG)
/// to ensure deterministic randomness in simulations.
#[derive(Debug, Clone)]
pub struct SeededRng {
    rng: StdRng,
    seed: u64,
}

impl SeededRng {
    /// Creates a new RNG instance seeded with the given 64-bit seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }

    /// Creates a new RNG instance from entropy.
    /// The generated seed is kept so the run can be replayed.
    pub fn from_entropy() -> Self {
        let mut entropy_rng = StdRng::from_entropy();
        Self::new(entropy_rng.next_u64())
    }

    /// Returns the seed used to initialize this RNG.
    pub fn get_seed(&self) -> u64 {
        self.seed
    }

    /// Generate a random value in the given range
    pub fn gen_range<T, R>(&mut self, range: R) -> T
    where
        T: rand::distributions::uniform::SampleUniform,
        R: rand::distributions::uniform::SampleRange<T>,
    {
        self.rng.gen_range(range)
    }

    /// Derive the seed for a child generator
    pub fn next_seed(&mut self) -> u64 {
        self.rng.next_u64()
    }
}

//! Explicit, keyed RNG construction (§9: "Global random-seed state. Replace
//! module-level generator with an explicit RNG object per dispatch keyed by
//! `(rngSeed, slot)`.").
//!
//! The teacher reaches for `rand::thread_rng()` at each call site
//! (`src/tree/cut.rs`); that is exactly the pattern this crate forbids on the
//! per-frame path, since it breaks the determinism property of `spec.md` §8.
//! Every stochastic component (4.C, 4.D) instead derives a private
//! [`rand_chacha::ChaCha20Rng`] from the frame seed and its own slot index.

use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

/// Deterministically derive a seed for `slot` from the frame-level
/// `rng_seed`, so that parallel slots get independent but reproducible
/// streams. `splitmix64` is the standard cheap seed-mixing function used to
/// decorrelate sequential seeds.
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Build a seeded RNG for dispatch slot `slot` within a frame keyed by
/// `rng_seed`. Two calls with the same `(rng_seed, slot)` pair always
/// produce an RNG in the same state.
///
/// # Examples
///
/// ```
/// use scoreforest_reloc::rng::slot_rng;
/// use rand::Rng;
///
/// let mut a = slot_rng(42, 7);
/// let mut b = slot_rng(42, 7);
/// assert_eq!(a.gen::<u64>(), b.gen::<u64>());
/// ```
pub fn slot_rng(rng_seed: u64, slot: u64) -> ChaCha20Rng {
    let mixed = splitmix64(rng_seed ^ splitmix64(slot));
    ChaCha20Rng::seed_from_u64(mixed)
}

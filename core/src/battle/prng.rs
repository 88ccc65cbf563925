//! Deterministic battle PRNG
//!
//! Battles must replay identically from (guild, boss, seed), so simulation
//! randomness comes from this self-contained xorshift generator instead of a
//! platform RNG. Never use it for anything security sensitive; tickets use a
//! real entropy source.

/// Fold an arbitrary seed string into a non-zero 32-bit state.
pub fn seed_from_str(seed: &str) -> u32 {
    let mut h: u32 = 0;
    for byte in seed.as_bytes() {
        h = h.wrapping_mul(31).wrapping_add(u32::from(*byte));
    }
    // xorshift cannot leave the zero state
    if h == 0 { 0x9E37_79B9 } else { h }
}

/// xorshift32 with a multiplicative output mix.
#[derive(Debug, Clone)]
pub struct BattleRng {
    state: u32,
}

impl BattleRng {
    pub fn new(seed: &str) -> Self {
        Self {
            state: seed_from_str(seed),
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x.wrapping_mul(0x2545_F491)
    }

    /// Uniform float in [0, 1).
    pub fn next_f64(&mut self) -> f64 {
        f64::from(self.next_u32()) / (f64::from(u32::MAX) + 1.0)
    }

    /// Uniform index in [0, n). `n` must be non-zero.
    pub fn pick(&mut self, n: usize) -> usize {
        ((u64::from(self.next_u32()) * n as u64) >> 32) as usize
    }

    /// Uniform integer in [lo, hi] inclusive.
    pub fn range_i64(&mut self, lo: i64, hi: i64) -> i64 {
        if hi <= lo {
            return lo;
        }
        let span = (hi - lo + 1) as u64;
        lo + ((u64::from(self.next_u32()) * span) >> 32) as i64
    }
}

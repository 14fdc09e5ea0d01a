use crate::error::{Result, VeilmarkError};

/// Deterministic pseudo-random fraction source.
///
/// Fixed multiply-add-xor recurrence on 32-bit state. Only integer arithmetic
/// feeds the state, so the stream is identical on every platform; the final
/// division by 2^32 maps exactly into [0, 1). Changing the recurrence breaks
/// every key issued so far, so the constants are part of the key format.
pub struct SeededRng {
    state: u32,
}

const RNG_MUL: u32 = 1_664_525;
const RNG_ADD: u32 = 1_013_904_223;

impl SeededRng {
    pub fn new(seed: u32) -> Self {
        Self { state: seed }
    }

    fn next_u32(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(RNG_MUL).wrapping_add(RNG_ADD);
        self.state ^= self.state >> 16;
        self.state
    }

    /// Next pseudo-random fraction in [0, 1).
    pub fn next_fraction(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }
}

/// A bijection over [0, N).
///
/// Semantics are fixed across the whole crate: `p[d]` is the source index
/// feeding destination index `d`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation(Vec<u32>);

impl Permutation {
    /// Generate the permutation for `(seed, n)` with an in-place Fisher-Yates
    /// shuffle of the identity sequence. Byte-for-byte regenerable from the
    /// same inputs.
    pub fn generate(seed: u32, n: usize) -> Result<Self> {
        if n == 0 {
            return Err(VeilmarkError::EmptyDomain);
        }

        let mut rng = SeededRng::new(seed);
        let mut p: Vec<u32> = (0..n as u32).collect();
        for i in (1..n).rev() {
            let j = (rng.next_fraction() * (i + 1) as f64) as usize;
            p.swap(i, j);
        }
        Ok(Self(p))
    }

    /// Wrap an explicit permutation array, verifying it is a true bijection
    /// over [0, len): dense range, no repeats.
    pub fn from_raw(values: Vec<u32>) -> Result<Self> {
        if values.is_empty() {
            return Err(VeilmarkError::EmptyDomain);
        }

        let n = values.len();
        let mut seen = vec![false; n];
        for &v in &values {
            let idx = v as usize;
            if idx >= n || seen[idx] {
                return Err(VeilmarkError::CorruptOrInvalidKey(format!(
                    "permutation is not a bijection over [0, {})",
                    n
                )));
            }
            seen[idx] = true;
        }
        Ok(Self(values))
    }

    /// Inverse permutation: `invert(p)[p[i]] == i` for all i.
    pub fn invert(&self) -> Self {
        let mut inv = vec![0u32; self.0.len()];
        for (d, &s) in self.0.iter().enumerate() {
            inv[s as usize] = d as u32;
        }
        Self(inv)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Source index feeding destination `d`.
    pub fn source_of(&self, d: usize) -> usize {
        self.0[d] as usize
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u32> {
        self.0
    }
}

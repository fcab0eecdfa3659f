//! Deterministic pseudo-random content.
//!
//! The shared [`RandomPool`] is generated once per process and never written
//! again. Stripe payloads and corruption both copy from its start, so two
//! stripes of the same geometry always start out byte-identical and a
//! corrupted column always receives the same bytes within one run.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// xorshift64* generator. Cheap, seedable and reproducible across runs.
#[derive(Debug, Clone)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545_F491_4F6C_DD1D)
    }

    /// Uniform value in `0..2^31`.
    pub fn next_u31(&mut self) -> u64 {
        self.next_u64() >> 33
    }

    /// True with probability `percent / 100`.
    pub fn percent(&mut self, percent: u32) -> bool {
        self.next_u64() % 100 < u64::from(percent)
    }
}

/// Seed derived from the wall clock and the process id.
#[must_use]
pub fn seed_from_clock() -> u64 {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs();
    secs.wrapping_mul(u64::from(std::process::id()))
}

/// Read-only random bytes shared by every trial.
#[derive(Debug, Clone)]
pub struct RandomPool {
    bytes: Arc<[u8]>,
    seed: u64,
}

impl RandomPool {
    /// Generate `len` bytes from `seed`.
    #[must_use]
    pub fn generate(seed: u64, len: usize) -> Self {
        let mut rng = DeterministicRng::new(seed);
        let mut bytes = Vec::with_capacity(len);
        while bytes.len() < len {
            let word = rng.next_u64().to_le_bytes();
            let take = word.len().min(len - bytes.len());
            bytes.extend_from_slice(&word[..take]);
        }
        Self {
            bytes: bytes.into(),
            seed,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Overwrite `dst` with the pool's leading bytes, repeating the pool if
    /// `dst` is longer.
    pub fn fill(&self, dst: &mut [u8]) {
        if self.bytes.is_empty() {
            dst.fill(0);
            return;
        }
        for chunk in dst.chunks_mut(self.bytes.len()) {
            chunk.copy_from_slice(&self.bytes[..chunk.len()]);
        }
    }

    /// A fresh payload of `len` bytes.
    #[must_use]
    pub fn payload(&self, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        self.fill(&mut out);
        out
    }
}

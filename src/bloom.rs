//! Concurrent Bloom filter with *basic* and *blocked* variants.
//!
//! Both variants derive their `k` probe indices from the same *enhanced
//! double hashing* recurrence (§4.1): one real hash computation seeds two
//! running values, and each subsequent probe is a cheap update of those
//! two values rather than an independent hash call.

use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::JoinError;
use crate::hash::{hash_crapwow, hash_crc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomVariant {
    Basic,
    Blocked { block_bits: u32 },
}

/// Validated construction parameters for a `BloomFilter`.
#[derive(Debug, Clone, Copy)]
pub struct BloomConfig {
    pub m_bits: u32,
    pub k: u32,
    pub variant: BloomVariant,
    pub seed: u32,
}

impl BloomConfig {
    pub fn basic(m_bits: u32, k: u32, seed: u32) -> Self {
        Self { m_bits, k, variant: BloomVariant::Basic, seed }
    }

    pub fn blocked(m_bits: u32, k: u32, block_bits: u32, seed: u32) -> Self {
        Self { m_bits, k, variant: BloomVariant::Blocked { block_bits }, seed }
    }

    fn validate(&self) -> Result<(), JoinError> {
        if self.m_bits == 0 || !self.m_bits.is_power_of_two() {
            return Err(JoinError::config(format!(
                "bloom filter size m={} must be a power of two",
                self.m_bits
            )));
        }
        if self.m_bits % 8 != 0 {
            return Err(JoinError::config("bloom filter size m must be a multiple of 8"));
        }
        if self.k == 0 {
            return Err(JoinError::config("bloom filter hash count k must be positive"));
        }
        if let BloomVariant::Blocked { block_bits } = self.variant {
            if block_bits == 0 || !block_bits.is_power_of_two() {
                return Err(JoinError::config(format!(
                    "bloom block size B={block_bits} must be a power of two"
                )));
            }
            if self.m_bits % block_bits != 0 {
                return Err(JoinError::config(format!(
                    "bloom block size B={block_bits} must divide m={}",
                    self.m_bits
                )));
            }
        }
        Ok(())
    }
}

/// The `(h, y)` enhanced double hashing recurrence from §4.1: `h` gives
/// the probe index directly, `y` drives the update `h += y`, `y += i+1`,
/// both taken modulo a power-of-two `mask`.
struct DoubleHash {
    h: u32,
    y: u32,
    mask: u32,
    i: u32,
}

impl DoubleHash {
    fn new(seed: u32, key: u32, mask: u32) -> Self {
        Self { h: hash_crapwow(seed, key) & mask, y: key.wrapping_add(seed) & mask, mask, i: 0 }
    }

    #[inline(always)]
    fn next_index(&mut self) -> u32 {
        if self.i > 0 {
            self.h = self.h.wrapping_add(self.y) & self.mask;
            self.y = self.y.wrapping_add(self.i) & self.mask;
        }
        self.i += 1;
        self.h
    }
}

/// Bit array with atomic-OR insertion and plain-read probing. Insertion
/// is safe under concurrent callers because setting a bit is monotonic;
/// the caller publishes completion with a barrier before anyone probes.
pub struct BloomFilter {
    bits: Box<[AtomicU8]>,
    config: BloomConfig,
}

impl BloomFilter {
    pub fn new(config: BloomConfig) -> Result<Self, JoinError> {
        config.validate()?;
        let num_bytes = (config.m_bits / 8) as usize;
        let bits = (0..num_bytes).map(|_| AtomicU8::new(0)).collect::<Vec<_>>().into_boxed_slice();
        Ok(Self { bits, config })
    }

    #[inline(always)]
    fn set_bit(&self, index: u32) {
        let idx = index as usize;
        let byte = idx >> 3;
        let bit = 1u8 << (idx & 7);
        self.bits[byte].fetch_or(bit, Ordering::Relaxed);
    }

    #[inline(always)]
    fn get_bit(&self, index: u32) -> bool {
        let idx = index as usize;
        let byte = idx >> 3;
        let bit = 1u8 << (idx & 7);
        (self.bits[byte].load(Ordering::Relaxed) & bit) != 0
    }

    /// Block index and local `m` used for probing this key, in bits.
    #[inline(always)]
    fn scope(&self, key: u32) -> (u32, u32) {
        match self.config.variant {
            BloomVariant::Basic => (0, self.config.m_bits),
            BloomVariant::Blocked { block_bits } => {
                let nblocks = self.config.m_bits / block_bits;
                let block = hash_crc(self.config.seed, key) % nblocks;
                (block * block_bits, block_bits)
            }
        }
    }

    pub fn add(&self, key: u32) {
        let (base, local_m) = self.scope(key);
        let mask = local_m - 1;
        let mut dh = DoubleHash::new(self.config.seed, key, mask);
        for _ in 0..self.config.k {
            self.set_bit(base + dh.next_index());
        }
    }

    pub fn contains(&self, key: u32) -> bool {
        let (base, local_m) = self.scope(key);
        let mask = local_m - 1;
        let mut dh = DoubleHash::new(self.config.seed, key, mask);
        for _ in 0..self.config.k {
            if !self.get_bit(base + dh.next_index()) {
                return false;
            }
        }
        true
    }

    pub fn config(&self) -> BloomConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn rejects_non_power_of_two_m() {
        assert!(BloomFilter::new(BloomConfig::basic(100, 4, 1)).is_err());
    }

    #[test]
    fn rejects_m_not_multiple_of_8() {
        assert!(BloomFilter::new(BloomConfig::basic(4, 4, 1)).is_err());
    }

    #[test]
    fn rejects_zero_k() {
        assert!(BloomFilter::new(BloomConfig::basic(1024, 0, 1)).is_err());
    }

    #[test]
    fn rejects_block_not_dividing_m() {
        assert!(BloomFilter::new(BloomConfig::blocked(1024, 4, 300, 1)).is_err());
    }

    #[test]
    fn no_false_negatives_basic() {
        let bf = BloomFilter::new(BloomConfig::basic(1 << 16, 8, 7)).unwrap();
        for key in 0..5000u32 {
            bf.add(key);
        }
        for key in 0..5000u32 {
            assert!(bf.contains(key), "false negative for {key}");
        }
    }

    #[test]
    fn no_false_negatives_blocked() {
        let bf = BloomFilter::new(BloomConfig::blocked(1 << 16, 6, 512, 7)).unwrap();
        for key in 0..5000u32 {
            bf.add(key);
        }
        for key in 0..5000u32 {
            assert!(bf.contains(key), "false negative for {key}");
        }
    }

    #[test]
    fn smallest_valid_filter_m8_k1() {
        let bf = BloomFilter::new(BloomConfig::basic(8, 1, 3)).unwrap();
        bf.add(42);
        assert!(bf.contains(42));
    }

    #[test]
    fn empirical_fpr_within_2x_theoretical() {
        let m: u32 = 1 << 20; // 1 Mbit
        let k: u32 = 8;
        let n: u32 = 100_000;
        let bf = BloomFilter::new(BloomConfig::basic(m, k, 11)).unwrap();
        for key in 0..n {
            bf.add(key);
        }
        for key in 0..n {
            assert!(bf.contains(key));
        }
        let mut false_positives = 0u32;
        for key in n..(2 * n) {
            if bf.contains(key) {
                false_positives += 1;
            }
        }
        let empirical = false_positives as f64 / n as f64;
        let theoretical = (1.0 - (1.0 - 1.0 / m as f64).powi((k * n) as i32)).powi(k as i32);
        assert!(
            empirical <= theoretical * 2.0 + 1e-6,
            "empirical FPR {empirical} exceeds 2x theoretical {theoretical}"
        );
    }

    #[test]
    fn concurrent_add_is_monotonic_and_visible() {
        let bf = Arc::new(BloomFilter::new(BloomConfig::basic(1 << 18, 6, 5)).unwrap());
        let mut handles = Vec::new();
        for t in 0..8u32 {
            let bf = Arc::clone(&bf);
            handles.push(thread::spawn(move || {
                for key in (t * 1000)..((t + 1) * 1000) {
                    bf.add(key);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        for key in 0..8000u32 {
            assert!(bf.contains(key), "lost insert for {key}");
        }
    }
}

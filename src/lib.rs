//! Main-memory parallel equi-join engine.
//!
//! Ten algorithm variants share three building blocks: radix
//! partitioning ([`partition`]), a chained hash table with overflow
//! buckets ([`table`]), and Bloom-filtered probing ([`bloom`]). [`join`]
//! is the single entry point; it dispatches on [`AlgoKind`] into
//! `radix`, `npo`, or `bloomjoin`.

mod barrier;
pub mod bloom;
mod bloomjoin;
pub mod cpu;
mod error;
pub mod hash;
mod npo;
mod partition;
mod radix;
mod skew;
mod table;
mod worker;

pub use bloom::{BloomConfig, BloomVariant};
pub use error::{JoinError, JoinResult};
pub use hash::HashFn;
pub use table::Tuple;

use std::sync::Arc;
use std::time::Duration;

/// Which of the ten join algorithms (§3) to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgoKind {
    /// Single-threaded radix join.
    Rj,
    /// Parallel radix join, one partitioning pass.
    Pro,
    /// Parallel radix join, two partitioning passes, histogram-sized.
    Prh,
    /// Parallel radix join, two passes, optimized sizing. This engine
    /// always computes exact histograms, so `Prho`'s sizing refinement
    /// over `Prh` collapses to the same pipeline; the variant is kept
    /// for configuration compatibility with callers that select by name.
    Prho,
    /// No-partitioning, concurrent shared hash table.
    Npo,
    /// No-partitioning, single-threaded.
    NpoSt,
    /// Bloom-filtered single-threaded radix join.
    Brj,
    /// Bloom-filtered parallel radix join, one pass.
    Bpro,
    /// Bloom-filtered parallel radix join, two passes.
    Bprh,
    Bprho,
}

impl AlgoKind {
    fn is_bloom(self) -> bool {
        matches!(self, AlgoKind::Brj | AlgoKind::Bpro | AlgoKind::Bprh | AlgoKind::Bprho)
    }

    fn is_npo(self) -> bool {
        matches!(self, AlgoKind::Npo | AlgoKind::NpoSt)
    }

    fn is_single_threaded(self) -> bool {
        matches!(self, AlgoKind::Rj | AlgoKind::NpoSt | AlgoKind::Brj)
    }

    fn is_two_pass(self) -> bool {
        matches!(self, AlgoKind::Prh | AlgoKind::Prho | AlgoKind::Bprh | AlgoKind::Bprho)
    }
}

/// One relation side of the join: a flat vector of key/payload tuples.
#[derive(Debug, Clone, Default)]
pub struct Relation {
    pub tuples: Vec<Tuple>,
}

impl Relation {
    pub fn new(tuples: Vec<Tuple>) -> Self {
        Self { tuples }
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

/// Oversized-partition handling (§4.4). `threshold_factor` flags a
/// partition as skewed once it exceeds `threshold_factor * median`
/// partition size; `splits` is how many sub-tasks an oversized partition
/// is cut into for work-stealing.
#[derive(Debug, Clone, Copy)]
pub struct SkewConfig {
    pub threshold_factor: f64,
    pub splits: usize,
}

impl Default for SkewConfig {
    fn default() -> Self {
        Self { threshold_factor: 4.0, splits: 8 }
    }
}

/// All knobs for one [`join`] call (§10).
#[derive(Clone)]
pub struct JoinConfig {
    pub algo: AlgoKind,
    pub nthreads: usize,
    /// Pass-1 partitioning fan-out, in bits.
    pub bits1: u32,
    /// Pass-2 partitioning fan-out, in bits. Ignored by single-pass
    /// algorithms (`Rj`, `Pro`, `Brj`, `Bpro`, `Npo`, `NpoSt`).
    pub bits2: u32,
    pub hash_fn: HashFn,
    pub seed: u32,
    /// Stage writes in cache-line-sized SWWC buffers during scatter.
    pub swwc: bool,
    /// Required for the four `B*` algorithms; ignored otherwise.
    pub bloom: Option<BloomConfig>,
    pub skew: Option<SkewConfig>,
    /// Maps a worker's thread id to a physical core id. `None` leaves
    /// threads unpinned.
    pub cpu_of: Option<Arc<dyn Fn(usize) -> usize + Send + Sync>>,
}

impl JoinConfig {
    /// A reasonable starting point: `nthreads` workers, single-pass
    /// 12-bit radix fan-out, CRC32C hashing, no Bloom filter, no skew
    /// handling, threads unpinned.
    pub fn new(algo: AlgoKind, nthreads: usize) -> Self {
        Self {
            algo,
            nthreads: nthreads.max(1),
            bits1: 12,
            bits2: 8,
            hash_fn: hash::hash_crc,
            seed: 0,
            swwc: false,
            bloom: None,
            skew: None,
            cpu_of: None,
        }
    }

    pub fn validate(&self) -> JoinResult<()> {
        if self.nthreads == 0 {
            return Err(JoinError::config("nthreads must be at least 1"));
        }
        if self.algo.is_single_threaded() && self.nthreads != 1 {
            log::warn!("algo {:?} is single-threaded; ignoring nthreads={}", self.algo, self.nthreads);
        }
        if !self.algo.is_npo() && self.bits1 == 0 {
            return Err(JoinError::config("bits1 must be at least 1 for a radix-family algorithm"));
        }
        if self.algo.is_two_pass() && self.bits2 == 0 {
            return Err(JoinError::config("bits2 must be at least 1 for a two-pass radix algorithm"));
        }
        if self.bits1 + self.bits2 >= 32 {
            return Err(JoinError::config("bits1 + bits2 must leave room in a 32-bit hash"));
        }
        if self.algo.is_bloom() && self.bloom.is_none() {
            return Err(JoinError::config("bloom-filtered algorithms require a BloomConfig"));
        }
        if let Some(skew) = &self.skew {
            if skew.threshold_factor <= 1.0 {
                return Err(JoinError::config("skew threshold_factor must exceed 1.0"));
            }
            if skew.splits == 0 {
                return Err(JoinError::config("skew splits must be at least 1"));
            }
        }
        Ok(())
    }
}

/// Outcome of one [`join`] call.
#[derive(Debug, Clone)]
pub struct JoinOutcome {
    pub total_matches: u64,
    pub elapsed: Duration,
}

/// Runs an equi-join of `r` against `s` on `Tuple::key` under `config`.
pub fn join(config: &JoinConfig, r: &Relation, s: &Relation) -> JoinResult<JoinOutcome> {
    config.validate()?;
    let start = std::time::Instant::now();

    let total_matches = match config.algo {
        AlgoKind::Npo => npo::join_npo(config, r, s, true),
        AlgoKind::NpoSt => npo::join_npo(config, r, s, false),
        AlgoKind::Rj | AlgoKind::Pro | AlgoKind::Prh | AlgoKind::Prho => radix::join_radix(config, r, s),
        AlgoKind::Brj | AlgoKind::Bpro | AlgoKind::Bprh | AlgoKind::Bprho => {
            bloomjoin::join_bloom_radix(config, r, s)?
        }
    };

    let elapsed = start.elapsed();
    log::info!(
        "join algo={:?} nthreads={} |R|={} |S|={} matches={total_matches} elapsed={elapsed:?}",
        config.algo,
        config.nthreads,
        r.len(),
        s.len()
    );
    Ok(JoinOutcome { total_matches, elapsed })
}

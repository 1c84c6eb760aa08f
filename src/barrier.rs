//! Reusable N-thread barrier used to phase-synchronize workers.
//!
//! `std::sync::Barrier` is already reusable across `wait()` calls; this
//! wrapper exists to give the phase sequence a name at call sites
//! (`barrier.phase("scatter")`) and a place to hook phase-boundary
//! logging without threading a label through every kernel.

use std::sync::Barrier as StdBarrier;

pub struct PhaseBarrier {
    inner: StdBarrier,
    nthreads: usize,
}

impl PhaseBarrier {
    pub fn new(nthreads: usize) -> Self {
        Self { inner: StdBarrier::new(nthreads.max(1)), nthreads }
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    /// Block until all `nthreads` workers have called `phase` for this
    /// round. `name` is used only for debug logging.
    pub fn phase(&self, name: &str) {
        log::debug!("barrier: entering phase {name}");
        self.inner.wait();
    }
}

//! Worker pool driver (§4.8): spawns N workers, pins each to a core via
//! `cpu_of`, runs a per-thread closure to completion, and collects
//! results in thread-id order. Cancellation is not supported: joins run
//! to completion, consistent with §5's scheduling model.

use std::sync::Arc;
use std::thread;

pub type CpuOf = Arc<dyn Fn(usize) -> usize + Send + Sync>;

pub struct WorkerPool {
    nthreads: usize,
    cpu_of: Option<CpuOf>,
}

impl WorkerPool {
    pub fn new(nthreads: usize, cpu_of: Option<CpuOf>) -> Self {
        Self { nthreads: nthreads.max(1), cpu_of }
    }

    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    pub fn cpu_of(&self) -> Option<CpuOf> {
        self.cpu_of.clone()
    }

    /// Runs `f(thread_id)` once per worker and blocks until every worker
    /// finishes, returning results in thread-id order. `f` may itself
    /// call into a shared [`crate::barrier::PhaseBarrier`] to coordinate
    /// multiple phases within one spawn.
    pub fn run<F, R>(&self, f: F) -> Vec<R>
    where
        F: Fn(usize) -> R + Sync,
        R: Send,
    {
        thread::scope(|scope| {
            let handles: Vec<_> = (0..self.nthreads)
                .map(|tid| {
                    let f = &f;
                    let cpu_of = self.cpu_of.clone();
                    scope.spawn(move || {
                        if let Some(cpu_of) = &cpu_of {
                            crate::cpu::pin_current_thread(cpu_of(tid));
                        }
                        f(tid)
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_every_worker_exactly_once() {
        let counter = AtomicUsize::new(0);
        let pool = WorkerPool::new(8, None);
        let results = pool.run(|tid| {
            counter.fetch_add(1, Ordering::SeqCst);
            tid
        });
        assert_eq!(counter.load(Ordering::SeqCst), 8);
        let mut sorted = results;
        sorted.sort();
        assert_eq!(sorted, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn zero_requested_threads_still_runs_one() {
        let pool = WorkerPool::new(0, None);
        assert_eq!(pool.nthreads(), 1);
        let results = pool.run(|tid| tid);
        assert_eq!(results, vec![0]);
    }

    #[test]
    fn cpu_of_is_invoked_per_thread() {
        let calls = Arc::new(std::sync::Mutex::new(Vec::new()));
        let calls2 = Arc::clone(&calls);
        let cpu_of: CpuOf = Arc::new(move |tid: usize| {
            calls2.lock().unwrap().push(tid);
            tid % 2
        });
        let pool = WorkerPool::new(4, Some(cpu_of));
        pool.run(|_| ());
        let mut seen = calls.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}

//! Chained bucket hash table with overflow buckets.
//!
//! Overflow buckets are owned by a per-thread arena (`OverflowPool`)
//! indexed by `u32`, never referenced by raw pointer across a lock hold
//! (§9: "model as arena + index rather than raw pointers"), so a
//! table's whole overflow pool set can be dropped at once and no bucket
//! outlives its table. The arena stores each bucket behind its own
//! `Box`, so growing the arena's `Vec` only moves the `Box` pointers,
//! never the bucket each one addresses — a raw pointer taken from a
//! bucket stays valid even if another thread grows the same arena
//! concurrently.
//!
//! Radix per-partition tables are built by a single thread and need no
//! locking; the NPO table is shared and locks the head bucket with a
//! spinlock bit while a writer appends to it or its chain.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::hash::HashFn;

pub const BUCKET_SIZE: usize = 2;
const L1_CACHE_BYTES: usize = 32 * 1024;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tuple {
    pub key: i32,
    pub payload: i32,
}

impl Tuple {
    #[inline(always)]
    pub fn hash_key(self) -> u32 {
        self.key as u32
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct OverflowRef {
    pool: u32,
    idx: u32,
}

#[derive(Clone, Copy, Debug, Default)]
struct Bucket {
    slots: [Tuple; BUCKET_SIZE],
    count: u8,
    next: Option<OverflowRef>,
}

impl Bucket {
    fn empty() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct OverflowPool {
    buckets: Vec<Box<Bucket>>,
}

impl OverflowPool {
    fn alloc(&mut self) -> u32 {
        self.buckets.push(Box::new(Bucket::empty()));
        (self.buckets.len() - 1) as u32
    }

    /// A stable address for bucket `idx`, valid even after this pool's
    /// `Vec` later reallocates: growth moves the `Box` pointers, not the
    /// heap allocation each one addresses.
    fn bucket_ptr(&self, idx: u32) -> *mut Bucket {
        &*self.buckets[idx as usize] as *const Bucket as *mut Bucket
    }
}

/// Sized to fit in L1 for radix partitions: `L1_CACHE_SIZE / tuple_size
/// / BUCKET_SIZE`, rounded to a power of two, at least 1.
pub fn radix_num_buckets(tuple_size: usize) -> usize {
    let raw = (L1_CACHE_BYTES / tuple_size / BUCKET_SIZE).max(1);
    raw.next_power_of_two()
}

/// Sized by R's cardinality for NPO: `next_power_of_two(|R| /
/// BUCKET_SIZE)`.
pub fn npo_num_buckets(r_cardinality: usize) -> usize {
    (r_cardinality / BUCKET_SIZE).max(1).next_power_of_two()
}

pub struct ChainedHashTable {
    buckets: Vec<Bucket>,
    locks: Option<Vec<AtomicBool>>,
    pools: Vec<Mutex<OverflowPool>>,
    mask: u32,
    hash_fn: HashFn,
    hash_seed: u32,
}

impl ChainedHashTable {
    /// `concurrent` selects whether head buckets are spinlock-protected
    /// (NPO, multiple inserting threads) or bare (radix, exactly one
    /// inserting thread owns this table). `npools` is the number of
    /// per-thread overflow pools to pre-allocate; radix tables pass 1.
    pub fn new(
        num_buckets: usize,
        npools: usize,
        concurrent: bool,
        hash_fn: HashFn,
        hash_seed: u32,
    ) -> Self {
        let num_buckets = num_buckets.next_power_of_two().max(1);
        Self {
            buckets: vec![Bucket::empty(); num_buckets],
            locks: concurrent.then(|| (0..num_buckets).map(|_| AtomicBool::new(false)).collect()),
            pools: (0..npools.max(1)).map(|_| Mutex::new(OverflowPool::default())).collect(),
            mask: (num_buckets - 1) as u32,
            hash_fn,
            hash_seed,
        }
    }

    #[inline(always)]
    fn bucket_index(&self, key: u32) -> usize {
        ((self.hash_fn)(self.hash_seed, key) & self.mask) as usize
    }

    #[inline(always)]
    fn lock(&self, idx: usize) {
        let Some(locks) = &self.locks else { return };
        while locks[idx].compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed).is_err()
        {
            std::hint::spin_loop();
        }
    }

    #[inline(always)]
    fn unlock(&self, idx: usize) {
        if let Some(locks) = &self.locks {
            locks[idx].store(false, Ordering::Release);
        }
    }

    /// Insert `tuple`. `pool_id` selects which per-thread overflow pool
    /// to allocate from if the chain needs to grow; radix callers (a
    /// single inserting thread) always pass 0.
    ///
    /// # Safety
    /// Caller must not mutate `self.buckets[bucket_index]` concurrently
    /// from another thread unless this table was built with
    /// `concurrent = true`.
    pub unsafe fn insert(&self, tuple: Tuple, pool_id: usize) {
        let idx = self.bucket_index(tuple.hash_key());
        self.lock(idx);

        // SAFETY: either this table is single-owner (radix) and the
        // caller upholds that, or the spinlock above serializes writers
        // to this bucket and its chain (NPO).
        let bucket_ptr = self.buckets.as_ptr().add(idx) as *mut Bucket;
        let mut bucket = &mut *bucket_ptr;
        loop {
            if (bucket.count as usize) < BUCKET_SIZE {
                bucket.slots[bucket.count as usize] = tuple;
                bucket.count += 1;
                break;
            }
            match bucket.next {
                Some(r) => {
                    let pool = self.pools[r.pool as usize].lock().unwrap();
                    let overflow_ptr = pool.bucket_ptr(r.idx);
                    drop(pool);
                    // SAFETY: overflow_ptr addresses the boxed bucket's own
                    // heap allocation, which outlives the pool's Vec being
                    // grown or reallocated by any concurrent alloc().
                    bucket = &mut *overflow_ptr;
                }
                None => {
                    let mut pool = self.pools[pool_id].lock().unwrap();
                    let new_idx = pool.alloc();
                    let overflow_ptr = pool.bucket_ptr(new_idx);
                    drop(pool);
                    bucket.next = Some(OverflowRef { pool: pool_id as u32, idx: new_idx });
                    // SAFETY: see above.
                    bucket = &mut *overflow_ptr;
                }
            }
        }

        self.unlock(idx);
    }

    /// Walk the bucket chain for `key`, invoking `callback` on every
    /// matching tuple. Returns the number of matches.
    pub fn probe(&self, key: i32, mut callback: impl FnMut(Tuple)) -> usize {
        let idx = self.bucket_index(key as u32);
        let mut matches = 0;
        let mut bucket = &self.buckets[idx];
        loop {
            for slot in &bucket.slots[..bucket.count as usize] {
                if slot.key == key {
                    matches += 1;
                    callback(*slot);
                }
            }
            match bucket.next {
                Some(r) => {
                    let pool = self.pools[r.pool as usize].lock().unwrap();
                    // SAFETY: overflow buckets are never removed, and each
                    // one's heap allocation is stable even when the pool's
                    // Vec<Box<Bucket>> reallocates on growth.
                    bucket = unsafe { &*pool.bucket_ptr(r.idx) };
                }
                None => break,
            }
        }
        matches
    }

    pub fn num_head_buckets(&self) -> usize {
        self.buckets.len()
    }
}

//! Histogram → prefix-sum → scatter primitives for radix partitioning.
//!
//! The three-phase shape here is the same one the teacher's hash-table
//! build used for its directory (count per slot, exclusive prefix sum,
//! parallel copy into final storage) — generalized from a fixed
//! directory of byte offsets to an arbitrary number of radix partitions,
//! and with `SWWC` staging buffers added for the scatter phase.

use crate::hash::HashFn;
use crate::table::Tuple;

const CACHE_LINE_BYTES: usize = 64;

#[derive(Clone, Copy)]
pub struct PartitionPlan {
    pub num_partitions: usize,
    pub bits: u32,
    pub shift: u32,
}

impl PartitionPlan {
    /// Partitions on bits `[shift_base .. shift_base + bits)` of
    /// `hash(key)`. `shift_base` lets a second partitioning pass look at
    /// the bits just above the first pass's (§4.4 two-pass variant).
    pub fn new(bits: u32, shift_base: u32) -> Self {
        Self { num_partitions: 1usize << bits, bits, shift: shift_base }
    }

    #[inline(always)]
    pub fn partition_of(&self, key: u32, hash_fn: HashFn, seed: u32) -> usize {
        let h = hash_fn(seed, key) >> self.shift;
        (h & (self.num_partitions as u32 - 1)) as usize
    }
}

/// Histogram phase (§4.4 step 1): per-partition tuple counts for one
/// thread's input slice.
pub fn histogram(slice: &[Tuple], plan: &PartitionPlan, hash_fn: HashFn, seed: u32) -> Vec<usize> {
    let mut hist = vec![0usize; plan.num_partitions];
    for tup in slice {
        hist[plan.partition_of(tup.hash_key(), hash_fn, seed)] += 1;
    }
    hist
}

/// Exclusive prefix sum (§4.4 step 3) over `hist[thread][partition]`.
/// Returns `dst[thread][partition]`, the absolute start offset for that
/// thread's writes into that partition, and `partition_offsets`, the
/// `[start, end)` byte-free tuple range of each partition in the shared
/// output buffer (length `num_partitions + 1`). Each partition's region
/// starts on a cache-line boundary so that no two partitions share a
/// line at the boundary.
pub fn prefix_sum(per_thread_hist: &[Vec<usize>], tuple_size: usize) -> (Vec<Vec<usize>>, Vec<usize>) {
    let nthreads = per_thread_hist.len();
    let num_partitions = per_thread_hist.first().map(|h| h.len()).unwrap_or(0);
    let line_tuples = (CACHE_LINE_BYTES / tuple_size).max(1);

    let mut dst = vec![vec![0usize; num_partitions]; nthreads];
    let mut partition_offsets = vec![0usize; num_partitions + 1];
    let mut cursor = 0usize;
    for p in 0..num_partitions {
        partition_offsets[p] = cursor;
        for t in 0..nthreads {
            dst[t][p] = cursor;
            cursor += per_thread_hist[t][p];
        }
        // pad up to the next cache-line-aligned tuple count
        let rem = cursor % line_tuples;
        if rem != 0 {
            cursor += line_tuples - rem;
        }
    }
    partition_offsets[num_partitions] = cursor;
    (dst, partition_offsets)
}

/// Total (padded) output buffer size implied by a prefix sum.
pub fn total_output_len(partition_offsets: &[usize]) -> usize {
    *partition_offsets.last().unwrap_or(&0)
}

/// Wrapper to send a raw pointer across the scatter phase's thread
/// boundary; each thread's destination range is disjoint by
/// construction (the prefix sum above), so concurrent writers never
/// alias.
#[derive(Copy, Clone)]
pub struct SendPtr<T>(*mut T);
unsafe impl<T> Send for SendPtr<T> {}
unsafe impl<T> Sync for SendPtr<T> {}

impl<T> SendPtr<T> {
    pub fn new(ptr: *mut T) -> Self {
        Self(ptr)
    }

    #[inline(always)]
    pub(crate) fn get(self) -> *mut T {
        self.0
    }
}

/// Scatter phase (§4.4 step 5), direct variant: write each tuple
/// straight to its destination slot. `cursors` is this thread's private
/// copy of `dst[thread_id]`, consumed in place.
pub fn scatter(
    slice: &[Tuple],
    plan: &PartitionPlan,
    hash_fn: HashFn,
    seed: u32,
    mut cursors: Vec<usize>,
    output: SendPtr<Tuple>,
) {
    for &tup in slice {
        let p = plan.partition_of(tup.hash_key(), hash_fn, seed);
        unsafe {
            *output.get().add(cursors[p]) = tup;
        }
        cursors[p] += 1;
    }
}

/// Scatter phase, SWWC variant: stage writes in per-partition
/// cache-line-sized buffers, flushing each with one bulk copy once full.
/// This trades per-tuple scattered stores to (likely cold) partition
/// memory for fewer, line-sized bulk copies.
pub fn scatter_swwc(
    slice: &[Tuple],
    plan: &PartitionPlan,
    hash_fn: HashFn,
    seed: u32,
    mut cursors: Vec<usize>,
    output: SendPtr<Tuple>,
) {
    let line = (CACHE_LINE_BYTES / std::mem::size_of::<Tuple>()).max(1);
    let mut staging: Vec<Vec<Tuple>> =
        (0..plan.num_partitions).map(|_| Vec::with_capacity(line)).collect();

    let flush = |buf: &mut Vec<Tuple>, cursor: &mut usize| {
        unsafe {
            std::ptr::copy_nonoverlapping(buf.as_ptr(), output.get().add(*cursor), buf.len());
        }
        *cursor += buf.len();
        buf.clear();
    };

    for &tup in slice {
        let p = plan.partition_of(tup.hash_key(), hash_fn, seed);
        staging[p].push(tup);
        if staging[p].len() == line {
            flush(&mut staging[p], &mut cursors[p]);
        }
    }
    for p in 0..plan.num_partitions {
        if !staging[p].is_empty() {
            flush(&mut staging[p], &mut cursors[p]);
        }
    }
}

/// One-shot single-threaded partitioning pass: histogram, prefix sum,
/// scatter, with no cross-thread coordination. Used for the second pass
/// of a two-pass radix join, where each pass-1 partition is already
/// small enough that one worker repartitions it alone.
pub fn partition_single_threaded(
    slice: &[Tuple],
    plan: &PartitionPlan,
    hash_fn: HashFn,
    seed: u32,
) -> (Vec<Tuple>, Vec<usize>) {
    let hist = histogram(slice, plan, hash_fn, seed);
    let (dst, offsets) = prefix_sum(std::slice::from_ref(&hist), std::mem::size_of::<Tuple>());
    let total = total_output_len(&offsets);
    let mut output = vec![Tuple::default(); total];
    scatter(slice, plan, hash_fn, seed, dst[0].clone(), SendPtr::new(output.as_mut_ptr()));
    (output, offsets)
}

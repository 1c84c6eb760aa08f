//! Radix join kernels: RJ, PRO, PRH, PRHO (§4.4–4.5).
//!
//! A pass-1 partition step fans both relations out by the low `bits1`
//! bits of the key hash; `bits2 > 0` repeats the split on the next
//! `bits2` bits within each pass-1 partition. Each final partition is
//! then built and probed independently, which is where all of this
//! family's parallelism after partitioning comes from.

use std::sync::Mutex;

use crate::hash::HashFn;
use crate::partition::{self, PartitionPlan, SendPtr};
use crate::skew::{self, PartitionTask, TaskQueue};
use crate::table::{radix_num_buckets, npo_num_buckets, ChainedHashTable, Tuple};
use crate::worker::{CpuOf, WorkerPool};
use crate::{JoinConfig, Relation, SkewConfig};

struct PartitionShared {
    per_thread_hist: Mutex<Vec<Option<Vec<usize>>>>,
    result: Mutex<Option<(Vec<Vec<usize>>, Vec<usize>)>>,
}

/// One barrier-synchronized histogram → prefix-sum → scatter pass over
/// `relation`, split across `nthreads` workers (§4.4 steps 1, 3, 5).
fn partition_pass(
    relation: &[Tuple],
    nthreads: usize,
    plan: &PartitionPlan,
    hash_fn: HashFn,
    seed: u32,
    swwc: bool,
    cpu_of: Option<CpuOf>,
) -> (Vec<Tuple>, Vec<usize>) {
    if relation.is_empty() {
        return (Vec::new(), vec![0usize; plan.num_partitions + 1]);
    }

    let nthreads = nthreads.max(1);
    let chunk = relation.len().div_ceil(nthreads).max(1);
    let slices: Vec<&[Tuple]> = relation.chunks(chunk).collect();
    let active = slices.len();
    let tuple_size = std::mem::size_of::<Tuple>();
    let line_tuples = (64 / tuple_size).max(1);

    let mut output = vec![Tuple::default(); relation.len() + plan.num_partitions * line_tuples];
    let output_ptr = SendPtr::new(output.as_mut_ptr());

    let barrier = crate::barrier::PhaseBarrier::new(active);
    let shared = PartitionShared {
        per_thread_hist: Mutex::new(vec![None; active]),
        result: Mutex::new(None),
    };
    let pool = WorkerPool::new(active, cpu_of);

    let offsets_per_thread: Vec<Vec<usize>> = pool.run(|tid| {
        let slice = slices[tid];
        let hist = partition::histogram(slice, plan, hash_fn, seed);
        shared.per_thread_hist.lock().unwrap()[tid] = Some(hist);
        barrier.phase("histogram");

        if tid == 0 {
            let guard = shared.per_thread_hist.lock().unwrap();
            let all: Vec<Vec<usize>> = guard.iter().map(|h| h.clone().unwrap()).collect();
            drop(guard);
            let computed = partition::prefix_sum(&all, tuple_size);
            *shared.result.lock().unwrap() = Some(computed);
        }
        barrier.phase("prefix_sum");

        let (dst, offsets) = shared.result.lock().unwrap().clone().unwrap();
        let cursors = dst[tid].clone();
        if swwc {
            partition::scatter_swwc(slice, plan, hash_fn, seed, cursors, output_ptr);
        } else {
            partition::scatter(slice, plan, hash_fn, seed, cursors, output_ptr);
        }
        barrier.phase("scatter");
        offsets
    });

    let offsets = offsets_per_thread.into_iter().next().unwrap_or_else(|| vec![0; plan.num_partitions + 1]);
    let total = partition::total_output_len(&offsets);
    output.truncate(total);
    (output, offsets)
}

fn build_probe_one(r_slice: &[Tuple], s_slice: &[Tuple], hash_fn: HashFn, seed: u32) -> u64 {
    if r_slice.is_empty() || s_slice.is_empty() {
        return 0;
    }
    let table = ChainedHashTable::new(radix_num_buckets(std::mem::size_of::<Tuple>()), 1, false, hash_fn, seed);
    for &tup in r_slice {
        unsafe { table.insert(tup, 0) };
    }
    let mut count = 0u64;
    for &tup in s_slice {
        count += table.probe(tup.key, |_| {}) as u64;
    }
    count
}

/// Build+probe an oversized partition with every worker collaborating:
/// all workers insert their share of `r_slice` into one spinlock-guarded
/// table (same design as the NPO build), then drain `s_slice`'s
/// sub-tasks from a shared queue until it runs dry.
fn build_probe_concurrent(r_slice: &[Tuple], s_slice: &[Tuple], hash_fn: HashFn, seed: u32, pool: &WorkerPool) -> u64 {
    if r_slice.is_empty() || s_slice.is_empty() {
        return 0;
    }
    let nthreads = pool.nthreads();
    let table = ChainedHashTable::new(npo_num_buckets(r_slice.len()), nthreads, true, hash_fn, seed);
    let barrier = crate::barrier::PhaseBarrier::new(nthreads);

    let r_chunk = r_slice.len().div_ceil(nthreads).max(1);
    let r_chunks: Vec<&[Tuple]> = r_slice.chunks(r_chunk).collect();

    let sizes = [s_slice.len()];
    let offsets = [0usize, s_slice.len()];
    let splits = (nthreads * 2).max(1);
    let tasks = skew::split_oversized(&sizes, &offsets, 0.0, splits);
    let queue = TaskQueue::new(tasks);

    let counts: Vec<u64> = pool.run(|tid| {
        if let Some(chunk) = r_chunks.get(tid) {
            for &tup in *chunk {
                unsafe { table.insert(tup, tid) };
            }
        }
        barrier.phase("skew_build");

        let mut count = 0u64;
        while let Some(task) = queue.pop() {
            for &tup in &s_slice[task.start..task.end] {
                count += table.probe(tup.key, |_| {}) as u64;
            }
        }
        count
    });
    counts.into_iter().sum()
}

/// Build+probe every final partition, giving oversized ones
/// (§4.4 skew handling) full-pool attention one at a time and splitting
/// the rest evenly by static thread ownership.
pub(crate) fn build_probe_final_partitions(
    r: &[Tuple],
    r_offsets: &[usize],
    s: &[Tuple],
    s_offsets: &[usize],
    hash_fn: HashFn,
    seed: u32,
    nthreads: usize,
    skew_cfg: Option<&SkewConfig>,
    cpu_of: Option<CpuOf>,
) -> u64 {
    let num_partitions = r_offsets.len().saturating_sub(1);
    if num_partitions == 0 {
        return 0;
    }
    let pool = WorkerPool::new(nthreads.max(1), cpu_of);

    let r_sizes: Vec<usize> = (0..num_partitions).map(|p| r_offsets[p + 1] - r_offsets[p]).collect();
    let skewed: Vec<usize> = match skew_cfg {
        Some(cfg) => skew::split_oversized(&r_sizes, r_offsets, cfg.threshold_factor, 1)
            .into_iter()
            .map(|t: PartitionTask| t.partition)
            .collect(),
        None => Vec::new(),
    };

    let mut total = 0u64;
    for &p in &skewed {
        total += build_probe_concurrent(
            &r[r_offsets[p]..r_offsets[p + 1]],
            &s[s_offsets[p]..s_offsets[p + 1]],
            hash_fn,
            seed,
            &pool,
        );
    }

    let remaining: Vec<usize> = (0..num_partitions).filter(|p| !skewed.contains(p)).collect();
    if remaining.is_empty() {
        return total;
    }
    let per_thread: Vec<u64> = pool.run(|tid| {
        let mut count = 0u64;
        let mut i = tid;
        while i < remaining.len() {
            let p = remaining[i];
            count += build_probe_one(&r[r_offsets[p]..r_offsets[p + 1]], &s[s_offsets[p]..s_offsets[p + 1]], hash_fn, seed);
            i += pool.nthreads();
        }
        count
    });
    total + per_thread.into_iter().sum::<u64>()
}

pub fn join_radix(config: &JoinConfig, r: &Relation, s: &Relation) -> u64 {
    let single_threaded = config.algo.is_single_threaded();
    let nthreads = if single_threaded { 1 } else { config.nthreads };
    let two_pass = config.algo.is_two_pass();
    let hash_fn = config.hash_fn;
    let seed = config.seed;

    let plan1 = PartitionPlan::new(config.bits1, 0);
    let (r1, r1_offsets) = partition_pass(&r.tuples, nthreads, &plan1, hash_fn, seed, config.swwc, config.cpu_of.clone());
    let (s1, s1_offsets) = partition_pass(&s.tuples, nthreads, &plan1, hash_fn, seed, config.swwc, config.cpu_of.clone());

    if !two_pass {
        return build_probe_final_partitions(
            &r1,
            &r1_offsets,
            &s1,
            &s1_offsets,
            hash_fn,
            seed,
            nthreads,
            config.skew.as_ref(),
            config.cpu_of.clone(),
        );
    }

    let plan2 = PartitionPlan::new(config.bits2, config.bits1);
    let num_p1 = plan1.num_partitions;
    let pool = WorkerPool::new(nthreads.max(1), config.cpu_of.clone());
    let skew_cfg = config.skew;

    let per_thread: Vec<u64> = pool.run(|tid| {
        let mut total = 0u64;
        let mut p = tid;
        while p < num_p1 {
            let r_seg = &r1[r1_offsets[p]..r1_offsets[p + 1]];
            let s_seg = &s1[s1_offsets[p]..s1_offsets[p + 1]];
            if !r_seg.is_empty() && !s_seg.is_empty() {
                let (r2, r2_offsets) = partition::partition_single_threaded(r_seg, &plan2, hash_fn, seed);
                let (s2, s2_offsets) = partition::partition_single_threaded(s_seg, &plan2, hash_fn, seed);
                total += build_probe_final_partitions(&r2, &r2_offsets, &s2, &s2_offsets, hash_fn, seed, 1, skew_cfg.as_ref(), None);
            }
            p += pool.nthreads();
        }
        total
    });
    per_thread.into_iter().sum()
}

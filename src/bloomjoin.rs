//! Bloom-filtered radix join kernels: BRJ, BPRO, BPRH, BPRHO (§4.7).
//!
//! Identical to [`crate::radix`]'s pipeline except for pass 1: while R is
//! partitioned, every key is also inserted into a shared Bloom filter;
//! while S is partitioned, a tuple is kept only if the filter says its
//! key might be in R. The filter can only produce false positives, never
//! false negatives, so no true match is ever dropped — it only trims the
//! S side before the more expensive build+probe work downstream.

use std::sync::Mutex;

use crate::bloom::BloomFilter;
use crate::hash::HashFn;
use crate::partition::{self, PartitionPlan, SendPtr};
use crate::table::Tuple;
use crate::worker::{CpuOf, WorkerPool};
use crate::{JoinConfig, JoinError, JoinResult, Relation};

struct PartitionShared {
    per_thread_hist: Mutex<Vec<Option<Vec<usize>>>>,
    result: Mutex<Option<(Vec<Vec<usize>>, Vec<usize>)>>,
}

fn bloom_histogram(slice: &[Tuple], plan: &PartitionPlan, hash_fn: HashFn, seed: u32, bloom: &BloomFilter) -> Vec<usize> {
    let mut hist = vec![0usize; plan.num_partitions];
    for tup in slice {
        if bloom.contains(tup.hash_key()) {
            hist[plan.partition_of(tup.hash_key(), hash_fn, seed)] += 1;
        }
    }
    hist
}

fn bloom_scatter(
    slice: &[Tuple],
    plan: &PartitionPlan,
    hash_fn: HashFn,
    seed: u32,
    mut cursors: Vec<usize>,
    output: SendPtr<Tuple>,
    bloom: &BloomFilter,
) {
    for &tup in slice {
        if !bloom.contains(tup.hash_key()) {
            continue;
        }
        let p = plan.partition_of(tup.hash_key(), hash_fn, seed);
        unsafe {
            *output.get().add(cursors[p]) = tup;
        }
        cursors[p] += 1;
    }
}

/// Partitions R's pass-1 slice, inserting every key into `bloom` during
/// the histogram scan (well before the barrier that any S-side reader
/// waits on, since R's whole pass completes before S's pass begins).
fn partition_pass_build_side(
    relation: &[Tuple],
    nthreads: usize,
    plan: &PartitionPlan,
    hash_fn: HashFn,
    seed: u32,
    swwc: bool,
    cpu_of: Option<CpuOf>,
    bloom: &BloomFilter,
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
    let shared = PartitionShared { per_thread_hist: Mutex::new(vec![None; active]), result: Mutex::new(None) };
    let pool = WorkerPool::new(active, cpu_of);

    let offsets_per_thread: Vec<Vec<usize>> = pool.run(|tid| {
        let slice = slices[tid];
        for tup in slice {
            bloom.add(tup.hash_key());
        }
        let hist = partition::histogram(slice, plan, hash_fn, seed);
        shared.per_thread_hist.lock().unwrap()[tid] = Some(hist);
        barrier.phase("histogram");

        if tid == 0 {
            let guard = shared.per_thread_hist.lock().unwrap();
            let all: Vec<Vec<usize>> = guard.iter().map(|h| h.clone().unwrap()).collect();
            drop(guard);
            *shared.result.lock().unwrap() = Some(partition::prefix_sum(&all, tuple_size));
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

/// Partitions S's pass-1 slice, dropping any tuple the Bloom filter says
/// cannot be in R.
fn partition_pass_probe_side(
    relation: &[Tuple],
    nthreads: usize,
    plan: &PartitionPlan,
    hash_fn: HashFn,
    seed: u32,
    swwc: bool,
    cpu_of: Option<CpuOf>,
    bloom: &BloomFilter,
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
    let shared = PartitionShared { per_thread_hist: Mutex::new(vec![None; active]), result: Mutex::new(None) };
    let pool = WorkerPool::new(active, cpu_of);

    let offsets_per_thread: Vec<Vec<usize>> = pool.run(|tid| {
        let slice = slices[tid];
        let hist = bloom_histogram(slice, plan, hash_fn, seed, bloom);
        shared.per_thread_hist.lock().unwrap()[tid] = Some(hist);
        barrier.phase("histogram");

        if tid == 0 {
            let guard = shared.per_thread_hist.lock().unwrap();
            let all: Vec<Vec<usize>> = guard.iter().map(|h| h.clone().unwrap()).collect();
            drop(guard);
            *shared.result.lock().unwrap() = Some(partition::prefix_sum(&all, tuple_size));
        }
        barrier.phase("prefix_sum");

        let (dst, offsets) = shared.result.lock().unwrap().clone().unwrap();
        let cursors = dst[tid].clone();
        bloom_scatter(slice, plan, hash_fn, seed, cursors, output_ptr, bloom);
        barrier.phase("scatter");
        offsets
    });

    let offsets = offsets_per_thread.into_iter().next().unwrap_or_else(|| vec![0; plan.num_partitions + 1]);
    let total = partition::total_output_len(&offsets);
    output.truncate(total);
    (output, offsets)
}

pub fn join_bloom_radix(config: &JoinConfig, r: &Relation, s: &Relation) -> JoinResult<u64> {
    let bloom_config = config
        .bloom
        .ok_or_else(|| JoinError::config("bloom-filtered algorithms require a BloomConfig"))?;
    let bloom = BloomFilter::new(bloom_config)?;

    let single_threaded = config.algo.is_single_threaded();
    let nthreads = if single_threaded { 1 } else { config.nthreads };
    let two_pass = config.algo.is_two_pass();
    let hash_fn = config.hash_fn;
    let seed = config.seed;

    let plan1 = PartitionPlan::new(config.bits1, 0);
    let (r1, r1_offsets) = partition_pass_build_side(&r.tuples, nthreads, &plan1, hash_fn, seed, config.swwc, config.cpu_of.clone(), &bloom);
    let (s1, s1_offsets) = partition_pass_probe_side(&s.tuples, nthreads, &plan1, hash_fn, seed, config.swwc, config.cpu_of.clone(), &bloom);

    let total = if !two_pass {
        crate::radix::build_probe_final_partitions(&r1, &r1_offsets, &s1, &s1_offsets, hash_fn, seed, nthreads, config.skew.as_ref(), config.cpu_of.clone())
    } else {
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
                    total += crate::radix::build_probe_final_partitions(&r2, &r2_offsets, &s2, &s2_offsets, hash_fn, seed, 1, skew_cfg.as_ref(), None);
                }
                p += pool.nthreads();
            }
            total
        });
        per_thread.into_iter().sum()
    };
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bloom::BloomConfig;
    use crate::{AlgoKind, Tuple};

    fn rel(keys: impl IntoIterator<Item = i32>) -> Relation {
        Relation::new(keys.into_iter().map(|key| Tuple { key, payload: key }).collect())
    }

    fn cfg(algo: AlgoKind) -> JoinConfig {
        let mut c = JoinConfig::new(algo, 4);
        c.bloom = Some(BloomConfig::basic(1 << 16, 6, 13));
        c
    }

    #[test]
    fn bloom_filtered_join_matches_unfiltered_count() {
        let r = rel(0..5000);
        let s = rel(2500..7500);
        let bloom_result = join_bloom_radix(&cfg(AlgoKind::Bpro), &r, &s).unwrap();

        let plain = JoinConfig::new(AlgoKind::Pro, 4);
        let plain_result = crate::join(&plain, &r, &s).unwrap();
        assert_eq!(bloom_result, plain_result.total_matches);
        assert_eq!(bloom_result, 2500);
    }

    #[test]
    fn two_pass_bloom_variant_matches_single_pass() {
        let r = rel(0..4000);
        let s = rel(1000..5000);
        let single = join_bloom_radix(&cfg(AlgoKind::Bpro), &r, &s).unwrap();
        let mut two_pass = cfg(AlgoKind::Bprh);
        two_pass.bits1 = 4;
        two_pass.bits2 = 4;
        let two_pass_result = join_bloom_radix(&two_pass, &r, &s).unwrap();
        assert_eq!(single, two_pass_result);
    }

    #[test]
    fn missing_bloom_config_is_rejected() {
        let r = rel(0..10);
        let s = rel(0..10);
        let cfg = JoinConfig::new(AlgoKind::Bpro, 2);
        assert!(join_bloom_radix(&cfg, &r, &s).is_err());
    }

    #[test]
    fn false_positives_never_drop_a_true_match() {
        // a tiny, heavily overloaded filter maximizes the false-positive
        // rate without ever producing a false negative.
        let r = rel(0..50);
        let s = rel(0..50);
        let mut c = JoinConfig::new(AlgoKind::Brj, 1);
        c.bits1 = 2;
        c.bloom = Some(BloomConfig::basic(64, 1, 1));
        assert_eq!(join_bloom_radix(&c, &r, &s).unwrap(), 50);
    }
}

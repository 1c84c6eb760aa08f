//! No-partitioning join kernels: NPO and NPO_st (§4.6).
//!
//! One shared hash table over all of R, a single build/probe barrier,
//! and a lock-free probe phase. NPO never partitions either relation —
//! the only coordination needed is the bucket spinlock in
//! [`crate::table::ChainedHashTable`] during build.

use crate::table::{npo_num_buckets, ChainedHashTable, Tuple};
use crate::worker::WorkerPool;
use crate::{JoinConfig, Relation};

pub fn join_npo(config: &JoinConfig, r: &Relation, s: &Relation, concurrent: bool) -> u64 {
    let nthreads = if concurrent { config.nthreads.max(1) } else { 1 };
    let table = ChainedHashTable::new(npo_num_buckets(r.len()), nthreads, concurrent, config.hash_fn, config.seed);
    let pool = WorkerPool::new(nthreads, config.cpu_of.clone());
    let barrier = crate::barrier::PhaseBarrier::new(nthreads);

    let r_chunk = r.len().div_ceil(nthreads).max(1);
    let r_chunks: Vec<&[Tuple]> = r.tuples.chunks(r_chunk).collect();
    let s_chunk = s.len().div_ceil(nthreads).max(1);
    let s_chunks: Vec<&[Tuple]> = s.tuples.chunks(s_chunk).collect();

    let counts: Vec<u64> = pool.run(|tid| {
        if let Some(chunk) = r_chunks.get(tid) {
            for &tup in *chunk {
                unsafe { table.insert(tup, tid) };
            }
        }
        barrier.phase("build");

        let mut count = 0u64;
        if let Some(chunk) = s_chunks.get(tid) {
            for &tup in *chunk {
                count += table.probe(tup.key, |_| {}) as u64;
            }
        }
        count
    });
    counts.into_iter().sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlgoKind;

    fn rel(keys: impl IntoIterator<Item = i32>) -> Relation {
        Relation::new(keys.into_iter().map(|key| Tuple { key, payload: key }).collect())
    }

    #[test]
    fn concurrent_and_single_threaded_agree() {
        let r = rel(0..4000);
        let s = rel(2000..6000);
        let cfg = JoinConfig::new(AlgoKind::Npo, 8);
        let concurrent = join_npo(&cfg, &r, &s, true);
        let single = join_npo(&cfg, &r, &s, false);
        assert_eq!(concurrent, single);
        assert_eq!(concurrent, 2000);
    }

    #[test]
    fn duplicate_build_side_keys_all_chain() {
        let r = Relation::new(vec![Tuple { key: 1, payload: 1 }, Tuple { key: 1, payload: 2 }, Tuple { key: 1, payload: 3 }]);
        let s = rel([1]);
        let cfg = JoinConfig::new(AlgoKind::Npo, 4);
        assert_eq!(join_npo(&cfg, &r, &s, true), 3);
    }

    #[test]
    fn empty_build_side_never_matches() {
        let r = Relation::new(Vec::new());
        let s = rel(0..100);
        let cfg = JoinConfig::new(AlgoKind::NpoSt, 1);
        assert_eq!(join_npo(&cfg, &r, &s, false), 0);
    }
}

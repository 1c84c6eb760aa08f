//! Skew handling (§4.4): detect partitions far above the median size and
//! split their build+probe work into sub-ranges, stolen by any worker
//! once its own statically assigned partitions are done. Without this,
//! one skewed partition serializes on whatever thread happened to own
//! it while the rest idle.
//!
//! Unlike a general producer/consumer queue, every sub-task is known
//! before the steal phase starts — `split_oversized` runs single-threaded
//! ahead of the worker pool, so there is never a concurrent push to race
//! against, only concurrent pops. [`TaskQueue`] is just that: a fixed
//! task list plus one shared cursor, bumped with `fetch_add` the same
//! way a round-robin index is claimed elsewhere in this crate
//! ([`crate::cpu::round_robin`]).

use std::sync::atomic::{AtomicUsize, Ordering};

/// A sub-range `[start, end)` of one partition's tuples, stolen by
/// whichever idle worker reaches it next.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionTask {
    pub partition: usize,
    pub start: usize,
    pub end: usize,
}

/// Fixed list of [`PartitionTask`]s, claimed by concurrent stealers via
/// one shared `fetch_add` cursor. Built once (single-threaded, before
/// the steal phase) from [`split_oversized`]'s output and never grown.
pub struct TaskQueue {
    tasks: Vec<PartitionTask>,
    cursor: AtomicUsize,
}

impl TaskQueue {
    pub fn new(tasks: Vec<PartitionTask>) -> Self {
        Self { tasks, cursor: AtomicUsize::new(0) }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Claims the next unclaimed task, or `None` once every task has
    /// been handed out. Every call observes a distinct index: the
    /// `fetch_add` is the sole point of contention, and only the caller
    /// whose claimed index falls within bounds gets a task back.
    pub fn pop(&self) -> Option<PartitionTask> {
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed);
        self.tasks.get(idx).copied()
    }
}

/// Lomuto partition over `usize` sizes, used only to find the median.
fn partition(data: &mut [usize], left: usize, right: usize, pivot: usize) -> usize {
    data.swap(pivot, right);
    let mut store = left;
    for i in left..right {
        if data[i] < data[right] {
            data.swap(store, i);
            store += 1;
        }
    }
    data.swap(right, store);
    store
}

fn select_kth(data: &mut [usize], mut left: usize, mut right: usize, k: usize) -> usize {
    loop {
        if left == right {
            return data[left];
        }
        let pivot = left + (right - left) / 2;
        let pivot = partition(data, left, right, pivot);
        if k == pivot {
            return data[k];
        } else if k < pivot {
            right = pivot - 1;
        } else {
            left = pivot + 1;
        }
    }
}

/// Median of a set of per-partition tuple counts, via quickselect
/// (O(n) average, cache-friendly, and we only ever need one rank).
pub fn median_partition_size(partition_sizes: &[usize]) -> usize {
    if partition_sizes.is_empty() {
        return 0;
    }
    let mut data = partition_sizes.to_vec();
    let mid = data.len() / 2;
    let last = data.len() - 1;
    select_kth(&mut data, 0, last, mid)
}

/// Partitions whose size exceeds `threshold_factor * median` are split
/// into `splits` equal-sized sub-ranges and returned as tasks to hand to
/// a [`TaskQueue`].
pub fn split_oversized(
    partition_sizes: &[usize],
    partition_offsets: &[usize],
    threshold_factor: f64,
    splits: usize,
) -> Vec<PartitionTask> {
    let median = median_partition_size(partition_sizes).max(1);
    let threshold = (median as f64 * threshold_factor) as usize;
    let splits = splits.max(1);
    let mut tasks = Vec::new();

    for (p, &size) in partition_sizes.iter().enumerate() {
        if size <= threshold || size == 0 {
            continue;
        }
        let base = partition_offsets[p];
        let chunk = size.div_ceil(splits);
        let mut start = base;
        let end = base + size;
        while start < end {
            let stop = (start + chunk).min(end);
            tasks.push(PartitionTask { partition: p, start, end: stop });
            start = stop;
        }
    }
    tasks
}

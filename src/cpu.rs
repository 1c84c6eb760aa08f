//! CPU-to-core-id mapping (§6, §9). The engine itself only ever calls a
//! `cpu_of(thread_id) -> core_id` closure; this module supplies pure
//! helpers a caller can use to build one, plus an optional pinning call,
//! but never touches the filesystem itself.

use crate::error::JoinError;

/// Default mapping when no CPU-mapping file is supplied: thread `i` maps
/// to core `i % ncpus`.
pub fn round_robin(ncpus: usize) -> impl Fn(usize) -> usize {
    let ncpus = ncpus.max(1);
    move |thread_id: usize| thread_id % ncpus
}

/// Logical core count as seen by the OS scheduler (not NUMA-aware);
/// callers that want physical-core-only pinning should supply their own
/// mapping file instead.
pub fn available_cpus() -> usize {
    num_cpus::get()
}

/// Parses the CPU-mapping file format from §6: first integer
/// `max_cpus`, then `max_cpus` integers giving logical→physical core
/// ids. Pure function — the engine never opens this file itself.
pub fn parse_mapping(text: &str) -> Result<Vec<usize>, JoinError> {
    let mut numbers = text.split_whitespace();
    let max_cpus: usize = numbers
        .next()
        .ok_or_else(|| JoinError::config("cpu mapping file is empty"))?
        .parse()
        .map_err(|_| JoinError::config("cpu mapping file: max_cpus is not an integer"))?;

    let mapping: Result<Vec<usize>, _> = numbers.by_ref().take(max_cpus).map(|n| n.parse()).collect();
    let mapping = mapping.map_err(|_| JoinError::config("cpu mapping file: non-integer core id"))?;

    if mapping.len() != max_cpus {
        return Err(JoinError::config(format!(
            "cpu mapping file declared {max_cpus} entries but only {} were present",
            mapping.len()
        )));
    }
    Ok(mapping)
}

/// Builds a `cpu_of` closure from a parsed mapping, falling back to
/// round-robin over the mapping's own length for thread ids beyond it.
pub fn from_mapping(mapping: Vec<usize>) -> impl Fn(usize) -> usize {
    move |thread_id: usize| mapping[thread_id % mapping.len()]
}

/// Pins the calling thread to `core_id`. Linux-only; a no-op stub on
/// other platforms since `sched_setaffinity` has no portable analogue
/// here and pinning is a performance hint, not a correctness requirement.
#[cfg(target_os = "linux")]
pub fn pin_current_thread(core_id: usize) {
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(core_id, &mut set);
        libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set);
    }
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_core_id: usize) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_wraps() {
        let f = round_robin(4);
        assert_eq!(f(0), 0);
        assert_eq!(f(3), 3);
        assert_eq!(f(4), 0);
        assert_eq!(f(7), 3);
    }

    #[test]
    fn round_robin_zero_cpus_does_not_divide_by_zero() {
        let f = round_robin(0);
        assert_eq!(f(5), 0);
    }

    #[test]
    fn parse_mapping_reads_declared_count() {
        let mapping = parse_mapping("3\n0 2 1").unwrap();
        assert_eq!(mapping, vec![0, 2, 1]);
    }

    #[test]
    fn parse_mapping_rejects_short_file() {
        assert!(parse_mapping("4\n0 1").is_err());
    }

    #[test]
    fn parse_mapping_rejects_non_integer() {
        assert!(parse_mapping("2\n0 x").is_err());
    }

    #[test]
    fn parse_mapping_rejects_empty() {
        assert!(parse_mapping("").is_err());
    }

    #[test]
    fn from_mapping_wraps_like_round_robin() {
        let f = from_mapping(vec![7, 3, 9]);
        assert_eq!(f(0), 7);
        assert_eq!(f(1), 3);
        assert_eq!(f(3), 7);
    }

    #[test]
    fn available_cpus_is_at_least_one() {
        assert!(available_cpus() >= 1);
    }
}

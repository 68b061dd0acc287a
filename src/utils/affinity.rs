// ============================================================================
// Worker Placement
// Core assignment and pinning for symbol workers
// ============================================================================
//
// Pinning needs the `numa` feature; without it the functions below report
// failure and change nothing.

/// Core ids a worker may be pinned to
#[cfg(feature = "numa")]
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .map(|id| id.id)
        .collect()
}

/// Core ids a worker may be pinned to
#[cfg(not(feature = "numa"))]
pub fn available_cores() -> Vec<usize> {
    let count = std::thread::available_parallelism()
        .map(|p| p.get())
        .unwrap_or(1);
    (0..count).collect()
}

/// Pin the calling thread to `core_id`. Returns false if the core does not
/// exist or pinning failed.
#[cfg(feature = "numa")]
pub fn pin_current_thread_to_core(core_id: usize) -> bool {
    let pinned = core_affinity::get_core_ids()
        .unwrap_or_default()
        .into_iter()
        .find(|id| id.id == core_id)
        .map(core_affinity::set_for_current)
        .unwrap_or(false);
    if !pinned {
        tracing::warn!(core = core_id, "failed to pin worker thread");
    }
    pinned
}

/// No-op without the `numa` feature
#[cfg(not(feature = "numa"))]
pub fn pin_current_thread_to_core(_core_id: usize) -> bool {
    false
}

/// One core per worker, round-robin over `cores`.
///
/// Core 0 is left to the caller's threads whenever there are more cores than
/// workers.
pub fn assign_worker_cores(cores: &[usize], worker_count: usize) -> Vec<usize> {
    if cores.is_empty() || worker_count == 0 {
        return Vec::new();
    }
    let usable = if cores.len() > worker_count {
        &cores[1..]
    } else {
        cores
    };
    (0..worker_count).map(|i| usable[i % usable.len()]).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignment_skips_first_core_when_spare() {
        assert_eq!(assign_worker_cores(&[0, 1, 2, 3], 2), vec![1, 2]);
        assert_eq!(assign_worker_cores(&[0, 1], 3), vec![0, 1, 0]);
        assert!(assign_worker_cores(&[], 3).is_empty());
    }

    #[test]
    fn test_cores_detected() {
        assert!(!available_cores().is_empty());
    }

    #[cfg(not(feature = "numa"))]
    #[test]
    fn test_pinning_disabled_without_feature() {
        assert!(!pin_current_thread_to_core(0));
    }
}

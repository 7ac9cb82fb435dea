//! Small computational helpers that don't belong on any one struct:
//! replica port allocation and readiness-probe budget. Grounded on the
//! spirit of the original library's `math` module (pure functions used by
//! `Manifest::estimate_wait_time` and friends).
use std::time::Duration;

/// Ports assigned to replicas in a group: contiguous, starting at
/// `base_port`. Spec invariant (section 8): "Replica ports are contiguous
/// starting at base_port."
pub fn replica_ports(base_port: u16, replica_count: u32) -> Vec<u16> {
    (0..replica_count).map(|i| base_port + i as u16).collect()
}

/// The readiness-probe retry budget: the smaller of the job's remaining
/// time budget and 60 seconds (spec section 4.7).
pub fn readiness_budget(job_remaining: Duration) -> Duration {
    let cap = Duration::from_secs(60);
    if job_remaining < cap { job_remaining } else { cap }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn four_replicas_at_one_gpu_each() {
        assert_eq!(replica_ports(8001, 4), vec![8001, 8002, 8003, 8004]);
    }

    #[test]
    fn zero_replicas_is_empty() {
        assert!(replica_ports(8001, 0).is_empty());
    }

    #[test]
    fn readiness_budget_caps_at_60s() {
        assert_eq!(readiness_budget(Duration::from_secs(600)), Duration::from_secs(60));
        assert_eq!(readiness_budget(Duration::from_secs(10)), Duration::from_secs(10));
    }
}

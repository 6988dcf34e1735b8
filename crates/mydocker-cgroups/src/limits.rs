//! Resource constraints for a container.

use serde::{Deserialize, Serialize};

/// Resource constraints applied to a container's cgroup.
///
/// Zero (or −1 for the CPU quota) means "unlimited"; such caps are skipped
/// when the cgroup is populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// CPU shares (relative weight).
    pub cpu_shares: u64,
    /// CPU quota in microseconds (−1 for no limit).
    pub cpu_quota: i64,
    /// CPU period in microseconds.
    pub cpu_period: u64,
    /// Memory limit in bytes (0 for no limit).
    pub memory: u64,
    /// Memory + swap limit in bytes (0 for no limit).
    pub memory_swap: u64,
    /// Maximum number of processes (0 for no limit).
    pub pids_limit: i64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_shares: 1024,
            cpu_quota: -1,
            cpu_period: 100_000,
            memory: 0,
            memory_swap: 0,
            pids_limit: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_unlimited() {
        let limits = ResourceLimits::default();
        assert_eq!(limits.cpu_shares, 1024);
        assert_eq!(limits.cpu_quota, -1);
        assert_eq!(limits.cpu_period, 100_000);
        assert_eq!(limits.memory, 0);
        assert_eq!(limits.memory_swap, 0);
        assert_eq!(limits.pids_limit, 0);
    }

    #[test]
    fn serde_round_trip() {
        let limits = ResourceLimits {
            memory: 64 * 1024 * 1024,
            pids_limit: 50,
            ..Default::default()
        };
        let json = serde_json::to_string(&limits).unwrap();
        let back: ResourceLimits = serde_json::from_str(&json).unwrap();
        assert_eq!(back, limits);
    }
}

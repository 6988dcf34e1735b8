//! Wire types for the daemon API.

use mydocker_cgroups::ResourceLimits;
use mydocker_container::ContainerRecord;
use serde::{Deserialize, Serialize};

/// Request to create (and start) a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerCreateRequest {
    /// Image name. Currently an alias for `rootfs`; retained for forward
    /// compatibility and never interpreted.
    #[serde(default)]
    pub image: String,
    /// Program and arguments.
    #[serde(default)]
    pub command: Vec<String>,
    /// Absolute path of the prepared root directory.
    #[serde(default)]
    pub rootfs: String,
    /// Memory limit in bytes (0 = unlimited).
    #[serde(default)]
    pub memory: u64,
    /// Memory + swap limit in bytes (0 = unlimited).
    #[serde(default)]
    pub memory_swap: u64,
    /// CPU shares (relative weight).
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: u64,
    /// CPU quota in microseconds (−1 = unlimited).
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota: i64,
    /// CPU period in microseconds.
    #[serde(default = "default_cpu_period")]
    pub cpu_period: u64,
    /// Maximum number of processes (0 = unlimited).
    #[serde(default)]
    pub pids_limit: i64,
    /// Detached (background) mode.
    #[serde(default)]
    pub detach: bool,
}

fn default_cpu_shares() -> u64 {
    1024
}

fn default_cpu_quota() -> i64 {
    -1
}

fn default_cpu_period() -> u64 {
    100_000
}

impl ContainerCreateRequest {
    /// Resource limits carried by this request.
    #[must_use]
    pub fn limits(&self) -> ResourceLimits {
        ResourceLimits {
            cpu_shares: self.cpu_shares,
            cpu_quota: self.cpu_quota,
            cpu_period: self.cpu_period,
            memory: self.memory,
            memory_swap: self.memory_swap,
            pids_limit: self.pids_limit,
        }
    }
}

/// Response to a create request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerCreateResponse {
    /// Container ID.
    pub id: String,
}

/// One container in a list response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerInfo {
    /// Container ID.
    pub id: String,
    /// Image name (the rootfs path).
    pub image: String,
    /// Program and arguments, space-joined.
    pub command: String,
    /// Current status (`created` | `running` | `exited`).
    pub status: String,
    /// Creation time in unix seconds.
    pub created: i64,
    /// Child process ID (0 when not running).
    pub pid: i32,
}

impl ContainerInfo {
    /// Projects a persisted record onto the wire.
    #[must_use]
    pub fn from_record(record: &ContainerRecord) -> Self {
        Self {
            id: record.id.to_string(),
            image: record.rootfs.display().to_string(),
            command: record.command.join(" "),
            status: record.status.to_string(),
            created: record.created.timestamp(),
            pid: record.pid,
        }
    }
}

/// Response to a list request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerListResponse {
    /// All known containers.
    pub containers: Vec<ContainerInfo>,
}

/// Request to stop a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStopRequest {
    /// Container ID.
    pub id: String,
}

/// Response to a stop request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerStopResponse {
    /// Whether the stop was delivered.
    pub success: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_defaults_match_cli_defaults() {
        let req: ContainerCreateRequest =
            serde_json::from_str(r#"{"command": ["/bin/true"], "rootfs": "/tmp/r"}"#).unwrap();
        assert_eq!(req.cpu_shares, 1024);
        assert_eq!(req.cpu_quota, -1);
        assert_eq!(req.cpu_period, 100_000);
        assert_eq!(req.memory, 0);
        assert_eq!(req.pids_limit, 0);
        assert!(!req.detach);
    }

    #[test]
    fn limits_projection_carries_all_caps() {
        let req: ContainerCreateRequest = serde_json::from_str(
            r#"{"command": ["/bin/true"], "rootfs": "/tmp/r",
                "memory": 67108864, "memory_swap": 134217728,
                "cpu_quota": 50000, "pids_limit": 50}"#,
        )
        .unwrap();
        let limits = req.limits();
        assert_eq!(limits.memory, 67_108_864);
        assert_eq!(limits.memory_swap, 134_217_728);
        assert_eq!(limits.cpu_quota, 50_000);
        assert_eq!(limits.pids_limit, 50);
    }
}

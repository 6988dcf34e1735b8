//! Container identity and persisted record.

use chrono::{DateTime, Utc};
use mydocker_cgroups::ResourceLimits;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Container identifier: 12 hex characters of cryptographic randomness.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new random container ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string().replace('-', "")[..12].to_string())
    }

    /// Creates a container ID from a string.
    #[must_use]
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Returns the ID as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ContainerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// Created but not started.
    Created,
    /// Child process is running.
    Running,
    /// Child process has exited.
    Exited,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
        }
    }
}

/// Persisted per-container record.
///
/// Invariant: `status == Running` implies `pid > 0` and a live kernel
/// process; otherwise `pid == 0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container ID.
    pub id: ContainerId,
    /// Child process ID (0 when not running).
    pub pid: i32,
    /// Current status.
    pub status: ContainerStatus,
    /// Program and arguments.
    pub command: Vec<String>,
    /// Absolute path of the root directory.
    pub rootfs: PathBuf,
    /// Creation time.
    pub created: DateTime<Utc>,
    /// Resource caps.
    pub limits: ResourceLimits,
}

impl ContainerRecord {
    /// Creates a new record in `created` status.
    #[must_use]
    pub fn new(
        id: ContainerId,
        command: Vec<String>,
        rootfs: PathBuf,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            id,
            pid: 0,
            status: ContainerStatus::Created,
            command,
            rootfs,
            created: Utc::now(),
            limits,
        }
    }

    /// Returns whether the container is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Marks the record exited and clears the pid.
    pub fn mark_exited(&mut self) {
        self.status = ContainerStatus::Exited;
        self.pid = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_twelve_hex_chars() {
        let id = ContainerId::new();
        assert_eq!(id.as_str().len(), 12);
        assert!(id.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn ids_are_unique() {
        let a = ContainerId::new();
        let b = ContainerId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&ContainerStatus::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(
            serde_json::from_str::<ContainerStatus>("\"exited\"").unwrap(),
            ContainerStatus::Exited
        );
    }

    #[test]
    fn new_record_is_created_with_no_pid() {
        let record = ContainerRecord::new(
            ContainerId::new(),
            vec!["/bin/true".to_string()],
            PathBuf::from("/tmp/rootfs"),
            mydocker_cgroups::ResourceLimits::default(),
        );
        assert_eq!(record.status, ContainerStatus::Created);
        assert_eq!(record.pid, 0);
        assert!(!record.is_running());
    }

    #[test]
    fn record_round_trips_through_json() {
        let record = ContainerRecord::new(
            ContainerId::new(),
            vec!["/bin/sleep".to_string(), "10".to_string()],
            PathBuf::from("/tmp/rootfs"),
            mydocker_cgroups::ResourceLimits::default(),
        );
        let json = serde_json::to_string(&record).unwrap();
        let back: ContainerRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, record.id);
        assert_eq!(back.command, record.command);
        assert_eq!(back.status, ContainerStatus::Created);
    }
}

//! Per-replica runtime status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Generate a replica id of the form `{service}_{8 hex chars}`
pub fn new_replica_id(service: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", service, &suffix[..8])
}

/// Fields common to every replica kind
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaInfo {
    /// Replica id
    pub id: String,
    /// Owning service name
    pub service: String,
    /// Ports assigned to this replica
    pub ports: Vec<u16>,
    /// Telemetry readings keyed by `provider/counter`
    pub metrics: BTreeMap<String, f64>,
    /// When the replica was created
    pub started_at: DateTime<Utc>,
}

impl ReplicaInfo {
    /// Create replica info stamped with the current time
    pub fn new(id: impl Into<String>, service: impl Into<String>, ports: Vec<u16>) -> Self {
        Self {
            id: id.into(),
            service: service.into(),
            ports,
            metrics: BTreeMap::new(),
            started_at: Utc::now(),
        }
    }
}

/// A replica running as a native process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessStatus {
    /// Common replica fields
    #[serde(flatten)]
    pub info: ReplicaInfo,
    /// Process id once spawned
    pub pid: Option<u32>,
    /// Exit code once exited
    pub exit_code: Option<i32>,
}

/// A replica running as a container
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DockerStatus {
    /// Common replica fields
    #[serde(flatten)]
    pub info: ReplicaInfo,
    /// The `docker run` command line that created the container
    pub docker_command: String,
    /// Container id reported by `docker run -d`
    pub container_id: Option<String>,
    /// Pid of the `docker logs -f` follower
    pub log_follower_pid: Option<u32>,
    /// Exit code of the follower once it exited
    pub exit_code: Option<i32>,
}

/// A replica scheduled on a cluster
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClusterStatus {
    /// Common replica fields
    #[serde(flatten)]
    pub info: ReplicaInfo,
    /// Name of the workload object the replica belongs to
    pub workload: String,
}

/// Status of one replica, by execution target
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplicaStatus {
    /// Native process
    Process(ProcessStatus),
    /// Container
    Docker(DockerStatus),
    /// Cluster workload
    Cluster(ClusterStatus),
}

impl ReplicaStatus {
    /// Status of a process replica that has not been spawned yet
    pub fn process(info: ReplicaInfo) -> Self {
        Self::Process(ProcessStatus {
            info,
            pid: None,
            exit_code: None,
        })
    }

    /// Status of a freshly created container replica
    pub fn docker(info: ReplicaInfo, docker_command: String, container_id: Option<String>) -> Self {
        Self::Docker(DockerStatus {
            info,
            docker_command,
            container_id,
            log_follower_pid: None,
            exit_code: None,
        })
    }

    /// Status of a cluster replica
    pub fn cluster(info: ReplicaInfo, workload: impl Into<String>) -> Self {
        Self::Cluster(ClusterStatus {
            info,
            workload: workload.into(),
        })
    }

    /// Common replica fields
    pub fn info(&self) -> &ReplicaInfo {
        match self {
            Self::Process(s) => &s.info,
            Self::Docker(s) => &s.info,
            Self::Cluster(s) => &s.info,
        }
    }

    /// Mutable common replica fields
    pub fn info_mut(&mut self) -> &mut ReplicaInfo {
        match self {
            Self::Process(s) => &mut s.info,
            Self::Docker(s) => &mut s.info,
            Self::Cluster(s) => &mut s.info,
        }
    }

    /// Replica id
    pub fn id(&self) -> &str {
        &self.info().id
    }

    /// The local process backing this replica, if any
    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Process(s) => s.pid,
            Self::Docker(s) => s.log_follower_pid,
            Self::Cluster(_) => None,
        }
    }

    /// Record the process id backing this replica
    pub fn set_pid(&mut self, pid: u32) {
        match self {
            Self::Process(s) => s.pid = Some(pid),
            Self::Docker(s) => s.log_follower_pid = Some(pid),
            Self::Cluster(_) => {}
        }
    }

    /// Record the exit code of the process backing this replica
    pub fn set_exit_code(&mut self, code: Option<i32>) {
        match self {
            Self::Process(s) => s.exit_code = code,
            Self::Docker(s) => s.exit_code = code,
            Self::Cluster(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_id_format() {
        let id = new_replica_id("echo");
        let suffix = id.strip_prefix("echo_").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, new_replica_id("echo"));
    }

    #[test]
    fn test_serialized_with_kind_tag() {
        let mut status = ReplicaStatus::process(ReplicaInfo::new("echo_0000abcd", "echo", vec![9000]));
        status.set_pid(42);

        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["kind"], "process");
        assert_eq!(json["id"], "echo_0000abcd");
        assert_eq!(json["pid"], 42);

        let back: ReplicaStatus = serde_json::from_value(json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn test_pid_by_kind() {
        let info = ReplicaInfo::new("web_1", "web", vec![]);
        let mut docker = ReplicaStatus::docker(info.clone(), "docker run".into(), None);
        docker.set_pid(7);
        assert_eq!(docker.pid(), Some(7));

        let mut cluster = ReplicaStatus::cluster(info, "web");
        cluster.set_pid(7);
        assert_eq!(cluster.pid(), None);
    }
}

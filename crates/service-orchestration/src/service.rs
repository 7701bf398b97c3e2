//! Live service state shared between the application and execution targets.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::description::{RunKind, ServiceDescription};
use crate::executors::{TargetKind, TargetState};
use crate::logs::{LogBuffer, LogEntry};
use crate::replica::ReplicaStatus;

/// Number of log lines included in a [`ServiceSnapshot`]
const SNAPSHOT_LOG_LINES: usize = 100;

/// Lifecycle state of a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceState {
    /// Not running (initial, between restarts, or external)
    NotRunning,
    /// A replica is being launched
    Starting,
    /// A replica is running
    Running,
    /// The owning target stopped the service
    Stopped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::NotRunning => "not running",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Read-only copy of a service's state
#[derive(Debug, Clone, Serialize)]
pub struct ServiceSnapshot {
    /// Service name
    pub name: String,
    /// Lifecycle state
    pub state: ServiceState,
    /// Number of replica restarts
    pub restarts: u64,
    /// Current replicas
    pub replicas: Vec<ReplicaStatus>,
    /// Diagnostic key/value bag
    pub status: BTreeMap<String, String>,
    /// Declared port to allocated ports, one per replica slot
    pub port_map: BTreeMap<u16, Vec<u16>>,
    /// Most recent log lines
    pub logs: Vec<LogEntry>,
}

/// A declared service plus its live, concurrently mutated state.
///
/// Each piece of state sits behind its own lock; nothing here is locked
/// across services.
pub struct Service {
    description: ServiceDescription,
    state: RwLock<ServiceState>,
    replicas: RwLock<BTreeMap<String, ReplicaStatus>>,
    status: RwLock<BTreeMap<String, String>>,
    restarts: AtomicU64,
    port_map: RwLock<BTreeMap<u16, Vec<u16>>>,
    logs: LogBuffer,
    targets: Mutex<BTreeMap<TargetKind, TargetState>>,
}

impl Service {
    /// Create a service with an empty runtime state
    pub fn new(description: ServiceDescription, log_capacity: usize) -> Self {
        Self {
            description,
            state: RwLock::new(ServiceState::NotRunning),
            replicas: RwLock::new(BTreeMap::new()),
            status: RwLock::new(BTreeMap::new()),
            restarts: AtomicU64::new(0),
            port_map: RwLock::new(BTreeMap::new()),
            logs: LogBuffer::new(log_capacity),
            targets: Mutex::new(BTreeMap::new()),
        }
    }

    /// Service name
    pub fn name(&self) -> &str {
        &self.description.name
    }

    /// The declared description
    pub fn description(&self) -> &ServiceDescription {
        &self.description
    }

    /// How this service is run
    pub fn run_kind(&self) -> RunKind {
        self.description.run_kind()
    }

    /// Whether the service runs outside the orchestrator's control
    pub fn is_external(&self) -> bool {
        self.description.external
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    /// Set the lifecycle state
    pub fn set_state(&self, state: ServiceState) {
        *self.state.write() = state;
    }

    /// Copy of every current replica
    pub fn replicas(&self) -> Vec<ReplicaStatus> {
        self.replicas.read().values().cloned().collect()
    }

    /// Copy of a single replica
    pub fn replica(&self, id: &str) -> Option<ReplicaStatus> {
        self.replicas.read().get(id).cloned()
    }

    /// Number of current replicas
    pub fn replica_count(&self) -> usize {
        self.replicas.read().len()
    }

    /// Insert or replace a replica
    pub fn insert_replica(&self, replica: ReplicaStatus) {
        self.replicas
            .write()
            .insert(replica.id().to_string(), replica);
    }

    /// Mutate a replica in place. Returns false if the replica is unknown.
    pub fn update_replica(&self, id: &str, update: impl FnOnce(&mut ReplicaStatus)) -> bool {
        match self.replicas.write().get_mut(id) {
            Some(replica) => {
                update(replica);
                true
            }
            None => false,
        }
    }

    /// Remove a replica
    pub fn remove_replica(&self, id: &str) -> Option<ReplicaStatus> {
        self.replicas.write().remove(id)
    }

    /// Remove every replica
    pub fn clear_replicas(&self) {
        self.replicas.write().clear();
    }

    /// Copy of the diagnostic status bag
    pub fn status(&self) -> BTreeMap<String, String> {
        self.status.read().clone()
    }

    /// Set a diagnostic status entry
    pub fn set_status(&self, key: impl Into<String>, value: impl Into<String>) {
        self.status.write().insert(key.into(), value.into());
    }

    /// Number of replica restarts
    pub fn restarts(&self) -> u64 {
        self.restarts.load(Ordering::SeqCst)
    }

    /// Count one restart and mirror the counter into the status bag
    pub fn record_restart(&self) -> u64 {
        let restarts = self.restarts.fetch_add(1, Ordering::SeqCst) + 1;
        self.set_status("restarts", restarts.to_string());
        restarts
    }

    /// Copy of the port map
    pub fn port_map(&self) -> BTreeMap<u16, Vec<u16>> {
        self.port_map.read().clone()
    }

    /// Replace the port map
    pub fn set_port_map(&self, port_map: BTreeMap<u16, Vec<u16>>) {
        *self.port_map.write() = port_map;
    }

    /// The service log
    pub fn logs(&self) -> &LogBuffer {
        &self.logs
    }

    /// Merge telemetry readings into a replica's metrics.
    ///
    /// Readings are keyed `provider/counter`. Unknown replicas are ignored.
    pub fn merge_metrics<I, K>(&self, replica_id: &str, readings: I)
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        self.update_replica(replica_id, |replica| {
            let metrics = &mut replica.info_mut().metrics;
            for (key, value) in readings {
                metrics.insert(key.into(), value);
            }
        });
    }

    /// Read-only copy of the whole service state
    pub fn snapshot(&self) -> ServiceSnapshot {
        self.snapshot_with_logs(SNAPSHOT_LOG_LINES)
    }

    /// Read-only copy including the last `log_lines` log lines
    pub fn snapshot_with_logs(&self, log_lines: usize) -> ServiceSnapshot {
        ServiceSnapshot {
            name: self.name().to_string(),
            state: self.state(),
            restarts: self.restarts(),
            replicas: self.replicas(),
            status: self.status(),
            port_map: self.port_map(),
            logs: self.logs.tail(log_lines),
        }
    }

    /// Store a target's private state. Returns the state back if the slot is taken.
    pub(crate) fn attach_target(
        &self,
        kind: TargetKind,
        state: TargetState,
    ) -> std::result::Result<(), TargetState> {
        let mut targets = self.targets.lock();
        if targets.contains_key(&kind) {
            return Err(state);
        }
        targets.insert(kind, state);
        Ok(())
    }

    /// Take a target's private state out of the service
    pub(crate) fn detach_target(&self, kind: TargetKind) -> Option<TargetState> {
        self.targets.lock().remove(&kind)
    }

    /// Take a target's private state out only when `stale` holds for it
    pub(crate) fn detach_target_if(
        &self,
        kind: TargetKind,
        stale: impl FnOnce(&TargetState) -> bool,
    ) -> Option<TargetState> {
        let mut targets = self.targets.lock();
        if targets.get(&kind).is_some_and(stale) {
            targets.remove(&kind)
        } else {
            None
        }
    }

    /// Store a target's private state, returning whatever it replaced
    pub(crate) fn replace_target(
        &self,
        kind: TargetKind,
        state: TargetState,
    ) -> Option<TargetState> {
        self.targets.lock().insert(kind, state)
    }

    /// Whether a target currently holds state for this service
    pub fn is_attached(&self, kind: TargetKind) -> bool {
        self.targets.lock().contains_key(&kind)
    }
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("replicas", &self.replica_count())
            .field("restarts", &self.restarts())
            .finish()
    }
}

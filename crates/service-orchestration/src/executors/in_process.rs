//! In-process target: services hosted inside the orchestrator.

use async_trait::async_trait;
use command_executor::CancellationToken;
use futures_lite::future;
use indexmap::IndexMap;
use smol::Task;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{ExecutionTarget, TargetKind, TargetState};
use crate::application::Application;
use crate::config::EngineConfig;
use crate::description::RunKind;
use crate::discovery::{environment_map, populate_environment};
use crate::logs::LogEntry;
use crate::replica::{ReplicaInfo, ReplicaStatus, new_replica_id};
use crate::service::{Service, ServiceState};
use crate::{Error, Result};

/// A service that runs as a task inside the orchestrator process
#[async_trait]
pub trait HostedService: Send + Sync {
    /// Run until finished or until `context.cancellation` fires
    async fn run(&self, context: HostContext) -> Result<()>;
}

/// Everything a hosted service receives when started
pub struct HostContext {
    /// Name of the service being hosted
    pub service_name: String,
    /// Declared configuration, discovery variables and `URLS`
    pub configuration: IndexMap<String, String>,
    /// Writes into the service log
    pub logger: HostLogger,
    /// Fires when the service should shut down
    pub cancellation: CancellationToken,
}

/// Log sink handed to hosted services
#[derive(Clone)]
pub struct HostLogger {
    service: Arc<Service>,
    replica: String,
}

impl HostLogger {
    /// Append a line to the service log
    pub fn log(&self, line: impl Into<String>) {
        self.service.logs().append(LogEntry::system(Some(&self.replica), line));
    }
}

impl fmt::Debug for HostLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostLogger")
            .field("service", &self.service.name())
            .field("replica", &self.replica)
            .finish()
    }
}

/// Entry points available to the in-process target, by name
#[derive(Default, Clone)]
pub struct HostRegistry {
    hosts: BTreeMap<String, Arc<dyn HostedService>>,
}

impl HostRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entry point
    pub fn register(&mut self, entry_point: impl Into<String>, host: impl HostedService + 'static) {
        self.hosts.insert(entry_point.into(), Arc::new(host));
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, entry_point: impl Into<String>, host: impl HostedService + 'static) -> Self {
        self.register(entry_point, host);
        self
    }

    /// Look up an entry point
    pub fn get(&self, entry_point: &str) -> Option<Arc<dyn HostedService>> {
        self.hosts.get(entry_point).cloned()
    }

    /// Registered entry point names
    pub fn entry_points(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }
}

/// A running hosted service
pub struct HostHandle {
    token: CancellationToken,
    task: Task<()>,
}

impl HostHandle {
    fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel cooperatively, then drop the task after `grace`
    async fn stop(self, grace: Duration) -> bool {
        self.token.cancel();
        let mut task = self.task;
        let finished = future::or(
            async {
                (&mut task).await;
                true
            },
            async {
                smol::Timer::after(grace).await;
                false
            },
        )
        .await;
        if !finished {
            task.cancel().await;
        }
        finished
    }
}

/// Hosts registered entry points as tasks on the smol executor
pub struct InProcessTarget {
    config: Arc<EngineConfig>,
    hosts: HostRegistry,
}

impl InProcessTarget {
    /// Create an in-process target over a host registry
    pub fn new(config: Arc<EngineConfig>, hosts: HostRegistry) -> Self {
        Self { config, hosts }
    }

    fn host_for(&self, service: &Service) -> Result<Arc<dyn HostedService>> {
        let entry_point = service.description().entry_point.as_deref().unwrap_or_default();
        self.hosts.get(entry_point).ok_or_else(|| {
            Error::configuration(format!(
                "service '{}' names unknown entry point '{}'",
                service.name(),
                entry_point
            ))
        })
    }
}

#[async_trait]
impl ExecutionTarget for InProcessTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::InProcess
    }

    fn owns(&self, service: &Service) -> bool {
        service.run_kind() == RunKind::InProcess
    }

    fn check(&self, _app: &Application, service: &Service) -> Result<()> {
        self.host_for(service).map(|_| ())
    }

    async fn start_service(&self, app: &Application, service: &Arc<Service>) -> Result<()> {
        let finished = |state: &TargetState| {
            matches!(state, TargetState::InProcess(handle) if handle.is_finished())
        };
        if service.detach_target_if(TargetKind::InProcess, finished).is_some() {
            debug!(service = %service.name(), "Relaunching finished in-process service");
        }
        if service.is_attached(TargetKind::InProcess) {
            return Ok(());
        }

        let entry_point = service.description().entry_point.as_deref().unwrap_or_default();
        let host = self.host_for(service)?;

        let mut configuration = environment_map(populate_environment(app, service));
        if let Some(address) = service
            .description()
            .default_binding()
            .and_then(|b| b.resolved_address(None))
        {
            configuration.insert(self.config.listen_address_variable.clone(), address);
        }

        let replica_id = new_replica_id(service.name());
        let ports = service
            .description()
            .bindings
            .iter()
            .filter_map(|b| b.published_port())
            .collect();
        let mut replica = ReplicaStatus::process(ReplicaInfo::new(&replica_id, service.name(), ports));
        replica.set_pid(std::process::id());
        service.insert_replica(replica);
        service.set_state(ServiceState::Running);

        let token = CancellationToken::new();
        let context = HostContext {
            service_name: service.name().to_string(),
            configuration,
            logger: HostLogger {
                service: service.clone(),
                replica: replica_id.clone(),
            },
            cancellation: token.clone(),
        };

        info!(service = %service.name(), entry_point, "Starting in-process service");
        let hosted = service.clone();
        let task = smol::spawn(async move {
            match host.run(context).await {
                Ok(()) => {
                    info!(service = %hosted.name(), "In-process service finished");
                    hosted.logs().system(Some(&replica_id), "finished");
                }
                Err(e) => {
                    warn!(service = %hosted.name(), "In-process service failed: {}", e);
                    hosted.logs().system(Some(&replica_id), format!("failed: {e}"));
                }
            }
            hosted.remove_replica(&replica_id);
            hosted.set_state(ServiceState::Stopped);
        });

        service
            .attach_target(TargetKind::InProcess, TargetState::InProcess(HostHandle { token, task }))
            .map_err(|_| Error::configuration(format!("service '{}' started twice", service.name())))
    }

    async fn stop_service(&self, service: &Arc<Service>) -> Result<()> {
        if let Some(TargetState::InProcess(handle)) = service.detach_target(TargetKind::InProcess) {
            if !handle.stop(self.config.grace_period).await {
                warn!(service = %service.name(), "In-process service ignored cancellation, aborted");
                service.logs().system(None, "aborted after grace period");
            } else {
                debug!(service = %service.name(), "In-process service stopped");
            }
        }
        service.clear_replicas();
        service.set_state(ServiceState::Stopped);
        Ok(())
    }
}

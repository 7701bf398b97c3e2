//! Execution targets.
//!
//! Each target knows how to start and stop the services routed to it. The
//! [`AggregateProcessor`] composes targets and routes every service to exactly
//! one of them.

pub mod aggregate;
pub mod cluster;
pub mod docker;
pub mod in_process;
pub mod process;
mod supervisor;

pub use aggregate::{AggregateProcessor, ApplicationReport};
pub use cluster::{
    ClusterClient, ClusterError, ClusterTarget, DeploymentManifest, KubectlClient,
    NetworkServiceManifest, ServicePort,
};
pub use docker::DockerTarget;
pub use in_process::{HostContext, HostLogger, HostRegistry, HostedService, InProcessTarget};
pub use process::ProcessTarget;

use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

use crate::application::Application;
use crate::service::Service;
use crate::{Error, Result};

use self::cluster::ClusterRecord;
use self::in_process::HostHandle;
use self::supervisor::Supervisor;

/// Kinds of execution target
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    /// Hosted inside the orchestrator process
    InProcess,
    /// Docker containers
    Docker,
    /// Supervised native processes
    Process,
    /// Cluster scheduler
    Cluster,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetKind::InProcess => "in-process",
            TargetKind::Docker => "docker",
            TargetKind::Process => "process",
            TargetKind::Cluster => "cluster",
        };
        f.write_str(s)
    }
}

/// Private per-target state a target keeps on a service while running it
pub enum TargetState {
    /// The supervisor thread of a native process
    Process(Supervisor),
    /// One supervisor thread per container replica
    Docker(Vec<Supervisor>),
    /// The task hosting an in-process service
    InProcess(HostHandle),
    /// The cluster objects created for the service
    Cluster(ClusterRecord),
}

impl fmt::Debug for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Process(_) => f.write_str("Process"),
            TargetState::Docker(replicas) => write!(f, "Docker({} replicas)", replicas.len()),
            TargetState::InProcess(_) => f.write_str("InProcess"),
            TargetState::Cluster(record) => write!(f, "Cluster({record:?})"),
        }
    }
}

/// Per-service outcome of a start or stop fan-out
#[derive(Debug, Default)]
pub struct TargetReport {
    /// Services that succeeded
    pub succeeded: Vec<String>,
    /// Services that failed, with the reason
    pub failed: Vec<(String, Error)>,
}

impl TargetReport {
    /// Collect `(name, outcome)` pairs into a report
    pub fn from_outcomes(outcomes: impl IntoIterator<Item = (String, Result<()>)>) -> Self {
        let mut report = Self::default();
        for (name, outcome) in outcomes {
            match outcome {
                Ok(()) => report.succeeded.push(name),
                Err(e) => report.failed.push((name, e)),
            }
        }
        report
    }

    /// Whether every service succeeded
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// Append another report
    pub fn merge(&mut self, other: TargetReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }
}

/// A strategy for running services
#[async_trait]
pub trait ExecutionTarget: Send + Sync {
    /// Which kind of target this is
    fn kind(&self) -> TargetKind;

    /// Whether this target can run the service
    fn owns(&self, service: &Service) -> bool;

    /// Reject a service this target owns but cannot start, before anything
    /// is launched
    fn check(&self, _app: &Application, _service: &Service) -> Result<()> {
        Ok(())
    }

    /// Start one service
    async fn start_service(&self, app: &Application, service: &Arc<Service>) -> Result<()>;

    /// Stop one service. Stopping a service that is not running succeeds.
    async fn stop_service(&self, service: &Arc<Service>) -> Result<()>;

    /// Start several services concurrently
    async fn start_services(&self, app: &Application, services: &[Arc<Service>]) -> TargetReport {
        let outcomes = join_all(services.iter().map(|service| async move {
            (
                service.name().to_string(),
                self.start_service(app, service).await,
            )
        }))
        .await;
        TargetReport::from_outcomes(outcomes)
    }

    /// Stop several services concurrently
    async fn stop_services(&self, services: &[Arc<Service>]) -> TargetReport {
        let outcomes = join_all(services.iter().map(|service| async move {
            (service.name().to_string(), self.stop_service(service).await)
        }))
        .await;
        TargetReport::from_outcomes(outcomes)
    }

    /// Start every owned, non-external service of the application
    async fn start(&self, app: &Application) -> TargetReport {
        let services = owned_services(self, app);
        self.start_services(app, &services).await
    }

    /// Stop every owned, non-external service of the application
    async fn stop(&self, app: &Application) -> TargetReport {
        let services = owned_services(self, app);
        self.stop_services(&services).await
    }
}

fn owned_services<T: ExecutionTarget + ?Sized>(target: &T, app: &Application) -> Vec<Arc<Service>> {
    app.services()
        .filter(|service| !service.is_external() && target.owns(service))
        .cloned()
        .collect()
}

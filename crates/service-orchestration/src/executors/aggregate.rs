//! Composes execution targets and routes services to them.

use futures::future::join_all;
use std::sync::Arc;
use tracing::{info, warn};

use super::cluster::{ClusterClient, ClusterTarget};
use super::docker::DockerTarget;
use super::in_process::{HostRegistry, InProcessTarget};
use super::process::ProcessTarget;
use super::{ExecutionTarget, TargetKind, TargetReport};
use crate::application::Application;
use crate::config::EngineConfig;
use crate::service::Service;
use crate::{Error, Result};

/// Outcome of starting or stopping a whole application
#[derive(Debug, Default)]
pub struct ApplicationReport {
    /// Per-target outcomes, in target order
    pub targets: Vec<(TargetKind, TargetReport)>,
    /// Services rejected before launch. Nothing was started when any are present.
    pub rejected: Vec<(String, Error)>,
    /// External services, which are never launched
    pub external: Vec<String>,
}

impl ApplicationReport {
    /// Whether nothing was rejected and every routed service succeeded
    pub fn is_success(&self) -> bool {
        self.rejected.is_empty() && self.targets.iter().all(|(_, r)| r.is_success())
    }

    /// Names of services that succeeded
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.targets
            .iter()
            .flat_map(|(_, r)| r.succeeded.iter().map(String::as_str))
    }

    /// Every failure, rejected or failed to start
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.targets
            .iter()
            .flat_map(|(_, r)| r.failed.iter())
            .chain(self.rejected.iter())
            .map(|(name, e)| (name.as_str(), e))
    }
}

/// Runs an application across several execution targets
pub struct AggregateProcessor {
    targets: Vec<Arc<dyn ExecutionTarget>>,
}

impl AggregateProcessor {
    /// Compose targets. Earlier targets win when several own a service.
    pub fn new(targets: Vec<Arc<dyn ExecutionTarget>>) -> Self {
        Self { targets }
    }

    /// In-process, docker and process targets for running on this machine
    pub fn local(config: Arc<EngineConfig>, hosts: HostRegistry) -> Self {
        let targets: Vec<Arc<dyn ExecutionTarget>> = vec![
            Arc::new(InProcessTarget::new(config.clone(), hosts)),
            Arc::new(DockerTarget::new(config.clone())),
            Arc::new(ProcessTarget::new(config)),
        ];
        Self::new(targets)
    }

    /// A single cluster target
    pub fn cluster(config: Arc<EngineConfig>, client: Arc<dyn ClusterClient>) -> Self {
        let target: Arc<dyn ExecutionTarget> = Arc::new(ClusterTarget::new(config, client));
        Self::new(vec![target])
    }

    /// Kinds of the composed targets, in routing order
    pub fn target_kinds(&self) -> Vec<TargetKind> {
        self.targets.iter().map(|t| t.kind()).collect()
    }

    /// Assign every non-external service to the first target that owns it
    fn route(&self, app: &Application) -> Routing {
        let mut routing = Routing {
            per_target: vec![Vec::new(); self.targets.len()],
            unrouted: Vec::new(),
            external: Vec::new(),
        };

        for service in app.services() {
            if service.is_external() {
                routing.external.push(service.name().to_string());
                continue;
            }
            match self.targets.iter().position(|t| t.owns(service)) {
                Some(index) => routing.per_target[index].push(service.clone()),
                None => routing.unrouted.push(service.clone()),
            }
        }

        routing
    }

    /// The kind of target a service is routed to
    pub fn target_for(&self, service: &Service) -> Option<TargetKind> {
        if service.is_external() {
            return None;
        }
        self.targets
            .iter()
            .find(|t| t.owns(service))
            .map(|t| t.kind())
    }

    /// Unroutable services and failed target checks, found without launching
    fn preflight(&self, app: &Application, routing: &Routing) -> Vec<(String, Error)> {
        let mut rejected: Vec<(String, Error)> = routing
            .unrouted
            .iter()
            .map(|service| {
                (
                    service.name().to_string(),
                    Error::configuration(format!(
                        "no execution target can run service '{}'",
                        service.name()
                    )),
                )
            })
            .collect();

        for (target, services) in self.targets.iter().zip(&routing.per_target) {
            for service in services {
                if let Err(e) = target.check(app, service) {
                    rejected.push((service.name().to_string(), e));
                }
            }
        }
        rejected
    }

    /// Check that every service can be routed and started, launching nothing
    pub fn validate(&self, app: &Application) -> Result<()> {
        let rejected = self.preflight(app, &self.route(app));
        if rejected.is_empty() {
            return Ok(());
        }
        let reasons: Vec<String> = rejected
            .into_iter()
            .map(|(_, e)| match e {
                Error::Configuration(reason) => reason,
                other => other.to_string(),
            })
            .collect();
        Err(Error::configuration(reasons.join("; ")))
    }

    /// Start every routed service; targets run concurrently.
    ///
    /// Nothing is launched when any service fails the pre-launch checks.
    pub async fn start(&self, app: &Application) -> ApplicationReport {
        let routing = self.route(app);
        let rejected = self.preflight(app, &routing);
        if !rejected.is_empty() {
            for (name, e) in &rejected {
                warn!(service = %name, "Service rejected: {}", e);
            }
            warn!(rejected = rejected.len(), "Application not started");
            return ApplicationReport {
                targets: Vec::new(),
                rejected,
                external: routing.external,
            };
        }

        info!(
            services = app.len(),
            external = routing.external.len(),
            "Starting application"
        );

        let reports = join_all(
            self.targets
                .iter()
                .zip(&routing.per_target)
                .map(|(target, services)| async move {
                    (target.kind(), target.start_services(app, services).await)
                }),
        )
        .await;

        for (kind, report) in &reports {
            for (name, e) in &report.failed {
                warn!(service = %name, target = %kind, "Service failed to start: {}", e);
            }
        }

        ApplicationReport {
            targets: reports,
            rejected: Vec::new(),
            external: routing.external,
        }
    }

    /// Stop every routed service.
    ///
    /// Other targets stop concurrently first; in-process services stop last,
    /// one at a time in name order.
    pub async fn stop(&self, app: &Application) -> ApplicationReport {
        let routing = self.route(app);
        info!("Stopping application");

        let (hosted, others): (Vec<_>, Vec<_>) = self
            .targets
            .iter()
            .zip(routing.per_target)
            .partition(|(target, _)| target.kind() == TargetKind::InProcess);

        let mut reports = join_all(others.iter().map(|(target, services)| async move {
            (target.kind(), target.stop_services(services).await)
        }))
        .await;

        for (target, mut services) in hosted {
            services.sort_by(|a, b| a.name().cmp(b.name()));
            let mut report = TargetReport::default();
            for service in &services {
                report.merge(target.stop_services(std::slice::from_ref(service)).await);
            }
            reports.push((target.kind(), report));
        }

        ApplicationReport {
            targets: reports,
            rejected: Vec::new(),
            external: routing.external,
        }
    }
}

struct Routing {
    per_target: Vec<Vec<Arc<Service>>>,
    unrouted: Vec<Arc<Service>>,
    external: Vec<String>,
}

//! Cluster target: reconcile services as cluster workloads.
//!
//! The target never speaks a cluster wire protocol itself. It drives an
//! injected [`ClusterClient`]; [`KubectlClient`] is the implementation that
//! shells out to `kubectl`.

use async_trait::async_trait;
use command_executor::{CancellationToken, Command, RunOptions, run};
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::{ExecutionTarget, TargetKind, TargetState};
use crate::application::Application;
use crate::config::EngineConfig;
use crate::discovery::{listen_environment, populate_environment};
use crate::replica::{ReplicaInfo, ReplicaStatus};
use crate::service::{Service, ServiceState};
use crate::{Error, Result};

/// Errors reported by a [`ClusterClient`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusterError {
    /// The object does not exist
    #[error("{kind} '{name}' not found")]
    NotFound {
        /// Object kind
        kind: String,
        /// Object name
        name: String,
    },

    /// Any other API failure
    #[error("{0}")]
    Api(String),
}

impl ClusterError {
    /// Create an API error
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

/// Create and delete the two objects a service maps to
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Delete a network service object
    async fn delete_service(&self, name: &str) -> std::result::Result<(), ClusterError>;

    /// Create a network service object
    async fn create_service(
        &self,
        manifest: &NetworkServiceManifest,
    ) -> std::result::Result<(), ClusterError>;

    /// Delete a workload
    async fn delete_deployment(&self, name: &str) -> std::result::Result<(), ClusterError>;

    /// Create a workload
    async fn create_deployment(
        &self,
        manifest: &DeploymentManifest,
    ) -> std::result::Result<(), ClusterError>;
}

/// One exposed port of a network service object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServicePort {
    /// Port name
    pub name: String,
    /// Port exposed by the service object
    pub port: u16,
    /// Port the pods listen on
    pub target_port: u16,
}

/// A network endpoint object selecting the pods of one workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkServiceManifest {
    /// Object name
    pub name: String,
    /// Pod selector
    pub selector: BTreeMap<String, String>,
    /// Exposed ports
    pub ports: Vec<ServicePort>,
}

impl NetworkServiceManifest {
    /// Kubernetes `v1/Service` representation
    pub fn to_json(&self) -> Value {
        let ports: Vec<Value> = self
            .ports
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "port": p.port,
                    "targetPort": p.target_port,
                    "protocol": "TCP",
                })
            })
            .collect();
        json!({
            "apiVersion": "v1",
            "kind": "Service",
            "metadata": { "name": self.name, "labels": self.selector },
            "spec": { "selector": self.selector, "ports": ports },
        })
    }
}

/// A replicated workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentManifest {
    /// Object name
    pub name: String,
    /// Desired replica count
    pub replicas: usize,
    /// Container image
    pub image: String,
    /// Pod labels, also used as the selector
    pub labels: BTreeMap<String, String>,
    /// Container arguments
    pub args: Vec<String>,
    /// Container environment, in order
    pub env: Vec<(String, String)>,
    /// Ports the container listens on
    pub container_ports: Vec<u16>,
}

impl DeploymentManifest {
    /// Kubernetes `apps/v1/Deployment` representation
    pub fn to_json(&self) -> Value {
        let env: Vec<Value> = self
            .env
            .iter()
            .map(|(name, value)| json!({ "name": name, "value": value }))
            .collect();
        let ports: Vec<Value> = self
            .container_ports
            .iter()
            .map(|port| json!({ "containerPort": port }))
            .collect();
        let mut container = json!({
            "name": self.name,
            "image": self.image,
            "env": env,
            "ports": ports,
        });
        if !self.args.is_empty() {
            container["args"] = json!(self.args);
        }
        json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": { "name": self.name, "labels": self.labels },
            "spec": {
                "replicas": self.replicas,
                "selector": { "matchLabels": self.labels },
                "template": {
                    "metadata": { "labels": self.labels },
                    "spec": { "containers": [container] },
                },
            },
        })
    }
}

/// Names of the objects created for a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterRecord {
    /// Network service object, when the service has bindings
    pub service_object: Option<String>,
    /// Workload name
    pub deployment: String,
}

/// Reconciles each service into a network service object plus a workload
pub struct ClusterTarget {
    config: Arc<EngineConfig>,
    client: Arc<dyn ClusterClient>,
}

impl ClusterTarget {
    /// Create a cluster target over a client
    pub fn new(config: Arc<EngineConfig>, client: Arc<dyn ClusterClient>) -> Self {
        Self { config, client }
    }

    /// Manifests for a service: the optional network object and the workload
    pub fn manifests(
        &self,
        app: &Application,
        service: &Service,
    ) -> (Option<NetworkServiceManifest>, DeploymentManifest) {
        let description = service.description();
        let name = service.name().to_lowercase();
        let labels = BTreeMap::from([("app".to_string(), name.clone())]);

        let ports: Vec<ServicePort> = description
            .bindings
            .iter()
            .filter_map(|binding| {
                let port = binding.published_port()?;
                let port_name = sanitize_port_name(binding.name.as_deref().unwrap_or("default"));
                Some(ServicePort {
                    name: port_name,
                    port,
                    target_port: binding.target_port().unwrap_or(port),
                })
            })
            .collect();

        let network = (!description.bindings.is_empty()).then(|| NetworkServiceManifest {
            name: name.clone(),
            selector: labels.clone(),
            ports: ports.clone(),
        });

        let mut env = populate_environment(app, service);
        env.extend(listen_environment(service, &self.config, true));

        let deployment = DeploymentManifest {
            name,
            replicas: description.replicas,
            image: description
                .image
                .clone()
                .unwrap_or_else(|| self.config.cluster_placeholder_image.clone()),
            labels,
            args: description.arguments(),
            env,
            container_ports: ports.iter().map(|p| p.target_port).collect(),
        };

        (network, deployment)
    }

    async fn reconcile(&self, app: &Application, service: &Service) -> Result<ClusterRecord> {
        let (network, deployment) = self.manifests(app, service);

        let service_object = match network {
            Some(network) => {
                tolerate_not_found(self.client.delete_service(&network.name).await)?;
                self.client.create_service(&network).await?;
                Some(network.name)
            }
            None => None,
        };

        tolerate_not_found(self.client.delete_deployment(&deployment.name).await)?;
        self.client.create_deployment(&deployment).await?;

        Ok(ClusterRecord {
            service_object,
            deployment: deployment.name,
        })
    }
}

/// Port names are lowercase with `-` separators
fn sanitize_port_name(name: &str) -> String {
    name.to_lowercase().replace(['_', '.'], "-")
}

fn tolerate_not_found(
    result: std::result::Result<(), ClusterError>,
) -> std::result::Result<(), ClusterError> {
    match result {
        Err(ClusterError::NotFound { .. }) => Ok(()),
        other => other,
    }
}

#[async_trait]
impl ExecutionTarget for ClusterTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Cluster
    }

    fn owns(&self, service: &Service) -> bool {
        !service.is_external()
    }

    async fn start_service(&self, app: &Application, service: &Arc<Service>) -> Result<()> {
        service.set_state(ServiceState::Starting);
        let record = match self.reconcile(app, service).await {
            Ok(record) => record,
            Err(e) => {
                warn!(service = %service.name(), "Cluster reconcile failed: {}", e);
                service.logs().system(None, format!("cluster reconcile failed: {e}"));
                service.set_state(ServiceState::NotRunning);
                return Err(e);
            }
        };

        service.clear_replicas();
        for index in 0..service.description().replicas {
            let id = format!("{}-{}", record.deployment, index);
            service.insert_replica(ReplicaStatus::cluster(
                ReplicaInfo::new(id, service.name(), Vec::new()),
                &record.deployment,
            ));
        }
        info!(service = %service.name(), deployment = %record.deployment, "Cluster workload created");

        let previous = service.replace_target(TargetKind::Cluster, TargetState::Cluster(record));
        if let Some(previous) = previous {
            debug!(service = %service.name(), ?previous, "Replaced earlier cluster record");
        }
        service.set_state(ServiceState::Running);
        Ok(())
    }

    async fn stop_service(&self, service: &Arc<Service>) -> Result<()> {
        let record = match service.detach_target(TargetKind::Cluster) {
            Some(TargetState::Cluster(record)) => record,
            _ => {
                let name = service.name().to_lowercase();
                ClusterRecord {
                    service_object: (!service.description().bindings.is_empty())
                        .then(|| name.clone()),
                    deployment: name,
                }
            }
        };

        if let Some(name) = &record.service_object {
            if let Err(e) = tolerate_not_found(self.client.delete_service(name).await) {
                service
                    .logs()
                    .system(None, format!("failed to delete service object '{name}': {e}"));
            }
        }
        if let Err(e) = tolerate_not_found(self.client.delete_deployment(&record.deployment).await) {
            service.logs().system(
                None,
                format!("failed to delete workload '{}': {e}", record.deployment),
            );
        }

        debug!(service = %service.name(), "Cluster objects removed");
        service.clear_replicas();
        service.set_state(ServiceState::Stopped);
        Ok(())
    }
}

/// [`ClusterClient`] that drives the `kubectl` CLI
pub struct KubectlClient {
    binary: String,
    namespace: Option<String>,
    options: RunOptions,
}

impl KubectlClient {
    /// Create a client from engine settings
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            binary: config.kubectl_binary.clone(),
            namespace: config.cluster_namespace.clone(),
            options: config.cli_run_options(),
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.binary);
        if let Some(namespace) = &self.namespace {
            cmd.args(["--namespace", namespace.as_str()]);
        }
        cmd
    }

    async fn delete(&self, kind: &str, name: &str) -> std::result::Result<(), ClusterError> {
        let mut cmd = self.command();
        cmd.args(["delete", kind, name]);

        let result = run(&cmd, &self.options, |_| {}, |_| {}, &CancellationToken::new())
            .await
            .map_err(|e| ClusterError::api(e.to_string()))?;
        if result.success() {
            Ok(())
        } else if result.stderr.contains("NotFound") || result.stderr.contains("not found") {
            Err(ClusterError::not_found(kind, name))
        } else {
            Err(ClusterError::api(result.stderr.trim()))
        }
    }

    async fn create(&self, manifest: Value) -> std::result::Result<(), ClusterError> {
        let mut file = tempfile::Builder::new()
            .prefix("tether-")
            .suffix(".json")
            .tempfile()
            .map_err(|e| ClusterError::api(e.to_string()))?;
        serde_json::to_writer_pretty(&mut file, &manifest)
            .map_err(|e| ClusterError::api(e.to_string()))?;
        file.flush().map_err(|e| ClusterError::api(e.to_string()))?;

        let mut cmd = self.command();
        cmd.arg("create").arg("-f").arg(file.path());

        let result = run(&cmd, &self.options, |_| {}, |_| {}, &CancellationToken::new())
            .await
            .map_err(|e| ClusterError::api(e.to_string()))?;
        if result.success() {
            Ok(())
        } else {
            Err(ClusterError::api(result.stderr.trim()))
        }
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn delete_service(&self, name: &str) -> std::result::Result<(), ClusterError> {
        self.delete("service", name).await
    }

    async fn create_service(
        &self,
        manifest: &NetworkServiceManifest,
    ) -> std::result::Result<(), ClusterError> {
        self.create(manifest.to_json()).await
    }

    async fn delete_deployment(&self, name: &str) -> std::result::Result<(), ClusterError> {
        self.delete("deployment", name).await
    }

    async fn create_deployment(
        &self,
        manifest: &DeploymentManifest,
    ) -> std::result::Result<(), ClusterError> {
        self.create(manifest.to_json()).await
    }
}

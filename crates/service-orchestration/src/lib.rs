//! # Service orchestration
//!
//! The execution engine behind `tether`: a service/replica model, the
//! service-discovery environment injector, and interchangeable execution
//! targets that launch, supervise, restart and tear down replicas.
//!
//! ## Example
//!
//! ```rust,no_run
//! use service_orchestration::{
//!     AggregateProcessor, Application, Binding, EngineConfig, HostRegistry, ServiceDescription,
//! };
//! use std::sync::Arc;
//!
//! # fn example() -> service_orchestration::Result<()> {
//! let app = Application::new(
//!     ".",
//!     vec![
//!         ServiceDescription::executable("echo", "./echo-server")
//!             .with_binding(Binding::new().with_port(9000)),
//!         ServiceDescription::external("cache")
//!             .with_binding(Binding::new().with_address("localhost:6379")),
//!     ],
//! )?;
//!
//! let processor = AggregateProcessor::local(Arc::new(EngineConfig::default()), HostRegistry::new());
//! smol::block_on(async {
//!     let report = processor.start(&app).await;
//!     assert!(report.is_success());
//!     processor.stop(&app).await;
//! });
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod application;
mod config;
mod description;
mod discovery;
mod executors;
mod logs;
mod manifest;
mod ports;
mod replica;
mod service;

pub use application::Application;
pub use config::EngineConfig;
pub use description::{Binding, RunKind, ServiceDescription};
pub use discovery::{
    discovery_key, environment_map, listen_environment, populate_environment,
    populate_environment_with_host,
};
pub use executors::{
    AggregateProcessor, ApplicationReport, ClusterClient, ClusterError, ClusterTarget,
    DeploymentManifest, DockerTarget, ExecutionTarget, HostContext, HostLogger, HostRegistry,
    HostedService, InProcessTarget, KubectlClient, NetworkServiceManifest, ProcessTarget,
    ServicePort, TargetKind, TargetReport, TargetState,
};
pub use logs::{LogBuffer, LogEntry, LogKind, LogSubscription};
pub use manifest::Manifest;
pub use ports::allocate_free_port;
pub use replica::{
    ClusterStatus, DockerStatus, ProcessStatus, ReplicaInfo, ReplicaStatus, new_replica_id,
};
pub use service::{Service, ServiceSnapshot, ServiceState};

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Launching or running a child process failed
    #[error("Command execution error: {0}")]
    Execution(#[from] command_executor::Error),

    /// The cluster scheduler rejected a request
    #[error("Cluster API error: {0}")]
    ClusterApi(#[from] ClusterError),

    /// Invalid application or engine configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Service not found
    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A manifest or cluster object could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Whether the underlying process could not be spawned
    pub fn is_launch_failure(&self) -> bool {
        matches!(self, Error::Execution(e) if e.is_launch_failure())
    }

    /// Whether the underlying process ran but exited unsuccessfully
    pub fn is_process_failure(&self) -> bool {
        matches!(
            self,
            Error::Execution(command_executor::Error::ProcessFailed { .. })
        )
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(e: serde_yaml::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Result type for orchestration operations
pub type Result<T> = std::result::Result<T, Error>;

//! Declarative service descriptions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a service is run, derived from its description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    /// Already running elsewhere, never launched
    External,
    /// A container image
    Container,
    /// An entry point hosted inside the orchestrator process
    InProcess,
    /// A native executable
    Executable,
}

/// A declared service
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceDescription {
    /// Unique service name
    pub name: String,
    /// The service runs outside the orchestrator's control
    #[serde(default)]
    pub external: bool,
    /// Container image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Native executable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executable: Option<PathBuf>,
    /// Name of an in-process entry point registered with the host registry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_point: Option<String>,
    /// Working directory for executables and containers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
    /// Argument string, split shell-style
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,
    /// Number of replicas to run
    #[serde(default = "default_replicas")]
    pub replicas: usize,
    /// Network bindings
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Environment passed to every replica, in declared order
    #[serde(default)]
    pub configuration: IndexMap<String, String>,
    /// Container volume mounts (`host:container[:mode]`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
}

fn default_replicas() -> usize {
    1
}

impl ServiceDescription {
    /// Create a description with nothing to run yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            external: false,
            image: None,
            executable: None,
            entry_point: None,
            working_directory: None,
            args: None,
            replicas: 1,
            bindings: Vec::new(),
            configuration: IndexMap::new(),
            volumes: Vec::new(),
        }
    }

    /// A service backed by a native executable
    pub fn executable(name: impl Into<String>, executable: impl Into<PathBuf>) -> Self {
        let mut description = Self::new(name);
        description.executable = Some(executable.into());
        description
    }

    /// A service backed by a container image
    pub fn container(name: impl Into<String>, image: impl Into<String>) -> Self {
        let mut description = Self::new(name);
        description.image = Some(image.into());
        description
    }

    /// A service hosted in-process under the given entry point
    pub fn in_process(name: impl Into<String>, entry_point: impl Into<String>) -> Self {
        let mut description = Self::new(name);
        description.entry_point = Some(entry_point.into());
        description
    }

    /// A service that already runs elsewhere
    pub fn external(name: impl Into<String>) -> Self {
        let mut description = Self::new(name);
        description.external = true;
        description
    }

    /// Set the argument string
    pub fn with_args(mut self, args: impl Into<String>) -> Self {
        self.args = Some(args.into());
        self
    }

    /// Set the replica count
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self
    }

    /// Add a binding
    pub fn with_binding(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Add a configuration entry
    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.configuration.insert(key.into(), value.into());
        self
    }

    /// Set the working directory
    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Add a volume mount
    pub fn with_volume(mut self, volume: impl Into<String>) -> Self {
        self.volumes.push(volume.into());
        self
    }

    /// Decide which kind of target runs this service
    pub fn run_kind(&self) -> RunKind {
        if self.external {
            RunKind::External
        } else if self.image.is_some() {
            RunKind::Container
        } else if self.entry_point.is_some() {
            RunKind::InProcess
        } else {
            RunKind::Executable
        }
    }

    /// The primary binding, if one is declared
    pub fn default_binding(&self) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.is_default())
    }

    /// Arguments split from the argument string
    pub fn arguments(&self) -> Vec<String> {
        self.args
            .as_deref()
            .map(command_executor::split_arguments)
            .unwrap_or_default()
    }
}

/// A named network endpoint of a service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Binding {
    /// Binding name; absent or `default` marks the primary binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Fixed address other services use to reach this binding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Protocol, e.g. `http` or `tcp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    /// Host-side port
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Port inside the container, defaults to `port`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_port: Option<u16>,
    /// Host used when an address has to be synthesized, defaults to `localhost`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Binding {
    /// Create an unnamed (default) binding
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a named binding
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Set the address
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the protocol
    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = Some(protocol.into());
        self
    }

    /// Set the port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the container-side port
    pub fn with_container_port(mut self, port: u16) -> Self {
        self.container_port = Some(port);
        self
    }

    /// Whether this is the primary binding of its service
    pub fn is_default(&self) -> bool {
        matches!(self.name.as_deref(), None | Some("default"))
    }

    /// Port the service listens on inside a container
    pub fn target_port(&self) -> Option<u16> {
        self.container_port.or(self.port)
    }

    /// Port published on the host
    pub fn published_port(&self) -> Option<u16> {
        self.port.or(self.container_port)
    }

    /// Address other services should use for this binding.
    ///
    /// A declared address whose host is `localhost`/`127.0.0.1` gets that host
    /// replaced by `host_override` when given; otherwise one is synthesized
    /// from the protocol, host and port.
    pub fn resolved_address(&self, host_override: Option<&str>) -> Option<String> {
        if let Some(address) = &self.address {
            return Some(match host_override {
                Some(host) => replace_loopback_host(address, host),
                None => address.clone(),
            });
        }

        let port = self.published_port()?;
        let protocol = self.protocol.as_deref().unwrap_or("http");
        let host = host_override
            .or(self.host.as_deref())
            .unwrap_or("localhost");
        Some(format!("{protocol}://{host}:{port}"))
    }
}

/// Swap a loopback host in `scheme://user@host:port/path` for `host`.
/// Every other part of the address, and any other host, is left alone.
fn replace_loopback_host(address: &str, host: &str) -> String {
    let (scheme, rest) = match address.find("://") {
        Some(index) => address.split_at(index + 3),
        None => ("", address),
    };
    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    let (authority, tail) = rest.split_at(authority_end);
    let (user, host_port) = match authority.rfind('@') {
        Some(index) => authority.split_at(index + 1),
        None => ("", authority),
    };
    let host_end = host_port.find(':').unwrap_or(host_port.len());
    let (current, port) = host_port.split_at(host_end);

    if current.eq_ignore_ascii_case("localhost") || current == "127.0.0.1" {
        format!("{scheme}{user}{host}{port}{tail}")
    } else {
        address.to_string()
    }
}

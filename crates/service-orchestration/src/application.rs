//! The set of services an orchestrator run manages.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::description::{RunKind, ServiceDescription};
use crate::service::Service;
use crate::{Error, Result};

/// Services keyed by name, in declaration order.
///
/// The key set is fixed at construction; only the state inside each
/// [`Service`] changes afterwards.
#[derive(Debug)]
pub struct Application {
    context_dir: PathBuf,
    services: IndexMap<String, Arc<Service>>,
}

impl Application {
    /// Validate descriptions and build an application with default engine settings
    pub fn new(
        context_dir: impl Into<PathBuf>,
        descriptions: impl IntoIterator<Item = ServiceDescription>,
    ) -> Result<Self> {
        Self::with_config(context_dir, descriptions, &EngineConfig::default())
    }

    /// Validate descriptions and build an application
    pub fn with_config(
        context_dir: impl Into<PathBuf>,
        descriptions: impl IntoIterator<Item = ServiceDescription>,
        config: &EngineConfig,
    ) -> Result<Self> {
        let mut services = IndexMap::new();

        for description in descriptions {
            validate(&description)?;
            if services.contains_key(&description.name) {
                return Err(Error::configuration(format!(
                    "duplicate service name '{}'",
                    description.name
                )));
            }
            let name = description.name.clone();
            services.insert(name, Arc::new(Service::new(description, config.log_capacity)));
        }

        Ok(Self {
            context_dir: context_dir.into(),
            services,
        })
    }

    /// Directory relative paths resolve against
    pub fn context_dir(&self) -> &Path {
        &self.context_dir
    }

    /// Services in declaration order
    pub fn services(&self) -> impl Iterator<Item = &Arc<Service>> {
        self.services.values()
    }

    /// Service names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Look up a service
    pub fn get(&self, name: &str) -> Option<&Arc<Service>> {
        self.services.get(name)
    }

    /// Look up a service, failing if it is not declared
    pub fn service(&self, name: &str) -> Result<&Arc<Service>> {
        self.get(name)
            .ok_or_else(|| Error::ServiceNotFound(name.to_string()))
    }

    /// Number of services
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Whether no service is declared
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

fn validate(description: &ServiceDescription) -> Result<()> {
    let name = &description.name;
    if name.trim().is_empty() {
        return Err(Error::configuration("service name must not be empty"));
    }
    if description.replicas == 0 {
        return Err(Error::configuration(format!(
            "service '{name}' must have at least one replica"
        )));
    }
    if description.run_kind() == RunKind::Executable && description.executable.is_none() {
        return Err(Error::configuration(format!(
            "service '{name}' has no image, executable or entry point and is not external"
        )));
    }

    let mut seen = HashSet::new();
    for binding in &description.bindings {
        let binding_name = binding.name.as_deref().unwrap_or("default");
        if !seen.insert(binding_name) {
            return Err(Error::configuration(format!(
                "service '{name}' declares binding '{binding_name}' more than once"
            )));
        }
        if binding.address.is_none() && binding.port.is_none() && binding.container_port.is_none()
        {
            return Err(Error::configuration(format!(
                "binding '{binding_name}' of service '{name}' needs an address or a port"
            )));
        }
    }

    Ok(())
}

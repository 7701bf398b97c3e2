//! YAML application manifests.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::application::Application;
use crate::config::EngineConfig;
use crate::description::ServiceDescription;
use crate::{Error, Result};

/// A manifest file: engine settings plus the declared services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Application name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Engine settings
    #[serde(default)]
    pub engine: EngineConfig,
    /// Declared services, in order
    #[serde(default)]
    pub services: Vec<ServiceDescription>,
    /// Directory the manifest was loaded from
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl Manifest {
    /// Parse a manifest from YAML
    pub fn from_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    /// Load a manifest file; relative paths resolve against its directory
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(format!("failed to read manifest {}: {}", path.display(), e))
        })?;
        let mut manifest = Self::from_str(&contents)?;
        manifest.base_dir = path.parent().map(|dir| {
            if dir.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                dir.to_path_buf()
            }
        });
        Ok(manifest)
    }

    /// Directory relative paths resolve against
    pub fn base_dir(&self) -> &Path {
        self.base_dir.as_deref().unwrap_or(Path::new("."))
    }

    /// Validate the services and build the application.
    ///
    /// `context_dir` overrides the manifest's own directory.
    pub fn into_application(self, context_dir: Option<&Path>) -> Result<Application> {
        let context_dir = context_dir.unwrap_or(self.base_dir()).to_path_buf();
        Application::with_config(context_dir, self.services, &self.engine)
    }
}

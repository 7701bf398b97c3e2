pub mod run;
pub mod validate;

use anyhow::{Context, Result};
use service_orchestration::{Application, EngineConfig, Manifest, RunKind, Service};
use std::path::Path;

/// Load a manifest and build its application
pub fn load(manifest_path: &Path) -> Result<(Application, EngineConfig)> {
    let manifest = Manifest::from_file(manifest_path)
        .with_context(|| format!("Failed to load {}", manifest_path.display()))?;
    let engine = manifest.engine.clone();
    let app = manifest
        .into_application(None)
        .context("Invalid application")?;
    Ok((app, engine))
}

pub fn run_kind_label(service: &Service) -> &'static str {
    match service.run_kind() {
        RunKind::External => "external",
        RunKind::Container => "container",
        RunKind::InProcess => "in-process",
        RunKind::Executable => "executable",
    }
}

pub fn bindings_label(service: &Service) -> String {
    let bindings: Vec<String> = service
        .description()
        .bindings
        .iter()
        .map(|binding| {
            let name = binding.name.as_deref().unwrap_or("default");
            match binding.resolved_address(None) {
                Some(address) => format!("{name}={address}"),
                None => name.to_string(),
            }
        })
        .collect();
    if bindings.is_empty() {
        "-".to_string()
    } else {
        bindings.join(", ")
    }
}

use anyhow::{Context, Result};
use comfy_table::Table;
use service_orchestration::{AggregateProcessor, HostRegistry, Manifest, discovery_key};
use std::path::Path;
use std::sync::Arc;

use super::{bindings_label, load, run_kind_label};
use crate::Format;

pub fn run(manifest_path: &Path, format: Format) -> Result<()> {
    if format == Format::Json {
        let manifest = Manifest::from_file(manifest_path)?;
        // Build and check the application too so invalid services still fail
        let app = manifest.clone().into_application(None)?;
        AggregateProcessor::local(Arc::new(manifest.engine.clone()), HostRegistry::new())
            .validate(&app)
            .context("Invalid application")?;
        println!("{}", serde_json::to_string_pretty(&manifest)?);
        return Ok(());
    }

    println!("Validating {}...", manifest_path.display());
    let (app, engine) = load(manifest_path)?;
    let processor = AggregateProcessor::local(Arc::new(engine), HostRegistry::new());
    processor.validate(&app).context("Invalid application")?;

    println!("✓ Manifest valid");
    println!("  Services: {}", app.len());

    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "KIND", "REPLICAS", "BINDINGS", "TARGET", "DISCOVERY"]);

    for service in app.services() {
        let target = processor
            .target_for(service)
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "-".to_string());
        let discovery: Vec<String> = service
            .description()
            .bindings
            .iter()
            .map(|binding| discovery_key(service.name(), binding))
            .collect();

        table.add_row(vec![
            service.name().to_string(),
            run_kind_label(service).to_string(),
            service.description().replicas.to_string(),
            bindings_label(service),
            target,
            if discovery.is_empty() {
                "-".to_string()
            } else {
                discovery.join(", ")
            },
        ]);
    }

    println!("{table}");
    Ok(())
}

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, Table};
use service_orchestration::{
    AggregateProcessor, Application, ApplicationReport, HostRegistry, KubectlClient, ServiceState,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use super::{load, run_kind_label};

pub async fn run(manifest_path: &Path, cluster: bool, follow: bool) -> Result<()> {
    let (app, engine) = load(manifest_path)?;
    let engine = Arc::new(engine);

    let processor = if cluster {
        let client = Arc::new(KubectlClient::new(&engine));
        AggregateProcessor::cluster(engine.clone(), client)
    } else {
        AggregateProcessor::local(engine.clone(), HostRegistry::new())
    };
    processor.validate(&app).context("Invalid application")?;

    // Register before starting so an early Ctrl+C still stops cleanly
    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        signal_hook::flag::register(signal, shutdown.clone())
            .context("Failed to install signal handler")?;
    }

    let followers = if follow { follow_logs(&app) } else { Vec::new() };

    let started = processor.start(&app).await;
    print_outcomes(&app, &processor, &started);

    if started.succeeded().next().is_none() {
        warn!("No service started");
    } else {
        println!("Running - press Ctrl+C to stop");
        while !shutdown.load(Ordering::Relaxed) {
            smol::Timer::after(engine.poll_interval.max(Duration::from_millis(50))).await;
        }
        info!("Shutdown requested");
    }

    let stopped = processor.stop(&app).await;
    for (name, e) in stopped.failures() {
        warn!(service = %name, "Failed to stop: {}", e);
    }
    for follower in followers {
        follower.cancel().await;
    }

    print_summary(&app);

    let failures = started.failures().count();
    if failures > 0 {
        anyhow::bail!("{} service(s) failed to start", failures);
    }
    Ok(())
}

/// Print every service log line to stdout as it is appended
fn follow_logs(app: &Application) -> Vec<smol::Task<()>> {
    app.services()
        .filter(|service| !service.is_external())
        .map(|service| {
            let name = service.name().to_string();
            let subscription = service.logs().subscribe();
            smol::spawn(async move {
                for entry in subscription.snapshot {
                    println!("{name} | {entry}");
                }
                while let Ok(entry) = subscription.receiver.recv().await {
                    println!("{name} | {entry}");
                }
            })
        })
        .collect()
}

fn print_outcomes(app: &Application, processor: &AggregateProcessor, report: &ApplicationReport) {
    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "KIND", "TARGET", "OUTCOME"]);

    let failures: Vec<(&str, String)> = report
        .failures()
        .map(|(name, e)| (name, e.to_string()))
        .collect();

    for service in app.services() {
        let target = processor
            .target_for(service)
            .map(|kind| kind.to_string())
            .unwrap_or_else(|| "-".to_string());
        let outcome = if service.is_external() {
            Cell::new("external").fg(Color::DarkGrey)
        } else if let Some((_, reason)) = failures.iter().find(|(name, _)| *name == service.name()) {
            Cell::new(format!("failed: {reason}")).fg(Color::Red)
        } else {
            Cell::new("started").fg(Color::Green)
        };

        table.add_row(vec![
            Cell::new(service.name()),
            Cell::new(run_kind_label(service)),
            Cell::new(target),
            outcome,
        ]);
    }

    println!("{table}");
}

fn print_summary(app: &Application) {
    let mut table = Table::new();
    table.set_header(vec!["SERVICE", "STATE", "RESTARTS", "LOG LINES"]);

    for service in app.services().filter(|service| !service.is_external()) {
        let state = service.state();
        let color = match state {
            ServiceState::Running => Color::Green,
            ServiceState::Starting => Color::Yellow,
            ServiceState::NotRunning | ServiceState::Stopped => Color::DarkGrey,
        };
        table.add_row(vec![
            Cell::new(service.name()),
            Cell::new(state.to_string()).fg(color),
            Cell::new(service.restarts()),
            Cell::new(service.logs().len()),
        ]);
    }

    println!("{table}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use service_orchestration::{Binding, ServiceDescription};

    #[test]
    fn test_follow_subscribes_to_managed_services_only() {
        let app = Application::new(
            ".",
            vec![
                ServiceDescription::executable("worker", "./worker"),
                ServiceDescription::external("cache")
                    .with_binding(Binding::new().with_address("localhost:6379")),
            ],
        )
        .unwrap();

        smol::block_on(async {
            let followers = follow_logs(&app);
            assert_eq!(followers.len(), 1);
            assert_eq!(app.service("worker").unwrap().logs().subscriber_count(), 1);
            assert_eq!(app.service("cache").unwrap().logs().subscriber_count(), 0);
            for follower in followers {
                follower.cancel().await;
            }
        });
    }
}

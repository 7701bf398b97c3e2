//! Docker target against a real daemon. Run with `--features docker-tests`.

#![cfg(all(unix, feature = "docker-tests"))]

mod common;

use common::{fast_config, wait_for};
use service_orchestration::{
    Application, Binding, DockerTarget, ExecutionTarget, ReplicaStatus, ServiceDescription,
    ServiceState,
};
use std::sync::Arc;
use std::time::Duration;

#[smol_potat::test]
async fn test_container_replicas_run_and_are_removed() {
    let app = Application::new(
        ".",
        vec![
            ServiceDescription::container("tether-it-web", "busybox:latest")
                .with_args("sh -c \"env; exec sleep 60\"")
                .with_replicas(2)
                .with_binding(Binding::new().with_port(18080).with_container_port(80)),
            ServiceDescription::external("cache")
                .with_binding(Binding::new().with_address("localhost:6379")),
        ],
    )
    .unwrap();
    let target = DockerTarget::new(Arc::new(fast_config()));
    let web = app.service("tether-it-web").unwrap().clone();

    target.start_service(&app, &web).await.unwrap();
    assert!(
        wait_for(Duration::from_secs(60), || {
            web.replicas()
                .iter()
                .filter(|r| r.pid().is_some())
                .count()
                == 2
        })
        .await
    );
    assert_eq!(web.state(), ServiceState::Running);
    assert!(
        wait_for(Duration::from_secs(10), || {
            web.logs()
                .lines()
                .iter()
                .any(|entry| entry.line == "CACHE_SERVICE=host.docker.internal:6379")
        })
        .await
    );

    let names: Vec<String> = web
        .replicas()
        .iter()
        .filter_map(|r| match r {
            ReplicaStatus::Docker(status) => Some(status.info.id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(names.len(), 2);

    target.stop_service(&web).await.unwrap();
    assert_eq!(web.state(), ServiceState::Stopped);

    for name in names {
        let output = std::process::Command::new("docker")
            .args(["inspect", &name])
            .output()
            .unwrap();
        assert!(!output.status.success(), "container {name} still exists");
    }
}

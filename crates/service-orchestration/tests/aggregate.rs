//! Routing and ordering across execution targets

mod common;

use async_trait::async_trait;
use common::fast_config;
use parking_lot::Mutex;
use service_orchestration::{
    AggregateProcessor, Application, ExecutionTarget, HostContext, HostRegistry, HostedService,
    InProcessTarget, Result, RunKind, Service, ServiceDescription, ServiceState, TargetKind,
};
use std::sync::Arc;
use std::time::Duration;

/// Records start/stop calls into a shared journal
struct Journal {
    kind: TargetKind,
    run_kind: RunKind,
    entries: Arc<Mutex<Vec<String>>>,
    stop_delay: Duration,
}

#[async_trait]
impl ExecutionTarget for Journal {
    fn kind(&self) -> TargetKind {
        self.kind
    }

    fn owns(&self, service: &Service) -> bool {
        service.run_kind() == self.run_kind
    }

    async fn start_service(&self, _app: &Application, service: &Arc<Service>) -> Result<()> {
        self.entries.lock().push(format!("start {}", service.name()));
        Ok(())
    }

    async fn stop_service(&self, service: &Arc<Service>) -> Result<()> {
        smol::Timer::after(self.stop_delay).await;
        self.entries.lock().push(format!("stop {}", service.name()));
        Ok(())
    }
}

fn journal(
    kind: TargetKind,
    run_kind: RunKind,
    entries: &Arc<Mutex<Vec<String>>>,
    stop_delay: Duration,
) -> Arc<dyn ExecutionTarget> {
    Arc::new(Journal {
        kind,
        run_kind,
        entries: entries.clone(),
        stop_delay,
    })
}

struct Idle;

#[async_trait]
impl HostedService for Idle {
    async fn run(&self, context: HostContext) -> Result<()> {
        context.cancellation.cancelled().await;
        Ok(())
    }
}

#[smol_potat::test]
async fn test_unrouted_service_rejects_the_whole_start() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let processor = AggregateProcessor::new(vec![journal(
        TargetKind::Process,
        RunKind::Executable,
        &entries,
        Duration::ZERO,
    )]);
    let app = Application::new(
        ".",
        vec![
            ServiceDescription::executable("worker", "./worker"),
            ServiceDescription::container("web", "nginx"),
            ServiceDescription::external("db"),
        ],
    )
    .unwrap();

    let err = processor.validate(&app).unwrap_err();
    assert!(err.to_string().contains("no execution target can run service 'web'"));

    let report = processor.start(&app).await;
    assert!(!report.is_success());
    assert_eq!(report.succeeded().count(), 0);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].0, "web");
    assert!(matches!(
        report.rejected[0].1,
        service_orchestration::Error::Configuration(_)
    ));
    assert_eq!(report.external, vec!["db".to_string()]);
    assert!(entries.lock().is_empty());
}

#[smol_potat::test]
async fn test_unknown_entry_point_rejects_before_any_launch() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let hosted: Arc<dyn ExecutionTarget> = Arc::new(InProcessTarget::new(
        Arc::new(fast_config()),
        HostRegistry::new().with("idle", Idle),
    ));
    let processor = AggregateProcessor::new(vec![
        hosted,
        journal(TargetKind::Process, RunKind::Executable, &entries, Duration::ZERO),
    ]);
    let app = Application::new(
        ".",
        vec![
            ServiceDescription::in_process("hosted", "missing-entry"),
            ServiceDescription::executable("worker", "./worker"),
        ],
    )
    .unwrap();

    let err = processor.validate(&app).unwrap_err();
    assert!(err.to_string().contains("unknown entry point 'missing-entry'"));

    let report = processor.start(&app).await;
    let failures: Vec<&str> = report.failures().map(|(name, _)| name).collect();
    assert_eq!(failures, vec!["hosted"]);
    assert!(report.targets.is_empty());
    assert!(entries.lock().is_empty());
    assert_eq!(app.service("hosted").unwrap().replica_count(), 0);
}

#[smol_potat::test]
async fn test_valid_application_passes_checks() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let hosted: Arc<dyn ExecutionTarget> = Arc::new(InProcessTarget::new(
        Arc::new(fast_config()),
        HostRegistry::new().with("idle", Idle),
    ));
    let processor = AggregateProcessor::new(vec![
        hosted,
        journal(TargetKind::Process, RunKind::Executable, &entries, Duration::ZERO),
    ]);
    let app = Application::new(
        ".",
        vec![
            ServiceDescription::in_process("hosted", "idle"),
            ServiceDescription::executable("worker", "./worker"),
        ],
    )
    .unwrap();

    processor.validate(&app).unwrap();
    let report = processor.start(&app).await;
    assert!(report.is_success());
    assert_eq!(*entries.lock(), vec!["start worker".to_string()]);
    assert_eq!(app.service("hosted").unwrap().state(), ServiceState::Running);

    let stopped = processor.stop(&app).await;
    assert!(stopped.is_success());
    assert_eq!(app.service("hosted").unwrap().state(), ServiceState::Stopped);
}

#[smol_potat::test]
async fn test_first_owning_target_wins() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let processor = AggregateProcessor::new(vec![
        journal(TargetKind::Docker, RunKind::Container, &entries, Duration::ZERO),
        journal(TargetKind::Cluster, RunKind::Container, &entries, Duration::ZERO),
    ]);
    let app = Application::new(".", vec![ServiceDescription::container("web", "nginx")]).unwrap();

    let report = processor.start(&app).await;
    assert!(report.is_success());
    assert_eq!(processor.target_for(app.service("web").unwrap()), Some(TargetKind::Docker));
    assert_eq!(entries.lock().len(), 1);
    assert_eq!(report.targets[1].1.succeeded.len(), 0);
}

#[smol_potat::test]
async fn test_in_process_services_stop_last_in_name_order() {
    let entries = Arc::new(Mutex::new(Vec::new()));
    let processor = AggregateProcessor::new(vec![
        journal(TargetKind::InProcess, RunKind::InProcess, &entries, Duration::ZERO),
        journal(
            TargetKind::Process,
            RunKind::Executable,
            &entries,
            Duration::from_millis(100),
        ),
    ]);
    let app = Application::new(
        ".",
        vec![
            ServiceDescription::in_process("zeta", "host"),
            ServiceDescription::executable("worker", "./worker"),
            ServiceDescription::in_process("alpha", "host"),
        ],
    )
    .unwrap();

    entries.lock().clear();
    let report = processor.stop(&app).await;
    assert!(report.is_success());
    assert_eq!(
        *entries.lock(),
        vec![
            "stop worker".to_string(),
            "stop alpha".to_string(),
            "stop zeta".to_string(),
        ]
    );
}

#[smol_potat::test]
async fn test_local_processor_routes_by_run_kind() {
    let hosts = HostRegistry::new().with("idle", Idle);
    let processor = AggregateProcessor::local(Arc::new(fast_config()), hosts);
    assert_eq!(
        processor.target_kinds(),
        vec![TargetKind::InProcess, TargetKind::Docker, TargetKind::Process]
    );

    let app = Application::new(
        ".",
        vec![
            ServiceDescription::in_process("hosted", "idle"),
            ServiceDescription::container("web", "nginx"),
            ServiceDescription::executable("worker", "./worker"),
            ServiceDescription::external("db"),
        ],
    )
    .unwrap();

    let route = |name: &str| processor.target_for(app.service(name).unwrap());
    assert_eq!(route("hosted"), Some(TargetKind::InProcess));
    assert_eq!(route("web"), Some(TargetKind::Docker));
    assert_eq!(route("worker"), Some(TargetKind::Process));
    assert_eq!(route("db"), None);
}

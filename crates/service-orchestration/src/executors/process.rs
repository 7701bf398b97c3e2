//! Out-of-process target: supervised native executables.

use async_trait::async_trait;
use command_executor::{CancellationToken, Command, run};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::supervisor::Supervisor;
use super::{ExecutionTarget, TargetKind, TargetState};
use crate::application::Application;
use crate::config::EngineConfig;
use crate::description::RunKind;
use crate::discovery::{listen_environment, populate_environment};
use crate::logs::LogEntry;
use crate::replica::{ReplicaInfo, ReplicaStatus, new_replica_id};
use crate::service::{Service, ServiceState};
use crate::{Error, Result};

/// Runs executables as child processes, restarting them whenever they exit
pub struct ProcessTarget {
    config: Arc<EngineConfig>,
}

impl ProcessTarget {
    /// Create a process target
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Build the command a replica of `service` runs
    pub fn build_command(&self, app: &Application, service: &Service) -> Result<Command> {
        let description = service.description();
        let executable = description.executable.as_ref().ok_or_else(|| {
            Error::configuration(format!("service '{}' has no executable", service.name()))
        })?;

        let declared_dir = description
            .working_directory
            .as_ref()
            .map(|dir| app.context_dir().join(dir));
        let executable = resolve_executable(
            executable,
            declared_dir.as_deref().unwrap_or(app.context_dir()),
        );
        let working_dir = declared_dir.unwrap_or_else(|| {
            executable
                .parent()
                .filter(|parent| !parent.as_os_str().is_empty() && parent.is_dir())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| app.context_dir().to_path_buf())
        });

        let mut command = Command::new(&executable);
        command.args(description.arguments());
        if self.config.inject_urls_argument {
            if let Some(port) = description.default_binding().and_then(|b| b.published_port()) {
                command.arg(format!("--urls=http://localhost:{port}"));
            }
        }
        command.envs(populate_environment(app, service));
        command.envs(listen_environment(service, &self.config, false));
        command.current_dir(working_dir);

        Ok(command)
    }
}

/// Absolute paths are used as-is, relative paths with a directory component
/// resolve against `base`, bare names are left to `PATH`.
fn resolve_executable(executable: &Path, base: &Path) -> PathBuf {
    if executable.is_absolute() || executable.components().count() == 1 {
        executable.to_path_buf()
    } else {
        base.join(executable)
    }
}

#[async_trait]
impl ExecutionTarget for ProcessTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Process
    }

    fn owns(&self, service: &Service) -> bool {
        service.run_kind() == RunKind::Executable
    }

    async fn start_service(&self, app: &Application, service: &Arc<Service>) -> Result<()> {
        if service.is_attached(TargetKind::Process) {
            debug!(service = %service.name(), "Service already supervised");
            return Ok(());
        }

        let command = self.build_command(app, service)?;
        info!(service = %service.name(), command = %command.display(), "Starting process service");

        let ports: Vec<u16> = service
            .description()
            .bindings
            .iter()
            .filter_map(|b| b.published_port())
            .collect();
        service.set_port_map(ports.iter().map(|p| (*p, vec![*p])).collect());

        let supervised = service.clone();
        let config = self.config.clone();
        let supervisor = Supervisor::spawn(format!("process-{}", service.name()), move |token| {
            supervise(supervised, command, ports, config, token)
        })?;

        if let Err(TargetState::Process(duplicate)) =
            service.attach_target(TargetKind::Process, TargetState::Process(supervisor))
        {
            // Lost a race with a concurrent start
            duplicate.stop().await;
        }
        Ok(())
    }

    async fn stop_service(&self, service: &Arc<Service>) -> Result<()> {
        if let Some(TargetState::Process(supervisor)) = service.detach_target(TargetKind::Process)
        {
            info!(service = %service.name(), "Stopping process service");
            supervisor.stop().await;
        }
        service.clear_replicas();
        service.set_state(ServiceState::Stopped);
        Ok(())
    }
}

/// Launch a replica, wait for it to exit, repeat until cancelled
async fn supervise(
    service: Arc<Service>,
    command: Command,
    ports: Vec<u16>,
    config: Arc<EngineConfig>,
    token: CancellationToken,
) {
    let options = config.supervised_run_options();

    while !token.is_cancelled() {
        let replica_id = new_replica_id(service.name());
        service.insert_replica(ReplicaStatus::process(ReplicaInfo::new(
            &replica_id,
            service.name(),
            ports.clone(),
        )));
        service.set_state(ServiceState::Starting);

        let result = run(
            &command,
            &options,
            |line| service.logs().append(LogEntry::output(&replica_id, line)),
            |pid| {
                service.update_replica(&replica_id, |replica| replica.set_pid(pid));
                service.set_state(ServiceState::Running);
                info!(service = %service.name(), replica = %replica_id, pid, "Replica running");
            },
            &token,
        )
        .await;

        let launch_failed = match result {
            Ok(result) => {
                service.update_replica(&replica_id, |replica| {
                    replica.set_exit_code(result.exit_code())
                });
                if !result.cancelled {
                    warn!(
                        service = %service.name(),
                        replica = %replica_id,
                        code = ?result.exit_code(),
                        "Replica exited"
                    );
                    service.logs().system(
                        Some(&replica_id),
                        format!("exited with code {:?}", result.exit_code()),
                    );
                }
                false
            }
            Err(e) => {
                error!(service = %service.name(), replica = %replica_id, "Failed to run replica: {}", e);
                service
                    .logs()
                    .system(Some(&replica_id), format!("failed to start: {e}"));
                true
            }
        };

        service.remove_replica(&replica_id);
        service.set_state(ServiceState::NotRunning);

        if token.is_cancelled() {
            break;
        }
        let restarts = service.record_restart();
        debug!(service = %service.name(), restarts, "Restarting replica");

        if launch_failed && token.sleep(config.restart_delay).await {
            break;
        }
    }
}

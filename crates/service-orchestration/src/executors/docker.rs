//! Container target: one supervised docker container per replica.

use async_trait::async_trait;
use command_executor::{CancellationToken, Command, RunOptions, run};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::supervisor::Supervisor;
use super::{ExecutionTarget, TargetKind, TargetState};
use crate::application::Application;
use crate::config::EngineConfig;
use crate::description::RunKind;
use crate::discovery::{listen_environment, populate_environment_with_host};
use crate::logs::LogEntry;
use crate::ports::allocate_ports;
use crate::replica::{ReplicaInfo, ReplicaStatus, new_replica_id};
use crate::service::{Service, ServiceState};
use crate::{Error, Result};

/// Everything needed to create a container for one replica slot
#[derive(Debug, Clone)]
pub(crate) struct ContainerSpec {
    image: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    /// (host port, container port)
    ports: Vec<(u16, u16)>,
    volumes: Vec<String>,
    working_dir: Option<PathBuf>,
}

/// Runs images through the docker CLI
pub struct DockerTarget {
    config: Arc<EngineConfig>,
}

impl DockerTarget {
    /// Create a docker target
    pub fn new(config: Arc<EngineConfig>) -> Self {
        Self { config }
    }

    /// Allocate ports and build one container spec per replica slot
    pub(crate) fn container_specs(
        &self,
        app: &Application,
        service: &Service,
    ) -> Result<Vec<ContainerSpec>> {
        let description = service.description();
        let image = description.image.clone().ok_or_else(|| {
            Error::configuration(format!("service '{}' has no image", service.name()))
        })?;

        let port_map = allocate_ports(description)?;
        service.set_port_map(port_map.clone());

        let mut env = populate_environment_with_host(
            app,
            service,
            Some(self.config.container_host_alias.as_str()),
        );
        env.extend(listen_environment(service, &self.config, true));

        let specs = (0..description.replicas)
            .map(|slot| {
                let ports = description
                    .bindings
                    .iter()
                    .filter_map(|binding| {
                        let declared = binding.published_port()?;
                        let target = binding.target_port()?;
                        let host = port_map.get(&declared)?.get(slot).copied()?;
                        Some((host, target))
                    })
                    .collect();
                ContainerSpec {
                    image: image.clone(),
                    args: description.arguments(),
                    env: env.clone(),
                    ports,
                    volumes: description.volumes.clone(),
                    working_dir: description.working_directory.clone(),
                }
            })
            .collect();
        Ok(specs)
    }
}

/// `docker run -d --name {name} ...` for a replica
pub(crate) fn docker_run_command(config: &EngineConfig, name: &str, spec: &ContainerSpec) -> Command {
    let mut cmd = Command::new(&config.docker_binary);
    cmd.args(["run", "-d", "--name", name]);

    if cfg!(target_os = "linux") {
        cmd.arg("--add-host")
            .arg(format!("{}:host-gateway", config.container_host_alias));
    }
    for (key, value) in &spec.env {
        cmd.arg("-e").arg(format!("{key}={value}"));
    }
    for (host, container) in &spec.ports {
        cmd.arg("-p").arg(format!("{host}:{container}"));
    }
    for volume in &spec.volumes {
        cmd.arg("-v").arg(volume);
    }
    if let Some(dir) = &spec.working_dir {
        cmd.arg("-w").arg(dir);
    }

    cmd.arg(&spec.image);
    cmd.args(&spec.args);
    cmd
}

#[async_trait]
impl ExecutionTarget for DockerTarget {
    fn kind(&self) -> TargetKind {
        TargetKind::Docker
    }

    fn owns(&self, service: &Service) -> bool {
        service.run_kind() == RunKind::Container
    }

    async fn start_service(&self, app: &Application, service: &Arc<Service>) -> Result<()> {
        if service.is_attached(TargetKind::Docker) {
            debug!(service = %service.name(), "Service already supervised");
            return Ok(());
        }

        let specs = self.container_specs(app, service)?;
        info!(service = %service.name(), replicas = specs.len(), "Starting container service");

        let mut supervisors = Vec::with_capacity(specs.len());
        for (slot, spec) in specs.into_iter().enumerate() {
            let supervised = service.clone();
            let config = self.config.clone();
            let spawned = Supervisor::spawn(format!("docker-{}-{}", service.name(), slot), move |token| {
                supervise(supervised, spec, config, token)
            });
            match spawned {
                Ok(supervisor) => supervisors.push(supervisor),
                Err(e) => {
                    for supervisor in supervisors {
                        supervisor.stop().await;
                    }
                    return Err(e.into());
                }
            }
        }

        if let Err(TargetState::Docker(duplicates)) =
            service.attach_target(TargetKind::Docker, TargetState::Docker(supervisors))
        {
            for supervisor in duplicates {
                supervisor.stop().await;
            }
        }
        Ok(())
    }

    async fn stop_service(&self, service: &Arc<Service>) -> Result<()> {
        if let Some(TargetState::Docker(supervisors)) = service.detach_target(TargetKind::Docker) {
            info!(service = %service.name(), "Stopping container service");
            futures::future::join_all(supervisors.into_iter().map(Supervisor::stop)).await;
        }
        service.clear_replicas();
        service.set_state(ServiceState::Stopped);
        Ok(())
    }
}

/// Create a container, follow its logs until it exits, remove it, repeat
async fn supervise(
    service: Arc<Service>,
    spec: ContainerSpec,
    config: Arc<EngineConfig>,
    token: CancellationToken,
) {
    let host_ports: Vec<u16> = spec.ports.iter().map(|(host, _)| *host).collect();

    while !token.is_cancelled() {
        let replica_id = new_replica_id(service.name());
        let run_cmd = docker_run_command(&config, &replica_id, &spec);
        debug!(service = %service.name(), command = %run_cmd.display(), "Creating container");

        let created = run(&run_cmd, &config.cli_run_options().throw_on_non_zero_exit(), |_| {}, |_| {}, &token).await;
        let container_id = match created {
            Ok(result) if result.cancelled => {
                remove_container(&service, &config, &replica_id).await;
                break;
            }
            Ok(result) => result.stdout.trim().to_string(),
            Err(e) => {
                error!(service = %service.name(), replica = %replica_id, "Failed to create container: {}", e);
                service
                    .logs()
                    .system(Some(&replica_id), format!("failed to create container: {e}"));
                if token.sleep(config.restart_delay).await {
                    break;
                }
                service.record_restart();
                continue;
            }
        };

        service.insert_replica(ReplicaStatus::docker(
            ReplicaInfo::new(&replica_id, service.name(), host_ports.clone()),
            run_cmd.display(),
            Some(container_id),
        ));
        service.set_state(ServiceState::Starting);

        let mut follow = Command::new(&config.docker_binary);
        follow.args(["logs", "-f", replica_id.as_str()]);
        let followed = run(
            &follow,
            &config.supervised_run_options(),
            |line| service.logs().append(LogEntry::output(&replica_id, line)),
            |pid| {
                service.update_replica(&replica_id, |replica| replica.set_pid(pid));
                service.set_state(ServiceState::Running);
                info!(service = %service.name(), replica = %replica_id, "Container running");
            },
            &token,
        )
        .await;

        match followed {
            Ok(result) => {
                service.update_replica(&replica_id, |replica| replica.set_exit_code(result.exit_code()));
                if !result.cancelled {
                    warn!(service = %service.name(), replica = %replica_id, "Container log follower exited");
                }
            }
            Err(e) => {
                warn!(service = %service.name(), replica = %replica_id, "Failed to follow container logs: {}", e);
                service
                    .logs()
                    .system(Some(&replica_id), format!("failed to follow logs: {e}"));
            }
        }

        remove_container(&service, &config, &replica_id).await;
        service.remove_replica(&replica_id);
        if service.replica_count() == 0 {
            service.set_state(ServiceState::NotRunning);
        }

        if token.is_cancelled() {
            break;
        }
        service.record_restart();
    }
}

/// `docker stop -t` then `docker rm -f`; failures only reach the service log.
///
/// The daemon kills the container once the stop timeout expires, and the
/// forced removal covers a stop that never returned.
async fn remove_container(service: &Service, config: &EngineConfig, name: &str) {
    let stop_seconds = container_stop_seconds(config);
    let options = RunOptions::default()
        .with_timeout(config.container_stop_timeout + config.grace_period)
        .with_poll_interval(config.poll_interval)
        .with_grace_period(config.grace_period);
    let token = CancellationToken::new();

    let mut stop = Command::new(&config.docker_binary);
    stop.args(["stop", "-t", stop_seconds.as_str(), name]);
    let mut remove = Command::new(&config.docker_binary);
    remove.args(["rm", "-f", name]);

    for (action, cmd) in [("stop", stop), ("rm", remove)] {
        match run(&cmd, &options, |_| {}, |_| {}, &token).await {
            Ok(result) if result.success() => {}
            Ok(result) if result.timed_out => service
                .logs()
                .system(Some(name), format!("docker {action} timed out")),
            Ok(result) => service.logs().system(
                Some(name),
                format!(
                    "docker {action} exited with {:?}: {}",
                    result.exit_code(),
                    result.stderr.trim()
                ),
            ),
            Err(e) => service
                .logs()
                .system(Some(name), format!("docker {action} failed: {e}")),
        }
    }
}

/// Whole seconds for `docker stop -t`, rounded up
fn container_stop_seconds(config: &EngineConfig) -> String {
    config
        .container_stop_timeout
        .as_millis()
        .div_ceil(1000)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::{Binding, ServiceDescription};
    use std::time::Duration;

    fn app() -> Application {
        Application::new(
            "/srv/app",
            vec![
                ServiceDescription::container("web", "nginx:alpine")
                    .with_args("-g \"daemon off;\"")
                    .with_volume("./html:/usr/share/nginx/html:ro")
                    .with_binding(Binding::new().with_port(8080).with_container_port(80)),
                ServiceDescription::external("cache")
                    .with_binding(Binding::new().with_address("localhost:6379")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_single_replica_spec() {
        let app = app();
        let target = DockerTarget::new(Arc::new(EngineConfig::default()));
        let web = app.service("web").unwrap();
        let specs = target.container_specs(&app, web).unwrap();

        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].ports, vec![(8080, 80)]);
        assert_eq!(web.port_map().get(&8080), Some(&vec![8080]));

        let env: Vec<_> = specs[0].env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        assert!(env.contains(&"CACHE_SERVICE=host.docker.internal:6379".to_string()));
        assert!(env.contains(&"URLS=http://*:80".to_string()));
        assert!(env.contains(&"PORT=80".to_string()));
    }

    #[test]
    fn test_docker_run_command_line() {
        let app = app();
        let config = EngineConfig::default();
        let target = DockerTarget::new(Arc::new(config.clone()));
        let spec = target
            .container_specs(&app, app.service("web").unwrap())
            .unwrap()
            .remove(0);

        let cmd = docker_run_command(&config, "web_0000abcd", &spec);
        let line = cmd.display();

        assert!(line.starts_with("docker run -d --name web_0000abcd"));
        assert!(line.contains("-p 8080:80"));
        assert!(line.contains("-v ./html:/usr/share/nginx/html:ro"));
        assert!(line.contains("-e CACHE_SERVICE=host.docker.internal:6379"));
        assert!(line.ends_with("nginx:alpine -g \"daemon off;\""));
        if cfg!(target_os = "linux") {
            assert!(line.contains("--add-host host.docker.internal:host-gateway"));
        }
    }

    #[test]
    fn test_replicas_get_their_own_ports() {
        let app = Application::new(
            ".",
            vec![
                ServiceDescription::container("web", "nginx")
                    .with_replicas(2)
                    .with_binding(Binding::new().with_port(8080).with_container_port(80)),
            ],
        )
        .unwrap();
        let target = DockerTarget::new(Arc::new(EngineConfig::default()));
        let specs = target.container_specs(&app, app.service("web").unwrap()).unwrap();

        assert_eq!(specs.len(), 2);
        assert_ne!(specs[0].ports[0].0, specs[1].ports[0].0);
        assert!(specs.iter().all(|s| s.ports[0].1 == 80));
    }

    #[test]
    fn test_stop_timeout_rounds_up_to_seconds() {
        let mut config = EngineConfig::default();
        assert_eq!(container_stop_seconds(&config), "5");

        config.container_stop_timeout = Duration::from_millis(1200);
        assert_eq!(container_stop_seconds(&config), "2");

        config.container_stop_timeout = Duration::ZERO;
        assert_eq!(container_stop_seconds(&config), "0");
    }
}

//! Engine configuration.
//!
//! Every knob of the execution engine lives in [`EngineConfig`]. It is passed
//! explicitly to each execution target; there is no global configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables shared by all execution targets
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Lines retained per service log buffer
    pub log_capacity: usize,
    /// Delay before relaunching a replica whose launch failed
    #[serde(with = "duration_ms", rename = "restart_delay_ms")]
    pub restart_delay: Duration,
    /// Time between interrupt and kill when stopping a process
    #[serde(with = "duration_ms", rename = "grace_period_ms")]
    pub grace_period: Duration,
    /// Poll interval of the process wait loop
    #[serde(with = "duration_ms", rename = "poll_interval_ms")]
    pub poll_interval: Duration,
    /// How long the daemon waits after SIGTERM before killing a stopping container
    #[serde(with = "duration_ms", rename = "container_stop_timeout_ms")]
    pub container_stop_timeout: Duration,
    /// Host name containers use to reach the orchestrator host
    pub container_host_alias: String,
    /// Environment variable carrying a replica's listen address
    pub listen_address_variable: String,
    /// Pass `--urls=http://localhost:{port}` to executables with a default port
    pub inject_urls_argument: bool,
    /// Docker CLI binary
    pub docker_binary: String,
    /// kubectl binary
    pub kubectl_binary: String,
    /// Image used for cluster workloads that declare none
    pub cluster_placeholder_image: String,
    /// Namespace for cluster objects, the current context's namespace if unset
    pub cluster_namespace: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_capacity: 5000,
            restart_delay: Duration::from_secs(5),
            grace_period: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            container_stop_timeout: Duration::from_secs(5),
            container_host_alias: "host.docker.internal".to_string(),
            listen_address_variable: "URLS".to_string(),
            inject_urls_argument: true,
            docker_binary: "docker".to_string(),
            kubectl_binary: "kubectl".to_string(),
            cluster_placeholder_image: "busybox:latest".to_string(),
            cluster_namespace: None,
        }
    }
}

impl EngineConfig {
    /// Runner options for supervised replicas
    pub(crate) fn supervised_run_options(&self) -> command_executor::RunOptions {
        command_executor::RunOptions::default()
            .capture_output(false)
            .with_poll_interval(self.poll_interval)
            .with_grace_period(self.grace_period)
    }

    /// Runner options for short-lived CLI calls (`docker run -d`, `kubectl ...`)
    pub(crate) fn cli_run_options(&self) -> command_executor::RunOptions {
        command_executor::RunOptions::default()
            .with_poll_interval(self.poll_interval)
            .with_grace_period(self.grace_period)
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.log_capacity, 5000);
        assert_eq!(config.restart_delay, Duration::from_secs(5));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.listen_address_variable, "URLS");
        assert_eq!(config.cluster_placeholder_image, "busybox:latest");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
log_capacity: 10
restart_delay_ms: 250
container_host_alias: host.containers.internal
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.log_capacity, 10);
        assert_eq!(config.restart_delay, Duration::from_millis(250));
        assert_eq!(config.container_host_alias, "host.containers.internal");
        assert_eq!(config.grace_period, Duration::from_secs(5));
        assert!(config.inject_urls_argument);
    }
}

//! Service discovery through environment variables.
//!
//! Every replica receives its own declared configuration followed by one
//! variable per binding of every other service in the application. This module
//! is the only place the variable naming rules live.

use indexmap::IndexMap;

use crate::application::Application;
use crate::config::EngineConfig;
use crate::description::Binding;
use crate::service::Service;

/// Environment variable name for a binding of a service.
///
/// `{SERVICE}_SERVICE` for the default binding, `{SERVICE}_{BINDING}_SERVICE`
/// otherwise. Names are upper-cased with `-` and `.` mapped to `_`.
pub fn discovery_key(service: &str, binding: &Binding) -> String {
    let service = normalize(service);
    match binding.name.as_deref() {
        Some(name) if !binding.is_default() => format!("{}_{}_SERVICE", service, normalize(name)),
        _ => format!("{service}_SERVICE"),
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '-' | '.' => '_',
            c => c.to_ascii_uppercase(),
        })
        .collect()
}

/// Environment for `service` as seen from the orchestrator host
pub fn populate_environment(app: &Application, service: &Service) -> Vec<(String, String)> {
    populate_environment_with_host(app, service, None)
}

/// Environment for `service`, with `localhost` addresses rewritten to `host_override`
pub fn populate_environment_with_host(
    app: &Application,
    service: &Service,
    host_override: Option<&str>,
) -> Vec<(String, String)> {
    let mut env: Vec<(String, String)> = service
        .description()
        .configuration
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for other in app.services() {
        if other.name() == service.name() {
            continue;
        }
        for binding in &other.description().bindings {
            let Some(address) = binding.resolved_address(host_override) else {
                continue;
            };
            let key = discovery_key(other.name(), binding);
            env.push((key.clone(), address));
            if let Some(protocol) = &binding.protocol {
                env.push((format!("{key}_PROTOCOL"), protocol.clone()));
            }
            if let Some(port) = binding.published_port() {
                env.push((format!("{key}_PORT"), port.to_string()));
            }
        }
    }

    env
}

/// Collect environment pairs into a map where later entries win
pub fn environment_map(env: impl IntoIterator<Item = (String, String)>) -> IndexMap<String, String> {
    let mut map = IndexMap::new();
    for (key, value) in env {
        map.insert(key, value);
    }
    map
}

/// `PORT` and the listen-address variable for a service with a default port.
///
/// Processes listen on `http://localhost:{port}`, containers on
/// `http://*:{container_port}`.
pub fn listen_environment(
    service: &Service,
    config: &EngineConfig,
    in_container: bool,
) -> Vec<(String, String)> {
    let Some(binding) = service.description().default_binding() else {
        return Vec::new();
    };
    let (port, address) = if in_container {
        match binding.target_port() {
            Some(port) => (port, format!("http://*:{port}")),
            None => return Vec::new(),
        }
    } else {
        match binding.published_port() {
            Some(port) => (port, format!("http://localhost:{port}")),
            None => return Vec::new(),
        }
    };

    vec![
        ("PORT".to_string(), port.to_string()),
        (config.listen_address_variable.clone(), address),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::ServiceDescription;

    #[test]
    fn test_key_normalization() {
        assert_eq!(discovery_key("cache", &Binding::new()), "CACHE_SERVICE");
        assert_eq!(
            discovery_key("my-api.v2", &Binding::named("grpc-web")),
            "MY_API_V2_GRPC_WEB_SERVICE"
        );
        assert_eq!(
            discovery_key("api", &Binding::named("default")),
            "API_SERVICE"
        );
    }

    #[test]
    fn test_named_binding_with_protocol() {
        let app = Application::new(
            ".",
            vec![
                ServiceDescription::executable("a", "./a")
                    .with_binding(Binding::new().with_address("http://h:1")),
                ServiceDescription::executable("b", "./b").with_binding(
                    Binding::named("metrics")
                        .with_address("http://h:2")
                        .with_protocol("http"),
                ),
            ],
        )
        .unwrap();

        let env = environment_map(populate_environment(&app, app.service("a").unwrap()));
        assert_eq!(env.get("B_METRICS_SERVICE").map(String::as_str), Some("http://h:2"));
        assert_eq!(env.get("B_METRICS_SERVICE_PROTOCOL").map(String::as_str), Some("http"));
        assert!(!env.contains_key("A_SERVICE"));
    }

    #[test]
    fn test_own_configuration_first_in_order() {
        let app = Application::new(
            ".",
            vec![
                ServiceDescription::executable("api", "./api")
                    .with_config("Z_LAST", "1")
                    .with_config("A_FIRST", "2"),
                ServiceDescription::external("db").with_binding(
                    Binding::new()
                        .with_protocol("tcp")
                        .with_port(5432),
                ),
            ],
        )
        .unwrap();

        let env = populate_environment(&app, app.service("api").unwrap());
        let keys: Vec<_> = env.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec!["Z_LAST", "A_FIRST", "DB_SERVICE", "DB_SERVICE_PROTOCOL", "DB_SERVICE_PORT"]
        );
        assert_eq!(env[2].1, "tcp://localhost:5432");
    }

    #[test]
    fn test_host_override_for_containers() {
        let app = Application::new(
            ".",
            vec![
                ServiceDescription::container("web", "nginx"),
                ServiceDescription::external("cache")
                    .with_binding(Binding::new().with_address("localhost:6379")),
            ],
        )
        .unwrap();

        let env = environment_map(populate_environment_with_host(
            &app,
            app.service("web").unwrap(),
            Some("host.docker.internal"),
        ));
        assert_eq!(
            env.get("CACHE_SERVICE").map(String::as_str),
            Some("host.docker.internal:6379")
        );
    }

    #[test]
    fn test_deterministic() {
        let app = Application::new(
            ".",
            vec![
                ServiceDescription::executable("a", "./a"),
                ServiceDescription::executable("b", "./b").with_binding(Binding::new().with_port(1)),
                ServiceDescription::executable("c", "./c").with_binding(Binding::new().with_port(2)),
            ],
        )
        .unwrap();
        let a = app.service("a").unwrap();
        assert_eq!(populate_environment(&app, a), populate_environment(&app, a));
    }

    #[test]
    fn test_listen_environment() {
        let config = EngineConfig::default();
        let service = Service::new(
            ServiceDescription::container("web", "nginx")
                .with_binding(Binding::new().with_port(8080).with_container_port(80)),
            10,
        );

        let host = environment_map(listen_environment(&service, &config, false));
        assert_eq!(host.get("PORT").map(String::as_str), Some("8080"));
        assert_eq!(host.get("URLS").map(String::as_str), Some("http://localhost:8080"));

        let container = environment_map(listen_environment(&service, &config, true));
        assert_eq!(container.get("PORT").map(String::as_str), Some("80"));
        assert_eq!(container.get("URLS").map(String::as_str), Some("http://*:80"));
    }
}

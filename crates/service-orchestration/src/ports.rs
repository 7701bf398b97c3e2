//! Host port allocation for replicas.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, TcpListener};

use crate::Result;
use crate::description::ServiceDescription;

/// Ask the OS for a currently free TCP port on the loopback interface
pub fn allocate_free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}

/// Allocate one host port per replica slot for every binding with a port.
///
/// A single replica keeps the declared port; several replicas each get a free
/// port from the OS. Keys are the declared host ports.
pub(crate) fn allocate_ports(description: &ServiceDescription) -> Result<BTreeMap<u16, Vec<u16>>> {
    let mut port_map = BTreeMap::new();
    for binding in &description.bindings {
        let Some(declared) = binding.published_port() else {
            continue;
        };
        let ports = if description.replicas == 1 {
            vec![declared]
        } else {
            // Hold every listener until all ports are known so they are distinct
            let listeners = (0..description.replicas)
                .map(|_| TcpListener::bind((Ipv4Addr::LOCALHOST, 0)))
                .collect::<std::io::Result<Vec<_>>>()?;
            listeners
                .iter()
                .map(|l| l.local_addr().map(|a| a.port()))
                .collect::<std::io::Result<Vec<_>>>()?
        };
        port_map.insert(declared, ports);
    }
    Ok(port_map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::description::Binding;

    #[test]
    fn test_single_replica_keeps_declared_port() {
        let description = ServiceDescription::container("web", "nginx")
            .with_binding(Binding::new().with_port(8080))
            .with_binding(Binding::named("admin").with_container_port(9000));

        let port_map = allocate_ports(&description).unwrap();
        assert_eq!(port_map.get(&8080), Some(&vec![8080]));
        assert_eq!(port_map.get(&9000), Some(&vec![9000]));
    }

    #[test]
    fn test_replicas_get_distinct_free_ports() {
        let description = ServiceDescription::container("web", "nginx")
            .with_replicas(3)
            .with_binding(Binding::new().with_port(8080));

        let ports = allocate_ports(&description).unwrap().remove(&8080).unwrap();
        assert_eq!(ports.len(), 3);
        assert!(ports.iter().all(|p| *p != 0));

        let mut unique = ports.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_bindings_without_ports_are_skipped() {
        let description = ServiceDescription::container("web", "nginx")
            .with_binding(Binding::new().with_address("http://example.com"));
        assert!(allocate_ports(&description).unwrap().is_empty());
    }
}

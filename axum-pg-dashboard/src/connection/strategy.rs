//! Connection strategy generation
//!
//! Given what the probe found about this process and what the target looks
//! like, produce the ordered list of connection strings worth trying. This is
//! a pure function: no I/O, no logging.

use crate::connection::environment::{EnvironmentFacts, HOST_GATEWAY_ALIAS};
use crate::connection::target::{with_host, with_ssl_preferred, TargetAnalysis, TargetKind};

/// Priority of the SSL-preferred fallback, always last
pub const SSL_PREFERRED_PRIORITY: u32 = 10;

/// One candidate connection string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStrategy {
    pub connection_string: String,
    pub description: String,

    /// Lower runs first
    pub priority: u32,
}

impl ConnectionStrategy {
    fn new(connection_string: impl Into<String>, description: impl Into<String>, priority: u32) -> Self {
        Self {
            connection_string: connection_string.into(),
            description: description.into(),
            priority,
        }
    }
}

/// Build the ordered strategy list for one connect request
///
/// The original string is always priority 1. Host rewrites are added per
/// scenario:
///
/// * container process, loopback target: the host alias, then every
///   gateway address
/// * host process, container-network target: `localhost`
/// * container process, container-network target: the same string again,
///   then the host alias
///
/// External targets without any SSL parameter also get an `sslmode=prefer`
/// variant at the lowest priority.
pub fn generate_strategies(
    facts: &EnvironmentFacts,
    original: &str,
    analysis: &TargetAnalysis,
) -> Vec<ConnectionStrategy> {
    let mut strategies = vec![ConnectionStrategy::new(original, "Original connection string", 1)];

    match (facts.in_container, analysis.kind) {
        (true, TargetKind::Loopback) => {
            if let Some(rewritten) = with_host(original, HOST_GATEWAY_ALIAS) {
                strategies.push(ConnectionStrategy::new(
                    rewritten,
                    format!("Container host alias {}", HOST_GATEWAY_ALIAS),
                    2,
                ));
            }
            for (offset, gateway) in facts.gateway_addresses().iter().enumerate() {
                if let Some(rewritten) = with_host(original, gateway) {
                    strategies.push(ConnectionStrategy::new(
                        rewritten,
                        format!("Container gateway {}", gateway),
                        3 + offset as u32,
                    ));
                }
            }
        }
        (false, TargetKind::ContainerNetwork) => {
            if let Some(rewritten) = with_host(original, "localhost") {
                strategies.push(ConnectionStrategy::new(
                    rewritten,
                    "Container target mapped to localhost",
                    2,
                ));
            }
        }
        (true, TargetKind::ContainerNetwork) => {
            strategies.push(ConnectionStrategy::new(original, "Same container network", 2));
            if let Some(rewritten) = with_host(original, HOST_GATEWAY_ALIAS) {
                strategies.push(ConnectionStrategy::new(
                    rewritten,
                    "Container to container via host",
                    3,
                ));
            }
        }
        _ => {}
    }

    if analysis.kind == TargetKind::External && !analysis.has_ssl_parameter {
        strategies.push(ConnectionStrategy::new(
            with_ssl_preferred(original),
            "External with SSL preferred",
            SSL_PREFERRED_PRIORITY,
        ));
    }

    strategies.sort_by_key(|strategy| strategy.priority);
    strategies
}

/// Scenario name and remediation steps logged when every strategy failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TroubleshootingGuide {
    pub scenario: &'static str,
    pub steps: &'static [&'static str],
}

pub fn troubleshooting_hints(facts: &EnvironmentFacts, analysis: &TargetAnalysis) -> Option<TroubleshootingGuide> {
    match (facts.in_container, analysis.kind) {
        (true, TargetKind::Loopback) => Some(TroubleshootingGuide {
            scenario: "Containerized application, database on host loopback",
            steps: &[
                "Ensure PostgreSQL is running on the host machine",
                "Set listen_addresses = '*' in postgresql.conf",
                "Allow the container network in pg_hba.conf, e.g. 'host all all 0.0.0.0/0 md5'",
                "Restart PostgreSQL",
                "Verify from the container with: psql -h host.docker.internal -p 5432 -U <user>",
            ],
        }),
        (false, TargetKind::ContainerNetwork) => Some(TroubleshootingGuide {
            scenario: "Host application, database in a container",
            steps: &[
                "Ensure the container is running and publishes its port, e.g. docker run -p 5432:5432 postgres",
                "Use localhost:5432 instead of the container address",
                "Check the port mapping with: docker ps",
                "Verify with: psql -h localhost -p 5432 -U <user>",
            ],
        }),
        (true, TargetKind::ContainerNetwork) => Some(TroubleshootingGuide {
            scenario: "Containerized application, database in another container",
            steps: &[
                "Put both containers on the same network, e.g. with Docker Compose",
                "Use the service name as host name",
                "Ensure the containers can reach each other",
                "Inspect networks with: docker network ls",
            ],
        }),
        (_, TargetKind::External) => Some(TroubleshootingGuide {
            scenario: "External database",
            steps: &[
                "Check network connectivity to the database host",
                "Verify credentials and permissions",
                "Check firewalls and security groups",
                "Try an explicit sslmode in the connection string",
            ],
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn facts(in_container: bool) -> EnvironmentFacts {
        EnvironmentFacts {
            in_container,
            default_gateway: Some(Ipv4Addr::new(172, 17, 0, 1)),
            platform: "linux".into(),
        }
    }

    fn strategies_for(in_container: bool, connection_string: &str) -> Vec<ConnectionStrategy> {
        let analysis = TargetAnalysis::from_connection_string(connection_string);
        generate_strategies(&facts(in_container), connection_string, &analysis)
    }

    #[test]
    fn external_target_gets_single_ssl_fallback() {
        let original = "postgres://u:p@db.example.com:5432/app";
        let strategies = strategies_for(false, original);

        assert_eq!(strategies.len(), 2);
        assert_eq!(strategies[0].connection_string, original);
        assert_eq!(strategies[0].priority, 1);
        assert_eq!(
            strategies[1].connection_string,
            "postgres://u:p@db.example.com:5432/app?sslmode=prefer"
        );
        assert_eq!(strategies[1].priority, SSL_PREFERRED_PRIORITY);

        // Running in a container does not change an external target
        assert_eq!(strategies_for(true, original), strategies);
    }

    #[test]
    fn external_target_with_ssl_parameter_gets_no_fallback() {
        let strategies = strategies_for(false, "postgres://u@db.example.com/app?sslmode=disable");
        assert_eq!(strategies.len(), 1);
    }

    #[test]
    fn container_to_loopback_tries_host_alias_then_gateways() {
        let strategies = strategies_for(true, "postgres://u:p@localhost:5432/app");
        let hosts: Vec<_> = strategies
            .iter()
            .map(|strategy| (strategy.priority, strategy.connection_string.as_str()))
            .collect();

        assert_eq!(
            hosts,
            vec![
                (1, "postgres://u:p@localhost:5432/app"),
                (2, "postgres://u:p@host.docker.internal:5432/app"),
                (3, "postgres://u:p@gateway.docker.internal:5432/app"),
                (4, "postgres://u:p@172.17.0.1:5432/app"),
                (5, "postgres://u:p@172.18.0.1:5432/app"),
                (6, "postgres://u:p@172.19.0.1:5432/app"),
            ]
        );
    }

    #[test]
    fn host_to_container_maps_to_localhost() {
        let strategies = strategies_for(false, "postgres://u:p@172.20.0.3:5432/app");
        assert_eq!(strategies.len(), 2);
        assert_eq!(strategies[1].connection_string, "postgres://u:p@localhost:5432/app");
    }

    #[test]
    fn container_to_container_retries_then_goes_via_host() {
        let original = "postgres://u:p@172.20.0.3:5432/app";
        let strategies = strategies_for(true, original);
        assert_eq!(strategies.len(), 3);
        assert_eq!(strategies[1].connection_string, original);
        assert_eq!(
            strategies[2].connection_string,
            "postgres://u:p@host.docker.internal:5432/app"
        );
    }

    #[test]
    fn host_process_to_loopback_only_tries_original() {
        assert_eq!(strategies_for(false, "postgres://u:p@127.0.0.1/app").len(), 1);
    }

    #[test]
    fn priorities_are_ascending() {
        let strategies = strategies_for(true, "postgres://u:p@localhost/app");
        assert!(strategies.windows(2).all(|pair| pair[0].priority <= pair[1].priority));
    }

    #[test]
    fn guidance_matches_scenario() {
        let analysis = TargetAnalysis::from_connection_string("postgres://u@localhost/app");
        let guide = troubleshooting_hints(&facts(true), &analysis).unwrap();
        assert!(guide.scenario.contains("host loopback"));
        assert!(troubleshooting_hints(&facts(false), &analysis).is_none());
    }
}

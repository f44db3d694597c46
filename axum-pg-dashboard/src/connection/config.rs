//! Pool sizing, timeouts and per-strategy connect options

use crate::connection::environment::EnvironmentFacts;
use crate::connection::strategy::ConnectionStrategy;
use crate::connection::target::TargetAnalysis;
use crate::database::traits::DatabaseError;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Settings shared by every connection attempt
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub max_connections: u32,
    pub min_connections: u32,

    /// Idle connections to loopback/container targets are closed after this
    pub idle_timeout: Duration,

    /// Time allowed to open the first connection to a loopback/container target
    pub local_connect_timeout: Duration,

    /// Time allowed to open the first connection to an external target
    pub remote_connect_timeout: Duration,

    /// Server-side `statement_timeout` for every session
    pub statement_timeout: Duration,

    /// Sessions are named `<prefix>-docker` or `<prefix>-local`
    pub application_name_prefix: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            idle_timeout: Duration::from_secs(30),
            local_connect_timeout: Duration::from_secs(5),
            remote_connect_timeout: Duration::from_secs(15),
            statement_timeout: Duration::from_secs(60),
            application_name_prefix: "pg-dashboard".to_string(),
        }
    }
}

/// Everything needed to build the pool for one strategy
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub connect_options: PgConnectOptions,
    pub ssl_mode: PgSslMode,
    pub application_name: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Option<Duration>,

    /// Hold a warm connection and check it before every use
    pub keep_alive: bool,
}

impl PoolConfig {
    /// Derive the pool settings for a strategy
    ///
    /// `analysis` describes the original target, so every strategy of one
    /// connect request gets the same timeouts and SSL requirement.
    pub fn for_target(
        config: &ResolverConfig,
        strategy: &ConnectionStrategy,
        analysis: &TargetAnalysis,
        facts: &EnvironmentFacts,
    ) -> Result<Self, DatabaseError> {
        let parsed = PgConnectOptions::from_str(&strategy.connection_string).map_err(|error| {
            DatabaseError::ConnectionAttempt {
                strategy: strategy.description.clone(),
                message: error.to_string(),
            }
        })?;

        let ssl_mode = if analysis.requires_ssl {
            PgSslMode::Require
        } else if let Some(mode) = explicit_ssl_mode(&strategy.connection_string) {
            mode
        } else {
            PgSslMode::Disable
        };

        let application_name = format!(
            "{}-{}",
            config.application_name_prefix,
            if facts.in_container { "docker" } else { "local" }
        );

        let statement_timeout = config.statement_timeout.as_millis().to_string();
        let connect_options = parsed
            .ssl_mode(ssl_mode)
            .application_name(&application_name)
            .options([("statement_timeout", statement_timeout.as_str())]);

        let local = analysis.is_local();

        Ok(Self {
            connect_options,
            ssl_mode,
            application_name,
            max_connections: config.max_connections.max(1),
            min_connections: config.min_connections.min(config.max_connections.max(1)),
            connect_timeout: if local {
                config.local_connect_timeout
            } else {
                config.remote_connect_timeout
            },
            idle_timeout: if local { Some(config.idle_timeout) } else { None },
            keep_alive: !local,
        })
    }

    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_connections)
            .min_connections(if self.keep_alive {
                self.min_connections.max(1)
            } else {
                self.min_connections
            })
            .acquire_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
            .test_before_acquire(self.keep_alive)
    }
}

/// The `sslmode` a connection string asks for, if it names a known one
fn explicit_ssl_mode(connection_string: &str) -> Option<PgSslMode> {
    let url = Url::parse(connection_string).ok()?;
    let (_, mode) = url
        .query_pairs()
        .find(|(key, _)| key == "sslmode" || key == "ssl-mode")?;
    PgSslMode::from_str(&mode).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy(connection_string: &str) -> ConnectionStrategy {
        ConnectionStrategy {
            connection_string: connection_string.to_string(),
            description: "test".to_string(),
            priority: 1,
        }
    }

    fn config_for(connection_string: &str, in_container: bool) -> PoolConfig {
        let analysis = TargetAnalysis::from_connection_string(connection_string);
        let facts = EnvironmentFacts {
            in_container,
            ..EnvironmentFacts::host()
        };
        PoolConfig::for_target(
            &ResolverConfig::default(),
            &strategy(connection_string),
            &analysis,
            &facts,
        )
        .unwrap()
    }

    #[test]
    fn local_targets_use_short_timeout_without_keep_alive() {
        let config = config_for("postgres://u:p@localhost:5432/app", false);
        assert_eq!(config.connect_timeout, Duration::from_secs(5));
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(30)));
        assert!(!config.keep_alive);
        assert!(matches!(config.ssl_mode, PgSslMode::Disable));
        assert_eq!(config.application_name, "pg-dashboard-local");
    }

    #[test]
    fn remote_targets_use_long_timeout_with_keep_alive() {
        let config = config_for("postgres://u:p@db.example.com/app", true);
        assert_eq!(config.connect_timeout, Duration::from_secs(15));
        assert_eq!(config.idle_timeout, None);
        assert!(config.keep_alive);
        assert_eq!(config.application_name, "pg-dashboard-docker");
    }

    #[test]
    fn ssl_follows_target_and_strategy() {
        let required = config_for("postgres://u@db.example.com/app?sslmode=require", false);
        assert!(matches!(required.ssl_mode, PgSslMode::Require));

        let preferred = config_for("postgres://u@db.example.com/app?sslmode=prefer", false);
        assert!(matches!(preferred.ssl_mode, PgSslMode::Prefer));
    }

    #[test]
    fn unparsable_strategy_is_an_attempt_failure() {
        let analysis = TargetAnalysis::from_connection_string("nonsense");
        let error = PoolConfig::for_target(
            &ResolverConfig::default(),
            &strategy("nonsense"),
            &analysis,
            &EnvironmentFacts::host(),
        )
        .unwrap_err();
        assert!(matches!(error, DatabaseError::ConnectionAttempt { .. }));
    }
}

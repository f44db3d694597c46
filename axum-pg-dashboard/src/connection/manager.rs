//! Connection lifecycle
//!
//! Owns the single live pool. State moves `Idle -> Resolving -> Connected |
//! Failed`; a connect always closes the previous pool first, and only one
//! connect or disconnect runs at a time. Table operations never wait for an
//! in-flight connect: [`ConnectionManager::engine`] fails immediately unless
//! the state is `Connected`.

use crate::connection::config::{PoolConfig, ResolverConfig};
use crate::connection::environment::{EnvironmentFacts, EnvironmentProbe};
use crate::connection::strategy::{generate_strategies, troubleshooting_hints, ConnectionStrategy};
use crate::connection::target::{redact_connection_string, ConnectionDescriptor, TargetAnalysis};
use crate::database::engine::DataEngine;
use crate::database::postgres::PgExecutor;
use crate::database::traits::{DatabaseError, StatementExecutor};
use crate::schema::Row;
use crate::statement::Statement;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

const VERIFY_QUERY: &str =
    "SELECT version() AS version, current_database()::text AS database, current_user::text AS username";

const EXTENSION_QUERY: &str = "SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = 'pg_stat_statements') AS available";

const MONITOR_PRIVILEGE_QUERY: &str =
    "SELECT has_table_privilege(current_user, 'pg_stat_activity', 'SELECT') AS available";

/// Details of the server behind the live pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub version: String,
    pub database: String,
    pub user: String,
    pub has_pg_stat_statements: bool,

    /// Whether `pg_stat_activity` is readable
    pub can_monitor: bool,
}

/// The live pool and how it was reached
pub struct ActiveConnection {
    pub engine: Arc<DataEngine<PgExecutor>>,
    pub strategy: ConnectionStrategy,
    pub server: ServerInfo,
}

pub enum ConnectionState {
    Idle,
    Resolving,
    Connected(ActiveConnection),
    Failed { attempts: usize },
}

impl ConnectionState {
    pub fn label(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Resolving => "resolving",
            ConnectionState::Connected(_) => "connected",
            ConnectionState::Failed { .. } => "failed",
        }
    }
}

/// Snapshot of the connection state for callers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: &'static str,

    /// Description of the strategy that succeeded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strategy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerInfo>,

    /// Strategies tried by the last failed connect
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempts: Option<usize>,
}

/// Resolves connection descriptors into a live pool
pub struct ConnectionManager {
    config: ResolverConfig,

    /// Fixed environment facts; probed on every connect when absent
    environment: Option<EnvironmentFacts>,

    state: RwLock<ConnectionState>,
    connect_lock: Mutex<()>,
}

impl ConnectionManager {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            environment: None,
            state: RwLock::new(ConnectionState::Idle),
            connect_lock: Mutex::new(()),
        }
    }

    /// Use the given facts instead of probing the process environment
    pub fn with_environment(mut self, facts: EnvironmentFacts) -> Self {
        self.environment = Some(facts);
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    fn environment_facts(&self) -> EnvironmentFacts {
        match &self.environment {
            Some(facts) => facts.clone(),
            None => EnvironmentProbe::system().detect(),
        }
    }

    /// Connect to the database, trying every generated strategy in order
    ///
    /// The previous pool (if any) is closed before the first attempt. The
    /// first strategy whose pool opens a connection and answers the
    /// verification query becomes the live pool.
    ///
    /// # Errors
    ///
    /// * `InvalidDescriptor` - the descriptor is incomplete; state is unchanged
    /// * `ConnectionFailed` - every strategy failed; state is `Failed`
    pub async fn connect(&self, descriptor: &ConnectionDescriptor) -> Result<ServerInfo, DatabaseError> {
        let _guard = self.connect_lock.lock().await;
        let connection_string = descriptor.to_connection_string()?;

        self.close_current().await;
        *self.state.write().await = ConnectionState::Resolving;

        let facts = self.environment_facts();
        let analysis = TargetAnalysis::from_connection_string(&connection_string);
        info!(
            in_container = facts.in_container,
            platform = %facts.platform,
            target_kind = ?analysis.kind,
            host = %analysis.host,
            port = analysis.port,
            ssl_required = analysis.requires_ssl,
            "analyzing connection target"
        );

        let strategies = generate_strategies(&facts, &connection_string, &analysis);
        let total = strategies.len();

        for (index, strategy) in strategies.into_iter().enumerate() {
            info!(
                attempt = index + 1,
                total,
                strategy = %strategy.description,
                connection = %redact_connection_string(&strategy.connection_string),
                "trying connection strategy"
            );

            match self.try_strategy(&strategy, &analysis, &facts).await {
                Ok((executor, server)) => {
                    info!(
                        strategy = %strategy.description,
                        database = %server.database,
                        user = %server.user,
                        version = %server.version,
                        pg_stat_statements = server.has_pg_stat_statements,
                        can_monitor = server.can_monitor,
                        "database connection established"
                    );

                    *self.state.write().await = ConnectionState::Connected(ActiveConnection {
                        engine: Arc::new(DataEngine::new(executor)),
                        strategy,
                        server: server.clone(),
                    });
                    return Ok(server);
                }
                Err(error) => {
                    warn!(strategy = %strategy.description, %error, "connection strategy failed");
                }
            }
        }

        warn!(attempts = total, "all connection strategies failed");
        if let Some(guide) = troubleshooting_hints(&facts, &analysis) {
            warn!(scenario = guide.scenario, "troubleshooting");
            for (number, step) in guide.steps.iter().enumerate() {
                warn!("  {}. {}", number + 1, step);
            }
        }
        warn!(
            connection = %redact_connection_string(&connection_string),
            host = %analysis.host,
            port = analysis.port,
            in_container = facts.in_container,
            platform = %facts.platform,
            "connection details"
        );

        *self.state.write().await = ConnectionState::Failed { attempts: total };
        Err(DatabaseError::ConnectionFailed { attempts: total })
    }

    /// Open a pool for one strategy and verify it; the pool is closed on failure
    async fn try_strategy(
        &self,
        strategy: &ConnectionStrategy,
        analysis: &TargetAnalysis,
        facts: &EnvironmentFacts,
    ) -> Result<(PgExecutor, ServerInfo), DatabaseError> {
        let pool_config = PoolConfig::for_target(&self.config, strategy, analysis, facts)?;
        debug!(
            ssl_mode = ?pool_config.ssl_mode,
            connect_timeout_ms = pool_config.connect_timeout.as_millis() as u64,
            keep_alive = pool_config.keep_alive,
            application_name = %pool_config.application_name,
            "pool configuration"
        );

        let pool = pool_config
            .pool_options()
            .connect_with(pool_config.connect_options.clone())
            .await
            .map_err(|error| DatabaseError::ConnectionAttempt {
                strategy: strategy.description.clone(),
                message: error.to_string(),
            })?;

        let executor = PgExecutor::new(pool);
        match verify(&executor).await {
            Ok(server) => Ok((executor, server)),
            Err(error) => {
                executor.pool().close().await;
                Err(DatabaseError::ConnectionAttempt {
                    strategy: strategy.description.clone(),
                    message: error.to_string(),
                })
            }
        }
    }

    /// Close the live pool, if any, and return to `Idle`
    pub async fn disconnect(&self) {
        let _guard = self.connect_lock.lock().await;
        self.close_current().await;
        info!("disconnected from database");
    }

    async fn close_current(&self) {
        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, ConnectionState::Idle)
        };

        if let ConnectionState::Connected(active) = previous {
            debug!(strategy = %active.strategy.description, "closing connection pool");
            active.engine.executor().pool().close().await;
        }
    }

    pub async fn status(&self) -> ConnectionStatus {
        let state = self.state.read().await;
        let mut status = ConnectionStatus {
            connected: false,
            state: state.label(),
            strategy: None,
            server: None,
            attempts: None,
        };

        match &*state {
            ConnectionState::Connected(active) => {
                status.connected = true;
                status.strategy = Some(active.strategy.description.clone());
                status.server = Some(active.server.clone());
            }
            ConnectionState::Failed { attempts } => status.attempts = Some(*attempts),
            ConnectionState::Idle | ConnectionState::Resolving => {}
        }

        status
    }

    /// The engine over the live pool
    ///
    /// Fails with `ConnectionUnavailable` unless connected, without waiting
    /// for a connect in progress.
    pub async fn engine(&self) -> Result<Arc<DataEngine<PgExecutor>>, DatabaseError> {
        match &*self.state.read().await {
            ConnectionState::Connected(active) => Ok(active.engine.clone()),
            _ => Err(DatabaseError::ConnectionUnavailable),
        }
    }
}

/// Run the verification query, then collect optional server details
async fn verify<E: StatementExecutor>(executor: &E) -> Result<ServerInfo, DatabaseError> {
    let output = executor.query(&Statement::new(VERIFY_QUERY)).await?;
    let row = output
        .rows
        .into_iter()
        .next()
        .ok_or_else(|| DatabaseError::Execution("Verification query returned no rows".to_string()))?;

    let (has_pg_stat_statements, can_monitor) = tokio::join!(
        optional_flag(executor, EXTENSION_QUERY),
        optional_flag(executor, MONITOR_PRIVILEGE_QUERY),
    );

    Ok(ServerInfo {
        version: text_field(&row, "version"),
        database: text_field(&row, "database"),
        user: text_field(&row, "username"),
        has_pg_stat_statements,
        can_monitor,
    })
}

/// A boolean probe; any failure reads as `false`
async fn optional_flag<E: StatementExecutor>(executor: &E, sql: &str) -> bool {
    match executor.query(&Statement::new(sql)).await {
        Ok(output) => output
            .rows
            .first()
            .and_then(|row| row.get("available"))
            .and_then(Value::as_bool)
            .unwrap_or(false),
        Err(error) => {
            debug!(%error, "server detail probe failed");
            false
        }
    }
}

fn text_field(row: &Row, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

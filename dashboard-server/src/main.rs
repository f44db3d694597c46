use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use axum_pg_dashboard::{ConnectionDescriptor, ConnectionManager, DashboardLayer, ResolverConfig};
use clap::Parser;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Standalone server for the PostgreSQL dashboard API
#[derive(Debug, Parser)]
#[command(name = "dashboard-server", version, about)]
struct Args {
    /// Address to listen on
    #[arg(long, env = "DASHBOARD_BIND", default_value = "127.0.0.1:3000")]
    bind: SocketAddr,

    /// Path prefix of the API; endpoints live under `{base_path}/api`
    #[arg(long, env = "DASHBOARD_BASE_PATH", default_value = "")]
    base_path: String,

    /// Connect to this database at startup
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[arg(long, env = "DASHBOARD_MAX_CONNECTIONS", default_value_t = 5)]
    max_connections: u32,

    /// Connect timeout for loopback and container targets
    #[arg(long, env = "DASHBOARD_LOCAL_CONNECT_TIMEOUT_SECS", default_value_t = 5)]
    local_connect_timeout_secs: u64,

    /// Connect timeout for external targets
    #[arg(long, env = "DASHBOARD_REMOTE_CONNECT_TIMEOUT_SECS", default_value_t = 15)]
    remote_connect_timeout_secs: u64,

    #[arg(long, env = "DASHBOARD_STATEMENT_TIMEOUT_SECS", default_value_t = 60)]
    statement_timeout_secs: u64,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, env = "DASHBOARD_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

impl Args {
    fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            max_connections: self.max_connections,
            local_connect_timeout: Duration::from_secs(self.local_connect_timeout_secs),
            remote_connect_timeout: Duration::from_secs(self.remote_connect_timeout_secs),
            statement_timeout: Duration::from_secs(self.statement_timeout_secs),
            ..ResolverConfig::default()
        }
    }
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},sqlx=warn,hyper=warn", log_level)));

    tracing_subscriber::fmt().with_env_filter(filter).compact().init();
}

#[tokio::main]
async fn main() -> axum_pg_dashboard::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let manager = Arc::new(ConnectionManager::new(args.resolver_config()));

    if let Some(database_url) = args.database_url.clone() {
        match manager.connect(&ConnectionDescriptor::Url(database_url)).await {
            Ok(server) => info!(database = %server.database, user = %server.user, "connected at startup"),
            Err(error) => warn!(%error, "starting without a database connection"),
        }
    }

    let app = Router::new()
        .route("/health", get(health_handler))
        .with_state(manager.clone())
        .merge(DashboardLayer::new(args.base_path.clone(), manager).into_router())
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(address = %args.bind, api = %format!("{}/api", args.base_path.trim_end_matches('/')), "server listening");

    axum::serve(listener, app).await?;
    Ok(())
}

/// Process health plus the current connection state
///
/// 503 while no database is connected.
async fn health_handler(State(manager): State<Arc<ConnectionManager>>) -> impl IntoResponse {
    let status = manager.status().await;
    let code = if status.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, Json(json!({ "healthy": status.connected, "database": status })))
}

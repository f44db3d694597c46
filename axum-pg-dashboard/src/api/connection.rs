//! Connection lifecycle endpoints

use axum::{
    extract::State,
    http::StatusCode,
    response::{Json, Response},
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use super::{failure, success, success_with_message};
use crate::connection::{ConnectionDescriptor, ConnectionManager};
use crate::database::traits::DatabaseError;

/// Body of a connect request
///
/// Either `connectionString` or the discrete parts must be given; the
/// connection string wins when both are present.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectRequest {
    pub connection_string: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ConnectRequest {
    pub fn into_descriptor(self) -> ConnectionDescriptor {
        match self.connection_string.filter(|value| !value.trim().is_empty()) {
            Some(connection_string) => ConnectionDescriptor::Url(connection_string),
            None => ConnectionDescriptor::Parts {
                host: self.host.unwrap_or_default(),
                port: self.port,
                database: self.database.unwrap_or_default(),
                username: self.username.unwrap_or_default(),
                password: self.password,
            },
        }
    }
}

/// Handler for POST /database/connect
///
/// Replaces any live connection. Each generated strategy is tried in
/// priority order until one verifies.
pub async fn connect_handler(
    State(manager): State<Arc<ConnectionManager>>,
    Json(request): Json<ConnectRequest>,
) -> Response {
    match manager.connect(&request.into_descriptor()).await {
        Ok(server) => success_with_message(server, "Successfully connected to database"),
        Err(DatabaseError::InvalidDescriptor(message)) => failure(StatusCode::BAD_REQUEST, message),
        Err(error) => {
            warn!(%error, "connect request failed");
            failure(
                StatusCode::BAD_REQUEST,
                format!("Failed to connect to database: {}", error),
            )
        }
    }
}

/// Handler for DELETE /database/disconnect
pub async fn disconnect_handler(State(manager): State<Arc<ConnectionManager>>) -> Response {
    manager.disconnect().await;
    success_with_message(json!({ "connected": false }), "Disconnected from database")
}

/// Handler for GET /database/status
pub async fn status_handler(State(manager): State<Arc<ConnectionManager>>) -> Response {
    success(manager.status().await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_string_takes_precedence() {
        let request: ConnectRequest = serde_json::from_value(json!({
            "connectionString": "postgres://u@db/app",
            "host": "ignored",
        }))
        .unwrap();

        assert_eq!(
            request.into_descriptor(),
            ConnectionDescriptor::Url("postgres://u@db/app".into())
        );
    }

    #[test]
    fn parts_are_used_without_connection_string() {
        let request: ConnectRequest = serde_json::from_value(json!({
            "connectionString": "  ",
            "host": "db",
            "port": 5433,
            "database": "app",
            "username": "svc",
        }))
        .unwrap();

        match request.into_descriptor() {
            ConnectionDescriptor::Parts { host, port, database, username, password } => {
                assert_eq!(host, "db");
                assert_eq!(port, Some(5433));
                assert_eq!(database, "app");
                assert_eq!(username, "svc");
                assert_eq!(password, None);
            }
            other => panic!("unexpected descriptor {:?}", other),
        }
    }
}

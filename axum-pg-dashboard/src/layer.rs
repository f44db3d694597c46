//! DashboardLayer - Axum integration layer
//!
//! Mounts the dashboard API under a base path of an existing application.

use crate::api::create_api_router;
use crate::connection::{ConnectionManager, ResolverConfig};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Layer for integrating the dashboard API into an Axum application
///
/// # Example
///
/// ```rust,no_run
/// use axum::Router;
/// use axum_pg_dashboard::{ConnectionDescriptor, DashboardLayer};
///
/// # async fn example() {
/// let dashboard = DashboardLayer::with_defaults("/dashboard");
/// dashboard
///     .manager()
///     .connect(&ConnectionDescriptor::Url("postgres://app@localhost/app".into()))
///     .await
///     .ok();
/// let app: Router = Router::new().merge(dashboard.into_router());
/// # }
/// ```
pub struct DashboardLayer {
    base_path: String,
    manager: Arc<ConnectionManager>,
}

impl DashboardLayer {
    /// Create a dashboard at the given base path
    ///
    /// # Arguments
    ///
    /// * `base_path` - The URL path the API is mounted under (e.g., "/dashboard")
    /// * `manager` - Connection manager shared with the rest of the application
    pub fn new(base_path: impl Into<String>, manager: Arc<ConnectionManager>) -> Self {
        Self {
            base_path: base_path.into(),
            manager,
        }
    }

    /// Create a dashboard with a fresh, disconnected manager
    pub fn with_defaults(base_path: impl Into<String>) -> Self {
        Self::new(base_path, Arc::new(ConnectionManager::new(ResolverConfig::default())))
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Convert into an Axum Router that can be merged
    ///
    /// The API is served at `{base_path}/api/*` with permissive CORS.
    pub fn into_router(self) -> Router {
        let api_router = create_api_router(self.manager);

        Router::new()
            .nest(&format!("{}/api", self.base_path.trim_end_matches('/')), api_router)
            .layer(CorsLayer::permissive())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::EnvironmentFacts;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[tokio::test]
    async fn api_is_nested_under_base_path() {
        let manager = ConnectionManager::new(ResolverConfig::default()).with_environment(EnvironmentFacts::host());
        let router = DashboardLayer::new("/dashboard/", Arc::new(manager)).into_router();

        let response = router
            .clone()
            .oneshot(Request::get("/dashboard/api/database/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["data"]["connected"], false);

        let response = router
            .oneshot(Request::get("/database/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}

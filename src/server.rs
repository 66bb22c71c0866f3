//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::error::{GatekeeperError, Result};
use crate::gate::{enforce, RateLimitGate};
use crate::ratelimit::RateLimiter;

/// HTTP server exposing the gated service endpoints.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    /// The rate limiter instance
    rate_limiter: Arc<RateLimiter>,
}

impl HttpServer {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, rate_limiter: Arc<RateLimiter>) -> Self {
        Self { addr, rate_limiter }
    }

    /// Build the router. Every gate is wired here, so an unknown policy name
    /// fails before the listener is bound.
    pub fn router(&self) -> Result<Router> {
        let limiter = &self.rate_limiter;

        let health: Router<Arc<RateLimiter>> = Router::new()
            .route("/health", get(health))
            .route_layer(from_fn_with_state(
                RateLimitGate::new(limiter.clone(), "api")?,
                enforce,
            ));

        let policies: Router<Arc<RateLimiter>> = Router::new()
            .route("/policies", get(list_policies))
            .route_layer(from_fn_with_state(
                RateLimitGate::new(limiter.clone(), "default")?,
                enforce,
            ));

        Ok(Router::new()
            .merge(health)
            .merge(policies)
            .with_state(limiter.clone())
            .layer(TraceLayer::new_for_http()))
    }

    /// Start the HTTP server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let router = self.router()?;
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        info!(
            addr = %self.addr,
            backend = self.rate_limiter.backend_kind(),
            "Starting HTTP server with graceful shutdown"
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await
            .map_err(|e| {
                error!(error = %e, "HTTP server failed");
                GatekeeperError::Server(e.to_string())
            })
    }
}

async fn health(State(limiter): State<Arc<RateLimiter>>) -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "version": env!("CARGO_PKG_VERSION"),
            "rateLimit": {
                "enabled": true,
                "provider": limiter.backend_kind(),
            },
        },
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PolicyView {
    name: String,
    quota: u64,
    window_ms: u64,
}

async fn list_policies(State(limiter): State<Arc<RateLimiter>>) -> Json<Vec<PolicyView>> {
    Json(
        limiter
            .registry()
            .iter()
            .map(|p| PolicyView {
                name: p.name().to_string(),
                quota: p.quota(),
                window_ms: p.window_ms(),
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{Policy, PolicyRegistry};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
        let response = router
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .header("x-real-ip", "10.1.1.1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let server = HttpServer::new(addr, Arc::new(RateLimiter::new()));
        assert!(server.router().is_ok());
    }

    #[test]
    fn test_router_requires_policies() {
        let registry = PolicyRegistry::from_policies([Policy::new("api", 1, 1_000).unwrap()]);
        let limiter = RateLimiter::with_local_counter(Arc::new(registry));
        let server = HttpServer::new("127.0.0.1:0".parse().unwrap(), Arc::new(limiter));

        assert!(matches!(server.router().err(), Some(GatekeeperError::Config(_))));
    }

    #[tokio::test]
    async fn test_health_reports_provider() {
        let server = HttpServer::new("127.0.0.1:0".parse().unwrap(), Arc::new(RateLimiter::new()));
        let (status, body) = get_json(server.router().unwrap(), "/health").await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["rateLimit"]["provider"], "memory");
    }

    #[tokio::test]
    async fn test_policies_listing() {
        let server = HttpServer::new("127.0.0.1:0".parse().unwrap(), Arc::new(RateLimiter::new()));
        let (status, body) = get_json(server.router().unwrap(), "/policies").await;

        assert_eq!(status, StatusCode::OK);
        let policies = body.as_array().unwrap();
        assert_eq!(policies.len(), 7);
        assert!(policies
            .iter()
            .any(|p| p["name"] == "auth" && p["quota"] == 5 && p["windowMs"] == 60_000));
    }

    #[tokio::test]
    async fn test_health_is_rate_limited() {
        let registry = PolicyRegistry::from_policies([
            Policy::new("api", 2, 60_000).unwrap(),
            Policy::new("default", 2, 60_000).unwrap(),
        ]);
        let limiter = Arc::new(RateLimiter::with_local_counter(Arc::new(registry)));
        let router = HttpServer::new("127.0.0.1:0".parse().unwrap(), limiter)
            .router()
            .unwrap();

        assert_eq!(get_json(router.clone(), "/health").await.0, StatusCode::OK);
        assert_eq!(get_json(router.clone(), "/health").await.0, StatusCode::OK);
        let (status, body) = get_json(router.clone(), "/health").await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Rate limit exceeded");

        // Separate policy, separate quota
        assert_eq!(get_json(router, "/policies").await.0, StatusCode::OK);
    }
}

//! Reference remote document server.
//!
//! A small REST store that the sync engine's HTTP remote talks to.
//!
//! # Configuration
//!
//! Environment variables:
//! - `FITSYNC_SERVER_PORT`: Port to listen on (default: 8080)
//! - `FITSYNC_SERVER_DATA_DIR`: Directory to store documents (default: ~/.local/share/fitsync-server)
//! - `FITSYNC_SERVER_CONFIG`: Path to config file (default: ~/.config/fitsync-server/config.yaml)
//!
//! # Config File Format
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "coach"
//! ```
//!
//! # Endpoints
//!
//! - `GET /health`: Health check (no auth required)
//! - `GET|PUT|PATCH|DELETE /collections/{collection}/{id}`: Single document
//! - `POST /collections/{collection}/query`: Documents matching `{"filters": [...]}`

pub mod auth;
pub mod routes;
pub mod storage;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use auth::{ApiKeyStore, AuthUser};
pub use storage::{DocumentStore, StorageError};

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Port to listen on
    pub port: u16,
    /// Directory holding one JSON file per collection
    pub data_dir: PathBuf,
    /// Path to config file with API keys
    pub config_path: PathBuf,
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let port = std::env::var("FITSYNC_SERVER_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(8080);

        let data_dir = std::env::var("FITSYNC_SERVER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::data_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("fitsync-server")
            });

        let config_path = std::env::var("FITSYNC_SERVER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("."))
                    .join("fitsync-server")
                    .join("config.yaml")
            });

        Self {
            port,
            data_dir,
            config_path,
        }
    }
}

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub api_keys: Arc<ApiKeyStore>,
    pub store: Arc<DocumentStore>,
}

impl AppState {
    pub fn new(api_keys: ApiKeyStore, store: DocumentStore) -> Self {
        Self {
            api_keys: Arc::new(api_keys),
            store: Arc::new(store),
        }
    }
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new().route("/health", get(routes::health));

    let protected_routes = Router::new()
        .route(
            "/collections/{collection}/query",
            post(routes::query_documents),
        )
        .route(
            "/collections/{collection}/{id}",
            get(routes::get_document)
                .put(routes::put_document)
                .patch(routes::patch_document)
                .delete(routes::delete_document),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::auth_middleware,
        ));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use fitsync_core::{Filter, HttpRemoteStore, RemoteError, RemoteStore};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const KEY: &str = "test-key";

    fn state(temp: &TempDir) -> AppState {
        AppState::new(
            ApiKeyStore::default().with_key(KEY, "coach"),
            DocumentStore::new(temp.path()),
        )
    }

    fn doc(value: Value) -> fitsync_core::Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_health_needs_no_auth() {
        let temp = TempDir::new().unwrap();
        let response = router(state(&temp))
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_documents_require_valid_key() {
        let temp = TempDir::new().unwrap();
        let app = router(state(&temp));

        let missing = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/collections/workoutLogs/w1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

        let wrong_scheme = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/collections/workoutLogs/w1")
                    .header(header::AUTHORIZATION, format!("Basic {}", KEY))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong_scheme.status(), StatusCode::UNAUTHORIZED);

        let wrong_key = app
            .oneshot(
                Request::builder()
                    .uri("/collections/workoutLogs/w1")
                    .header(header::AUTHORIZATION, "Bearer nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(wrong_key.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_document_is_404() {
        let temp = TempDir::new().unwrap();
        let response = router(state(&temp))
            .oneshot(
                Request::builder()
                    .uri("/collections/workoutLogs/w1")
                    .header(header::AUTHORIZATION, format!("Bearer {}", KEY))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_collection_is_400() {
        let temp = TempDir::new().unwrap();
        let response = router(state(&temp))
            .oneshot(
                Request::builder()
                    .uri("/collections/..secrets/w1")
                    .header(header::AUTHORIZATION, format!("Bearer {}", KEY))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    async fn spawn_server(temp: &TempDir) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state(temp));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(url: &str, key: &str) -> HttpRemoteStore {
        HttpRemoteStore::new(url, key, Duration::from_secs(5), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn test_http_remote_against_server() {
        let temp = TempDir::new().unwrap();
        let url = spawn_server(&temp).await;
        let remote = client(&url, KEY);

        remote.probe().await.unwrap();

        remote
            .set(
                "workoutLogs",
                "w1",
                &doc(json!({"memberId": "m1", "name": "Leg Day", "durationMinutes": 45})),
            )
            .await
            .unwrap();
        remote
            .set(
                "workoutLogs",
                "w2",
                &doc(json!({"memberId": "m2", "name": "Push", "durationMinutes": 30})),
            )
            .await
            .unwrap();

        remote
            .patch("workoutLogs", "w1", &doc(json!({"durationMinutes": 60})))
            .await
            .unwrap();
        let w1 = remote.get("workoutLogs", "w1").await.unwrap();
        assert_eq!(w1["id"], json!("w1"));
        assert_eq!(w1["name"], json!("Leg Day"));
        assert_eq!(w1["durationMinutes"], json!(60));

        let m1 = remote
            .query("workoutLogs", &[Filter::eq("memberId", "m1")])
            .await
            .unwrap();
        assert_eq!(m1.len(), 1);
        assert_eq!(m1[0]["id"], json!("w1"));

        let all = remote.query("workoutLogs", &[]).await.unwrap();
        assert_eq!(all.len(), 2);

        remote.delete("workoutLogs", "w2").await.unwrap();
        let err = remote.get("workoutLogs", "w2").await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");

        let err = remote
            .patch("workoutLogs", "w2", &doc(json!({"name": "gone"})))
            .await
            .unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");

        let err = remote.delete("workoutLogs", "w2").await.unwrap_err();
        assert!(err.is_not_found(), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn test_http_remote_bad_key_is_rejected() {
        let temp = TempDir::new().unwrap();
        let url = spawn_server(&temp).await;
        let remote = client(&url, "wrong");

        // The probe is unauthenticated and still succeeds
        remote.probe().await.unwrap();

        let err = remote.get("workoutLogs", "w1").await.unwrap_err();
        assert!(
            matches!(err, RemoteError::Rejected { status: 401, .. }),
            "unexpected error: {err}"
        );
        assert!(!err.is_transient());
    }
}

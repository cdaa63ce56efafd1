use crate::config::{LiveStreamConfig, ServerConfig};
use crate::error::{CamhubError, Result};
use crate::registry::CameraRegistry;
use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::handlers::{
    get_latest_frame_handler, get_snapshot_handler, health_handler, list_cameras_handler,
    live_stream_handler, metrics_handler, push_frame_handler, register_camera_handler,
    unregister_camera_handler,
};

/// Shared state for the Axum server
#[derive(Clone)]
pub struct ServerState {
    pub(crate) registry: Arc<CameraRegistry>,
    pub(crate) stream_frame_interval: Duration,
}

/// HTTP server exposing the ingest hub
pub struct ApiServer {
    config: ServerConfig,
    registry: Arc<CameraRegistry>,
    stream_frame_interval: Duration,
}

impl ApiServer {
    pub fn new(
        config: ServerConfig,
        stream: LiveStreamConfig,
        registry: Arc<CameraRegistry>,
    ) -> Self {
        let stream_frame_interval =
            Duration::from_micros(1_000_000u64 / u64::from(stream.max_fps.max(1)));
        Self {
            config,
            registry,
            stream_frame_interval,
        }
    }

    /// Build the router; split out so tests can drive it without a socket
    pub fn router(&self) -> Router {
        let state = ServerState {
            registry: Arc::clone(&self.registry),
            stream_frame_interval: self.stream_frame_interval,
        };

        Router::new()
            .route(
                "/api/cameras",
                post(register_camera_handler).get(list_cameras_handler),
            )
            .route("/api/cameras/:id", delete(unregister_camera_handler))
            .route("/api/cameras/:id/frames", post(push_frame_handler))
            .route(
                "/api/cameras/:id/frame/latest",
                get(get_latest_frame_handler),
            )
            .route("/api/cameras/:id/stream/live.mjpg", get(live_stream_handler))
            .route("/api/snapshots/:id", get(get_snapshot_handler))
            .route("/metrics", get(metrics_handler))
            .route("/api/health", get(health_handler))
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Bind and serve until the process shuts down
    pub async fn start(&self) -> Result<()> {
        let app = self.router();
        let addr = format!("{}:{}", self.config.ip, self.config.port);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| CamhubError::system(format!("Failed to bind {}: {}", addr, e)))?;

        info!("API server listening on {}", addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| CamhubError::system(format!("Server error: {}", e)))?;

        Ok(())
    }
}

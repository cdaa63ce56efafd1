use crate::camera::CameraSpec;
use crate::error::CamhubError;
use crate::frame::{CapturedFrame, SourceKind};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use std::time::{Duration, SystemTime};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::server::ServerState;

/// Error wrapper mapping the crate taxonomy onto HTTP statuses
pub struct ApiError(CamhubError);

impl From<CamhubError> for ApiError {
    fn from(e: CamhubError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            CamhubError::Validation { .. } | CamhubError::Decode { .. } => StatusCode::BAD_REQUEST,
            CamhubError::NotFound { .. } => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(serde_json::json!({ "error": self.0.to_string() }));
        (status, body).into_response()
    }
}

/// POST /api/cameras
pub async fn register_camera_handler(
    State(state): State<ServerState>,
    Json(spec): Json<CameraSpec>,
) -> Result<impl IntoResponse, ApiError> {
    let view = state.registry.register(spec).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/cameras
pub async fn list_cameras_handler(State(state): State<ServerState>) -> impl IntoResponse {
    Json(state.registry.list().await)
}

/// DELETE /api/cameras/{id}
pub async fn unregister_camera_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.registry.unregister(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(CamhubError::not_found(id).into())
    }
}

#[derive(Debug, Deserialize)]
pub struct PushFrameQuery {
    /// Capture time as fractional seconds since the Unix epoch; defaults to
    /// the arrival time
    pub timestamp: Option<f64>,
}

/// POST /api/cameras/{id}/frames
pub async fn push_frame_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Query(query): Query<PushFrameQuery>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let worker = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| CamhubError::not_found(&id))?;

    if worker.camera().source() != SourceKind::HttpPush {
        return Err(CamhubError::validation(format!(
            "Camera '{}' is not a push source",
            id
        ))
        .into());
    }

    let timestamp = match query.timestamp {
        Some(seconds) => {
            // Rejects negative, NaN, infinite and absurdly large values
            let offset = Duration::try_from_secs_f64(seconds).map_err(|_| {
                CamhubError::validation(
                    "timestamp must be a non-negative number of seconds since the Unix epoch",
                )
            })?;
            SystemTime::UNIX_EPOCH
                .checked_add(offset)
                .ok_or_else(|| CamhubError::validation("timestamp is out of range"))?
        }
        None => SystemTime::now(),
    };

    let frame = CapturedFrame::from_jpeg(&body, timestamp, SourceKind::HttpPush)?;
    debug!("Pushed frame for {} ({}x{})", id, frame.width(), frame.height());
    worker.ingest(frame).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "camera_id": id, "status": "ingested" })),
    ))
}

/// GET /api/cameras/{id}/frame/latest
pub async fn get_latest_frame_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let worker = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| CamhubError::not_found(&id))?;

    let frame = worker
        .pipeline()
        .ring()
        .latest()
        .await
        .ok_or_else(|| CamhubError::not_found(format!("{} (no frames buffered)", id)))?;

    let jpeg = frame.to_jpeg()?;
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "image/jpeg"),
            (header::CACHE_CONTROL, "no-cache, private"),
        ],
        jpeg,
    ))
}

/// GET /api/cameras/{id}/stream/live.mjpg
///
/// Multipart MJPEG at the configured pace. Each frame is sent at most once;
/// ticks where the ring has nothing newer emit no part. The stream ends when
/// the camera's worker stops.
pub async fn live_stream_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let worker = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| CamhubError::not_found(&id))?;

    info!("Live stream client connected for {}", id);

    let stream = async_stream::stream! {
        let mut frame_interval = interval(state.stream_frame_interval);
        frame_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut last_sent: Option<SystemTime> = None;

        loop {
            frame_interval.tick().await;

            if !worker.is_running() {
                debug!("Worker for {} stopped, ending live stream", id);
                break;
            }

            let Some(frame) = worker.pipeline().ring().latest().await else {
                continue;
            };
            if last_sent.map_or(false, |sent| frame.timestamp <= sent) {
                continue;
            }

            match frame.to_jpeg() {
                Ok(jpeg) => {
                    last_sent = Some(frame.timestamp);
                    let part = format!(
                        "--FRAME\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\nX-Timestamp: {:.6}\r\n\r\n",
                        jpeg.len(),
                        frame.unix_timestamp(),
                    );
                    yield Ok::<_, axum::Error>(Bytes::from(part));
                    yield Ok(Bytes::from(jpeg));
                    yield Ok(Bytes::from("\r\n"));
                }
                Err(e) => {
                    warn!("Failed to encode live frame for {}: {}", id, e);
                }
            }
        }
    };

    let response = Response::builder()
        .status(StatusCode::OK)
        .header(
            header::CONTENT_TYPE,
            "multipart/x-mixed-replace; boundary=FRAME",
        )
        .header(header::CACHE_CONTROL, "no-cache, private")
        .body(axum::body::Body::from_stream(stream))
        .map_err(|e| CamhubError::system(format!("Failed to build stream response: {}", e)))?;

    Ok(response)
}

/// GET /api/snapshots/{id}
pub async fn get_snapshot_handler(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let jpeg = state
        .registry
        .snapshots()
        .get(&id)
        .ok_or_else(|| CamhubError::not_found(format!("snapshot {}", id)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/jpeg")],
        jpeg.as_ref().clone(),
    ))
}

/// GET /metrics
pub async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.registry.metrics().export(),
    )
}

/// GET /api/health
pub async fn health_handler(State(state): State<ServerState>) -> impl IntoResponse {
    let cameras = state.registry.list().await;
    Json(serde_json::json!({
        "status": "healthy",
        "cameras": cameras.len(),
        "subscribers": state.registry.bus().subscriber_count(),
    }))
}

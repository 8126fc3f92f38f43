//! HTTP request handlers

use axum::{
    body::Body,
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{AppConfig, DeviceId, VideoConfig};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::stream::broadcaster::opening_boundary;
use crate::stream::{SessionState, SessionStatus, STREAM_CONTENT_TYPE};
use crate::video::{enumerate_devices, VideoDeviceInfo};

use super::page;

// ============================================================================
// Health & Status
// ============================================================================

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Session status snapshot
pub async fn status(State(state): State<Arc<AppState>>) -> Result<Json<SessionStatus>> {
    Ok(Json(state.session.status().await?))
}

// ============================================================================
// Stream control
// ============================================================================

/// Control operation response
#[derive(Serialize)]
pub struct ControlResponse {
    pub success: bool,
    pub state: SessionState,
}

pub async fn stream_start(State(state): State<Arc<AppState>>) -> Result<Json<ControlResponse>> {
    let session_state = state.session.start().await?;
    Ok(Json(ControlResponse {
        success: true,
        state: session_state,
    }))
}

pub async fn stream_stop(State(state): State<Arc<AppState>>) -> Result<Json<ControlResponse>> {
    let session_state = state.session.stop().await?;
    Ok(Json(ControlResponse {
        success: true,
        state: session_state,
    }))
}

pub async fn stream_restart(State(state): State<Arc<AppState>>) -> Result<Json<ControlResponse>> {
    let session_state = state.session.restart().await?;
    Ok(Json(ControlResponse {
        success: true,
        state: session_state,
    }))
}

// ============================================================================
// Streaming
// ============================================================================

/// MJPEG stream endpoint
///
/// Attaches one broadcaster client and streams its multipart parts until
/// the viewer disconnects or stops reading. A never-started session is
/// started on first view; an explicitly stopped one is not.
pub async fn mjpeg_stream(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.session.state() == SessionState::Idle {
        if let Err(e) = state.session.start().await {
            tracing::error!(error = %e, "Failed to auto-start stream session");
        }
    }

    let mut client = state.session.broadcaster().attach();

    let body_stream = async_stream::stream! {
        yield Ok::<bytes::Bytes, std::io::Error>(opening_boundary());
        // Ends when the broadcaster drops this client or the session shuts
        // down the channel
        while let Some(part) = client.recv().await {
            yield Ok(part);
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, STREAM_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .header(header::PRAGMA, "no-cache")
        .header(header::EXPIRES, "0")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(body_stream))
        .unwrap()
}

/// Single JPEG snapshot from the frame cache
pub async fn snapshot(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.session.broadcaster().last_frame() {
        Some(frame) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "image/jpeg")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Body::from(frame.data_bytes()))
            .unwrap(),
        None => Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Body::from("No frame available"))
            .unwrap(),
    }
}

// ============================================================================
// Configuration
// ============================================================================

pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<AppConfig> {
    Json((*state.config.get()).clone())
}

/// Partial video configuration update
#[derive(Debug, Deserialize, Default)]
pub struct VideoConfigUpdate {
    pub device: Option<DeviceId>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
}

impl VideoConfigUpdate {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("width", self.width),
            ("height", self.height),
            ("fps", self.fps),
        ] {
            if value == Some(0) {
                return Err(AppError::BadRequest(format!("{field} must be positive")));
            }
        }
        Ok(())
    }

    fn apply_to(&self, video: &mut VideoConfig) {
        if let Some(device) = &self.device {
            video.device = device.clone();
        }
        if let Some(width) = self.width {
            video.width = width;
        }
        if let Some(height) = self.height {
            video.height = height;
        }
        if let Some(fps) = self.fps {
            video.fps = fps;
        }
    }
}

/// Update the video configuration
///
/// Persists the new snapshot; a running session keeps its profile until
/// the next restart.
pub async fn update_video_config(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VideoConfigUpdate>,
) -> Result<Json<VideoConfig>> {
    req.validate()?;

    state
        .config
        .update(move |config| req.apply_to(&mut config.video))
        .await?;

    Ok(Json(state.config.get().video.clone()))
}

// ============================================================================
// Devices & pages
// ============================================================================

pub async fn list_devices() -> Result<Json<Vec<VideoDeviceInfo>>> {
    Ok(Json(enumerate_devices().await?))
}

pub async fn index_page() -> Html<&'static str> {
    Html(page::INDEX_HTML)
}

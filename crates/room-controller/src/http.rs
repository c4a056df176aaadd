//! REST surface and router assembly.

use crate::config::Config;
use crate::observability::HealthState;
use crate::registry::RoomRegistryHandle;
use crate::ws;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use chrono::Utc;
use common::types::{RoomId, RoomSettings, VideoQuality};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::debug;

/// Shared state for REST and WebSocket handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: RoomRegistryHandle,
    pub config: Arc<Config>,
    pub health: Arc<HealthState>,
}

/// Build the full application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/room", post(create_room))
        .route("/room/:id/meta", get(room_meta))
        .route("/room/:id/close", post(close_room))
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct CreateRoomRequest {
    #[serde(default)]
    video_quality: Option<VideoQuality>,
    #[serde(default)]
    password_enabled: bool,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    password_hint: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateRoomResponse {
    room_id: RoomId,
    settings: RoomSettings,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    message: String,
}

async fn create_room(
    State(state): State<AppState>,
    Json(request): Json<CreateRoomRequest>,
) -> impl IntoResponse {
    let settings = RoomSettings {
        video_quality: request
            .video_quality
            .unwrap_or(state.config.default_video_quality),
        password_enabled: request.password_enabled,
        password_hint: request.password_hint,
    };

    match state.registry.create_room(settings, request.password).await {
        Ok(info) => (
            StatusCode::CREATED,
            Json(CreateRoomResponse {
                room_id: info.room_id,
                settings: info.settings,
            }),
        )
            .into_response(),
        Err(e) => {
            debug!(target: "http", error = %e, "room creation rejected");
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    message: e.to_error_code().to_string(),
                }),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize)]
struct RoomMetaResponse {
    room_id: RoomId,
    exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    settings: Option<RoomSettings>,
}

/// Never a 404: a missing room reports `exists: false` so the page can
/// offer to create it.
async fn room_meta(State(state): State<AppState>, Path(id): Path<String>) -> impl IntoResponse {
    match state.registry.room_meta(RoomId::new(id)).await {
        Ok(meta) => Json(RoomMetaResponse {
            room_id: meta.room_id,
            exists: meta.exists,
            settings: meta.settings,
        })
        .into_response(),
        Err(e) => {
            debug!(target: "http", error = %e, "meta lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Evict everyone and delete the room. Idempotent: closing an unknown
/// room is still a 200.
async fn close_room(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.registry.close_room(RoomId::new(id)).await {
        Ok(()) => StatusCode::OK,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[derive(Debug, Serialize)]
struct HealthBody {
    ok: bool,
    ts: i64,
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let body = HealthBody {
        ok: state.health.is_live(),
        ts: Utc::now().timestamp_millis(),
    };
    if body.ok {
        (StatusCode::OK, Json(body)).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
    }
}

async fn ready(State(state): State<AppState>) -> StatusCode {
    if state.health.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn create_request_defaults() {
        let request: CreateRoomRequest = serde_json::from_str("{}").unwrap();
        assert!(request.video_quality.is_none());
        assert!(!request.password_enabled);
        assert!(request.password.is_none());
    }

    #[test]
    fn meta_response_omits_missing_settings() {
        let body = RoomMetaResponse {
            room_id: RoomId::from("gone"),
            exists: false,
            settings: None,
        };
        let json = serde_json::to_string(&body).unwrap();
        assert!(!json.contains("settings"));
    }
}

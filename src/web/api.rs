//! REST API endpoints

use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{PosecastError, ReceiverError};
use crate::AppState;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

impl ApiResponse<()> {
    pub fn error(message: &str) -> Json<Self> {
        Json(Self {
            success: false,
            data: None,
            error: Some(message.to_string()),
        })
    }

    pub fn ok() -> Json<Self> {
        Json(Self {
            success: true,
            data: None,
            error: None,
        })
    }
}

/// Active and available receivers
pub async fn get_receiver_info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.receivers.list().await)
}

/// Switch the active receiver. The body is the receiver name.
pub async fn update_receiver(State(state): State<Arc<AppState>>, body: String) -> Response {
    let name = body.trim();

    match state.switch_receiver(name).await {
        Ok(info) => ApiResponse::success(info).into_response(),
        Err(PosecastError::Receiver(e @ ReceiverError::NotFound(_))) => {
            (StatusCode::NOT_FOUND, ApiResponse::error(&e.to_string())).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to switch receiver to {}: {}", name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(&e.to_string())).into_response()
        }
    }
}

/// Current configuration
pub async fn get_app_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.config.read().await;
    Json(config.clone())
}

/// Current scene
pub async fn get_scene(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scene = state.scene.read().await;
    Json(scene.clone())
}

/// Persist the current scene to the scene file
pub async fn save_scene(State(state): State<Arc<AppState>>) -> Response {
    let path = state.config.read().await.paths.scene_file.clone();
    let scene = state.scene.read().await.clone();

    match scene.save(&path) {
        Ok(()) => {
            tracing::info!("Scene saved to {}", path.display());
            ApiResponse::ok().into_response()
        }
        Err(e) => {
            tracing::error!("Failed to save scene: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(&e.to_string())).into_response()
        }
    }
}

/// Download the stored VRM model
pub async fn get_model(State(state): State<Arc<AppState>>) -> Response {
    let path = state.config.read().await.paths.vrm_file.clone();

    match tokio::fs::read(&path).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "application/octet-stream"),
                (header::CONTENT_DISPOSITION, "attachment; filename=\"default.vrm\""),
            ],
            bytes,
        )
            .into_response(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, ApiResponse::error("No model uploaded")).into_response()
        }
        Err(e) => {
            tracing::error!("Failed to read model {}: {}", path.display(), e);
            (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(&e.to_string())).into_response()
        }
    }
}

/// Replace the stored VRM model with the request body
pub async fn update_model(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    if body.is_empty() {
        return (StatusCode::BAD_REQUEST, ApiResponse::error("Empty model")).into_response();
    }

    let path = state.config.read().await.paths.vrm_file.clone();

    let write = async {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, &body).await?;
        Ok::<_, std::io::Error>(())
    };

    match write.await {
        Ok(()) => {
            tracing::info!("Stored model ({} bytes) at {}", body.len(), path.display());
            ApiResponse::ok().into_response()
        }
        Err(e) => {
            tracing::error!("Failed to store model: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, ApiResponse::error(&e.to_string())).into_response()
        }
    }
}

//! Route definitions for the API and live feeds

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, put},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::HttpConfig;
use crate::AppState;

use super::api;
use super::live;

/// VRM files are far larger than axum's default body limit
const MAX_MODEL_BYTES: usize = 256 * 1024 * 1024;

/// Create the main router with all routes
pub fn create_router(app_state: Arc<AppState>, config: &HttpConfig) -> Router {
    let cors = if config.cors_enabled {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    Router::new()
        // Live WebSocket feeds
        .route("/live/read/model", get(live::read_model))
        .route("/live/read/camera", get(live::read_camera))
        .route("/live/write/camera", get(live::write_camera))
        .route("/live/read/config", get(live::read_config))
        // Receivers
        .route("/api/receiver/info", get(api::get_receiver_info))
        .route("/api/receiver/update", put(api::update_receiver))
        // Config and scene
        .route("/api/config/app", get(api::get_app_config))
        .route("/api/config/scene", get(api::get_scene))
        .route("/api/config/scene/update", put(api::save_scene))
        // VRM model
        .route("/api/model", get(api::get_model))
        .route(
            "/api/model/update",
            put(api::update_model).layer(DefaultBodyLimit::max(MAX_MODEL_BYTES)),
        )
        // Middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avatar::Scene;
    use crate::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_state(dir: &std::path::Path) -> Arc<AppState> {
        let mut config = Config::default();
        config.paths.scene_file = dir.join("scene.json");
        config.paths.vrm_file = dir.join("model/default.vrm");
        AppState::with_default_receivers(config, Scene::default())
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_receiver_info() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = create_router(state, &HttpConfig::default());

        let response = app
            .oneshot(Request::get("/api/receiver/info").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["active"], Value::Null);
        assert_eq!(
            json["available"],
            serde_json::json!(["Facemotion3D", "MediapipeWeb", "VirtualMotionCapture"])
        );
    }

    #[tokio::test]
    async fn test_update_unknown_receiver_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = create_router(Arc::clone(&state), &HttpConfig::default());

        let response = app
            .oneshot(
                Request::put("/api/receiver/update")
                    .body(Body::from("NoSuchReceiver"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(state.receivers.active().await, None);
    }

    #[tokio::test]
    async fn test_save_scene() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = create_router(state, &HttpConfig::default());

        let response = app
            .oneshot(
                Request::put("/api/config/scene/update")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let saved = Scene::load_or_create(dir.path().join("scene.json")).unwrap();
        assert_eq!(saved, Scene::default());
    }

    #[tokio::test]
    async fn test_model_upload_and_download() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = create_router(state, &HttpConfig::default());

        let missing = app
            .clone()
            .oneshot(Request::get("/api/model").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);

        let upload = app
            .clone()
            .oneshot(
                Request::put("/api/model/update")
                    .body(Body::from(&b"glTF-model-bytes"[..]))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(upload.status(), StatusCode::OK);

        let download = app
            .oneshot(Request::get("/api/model").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(download.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(download.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"glTF-model-bytes");
    }

    #[tokio::test]
    async fn test_app_config() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(dir.path());
        let app = create_router(state, &HttpConfig::default());

        let response = app
            .oneshot(Request::get("/api/config/app").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let json = body_json(response).await;
        assert_eq!(json["receiver"]["active"], "VirtualMotionCapture");
        assert_eq!(json["http"]["model_update_frequency"], 60);
    }
}

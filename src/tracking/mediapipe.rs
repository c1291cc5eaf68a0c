//! MediaPipe face mesh receiver
//!
//! A browser page runs MediaPipe Face Mesh and pushes each result over a
//! WebSocket as JSON:
//!
//! ```json
//! { "landmarks": [{ "x": 0.5, "y": 0.4, "z": -0.02 }, ...],
//!   "video": { "width": 640, "height": 480 } }
//! ```
//!
//! Landmark coordinates are normalized to the video frame. The head rotation
//! is estimated from the eye corners and chin and written to the `Head` bone.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use glam::{Mat3, Quat, Vec3};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio_util::task::TaskTracker;

use super::{BindFuture, ListenFuture, MotionSource};
use crate::avatar::{AvatarState, Bone, Position, QuaternionRotation};
use crate::config::MediaPipeWebConfig;
use crate::error::{PosecastError, TrackingError};

/// Registry name of this receiver
pub const RECEIVER_NAME: &str = "MediapipeWeb";

/// Face mesh indices used for the head pose
const RIGHT_EYE_OUTER: usize = 33;
const LEFT_EYE_OUTER: usize = 263;
const CHIN: usize = 152;

/// Size of the video the landmarks were computed on
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct VideoMetadata {
    pub width: u32,
    pub height: u32,
}

/// One face mesh result from the browser
#[derive(Debug, Clone, Deserialize)]
pub struct FaceMesh {
    pub landmarks: Vec<Position>,
    pub video: VideoMetadata,
}

impl FaceMesh {
    /// Landmark in pixel-scaled space centered on the frame, +Y up, +Z toward
    /// the camera
    fn point(&self, index: usize) -> Option<Vec3> {
        let p = self.landmarks.get(index)?;
        let width = self.video.width as f32;
        let height = self.video.height as f32;
        Some(Vec3::new(
            (p.x - 0.5) * width,
            -(p.y - 0.5) * height,
            -p.z * width,
        ))
    }
}

/// Estimate the head rotation from the eye corners and chin.
///
/// Returns `None` if the mesh is too short or degenerate.
pub fn estimate_head_rotation(mesh: &FaceMesh) -> Option<QuaternionRotation> {
    if mesh.video.width == 0 || mesh.video.height == 0 {
        return None;
    }

    let right_eye = mesh.point(RIGHT_EYE_OUTER)?;
    let left_eye = mesh.point(LEFT_EYE_OUTER)?;
    let chin = mesh.point(CHIN)?;

    let forward = (left_eye - chin).cross(right_eye - chin).try_normalize()?;
    let across = (left_eye - right_eye).try_normalize()?;
    let up = forward.cross(across).try_normalize()?;
    let across = up.cross(forward);

    let rotation = Quat::from_mat3(&Mat3::from_cols(across, up, forward)).normalize();
    rotation.is_finite().then(|| rotation.into())
}

/// Decode a JSON message and write the `Head` bone. Returns `true` on write.
pub fn apply_message(avatar: &AvatarState, text: &str) -> bool {
    let mesh: FaceMesh = match serde_json::from_str(text) {
        Ok(mesh) => mesh,
        Err(e) => {
            tracing::debug!("Dropping malformed face mesh: {}", e);
            return false;
        }
    };

    match estimate_head_rotation(&mesh) {
        Some(rotation) => {
            avatar.write_bone("Head", Bone::from_rotation(rotation));
            true
        }
        None => false,
    }
}

/// Browser face mesh motion source
pub struct MediaPipeWebSource {
    config: MediaPipeWebConfig,
}

impl MediaPipeWebSource {
    pub fn new(config: &MediaPipeWebConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

#[derive(Clone)]
struct FeedState {
    avatar: Arc<AvatarState>,
    // Upgraded sockets outlive their HTTP connection, so they watch their own
    // stop flag and are tracked until they exit
    stop: watch::Receiver<bool>,
    sockets: TaskTracker,
}

impl MotionSource for MediaPipeWebSource {
    fn bind(&self, avatar: Arc<AvatarState>, mut shutdown: broadcast::Receiver<()>) -> BindFuture {
        let addr = self.config.listen.clone();

        Box::pin(async move {
            let listener = TcpListener::bind(&addr).await.map_err(|e| {
                TrackingError::MpReceiver(format!("Failed to bind to {}: {}", addr, e))
            })?;
            tracing::info!("MediaPipe web receiver listening on {}", addr);

            let listen: ListenFuture = Box::pin(async move {
                let (stop_tx, stop) = watch::channel(false);
                let sockets = TaskTracker::new();
                let state = FeedState {
                    avatar,
                    stop,
                    sockets: sockets.clone(),
                };
                let app = Router::new().route("/", get(feed_handler)).with_state(state);

                let served = axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                        stop_tx.send_replace(true);
                    })
                    .await;

                // No avatar writes once this returns
                sockets.close();
                sockets.wait().await;

                served.map_err(|e| TrackingError::MpReceiver(e.to_string()))?;
                Ok::<_, PosecastError>(())
            });
            Ok::<_, PosecastError>(listen)
        })
    }
}

async fn feed_handler(ws: WebSocketUpgrade, State(state): State<FeedState>) -> impl IntoResponse {
    // Taken before the upgrade so a stop during the handshake is still seen
    // and still waited for
    let token = state.sockets.token();
    let stop = state.stop.clone();
    let avatar = state.avatar;

    ws.on_upgrade(move |socket| async move {
        feed_socket(socket, avatar, stop).await;
        drop(token);
    })
}

async fn feed_socket(mut socket: WebSocket, avatar: Arc<AvatarState>, mut stop: watch::Receiver<bool>) {
    if *stop.borrow() {
        return;
    }
    tracing::info!("MediaPipe web client connected");

    loop {
        tokio::select! {
            biased;
            _ = stop.changed() => break,
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => {
                    apply_message(&avatar, &text);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("MediaPipe web socket error: {}", e);
                    break;
                }
            },
        }
    }

    tracing::info!("MediaPipe web client disconnected");
}

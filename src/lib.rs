//! Posecast - Motion Capture Relay
//!
//! Receives face and body tracking from external apps and relays a live
//! avatar pose to browser viewers:
//! - VMC/OSC, Facemotion3D and browser MediaPipe receivers
//! - One shared avatar state written by the active receiver
//! - WebSocket feeds for the model, camera and configuration
//! - JSON API for receiver selection, scene and VRM model storage

pub mod avatar;
pub mod config;
pub mod error;
pub mod pool;
pub mod tracking;
pub mod web;

pub use config::Config;
pub use error::{PosecastError, Result};

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use avatar::{AvatarState, Camera, Scene};
use error::ReceiverError;
use pool::BroadcastPool;
use tracking::{ReceiverInfo, ReceiverRegistry};

/// Change pushed to configuration readers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum ConfigUpdate {
    Receiver(ReceiverInfo),
    Scene(Scene),
}

/// Application state shared across all components
pub struct AppState {
    /// Current configuration
    pub config: RwLock<Config>,
    /// Live avatar written by the active receiver
    pub avatar: Arc<AvatarState>,
    /// Persisted scene (camera)
    pub scene: RwLock<Scene>,
    /// Camera changes for camera readers
    pub camera_pool: BroadcastPool<Camera>,
    /// Receiver and scene changes for config readers
    pub config_pool: BroadcastPool<ConfigUpdate>,
    /// Every motion receiver
    pub receivers: ReceiverRegistry,
    /// Shutdown signal
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create the application state. `receivers` must write into `avatar`.
    pub fn new(
        config: Config,
        scene: Scene,
        avatar: Arc<AvatarState>,
        receivers: ReceiverRegistry,
    ) -> Arc<Self> {
        let (shutdown_tx, _) = broadcast::channel(1);

        Arc::new(Self {
            config: RwLock::new(config),
            avatar,
            scene: RwLock::new(scene),
            camera_pool: BroadcastPool::new(),
            config_pool: BroadcastPool::new(),
            receivers,
            shutdown_tx,
        })
    }

    /// Build the state with every built-in receiver registered
    pub fn with_default_receivers(config: Config, scene: Scene) -> Arc<Self> {
        let avatar = Arc::new(AvatarState::new());
        let receivers = tracking::build_registry(&config, Arc::clone(&avatar));
        Self::new(config, scene, avatar, receivers)
    }

    /// Current camera
    pub async fn camera(&self) -> Camera {
        self.scene.read().await.camera
    }

    /// Replace the camera and notify camera and config readers
    pub async fn update_camera(&self, camera: Camera) {
        let scene = {
            let mut scene = self.scene.write().await;
            scene.camera = camera;
            scene.clone()
        };

        self.camera_pool.update(&camera);
        self.config_pool.update(&ConfigUpdate::Scene(scene));
    }

    /// Make `name` the active receiver and notify config readers.
    ///
    /// Readers are notified whenever the active receiver changed, including
    /// a failed start that left no receiver active.
    pub async fn switch_receiver(&self, name: &str) -> Result<ReceiverInfo> {
        let switched = match self.receivers.switch(name).await {
            Err(e @ ReceiverError::NotFound(_)) => return Err(e.into()),
            other => other,
        };

        let info = self.receivers.list().await;
        self.config_pool.update(&ConfigUpdate::Receiver(info.clone()));

        switched?;
        self.config.write().await.receiver.active = name.to_string();
        Ok(info)
    }

    /// Subscribe to shutdown signal
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::*;
    use avatar::Position;
    use parking_lot::Mutex;

    fn state() -> Arc<AppState> {
        AppState::with_default_receivers(Config::default(), Scene::default())
    }

    #[tokio::test]
    async fn test_update_camera_notifies_both_pools() {
        let state = state();
        let cameras = Arc::new(Mutex::new(Vec::new()));
        let updates = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&cameras);
        let _camera_sub = state.camera_pool.create(move |c, _| seen.lock().push(*c));
        let seen = Arc::clone(&updates);
        let _config_sub = state.config_pool.create(move |u, _| seen.lock().push(u.clone()));

        let camera = Camera {
            gaze_towards: Position::new(0.0, 1.0, 0.0),
            gaze_from: Position::new(0.0, 1.0, 2.0),
        };
        state.update_camera(camera).await;

        assert_eq!(state.camera().await, camera);
        assert_eq!(*cameras.lock(), vec![camera]);
        assert!(matches!(&updates.lock()[..], [ConfigUpdate::Scene(s)] if s.camera == camera));
    }

    #[tokio::test]
    async fn test_switch_to_unknown_receiver() {
        let state = state();
        let err = state.switch_receiver("Nope").await.unwrap_err();
        assert!(matches!(
            err,
            PosecastError::Receiver(ReceiverError::NotFound(_))
        ));
        assert_eq!(state.config_pool.count(), 0);
    }

    #[test]
    fn test_config_update_wire_format() {
        let update = ConfigUpdate::Receiver(ReceiverInfo {
            active: Some("VirtualMotionCapture".to_string()),
            available: vec!["VirtualMotionCapture".to_string()],
            status: None,
        });
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["kind"], "receiver");
        assert_eq!(json["data"]["active"], "VirtualMotionCapture");
        assert!(json["data"].get("status").is_none());
    }

    #[tokio::test]
    async fn test_switch_to_busy_receiver_notifies_readers() {
        let held = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let mut config = Config::default();
        config.vmc.listen = held.local_addr().unwrap().to_string();
        let state = AppState::with_default_receivers(config, Scene::default());

        let updates = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&updates);
        let _sub = state.config_pool.create(move |u, _| seen.lock().push(u.clone()));

        let err = state.switch_receiver(tracking::vmc::RECEIVER_NAME).await.unwrap_err();
        assert!(matches!(
            err,
            PosecastError::Receiver(ReceiverError::StartFailed { .. })
        ));
        assert!(matches!(
            &updates.lock()[..],
            [ConfigUpdate::Receiver(info)] if info.active.is_none()
        ));
    }
}

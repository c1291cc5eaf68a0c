//! Tracking module
//!
//! Motion sources that drive the live avatar:
//! - VMC/OSC over UDP (VSeeFace, Virtual Motion Capture, etc.)
//! - Facemotion3D framed text over TCP
//! - Browser MediaPipe face mesh over WebSocket
//!
//! Each source is wrapped in a [`MotionReceiver`] with a uniform start/stop
//! lifecycle, and all receivers live in a [`ReceiverRegistry`] that keeps at
//! most one of them active.

pub mod facemotion3d;
pub mod mediapipe;
pub mod registry;
pub mod vmc;

use parking_lot::Mutex;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::avatar::AvatarState;
use crate::config::Config;
use crate::error::PosecastError;

pub use registry::{ReceiverInfo, ReceiverRegistry};

/// A source's listen loop, run on its own task
pub type ListenFuture = Pin<Box<dyn Future<Output = Result<(), PosecastError>> + Send>>;

/// Binds a source's sockets and resolves to its listen loop
pub type BindFuture = Pin<Box<dyn Future<Output = Result<ListenFuture, PosecastError>> + Send>>;

/// A wire protocol decoder with its own listen loop.
///
/// `bind` acquires every socket up front so a bad address fails the start
/// instead of a detached task. The returned loop writes decoded data into
/// `avatar` and must return once `shutdown` fires, dropping its sockets.
pub trait MotionSource: Send + Sync {
    fn bind(&self, avatar: Arc<AvatarState>, shutdown: broadcast::Receiver<()>) -> BindFuture;

    /// Short human readable link status, if the source has one
    fn status(&self) -> Option<String> {
        None
    }
}

struct RunningTask {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// One motion source plus its start/stop lifecycle
pub struct MotionReceiver {
    name: String,
    source: Arc<dyn MotionSource>,
    avatar: Arc<AvatarState>,
    running: Mutex<Option<RunningTask>>,
}

impl MotionReceiver {
    pub fn new(name: impl Into<String>, source: Arc<dyn MotionSource>, avatar: Arc<AvatarState>) -> Self {
        Self {
            name: name.into(),
            source,
            avatar,
            running: Mutex::new(None),
        }
    }

    /// Bind the source and spawn its listen loop.
    ///
    /// Does nothing if it is already running. Bind errors are returned and
    /// leave the receiver stopped.
    pub async fn start(&self) -> Result<(), PosecastError> {
        if self.running.lock().is_some() {
            return Ok(());
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let listen = self
            .source
            .bind(Arc::clone(&self.avatar), shutdown_rx)
            .await?;

        let mut running = self.running.lock();
        if running.is_some() {
            // Lost a start race; dropping `listen` releases its sockets
            return Ok(());
        }

        let name = self.name.clone();
        let handle = tokio::spawn(async move {
            match listen.await {
                Ok(()) => tracing::info!("{} receiver stopped", name),
                Err(e) => tracing::error!("{} receiver failed: {}", name, e),
            }
        });

        tracing::info!("{} receiver started", self.name);
        *running = Some(RunningTask {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Signal the listen loop to exit and wait for it, releasing its sockets
    pub async fn stop(&self) {
        let task = self.running.lock().take();
        let Some(task) = task else {
            return;
        };

        let _ = task.shutdown_tx.send(());
        if let Err(e) = task.handle.await {
            tracing::error!("{} receiver task panicked: {}", self.name, e);
        }
    }

    /// Whether the listen loop is currently alive
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .map(|task| !task.handle.is_finished())
            .unwrap_or(false)
    }

    /// Link status reported by the source
    pub fn status(&self) -> Option<String> {
        self.source.status()
    }
}

/// Build the registry with every built-in receiver
pub fn build_registry(config: &Config, avatar: Arc<AvatarState>) -> ReceiverRegistry {
    let mut registry = ReceiverRegistry::new(avatar);
    registry.register(
        vmc::RECEIVER_NAME,
        Arc::new(vmc::VmcSource::new(&config.vmc)),
    );
    registry.register(
        facemotion3d::RECEIVER_NAME,
        Arc::new(facemotion3d::Facemotion3dSource::new(&config.facemotion3d)),
    );
    registry.register(
        mediapipe::RECEIVER_NAME,
        Arc::new(mediapipe::MediaPipeWebSource::new(&config.mediapipe_web)),
    );
    registry
}

/// Upper-case the first character (`"leftEye"` -> `"LeftEye"`)
pub(crate) fn upper_camel(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Sleep for `duration`, returning `true` early if shutdown was signalled
pub(crate) async fn sleep_or_shutdown(
    duration: Duration,
    shutdown: &mut broadcast::Receiver<()>,
) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = shutdown.recv() => true,
    }
}

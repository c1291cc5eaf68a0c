//! Facemotion3D receiver
//!
//! The phone app is told over UDP to stream to us, then connects back over
//! TCP and sends `___FACEMOTION3D`-separated text frames. The link cycles
//! through [`LinkState`]:
//!
//! `Idle -> AwaitingDevice -> Streaming -> Disconnected -> AwaitingDevice ...`
//!
//! The TCP listener is bound when the receiver starts and a bind failure
//! fails the start. After that, every network failure is logged and retried
//! after the backoff interval until the receiver is stopped.

pub mod frame;
pub mod parser;

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;

use super::{sleep_or_shutdown, BindFuture, ListenFuture, MotionSource};
use crate::avatar::AvatarState;
use crate::config::Facemotion3dConfig;
use crate::error::{PosecastError, TrackingError};

pub use frame::FrameAssembler;
pub use parser::{apply_frame, parse_field, FrameField};

/// Registry name of this receiver
pub const RECEIVER_NAME: &str = "Facemotion3D";

/// Tells the device to stop any stream in progress
pub const STOP_COMMAND: &str = "StopStreaming_FACEMOTION3D";

/// Asks the device to connect back over TCP
pub const START_COMMAND: &str = "FACEMOTION3D_OtherStreaming|protocol=tcp";

const READ_CHUNK: usize = 4096;

/// Where the device link currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    AwaitingDevice,
    Streaming,
    Disconnected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Idle => "idle",
            LinkState::AwaitingDevice => "awaiting_device",
            LinkState::Streaming => "streaming",
            LinkState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Facemotion3D motion source
pub struct Facemotion3dSource {
    config: Facemotion3dConfig,
    state: Arc<RwLock<LinkState>>,
}

impl Facemotion3dSource {
    pub fn new(config: &Facemotion3dConfig) -> Self {
        Self {
            config: config.clone(),
            state: Arc::new(RwLock::new(LinkState::Idle)),
        }
    }

    /// Current link state
    pub fn link_state(&self) -> LinkState {
        *self.state.read()
    }
}

impl MotionSource for Facemotion3dSource {
    fn bind(&self, avatar: Arc<AvatarState>, shutdown: broadcast::Receiver<()>) -> BindFuture {
        let config = self.config.clone();
        let state = Arc::clone(&self.state);

        Box::pin(async move {
            let listener = TcpListener::bind(&config.listen).await.map_err(|e| {
                TrackingError::Fm3dReceiver(format!("Failed to bind to {}: {}", config.listen, e))
            })?;

            tracing::info!("Facemotion3D receiver listening on {}", config.listen);
            let listen: ListenFuture = Box::pin(serve(listener, config, avatar, state, shutdown));
            Ok::<_, PosecastError>(listen)
        })
    }

    fn status(&self) -> Option<String> {
        Some(self.link_state().to_string())
    }
}

/// Drive the device link on an already bound listener until shutdown
pub async fn serve(
    listener: TcpListener,
    config: Facemotion3dConfig,
    avatar: Arc<AvatarState>,
    state: Arc<RwLock<LinkState>>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), PosecastError> {
    let backoff = Duration::from_secs(config.backoff_secs);

    loop {
        *state.write() = LinkState::AwaitingDevice;

        if let Err(e) = request_stream(&config).await {
            tracing::warn!("{}, retrying in {:?}", e, backoff);
            if sleep_or_shutdown(backoff, &mut shutdown).await {
                break;
            }
            continue;
        }

        tracing::info!("Waiting for Facemotion3D device {}", config.device_ip);
        let (stream, peer) = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => {
                    tracing::warn!("Facemotion3D accept failed: {}", e);
                    if sleep_or_shutdown(backoff, &mut shutdown).await {
                        break;
                    }
                    continue;
                }
            },
            _ = shutdown.recv() => break,
        };

        tracing::info!("Facemotion3D device connected from {}", peer);
        *state.write() = LinkState::Streaming;

        if stream_frames(stream, &avatar, &mut shutdown).await {
            break;
        }

        *state.write() = LinkState::Disconnected;
        tracing::info!("Facemotion3D device disconnected, reconnecting in {:?}", backoff);
        if sleep_or_shutdown(backoff, &mut shutdown).await {
            break;
        }
    }

    *state.write() = LinkState::Idle;
    Ok(())
}

/// Send the stop/start command pair to the device control port
pub async fn request_stream(config: &Facemotion3dConfig) -> Result<(), PosecastError> {
    let device = config.device_addr();
    let control_err = |e: std::io::Error| TrackingError::Fm3dControl(format!("{}: {}", device, e));

    let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(control_err)?;
    socket.connect(&device).await.map_err(control_err)?;

    socket
        .send(STOP_COMMAND.as_bytes())
        .await
        .map_err(control_err)?;
    tokio::time::sleep(Duration::from_millis(config.settle_ms)).await;
    socket
        .send(START_COMMAND.as_bytes())
        .await
        .map_err(control_err)?;

    tracing::debug!("Requested TCP stream from {}", device);
    Ok(())
}

/// Read frames until EOF, a read error, or shutdown. Returns `true` on shutdown.
async fn stream_frames(
    mut stream: TcpStream,
    avatar: &AvatarState,
    shutdown: &mut broadcast::Receiver<()>,
) -> bool {
    let mut assembler = FrameAssembler::new();
    let mut buf = [0u8; READ_CHUNK];

    loop {
        tokio::select! {
            read = stream.read(&mut buf) => match read {
                Ok(0) => return false,
                Ok(n) => {
                    assembler.push(&buf[..n]);
                    for frame in assembler.drain_frames() {
                        let written = apply_frame(avatar, &frame);
                        tracing::trace!("Facemotion3D frame: {} fields", written);
                    }
                }
                Err(e) => {
                    tracing::warn!("Facemotion3D read error: {}", e);
                    return false;
                }
            },
            _ = shutdown.recv() => return true,
        }
    }
}

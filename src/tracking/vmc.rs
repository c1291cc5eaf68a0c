//! VMC protocol receiver
//!
//! VMC (Virtual Motion Capture) transmits motion capture data over OSC/UDP.
//! Senders include:
//! - VSeeFace
//! - Virtual Motion Capture
//! - iFacialMocap (VMC mode)
//!
//! Only blend shape values and bone transforms are decoded. Every other
//! address is ignored.

use rosc::{OscMessage, OscPacket, OscType};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use super::{sleep_or_shutdown, upper_camel, BindFuture, ListenFuture, MotionSource};
use crate::avatar::{AvatarState, Bone, Position, QuaternionRotation};
use crate::config::VmcConfig;
use crate::error::{PosecastError, TrackingError};

/// Registry name of this receiver
pub const RECEIVER_NAME: &str = "VirtualMotionCapture";

/// `/VMC/Ext/Blend/Val <name> <value>`
pub const BLEND_VALUE_ADDR: &str = "/VMC/Ext/Blend/Val";

/// `/VMC/Ext/Bone/Pos <name> <px> <py> <pz> <qx> <qy> <qz> <qw>`
pub const BONE_POSITION_ADDR: &str = "/VMC/Ext/Bone/Pos";

/// Largest datagram we accept
const MAX_DATAGRAM: usize = 65536;

/// Pause after a failed receive before polling the socket again
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// VMC/OSC motion source
pub struct VmcSource {
    config: VmcConfig,
}

impl VmcSource {
    pub fn new(config: &VmcConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl MotionSource for VmcSource {
    fn bind(&self, avatar: Arc<AvatarState>, shutdown: broadcast::Receiver<()>) -> BindFuture {
        let addr = self.config.listen.clone();

        Box::pin(async move {
            let socket = UdpSocket::bind(&addr).await.map_err(|e| {
                TrackingError::VmcReceiver(format!("Failed to bind to {}: {}", addr, e))
            })?;

            tracing::info!("VMC receiver listening on {}", addr);
            let listen: ListenFuture = Box::pin(serve(socket, avatar, shutdown));
            Ok::<_, PosecastError>(listen)
        })
    }
}

/// Decode datagrams from `socket` into `avatar` until shutdown
pub async fn serve(
    socket: UdpSocket,
    avatar: Arc<AvatarState>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<(), PosecastError> {
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        let result = tokio::select! {
            result = socket.recv_from(&mut buf) => result,
            _ = shutdown.recv() => break,
        };

        match result {
            Ok((size, _)) => match rosc::decoder::decode_udp(&buf[..size]) {
                Ok((_, packet)) => apply_packet(&avatar, packet),
                Err(e) => tracing::debug!("Dropping undecodable OSC datagram: {:?}", e),
            },
            Err(e) => {
                if backoff_after_error(&e, &mut shutdown).await {
                    break;
                }
            }
        }
    }

    Ok(())
}

/// Log a receive error and wait before the next poll.
///
/// Errors are transient on some platforms (e.g. ICMP port unreachable), so
/// the loop keeps listening. Returns `true` if shutdown fired meanwhile.
async fn backoff_after_error(e: &std::io::Error, shutdown: &mut broadcast::Receiver<()>) -> bool {
    tracing::warn!("VMC receive error: {}", e);
    sleep_or_shutdown(RECV_ERROR_BACKOFF, shutdown).await
}

/// Apply every message in `packet`, recursing into bundles
pub fn apply_packet(avatar: &AvatarState, packet: OscPacket) {
    match packet {
        OscPacket::Message(msg) => {
            apply_message(avatar, &msg);
        }
        OscPacket::Bundle(bundle) => {
            for packet in bundle.content {
                apply_packet(avatar, packet);
            }
        }
    }
}

/// Apply a single message. Returns `true` if the avatar was written.
pub fn apply_message(avatar: &AvatarState, msg: &OscMessage) -> bool {
    match msg.addr.as_str() {
        BLEND_VALUE_ADDR => match decode_blend(&msg.args) {
            Some((name, value)) => {
                avatar.write_blend_shape(name, value);
                true
            }
            None => {
                tracing::trace!("Malformed blend message: {:?}", msg.args);
                false
            }
        },
        BONE_POSITION_ADDR => match decode_bone(&msg.args) {
            Some((name, bone)) => {
                avatar.write_bone(name, bone);
                true
            }
            None => {
                tracing::trace!("Malformed bone message: {:?}", msg.args);
                false
            }
        },
        _ => false,
    }
}

fn decode_blend(args: &[OscType]) -> Option<(String, f32)> {
    match args {
        [OscType::String(name), OscType::Float(value)] if !name.is_empty() => {
            Some((name.clone(), value.clamp(0.0, 1.0)))
        }
        _ => None,
    }
}

fn decode_bone(args: &[OscType]) -> Option<(String, Bone)> {
    let (name, rest) = match args {
        [OscType::String(name), rest @ ..] if !name.is_empty() && rest.len() == 7 => (name, rest),
        _ => return None,
    };

    let mut values = [0.0f32; 7];
    for (slot, arg) in values.iter_mut().zip(rest) {
        match arg {
            OscType::Float(f) => *slot = *f,
            _ => return None,
        }
    }

    let [px, py, pz, qx, qy, qz, qw] = values;
    Some((
        upper_camel(name),
        Bone::new(
            Position::new(px, py, pz),
            QuaternionRotation::new(qx, qy, qz, qw),
        ),
    ))
}

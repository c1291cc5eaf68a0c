//! End-to-end receiver tests over loopback sockets

use futures::SinkExt;
use parking_lot::RwLock;
use rosc::{OscMessage, OscPacket, OscType};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;

use posecast::avatar::AvatarState;
use posecast::config::{Config, Facemotion3dConfig};
use posecast::error::ReceiverError;
use posecast::tracking::facemotion3d::{self, LinkState, START_COMMAND, STOP_COMMAND};
use posecast::tracking::{build_registry, mediapipe, vmc};
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Reserve a loopback UDP port by binding and releasing it
fn free_udp_addr() -> String {
    let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    socket.local_addr().unwrap().to_string()
}

/// Reserve a loopback TCP port by binding and releasing it
fn free_tcp_addr() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().to_string()
}

async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(TIMEOUT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn blend_packet(name: &str, value: f32) -> Vec<u8> {
    rosc::encoder::encode(&OscPacket::Message(OscMessage {
        addr: vmc::BLEND_VALUE_ADDR.to_string(),
        args: vec![OscType::String(name.to_string()), OscType::Float(value)],
    }))
    .unwrap()
}

/// Frontal face mesh: eye corners and chin placed, everything else centered
fn frontal_mesh_json() -> String {
    let mut landmarks = vec![serde_json::json!({ "x": 0.5, "y": 0.5, "z": 0.0 }); 468];
    landmarks[33] = serde_json::json!({ "x": 0.40625, "y": 0.4166667, "z": 0.0 });
    landmarks[263] = serde_json::json!({ "x": 0.59375, "y": 0.4166667, "z": 0.0 });
    landmarks[152] = serde_json::json!({ "x": 0.5, "y": 0.6666667, "z": 0.0 });

    serde_json::json!({
        "landmarks": landmarks,
        "video": { "width": 640, "height": 480 },
    })
    .to_string()
}

#[tokio::test]
async fn vmc_receiver_through_registry() {
    let vmc_addr = free_udp_addr();
    let mut config = Config::default();
    config.vmc.listen = vmc_addr.clone();

    let avatar = Arc::new(AvatarState::new());
    let registry = build_registry(&config, Arc::clone(&avatar));
    registry.start(vmc::RECEIVER_NAME).await.unwrap();

    let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let packet = blend_packet("Joy", 0.8);

    tokio::time::timeout(TIMEOUT, async {
        while !avatar.snapshot(|f| f.blend_shapes.contains_key("Joy")) {
            sender.send_to(&packet, &vmc_addr).await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(avatar.snapshot(|f| f.blend_shapes["Joy"]), 0.8);

    // Stop releases the port so it can be bound again
    registry.stop().await;
    UdpSocket::bind(&vmc_addr).await.unwrap();
}

#[tokio::test]
async fn switch_clears_previous_receiver_state() {
    let mut config = Config::default();
    config.vmc.listen = free_udp_addr();
    config.mediapipe_web.listen = "127.0.0.1:0".to_string();

    let avatar = Arc::new(AvatarState::new());
    let registry = build_registry(&config, Arc::clone(&avatar));
    registry.start(vmc::RECEIVER_NAME).await.unwrap();
    avatar.write_blend_shape("Joy", 1.0);

    registry.switch("MediapipeWeb").await.unwrap();
    assert_eq!(registry.active().await.as_deref(), Some("MediapipeWeb"));
    assert!(avatar.snapshot(|f| f.blend_shapes.is_empty()));

    registry.stop().await;
}

#[tokio::test]
async fn facemotion3d_full_cycle() {
    let device = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let stream_addr = listener.local_addr().unwrap();

    let config = Facemotion3dConfig {
        listen: stream_addr.to_string(),
        device_ip: "127.0.0.1".to_string(),
        control_port: device.local_addr().unwrap().port(),
        settle_ms: 5,
        backoff_secs: 0,
    };

    let avatar = Arc::new(AvatarState::new());
    let link = Arc::new(RwLock::new(LinkState::Idle));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let task = tokio::spawn(facemotion3d::serve(
        listener,
        config,
        Arc::clone(&avatar),
        Arc::clone(&link),
        shutdown_rx,
    ));

    // Device is asked to stop, then to stream over TCP
    let mut buf = [0u8; 128];
    let n = tokio::time::timeout(TIMEOUT, device.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], STOP_COMMAND.as_bytes());
    let n = tokio::time::timeout(TIMEOUT, device.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], START_COMMAND.as_bytes());

    // Device connects back and sends frames split mid-marker
    let mut stream = TcpStream::connect(stream_addr).await.unwrap();
    stream
        .write_all(b"___FACEMOTION3DjawOpen&50|head#32,0,0|FM_x&1|___FACEMO")
        .await
        .unwrap();
    stream.write_all(b"TION3DjawOpen&70|___FACEMOTION3D").await.unwrap();

    wait_until(|| {
        avatar.snapshot(|f| {
            f.bones.contains_key("Head")
                && f
                    .blend_shapes
                    .get("JawOpen")
                    .map(|v| (v - 0.7).abs() < 1e-6)
                    .unwrap_or(false)
        })
    })
    .await;
    assert_eq!(*link.read(), LinkState::Streaming);
    assert!(avatar.snapshot(|f| !f.blend_shapes.contains_key("FM_x")));

    // Disconnect: the receiver goes back to asking the device to stream
    drop(stream);
    let n = tokio::time::timeout(TIMEOUT, device.recv(&mut buf)).await.unwrap().unwrap();
    assert_eq!(&buf[..n], STOP_COMMAND.as_bytes());

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(TIMEOUT, task).await.unwrap().unwrap().unwrap();
    assert_eq!(*link.read(), LinkState::Idle);
}

#[tokio::test]
async fn start_on_busy_port_is_not_recorded_active() {
    let held = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut config = Config::default();
    config.vmc.listen = held.local_addr().unwrap().to_string();

    let avatar = Arc::new(AvatarState::new());
    let registry = build_registry(&config, avatar);

    let err = registry.start(vmc::RECEIVER_NAME).await.unwrap_err();
    assert!(matches!(err, ReceiverError::StartFailed { ref name, .. } if name == vmc::RECEIVER_NAME));
    assert_eq!(registry.list().await.active, None);

    // Once the port is free the same receiver starts normally
    drop(held);
    registry.start(vmc::RECEIVER_NAME).await.unwrap();
    assert_eq!(registry.active().await.as_deref(), Some(vmc::RECEIVER_NAME));
    registry.stop().await;
}

#[tokio::test]
async fn mediapipe_sockets_stop_writing_after_switch() {
    let mut config = Config::default();
    config.vmc.listen = free_udp_addr();
    config.mediapipe_web.listen = free_tcp_addr();

    let avatar = Arc::new(AvatarState::new());
    let registry = build_registry(&config, Arc::clone(&avatar));
    registry.start(mediapipe::RECEIVER_NAME).await.unwrap();

    let url = format!("ws://{}/", config.mediapipe_web.listen);
    let (mut client, _) = tokio::time::timeout(TIMEOUT, tokio_tungstenite::connect_async(url))
        .await
        .unwrap()
        .unwrap();

    let mesh = frontal_mesh_json();
    client.send(Message::Text(mesh.clone())).await.unwrap();
    wait_until(|| avatar.snapshot(|f| f.bones.contains_key("Head"))).await;

    registry.switch(vmc::RECEIVER_NAME).await.unwrap();
    assert!(avatar.snapshot(|f| f.bones.is_empty()));

    // The upgraded socket is gone; nothing it sends may reach the avatar
    let _ = client.send(Message::Text(mesh)).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(avatar.snapshot(|f| !f.bones.contains_key("Head")));

    registry.stop().await;
}

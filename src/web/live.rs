//! Live WebSocket feeds
//!
//! - `/live/read/model`: avatar pushed at the model update frequency
//! - `/live/read/camera`: camera on connect and on every change
//! - `/live/write/camera`: camera updates from an editor client
//! - `/live/read/config`: receiver and scene changes

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::avatar::Camera;
use crate::pool::{BroadcastPool, Subscription};
use crate::{AppState, ConfigUpdate};

/// Updates queued per reader before it is dropped as too slow
const READER_QUEUE: usize = 64;

/// Stream the avatar to a viewer
pub async fn read_model(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| model_reader(socket, state))
}

/// Stream camera changes to a viewer
pub async fn read_camera(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let initial = vec![state.camera().await];
        relay_pool(socket, state.camera_pool.clone(), initial, &state).await;
    })
}

/// Accept camera changes from an editor
pub async fn write_camera(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| camera_writer(socket, state))
}

/// Stream receiver and scene changes
pub async fn read_config(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        let initial = vec![
            ConfigUpdate::Receiver(state.receivers.list().await),
            ConfigUpdate::Scene(state.scene.read().await.clone()),
        ];
        relay_pool(socket, state.config_pool.clone(), initial, &state).await;
    })
}

/// Interval between model pushes for a given frequency
pub fn update_interval(frequency: u32) -> Duration {
    Duration::from_secs_f64(1.0 / f64::from(frequency.max(1)))
}

async fn model_reader(mut socket: WebSocket, state: Arc<AppState>) {
    let interval = update_interval(state.config.read().await.http.model_update_frequency);
    let mut shutdown = state.subscribe_shutdown();
    tracing::info!("Model reader connected ({:?} interval)", interval);

    loop {
        // Serialize under the avatar locks, send after releasing them
        let json = match state.avatar.to_json() {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize avatar: {}", e);
                break;
            }
        };

        if socket.send(Message::Text(json)).await.is_err() {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            msg = socket.recv() => match msg {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown.recv() => break,
        }
    }

    tracing::info!("Model reader disconnected");
}

/// Forward every pool payload to the socket until either side goes away
async fn relay_pool<T>(socket: WebSocket, pool: BroadcastPool<T>, initial: Vec<T>, state: &AppState)
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    let (tx, mut rx) = mpsc::channel::<T>(READER_QUEUE);
    for payload in initial {
        let _ = tx.try_send(payload);
    }

    let subscription = subscribe_bounded(&pool, tx);
    pool.log_count();

    let (mut sender, mut receiver) = socket.split();
    let mut shutdown = state.subscribe_shutdown();

    let mut send_task = tokio::spawn(async move {
        while let Some(payload) = rx.recv().await {
            let json = match serde_json::to_string(&payload) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize live update: {}", e);
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(msg) = receiver.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => break,
                Ok(_) => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
        _ = shutdown.recv() => {
            send_task.abort();
            recv_task.abort();
        }
    }

    subscription.delete();
    pool.log_count();
}

/// Subscribe `tx` to `pool` without ever blocking the publisher.
///
/// A reader whose queue is full or closed is deleted from the pool; its
/// socket then drains what was queued and the connection is dropped.
fn subscribe_bounded<T>(pool: &BroadcastPool<T>, tx: mpsc::Sender<T>) -> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    pool.create(move |payload: &T, me| {
        if let Err(e) = tx.try_send(payload.clone()) {
            match e {
                mpsc::error::TrySendError::Full(_) => tracing::warn!("Live reader too slow, dropping it"),
                mpsc::error::TrySendError::Closed(_) => {}
            }
            me.delete();
        }
    })
}

async fn camera_writer(mut socket: WebSocket, state: Arc<AppState>) {
    let mut shutdown = state.subscribe_shutdown();
    tracing::info!("Camera writer connected");

    loop {
        tokio::select! {
            msg = socket.recv() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Camera>(&text) {
                    Ok(camera) => state.update_camera(camera).await,
                    Err(e) => tracing::debug!("Dropping malformed camera: {}", e),
                },
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = shutdown.recv() => break,
        }
    }

    tracing::info!("Camera writer disconnected");
}

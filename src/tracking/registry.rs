//! Named receivers with at most one active at a time

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{MotionReceiver, MotionSource};
use crate::avatar::AvatarState;
use crate::error::ReceiverError;

/// Active receiver and every receiver that can be selected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiverInfo {
    pub active: Option<String>,
    pub available: Vec<String>,
    /// Link status of the active receiver, when it reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// Holds every receiver by name and swaps the active one on request
pub struct ReceiverRegistry {
    receivers: BTreeMap<String, MotionReceiver>,
    // Held across stop/start so swaps are serialized
    active: Mutex<Option<String>>,
    avatar: Arc<AvatarState>,
}

impl ReceiverRegistry {
    pub fn new(avatar: Arc<AvatarState>) -> Self {
        Self {
            receivers: BTreeMap::new(),
            active: Mutex::new(None),
            avatar,
        }
    }

    /// Add a receiver under `name`, replacing any previous one
    pub fn register(&mut self, name: &str, source: Arc<dyn MotionSource>) {
        let receiver = MotionReceiver::new(name, source, Arc::clone(&self.avatar));
        self.receivers.insert(name.to_string(), receiver);
    }

    /// Start `name`.
    ///
    /// Fails if it is unknown, another receiver is active, or its sockets
    /// cannot be bound. Only a receiver that bound is recorded as active.
    pub async fn start(&self, name: &str) -> Result<(), ReceiverError> {
        let mut active = self.active.lock().await;

        let receiver = self
            .receivers
            .get(name)
            .ok_or_else(|| ReceiverError::NotFound(name.to_string()))?;

        if let Some(current) = active.as_ref() {
            return Err(ReceiverError::AlreadyActive(current.clone()));
        }

        start_receiver(name, receiver).await?;
        *active = Some(name.to_string());
        Ok(())
    }

    /// Stop the active receiver, if any, and wait for its sockets to close
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        self.stop_locked(&mut active).await;
    }

    /// Replace the active receiver with `name`.
    ///
    /// An unknown name leaves the current receiver running. Otherwise the
    /// current receiver is stopped, the avatar is cleared, and `name` starts.
    /// If `name` fails to bind, no receiver is left active.
    pub async fn switch(&self, name: &str) -> Result<(), ReceiverError> {
        let mut active = self.active.lock().await;

        let receiver = self
            .receivers
            .get(name)
            .ok_or_else(|| ReceiverError::NotFound(name.to_string()))?;

        self.stop_locked(&mut active).await;
        self.avatar.clear();

        start_receiver(name, receiver).await?;
        *active = Some(name.to_string());
        tracing::info!("Active receiver is now {}", name);
        Ok(())
    }

    /// Active receiver, its link status, and sorted list of available names
    pub async fn list(&self) -> ReceiverInfo {
        let active = self.active.lock().await.clone();
        let status = active
            .as_ref()
            .and_then(|name| self.receivers.get(name))
            .and_then(MotionReceiver::status);

        ReceiverInfo {
            active,
            available: self.receivers.keys().cloned().collect(),
            status,
        }
    }

    /// Name of the active receiver
    pub async fn active(&self) -> Option<String> {
        self.active.lock().await.clone()
    }

    async fn stop_locked(&self, active: &mut Option<String>) {
        let Some(name) = active.take() else {
            return;
        };

        if let Some(receiver) = self.receivers.get(&name) {
            receiver.stop().await;
        }
        tracing::info!("{} receiver deactivated", name);
    }
}

async fn start_receiver(name: &str, receiver: &MotionReceiver) -> Result<(), ReceiverError> {
    receiver.start().await.map_err(|e| {
        tracing::error!("{} receiver failed to start: {}", name, e);
        ReceiverError::StartFailed {
            name: name.to_string(),
            message: e.to_string(),
        }
    })
}

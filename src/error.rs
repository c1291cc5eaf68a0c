//! Error types for Posecast

use thiserror::Error;

/// Main error type for Posecast
#[derive(Error, Debug)]
pub enum PosecastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Receiver error: {0}")]
    Receiver(#[from] ReceiverError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Web server error: {0}")]
    Web(#[from] WebError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadFile(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid configuration value: {field} - {message}")]
    InvalidValue { field: String, message: String },

    #[error("Failed to persist scene: {0}")]
    SceneWrite(String),
}

/// Receiver registry errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReceiverError {
    #[error("Receiver not found: {0}")]
    NotFound(String),

    #[error("Receiver already active: {0}")]
    AlreadyActive(String),

    #[error("Receiver {name} failed to start: {message}")]
    StartFailed { name: String, message: String },
}

/// Errors raised inside a motion receiver's listen loop
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("VMC receiver error: {0}")]
    VmcReceiver(String),

    #[error("Facemotion3D receiver error: {0}")]
    Fm3dReceiver(String),

    #[error("Facemotion3D control error: {0}")]
    Fm3dControl(String),

    #[error("MediaPipe web receiver error: {0}")]
    MpReceiver(String),
}

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Failed to bind to address: {0}")]
    Bind(String),

    #[error("Server startup failed: {0}")]
    Startup(String),
}

/// Result type alias for Posecast operations
pub type Result<T> = std::result::Result<T, PosecastError>;

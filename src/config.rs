//! Configuration parsing and management for Posecast

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, PosecastError};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub receiver: ReceiverConfig,
    pub vmc: VmcConfig,
    pub facemotion3d: Facemotion3dConfig,
    pub mediapipe_web: MediaPipeWebConfig,
    pub http: HttpConfig,
    pub paths: PathsConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, PosecastError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(s: &str) -> Result<Self, PosecastError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, PosecastError> {
        let paths = [
            PathBuf::from("posecast.toml"),
            PathBuf::from("config/default.toml"),
            config_dir().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), PosecastError> {
        let addresses = [
            ("vmc.listen", &self.vmc.listen),
            ("facemotion3d.listen", &self.facemotion3d.listen),
            ("mediapipe_web.listen", &self.mediapipe_web.listen),
            ("http.listen", &self.http.listen),
        ];

        for (field, value) in addresses {
            parse_addr(field, value)?;
        }

        if self.facemotion3d.device_ip.parse::<std::net::IpAddr>().is_err() {
            return Err(ConfigError::InvalidValue {
                field: "facemotion3d.device_ip".to_string(),
                message: format!("'{}' is not an IP address", self.facemotion3d.device_ip),
            }
            .into());
        }

        if self.http.model_update_frequency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "http.model_update_frequency".to_string(),
                message: "Update frequency must be greater than 0".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

/// Parse a `host:port` config value into a socket address
pub fn parse_addr(field: &str, value: &str) -> Result<SocketAddr, PosecastError> {
    value.parse::<SocketAddr>().map_err(|e| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("'{}' is not a host:port address ({})", value, e),
        }
        .into()
    })
}

/// Active receiver selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Name of the receiver started at launch
    pub active: String,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            active: "VirtualMotionCapture".to_string(),
        }
    }
}

/// VMC protocol configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmcConfig {
    /// UDP address the OSC listener binds to
    pub listen: String,
}

impl Default for VmcConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:39540".to_string(),
        }
    }
}

/// Facemotion3D configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Facemotion3dConfig {
    /// TCP address the frame stream is accepted on
    pub listen: String,
    /// IP of the phone running Facemotion3D
    pub device_ip: String,
    /// UDP port the device listens on for control commands
    pub control_port: u16,
    /// Pause between the stop and start commands (milliseconds)
    pub settle_ms: u64,
    /// Wait before retrying after a network failure (seconds)
    pub backoff_secs: u64,
}

impl Facemotion3dConfig {
    /// Full `ip:port` of the device control socket
    pub fn device_addr(&self) -> String {
        format!("{}:{}", self.device_ip, self.control_port)
    }
}

impl Default for Facemotion3dConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:49986".to_string(),
            device_ip: "127.0.0.1".to_string(),
            control_port: 49993,
            settle_ms: 500,
            backoff_secs: 3,
        }
    }
}

/// Browser landmark feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaPipeWebConfig {
    /// Address of the landmark WebSocket server
    pub listen: String,
}

impl Default for MediaPipeWebConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:2332".to_string(),
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// API and live WebSocket address
    pub listen: String,
    /// Enable permissive CORS
    pub cors_enabled: bool,
    /// Times per second the avatar is pushed to each model reader
    pub model_update_frequency: u32,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3579".to_string(),
            cors_enabled: true,
            model_update_frequency: 60,
        }
    }
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Scene (camera) JSON file
    pub scene_file: PathBuf,
    /// VRM model served to the frontend
    pub vrm_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let dir = data_dir();
        Self {
            scene_file: dir.join("scene.json"),
            vrm_file: dir.join("default.vrm"),
        }
    }
}

/// Get the platform-specific configuration directory
fn config_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("posecast");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/posecast");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/posecast");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("posecast");
        }
    }

    PathBuf::from(".")
}

/// Get the platform-specific data directory (scene, model)
fn data_dir() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(data_dir) = std::env::var_os("XDG_DATA_HOME") {
            return PathBuf::from(data_dir).join("posecast");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".local/share/posecast");
        }
    }

    config_dir()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.receiver.active, "VirtualMotionCapture");
        assert_eq!(config.vmc.listen, "0.0.0.0:39540");
        assert_eq!(config.facemotion3d.device_addr(), "127.0.0.1:49993");
        assert_eq!(config.http.model_update_frequency, 60);
    }

    #[test]
    fn test_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_listen_address() {
        let mut config = Config::default();
        config.vmc.listen = "not-an-address".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_update_frequency() {
        let mut config = Config::default();
        config.http.model_update_frequency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml = r#"
            [receiver]
            active = "Facemotion3D"

            [facemotion3d]
            device_ip = "10.0.1.220"

            [http]
            model_update_frequency = 30
        "#;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.receiver.active, "Facemotion3D");
        assert_eq!(config.facemotion3d.device_addr(), "10.0.1.220:49993");
        assert_eq!(config.facemotion3d.listen, "0.0.0.0:49986");
        assert_eq!(config.http.model_update_frequency, 30);
    }
}

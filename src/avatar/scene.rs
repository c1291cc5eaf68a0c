//! Camera and persisted scene

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::state::Position;
use crate::error::{ConfigError, PosecastError};

/// Viewer eye position and look target
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Camera {
    pub gaze_towards: Position,
    pub gaze_from: Position,
}

/// Scene settings that survive restarts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub camera: Camera,
}

impl Default for Scene {
    fn default() -> Self {
        Self {
            camera: Camera {
                gaze_towards: Position::new(0.0, 0.0, 0.0),
                gaze_from: Position::new(3.0, 3.0, 3.0),
            },
        }
    }
}

impl Scene {
    /// Load a scene from disk, writing the default scene first if the file is missing
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, PosecastError> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::info!("No scene at {}, creating default", path.display());
            let scene = Self::default();
            scene.save(path)?;
            return Ok(scene);
        }

        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(format!("{}: {}", path.display(), e)))?;

        serde_json::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Write the scene as pretty JSON
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), PosecastError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SceneWrite(e.to_string()))?;
        std::fs::write(path, json)
            .map_err(|e| ConfigError::SceneWrite(format!("{}: {}", path.display(), e)))?;

        Ok(())
    }
}

//! Live avatar state shared between the active receiver and transport readers
//!
//! Bones and blend shapes sit behind two independent locks so a bone write
//! never contends with a blend-shape write. A snapshot holds both read locks
//! for the duration of its callback, which makes each snapshot internally
//! consistent per map. Between snapshots the two maps may advance at
//! different rates; readers can observe bones from a newer tick than blend
//! shapes. This is accepted for a telemetry feed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Position in scene space (meters)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Position {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Quaternion rotation (x, y, z, w)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuaternionRotation {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl QuaternionRotation {
    pub const IDENTITY: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }
}

impl Default for QuaternionRotation {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<glam::Quat> for QuaternionRotation {
    fn from(q: glam::Quat) -> Self {
        let [x, y, z, w] = q.to_array();
        Self { x, y, z, w }
    }
}

/// Rotation wrapper, serialized as `{"quaternion": {...}}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub quaternion: QuaternionRotation,
}

/// A single humanoid bone transform
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Bone {
    pub position: Position,
    pub rotation: Rotation,
}

impl Bone {
    pub fn new(position: Position, rotation: QuaternionRotation) -> Self {
        Self {
            position,
            rotation: Rotation {
                quaternion: rotation,
            },
        }
    }

    /// Bone with only a rotation; position stays at the origin
    pub fn from_rotation(rotation: QuaternionRotation) -> Self {
        Self::new(Position::default(), rotation)
    }
}

/// Blend shape weight, 0.0 - 1.0
pub type BlendShape = f32;

/// Borrowed view of the avatar handed to snapshot callbacks.
///
/// Serializes to the wire object sent to model readers:
/// `{"bones": {...}, "blend_shapes": {...}}`.
#[derive(Debug, Serialize)]
pub struct AvatarFrame<'a> {
    pub bones: &'a HashMap<String, Bone>,
    pub blend_shapes: &'a HashMap<String, BlendShape>,
}

/// Concurrency-safe container for bone transforms and blend-shape weights
#[derive(Debug, Default)]
pub struct AvatarState {
    bones: RwLock<HashMap<String, Bone>>,
    blend_shapes: RwLock<HashMap<String, BlendShape>>,
}

impl AvatarState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a bone transform; last write wins
    pub fn write_bone(&self, name: impl Into<String>, bone: Bone) {
        self.bones.write().insert(name.into(), bone);
    }

    /// Replace a blend shape weight; last write wins
    pub fn write_blend_shape(&self, name: impl Into<String>, value: BlendShape) {
        self.blend_shapes.write().insert(name.into(), value);
    }

    /// Run `f` against a consistent view of both maps.
    ///
    /// Both read locks are held until `f` returns, so `f` must not block
    /// (serialize and return; do the socket write outside).
    pub fn snapshot<R>(&self, f: impl FnOnce(AvatarFrame<'_>) -> R) -> R {
        // Lock order is bones, then blend shapes. Writers only ever take one.
        let bones = self.bones.read();
        let blend_shapes = self.blend_shapes.read();

        f(AvatarFrame {
            bones: &bones,
            blend_shapes: &blend_shapes,
        })
    }

    /// Serialize the current state to the JSON wire format
    pub fn to_json(&self) -> serde_json::Result<String> {
        self.snapshot(|frame| serde_json::to_string(&frame))
    }

    pub fn bone_count(&self) -> usize {
        self.snapshot(|frame| frame.bones.len())
    }

    pub fn blend_shape_count(&self) -> usize {
        self.snapshot(|frame| frame.blend_shapes.len())
    }

    /// Drop every bone and blend shape (used when the source changes)
    pub fn clear(&self) {
        self.bones.write().clear();
        self.blend_shapes.write().clear();
    }
}

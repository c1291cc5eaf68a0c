//! Avatar data model
//!
//! Live bone and blend-shape state, plus the camera/scene shared with viewers.

pub mod scene;
pub mod state;

pub use scene::{Camera, Scene};
pub use state::{AvatarFrame, AvatarState, BlendShape, Bone, Position, QuaternionRotation, Rotation};

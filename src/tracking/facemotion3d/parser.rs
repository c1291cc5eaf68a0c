//! Facemotion3D frame grammar
//!
//! ```text
//! frame      = field *( "|" field )
//! field      = blend / bone / other
//! blend      = name "&" number              ; 0 - 100
//! bone       = name "#" number "," number "," number
//! ```
//!
//! Names are lower camel case on the wire and stored upper camel case.
//! Bone names may carry stray `=` characters, which are removed. Any name
//! containing the vendor marker `FM_` is device metadata and never stored.
//! A field that fails to parse is skipped without affecting the rest of the
//! frame.

use glam::{EulerRot, Quat};

use crate::avatar::{AvatarState, Bone, QuaternionRotation};
use crate::tracking::upper_camel;

/// Names containing this are device metadata
pub const VENDOR_MARKER: &str = "FM_";

/// Raw head angles are scaled by this before conversion
pub const HEAD_DIVISOR: f32 = 32.0;

/// Raw angles of every other bone are scaled by this before conversion
pub const BONE_DIVISOR: f32 = 128.0;

const FIELD_SEPARATOR: char = '|';
const BLEND_SEPARATOR: char = '&';
const BONE_SEPARATOR: char = '#';

/// One decoded field of a frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameField {
    BlendShape { name: String, value: f32 },
    Bone { name: String, rotation: QuaternionRotation },
}

/// Parse one `|`-separated field. Returns `None` for anything that should
/// not be written.
pub fn parse_field(field: &str) -> Option<FrameField> {
    let field = field.trim();
    if field.is_empty() {
        return None;
    }

    if let Some((name, value)) = field.split_once(BLEND_SEPARATOR) {
        if !is_storable(name) {
            return None;
        }
        let value: f32 = value.trim().parse().ok()?;
        return Some(FrameField::BlendShape {
            name: upper_camel(name),
            value: (value / 100.0).clamp(0.0, 1.0),
        });
    }

    if let Some((name, values)) = field.split_once(BONE_SEPARATOR) {
        let name = name.replace('=', "");
        if !is_storable(&name) {
            return None;
        }
        let name = upper_camel(&name);

        let [x, y, z] = parse_triplet(values)?;
        let divisor = if name == "Head" {
            HEAD_DIVISOR
        } else {
            BONE_DIVISOR
        };

        return Some(FrameField::Bone {
            rotation: euler_to_quaternion(x / divisor, y / divisor, -(z / divisor)),
            name,
        });
    }

    None
}

/// Decode every storable field of a frame
pub fn parse_frame(frame: &str) -> impl Iterator<Item = FrameField> + '_ {
    frame.split(FIELD_SEPARATOR).filter_map(parse_field)
}

/// Write a frame into the avatar. Returns the number of fields written.
pub fn apply_frame(avatar: &AvatarState, frame: &str) -> usize {
    let mut written = 0;
    for field in parse_frame(frame) {
        match field {
            FrameField::BlendShape { name, value } => avatar.write_blend_shape(name, value),
            FrameField::Bone { name, rotation } => {
                avatar.write_bone(name, Bone::from_rotation(rotation))
            }
        }
        written += 1;
    }
    written
}

/// Euler angles (radians) to a quaternion, rotating about X, then Y, then Z
/// in the fixed frame.
pub fn euler_to_quaternion(x: f32, y: f32, z: f32) -> QuaternionRotation {
    Quat::from_euler(EulerRot::ZYX, z, y, x).into()
}

fn is_storable(name: &str) -> bool {
    !name.is_empty() && !name.contains(VENDOR_MARKER)
}

fn parse_triplet(values: &str) -> Option<[f32; 3]> {
    let mut parts = values.split(',').map(|v| v.trim().parse::<f32>());
    let x = parts.next()?.ok()?;
    let y = parts.next()?.ok()?;
    let z = parts.next()?.ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some([x, y, z])
}

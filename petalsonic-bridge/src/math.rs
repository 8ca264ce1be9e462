//! Math types for PetalSonic Bridge
//!
//! Two coordinate conventions meet here. Host transforms carry a basis whose
//! columns are `right`, `up` and `backward` (forward is `-Z`), the way most
//! scene graphs store them. The acoustic engine wants an explicit
//! `right`/`up`/`ahead` frame plus an origin, which is [`CoordinateSpace`].

pub use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Component-wise tolerance used when comparing transforms.
pub const TRANSFORM_EPSILON: f32 = 1.0e-5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn identity() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: Quat::IDENTITY,
        }
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * (-Vec3::Z)
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn look_at(&mut self, target: Vec3) {
        let forward = (target - self.position).normalize_or_zero();
        if forward != Vec3::ZERO {
            self.rotation = Quat::from_rotation_arc(-Vec3::Z, forward);
        }
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::identity()
    }
}

/// A host-side transform: a 3x3 basis and an origin.
///
/// The basis is not required to be orthonormal; scaled nodes produce scaled
/// columns and callers decide whether that matters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub basis: Mat3,
    pub origin: Vec3,
}

impl Transform {
    pub const IDENTITY: Self = Self {
        basis: Mat3::IDENTITY,
        origin: Vec3::ZERO,
    };

    pub fn new(basis: Mat3, origin: Vec3) -> Self {
        Self { basis, origin }
    }

    pub fn from_origin(origin: Vec3) -> Self {
        Self {
            basis: Mat3::IDENTITY,
            origin,
        }
    }

    /// Converts into the engine's right/up/ahead frame.
    pub fn to_coordinate_space(&self) -> CoordinateSpace {
        CoordinateSpace {
            origin: self.origin,
            right: self.basis.x_axis,
            up: self.basis.y_axis,
            ahead: -self.basis.z_axis,
        }
    }

    /// Approximate equality: every basis and origin component within
    /// [`TRANSFORM_EPSILON`].
    pub fn approx_eq(&self, other: &Self) -> bool {
        self.basis.abs_diff_eq(other.basis, TRANSFORM_EPSILON)
            && self.origin.abs_diff_eq(other.origin, TRANSFORM_EPSILON)
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Pose> for Transform {
    fn from(pose: Pose) -> Self {
        Self {
            basis: Mat3::from_quat(pose.rotation),
            origin: pose.position,
        }
    }
}

/// The engine-side frame: origin plus right/up/ahead axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateSpace {
    pub origin: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub ahead: Vec3,
}

impl CoordinateSpace {
    pub const IDENTITY: Self = Self {
        origin: Vec3::ZERO,
        right: Vec3::X,
        up: Vec3::Y,
        ahead: Vec3::NEG_Z,
    };

    /// Builds a frame from middleware-style 3D attributes.
    ///
    /// Middleware events report `forward` and `up` but no `right`, and neither
    /// is guaranteed to be exactly orthogonal, so `right` is rebuilt from their
    /// normalized cross product.
    pub fn from_forward_up(origin: Vec3, forward: Vec3, up: Vec3) -> Self {
        Self {
            origin,
            right: forward.cross(up).normalize_or_zero(),
            up,
            ahead: forward,
        }
    }

    pub fn to_transform(&self) -> Transform {
        Transform {
            basis: Mat3::from_cols(self.right, self.up, -self.ahead),
            origin: self.origin,
        }
    }
}

impl Default for CoordinateSpace {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl From<Pose> for CoordinateSpace {
    fn from(pose: Pose) -> Self {
        Self {
            origin: pose.position,
            right: pose.right(),
            up: pose.up(),
            ahead: pose.forward(),
        }
    }
}

/// A sphere in world space: probe extents or a baked-data influence region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    pub center: Vec3,
    pub radius: f32,
}

impl Sphere {
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }
}

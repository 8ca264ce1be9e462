//! Host physics queries used by occlusion processors.
//!
//! The bridge does not own any collision world. Hosts expose theirs through
//! [`RayTracer`] and the bridge hands it to each
//! [`OcclusionProcessor`](crate::occlusion::OcclusionProcessor) once per
//! physics frame.

use super::AudioMaterial;
use crate::math::Vec3;

/// Result of a ray intersection test.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Whether the ray hit any geometry
    pub hit: bool,

    /// Distance from ray origin to hit point (in meters)
    ///
    /// Only meaningful if `hit` is true
    pub distance: f32,

    /// Surface normal at the hit point, pointing away from the surface
    pub normal: Vec3,

    /// Acoustic material of the hit surface
    pub material: AudioMaterial,
}

impl RayHit {
    pub fn miss() -> Self {
        Self {
            hit: false,
            distance: 0.0,
            normal: Vec3::ZERO,
            material: AudioMaterial::default(),
        }
    }

    pub fn new(distance: f32, normal: Vec3, material: AudioMaterial) -> Self {
        Self {
            hit: true,
            distance,
            normal,
            material,
        }
    }
}

impl Default for RayHit {
    fn default() -> Self {
        Self::miss()
    }
}

/// Ray queries against the host's collision world.
///
/// # Thread Safety
///
/// Called from the physics thread only, but implementations must still be
/// `Send + Sync` because processors are stored inside the shared bridge.
///
/// # Example
///
/// ```
/// use petalsonic_bridge::math::Vec3;
/// use petalsonic_bridge::scene::{RayHit, RayTracer};
///
/// /// An infinite wall at `x = wall_x`.
/// struct Wall {
///     wall_x: f32,
/// }
///
/// impl RayTracer for Wall {
///     fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RayHit {
///         if direction.x.abs() < f32::EPSILON {
///             return RayHit::miss();
///         }
///         let t = (self.wall_x - origin.x) / direction.x;
///         if t > 0.0 && t <= max_distance {
///             RayHit::new(t, Vec3::new(-direction.x.signum(), 0.0, 0.0), Default::default())
///         } else {
///             RayHit::miss()
///         }
///     }
/// }
///
/// let wall = Wall { wall_x: 2.0 };
/// assert!(wall.cast_ray(Vec3::ZERO, Vec3::X, 10.0).hit);
/// assert!(!wall.cast_ray(Vec3::ZERO, -Vec3::X, 10.0).hit);
/// ```
pub trait RayTracer: Send + Sync {
    /// Returns the closest hit along `direction` (normalized) within
    /// `max_distance`, or [`RayHit::miss`].
    fn cast_ray(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> RayHit;
}

/// A world with nothing in it. Every ray misses.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyWorld;

impl RayTracer for EmptyWorld {
    fn cast_ray(&self, _origin: Vec3, _direction: Vec3, _max_distance: f32) -> RayHit {
        RayHit::miss()
    }
}

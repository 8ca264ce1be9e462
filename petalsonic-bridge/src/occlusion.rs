//! Host-driven occlusion.
//!
//! An [`OcclusionProcessor`] computes an occlusion value for one source from
//! the host's collision world. Processors are registered per event GUID; once
//! per physics frame the bridge runs the matching processor for every active
//! source and writes the clamped result to the source's spatializer as its
//! occlusion override.

use crate::math::{Transform, Vec3};
use crate::middleware::{AudioMiddleware, SpatializerParam, log_middleware_error};
use crate::registry::SharedSourceRegistry;
use crate::scene::RayTracer;
use crate::source::AcousticSource;
use std::collections::HashMap;
use std::sync::Arc;

/// Computes how much of a source reaches the listener.
///
/// Implementations return a value in `[0, 1]`, where `1` means unoccluded.
/// Values outside that range are clamped by the bridge.
///
/// # Example
///
/// ```
/// use petalsonic_bridge::occlusion::OcclusionProcessor;
/// use petalsonic_bridge::scene::RayTracer;
/// use petalsonic_bridge::{AcousticSource, Transform};
///
/// /// Muffles a source by a fixed amount.
/// struct Muffled(f32);
///
/// impl OcclusionProcessor for Muffled {
///     fn compute_occlusion(
///         &self,
///         _world: &dyn RayTracer,
///         _source: &AcousticSource,
///         _listener: &Transform,
///     ) -> f32 {
///         self.0
///     }
/// }
/// ```
pub trait OcclusionProcessor: Send + Sync {
    fn compute_occlusion(
        &self,
        world: &dyn RayTracer,
        source: &AcousticSource,
        listener: &Transform,
    ) -> f32;
}

/// Casts a single ray from the listener to the source.
///
/// A clear line of sight yields `1.0`. A blocked one yields the mean
/// transmission of the blocking material, scaled by `transmission_scale`.
#[derive(Debug, Clone, Copy)]
pub struct RaycastOcclusion {
    pub transmission_scale: f32,
}

impl Default for RaycastOcclusion {
    fn default() -> Self {
        Self {
            transmission_scale: 1.0,
        }
    }
}

impl OcclusionProcessor for RaycastOcclusion {
    fn compute_occlusion(
        &self,
        world: &dyn RayTracer,
        source: &AcousticSource,
        listener: &Transform,
    ) -> f32 {
        let to_source = source.transform().origin - listener.origin;
        let distance = to_source.length();
        if distance <= f32::EPSILON {
            return 1.0;
        }

        let direction: Vec3 = to_source / distance;
        let hit = world.cast_ray(listener.origin, direction, distance);
        if hit.hit && hit.distance < distance {
            hit.material.mean_transmission() * self.transmission_scale
        } else {
            1.0
        }
    }
}

/// Processors keyed by event GUID.
#[derive(Default)]
pub struct OcclusionRegistry {
    processors: HashMap<String, Arc<dyn OcclusionProcessor>>,
}

impl OcclusionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `processor` for events with `guid`, replacing any earlier one.
    pub fn register(&mut self, guid: impl Into<String>, processor: Arc<dyn OcclusionProcessor>) {
        self.processors.insert(guid.into(), processor);
    }

    pub fn unregister(&mut self, guid: &str) -> bool {
        self.processors.remove(guid).is_some()
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    /// Runs the matching processor for every active source and writes the
    /// result to its spatializer. Returns how many sources were processed.
    pub fn process(
        &self,
        registry: &SharedSourceRegistry,
        middleware: &dyn AudioMiddleware,
        world: &dyn RayTracer,
        listener: &Transform,
    ) -> usize {
        if self.processors.is_empty() {
            return 0;
        }

        let mut processed = 0;
        registry.for_each(|source| {
            let Some(processor) = self.processors.get(source.guid()) else {
                return;
            };
            let Some(effect) = source.effect() else {
                return;
            };

            let occlusion = processor
                .compute_occlusion(world, source, listener)
                .clamp(0.0, 1.0);
            match middleware.set_effect_float(effect, SpatializerParam::Occlusion, occlusion) {
                Ok(()) => processed += 1,
                Err(e) => log_middleware_error("Writing occlusion", &e),
            }
        });
        processed
    }
}

impl std::fmt::Debug for OcclusionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OcclusionRegistry")
            .field("guids", &self.processors.keys().collect::<Vec<_>>())
            .finish()
    }
}

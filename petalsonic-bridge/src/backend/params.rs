//! Plain parameter structs exchanged with an [`AcousticBackend`](super::AcousticBackend).
//!
//! These mirror the shapes of Steam Audio's C structs without tying callers to
//! any binding. Defaults carry the values the bridge uses for every source.

use super::RawHandle;
use crate::math::{CoordinateSpace, Sphere};
use bitflags::bitflags;
use glam::Mat4;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Which simulation stages a call applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SimulationFlags: u32 {
        const DIRECT = 1 << 0;
        const REFLECTIONS = 1 << 1;
        const PATHING = 1 << 2;
    }
}

bitflags! {
    /// Per-source direct path features.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DirectSimulationFlags: u32 {
        const DISTANCE_ATTENUATION = 1 << 0;
        const AIR_ABSORPTION = 1 << 1;
        const DIRECTIVITY = 1 << 2;
        const OCCLUSION = 1 << 3;
        const TRANSMISSION = 1 << 4;
    }
}

bitflags! {
    /// What a reflections bake stores in each probe.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct ReflectionsBakeFlags: u32 {
        const BAKE_CONVOLUTION = 1 << 0;
        const BAKE_PARAMETRIC = 1 << 1;
    }
}

/// Ray tracing implementation backing a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SceneBackend {
    /// Built-in CPU ray tracer.
    #[default]
    Default,
    Embree,
    /// GPU ray tracing; needs OpenCL and Radeon Rays devices.
    RadeonRays,
}

/// Accelerator devices a context can create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    Embree,
    OpenCl,
    RadeonRays,
    TrueAudioNext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReflectionEffectKind {
    #[default]
    Convolution,
    Parametric,
    Hybrid,
    TrueAudioNext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OcclusionKind {
    #[default]
    Raycast,
    Volumetric,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BakedDataType {
    Reflections,
    Pathing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BakedDataVariation {
    /// Listener-centric reverb, independent of any emitter.
    Reverb,
    /// Reflections from a fixed emitter position.
    StaticSource,
    /// Reflections towards a fixed listener position.
    StaticListener,
    /// Pathing data usable for any source/listener pair.
    Dynamic,
}

/// Names one layer of baked data inside a probe batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BakedDataIdentifier {
    pub data_type: BakedDataType,
    pub variation: BakedDataVariation,
    pub endpoint_influence: Option<Sphere>,
}

impl BakedDataIdentifier {
    pub fn reverb() -> Self {
        Self {
            data_type: BakedDataType::Reflections,
            variation: BakedDataVariation::Reverb,
            endpoint_influence: None,
        }
    }

    pub fn static_source(influence: Sphere) -> Self {
        Self {
            data_type: BakedDataType::Reflections,
            variation: BakedDataVariation::StaticSource,
            endpoint_influence: Some(influence),
        }
    }

    pub fn pathing() -> Self {
        Self {
            data_type: BakedDataType::Pathing,
            variation: BakedDataVariation::Dynamic,
            endpoint_influence: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContextSettings {
    pub enable_validation: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SceneSettings {
    pub backend: SceneBackend,
    pub embree_device: Option<RawHandle>,
    pub radeon_rays_device: Option<RawHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulatorSettings {
    pub flags: SimulationFlags,
    pub scene_backend: SceneBackend,
    pub reflection_effect: ReflectionEffectKind,
    pub max_occlusion_samples: u32,
    pub max_rays: u32,
    pub diffuse_samples: u32,
    pub max_duration: f32,
    pub max_order: u32,
    pub max_sources: u32,
    pub num_threads: u32,
    pub ray_batch_size: u32,
    pub visibility_samples: u32,
    pub sampling_rate: u32,
    pub frame_size: u32,
    pub opencl_device: Option<RawHandle>,
    pub radeon_rays_device: Option<RawHandle>,
    pub true_audio_next_device: Option<RawHandle>,
}

/// Global inputs shared by every source for one simulation stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharedInputs {
    pub listener: CoordinateSpace,
    pub num_rays: u32,
    pub num_bounces: u32,
    pub duration: f32,
    pub order: u32,
    pub irradiance_min_distance: f32,
}

impl Default for SharedInputs {
    fn default() -> Self {
        Self {
            listener: CoordinateSpace::IDENTITY,
            num_rays: 4096,
            num_bounces: 4,
            duration: 1.0,
            order: 2,
            irradiance_min_distance: 1.0,
        }
    }
}

/// Per-source inputs for one or more simulation stages.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceInputs {
    pub flags: SimulationFlags,
    pub direct_flags: DirectSimulationFlags,
    pub source: CoordinateSpace,
    pub occlusion: OcclusionKind,
    pub occlusion_radius: f32,
    pub occlusion_samples: u32,
    pub transmission_rays: u32,
    pub reverb_scale: [f32; 3],
    pub hybrid_reverb_transition_time: f32,
    pub hybrid_reverb_overlap_percent: f32,
    pub baked: bool,
    pub baked_data: BakedDataIdentifier,
    pub pathing_probes: Option<RawHandle>,
    pub visibility_radius: f32,
    pub visibility_threshold: f32,
    pub visibility_range: f32,
    pub pathing_order: u32,
    pub find_alternate_paths: bool,
}

impl Default for SourceInputs {
    fn default() -> Self {
        Self {
            flags: SimulationFlags::DIRECT | SimulationFlags::REFLECTIONS,
            direct_flags: DirectSimulationFlags::OCCLUSION
                | DirectSimulationFlags::TRANSMISSION
                | DirectSimulationFlags::AIR_ABSORPTION
                | DirectSimulationFlags::DIRECTIVITY
                | DirectSimulationFlags::DISTANCE_ATTENUATION,
            source: CoordinateSpace::IDENTITY,
            occlusion: OcclusionKind::Raycast,
            occlusion_radius: 4.0,
            occlusion_samples: 32,
            transmission_rays: 1,
            reverb_scale: [1.0; 3],
            hybrid_reverb_transition_time: 1.0,
            hybrid_reverb_overlap_percent: 0.25,
            baked: false,
            baked_data: BakedDataIdentifier::reverb(),
            pathing_probes: None,
            visibility_radius: 1.0,
            visibility_threshold: 0.1,
            visibility_range: 1000.0,
            pathing_order: 1,
            find_alternate_paths: false,
        }
    }
}

/// Direct path results read back from a source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SourceOutputs {
    pub distance_attenuation: f32,
    pub air_absorption: [f32; 3],
    pub occlusion: f32,
    pub transmission: [f32; 3],
}

impl Default for SourceOutputs {
    fn default() -> Self {
        Self {
            distance_attenuation: 1.0,
            air_absorption: [1.0; 3],
            occlusion: 1.0,
            transmission: [1.0; 3],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectionsBakeParams {
    pub scene: RawHandle,
    pub probe_batch: RawHandle,
    pub scene_backend: SceneBackend,
    pub identifier: BakedDataIdentifier,
    pub flags: ReflectionsBakeFlags,
    pub num_rays: u32,
    pub num_diffuse_samples: u32,
    pub num_bounces: u32,
    pub simulated_duration: f32,
    pub saved_duration: f32,
    pub order: u32,
    pub num_threads: u32,
    pub ray_batch_size: u32,
    pub irradiance_min_distance: f32,
    pub bake_batch_size: u32,
    pub opencl_device: Option<RawHandle>,
    pub radeon_rays_device: Option<RawHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PathBakeParams {
    pub scene: RawHandle,
    pub probe_batch: RawHandle,
    pub identifier: BakedDataIdentifier,
    pub num_samples: u32,
    pub radius: f32,
    pub threshold: f32,
    pub visibility_range: f32,
    pub path_range: f32,
    pub num_threads: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeGenerationKind {
    /// One probe at the center of the volume.
    Centroid,
    /// A grid of probes at a fixed height above walkable floors.
    #[default]
    UniformFloor,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeGenerationParams {
    pub kind: ProbeGenerationKind,
    pub spacing: f32,
    pub height: f32,
    /// Maps the unit cube centered on the origin onto the generation volume.
    pub transform: Mat4,
}

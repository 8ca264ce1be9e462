use crate::backend::{ProbeGenerationKind, ReflectionsBakeFlags, SceneBackend};
use crate::error::{PetalSonicError, Result};
use crate::math::Vec3;
use crate::scene::StaticMeshData;
use glam::{Mat4, Quat};
use std::path::PathBuf;

/// Configuration descriptor for one bake run
#[derive(Debug, Clone)]
pub struct BakeDesc {
    pub scene_backend: SceneBackend,
    pub bake_flags: ReflectionsBakeFlags,
    pub num_rays: u32,
    pub num_diffuse_samples: u32,
    pub num_bounces: u32,
    /// Length of the simulated impulse response, in seconds
    pub simulated_duration: f32,
    /// Length of the impulse response kept in the probe batch, in seconds
    pub saved_duration: f32,
    pub order: u32,
    pub irradiance_min_distance: f32,
    pub num_threads: u32,
    pub bake_batch_size: u32,
    pub ray_batch_size: u32,

    /// Bake one reflections layer per static source position
    pub bake_static_sources: bool,
    /// Radius of the influence sphere around each static source
    pub static_influence_radius: f32,
    pub static_sources: Vec<Vec3>,

    pub bake_pathing: bool,
    pub pathing_visibility_range: f32,
    pub path_range: f32,
    pub visibility_radius: f32,
    pub visibility_threshold: f32,
    pub visibility_samples: u32,

    /// Where the bake results are written
    pub save_path: PathBuf,
    /// Probe spheres, four floats each: center x, y, z and radius
    pub probe_data: Vec<f32>,
    /// Geometry loaded into the bake's own scene; released with it
    pub geometry: Vec<StaticMeshData>,
}

impl Default for BakeDesc {
    fn default() -> Self {
        Self {
            scene_backend: SceneBackend::Default,
            bake_flags: ReflectionsBakeFlags::BAKE_CONVOLUTION,
            num_rays: 32768,
            num_diffuse_samples: 1024,
            num_bounces: 64,
            simulated_duration: 2.0,
            saved_duration: 2.0,
            order: 2,
            irradiance_min_distance: 1.0,
            num_threads: 8,
            bake_batch_size: 1,
            ray_batch_size: 16,
            bake_static_sources: true,
            static_influence_radius: 60.0,
            static_sources: Vec::new(),
            bake_pathing: true,
            pathing_visibility_range: 50.0,
            path_range: 100.0,
            visibility_radius: 1.0,
            visibility_threshold: 0.1,
            visibility_samples: 1,
            save_path: PathBuf::new(),
            probe_data: Vec::new(),
            geometry: Vec::new(),
        }
    }
}

impl BakeDesc {
    pub fn new(save_path: impl Into<PathBuf>, probe_data: Vec<f32>) -> Self {
        Self {
            save_path: save_path.into(),
            probe_data,
            ..Self::default()
        }
    }

    pub fn with_scene_backend(mut self, backend: SceneBackend) -> Self {
        self.scene_backend = backend;
        self
    }

    pub fn with_static_sources(mut self, positions: Vec<Vec3>) -> Self {
        self.static_sources = positions;
        self
    }

    pub fn with_static_source_baking(mut self, enable: bool) -> Self {
        self.bake_static_sources = enable;
        self
    }

    pub fn with_pathing_baking(mut self, enable: bool) -> Self {
        self.bake_pathing = enable;
        self
    }

    pub fn with_geometry(mut self, geometry: Vec<StaticMeshData>) -> Self {
        self.geometry = geometry;
        self
    }

    pub fn with_bake_flags(mut self, flags: ReflectionsBakeFlags) -> Self {
        self.bake_flags = flags;
        self
    }

    /// Checks the probe buffer and the output path.
    ///
    /// # Errors
    ///
    /// Returns [`PetalSonicError::Configuration`] when the probe buffer is
    /// empty or not a multiple of four floats, the save path is empty, or its
    /// parent directory does not exist.
    pub fn validate(&self) -> Result<()> {
        if self.probe_data.is_empty() {
            return Err(PetalSonicError::Configuration(
                "no probes to bake; generate probes first".into(),
            ));
        }
        if self.probe_data.len() % 4 != 0 {
            return Err(PetalSonicError::Configuration(format!(
                "probe buffer holds {} floats, expected a multiple of 4",
                self.probe_data.len()
            )));
        }
        if self.save_path.as_os_str().is_empty() {
            return Err(PetalSonicError::Configuration(
                "bake save path is empty".into(),
            ));
        }
        if let Some(parent) = self.save_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.is_dir() {
                return Err(PetalSonicError::Configuration(format!(
                    "bake output directory {} does not exist",
                    parent.display()
                )));
            }
        }
        if self.num_rays == 0 || self.num_threads == 0 {
            return Err(PetalSonicError::Configuration(
                "ray count and thread count must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration descriptor for probe generation
#[derive(Debug, Clone)]
pub struct ProbeGenerationDesc {
    pub kind: ProbeGenerationKind,
    /// Distance between neighboring probes, in meters
    pub spacing: f32,
    /// Height of probes above the floor, in meters
    pub height: f32,
    /// Half-size of the baked area on each axis
    pub extents: Vec3,
    /// Center of the baked area
    pub origin: Vec3,
    pub scene_backend: SceneBackend,
    pub geometry: Vec<StaticMeshData>,
}

impl Default for ProbeGenerationDesc {
    fn default() -> Self {
        Self {
            kind: ProbeGenerationKind::UniformFloor,
            spacing: 2.0,
            height: 1.5,
            extents: Vec3::splat(10.0),
            origin: Vec3::ZERO,
            scene_backend: SceneBackend::Default,
            geometry: Vec::new(),
        }
    }
}

impl ProbeGenerationDesc {
    pub fn with_kind(mut self, kind: ProbeGenerationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_spacing(mut self, spacing: f32) -> Self {
        self.spacing = spacing;
        self
    }

    pub fn with_height(mut self, height: f32) -> Self {
        self.height = height;
        self
    }

    pub fn with_area(mut self, origin: Vec3, extents: Vec3) -> Self {
        self.origin = origin;
        self.extents = extents;
        self
    }

    pub fn with_geometry(mut self, geometry: Vec<StaticMeshData>) -> Self {
        self.geometry = geometry;
        self
    }

    /// The box the engine fills with probes: the unit cube scaled to the full
    /// area size and moved to the origin.
    pub fn volume_transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.extents * 2.0, Quat::IDENTITY, self.origin)
    }

    pub fn validate(&self) -> Result<()> {
        if self.spacing <= 0.0 {
            return Err(PetalSonicError::Configuration(
                "probe spacing must be positive".into(),
            ));
        }
        if self.height < 0.0 {
            return Err(PetalSonicError::Configuration(
                "probe height must not be negative".into(),
            ));
        }
        if self.extents.min_element() <= 0.0 {
            return Err(PetalSonicError::Configuration(
                "baked area extents must be positive on every axis".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_buffer_must_be_stride_four() {
        let desc = BakeDesc::new("bake.json", vec![0.0; 7]);
        assert!(matches!(
            desc.validate(),
            Err(PetalSonicError::Configuration(_))
        ));
    }

    #[test]
    fn test_empty_probe_buffer_is_rejected() {
        let desc = BakeDesc::new("bake.json", Vec::new());
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_missing_output_directory_is_rejected() {
        let desc = BakeDesc::new(
            "/definitely/not/a/real/dir/bake.json",
            vec![0.0, 0.0, 0.0, 1.0],
        );
        assert!(desc.validate().is_err());
    }

    #[test]
    fn test_bare_file_name_is_accepted() {
        let desc = BakeDesc::new("bake.json", vec![0.0, 0.0, 0.0, 1.0]);
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn test_volume_transform_doubles_extents() {
        let desc = ProbeGenerationDesc::default().with_area(Vec3::new(1.0, 0.0, 0.0), Vec3::ONE);
        let corner = desc.volume_transform().transform_point3(Vec3::splat(0.5));
        assert_eq!(corner, Vec3::new(2.0, 1.0, 1.0));
    }
}

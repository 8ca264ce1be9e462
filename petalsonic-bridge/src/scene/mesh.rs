//! Static mesh data as submitted to the acoustic scene.

use super::AudioMaterial;
use crate::error::{PetalSonicError, Result};
use crate::math::{Transform, Vec3};

/// One surface of a host mesh: world-independent vertices, a triangle index
/// list in the host's clockwise winding, and an optional material.
#[derive(Debug, Clone, Default)]
pub struct MeshSurface {
    pub vertices: Vec<Vec3>,
    pub indices: Vec<u32>,
    pub material: Option<AudioMaterial>,
}

/// Flattened triangle soup ready for `create_static_mesh`.
///
/// Triangles are counter-clockwise, every triangle has a material index and
/// every index is in range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticMeshData {
    pub vertices: Vec<Vec3>,
    pub triangles: Vec<[u32; 3]>,
    pub material_indices: Vec<u32>,
    pub materials: Vec<AudioMaterial>,
}

impl StaticMeshData {
    /// Merges host surfaces into a single mesh placed by `transform`.
    ///
    /// Surfaces without a material get [`AudioMaterial::PLASTER`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a surface's index count is not a
    /// multiple of three or an index points past its vertices.
    pub fn from_surfaces(transform: &Transform, surfaces: &[MeshSurface]) -> Result<Self> {
        let mut mesh = Self::default();

        for (surface_index, surface) in surfaces.iter().enumerate() {
            if surface.indices.len() % 3 != 0 {
                return Err(PetalSonicError::Configuration(format!(
                    "surface {} has {} indices, not a whole number of triangles",
                    surface_index,
                    surface.indices.len()
                )));
            }
            if let Some(bad) = surface
                .indices
                .iter()
                .find(|&&i| i as usize >= surface.vertices.len())
            {
                return Err(PetalSonicError::Configuration(format!(
                    "surface {} references vertex {} of {}",
                    surface_index,
                    bad,
                    surface.vertices.len()
                )));
            }

            let offset = mesh.vertices.len() as u32;
            let material_index = mesh.materials.len() as u32;
            mesh.materials
                .push(surface.material.unwrap_or(AudioMaterial::PLASTER));

            mesh.vertices.extend(
                surface
                    .vertices
                    .iter()
                    .map(|v| transform.basis * *v + transform.origin),
            );

            // Host winding is clockwise; swap the last two corners.
            for tri in surface.indices.chunks_exact(3) {
                mesh.triangles
                    .push([tri[0] + offset, tri[2] + offset, tri[1] + offset]);
                mesh.material_indices.push(material_index);
            }
        }

        Ok(mesh)
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(material: Option<AudioMaterial>) -> MeshSurface {
        MeshSurface {
            vertices: vec![
                Vec3::new(0.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 0.0),
                Vec3::new(1.0, 0.0, 1.0),
                Vec3::new(0.0, 0.0, 1.0),
            ],
            indices: vec![0, 1, 2, 0, 2, 3],
            material,
        }
    }

    #[test]
    fn test_surfaces_are_merged_with_offsets() {
        let mesh = StaticMeshData::from_surfaces(
            &Transform::IDENTITY,
            &[quad(Some(AudioMaterial::WOOD)), quad(None)],
        )
        .unwrap();

        assert_eq!(mesh.vertices.len(), 8);
        assert_eq!(mesh.triangle_count(), 4);
        assert_eq!(mesh.triangles[2], [4, 6, 5]);
        assert_eq!(mesh.material_indices, vec![0, 0, 1, 1]);
        assert_eq!(mesh.materials, vec![AudioMaterial::WOOD, AudioMaterial::PLASTER]);
    }

    #[test]
    fn test_winding_is_flipped() {
        let mesh = StaticMeshData::from_surfaces(&Transform::IDENTITY, &[quad(None)]).unwrap();
        assert_eq!(mesh.triangles[0], [0, 2, 1]);
    }

    #[test]
    fn test_transform_is_applied() {
        let transform = Transform::from_origin(Vec3::new(10.0, 0.0, 0.0));
        let mesh = StaticMeshData::from_surfaces(&transform, &[quad(None)]).unwrap();
        assert_eq!(mesh.vertices[1], Vec3::new(11.0, 0.0, 0.0));
    }

    #[test]
    fn test_out_of_range_index_is_rejected() {
        let mut surface = quad(None);
        surface.indices.push(9);
        surface.indices.push(0);
        surface.indices.push(1);
        assert!(StaticMeshData::from_surfaces(&Transform::IDENTITY, &[surface]).is_err());
    }

    #[test]
    fn test_partial_triangle_is_rejected() {
        let mut surface = quad(None);
        surface.indices.pop();
        assert!(StaticMeshData::from_surfaces(&Transform::IDENTITY, &[surface]).is_err());
    }
}

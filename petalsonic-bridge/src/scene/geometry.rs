//! Static geometry living in an acoustic scene.

use super::StaticMeshData;
use crate::backend::{HandleKind, OwnedHandle};
use crate::commit::SceneCommitCoordinator;
use crate::error::Result;
use std::sync::Arc;

/// One static mesh added to a scene. Removed from the scene and released on
/// drop.
#[derive(Debug)]
pub struct StaticMesh {
    handle: OwnedHandle,
    scene: Arc<OwnedHandle>,
}

impl StaticMesh {
    /// Creates the native mesh and adds it to `scene`. The scene still needs a
    /// commit before the mesh takes part in simulation.
    pub fn create(scene: &Arc<OwnedHandle>, data: &StaticMeshData) -> Result<Self> {
        let backend = scene.backend();
        let handle = OwnedHandle::adopt(
            backend,
            HandleKind::StaticMesh,
            "create_static_mesh",
            backend.create_static_mesh(scene.raw(), data),
        )?
        .with_parent(Arc::clone(scene));
        backend.add_static_mesh(scene.raw(), handle.raw());

        log::debug!(
            "Added static mesh {} ({} triangles, {} materials)",
            handle.raw(),
            data.triangle_count(),
            data.materials.len()
        );
        Ok(Self {
            handle,
            scene: Arc::clone(scene),
        })
    }

    pub fn raw(&self) -> crate::backend::RawHandle {
        self.handle.raw()
    }
}

impl Drop for StaticMesh {
    fn drop(&mut self) {
        self.handle
            .backend()
            .remove_static_mesh(self.scene.raw(), self.handle.raw());
    }
}

/// A set of static meshes that share a lifetime.
///
/// Creating it adds every mesh and requests a scene commit; dropping it
/// removes them and requests another.
#[derive(Debug)]
pub struct StaticGeometry {
    meshes: Vec<StaticMesh>,
    commits: Option<Arc<SceneCommitCoordinator>>,
}

impl StaticGeometry {
    /// # Errors
    ///
    /// Fails on the first mesh the engine rejects. Meshes already added are
    /// removed again.
    pub fn new(
        scene: &Arc<OwnedHandle>,
        meshes: &[StaticMeshData],
        commits: Option<Arc<SceneCommitCoordinator>>,
    ) -> Result<Self> {
        let meshes = meshes
            .iter()
            .filter(|m| !m.is_empty())
            .map(|m| StaticMesh::create(scene, m))
            .collect::<Result<Vec<_>>>()?;

        if let Some(commits) = &commits {
            commits.request_commit();
        }
        Ok(Self { meshes, commits })
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }

    pub fn meshes(&self) -> &[StaticMesh] {
        &self.meshes
    }
}

impl Drop for StaticGeometry {
    fn drop(&mut self) {
        self.meshes.clear();
        if let Some(commits) = &self.commits {
            commits.request_commit();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{AcousticBackend, BackendCall, InMemoryBackend};
    use crate::config::CommitMode;
    use crate::engine::{EngineRequest, EngineSlot, LiveEngine};
    use crate::math::{Transform, Vec3};
    use crate::scene::MeshSurface;

    fn floor() -> StaticMeshData {
        StaticMeshData::from_surfaces(
            &Transform::IDENTITY,
            &[MeshSurface {
                vertices: vec![Vec3::ZERO, Vec3::X, Vec3::Z],
                indices: vec![0, 1, 2],
                material: None,
            }],
        )
        .unwrap()
    }

    #[test]
    fn test_geometry_lifetime_requests_commits() {
        let memory = Arc::new(InMemoryBackend::new());
        let backend: Arc<dyn AcousticBackend> = memory.clone();
        let engine = Arc::new(
            LiveEngine::initialize(&backend, &EngineRequest::runtime(&Default::default()))
                .unwrap(),
        );
        let slot = Arc::new(EngineSlot::new());
        slot.install(Arc::clone(&engine));
        let commits = Arc::new(SceneCommitCoordinator::new(CommitMode::Runtime, slot));

        let geometry =
            StaticGeometry::new(engine.scene(), &[floor(), floor()], Some(Arc::clone(&commits)))
                .unwrap();
        assert_eq!(geometry.len(), 2);
        assert!(commits.process_pending());

        let meshes: Vec<_> = geometry.meshes().iter().map(|m| m.raw()).collect();
        drop(geometry);

        assert!(commits.is_pending());
        for mesh in meshes {
            assert!(!memory.is_live(mesh));
            assert!(memory.journal().contains(&BackendCall::RemoveStaticMesh(mesh)));
        }
    }

    #[test]
    fn test_empty_meshes_are_skipped() {
        let memory = Arc::new(InMemoryBackend::new());
        let backend: Arc<dyn AcousticBackend> = memory.clone();
        let engine =
            LiveEngine::initialize(&backend, &EngineRequest::baking(Default::default())).unwrap();

        let geometry =
            StaticGeometry::new(engine.scene(), &[StaticMeshData::default()], None).unwrap();
        assert!(geometry.is_empty());
    }
}

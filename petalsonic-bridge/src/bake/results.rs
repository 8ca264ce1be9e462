//! Persisted bake results and their runtime counterpart.

use crate::backend::{
    BakedDataIdentifier, BakedDataType, BakedDataVariation, HandleKind, OwnedHandle, RawHandle,
    ReflectionsBakeFlags,
};
use crate::engine::LiveEngine;
use crate::error::Result;
use crate::math::Vec3;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Tolerance when matching a static source layer to a marker position.
const INFLUENCE_CENTER_EPSILON: f32 = 1.0e-3;

/// One serialized probe batch and the layer it holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakedLayer {
    pub identifier: BakedDataIdentifier,
    pub data: Vec<u8>,
}

/// Everything a finished bake produces: one serialized probe batch per bake
/// identifier, plus the flags the reflections were baked with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BakeResults {
    pub bake_flags: ReflectionsBakeFlags,
    layers: Vec<BakedLayer>,
}

impl BakeResults {
    pub fn new(bake_flags: ReflectionsBakeFlags) -> Self {
        Self {
            bake_flags,
            layers: Vec::new(),
        }
    }

    /// Records `data` under `identifier`, replacing an earlier layer with the
    /// same identifier.
    pub fn insert(&mut self, identifier: BakedDataIdentifier, data: Vec<u8>) {
        match self.layers.iter_mut().find(|l| l.identifier == identifier) {
            Some(layer) => layer.data = data,
            None => self.layers.push(BakedLayer { identifier, data }),
        }
    }

    pub fn get(&self, identifier: &BakedDataIdentifier) -> Option<&[u8]> {
        self.layers
            .iter()
            .find(|l| l.identifier == *identifier)
            .map(|l| l.data.as_slice())
    }

    pub fn layers(&self) -> &[BakedLayer] {
        &self.layers
    }

    pub fn identifiers(&self) -> Vec<BakedDataIdentifier> {
        self.layers.iter().map(|l| l.identifier).collect()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path.as_ref(), json)?;
        log::info!(
            "Saved {} baked layers to {}",
            self.layers.len(),
            path.as_ref().display()
        );
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// A probe batch attached to a simulator. Detached on drop.
struct AttachedProbeBatch {
    identifier: BakedDataIdentifier,
    batch: OwnedHandle,
    simulator: Arc<OwnedHandle>,
}

impl Drop for AttachedProbeBatch {
    fn drop(&mut self) {
        self.batch
            .backend()
            .remove_probe_batch(self.simulator.raw(), self.batch.raw());
    }
}

/// Bake results loaded into probe batches on the live simulator.
pub struct LoadedBakeData {
    batches: Vec<AttachedProbeBatch>,
    bake_flags: ReflectionsBakeFlags,
}

impl LoadedBakeData {
    /// Loads every layer into its own committed probe batch and attaches it
    /// to the engine's simulator, then commits the simulator. The caller
    /// holds the simulation lock.
    ///
    /// # Errors
    ///
    /// Fails when a layer cannot be loaded. Batches attached before the
    /// failure are detached again.
    pub fn attach(engine: &LiveEngine, results: &BakeResults) -> Result<Self> {
        let backend = engine.backend();
        let context = engine.context();
        let simulator = engine.simulator();
        let mut batches = Vec::with_capacity(results.len());

        for layer in results.layers() {
            let batch = OwnedHandle::adopt(
                backend,
                HandleKind::ProbeBatch,
                "load_probe_batch",
                backend.load_probe_batch(context.raw(), &layer.data),
            )?
            .with_parent(Arc::clone(context));
            backend.commit_probe_batch(batch.raw());
            backend.add_probe_batch(simulator.raw(), batch.raw());

            log::debug!(
                "Attached {:?}/{:?} probe batch {}",
                layer.identifier.data_type,
                layer.identifier.variation,
                batch.raw()
            );
            batches.push(AttachedProbeBatch {
                identifier: layer.identifier,
                batch,
                simulator: Arc::clone(simulator),
            });
        }

        backend.commit_simulator(simulator.raw());
        Ok(Self {
            batches,
            bake_flags: results.bake_flags,
        })
    }

    pub fn bake_flags(&self) -> ReflectionsBakeFlags {
        self.bake_flags
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn has_reverb(&self) -> bool {
        self.batches
            .iter()
            .any(|b| b.identifier.variation == BakedDataVariation::Reverb)
    }

    /// The static source layer baked for an emitter at `origin`.
    pub fn static_source_layer(&self, origin: Vec3) -> Option<BakedDataIdentifier> {
        self.batches
            .iter()
            .map(|b| b.identifier)
            .find(|id| {
                id.variation == BakedDataVariation::StaticSource
                    && id
                        .endpoint_influence
                        .is_some_and(|s| s.center.abs_diff_eq(origin, INFLUENCE_CENTER_EPSILON))
            })
    }

    /// The probe batch holding dynamic pathing data.
    pub fn pathing_batch(&self) -> Option<RawHandle> {
        self.batches
            .iter()
            .find(|b| {
                b.identifier.data_type == BakedDataType::Pathing
                    && b.identifier.variation == BakedDataVariation::Dynamic
            })
            .map(|b| b.batch.raw())
    }

    pub fn batch_handles(&self) -> Vec<RawHandle> {
        self.batches.iter().map(|b| b.batch.raw()).collect()
    }
}

impl std::fmt::Debug for LoadedBakeData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedBakeData")
            .field("batches", &self.batch_handles())
            .field("bake_flags", &self.bake_flags)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Sphere;

    #[test]
    fn test_insert_replaces_same_identifier() {
        let mut results = BakeResults::new(ReflectionsBakeFlags::BAKE_CONVOLUTION);
        results.insert(BakedDataIdentifier::reverb(), vec![1]);
        results.insert(BakedDataIdentifier::pathing(), vec![2]);
        results.insert(BakedDataIdentifier::reverb(), vec![3]);

        assert_eq!(results.len(), 2);
        assert_eq!(results.get(&BakedDataIdentifier::reverb()), Some(&[3u8][..]));
    }

    #[test]
    fn test_results_survive_disk() {
        let dir = std::env::temp_dir().join("petalsonic-bridge-results-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bake.json");

        let mut results = BakeResults::new(ReflectionsBakeFlags::BAKE_PARAMETRIC);
        results.insert(
            BakedDataIdentifier::static_source(Sphere::new(Vec3::new(1.0, 2.0, 3.0), 60.0)),
            vec![0, 255, 7],
        );
        results.save(&path).unwrap();

        let loaded = BakeResults::load(&path).unwrap();
        assert_eq!(loaded, results);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_loading_garbage_fails() {
        let dir = std::env::temp_dir().join("petalsonic-bridge-garbage-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bake.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            BakeResults::load(&path),
            Err(crate::error::PetalSonicError::Serialization(_))
        ));
        std::fs::remove_file(&path).ok();
    }
}

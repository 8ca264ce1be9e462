//! Bake tasks and the queue they run in.

use crate::backend::{
    BakedDataIdentifier, HandleKind, OwnedHandle, PathBakeParams, ReflectionsBakeParams,
};
use crate::config::BakeDesc;
use crate::engine::LiveEngine;
use crate::error::Result;
use crate::math::Sphere;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BakeTaskKind {
    /// Listener-centric reverb over every probe.
    Reverb,
    /// Reflections from one static source position.
    StaticSource,
    Pathing,
}

impl fmt::Display for BakeTaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Reverb => "reverb",
            Self::StaticSource => "static source",
            Self::Pathing => "pathing",
        };
        f.write_str(name)
    }
}

/// Parameters of one bake call. The variant decides which baker runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BakeTaskParams {
    Reflections(ReflectionsBakeParams),
    Pathing(PathBakeParams),
}

/// One queued bake: a fresh probe batch and what to bake into it.
///
/// The probe batch is released when the task is dropped, whether or not it
/// ever ran.
#[derive(Debug)]
pub struct BakeTask {
    kind: BakeTaskKind,
    batch: OwnedHandle,
    params: BakeTaskParams,
}

impl BakeTask {
    pub fn kind(&self) -> BakeTaskKind {
        self.kind
    }

    pub fn batch(&self) -> &OwnedHandle {
        &self.batch
    }

    pub fn params(&self) -> &BakeTaskParams {
        &self.params
    }

    pub fn identifier(&self) -> BakedDataIdentifier {
        match &self.params {
            BakeTaskParams::Reflections(p) => p.identifier,
            BakeTaskParams::Pathing(p) => p.identifier,
        }
    }
}

/// Builds the ordered bake queue: reverb first, then one task per static
/// source in the order given, then pathing.
///
/// Every task gets its own committed probe batch filled with `probes`.
pub fn build_bake_queue(
    engine: &LiveEngine,
    desc: &BakeDesc,
    probes: &[Sphere],
) -> Result<VecDeque<BakeTask>> {
    let mut queue = VecDeque::new();

    queue.push_back(reflections_task(
        engine,
        desc,
        probes,
        BakeTaskKind::Reverb,
        BakedDataIdentifier::reverb(),
    )?);

    if desc.bake_static_sources {
        for position in &desc.static_sources {
            let influence = Sphere::new(*position, desc.static_influence_radius);
            queue.push_back(reflections_task(
                engine,
                desc,
                probes,
                BakeTaskKind::StaticSource,
                BakedDataIdentifier::static_source(influence),
            )?);
        }
    }

    if desc.bake_pathing {
        let batch = fresh_batch(engine, probes)?;
        let params = PathBakeParams {
            scene: engine.scene().raw(),
            probe_batch: batch.raw(),
            identifier: BakedDataIdentifier::pathing(),
            num_samples: desc.visibility_samples,
            radius: desc.visibility_radius,
            threshold: desc.visibility_threshold,
            visibility_range: desc.pathing_visibility_range,
            path_range: desc.path_range,
            num_threads: desc.num_threads,
        };
        queue.push_back(BakeTask {
            kind: BakeTaskKind::Pathing,
            batch,
            params: BakeTaskParams::Pathing(params),
        });
    }

    Ok(queue)
}

fn reflections_task(
    engine: &LiveEngine,
    desc: &BakeDesc,
    probes: &[Sphere],
    kind: BakeTaskKind,
    identifier: BakedDataIdentifier,
) -> Result<BakeTask> {
    let batch = fresh_batch(engine, probes)?;
    let devices = engine.devices();
    let params = ReflectionsBakeParams {
        scene: engine.scene().raw(),
        probe_batch: batch.raw(),
        scene_backend: engine.scene_backend(),
        identifier,
        flags: desc.bake_flags,
        num_rays: desc.num_rays,
        num_diffuse_samples: desc.num_diffuse_samples,
        num_bounces: desc.num_bounces,
        simulated_duration: desc.simulated_duration,
        saved_duration: desc.saved_duration,
        order: desc.order,
        num_threads: desc.num_threads,
        ray_batch_size: desc.ray_batch_size,
        irradiance_min_distance: desc.irradiance_min_distance,
        bake_batch_size: desc.bake_batch_size,
        opencl_device: devices.opencl.as_ref().map(|d| d.raw()),
        radeon_rays_device: devices.radeon_rays.as_ref().map(|d| d.raw()),
    };
    Ok(BakeTask {
        kind,
        batch,
        params: BakeTaskParams::Reflections(params),
    })
}

fn fresh_batch(engine: &LiveEngine, probes: &[Sphere]) -> Result<OwnedHandle> {
    let backend = engine.backend();
    let batch = OwnedHandle::adopt(
        backend,
        HandleKind::ProbeBatch,
        "create_probe_batch",
        backend.create_probe_batch(engine.context().raw()),
    )?
    .with_parent(Arc::clone(engine.context()));

    for probe in probes {
        backend.add_probe(batch.raw(), *probe);
    }
    backend.commit_probe_batch(batch.raw());
    Ok(batch)
}

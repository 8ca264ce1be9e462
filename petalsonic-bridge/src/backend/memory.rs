//! An acoustic backend that runs entirely in memory.
//!
//! It performs no acoustics. It hands out handles, tracks which are live,
//! keeps probe batches and simulator membership, walks bakes through a fixed
//! number of progress steps, and can journal every call that matters for
//! ordering. That makes it suitable for tooling that only needs the bridge's
//! bookkeeping, and for asserting on that bookkeeping in tests.

use super::{
    AcousticBackend, BackendError, BackendResult, BakedDataIdentifier, BakedDataVariation,
    ContextSettings, DeviceKind, HandleKind, PathBakeParams, ProbeGenerationKind,
    ProbeGenerationParams, RawHandle, ReflectionsBakeParams, SceneSettings, SharedInputs,
    SimulationFlags, SimulatorSettings, SourceInputs, SourceOutputs,
};
use crate::lock;
use crate::math::{Sphere, Vec3};
use crate::scene::StaticMeshData;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// One journaled backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CommitScene(RawHandle),
    CommitSimulator(RawHandle),
    SetSharedInputs {
        flags: SimulationFlags,
    },
    SetSourceInputs {
        source: RawHandle,
        flags: SimulationFlags,
        baked: bool,
        variation: BakedDataVariation,
    },
    RunDirect,
    RunReflections,
    RunPathing,
    AddSource(RawHandle),
    RemoveSource(RawHandle),
    AddStaticMesh(RawHandle),
    RemoveStaticMesh(RawHandle),
    AddProbeBatch(RawHandle),
    RemoveProbeBatch(RawHandle),
    BakeReflections(BakedDataIdentifier),
    BakePathing(BakedDataIdentifier),
    CancelReflectionsBake,
    CancelPathBake,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ProbeBatchData {
    probes: Vec<Sphere>,
    layers: Vec<BakedDataIdentifier>,
    #[serde(skip)]
    committed: bool,
}

#[derive(Debug, Default)]
struct SimulatorData {
    scene: Option<RawHandle>,
    sources: Vec<RawHandle>,
    probe_batches: Vec<RawHandle>,
}

#[derive(Debug, Default)]
struct BackendState {
    next_handle: u64,
    live: HashMap<RawHandle, HandleKind>,
    release_counts: HashMap<RawHandle, usize>,
    released: Vec<(HandleKind, RawHandle)>,
    journal: Vec<BackendCall>,
    batches: HashMap<RawHandle, ProbeBatchData>,
    simulators: HashMap<RawHandle, SimulatorData>,
    source_origins: HashMap<RawHandle, Vec3>,
    listener: Vec3,
    cancelled: HashSet<RawHandle>,
    bakes_started: usize,
    failing_devices: HashSet<DeviceKind>,
}

impl BackendState {
    fn allocate(&mut self, kind: HandleKind) -> RawHandle {
        self.next_handle += 1;
        let handle = RawHandle(self.next_handle);
        self.live.insert(handle, kind);
        handle
    }

    fn require(&self, handle: RawHandle, kind: HandleKind) -> BackendResult<()> {
        match self.live.get(&handle) {
            Some(k) if *k == kind => Ok(()),
            _ => Err(BackendError::UnknownHandle { kind, handle }),
        }
    }
}

#[derive(Debug)]
pub struct InMemoryBackend {
    state: Mutex<BackendState>,
    bake_signal: Condvar,
    journaling: bool,
    bake_steps: u32,
    gate_after: Option<usize>,
}

impl InMemoryBackend {
    /// A journaling backend whose bakes report four progress steps.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState::default()),
            bake_signal: Condvar::new(),
            journaling: true,
            bake_steps: 4,
            gate_after: None,
        }
    }

    /// Stops recording calls. Long-running sessions should use this.
    pub fn without_journal(mut self) -> Self {
        self.journaling = false;
        self
    }

    pub fn with_bake_steps(mut self, steps: u32) -> Self {
        self.bake_steps = steps.max(1);
        self
    }

    /// Every bake after the first `completed_bakes` blocks until it is
    /// cancelled.
    pub fn with_bake_gate(mut self, completed_bakes: usize) -> Self {
        self.gate_after = Some(completed_bakes);
        self
    }

    /// Makes every later creation of `kind` devices fail.
    pub fn fail_device(&self, kind: DeviceKind) {
        self.state().failing_devices.insert(kind);
    }

    pub fn is_live(&self, handle: RawHandle) -> bool {
        self.state().live.contains_key(&handle)
    }

    pub fn live_handles(&self, kind: HandleKind) -> Vec<RawHandle> {
        let mut handles: Vec<_> = self
            .state()
            .live
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(h, _)| *h)
            .collect();
        handles.sort();
        handles
    }

    /// Number of release calls seen for `handle`, including rejected ones.
    pub fn release_count(&self, handle: RawHandle) -> usize {
        self.state()
            .release_counts
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Successful releases in the order they happened.
    pub fn released_handles(&self) -> Vec<(HandleKind, RawHandle)> {
        self.state().released.clone()
    }

    pub fn journal(&self) -> Vec<BackendCall> {
        self.state().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.state().journal.clear();
    }

    pub fn simulator_sources(&self, simulator: RawHandle) -> Vec<RawHandle> {
        self.state()
            .simulators
            .get(&simulator)
            .map(|s| s.sources.clone())
            .unwrap_or_default()
    }

    pub fn simulator_probe_batches(&self, simulator: RawHandle) -> Vec<RawHandle> {
        self.state()
            .simulators
            .get(&simulator)
            .map(|s| s.probe_batches.clone())
            .unwrap_or_default()
    }

    pub fn simulator_scene(&self, simulator: RawHandle) -> Option<RawHandle> {
        self.state().simulators.get(&simulator).and_then(|s| s.scene)
    }

    pub fn probe_batch_layers(&self, batch: RawHandle) -> Vec<BakedDataIdentifier> {
        self.state()
            .batches
            .get(&batch)
            .map(|b| b.layers.clone())
            .unwrap_or_default()
    }

    pub fn probe_count(&self, batch: RawHandle) -> usize {
        self.state()
            .batches
            .get(&batch)
            .map(|b| b.probes.len())
            .unwrap_or(0)
    }

    fn state(&self) -> MutexGuard<'_, BackendState> {
        lock(&self.state)
    }

    fn record(&self, state: &mut BackendState, call: BackendCall) {
        if self.journaling {
            state.journal.push(call);
        }
    }

    fn run_bake(
        &self,
        context: RawHandle,
        batch: RawHandle,
        identifier: BakedDataIdentifier,
        call: BackendCall,
        progress: &mut dyn FnMut(f32),
    ) -> BackendResult<()> {
        {
            let mut state = self.state();
            state.require(context, HandleKind::Context)?;
            let committed = state
                .batches
                .get(&batch)
                .map(|b| b.committed)
                .ok_or(BackendError::UnknownHandle {
                    kind: HandleKind::ProbeBatch,
                    handle: batch,
                })?;
            if !committed {
                return Err(BackendError::Failed {
                    operation: "bake",
                    reason: format!("probe batch {} was never committed", batch),
                });
            }

            state.bakes_started += 1;
            let ordinal = state.bakes_started;
            self.record(&mut state, call);

            if self.gate_after.is_some_and(|after| ordinal > after) {
                while !state.cancelled.contains(&context) {
                    state = self
                        .bake_signal
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }

        for step in 1..=self.bake_steps {
            if self.state().cancelled.contains(&context) {
                return Ok(());
            }
            progress(step as f32 / self.bake_steps as f32);
        }

        if let Some(data) = self.state().batches.get_mut(&batch) {
            data.layers.push(identifier);
        }
        Ok(())
    }

    fn cancel_bakes(&self, context: RawHandle, call: BackendCall) {
        let mut state = self.state();
        self.record(&mut state, call);
        if state.live.contains_key(&context) {
            state.cancelled.insert(context);
        }
        self.bake_signal.notify_all();
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AcousticBackend for InMemoryBackend {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn create_context(&self, _settings: &ContextSettings) -> BackendResult<RawHandle> {
        Ok(self.state().allocate(HandleKind::Context))
    }

    fn create_device(
        &self,
        context: RawHandle,
        kind: DeviceKind,
        dependency: Option<RawHandle>,
    ) -> BackendResult<RawHandle> {
        let mut state = self.state();
        state.require(context, HandleKind::Context)?;
        if state.failing_devices.contains(&kind) {
            return Err(BackendError::Failed {
                operation: "create_device",
                reason: format!("{:?} is not available", kind),
            });
        }
        if matches!(kind, DeviceKind::RadeonRays | DeviceKind::TrueAudioNext) {
            let opencl = dependency.ok_or(BackendError::Failed {
                operation: "create_device",
                reason: format!("{:?} needs an OpenCL device", kind),
            })?;
            state.require(opencl, HandleKind::Device)?;
        }
        Ok(state.allocate(HandleKind::Device))
    }

    fn create_scene(
        &self,
        context: RawHandle,
        _settings: &SceneSettings,
    ) -> BackendResult<RawHandle> {
        let mut state = self.state();
        state.require(context, HandleKind::Context)?;
        Ok(state.allocate(HandleKind::Scene))
    }

    fn commit_scene(&self, scene: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::CommitScene(scene));
    }

    fn create_static_mesh(
        &self,
        scene: RawHandle,
        mesh: &StaticMeshData,
    ) -> BackendResult<RawHandle> {
        let mut state = self.state();
        state.require(scene, HandleKind::Scene)?;
        if mesh.is_empty() {
            return Err(BackendError::Failed {
                operation: "create_static_mesh",
                reason: "mesh has no triangles".to_string(),
            });
        }
        Ok(state.allocate(HandleKind::StaticMesh))
    }

    fn add_static_mesh(&self, _scene: RawHandle, mesh: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::AddStaticMesh(mesh));
    }

    fn remove_static_mesh(&self, _scene: RawHandle, mesh: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::RemoveStaticMesh(mesh));
    }

    fn create_simulator(
        &self,
        context: RawHandle,
        _settings: &SimulatorSettings,
    ) -> BackendResult<RawHandle> {
        let mut state = self.state();
        state.require(context, HandleKind::Context)?;
        let simulator = state.allocate(HandleKind::Simulator);
        state.simulators.insert(simulator, SimulatorData::default());
        Ok(simulator)
    }

    fn set_simulator_scene(&self, simulator: RawHandle, scene: RawHandle) {
        if let Some(sim) = self.state().simulators.get_mut(&simulator) {
            sim.scene = Some(scene);
        }
    }

    fn commit_simulator(&self, simulator: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::CommitSimulator(simulator));
    }

    fn create_source(
        &self,
        simulator: RawHandle,
        _flags: SimulationFlags,
    ) -> BackendResult<RawHandle> {
        let mut state = self.state();
        state.require(simulator, HandleKind::Simulator)?;
        Ok(state.allocate(HandleKind::Source))
    }

    fn add_source(&self, simulator: RawHandle, source: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::AddSource(source));
        if let Some(sim) = state.simulators.get_mut(&simulator) {
            if !sim.sources.contains(&source) {
                sim.sources.push(source);
            }
        }
    }

    fn remove_source(&self, simulator: RawHandle, source: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::RemoveSource(source));
        if let Some(sim) = state.simulators.get_mut(&simulator) {
            sim.sources.retain(|s| *s != source);
        }
    }

    fn set_shared_inputs(
        &self,
        _simulator: RawHandle,
        flags: SimulationFlags,
        inputs: &SharedInputs,
    ) {
        let mut state = self.state();
        state.listener = inputs.listener.origin;
        self.record(&mut state, BackendCall::SetSharedInputs { flags });
    }

    fn set_source_inputs(&self, source: RawHandle, flags: SimulationFlags, inputs: &SourceInputs) {
        let mut state = self.state();
        state.source_origins.insert(source, inputs.source.origin);
        self.record(
            &mut state,
            BackendCall::SetSourceInputs {
                source,
                flags,
                baked: inputs.baked,
                variation: inputs.baked_data.variation,
            },
        );
    }

    fn source_outputs(&self, source: RawHandle, _flags: SimulationFlags) -> SourceOutputs {
        let state = self.state();
        let distance = state
            .source_origins
            .get(&source)
            .map(|origin| origin.distance(state.listener))
            .unwrap_or(0.0);
        SourceOutputs {
            distance_attenuation: 1.0 / distance.max(1.0),
            ..SourceOutputs::default()
        }
    }

    fn run_direct(&self, _simulator: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::RunDirect);
    }

    fn run_reflections(&self, _simulator: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::RunReflections);
    }

    fn run_pathing(&self, _simulator: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::RunPathing);
    }

    fn create_probe_batch(&self, context: RawHandle) -> BackendResult<RawHandle> {
        let mut state = self.state();
        state.require(context, HandleKind::Context)?;
        let batch = state.allocate(HandleKind::ProbeBatch);
        state.batches.insert(batch, ProbeBatchData::default());
        Ok(batch)
    }

    fn add_probe(&self, batch: RawHandle, probe: Sphere) {
        if let Some(data) = self.state().batches.get_mut(&batch) {
            data.probes.push(probe);
            data.committed = false;
        }
    }

    fn commit_probe_batch(&self, batch: RawHandle) {
        if let Some(data) = self.state().batches.get_mut(&batch) {
            data.committed = true;
        }
    }

    fn save_probe_batch(&self, _context: RawHandle, batch: RawHandle) -> BackendResult<Vec<u8>> {
        let state = self.state();
        let data = state.batches.get(&batch).ok_or(BackendError::UnknownHandle {
            kind: HandleKind::ProbeBatch,
            handle: batch,
        })?;
        serde_json::to_vec(data).map_err(|e| BackendError::Failed {
            operation: "save_probe_batch",
            reason: e.to_string(),
        })
    }

    fn load_probe_batch(&self, context: RawHandle, data: &[u8]) -> BackendResult<RawHandle> {
        let parsed: ProbeBatchData =
            serde_json::from_slice(data).map_err(|e| BackendError::Failed {
                operation: "load_probe_batch",
                reason: e.to_string(),
            })?;
        let mut state = self.state();
        state.require(context, HandleKind::Context)?;
        let batch = state.allocate(HandleKind::ProbeBatch);
        state.batches.insert(batch, parsed);
        Ok(batch)
    }

    fn add_probe_batch(&self, simulator: RawHandle, batch: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::AddProbeBatch(batch));
        if let Some(sim) = state.simulators.get_mut(&simulator) {
            sim.probe_batches.push(batch);
        }
    }

    fn remove_probe_batch(&self, simulator: RawHandle, batch: RawHandle) {
        let mut state = self.state();
        self.record(&mut state, BackendCall::RemoveProbeBatch(batch));
        if let Some(sim) = state.simulators.get_mut(&simulator) {
            sim.probe_batches.retain(|b| *b != batch);
        }
    }

    fn generate_probes(
        &self,
        context: RawHandle,
        scene: RawHandle,
        params: &ProbeGenerationParams,
    ) -> BackendResult<Vec<Sphere>> {
        {
            let state = self.state();
            state.require(context, HandleKind::Context)?;
            state.require(scene, HandleKind::Scene)?;
        }

        let min = params.transform.transform_point3(Vec3::splat(-0.5));
        let max = params.transform.transform_point3(Vec3::splat(0.5));
        let (min, max) = (min.min(max), min.max(max));

        match params.kind {
            ProbeGenerationKind::Centroid => {
                let extent = (max - min) * 0.5;
                Ok(vec![Sphere::new((min + max) * 0.5, extent.max_element())])
            }
            ProbeGenerationKind::UniformFloor => {
                if params.spacing <= 0.0 {
                    return Err(BackendError::Failed {
                        operation: "generate_probes",
                        reason: "probe spacing must be positive".to_string(),
                    });
                }
                let y = min.y + params.height;
                if y > max.y {
                    return Ok(Vec::new());
                }
                let mut probes = Vec::new();
                let mut x = min.x + params.spacing * 0.5;
                while x <= max.x {
                    let mut z = min.z + params.spacing * 0.5;
                    while z <= max.z {
                        probes.push(Sphere::new(Vec3::new(x, y, z), params.spacing));
                        z += params.spacing;
                    }
                    x += params.spacing;
                }
                Ok(probes)
            }
        }
    }

    fn bake_reflections(
        &self,
        context: RawHandle,
        params: &ReflectionsBakeParams,
        progress: &mut dyn FnMut(f32),
    ) -> BackendResult<()> {
        self.run_bake(
            context,
            params.probe_batch,
            params.identifier,
            BackendCall::BakeReflections(params.identifier),
            progress,
        )
    }

    fn cancel_reflections_bake(&self, context: RawHandle) {
        self.cancel_bakes(context, BackendCall::CancelReflectionsBake);
    }

    fn bake_pathing(
        &self,
        context: RawHandle,
        params: &PathBakeParams,
        progress: &mut dyn FnMut(f32),
    ) -> BackendResult<()> {
        self.run_bake(
            context,
            params.probe_batch,
            params.identifier,
            BackendCall::BakePathing(params.identifier),
            progress,
        )
    }

    fn cancel_path_bake(&self, context: RawHandle) {
        self.cancel_bakes(context, BackendCall::CancelPathBake);
    }

    fn release(&self, kind: HandleKind, handle: RawHandle) -> BackendResult<()> {
        let mut state = self.state();
        *state.release_counts.entry(handle).or_insert(0) += 1;

        match state.live.remove(&handle) {
            Some(k) if k == kind => {
                state.released.push((kind, handle));
                state.batches.remove(&handle);
                state.simulators.remove(&handle);
                state.source_origins.remove(&handle);
                state.cancelled.remove(&handle);
                Ok(())
            }
            Some(other) => {
                state.live.insert(handle, other);
                Err(BackendError::UnknownHandle { kind, handle })
            }
            None => Err(BackendError::UnknownHandle { kind, handle }),
        }
    }
}

use super::{CommitMode, StaticMatching};
use crate::backend::{ReflectionEffectKind, SceneBackend, SharedInputs};
use crate::error::{PetalSonicError, Result};
use std::time::Duration;

/// Configuration descriptor for a runtime bridge session
#[derive(Debug, Clone)]
pub struct PetalSonicBridgeDesc {
    /// Sampling rate the middleware mixes at
    pub sampling_rate: u32,
    /// Audio frame size in samples
    pub frame_size: u32,
    /// Ray tracer backing the scene. GPU backends fall back to CPU ones when
    /// their devices cannot be created.
    pub scene_backend: SceneBackend,
    /// Create a TrueAudio Next device for convolution
    pub true_audio_next: bool,
    pub reflection_effect: ReflectionEffectKind,
    pub max_occlusion_samples: u32,
    /// Upper bound on rays traced per reflections run
    pub max_rays: u32,
    pub diffuse_samples: u32,
    /// Longest impulse response the simulator can produce, in seconds
    pub max_duration: f32,
    /// Highest ambisonic order the simulator can produce
    pub max_order: u32,
    /// Maximum number of sources with reflections simulated
    pub max_sources: u32,
    pub num_threads: u32,
    pub ray_batch_size: u32,
    pub visibility_samples: u32,
    /// Run the pathing stage every cycle
    pub simulate_pathing: bool,
    /// Pause between simulation cycles
    pub simulation_interval: Duration,
    /// Initial shared inputs; the listener is replaced every physics frame
    pub shared_inputs: SharedInputs,
    pub commit_mode: CommitMode,
    pub static_matching: StaticMatching,
    /// Ask the engine to validate every call. Slow.
    pub enable_validation: bool,
}

impl Default for PetalSonicBridgeDesc {
    fn default() -> Self {
        Self {
            sampling_rate: 48000,
            frame_size: 1024,
            scene_backend: SceneBackend::Default,
            true_audio_next: false,
            reflection_effect: ReflectionEffectKind::Convolution,
            max_occlusion_samples: 32,
            max_rays: 4096,
            diffuse_samples: 32,
            max_duration: 2.0,
            max_order: 2,
            max_sources: 8,
            num_threads: 2,
            ray_batch_size: 16,
            visibility_samples: 4,
            simulate_pathing: false,
            simulation_interval: Duration::from_millis(1),
            shared_inputs: SharedInputs::default(),
            commit_mode: CommitMode::Runtime,
            static_matching: StaticMatching::ExplicitThenTransform,
            enable_validation: false,
        }
    }
}

impl PetalSonicBridgeDesc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sampling_rate(mut self, rate: u32) -> Self {
        self.sampling_rate = rate;
        self
    }

    pub fn with_frame_size(mut self, size: u32) -> Self {
        self.frame_size = size;
        self
    }

    pub fn with_scene_backend(mut self, backend: SceneBackend) -> Self {
        self.scene_backend = backend;
        self
    }

    pub fn with_true_audio_next(mut self, enable: bool) -> Self {
        self.true_audio_next = enable;
        self
    }

    pub fn with_reflection_effect(mut self, effect: ReflectionEffectKind) -> Self {
        self.reflection_effect = effect;
        self
    }

    pub fn with_simulate_pathing(mut self, enable: bool) -> Self {
        self.simulate_pathing = enable;
        self
    }

    pub fn with_simulation_interval(mut self, interval: Duration) -> Self {
        self.simulation_interval = interval;
        self
    }

    pub fn with_commit_mode(mut self, mode: CommitMode) -> Self {
        self.commit_mode = mode;
        self
    }

    pub fn with_static_matching(mut self, matching: StaticMatching) -> Self {
        self.static_matching = matching;
        self
    }

    pub fn with_validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Checks the values the engine would otherwise reject at init time.
    ///
    /// # Errors
    ///
    /// Returns [`PetalSonicError::Configuration`] naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        if self.sampling_rate == 0 || self.frame_size == 0 {
            return Err(PetalSonicError::Configuration(
                "sampling rate and frame size must be non-zero".into(),
            ));
        }
        if self.max_rays == 0 || self.max_sources == 0 || self.num_threads == 0 {
            return Err(PetalSonicError::Configuration(
                "max rays, max sources and thread count must be non-zero".into(),
            ));
        }
        if self.shared_inputs.num_rays > self.max_rays {
            return Err(PetalSonicError::Configuration(format!(
                "shared ray count {} exceeds max rays {}",
                self.shared_inputs.num_rays, self.max_rays
            )));
        }
        if self.shared_inputs.order > self.max_order {
            return Err(PetalSonicError::Configuration(format!(
                "shared ambisonic order {} exceeds max order {}",
                self.shared_inputs.order, self.max_order
            )));
        }
        if self.shared_inputs.duration > self.max_duration {
            return Err(PetalSonicError::Configuration(format!(
                "shared duration {}s exceeds max duration {}s",
                self.shared_inputs.duration, self.max_duration
            )));
        }
        if self.simulation_interval.is_zero() {
            return Err(PetalSonicError::Configuration(
                "simulation interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

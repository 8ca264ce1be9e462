//! The audio middleware seam.
//!
//! The bridge consumes a small slice of an FMOD-style middleware: reading an
//! event's 3D attributes and GUID, locating the Steam Audio spatializer DSP on
//! an event once, registering simulation sources so the DSP can read their
//! outputs, and writing spatializer parameters.

pub mod memory;

pub use memory::InMemoryMiddleware;

use crate::backend::RawHandle;
use crate::math::{CoordinateSpace, Vec3};
use std::fmt;
use thiserror::Error;

/// Identity of one live middleware event instance (its native pointer value).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event#{:x}", self.0)
    }
}

/// A spatializer DSP instance found on an event. Resolved once when the event
/// is created and cached on the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EffectHandle(pub u64);

/// Parameter indices of the Steam Audio spatializer DSP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum SpatializerParam {
    ApplyDistanceAttenuation = 2,
    ApplyAirAbsorption = 3,
    ApplyDirectivity = 4,
    ApplyOcclusion = 5,
    ApplyTransmission = 6,
    ApplyReflections = 7,
    ApplyPathing = 8,
    Occlusion = 20,
    SimulationOutputsHandle = 33,
}

impl SpatializerParam {
    pub fn index(self) -> i32 {
        self as i32
    }
}

/// An event's 3D attributes as the middleware reports them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventAttributes {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl EventAttributes {
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
        }
    }

    pub fn to_coordinate_space(&self) -> CoordinateSpace {
        CoordinateSpace::from_forward_up(self.position, self.forward, self.up)
    }
}

impl Default for EventAttributes {
    fn default() -> Self {
        Self::at(Vec3::ZERO)
    }
}

/// A middleware GUID in its four-part layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Guid {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl fmt::Display for Guid {
    /// Formats as `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = &self.data4;
        write!(
            f,
            "{{{:08x}-{:04x}-{:04x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}}}",
            self.data1, self.data2, self.data3, d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7]
        )
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MiddlewareError {
    /// The event or DSP was already released. Expected during teardown races.
    #[error("invalid handle")]
    InvalidHandle,

    #[error("event {0} has no spatializer effect")]
    EffectMissing(EventId),

    #[error("{operation} failed: {reason}")]
    Failed {
        operation: &'static str,
        reason: String,
    },
}

pub type MiddlewareResult<T> = std::result::Result<T, MiddlewareError>;

/// Operations the bridge consumes from the audio middleware.
pub trait AudioMiddleware: Send + Sync {
    /// Scans the event's DSP chain for the spatializer effect.
    fn find_spatializer(&self, event: EventId) -> MiddlewareResult<Option<EffectHandle>>;

    fn event_guid(&self, event: EventId) -> MiddlewareResult<Guid>;

    fn event_attributes(&self, event: EventId) -> MiddlewareResult<EventAttributes>;

    /// Makes a simulation source's outputs readable by spatializer DSPs.
    /// Returns the middleware-side handle for the source.
    fn register_source(&self, source: RawHandle) -> MiddlewareResult<i32>;

    fn unregister_source(&self, handle: i32);

    /// Designates the source whose reflections feed the global reverb.
    fn set_reverb_source(&self, source: RawHandle) -> MiddlewareResult<()>;

    fn set_effect_int(
        &self,
        effect: EffectHandle,
        param: SpatializerParam,
        value: i32,
    ) -> MiddlewareResult<()>;

    fn set_effect_float(
        &self,
        effect: EffectHandle,
        param: SpatializerParam,
        value: f32,
    ) -> MiddlewareResult<()>;
}

/// Logs a middleware failure, keeping released-handle noise at debug level.
pub(crate) fn log_middleware_error(context: &str, error: &MiddlewareError) {
    match error {
        MiddlewareError::InvalidHandle => log::debug!("{}: {}", context, error),
        _ => log::warn!("{}: {}", context, error),
    }
}

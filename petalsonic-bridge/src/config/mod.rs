//! Configuration descriptors for bridge and bake sessions

mod bake_desc;
mod bridge_desc;

pub use bake_desc::{BakeDesc, ProbeGenerationDesc};
pub use bridge_desc::PetalSonicBridgeDesc;

/// When a requested scene commit reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommitMode {
    /// Commit immediately. Used while authoring, where no simulation thread
    /// races the scene.
    Authoring,
    /// Defer to the next physics frame and coalesce.
    #[default]
    Runtime,
}

/// How a source is associated with a static source marker for baked data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaticMatching {
    /// Only sources explicitly bound to a marker use its baked layer.
    ExplicitOnly,
    /// Fall back to comparing the source transform against every marker.
    #[default]
    ExplicitThenTransform,
}

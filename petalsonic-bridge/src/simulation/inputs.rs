//! Per-source simulation inputs.

use crate::backend::{BakedDataIdentifier, DirectSimulationFlags, SimulationFlags, SourceInputs};
use crate::bake::LoadedBakeData;
use crate::config::StaticMatching;
use crate::math::CoordinateSpace;
use crate::registry::{RegistryView, StaticSourceMarker};
use crate::source::AcousticSource;

/// Direct path inputs for an emitter.
pub fn direct(space: CoordinateSpace) -> SourceInputs {
    SourceInputs {
        flags: SimulationFlags::DIRECT,
        source: space,
        baked: false,
        ..SourceInputs::default()
    }
}

/// Reflections inputs for the reverb listener: real-time, no direct path.
pub fn reverb_listener(space: CoordinateSpace) -> SourceInputs {
    SourceInputs {
        flags: SimulationFlags::REFLECTIONS,
        direct_flags: DirectSimulationFlags::empty(),
        source: space,
        baked: false,
        ..SourceInputs::default()
    }
}

/// Reflections inputs for an emitter.
///
/// Uses the emitter's static source layer when it has one, the reverb layer
/// when that is loaded, and real-time reflections otherwise.
pub fn reflections(
    space: CoordinateSpace,
    static_layer: Option<BakedDataIdentifier>,
    baked: Option<&LoadedBakeData>,
) -> SourceInputs {
    let mut inputs = SourceInputs {
        flags: SimulationFlags::REFLECTIONS,
        source: space,
        ..SourceInputs::default()
    };

    match (static_layer, baked) {
        (Some(layer), _) => {
            inputs.baked = true;
            inputs.baked_data = layer;
        }
        (None, Some(data)) if data.has_reverb() => {
            inputs.baked = true;
            inputs.baked_data = BakedDataIdentifier::reverb();
        }
        _ => inputs.baked = false,
    }
    inputs
}

/// Baked pathing inputs for an emitter, or `None` when no pathing batch is
/// loaded.
pub fn pathing(space: CoordinateSpace, baked: Option<&LoadedBakeData>) -> Option<SourceInputs> {
    let batch = baked.and_then(|data| data.pathing_batch())?;
    Some(SourceInputs {
        flags: SimulationFlags::PATHING,
        source: space,
        baked: true,
        baked_data: BakedDataIdentifier::pathing(),
        pathing_probes: Some(batch),
        pathing_order: 1,
        ..SourceInputs::default()
    })
}

/// The marker an emitter is associated with, if any.
///
/// An explicit binding always wins. With [`StaticMatching::ExplicitThenTransform`]
/// an unbound emitter whose transform approximately equals a marker's is
/// associated with the first such marker.
pub fn static_marker<'a>(
    source: &AcousticSource,
    view: &'a RegistryView<'_>,
    matching: StaticMatching,
) -> Option<&'a StaticSourceMarker> {
    if let Some(id) = source.static_marker() {
        return view.marker(id);
    }
    match matching {
        StaticMatching::ExplicitOnly => None,
        StaticMatching::ExplicitThenTransform => {
            let transform = source.transform();
            view.markers
                .iter()
                .find(|m| m.transform.approx_eq(&transform))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BakedDataVariation;

    #[test]
    fn test_reflections_without_bake_are_realtime() {
        let inputs = reflections(CoordinateSpace::IDENTITY, None, None);
        assert!(!inputs.baked);
        assert_eq!(inputs.flags, SimulationFlags::REFLECTIONS);
    }

    #[test]
    fn test_static_layer_wins() {
        let layer = BakedDataIdentifier::static_source(crate::math::Sphere::new(
            crate::math::Vec3::ONE,
            60.0,
        ));
        let inputs = reflections(CoordinateSpace::IDENTITY, Some(layer), None);
        assert!(inputs.baked);
        assert_eq!(inputs.baked_data.variation, BakedDataVariation::StaticSource);
    }

    #[test]
    fn test_reverb_listener_has_no_direct_path() {
        let inputs = reverb_listener(CoordinateSpace::IDENTITY);
        assert!(inputs.direct_flags.is_empty());
        assert!(!inputs.baked);
    }

    #[test]
    fn test_pathing_needs_a_batch() {
        assert!(pathing(CoordinateSpace::IDENTITY, None).is_none());
    }
}

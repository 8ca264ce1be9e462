//! Flat probe buffers: four floats per probe, center x, y, z then radius.

use crate::error::{PetalSonicError, Result};
use crate::math::{Sphere, Vec3};

pub const PROBE_STRIDE: usize = 4;

/// Splits a flat buffer into probe spheres.
///
/// # Errors
///
/// Returns [`PetalSonicError::Configuration`] for an empty buffer or one whose
/// length is not a multiple of [`PROBE_STRIDE`].
pub fn parse_probes(data: &[f32]) -> Result<Vec<Sphere>> {
    if data.is_empty() {
        return Err(PetalSonicError::Configuration("probe buffer is empty".into()));
    }
    if data.len() % PROBE_STRIDE != 0 {
        return Err(PetalSonicError::Configuration(format!(
            "probe buffer holds {} floats, expected a multiple of {}",
            data.len(),
            PROBE_STRIDE
        )));
    }

    Ok(data
        .chunks_exact(PROBE_STRIDE)
        .map(|p| Sphere::new(Vec3::new(p[0], p[1], p[2]), p[3]))
        .collect())
}

pub fn flatten_probes(probes: &[Sphere]) -> Vec<f32> {
    probes
        .iter()
        .flat_map(|p| [p.center.x, p.center.y, p.center.z, p.radius])
        .collect()
}

//! Acoustic surface materials for static geometry.
//!
//! Values use Steam Audio's three frequency bands (400 Hz, 2.5 KHz, 15 KHz).

use crate::error::{PetalSonicError, Result};

/// Acoustic properties of a surface.
///
/// - **Absorption**: energy absorbed at each band instead of reflected
/// - **Scattering**: how diffuse reflections are (0 = mirror, 1 = fully diffuse)
/// - **Transmission**: energy passing through the surface at each band, used by
///   direct-path transmission
///
/// # Example
///
/// ```
/// use petalsonic_bridge::scene::AudioMaterial;
///
/// let wall = AudioMaterial::CONCRETE;
/// let curtain = AudioMaterial::from_bands([0.3, 0.5, 0.6], 0.1, [0.2, 0.1, 0.05]);
/// assert!(curtain.validate().is_ok());
/// # let _ = wall;
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioMaterial {
    pub absorption: [f32; 3],
    pub scattering: f32,
    pub transmission: [f32; 3],
}

impl AudioMaterial {
    /// Used for surfaces that carry no material of their own.
    pub const PLASTER: Self = Self {
        absorption: [0.12, 0.06, 0.04],
        scattering: 0.05,
        transmission: [0.056, 0.056, 0.004],
    };

    pub const GENERIC: Self = Self {
        absorption: [0.10, 0.20, 0.30],
        scattering: 0.05,
        transmission: [0.100, 0.050, 0.030],
    };

    pub const BRICK: Self = Self {
        absorption: [0.03, 0.04, 0.07],
        scattering: 0.05,
        transmission: [0.015, 0.015, 0.015],
    };

    pub const CONCRETE: Self = Self {
        absorption: [0.05, 0.07, 0.08],
        scattering: 0.05,
        transmission: [0.015, 0.002, 0.001],
    };

    pub const CARPET: Self = Self {
        absorption: [0.24, 0.69, 0.73],
        scattering: 0.05,
        transmission: [0.020, 0.005, 0.003],
    };

    pub const GLASS: Self = Self {
        absorption: [0.06, 0.03, 0.02],
        scattering: 0.05,
        transmission: [0.060, 0.044, 0.011],
    };

    pub const WOOD: Self = Self {
        absorption: [0.11, 0.07, 0.06],
        scattering: 0.05,
        transmission: [0.070, 0.014, 0.005],
    };

    pub const METAL: Self = Self {
        absorption: [0.20, 0.07, 0.06],
        scattering: 0.05,
        transmission: [0.200, 0.025, 0.010],
    };

    pub fn from_bands(absorption: [f32; 3], scattering: f32, transmission: [f32; 3]) -> Self {
        Self {
            absorption,
            scattering,
            transmission,
        }
    }

    /// Checks every coefficient lies in `[0, 1]`.
    pub fn validate(&self) -> Result<()> {
        let in_range = |v: f32| (0.0..=1.0).contains(&v);

        if !self.absorption.iter().copied().all(in_range) {
            return Err(PetalSonicError::Configuration(
                "material absorption must be within [0, 1]".to_string(),
            ));
        }
        if !in_range(self.scattering) {
            return Err(PetalSonicError::Configuration(
                "material scattering must be within [0, 1]".to_string(),
            ));
        }
        if !self.transmission.iter().copied().all(in_range) {
            return Err(PetalSonicError::Configuration(
                "material transmission must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Mean transmission across the three bands.
    pub fn mean_transmission(&self) -> f32 {
        self.transmission.iter().sum::<f32>() / 3.0
    }
}

impl Default for AudioMaterial {
    fn default() -> Self {
        Self::PLASTER
    }
}

//! Flat attribute buffers exchanged with the mixture clustering oracle

use crate::covariance::PackedCovariance;
use crate::error::{Error, Result};
use crate::point::{Point3f, Vector3f};
use serde::{Deserialize, Serialize};

/// One level of a Gaussian mixture as plain per-attribute buffers.
///
/// Unlike a primitive set, a level carries covariances but no scale or rotation;
/// those are recovered when the level is materialized. `features` holds one
/// spherical-harmonic block per primitive, back to back.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MixtureLevel {
    pub positions: Vec<Point3f>,
    pub colors: Vec<Vector3f>,
    pub opacities: Vec<f32>,
    pub covariances: Vec<PackedCovariance>,
    pub features: Vec<f32>,
}

impl MixtureLevel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Append all primitives of `other` after those already held.
    pub fn append(&mut self, mut other: MixtureLevel) {
        self.positions.append(&mut other.positions);
        self.colors.append(&mut other.colors);
        self.opacities.append(&mut other.opacities);
        self.covariances.append(&mut other.covariances);
        self.features.append(&mut other.features);
    }

    /// Check that every buffer describes the same number of primitives.
    pub fn validate(&self, block_len: usize) -> Result<()> {
        let n = self.positions.len();
        if self.colors.len() != n
            || self.opacities.len() != n
            || self.covariances.len() != n
            || self.features.len() != n * block_len
        {
            return Err(Error::InvalidData(format!(
                "mixture level buffers disagree: {} positions, {} colors, {} opacities, {} covariances, {} feature values (block {})",
                n,
                self.colors.len(),
                self.opacities.len(),
                self.covariances.len(),
                self.features.len(),
                block_len
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn level(n: usize, block: usize) -> MixtureLevel {
        MixtureLevel {
            positions: vec![Point3f::origin(); n],
            colors: vec![Vector3f::zeros(); n],
            opacities: vec![0.0; n],
            covariances: vec![PackedCovariance([1.0, 0.0, 0.0, 1.0, 0.0, 1.0]); n],
            features: vec![0.0; n * block],
        }
    }

    #[test]
    fn test_append_keeps_order() {
        let mut a = level(2, 9);
        let mut b = level(3, 9);
        b.positions[0] = Point3f::new(1.0, 2.0, 3.0);
        a.append(b);
        assert_eq!(a.len(), 5);
        assert_eq!(a.positions[2], Point3f::new(1.0, 2.0, 3.0));
        assert!(a.validate(9).is_ok());
    }

    #[test]
    fn test_validate_rejects_short_features() {
        let mut a = level(2, 9);
        a.features.pop();
        assert!(matches!(a.validate(9), Err(Error::InvalidData(_))));
    }
}

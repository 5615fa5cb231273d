//! Parameters handed to the clustering oracle

use serde::{Deserialize, Serialize};
use splatreg_core::{Error, Result};

/// Reduction parameters, passed through verbatim to the oracle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReductionParams {
    /// Reduction strength of the hierarchical EM clustering
    pub hem_reduction: f32,
    /// Geometric distance threshold
    pub distance_delta: f32,
    /// Color distance threshold
    pub color_delta: f32,
    pub decay_rate: f32,
    /// Number of levels requested from the oracle
    pub depth: usize,
}

impl Default for ReductionParams {
    fn default() -> Self {
        Self {
            hem_reduction: 3.0,
            distance_delta: 2.5,
            color_delta: 2.5,
            decay_rate: 1.0,
            depth: 3,
        }
    }
}

impl ReductionParams {
    pub fn with_hem_reduction(mut self, hem_reduction: f32) -> Self {
        self.hem_reduction = hem_reduction;
        self
    }

    pub fn with_distance_delta(mut self, distance_delta: f32) -> Self {
        self.distance_delta = distance_delta;
        self
    }

    pub fn with_color_delta(mut self, color_delta: f32) -> Self {
        self.color_delta = color_delta;
        self
    }

    pub fn with_decay_rate(mut self, decay_rate: f32) -> Self {
        self.decay_rate = decay_rate;
        self
    }

    pub fn with_depth(mut self, depth: usize) -> Self {
        self.depth = depth;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.depth == 0 {
            return Err(Error::InvalidData("reduction depth must be at least 1".to_string()));
        }
        let scalars = [
            ("hem_reduction", self.hem_reduction),
            ("distance_delta", self.distance_delta),
            ("color_delta", self.color_delta),
            ("decay_rate", self.decay_rate),
        ];
        if let Some((name, value)) = scalars.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::InvalidData(format!("{} must be finite, got {}", name, value)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let params = ReductionParams::default();
        assert_eq!(params.depth, 3);
        assert_eq!(params.hem_reduction, 3.0);
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(matches!(
            ReductionParams::default().with_depth(0).validate(),
            Err(Error::InvalidData(_))
        ));
        assert!(ReductionParams::default()
            .with_color_delta(f32::NAN)
            .validate()
            .is_err());
        assert!(ReductionParams::default()
            .with_distance_delta(f32::INFINITY)
            .validate()
            .is_err());
    }
}

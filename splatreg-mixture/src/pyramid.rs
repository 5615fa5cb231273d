//! Levels of a resolution pyramid

use splatreg_core::{DecompositionConfig, GaussianPrimitiveSet, MixtureLevel, PreviewCloud, Result};
use std::sync::Arc;

/// One resolution level: the primitive set and its renderer-facing preview.
///
/// Both parts are shared, so snapshots handed to readers stay valid after the
/// owning pyramid is replaced.
#[derive(Debug, Clone)]
pub struct PyramidLevel {
    pub gaussians: Arc<GaussianPrimitiveSet>,
    pub preview: Arc<PreviewCloud>,
}

impl PyramidLevel {
    pub fn new(gaussians: GaussianPrimitiveSet) -> Self {
        let preview = PreviewCloud::from_gaussians(&gaussians);
        Self {
            gaussians: Arc::new(gaussians),
            preview: Arc::new(preview),
        }
    }

    /// Materialize an oracle level; covariances are authoritative
    pub fn from_mixture(level: MixtureLevel, sh_degree: usize, config: &DecompositionConfig) -> Result<Self> {
        GaussianPrimitiveSet::from_mixture_level(level, sh_degree, config).map(Self::new)
    }

    pub fn len(&self) -> usize {
        self.gaussians.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gaussians.is_empty()
    }
}

/// Materialize every non-empty level, dropping empty ones
pub fn materialize_levels(
    levels: Vec<MixtureLevel>,
    sh_degree: usize,
    config: &DecompositionConfig,
) -> Result<Vec<PyramidLevel>> {
    levels
        .into_iter()
        .filter(|level| !level.is_empty())
        .map(|level| PyramidLevel::from_mixture(level, sh_degree, config))
        .collect()
}

/// Reduced pyramids for both sides of a registration pair, level 0 excluded
#[derive(Debug, Clone, Default)]
pub struct ReducedPair {
    pub first: Vec<PyramidLevel>,
    pub second: Vec<PyramidLevel>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use splatreg_core::{PackedCovariance, Point3f, Vector3f};

    fn level(n: usize) -> MixtureLevel {
        MixtureLevel {
            positions: (0..n).map(|i| Point3f::new(i as f32, 0.0, 0.0)).collect(),
            colors: vec![Vector3f::zeros(); n],
            opacities: vec![0.0; n],
            covariances: vec![PackedCovariance([0.04, 0.0, 0.0, 0.01, 0.0, 0.09]); n],
            features: Vec::new(),
        }
    }

    #[test]
    fn test_empty_levels_dropped() {
        let levels = vec![level(3), MixtureLevel::new(), level(1)];
        let pyramid = materialize_levels(levels, 0, &DecompositionConfig::default()).unwrap();
        assert_eq!(pyramid.len(), 2);
        assert_eq!(pyramid[0].len(), 3);
        assert_eq!(pyramid[1].len(), 1);
        assert_eq!(pyramid[0].preview.len(), 3);
    }

    #[test]
    fn test_scales_recovered() {
        let pyramid = PyramidLevel::from_mixture(level(1), 0, &DecompositionConfig::default()).unwrap();
        let mut scales: Vec<f32> = pyramid.gaussians.scales()[0].iter().copied().collect();
        scales.sort_by(f32::total_cmp);
        approx::assert_relative_eq!(scales[0], 0.1, epsilon = 1e-5);
        approx::assert_relative_eq!(scales[2], 0.3, epsilon = 1e-5);
    }
}

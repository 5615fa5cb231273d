//! Anisotropic 3D Gaussian point sets
//!
//! A [`GaussianPrimitiveSet`] keeps every per-primitive attribute in its own
//! buffer; index `i` refers to the same primitive in all of them. Covariances are
//! either derived from scale and rotation (sets decoded from a splat file) or
//! authoritative (sets produced by mixture reduction, where scale and rotation are
//! recovered by eigendecomposition).

use crate::covariance::{quaternion_from_matrix, DecompositionConfig, PackedCovariance};
use crate::error::{Error, Result};
use crate::level::MixtureLevel;
use crate::point::{feature_block_len, Point3f, Vector3f};
use crate::transform::Transform3D;
use nalgebra::{Matrix3, UnitQuaternion};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Degree-0 spherical harmonic basis constant
pub const SH_C0: f32 = 0.282_094_8;

/// Per-primitive attributes of a splat cloud as decoded by a loader
#[derive(Debug, Clone, Default)]
pub struct SplatAttributes {
    pub positions: Vec<Point3f>,
    /// Principal axis lengths (already activated, strictly positive)
    pub scales: Vec<Vector3f>,
    pub rotations: Vec<UnitQuaternion<f32>>,
    /// Raw opacities, before the logistic activation
    pub opacities: Vec<f32>,
    /// Degree-0 spherical harmonic coefficients
    pub colors: Vec<Vector3f>,
    /// Higher-degree spherical harmonic blocks, back to back
    pub features: Vec<f32>,
}

/// A set of anisotropic Gaussian primitives sharing one SH degree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianPrimitiveSet {
    sh_degree: usize,
    positions: Vec<Point3f>,
    rotations: Vec<UnitQuaternion<f32>>,
    scales: Vec<Vector3f>,
    covariances: Vec<PackedCovariance>,
    opacities: Vec<f32>,
    colors: Vec<Vector3f>,
    features: Vec<f32>,
}

impl GaussianPrimitiveSet {
    /// Create an empty set
    pub fn new(sh_degree: usize) -> Self {
        Self {
            sh_degree,
            positions: Vec::new(),
            rotations: Vec::new(),
            scales: Vec::new(),
            covariances: Vec::new(),
            opacities: Vec::new(),
            colors: Vec::new(),
            features: Vec::new(),
        }
    }

    /// Build a set whose covariances are derived as `R * diag(s)^2 * R^T`.
    pub fn from_scale_rotation(sh_degree: usize, attributes: SplatAttributes) -> Result<Self> {
        let SplatAttributes {
            positions,
            scales,
            rotations,
            opacities,
            colors,
            features,
        } = attributes;

        let n = positions.len();
        let block = feature_block_len(sh_degree);
        if scales.len() != n
            || rotations.len() != n
            || opacities.len() != n
            || colors.len() != n
            || features.len() != n * block
        {
            return Err(Error::InvalidData(format!(
                "attribute lengths disagree for {} primitives (SH degree {})",
                n, sh_degree
            )));
        }
        if let Some(index) = scales
            .iter()
            .position(|s| !(s.x > 0.0 && s.y > 0.0 && s.z > 0.0) || !s.iter().all(|v| v.is_finite()))
        {
            return Err(Error::InvalidData(format!(
                "scale of primitive {} must be positive and finite",
                index
            )));
        }

        let covariances = scales
            .par_iter()
            .zip(rotations.par_iter())
            .map(|(s, r)| PackedCovariance::from_scale_rotation(s, r))
            .collect();

        Ok(Self {
            sh_degree,
            positions,
            rotations,
            scales,
            covariances,
            opacities,
            colors,
            features,
        })
    }

    /// Materialize a mixture level; covariances are authoritative and scale and
    /// rotation are recovered from them.
    pub fn from_mixture_level(
        level: MixtureLevel,
        sh_degree: usize,
        config: &DecompositionConfig,
    ) -> Result<Self> {
        level.validate(feature_block_len(sh_degree))?;
        let (scales, rotations) = decompose_all(&level.covariances, config)?;

        Ok(Self {
            sh_degree,
            positions: level.positions,
            rotations,
            scales,
            covariances: level.covariances,
            opacities: level.opacities,
            colors: level.colors,
            features: level.features,
        })
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn sh_degree(&self) -> usize {
        self.sh_degree
    }

    /// Number of feature values stored per primitive
    pub fn feature_block_len(&self) -> usize {
        feature_block_len(self.sh_degree)
    }

    pub fn positions(&self) -> &[Point3f] {
        &self.positions
    }

    pub fn rotations(&self) -> &[UnitQuaternion<f32>] {
        &self.rotations
    }

    pub fn scales(&self) -> &[Vector3f] {
        &self.scales
    }

    pub fn covariances(&self) -> &[PackedCovariance] {
        &self.covariances
    }

    /// Raw opacities, before activation
    pub fn opacities(&self) -> &[f32] {
        &self.opacities
    }

    /// Degree-0 spherical harmonic coefficients
    pub fn colors(&self) -> &[Vector3f] {
        &self.colors
    }

    /// All higher-degree feature blocks, back to back
    pub fn features(&self) -> &[f32] {
        &self.features
    }

    pub fn feature_block(&self, index: usize) -> &[f32] {
        let block = self.feature_block_len();
        &self.features[index * block..(index + 1) * block]
    }

    pub fn covariance_matrix(&self, index: usize) -> Matrix3<f32> {
        self.covariances[index].to_matrix()
    }

    /// Covariances with every axis stretched by `modifier`
    pub fn scaled_covariances(&self, modifier: f32) -> Vec<PackedCovariance> {
        if modifier == 1.0 {
            return self.covariances.clone();
        }
        self.covariances.iter().map(|c| c.scaled(modifier)).collect()
    }

    /// Opacities after the logistic activation
    pub fn activated_opacities(&self) -> Vec<f32> {
        self.opacities.iter().map(|o| 1.0 / (1.0 + (-o).exp())).collect()
    }

    /// Base colors in RGB, clamped to `[0, 1]`
    pub fn rgb_colors(&self) -> Vec<Vector3f> {
        self.colors
            .iter()
            .map(|dc| dc.map(|c| (0.5 + SH_C0 * c).clamp(0.0, 1.0)))
            .collect()
    }

    /// Recover scale and rotation from every covariance.
    ///
    /// Fails with [`Error::DegenerateCovariance`] on the first primitive whose
    /// covariance is not positive semi-definite within tolerance, unless the
    /// config clamps negative eigenvalues.
    pub fn decompose_covariance(
        &self,
        config: &DecompositionConfig,
    ) -> Result<(Vec<Vector3f>, Vec<UnitQuaternion<f32>>)> {
        decompose_all(&self.covariances, config)
    }

    /// Apply a rigid or similarity transform in place.
    ///
    /// Positions get the full affine map, covariances become `A * Σ * A^T`,
    /// rotations are composed with the rotational part of `A` and scales are
    /// multiplied by the uniform scale factor. Transforms with non-uniform scale,
    /// shear or reflection are rejected and the set is left untouched. The
    /// identity leaves every attribute bit-for-bit unchanged.
    pub fn transform(&mut self, transform: &Transform3D) -> Result<()> {
        if transform.is_identity(f32::EPSILON) {
            return Ok(());
        }
        let scale = transform.similarity_scale()?;
        let linear = transform.linear();
        let rotation_part = linear / scale;
        let translation = transform.translation_part();

        let positions: Vec<Point3f> = self
            .positions
            .par_iter()
            .map(|p| Point3f::from(linear * p.coords + translation))
            .collect();
        let covariances: Vec<PackedCovariance> = self
            .covariances
            .par_iter()
            .map(|c| c.transformed(&linear))
            .collect();
        let rotations: Vec<UnitQuaternion<f32>> = self
            .rotations
            .par_iter()
            .map(|q| quaternion_from_matrix(&(rotation_part * q.to_rotation_matrix().into_inner())))
            .collect();

        if let Some(index) = positions.iter().position(|p| !p.coords.iter().all(|v| v.is_finite())) {
            return Err(Error::InvalidData(format!(
                "transform produced a non-finite position for primitive {}",
                index
            )));
        }
        if let Some(index) = covariances.iter().position(|c| !c.is_finite()) {
            return Err(Error::InvalidData(format!(
                "transform produced a non-finite covariance for primitive {}",
                index
            )));
        }

        self.positions = positions;
        self.covariances = covariances;
        self.rotations = rotations;
        if scale != 1.0 {
            for s in &mut self.scales {
                *s *= scale;
            }
        }
        Ok(())
    }

    /// Transformed copy of this set
    pub fn transformed(&self, transform: &Transform3D) -> Result<Self> {
        let mut copy = self.clone();
        copy.transform(transform)?;
        Ok(copy)
    }

    /// Concatenate `a` then `b`, preserving order. No deduplication.
    pub fn merge(a: &Self, b: &Self) -> Result<Self> {
        if a.feature_block_len() != b.feature_block_len() {
            return Err(Error::IncompatibleFeatureDegree {
                left: a.sh_degree,
                right: b.sh_degree,
            });
        }

        fn concat<T: Clone>(x: &[T], y: &[T]) -> Vec<T> {
            let mut out = Vec::with_capacity(x.len() + y.len());
            out.extend_from_slice(x);
            out.extend_from_slice(y);
            out
        }

        Ok(Self {
            sh_degree: a.sh_degree,
            positions: concat(&a.positions, &b.positions),
            rotations: concat(&a.rotations, &b.rotations),
            scales: concat(&a.scales, &b.scales),
            covariances: concat(&a.covariances, &b.covariances),
            opacities: concat(&a.opacities, &b.opacities),
            colors: concat(&a.colors, &b.colors),
            features: concat(&a.features, &b.features),
        })
    }

    /// Sub-set at `indices`, in the given order (repeats allowed)
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        self.check_indices(indices)?;
        let block = self.feature_block_len();

        Ok(Self {
            sh_degree: self.sh_degree,
            positions: indices.iter().map(|&i| self.positions[i]).collect(),
            rotations: indices.iter().map(|&i| self.rotations[i]).collect(),
            scales: indices.iter().map(|&i| self.scales[i]).collect(),
            covariances: indices.iter().map(|&i| self.covariances[i]).collect(),
            opacities: indices.iter().map(|&i| self.opacities[i]).collect(),
            colors: indices.iter().map(|&i| self.colors[i]).collect(),
            features: gather_blocks(&self.features, indices, block),
        })
    }

    /// Mixture-level buffers for the primitives at `indices`
    pub fn mixture_level_at(&self, indices: &[usize]) -> Result<MixtureLevel> {
        self.check_indices(indices)?;

        Ok(MixtureLevel {
            positions: indices.iter().map(|&i| self.positions[i]).collect(),
            colors: indices.iter().map(|&i| self.colors[i]).collect(),
            opacities: indices.iter().map(|&i| self.opacities[i]).collect(),
            covariances: indices.iter().map(|&i| self.covariances[i]).collect(),
            features: gather_blocks(&self.features, indices, self.feature_block_len()),
        })
    }

    /// Mixture-level buffers for the whole set
    pub fn to_mixture_level(&self) -> MixtureLevel {
        MixtureLevel {
            positions: self.positions.clone(),
            colors: self.colors.clone(),
            opacities: self.opacities.clone(),
            covariances: self.covariances.clone(),
            features: self.features.clone(),
        }
    }

    fn check_indices(&self, indices: &[usize]) -> Result<()> {
        match indices.iter().find(|&&i| i >= self.len()) {
            Some(&bad) => Err(Error::InvalidData(format!(
                "index {} out of range for {} primitives",
                bad,
                self.len()
            ))),
            None => Ok(()),
        }
    }
}

fn gather_blocks(features: &[f32], indices: &[usize], block: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(indices.len() * block);
    for &i in indices {
        out.extend_from_slice(&features[i * block..(i + 1) * block]);
    }
    out
}

fn decompose_all(
    covariances: &[PackedCovariance],
    config: &DecompositionConfig,
) -> Result<(Vec<Vector3f>, Vec<UnitQuaternion<f32>>)> {
    if let Some(index) = covariances.iter().position(|c| !c.is_finite()) {
        return Err(Error::InvalidData(format!(
            "covariance of primitive {} is not finite",
            index
        )));
    }

    let axes: Vec<(Vector3f, UnitQuaternion<f32>)> = covariances
        .par_iter()
        .enumerate()
        .map(|(index, c)| {
            c.principal_axes(config)
                .map_err(|eigenvalue| Error::DegenerateCovariance { index, eigenvalue })
        })
        .collect::<Result<_>>()?;

    Ok(axes.into_iter().unzip())
}

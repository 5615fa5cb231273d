//! Covariance and orientation bookkeeping for anisotropic Gaussians
//!
//! A covariance is stored packed as its six independent entries. Orientation is a
//! unit quaternion recovered from rotation matrices with Shepherd's method, which
//! picks the branch on the largest of the trace and the diagonal entries so that
//! rotations close to 180 degrees stay well conditioned.

use crate::point::Vector3f;
use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Symmetric 3x3 covariance stored as `[xx, xy, xz, yy, yz, zz]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PackedCovariance(pub [f32; 6]);

impl PackedCovariance {
    /// Pack a matrix, averaging the off-diagonal pairs.
    pub fn from_matrix(m: &Matrix3<f32>) -> Self {
        Self([
            m[(0, 0)],
            0.5 * (m[(0, 1)] + m[(1, 0)]),
            0.5 * (m[(0, 2)] + m[(2, 0)]),
            m[(1, 1)],
            0.5 * (m[(1, 2)] + m[(2, 1)]),
            m[(2, 2)],
        ])
    }

    /// Expand to a full symmetric matrix.
    pub fn to_matrix(&self) -> Matrix3<f32> {
        let [xx, xy, xz, yy, yz, zz] = self.0;
        Matrix3::new(xx, xy, xz, xy, yy, yz, xz, yz, zz)
    }

    /// `R * diag(scale)^2 * R^T`
    pub fn from_scale_rotation(scale: &Vector3f, rotation: &UnitQuaternion<f32>) -> Self {
        let r = rotation.to_rotation_matrix().into_inner();
        let l = r * Matrix3::from_diagonal(scale);
        Self::from_matrix(&(l * l.transpose()))
    }

    /// `A * Σ * A^T` for the linear part `A` of a transform.
    pub fn transformed(&self, linear: &Matrix3<f32>) -> Self {
        Self::from_matrix(&(linear * self.to_matrix() * linear.transpose()))
    }

    /// Covariance of the Gaussian with every axis stretched by `modifier`.
    pub fn scaled(&self, modifier: f32) -> Self {
        let factor = modifier * modifier;
        Self(self.0.map(|v| v * factor))
    }

    pub fn is_finite(&self) -> bool {
        self.0.iter().all(|v| v.is_finite())
    }

    /// Recover per-axis scales and orientation from the covariance.
    ///
    /// Eigenvectors are matched greedily to the coordinate axis they align with
    /// best, so the same input always yields the same axis order. Fails with the
    /// offending eigenvalue when it lies below `-tolerance` and clamping is off.
    pub fn principal_axes(
        &self,
        config: &DecompositionConfig,
    ) -> std::result::Result<(Vector3f, UnitQuaternion<f32>), f32> {
        let eigen = self.to_matrix().cast::<f64>().symmetric_eigen();
        let values = eigen.eigenvalues;
        let vectors = eigen.eigenvectors;

        let largest = values.amax();
        let eps = (config.tolerance as f64 * largest).max(EIGENVALUE_FLOOR);
        let mut clamped = Vector3::<f64>::zeros();
        for i in 0..3 {
            let value = values[i];
            if value < -eps && !config.clamp_negative {
                return Err(value as f32);
            }
            clamped[i] = value.max(0.0);
        }

        let owner = match_axes(&vectors);

        let mut rotation = Matrix3::<f64>::zeros();
        let mut scale = Vector3f::zeros();
        for axis in 0..3 {
            let e = owner[axis];
            let mut column = vectors.column(e).into_owned();
            if column[axis] < 0.0 {
                column = -column;
            }
            rotation.set_column(axis, &column);
            scale[axis] = clamped[e].sqrt() as f32;
        }

        if rotation.determinant() < 0.0 {
            // Flip the axis with the weakest alignment to restore a proper rotation.
            let weakest = (0..3)
                .min_by(|&a, &b| rotation[(a, a)].abs().total_cmp(&rotation[(b, b)].abs()))
                .unwrap_or(2);
            let flipped = -rotation.column(weakest).into_owned();
            rotation.set_column(weakest, &flipped);
        }

        Ok((scale, quaternion_from_matrix(&rotation.cast::<f32>())))
    }
}

const EIGENVALUE_FLOOR: f64 = 1e-9;

/// Policy for turning covariances back into scale and rotation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecompositionConfig {
    /// Negative eigenvalues within `tolerance * max|λ|` count as zero
    pub tolerance: f32,
    /// Clamp larger negative eigenvalues to zero instead of failing
    pub clamp_negative: bool,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            clamp_negative: false,
        }
    }
}

impl DecompositionConfig {
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn with_clamp_negative(mut self, clamp: bool) -> Self {
        self.clamp_negative = clamp;
        self
    }
}

/// For each coordinate axis, the index of the eigenvector assigned to it.
fn match_axes(vectors: &Matrix3<f64>) -> [usize; 3] {
    let mut pairs = Vec::with_capacity(9);
    for e in 0..3 {
        for axis in 0..3 {
            pairs.push((vectors[(axis, e)].abs(), e, axis));
        }
    }
    // Stable sort keeps (eigenvector, axis) generation order among ties.
    pairs.sort_by(|l, r| r.0.total_cmp(&l.0));

    let mut owner = [usize::MAX; 3];
    let mut claimed = [false; 3];
    for (_, e, axis) in pairs {
        if claimed[e] || owner[axis] != usize::MAX {
            continue;
        }
        owner[axis] = e;
        claimed[e] = true;
    }
    owner
}

/// Quaternion of a proper rotation matrix using Shepherd's method.
///
/// The result is renormalized and returned with a non-negative scalar part.
pub fn quaternion_from_matrix(m: &Matrix3<f32>) -> UnitQuaternion<f32> {
    let m = m.cast::<f64>();
    let trace = m[(0, 0)] + m[(1, 1)] + m[(2, 2)];

    let (w, x, y, z) = if trace >= m[(0, 0)] && trace >= m[(1, 1)] && trace >= m[(2, 2)] {
        let s = (1.0 + trace).max(0.0).sqrt() * 2.0;
        (
            0.25 * s,
            (m[(2, 1)] - m[(1, 2)]) / s,
            (m[(0, 2)] - m[(2, 0)]) / s,
            (m[(1, 0)] - m[(0, 1)]) / s,
        )
    } else if m[(0, 0)] >= m[(1, 1)] && m[(0, 0)] >= m[(2, 2)] {
        let s = (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).max(0.0).sqrt() * 2.0;
        (
            (m[(2, 1)] - m[(1, 2)]) / s,
            0.25 * s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
        )
    } else if m[(1, 1)] >= m[(2, 2)] {
        let s = (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).max(0.0).sqrt() * 2.0;
        (
            (m[(0, 2)] - m[(2, 0)]) / s,
            (m[(0, 1)] + m[(1, 0)]) / s,
            0.25 * s,
            (m[(1, 2)] + m[(2, 1)]) / s,
        )
    } else {
        let s = (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).max(0.0).sqrt() * 2.0;
        (
            (m[(1, 0)] - m[(0, 1)]) / s,
            (m[(0, 2)] + m[(2, 0)]) / s,
            (m[(1, 2)] + m[(2, 1)]) / s,
            0.25 * s,
        )
    };

    let q = if w < 0.0 {
        Quaternion::new(-w, -x, -y, -z)
    } else {
        Quaternion::new(w, x, y, z)
    };
    UnitQuaternion::from_quaternion(q.cast::<f32>())
}

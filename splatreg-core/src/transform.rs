//! 3D transformation utilities

use crate::error::{Error, Result};
use nalgebra::{Isometry3, Matrix3, Matrix4, Point3, RowVector4, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Relative tolerance used when classifying the linear part of a transform.
pub const SIMILARITY_TOLERANCE: f32 = 1e-4;

/// A 4x4 homogeneous transformation applied to Gaussian primitive sets
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform3D {
    pub matrix: Matrix4<f32>,
}

impl Transform3D {
    /// Create an identity transformation
    pub fn identity() -> Self {
        Self {
            matrix: Matrix4::identity(),
        }
    }

    /// Create a translation transformation
    pub fn translation(translation: Vector3<f32>) -> Self {
        Self {
            matrix: Matrix4::new_translation(&translation),
        }
    }

    /// Create a rotation transformation from a quaternion
    pub fn rotation(rotation: UnitQuaternion<f32>) -> Self {
        Self {
            matrix: rotation.to_homogeneous(),
        }
    }

    /// Create a uniform scaling transformation
    pub fn uniform_scaling(scale: f32) -> Self {
        Self {
            matrix: Matrix4::new_scaling(scale),
        }
    }

    /// Create a transformation from translation and rotation
    pub fn from_translation_rotation(
        translation: Vector3<f32>,
        rotation: UnitQuaternion<f32>,
    ) -> Self {
        let isometry = Isometry3::from_parts(translation.into(), rotation);
        Self {
            matrix: isometry.to_homogeneous(),
        }
    }

    /// Upper-left 3x3 block (rotation and scale)
    pub fn linear(&self) -> Matrix3<f32> {
        self.matrix.fixed_view::<3, 3>(0, 0).into_owned()
    }

    /// Translation column
    pub fn translation_part(&self) -> Vector3<f32> {
        self.matrix.fixed_view::<3, 1>(0, 3).into_owned()
    }

    /// Apply the transformation to a point (homogeneous coordinate 1)
    pub fn transform_point(&self, point: &Point3<f32>) -> Point3<f32> {
        Point3::from(self.linear() * point.coords + self.translation_part())
    }

    /// Compose this transformation with another (`self * other`)
    pub fn compose(self, other: Self) -> Self {
        Self {
            matrix: self.matrix * other.matrix,
        }
    }

    /// Check if this is approximately the identity transformation
    pub fn is_identity(&self, epsilon: f32) -> bool {
        let identity = Matrix4::identity();
        (self.matrix - identity).norm() < epsilon
    }

    /// Uniform scale factor of a rigid or similarity transform.
    ///
    /// Returns `1.0` (up to rounding) for rigid transforms. Projective rows,
    /// reflections, non-uniform scale and shear are rejected with
    /// [`Error::UnsupportedTransform`].
    pub fn similarity_scale(&self) -> Result<f32> {
        let bottom = self.matrix.fixed_view::<1, 4>(3, 0).into_owned();
        if (bottom - RowVector4::new(0.0, 0.0, 0.0, 1.0)).amax() > SIMILARITY_TOLERANCE {
            return Err(Error::UnsupportedTransform(
                "projective component in bottom row".to_string(),
            ));
        }

        let linear = self.linear();
        let det = linear.determinant();
        if !det.is_finite() || det <= 0.0 {
            return Err(Error::UnsupportedTransform(format!(
                "linear part has determinant {} (singular or reflection)",
                det
            )));
        }

        let scale = det.cbrt();
        let gram = linear.transpose() * linear / (scale * scale);
        let deviation = (gram - Matrix3::identity()).amax();
        if deviation > SIMILARITY_TOLERANCE {
            return Err(Error::UnsupportedTransform(format!(
                "non-uniform scale or shear (deviation {:.2e})",
                deviation
            )));
        }

        Ok(scale)
    }
}

impl Default for Transform3D {
    fn default() -> Self {
        Self::identity()
    }
}

impl std::ops::Mul for Transform3D {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self::Output {
        self.compose(rhs)
    }
}

impl From<Matrix4<f32>> for Transform3D {
    fn from(matrix: Matrix4<f32>) -> Self {
        Self { matrix }
    }
}

impl From<Isometry3<f32>> for Transform3D {
    fn from(isometry: Isometry3<f32>) -> Self {
        Self {
            matrix: isometry.to_homogeneous(),
        }
    }
}

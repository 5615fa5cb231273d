//! Scalar and vector aliases shared across splatreg

use nalgebra::{Point3, Vector3};

/// A 3D point with floating point coordinates
pub type Point3f = Point3<f32>;

/// A 3D vector with floating point components
pub type Vector3f = Vector3<f32>;

/// Number of spherical-harmonic coefficients above degree 0, over three channels.
pub fn feature_block_len(sh_degree: usize) -> usize {
    3 * ((sh_degree + 1) * (sh_degree + 1) - 1)
}

//! Core data structures for splatreg
//!
//! This crate provides the Gaussian primitive set used on both sides of a
//! registration pair, together with the covariance and quaternion bookkeeping
//! needed to transform, merge and decompose it.

pub mod covariance;
pub mod error;
pub mod gaussian;
pub mod level;
pub mod point;
pub mod preview;
pub mod transform;

pub use covariance::*;
pub use error::*;
pub use gaussian::*;
pub use level::*;
pub use point::*;
pub use preview::*;
pub use transform::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Isometry3, Matrix3, Matrix4, Point3, UnitQuaternion, Vector3};

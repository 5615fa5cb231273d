//! Error types for splatreg

use thiserror::Error;

/// Main error type for splatreg operations
#[derive(Error, Debug)]
pub enum Error {
    /// A covariance has an eigenvalue below the negative tolerance.
    #[error("Degenerate covariance at primitive {index}: eigenvalue {eigenvalue} is negative")]
    DegenerateCovariance { index: usize, eigenvalue: f32 },

    /// Two primitive sets carry spherical-harmonic blocks of different sizes.
    #[error("Incompatible feature degree: SH degree {left} vs {right}")]
    IncompatibleFeatureDegree { left: usize, right: usize },

    #[error("No plane partitions available for partitioned reduction")]
    NoPartitions,

    /// A task is already running in the requested slot.
    #[error("Task slot '{slot}' is busy")]
    Busy { slot: String },

    #[error("Mixture clustering oracle failed: {0}")]
    OracleFailure(#[source] anyhow::Error),

    #[error("Unsupported transform: {0}")]
    UnsupportedTransform(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Task panicked: {0}")]
    TaskPanicked(String),

    #[error("Task error: {0}")]
    Task(String),
}

/// Result type alias for splatreg operations
pub type Result<T> = std::result::Result<T, Error>;

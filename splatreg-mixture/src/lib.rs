//! Hierarchical mixture reduction for Gaussian splat clouds
//!
//! This crate drives an external clustering oracle to build level-of-detail
//! pyramids:
//! - Partitioned reduction, coarsening only the primitives on fitted planes
//! - Whole-cloud mixture builds
//! - Task wrappers that run either over a registration pair

pub mod builder;
pub mod params;
pub mod progress;
pub mod pyramid;
pub mod reducer;
pub mod task;

pub use builder::*;
pub use params::*;
pub use progress::*;
pub use pyramid::*;
pub use reducer::*;
pub use task::*;

use splatreg_core::MixtureLevel;

/// External hierarchical clustering of a Gaussian mixture.
///
/// Given a flat list of primitives, returns `params.depth` reduced levels, level 0
/// being the least reduced. Implementations are expected to be deterministic for
/// identical inputs.
pub trait MixtureClusteringOracle: Send + Sync {
    fn reduce(&self, input: &MixtureLevel, params: &ReductionParams) -> anyhow::Result<Vec<MixtureLevel>>;
}

impl<F> MixtureClusteringOracle for F
where
    F: Fn(&MixtureLevel, &ReductionParams) -> anyhow::Result<Vec<MixtureLevel>> + Send + Sync,
{
    fn reduce(&self, input: &MixtureLevel, params: &ReductionParams) -> anyhow::Result<Vec<MixtureLevel>> {
        self(input, params)
    }
}

//! Whole-cloud mixture builds
//!
//! Unlike the partitioned reducer, every primitive of a side goes through a single
//! oracle call. The build runs in five steps (extract both sides, reduce first,
//! reduce second, materialize first, materialize second), reporting progress and
//! checking for cancellation after each one.

use crate::params::ReductionParams;
use crate::progress::StepProgress;
use crate::pyramid::{materialize_levels, ReducedPair};
use crate::MixtureClusteringOracle;
use splatreg_core::{DecompositionConfig, Error, GaussianPrimitiveSet, MixtureLevel, Result};
use splatreg_tasks::{TaskContext, TaskOutcome};
use std::sync::Arc;
use tracing::{info, warn};

const BUILD_STEPS: usize = 5;

/// Reduces both sides of a pair with one oracle call each
#[derive(Clone)]
pub struct MixtureBuilder {
    oracle: Arc<dyn MixtureClusteringOracle>,
    params: ReductionParams,
    decomposition: DecompositionConfig,
}

impl MixtureBuilder {
    pub fn new(oracle: Arc<dyn MixtureClusteringOracle>, params: ReductionParams) -> Self {
        Self {
            oracle,
            params,
            decomposition: DecompositionConfig::default(),
        }
    }

    pub fn with_decomposition(mut self, decomposition: DecompositionConfig) -> Self {
        self.decomposition = decomposition;
        self
    }

    pub fn params(&self) -> &ReductionParams {
        &self.params
    }

    pub fn build(
        &self,
        first: &GaussianPrimitiveSet,
        second: &GaussianPrimitiveSet,
        ctx: &TaskContext,
    ) -> Result<TaskOutcome<ReducedPair>> {
        self.params.validate()?;
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }
        let mut progress = StepProgress::new(BUILD_STEPS);

        let first_input = first.to_mixture_level();
        let second_input = second.to_mixture_level();
        if stop_after_step(&mut progress, ctx) {
            return Ok(TaskOutcome::Cancelled);
        }

        info!(primitives = first.len(), "building mixture for the first cloud");
        let first_levels = self.reduce_whole(&first_input, first.feature_block_len())?;
        if stop_after_step(&mut progress, ctx) {
            return Ok(TaskOutcome::Cancelled);
        }

        info!(primitives = second.len(), "building mixture for the second cloud");
        let second_levels = self.reduce_whole(&second_input, second.feature_block_len())?;
        if stop_after_step(&mut progress, ctx) {
            return Ok(TaskOutcome::Cancelled);
        }

        let first_pyramid = materialize_levels(first_levels, first.sh_degree(), &self.decomposition)?;
        if stop_after_step(&mut progress, ctx) {
            return Ok(TaskOutcome::Cancelled);
        }

        let second_pyramid = materialize_levels(second_levels, second.sh_degree(), &self.decomposition)?;
        progress.advance(ctx);

        info!(
            first_levels = first_pyramid.len(),
            second_levels = second_pyramid.len(),
            "mixture build finished"
        );
        Ok(TaskOutcome::Completed(ReducedPair {
            first: first_pyramid,
            second: second_pyramid,
        }))
    }

    fn reduce_whole(&self, input: &MixtureLevel, block_len: usize) -> Result<Vec<MixtureLevel>> {
        let mut levels = self
            .oracle
            .reduce(input, &self.params)
            .map_err(Error::OracleFailure)?;
        if levels.len() != self.params.depth {
            warn!(
                expected = self.params.depth,
                returned = levels.len(),
                "oracle returned an unexpected number of levels"
            );
            levels.truncate(self.params.depth);
        }
        for level in &levels {
            level.validate(block_len)?;
        }
        Ok(levels)
    }
}

impl std::fmt::Debug for MixtureBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MixtureBuilder")
            .field("params", &self.params)
            .field("decomposition", &self.decomposition)
            .finish_non_exhaustive()
    }
}

fn stop_after_step(progress: &mut StepProgress, ctx: &TaskContext) -> bool {
    progress.advance(ctx);
    ctx.is_cancelled()
}

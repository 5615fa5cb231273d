//! Plane-partitioned mixture reduction
//!
//! Primitives on fitted planes are handed to the clustering oracle plane by
//! plane; everything else is kept at full density on every level. Per level the
//! output is the unpartitioned remainder followed by each plane's reduction, in
//! input order.

use crate::params::ReductionParams;
use crate::progress::StepProgress;
use crate::pyramid::{materialize_levels, PyramidLevel};
use crate::MixtureClusteringOracle;
use splatreg_core::{DecompositionConfig, Error, GaussianPrimitiveSet, Result};
use splatreg_tasks::{TaskContext, TaskOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Drives the oracle once per plane partition
#[derive(Clone)]
pub struct PartitionedMixtureReducer {
    oracle: Arc<dyn MixtureClusteringOracle>,
    params: ReductionParams,
    decomposition: DecompositionConfig,
}

impl PartitionedMixtureReducer {
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

    /// Check the inputs of one side without calling the oracle
    pub fn check_partitions(&self, set: &GaussianPrimitiveSet, planes: &[Vec<usize>]) -> Result<()> {
        self.params.validate()?;
        if planes.is_empty() {
            return Err(Error::NoPartitions);
        }
        let n = set.len();
        for (plane, indices) in planes.iter().enumerate() {
            if let Some(&bad) = indices.iter().find(|&&i| i >= n) {
                return Err(Error::InvalidData(format!(
                    "plane {} references primitive {} but the set has {}",
                    plane, bad, n
                )));
            }
        }
        Ok(())
    }

    /// Reduce one side, reporting progress against `1 + planes.len()` steps.
    pub fn reduce(
        &self,
        set: &GaussianPrimitiveSet,
        planes: &[Vec<usize>],
        ctx: &TaskContext,
    ) -> Result<TaskOutcome<Vec<PyramidLevel>>> {
        let mut progress = StepProgress::for_planes(planes.len());
        self.reduce_with_progress(set, planes, ctx, &mut progress)
    }

    /// Reduce one side, advancing a progress counter shared with other work.
    ///
    /// Progress is reported after every plane, and cancellation is checked right
    /// after each report. A cancelled run returns [`TaskOutcome::Cancelled`] and
    /// no partial levels.
    pub fn reduce_with_progress(
        &self,
        set: &GaussianPrimitiveSet,
        planes: &[Vec<usize>],
        ctx: &TaskContext,
        progress: &mut StepProgress,
    ) -> Result<TaskOutcome<Vec<PyramidLevel>>> {
        self.check_partitions(set, planes)?;
        if ctx.is_cancelled() {
            return Ok(TaskOutcome::Cancelled);
        }

        let coverage = Coverage::of(set.len(), planes);
        if coverage.overlapping > 0 {
            debug!(
                overlapping = coverage.overlapping,
                "plane partitions overlap, shared primitives are reduced once per plane"
            );
        }

        let remainder = set.mixture_level_at(&coverage.remainder)?;
        let depth = self.params.depth;
        let mut levels = vec![remainder; depth];
        info!(
            primitives = set.len(),
            remainder = coverage.remainder.len(),
            planes = planes.len(),
            depth,
            "starting partitioned reduction"
        );

        let block_len = set.feature_block_len();
        for (plane, indices) in planes.iter().enumerate() {
            if indices.is_empty() {
                debug!(plane, "skipping empty plane partition");
            } else {
                let input = set.mixture_level_at(indices)?;
                let reduced = self
                    .oracle
                    .reduce(&input, &self.params)
                    .map_err(Error::OracleFailure)?;
                if reduced.len() != depth {
                    warn!(
                        plane,
                        expected = depth,
                        returned = reduced.len(),
                        "oracle returned an unexpected number of levels"
                    );
                }
                for (accumulator, level) in levels.iter_mut().zip(reduced) {
                    level.validate(block_len)?;
                    accumulator.append(level);
                }
            }

            let percent = progress.advance(ctx);
            debug!(plane, percent, "plane reduced");
            if ctx.is_cancelled() {
                info!(plane, "partitioned reduction cancelled");
                return Ok(TaskOutcome::Cancelled);
            }
        }

        let pyramid = materialize_levels(levels, set.sh_degree(), &self.decomposition)?;
        info!(levels = pyramid.len(), "partitioned reduction finished");
        Ok(TaskOutcome::Completed(pyramid))
    }
}

impl std::fmt::Debug for PartitionedMixtureReducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedMixtureReducer")
            .field("params", &self.params)
            .field("decomposition", &self.decomposition)
            .finish_non_exhaustive()
    }
}

/// How plane partitions cover the index range of a set
#[derive(Debug, Clone, PartialEq, Eq)]
struct Coverage {
    /// Indices on no plane, ascending
    remainder: Vec<usize>,
    /// Number of extra occurrences of indices listed by several planes
    overlapping: usize,
}

impl Coverage {
    fn of(len: usize, planes: &[Vec<usize>]) -> Self {
        let mut hits = vec![0u32; len];
        for &i in planes.iter().flatten() {
            hits[i] += 1;
        }
        let remainder = hits
            .iter()
            .enumerate()
            .filter(|(_, h)| **h == 0)
            .map(|(i, _)| i)
            .collect();
        let overlapping = hits.iter().map(|&h| h.saturating_sub(1) as usize).sum();
        Self { remainder, overlapping }
    }
}

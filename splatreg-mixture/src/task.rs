//! Background tasks reducing both sides of a registration pair

use crate::builder::MixtureBuilder;
use crate::progress::StepProgress;
use crate::pyramid::ReducedPair;
use crate::reducer::PartitionedMixtureReducer;
use splatreg_core::{GaussianPrimitiveSet, Result};
use splatreg_tasks::{Task, TaskContext, TaskOutcome};
use std::sync::Arc;

/// Plane-partitioned reduction of both sides.
///
/// Progress counts the planes of both sides against one total of
/// `1 + planes(first) + planes(second)`.
#[derive(Debug, Clone)]
pub struct PlaneMergeTask {
    reducer: PartitionedMixtureReducer,
    first: Arc<GaussianPrimitiveSet>,
    second: Arc<GaussianPrimitiveSet>,
    first_planes: Vec<Vec<usize>>,
    second_planes: Vec<Vec<usize>>,
}

impl PlaneMergeTask {
    pub fn new(
        reducer: PartitionedMixtureReducer,
        first: Arc<GaussianPrimitiveSet>,
        second: Arc<GaussianPrimitiveSet>,
        first_planes: Vec<Vec<usize>>,
        second_planes: Vec<Vec<usize>>,
    ) -> Self {
        Self {
            reducer,
            first,
            second,
            first_planes,
            second_planes,
        }
    }
}

impl Task for PlaneMergeTask {
    type Output = ReducedPair;

    fn run(self, ctx: &TaskContext) -> Result<TaskOutcome<ReducedPair>> {
        // Reject bad input on either side before the first oracle call.
        self.reducer.check_partitions(&self.first, &self.first_planes)?;
        self.reducer.check_partitions(&self.second, &self.second_planes)?;

        let mut progress = StepProgress::for_planes(self.first_planes.len() + self.second_planes.len());

        let first = match self
            .reducer
            .reduce_with_progress(&self.first, &self.first_planes, ctx, &mut progress)?
        {
            TaskOutcome::Completed(levels) => levels,
            TaskOutcome::Cancelled => return Ok(TaskOutcome::Cancelled),
        };
        let second = match self
            .reducer
            .reduce_with_progress(&self.second, &self.second_planes, ctx, &mut progress)?
        {
            TaskOutcome::Completed(levels) => levels,
            TaskOutcome::Cancelled => return Ok(TaskOutcome::Cancelled),
        };

        Ok(TaskOutcome::Completed(ReducedPair { first, second }))
    }
}

/// Whole-cloud mixture build of both sides
#[derive(Debug, Clone)]
pub struct MixtureBuildTask {
    builder: MixtureBuilder,
    first: Arc<GaussianPrimitiveSet>,
    second: Arc<GaussianPrimitiveSet>,
}

impl MixtureBuildTask {
    pub fn new(builder: MixtureBuilder, first: Arc<GaussianPrimitiveSet>, second: Arc<GaussianPrimitiveSet>) -> Self {
        Self { builder, first, second }
    }
}

impl Task for MixtureBuildTask {
    type Output = ReducedPair;

    fn run(self, ctx: &TaskContext) -> Result<TaskOutcome<ReducedPair>> {
        self.builder.build(&self.first, &self.second, ctx)
    }
}

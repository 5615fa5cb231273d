//! Coordinator of a registration session
//!
//! The session owns [`SessionState`] and is its only writer. Reductions run on
//! the [`TaskRunner`] in a single "pyramid" slot; while one is running, every
//! operation that would change the inputs of that reduction is rejected with
//! [`Error::Busy`]. Results are installed only on full success.

use crate::config::SessionConfig;
use crate::state::{ActivePair, PlanePartition, SessionState, Side};
use splatreg_core::{Error, GaussianPrimitiveSet, Result, Transform3D};
use splatreg_mixture::{
    MixtureBuildTask, MixtureBuilder, MixtureClusteringOracle, PartitionedMixtureReducer, PlaneMergeTask,
    PyramidLevel, ReducedPair,
};
use splatreg_tasks::{CancellationToken, SlotState, Task, TaskHandle, TaskRunner, TaskSinks, TaskSlot, TaskStatus};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;
use tracing::{info, warn};

/// Slot shared by every pyramid-producing task
pub const PYRAMID_SLOT: TaskSlot = TaskSlot::named("pyramid");

/// Which reduction a pending task performs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReductionKind {
    MixtureBuild,
    PlaneMerge,
}

type ProgressSink = Box<dyn FnMut(u8)>;

/// A reduction running in the background, to be finished with
/// [`RegistrationSession::complete`]
pub struct PendingReduction {
    kind: ReductionKind,
    handle: TaskHandle<ReducedPair>,
    progress: Rc<RefCell<Option<ProgressSink>>>,
    result: Rc<RefCell<Option<ReducedPair>>>,
    error: Rc<RefCell<Option<Error>>>,
}

impl PendingReduction {
    pub fn kind(&self) -> ReductionKind {
        self.kind
    }

    pub fn request_cancel(&self) {
        self.handle.request_cancel();
    }

    /// Token that cancels this reduction; usable from other threads
    pub fn cancellation_token(&self) -> CancellationToken {
        self.handle.cancellation_token()
    }
}

impl std::fmt::Debug for PendingReduction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingReduction")
            .field("kind", &self.kind)
            .field("slot", self.handle.slot())
            .finish_non_exhaustive()
    }
}

/// Coordinator owning the state of one registration pair
pub struct RegistrationSession {
    state: SessionState,
    config: SessionConfig,
    oracle: Arc<dyn MixtureClusteringOracle>,
    runner: TaskRunner,
    transform_listeners: Vec<Box<dyn FnMut(&Transform3D)>>,
    level_listeners: Vec<Box<dyn FnMut(usize)>>,
    error_sinks: Vec<Box<dyn FnMut(&Error)>>,
}

impl RegistrationSession {
    pub fn new(oracle: Arc<dyn MixtureClusteringOracle>, config: SessionConfig) -> Self {
        let runner = TaskRunner::new(config.runner.clone());
        Self {
            state: SessionState::new(),
            config,
            oracle,
            runner,
            transform_listeners: Vec::new(),
            level_listeners: Vec::new(),
            error_sinks: Vec::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Called with the new transform whenever it changes
    pub fn on_transform_changed(&mut self, listener: impl FnMut(&Transform3D) + 'static) {
        self.transform_listeners.push(Box::new(listener));
    }

    /// Called with the number of shared levels after every pyramid install
    pub fn on_levels_changed(&mut self, listener: impl FnMut(usize) + 'static) {
        self.level_listeners.push(Box::new(listener));
    }

    /// Called with the error of every failed reduction
    pub fn on_error(&mut self, sink: impl FnMut(&Error) + 'static) {
        self.error_sinks.push(Box::new(sink));
    }

    pub fn is_busy(&self) -> bool {
        self.runner.slot_state(&PYRAMID_SLOT) == SlotState::Running
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.is_busy() {
            warn!("pyramid task running, rejecting state change");
            return Err(Error::Busy {
                slot: PYRAMID_SLOT.to_string(),
            });
        }
        Ok(())
    }

    fn ensure_loaded(&self) -> Result<()> {
        if !self.state.is_loaded() {
            return Err(Error::InvalidData(
                "two Gaussian point clouds must be loaded first".to_string(),
            ));
        }
        Ok(())
    }

    /// Install a new pair. Both pyramids restart at level 0 and planes are dropped.
    pub fn load_pair(&mut self, first: GaussianPrimitiveSet, second: GaussianPrimitiveSet) -> Result<()> {
        self.ensure_idle()?;
        if first.feature_block_len() != second.feature_block_len() {
            return Err(Error::IncompatibleFeatureDegree {
                left: first.sh_degree(),
                right: second.sh_degree(),
            });
        }

        info!(first = first.len(), second = second.len(), "loading registration pair");
        self.state
            .replace_pyramids(vec![PyramidLevel::new(first)], vec![PyramidLevel::new(second)]);
        self.state.set_active_level(0);
        self.state.clear_planes();
        self.notify_levels();
        Ok(())
    }

    pub fn set_plane_partitions(&mut self, first: Vec<PlanePartition>, second: Vec<PlanePartition>) -> Result<()> {
        self.ensure_idle()?;
        self.ensure_loaded()?;
        self.state.set_planes(first, second)?;
        info!(
            first = self.state.planes(Side::First).len(),
            second = self.state.planes(Side::Second).len(),
            "plane partitions updated"
        );
        Ok(())
    }

    pub fn clear_planes(&mut self) -> Result<()> {
        self.ensure_idle()?;
        self.state.clear_planes();
        Ok(())
    }

    /// Level-0 primitives lying on any plane of `side`, in plane order
    pub fn plane_inliers(&self, side: Side) -> Result<GaussianPrimitiveSet> {
        let original = self
            .state
            .original(side)
            .ok_or_else(|| Error::InvalidData(format!("{:?} cloud is not loaded", side)))?;
        let indices: Vec<usize> = self
            .state
            .planes(side)
            .iter()
            .flat_map(|p| p.indices.iter().copied())
            .collect();
        original.gaussians.select(&indices)
    }

    /// Start a whole-cloud mixture build of both level-0 sets
    pub fn start_mixture_build(&self) -> Result<PendingReduction> {
        self.ensure_loaded()?;
        let (first, second) = self.originals()?;
        let builder = MixtureBuilder::new(Arc::clone(&self.oracle), self.config.reduction)
            .with_decomposition(self.config.decomposition);
        self.submit(ReductionKind::MixtureBuild, MixtureBuildTask::new(builder, first, second))
    }

    /// Start a plane-partitioned reduction of both level-0 sets
    pub fn start_plane_merge(&self) -> Result<PendingReduction> {
        self.ensure_loaded()?;
        if self.state.planes(Side::First).is_empty() || self.state.planes(Side::Second).is_empty() {
            return Err(Error::NoPartitions);
        }
        let (first, second) = self.originals()?;
        let reducer = PartitionedMixtureReducer::new(Arc::clone(&self.oracle), self.config.reduction)
            .with_decomposition(self.config.decomposition);
        let task = PlaneMergeTask::new(
            reducer,
            first,
            second,
            self.state.plane_indices(Side::First),
            self.state.plane_indices(Side::Second),
        );
        self.submit(ReductionKind::PlaneMerge, task)
    }

    fn originals(&self) -> Result<(Arc<GaussianPrimitiveSet>, Arc<GaussianPrimitiveSet>)> {
        match (self.state.original(Side::First), self.state.original(Side::Second)) {
            (Some(first), Some(second)) => Ok((Arc::clone(&first.gaussians), Arc::clone(&second.gaussians))),
            _ => Err(Error::InvalidData("registration pair is not loaded".to_string())),
        }
    }

    fn submit<W>(&self, kind: ReductionKind, task: W) -> Result<PendingReduction>
    where
        W: Task<Output = ReducedPair>,
    {
        let progress: Rc<RefCell<Option<ProgressSink>>> = Rc::new(RefCell::new(None));
        let result: Rc<RefCell<Option<ReducedPair>>> = Rc::new(RefCell::new(None));
        let error: Rc<RefCell<Option<Error>>> = Rc::new(RefCell::new(None));

        let progress_sink = Rc::clone(&progress);
        let result_slot = Rc::clone(&result);
        let error_slot = Rc::clone(&error);
        let sinks = TaskSinks::new()
            .on_progress(move |percent| {
                if let Some(sink) = progress_sink.borrow_mut().as_mut() {
                    sink(percent);
                }
            })
            .on_result(move |pair: ReducedPair| *result_slot.borrow_mut() = Some(pair))
            .on_error(move |e: Error| *error_slot.borrow_mut() = Some(e));

        let handle = self.runner.submit(PYRAMID_SLOT, task, sinks)?;
        info!(?kind, "reduction started");
        Ok(PendingReduction {
            kind,
            handle,
            progress,
            result,
            error,
        })
    }

    /// Wait for `pending`, forwarding its progress to `progress_sink`.
    ///
    /// On success the reduced levels are installed behind each side's level 0.
    /// Failures go to the registered error sinks. A cancelled reduction changes
    /// nothing.
    pub fn complete(&mut self, pending: PendingReduction, progress_sink: impl FnMut(u8) + 'static) -> TaskStatus {
        let PendingReduction {
            kind,
            handle,
            progress,
            result,
            error,
        } = pending;
        *progress.borrow_mut() = Some(Box::new(progress_sink));

        let status = handle.wait();
        match status {
            TaskStatus::Completed => match result.borrow_mut().take() {
                Some(pair) => self.install(kind, pair),
                None => warn!(?kind, "reduction completed without a result"),
            },
            TaskStatus::Failed => {
                if let Some(e) = error.borrow_mut().take() {
                    warn!(?kind, error = %e, "reduction failed, keeping current pyramids");
                    for sink in &mut self.error_sinks {
                        sink(&e);
                    }
                }
            }
            TaskStatus::Cancelled => info!(?kind, "reduction cancelled, keeping current pyramids"),
        }
        status
    }

    /// Run a whole-cloud mixture build to completion
    pub fn build_mixture(&mut self, progress_sink: impl FnMut(u8) + 'static) -> Result<TaskStatus> {
        let pending = self.start_mixture_build()?;
        Ok(self.complete(pending, progress_sink))
    }

    /// Run a plane-partitioned reduction to completion
    pub fn merge_plane_inliers(&mut self, progress_sink: impl FnMut(u8) + 'static) -> Result<TaskStatus> {
        let pending = self.start_plane_merge()?;
        Ok(self.complete(pending, progress_sink))
    }

    fn install(&mut self, kind: ReductionKind, pair: ReducedPair) {
        let (Some(first_original), Some(second_original)) = (
            self.state.original(Side::First).cloned(),
            self.state.original(Side::Second).cloned(),
        ) else {
            warn!(?kind, "no pair loaded, dropping reduction result");
            return;
        };

        let mut first = Vec::with_capacity(1 + pair.first.len());
        first.push(first_original);
        first.extend(pair.first);
        let mut second = Vec::with_capacity(1 + pair.second.len());
        second.push(second_original);
        second.extend(pair.second);

        info!(
            ?kind,
            first_levels = first.len(),
            second_levels = second.len(),
            "installing reduced pyramids"
        );
        self.state.replace_pyramids(first, second);
        if kind == ReductionKind::PlaneMerge {
            self.state.clear_planes();
        }
        self.notify_levels();
    }

    fn notify_levels(&mut self) {
        let count = self.state.level_count();
        for listener in &mut self.level_listeners {
            listener(count);
        }
    }

    pub fn transform(&self) -> &Transform3D {
        self.state.transform()
    }

    /// Store a new transform; listeners hear about it only if it differs
    pub fn set_transform(&mut self, transform: Transform3D) -> bool {
        if !self.state.set_transform(transform) {
            return false;
        }
        for listener in &mut self.transform_listeners {
            listener(&transform);
        }
        true
    }

    /// Apply a registration result on top of the current transform
    pub fn compose_transform(&mut self, delta: Transform3D) -> bool {
        let combined = delta * *self.state.transform();
        self.set_transform(combined)
    }

    /// Select the displayed level; returns the level actually selected
    pub fn set_active_level(&mut self, level: usize) -> usize {
        self.state.set_active_level(level)
    }

    pub fn active_pair(&self) -> Option<ActivePair> {
        self.state.active_pair()
    }

    /// The first set moved by the current transform followed by the second
    /// set, both at `level`. Stored sets are left untouched.
    pub fn merged_export(&self, level: usize) -> Result<GaussianPrimitiveSet> {
        let (Some(first), Some(second)) = (
            self.state.level(Side::First, level),
            self.state.level(Side::Second, level),
        ) else {
            return Err(Error::InvalidData(format!(
                "level {} is not available on both sides ({} shared levels)",
                level,
                self.state.level_count()
            )));
        };
        let moved = first.gaussians.transformed(self.state.transform())?;
        GaussianPrimitiveSet::merge(&moved, &second.gaussians)
    }
}

impl std::fmt::Debug for RegistrationSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationSession")
            .field("state", &self.state)
            .field("config", &self.config)
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

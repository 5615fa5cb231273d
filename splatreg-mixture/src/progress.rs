//! Step counting for modal progress reports

use splatreg_tasks::TaskContext;

/// Counts finished steps against a fixed total and reports the rounded percentage.
///
/// For partitioned reductions the total is `1 + planes`, the extra unit standing
/// for the unpartitioned pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepProgress {
    done: usize,
    total: usize,
}

impl StepProgress {
    pub fn new(total: usize) -> Self {
        Self {
            done: 0,
            total: total.max(1),
        }
    }

    /// Progress over `planes` plane partitions plus the unpartitioned pass
    pub fn for_planes(planes: usize) -> Self {
        Self::new(1 + planes)
    }

    pub fn done(&self) -> usize {
        self.done
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn percent(&self) -> u8 {
        let ratio = self.done.min(self.total) as f64 / self.total as f64;
        (100.0 * ratio).round() as u8
    }

    /// Mark one step finished and report the new percentage
    pub fn advance(&mut self, ctx: &TaskContext) -> u8 {
        self.done += 1;
        let percent = self.percent();
        ctx.report_progress(percent);
        percent
    }
}

//! State shared between a running task and its coordinator

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI16, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag.
///
/// Cancelling is advisory: the task observes the flag at its own check points.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Latest reported progress; only ever moves forward.
#[derive(Debug)]
pub(crate) struct ProgressCell {
    value: AtomicI16,
}

impl ProgressCell {
    pub(crate) fn new() -> Self {
        Self {
            value: AtomicI16::new(-1),
        }
    }

    /// Returns the new value if it moved the cell forward
    pub(crate) fn publish(&self, percent: u8) -> Option<u8> {
        let percent = percent.min(100);
        let previous = self.value.fetch_max(percent as i16, Ordering::AcqRel);
        (i16::from(percent) > previous).then_some(percent)
    }

    pub(crate) fn latest(&self) -> Option<u8> {
        let value = self.value.load(Ordering::Acquire);
        (value >= 0).then_some(value as u8)
    }
}

type ProgressObserver = Arc<dyn Fn(u8) + Send + Sync>;

/// Handle given to a running task for progress reports and cancellation checks
#[derive(Clone)]
pub struct TaskContext {
    progress: Arc<ProgressCell>,
    cancel: CancellationToken,
    observer: Option<ProgressObserver>,
}

impl TaskContext {
    pub(crate) fn new(progress: Arc<ProgressCell>, cancel: CancellationToken) -> Self {
        Self {
            progress,
            cancel,
            observer: None,
        }
    }

    /// Context for running a task body directly on the calling thread
    pub fn detached() -> Self {
        Self::new(Arc::new(ProgressCell::new()), CancellationToken::new())
    }

    /// Detached context observing an external cancellation token
    pub fn with_token(token: CancellationToken) -> Self {
        Self::new(Arc::new(ProgressCell::new()), token)
    }

    /// Call `observer` synchronously whenever reported progress moves forward
    pub fn with_observer(mut self, observer: impl Fn(u8) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Publish progress in percent. Values above 100 are clamped and values below
    /// the last report are ignored.
    pub fn report_progress(&self, percent: u8) {
        let Some(advanced) = self.progress.publish(percent) else {
            return;
        };
        if let Some(observer) = &self.observer {
            observer(advanced);
        }
    }

    pub fn latest_progress(&self) -> Option<u8> {
        self.progress.latest()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("progress", &self.progress.latest())
            .field("cancelled", &self.cancel.is_cancelled())
            .field("observer", &self.observer.as_ref().map(|_| "<function>"))
            .finish()
    }
}

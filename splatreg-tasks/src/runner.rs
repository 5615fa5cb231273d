//! Single-flight background task runner
//!
//! Each submitted task gets its own worker thread. At most one task may run per
//! [`TaskSlot`]; a second submit on an occupied slot fails with
//! [`Error::Busy`]. The coordinator drives delivery through the returned
//! [`TaskHandle`]: progress is coalesced to the latest value, and the result or
//! error reaches its sink exactly once, after the last progress report.
//!
//! A slot stays occupied until the worker has exited and its handle has either
//! delivered the outcome or been dropped.

use crate::config::RunnerConfig;
use crate::context::{CancellationToken, ProgressCell, TaskContext};
use flume::{Receiver, RecvTimeoutError, TryRecvError};
use splatreg_core::{Error, Result};
use std::any::Any;
use std::borrow::Cow;
use std::collections::HashSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a task body returns when it does not fail
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome<T> {
    Completed(T),
    /// The task observed a cancel request and stopped without a result
    Cancelled,
}

/// Terminal state of a task as seen by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Completed,
    Cancelled,
    Failed,
}

/// Occupancy of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Idle,
    Running,
}

/// Unit of background work
pub trait Task: Send + 'static {
    type Output: Send + 'static;

    fn run(self, ctx: &TaskContext) -> Result<TaskOutcome<Self::Output>>;
}

impl<F, T> Task for F
where
    F: FnOnce(&TaskContext) -> Result<TaskOutcome<T>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    fn run(self, ctx: &TaskContext) -> Result<TaskOutcome<T>> {
        self(ctx)
    }
}

/// Logical slot guarding one kind of operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskSlot(Cow<'static, str>);

impl TaskSlot {
    pub const fn named(name: &'static str) -> Self {
        Self(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TaskSlot {
    fn from(name: String) -> Self {
        Self(Cow::Owned(name))
    }
}

impl fmt::Display for TaskSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coordinator-side callbacks registered for one task
pub struct TaskSinks<T> {
    progress: Option<Box<dyn FnMut(u8)>>,
    result: Option<Box<dyn FnOnce(T)>>,
    error: Option<Box<dyn FnOnce(Error)>>,
}

impl<T> TaskSinks<T> {
    pub fn new() -> Self {
        Self {
            progress: None,
            result: None,
            error: None,
        }
    }

    pub fn on_progress(mut self, sink: impl FnMut(u8) + 'static) -> Self {
        self.progress = Some(Box::new(sink));
        self
    }

    pub fn on_result(mut self, sink: impl FnOnce(T) + 'static) -> Self {
        self.result = Some(Box::new(sink));
        self
    }

    pub fn on_error(mut self, sink: impl FnOnce(Error) + 'static) -> Self {
        self.error = Some(Box::new(sink));
        self
    }
}

impl<T> Default for TaskSinks<T> {
    fn default() -> Self {
        Self::new()
    }
}

type SlotSet = Arc<Mutex<HashSet<TaskSlot>>>;

/// Marks a slot as running until dropped.
///
/// Shared by the worker thread and the [`TaskHandle`]; the slot frees when the
/// last of them lets go.
struct SlotGuard {
    running: SlotSet,
    slot: TaskSlot,
}

impl SlotGuard {
    fn acquire(running: &SlotSet, slot: &TaskSlot) -> Result<Self> {
        let mut set = running.lock().unwrap_or_else(PoisonError::into_inner);
        if !set.insert(slot.clone()) {
            return Err(Error::Busy {
                slot: slot.to_string(),
            });
        }
        Ok(Self {
            running: Arc::clone(running),
            slot: slot.clone(),
        })
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.slot);
    }
}

/// Spawns tasks on dedicated worker threads, one per slot at a time
#[derive(Debug, Clone)]
pub struct TaskRunner {
    config: RunnerConfig,
    running: SlotSet,
}

impl TaskRunner {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            running: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn slot_state(&self, slot: &TaskSlot) -> SlotState {
        let set = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if set.contains(slot) {
            SlotState::Running
        } else {
            SlotState::Idle
        }
    }

    /// Start `task` in `slot` with a fresh cancellation token
    pub fn submit<W: Task>(
        &self,
        slot: TaskSlot,
        task: W,
        sinks: TaskSinks<W::Output>,
    ) -> Result<TaskHandle<W::Output>> {
        self.submit_with_token(slot, task, sinks, CancellationToken::new())
    }

    /// Start `task` in `slot`, observing an externally owned cancellation token
    pub fn submit_with_token<W: Task>(
        &self,
        slot: TaskSlot,
        task: W,
        sinks: TaskSinks<W::Output>,
        cancel: CancellationToken,
    ) -> Result<TaskHandle<W::Output>> {
        let guard = match SlotGuard::acquire(&self.running, &slot) {
            Ok(guard) => Arc::new(guard),
            Err(e) => {
                warn!(slot = %slot, "rejected task submit, slot is busy");
                return Err(e);
            }
        };

        let progress = Arc::new(ProgressCell::new());
        let ctx = TaskContext::new(Arc::clone(&progress), cancel.clone());
        let (tx, rx) = flume::bounded(1);

        let mut builder = thread::Builder::new().name(format!("{}-{}", self.config.thread_name_prefix, slot));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let worker_slot = slot.clone();
        let worker_guard = Arc::clone(&guard);
        let worker = builder
            .spawn(move || {
                let outcome = match panic::catch_unwind(AssertUnwindSafe(|| task.run(&ctx))) {
                    Ok(outcome) => outcome,
                    Err(payload) => Err(Error::TaskPanicked(panic_message(payload.as_ref()))),
                };
                debug!(slot = %worker_slot, "worker finished");
                let _ = tx.send(outcome);
                drop(worker_guard);
            })
            .map_err(|e| Error::Task(format!("failed to spawn worker for slot '{}': {}", slot, e)))?;

        info!(slot = %slot, "task submitted");
        Ok(TaskHandle {
            slot,
            events: rx,
            progress,
            cancel,
            sinks,
            delivered_progress: None,
            poll_interval: self.config.poll_interval,
            worker: Some(worker),
            finished: None,
            guard: Some(guard),
        })
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Coordinator handle of a submitted task
pub struct TaskHandle<T> {
    slot: TaskSlot,
    events: Receiver<Result<TaskOutcome<T>>>,
    progress: Arc<ProgressCell>,
    cancel: CancellationToken,
    sinks: TaskSinks<T>,
    delivered_progress: Option<u8>,
    poll_interval: Duration,
    worker: Option<JoinHandle<()>>,
    finished: Option<TaskStatus>,
    guard: Option<Arc<SlotGuard>>,
}

impl<T> TaskHandle<T> {
    pub fn slot(&self) -> &TaskSlot {
        &self.slot
    }

    /// Ask the task to stop at its next check point
    pub fn request_cancel(&self) {
        info!(slot = %self.slot, "cancel requested");
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Forward pending progress and, if the task has ended, deliver its outcome.
    /// Never blocks.
    pub fn poll(&mut self) -> Option<TaskStatus> {
        if self.finished.is_some() {
            return self.finished;
        }
        match self.events.try_recv() {
            Ok(outcome) => Some(self.finish(outcome)),
            Err(TryRecvError::Empty) => {
                self.forward_progress();
                None
            }
            Err(TryRecvError::Disconnected) => Some(self.finish(Err(worker_vanished()))),
        }
    }

    /// Block until the task ends, forwarding progress meanwhile.
    pub fn wait(mut self) -> TaskStatus {
        loop {
            if let Some(status) = self.finished {
                return status;
            }
            match self.events.recv_timeout(self.poll_interval) {
                Ok(outcome) => return self.finish(outcome),
                Err(RecvTimeoutError::Timeout) => self.forward_progress(),
                Err(RecvTimeoutError::Disconnected) => return self.finish(Err(worker_vanished())),
            }
        }
    }

    fn forward_progress(&mut self) {
        let Some(latest) = self.progress.latest() else {
            return;
        };
        if self.delivered_progress.is_some_and(|delivered| delivered >= latest) {
            return;
        }
        self.delivered_progress = Some(latest);
        if let Some(sink) = self.sinks.progress.as_mut() {
            sink(latest);
        }
    }

    fn finish(&mut self, outcome: Result<TaskOutcome<T>>) -> TaskStatus {
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.forward_progress();

        let status = match outcome {
            Ok(TaskOutcome::Completed(value)) => {
                info!(slot = %self.slot, "task completed");
                if let Some(sink) = self.sinks.result.take() {
                    sink(value);
                }
                TaskStatus::Completed
            }
            Ok(TaskOutcome::Cancelled) => {
                info!(slot = %self.slot, "task cancelled");
                TaskStatus::Cancelled
            }
            Err(error) => {
                warn!(slot = %self.slot, error = %error, "task failed");
                if let Some(sink) = self.sinks.error.take() {
                    sink(error);
                }
                TaskStatus::Failed
            }
        };
        self.finished = Some(status);
        // Sinks have run; the slot may be reused from here on.
        self.guard = None;
        status
    }
}

fn worker_vanished() -> Error {
    Error::Task("worker exited without reporting an outcome".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_names() {
        let a = TaskSlot::named("pyramid");
        let b = TaskSlot::from("pyramid".to_string());
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "pyramid");
    }

    #[test]
    fn test_closure_task_completes() {
        let runner = TaskRunner::default();
        let slot = TaskSlot::named("closure");
        let handle = runner
            .submit(
                slot.clone(),
                |_: &TaskContext| -> Result<TaskOutcome<i32>> { Ok(TaskOutcome::Completed(7)) },
                TaskSinks::new(),
            )
            .unwrap();
        assert_eq!(handle.wait(), TaskStatus::Completed);
        assert_eq!(runner.slot_state(&slot), SlotState::Idle);
    }

    #[test]
    fn test_slot_held_until_outcome_delivered() {
        let runner = TaskRunner::default();
        let slot = TaskSlot::named("delivery");
        let mut handle = runner
            .submit(
                slot.clone(),
                |_: &TaskContext| -> Result<TaskOutcome<i32>> { Ok(TaskOutcome::Completed(1)) },
                TaskSinks::new(),
            )
            .unwrap();

        // Worker is done once the outcome is queued; the slot must still be taken.
        while handle.events.is_empty() {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(runner.slot_state(&slot), SlotState::Running);

        assert_eq!(handle.poll(), Some(TaskStatus::Completed));
        assert_eq!(runner.slot_state(&slot), SlotState::Idle);
    }

    #[test]
    fn test_dropped_handle_frees_slot_after_worker() {
        let runner = TaskRunner::default();
        let slot = TaskSlot::named("dropped");
        let (release_tx, release_rx) = flume::bounded::<()>(0);
        let handle = runner
            .submit(
                slot.clone(),
                move |_: &TaskContext| -> Result<TaskOutcome<()>> {
                    let _ = release_rx.recv();
                    Ok(TaskOutcome::Completed(()))
                },
                TaskSinks::new(),
            )
            .unwrap();
        drop(handle);
        assert_eq!(runner.slot_state(&slot), SlotState::Running);

        release_tx.send(()).unwrap();
        while runner.slot_state(&slot) == SlotState::Running {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(runner.slot_state(&slot), SlotState::Idle);
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}

//! Runner configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for the background task runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Worker thread name prefix; the slot name is appended
    pub thread_name_prefix: String,
    /// Worker thread stack size in bytes (None = platform default)
    pub stack_size: Option<usize>,
    /// How often a waiting coordinator forwards coalesced progress
    pub poll_interval: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            thread_name_prefix: "splatreg-task".to_string(),
            stack_size: Some(8 * 1024 * 1024), // 8MB stack
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl RunnerConfig {
    /// Set worker thread name prefix
    pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.thread_name_prefix = prefix.into();
        self
    }

    /// Set stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Set progress poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

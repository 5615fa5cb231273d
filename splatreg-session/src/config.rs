//! Session configuration

use serde::{Deserialize, Serialize};
use splatreg_core::DecompositionConfig;
use splatreg_mixture::ReductionParams;
use splatreg_tasks::RunnerConfig;

/// Everything a session needs besides the oracle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub reduction: ReductionParams,
    pub decomposition: DecompositionConfig,
    pub runner: RunnerConfig,
}

impl SessionConfig {
    pub fn with_reduction(mut self, reduction: ReductionParams) -> Self {
        self.reduction = reduction;
        self
    }

    pub fn with_decomposition(mut self, decomposition: DecompositionConfig) -> Self {
        self.decomposition = decomposition;
        self
    }

    pub fn with_runner(mut self, runner: RunnerConfig) -> Self {
        self.runner = runner;
        self
    }
}

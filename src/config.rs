//! Dispatcher configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DispatchError;

/// Budgets and buffer sizes for a [`Dispatcher`](crate::Dispatcher).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Loads released per second; also the size of the worker pool
    #[serde(default = "default_per_second_budget")]
    pub per_second_budget: u32,

    /// Loads released per rolling minute; zero or less means unlimited
    #[serde(default)]
    pub per_minute_budget: i64,

    /// Loads that may wait for release at once
    #[serde(default = "default_admission_capacity")]
    pub admission_capacity: usize,
}

fn default_per_second_budget() -> u32 {
    1
}

fn default_admission_capacity() -> usize {
    1024
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            per_second_budget: default_per_second_budget(),
            per_minute_budget: 0,
            admission_capacity: default_admission_capacity(),
        }
    }
}

impl DispatcherConfig {
    pub fn validate(&self) -> Result<(), DispatchError> {
        if self.per_second_budget < 1 {
            return Err(DispatchError::InvalidPerSecondBudget(self.per_second_budget));
        }
        if self.admission_capacity < 1 {
            return Err(DispatchError::InvalidAdmissionCapacity);
        }
        Ok(())
    }

    /// The per-minute ceiling, if there is one.
    pub fn per_minute_limit(&self) -> Option<usize> {
        (self.per_minute_budget > 0)
            .then(|| usize::try_from(self.per_minute_budget).unwrap_or(usize::MAX))
    }

    /// The interval between release attempts, rounded up so that a full second never holds
    /// more than `per_second_budget` ticks.
    pub fn tick_period(&self) -> Duration {
        let per_second = u64::from(self.per_second_budget.max(1));
        Duration::from_nanos(1_000_000_000u64.div_ceil(per_second))
    }
}

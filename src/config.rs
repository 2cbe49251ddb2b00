//! Scheduler configuration.

pub mod kernel;

use anyhow::ensure;

use crate::TinyResult;
use crate::task::PRIORITY_MIN;

use kernel::{
    IDLE_STACK_SIZE, INIT_PRIORITY, INIT_STACK_SIZE, MAX_CPUS, TINYENV_MAX_TASKS, TINYENV_SMP,
};

/// Runtime view of the scheduler configuration.
///
/// Built from the compile-time constants by default; tests construct their
/// own to get small, independent scheduler instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedConfig {
    /// Number of processors.
    pub ncpus: usize,
    /// Maximum number of live tasks, idle tasks included.
    pub max_tasks: usize,
    /// Stack size of every idle task.
    pub idle_stack_size: usize,
    /// Priority of the first user task started by the bring-up.
    pub init_priority: u8,
    /// Stack size of the first user task.
    pub init_stack_size: usize,
}

impl SchedConfig {
    /// Uniprocessor configuration with room for `max_tasks` tasks.
    pub const fn uniprocessor(max_tasks: usize) -> Self {
        Self {
            ncpus: 1,
            max_tasks,
            idle_stack_size: IDLE_STACK_SIZE,
            init_priority: INIT_PRIORITY,
            init_stack_size: INIT_STACK_SIZE,
        }
    }

    /// Multiprocessor configuration.
    pub const fn multiprocessor(ncpus: usize, max_tasks: usize) -> Self {
        Self {
            ncpus,
            ..Self::uniprocessor(max_tasks)
        }
    }

    /// Checks that the configuration can be booted.
    pub fn validate(&self) -> TinyResult<()> {
        ensure!(self.ncpus > 0, "at least one processor is required");
        ensure!(
            self.ncpus <= MAX_CPUS,
            "{} processors requested, at most {} supported",
            self.ncpus,
            MAX_CPUS
        );
        ensure!(
            self.max_tasks >= self.ncpus,
            "max_tasks ({}) cannot hold one idle task per processor ({})",
            self.max_tasks,
            self.ncpus
        );
        ensure!(
            self.init_priority >= PRIORITY_MIN,
            "init priority {} collides with the idle priority",
            self.init_priority
        );
        ensure!(self.idle_stack_size > 0, "idle stack size must not be zero");
        Ok(())
    }
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self::multiprocessor(TINYENV_SMP, TINYENV_MAX_TASKS)
    }
}

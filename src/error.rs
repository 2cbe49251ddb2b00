//! Error types for the scheduler core.
//!
//! Three kinds of failure exist and they are handled differently:
//!
//! - Capacity and argument errors are ordinary values of [`TinyError`]; the
//!   caller decides what to do (usually refuse to create a task).
//! - Facility and platform initialization returns [`TinyResult`], an alias for
//!   `anyhow::Result`, so callers can add context while the boot sequence
//!   unwinds to the step that failed.
//! - Invariant violations never return. They go through [`fatal!`], which logs
//!   the reason and panics; the kernel panic handler then halts the processor.
//!
//! ## Usage Examples
//!
//! ```ignore
//! anyhow::ensure!(size > 0, "empty heap region");
//! platform.allocate_kheap().context("kernel heap")?;
//! fatal!("task {} is not in the {:?} list", pid, state);
//! ```

use thiserror::Error;

use crate::task::{TaskId, TaskState};

/// Result type alias using anyhow::Error.
///
/// Used for everything the bootstrap sequence calls into.
pub type TinyResult<T> = anyhow::Result<T>;

/// Recoverable scheduler errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TinyError {
    /// Every task slot is in use.
    #[error("task capacity of {max} exceeded")]
    CapacityExceeded { max: usize },
    /// Priority outside of the range available to created tasks.
    #[error("invalid task priority {0}")]
    InvalidPriority(u8),
    /// No live task carries this identifier.
    #[error("no task with pid {0}")]
    NoSuchTask(TaskId),
    /// The task is not in a state that allows the operation.
    #[error("task {pid} cannot do this in state {state:?}")]
    InvalidState { pid: TaskId, state: TaskState },
    /// The logger has already been installed.
    #[error("logger already initialized")]
    LoggerInitFailed,
}

/// Logs an unrecoverable kernel error and panics.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)+) => {{
        ::log::error!($($arg)+);
        panic!($($arg)+)
    }};
}

/// Checks a scheduler invariant, escalating to [`fatal!`] on failure.
#[macro_export]
macro_rules! kassert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            $crate::fatal!($($arg)+);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_capacity_error_message() {
        let err = TinyError::CapacityExceeded { max: 4 };
        assert_eq!(err.to_string(), "task capacity of 4 exceeded");
    }

    #[test]
    fn test_state_error_message() {
        let err = TinyError::InvalidState {
            pid: 3,
            state: TaskState::WaitSem,
        };
        assert_eq!(err.to_string(), "task 3 cannot do this in state WaitSem");
        assert_eq!(TinyError::InvalidPriority(0).to_string(), "invalid task priority 0");
    }

    #[test]
    fn test_sched_error_converts_to_anyhow() {
        let result: TinyResult<()> = Err(TinyError::NoSuchTask(7).into());
        let err = result.unwrap_err();
        assert_eq!(err.downcast_ref::<TinyError>(), Some(&TinyError::NoSuchTask(7)));
    }

    #[test]
    #[should_panic(expected = "corrupted list 3")]
    fn test_kassert_panics() {
        kassert!(1 + 1 == 3, "corrupted list {}", 3);
    }
}

//! Kernel configuration constants.
//!
//! The `TINYENV_*` values can be overridden from the build environment.

use const_env::env_item;

/// Number of processors brought up by the multiprocessor bootstrap.
#[env_item]
pub const TINYENV_SMP: usize = 1;

/// Maximum number of live tasks, idle tasks included.
#[env_item]
pub const TINYENV_MAX_TASKS: usize = 32;

pub const IDLE_STACK_SIZE: usize = 0x4000; // 16K
pub const INIT_STACK_SIZE: usize = 0x10000; // 64K
pub const INIT_PRIORITY: u8 = 100;

/// Largest processor count an affinity mask can describe.
pub const MAX_CPUS: usize = 32;

//! Task management.
//!
//! This module provides:
//! - Task control blocks and their state machine
//! - The arena and index-linked lists that hold them
//! - The identifier registry
//! - The scheduler core that moves tasks between state lists
//! - Deferred frees drained by the idle loop

mod assign;
mod gc;
mod group;
mod list;
mod manager;
mod pidhash;
#[allow(clippy::module_inception)]
mod task;
mod tasklist;


pub use assign::select_cpu;
pub use gc::{DelayedFreeQueue, HeapBlock, KernelHeap};
pub use group::{ChildStatus, FileKind, FileTable, GroupFlags, TaskGroup};
pub use list::{ListLink, TaskArena, TaskIdx, TaskList};
pub use manager::Scheduler;
pub use pidhash::PidHash;
pub use task::{
    CpuMask, NUM_TASK_STATES, PID_MAX, PRIORITY_IDLE, PRIORITY_MAX, PRIORITY_MIN, StackRegion,
    TaskControlBlock, TaskFlags, TaskId, TaskMain, TaskSpec, TaskState,
};
pub use tasklist::{ListId, TaskListTable, Topology};

//! RstinyOS scheduler core.
//!
//! Task control blocks, the state lists the dispatcher picks from, the
//! identifier registry, and the uniprocessor and multiprocessor bootstrap that
//! brings all of it up before anything else in the kernel exists.

#![cfg_attr(not(test), no_std)]

#[macro_use]
extern crate log;

extern crate alloc;

#[macro_use]
mod error;

#[macro_use]
pub mod console;

pub mod boot;
pub mod config;
pub mod hal;
pub mod task;

#[cfg(all(target_os = "none", not(test)))]
mod lang_items;

#[cfg(test)]
mod testing;

pub use boot::{Bootstrap, DefaultBootstrap, os_start};
pub use config::SchedConfig;
pub use error::{TinyError, TinyResult};
pub use task::{Scheduler, TaskId, TaskSpec, TaskState};

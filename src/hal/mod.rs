//! HAL (Hardware Abstraction Layer) module.
//!
//! Only the pieces the scheduler core needs: interrupt masking, the idle
//! wait instruction, the stack pointer, and an IRQ-safe spinlock.

pub mod cpu;
pub mod spin;

pub use spin::{Mutex, MutexGuard, SpinNoIrq};

//! Per-CPU idle loop.

use crate::task::DelayedFreeQueue;

use super::platform::Platform;

/// What an idle unit does once the bootstrap is over.
///
/// It never blocks: deferred frees are collected only if the allocator can
/// be taken right away, then the CPU waits in the platform's low-power hook.
///
/// There is no background worker in this kernel, so every idle unit does the
/// collection itself. A kernel that adds such a worker should hand the
/// [`DelayedFreeQueue`] to it and leave the idle loop with the hook only.
pub struct IdleLoop<'a> {
    cpu: usize,
    platform: &'a dyn Platform,
    delayed_free: &'a DelayedFreeQueue,
}

impl<'a> IdleLoop<'a> {
    pub fn new(cpu: usize, platform: &'a dyn Platform, delayed_free: &'a DelayedFreeQueue) -> Self {
        Self {
            cpu,
            platform,
            delayed_free,
        }
    }

    /// One pass: garbage collection, then the idle hook. Returns the number of
    /// blocks freed.
    pub fn step(&self) -> usize {
        let freed = match self.platform.kernel_heap() {
            Some(heap) => self.delayed_free.collect(heap),
            None => 0,
        };
        self.platform.idle();
        freed
    }

    pub fn run(&self) -> ! {
        info!("cpu {}: beginning idle loop", self.cpu);
        loop {
            self.step();
        }
    }
}

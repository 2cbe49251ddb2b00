//! Boot module - bootstrap of the scheduler core.
//!
//! This module contains everything between the first instruction the kernel
//! runs on CPU 0 and the idle loop:
//! - The platform hooks the bootstrap consumes
//! - The ordered facility initialization steps
//! - The uniprocessor and multiprocessor bootstrap procedures
//! - System bring-up and the per-CPU idle loop
//!
//! The procedure is chosen at build time: the `smp` feature selects
//! [`SmpBootstrap`] as [`DefaultBootstrap`].

mod bringup;
mod facility;
mod idle;
mod platform;
mod smp;
mod up;

#[cfg(test)]
mod tests;

pub use bringup::{AppInitBringup, Bringup};
pub use facility::{
    Facilities, Facility, InitContext, InitStep, SMP_INIT_SEQUENCE, SMP_MEMORY_STEPS,
    UP_INIT_SEQUENCE,
};
pub use idle::IdleLoop;
pub use platform::Platform;
pub use smp::SmpBootstrap;
pub use up::{IDLE_NAME, UpBootstrap};

use lazyinit::LazyInit;

use crate::TinyResult;
use crate::config::SchedConfig;
use crate::hal::{Mutex, MutexGuard};
use crate::task::{DelayedFreeQueue, Scheduler};

/// Bootstrap progress.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum InitState {
    /// Nothing is initialized.
    Boot,
    /// The idle units are installed.
    TaskLists,
    /// Heaps are usable.
    Memory,
    /// Hardware is initialized.
    Hardware,
    /// Everything is up; the bring-up is starting the first tasks.
    OsReady,
    /// The boot CPU is about to enter its idle loop.
    IdleLoop,
}

/// A bring-up protocol.
pub trait Bootstrap {
    fn new(config: SchedConfig) -> Self
    where
        Self: Sized;

    fn init_state(&self) -> InitState;

    /// Runs the protocol and returns the scheduler, ready for the idle loop.
    fn start(
        &mut self,
        platform: &dyn Platform,
        facilities: &mut Facilities,
        bringup: &mut dyn Bringup,
    ) -> TinyResult<Scheduler>;

    /// Like [`start`](Self::start), but any failure halts the system.
    fn boot(
        &mut self,
        platform: &dyn Platform,
        facilities: &mut Facilities,
        bringup: &mut dyn Bringup,
    ) -> Scheduler {
        match self.start(platform, facilities, bringup) {
            Ok(sched) => sched,
            Err(err) => crate::fatal!("boot failed in {:?}: {:#}", self.init_state(), err),
        }
    }
}

#[cfg(feature = "smp")]
pub type DefaultBootstrap = SmpBootstrap;
#[cfg(not(feature = "smp"))]
pub type DefaultBootstrap = UpBootstrap;

/// Process-wide kernel state.
pub struct Kernel {
    sched: Mutex<Scheduler>,
    delayed_free: DelayedFreeQueue,
}

impl Kernel {
    pub fn new(sched: Scheduler) -> Self {
        Self {
            sched: Mutex::new(sched),
            delayed_free: DelayedFreeQueue::new(),
        }
    }

    /// Locks the scheduler. Interrupts stay masked while the guard lives.
    pub fn sched(&self) -> MutexGuard<'_, Scheduler> {
        self.sched.lock()
    }

    pub fn try_sched(&self) -> Option<MutexGuard<'_, Scheduler>> {
        self.sched.try_lock()
    }

    pub fn delayed_free(&self) -> &DelayedFreeQueue {
        &self.delayed_free
    }
}

static KERNEL: LazyInit<Kernel> = LazyInit::new();

/// Publishes the booted scheduler. May only happen once.
pub fn install(sched: Scheduler) -> &'static Kernel {
    KERNEL.init_once(Kernel::new(sched))
}

/// The installed kernel.
pub fn kernel() -> &'static Kernel {
    if !KERNEL.is_inited() {
        crate::fatal!("kernel used before os_start");
    }
    &KERNEL
}

/// Boots CPU 0 with bootstrap `B` and runs its idle loop.
pub fn os_start<B: Bootstrap>(
    config: SchedConfig,
    platform: &'static dyn Platform,
    mut facilities: Facilities,
    bringup: &mut dyn Bringup,
) -> ! {
    info!("os_start: {} cpu(s), {} tasks", config.ncpus, config.max_tasks);
    let mut bootstrap = B::new(config);
    let sched = bootstrap.boot(platform, &mut facilities, bringup);
    let kernel = install(sched);
    IdleLoop::new(0, platform, &kernel.delayed_free).run()
}

/// Entry of a secondary CPU released by [`Platform::smp_start`].
pub fn os_idle_secondary(cpu: usize, platform: &'static dyn Platform) -> ! {
    IdleLoop::new(cpu, platform, &kernel().delayed_free).run()
}

//! Ordered initialization of the facilities the kernel depends on.
//!
//! Each subsystem the bootstrap sequences (semaphores, heaps, interrupts,
//! timers, ...) is an [`InitStep`]. The kernel registers a [`Facility`] per
//! step it actually has; steps without one are skipped. The two bootstrap
//! procedures walk their own step order, see [`UP_INIT_SEQUENCE`] and
//! [`SMP_INIT_SEQUENCE`].

use alloc::boxed::Box;
use alloc::collections::BTreeMap;

use anyhow::Context;
use memory_addr::VirtAddrRange;

use crate::TinyResult;
use crate::task::Scheduler;

use super::InitState;
use super::platform::Platform;

/// A facility initialization step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InitStep {
    Semaphore,
    UserHeap,
    KernelHeap,
    PageHeap,
    ExtraHeaps,
    IoBuffers,
    /// Task-level data such as child status pools.
    TaskData,
    Irq,
    Watchdog,
    Filesystem,
    Clock,
    PosixTimer,
    Signal,
    MessageQueue,
    Pthread,
    /// Static network configuration, no hardware involved.
    NetSetup,
    NetInitialize,
    /// Processor-specific hardware bring-up.
    Hardware,
    BoardEarly,
    AutoMount,
    SharedMemory,
    Libc,
    Binfmt,
}

/// Step order of the uniprocessor bootstrap.
pub const UP_INIT_SEQUENCE: [InitStep; 18] = [
    InitStep::Semaphore,
    InitStep::KernelHeap,
    InitStep::PageHeap,
    InitStep::TaskData,
    InitStep::Irq,
    InitStep::Watchdog,
    InitStep::Filesystem,
    InitStep::Clock,
    InitStep::PosixTimer,
    InitStep::Signal,
    InitStep::MessageQueue,
    InitStep::Pthread,
    InitStep::NetSetup,
    InitStep::Hardware,
    InitStep::AutoMount,
    InitStep::SharedMemory,
    InitStep::Libc,
    InitStep::Binfmt,
];

/// Step order of the multiprocessor bootstrap.
///
/// The first [`SMP_MEMORY_STEPS`] run before the idle units get their groups;
/// everything after `TaskData` runs under the scheduler lock.
pub const SMP_INIT_SEQUENCE: [InitStep; 17] = [
    InitStep::Semaphore,
    InitStep::UserHeap,
    InitStep::KernelHeap,
    InitStep::PageHeap,
    InitStep::ExtraHeaps,
    InitStep::IoBuffers,
    InitStep::TaskData,
    InitStep::Filesystem,
    InitStep::Irq,
    InitStep::Clock,
    InitStep::PosixTimer,
    InitStep::Signal,
    InitStep::MessageQueue,
    InitStep::NetInitialize,
    InitStep::Binfmt,
    InitStep::Hardware,
    InitStep::BoardEarly,
];

pub const SMP_MEMORY_STEPS: usize = 6;

/// What a facility sees while it initializes.
pub struct InitContext<'a> {
    pub step: InitStep,
    pub state: InitState,
    /// Memory region produced by the platform for heap steps.
    pub heap_region: Option<VirtAddrRange>,
    pub sched: &'a mut Scheduler,
}

/// A subsystem initialized during the bootstrap.
pub trait Facility {
    fn init(&mut self, ctx: &mut InitContext<'_>) -> TinyResult<()> {
        let _ = ctx;
        Ok(())
    }
}

impl<F> Facility for F
where
    F: FnMut(&mut InitContext<'_>) -> TinyResult<()>,
{
    fn init(&mut self, ctx: &mut InitContext<'_>) -> TinyResult<()> {
        self(ctx)
    }
}

/// Facilities registered per step.
#[derive(Default)]
pub struct Facilities {
    steps: BTreeMap<InitStep, Box<dyn Facility>>,
}

impl Facilities {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the facility for `step`, replacing any earlier one.
    pub fn register(&mut self, step: InitStep, facility: impl Facility + 'static) -> &mut Self {
        self.steps.insert(step, Box::new(facility));
        self
    }

    pub fn with(mut self, step: InitStep, facility: impl Facility + 'static) -> Self {
        self.register(step, facility);
        self
    }

    pub fn contains(&self, step: InitStep) -> bool {
        self.steps.contains_key(&step)
    }

    /// Runs one step: the platform part first, then the registered facility.
    pub(super) fn run_step(
        &mut self,
        step: InitStep,
        platform: &dyn Platform,
        sched: &mut Scheduler,
        state: InitState,
    ) -> TinyResult<()> {
        let heap_region = match step {
            InitStep::KernelHeap => {
                Some(platform.allocate_kheap().context("allocating the kernel heap")?)
            }
            InitStep::UserHeap => platform.allocate_uheap(),
            InitStep::PageHeap => platform.allocate_pgheap(),
            InitStep::Hardware => {
                platform.initialize().context("hardware initialization")?;
                None
            }
            InitStep::BoardEarly => {
                platform
                    .board_early_initialize()
                    .context("early board initialization")?;
                None
            }
            _ => None,
        };
        if let Some(region) = heap_region {
            anyhow::ensure!(region.size() > 0, "{:?}: empty heap region", step);
        }

        let Some(facility) = self.steps.get_mut(&step) else {
            debug!("init {:?}: nothing registered", step);
            return Ok(());
        };
        info!("init {:?}", step);
        let mut ctx = InitContext {
            step,
            state,
            heap_region,
            sched,
        };
        facility
            .init(&mut ctx)
            .with_context(|| alloc::format!("initializing {step:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequences_have_no_duplicates() {
        for seq in [&UP_INIT_SEQUENCE[..], &SMP_INIT_SEQUENCE[..]] {
            for (i, step) in seq.iter().enumerate() {
                assert!(!seq[i + 1..].contains(step), "{step:?} repeated");
            }
        }
        assert_eq!(SMP_INIT_SEQUENCE[SMP_MEMORY_STEPS], InitStep::TaskData);
    }

    #[test]
    fn test_variant_specific_steps() {
        let pos = |seq: &[InitStep], step| seq.iter().position(|s| *s == step).unwrap();
        assert!(
            pos(&UP_INIT_SEQUENCE, InitStep::NetSetup) < pos(&UP_INIT_SEQUENCE, InitStep::Hardware)
        );
        assert!(
            pos(&SMP_INIT_SEQUENCE, InitStep::NetInitialize)
                < pos(&SMP_INIT_SEQUENCE, InitStep::Hardware)
        );
        assert!(!SMP_INIT_SEQUENCE.contains(&InitStep::Watchdog));
        assert!(!UP_INIT_SEQUENCE.contains(&InitStep::BoardEarly));
    }

    fn noop(_: &mut InitContext<'_>) -> TinyResult<()> {
        Ok(())
    }

    #[test]
    fn test_register_replaces() {
        let mut facilities = Facilities::new();
        facilities.register(InitStep::Clock, noop);
        facilities.register(InitStep::Clock, noop);
        assert!(facilities.contains(InitStep::Clock));
        assert!(!facilities.contains(InitStep::Irq));
        assert_eq!(facilities.steps.len(), 1);
    }
}

//! Simulated platform and helpers for host tests.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use memory_addr::{VirtAddr, VirtAddrRange};

use crate::TinyResult;
use crate::boot::{Facilities, Facility, InitContext, InitStep, Platform};
use crate::config::SchedConfig;
use crate::hal::Mutex;
use crate::task::{HeapBlock, KernelHeap, Scheduler, StackRegion, TaskId, TaskSpec};

const STACK_AREA: usize = 0x4000_0000;
const STACK_STRIDE: usize = 0x10_0000;
const HEAP_BASE: usize = 0x8000_0000;

/// Platform events, in the order they happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformEvent {
    InitialState(TaskId),
    Initialize,
    BoardEarly,
    SmpStart,
    Idle,
}

/// Heap that refuses frees while `busy` is set.
#[derive(Default)]
pub struct SimHeap {
    pub busy: AtomicBool,
    pub freed: AtomicUsize,
}

impl KernelHeap for SimHeap {
    fn try_free(&self, block: HeapBlock) -> Result<(), HeapBlock> {
        if self.busy.load(Ordering::Relaxed) {
            return Err(block);
        }
        self.freed.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A platform that hands out fake address ranges and records every hook.
pub struct SimPlatform {
    pub idle_stack_size: usize,
    pub events: Mutex<Vec<PlatformEvent>>,
    pub heap: SimHeap,
    pub fail_kheap: bool,
    pub pgheap: bool,
}

impl SimPlatform {
    pub fn new(config: &SchedConfig) -> Self {
        Self {
            idle_stack_size: config.idle_stack_size,
            events: Mutex::new(Vec::new()),
            heap: SimHeap::default(),
            fail_kheap: false,
            pgheap: true,
        }
    }

    pub fn events(&self) -> Vec<PlatformEvent> {
        self.events.lock().clone()
    }

    fn record(&self, event: PlatformEvent) {
        self.events.lock().push(event);
    }

    fn stack_base(cpu: usize) -> VirtAddr {
        VirtAddr::from(STACK_AREA + cpu * STACK_STRIDE)
    }
}

impl Platform for SimPlatform {
    fn current_sp(&self) -> VirtAddr {
        Self::stack_base(0) + self.idle_stack_size / 2
    }

    fn idle_stack(&self, cpu: usize) -> StackRegion {
        StackRegion::new(Self::stack_base(cpu), self.idle_stack_size)
    }

    fn cpu_idlestack(&self, cpu: usize, size: usize) -> TinyResult<StackRegion> {
        Ok(StackRegion::new(Self::stack_base(cpu), size))
    }

    fn initial_state(&self, tcb: &mut crate::task::TaskControlBlock) {
        self.record(PlatformEvent::InitialState(tcb.pid()));
    }

    fn allocate_kheap(&self) -> TinyResult<VirtAddrRange> {
        anyhow::ensure!(!self.fail_kheap, "no memory for the kernel heap");
        Ok(VirtAddrRange::from_start_size(
            VirtAddr::from(HEAP_BASE),
            0x10_0000,
        ))
    }

    fn allocate_pgheap(&self) -> Option<VirtAddrRange> {
        self.pgheap.then(|| {
            VirtAddrRange::from_start_size(VirtAddr::from(HEAP_BASE + 0x10_0000), 0x10_0000)
        })
    }

    fn initialize(&self) -> TinyResult<()> {
        self.record(PlatformEvent::Initialize);
        Ok(())
    }

    fn board_early_initialize(&self) -> TinyResult<()> {
        self.record(PlatformEvent::BoardEarly);
        Ok(())
    }

    fn smp_start(&self) -> TinyResult<()> {
        self.record(PlatformEvent::SmpStart);
        Ok(())
    }

    fn kernel_heap(&self) -> Option<&dyn KernelHeap> {
        Some(&self.heap)
    }

    fn idle(&self) {
        self.record(PlatformEvent::Idle);
    }
}

/// What a recording facility saw when it ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub step: InitStep,
    pub live_tasks: usize,
    pub running: Option<TaskId>,
    pub locked: bool,
    pub has_heap_region: bool,
}

pub type StepLog = Arc<Mutex<Vec<StepRecord>>>;

/// Facility that logs the scheduler state it was called with.
pub struct RecordingFacility {
    log: StepLog,
}

impl Facility for RecordingFacility {
    fn init(&mut self, ctx: &mut InitContext<'_>) -> TinyResult<()> {
        ctx.sched.verify();
        self.log.lock().push(StepRecord {
            step: ctx.step,
            live_tasks: ctx.sched.live_count(),
            running: ctx.sched.current_pid(0),
            locked: ctx.sched.is_locked(),
            has_heap_region: ctx.heap_region.is_some(),
        });
        Ok(())
    }
}

/// Facilities recording every step in `steps` into one shared log.
pub fn recording_facilities(steps: &[InitStep]) -> (Facilities, StepLog) {
    let log: StepLog = Arc::new(Mutex::new(Vec::new()));
    let mut facilities = Facilities::new();
    for &step in steps {
        facilities.register(step, RecordingFacility { log: log.clone() });
    }
    (facilities, log)
}

/// Fake stack for idle units installed by hand.
pub fn idle_stack(cpu: usize) -> Option<StackRegion> {
    Some(StackRegion::new(SimPlatform::stack_base(cpu), 0x4000))
}

/// Uniprocessor scheduler with its idle unit installed.
pub fn up_scheduler(max_tasks: usize) -> Scheduler {
    let mut sched = Scheduler::uniprocessor(SchedConfig::uniprocessor(max_tasks));
    sched.install_idle(0, "idle", idle_stack(0));
    sched
}

/// Multiprocessor scheduler with every idle unit installed.
pub fn smp_scheduler(ncpus: usize, max_tasks: usize) -> Scheduler {
    let mut sched = Scheduler::multiprocessor(SchedConfig::multiprocessor(ncpus, max_tasks));
    for cpu in 0..ncpus {
        sched.install_idle(cpu, "idle", idle_stack(cpu));
    }
    sched.set_lastpid(ncpus - 1);
    sched
}

/// Creates and activates a small task.
pub fn spawn(sched: &mut Scheduler, name: &str, priority: u8) -> TaskId {
    let pid = sched
        .create_task(TaskSpec::new(name, priority, 0x100))
        .unwrap();
    sched.activate(pid).unwrap();
    pid
}

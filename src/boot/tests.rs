//! Bootstrap tests.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use memory_addr::VirtAddr;

use crate::TinyResult;
use crate::config::SchedConfig;
use crate::task::{DelayedFreeQueue, GroupFlags, HeapBlock, Scheduler, TaskState};
use crate::testing::{PlatformEvent, SimPlatform, recording_facilities};

use super::*;

fn app_main(_argv: &[String]) -> i32 {
    0
}

fn no_bringup(_sched: &mut Scheduler) -> TinyResult<()> {
    Ok(())
}

fn failing_irq(_ctx: &mut InitContext<'_>) -> TinyResult<()> {
    anyhow::bail!("irq controller missing")
}

/// Records what the bring-up saw, then starts appinit.
struct ProbeBringup {
    inner: AppInitBringup,
    locked: Option<bool>,
    live_tasks: usize,
}

impl ProbeBringup {
    fn new() -> Self {
        Self {
            inner: AppInitBringup::new(app_main),
            locked: None,
            live_tasks: 0,
        }
    }
}

impl Bringup for ProbeBringup {
    fn bringup(&mut self, sched: &mut Scheduler) -> TinyResult<()> {
        self.locked = Some(sched.is_locked());
        self.live_tasks = sched.live_count();
        self.inner.bringup(sched)
    }
}

#[test]
fn test_up_boot_installs_idle_before_facilities() {
    let config = SchedConfig::uniprocessor(4);
    let platform = SimPlatform::new(&config);
    let (mut facilities, log) = recording_facilities(&UP_INIT_SEQUENCE);
    let mut bringup = no_bringup;

    let mut boot = UpBootstrap::new(config);
    assert_eq!(boot.init_state(), InitState::Boot);
    let sched = boot.start(&platform, &mut facilities, &mut bringup).unwrap();

    let log = log.lock();
    let steps: Vec<_> = log.iter().map(|record| record.step).collect();
    assert_eq!(steps, UP_INIT_SEQUENCE);
    let first = &log[0];
    assert_eq!(first.step, InitStep::Semaphore);
    assert_eq!(first.live_tasks, 1);
    assert_eq!(first.running, Some(0));
    assert!(log.iter().all(|record| record.live_tasks == 1 && !record.locked));
    for record in log.iter() {
        let heap_step = matches!(record.step, InitStep::KernelHeap | InitStep::PageHeap);
        assert_eq!(record.has_heap_region, heap_step, "{:?}", record.step);
    }

    assert_eq!(boot.init_state(), InitState::IdleLoop);
    assert_eq!(sched.live_count(), 1);
    let idle = sched.task(0).unwrap();
    assert_eq!(idle.name(), IDLE_NAME);
    assert_eq!(idle.state(), TaskState::Running);
    let group = idle.group().unwrap();
    assert_eq!(group.files().open_count(), 3);
    assert_eq!(group.flags(), GroupFlags::NOCLDWAIT);
    assert_eq!(
        platform.events(),
        [PlatformEvent::InitialState(0), PlatformEvent::Initialize]
    );
    sched.verify();
}

#[test]
fn test_up_boot_starts_appinit() {
    let config = SchedConfig::uniprocessor(4);
    let platform = SimPlatform::new(&config);
    let mut facilities = Facilities::new();
    let mut bringup = ProbeBringup::new();

    let sched = UpBootstrap::new(config).boot(&platform, &mut facilities, &mut bringup);
    assert_eq!(bringup.locked, Some(false));
    assert_eq!(bringup.live_tasks, 1);

    let pid = bringup.inner.pid().unwrap();
    assert_eq!(pid, 1);
    assert_eq!(sched.current_pid(0), Some(pid));
    let appinit = sched.task(pid).unwrap();
    assert_eq!(appinit.name(), AppInitBringup::NAME);
    assert_eq!(appinit.priority(), config.init_priority);
    assert_eq!(appinit.stack().unwrap().size(), config.init_stack_size);
    assert_eq!(appinit.group().unwrap().files().open_count(), 3);
    assert_eq!(sched.task(0).unwrap().state(), TaskState::ReadyToRun);
    sched.verify();
}

#[test]
fn test_failing_facility_stops_the_boot() {
    let config = SchedConfig::uniprocessor(4);
    let platform = SimPlatform::new(&config);
    let mut facilities = Facilities::new().with(InitStep::Irq, failing_irq);
    let mut bringup = no_bringup;

    let mut boot = UpBootstrap::new(config);
    let err = boot
        .start(&platform, &mut facilities, &mut bringup)
        .err()
        .unwrap();
    let message = format!("{err:#}");
    assert!(message.contains("initializing Irq"), "{message}");
    assert!(message.contains("irq controller missing"), "{message}");
    assert_eq!(boot.init_state(), InitState::Memory);
    // Hardware bring-up never ran.
    assert_eq!(platform.events(), [PlatformEvent::InitialState(0)]);
}

#[test]
#[should_panic(expected = "boot failed")]
fn test_failing_facility_is_fatal() {
    let config = SchedConfig::uniprocessor(4);
    let platform = SimPlatform::new(&config);
    let mut facilities = Facilities::new().with(InitStep::Irq, failing_irq);
    let mut bringup = no_bringup;
    UpBootstrap::new(config).boot(&platform, &mut facilities, &mut bringup);
}

#[test]
fn test_kernel_heap_failure() {
    let config = SchedConfig::uniprocessor(4);
    let mut platform = SimPlatform::new(&config);
    platform.fail_kheap = true;
    let mut bringup = no_bringup;

    let mut boot = UpBootstrap::new(config);
    let err = boot
        .start(&platform, &mut Facilities::new(), &mut bringup)
        .err()
        .unwrap();
    assert!(format!("{err:#}").contains("kernel heap"));
    assert_eq!(boot.init_state(), InitState::TaskLists);
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = SchedConfig::multiprocessor(4, 2);
    let platform = SimPlatform::new(&config);
    let mut bringup = no_bringup;
    let result = SmpBootstrap::new(config).start(&platform, &mut Facilities::new(), &mut bringup);
    assert!(result.is_err());
}

#[test]
fn test_smp_boot_sequence() {
    let config = SchedConfig::multiprocessor(2, 8);
    let platform = SimPlatform::new(&config);
    let (mut facilities, log) = recording_facilities(&SMP_INIT_SEQUENCE);
    let mut bringup = ProbeBringup::new();

    let mut boot = SmpBootstrap::new(config);
    let sched = boot.start(&platform, &mut facilities, &mut bringup).unwrap();

    let log = log.lock();
    let steps: Vec<_> = log.iter().map(|record| record.step).collect();
    assert_eq!(steps, SMP_INIT_SEQUENCE);
    for (i, record) in log.iter().enumerate() {
        assert_eq!(record.live_tasks, 2);
        assert_eq!(record.running, Some(0));
        assert_eq!(record.locked, i > SMP_MEMORY_STEPS, "{:?}", record.step);
    }

    // The bring-up ran under the lock, so appinit waited for the unlock.
    assert_eq!(bringup.locked, Some(true));
    assert_eq!(bringup.live_tasks, 2);
    let pid = bringup.inner.pid().unwrap();
    assert_eq!(pid, 2);
    assert!(!sched.is_locked());
    assert_eq!(sched.current_pid(0), Some(pid));
    assert_eq!(sched.current_pid(1), Some(1));
    assert_eq!(boot.init_state(), InitState::IdleLoop);

    for cpu in 0..2 {
        let idle = sched.task(cpu).unwrap();
        assert_eq!(idle.name(), format!("CPU{cpu} IDLE"));
        assert!(idle.stack().is_some());
        let group = idle.group().unwrap();
        assert_eq!(group.flags(), GroupFlags::NOCLDWAIT | GroupFlags::PRIVILEGED);
        assert_eq!(group.files().open_count(), 3);
    }

    assert_eq!(
        platform.events(),
        [
            PlatformEvent::InitialState(0),
            PlatformEvent::InitialState(1),
            PlatformEvent::Initialize,
            PlatformEvent::BoardEarly,
            PlatformEvent::SmpStart,
        ]
    );
    sched.verify();
}

#[test]
fn test_idle_loop_collects_deferred_frees() {
    let config = SchedConfig::uniprocessor(4);
    let platform = SimPlatform::new(&config);
    let queue = DelayedFreeQueue::new();
    queue.defer(HeapBlock::new(VirtAddr::from(0x1000usize), 64));
    queue.defer(HeapBlock::new(VirtAddr::from(0x2000usize), 64));

    let idle = IdleLoop::new(0, &platform, &queue);
    platform
        .heap
        .busy
        .store(true, core::sync::atomic::Ordering::Relaxed);
    assert_eq!(idle.step(), 0);
    assert_eq!(queue.len(), 2);

    platform
        .heap
        .busy
        .store(false, core::sync::atomic::Ordering::Relaxed);
    assert_eq!(idle.step(), 2);
    assert!(queue.is_empty());
    assert_eq!(
        platform.events(),
        [PlatformEvent::Idle, PlatformEvent::Idle]
    );
}

#[test]
fn test_kernel_global() {
    let config = SchedConfig::uniprocessor(4);
    let platform = SimPlatform::new(&config);
    let mut bringup = no_bringup;
    let sched = DefaultBootstrap::new(config).boot(&platform, &mut Facilities::new(), &mut bringup);

    let kernel = install(sched);
    assert_eq!(kernel.sched().live_count(), 1);
    assert!(core::ptr::eq(kernel, super::kernel()));
    let guard = kernel.sched();
    assert!(kernel.try_sched().is_none());
    drop(guard);
    assert!(kernel.delayed_free().is_empty());
}

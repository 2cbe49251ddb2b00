//! Multiprocessor bootstrap.

use alloc::format;
use alloc::string::String;

use anyhow::Context;

use crate::TinyResult;
use crate::config::SchedConfig;
use crate::task::{GroupFlags, Scheduler, StackRegion, TaskGroup, TaskIdx};

use super::bringup::Bringup;
use super::facility::{Facilities, InitStep, SMP_INIT_SEQUENCE, SMP_MEMORY_STEPS};
use super::platform::Platform;
use super::{Bootstrap, InitState};

/// Boots every processor from CPU 0.
///
/// One idle unit per CPU is locked to its CPU and sits at the head of that
/// CPU's run list. The facilities are initialized once, and everything from
/// the task data step to the end of the bring-up runs under the scheduler
/// lock; the other CPUs are released only after that.
pub struct SmpBootstrap {
    config: SchedConfig,
    state: InitState,
}

impl SmpBootstrap {
    fn advance(&mut self, state: InitState) {
        debug!("init state {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    fn idle_name(cpu: usize) -> String {
        format!("CPU{cpu} IDLE")
    }

    fn run_steps(
        &self,
        steps: &[InitStep],
        platform: &dyn Platform,
        facilities: &mut Facilities,
        sched: &mut Scheduler,
    ) -> TinyResult<()> {
        for &step in steps {
            facilities.run_step(step, platform, sched, self.state)?;
        }
        Ok(())
    }
}

impl Bootstrap for SmpBootstrap {
    fn new(config: SchedConfig) -> Self {
        Self {
            config,
            state: InitState::Boot,
        }
    }

    fn init_state(&self) -> InitState {
        self.state
    }

    fn start(
        &mut self,
        platform: &dyn Platform,
        facilities: &mut Facilities,
        bringup: &mut dyn Bringup,
    ) -> TinyResult<Scheduler> {
        self.config.validate()?;
        let ncpus = self.config.ncpus;
        let mut sched = Scheduler::multiprocessor(self.config);

        let boot_stack = platform.idle_stack(0);
        let sp = platform.current_sp();
        crate::kassert!(
            boot_stack.contains_sp(sp),
            "boot stack pointer {:?} outside the idle stack {:?}",
            sp,
            boot_stack.range()
        );
        for cpu in 0..ncpus {
            let stack = (cpu == 0)
                .then(|| StackRegion::with_sp(boot_stack.base(), boot_stack.size(), sp));
            sched.install_idle(cpu, &Self::idle_name(cpu), stack);
        }
        self.advance(InitState::TaskLists);

        let (memory_steps, rest) = SMP_INIT_SEQUENCE.split_at(SMP_MEMORY_STEPS);
        self.run_steps(memory_steps, platform, facilities, &mut sched)?;

        for cpu in 0..ncpus {
            let idle = idle_of(&sched, cpu);
            if cpu > 0 {
                let stack = platform
                    .cpu_idlestack(cpu, self.config.idle_stack_size)
                    .with_context(|| format!("idle stack of cpu {cpu}"))?;
                sched.tcb_mut(idle).set_stack(stack);
            }
            platform.initial_state(sched.tcb_mut(idle));
            let mut group = TaskGroup::allocate();
            group.initialize(GroupFlags::NOCLDWAIT | GroupFlags::PRIVILEGED);
            sched.tcb_mut(idle).set_group(group);
        }
        sched.set_lastpid(ncpus - 1);
        self.advance(InitState::Memory);

        let (task_data, locked_steps) = rest.split_at(1);
        self.run_steps(task_data, platform, facilities, &mut sched)?;

        sched.lock();
        self.run_steps(locked_steps, platform, facilities, &mut sched)?;
        self.advance(InitState::Hardware);

        // Standard I/O: created for CPU 0, cloned for the others.
        let boot_group = sched
            .tcb_mut(idle_of(&sched, 0))
            .group_mut()
            .map(|group| {
                group.setup_idle_files();
                group.clone()
            });
        for cpu in 1..ncpus {
            let idle = idle_of(&sched, cpu);
            if let (Some(boot_group), Some(group)) = (&boot_group, sched.tcb_mut(idle).group_mut())
            {
                group.setup_task_files(boot_group);
            }
        }

        crate::kassert!(
            platform.this_cpu() == 0,
            "bootstrap running on cpu {}",
            platform.this_cpu()
        );
        platform
            .smp_start()
            .context("starting the secondary cpus")?;

        self.advance(InitState::OsReady);
        bringup.bringup(&mut sched).context("system bring-up")?;
        self.advance(InitState::IdleLoop);
        sched.unlock();
        Ok(sched)
    }
}

fn idle_of(sched: &Scheduler, cpu: usize) -> TaskIdx {
    match sched.lookup(cpu) {
        Some(idle) => idle,
        None => crate::fatal!("idle unit of cpu {} is not registered", cpu),
    }
}

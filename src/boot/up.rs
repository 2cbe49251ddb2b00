//! Uniprocessor bootstrap.

use anyhow::Context;

use crate::TinyResult;
use crate::config::SchedConfig;
use crate::task::{GroupFlags, Scheduler, StackRegion, TaskGroup};

use super::bringup::Bringup;
use super::facility::{Facilities, InitStep, UP_INIT_SEQUENCE};
use super::platform::Platform;
use super::{Bootstrap, InitState};

/// Name of the single idle unit.
pub const IDLE_NAME: &str = "Idle Task";

/// Boots a single processor.
///
/// The idle unit is installed first, then every facility in
/// [`UP_INIT_SEQUENCE`] runs in order; the idle group and its standard I/O
/// come only after all of them succeeded.
pub struct UpBootstrap {
    config: SchedConfig,
    state: InitState,
}

impl UpBootstrap {
    fn advance(&mut self, state: InitState) {
        debug!("init state {:?} -> {:?}", self.state, state);
        self.state = state;
    }
}

impl Bootstrap for UpBootstrap {
    fn new(config: SchedConfig) -> Self {
        Self {
            config: SchedConfig { ncpus: 1, ..config },
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
        let mut sched = Scheduler::uniprocessor(self.config);

        let stack = platform.idle_stack(0);
        let sp = platform.current_sp();
        crate::kassert!(
            stack.contains_sp(sp),
            "boot stack pointer {:?} outside the idle stack {:?}",
            sp,
            stack.range()
        );
        let stack = StackRegion::with_sp(stack.base(), stack.size(), sp);
        let idle = sched.install_idle(0, IDLE_NAME, Some(stack));
        platform.initial_state(sched.tcb_mut(idle));
        self.advance(InitState::TaskLists);

        for step in UP_INIT_SEQUENCE {
            facilities.run_step(step, platform, &mut sched, self.state)?;
            match step {
                InitStep::PageHeap => self.advance(InitState::Memory),
                InitStep::Hardware => self.advance(InitState::Hardware),
                _ => {}
            }
        }

        let mut group = TaskGroup::allocate();
        group.setup_idle_files();
        group.initialize(GroupFlags::NOCLDWAIT);
        sched.tcb_mut(idle).set_group(group);

        self.advance(InitState::OsReady);
        bringup.bringup(&mut sched).context("system bring-up")?;
        self.advance(InitState::IdleLoop);
        Ok(sched)
    }
}

//! System bring-up: the last bootstrap step, which starts the first tasks.

use alloc::string::String;
use alloc::vec::Vec;

use anyhow::Context;

use crate::TinyResult;
use crate::task::{Scheduler, TaskId, TaskMain, TaskSpec};

/// Creates the first user-visible tasks.
pub trait Bringup {
    fn bringup(&mut self, sched: &mut Scheduler) -> TinyResult<()>;
}

impl<F> Bringup for F
where
    F: FnMut(&mut Scheduler) -> TinyResult<()>,
{
    fn bringup(&mut self, sched: &mut Scheduler) -> TinyResult<()> {
        self(sched)
    }
}

/// Starts a single `appinit` task at the configured priority and stack size.
pub struct AppInitBringup {
    entry: TaskMain,
    argv: Vec<String>,
    pid: Option<TaskId>,
}

impl AppInitBringup {
    pub const NAME: &'static str = "appinit";

    pub fn new(entry: TaskMain) -> Self {
        Self {
            entry,
            argv: Vec::new(),
            pid: None,
        }
    }

    pub fn argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }

    /// Identifier of the started task.
    pub fn pid(&self) -> Option<TaskId> {
        self.pid
    }
}

impl Bringup for AppInitBringup {
    fn bringup(&mut self, sched: &mut Scheduler) -> TinyResult<()> {
        let config = *sched.config();
        let spec = TaskSpec::new(Self::NAME, config.init_priority, config.init_stack_size)
            .entry(self.entry)
            .argv(core::mem::take(&mut self.argv))
            .parent(0);
        let pid = sched.create_task(spec).context("creating appinit")?;
        sched.activate(pid).context("starting appinit")?;
        info!("appinit started as task {}", pid);
        self.pid = Some(pid);
        Ok(())
    }
}

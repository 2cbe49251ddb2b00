//! Scheduler core.
//!
//! [`Scheduler`] owns every control block and the lists they sit in. All state
//! changes go through [`Scheduler::move_state`], which detaches a task from its
//! list and re-inserts it according to the destination list's ordering rule.
//! The running unit of a CPU is, by construction, the head of that CPU's run
//! list; the insertion and removal paths keep the `Running` tag on that head.

use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use crate::config::SchedConfig;
use crate::error::TinyError;

use super::assign::select_cpu;
use super::group::{GroupFlags, TaskGroup};
use super::list::{TaskArena, TaskIdx};
use super::pidhash::PidHash;
use super::task::{
    CpuMask, PRIORITY_IDLE, PRIORITY_MIN, StackRegion, TaskControlBlock, TaskFlags, TaskId,
    TaskSpec, TaskState,
};
use super::tasklist::{ListId, TaskListTable, Topology};

/// Scheduler context: control blocks, state lists and identifier registry.
pub struct Scheduler {
    config: SchedConfig,
    arena: TaskArena,
    lists: TaskListTable,
    pids: PidHash,
    /// Preemption lock nesting depth.
    lockcount: usize,
}

impl Scheduler {
    /// Empty scheduler laid out for `topology`.
    pub fn new(config: SchedConfig, topology: Topology) -> Self {
        crate::kassert!(
            topology.ncpus() == config.ncpus,
            "topology has {} cpus, configuration {}",
            topology.ncpus(),
            config.ncpus
        );
        let pids = match topology {
            Topology::Uniprocessor => PidHash::for_uniprocessor(config.max_tasks),
            Topology::Multiprocessor { ncpus } => {
                PidHash::for_multiprocessor(ncpus, config.max_tasks)
            }
        };
        Self {
            config,
            arena: TaskArena::new(config.max_tasks),
            lists: TaskListTable::new(topology),
            pids,
            lockcount: 0,
        }
    }

    pub fn uniprocessor(config: SchedConfig) -> Self {
        Self::new(config, Topology::Uniprocessor)
    }

    pub fn multiprocessor(config: SchedConfig) -> Self {
        Self::new(
            config,
            Topology::Multiprocessor {
                ncpus: config.ncpus,
            },
        )
    }

    #[inline]
    pub fn config(&self) -> &SchedConfig {
        &self.config
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.lists.topology()
    }

    #[inline]
    pub fn ncpus(&self) -> usize {
        self.topology().ncpus()
    }

    /// Installs the idle unit of `cpu` as the running head of its run list.
    ///
    /// Idle units take the identifier of their CPU. Secondary CPUs get their
    /// stack later in the bootstrap, hence the `Option`.
    pub fn install_idle(
        &mut self,
        cpu: usize,
        name: &str,
        stack: Option<StackRegion>,
    ) -> TaskIdx {
        crate::kassert!(cpu < self.ncpus(), "idle unit for cpu {} out of range", cpu);
        let run_list = self.lists.run_list(cpu);
        crate::kassert!(
            self.lists.get(run_list).is_empty(),
            "idle unit installed on busy cpu {}",
            cpu
        );

        let (flags, affinity) = if self.topology().is_smp() {
            (
                TaskFlags::KERNEL | TaskFlags::NONCANCELABLE | TaskFlags::CPU_LOCKED,
                CpuMask::single(cpu),
            )
        } else {
            (TaskFlags::KERNEL | TaskFlags::NONCANCELABLE, CpuMask::all(1))
        };
        let mut tcb = TaskControlBlock::new(cpu, String::from(name), PRIORITY_IDLE, flags);
        tcb.set_affinity(affinity);
        tcb.set_cpu(cpu);
        if let Some(stack) = stack {
            tcb.set_stack(stack);
        }
        tcb.set_state(TaskState::Running);

        let idx = match self.arena.insert(tcb) {
            Ok(idx) => idx,
            Err(err) => crate::fatal!("no room for the idle unit of cpu {}: {}", cpu, err),
        };
        self.pids.reserve(cpu, idx);
        self.lists.get_mut(run_list).push_front(&mut self.arena, idx);
        info!("idle unit {} installed on cpu {}", name, cpu);
        idx
    }

    /// Sets the counter the next identifier allocation starts after.
    pub fn set_lastpid(&mut self, lastpid: TaskId) {
        self.pids.set_lastpid(lastpid);
    }

    /// Creates a task in the inactive state.
    ///
    /// Capacity and argument errors leave the scheduler untouched.
    pub fn create_task(&mut self, spec: TaskSpec) -> Result<TaskId, TinyError> {
        if spec.priority < PRIORITY_MIN {
            return Err(TinyError::InvalidPriority(spec.priority));
        }
        if self.pids.alive() >= self.config.max_tasks {
            return Err(TinyError::CapacityExceeded {
                max: self.config.max_tasks,
            });
        }

        let mut group = TaskGroup::allocate();
        if let Some(parent) = spec.parent {
            let parent = self.lookup(parent).ok_or(TinyError::NoSuchTask(parent))?;
            if let Some(parent_group) = self.arena.tcb(parent).group() {
                group.setup_task_files(parent_group);
            }
        }
        group.initialize(GroupFlags::empty());

        let all = CpuMask::all(self.ncpus());
        let mut tcb = TaskControlBlock::from_spec(spec);
        tcb.set_affinity(CpuMask::from_bits(tcb.affinity().bits() & all.bits()));
        tcb.set_group(group);

        let idx = self.arena.insert(tcb)?;
        let pid = match self.pids.allocate(idx) {
            Ok(pid) => pid,
            Err(err) => {
                self.arena.remove(idx);
                return Err(err);
            }
        };
        self.arena.tcb_mut(idx).set_pid(pid);
        self.insert(idx, TaskState::Inactive);

        let tcb = self.arena.tcb(idx);
        info!(
            "task {} ({}) created, priority {}",
            pid,
            tcb.name(),
            tcb.priority()
        );
        Ok(pid)
    }

    /// Makes an inactive task ready to run.
    ///
    /// Returns whether a running unit changed.
    pub fn activate(&mut self, pid: TaskId) -> Result<bool, TinyError> {
        let idx = self.lookup(pid).ok_or(TinyError::NoSuchTask(pid))?;
        let state = self.arena.tcb(idx).state();
        if state != TaskState::Inactive {
            return Err(TinyError::InvalidState { pid, state });
        }
        Ok(self.move_state(idx, TaskState::Inactive, TaskState::ReadyToRun))
    }

    /// Moves a task to the exited state and reports its status to the parent.
    ///
    /// Returns whether a running unit changed.
    pub fn exit(&mut self, pid: TaskId, status: i32) -> Result<bool, TinyError> {
        let idx = self.lookup(pid).ok_or(TinyError::NoSuchTask(pid))?;
        let tcb = self.arena.tcb(idx);
        if tcb.is_idle() {
            crate::fatal!("idle unit {} cannot exit", pid);
        }
        let state = tcb.state();
        if state == TaskState::Exited {
            return Err(TinyError::InvalidState { pid, state });
        }
        let parent = tcb.parent();

        let switched = self.move_state(idx, state, TaskState::Exited);
        if let Some(group) = parent
            .and_then(|ppid| self.lookup(ppid))
            .and_then(|pidx| self.arena.tcb_mut(pidx).group_mut())
        {
            group.record_exit(pid, status);
        }
        info!("task {} exited with status {}", pid, status);
        Ok(switched)
    }

    /// Destroys an exited or never-started task.
    pub fn release(&mut self, pid: TaskId) -> Result<(), TinyError> {
        let idx = self.lookup(pid).ok_or(TinyError::NoSuchTask(pid))?;
        let tcb = self.arena.tcb(idx);
        if tcb.is_idle() {
            crate::fatal!("idle unit {} cannot be released", pid);
        }
        let state = tcb.state();
        if !matches!(state, TaskState::Exited | TaskState::Inactive) {
            return Err(TinyError::InvalidState { pid, state });
        }

        self.remove(idx);
        self.pids.release(pid);
        let tcb = self.arena.remove(idx);
        debug!("task {} ({}) released", pid, tcb.name());
        Ok(())
    }

    /// Moves `idx` from `from` to `to`.
    ///
    /// Returns whether a running unit changed, i.e. whether the caller has to
    /// switch context.
    pub fn move_state(&mut self, idx: TaskIdx, from: TaskState, to: TaskState) -> bool {
        let tcb = self.arena.tcb(idx);
        crate::kassert!(
            tcb.state() == from,
            "task {} is {:?}, not {:?}",
            tcb.pid(),
            tcb.state(),
            from
        );
        let removed = self.remove(idx);
        let inserted = self.insert(idx, to);
        removed || inserted
    }

    /// Links a detached task into the list for `state`.
    ///
    /// Any of the ready states goes through the ready-to-run path, which
    /// decides between pending, pooled, assigned and running. Returns whether
    /// a running unit changed.
    pub fn insert(&mut self, idx: TaskIdx, state: TaskState) -> bool {
        crate::kassert!(
            !self.arena.tcb(idx).is_linked(),
            "task {} inserted while already linked",
            self.arena.tcb(idx).pid()
        );
        if state.is_ready() {
            return self.ready_to_run(idx);
        }

        let id = self.lists.list_id(state, self.arena.tcb(idx).cpu());
        self.arena.tcb_mut(idx).set_state(state);
        let list = self.lists.get_mut(id);
        if state.is_ordered() {
            list.insert_prioritized(&mut self.arena, idx);
        } else {
            list.push_back(&mut self.arena, idx);
        }
        trace!("task {} -> {:?}", self.arena.tcb(idx).pid(), state);
        false
    }

    /// Detaches a task from its list.
    ///
    /// When the task was running, the next unit of its CPU takes over and
    /// `true` is returned.
    pub fn remove(&mut self, idx: TaskIdx) -> bool {
        let tcb = self.arena.tcb(idx);
        let (state, cpu) = (tcb.state(), tcb.cpu());
        let id = self.lists.list_id(state, cpu);
        self.lists.get_mut(id).remove(&mut self.arena, idx);
        self.arena.tcb_mut(idx).set_state(TaskState::Invalid);
        trace!("task {} left {:?}", self.arena.tcb(idx).pid(), state);

        if state != TaskState::Running {
            return false;
        }
        if self.topology().is_smp() {
            self.refill(cpu);
        }
        match self.lists.get(id).head() {
            Some(head) => self.arena.tcb_mut(head).set_state(TaskState::Running),
            None => crate::fatal!("cpu {} has nothing left to run", cpu),
        }
        true
    }

    /// Ready-to-run path.
    fn ready_to_run(&mut self, idx: TaskIdx) -> bool {
        let tcb = self.arena.tcb(idx);
        let priority = tcb.priority();
        let target = if tcb.flags().contains(TaskFlags::CPU_LOCKED) || !self.topology().is_smp() {
            let cpu = if self.topology().is_smp() { tcb.cpu() } else { 0 };
            self.running_priority(cpu)
                .filter(|&running| running < priority)
                .map(|_| cpu)
        } else {
            self.assign_cpu(idx)
        };

        if target.is_some() && self.lockcount > 0 {
            self.arena.tcb_mut(idx).set_state(TaskState::Pending);
            self.lists
                .get_mut(ListId::State(TaskState::Pending))
                .insert_prioritized(&mut self.arena, idx);
            trace!("task {} held pending", self.arena.tcb(idx).pid());
            return false;
        }

        match self.topology() {
            Topology::Uniprocessor => self.link_run_list(idx, 0, TaskState::ReadyToRun),
            Topology::Multiprocessor { .. } => {
                let locked = self.arena.tcb(idx).flags().contains(TaskFlags::CPU_LOCKED);
                match target {
                    Some(cpu) => {
                        debug!("task {} assigned to cpu {}", self.arena.tcb(idx).pid(), cpu);
                        self.link_run_list(idx, cpu, TaskState::Assigned)
                    }
                    None if locked => {
                        let cpu = self.arena.tcb(idx).cpu();
                        self.link_run_list(idx, cpu, TaskState::Assigned)
                    }
                    None => {
                        self.arena.tcb_mut(idx).set_state(TaskState::ReadyToRun);
                        self.lists
                            .get_mut(ListId::State(TaskState::ReadyToRun))
                            .insert_prioritized(&mut self.arena, idx);
                        false
                    }
                }
            }
        }
    }

    /// Inserts into the run list of `cpu`, retagging the head if it changed.
    ///
    /// On SMP a displaced head stays on `cpu` only if it is locked there;
    /// otherwise it takes the ready-to-run path again and lands in the pool
    /// or on another CPU it outranks.
    fn link_run_list(&mut self, idx: TaskIdx, cpu: usize, queued: TaskState) -> bool {
        let id = self.lists.run_list(cpu);
        let old_head = self.lists.get(id).head();
        self.arena.tcb_mut(idx).set_cpu(cpu);
        let is_head = self.lists.get_mut(id).insert_prioritized(&mut self.arena, idx);
        if !is_head {
            self.arena.tcb_mut(idx).set_state(queued);
            return false;
        }
        self.arena.tcb_mut(idx).set_state(TaskState::Running);
        let Some(old) = old_head else {
            return true;
        };
        let old_locked = self.arena.tcb(old).flags().contains(TaskFlags::CPU_LOCKED);
        if !self.topology().is_smp() || old_locked {
            self.arena.tcb_mut(old).set_state(queued);
            return true;
        }
        self.lists.get_mut(id).remove(&mut self.arena, old);
        self.arena.tcb_mut(old).set_state(TaskState::Invalid);
        trace!("task {} displaced from cpu {}", self.arena.tcb(old).pid(), cpu);
        self.ready_to_run(old);
        true
    }

    /// Pulls the best pooled unit onto `cpu` if it outranks what would run
    /// there next.
    fn refill(&mut self, cpu: usize) {
        let pool = ListId::State(TaskState::ReadyToRun);
        let next = self
            .lists
            .get(self.lists.run_list(cpu))
            .head()
            .map(|head| self.arena.tcb(head).priority());
        let candidate = self.lists.get(pool).iter(&self.arena).find(|&idx| {
            let tcb = self.arena.tcb(idx);
            tcb.affinity().contains(cpu) && !tcb.flags().contains(TaskFlags::CPU_LOCKED)
        });
        let Some(candidate) = candidate else {
            return;
        };
        // The pool is sorted, so the first match is the best one.
        if next.is_some_and(|next| next >= self.arena.tcb(candidate).priority()) {
            return;
        }
        self.lists.get_mut(pool).remove(&mut self.arena, candidate);
        let tcb = self.arena.tcb_mut(candidate);
        tcb.set_cpu(cpu);
        tcb.set_state(TaskState::Assigned);
        let id = self.lists.run_list(cpu);
        self.lists
            .get_mut(id)
            .insert_prioritized(&mut self.arena, candidate);
        debug!("task {} pulled onto cpu {}", self.arena.tcb(candidate).pid(), cpu);
    }

    /// CPU a ready unit would preempt, if any.
    pub fn assign_cpu(&self, idx: TaskIdx) -> Option<usize> {
        let tcb = self.arena.tcb(idx);
        select_cpu(&self.running_priorities(), tcb.affinity(), tcb.priority())
    }

    /// Priority of the unit running on each CPU.
    ///
    /// A CPU with nothing installed yet reports the idle priority.
    pub fn running_priorities(&self) -> Vec<u8> {
        (0..self.ncpus())
            .map(|cpu| self.running_priority(cpu).unwrap_or(PRIORITY_IDLE))
            .collect()
    }

    fn running_priority(&self, cpu: usize) -> Option<u8> {
        self.current(cpu).map(|idx| self.arena.tcb(idx).priority())
    }

    /// Unit running on `cpu`.
    pub fn current(&self, cpu: usize) -> Option<TaskIdx> {
        crate::kassert!(cpu < self.ncpus(), "cpu {} out of range", cpu);
        self.lists.get(self.lists.run_list(cpu)).head()
    }

    /// Identifier of the unit running on `cpu`.
    pub fn current_pid(&self, cpu: usize) -> Option<TaskId> {
        self.current(cpu).map(|idx| self.arena.tcb(idx).pid())
    }

    /// Disables preemption. Nests.
    pub fn lock(&mut self) {
        self.lockcount += 1;
    }

    /// Re-enables preemption; the last unlock releases the pending units.
    ///
    /// Returns whether a running unit changed.
    pub fn unlock(&mut self) -> bool {
        crate::kassert!(self.lockcount > 0, "unbalanced scheduler unlock");
        self.lockcount -= 1;
        if self.lockcount > 0 {
            return false;
        }
        let mut switched = false;
        let pending = ListId::State(TaskState::Pending);
        while let Some(idx) = self.lists.get_mut(pending).pop_front(&mut self.arena) {
            self.arena.tcb_mut(idx).set_state(TaskState::Invalid);
            switched |= self.ready_to_run(idx);
        }
        switched
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.lockcount > 0
    }

    #[inline]
    pub fn lockcount(&self) -> usize {
        self.lockcount
    }

    /// Changes the effective priority of a task and re-sorts it.
    ///
    /// Returns whether a running unit changed.
    pub fn set_priority(&mut self, pid: TaskId, priority: u8) -> Result<bool, TinyError> {
        if priority < PRIORITY_MIN {
            return Err(TinyError::InvalidPriority(priority));
        }
        let idx = self.lookup(pid).ok_or(TinyError::NoSuchTask(pid))?;
        let tcb = self.arena.tcb(idx);
        let (state, cpu) = (tcb.state(), tcb.cpu());
        if tcb.is_idle() {
            return Err(TinyError::InvalidState { pid, state });
        }

        if state.is_ready() {
            let removed = self.remove(idx);
            self.arena.tcb_mut(idx).set_priority(priority);
            let inserted = self.ready_to_run(idx);
            return Ok(removed || inserted);
        }
        let id = self.lists.list_id(state, cpu);
        if state.is_ordered() {
            self.lists.get_mut(id).remove(&mut self.arena, idx);
            self.arena.tcb_mut(idx).set_priority(priority);
            self.lists
                .get_mut(id)
                .insert_prioritized(&mut self.arena, idx);
        } else {
            self.arena.tcb_mut(idx).set_priority(priority);
        }
        Ok(false)
    }

    pub fn lookup(&self, pid: TaskId) -> Option<TaskIdx> {
        self.pids.lookup(pid)
    }

    pub fn get(&self, idx: TaskIdx) -> Option<&TaskControlBlock> {
        self.arena.get(idx)
    }

    pub fn tcb(&self, idx: TaskIdx) -> &TaskControlBlock {
        self.arena.tcb(idx)
    }

    pub fn tcb_mut(&mut self, idx: TaskIdx) -> &mut TaskControlBlock {
        self.arena.tcb_mut(idx)
    }

    /// Control block of a live identifier.
    pub fn task(&self, pid: TaskId) -> Option<&TaskControlBlock> {
        self.lookup(pid).map(|idx| self.arena.tcb(idx))
    }

    /// Number of live tasks, idle units included.
    #[inline]
    pub fn live_count(&self) -> usize {
        self.pids.alive()
    }

    /// Identifiers in list `id`, head first.
    pub fn pids_in(&self, id: ListId) -> Vec<TaskId> {
        self.lists
            .get(id)
            .iter(&self.arena)
            .map(|idx| self.arena.tcb(idx).pid())
            .collect()
    }

    /// List holding tasks of `state` on `cpu`.
    pub fn list_id(&self, state: TaskState, cpu: usize) -> ListId {
        self.lists.list_id(state, cpu)
    }

    /// Audits every scheduler invariant; any violation is fatal.
    pub fn verify(&self) {
        let mut seen = vec![false; self.arena.capacity()];
        let mut members = 0;

        for id in self.lists.ids() {
            let run_list = matches!(id, ListId::Assigned(_))
                || (id == ListId::State(TaskState::ReadyToRun) && !self.topology().is_smp());
            let ordered = self.lists.is_ordered(id);
            let mut prev: Option<&TaskControlBlock> = None;

            for (pos, idx) in self.lists.get(id).iter(&self.arena).enumerate() {
                let tcb = self.arena.tcb(idx);
                crate::kassert!(
                    !seen[idx.as_usize()],
                    "task {} is linked into more than one list",
                    tcb.pid()
                );
                seen[idx.as_usize()] = true;
                members += 1;

                crate::kassert!(
                    self.lists.accepts(id, tcb.state()),
                    "task {} tagged {:?} found in {:?}",
                    tcb.pid(),
                    tcb.state(),
                    id
                );
                if let ListId::Assigned(cpu) = id {
                    crate::kassert!(
                        tcb.cpu() == cpu,
                        "task {} on cpu {} sits in the list of cpu {}",
                        tcb.pid(),
                        tcb.cpu(),
                        cpu
                    );
                }
                if run_list {
                    crate::kassert!(
                        (pos == 0) == (tcb.state() == TaskState::Running),
                        "task {} at position {} of a run list is {:?}",
                        tcb.pid(),
                        pos,
                        tcb.state()
                    );
                }
                if let (true, Some(prev)) = (ordered, prev) {
                    crate::kassert!(
                        prev.priority() > tcb.priority()
                            || (prev.priority() == tcb.priority()
                                && prev.link.stamp() < tcb.link.stamp()),
                        "tasks {} and {} out of order in {:?}",
                        prev.pid(),
                        tcb.pid(),
                        id
                    );
                }
                if let Some(stack) = tcb.stack() {
                    crate::kassert!(
                        stack.contains_sp(stack.sp()),
                        "stack pointer of task {} outside its stack",
                        tcb.pid()
                    );
                }
                prev = Some(tcb);
            }
        }

        for cpu in 0..self.ncpus() {
            crate::kassert!(self.current(cpu).is_some(), "nothing runs on cpu {}", cpu);
        }
        crate::kassert!(
            self.lockcount > 0 || self.lists.get(ListId::State(TaskState::Pending)).is_empty(),
            "tasks held pending while the scheduler is unlocked"
        );
        if self.topology().is_smp() {
            self.verify_no_missed_preemption();
        }
        crate::kassert!(
            members == self.arena.len(),
            "{} tasks allocated but {} linked",
            self.arena.len(),
            members
        );
        crate::kassert!(
            self.pids.alive() == self.arena.len(),
            "{} registry entries for {} tasks",
            self.pids.alive(),
            self.arena.len()
        );
        for (pid, idx) in self.pids.iter() {
            crate::kassert!(
                self.arena.get(idx).is_some_and(|tcb| tcb.pid() == pid),
                "registry entry for pid {} is stale",
                pid
            );
        }
    }

    /// No queued unit that may migrate outranks the running unit of a CPU it
    /// is allowed on.
    fn verify_no_missed_preemption(&self) {
        let running = self.running_priorities();
        let queued = core::iter::once(ListId::State(TaskState::ReadyToRun))
            .chain((0..self.ncpus()).map(ListId::Assigned));
        for id in queued {
            for idx in self.lists.get(id).iter(&self.arena) {
                let tcb = self.arena.tcb(idx);
                if tcb.state() == TaskState::Running || tcb.flags().contains(TaskFlags::CPU_LOCKED)
                {
                    continue;
                }
                for (cpu, &prio) in running.iter().enumerate() {
                    crate::kassert!(
                        !tcb.affinity().contains(cpu) || prio >= tcb.priority(),
                        "task {} (priority {}) waits while cpu {} runs priority {}",
                        tcb.pid(),
                        tcb.priority(),
                        cpu,
                        prio
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{smp_scheduler, spawn, up_scheduler};

    /// Links `idx` into the list of `state` without any routing.
    fn force_into(sched: &mut Scheduler, idx: TaskIdx, state: TaskState) {
        sched.arena.tcb_mut(idx).set_state(state);
        sched
            .lists
            .get_mut(ListId::State(state))
            .insert_prioritized(&mut sched.arena, idx);
    }

    #[test]
    #[should_panic(expected = "waits while cpu")]
    fn test_verify_catches_pooled_unit_outranking_idle_cpu() {
        let mut sched = smp_scheduler(2, 8);
        let a = spawn(&mut sched, "a", 10);
        let idx = sched.lookup(a).unwrap();
        sched.remove(idx);
        force_into(&mut sched, idx, TaskState::ReadyToRun);
        sched.verify();
    }

    #[test]
    #[should_panic(expected = "held pending")]
    fn test_verify_catches_pending_without_lock() {
        let mut sched = up_scheduler(4);
        let a = spawn(&mut sched, "a", 10);
        let idx = sched.lookup(a).unwrap();
        sched.remove(idx);
        force_into(&mut sched, idx, TaskState::Pending);
        sched.verify();
    }
}

//! State-list table.
//!
//! One list per task state. On multiprocessor builds the assigned and running
//! states share a per-CPU list whose head is the unit running there, and
//! ready-to-run is the unassigned pool. On uniprocessor builds the running
//! unit is the head of the ready-to-run list.

use alloc::vec::Vec;

use super::list::TaskList;
use super::task::{NUM_TASK_STATES, TaskState};

/// Processor topology the table is laid out for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    Uniprocessor,
    Multiprocessor { ncpus: usize },
}

impl Topology {
    pub const fn ncpus(self) -> usize {
        match self {
            Topology::Uniprocessor => 1,
            Topology::Multiprocessor { ncpus } => ncpus,
        }
    }

    pub const fn is_smp(self) -> bool {
        matches!(self, Topology::Multiprocessor { .. })
    }
}

/// Names one list of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListId {
    State(TaskState),
    /// Per-CPU assigned list (multiprocessor only).
    Assigned(usize),
}

/// The table of state lists.
pub struct TaskListTable {
    topology: Topology,
    states: [TaskList; NUM_TASK_STATES],
    assigned: Vec<TaskList>,
}

impl TaskListTable {
    /// An empty table.
    pub fn new(topology: Topology) -> Self {
        let assigned = match topology {
            Topology::Uniprocessor => Vec::new(),
            Topology::Multiprocessor { ncpus } => (0..ncpus).map(|_| TaskList::new()).collect(),
        };
        Self {
            topology,
            states: core::array::from_fn(|_| TaskList::new()),
            assigned,
        }
    }

    #[inline]
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// List holding tasks of `state`; `cpu` only matters for per-CPU lists.
    pub fn list_id(&self, state: TaskState, cpu: usize) -> ListId {
        match (self.topology, state) {
            (_, TaskState::Invalid) => crate::fatal!("the invalid state has no task list"),
            (Topology::Uniprocessor, TaskState::Running) => ListId::State(TaskState::ReadyToRun),
            (Topology::Uniprocessor, TaskState::Assigned) => {
                crate::fatal!("no assigned list on a uniprocessor")
            }
            (Topology::Multiprocessor { ncpus }, TaskState::Assigned | TaskState::Running) => {
                crate::kassert!(cpu < ncpus, "cpu {} out of range", cpu);
                ListId::Assigned(cpu)
            }
            (_, state) => ListId::State(state),
        }
    }

    /// List whose head runs on `cpu`.
    pub fn run_list(&self, cpu: usize) -> ListId {
        self.list_id(TaskState::Running, cpu)
    }

    pub fn is_ordered(&self, id: ListId) -> bool {
        match id {
            ListId::State(state) => state.is_ordered(),
            ListId::Assigned(_) => true,
        }
    }

    pub fn get(&self, id: ListId) -> &TaskList {
        match id {
            ListId::State(state) => &self.states[state as usize],
            ListId::Assigned(cpu) => &self.assigned[cpu],
        }
    }

    pub fn get_mut(&mut self, id: ListId) -> &mut TaskList {
        match id {
            ListId::State(state) => &mut self.states[state as usize],
            ListId::Assigned(cpu) => &mut self.assigned[cpu],
        }
    }

    /// Every list that can hold tasks.
    pub fn ids(&self) -> impl Iterator<Item = ListId> + '_ {
        let states = TaskState::ALL
            .into_iter()
            .filter(|state| {
                !matches!(
                    state,
                    TaskState::Invalid | TaskState::Running | TaskState::Assigned
                )
            })
            .map(ListId::State);
        let cpus = 0..self.assigned.len();
        states.chain(cpus.map(ListId::Assigned))
    }

    /// States a task in list `id` may carry.
    pub fn accepts(&self, id: ListId, state: TaskState) -> bool {
        match (self.topology, id) {
            (Topology::Uniprocessor, ListId::State(TaskState::ReadyToRun)) => {
                matches!(state, TaskState::ReadyToRun | TaskState::Running)
            }
            (_, ListId::State(list_state)) => list_state == state,
            (_, ListId::Assigned(_)) => {
                matches!(state, TaskState::Assigned | TaskState::Running)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniprocessor_layout() {
        let table = TaskListTable::new(Topology::Uniprocessor);
        assert_eq!(table.run_list(0), ListId::State(TaskState::ReadyToRun));
        assert_eq!(
            table.list_id(TaskState::WaitSem, 0),
            ListId::State(TaskState::WaitSem)
        );
        assert_eq!(table.ids().count(), NUM_TASK_STATES - 3);
        assert!(table.accepts(table.run_list(0), TaskState::Running));
        assert!(!table.is_ordered(ListId::State(TaskState::Inactive)));
    }

    #[test]
    fn test_multiprocessor_layout() {
        let table = TaskListTable::new(Topology::Multiprocessor { ncpus: 2 });
        assert_eq!(table.run_list(1), ListId::Assigned(1));
        assert_eq!(table.list_id(TaskState::Assigned, 0), ListId::Assigned(0));
        assert_eq!(
            table.list_id(TaskState::ReadyToRun, 1),
            ListId::State(TaskState::ReadyToRun)
        );
        assert_eq!(table.ids().count(), NUM_TASK_STATES - 3 + 2);
        assert!(!table.accepts(ListId::State(TaskState::ReadyToRun), TaskState::Running));
    }

    #[test]
    #[should_panic(expected = "no assigned list")]
    fn test_uniprocessor_has_no_assigned_list() {
        TaskListTable::new(Topology::Uniprocessor).list_id(TaskState::Assigned, 0);
    }
}

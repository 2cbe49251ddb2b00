//! Task control block and related types.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use memory_addr::{VirtAddr, VirtAddrRange};

use super::group::TaskGroup;
use super::list::ListLink;

/// Task identifier type.
pub type TaskId = usize;

/// Largest identifier handed out before the counter wraps.
pub const PID_MAX: TaskId = 32767;

/// Priority of the idle tasks, and of nothing else.
pub const PRIORITY_IDLE: u8 = 0;
/// Lowest priority a created task may use.
pub const PRIORITY_MIN: u8 = 1;
/// Highest priority.
pub const PRIORITY_MAX: u8 = u8::MAX;

/// Entry point of a created task.
pub type TaskMain = fn(&[String]) -> i32;

/// Number of [`TaskState`] values.
pub const NUM_TASK_STATES: usize = 13;

/// Task state enumeration.
///
/// Every state except `Invalid` has a task list; `ReadyToRun`, `Assigned` and
/// `Running` share lists depending on the processor topology.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TaskState {
    /// Not in any list. Only seen while a task is being moved.
    Invalid = 0,
    /// Ready, but held back by the preemption lock.
    Pending = 1,
    /// Ready to run. On multiprocessor builds: not assigned to a CPU yet.
    ReadyToRun = 2,
    /// Assigned to a CPU but not running there (multiprocessor only).
    Assigned = 3,
    /// Running on its CPU.
    Running = 4,
    /// Created but never started.
    Inactive = 5,
    /// Blocked on a semaphore.
    WaitSem = 6,
    /// Blocked until another task finishes with it.
    WaitFin = 7,
    /// Blocked waiting for a signal.
    WaitSig = 8,
    /// Blocked until a message queue is not empty.
    WaitMqNotEmpty = 9,
    /// Blocked until a message queue is not full.
    WaitMqNotFull = 10,
    /// Blocked waiting for a page fill.
    WaitPageFill = 11,
    /// Exited, waiting to be released.
    Exited = 12,
}

impl TaskState {
    pub const ALL: [TaskState; NUM_TASK_STATES] = [
        TaskState::Invalid,
        TaskState::Pending,
        TaskState::ReadyToRun,
        TaskState::Assigned,
        TaskState::Running,
        TaskState::Inactive,
        TaskState::WaitSem,
        TaskState::WaitFin,
        TaskState::WaitSig,
        TaskState::WaitMqNotEmpty,
        TaskState::WaitMqNotFull,
        TaskState::WaitPageFill,
        TaskState::Exited,
    ];

    /// Whether the list for this state is kept in priority order.
    pub const fn is_ordered(self) -> bool {
        !matches!(
            self,
            TaskState::Invalid | TaskState::Inactive | TaskState::WaitSig | TaskState::Exited
        )
    }

    /// States reached through the ready-to-run path.
    pub const fn is_ready(self) -> bool {
        matches!(
            self,
            TaskState::Pending | TaskState::ReadyToRun | TaskState::Assigned | TaskState::Running
        )
    }

    /// Blocked states.
    pub const fn is_waiting(self) -> bool {
        matches!(
            self,
            TaskState::WaitSem
                | TaskState::WaitFin
                | TaskState::WaitSig
                | TaskState::WaitMqNotEmpty
                | TaskState::WaitMqNotFull
                | TaskState::WaitPageFill
        )
    }
}

bitflags::bitflags! {
    /// Task type and scheduling flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskFlags: u8 {
        /// Kernel thread.
        const KERNEL = 1 << 0;
        /// Cannot be cancelled.
        const NONCANCELABLE = 1 << 1;
        /// Never migrates off `TaskControlBlock::cpu`, whatever the affinity says.
        const CPU_LOCKED = 1 << 2;
    }
}

/// Set of CPUs a task may run on.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CpuMask(u32);

impl CpuMask {
    /// All of the first `ncpus` CPUs.
    pub const fn all(ncpus: usize) -> Self {
        if ncpus >= 32 {
            Self(u32::MAX)
        } else {
            Self((1 << ncpus) - 1)
        }
    }

    pub const fn single(cpu: usize) -> Self {
        Self(1 << cpu)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn contains(self, cpu: usize) -> bool {
        cpu < 32 && self.0 & (1 << cpu) != 0
    }
}

impl fmt::Debug for CpuMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuMask({:#x})", self.0)
    }
}

/// Stack region of a task.
///
/// Stacks grow down from `base + size`; the stack pointer is valid anywhere in
/// `[base, base + size]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackRegion {
    base: VirtAddr,
    size: usize,
    sp: VirtAddr,
}

impl StackRegion {
    /// An empty stack: the stack pointer sits at the top.
    pub fn new(base: VirtAddr, size: usize) -> Self {
        Self {
            base,
            size,
            sp: base + size,
        }
    }

    /// Describes a stack that is already in use.
    pub fn with_sp(base: VirtAddr, size: usize, sp: VirtAddr) -> Self {
        Self { base, size, sp }
    }

    #[inline]
    pub fn base(&self) -> VirtAddr {
        self.base
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn top(&self) -> VirtAddr {
        self.base + self.size
    }

    #[inline]
    pub fn sp(&self) -> VirtAddr {
        self.sp
    }

    pub fn range(&self) -> VirtAddrRange {
        VirtAddrRange::from_start_size(self.base, self.size)
    }

    /// Whether `sp` is a legal stack pointer for this region.
    #[inline]
    pub fn contains_sp(&self, sp: VirtAddr) -> bool {
        self.base <= sp && sp <= self.top()
    }
}

/// Parameters for creating a task.
pub struct TaskSpec {
    pub name: String,
    pub priority: u8,
    pub stack_size: usize,
    pub entry: Option<TaskMain>,
    pub argv: Vec<String>,
    /// Defaults to every CPU.
    pub affinity: Option<CpuMask>,
    pub flags: TaskFlags,
    /// Task whose group the new task inherits files from.
    pub parent: Option<TaskId>,
}

impl TaskSpec {
    pub fn new(name: &str, priority: u8, stack_size: usize) -> Self {
        Self {
            name: String::from(name),
            priority,
            stack_size,
            entry: None,
            argv: Vec::new(),
            affinity: None,
            flags: TaskFlags::empty(),
            parent: None,
        }
    }

    pub fn entry(mut self, entry: TaskMain) -> Self {
        self.entry = Some(entry);
        self
    }

    pub fn argv(mut self, argv: Vec<String>) -> Self {
        self.argv = argv;
        self
    }

    pub fn affinity(mut self, affinity: CpuMask) -> Self {
        self.affinity = Some(affinity);
        self
    }

    pub fn parent(mut self, parent: TaskId) -> Self {
        self.parent = Some(parent);
        self
    }
}

/// Task control block.
pub struct TaskControlBlock {
    /// Unique task identifier.
    pid: TaskId,
    /// Task name for debugging.
    name: String,
    /// Current task state. Matches the list the task is linked into.
    state: TaskState,
    flags: TaskFlags,
    /// Priority the task was created with.
    base_priority: u8,
    /// Effective priority, used for ordering.
    priority: u8,
    affinity: CpuMask,
    /// CPU the task is assigned to. Meaningless while unassigned.
    cpu: usize,
    entry: Option<TaskMain>,
    argv: Vec<String>,
    stack: Option<StackRegion>,
    /// Backing memory for stacks the scheduler allocated itself.
    kstack: Option<Box<[u8]>>,
    parent: Option<TaskId>,
    group: Option<TaskGroup>,
    pub(super) link: ListLink,
}

impl TaskControlBlock {
    /// Creates a detached control block.
    pub(super) fn new(pid: TaskId, name: String, priority: u8, flags: TaskFlags) -> Self {
        Self {
            pid,
            name,
            state: TaskState::Invalid,
            flags,
            base_priority: priority,
            priority,
            affinity: CpuMask::all(32),
            cpu: 0,
            entry: None,
            argv: Vec::new(),
            stack: None,
            kstack: None,
            parent: None,
            group: None,
            link: ListLink::new(),
        }
    }

    /// Builds the control block of a created task, allocating its stack.
    pub(super) fn from_spec(spec: TaskSpec) -> Self {
        let kstack = alloc::vec![0u8; spec.stack_size].into_boxed_slice();
        let stack = StackRegion::new(VirtAddr::from(kstack.as_ptr() as usize), spec.stack_size);

        let mut tcb = Self::new(0, spec.name, spec.priority, spec.flags);
        tcb.entry = spec.entry;
        tcb.argv = spec.argv;
        tcb.stack = Some(stack);
        tcb.kstack = Some(kstack);
        tcb.parent = spec.parent;
        if let Some(affinity) = spec.affinity {
            tcb.affinity = affinity;
        }
        tcb
    }

    #[inline]
    pub fn pid(&self) -> TaskId {
        self.pid
    }

    #[inline]
    pub(super) fn set_pid(&mut self, pid: TaskId) {
        self.pid = pid;
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn state(&self) -> TaskState {
        self.state
    }

    #[inline]
    pub(super) fn set_state(&mut self, state: TaskState) {
        self.state = state;
    }

    #[inline]
    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    #[inline]
    pub fn base_priority(&self) -> u8 {
        self.base_priority
    }

    #[inline]
    pub fn priority(&self) -> u8 {
        self.priority
    }

    #[inline]
    pub(super) fn set_priority(&mut self, priority: u8) {
        self.priority = priority;
    }

    #[inline]
    pub fn affinity(&self) -> CpuMask {
        self.affinity
    }

    pub(super) fn set_affinity(&mut self, affinity: CpuMask) {
        self.affinity = affinity;
    }

    #[inline]
    pub fn cpu(&self) -> usize {
        self.cpu
    }

    #[inline]
    pub(super) fn set_cpu(&mut self, cpu: usize) {
        self.cpu = cpu;
    }

    /// Idle tasks are the only ones at the idle priority.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.base_priority == PRIORITY_IDLE
    }

    pub fn entry(&self) -> Option<TaskMain> {
        self.entry
    }

    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    pub(super) fn set_argv(&mut self, argv: Vec<String>) {
        self.argv = argv;
    }

    pub fn stack(&self) -> Option<&StackRegion> {
        self.stack.as_ref()
    }

    /// Replaces the stack descriptor. Used by the bootstrap and by the
    /// processor hooks that build the initial register state.
    pub fn set_stack(&mut self, stack: StackRegion) {
        self.stack = Some(stack);
    }

    pub fn parent(&self) -> Option<TaskId> {
        self.parent
    }

    pub fn group(&self) -> Option<&TaskGroup> {
        self.group.as_ref()
    }

    pub fn group_mut(&mut self) -> Option<&mut TaskGroup> {
        self.group.as_mut()
    }

    pub(crate) fn set_group(&mut self, group: TaskGroup) {
        self.group = Some(group);
    }

    /// Whether the task is linked into a list.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.link.is_linked()
    }
}

impl fmt::Debug for TaskControlBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskControlBlock")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("cpu", &self.cpu)
            .field("flags", &self.flags)
            .finish()
    }
}

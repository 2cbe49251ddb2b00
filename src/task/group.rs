//! Task groups.
//!
//! The scheduler treats a group as opaque metadata hung off a control block:
//! inherited descriptors and exit status of children. Idle units get theirs
//! during bootstrap, created tasks inherit from their parent.

use alloc::vec::Vec;

use super::task::TaskId;

bitflags::bitflags! {
    /// Group behavior flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct GroupFlags: u8 {
        /// Children do not leave exit status behind.
        const NOCLDWAIT = 1 << 0;
        /// Group of a kernel thread.
        const PRIVILEGED = 1 << 1;
    }
}

/// What a descriptor slot refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Stdin,
    Stdout,
    Stderr,
}

/// Descriptor table of a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileTable {
    slots: Vec<Option<FileKind>>,
}

impl FileTable {
    pub const STDIO: [FileKind; 3] = [FileKind::Stdin, FileKind::Stdout, FileKind::Stderr];

    /// A table holding only the three standard streams.
    pub fn stdio() -> Self {
        Self {
            slots: Self::STDIO.iter().copied().map(Some).collect(),
        }
    }

    pub fn get(&self, fd: usize) -> Option<FileKind> {
        self.slots.get(fd).copied().flatten()
    }

    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }
}

/// Exit record of a child task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildStatus {
    pub pid: TaskId,
    pub status: i32,
}

/// Group metadata of a task.
#[derive(Debug, Clone, Default)]
pub struct TaskGroup {
    flags: GroupFlags,
    files: FileTable,
    children: Vec<ChildStatus>,
    initialized: bool,
}

impl Default for GroupFlags {
    fn default() -> Self {
        GroupFlags::empty()
    }
}

impl TaskGroup {
    /// An empty group with no descriptors.
    pub fn allocate() -> Self {
        Self::default()
    }

    /// Opens the standard streams for the first idle unit.
    pub fn setup_idle_files(&mut self) {
        self.files = FileTable::stdio();
    }

    /// Inherits the descriptors of `parent`.
    pub fn setup_task_files(&mut self, parent: &TaskGroup) {
        self.files = parent.files.clone();
    }

    /// Marks the group usable.
    pub fn initialize(&mut self, flags: GroupFlags) {
        self.flags |= flags;
        self.initialized = true;
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn flags(&self) -> GroupFlags {
        self.flags
    }

    #[inline]
    pub fn files(&self) -> &FileTable {
        &self.files
    }

    /// Records the exit of a child, unless the group discards child status.
    pub fn record_exit(&mut self, pid: TaskId, status: i32) {
        if !self.flags.contains(GroupFlags::NOCLDWAIT) {
            self.children.push(ChildStatus { pid, status });
        }
    }

    /// Takes the exit record of `pid`, if one was kept.
    pub fn take_child_status(&mut self, pid: TaskId) -> Option<ChildStatus> {
        let pos = self.children.iter().position(|child| child.pid == pid)?;
        Some(self.children.remove(pos))
    }

    pub fn children(&self) -> &[ChildStatus] {
        &self.children
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_files_are_inherited() {
        let mut idle = TaskGroup::allocate();
        assert_eq!(idle.files().open_count(), 0);
        idle.setup_idle_files();
        idle.initialize(GroupFlags::NOCLDWAIT | GroupFlags::PRIVILEGED);
        assert!(idle.is_initialized());

        let mut child = TaskGroup::allocate();
        child.setup_task_files(&idle);
        assert_eq!(child.files(), idle.files());
        assert_eq!(child.files().get(1), Some(FileKind::Stdout));
        assert_eq!(child.files().get(3), None);
    }

    #[test]
    fn test_nocldwait_discards_status() {
        let mut group = TaskGroup::allocate();
        group.initialize(GroupFlags::NOCLDWAIT);
        group.record_exit(5, 0);
        assert!(group.children().is_empty());

        let mut waiting = TaskGroup::allocate();
        waiting.initialize(GroupFlags::empty());
        waiting.record_exit(5, 3);
        waiting.record_exit(6, 0);
        assert_eq!(
            waiting.take_child_status(5),
            Some(ChildStatus { pid: 5, status: 3 })
        );
        assert_eq!(waiting.take_child_status(5), None);
        assert_eq!(waiting.children().len(), 1);
    }
}

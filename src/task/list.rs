//! Control-block arena and index-linked task lists.
//!
//! Tasks live in a [`TaskArena`] and are addressed by [`TaskIdx`]. Each
//! [`TaskList`] threads its members through the `prev`/`next` indices stored
//! in the control blocks, so detach and insert-at-position are O(1) and a
//! task can be linked into at most one list.

use alloc::vec::Vec;

use crate::error::TinyError;

use super::task::TaskControlBlock;

/// Stable handle of a control block inside the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskIdx(usize);

impl TaskIdx {
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

/// List linkage stored in every control block.
#[derive(Debug, Clone, Copy)]
pub struct ListLink {
    prev: Option<TaskIdx>,
    next: Option<TaskIdx>,
    linked: bool,
    /// Insertion ticket, increasing over the life of the scheduler.
    stamp: u64,
}

impl ListLink {
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            linked: false,
            stamp: 0,
        }
    }

    #[inline]
    pub fn is_linked(&self) -> bool {
        self.linked
    }

    #[inline]
    pub fn stamp(&self) -> u64 {
        self.stamp
    }
}

impl Default for ListLink {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed-capacity arena of control blocks.
pub struct TaskArena {
    slots: Vec<Option<TaskControlBlock>>,
    free: Vec<usize>,
    capacity: usize,
    next_stamp: u64,
}

impl TaskArena {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            capacity,
            next_stamp: 0,
        }
    }

    /// Stores a control block and returns its handle.
    pub fn insert(&mut self, tcb: TaskControlBlock) -> Result<TaskIdx, TinyError> {
        if let Some(slot) = self.free.pop() {
            self.slots[slot] = Some(tcb);
            return Ok(TaskIdx(slot));
        }
        if self.slots.len() >= self.capacity {
            return Err(TinyError::CapacityExceeded {
                max: self.capacity,
            });
        }
        self.slots.push(Some(tcb));
        Ok(TaskIdx(self.slots.len() - 1))
    }

    /// Takes a control block out of the arena. It must not be linked.
    pub fn remove(&mut self, idx: TaskIdx) -> TaskControlBlock {
        let Some(tcb) = self.slots.get_mut(idx.0).and_then(Option::take) else {
            crate::fatal!("remove of empty arena slot {}", idx.0);
        };
        crate::kassert!(
            !tcb.link.is_linked(),
            "task {} removed from the arena while still linked",
            tcb.pid()
        );
        self.free.push(idx.0);
        tcb
    }

    pub fn get(&self, idx: TaskIdx) -> Option<&TaskControlBlock> {
        self.slots.get(idx.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: TaskIdx) -> Option<&mut TaskControlBlock> {
        self.slots.get_mut(idx.0).and_then(Option::as_mut)
    }

    /// Like [`get`](Self::get), but a stale handle is a kernel bug.
    pub fn tcb(&self, idx: TaskIdx) -> &TaskControlBlock {
        match self.get(idx) {
            Some(tcb) => tcb,
            None => crate::fatal!("stale task handle {}", idx.0),
        }
    }

    pub fn tcb_mut(&mut self, idx: TaskIdx) -> &mut TaskControlBlock {
        match self.slots.get_mut(idx.0).and_then(Option::as_mut) {
            Some(tcb) => tcb,
            None => crate::fatal!("stale task handle {}", idx.0),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskIdx, &TaskControlBlock)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|tcb| (TaskIdx(i), tcb)))
    }

    fn take_stamp(&mut self) -> u64 {
        self.next_stamp += 1;
        self.next_stamp
    }
}

/// Doubly-linked list of tasks, threaded through the arena.
#[derive(Debug, Default)]
pub struct TaskList {
    head: Option<TaskIdx>,
    tail: Option<TaskIdx>,
    len: usize,
}

impl TaskList {
    pub const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn head(&self) -> Option<TaskIdx> {
        self.head
    }

    #[inline]
    pub fn tail(&self) -> Option<TaskIdx> {
        self.tail
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter<'a>(&self, arena: &'a TaskArena) -> ListIter<'a> {
        ListIter {
            arena,
            cursor: self.head,
            remaining: self.len,
        }
    }

    /// Walks the list looking for `idx`.
    pub fn contains(&self, arena: &TaskArena, idx: TaskIdx) -> bool {
        self.iter(arena).any(|member| member == idx)
    }

    pub fn push_front(&mut self, arena: &mut TaskArena, idx: TaskIdx) {
        match self.head {
            Some(head) => self.insert_before(arena, head, idx),
            None => self.link_first(arena, idx),
        }
    }

    pub fn push_back(&mut self, arena: &mut TaskArena, idx: TaskIdx) {
        self.prepare(arena, idx);
        let stamp = arena.take_stamp();
        let old_tail = self.tail;
        {
            let link = &mut arena.tcb_mut(idx).link;
            link.prev = old_tail;
            link.next = None;
            link.linked = true;
            link.stamp = stamp;
        }
        match old_tail {
            Some(tail) => arena.tcb_mut(tail).link.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;
    }

    /// Links `idx` directly in front of `before`, which must be a member.
    pub fn insert_before(&mut self, arena: &mut TaskArena, before: TaskIdx, idx: TaskIdx) {
        self.prepare(arena, idx);
        let stamp = arena.take_stamp();
        let prev = arena.tcb(before).link.prev;
        {
            let link = &mut arena.tcb_mut(idx).link;
            link.prev = prev;
            link.next = Some(before);
            link.linked = true;
            link.stamp = stamp;
        }
        arena.tcb_mut(before).link.prev = Some(idx);
        match prev {
            Some(prev) => arena.tcb_mut(prev).link.next = Some(idx),
            None => self.head = Some(idx),
        }
        self.len += 1;
    }

    /// Inserts by descending priority, after every member of equal priority.
    ///
    /// Returns `true` when the task became the new head.
    pub fn insert_prioritized(&mut self, arena: &mut TaskArena, idx: TaskIdx) -> bool {
        let priority = arena.tcb(idx).priority();
        let mut cursor = self.head;
        while let Some(member) = cursor {
            if arena.tcb(member).priority() < priority {
                self.insert_before(arena, member, idx);
                return self.head == Some(idx);
            }
            cursor = arena.tcb(member).link.next;
        }
        self.push_back(arena, idx);
        self.head == Some(idx)
    }

    /// Unlinks `idx`. A task that is not a member is a kernel bug.
    pub fn remove(&mut self, arena: &mut TaskArena, idx: TaskIdx) {
        crate::kassert!(
            self.contains(arena, idx),
            "task {} is not a member of the list it is removed from",
            arena.tcb(idx).pid()
        );
        let (prev, next) = {
            let link = &mut arena.tcb_mut(idx).link;
            let pair = (link.prev, link.next);
            *link = ListLink {
                stamp: link.stamp,
                ..ListLink::new()
            };
            pair
        };
        match prev {
            Some(prev) => arena.tcb_mut(prev).link.next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => arena.tcb_mut(next).link.prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    /// Unlinks and returns the head.
    pub fn pop_front(&mut self, arena: &mut TaskArena) -> Option<TaskIdx> {
        let head = self.head?;
        self.remove(arena, head);
        Some(head)
    }

    fn link_first(&mut self, arena: &mut TaskArena, idx: TaskIdx) {
        self.push_back(arena, idx);
    }

    fn prepare(&self, arena: &TaskArena, idx: TaskIdx) {
        crate::kassert!(
            !arena.tcb(idx).link.is_linked(),
            "task {} inserted while already linked",
            arena.tcb(idx).pid()
        );
    }
}

/// Iterator over the members of a [`TaskList`], head first.
pub struct ListIter<'a> {
    arena: &'a TaskArena,
    cursor: Option<TaskIdx>,
    remaining: usize,
}

impl Iterator for ListIter<'_> {
    type Item = TaskIdx;

    fn next(&mut self) -> Option<TaskIdx> {
        let current = self.cursor?;
        // A cycle would walk forever; the length bounds the walk.
        if self.remaining == 0 {
            crate::fatal!("task list longer than its recorded length");
        }
        self.remaining -= 1;
        self.cursor = self.arena.tcb(current).link.next;
        Some(current)
    }
}

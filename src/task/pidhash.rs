//! Identifier registry.
//!
//! Open hash from task identifier to arena handle. A slot is addressed by
//! `pid & (len - 1)`, so the table length is always a power of two, and an
//! identifier is only handed out when its slot is free. Lookups compare the
//! stored identifier, which keeps released identifiers from resolving.

use alloc::vec;
use alloc::vec::Vec;

use crate::error::TinyError;

use super::list::TaskIdx;
use super::task::{PID_MAX, TaskId};

#[derive(Debug, Clone, Copy)]
struct PidSlot {
    pid: TaskId,
    idx: TaskIdx,
}

/// Identifier registry.
pub struct PidHash {
    slots: Vec<Option<PidSlot>>,
    lastpid: TaskId,
    /// Identifiers below this are reserved for idle units.
    first_pid: TaskId,
    alive: usize,
    max_tasks: usize,
}

impl PidHash {
    /// Table sized to the task limit up front.
    pub fn for_uniprocessor(max_tasks: usize) -> Self {
        Self::with_slots(max_tasks.max(1).next_power_of_two(), 1, max_tasks)
    }

    /// Table sized to the processor count; grows on demand up to the limit.
    pub fn for_multiprocessor(ncpus: usize, max_tasks: usize) -> Self {
        let mut nslots = 4;
        while nslots <= ncpus {
            nslots <<= 1;
        }
        Self::with_slots(nslots, ncpus, max_tasks)
    }

    fn with_slots(nslots: usize, first_pid: usize, max_tasks: usize) -> Self {
        Self {
            slots: vec![None; nslots],
            lastpid: 0,
            first_pid,
            alive: 0,
            max_tasks,
        }
    }

    #[inline]
    fn hash(&self, pid: TaskId) -> usize {
        pid & (self.slots.len() - 1)
    }

    /// Registers an idle unit under a fixed identifier.
    pub fn reserve(&mut self, pid: TaskId, idx: TaskIdx) {
        let slot = self.hash(pid);
        if let Some(existing) = self.slots[slot] {
            crate::fatal!(
                "pid {} collides with live pid {} in the registry",
                pid,
                existing.pid
            );
        }
        self.slots[slot] = Some(PidSlot { pid, idx });
        self.alive += 1;
    }

    /// Counter value the next allocation starts after.
    pub fn set_lastpid(&mut self, lastpid: TaskId) {
        self.lastpid = lastpid;
    }

    #[inline]
    pub fn lastpid(&self) -> TaskId {
        self.lastpid
    }

    /// Hands out the next free identifier and maps it to `idx`.
    pub fn allocate(&mut self, idx: TaskIdx) -> Result<TaskId, TinyError> {
        if self.alive >= self.max_tasks {
            return Err(TinyError::CapacityExceeded {
                max: self.max_tasks,
            });
        }
        if self.alive >= self.slots.len() {
            self.grow();
        }

        // A free slot exists, and any run of consecutive identifiers as long
        // as the table reaches it.
        for _ in 0..=PID_MAX {
            let mut pid = self.lastpid + 1;
            if pid > PID_MAX {
                pid = self.first_pid;
            }
            self.lastpid = pid;
            let slot = self.hash(pid);
            if self.slots[slot].is_none() {
                self.slots[slot] = Some(PidSlot { pid, idx });
                self.alive += 1;
                return Ok(pid);
            }
        }
        crate::fatal!("no free registry slot with {} live tasks", self.alive)
    }

    /// Drops the entry of a live identifier.
    pub fn release(&mut self, pid: TaskId) -> TaskIdx {
        let slot = self.hash(pid);
        match self.slots[slot] {
            Some(entry) if entry.pid == pid => {
                self.slots[slot] = None;
                self.alive -= 1;
                entry.idx
            }
            _ => crate::fatal!("release of pid {} which is not live", pid),
        }
    }

    pub fn lookup(&self, pid: TaskId) -> Option<TaskIdx> {
        self.slots[self.hash(pid)]
            .filter(|entry| entry.pid == pid)
            .map(|entry| entry.idx)
    }

    #[inline]
    pub fn alive(&self) -> usize {
        self.alive
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, TaskIdx)> + '_ {
        self.slots.iter().flatten().map(|entry| (entry.pid, entry.idx))
    }

    /// Doubles the table and rehashes every live entry.
    fn grow(&mut self) {
        let len = self.slots.len() * 2;
        let old = core::mem::replace(&mut self.slots, vec![None; len]);
        for entry in old.into_iter().flatten() {
            let slot = self.hash(entry.pid);
            // Entries were unique modulo the old length, so also modulo the new one.
            self.slots[slot] = Some(entry);
        }
        debug!("pid hash grown to {} slots", self.slots.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::list::TaskArena;
    use crate::task::task::{TaskControlBlock, TaskFlags};
    use alloc::string::String;

    fn handles(n: usize) -> Vec<TaskIdx> {
        let mut arena = TaskArena::new(n);
        (0..n)
            .map(|_| {
                arena
                    .insert(TaskControlBlock::new(0, String::new(), 1, TaskFlags::empty()))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_multiprocessor_sizing() {
        assert_eq!(PidHash::for_multiprocessor(1, 16).capacity(), 4);
        assert_eq!(PidHash::for_multiprocessor(3, 16).capacity(), 4);
        assert_eq!(PidHash::for_multiprocessor(4, 16).capacity(), 8);
        assert_eq!(PidHash::for_uniprocessor(5).capacity(), 8);
    }

    #[test]
    fn test_allocate_and_release_counts() {
        let idx = handles(4);
        let mut pids = PidHash::for_uniprocessor(4);
        pids.reserve(0, idx[0]);
        let a = pids.allocate(idx[1]).unwrap();
        let b = pids.allocate(idx[2]).unwrap();
        let c = pids.allocate(idx[3]).unwrap();
        assert_eq!((a, b, c), (1, 2, 3));
        assert_eq!(pids.alive(), 4);
        assert_eq!(
            pids.allocate(idx[3]),
            Err(TinyError::CapacityExceeded { max: 4 })
        );

        assert_eq!(pids.release(b), idx[2]);
        assert_eq!(pids.alive(), 3);
        assert_eq!(pids.lookup(b), None);
        assert_eq!(pids.lookup(c), Some(idx[3]));

        // Slot 2 is the only free one; pid 6 hashes to it.
        let d = pids.allocate(idx[2]).unwrap();
        assert_eq!(d, 6);
        assert_eq!(pids.lookup(2), None);
        assert_eq!(pids.lookup(6), Some(idx[2]));
    }

    #[test]
    fn test_growth_keeps_entries() {
        let idx = handles(8);
        let mut pids = PidHash::for_multiprocessor(2, 8);
        pids.reserve(0, idx[0]);
        pids.reserve(1, idx[1]);
        pids.set_lastpid(1);
        for i in 2..8 {
            assert_eq!(pids.allocate(idx[i]).unwrap(), i);
        }
        assert_eq!(pids.capacity(), 8);
        for i in 0..8 {
            assert_eq!(pids.lookup(i), Some(idx[i]));
        }
    }

    #[test]
    fn test_counter_wraps_past_idle_pids() {
        let idx = handles(3);
        let mut pids = PidHash::for_multiprocessor(2, 4);
        pids.reserve(0, idx[0]);
        pids.reserve(1, idx[1]);
        pids.set_lastpid(PID_MAX);
        assert_eq!(pids.allocate(idx[2]).unwrap(), 2);
    }

    #[test]
    #[should_panic(expected = "collides")]
    fn test_reserve_collision_is_fatal() {
        let idx = handles(2);
        let mut pids = PidHash::for_uniprocessor(4);
        pids.reserve(0, idx[0]);
        pids.reserve(4, idx[1]);
    }

    #[test]
    #[should_panic(expected = "not live")]
    fn test_release_of_unknown_pid_is_fatal() {
        let mut pids = PidHash::for_uniprocessor(4);
        pids.release(3);
    }
}

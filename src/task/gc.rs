//! Deferred frees.
//!
//! Memory released from interrupt context cannot go straight back to the
//! heap, because the heap lock may be held by the interrupted code. Such
//! blocks are queued here and handed back by the idle loop.

use alloc::collections::VecDeque;

use memory_addr::VirtAddr;

use crate::hal::Mutex;

/// A heap allocation waiting to be freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapBlock {
    pub addr: VirtAddr,
    pub size: usize,
}

impl HeapBlock {
    pub fn new(addr: VirtAddr, size: usize) -> Self {
        Self { addr, size }
    }
}

/// Allocator the deferred frees are returned to.
pub trait KernelHeap: Sync {
    /// Frees `block` if the heap can be taken without blocking; hands the
    /// block back otherwise.
    fn try_free(&self, block: HeapBlock) -> Result<(), HeapBlock>;
}

/// Queue of frees deferred from interrupt context.
pub struct DelayedFreeQueue {
    queue: Mutex<VecDeque<HeapBlock>>,
}

impl DelayedFreeQueue {
    pub const fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues a block for a later free.
    pub fn defer(&self, block: HeapBlock) {
        trace!("deferring free of {:?} ({} bytes)", block.addr, block.size);
        self.queue.lock().push_back(block);
    }

    /// Returns queued blocks to `heap`.
    ///
    /// Stops at the first block the heap refuses, leaving it and everything
    /// behind it queued. Never blocks: if the queue itself is busy nothing is
    /// collected. Returns the number of blocks freed.
    pub fn collect(&self, heap: &dyn KernelHeap) -> usize {
        let Some(mut queue) = self.queue.try_lock() else {
            return 0;
        };
        let mut freed = 0;
        while let Some(block) = queue.pop_front() {
            if let Err(block) = heap.try_free(block) {
                queue.push_front(block);
                break;
            }
            freed += 1;
        }
        if freed > 0 {
            debug!("collected {} deferred frees", freed);
        }
        freed
    }

    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for DelayedFreeQueue {
    fn default() -> Self {
        Self::new()
    }
}

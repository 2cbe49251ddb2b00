//! Processor and board hooks consumed by the bootstrap.

use memory_addr::{VirtAddr, VirtAddrRange};

use crate::TinyResult;
use crate::hal::cpu;
use crate::task::{KernelHeap, StackRegion, TaskControlBlock};

/// Platform services the scheduler core is brought up on.
///
/// Optional hooks have defaults that do nothing, so a minimal platform only
/// describes its idle stack and kernel heap.
pub trait Platform: Sync {
    /// Index of the CPU executing the call.
    fn this_cpu(&self) -> usize {
        0
    }

    /// Current stack pointer of the caller.
    fn current_sp(&self) -> VirtAddr {
        VirtAddr::from(cpu::current_sp())
    }

    /// Stack the boot CPU is running on when the bootstrap starts.
    fn idle_stack(&self, cpu: usize) -> StackRegion;

    /// Stack for the idle unit of a secondary CPU.
    fn cpu_idlestack(&self, cpu: usize, size: usize) -> TinyResult<StackRegion> {
        let _ = size;
        anyhow::bail!("no idle stack for cpu {cpu}")
    }

    /// Builds the initial register state of an idle unit.
    fn initial_state(&self, tcb: &mut TaskControlBlock) {
        let _ = tcb;
    }

    /// Region for the kernel heap.
    fn allocate_kheap(&self) -> TinyResult<VirtAddrRange>;

    /// Region for a separate user heap, if the platform has one.
    fn allocate_uheap(&self) -> Option<VirtAddrRange> {
        None
    }

    /// Region for the page allocator, if the platform has one.
    fn allocate_pgheap(&self) -> Option<VirtAddrRange> {
        None
    }

    /// Processor-specific hardware bring-up.
    fn initialize(&self) -> TinyResult<()> {
        Ok(())
    }

    /// Board drivers that cannot wait for the late initialization.
    fn board_early_initialize(&self) -> TinyResult<()> {
        Ok(())
    }

    /// Releases the secondary CPUs.
    fn smp_start(&self) -> TinyResult<()> {
        Ok(())
    }

    /// Heap that deferred frees are returned to.
    fn kernel_heap(&self) -> Option<&dyn KernelHeap> {
        None
    }

    /// Low-power wait of the idle loop.
    fn idle(&self) {
        cpu::wait_for_irqs();
    }
}

//! CPU-related operations and utilities.
//!
//! On aarch64 bare metal these touch `DAIF` and execute `wfi`. Every other
//! target (host test builds in particular) gets an emulated interrupt mask so
//! the locking code behaves the same way.

#[cfg(all(target_arch = "aarch64", target_os = "none"))]
mod imp {
    use aarch64_cpu::registers::{DAIF, ReadWriteable, Readable};

    /// Returns whether IRQs are masked on the current CPU.
    #[inline]
    pub fn irqs_disabled() -> bool {
        DAIF.matches_all(DAIF::I::Masked)
    }

    /// Masks IRQs on the current CPU.
    #[inline]
    pub fn disable_irqs() {
        DAIF.modify(DAIF::I::Masked);
    }

    /// Unmasks IRQs on the current CPU.
    #[inline]
    pub fn enable_irqs() {
        DAIF.modify(DAIF::I::Unmasked);
    }

    /// Halts until the next interrupt.
    #[inline]
    pub fn wait_for_irqs() {
        aarch64_cpu::asm::wfi();
    }

    /// Current stack pointer.
    #[inline]
    pub fn current_sp() -> usize {
        let sp: usize;
        unsafe { core::arch::asm!("mov {}, sp", out(reg) sp) };
        sp
    }
}

#[cfg(not(all(target_arch = "aarch64", target_os = "none")))]
mod imp {
    use core::sync::atomic::{AtomicBool, Ordering};

    static IRQS_MASKED: AtomicBool = AtomicBool::new(false);

    #[inline]
    pub fn irqs_disabled() -> bool {
        IRQS_MASKED.load(Ordering::Acquire)
    }

    #[inline]
    pub fn disable_irqs() {
        IRQS_MASKED.store(true, Ordering::Release);
    }

    #[inline]
    pub fn enable_irqs() {
        IRQS_MASKED.store(false, Ordering::Release);
    }

    #[inline]
    pub fn wait_for_irqs() {
        core::hint::spin_loop();
    }

    /// Approximation good enough for stack-bounds checks: the address of a
    /// local lives on the current stack.
    #[inline(never)]
    pub fn current_sp() -> usize {
        let marker = 0u8;
        core::ptr::addr_of!(marker) as usize
    }
}

pub use imp::{current_sp, disable_irqs, enable_irqs, irqs_disabled, wait_for_irqs};

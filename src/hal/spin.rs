//! Spinlock that keeps IRQs masked while held.
//!
//! Scheduler state is touched from interrupt handlers (wakeups, deferred
//! frees), so every lock around it must mask interrupts for the whole
//! detach/re-insert span. The previous mask is restored on unlock, which makes
//! nesting inside an already-masked section safe.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicBool, Ordering};

use lock_api::RawMutex;

use super::cpu::{disable_irqs, enable_irqs, irqs_disabled};

pub struct SpinNoIrq {
    lock: AtomicBool,
    saved_irq: UnsafeCell<bool>,
}

unsafe impl Sync for SpinNoIrq {}
unsafe impl Send for SpinNoIrq {}

unsafe impl RawMutex for SpinNoIrq {
    type GuardMarker = lock_api::GuardSend;
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self {
        lock: AtomicBool::new(false),
        saved_irq: UnsafeCell::new(false),
    };

    fn lock(&self) {
        let irq_enabled_before = !irqs_disabled();
        disable_irqs();
        while self
            .lock
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.lock.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        unsafe { *self.saved_irq.get() = irq_enabled_before };
    }

    fn try_lock(&self) -> bool {
        let irq_enabled_before = !irqs_disabled();
        disable_irqs();
        if self
            .lock
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
        {
            unsafe { *self.saved_irq.get() = irq_enabled_before };
            true
        } else {
            if irq_enabled_before {
                enable_irqs();
            }
            false
        }
    }

    unsafe fn unlock(&self) {
        let irq_enabled_before = unsafe { *self.saved_irq.get() };
        self.lock.store(false, Ordering::Release);
        if irq_enabled_before {
            enable_irqs();
        }
    }

    fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }
}

pub type Mutex<T> = lock_api::Mutex<SpinNoIrq, T>;
pub type MutexGuard<'a, T> = lock_api::MutexGuard<'a, SpinNoIrq, T>;

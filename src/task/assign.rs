//! Processor selection for ready units (multiprocessor only).

use super::task::CpuMask;

/// Picks the CPU a ready unit of `priority` should preempt.
///
/// `running[cpu]` is the priority of the unit running on `cpu`. Among the CPUs
/// in `affinity` whose running unit is strictly outranked, the one running the
/// lowest priority wins; ties go to the lowest index. `None` means no CPU can
/// be preempted and the unit stays in the unassigned pool.
pub fn select_cpu(running: &[u8], affinity: CpuMask, priority: u8) -> Option<usize> {
    running
        .iter()
        .enumerate()
        .filter(|&(cpu, &prio)| affinity.contains(cpu) && prio < priority)
        .min_by_key(|&(cpu, &prio)| (prio, cpu))
        .map(|(cpu, _)| cpu)
}

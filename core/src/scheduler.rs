//! Fixed-priority preemptive scheduler.
//!
//! One FIFO ready queue per priority level (0 = highest). The running
//! process is always the head of the highest non-empty queue. No real
//! register-frame context switch happens here — `schedule()` only
//! computes which process should run next; invoking an actual switch is
//! the board integration's job, same as the chip drivers.

use alloc::collections::VecDeque;

use crate::config::PRIORITY_LEVELS;
use crate::process::ProcessHandle;

pub struct Scheduler {
    ready: [VecDeque<ProcessHandle>; PRIORITY_LEVELS],
    current: Option<ProcessHandle>,
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { ready: core::array::from_fn(|_| VecDeque::new()), current: None }
    }

    pub fn current(&self) -> Option<ProcessHandle> {
        self.current
    }

    pub fn set_current(&mut self, handle: Option<ProcessHandle>) {
        self.current = handle;
    }

    /// Makes `handle` ready to run at `priority`. Preemption point: the
    /// caller should re-derive `schedule()` afterward to see if this
    /// made a higher-priority process runnable.
    pub fn make_ready(&mut self, handle: ProcessHandle, priority: u8) {
        self.ready[priority as usize].push_back(handle);
    }

    /// Removes `handle` from the ready queue at `priority` (e.g. it was
    /// picked to run, or it is being destroyed while still queued).
    pub fn remove_ready(&mut self, handle: ProcessHandle, priority: u8) {
        self.ready[priority as usize].retain(|&h| h != handle);
    }

    /// Removes `handle` from whatever ready queue it is currently in,
    /// regardless of priority — used when a process is destroyed and
    /// its last-known priority bucket is not at hand.
    pub fn remove_ready_any(&mut self, handle: ProcessHandle) {
        for queue in self.ready.iter_mut() {
            queue.retain(|&h| h != handle);
        }
    }

    /// The highest-priority ready process and its priority level,
    /// without removing it.
    pub fn highest_ready(&self) -> Option<(ProcessHandle, u8)> {
        for (priority, queue) in self.ready.iter().enumerate() {
            if let Some(&handle) = queue.front() {
                return Some((handle, priority as u8));
            }
        }
        None
    }

    /// Selects the next process to run: the highest-priority ready
    /// process, popped from its queue and installed as current. Returns
    /// `None` if nothing is ready (the idle condition).
    pub fn schedule(&mut self) -> Option<ProcessHandle> {
        for queue in self.ready.iter_mut() {
            if let Some(handle) = queue.pop_front() {
                self.current = Some(handle);
                return Some(handle);
            }
        }
        self.current = None;
        None
    }

    /// True if some ready process at or above `priority` precedes
    /// `than_priority` — i.e. whether a process at `than_priority` would
    /// be preempted right now.
    pub fn has_higher_priority_ready(&self, than_priority: u8) -> bool {
        matches!(self.highest_ready(), Some((_, p)) if p < than_priority)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_picks_highest_priority_first() {
        let mut sched = Scheduler::new();
        let low = ProcessHandle::new(1);
        let high = ProcessHandle::new(2);
        sched.make_ready(low, 10);
        sched.make_ready(high, 0);
        assert_eq!(sched.schedule(), Some(high));
        assert_eq!(sched.schedule(), Some(low));
        assert_eq!(sched.schedule(), None);
    }

    #[test]
    fn fifo_within_priority_level() {
        let mut sched = Scheduler::new();
        let a = ProcessHandle::new(1);
        let b = ProcessHandle::new(2);
        sched.make_ready(a, 5);
        sched.make_ready(b, 5);
        assert_eq!(sched.schedule(), Some(a));
        assert_eq!(sched.schedule(), Some(b));
    }
}

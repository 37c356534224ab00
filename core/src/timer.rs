//! HPET-backed timer service.
//!
//! A binary-heap-ordered set of pending absolute timers; the
//! (simulated) hardware timer is conceptually programmed to the
//! earliest key. Cancelled or rescheduled timers leave a stale heap
//! entry behind, tagged with the epoch it was armed under; `advance`
//! discards any popped entry whose epoch no longer matches the live
//! timer, rather than doing a linear heap removal.

use alloc::collections::BinaryHeap;
use alloc::vec::Vec;
use core::cmp::Reverse;

use rexos_abi::ErrorCode;
use rexos_abi::handle::Handle;
use rexos_abi::ipc::Process as ProcessTag;

pub struct TimerTag;
pub type TimerHandle = Handle<TimerTag>;
pub type ProcessHandle = Handle<ProcessTag>;

const US_PER_SEC: u64 = 1_000_000;

struct Timer {
    owner: ProcessHandle,
    subsystem: u8,
    deadline_us: u64,
    epoch: u32,
    active: bool,
}

pub struct TimerService {
    uptime_us: u64,
    timers: Vec<Option<Timer>>,
    free_list: Vec<u32>,
    heap: BinaryHeap<Reverse<(u64, u32, u32)>>,
}

impl TimerService {
    pub fn new() -> Self {
        TimerService { uptime_us: 0, timers: Vec::new(), free_list: Vec::new(), heap: BinaryHeap::new() }
    }

    pub fn get_uptime(&self) -> (u64, u32) {
        (self.uptime_us / US_PER_SEC, (self.uptime_us % US_PER_SEC) as u32)
    }

    pub fn uptime_us(&self) -> u64 {
        self.uptime_us
    }

    pub fn create(&mut self, owner: ProcessHandle, subsystem: u8) -> TimerHandle {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.timers.len() as u32;
            self.timers.push(None);
            index
        };
        self.timers[index as usize] =
            Some(Timer { owner, subsystem, deadline_us: 0, epoch: 0, active: false });
        TimerHandle::new(index)
    }

    pub fn start_ms(&mut self, handle: TimerHandle, ms: u64) -> Result<(), ErrorCode> {
        let index = handle.index() as usize;
        let Some(Some(timer)) = self.timers.get_mut(index) else {
            return Err(ErrorCode::NotFound);
        };
        timer.epoch = timer.epoch.wrapping_add(1);
        timer.deadline_us = self.uptime_us + ms.saturating_mul(1000);
        timer.active = true;
        self.heap.push(Reverse((timer.deadline_us, handle.index(), timer.epoch)));
        Ok(())
    }

    pub fn destroy(&mut self, handle: TimerHandle) -> bool {
        let index = handle.index() as usize;
        let Some(slot) = self.timers.get_mut(index) else { return false };
        if slot.is_none() {
            return false;
        }
        *slot = None;
        self.free_list.push(handle.index());
        true
    }

    /// Returns the next armed deadline, in absolute microseconds, if any.
    pub fn earliest_deadline(&mut self) -> Option<u64> {
        loop {
            let Reverse((deadline, index, epoch)) = *self.heap.peek()?;
            match &self.timers[index as usize] {
                Some(timer) if timer.active && timer.epoch == epoch => return Some(deadline),
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    /// Advances uptime to `to_us` (must be >= current uptime) and fires
    /// every timer whose deadline has passed, returning
    /// `(owner, subsystem, handle)` for each so the caller can post
    /// `IPC_TIMEOUT`.
    pub fn advance(&mut self, to_us: u64) -> Vec<(ProcessHandle, u8, TimerHandle)> {
        self.uptime_us = to_us.max(self.uptime_us);
        let mut fired = Vec::new();
        while let Some(&Reverse((deadline, index, epoch))) = self.heap.peek() {
            if deadline > self.uptime_us {
                break;
            }
            self.heap.pop();
            if let Some(timer) = &mut self.timers[index as usize]
                && timer.active
                && timer.epoch == epoch
            {
                timer.active = false;
                fired.push((timer.owner, timer.subsystem, TimerHandle::new(index)));
            }
        }
        fired
    }
}

impl Default for TimerService {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_in_deadline_order() {
        let mut timers = TimerService::new();
        let owner = ProcessHandle::new(0);
        let a = timers.create(owner, 1);
        let b = timers.create(owner, 1);
        timers.start_ms(b, 10).unwrap();
        timers.start_ms(a, 5).unwrap();
        let fired = timers.advance(20_000);
        assert_eq!(fired.len(), 2);
        assert_eq!(fired[0].2, a);
        assert_eq!(fired[1].2, b);
    }

    #[test]
    fn rescheduling_invalidates_the_stale_heap_entry() {
        let mut timers = TimerService::new();
        let owner = ProcessHandle::new(0);
        let t = timers.create(owner, 1);
        timers.start_ms(t, 5).unwrap();
        timers.start_ms(t, 50).unwrap();
        let fired = timers.advance(10_000);
        assert!(fired.is_empty());
        let fired = timers.advance(60_000);
        assert_eq!(fired.len(), 1);
    }

    #[test]
    fn destroy_cancels_without_firing() {
        let mut timers = TimerService::new();
        let owner = ProcessHandle::new(0);
        let t = timers.create(owner, 1);
        timers.start_ms(t, 5).unwrap();
        assert!(timers.destroy(t));
        let fired = timers.advance(100_000);
        assert!(fired.is_empty());
    }
}

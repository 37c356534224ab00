//! Process control blocks and the process table.
//!
//! A process is created frozen, transitions to active on explicit
//! unfreeze, and is destroyed explicitly or on unhandled fatal error.
//! Its IPC queue is owned exclusively by the process; references it
//! holds to sync objects while waiting are non-owning.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use rexos_abi::ErrorCode;
use rexos_abi::handle::Handle;
use rexos_abi::ipc::{Message, Process as ProcessTag};

use crate::timer::TimerHandle;

pub type ProcessHandle = Handle<ProcessTag>;

/// What kind of sync object a waiting process is blocked on. Crossed
/// with the waiting/timer-armed mode bits to produce the five named
/// process states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncKind {
    None,
    Mutex,
    Event,
    Sem,
    Ipc,
    Stream,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessState {
    Frozen,
    Active,
    WaitingTimerOnly,
    WaitingOnSync(SyncKind),
    WaitingFrozen,
}

pub struct Process {
    pub handle: ProcessHandle,
    pub base_priority: u8,
    /// Possibly raised above `base_priority` (numerically lower) by
    /// priority inheritance while this process owns a contended mutex.
    pub effective_priority: u8,
    pub state: ProcessState,
    pub last_error: ErrorCode,
    pub ipc_queue: VecDeque<Message>,
    pub ipc_capacity: usize,
    /// Raw indices of mutexes this process currently owns, used to
    /// recompute its effective priority when a mutex it owns gains or
    /// loses a waiter.
    pub owned_mutexes: Vec<u32>,
    /// Absolute (seconds, microseconds) wake time while waiting with a
    /// timer armed.
    pub wake_time: Option<(u64, u32)>,
    pub stdout_configured: bool,
    pub stdin_configured: bool,
    /// The timeout timer armed for the current suspension point, if the
    /// wait was given a finite timeout. Cleared on any wake, normal or
    /// timed out.
    pub wait_timer: Option<TimerHandle>,
    /// Raw index of the sync object (mutex/event/sem/stream) this
    /// process is parked on, so a fired timeout can find and remove the
    /// waiter entry from that object's waiter list.
    pub wait_object: Option<u32>,
    /// For a process parked in `post_wait`, the `(cmd, source)` pair a
    /// queued reply must match to satisfy the wait.
    pub wait_reply_match: Option<(u32, ProcessHandle)>,
}

impl Process {
    fn new(handle: ProcessHandle, base_priority: u8, ipc_capacity: usize) -> Self {
        Process {
            handle,
            base_priority,
            effective_priority: base_priority,
            state: ProcessState::Frozen,
            last_error: ErrorCode::Ok,
            ipc_queue: VecDeque::new(),
            ipc_capacity,
            owned_mutexes: Vec::new(),
            wake_time: None,
            stdout_configured: false,
            stdin_configured: false,
            wait_timer: None,
            wait_object: None,
            wait_reply_match: None,
        }
    }

    pub fn is_waiting(&self) -> bool {
        matches!(
            self.state,
            ProcessState::WaitingTimerOnly | ProcessState::WaitingOnSync(_) | ProcessState::WaitingFrozen
        )
    }
}

#[derive(Default)]
pub struct ProcessTable {
    slots: Vec<Option<Process>>,
    free_list: Vec<u32>,
}

impl ProcessTable {
    pub fn new() -> Self {
        ProcessTable { slots: Vec::new(), free_list: Vec::new() }
    }

    pub fn create(&mut self, base_priority: u8, ipc_capacity: usize) -> ProcessHandle {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            index
        };
        let handle = ProcessHandle::new(index);
        self.slots[index as usize] = Some(Process::new(handle, base_priority, ipc_capacity));
        handle
    }

    pub fn destroy(&mut self, handle: ProcessHandle) -> bool {
        let index = handle.index() as usize;
        if index >= self.slots.len() || self.slots[index].is_none() {
            return false;
        }
        self.slots[index] = None;
        self.free_list.push(handle.index());
        true
    }

    pub fn get(&self, handle: ProcessHandle) -> Option<&Process> {
        self.slots.get(handle.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: ProcessHandle) -> Option<&mut Process> {
        self.slots.get_mut(handle.index() as usize)?.as_mut()
    }

    pub fn effective_priority(&self, handle: ProcessHandle) -> u8 {
        self.get(handle).map(|p| p.effective_priority).unwrap_or(u8::MAX)
    }

    /// Recomputes `handle`'s effective priority from its base priority
    /// and the priorities of any waiters queued on mutexes it owns.
    /// `min_waiter_priority` supplies, for a given owned mutex index,
    /// the numerically-lowest (highest-effective) waiter priority, if
    /// any waiters remain.
    pub fn recompute_effective_priority(
        &mut self,
        handle: ProcessHandle,
        min_waiter_priority: impl Fn(u32) -> Option<u8>,
    ) {
        let Some(process) = self.get_mut(handle) else { return };
        let mut effective = process.base_priority;
        for &mutex_index in &process.owned_mutexes {
            if let Some(waiter_priority) = min_waiter_priority(mutex_index) {
                effective = effective.min(waiter_priority);
            }
        }
        process.effective_priority = effective;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_reuses_freed_slots() {
        let mut table = ProcessTable::new();
        let a = table.create(5, 16);
        table.destroy(a);
        let b = table.create(10, 16);
        assert_eq!(a.index(), b.index());
    }

    #[test]
    fn new_process_starts_frozen() {
        let mut table = ProcessTable::new();
        let h = table.create(5, 16);
        assert_eq!(table.get(h).unwrap().state, ProcessState::Frozen);
    }
}

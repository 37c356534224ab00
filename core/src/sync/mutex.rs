//! Mutex table.
//!
//! Holds only the data described in the data model — owner, waiter
//! list — plus the priority-inheritance bookkeeping that falls out of
//! it. The actual lock/unlock orchestration (which needs both the
//! process table, to compare and adjust priorities, and the scheduler,
//! to move processes between ready and waiting) lives in `kernel.rs`;
//! this module stays a plain table so it can be unit-tested without a
//! scheduler in the loop.

use alloc::vec::Vec;

use rexos_abi::handle::Handle;

use crate::process::ProcessHandle;

pub struct MutexTag;
pub type MutexHandle = Handle<MutexTag>;

pub struct Mutex {
    pub owner: Option<ProcessHandle>,
    pub waiters: Vec<ProcessHandle>,
}

impl Mutex {
    fn new() -> Self {
        Mutex { owner: None, waiters: Vec::new() }
    }
}

#[derive(Default)]
pub struct MutexTable {
    slots: Vec<Option<Mutex>>,
    free_list: Vec<u32>,
}

impl MutexTable {
    pub fn new() -> Self {
        MutexTable { slots: Vec::new(), free_list: Vec::new() }
    }

    pub fn create(&mut self) -> MutexHandle {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            index
        };
        self.slots[index as usize] = Some(Mutex::new());
        MutexHandle::new(index)
    }

    /// Removes the mutex, returning its waiters so the caller can wake
    /// them with `SyncObjectDestroyed`.
    pub fn destroy(&mut self, handle: MutexHandle) -> Option<Vec<ProcessHandle>> {
        let index = handle.index() as usize;
        let slot = self.slots.get_mut(index)?.take()?;
        self.free_list.push(handle.index());
        Some(slot.waiters)
    }

    pub fn get(&self, handle: MutexHandle) -> Option<&Mutex> {
        self.slots.get(handle.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: MutexHandle) -> Option<&mut Mutex> {
        self.slots.get_mut(handle.index() as usize)?.as_mut()
    }
}

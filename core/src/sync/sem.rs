//! Counting semaphore table: {nonnegative count, waiter list}.
//!
//! `signal` increments and wakes one waiter if any; `wait` decrements if
//! positive, else blocks. Wake orchestration lives in `kernel.rs`.

use alloc::vec::Vec;

use rexos_abi::handle::Handle;

use crate::process::ProcessHandle;

pub struct SemaphoreTag;
pub type SemaphoreHandle = Handle<SemaphoreTag>;

pub struct Semaphore {
    pub count: u32,
    pub waiters: Vec<ProcessHandle>,
}

impl Semaphore {
    fn new(initial: u32) -> Self {
        Semaphore { count: initial, waiters: Vec::new() }
    }
}

#[derive(Default)]
pub struct SemaphoreTable {
    slots: Vec<Option<Semaphore>>,
    free_list: Vec<u32>,
}

impl SemaphoreTable {
    pub fn new() -> Self {
        SemaphoreTable { slots: Vec::new(), free_list: Vec::new() }
    }

    pub fn create(&mut self, initial: u32) -> SemaphoreHandle {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            index
        };
        self.slots[index as usize] = Some(Semaphore::new(initial));
        SemaphoreHandle::new(index)
    }

    pub fn destroy(&mut self, handle: SemaphoreHandle) -> Option<Vec<ProcessHandle>> {
        let index = handle.index() as usize;
        let slot = self.slots.get_mut(index)?.take()?;
        self.free_list.push(handle.index());
        Some(slot.waiters)
    }

    pub fn get(&self, handle: SemaphoreHandle) -> Option<&Semaphore> {
        self.slots.get(handle.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: SemaphoreHandle) -> Option<&mut Semaphore> {
        self.slots.get_mut(handle.index() as usize)?.as_mut()
    }
}

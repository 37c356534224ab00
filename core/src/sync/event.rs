//! Event table: {set flag, waiter list}.
//!
//! `set` latches and wakes all waiters; `pulse` wakes all current
//! waiters without latching; `clear` resets the flag. As with the
//! mutex, this module holds only the data — waking a process is a
//! scheduler operation performed by `kernel.rs`.

use alloc::vec::Vec;

use rexos_abi::handle::Handle;

use crate::process::ProcessHandle;

pub struct EventTag;
pub type EventHandle = Handle<EventTag>;

pub struct Event {
    pub set: bool,
    pub waiters: Vec<ProcessHandle>,
}

impl Event {
    fn new() -> Self {
        Event { set: false, waiters: Vec::new() }
    }
}

#[derive(Default)]
pub struct EventTable {
    slots: Vec<Option<Event>>,
    free_list: Vec<u32>,
}

impl EventTable {
    pub fn new() -> Self {
        EventTable { slots: Vec::new(), free_list: Vec::new() }
    }

    pub fn create(&mut self) -> EventHandle {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            index
        };
        self.slots[index as usize] = Some(Event::new());
        EventHandle::new(index)
    }

    pub fn destroy(&mut self, handle: EventHandle) -> Option<Vec<ProcessHandle>> {
        let index = handle.index() as usize;
        let slot = self.slots.get_mut(index)?.take()?;
        self.free_list.push(handle.index());
        Some(slot.waiters)
    }

    pub fn get(&self, handle: EventHandle) -> Option<&Event> {
        self.slots.get(handle.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: EventHandle) -> Option<&mut Event> {
        self.slots.get_mut(handle.index() as usize)?.as_mut()
    }
}

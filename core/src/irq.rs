//! IRQ vector table.
//!
//! A small table maps vector -> (handler, cookie). Registration fails
//! with `ErrorCode::AlreadyConfigured` if the vector is occupied.
//! Handlers run with interrupts disabled and may only call
//! interrupt-safe primitive operations (`ipc_post_inline`, the
//! `io_complete`/`iio_complete` family, and timer operations) — never
//! anything that can block. Enforcing that is a caller discipline this
//! table does not (and, in a type system without effects, cannot)
//! check; it is documented at the call sites that matter.
//!
//! Grounded on `core/src/irq.rs`'s vector table shape, stripped of the
//! APIC/IDT wiring and trap-frame handoff that belong to a real
//! interrupt controller.

use rexos_abi::ErrorCode;

pub type IrqHandler = fn(vector: u8, cookie: u32);

#[derive(Clone, Copy)]
struct IrqEntry {
    handler: IrqHandler,
    cookie: u32,
}

pub struct IrqTable {
    entries: [Option<IrqEntry>; IrqTable::VECTOR_COUNT],
}

impl IrqTable {
    pub const VECTOR_COUNT: usize = 64;

    pub fn new() -> Self {
        IrqTable { entries: [None; Self::VECTOR_COUNT] }
    }

    pub fn register(&mut self, vector: u8, handler: IrqHandler, cookie: u32) -> Result<(), ErrorCode> {
        let slot = self.entries.get_mut(vector as usize).ok_or(ErrorCode::OutOfRange)?;
        if slot.is_some() {
            return Err(ErrorCode::AlreadyConfigured);
        }
        *slot = Some(IrqEntry { handler, cookie });
        Ok(())
    }

    pub fn unregister(&mut self, vector: u8) -> Result<(), ErrorCode> {
        let slot = self.entries.get_mut(vector as usize).ok_or(ErrorCode::OutOfRange)?;
        if slot.take().is_none() {
            return Err(ErrorCode::NotFound);
        }
        Ok(())
    }

    /// Invokes the handler registered for `vector`, if any.
    pub fn dispatch(&self, vector: u8) {
        if let Some(Some(entry)) = self.entries.get(vector as usize) {
            (entry.handler)(vector, entry.cookie);
        }
    }

    pub fn is_registered(&self, vector: u8) -> bool {
        matches!(self.entries.get(vector as usize), Some(Some(_)))
    }
}

impl Default for IrqTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static FIRED: AtomicU32 = AtomicU32::new(0);

    fn handler(_vector: u8, cookie: u32) {
        FIRED.store(cookie, Ordering::Relaxed);
    }

    #[test]
    fn register_fails_when_vector_occupied() {
        let mut table = IrqTable::new();
        table.register(4, handler, 1).unwrap();
        let err = table.register(4, handler, 2).unwrap_err();
        assert_eq!(err, ErrorCode::AlreadyConfigured);
    }

    #[test]
    fn dispatch_invokes_the_registered_handler() {
        let mut table = IrqTable::new();
        table.register(4, handler, 42).unwrap();
        table.dispatch(4);
        assert_eq!(FIRED.load(Ordering::Relaxed), 42);
    }

    #[test]
    fn unregister_frees_the_vector_for_reuse() {
        let mut table = IrqTable::new();
        table.register(4, handler, 1).unwrap();
        table.unregister(4).unwrap();
        table.register(4, handler, 2).unwrap();
    }
}

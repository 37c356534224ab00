//! Synchronization primitives: mutex (priority inheritance), event,
//! counting semaphore, and the byte-stream pipe.

pub mod event;
pub mod mutex;
pub mod sem;
pub mod stream;

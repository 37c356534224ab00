//! Generic, architecture-independent utilities shared by the kernel
//! primitive engine and the TCP connection engine.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod byte_ring;
pub mod klog;
pub mod lock;
pub mod waitqueue;

pub use byte_ring::ByteRing;
pub use klog::{KlogLevel, klog_get_level, klog_init, klog_is_enabled, klog_register_backend, klog_set_level};
pub use lock::{KernelLock, KernelLockGuard};
pub use waitqueue::WaitQueue;

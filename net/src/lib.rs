//! The TCP connection engine: a per-connection state machine implementing
//! the canonical transmission-control protocol, a listener table, and
//! segment acceptance/ack/MSS/urgent-data bookkeeping.
//!
//! Grounded on `drivers/src/net/tcp.rs` (wire format, checksum,
//! `TcpState`) generalized from a standalone protocol module into the
//! full per-connection state machine from `original_source/midware/tcpips/tcps.c`
//! (`tcps_rx`), plus its listener and TCB table management.

#![cfg_attr(not(test), no_std)]
extern crate alloc;

pub mod engine;
pub mod segment;
pub mod seq;
pub mod tcb;

pub use engine::{Engine, RxInput, TxSegment};
pub use tcb::{TcbHandle, TcpState};

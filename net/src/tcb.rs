//! Transmission control blocks, the TCB table, and the listener table.
//!
//! Grounded on `original_source/midware/tcpips/tcps.c`'s `TCP_TCB` and
//! the `so_*` TCB pool plus its `LISTEN_TCB`/port lookup. TCB identity
//! is the 4-tuple (remote_ip, remote_port, local_port); the implicit
//! local IP is out of scope (single interface, not modeled here).

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use rexos_abi::handle::Handle;
use rexos_core::process::ProcessHandle;

pub struct TcbTag;
pub type TcbHandle = Handle<TcbTag>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    LastAck,
    TimeWait,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tuple {
    pub remote_ip: [u8; 4],
    pub remote_port: u16,
    pub local_port: u16,
}

/// A user-posted receive request, parked until filled or completed early
/// by a PSH. Grounded on the `IO* rx` slot in `tcps_read`/`tcps_rx_otw_text`.
pub struct RxPosted {
    pub capacity: usize,
    pub data: Vec<u8>,
    pub psh: bool,
    pub urg_len: usize,
}

pub struct Tcb {
    pub owner: ProcessHandle,
    pub tuple: Tuple,
    pub state: TcpState,
    pub snd_una: u32,
    pub snd_nxt: u32,
    pub rcv_nxt: u32,
    pub mss: u16,
    pub rx_wnd: u16,
    pub tx_wnd: u16,
    pub active: bool,
    /// Set once a local FIN has been queued (in response to the peer's
    /// FIN), so a retransmitted FIN doesn't re-bump `snd_nxt`.
    pub fin: bool,
    /// Set while a user-posted write has outstanding bytes still to
    /// send or still unacked.
    pub transmitting: bool,
    /// Bytes handed to the engine by `Engine::write` not yet acked;
    /// `tx_sent` of them have already gone out at least once.
    pub tx_buffer: VecDeque<u8>,
    pub tx_sent: usize,
    /// The user-posted receive request, if one is currently parked.
    pub rx_posted: Option<RxPosted>,
    /// Overflow buffer for data that arrived with no posted receive (or
    /// that didn't fit in one), grounded on `tcb->rx_tmp`.
    pub rx_tmp: Vec<u8>,
    pub rx_tmp_psh: bool,
    /// Length of the urgent-data prefix of `rx_tmp`.
    pub rx_tmp_urg: usize,
}

impl Tcb {
    fn new(owner: ProcessHandle, tuple: Tuple) -> Self {
        Tcb {
            owner,
            tuple,
            state: TcpState::Closed,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            mss: crate::segment::TCP_MSS_MAX,
            rx_wnd: crate::segment::TCP_MSS_MAX,
            tx_wnd: 0,
            active: false,
            fin: false,
            transmitting: false,
            tx_buffer: VecDeque::new(),
            tx_sent: 0,
            rx_posted: None,
            rx_tmp: Vec::new(),
            rx_tmp_psh: false,
            rx_tmp_urg: 0,
        }
    }
}

#[derive(Default)]
pub struct TcbTable {
    slots: Vec<Option<Tcb>>,
    free_list: Vec<u32>,
}

impl TcbTable {
    pub fn new() -> Self {
        TcbTable { slots: Vec::new(), free_list: Vec::new() }
    }

    pub fn create(&mut self, owner: ProcessHandle, tuple: Tuple) -> TcbHandle {
        let index = if let Some(index) = self.free_list.pop() {
            index
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(None);
            index
        };
        self.slots[index as usize] = Some(Tcb::new(owner, tuple));
        TcbHandle::new(index)
    }

    pub fn destroy(&mut self, handle: TcbHandle) -> bool {
        let index = handle.index() as usize;
        if index >= self.slots.len() || self.slots[index].is_none() {
            return false;
        }
        self.slots[index] = None;
        self.free_list.push(handle.index());
        true
    }

    pub fn get(&self, handle: TcbHandle) -> Option<&Tcb> {
        self.slots.get(handle.index() as usize)?.as_ref()
    }

    pub fn get_mut(&mut self, handle: TcbHandle) -> Option<&mut Tcb> {
        self.slots.get_mut(handle.index() as usize)?.as_mut()
    }

    pub fn find(&self, tuple: &Tuple) -> Option<TcbHandle> {
        self.slots.iter().enumerate().find_map(|(i, slot)| {
            slot.as_ref().filter(|tcb| tcb.tuple == *tuple).map(|_| TcbHandle::new(i as u32))
        })
    }
}

/// port -> owning process. A listener port may match at most one entry.
#[derive(Default)]
pub struct ListenerTable {
    ports: Vec<(u16, ProcessHandle)>,
}

impl ListenerTable {
    pub fn new() -> Self {
        ListenerTable { ports: Vec::new() }
    }

    pub fn listen(&mut self, port: u16, process: ProcessHandle) -> bool {
        if self.ports.iter().any(|(p, _)| *p == port) {
            return false;
        }
        self.ports.push((port, process));
        true
    }

    pub fn unlisten(&mut self, port: u16) -> bool {
        let before = self.ports.len();
        self.ports.retain(|(p, _)| *p != port);
        self.ports.len() != before
    }

    pub fn find(&self, port: u16) -> Option<ProcessHandle> {
        self.ports.iter().find(|(p, _)| *p == port).map(|(_, process)| *process)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listener_port_accepts_only_one_entry() {
        let mut listeners = ListenerTable::new();
        let a = ProcessHandle::new(1);
        let b = ProcessHandle::new(2);
        assert!(listeners.listen(80, a));
        assert!(!listeners.listen(80, b));
        assert_eq!(listeners.find(80), Some(a));
    }

    #[test]
    fn tcb_table_finds_by_tuple() {
        let mut tcbs = TcbTable::new();
        let owner = ProcessHandle::new(1);
        let tuple = Tuple { remote_ip: [10, 0, 0, 2], remote_port: 4000, local_port: 80 };
        let handle = tcbs.create(owner, tuple);
        assert_eq!(tcbs.find(&tuple), Some(handle));
    }
}

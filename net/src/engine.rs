//! The TCP connection engine's receive path: `rx()` demultiplexes an
//! incoming segment to its TCB (creating one from a matching listener
//! if none exists), drives the state machine, and returns the outbound
//! segments to send, any ICMP parameter-problem signals, and any
//! user-posted receive buffers that completed.
//!
//! Grounded on `tcps_rx` and its `tcps_rx_{listen,closed,otw_*}` helpers
//! in `original_source/midware/tcpips/tcps.c`. `Engine::write`/
//! `post_receive` supplement `tcps_write`/`tcps_read`, which the
//! original left as `//TODO` stubs.

use alloc::vec::Vec;

use rexos_abi::ErrorCode;
use rexos_abi::ipc::{self as ipc_abi, Message};
use rexos_core::ipc;
use rexos_core::process::{ProcessHandle, ProcessTable};

use crate::segment::{self, MssOption, TcpFlags, TcpHeader, TCP_HEADER_LEN};
use crate::tcb::{ListenerTable, RxPosted, Tcb, TcbHandle, TcbTable, TcpState, Tuple};

pub struct RxInput<'a> {
    pub src_ip: [u8; 4],
    pub header: TcpHeader,
    /// Raw option bytes (the header's trailing `header_len() - 20`
    /// bytes), parsed for MSS on the SYN path.
    pub options: &'a [u8],
    pub payload: &'a [u8],
}

pub struct TxSegment {
    pub dst_ip: [u8; 4],
    pub header: TcpHeader,
    pub payload: Vec<u8>,
}

/// An out-of-range MSS option rejected by `apply_mss`, for a caller to
/// turn into an ICMP "parameter problem" message. ICMP itself is an
/// external collaborator this engine doesn't implement.
pub struct IcmpParameterProblem {
    pub dst_ip: [u8; 4],
    pub pointer: usize,
}

/// A user-posted receive request that was filled (fully, or early by a
/// PSH) while processing a segment.
pub struct RxCompletion {
    pub owner: ProcessHandle,
    pub handle: TcbHandle,
    pub data: Vec<u8>,
    pub psh: bool,
    pub urg_len: usize,
}

#[derive(Default)]
pub struct RxOutcome {
    pub tx: Vec<TxSegment>,
    pub mss_errors: Vec<IcmpParameterProblem>,
    pub completions: Vec<RxCompletion>,
}

pub struct Engine {
    pub tcbs: TcbTable,
    pub listeners: ListenerTable,
    local_ip: [u8; 4],
}

impl Engine {
    pub fn new(local_ip: [u8; 4]) -> Self {
        Engine { tcbs: TcbTable::new(), listeners: ListenerTable::new(), local_ip }
    }

    pub fn listen(&mut self, port: u16, process: ProcessHandle) -> Result<(), ErrorCode> {
        if self.listeners.listen(port, process) { Ok(()) } else { Err(ErrorCode::AlreadyConfigured) }
    }

    /// Outbound connect is left unimplemented by design; see the Open
    /// Questions this repository preserves from the original source.
    pub fn connect(&mut self) -> Result<TcbHandle, ErrorCode> {
        Err(ErrorCode::NotSupported)
    }

    /// Queues `data` for transmission and returns the segments the
    /// "Send" step (spec.md §4.9 item 6) produces for it right away.
    /// Left unimplemented in the original (`tcps_write` was a stub);
    /// required here since the spec does not list it as an open gap.
    pub fn write(&mut self, handle: TcbHandle, data: &[u8]) -> Result<Vec<TxSegment>, ErrorCode> {
        {
            let tcb = self.tcbs.get_mut(handle).ok_or(ErrorCode::NotFound)?;
            if tcb.state != TcpState::Established {
                return Err(ErrorCode::NotActive);
            }
            tcb.tx_buffer.extend(data.iter().copied());
            tcb.transmitting = true;
        }
        let mut out = Vec::new();
        self.send(handle, &mut out);
        Ok(out)
    }

    /// Posts a receive request: completes immediately from any data
    /// already buffered in `rx_tmp`, or parks as `rx_posted` to be
    /// filled by later segments. Grounded on the `IO* rx` slot in
    /// `tcps_read`/`tcps_rx_otw_text`.
    pub fn post_receive(&mut self, handle: TcbHandle, capacity: usize) -> Result<Option<RxCompletion>, ErrorCode> {
        let tcb = self.tcbs.get_mut(handle).ok_or(ErrorCode::NotFound)?;
        if tcb.rx_posted.is_some() {
            return Err(ErrorCode::InProgress);
        }
        if !tcb.rx_tmp.is_empty() {
            let take = capacity.min(tcb.rx_tmp.len());
            let data: Vec<u8> = tcb.rx_tmp.drain(..take).collect();
            let urg_len = tcb.rx_tmp_urg.min(take);
            tcb.rx_tmp_urg = tcb.rx_tmp_urg.saturating_sub(take);
            let psh = tcb.rx_tmp_psh && tcb.rx_tmp.is_empty();
            if tcb.rx_tmp.is_empty() {
                tcb.rx_tmp_psh = false;
            }
            Self::update_rx_wnd(tcb);
            return Ok(Some(RxCompletion { owner: tcb.owner, handle, data, psh, urg_len }));
        }
        tcb.rx_posted = Some(RxPosted { capacity, data: Vec::with_capacity(capacity), psh: false, urg_len: 0 });
        Ok(None)
    }

    fn tuple_for(header: &TcpHeader, src_ip: [u8; 4]) -> Tuple {
        Tuple { remote_ip: src_ip, remote_port: header.src_port, local_port: header.dst_port }
    }

    /// Returns `Some` with the ICMP parameter-problem signal an
    /// out-of-range MSS option produces; valid/absent options update (or
    /// leave unchanged) `tcb.mss` with no signal. Grounded on
    /// `tcps_set_mss`: out of range is rejected, not clamped.
    fn apply_mss(tcb: &mut Tcb, options: &[u8]) -> Option<IcmpParameterProblem> {
        match segment::parse_mss_option(options) {
            MssOption::Valid(mss) => {
                tcb.mss = mss;
                None
            }
            MssOption::OutOfRange { offset } => {
                Some(IcmpParameterProblem { dst_ip: tcb.tuple.remote_ip, pointer: TCP_HEADER_LEN + offset })
            }
            MssOption::Absent => None,
        }
    }

    /// `(uptime.sec % 17179) + (uptime.usec >> 2)`, matching
    /// `tcps_gen_isn` — a coarse clock-derived ISN, not a secure one
    /// (this engine has no cryptographic-suite goal).
    fn gen_isn(uptime_sec: u64, uptime_usec: u32) -> u32 {
        ((uptime_sec % 17179) as u32).wrapping_add(uptime_usec >> 2)
    }

    fn update_rx_wnd(tcb: &mut Tcb) {
        let free = segment::TCP_MSS_MAX.saturating_sub(tcb.rx_tmp.len() as u16);
        tcb.rx_wnd = free.min(segment::TCP_MSS_MAX);
    }

    fn make_ack(tcb: &Tcb, flags: TcpFlags) -> TcpHeader {
        TcpHeader {
            src_port: tcb.tuple.local_port,
            dst_port: tcb.tuple.remote_port,
            seq: tcb.snd_nxt,
            ack: tcb.rcv_nxt,
            data_offset: (TCP_HEADER_LEN / 4) as u8,
            flags,
            window: tcb.rx_wnd,
            checksum: 0,
            urgent_ptr: 0,
        }
    }

    fn make_rst(tuple: &Tuple, seq: u32, flags: TcpFlags) -> TcpHeader {
        TcpHeader {
            src_port: tuple.local_port,
            dst_port: tuple.remote_port,
            seq,
            ack: 0,
            data_offset: (TCP_HEADER_LEN / 4) as u8,
            flags,
            window: 0,
            checksum: 0,
            urgent_ptr: 0,
        }
    }

    /// Fills the header's advertised window from `tcb.rx_wnd` and
    /// computes its pseudo-header checksum, matching the uniform
    /// `tcps_tx`/`tcps_allocate_io` path every outbound segment goes
    /// through in the original.
    fn tx(local_ip: [u8; 4], tcb: &Tcb, header: TcpHeader, payload: Vec<u8>) -> TxSegment {
        let mut header = header;
        header.window = tcb.rx_wnd;
        Self::finish(local_ip, tcb.tuple.remote_ip, header, payload)
    }

    fn finish(local_ip: [u8; 4], dst_ip: [u8; 4], mut header: TcpHeader, payload: Vec<u8>) -> TxSegment {
        let mut buf = [0u8; TCP_HEADER_LEN];
        segment::write_header(&header, &mut buf).expect("fixed-size header always fits");
        let mut wire = Vec::with_capacity(TCP_HEADER_LEN + payload.len());
        wire.extend_from_slice(&buf);
        wire.extend_from_slice(&payload);
        header.checksum = segment::tcp_checksum(local_ip, dst_ip, &wire);
        TxSegment { dst_ip, header, payload }
    }

    /// Demultiplexes and processes one incoming segment, returning any
    /// outbound segments to send and posting IPC notifications to
    /// owning processes as a side effect.
    pub fn rx(
        &mut self,
        processes: &mut ProcessTable,
        uptime: (u64, u32),
        input: RxInput,
    ) -> RxOutcome {
        let tuple = Self::tuple_for(&input.header, input.src_ip);
        let mut outcome = RxOutcome::default();

        let handle = match self.tcbs.find(&tuple) {
            Some(h) => h,
            None => match self.listeners.find(tuple.local_port) {
                Some(owner) => {
                    let h = self.tcbs.create(owner, tuple);
                    self.tcbs.get_mut(h).unwrap().state = TcpState::Listen;
                    h
                }
                None => {
                    self.rx_closed(&tuple, &input.header, &mut outcome.tx);
                    return outcome;
                }
            },
        };

        self.tcbs.get_mut(handle).unwrap().tx_wnd = input.header.window;

        match self.tcbs.get(handle).unwrap().state {
            TcpState::Listen => self.rx_listen(processes, handle, &input, uptime, &mut outcome),
            _ => self.rx_otw(processes, handle, &input, &mut outcome),
        }

        outcome
    }

    fn rx_closed(&mut self, tuple: &Tuple, header: &TcpHeader, out: &mut Vec<TxSegment>) {
        if header.flags.contains(TcpFlags::RST) {
            return;
        }
        let local_ip = self.local_ip;
        if header.flags.contains(TcpFlags::ACK) {
            out.push(Self::finish(local_ip, tuple.remote_ip, Self::make_rst(tuple, header.ack, TcpFlags::RST), Vec::new()));
        } else {
            let seg_len = header.seg_len(0);
            let reset = Self::make_rst(tuple, 0, TcpFlags::RST | TcpFlags::ACK).tap_ack(header.seq.wrapping_add(seg_len));
            out.push(Self::finish(local_ip, tuple.remote_ip, reset, Vec::new()));
        }
    }

    fn rx_listen(
        &mut self,
        processes: &mut ProcessTable,
        handle: TcbHandle,
        input: &RxInput,
        uptime: (u64, u32),
        outcome: &mut RxOutcome,
    ) {
        let header = &input.header;
        let local_ip = self.local_ip;
        if header.flags.contains(TcpFlags::RST) {
            return;
        }
        if header.flags.contains(TcpFlags::ACK) {
            let tcb = self.tcbs.get(handle).unwrap();
            let reset = Self::tx(local_ip, tcb, Self::make_rst(&tcb.tuple, header.ack, TcpFlags::RST), Vec::new());
            outcome.tx.push(reset);
            self.tcbs.destroy(handle);
            return;
        }
        if !header.flags.contains(TcpFlags::SYN) {
            self.tcbs.destroy(handle);
            return;
        }

        let tcb = self.tcbs.get_mut(handle).unwrap();
        if let Some(problem) = Self::apply_mss(tcb, input.options) {
            outcome.mss_errors.push(problem);
        }
        tcb.state = TcpState::SynReceived;
        tcb.rcv_nxt = header.seq.wrapping_add(1);
        let isn = Self::gen_isn(uptime.0, uptime.1);
        tcb.snd_una = isn;
        tcb.snd_nxt = isn.wrapping_add(1);
        Self::update_rx_wnd(tcb);
        let syn_ack = Self::make_ack(tcb, TcpFlags::SYN | TcpFlags::ACK);
        let segment = Self::tx(local_ip, tcb, syn_ack, Vec::new());
        let _ = processes;
        outcome.tx.push(segment);
    }

    fn rx_otw(&mut self, processes: &mut ProcessTable, handle: TcbHandle, input: &RxInput, outcome: &mut RxOutcome) {
        let local_ip = self.local_ip;
        let tcb = self.tcbs.get(handle).unwrap();
        let Some((header, data_start, data_len)) =
            Self::otw_check_seq(local_ip, tcb, &input.header, input.payload.len(), &mut outcome.tx)
        else {
            return;
        };
        let payload = &input.payload[data_start..data_start + data_len];

        if header.flags.contains(TcpFlags::RST) || header.flags.contains(TcpFlags::SYN) {
            self.notify_abort(processes, handle);
            self.tcbs.destroy(handle);
            return;
        }

        if header.flags.contains(TcpFlags::ACK) && !self.otw_ack(processes, handle, &header, outcome) {
            return;
        }

        self.otw_text_and_fin(processes, handle, &header, payload, outcome);
        for completion in &outcome.completions {
            let msg = Message::new(completion.owner, ipc_abi::hal_cmd(ipc_abi::HAL_TCP, ipc_abi::IPC_READ), completion.owner)
                .with_params(handle.index(), completion.data.len() as u32, completion.urg_len as u32);
            let _ = ipc::post(processes, msg);
        }
        self.send(handle, &mut outcome.tx);
    }

    /// Applies spec.md §4.9 item 1: drops duplicates outright, strips
    /// already-received overlap (a retransmitted SYN consumes its
    /// virtual byte first), truncates anything beyond the receive
    /// window (dropping FIN and PSH if truncation reaches them), and
    /// otherwise acks the expected sequence and drops what's still
    /// misaligned. Grounded on `tcps_rx_otw_check_seq`.
    fn otw_check_seq(
        local_ip: [u8; 4],
        tcb: &Tcb,
        header: &TcpHeader,
        payload_len: usize,
        out: &mut Vec<TxSegment>,
    ) -> Option<(TcpHeader, usize, usize)> {
        let mut flags = header.flags;
        let mut seq = header.seq;
        let mut data_start: i64 = 0;
        let mut data_len: i64 = payload_len as i64;

        let delta = crate::seq::diff(tcb.rcv_nxt, seq) as i64;
        if delta < 0 {
            let seg_len = data_len + flags.contains(TcpFlags::SYN) as i64 + flags.contains(TcpFlags::FIN) as i64;
            if seg_len + delta <= 0 {
                return None;
            }
            let mut overlap = -delta;
            if flags.contains(TcpFlags::SYN) {
                flags.remove(TcpFlags::SYN);
                overlap -= 1;
                seq = seq.wrapping_add(1);
            }
            if overlap > 0 {
                data_start += overlap;
                data_len -= overlap;
                seq = seq.wrapping_add(overlap as u32);
            }
        }

        let rx_wnd = tcb.rx_wnd as i64;
        let syn_bit = flags.contains(TcpFlags::SYN) as i64;
        let seg_len = data_len + syn_bit + flags.contains(TcpFlags::FIN) as i64;
        if seg_len > rx_wnd && rx_wnd > 0 {
            flags.remove(TcpFlags::FIN);
            flags.remove(TcpFlags::PSH);
            data_len = data_len.min((rx_wnd - syn_bit).max(0));
        }
        let seg_len = data_len + flags.contains(TcpFlags::SYN) as i64 + flags.contains(TcpFlags::FIN) as i64;

        if seq != tcb.rcv_nxt || seg_len > rx_wnd {
            if flags.contains(TcpFlags::RST) {
                return None;
            }
            let ack = Self::tx(local_ip, tcb, Self::make_ack(tcb, TcpFlags::ACK).tap_seq(tcb.snd_una), Vec::new());
            out.push(ack);
            return None;
        }

        let mut adjusted = *header;
        adjusted.seq = seq;
        adjusted.flags = flags;
        Some((adjusted, data_start.max(0) as usize, data_len.max(0) as usize))
    }

    /// Applies spec.md §4.9 item 3. Grounded on `tcps_rx_otw_ack`.
    fn otw_ack(&mut self, processes: &mut ProcessTable, handle: TcbHandle, header: &TcpHeader, outcome: &mut RxOutcome) -> bool {
        let local_ip = self.local_ip;
        let tcb = self.tcbs.get_mut(handle).unwrap();
        let span = crate::seq::diff(tcb.snd_una, tcb.snd_nxt);
        let ack_diff = crate::seq::diff(tcb.snd_una, header.ack);

        if tcb.state == TcpState::SynReceived {
            if ack_diff >= 0 && ack_diff <= span {
                tcb.state = TcpState::Established;
                tcb.snd_una = header.ack;
                let owner = tcb.owner;
                let remote_ip_u32 = u32::from_be_bytes(tcb.tuple.remote_ip);
                let msg = Message::new(owner, ipc_abi::hal_cmd(ipc_abi::HAL_TCP, ipc_abi::IPC_OPEN), owner)
                    .with_params(handle.index(), remote_ip_u32, 0);
                let _ = ipc::post(processes, msg);
                return true;
            } else {
                let reset = Self::tx(local_ip, tcb, Self::make_rst(&tcb.tuple, header.ack, TcpFlags::RST), Vec::new());
                outcome.tx.push(reset);
                self.tcbs.destroy(handle);
                return false;
            }
        }

        if ack_diff > span {
            let ack = Self::tx(local_ip, tcb, Self::make_ack(tcb, TcpFlags::ACK), Vec::new());
            outcome.tx.push(ack);
            return false;
        }

        if ack_diff > 0 {
            let acked = ack_diff as u32;
            tcb.snd_una = tcb.snd_una.wrapping_add(acked);
            let drain = (acked as usize).min(tcb.tx_sent);
            for _ in 0..drain {
                tcb.tx_buffer.pop_front();
            }
            tcb.tx_sent -= drain;
        }

        match tcb.state {
            TcpState::FinWait1 if tcb.snd_nxt == tcb.snd_una => tcb.state = TcpState::FinWait2,
            TcpState::Closing if tcb.snd_nxt == tcb.snd_una => tcb.state = TcpState::TimeWait,
            TcpState::LastAck if tcb.snd_nxt == tcb.snd_una => {
                self.tcbs.destroy(handle);
                return false;
            }
            _ => {}
        }
        true
    }

    fn otw_text_and_fin(
        &mut self,
        processes: &mut ProcessTable,
        handle: TcbHandle,
        header: &TcpHeader,
        payload: &[u8],
        outcome: &mut RxOutcome,
    ) {
        let Some(tcb) = self.tcbs.get_mut(handle) else { return };
        if !matches!(tcb.state, TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2) {
            return;
        }
        if !payload.is_empty() {
            let urg = if header.flags.contains(TcpFlags::URG) {
                (header.urgent_ptr as usize).min(payload.len())
            } else {
                0
            };
            let psh = header.flags.contains(TcpFlags::PSH);
            Self::deliver(tcb, handle, payload, psh, urg, outcome);
            tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(payload.len() as u32);
            Self::update_rx_wnd(tcb);
        }
        if header.flags.contains(TcpFlags::FIN) {
            tcb.rcv_nxt = tcb.rcv_nxt.wrapping_add(1);
            if !tcb.fin {
                tcb.fin = true;
                tcb.snd_nxt = tcb.snd_nxt.wrapping_add(1);
            }
            let owner = tcb.owner;
            tcb.state = match tcb.state {
                TcpState::Established => TcpState::LastAck,
                TcpState::FinWait1 if tcb.snd_una == tcb.snd_nxt => TcpState::TimeWait,
                TcpState::FinWait1 => TcpState::Closing,
                TcpState::FinWait2 => TcpState::TimeWait,
                other => other,
            };
            let msg = Message::new(owner, ipc_abi::hal_cmd(ipc_abi::HAL_TCP, ipc_abi::IPC_CLOSE), owner)
                .with_params(handle.index(), 0, 0);
            let _ = ipc::post(processes, msg);
        }
    }

    /// Fills the posted receive buffer first (if any), completing it
    /// when full or when `psh` marks end-of-record; anything left over
    /// spills into `rx_tmp`, with new urgent bytes inserted right after
    /// any urgent span already buffered there. Grounded on
    /// `tcps_rx_otw_text`.
    fn deliver(tcb: &mut Tcb, handle: TcbHandle, payload: &[u8], psh: bool, urg: usize, outcome: &mut RxOutcome) {
        let mut offset = 0;
        let mut remaining_urg = urg;

        if let Some(posted) = tcb.rx_posted.as_mut() {
            let free = posted.capacity - posted.data.len();
            let take = free.min(payload.len());
            posted.data.extend_from_slice(&payload[..take]);
            posted.urg_len += remaining_urg.min(take);
            remaining_urg = remaining_urg.saturating_sub(take);
            offset = take;
            let filled = posted.data.len() == posted.capacity;
            let end_of_record = psh && offset == payload.len();
            if filled || end_of_record {
                posted.psh = posted.psh || end_of_record;
                let done = tcb.rx_posted.take().unwrap();
                outcome.completions.push(RxCompletion {
                    owner: tcb.owner,
                    handle,
                    data: done.data,
                    psh: done.psh,
                    urg_len: done.urg_len,
                });
            }
        }

        let spill = &payload[offset..];
        if spill.is_empty() {
            return;
        }
        let insert_at = tcb.rx_tmp_urg.min(tcb.rx_tmp.len());
        tcb.rx_tmp.splice(insert_at..insert_at, spill.iter().copied());
        tcb.rx_tmp_urg += remaining_urg;
        tcb.rx_tmp_psh = tcb.rx_tmp_psh || psh;
    }

    /// Applies spec.md §4.9 item 6: if ESTABLISHED with nothing left to
    /// transmit and no FIN pending, clear `transmitting` and do
    /// nothing; otherwise emit an ACK (with FIN once `fin` is set and
    /// still unacked) carrying whatever of the transmit buffer fits the
    /// peer's window and MSS. Grounded on `tcps_rx_send`/
    /// `tcps_tx_text_ack_fin`.
    fn send(&mut self, handle: TcbHandle, out: &mut Vec<TxSegment>) {
        let local_ip = self.local_ip;
        let Some(tcb) = self.tcbs.get_mut(handle) else { return };
        if tcb.state == TcpState::Established && tcb.tx_buffer.is_empty() && !tcb.fin {
            tcb.transmitting = false;
            return;
        }

        let pending = tcb.tx_buffer.len() - tcb.tx_sent;
        let can_send = pending.min(tcb.tx_wnd as usize).min(tcb.mss as usize);
        let chunk: Vec<u8> = tcb.tx_buffer.iter().skip(tcb.tx_sent).take(can_send).copied().collect();

        let mut flags = TcpFlags::ACK;
        if tcb.fin && tcb.snd_una != tcb.snd_nxt {
            flags |= TcpFlags::FIN;
        }
        let header = Self::make_ack(tcb, flags);
        tcb.tx_sent += chunk.len();
        tcb.snd_nxt = tcb.snd_nxt.wrapping_add(chunk.len() as u32);

        let segment = Self::tx(local_ip, tcb, header, chunk);
        out.push(segment);
    }

    fn notify_abort(&mut self, processes: &mut ProcessTable, handle: TcbHandle) {
        let Some(tcb) = self.tcbs.get(handle) else { return };
        if matches!(tcb.state, TcpState::Established | TcpState::FinWait1 | TcpState::FinWait2 | TcpState::SynReceived) {
            let owner = tcb.owner;
            let msg = Message::new(owner, ipc_abi::hal_cmd(ipc_abi::HAL_TCP, ipc_abi::IPC_CLOSE), owner)
                .with_params(handle.index(), 1, 0);
            let _ = ipc::post(processes, msg);
        }
    }
}

trait HeaderTap {
    fn tap_seq(self, seq: u32) -> Self;
    fn tap_ack(self, ack: u32) -> Self;
}

impl HeaderTap for TcpHeader {
    fn tap_seq(mut self, seq: u32) -> Self {
        self.seq = seq;
        self
    }
    fn tap_ack(mut self, ack: u32) -> Self {
        self.ack = ack;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rexos_core::process::ProcessTable;

    const LOCAL_IP: [u8; 4] = [10, 0, 0, 1];

    fn syn_segment(seq: u32, dst_port: u16) -> RxInput<'static> {
        RxInput {
            src_ip: [10, 0, 0, 2],
            header: TcpHeader {
                src_port: 4000,
                dst_port,
                seq,
                ack: 0,
                data_offset: 5,
                flags: TcpFlags::SYN,
                window: 8192,
                checksum: 0,
                urgent_ptr: 0,
            },
            options: &[],
            payload: &[],
        }
    }

    #[test]
    fn syn_handshake_on_listener() {
        let mut engine = Engine::new(LOCAL_IP);
        let mut processes = ProcessTable::new();
        let listener = processes.create(5, 4);
        engine.listen(80, listener).unwrap();

        let out = engine.rx(&mut processes, (0, 0), syn_segment(1000, 80));
        assert_eq!(out.tx.len(), 1);
        assert!(out.tx[0].header.flags.contains(TcpFlags::SYN | TcpFlags::ACK));
        assert_eq!(out.tx[0].header.ack, 1001);

        let tuple = Tuple { remote_ip: [10, 0, 0, 2], remote_port: 4000, local_port: 80 };
        let handle = engine.tcbs.find(&tuple).unwrap();
        assert_eq!(engine.tcbs.get(handle).unwrap().state, TcpState::SynReceived);
        let isn = engine.tcbs.get(handle).unwrap().snd_una;

        let ack_input = RxInput {
            src_ip: [10, 0, 0, 2],
            header: TcpHeader {
                src_port: 4000,
                dst_port: 80,
                seq: 1001,
                ack: isn.wrapping_add(1),
                data_offset: 5,
                flags: TcpFlags::ACK,
                window: 8192,
                checksum: 0,
                urgent_ptr: 0,
            },
            options: &[],
            payload: &[],
        };
        let out = engine.rx(&mut processes, (0, 0), ack_input);
        assert!(out.tx.is_empty());
        assert_eq!(engine.tcbs.get(handle).unwrap().state, TcpState::Established);

        let msg = ipc::try_receive(&mut processes, listener).unwrap();
        assert_eq!(msg.cmd, ipc_abi::hal_cmd(ipc_abi::HAL_TCP, ipc_abi::IPC_OPEN));
        assert_eq!(msg.param1, handle.index());
        assert_eq!(msg.param2, 0x0A000002);
    }

    #[test]
    fn fin_from_established_transitions_to_last_ack() {
        let mut engine = Engine::new(LOCAL_IP);
        let mut processes = ProcessTable::new();
        let listener = processes.create(5, 4);
        engine.listen(80, listener).unwrap();
        engine.rx(&mut processes, (0, 0), syn_segment(1000, 80));
        let tuple = Tuple { remote_ip: [10, 0, 0, 2], remote_port: 4000, local_port: 80 };
        let handle = engine.tcbs.find(&tuple).unwrap();
        let isn = engine.tcbs.get(handle).unwrap().snd_una;
        engine.rx(
            &mut processes,
            (0, 0),
            RxInput {
                src_ip: [10, 0, 0, 2],
                header: TcpHeader {
                    src_port: 4000,
                    dst_port: 80,
                    seq: 1001,
                    ack: isn.wrapping_add(1),
                    data_offset: 5,
                    flags: TcpFlags::ACK,
                    window: 8192,
                    checksum: 0,
                    urgent_ptr: 0,
                },
                options: &[],
                payload: &[],
            },
        );

        let out = engine.rx(
            &mut processes,
            (0, 0),
            RxInput {
                src_ip: [10, 0, 0, 2],
                header: TcpHeader {
                    src_port: 4000,
                    dst_port: 80,
                    seq: 1001,
                    ack: isn.wrapping_add(1),
                    data_offset: 5,
                    flags: TcpFlags::FIN | TcpFlags::ACK,
                    window: 8192,
                    checksum: 0,
                    urgent_ptr: 0,
                },
                options: &[],
                payload: &[],
            },
        );
        assert_eq!(engine.tcbs.get(handle).unwrap().state, TcpState::LastAck);
        assert_eq!(engine.tcbs.get(handle).unwrap().rcv_nxt, 1002);
        assert!(out.tx.iter().any(|seg| seg.header.flags.contains(TcpFlags::FIN)));

        let _open = ipc::try_receive(&mut processes, listener).unwrap();
        let msg = ipc::try_receive(&mut processes, listener).unwrap();
        assert_eq!(msg.cmd, ipc_abi::hal_cmd(ipc_abi::HAL_TCP, ipc_abi::IPC_CLOSE));
    }

    #[test]
    fn out_of_window_segment_is_dropped() {
        let mut engine = Engine::new(LOCAL_IP);
        let mut processes = ProcessTable::new();
        let owner = processes.create(5, 4);
        let tuple = Tuple { remote_ip: [10, 0, 0, 2], remote_port: 4000, local_port: 80 };
        let handle = engine.tcbs.create(owner, tuple);
        {
            let tcb = engine.tcbs.get_mut(handle).unwrap();
            tcb.state = TcpState::Established;
            tcb.rcv_nxt = 1000;
            tcb.rx_wnd = 100;
            tcb.snd_una = 5000;
            tcb.snd_nxt = 5000;
        }

        let out = engine.rx(
            &mut processes,
            (0, 0),
            RxInput {
                src_ip: [10, 0, 0, 2],
                header: TcpHeader {
                    src_port: 4000,
                    dst_port: 80,
                    seq: 1500,
                    ack: 5000,
                    data_offset: 5,
                    flags: TcpFlags::ACK,
                    window: 8192,
                    checksum: 0,
                    urgent_ptr: 0,
                },
                options: &[],
                payload: &[0u8; 50],
            },
        );
        assert_eq!(out.tx.len(), 1);
        assert_eq!(out.tx[0].header.seq, 5000);
        assert_eq!(out.tx[0].header.ack, 1000);
        assert_eq!(engine.tcbs.get(handle).unwrap().rcv_nxt, 1000);
    }

    #[test]
    fn overlapping_retransmit_is_stripped_to_new_bytes_only() {
        let mut engine = Engine::new(LOCAL_IP);
        let mut processes = ProcessTable::new();
        let owner = processes.create(5, 4);
        let tuple = Tuple { remote_ip: [10, 0, 0, 2], remote_port: 4000, local_port: 80 };
        let handle = engine.tcbs.create(owner, tuple);
        {
            let tcb = engine.tcbs.get_mut(handle).unwrap();
            tcb.state = TcpState::Established;
            tcb.rcv_nxt = 1000;
            tcb.rx_wnd = 1000;
            tcb.snd_una = 5000;
            tcb.snd_nxt = 5000;
        }
        engine.post_receive(handle, 10).unwrap();

        // seq=995 overlaps the first 5 bytes already accounted for.
        let mut payload = Vec::new();
        payload.extend_from_slice(b"XXXXXhello");
        let out = engine.rx(
            &mut processes,
            (0, 0),
            RxInput {
                src_ip: [10, 0, 0, 2],
                header: TcpHeader {
                    src_port: 4000,
                    dst_port: 80,
                    seq: 995,
                    ack: 5000,
                    data_offset: 5,
                    flags: TcpFlags::ACK | TcpFlags::PSH,
                    window: 8192,
                    checksum: 0,
                    urgent_ptr: 0,
                },
                options: &[],
                payload: &payload,
            },
        );
        assert_eq!(engine.tcbs.get(handle).unwrap().rcv_nxt, 1005);
        assert!(out.completions.iter().any(|c| c.data == b"hello"));
    }

    #[test]
    fn write_emits_data_after_an_unfulfilled_ack_reaches_established() {
        let mut engine = Engine::new(LOCAL_IP);
        let mut processes = ProcessTable::new();
        let owner = processes.create(5, 4);
        let tuple = Tuple { remote_ip: [10, 0, 0, 2], remote_port: 4000, local_port: 80 };
        let handle = engine.tcbs.create(owner, tuple);
        {
            let tcb = engine.tcbs.get_mut(handle).unwrap();
            tcb.state = TcpState::Established;
            tcb.rcv_nxt = 1000;
            tcb.snd_una = 5000;
            tcb.snd_nxt = 5000;
            tcb.tx_wnd = 8192;
        }

        let out = engine.write(handle, b"hi").unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].payload, b"hi");
        assert_eq!(engine.tcbs.get(handle).unwrap().snd_nxt, 5002);
    }

    #[test]
    fn out_of_range_mss_in_syn_produces_a_parameter_problem() {
        let mut engine = Engine::new(LOCAL_IP);
        let mut processes = ProcessTable::new();
        let listener = processes.create(5, 4);
        engine.listen(80, listener).unwrap();

        let mut opts = [0u8; 4];
        opts[0] = segment::TCP_OPT_MSS;
        opts[1] = segment::TCP_OPT_MSS_LEN;
        opts[2..4].copy_from_slice(&20000u16.to_be_bytes());
        let input = RxInput { src_ip: [10, 0, 0, 2], options: &opts, ..syn_segment(1000, 80) };
        let out = engine.rx(&mut processes, (0, 0), input);
        assert_eq!(out.mss_errors.len(), 1);
        assert_eq!(out.mss_errors[0].pointer, TCP_HEADER_LEN + 2);
    }
}

//! TCP wire format: header parse/build, checksum, MSS option handling.
//!
//! Grounded on `drivers/src/net/tcp.rs`'s `TcpHeader`/`parse_header`/
//! `write_header`/`tcp_checksum` family, trimmed to what the connection
//! engine needs (no RTO/retransmit-count fields, since retransmission
//! timers are an explicitly unimplemented gap here, matching
//! `original_source`).

use bitflags::bitflags;

pub const TCP_HEADER_LEN: usize = 20;
pub const TCP_HEADER_MAX_LEN: usize = 60;
pub const TCP_MSS_MIN: u16 = 536;
pub const TCP_MSS_MAX: u16 = 1460;
pub const IP_PROTO_TCP: u8 = 6;

pub const TCP_OPT_END: u8 = 0;
pub const TCP_OPT_NOOP: u8 = 1;
pub const TCP_OPT_MSS: u8 = 2;
pub const TCP_OPT_MSS_LEN: u8 = 4;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct TcpFlags: u8 {
        const FIN = 0x01;
        const SYN = 0x02;
        const RST = 0x04;
        const PSH = 0x08;
        const ACK = 0x10;
        const URG = 0x20;
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TcpHeader {
    pub src_port: u16,
    pub dst_port: u16,
    pub seq: u32,
    pub ack: u32,
    pub data_offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
    pub checksum: u16,
    pub urgent_ptr: u16,
}

impl TcpHeader {
    pub const fn header_len(&self) -> usize {
        (self.data_offset as usize) * 4
    }

    /// Sequence-space length: payload bytes plus one virtual byte each
    /// for SYN and FIN, per `tcps_seg_len`.
    pub fn seg_len(&self, payload_len: usize) -> u32 {
        let mut len = payload_len as u32;
        if self.flags.contains(TcpFlags::SYN) {
            len += 1;
        }
        if self.flags.contains(TcpFlags::FIN) {
            len += 1;
        }
        len
    }
}

pub fn parse_header(data: &[u8]) -> Option<TcpHeader> {
    if data.len() < TCP_HEADER_LEN {
        return None;
    }
    let data_offset = (data[12] >> 4) & 0x0f;
    if !(5..=15).contains(&data_offset) {
        return None;
    }
    if data.len() < (data_offset as usize) * 4 {
        return None;
    }
    Some(TcpHeader {
        src_port: u16::from_be_bytes([data[0], data[1]]),
        dst_port: u16::from_be_bytes([data[2], data[3]]),
        seq: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
        ack: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        data_offset,
        flags: TcpFlags::from_bits_truncate(data[13] & 0x3f),
        window: u16::from_be_bytes([data[14], data[15]]),
        checksum: u16::from_be_bytes([data[16], data[17]]),
        urgent_ptr: u16::from_be_bytes([data[18], data[19]]),
    })
}

pub fn write_header(hdr: &TcpHeader, out: &mut [u8]) -> Option<usize> {
    let header_len = hdr.header_len().max(TCP_HEADER_LEN);
    if out.len() < header_len {
        return None;
    }
    out[0..2].copy_from_slice(&hdr.src_port.to_be_bytes());
    out[2..4].copy_from_slice(&hdr.dst_port.to_be_bytes());
    out[4..8].copy_from_slice(&hdr.seq.to_be_bytes());
    out[8..12].copy_from_slice(&hdr.ack.to_be_bytes());
    out[12] = ((header_len / 4) as u8) << 4;
    out[13] = hdr.flags.bits();
    out[14..16].copy_from_slice(&hdr.window.to_be_bytes());
    out[16..18].copy_from_slice(&0u16.to_be_bytes());
    out[18..20].copy_from_slice(&hdr.urgent_ptr.to_be_bytes());
    if header_len > TCP_HEADER_LEN {
        out[TCP_HEADER_LEN..header_len].fill(0);
    }
    Some(header_len)
}

/// Outcome of scanning the MSS option: either none was present, a valid
/// one was found, or one was found but out of `[TCP_MSS_MIN,
/// TCP_MSS_MAX]` — `offset` is the byte index of its value field within
/// `options`, for the caller to turn into an ICMP parameter-problem
/// pointer. Grounded on `tcps_set_mss`/`tcps_apply_options` in
/// `tcps.c`: out-of-range MSS is rejected (the TCB's mss is left
/// unchanged), not clamped.
pub enum MssOption {
    Absent,
    Valid(u16),
    OutOfRange { offset: usize },
}

pub fn parse_mss_option(options: &[u8]) -> MssOption {
    let mut i = 0;
    while i < options.len() {
        match options[i] {
            TCP_OPT_END => break,
            TCP_OPT_NOOP => i += 1,
            TCP_OPT_MSS => {
                if i + 3 < options.len() && options[i + 1] == TCP_OPT_MSS_LEN {
                    let mss = u16::from_be_bytes([options[i + 2], options[i + 3]]);
                    if (TCP_MSS_MIN..=TCP_MSS_MAX).contains(&mss) {
                        return MssOption::Valid(mss);
                    }
                    return MssOption::OutOfRange { offset: i + 2 };
                }
                break;
            }
            _ => {
                if i + 1 >= options.len() {
                    break;
                }
                let len = options[i + 1] as usize;
                if len < 2 || i + len > options.len() {
                    break;
                }
                i += len;
            }
        }
    }
    MssOption::Absent
}

fn ones_complement_sum(data: &[u8]) -> u32 {
    let mut sum = 0u32;
    let mut i = 0;
    while i + 1 < data.len() {
        sum = sum.wrapping_add(u16::from_be_bytes([data[i], data[i + 1]]) as u32);
        i += 2;
    }
    if i < data.len() {
        sum = sum.wrapping_add((data[i] as u32) << 8);
    }
    sum
}

fn fold_checksum(mut sum: u32) -> u16 {
    while (sum >> 16) != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }
    !(sum as u16)
}

/// One's-complement checksum over the IPv4 pseudo-header (src, dst,
/// zero, protocol, TCP length) plus the TCP header and data.
pub fn tcp_checksum(src_ip: [u8; 4], dst_ip: [u8; 4], segment: &[u8]) -> u16 {
    let mut sum = 0u32;
    sum = sum.wrapping_add(u16::from_be_bytes([src_ip[0], src_ip[1]]) as u32);
    sum = sum.wrapping_add(u16::from_be_bytes([src_ip[2], src_ip[3]]) as u32);
    sum = sum.wrapping_add(u16::from_be_bytes([dst_ip[0], dst_ip[1]]) as u32);
    sum = sum.wrapping_add(u16::from_be_bytes([dst_ip[2], dst_ip[3]]) as u32);
    sum = sum.wrapping_add(IP_PROTO_TCP as u32);
    sum = sum.wrapping_add(segment.len() as u32);
    sum = sum.wrapping_add(ones_complement_sum(segment));
    fold_checksum(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_write_and_parse() {
        let hdr = TcpHeader {
            src_port: 4000,
            dst_port: 80,
            seq: 1000,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::SYN,
            window: 8192,
            checksum: 0,
            urgent_ptr: 0,
        };
        let mut buf = [0u8; TCP_HEADER_LEN];
        write_header(&hdr, &mut buf).unwrap();
        let parsed = parse_header(&buf).unwrap();
        assert_eq!(parsed.src_port, 4000);
        assert_eq!(parsed.seq, 1000);
        assert!(parsed.flags.contains(TcpFlags::SYN));
    }

    #[test]
    fn out_of_range_mss_is_rejected_not_clamped() {
        let mut opts = [0u8; 4];
        opts[0] = TCP_OPT_MSS;
        opts[1] = TCP_OPT_MSS_LEN;
        opts[2..4].copy_from_slice(&20000u16.to_be_bytes());
        match parse_mss_option(&opts) {
            MssOption::OutOfRange { offset } => assert_eq!(offset, 2),
            _ => panic!("expected OutOfRange"),
        }
    }

    #[test]
    fn in_range_mss_is_accepted() {
        let mut opts = [0u8; 4];
        opts[0] = TCP_OPT_MSS;
        opts[1] = TCP_OPT_MSS_LEN;
        opts[2..4].copy_from_slice(&1400u16.to_be_bytes());
        match parse_mss_option(&opts) {
            MssOption::Valid(mss) => assert_eq!(mss, 1400),
            _ => panic!("expected Valid"),
        }
    }

    #[test]
    fn checksum_of_valid_segment_verifies_to_zero() {
        let hdr = TcpHeader {
            src_port: 4000,
            dst_port: 80,
            seq: 1000,
            ack: 0,
            data_offset: 5,
            flags: TcpFlags::SYN,
            window: 8192,
            checksum: 0,
            urgent_ptr: 0,
        };
        let mut buf = [0u8; TCP_HEADER_LEN];
        write_header(&hdr, &mut buf).unwrap();
        let checksum = tcp_checksum([10, 0, 0, 2], [10, 0, 0, 1], &buf);
        buf[16..18].copy_from_slice(&checksum.to_be_bytes());
        let verify_sum = tcp_checksum([10, 0, 0, 2], [10, 0, 0, 1], &buf);
        assert_eq!(verify_sum, 0);
    }
}

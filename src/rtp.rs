use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};

use log::debug;
use tokio::net::UdpSocket;

use crate::wire::Nal;

const RTP_HEADER_LEN: usize = 12;
const RTP_VERSION: u8 = 2;
const PAYLOAD_TYPE: u8 = 96;
const FU_A_TYPE: u8 = 28;

const MAX_SINGLE_NAL_PAYLOAD: usize = 1400;
const MAX_FU_FRAGMENT_PAYLOAD: usize = 1398;

pub struct RtpCounters {
    seq: AtomicU16,
    timestamp: AtomicU32,
    ssrc: u32,
}

impl RtpCounters {
    pub fn new(ssrc: u32) -> Self {
        RtpCounters {
            seq: AtomicU16::new(0),
            timestamp: AtomicU32::new(0),
            ssrc,
        }
    }

    pub fn current_seq(&self) -> u16 {
        self.seq.load(Ordering::Relaxed)
    }

    pub fn current_timestamp(&self) -> u32 {
        self.timestamp.load(Ordering::Relaxed)
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    pub fn advance_timestamp(&self, delta: u32) {
        self.timestamp.fetch_add(delta, Ordering::Relaxed);
    }

    fn next_seq(&self) -> u16 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }
}

fn write_rtp_header(buf: &mut [u8], marker: bool, seq: u16, timestamp: u32, ssrc: u32) {
    buf[0] = (RTP_VERSION << 6) | 0; // padding=0, extension=0, CC=0
    buf[1] = ((marker as u8) << 7) | PAYLOAD_TYPE;
    buf[2..4].copy_from_slice(&seq.to_be_bytes());
    buf[4..8].copy_from_slice(&timestamp.to_be_bytes());
    buf[8..12].copy_from_slice(&ssrc.to_be_bytes());
}

#[derive(Debug, Clone, Copy)]
pub struct Destination {
    pub addr: SocketAddr,
}

pub const SCRATCH_BUFFER_LEN: usize = RTP_HEADER_LEN + 2 + MAX_FU_FRAGMENT_PAYLOAD;

pub async fn send_nal(
    socket: &UdpSocket,
    counters: &RtpCounters,
    nal: &Nal<'_>,
    marker: bool,
    destinations: &[Destination],
    scratch: &mut Vec<u8>,
) {
    if nal.data.len() <= MAX_SINGLE_NAL_PAYLOAD {
        send_single_nal(socket, counters, nal.data, marker, destinations, scratch).await;
    } else {
        send_fragmented(socket, counters, nal, marker, destinations, scratch).await;
    }
}

async fn send_single_nal(
    socket: &UdpSocket,
    counters: &RtpCounters,
    nal_data: &[u8],
    marker: bool,
    destinations: &[Destination],
    scratch: &mut Vec<u8>,
) {
    scratch.resize(RTP_HEADER_LEN + nal_data.len(), 0);
    let seq = counters.next_seq();
    write_rtp_header(
        scratch,
        marker,
        seq,
        counters.current_timestamp(),
        counters.ssrc(),
    );
    scratch[RTP_HEADER_LEN..].copy_from_slice(nal_data);

    fan_out(socket, scratch, destinations).await;
}

async fn send_fragmented(
    socket: &UdpSocket,
    counters: &RtpCounters,
    nal: &Nal<'_>,
    marker: bool,
    destinations: &[Destination],
    scratch: &mut Vec<u8>,
) {
    let nal_type = nal.nal_type();
    let nri = nal.nri();
    let fu_indicator = nri | FU_A_TYPE;

    let payload = &nal.data[1..]; // original NAL header stripped
    let mut offset = 0usize;

    while offset < payload.len() {
        let remaining = payload.len() - offset;
        let chunk_len = remaining.min(MAX_FU_FRAGMENT_PAYLOAD);
        let is_start = offset == 0;
        let is_end = offset + chunk_len >= payload.len();

        let mut fu_header = nal_type;
        if is_start {
            fu_header |= 0x80;
        }
        if is_end {
            fu_header |= 0x40;
        }

        scratch.resize(RTP_HEADER_LEN + 2 + chunk_len, 0);
        let seq = counters.next_seq();
        let packet_marker = is_end && marker;
        write_rtp_header(
            scratch,
            packet_marker,
            seq,
            counters.current_timestamp(),
            counters.ssrc(),
        );
        scratch[RTP_HEADER_LEN] = fu_indicator;
        scratch[RTP_HEADER_LEN + 1] = fu_header;
        scratch[RTP_HEADER_LEN + 2..].copy_from_slice(&payload[offset..offset + chunk_len]);

        fan_out(socket, scratch, destinations).await;

        offset += chunk_len;
    }
}

async fn fan_out(socket: &UdpSocket, packet: &[u8], destinations: &[Destination]) {
    for dest in destinations {
        if let Err(e) = socket.send_to(packet, dest.addr).await {
            debug!("RTP send to {} failed: {e}", dest.addr);
        }
    }
}

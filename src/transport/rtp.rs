//! RTP/UDP dialect used by the telephony switch's `externalMedia` channels
//! (§4.3). Ingress tolerates CSRC/extension/padding; egress never produces
//! them, so the 12-byte fixed header is constructed directly rather than via
//! a general-purpose packet builder.

use crate::error::{BridgeError, BridgeResult, WrappedRtpError};
use rand::Rng;
use rtp_rs::RtpReader;

pub const PAYLOAD_TYPE_L16_16K: u8 = 11;
pub const HEADER_LEN: usize = 12;

#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub sequence: u16,
    pub timestamp: u32,
    pub marker: bool,
    pub payload: Vec<u8>,
}

/// Parses an inbound RTP packet, stripping CSRC/extension/padding per RFC 3550.
pub fn parse(buf: &[u8]) -> BridgeResult<RtpPacket> {
    let reader = RtpReader::new(buf).map_err(|e| BridgeError::InvalidRtpData(WrappedRtpError(e)))?;
    Ok(RtpPacket {
        sequence: reader.sequence_number().into(),
        timestamp: reader.timestamp(),
        marker: reader.mark(),
        payload: reader.payload().to_vec(),
    })
}

/// Per-call RTP encoder: monotonic sequence/timestamp with random starts,
/// marker bit only on the first packet of a stream (§4.3).
pub struct RtpSession {
    ssrc: u32,
    sequence: u16,
    timestamp: u32,
    samples_per_frame: u32,
    first_packet: bool,
}

impl RtpSession {
    pub fn new(samples_per_frame: u32) -> Self {
        let mut rng = rand::rng();
        Self {
            ssrc: rng.random(),
            sequence: rng.random(),
            timestamp: rng.random(),
            samples_per_frame,
            first_packet: true,
        }
    }

    /// Wraps `payload` (already-encoded L16 bytes) in an RTP packet and
    /// advances sequence/timestamp for the next call.
    pub fn packetize(&mut self, payload: &[u8]) -> Vec<u8> {
        let marker = self.first_packet;
        self.first_packet = false;

        let mut packet = Vec::with_capacity(HEADER_LEN + payload.len());
        let byte0 = 0x80u8; // version 2, no padding, no extension, CSRC count 0
        let byte1 = ((marker as u8) << 7) | PAYLOAD_TYPE_L16_16K;
        packet.push(byte0);
        packet.push(byte1);
        packet.extend_from_slice(&self.sequence.to_be_bytes());
        packet.extend_from_slice(&self.timestamp.to_be_bytes());
        packet.extend_from_slice(&self.ssrc.to_be_bytes());
        packet.extend_from_slice(payload);

        self.sequence = self.sequence.wrapping_add(1);
        self.timestamp = self.timestamp.wrapping_add(self.samples_per_frame);

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marker_set_only_on_first_packet() {
        let mut session = RtpSession::new(320);
        let first = session.packetize(&[0u8; 640]);
        let second = session.packetize(&[0u8; 640]);
        assert_eq!(first[1] & 0x80, 0x80);
        assert_eq!(second[1] & 0x80, 0x00);
    }

    #[test]
    fn sequence_and_timestamp_increment() {
        let mut session = RtpSession::new(320);
        let start_seq = session.sequence;
        let start_ts = session.timestamp;
        session.packetize(&[0u8; 640]);
        assert_eq!(session.sequence, start_seq.wrapping_add(1));
        assert_eq!(session.timestamp, start_ts.wrapping_add(320));
    }

    #[test]
    fn payload_type_is_11() {
        let mut session = RtpSession::new(320);
        let packet = session.packetize(&[0u8; 640]);
        assert_eq!(packet[1] & 0x7F, PAYLOAD_TYPE_L16_16K);
    }

    #[test]
    fn parse_round_trips_a_hand_built_packet() {
        let mut session = RtpSession::new(320);
        let packet = session.packetize(&[7u8; 640]);
        let parsed = parse(&packet).expect("valid rtp");
        assert_eq!(parsed.payload.len(), 640);
        assert!(parsed.marker);
    }
}

//! NTPv4 client packet encode/decode (spec §6), just enough of RFC 5905 to
//! drive a feed-forward client: no authentication, no NTP Control Protocol.

use crate::time::{NtpTimestamp, Secs};

pub const NTP_PACKET_LEN: usize = 48;
const VERSION: u8 = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Client,
    Server,
    Other(u8),
}

impl Mode {
    fn to_bits(self) -> u8 {
        match self {
            Mode::Client => 3,
            Mode::Server => 4,
            Mode::Other(v) => v,
        }
    }

    fn from_bits(v: u8) -> Mode {
        match v {
            3 => Mode::Client,
            4 => Mode::Server,
            other => Mode::Other(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeapIndicator {
    NoWarning,
    InsertSecond,
    DeleteSecond,
    Unsynchronized,
}

impl LeapIndicator {
    fn to_bits(self) -> u8 {
        match self {
            LeapIndicator::NoWarning => 0,
            LeapIndicator::InsertSecond => 1,
            LeapIndicator::DeleteSecond => 2,
            LeapIndicator::Unsynchronized => 3,
        }
    }

    fn from_bits(v: u8) -> LeapIndicator {
        match v & 0b11 {
            0 => LeapIndicator::NoWarning,
            1 => LeapIndicator::InsertSecond,
            2 => LeapIndicator::DeleteSecond,
            _ => LeapIndicator::Unsynchronized,
        }
    }
}

/// A decoded NTPv4 packet. The transmit timestamp doubles as the client's
/// nonce: radclock sets it to a value it can recognize on the reply
/// (spec §4.2), rather than trusting the wire clock alone.
#[derive(Clone, Copy, Debug)]
pub struct NtpPacket {
    pub leap: LeapIndicator,
    pub mode: Mode,
    pub stratum: u8,
    pub poll: i8,
    pub precision: i8,
    pub root_delay: u32,
    pub root_dispersion: u32,
    pub refid: u32,
    pub reference_timestamp: NtpTimestamp,
    pub origin_timestamp: NtpTimestamp,
    pub receive_timestamp: NtpTimestamp,
    pub transmit_timestamp: NtpTimestamp,
}

impl NtpPacket {
    /// Build a client request carrying `nonce` in the transmit timestamp
    /// field.
    pub fn request(nonce: NtpTimestamp) -> NtpPacket {
        NtpPacket {
            leap: LeapIndicator::NoWarning,
            mode: Mode::Client,
            stratum: 0,
            poll: 6,
            precision: -20,
            root_delay: 0,
            root_dispersion: 0,
            refid: 0,
            reference_timestamp: NtpTimestamp(0),
            origin_timestamp: NtpTimestamp(0),
            receive_timestamp: NtpTimestamp(0),
            transmit_timestamp: nonce,
        }
    }

    pub fn encode(&self) -> [u8; NTP_PACKET_LEN] {
        let mut buf = [0u8; NTP_PACKET_LEN];
        buf[0] = (self.leap.to_bits() << 6) | (VERSION << 3) | self.mode.to_bits();
        buf[1] = self.stratum;
        buf[2] = self.poll as u8;
        buf[3] = self.precision as u8;
        buf[4..8].copy_from_slice(&self.root_delay.to_be_bytes());
        buf[8..12].copy_from_slice(&self.root_dispersion.to_be_bytes());
        buf[12..16].copy_from_slice(&self.refid.to_be_bytes());
        buf[16..24].copy_from_slice(&self.reference_timestamp.0.to_be_bytes());
        buf[24..32].copy_from_slice(&self.origin_timestamp.0.to_be_bytes());
        buf[32..40].copy_from_slice(&self.receive_timestamp.0.to_be_bytes());
        buf[40..48].copy_from_slice(&self.transmit_timestamp.0.to_be_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<NtpPacket> {
        if buf.len() < NTP_PACKET_LEN {
            return None;
        }
        let leap = LeapIndicator::from_bits(buf[0] >> 6);
        let mode = Mode::from_bits(buf[0] & 0b111);
        Some(NtpPacket {
            leap,
            mode,
            stratum: buf[1],
            poll: buf[2] as i8,
            precision: buf[3] as i8,
            root_delay: u32::from_be_bytes(buf[4..8].try_into().ok()?),
            root_dispersion: u32::from_be_bytes(buf[8..12].try_into().ok()?),
            refid: u32::from_be_bytes(buf[12..16].try_into().ok()?),
            reference_timestamp: NtpTimestamp(u64::from_be_bytes(buf[16..24].try_into().ok()?)),
            origin_timestamp: NtpTimestamp(u64::from_be_bytes(buf[24..32].try_into().ok()?)),
            receive_timestamp: NtpTimestamp(u64::from_be_bytes(buf[32..40].try_into().ok()?)),
            transmit_timestamp: NtpTimestamp(u64::from_be_bytes(buf[40..48].try_into().ok()?)),
        })
    }

    pub fn receive_secs(&self) -> Secs {
        self.receive_timestamp.to_secs()
    }

    pub fn transmit_secs(&self) -> Secs {
        self.transmit_timestamp.to_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_roundtrips_through_wire_bytes() {
        let nonce = NtpTimestamp(0x1234_5678_9abc_def0);
        let req = NtpPacket::request(nonce);
        let bytes = req.encode();
        let decoded = NtpPacket::decode(&bytes).unwrap();
        assert_eq!(decoded.mode, Mode::Client);
        assert_eq!(decoded.transmit_timestamp, nonce);
        assert_eq!(decoded.leap, LeapIndicator::NoWarning);
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(NtpPacket::decode(&[0u8; 10]).is_none());
    }

    #[test]
    fn decodes_server_mode_and_leap_bits() {
        let mut buf = [0u8; NTP_PACKET_LEN];
        buf[0] = (1 << 6) | (VERSION << 3) | 4;
        buf[1] = 2;
        let decoded = NtpPacket::decode(&buf).unwrap();
        assert_eq!(decoded.mode, Mode::Server);
        assert_eq!(decoded.leap, LeapIndicator::InsertSecond);
        assert_eq!(decoded.stratum, 2);
    }
}

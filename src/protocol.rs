use crate::error::{BikeError, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// First byte of every host-to-device command frame
pub const FRAME_HEADER: u8 = 0xF0;

/// Length of a telemetry notification, the device's only framing discriminator
pub const TELEMETRY_FRAME_LEN: usize = 21;

/// Highest resistance level whose `level + 1` payload still fits in one byte
pub const MAX_LEVEL: u8 = 254;

/// Keep-alive probe, sent once before and five times after `INIT_A0`
pub const PING: [u8; 5] = [0xF0, 0xA0, 0x01, 0x01, 0x92];

/// First initialization frame
pub const INIT_A0: [u8; 5] = [0xF0, 0xA0, 0x02, 0x02, 0x94];

/// Reply the device sends to a ping
pub const PONG: [u8; 5] = [0xF0, 0xB0, 0x01, 0x01, 0xA2];

/// Status request
pub const STATUS: [u8; 5] = [0xF0, 0xA1, 0x01, 0x01, 0x93];

/// Second initialization frame
pub const INIT_A3: [u8; 6] = [0xF0, 0xA3, 0x01, 0x01, 0x01, 0x96];

/// Third initialization frame (the longest command, 15 bytes)
pub const INIT_A4: [u8; 15] = [
    0xF0, 0xA4, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0xA0,
];

/// Starts the workout on the console
pub const START: [u8; 6] = [0xF0, 0xA5, 0x01, 0x01, 0x02, 0x99];

/// Stops the workout on the console
pub const STOP: [u8; 6] = [0xF0, 0xA5, 0x01, 0x01, 0x04, 0x9B];

/// Requests one telemetry notification
pub const READ: [u8; 5] = [0xF0, 0xA2, 0x01, 0x01, 0x94];

/// Command byte of `SET_LEVEL`
const SET_LEVEL_CMD: u8 = 0xA6;

/// Commands understood by the bike's control unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Keep-alive probe
    Ping,
    /// First initialization step
    InitA0,
    /// Second initialization step
    InitA3,
    /// Third initialization step
    InitA4,
    /// Status request
    Status,
    /// Set the resistance level
    SetLevel(u8),
    /// Start the workout
    Start,
    /// Stop the workout
    Stop,
    /// Request a telemetry frame
    Read,
}

impl Command {
    /// Build a validated `SET_LEVEL` command
    ///
    /// # Errors
    ///
    /// Returns [`BikeError::InvalidLevel`] if `level` is zero or above [`MAX_LEVEL`].
    pub fn set_level(level: u32) -> Result<Self> {
        match u8::try_from(level) {
            Ok(level) if (1..=MAX_LEVEL).contains(&level) => Ok(Self::SetLevel(level)),
            _ => Err(BikeError::InvalidLevel {
                level,
                maximum: MAX_LEVEL,
            }),
        }
    }

    /// Serialize the command to its wire frame
    #[must_use]
    pub fn encode(&self) -> Bytes {
        match self {
            Self::Ping => Bytes::from_static(&PING),
            Self::InitA0 => Bytes::from_static(&INIT_A0),
            Self::InitA3 => Bytes::from_static(&INIT_A3),
            Self::InitA4 => Bytes::from_static(&INIT_A4),
            Self::Status => Bytes::from_static(&STATUS),
            Self::SetLevel(level) => encode_set_level(*level),
            Self::Start => Bytes::from_static(&START),
            Self::Stop => Bytes::from_static(&STOP),
            Self::Read => Bytes::from_static(&READ),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => write!(f, "PING"),
            Self::InitA0 => write!(f, "INIT_A0"),
            Self::InitA3 => write!(f, "INIT_A3"),
            Self::InitA4 => write!(f, "INIT_A4"),
            Self::Status => write!(f, "STATUS"),
            Self::SetLevel(level) => write!(f, "SET_LEVEL({level})"),
            Self::Start => write!(f, "START"),
            Self::Stop => write!(f, "STOP"),
            Self::Read => write!(f, "READ"),
        }
    }
}

/// Sum of all bytes modulo 256
#[must_use]
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

/// `SET_LEVEL` frame: `F0 A6 01 01 (level+1) ((F0+A6+3+level) & FF)`
///
/// The checksum is the console's additive constant, not a fold over the payload.
fn encode_set_level(level: u8) -> Bytes {
    let mut buf = BytesMut::with_capacity(6);
    buf.put_u8(FRAME_HEADER);
    buf.put_u8(SET_LEVEL_CMD);
    buf.put_u8(0x01);
    buf.put_u8(0x01);
    buf.put_u8(level.wrapping_add(1));
    let sum = u32::from(FRAME_HEADER) + u32::from(SET_LEVEL_CMD) + 3 + u32::from(level);
    buf.put_u8((sum & 0xFF) as u8);
    buf.freeze()
}

/// Classification of a notification pushed by the bike
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A 21-byte telemetry frame, still in its +1 encoded form
    Telemetry([u8; TELEMETRY_FRAME_LEN]),
    /// Reply to a ping
    Pong,
    /// Anything else; dropped by the session
    NotRecognized,
}

/// Classify raw notification bytes
///
/// Never fails: frames of the wrong length are [`Notification::NotRecognized`].
#[must_use]
pub fn decode_notification(data: &[u8]) -> Notification {
    if let Ok(raw) = <[u8; TELEMETRY_FRAME_LEN]>::try_from(data) {
        return Notification::Telemetry(raw);
    }

    if data == PONG {
        return Notification::Pong;
    }

    Notification::NotRecognized
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_frame_checksums() {
        let frames: [&[u8]; 9] = [
            &PING, &INIT_A0, &PONG, &STATUS, &INIT_A3, &INIT_A4, &START, &STOP, &READ,
        ];

        for frame in frames {
            let (body, tail) = frame.split_at(frame.len() - 1);
            assert_eq!(checksum(body), tail[0], "bad checksum in {frame:02X?}");
            assert_eq!(frame[0], FRAME_HEADER);
        }
    }

    #[test]
    fn test_set_level_frame() {
        let bytes = Command::SetLevel(5).encode();

        assert_eq!(&bytes[..], &[0xF0, 0xA6, 0x01, 0x01, 0x06, 0x9E]);
        assert_eq!(bytes[5], ((0xF0 + 0xA6 + 3 + 5) & 0xFF) as u8);
    }

    #[test]
    fn test_set_level_checksum_matches_byte_sum() {
        for level in 1..=MAX_LEVEL {
            let bytes = Command::SetLevel(level).encode();
            assert_eq!(checksum(&bytes[..5]), bytes[5], "level {level}");
        }
    }

    #[test]
    fn test_set_level_validation() {
        assert_eq!(Command::set_level(1).unwrap(), Command::SetLevel(1));
        assert_eq!(Command::set_level(254).unwrap(), Command::SetLevel(254));
        assert!(matches!(
            Command::set_level(0),
            Err(BikeError::InvalidLevel { level: 0, .. })
        ));
        assert!(matches!(
            Command::set_level(255),
            Err(BikeError::InvalidLevel { level: 255, .. })
        ));
        assert!(Command::set_level(1_000).is_err());
    }

    #[test]
    fn test_frame_lengths() {
        assert_eq!(Command::Ping.encode().len(), 5);
        assert_eq!(Command::InitA4.encode().len(), 15);
        assert_eq!(Command::Start.encode().len(), 6);
        assert_eq!(Command::Read.encode(), Bytes::from_static(&READ));
    }

    #[test]
    fn test_decode_notification() {
        let frame = [1u8; TELEMETRY_FRAME_LEN];
        assert_eq!(decode_notification(&frame), Notification::Telemetry(frame));

        assert_eq!(decode_notification(&PONG), Notification::Pong);
        assert_eq!(decode_notification(&[]), Notification::NotRecognized);
        assert_eq!(decode_notification(&[1u8; 20]), Notification::NotRecognized);
        assert_eq!(decode_notification(&[1u8; 22]), Notification::NotRecognized);
        assert_eq!(decode_notification(&READ), Notification::NotRecognized);
    }

    #[test]
    fn test_command_display() {
        assert_eq!(Command::SetLevel(12).to_string(), "SET_LEVEL(12)");
        assert_eq!(Command::InitA0.to_string(), "INIT_A0");
    }
}

//! Turns raw characteristic payloads into samples.
//!
//! The motion wire format is not documented and differs between firmware versions, so a 4 byte
//! payload is decoded several ways at once. The most plausible interpretation becomes the primary
//! one and the others are kept as alternates so stored samples can be re-examined later.
//! Decoding never fails for motion; odd payloads are represented as flagged data.

use serde::Serialize;
use thiserror::Error;

use crate::device::constants::{HEART_RATE_MAX_BPM, HEART_RATE_MIN_BPM, STUCK_SENSOR_SIGNATURES};
use crate::store::gateway::ChannelKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParsingMethod {
    /// 4 signed 8-bit lanes
    SignedBytes,
    /// 4 unsigned 8-bit lanes
    UnsignedBytes,
    /// 2 signed 16-bit little-endian lanes from a 4 byte payload
    Int16Pair,
    /// 3 signed 16-bit little-endian lanes from a 6 byte payload
    Int16Triple,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Axes {
    pub x: i32,
    pub y: i32,
    // zero for Int16Pair, which has no z lane
    pub z: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub w: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Interpretation {
    pub method: ParsingMethod,
    #[serde(flatten)]
    pub axes: Axes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionSample {
    /// `None` only for payloads of an unknown length.
    pub primary: Option<Interpretation>,
    pub alternates: Vec<Interpretation>,
    pub is_suspect: bool,
    pub is_valid: bool,
    pub raw_hex: String,
}

impl MotionSample {
    pub fn parsing_method(&self) -> ParsingMethod {
        self.primary.map(|primary| primary.method).unwrap_or(ParsingMethod::Unknown)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartRateSample {
    pub bpm: u16,
    pub flags: u8,
    pub raw_hex: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HeartRateRejection {
    #[error("heart rate payload too short ({len} bytes)")]
    TooShort { len: usize },

    #[error("heart rate {bpm} bpm is out of range")]
    OutOfRange { bpm: u16 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedSample {
    Motion(MotionSample),
    HeartRate(HeartRateSample),
}

impl DecodedSample {
    pub fn kind(&self) -> ChannelKind {
        match self {
            DecodedSample::Motion(_) => ChannelKind::Motion,
            DecodedSample::HeartRate(_) => ChannelKind::HeartRate,
        }
    }
}

pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| format!("{:02x}", byte)).collect()
}

pub fn decode_motion(bytes: &[u8]) -> MotionSample {
    let raw_hex = to_hex(bytes);

    match bytes.len() {
        4 => {
            let lanes = [bytes[0], bytes[1], bytes[2], bytes[3]];
            let signed = Interpretation {
                method: ParsingMethod::SignedBytes,
                axes: Axes {
                    x: lanes[0] as i8 as i32,
                    y: lanes[1] as i8 as i32,
                    z: lanes[2] as i8 as i32,
                    w: Some(lanes[3] as i8 as i32),
                },
            };
            let unsigned = Interpretation {
                method: ParsingMethod::UnsignedBytes,
                axes: Axes {
                    x: lanes[0] as i32,
                    y: lanes[1] as i32,
                    z: lanes[2] as i32,
                    w: Some(lanes[3] as i32),
                },
            };
            let pair = Interpretation {
                method: ParsingMethod::Int16Pair,
                axes: Axes {
                    x: i16::from_le_bytes([lanes[0], lanes[1]]) as i32,
                    y: i16::from_le_bytes([lanes[2], lanes[3]]) as i32,
                    z: 0,
                    w: None,
                },
            };

            if STUCK_SENSOR_SIGNATURES.contains(&lanes) {
                MotionSample {
                    primary: Some(pair),
                    alternates: vec![signed, unsigned],
                    is_suspect: true,
                    is_valid: true,
                    raw_hex,
                }
            } else {
                MotionSample {
                    primary: Some(signed),
                    alternates: vec![unsigned, pair],
                    is_suspect: false,
                    is_valid: true,
                    raw_hex,
                }
            }
        },
        6 => {
            let lane = |i: usize| i16::from_le_bytes([bytes[i], bytes[i + 1]]) as i32;
            let axes = Axes { x: lane(0), y: lane(2), z: lane(4), w: None };
            let is_valid = !(axes.x == 0 && axes.y == 0 && axes.z == 0);

            MotionSample {
                primary: Some(Interpretation { method: ParsingMethod::Int16Triple, axes }),
                alternates: Vec::new(),
                is_suspect: false,
                is_valid,
                raw_hex,
            }
        },
        _ => MotionSample {
            primary: None,
            alternates: Vec::new(),
            is_suspect: false,
            is_valid: false,
            raw_hex,
        },
    }
}

/// Standard heart rate measurement: flags octet, then an 8 or 16 bit value depending on bit 0.
pub fn decode_heart_rate(bytes: &[u8]) -> Result<HeartRateSample, HeartRateRejection> {
    if bytes.len() < 2 {
        return Err(HeartRateRejection::TooShort { len: bytes.len() });
    }

    let flags = bytes[0];
    let bpm = if flags & 0x01 != 0 {
        if bytes.len() < 3 {
            return Err(HeartRateRejection::TooShort { len: bytes.len() });
        }
        u16::from_le_bytes([bytes[1], bytes[2]])
    } else {
        bytes[1] as u16
    };

    if !(HEART_RATE_MIN_BPM..=HEART_RATE_MAX_BPM).contains(&bpm) {
        return Err(HeartRateRejection::OutOfRange { bpm });
    }

    Ok(HeartRateSample { bpm, flags, raw_hex: to_hex(bytes) })
}

//! Append-only persistence of sessions and samples, plus the row schema shared with the
//! reporting side (`sleep_records` and `raw_sensor_data`).

use std::time::SystemTime;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::decoder::{DecodedSample, HeartRateSample, Interpretation, MotionSample, ParsingMethod};
use crate::device::movement::MovementReading;
use crate::error::StoreError;

pub type SessionId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelKind {
    #[serde(rename = "accelerometer")]
    Motion,
    #[serde(rename = "heart_rate")]
    HeartRate,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Motion => "accelerometer",
            ChannelKind::HeartRate => "heart_rate",
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn create_session(&self, user_id: i64, started_at: &str) -> Result<SessionId, StoreError>;

    /// Fire-and-log: callers do not retry.
    async fn append_sample(
        &self,
        session_id: SessionId,
        kind: ChannelKind,
        payload: &serde_json::Value,
        captured_at: &str,
    ) -> Result<(), StoreError>;

    async fn close_session(&self, session_id: SessionId, ended_at: &str) -> Result<(), StoreError>;
}

/// One stored sample as the reporting side reads it back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRow {
    pub sleep_record_id: SessionId,
    pub sensor_type: ChannelKind,
    /// JSON document, stored as text
    pub value: String,
    pub captured_at: String,
}

#[derive(Debug, Serialize)]
struct MotionRecord<'a> {
    #[serde(flatten)]
    axes: Option<crate::device::decoder::Axes>,
    parsing_method: ParsingMethod,
    is_suspect: bool,
    is_valid: bool,
    raw_hex: &'a str,
    alternates: &'a [Interpretation],
    movement_detected: bool,
    movement_magnitude: f64,
    movement_delta: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HeartRateRecord<'a> {
    heart_rate: u16,
    flags: u8,
    raw_hex: &'a str,
}

fn motion_record(sample: &MotionSample, movement: Option<MovementReading>) -> MotionRecord<'_> {
    let movement = movement.unwrap_or_default();
    MotionRecord {
        axes: sample.primary.map(|primary| primary.axes),
        parsing_method: sample.parsing_method(),
        is_suspect: sample.is_suspect,
        is_valid: sample.is_valid,
        raw_hex: &sample.raw_hex,
        alternates: &sample.alternates,
        movement_detected: movement.detected,
        movement_magnitude: movement.magnitude,
        movement_delta: movement.delta,
    }
}

fn heart_rate_record(sample: &HeartRateSample) -> HeartRateRecord<'_> {
    HeartRateRecord { heart_rate: sample.bpm, flags: sample.flags, raw_hex: &sample.raw_hex }
}

/// The JSON document stored in `raw_sensor_data.value`.
pub fn sample_payload(sample: &DecodedSample, movement: Option<MovementReading>) -> Result<serde_json::Value, StoreError> {
    let value = match sample {
        DecodedSample::Motion(motion) => serde_json::to_value(motion_record(motion, movement))?,
        DecodedSample::HeartRate(heart_rate) => serde_json::to_value(heart_rate_record(heart_rate))?,
    };
    Ok(value)
}

/// RFC 3339 with millisecond precision, UTC.
pub fn timestamp(time: SystemTime) -> String {
    humantime::format_rfc3339_millis(time).to_string()
}

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Serialize, Serializer};

use crate::error::{FrameError, Result};
use crate::state::{state_name, DeviceState};

/// Command frame length: header + opcode + separator + value + footer.
pub const COMMAND_LEN: usize = 5;

/// First byte of every command frame ("A").
pub const HEADER: u8 = 0x41;

/// Byte between opcode and value (",").
pub const SEPARATOR: u8 = 0x2C;

/// Last byte of every command frame.
pub const FOOTER: u8 = 0x10;

/// Lowest charging current the controller accepts, in amperes.
pub const MIN_AMPERAGE: u8 = 6;

/// Highest charging current the controller accepts, in amperes.
pub const MAX_AMPERAGE: u8 = 32;

/// Value byte carried by the charge-stop command.
pub const STOP_CODE: u8 = 0x01;

/// Key of the derived state name added to decoded status frames.
pub const STATE_NAME_KEY: &str = "STATE_NAME";

const STAT_PREFIX: &str = "<STAT;";
const ACK_PREFIX: &str = "<ACK;";
const CLOSING: char = '>';

/// Command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Status = 0x00,
    Authorize = 0x01,
    SetCurrent = 0x02,
    Stop = 0x04,
}

impl Opcode {
    /// The `CMD` name the controller uses when acknowledging this opcode.
    pub fn ack_name(self) -> &'static str {
        match self {
            Opcode::Status => "STATUS",
            Opcode::Authorize => "AUTH",
            Opcode::SetCurrent => "CURRENT",
            Opcode::Stop => "STOP",
        }
    }

    fn check_value(self, value: u8) -> Result<()> {
        let ok = match self {
            Opcode::Status => value == 0,
            Opcode::Authorize => value == 1,
            Opcode::SetCurrent => (MIN_AMPERAGE..=MAX_AMPERAGE).contains(&value),
            Opcode::Stop => value == STOP_CODE,
        };
        if ok {
            Ok(())
        } else {
            Err(FrameError::ValueOutOfRange {
                opcode: self.ack_name(),
                value,
            })
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = FrameError;

    fn try_from(byte: u8) -> Result<Self> {
        match byte {
            0x00 => Ok(Opcode::Status),
            0x01 => Ok(Opcode::Authorize),
            0x02 => Ok(Opcode::SetCurrent),
            0x04 => Ok(Opcode::Stop),
            other => Err(FrameError::InvalidOpcode(other)),
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ack_name())
    }
}

/// Encode a command frame.
///
/// Wire format:
/// ```text
/// ┌────────┬────────┬───────────┬───────┬────────┐
/// │ Header │ Opcode │ Separator │ Value │ Footer │
/// │  0x41  │  (1B)  │   0x2C    │ (1B)  │  0x10  │
/// └────────┴────────┴───────────┴───────┴────────┘
/// ```
pub fn encode(opcode: Opcode, value: u8) -> Result<[u8; COMMAND_LEN]> {
    opcode.check_value(value)?;
    Ok([HEADER, opcode as u8, SEPARATOR, value, FOOTER])
}

/// Request an immediate status frame.
pub fn status_request() -> [u8; COMMAND_LEN] {
    [HEADER, Opcode::Status as u8, SEPARATOR, 0, FOOTER]
}

/// Authorize the pending charging session.
pub fn authorize() -> [u8; COMMAND_LEN] {
    [HEADER, Opcode::Authorize as u8, SEPARATOR, 1, FOOTER]
}

/// Stop the running charging session.
pub fn charge_stop() -> [u8; COMMAND_LEN] {
    [HEADER, Opcode::Stop as u8, SEPARATOR, STOP_CODE, FOOTER]
}

/// Set the maximum charging current. Rejects values outside 6..=32 A.
pub fn set_current(amperage: u8) -> Result<[u8; COMMAND_LEN]> {
    encode(Opcode::SetCurrent, amperage)
}

/// Check that `bytes` is a well-formed command frame and return it by value.
pub fn validate_command(bytes: &[u8]) -> Result<[u8; COMMAND_LEN]> {
    let frame: [u8; COMMAND_LEN] = bytes
        .try_into()
        .map_err(|_| FrameError::InvalidCommandLength { len: bytes.len() })?;
    Ok(frame)
}

/// A loosely typed status field value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    /// Integer first, then float, otherwise the raw text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if let Ok(int) = raw.parse::<i64>() {
            return FieldValue::Int(int);
        }
        match raw.parse::<f64>() {
            Ok(float) if float.is_finite() => FieldValue::Float(float),
            _ => FieldValue::Text(raw.to_string()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Whole-number value: integers, and floats with no fractional part
    /// (`5.0` reads as `5`).
    pub fn as_integral(&self) -> Option<i64> {
        match self {
            FieldValue::Int(value) => Some(*value),
            FieldValue::Float(value)
                if value.fract() == 0.0 && value.abs() < i64::MAX as f64 =>
            {
                Some(*value as i64)
            }
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Int(value) => Some(*value as f64),
            FieldValue::Float(value) => Some(*value),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            _ => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(value) => write!(f, "{value}"),
            FieldValue::Float(value) => write!(f, "{value}"),
            FieldValue::Text(value) => f.write_str(value),
        }
    }
}

/// A decoded `<STAT;...;>` telemetry frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusFrame {
    fields: BTreeMap<String, FieldValue>,
    #[serde(rename = "timestamp", serialize_with = "unix_seconds")]
    captured_at: SystemTime,
}

impl StatusFrame {
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Raw `STATE` code, when present and a whole number.
    pub fn state_code(&self) -> Option<i64> {
        self.get("STATE").and_then(FieldValue::as_integral)
    }

    /// `STATE` mapped onto the state table.
    pub fn state(&self) -> Option<DeviceState> {
        self.state_code().and_then(DeviceState::from_code)
    }

    pub fn state_name(&self) -> Option<&str> {
        self.get(STATE_NAME_KEY).and_then(FieldValue::as_str)
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Time since capture; `None` when the clock has moved backwards.
    pub fn age(&self) -> Option<Duration> {
        self.captured_at.elapsed().ok()
    }

    /// Replace the capture timestamp.
    pub fn with_captured_at(mut self, captured_at: SystemTime) -> Self {
        self.captured_at = captured_at;
        self
    }
}

/// A decoded `<ACK;CMD=...;STATUS=...;>` frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AckFrame {
    pub command: String,
    pub status: String,
    pub fields: BTreeMap<String, String>,
    #[serde(rename = "timestamp", serialize_with = "unix_seconds")]
    pub received_at: SystemTime,
}

impl AckFrame {
    /// Whether `status` is one of `accepted` (case-insensitive).
    pub fn status_is_any(&self, accepted: &[&str]) -> bool {
        accepted
            .iter()
            .any(|ok| self.status.eq_ignore_ascii_case(ok))
    }
}

/// Which kind of text frame a line carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Status,
    Ack,
    Other,
}

/// Classify a received line by its frame prefix.
pub fn classify_line(line: &str) -> LineKind {
    let line = line.trim_start();
    if line.starts_with(STAT_PREFIX) {
        LineKind::Status
    } else if line.starts_with(ACK_PREFIX) {
        LineKind::Ack
    } else {
        LineKind::Other
    }
}

/// Decode a status line. Returns `None` for anything that is not a complete
/// `<STAT;...>` frame with at least one field.
pub fn decode_status(line: &str) -> Option<StatusFrame> {
    let body = frame_body(line, STAT_PREFIX)?;

    let mut fields = BTreeMap::new();
    for (key, value) in pairs(body) {
        fields.insert(key.to_string(), FieldValue::parse(value));
    }
    if fields.is_empty() {
        return None;
    }

    if let Some(state) = fields.get("STATE") {
        let name = match state.as_integral() {
            Some(code) => state_name(code),
            None => format!("UNKNOWN_{state}"),
        };
        fields.insert(STATE_NAME_KEY.to_string(), FieldValue::Text(name));
    }

    Some(StatusFrame {
        fields,
        captured_at: SystemTime::now(),
    })
}

/// Decode an ACK line. Every `key=value` pair becomes a string field.
pub fn decode_ack(line: &str) -> Option<AckFrame> {
    if line.trim().is_empty() {
        return None;
    }
    let body = frame_body(line, ACK_PREFIX)?;

    let fields: BTreeMap<String, String> = pairs(body)
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();

    Some(AckFrame {
        command: fields.get("CMD").cloned().unwrap_or_default(),
        status: fields.get("STATUS").cloned().unwrap_or_default(),
        fields,
        received_at: SystemTime::now(),
    })
}

/// The text between `prefix` and the closing `>`.
fn frame_body<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let start = line.find(prefix)? + prefix.len();
    let rest = &line[start..];
    let end = rest.rfind(CLOSING)?;
    Some(&rest[..end])
}

/// Non-empty `key=value` segments; blank segments and keyless values are skipped.
fn pairs(body: &str) -> impl Iterator<Item = (&str, &str)> {
    body.split(';').filter_map(|segment| {
        let (key, value) = segment.trim().split_once('=')?;
        let key = key.trim();
        (!key.is_empty()).then(|| (key, value.trim()))
    })
}

fn unix_seconds<S: Serializer>(time: &SystemTime, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    serializer.serialize_f64(secs)
}

//! The controller's charging state table.
//!
//! `STATE` in a status frame is one of nine codes. The numbering is the
//! firmware's and is not a linear progression: the two fault codes sit at
//! both ends of the range.

use std::fmt;

use serde::{Serialize, Serializer};

/// One of the nine controller states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum DeviceState {
    /// A hard fault has cleared; the controller is coming back up.
    HardFaultEnd = 0,
    Started = 1,
    Idle = 2,
    CableConnect = 3,
    EvConnect = 4,
    Charging = 5,
    Paused = 6,
    Stopped = 7,
    /// Latched hard fault.
    FaultHard = 8,
}

impl DeviceState {
    pub const ALL: [DeviceState; 9] = [
        DeviceState::HardFaultEnd,
        DeviceState::Started,
        DeviceState::Idle,
        DeviceState::CableConnect,
        DeviceState::EvConnect,
        DeviceState::Charging,
        DeviceState::Paused,
        DeviceState::Stopped,
        DeviceState::FaultHard,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        u8::try_from(code)
            .ok()
            .and_then(|code| Self::ALL.get(usize::from(code)).copied())
    }

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceState::HardFaultEnd => "HARDFAULT_END",
            DeviceState::Started => "STARTED",
            DeviceState::Idle => "IDLE",
            DeviceState::CableConnect => "CABLE_CONNECT",
            DeviceState::EvConnect => "EV_CONNECT",
            DeviceState::Charging => "CHARGING",
            DeviceState::Paused => "PAUSED",
            DeviceState::Stopped => "STOPPED",
            DeviceState::FaultHard => "FAULT_HARD",
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for DeviceState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

/// Human-readable name for a raw `STATE` code, `UNKNOWN_<n>` outside the table.
pub fn state_name(code: i64) -> String {
    match DeviceState::from_code(code) {
        Some(state) => state.name().to_string(),
        None => format!("UNKNOWN_{code}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_both_ways() {
        for state in DeviceState::ALL {
            assert_eq!(DeviceState::from_code(i64::from(state.code())), Some(state));
        }
    }

    #[test]
    fn out_of_table_codes() {
        assert_eq!(DeviceState::from_code(9), None);
        assert_eq!(DeviceState::from_code(-1), None);
        assert_eq!(state_name(9), "UNKNOWN_9");
        assert_eq!(state_name(-3), "UNKNOWN_-3");
        assert_eq!(state_name(6), "PAUSED");
    }

    #[test]
    fn serializes_as_code() {
        let json = serde_json::to_string(&DeviceState::Charging).unwrap();
        assert_eq!(json, "5");
    }
}

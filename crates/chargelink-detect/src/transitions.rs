use chargelink_frame::DeviceState;

use crate::events::EventKind;

/// Map a committed state change onto its domain event.
///
/// Entering `FAULT_HARD` is always a fault unless it comes from
/// `HARDFAULT_END`. Pairs outside the table are a generic state change.
pub fn classify(from: DeviceState, to: DeviceState) -> EventKind {
    use DeviceState::*;

    match (from, to) {
        (Idle, CableConnect) => EventKind::CableConnected,
        (CableConnect, EvConnect) => EventKind::EvConnected,
        (HardFaultEnd, Idle) | (Started, Idle) => EventKind::ChargeReady,
        (EvConnect, Charging) | (Paused, Charging) => EventKind::ChargeStarted,
        (Charging, Paused) => EventKind::ChargePaused,
        (Charging, Stopped) | (Paused, Stopped) => EventKind::ChargeStopped,
        (CableConnect, Idle) | (EvConnect, Idle) | (Stopped, Idle) => {
            EventKind::CableDisconnected
        }
        (from, FaultHard) if from != HardFaultEnd => EventKind::FaultDetected,
        _ => EventKind::StateChanged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_pairs() {
        use DeviceState::*;

        let cases = [
            (Idle, CableConnect, EventKind::CableConnected),
            (CableConnect, EvConnect, EventKind::EvConnected),
            (HardFaultEnd, Idle, EventKind::ChargeReady),
            (Started, Idle, EventKind::ChargeReady),
            (EvConnect, Charging, EventKind::ChargeStarted),
            (Paused, Charging, EventKind::ChargeStarted),
            (Charging, Paused, EventKind::ChargePaused),
            (Charging, Stopped, EventKind::ChargeStopped),
            (Paused, Stopped, EventKind::ChargeStopped),
            (CableConnect, Idle, EventKind::CableDisconnected),
            (EvConnect, Idle, EventKind::CableDisconnected),
            (Stopped, Idle, EventKind::CableDisconnected),
        ];
        for (from, to, expected) in cases {
            assert_eq!(classify(from, to), expected, "{from} -> {to}");
        }
    }

    #[test]
    fn fault_from_anywhere_but_recovery() {
        for from in DeviceState::ALL {
            let expected = if from == DeviceState::HardFaultEnd {
                EventKind::StateChanged
            } else {
                EventKind::FaultDetected
            };
            assert_eq!(classify(from, DeviceState::FaultHard), expected);
        }
    }

    #[test]
    fn unknown_pairs_are_generic() {
        assert_eq!(
            classify(DeviceState::Idle, DeviceState::Charging),
            EventKind::StateChanged
        );
        assert_eq!(
            classify(DeviceState::FaultHard, DeviceState::HardFaultEnd),
            EventKind::StateChanged
        );
    }
}

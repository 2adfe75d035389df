use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use chargelink_frame::{DeviceState, StatusFrame};
use parking_lot::RwLock;
use serde::{Serialize, Serializer};
use tracing::{debug, error};

/// Charging lifecycle notifications derived from device state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    CableConnected,
    EvConnected,
    ChargeReady,
    ChargeStarted,
    ChargePaused,
    ChargeStopped,
    ChargeStartRequested,
    CableDisconnected,
    FaultDetected,
    StateChanged,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::CableConnected,
        EventKind::EvConnected,
        EventKind::ChargeReady,
        EventKind::ChargeStarted,
        EventKind::ChargePaused,
        EventKind::ChargeStopped,
        EventKind::ChargeStartRequested,
        EventKind::CableDisconnected,
        EventKind::FaultDetected,
        EventKind::StateChanged,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::CableConnected => "CABLE_CONNECTED",
            EventKind::EvConnected => "EV_CONNECTED",
            EventKind::ChargeReady => "CHARGE_READY",
            EventKind::ChargeStarted => "CHARGE_STARTED",
            EventKind::ChargePaused => "CHARGE_PAUSED",
            EventKind::ChargeStopped => "CHARGE_STOPPED",
            EventKind::ChargeStartRequested => "CHARGE_START_REQUESTED",
            EventKind::CableDisconnected => "CABLE_DISCONNECTED",
            EventKind::FaultDetected => "FAULT_DETECTED",
            EventKind::StateChanged => "STATE_CHANGED",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One published event with the transition that produced it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainEvent {
    pub kind: EventKind,
    pub from_state: DeviceState,
    pub to_state: DeviceState,
    pub from_state_name: &'static str,
    pub to_state_name: &'static str,
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: SystemTime,
    pub raw_status: Option<StatusFrame>,
}

impl DomainEvent {
    pub fn new(
        kind: EventKind,
        from: DeviceState,
        to: DeviceState,
        raw_status: Option<StatusFrame>,
    ) -> Self {
        Self {
            kind,
            from_state: from,
            to_state: to,
            from_state_name: from.name(),
            to_state_name: to.name(),
            timestamp: SystemTime::now(),
            raw_status,
        }
    }
}

fn unix_seconds<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
    let secs = time
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default();
    serializer.serialize_f64(secs)
}

/// Handle returned by [`EventBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&DomainEvent) + Send + Sync>;

/// Callback registry for domain events.
///
/// Publishing iterates over a snapshot of the subscriber list, so callbacks
/// may register or unregister while an event is being delivered. A panicking
/// callback is logged and skipped; the remaining callbacks still run.
#[derive(Default)]
pub struct EventBus {
    next_id: AtomicU64,
    subscribers: RwLock<Vec<(SubscriptionId, Subscriber)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&DomainEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push((id, Arc::new(callback)));
        debug!(id = id.0, "event subscriber registered");
        id
    }

    /// Returns `false` if `id` was not registered.
    pub fn unregister(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|(existing, _)| *existing != id);
        before != subscribers.len()
    }

    pub fn len(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().is_empty()
    }

    /// Deliver `event` to every subscriber. Returns how many returned normally.
    pub fn publish(&self, event: &DomainEvent) -> usize {
        let snapshot: Vec<(SubscriptionId, Subscriber)> = self.subscribers.read().clone();
        let mut delivered = 0;
        for (id, callback) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => delivered += 1,
                Err(_) => error!(id = id.0, event = %event.kind, "event subscriber panicked"),
            }
        }
        delivered
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;

    fn paused() -> DomainEvent {
        DomainEvent::new(
            EventKind::ChargePaused,
            DeviceState::Charging,
            DeviceState::Paused,
            None,
        )
    }

    #[test]
    fn names_are_screaming_snake_case() {
        assert_eq!(EventKind::ChargeStartRequested.to_string(), "CHARGE_START_REQUESTED");
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn event_carries_state_names() {
        let event = paused();
        assert_eq!(event.from_state_name, "CHARGING");
        assert_eq!(event.to_state_name, "PAUSED");

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "CHARGE_PAUSED");
        assert_eq!(json["from_state"], 5);
        assert_eq!(json["to_state"], 6);
        assert!(json["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn every_subscriber_sees_every_event() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = Arc::clone(&seen);
            bus.register(move |event| seen.lock().push((tag, event.kind)));
        }

        assert_eq!(bus.publish(&paused()), 2);
        assert_eq!(
            *seen.lock(),
            vec![("a", EventKind::ChargePaused), ("b", EventKind::ChargePaused)]
        );
    }

    #[test]
    fn unregister_stops_delivery() {
        let bus = EventBus::new();
        let id = bus.register(|_| {});
        assert_eq!(bus.len(), 1);
        assert!(bus.unregister(id));
        assert!(!bus.unregister(id));
        assert_eq!(bus.publish(&paused()), 0);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicU64::new(0));
        bus.register(|_| panic!("subscriber failure"));
        let counter = Arc::clone(&count);
        bus.register(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(&paused()), 1);
        assert_eq!(bus.publish(&paused()), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert_eq!(bus.len(), 2);
    }

    #[test]
    fn subscriber_may_unregister_itself_during_delivery() {
        let bus = Arc::new(EventBus::new());
        let slot = Arc::new(Mutex::new(None));
        let bus_ref = Arc::clone(&bus);
        let slot_ref = Arc::clone(&slot);
        let id = bus.register(move |_| {
            if let Some(id) = slot_ref.lock().take() {
                bus_ref.unregister(id);
            }
        });
        *slot.lock() = Some(id);

        assert_eq!(bus.publish(&paused()), 1);
        assert!(bus.is_empty());
    }
}

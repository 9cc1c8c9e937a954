//! Outbound notifications about traffic identities
//!
//! The simulation never talks to sockets. It reports identity changes through
//! this fire-and-forget capability; the network layer turns them into packets.

use parking_lot::Mutex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotEvent {
    Connected { name: String },
    Disconnected,
    VisibilityChanged { visible: bool },
}

pub trait Broadcaster: Send + Sync {
    fn notify(&self, session_id: u8, event: SlotEvent);
}

/// Drops every event. Useful for headless simulation runs.
#[derive(Debug, Default)]
pub struct NullBroadcaster;

impl Broadcaster for NullBroadcaster {
    fn notify(&self, _session_id: u8, _event: SlotEvent) {}
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<(u8, SlotEvent)>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(u8, SlotEvent)> {
        self.events.lock().clone()
    }

    pub fn take(&self) -> Vec<(u8, SlotEvent)> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn notify(&self, session_id: u8, event: SlotEvent) {
        self.events.lock().push((session_id, event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_broadcaster_keeps_order() {
        let broadcaster = RecordingBroadcaster::new();
        broadcaster.notify(1, SlotEvent::Disconnected);
        broadcaster.notify(
            2,
            SlotEvent::Connected {
                name: "Traffic 2".to_string(),
            },
        );

        let events = broadcaster.take();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], (1, SlotEvent::Disconnected));
        assert!(broadcaster.events().is_empty());
    }
}

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::event::TelemetryEvent;
use super::metrics::{compute_snapshot, TelemetrySnapshot};
use crate::kernel::bus::{EventBus, Subscription};
use crate::kernel::event::PacketType;

const MAX_EVENTS: usize = 10_000;

const OBSERVED: [PacketType; 4] = [
    PacketType::TickLifecycle,
    PacketType::GateDecision,
    PacketType::TickCommit,
    PacketType::AutonomyTelemetry,
];

#[derive(Debug)]
pub struct TelemetryRecorder {
    buffer: VecDeque<TelemetryEvent>,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryRecorder {
    pub fn new() -> Self {
        Self {
            buffer: VecDeque::with_capacity(MAX_EVENTS),
        }
    }

    pub fn record(&mut self, event: TelemetryEvent) {
        if self.buffer.len() >= MAX_EVENTS {
            self.buffer.pop_front();
        }
        self.buffer.push_back(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        compute_snapshot(&self.buffer)
    }

    pub fn events(&self) -> &VecDeque<TelemetryEvent> {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Recorder fed by bus subscriptions.
#[derive(Clone, Default)]
pub struct SharedRecorder {
    inner: Arc<Mutex<TelemetryRecorder>>,
}

impl SharedRecorder {
    pub fn attach(bus: &EventBus) -> (Self, Vec<Subscription>) {
        let recorder = Self::default();
        let subscriptions = OBSERVED
            .iter()
            .map(|kind| {
                let sink = recorder.clone();
                bus.subscribe(*kind, move |packet| {
                    if let Some(event) = TelemetryEvent::from_payload(&packet.payload) {
                        sink.record(event);
                    }
                })
            })
            .collect();
        (recorder, subscriptions)
    }

    pub fn record(&self, event: TelemetryEvent) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).record(event);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).snapshot()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).events().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

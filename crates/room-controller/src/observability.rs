//! Health state and metric recording.
//!
//! Metric names are defined here so the registry and relay record
//! through one choke point. The Prometheus recorder itself is installed
//! by the binary.

use std::sync::atomic::{AtomicBool, Ordering};

/// Liveness/readiness flags for the probe endpoints.
#[derive(Debug)]
pub struct HealthState {
    live: AtomicBool,
    ready: AtomicBool,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Rooms created (counter), including join auto-creation.
pub fn record_room_created() {
    metrics::counter!("registry_rooms_created_total").increment(1);
}

/// Current room/participant gauges.
pub fn record_occupancy(rooms: usize, participants: usize) {
    metrics::gauge!("registry_rooms_active").set(usize_to_f64(rooms));
    metrics::gauge!("registry_participants_active").set(usize_to_f64(participants));
}

/// A negotiation message was forwarded to its target.
pub fn record_relay_forwarded() {
    metrics::counter!("relay_messages_forwarded_total").increment(1);
}

/// A negotiation message was dropped (unknown room/target/closed
/// connection). Silent drops are policy; the counter is the only trace.
pub fn record_relay_dropped() {
    metrics::counter!("relay_messages_dropped_total").increment(1);
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(n: usize) -> f64 {
    n as f64
}

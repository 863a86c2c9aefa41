//! Domain event types and the emitter trait that decouples services from
//! transport.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::session::handle::SessionHandle;

/// Session lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    Handshaking { session: SessionHandle, timestamp: i64 },
    Active { session: SessionHandle, timestamp: i64 },
    TimedOut { session: SessionHandle, timestamp: i64 },
    Terminated { session: SessionHandle, timestamp: i64 },
    Refused { session: SessionHandle, reason: String, timestamp: i64 },
}

/// Pipeline/codec events (reinit, key frame requests, decode failures).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    VideoReinit { session: SessionHandle, init_id: u64, timestamp: i64 },
    AudioReinit { session: SessionHandle, init_id: u64, timestamp: i64 },
    KeyFrameRequested { session: SessionHandle, timestamp: i64 },
    AudioPacketsDropped { session: SessionHandle, count: u32, timestamp: i64 },
}

/// Network/transport health events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NetworkEvent {
    FragmentSizeChanged { session: SessionHandle, new_size: u32, timestamp: i64 },
    LatencyMeasured { session: SessionHandle, latency_us: i64, timestamp: i64 },
    FrameWatchdogTripped { session: SessionHandle, timestamp: i64 },
}

/// Top-level broadcast envelope carried over the broadcast channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "event", rename_all = "camelCase")]
pub enum BroadcastEvent {
    Session(SessionEvent),
    Pipeline(PipelineEvent),
    Network(NetworkEvent),
}

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    fn emit_session(&self, event: SessionEvent);
    fn emit_pipeline(&self, event: PipelineEvent);
    fn emit_network(&self, event: NetworkEvent);
}

/// Discards every event. Used for headless operation with no subscriber surface.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_session(&self, _event: SessionEvent) {}
    fn emit_pipeline(&self, _event: PipelineEvent) {}
    fn emit_network(&self, _event: NetworkEvent) {}
}

/// Bridges domain events to a `tokio::sync::broadcast` channel.
///
/// Transports and API layers subscribe to this bridge rather than reaching
/// into individual services, exactly as `BroadcastEventBridge` does for
/// WebSocket delivery.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0 (`broadcast::channel` panics on 0).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("no broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_session, SessionEvent, Session);
    impl_emit!(emit_pipeline, PipelineEvent, Pipeline);
    impl_emit!(emit_network, NetworkEvent, Network);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscriber_receives_emitted_event() {
        let bridge = BroadcastEventBridge::new(8);
        let mut rx = bridge.subscribe();
        bridge.emit_session(SessionEvent::Active {
            session: SessionHandle::new(1),
            timestamp: 0,
        });
        let received = rx.try_recv().unwrap();
        assert!(matches!(received, BroadcastEvent::Session(SessionEvent::Active { .. })));
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.emit_network(NetworkEvent::LatencyMeasured {
            session: SessionHandle::new(1),
            latency_us: 500,
            timestamp: 0,
        });
    }
}

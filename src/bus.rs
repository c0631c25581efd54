//! Event bus: the shared publish/subscribe surface for decoded frames.
//!
//! The transport publishes every decoded inbound frame here, keyed by its
//! [`FrameKind`]; mediators, keep-alive services and tests subscribe to the
//! kinds they care about. The bus is injectable — every session is built
//! around its own instance, so independent sessions never cross-talk.
//!
//! # Example
//!
//! ```ignore
//! use pulsewire_client::bus::EventBus;
//! use pulsewire_client::protocol::{Frame, FrameKind};
//!
//! let bus = EventBus::new();
//! let mut rx = bus.subscribe(FrameKind::Pong);
//! bus.publish(Frame::Pong);
//! let frame = rx.recv().await.unwrap();
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::protocol::{Frame, FrameKind};

/// Default per-kind channel capacity.
///
/// Sized above the default receive window so a full window of pushed
/// messages never lags a live subscriber.
pub const DEFAULT_BUS_CAPACITY: usize = 1024;

/// Process-scoped publish/subscribe surface keyed by frame kind.
///
/// Cheaply cloneable; clones share the same channels.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    topics: Mutex<HashMap<FrameKind, broadcast::Sender<Frame>>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus with the default per-kind capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus with a custom per-kind capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                capacity,
            }),
        }
    }

    /// Subscribe to every future frame of the given kind.
    pub fn subscribe(&self, kind: FrameKind) -> broadcast::Receiver<Frame> {
        let mut topics = self.inner.topics.lock().expect("bus lock poisoned");
        topics
            .entry(kind)
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe()
    }

    /// Publish a frame to the subscribers of its kind.
    ///
    /// Returns the number of subscribers reached. Frames of a kind nobody
    /// subscribes to are dropped.
    pub fn publish(&self, frame: Frame) -> usize {
        let kind = frame.kind();
        let sender = {
            let topics = self.inner.topics.lock().expect("bus lock poisoned");
            topics.get(&kind).cloned()
        };

        match sender {
            Some(sender) => sender.send(frame).unwrap_or_else(|_| {
                tracing::debug!(?kind, "dropping frame: all subscribers gone");
                0
            }),
            None => {
                tracing::debug!(?kind, "dropping frame: no subscribers");
                0
            }
        }
    }

    /// Number of live subscribers for a kind.
    pub fn subscriber_count(&self, kind: FrameKind) -> usize {
        let topics = self.inner.topics.lock().expect("bus lock poisoned");
        topics.get(&kind).map(|s| s.receiver_count()).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

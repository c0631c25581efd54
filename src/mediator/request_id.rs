//! Id-bearing response mediation.
//!
//! Every entity (consumer, producer) owns one [`RequestIdMediator`] scoped to
//! the response kinds it awaits. The mediator keeps a pending-request map
//! keyed by `(kind, request id)`; a background dispatcher task per kind
//! drains the bus subscription and resolves waiters. Responses with no
//! registered waiter are dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::bus::EventBus;
use crate::error::{ClientError, Result};
use crate::protocol::{Command, Frame, FrameKind};
use crate::transport::SharedTransport;

/// A registered waiter, shared between the sibling `(kind, id)` entries of
/// one request so whichever kind arrives first takes the sender.
struct WaiterSlot {
    kinds: Vec<FrameKind>,
    tx: Option<oneshot::Sender<Frame>>,
}

type PendingMap = Arc<Mutex<HashMap<(FrameKind, u64), Arc<Mutex<WaiterSlot>>>>>;

/// Correlates id-bearing requests with their responses.
pub struct RequestIdMediator {
    pending: PendingMap,
    kinds: Vec<FrameKind>,
    timeout: Duration,
    dispatchers: Vec<JoinHandle<()>>,
}

impl RequestIdMediator {
    /// Create a mediator observing `kinds`, with the shared request timeout.
    ///
    /// Spawns one dispatcher task per kind; must be called within a Tokio
    /// runtime.
    pub fn new(bus: &EventBus, kinds: Vec<FrameKind>, timeout: Duration) -> Self {
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let mut dispatchers = Vec::with_capacity(kinds.len());

        for &kind in &kinds {
            let mut rx = bus.subscribe(kind);
            let pending = pending.clone();
            dispatchers.push(tokio::spawn(async move {
                loop {
                    match rx.recv().await {
                        Ok(frame) => resolve(&pending, frame),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(?kind, skipped = n, "mediator lagged behind the bus");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }));
        }

        Self {
            pending,
            kinds,
            timeout,
            dispatchers,
        }
    }

    /// Send an id-bearing command and await its matching response.
    ///
    /// The waiter is registered before the transport send so a fast response
    /// cannot be missed. A broker `Error` frame resolves the waiter and
    /// surfaces as [`ClientError::Broker`]. No response within the configured
    /// bound removes the waiter and returns [`ClientError::ResponseTimeout`];
    /// any broker-side effect already in flight is not retracted.
    pub async fn send(&self, transport: &SharedTransport, command: Command) -> Result<Frame> {
        let request_id = command.request_id().ok_or_else(|| {
            ClientError::Protocol("id-less command sent through the request-id mediator".into())
        })?;

        let rx = self.register(request_id)?;

        if let Err(err) = transport.send_simple(command).await {
            self.remove(request_id);
            return Err(err);
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(Frame::Error {
                code, message, ..
            })) => Err(ClientError::Broker { code, message }),
            Ok(Ok(frame)) => Ok(frame),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_) => {
                self.remove(request_id);
                Err(ClientError::ResponseTimeout(self.timeout))
            }
        }
    }

    /// Number of unresolved requests.
    pub fn pending_count(&self) -> usize {
        let map = self.pending.lock().expect("pending lock poisoned");
        let mut ids: Vec<u64> = map.keys().map(|(_, id)| *id).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Register a waiter for `request_id` under every observed kind.
    fn register(&self, request_id: u64) -> Result<oneshot::Receiver<Frame>> {
        let (tx, rx) = oneshot::channel();
        let slot = Arc::new(Mutex::new(WaiterSlot {
            kinds: self.kinds.clone(),
            tx: Some(tx),
        }));

        let mut map = self.pending.lock().expect("pending lock poisoned");
        for &kind in &self.kinds {
            if map.contains_key(&(kind, request_id)) {
                return Err(ClientError::Protocol(format!(
                    "request id {request_id} already has an unresolved waiter"
                )));
            }
        }
        for &kind in &self.kinds {
            map.insert((kind, request_id), slot.clone());
        }
        Ok(rx)
    }

    /// Remove every entry for `request_id` (timeout or failed send).
    fn remove(&self, request_id: u64) {
        let mut map = self.pending.lock().expect("pending lock poisoned");
        for &kind in &self.kinds {
            map.remove(&(kind, request_id));
        }
    }
}

impl Drop for RequestIdMediator {
    fn drop(&mut self) {
        for task in &self.dispatchers {
            task.abort();
        }
    }
}

/// Resolve the waiter matching this frame's `(kind, request id)`, if any.
fn resolve(pending: &PendingMap, frame: Frame) {
    let Some(request_id) = frame.request_id() else {
        return;
    };
    let key = (frame.kind(), request_id);

    let slot = {
        let map = pending.lock().expect("pending lock poisoned");
        map.get(&key).cloned()
    };
    let Some(slot) = slot else {
        tracing::debug!(kind = ?key.0, request_id, "dropping response with no waiter");
        return;
    };

    let (tx, kinds) = {
        let mut slot = slot.lock().expect("waiter lock poisoned");
        (slot.tx.take(), slot.kinds.clone())
    };
    {
        let mut map = pending.lock().expect("pending lock poisoned");
        for kind in kinds {
            map.remove(&(kind, request_id));
        }
    }
    if let Some(tx) = tx {
        // Receiver may have timed out concurrently; nothing left to do then.
        let _ = tx.send(frame);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    fn mediator(bus: &EventBus, timeout: Duration) -> RequestIdMediator {
        RequestIdMediator::new(
            bus,
            vec![FrameKind::Success, FrameKind::Error, FrameKind::AckResponse],
            timeout,
        )
    }

    #[tokio::test]
    async fn test_send_resolves_on_matching_id() {
        let bus = EventBus::new();
        let mediator = mediator(&bus, Duration::from_secs(1));
        let (transport, _sent) = MemoryTransport::new(bus.clone());
        let shared = SharedTransport::with_transport(transport.clone());

        let send = mediator.send(&shared, Command::unsubscribe(0, 7));
        let respond = async {
            tokio::task::yield_now().await;
            transport.inject(Frame::Success { request_id: 7 });
        };

        let (result, _) = tokio::join!(send, respond);
        assert_eq!(result.unwrap().request_id(), Some(7));
        assert_eq!(mediator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_id_is_dropped() {
        let bus = EventBus::new();
        let mediator = mediator(&bus, Duration::from_millis(50));
        let (transport, _sent) = MemoryTransport::new(bus.clone());
        let shared = SharedTransport::with_transport(transport.clone());

        let send = mediator.send(&shared, Command::unsubscribe(0, 7));
        let respond = async {
            tokio::task::yield_now().await;
            // Wrong id: no waiter exists, so the frame is dropped and the
            // request times out.
            transport.inject(Frame::Success { request_id: 99 });
        };

        let (result, _) = tokio::join!(send, respond);
        assert!(matches!(result, Err(ClientError::ResponseTimeout(_))));
    }

    #[tokio::test]
    async fn test_broker_error_carries_payload() {
        let bus = EventBus::new();
        let mediator = mediator(&bus, Duration::from_secs(1));
        let (transport, _sent) = MemoryTransport::new(bus.clone());
        let shared = SharedTransport::with_transport(transport.clone());

        let send = mediator.send(&shared, Command::unsubscribe(0, 3));
        let respond = async {
            tokio::task::yield_now().await;
            transport.inject(Frame::Error {
                request_id: 3,
                code: 21,
                message: "unknown subscription".into(),
            });
        };

        let (result, _) = tokio::join!(send, respond);
        match result {
            Err(ClientError::Broker { code, message }) => {
                assert_eq!(code, 21);
                assert_eq!(message, "unknown subscription");
            }
            other => panic!("expected broker error, got {other:?}"),
        }
        assert_eq!(mediator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_removes_waiter() {
        let bus = EventBus::new();
        let mediator = mediator(&bus, Duration::from_millis(20));
        let (transport, _sent) = MemoryTransport::new(bus.clone());
        let shared = SharedTransport::with_transport(transport);

        let result = mediator.send(&shared, Command::unsubscribe(0, 1)).await;
        assert!(matches!(result, Err(ClientError::ResponseTimeout(_))));
        assert_eq!(mediator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_request_id_rejected() {
        let bus = EventBus::new();
        let mediator = mediator(&bus, Duration::from_secs(5));
        let (transport, _sent) = MemoryTransport::new(bus.clone());
        let shared = SharedTransport::with_transport(transport.clone());

        let first = mediator.send(&shared, Command::unsubscribe(0, 5));
        let second = async {
            tokio::task::yield_now().await;
            let result = mediator.send(&shared, Command::unsubscribe(0, 5)).await;
            assert!(matches!(result, Err(ClientError::Protocol(_))));
            transport.inject(Frame::Success { request_id: 5 });
        };

        let (first, _) = tokio::join!(first, second);
        assert!(first.is_ok());
    }

    #[tokio::test]
    async fn test_failed_send_removes_waiter() {
        let bus = EventBus::new();
        let mediator = mediator(&bus, Duration::from_secs(1));
        let (transport, _sent) = MemoryTransport::new(bus.clone());
        transport.fail_next_sends(1);
        let shared = SharedTransport::with_transport(transport);

        let result = mediator.send(&shared, Command::unsubscribe(0, 2)).await;
        assert!(matches!(result, Err(ClientError::Connection(_))));
        assert_eq!(mediator.pending_count(), 0);
    }
}

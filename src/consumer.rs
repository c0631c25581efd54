//! Consumer flow controller.
//!
//! Credit-based delivery throttling, an ordered receive queue and
//! acknowledgment emission, driven by two tasks while the consumer is
//! flowing:
//!
//! - **pump** - drains the `Message` broadcast into the FIFO receive queue,
//!   decrements credit and issues half-window flow replenishments
//! - **delivery** - pops the oldest queued message and invokes the handler,
//!   waking on enqueue and falling back to timed polling when idle
//!
//! The lifecycle is `Unsubscribed -> Subscribed -> Flowing -> Unsubscribed`;
//! `unsubscribe()` is the sole cooperative stop signal, observed before each
//! dequeue.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::client::Client;
use crate::config::ConsumerConfig;
use crate::error::{ClientError, Result};
use crate::mediator::RequestIdMediator;
use crate::protocol::{AckType, Command, Frame, FrameKind, MessageIdData, MessageMetadata};
use crate::transport::SharedTransport;

/// Consumer lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Unsubscribed,
    Subscribed,
    Flowing,
}

/// Options for the delivery loop.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Emit an individual ack for each message before invoking the handler.
    pub auto_ack: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self { auto_ack: true }
    }
}

/// A message delivered to the application handler.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub consumer_id: u64,
    pub message_id: MessageIdData,
    pub metadata: MessageMetadata,
    pub payload: Bytes,
}

/// Ack capability handed to the handler with every message.
///
/// Available regardless of auto-ack mode, so handlers can always ack
/// cumulatively or defer.
#[derive(Clone)]
pub struct MessageContext {
    consumer_id: u64,
    message_id: MessageIdData,
    transport: SharedTransport,
    mediator: Arc<RequestIdMediator>,
    request_ids: Arc<AtomicU64>,
}

impl MessageContext {
    /// The broker-assigned id of the delivered message.
    pub fn message_id(&self) -> MessageIdData {
        self.message_id
    }

    /// Acknowledge the delivered message, correlated by request id.
    pub async fn ack(&self, ack_type: AckType) -> Result<()> {
        let request_id = self.request_ids.fetch_add(1, Ordering::SeqCst);
        let command = Command::ack(self.consumer_id, request_id, ack_type, self.message_id);
        self.mediator.send(&self.transport, command).await?;
        Ok(())
    }
}

struct ConsumerShared {
    state: Mutex<ConsumerState>,
    queue: Mutex<VecDeque<ReceivedMessage>>,
    /// Wakes the delivery task on enqueue.
    wake: Notify,
    /// Wakes both tasks so they observe the Unsubscribed state.
    stop: Notify,
    credit: AtomicU32,
}

impl ConsumerShared {
    fn state(&self) -> ConsumerState {
        *self.state.lock().expect("state lock poisoned")
    }
}

/// A consumer bound to one topic subscription on a shared session.
pub struct Consumer {
    client: Arc<Client>,
    config: ConsumerConfig,
    mediator: Arc<RequestIdMediator>,
    request_ids: Arc<AtomicU64>,
    shared: Arc<ConsumerShared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Consumer {
    /// Create a consumer on `client` with the given configuration.
    ///
    /// Must be called within a Tokio runtime (the correlation dispatchers
    /// are spawned here).
    pub fn new(client: Arc<Client>, config: ConsumerConfig) -> Self {
        let mediator = Arc::new(RequestIdMediator::new(
            client.bus(),
            vec![FrameKind::Success, FrameKind::Error, FrameKind::AckResponse],
            client.request_timeout(),
        ));
        Self {
            client,
            config,
            mediator,
            request_ids: Arc::new(AtomicU64::new(0)),
            shared: Arc::new(ConsumerShared {
                state: Mutex::new(ConsumerState::Unsubscribed),
                queue: Mutex::new(VecDeque::new()),
                wake: Notify::new(),
                stop: Notify::new(),
                credit: AtomicU32::new(0),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConsumerState {
        self.shared.state()
    }

    /// Remaining flow credit.
    pub fn remaining_credit(&self) -> u32 {
        self.shared.credit.load(Ordering::SeqCst)
    }

    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::SeqCst)
    }

    /// Subscribe to the topic.
    ///
    /// Connects the session first if needed. A broker rejection leaves the
    /// consumer Unsubscribed and surfaces the error.
    pub async fn subscribe(&self) -> Result<()> {
        self.client.connect(&self.config.topic).await?;

        let command = Command::subscribe(
            self.config.topic.clone(),
            self.config.subscription.clone(),
            self.config.sub_type,
            self.config.consumer_id,
            self.next_request_id(),
            self.config.consumer_name.clone(),
            self.config.read_compacted,
        );
        self.mediator.send(self.client.transport(), command).await?;

        *self.shared.state.lock().expect("state lock poisoned") = ConsumerState::Subscribed;
        Ok(())
    }

    /// Start the delivery loop.
    ///
    /// Requires `Subscribed`; never subscribes implicitly. Registers the
    /// receive queue against the `Message` broadcast, grants the broker the
    /// full receive window and spawns the pump and delivery tasks. Returns
    /// once both are running; stop them with [`unsubscribe`](Self::unsubscribe).
    pub async fn run<F, Fut>(&self, options: RunOptions, handler: F) -> Result<()>
    where
        F: Fn(ReceivedMessage, MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock().expect("state lock poisoned");
            if *state != ConsumerState::Subscribed {
                return Err(ClientError::NotSubscribed);
            }
            *state = ConsumerState::Flowing;
        }

        // Queue registration precedes the flow grant so no pushed message
        // can slip past the pump.
        let rx = self.client.broadcasts().subscribe(FrameKind::Message);

        let window = self.config.receive_queue_size;
        self.shared.credit.store(window, Ordering::SeqCst);
        self.client
            .broadcasts()
            .send(
                self.client.transport(),
                Command::flow(self.config.consumer_id, window),
            )
            .await?;

        let pump = spawn_pump(
            rx,
            self.shared.clone(),
            self.client.transport().clone(),
            self.config.consumer_id,
            window,
        );
        let delivery = spawn_delivery(
            self.shared.clone(),
            handler,
            options,
            MessageContext {
                consumer_id: self.config.consumer_id,
                message_id: MessageIdData::new(0, 0),
                transport: self.client.transport().clone(),
                mediator: self.mediator.clone(),
                request_ids: self.request_ids.clone(),
            },
            self.config.poll_backoff,
        );

        let mut tasks = self.tasks.lock().expect("tasks lock poisoned");
        tasks.push(pump);
        tasks.push(delivery);
        Ok(())
    }

    /// Unsubscribe from the topic and stop the delivery loop.
    ///
    /// Already-dequeued messages still complete delivery; the loop observes
    /// the state change before its next dequeue.
    pub async fn unsubscribe(&self) -> Result<()> {
        let command = Command::unsubscribe(self.config.consumer_id, self.next_request_id());
        self.mediator.send(self.client.transport(), command).await?;

        *self.shared.state.lock().expect("state lock poisoned") = ConsumerState::Unsubscribed;
        self.shared.stop.notify_waiters();
        Ok(())
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        let tasks = self.tasks.lock().expect("tasks lock poisoned");
        for task in tasks.iter() {
            task.abort();
        }
    }
}

/// Pump: bus messages into the queue, credit accounting, replenishment.
fn spawn_pump(
    mut rx: tokio::sync::broadcast::Receiver<Frame>,
    shared: Arc<ConsumerShared>,
    transport: SharedTransport,
    consumer_id: u64,
    window: u32,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let half = (window + 1) / 2;
        loop {
            if shared.state() == ConsumerState::Unsubscribed {
                return;
            }
            let frame = tokio::select! {
                _ = shared.stop.notified() => continue,
                frame = rx.recv() => frame,
            };
            match frame {
                Ok(Frame::Message {
                    consumer_id: cid,
                    message_id,
                    metadata,
                    payload,
                }) if cid == consumer_id => {
                    {
                        let mut queue = shared.queue.lock().expect("queue lock poisoned");
                        queue.push_back(ReceivedMessage {
                            consumer_id: cid,
                            message_id,
                            metadata,
                            payload,
                        });
                    }
                    shared.wake.notify_waiters();

                    let credit = shared.credit.load(Ordering::SeqCst).saturating_sub(1);
                    shared.credit.store(credit, Ordering::SeqCst);
                    if credit <= half {
                        // Re-add exactly the half-window amount; requests are
                        // batched at half-window boundaries.
                        shared.credit.store(credit + half, Ordering::SeqCst);
                        if let Err(err) = transport
                            .send_simple(Command::flow(consumer_id, half))
                            .await
                        {
                            tracing::warn!(%err, "flow replenishment failed");
                        }
                    }
                }
                Ok(_) => {} // another consumer's message
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "consumer pump lagged behind the bus");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    })
}

/// Delivery: pop oldest, ack if auto, invoke the handler.
fn spawn_delivery<F, Fut>(
    shared: Arc<ConsumerShared>,
    handler: F,
    options: RunOptions,
    template: MessageContext,
    backoff: std::time::Duration,
) -> JoinHandle<()>
where
    F: Fn(ReceivedMessage, MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            if shared.state() == ConsumerState::Unsubscribed {
                return;
            }
            let message = {
                let mut queue = shared.queue.lock().expect("queue lock poisoned");
                queue.pop_front()
            };

            if let Some(message) = message {
                let ctx = MessageContext {
                    message_id: message.message_id,
                    ..template.clone()
                };
                if options.auto_ack {
                    if let Err(err) = ctx.ack(AckType::Individual).await {
                        tracing::warn!(%err, "auto-ack failed");
                    }
                }
                handler(message, ctx).await;

                let more = !shared
                    .queue
                    .lock()
                    .expect("queue lock poisoned")
                    .is_empty();
                if more {
                    continue;
                }
            }

            // Idle: wake on enqueue or stop, fall back to timed polling.
            tokio::select! {
                _ = shared.wake.notified() => {}
                _ = shared.stop.notified() => {}
                _ = tokio::time::sleep(backoff) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::protocol::SubType;
    use crate::transport::{MemoryTransport, SentCommand};
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Scripted broker: answers handshake and id-bearing commands.
    fn spawn_broker(
        transport: Arc<MemoryTransport>,
        mut rx: mpsc::UnboundedReceiver<SentCommand>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(sent) = rx.recv().await {
                match sent.command {
                    Command::Connect { .. } => transport.inject(Frame::Connected {
                        server_version: "test-broker".into(),
                        protocol_version: 17,
                    }),
                    Command::Subscribe { request_id, .. }
                    | Command::Unsubscribe { request_id, .. } => {
                        transport.inject(Frame::Success { request_id })
                    }
                    Command::Ack {
                        request_id,
                        consumer_id,
                        ..
                    } => transport.inject(Frame::AckResponse {
                        request_id,
                        consumer_id,
                    }),
                    _ => {}
                }
            }
        })
    }

    async fn subscribed_consumer(window: u32) -> (Arc<Consumer>, Arc<MemoryTransport>) {
        let config = ClientConfig::new("test:0").request_timeout(Duration::from_secs(2));
        let client = Arc::new(Client::new(config));
        let (transport, rx) = MemoryTransport::new(client.bus().clone());
        spawn_broker(transport.clone(), rx);
        client.connect_with(transport.clone()).await.unwrap();

        let consumer = Arc::new(Consumer::new(
            client,
            ConsumerConfig::new("topic-a", "sub-a")
                .sub_type(SubType::Shared)
                .consumer_name("c-0")
                .receive_queue_size(window)
                .poll_backoff(Duration::from_millis(20)),
        ));
        consumer.subscribe().await.unwrap();
        (consumer, transport)
    }

    fn push_message(transport: &MemoryTransport, entry_id: u64) {
        transport.inject(Frame::Message {
            consumer_id: 0,
            message_id: MessageIdData::new(1, entry_id),
            metadata: MessageMetadata::default(),
            payload: Bytes::from(format!("m-{entry_id}")),
        });
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_run_requires_subscribe() {
        let client = Arc::new(Client::new(ClientConfig::new("test:0")));
        let consumer = Consumer::new(client, ConsumerConfig::new("t", "s"));

        let result = consumer
            .run(RunOptions::default(), |_msg, _ctx| async {})
            .await;
        assert!(matches!(result, Err(ClientError::NotSubscribed)));
        assert_eq!(consumer.state(), ConsumerState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_subscribe_transitions_state() {
        let (consumer, _transport) = subscribed_consumer(4).await;
        assert_eq!(consumer.state(), ConsumerState::Subscribed);
    }

    #[tokio::test]
    async fn test_broker_rejection_leaves_unsubscribed() {
        let config = ClientConfig::new("test:0").request_timeout(Duration::from_secs(1));
        let client = Arc::new(Client::new(config));
        let (transport, mut rx) = MemoryTransport::new(client.bus().clone());

        // Broker that rejects subscriptions.
        let reject = transport.clone();
        tokio::spawn(async move {
            while let Some(sent) = rx.recv().await {
                match sent.command {
                    Command::Connect { .. } => reject.inject(Frame::Connected {
                        server_version: "test-broker".into(),
                        protocol_version: 17,
                    }),
                    Command::Subscribe { request_id, .. } => reject.inject(Frame::Error {
                        request_id,
                        code: 40,
                        message: "subscription denied".into(),
                    }),
                    _ => {}
                }
            }
        });
        client.connect_with(transport).await.unwrap();

        let consumer = Consumer::new(client, ConsumerConfig::new("t", "s"));
        let result = consumer.subscribe().await;
        assert!(matches!(result, Err(ClientError::Broker { code: 40, .. })));
        assert_eq!(consumer.state(), ConsumerState::Unsubscribed);
    }

    #[tokio::test]
    async fn test_delivery_preserves_broker_order() {
        let (consumer, transport) = subscribed_consumer(10).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        consumer
            .run(RunOptions::default(), move |msg, _ctx| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(msg.message_id.entry_id);
                }
            })
            .await
            .unwrap();

        for entry_id in 0..5 {
            push_message(&transport, entry_id);
        }
        wait_until(|| seen.lock().unwrap().len() == 5).await;
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_auto_ack_emits_individual_acks() {
        let (consumer, transport) = subscribed_consumer(10).await;

        consumer
            .run(RunOptions::default(), |_msg, _ctx| async {})
            .await
            .unwrap();

        push_message(&transport, 7);
        wait_until(|| {
            transport
                .sent()
                .iter()
                .any(|s| matches!(s.command, Command::Ack { .. }))
        })
        .await;

        let sent = transport.sent();
        let ack = sent
            .iter()
            .find_map(|s| match &s.command {
                Command::Ack {
                    ack_type,
                    message_id,
                    ..
                } => Some((*ack_type, *message_id)),
                _ => None,
            })
            .unwrap();
        assert_eq!(ack.0, AckType::Individual);
        assert_eq!(ack.1, MessageIdData::new(1, 7));
    }

    #[tokio::test]
    async fn test_manual_ack_capability() {
        let (consumer, transport) = subscribed_consumer(10).await;

        consumer
            .run(RunOptions { auto_ack: false }, |_msg, ctx| async move {
                ctx.ack(AckType::Cumulative).await.unwrap();
            })
            .await
            .unwrap();

        push_message(&transport, 3);
        wait_until(|| {
            transport
                .sent()
                .iter()
                .any(|s| matches!(s.command, Command::Ack { .. }))
        })
        .await;

        let sent = transport.sent();
        let acks: Vec<_> = sent
            .iter()
            .filter_map(|s| match &s.command {
                Command::Ack { ack_type, .. } => Some(*ack_type),
                _ => None,
            })
            .collect();
        assert_eq!(acks, vec![AckType::Cumulative]);
    }

    #[tokio::test]
    async fn test_flow_replenishment_at_half_window() {
        let (consumer, transport) = subscribed_consumer(4).await;

        consumer
            .run(RunOptions { auto_ack: false }, |_msg, _ctx| async {})
            .await
            .unwrap();

        // Window 4, half 2: replenish after messages 2 and 4, not after 5.
        for entry_id in 0..5 {
            push_message(&transport, entry_id);
        }
        wait_until(|| flow_grants(&transport).len() == 3).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(flow_grants(&transport), vec![4, 2, 2]);
        assert_eq!(consumer.remaining_credit(), 3);
    }

    fn flow_grants(transport: &MemoryTransport) -> Vec<u32> {
        transport
            .sent()
            .iter()
            .filter_map(|s| match s.command {
                Command::Flow {
                    message_permits, ..
                } => Some(message_permits),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_before_next_dequeue() {
        let (consumer, transport) = subscribed_consumer(10).await;

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        consumer
            .run(RunOptions { auto_ack: false }, move |msg, _ctx| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push(msg.message_id.entry_id);
                }
            })
            .await
            .unwrap();

        push_message(&transport, 0);
        wait_until(|| seen.lock().unwrap().len() == 1).await;

        consumer.unsubscribe().await.unwrap();
        assert_eq!(consumer.state(), ConsumerState::Unsubscribed);

        push_message(&transport, 1);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }
}

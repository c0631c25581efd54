//! Producer send pipeline.
//!
//! Publication with access-mode negotiation and tolerance for transient
//! transport loss. Every logical send is tagged with a producer-scoped
//! request id and resolves only when the matching `ProducerSuccess`
//! broadcast is observed; synchronous transport failures fold into a bounded
//! retry of the same request id, so a topic unload or broker-initiated
//! reconnect neither drops nor duplicates the user-visible message.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use crate::client::Client;
use crate::config::ProducerConfig;
use crate::error::{ClientError, Result};
use crate::mediator::RequestIdMediator;
use crate::protocol::{Command, Frame, FrameKind, MessageMetadata};

/// A producer bound to one topic on a shared session.
pub struct Producer {
    client: Arc<Client>,
    config: ProducerConfig,
    mediator: Arc<RequestIdMediator>,
    request_ids: AtomicU64,
    sequence_ids: AtomicU64,
    producer_name: Mutex<Option<String>>,
    created: AtomicBool,
    /// In-flight sends keyed by request id (values are sequence ids).
    in_flight: Arc<Mutex<HashMap<u64, u64>>>,
}

impl Producer {
    /// Create a producer handle on `client` with the given configuration.
    ///
    /// Must be called within a Tokio runtime (the correlation dispatchers
    /// are spawned here). No command is sent until [`create`](Self::create).
    pub fn new(client: Arc<Client>, config: ProducerConfig) -> Self {
        let mediator = Arc::new(RequestIdMediator::new(
            client.bus(),
            vec![
                FrameKind::ProducerSuccess,
                FrameKind::Success,
                FrameKind::Error,
            ],
            client.request_timeout(),
        ));
        Self {
            client,
            config,
            mediator,
            request_ids: AtomicU64::new(0),
            sequence_ids: AtomicU64::new(0),
            producer_name: Mutex::new(None),
            created: AtomicBool::new(false),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Register the producer with the broker.
    ///
    /// The broker enforces the access mode: an exclusive conflict fails
    /// immediately with [`ClientError::ProducerCreation`]; a
    /// wait-for-exclusive request does not resolve until the slot is
    /// granted, bounded only by the shared request timeout.
    pub async fn create(&self) -> Result<()> {
        self.client.connect(&self.config.topic).await?;

        let command = Command::create_producer(
            self.config.topic.clone(),
            self.config.producer_id,
            self.next_request_id(),
            self.config.producer_name.clone(),
            self.config.access_mode,
        );
        match self.mediator.send(self.client.transport(), command).await {
            Ok(Frame::ProducerSuccess { producer_name, .. }) => {
                *self
                    .producer_name
                    .lock()
                    .expect("producer name lock poisoned") = Some(producer_name);
                self.created.store(true, Ordering::SeqCst);
                Ok(())
            }
            Ok(other) => Err(ClientError::Protocol(format!(
                "unexpected response to producer create: {other:?}"
            ))),
            Err(ClientError::Broker { message, .. }) => {
                Err(ClientError::ProducerCreation(message))
            }
            Err(err) => Err(err),
        }
    }

    /// Publish one message and await its receipt.
    pub async fn send_message(
        &self,
        payload: impl Into<Bytes>,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(ClientError::NoPayload);
        }
        self.dispatch(vec![payload], properties, false).await
    }

    /// Publish a batch of messages as one payload command.
    pub async fn send_batch(
        &self,
        payloads: Vec<Bytes>,
        properties: HashMap<String, String>,
    ) -> Result<()> {
        if payloads.is_empty() || payloads.iter().any(|p| p.is_empty()) {
            return Err(ClientError::NoPayload);
        }
        self.dispatch(payloads, properties, true).await
    }

    /// Close the producer.
    ///
    /// Local state is released on acknowledgment, and also when the
    /// transport is already gone. Closing frees the exclusive slot, which
    /// unblocks the broker's next wait-for-exclusive grant.
    pub async fn close(&self) -> Result<()> {
        let command = Command::close_producer(self.config.producer_id, self.next_request_id());
        match self.mediator.send(self.client.transport(), command).await {
            Ok(_) => {
                self.release();
                Ok(())
            }
            Err(ClientError::Connection(_)) | Err(ClientError::ConnectionClosed) => {
                self.release();
                Ok(())
            }
            Err(ClientError::Broker { message, .. }) => Err(ClientError::ProducerClose(message)),
            Err(err) => Err(err),
        }
    }

    /// The broker-assigned producer name, once created.
    pub fn producer_name(&self) -> Option<String> {
        self.producer_name
            .lock()
            .expect("producer name lock poisoned")
            .clone()
    }

    /// Number of sends awaiting their receipt.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("in-flight lock poisoned").len()
    }

    fn next_request_id(&self) -> u64 {
        self.request_ids.fetch_add(1, Ordering::SeqCst)
    }

    fn release(&self) {
        self.created.store(false, Ordering::SeqCst);
        *self
            .producer_name
            .lock()
            .expect("producer name lock poisoned") = None;
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .clear();
    }

    /// The send pipeline shared by single and batched publication.
    ///
    /// Interest in the receipt broadcast is registered before the first
    /// transport attempt, so a receipt can never be missed between retries:
    /// at most one externally visible success per logical send.
    async fn dispatch(
        &self,
        payloads: Vec<Bytes>,
        properties: HashMap<String, String>,
        batch: bool,
    ) -> Result<()> {
        let request_id = self.next_request_id();
        let sequence_id = self.sequence_ids.fetch_add(1, Ordering::SeqCst);
        let metadata = MessageMetadata {
            producer_name: self.producer_name().unwrap_or_default(),
            sequence_id,
            publish_time: unix_millis(),
            properties,
        };
        let command = Command::send(
            self.config.producer_id,
            request_id,
            sequence_id,
            payloads.len() as u32,
        );

        let mut receipt_rx = self.client.broadcasts().subscribe(FrameKind::ProducerSuccess);
        let mut close_rx = self.client.broadcasts().subscribe(FrameKind::CloseProducer);

        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .insert(request_id, sequence_id);

        let wait = async {
            loop {
                match receipt_rx.recv().await {
                    Ok(Frame::ProducerSuccess {
                        request_id: rid, ..
                    }) if rid == request_id => return Ok(()),
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "receipt wait lagged behind the bus");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        return Err(ClientError::ConnectionClosed)
                    }
                }
            }
        };

        let transport = self.client.transport().clone();
        let producer_id = self.config.producer_id;
        let limit = self.config.send_retry_limit.max(1);
        let delay = self.config.send_retry_delay;
        let retry = async {
            let mut attempts: u32 = 0;
            loop {
                let result = if batch {
                    transport
                        .send_payload_batch(command.clone(), metadata.clone(), payloads.clone())
                        .await
                } else {
                    transport
                        .send_payload(command.clone(), metadata.clone(), payloads[0].clone())
                        .await
                };
                match result {
                    Ok(()) => {
                        // Sent. Retransmit the same request only if the
                        // broker closes the producer underneath us before
                        // the receipt arrives (topic unload).
                        loop {
                            match close_rx.recv().await {
                                Ok(Frame::CloseProducer {
                                    producer_id: pid, ..
                                }) if pid == producer_id => {
                                    tracing::warn!(
                                        request_id,
                                        "producer closed by broker mid-send, retransmitting"
                                    );
                                    break;
                                }
                                Ok(_) => {}
                                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                                Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                                    return ClientError::ConnectionClosed
                                }
                            }
                        }
                    }
                    Err(err) => {
                        attempts += 1;
                        if attempts >= limit {
                            tracing::error!(%err, attempts, "send attempts exhausted");
                            return ClientError::Connection(format!(
                                "send failed after {attempts} attempts: {err}"
                            ));
                        }
                        tracing::warn!(
                            %err,
                            attempt = attempts,
                            request_id,
                            "transport send failed, retrying the same request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        };

        let result = tokio::select! {
            res = wait => res,
            err = retry => Err(err),
        };
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(&request_id);
        result
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

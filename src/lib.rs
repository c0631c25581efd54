//! # pulsewire-client
//!
//! Async Rust client for the Pulsewire pub-sub broker protocol: the session
//! layer managing one logical connection to a broker node.
//!
//! ## Architecture
//!
//! - **Session** ([`Client`]): transport ownership, connect handshake,
//!   keep-alive ping/pong services
//! - **Correlation registry** ([`mediator`]): id-bearing request/response
//!   matching and id-less broadcast fan-out over a shared [`bus::EventBus`]
//! - **Consumer** ([`Consumer`]): credit-based flow control, ordered
//!   delivery, acknowledgment
//! - **Producer** ([`Producer`]): access-mode negotiation and
//!   retry-tolerant publication
//!
//! ## Example
//!
//! ```ignore
//! use pulsewire_client::{Client, ClientConfig, Consumer, ConsumerConfig, RunOptions};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Arc::new(Client::new(ClientConfig::new("broker:6650")));
//!     let consumer = Consumer::new(client, ConsumerConfig::new("events", "workers"));
//!
//!     consumer.subscribe().await?;
//!     consumer
//!         .run(RunOptions::default(), |msg, _ctx| async move {
//!             println!("{:?}", msg.payload);
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod bus;
pub mod config;
pub mod discovery;
pub mod error;
pub mod mediator;
pub mod protocol;
pub mod transport;

mod client;
mod consumer;
mod producer;

pub use client::Client;
pub use config::{ClientConfig, ConsumerConfig, ProducerConfig, PROTOCOL_VERSION};
pub use consumer::{Consumer, ConsumerState, MessageContext, ReceivedMessage, RunOptions};
pub use error::{ClientError, Result};
pub use producer::Producer;
pub use protocol::{AccessMode, AckType, SubType};

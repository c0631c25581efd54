//! Broker discovery.
//!
//! Resolves a topic to the `host:port` of the broker node serving it. The
//! session core consumes only the resolved string; partitioned routing and
//! redirect chases live behind this trait.

use async_trait::async_trait;

use crate::error::{ClientError, Result};

/// Resolves topics to broker addresses.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// Resolve `topic` to a `host:port` pair.
    async fn lookup(&self, topic: &str) -> Result<String>;
}

/// Discovery that always answers with one fixed broker address.
pub struct StaticDiscovery {
    broker: String,
}

impl StaticDiscovery {
    pub fn new(broker: impl Into<String>) -> Self {
        Self {
            broker: broker.into(),
        }
    }
}

#[async_trait]
impl Discovery for StaticDiscovery {
    async fn lookup(&self, _topic: &str) -> Result<String> {
        if self.broker.is_empty() {
            return Err(ClientError::TopicLookup("no broker configured".into()));
        }
        Ok(self.broker.clone())
    }
}

/// Split a resolved `host:port` string into its parts.
pub(crate) fn split_address(address: &str) -> Result<(&str, u16)> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| ClientError::TopicLookup(format!("malformed broker address: {address}")))?;
    let port = port
        .parse()
        .map_err(|_| ClientError::TopicLookup(format!("malformed broker port: {address}")))?;
    Ok((host, port))
}

//! # Publish/subscribe transport
//!
//! The gateway only needs a [`Publisher`] and the ingestor only needs a [`Subscriber`]. The
//! broker behind them is swappable: [`MemoryBroker`] for tests and single-process runs, and an
//! MQTT client behind the `mqtt` feature.

pub mod codec;
pub mod memory;
#[cfg(feature = "mqtt")]
pub mod mqtt;
pub mod topic;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

pub use codec::{decode, encode, CodecError};
pub use memory::MemoryBroker;
pub use topic::{parse_reading_topic, reading_topic, topic_matches, READINGS_FILTER};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
    #[error("subscribe to {filter} failed: {reason}")]
    Subscribe { filter: String, reason: String },
}

/// Message delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub type MessageStream = BoxStream<'static, InboundMessage>;

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Subscribe with an MQTT-style filter. Dropping the stream releases the subscription.
    async fn subscribe(&self, filter: &str) -> Result<MessageStream, TransportError>;
}

/// Broker selection.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TransportConfig {
    Memory {
        #[serde(default = "default_channel_capacity")]
        capacity: usize,
    },
    Mqtt {
        host: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        #[serde(default = "default_client_id")]
        client_id: String,
        #[serde(default = "default_keep_alive_secs")]
        keep_alive_secs: u64,
        #[serde(default = "default_channel_capacity")]
        capacity: usize,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Memory {
            capacity: default_channel_capacity(),
        }
    }
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_client_id() -> String {
    "greenhouse-gateway".to_string()
}

fn default_keep_alive_secs() -> u64 {
    30
}

/// Both halves of a connected transport.
#[derive(Clone)]
pub struct Transport {
    pub publisher: Arc<dyn Publisher>,
    pub subscriber: Arc<dyn Subscriber>,
}

impl Transport {
    /// Publisher and subscriber backed by the same in-process broker.
    pub fn memory(broker: Arc<MemoryBroker>) -> Self {
        Self {
            publisher: broker.clone(),
            subscriber: broker,
        }
    }
}

/// Connect the configured broker. Background I/O runs on `tracker` until `cancel` fires.
#[cfg_attr(not(feature = "mqtt"), allow(unused_variables))]
pub fn connect_transport(
    cfg: &TransportConfig,
    tracker: &TaskTracker,
    cancel: CancellationToken,
) -> anyhow::Result<Transport> {
    match cfg {
        TransportConfig::Memory { capacity } => {
            info!(capacity, "using in-memory transport");
            Ok(Transport::memory(Arc::new(MemoryBroker::new(*capacity))))
        }
        #[cfg(feature = "mqtt")]
        TransportConfig::Mqtt {
            host,
            port,
            client_id,
            keep_alive_secs,
            capacity,
        } => {
            let settings = mqtt::MqttSettings {
                host: host.clone(),
                port: *port,
                client_id: client_id.clone(),
                keep_alive: std::time::Duration::from_secs(*keep_alive_secs),
                capacity: *capacity,
            };
            let client = Arc::new(mqtt::MqttTransport::connect(settings, tracker, cancel));
            Ok(Transport {
                publisher: client.clone(),
                subscriber: client,
            })
        }
        #[cfg(not(feature = "mqtt"))]
        TransportConfig::Mqtt { .. } => {
            anyhow::bail!("mqtt transport requested but the `mqtt` feature is not enabled")
        }
    }
}

/// Filtered stream over a broadcast receiver. Lagging receivers skip what they missed.
pub(crate) fn filtered_stream(
    rx: broadcast::Receiver<InboundMessage>,
    filter: String,
) -> MessageStream {
    stream::unfold((rx, filter), |(mut rx, filter)| async move {
        loop {
            match rx.recv().await {
                Ok(msg) if topic_matches(&filter, &msg.topic) => return Some((msg, (rx, filter))),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(filter = %filter, skipped, "subscriber lagged, messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}

#![cfg(feature = "mqtt")]

use async_trait::async_trait;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{
    filtered_stream, InboundMessage, MessageStream, Publisher, Subscriber, TransportError,
};

const RECONNECT_DELAY: Duration = Duration::from_secs(2);
const DISCONNECT_FLUSH: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub capacity: usize,
}

/// MQTT client shared by the gateway (publish) and the ingestor (subscribe).
///
/// The event loop runs on the supplied tracker until the token is cancelled, then sends a
/// DISCONNECT before returning.
#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    inbound: broadcast::Sender<InboundMessage>,
    filters: Arc<Mutex<Vec<String>>>,
}

impl MqttTransport {
    pub fn connect(settings: MqttSettings, tracker: &TaskTracker, cancel: CancellationToken) -> Self {
        let mut options = MqttOptions::new(settings.client_id.clone(), settings.host.clone(), settings.port);
        options.set_keep_alive(settings.keep_alive);
        options.set_clean_session(false);

        let (client, eventloop) = AsyncClient::new(options, settings.capacity.max(10));
        let (inbound, _) = broadcast::channel(settings.capacity.max(1));
        let filters = Arc::new(Mutex::new(Vec::new()));

        info!(host = %settings.host, port = settings.port, client_id = %settings.client_id, "connecting to MQTT broker");
        tracker.spawn(run_event_loop(
            eventloop,
            client.clone(),
            inbound.clone(),
            filters.clone(),
            cancel,
        ));

        Self {
            client,
            inbound,
            filters,
        }
    }
}

#[async_trait]
impl Publisher for MqttTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(|e| TransportError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl Subscriber for MqttTransport {
    async fn subscribe(&self, filter: &str) -> Result<MessageStream, TransportError> {
        let rx = self.inbound.subscribe();
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| TransportError::Subscribe {
                filter: filter.to_string(),
                reason: e.to_string(),
            })?;
        self.filters.lock().push(filter.to_string());
        info!(filter = %filter, "subscribed");
        Ok(filtered_stream(rx, filter.to_string()))
    }
}

async fn run_event_loop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    inbound: broadcast::Sender<InboundMessage>,
    filters: Arc<Mutex<Vec<String>>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            event = eventloop.poll() => match event {
                Ok(Event::Incoming(Packet::Publish(p))) => {
                    let _ = inbound.send(InboundMessage {
                        topic: p.topic.clone(),
                        payload: p.payload.to_vec(),
                    });
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("mqtt connected");
                    // Broker may have dropped the session even with clean_session(false)
                    let current: Vec<String> = filters.lock().clone();
                    for filter in current {
                        if let Err(e) = client.try_subscribe(filter.clone(), QoS::AtLeastOnce) {
                            error!(filter = %filter, error = %e, "re-subscribe failed");
                        }
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => warn!("mqtt disconnected by broker"),
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "mqtt connection error, retrying");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    }
                }
            }
        }
    }

    if client.try_disconnect().is_ok() {
        // Give the event loop a chance to write the DISCONNECT packet
        let _ = tokio::time::timeout(DISCONNECT_FLUSH, async {
            while eventloop.poll().await.is_ok() {}
        })
        .await;
    }
    debug!("mqtt event loop stopped");
}

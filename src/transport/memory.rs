use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{
    filtered_stream, InboundMessage, MessageStream, Publisher, Subscriber, TransportError,
};

/// In-process broker. Publishing with no subscribers is not an error.
#[derive(Debug, Clone)]
pub struct MemoryBroker {
    tx: broadcast::Sender<InboundMessage>,
}

impl MemoryBroker {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Publisher for MemoryBroker {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let _ = self.tx.send(InboundMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }
}

#[async_trait]
impl Subscriber for MemoryBroker {
    async fn subscribe(&self, filter: &str) -> Result<MessageStream, TransportError> {
        Ok(filtered_stream(self.tx.subscribe(), filter.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_subscriber_receives_matching_topics_only() {
        let broker = MemoryBroker::new(16);
        let mut stream = broker.subscribe("sensors/#").await.unwrap();

        broker.publish("status/hub", b"online".to_vec()).await.unwrap();
        broker
            .publish("sensors/temperature/t1", b"{}".to_vec())
            .await
            .unwrap();

        let msg = stream.next().await.unwrap();
        assert_eq!(msg.topic, "sensors/temperature/t1");
        assert_eq!(msg.payload, b"{}");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let broker = MemoryBroker::default();
        assert!(broker.publish("sensors/humidity/h1", vec![1]).await.is_ok());
    }

    #[tokio::test]
    async fn test_dropping_stream_releases_subscription() {
        let broker = MemoryBroker::new(4);
        let stream = broker.subscribe("sensors/#").await.unwrap();
        assert_eq!(broker.subscriber_count(), 1);
        drop(stream);
        assert_eq!(broker.subscriber_count(), 0);
    }
}

// Per-(topic, client) delivery endpoint.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use courier_common::Message;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Topic-side subscriber record. Holds the sending half of the bounded
/// delivery queue; the paired [`Subscription`] holds the receiving half.
/// Dropping the last sender clone closes the queue, which the session
/// observes as end-of-stream.
#[derive(Debug, Clone)]
pub(crate) struct Subscriber {
    pub(crate) client_id: String,
    pub(crate) topic: String,
    queue: mpsc::Sender<Arc<Message>>,
    pub(crate) attached_at: DateTime<Utc>,
}

/// Outcome of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Enqueue {
    Delivered,
    /// Queue full; the message is dropped for this subscriber only.
    Dropped,
    /// Queue already closed; the subscriber is detaching.
    Closed,
}

impl Subscriber {
    pub(crate) fn attach(
        client_id: &str,
        topic: &str,
        queue_capacity: usize,
    ) -> (Self, Subscription) {
        let (queue, events) = mpsc::channel(queue_capacity);
        let subscriber = Self {
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            queue,
            attached_at: Utc::now(),
        };
        let subscription = Subscription {
            client_id: client_id.to_string(),
            topic: topic.to_string(),
            events,
        };
        (subscriber, subscription)
    }

    /// Strictly non-blocking enqueue; never waits on the consumer.
    pub(crate) fn offer(&self, msg: Arc<Message>) -> Enqueue {
        match self.queue.try_send(msg) {
            Ok(()) => Enqueue::Delivered,
            Err(TrySendError::Full(_)) => Enqueue::Dropped,
            Err(TrySendError::Closed(_)) => Enqueue::Closed,
        }
    }

    pub(crate) fn sender(&self) -> mpsc::Sender<Arc<Message>> {
        self.queue.clone()
    }
}

/// Receiving handle returned by subscribe. `recv` yields messages in FIFO
/// order and returns `None` once the topic has detached the subscriber
/// (unsubscribe, topic deletion, or broker shutdown).
#[derive(Debug)]
pub struct Subscription {
    client_id: String,
    topic: String,
    events: mpsc::Receiver<Arc<Message>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.events.recv().await
    }

    /// Non-blocking variant used by drain loops that poll.
    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        self.events.try_recv().ok()
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str) -> Arc<Message> {
        Arc::new(Message {
            id: id.to_string(),
            payload: serde_json::Value::Null,
            topic: "t".to_string(),
            timestamp: Utc::now(),
        })
    }

    #[tokio::test]
    async fn offer_delivers_in_fifo_order() {
        let (subscriber, mut subscription) = Subscriber::attach("c1", "t", 4);
        assert_eq!(subscriber.client_id, "c1");
        assert_eq!(subscriber.topic, "t");
        assert!(subscriber.attached_at <= Utc::now());
        assert_eq!(subscription.client_id(), "c1");
        assert_eq!(subscription.topic(), "t");
        assert_eq!(subscriber.offer(msg("1")), Enqueue::Delivered);
        assert_eq!(subscriber.offer(msg("2")), Enqueue::Delivered);
        assert_eq!(subscription.recv().await.expect("first").id, "1");
        assert_eq!(subscription.recv().await.expect("second").id, "2");
    }

    #[tokio::test]
    async fn offer_drops_when_full() {
        let (subscriber, mut subscription) = Subscriber::attach("c1", "t", 2);
        assert_eq!(subscriber.offer(msg("1")), Enqueue::Delivered);
        assert_eq!(subscriber.offer(msg("2")), Enqueue::Delivered);
        assert_eq!(subscriber.offer(msg("3")), Enqueue::Dropped);
        assert_eq!(subscription.recv().await.expect("first").id, "1");
        assert_eq!(subscription.recv().await.expect("second").id, "2");
    }

    #[tokio::test]
    async fn dropping_sender_closes_the_queue() {
        let (subscriber, mut subscription) = Subscriber::attach("c1", "t", 2);
        subscriber.offer(msg("1"));
        drop(subscriber);
        // Buffered message still delivered, then end-of-stream.
        assert_eq!(subscription.recv().await.expect("buffered").id, "1");
        assert!(subscription.recv().await.is_none());
    }

    #[tokio::test]
    async fn offer_reports_closed_after_receiver_drop() {
        let (subscriber, subscription) = Subscriber::attach("c1", "t", 2);
        drop(subscription);
        assert_eq!(subscriber.offer(msg("1")), Enqueue::Closed);
    }
}

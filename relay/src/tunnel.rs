//! Outbound links to attached tunnel clients
//!
//! A link is the server-side handle for pushing deliveries to one connected
//! client. Deliveries go through a bounded queue that the client's stream
//! task drains, so all sends for a session are serialized in call order.
//! A stream that supersedes another takes over the same queue.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use hooktunnel_shared::protocol::DeliveryRequest;
use tokio::sync::{mpsc, Mutex};

/// Identifies one attachment of a client stream
pub type LinkId = u64;

/// Receiving half of a session's queue, held by the attached stream(s)
pub type DeliveryQueue = Arc<Mutex<mpsc::Receiver<DeliveryRequest>>>;

/// Represents an attached client stream
#[derive(Debug, Clone)]
pub struct Link {
    /// Attachment identifier, unique per registry
    pub id: LinkId,
    /// When the stream attached
    pub attached_at: DateTime<Utc>,
    /// Queue drained by the client's stream task
    tx: mpsc::Sender<DeliveryRequest>,
    /// Only streams keep the queue alive; sends fail once they are all gone
    queue: Weak<Mutex<mpsc::Receiver<DeliveryRequest>>>,
}

impl Link {
    /// Create a link and the receiving half of its queue.
    pub fn channel(id: LinkId, buffer: usize) -> (Self, DeliveryQueue) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let queue = Arc::new(Mutex::new(rx));
        let link = Self {
            id,
            attached_at: Utc::now(),
            tx,
            queue: Arc::downgrade(&queue),
        };
        (link, queue)
    }

    /// Hand this link's queue, with anything still pending in it, to a new
    /// attachment. `None` once no stream holds the queue any more.
    pub fn rebind(&self, id: LinkId) -> Option<(Self, DeliveryQueue)> {
        let queue = self.queue.upgrade()?;
        let link = Self {
            id,
            attached_at: Utc::now(),
            tx: self.tx.clone(),
            queue: self.queue.clone(),
        };
        Some((link, queue))
    }

    /// Push a delivery; waits for queue space, fails once the stream is gone
    pub async fn send(&self, delivery: DeliveryRequest) -> Result<(), mpsc::error::SendError<DeliveryRequest>> {
        self.tx.send(delivery).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(n: usize) -> DeliveryRequest {
        DeliveryRequest {
            request_id: format!("req_{}", n),
            webhook_id: "w".into(),
            method: "POST".into(),
            path: "/hook/w".into(),
            headers: Default::default(),
            body: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_send_fails_after_queue_dropped() {
        let (link, queue) = Link::channel(1, 4);
        assert!(!link.is_closed());
        drop(queue);
        assert!(link.is_closed());
        assert!(link.send(delivery(0)).await.is_err());
    }

    #[tokio::test]
    async fn test_zero_buffer_is_clamped() {
        let (link, queue) = Link::channel(1, 0);
        link.send(delivery(7)).await.unwrap();
        assert_eq!(queue.lock().await.recv().await.unwrap().request_id, "req_7");
    }

    #[tokio::test]
    async fn test_rebind_keeps_pending_deliveries() {
        let (first, first_queue) = Link::channel(1, 4);
        first.send(delivery(1)).await.unwrap();

        let (second, second_queue) = first.rebind(2).unwrap();
        assert_eq!(second.id, 2);
        drop(first_queue);
        assert!(!second.is_closed());

        second.send(delivery(2)).await.unwrap();
        let mut rx = second_queue.lock().await;
        assert_eq!(rx.recv().await.unwrap().request_id, "req_1");
        assert_eq!(rx.recv().await.unwrap().request_id, "req_2");
    }

    #[test]
    fn test_rebind_after_queue_dropped() {
        let (link, queue) = Link::channel(1, 4);
        drop(queue);
        assert!(link.rebind(2).is_none());
    }
}

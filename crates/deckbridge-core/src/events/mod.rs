pub mod inbound;
pub mod outbound;

use log::warn;
use tokio::sync::mpsc;

/// Create the outbound message queue: serialized frames waiting for delivery
/// to the plugin. Multiple producers (pipe listener, translator), one consumer
/// (the session manager).
pub fn outbound_queue(capacity: usize) -> (OutboundSender, OutboundReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (OutboundSender(tx), OutboundReceiver(rx))
}

#[derive(Clone)]
pub struct OutboundSender(mpsc::Sender<String>);

impl OutboundSender {
    /// Enqueue a frame without blocking. When the queue is full the frame is
    /// dropped with a warning: delivery is best-effort and the consumer
    /// flushes at least once per heartbeat interval.
    pub fn push(&self, message: String) {
        if let Err(err) = self.0.try_send(message) {
            warn!("Dropping outbound message: {}", err);
        }
    }
}

pub struct OutboundReceiver(mpsc::Receiver<String>);

impl OutboundReceiver {
    /// Non-blocking pop, `None` when the queue is currently empty.
    pub fn try_next(&mut self) -> Option<String> {
        self.0.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_preserves_order_and_drains_non_blocking() {
        let (tx, mut rx) = outbound_queue(8);
        tx.push("one".to_owned());
        tx.push("two".to_owned());

        assert_eq!(rx.try_next().as_deref(), Some("one"));
        assert_eq!(rx.try_next().as_deref(), Some("two"));
        assert_eq!(rx.try_next(), None);
    }

    #[tokio::test]
    async fn overflow_drops_instead_of_blocking() {
        let (tx, mut rx) = outbound_queue(1);
        tx.push("kept".to_owned());
        tx.push("dropped".to_owned());

        assert_eq!(rx.try_next().as_deref(), Some("kept"));
        assert_eq!(rx.try_next(), None);
    }
}

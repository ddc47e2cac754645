//! Egress queue between a channel worker and its streamer.
//!
//! A zero-capacity rendezvous: a send completes only once the streamer has
//! taken the payload, so a worker can never run ahead of the uplink.

use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Outcome of handing one payload to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handoff {
    /// The streamer took the payload.
    Delivered,
    /// The stop signal fired first; the payload was dropped.
    Cancelled,
    /// The queue has been closed.
    Closed,
}

/// Producer side of an egress queue.
#[derive(Clone)]
pub struct EgressSender {
    inner: kanal::AsyncSender<Bytes>,
}

/// Consumer side of an egress queue.
#[derive(Clone)]
pub struct EgressReceiver {
    inner: kanal::AsyncReceiver<Bytes>,
}

/// Create a rendezvous egress queue.
pub fn egress_queue() -> (EgressSender, EgressReceiver) {
    let (tx, rx) = kanal::bounded_async(0);
    (EgressSender { inner: tx }, EgressReceiver { inner: rx })
}

impl EgressSender {
    /// Hand `payload` over, giving up if `stop` fires first.
    pub async fn send(&self, payload: Bytes, stop: &CancellationToken) -> Handoff {
        tokio::select! {
            biased;
            _ = stop.cancelled() => Handoff::Cancelled,
            sent = self.inner.send(payload) => match sent {
                Ok(()) => Handoff::Delivered,
                Err(_) => Handoff::Closed,
            },
        }
    }

    /// Close the queue for both ends. Pending and future operations fail.
    pub fn close(&self) {
        let _ = self.inner.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }
}

impl EgressReceiver {
    /// Next payload, or `None` once the queue is closed.
    pub async fn recv(&self) -> Option<Bytes> {
        self.inner.recv().await.ok()
    }
}

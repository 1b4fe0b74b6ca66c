//! Per-connection outbound queueing.
//!
//! Every connection the router writes to (client sessions and the edge link)
//! gets a bounded drop-oldest queue: telemetry consumers want current state,
//! not full history, and a slow consumer must never block the broker or any
//! other connection. Queue overflow is counted, not surfaced as an error.

use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;

/// Bound on a session's outbound queue.
pub(crate) const OUTBOUND_QUEUE_DEPTH: usize = 32;

#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueueStatistics {
    /// Total number of messages pushed.
    pub(crate) total: u64,

    /// Number of messages discarded due to queue overflow.
    pub(crate) discarded: u64,
}

struct Inner<M> {
    messages: VecDeque<M>,
    capacity: usize,
    closed: bool,
    stats: QueueStatistics,
}

/// A bounded drop-oldest queue feeding one connection's writer.
///
/// The broker pushes from its coordinator task; the connection task awaits
/// [`Outbound::next`]. Closing the queue wakes the connection task with
/// `None`, which is how the broker forces a disconnect.
pub(crate) struct Outbound<M> {
    inner: Mutex<Inner<M>>,
    ready: Notify,
}

impl<M> Outbound<M> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                messages: VecDeque::new(),
                capacity,
                closed: false,
                stats: QueueStatistics::default(),
            }),
            ready: Notify::new(),
        }
    }

    pub(crate) fn push(&self, message: M) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.closed {
                return;
            }
            if inner.messages.len() >= inner.capacity {
                inner.messages.pop_front();
                inner.stats.discarded = inner.stats.discarded.wrapping_add(1);
            }
            inner.messages.push_back(message);
            inner.stats.total = inner.stats.total.wrapping_add(1);
        }
        self.ready.notify_one();
    }

    pub(crate) fn close(&self) {
        self.inner.lock().unwrap().closed = true;
        self.ready.notify_one();
    }

    /// Waits for the next queued message; `None` once the queue is closed
    /// and drained.
    pub(crate) async fn next(&self) -> Option<M> {
        loop {
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(message) = inner.messages.pop_front() {
                    return Some(message);
                }
                if inner.closed {
                    return None;
                }
            }
            self.ready.notified().await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    pub(crate) fn statistics(&self) -> QueueStatistics {
        self.inner.lock().unwrap().stats.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_discards_oldest() {
        let queue = Outbound::new(3);
        for n in 0..5u32 {
            queue.push(n);
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(
            queue.statistics(),
            QueueStatistics {
                total: 5,
                discarded: 2
            }
        );
    }

    #[tokio::test]
    async fn drains_in_order_after_overflow() {
        let queue = Outbound::new(3);
        for n in 0..5u32 {
            queue.push(n);
        }

        assert_eq!(queue.next().await, Some(2));
        assert_eq!(queue.next().await, Some(3));
        assert_eq!(queue.next().await, Some(4));
    }

    #[tokio::test]
    async fn close_wakes_and_terminates_consumer() {
        let queue = std::sync::Arc::new(Outbound::<u32>::new(3));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        queue.close();
        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_drains_remaining_messages() {
        let queue = Outbound::new(3);
        queue.push(1u32);
        queue.close();

        assert_eq!(queue.next().await, Some(1));
        assert_eq!(queue.next().await, None);
    }
}

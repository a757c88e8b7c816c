//! Message batcher — per-connection outbound coalescing.
//!
//! DESIGN
//! ======
//! Every outbound message is appended to its connection's pending list.
//! Reaching the size cap flushes immediately; otherwise the first message
//! arms a one-shot timer so added latency never exceeds the flush
//! interval. A flush wraps the pending list into one `batch` envelope,
//! hands it to the connection's transport sender, and disarms the timer.
//!
//! Delivery is best-effort `try_send`, matching the transport channel's
//! backpressure policy: a connection too slow to drain its channel loses
//! envelopes rather than stalling the rest of the server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use uuid::Uuid;

use crate::protocol::{ServerMessage, now_ms};

struct PendingQueue {
    tx: mpsc::Sender<ServerMessage>,
    pending: Vec<ServerMessage>,
    timer: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub struct MessageBatcher {
    inner: Arc<Mutex<HashMap<Uuid, PendingQueue>>>,
    max_size: usize,
    interval: Duration,
}

impl MessageBatcher {
    #[must_use]
    pub fn new(max_size: usize, interval: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), max_size: max_size.max(1), interval }
    }

    /// Attach a connection's transport sender. Must precede any enqueue.
    pub fn register(&self, conn: Uuid, tx: mpsc::Sender<ServerMessage>) {
        let mut inner = self.lock();
        inner.insert(conn, PendingQueue { tx, pending: Vec::new(), timer: None });
    }

    /// Detach a connection, discarding whatever is still pending.
    pub fn remove(&self, conn: Uuid) {
        let mut inner = self.lock();
        if let Some(mut queue) = inner.remove(&conn) {
            if let Some(timer) = queue.timer.take() {
                timer.abort();
            }
        }
    }

    /// Append a message. Flushes immediately at the size cap, otherwise
    /// arms the interval timer if it is not already running.
    pub fn enqueue(&self, conn: Uuid, msg: ServerMessage) {
        let mut inner = self.lock();
        let Some(queue) = inner.get_mut(&conn) else {
            return;
        };
        queue.pending.push(msg);

        if queue.pending.len() >= self.max_size {
            Self::flush_queue(queue);
        } else if queue.timer.is_none() {
            let batcher = self.clone();
            queue.timer = Some(tokio::spawn(async move {
                tokio::time::sleep(batcher.interval).await;
                batcher.flush(conn);
            }));
        }
    }

    /// Flush a connection's pending messages into one envelope now.
    pub fn flush(&self, conn: Uuid) {
        let mut inner = self.lock();
        if let Some(queue) = inner.get_mut(&conn) {
            Self::flush_queue(queue);
        }
    }

    fn flush_queue(queue: &mut PendingQueue) {
        if let Some(timer) = queue.timer.take() {
            timer.abort();
        }
        if queue.pending.is_empty() {
            return;
        }
        let messages = std::mem::take(&mut queue.pending);
        let count = messages.len();
        let envelope = ServerMessage::Batch { messages, ts: now_ms() };
        if queue.tx.try_send(envelope).is_err() {
            warn!(count, "transport channel rejected batch; dropping envelope");
        }
    }

    #[must_use]
    pub fn pending_len(&self, conn: Uuid) -> usize {
        self.lock().get(&conn).map_or(0, |q| q.pending.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, PendingQueue>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "batch_test.rs"]
mod tests;

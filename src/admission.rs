//! Connection admission — capacity gate with a fair wait queue.
//!
//! DESIGN
//! ======
//! Connections enter a FIFO queue and are admitted while the active count
//! is below capacity. Queue processing runs on every enqueue and every
//! release; a waiter older than the timeout is rejected when it reaches
//! the head instead of being admitted, and processing moves on to the next
//! waiter rather than blocking behind it.
//!
//! Staleness is evaluated lazily at those processing points. Because no
//! processing event may occur for an arbitrarily long time, `admit` also
//! bounds its own wait with a timer that yields the same queue-timeout
//! outcome and withdraws the waiter.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use uuid::Uuid;

/// Terminal admission state for one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionOutcome {
    Admitted,
    /// Waited past the queue timeout; the caller is expected to retry.
    TimedOut,
}

struct Waiter {
    conn: Uuid,
    enqueued_at: Instant,
    tx: oneshot::Sender<AdmissionOutcome>,
}

#[derive(Default)]
struct AdmissionInner {
    active: HashSet<Uuid>,
    queue: VecDeque<Waiter>,
}

#[derive(Clone)]
pub struct ConnectionAdmission {
    inner: Arc<Mutex<AdmissionInner>>,
    capacity: usize,
    timeout: Duration,
}

impl ConnectionAdmission {
    #[must_use]
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(AdmissionInner::default())), capacity: capacity.max(1), timeout }
    }

    /// Wait for an admission slot. Resolves `Admitted` or `TimedOut`.
    pub async fn admit(&self, conn: Uuid) -> AdmissionOutcome {
        let rx = self.enqueue_at(conn, Instant::now());
        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            // Sender dropped (withdrawn) or local deadline hit first.
            Ok(Err(_)) | Err(_) => {
                self.withdraw(conn);
                AdmissionOutcome::TimedOut
            }
        }
    }

    /// Free a slot held by `conn` (no-op if it holds none) and admit as
    /// many queued waiters as capacity now allows.
    pub fn release(&self, conn: Uuid) {
        self.release_at(conn, Instant::now());
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().active.len()
    }

    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.lock().queue.len()
    }

    #[must_use]
    pub fn is_active(&self, conn: Uuid) -> bool {
        self.lock().active.contains(&conn)
    }

    // -------------------------------------------------------------------------
    // Internal, with explicit time for deterministic tests.
    // -------------------------------------------------------------------------

    pub(crate) fn enqueue_at(&self, conn: Uuid, now: Instant) -> oneshot::Receiver<AdmissionOutcome> {
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock();
        inner.queue.push_back(Waiter { conn, enqueued_at: now, tx });
        self.process_queue_at(&mut inner, now);
        rx
    }

    pub(crate) fn release_at(&self, conn: Uuid, now: Instant) {
        let mut inner = self.lock();
        if inner.active.remove(&conn) {
            self.process_queue_at(&mut inner, now);
        }
    }

    /// Admit waiters FIFO while capacity holds; reject stale ones in
    /// passing. Active count never exceeds capacity.
    fn process_queue_at(&self, inner: &mut AdmissionInner, now: Instant) {
        while inner.active.len() < self.capacity {
            let Some(waiter) = inner.queue.pop_front() else {
                break;
            };
            if now.duration_since(waiter.enqueued_at) > self.timeout {
                let _ = waiter.tx.send(AdmissionOutcome::TimedOut);
                continue;
            }
            inner.active.insert(waiter.conn);
            if waiter.tx.send(AdmissionOutcome::Admitted).is_err() {
                // Receiver gave up while we admitted it; return the slot.
                inner.active.remove(&waiter.conn);
            }
        }
    }

    /// Remove a connection wherever it is: still queued, or already
    /// holding a slot it will never use.
    fn withdraw(&self, conn: Uuid) {
        let mut inner = self.lock();
        if let Some(pos) = inner.queue.iter().position(|w| w.conn == conn) {
            inner.queue.remove(pos);
        } else if inner.active.remove(&conn) {
            self.process_queue_at(&mut inner, Instant::now());
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AdmissionInner> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
#[path = "admission_test.rs"]
mod tests;

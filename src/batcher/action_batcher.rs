//! # Submission-side action batcher.
//!
//! Coalesces actions issued by one observer in quick succession into a single
//! [`BatchTransport`] call. Every action still gets its own result.
//!
//! ## Flush triggers (first one wins)
//! ```text
//! enqueue(a, priority)
//!   ├─ priority >= priority_flush_threshold ─┐
//!   ├─ queue.len() >= max_batch_size ────────┼─► flush now (or right after the in-flight one)
//!   └─ first item of an empty queue ─────────┴─► arm window timer ─► flush
//! ```
//!
//! ## Rules
//! - One flush in flight at a time; items arriving meanwhile wait for the next one.
//! - A forcing item that arrives mid-flush sets `pending_force_flush`, honored
//!   as soon as the in-flight batch settles.
//! - Results are matched by action id; a missing entry fails that item only.
//! - A transport error fails every item of that batch.
//! - [`ActionBatcher::destroy`] rejects everything still queued.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::wire::{BatchItem, BatchRequest, BatchResult};
use crate::actions::{Action, ObserverId};
use crate::adapters::BatchTransport;
use crate::config::BatcherConfig;
use crate::error::BatchError;
use crate::events::{Bus, Event, EventKind};

type Responder = oneshot::Sender<Result<(), BatchError>>;

/// Deferred result of a batched action.
#[derive(Debug)]
#[must_use = "a batched action's result is only observable by awaiting it"]
pub struct BatchPending {
    rx: oneshot::Receiver<Result<(), BatchError>>,
}

impl Future for BatchPending {
    type Output = Result<(), BatchError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(BatchError::Shutdown)))
    }
}

/// Counters reported by [`ActionBatcher::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatcherStats {
    /// Items waiting for the next flush.
    pub queued: usize,
    /// A batch is in flight.
    pub flushing: bool,
    pub batches_sent: u64,
    pub actions_sent: u64,
    pub failed_batches: u64,
}

struct QueuedAction {
    action: Action,
    responder: Responder,
    priority: i32,
    id: String,
    parent_id: Option<String>,
}

#[derive(Default)]
struct BatchState {
    queue: Vec<QueuedAction>,
    flushing: bool,
    pending_force_flush: bool,
    /// Generation of the armed window timer, if any.
    armed: Option<u64>,
    next_timer: u64,
    destroyed: bool,
    stats: BatcherStats,
}

struct Inner {
    observer: ObserverId,
    transport: Arc<dyn BatchTransport>,
    config: BatcherConfig,
    state: Mutex<BatchState>,
    bus: Bus,
}

/// Per-observer action batcher.
#[derive(Clone)]
pub struct ActionBatcher {
    inner: Arc<Inner>,
}

impl ActionBatcher {
    pub fn new(
        observer: ObserverId,
        transport: Arc<dyn BatchTransport>,
        config: BatcherConfig,
        bus: Bus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                observer,
                transport,
                config,
                state: Mutex::new(BatchState::default()),
                bus,
            }),
        }
    }

    /// Queues an action. Must be called from within a tokio runtime.
    pub fn enqueue(&self, action: Action, priority: i32, parent_id: Option<String>) -> BatchPending {
        let (tx, rx) = oneshot::channel();
        let pending = BatchPending { rx };

        let flush_now = {
            let mut st = self.inner.state.lock();
            if st.destroyed {
                let _ = tx.send(Err(BatchError::Shutdown));
                return pending;
            }
            let parent_id = parent_id.or_else(|| action.thunk_parent_id.clone());
            st.queue.push(QueuedAction {
                id: action.id.clone(),
                action,
                responder: tx,
                priority,
                parent_id,
            });

            let forced = priority >= self.inner.config.priority_flush_threshold
                || st.queue.len() >= self.inner.config.max_batch_size_clamped();
            if forced && st.flushing {
                st.pending_force_flush = true;
                false
            } else if forced {
                true
            } else {
                if st.armed.is_none() && !st.flushing {
                    self.inner.arm_timer(&mut st);
                }
                false
            }
        };

        if flush_now {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.flush().await });
        }
        pending
    }

    /// Requests an immediate flush and sends queued batches until the queue is empty.
    ///
    /// If another flush is already in flight this returns at once; that flush
    /// sends the remaining items right after its current batch. Await the
    /// individual [`BatchPending`] results to know when an action was processed.
    pub async fn flush(&self) {
        self.inner.state.lock().pending_force_flush = true;
        Arc::clone(&self.inner).flush().await;
    }

    /// Rejects all queued items with [`BatchError::Shutdown`] and refuses new ones.
    /// An in-flight batch still settles normally.
    pub fn destroy(&self) {
        let queued = {
            let mut st = self.inner.state.lock();
            st.destroyed = true;
            st.armed = None;
            st.pending_force_flush = false;
            std::mem::take(&mut st.queue)
        };
        if !queued.is_empty() {
            tracing::debug!(observer = self.inner.observer, count = queued.len(), "batcher destroyed with queued actions");
        }
        for item in queued {
            let _ = item.responder.send(Err(BatchError::Shutdown));
        }
    }

    pub fn stats(&self) -> BatcherStats {
        let st = self.inner.state.lock();
        BatcherStats {
            queued: st.queue.len(),
            flushing: st.flushing,
            ..st.stats
        }
    }
}

impl Inner {
    fn arm_timer(self: &Arc<Self>, st: &mut BatchState) {
        let generation = st.next_timer;
        st.next_timer += 1;
        st.armed = Some(generation);

        let me = Arc::clone(self);
        let window = self.config.window;
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            {
                let mut st = me.state.lock();
                if st.armed != Some(generation) {
                    return;
                }
                st.armed = None;
            }
            me.flush().await;
        });
    }

    async fn flush(self: Arc<Self>) {
        loop {
            let batch = {
                let mut st = self.state.lock();
                if st.flushing {
                    if !st.queue.is_empty() {
                        st.pending_force_flush = true;
                    }
                    return;
                }
                if st.queue.is_empty() {
                    st.pending_force_flush = false;
                    return;
                }
                st.flushing = true;
                st.pending_force_flush = false;
                st.armed = None;
                let n = st.queue.len().min(self.config.max_batch_size_clamped());
                st.queue.drain(..n).collect::<Vec<_>>()
            };

            let ok = self.send(batch).await;

            let again = {
                let mut st = self.state.lock();
                st.flushing = false;
                st.stats.batches_sent += 1;
                if !ok {
                    st.stats.failed_batches += 1;
                }
                let forced = st.pending_force_flush
                    || st.queue.len() >= self.config.max_batch_size_clamped()
                    || st
                        .queue
                        .iter()
                        .any(|q| q.priority >= self.config.priority_flush_threshold);
                if !forced && !st.queue.is_empty() && st.armed.is_none() && !st.destroyed {
                    self.arm_timer(&mut st);
                }
                forced
            };
            if !again {
                return;
            }
        }
    }

    /// Sends one batch and resolves its items. Returns `false` on transport failure.
    async fn send(&self, batch: Vec<QueuedAction>) -> bool {
        let batch_id = uuid::Uuid::new_v4().to_string();
        let request = BatchRequest {
            batch_id: batch_id.clone(),
            actions: batch
                .iter()
                .map(|q| BatchItem {
                    action: q.action.clone(),
                    id: q.id.clone(),
                    parent_id: q.parent_id.clone(),
                })
                .collect(),
        };

        tracing::debug!(observer = self.observer, batch = %batch_id, size = batch.len(), "flushing batch");
        for q in &batch {
            self.bus.publish(
                Event::new(EventKind::ActionDispatched)
                    .with_action(q.id.as_str(), q.action.action_type.as_str())
                    .with_reason(batch_id.as_str())
                    .with_count(batch.len())
                    .with_observer(self.observer),
            );
        }
        {
            let mut st = self.state.lock();
            st.stats.actions_sent += batch.len() as u64;
        }

        match self.transport.send_batch(request).await {
            Ok(response) => {
                let mut results: HashMap<String, BatchResult> = response
                    .results
                    .into_iter()
                    .map(|r| (r.action_id.clone(), r))
                    .collect();
                for item in batch {
                    let res = match results.remove(&item.id) {
                        Some(r) if r.success => Ok(()),
                        Some(r) => Err(BatchError::Failed {
                            action_id: item.id,
                            message: r.error.unwrap_or_else(|| "unknown error".to_string()),
                        }),
                        None => Err(BatchError::MissingResult { action_id: item.id }),
                    };
                    let _ = item.responder.send(res);
                }
                true
            }
            Err(e) => {
                let message = format!("{e:#}");
                tracing::warn!(observer = self.observer, batch = %batch_id, error = %message, "batch transport failed");
                for item in batch {
                    let _ = item.responder.send(Err(BatchError::Transport {
                        batch_id: batch_id.clone(),
                        message: message.clone(),
                    }));
                }
                false
            }
        }
    }
}

//! Durable write queues: one background writer task per persisted record.
//!
//! Each queue has a conceptual depth of one — the watch channel keeps only
//! the newest payload, so a burst of state changes collapses to the latest
//! write and a stale in-flight payload can never clobber a newer one on
//! disk. Writes for the same record therefore land in mutation order.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::store::Store;

/// A pending operation against one record key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistOp {
    /// Write the serialized record.
    Write(String),
    /// Delete the record (session reset).
    Remove,
}

/// Sending half, held by the engine. Dispatch never blocks the caller and
/// never fails a state transition.
#[derive(Debug, Clone)]
pub struct RecordQueue {
    key: &'static str,
    tx: watch::Sender<Option<PersistOp>>,
}

impl RecordQueue {
    pub fn dispatch(&self, op: PersistOp) {
        if self.tx.send(Some(op)).is_err() {
            tracing::warn!(key = self.key, "record writer gone, dropping update");
        }
    }
}

/// Background task applying the newest operation for one record key.
pub struct RecordWriter {
    key: &'static str,
    store: Store,
    rx: watch::Receiver<Option<PersistOp>>,
    cancel: CancellationToken,
}

/// Create the queue/writer pair for one record key.
pub fn record_queue(
    key: &'static str,
    store: Store,
    cancel: CancellationToken,
) -> (RecordQueue, RecordWriter) {
    let (tx, rx) = watch::channel(None);
    (
        RecordQueue { key, tx },
        RecordWriter {
            key,
            store,
            rx,
            cancel,
        },
    )
}

impl RecordWriter {
    /// Run the writer. Applies operations until the queue is dropped or the
    /// cancellation token fires.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let op = self.rx.borrow_and_update().clone();
                    if let Some(op) = op {
                        self.apply(op).await;
                    }
                }
                _ = self.cancel.cancelled() => {
                    break;
                }
            }
        }
    }

    async fn apply(&self, op: PersistOp) {
        let result = match op {
            PersistOp::Write(payload) => self.store.set(self.key, &payload).await,
            PersistOp::Remove => self.store.remove(self.key).await,
        };
        if let Err(e) = result {
            tracing::warn!(key = self.key, "persistence failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

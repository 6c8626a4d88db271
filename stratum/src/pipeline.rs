//! The asynchronous serialization pipeline.
//!
//! Writes enqueue their entries here; a flusher task buffers them for up
//! to the flush interval or until the batch size is reached, whichever
//! comes first, then fans the batch out to parallel workers. Each worker
//! serializes the payload, computes the content fingerprint, compresses
//! past the threshold and hands the resulting envelope to the completion
//! callback. Batches are unordered relative to each other, and a reader
//! may observe a live entry before its fingerprint lands.
//!
//! Serialization failures are logged, never propagated: the entry stays
//! live in L1, it just lacks an L2 mirror and a fingerprint guard until
//! the next successful write of that key.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;
use tracing::{debug, warn};

use stratum_core::{CacheEntry, Raw};

use crate::metrics;

/// Callback invoked with each successfully serialized entry and its
/// envelope bytes.
pub type CompletionCallback = Arc<dyn Fn(Arc<CacheEntry>, Raw) + Send + Sync>;

/// Handle to the flusher task and its intake channel.
pub struct SerializationPipeline {
    tx: mpsc::UnboundedSender<Arc<CacheEntry>>,
    flusher: JoinHandle<()>,
}

impl SerializationPipeline {
    /// Spawns the flusher task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        flush_interval: Duration,
        batch_size: usize,
        compression_threshold: usize,
        on_complete: CompletionCallback,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let flusher = tokio::spawn(run_flusher(
            rx,
            flush_interval,
            batch_size.max(1),
            compression_threshold,
            on_complete,
        ));
        SerializationPipeline { tx, flusher }
    }

    /// Enqueues an entry for serialization.
    ///
    /// Wait-free; entries submitted after shutdown are dropped.
    pub fn enqueue(&self, entry: Arc<CacheEntry>) {
        if self.tx.send(entry).is_err() {
            debug!("serialization pipeline is shut down; entry dropped");
        }
    }

    /// Stops the flusher. Buffered entries are abandoned.
    pub fn shutdown(&self) {
        self.flusher.abort();
    }
}

impl Drop for SerializationPipeline {
    fn drop(&mut self) {
        self.flusher.abort();
    }
}

/// Serializes one entry and invokes the completion callback.
///
/// Shared with the synchronous notification mode, which runs it inline at
/// write time instead of through the flusher.
pub fn process_entry(
    entry: Arc<CacheEntry>,
    compression_threshold: usize,
    on_complete: &CompletionCallback,
) {
    match entry.update_fingerprint(compression_threshold) {
        Ok(envelope) => on_complete(Arc::clone(&entry), envelope),
        Err(error) => {
            warn!(key = entry.key(), %error, "entry serialization failed; entry stays cached without a fingerprint");
        }
    }
}

async fn run_flusher(
    mut rx: mpsc::UnboundedReceiver<Arc<CacheEntry>>,
    flush_interval: Duration,
    batch_size: usize,
    compression_threshold: usize,
    on_complete: CompletionCallback,
) {
    loop {
        // Block until the batch opens, then flush on whichever of the
        // deadline or the size cap trips first.
        let first = match rx.recv().await {
            Some(entry) => entry,
            None => return,
        };
        let mut batch = Vec::with_capacity(batch_size);
        batch.push(first);

        let deadline = Instant::now() + flush_interval;
        let mut intake_closed = false;
        while batch.len() < batch_size {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(entry)) => batch.push(entry),
                Ok(None) => {
                    intake_closed = true;
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::record_pipeline_batch(batch.len() as u64);
        dispatch_batch(batch, compression_threshold, &on_complete).await;

        if intake_closed {
            return;
        }
    }
}

/// Runs a flushed batch on parallel workers and waits for all of them.
async fn dispatch_batch(
    batch: Vec<Arc<CacheEntry>>,
    compression_threshold: usize,
    on_complete: &CompletionCallback,
) {
    let mut workers = JoinSet::new();
    for entry in batch {
        let on_complete = Arc::clone(on_complete);
        workers.spawn(async move {
            process_entry(entry, compression_threshold, &on_complete);
        });
    }
    while workers.join_next().await.is_some() {}
}

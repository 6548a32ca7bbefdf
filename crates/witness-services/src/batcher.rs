//! Accumulates items and hands them to a sink in groups.
//!
//! A batch is flushed when it reaches `max_size` items, when its oldest item
//! has waited `max_age` since `add`, on an explicit `flush`, and on `close`.
//! Items reach the worker over a bounded channel; once it is full, `add`
//! sheds the item and reports `AddError::Full`.
//!
//! Flushed batches go to a separate upload task that calls the sink one
//! batch at a time, in order. The queue keeps aging and flushing while an
//! upload is in flight.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use witness_core::wire::{UPLOAD_BATCHES_IN_FLIGHT, UPLOAD_QUEUE_CAPACITY};

/// Receives flushed batches. Never called with an empty batch.
#[async_trait]
pub trait BatchSink<T>: Send + 'static {
    async fn flush(&mut self, batch: Vec<T>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AddError {
    #[error("batch queue is full")]
    Full,

    #[error("batcher is closed")]
    Closed,
}

enum Command<T> {
    Add(T, Instant),
    Flush,
}

pub struct Batcher<T> {
    tx: Option<mpsc::Sender<Command<T>>>,
    worker: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Batcher<T> {
    /// Spawn the batch worker. Must be called inside a tokio runtime.
    pub fn new<S: BatchSink<T>>(sink: S, max_size: usize, max_age: Duration) -> Self {
        Self::with_capacity(sink, max_size, max_age, UPLOAD_QUEUE_CAPACITY)
    }

    /// Like `new`, with an explicit bound on items waiting for the worker.
    pub fn with_capacity<S: BatchSink<T>>(
        sink: S,
        max_size: usize,
        max_age: Duration,
        capacity: usize,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let worker = tokio::spawn(run(sink, rx, max_size.max(1), max_age));
        Self {
            tx: Some(tx),
            worker: Some(worker),
        }
    }

    /// Queue an item. Its age counts from this call.
    pub fn add(&self, item: T) -> Result<(), AddError> {
        let Some(tx) = &self.tx else {
            return Err(AddError::Closed);
        };
        tx.try_send(Command::Add(item, Instant::now()))
            .map_err(|e| match e {
                TrySendError::Full(_) => AddError::Full,
                TrySendError::Closed(_) => AddError::Closed,
            })
    }

    /// Ask the worker to flush whatever is queued. Ignored while the channel
    /// is full.
    pub fn flush(&self) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(Command::Flush);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    /// Flush the remaining items and wait for every upload to finish.
    /// Calling it again is a no-op.
    pub async fn close(&mut self) {
        drop(self.tx.take());
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "batch worker panicked");
            }
        }
    }
}

async fn run<T, S>(
    sink: S,
    mut rx: mpsc::Receiver<Command<T>>,
    max_size: usize,
    max_age: Duration,
) where
    T: Send + 'static,
    S: BatchSink<T>,
{
    let (batch_tx, batch_rx) = mpsc::channel(UPLOAD_BATCHES_IN_FLIGHT);
    let uploader = tokio::spawn(upload(sink, batch_rx));

    let mut queue: Vec<T> = Vec::with_capacity(max_size);
    let mut deadline: Option<Instant> = None;

    loop {
        // The sleep future is built even when the branch is disabled.
        let wake = deadline.unwrap_or_else(Instant::now);

        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Add(item, added_at)) => {
                    if queue.is_empty() {
                        deadline = Some(added_at + max_age);
                    }
                    queue.push(item);
                    if queue.len() >= max_size {
                        hand_off(&batch_tx, &mut queue).await;
                        deadline = None;
                    }
                }
                Some(Command::Flush) => {
                    hand_off(&batch_tx, &mut queue).await;
                    deadline = None;
                }
                None => {
                    hand_off(&batch_tx, &mut queue).await;
                    break;
                }
            },

            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {
                tracing::debug!(items = queue.len(), "batch age limit reached");
                hand_off(&batch_tx, &mut queue).await;
                deadline = None;
            }
        }
    }

    drop(batch_tx);
    if let Err(e) = uploader.await {
        tracing::error!(error = %e, "batch upload task panicked");
    }
    tracing::debug!("batcher closed");
}

async fn hand_off<T>(batch_tx: &mpsc::Sender<Vec<T>>, queue: &mut Vec<T>) {
    if queue.is_empty() {
        return;
    }
    let batch = std::mem::take(queue);
    if batch_tx.send(batch).await.is_err() {
        tracing::error!("batch upload task is gone, dropping batch");
    }
}

async fn upload<T, S: BatchSink<T>>(mut sink: S, mut batch_rx: mpsc::Receiver<Vec<T>>) {
    while let Some(batch) = batch_rx.recv().await {
        sink.flush(batch).await;
    }
}

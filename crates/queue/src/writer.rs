//! Background persistence for the submission queue.
//!
//! Callers hand over snapshots taken under the queue lock; serialization and
//! file writes happen here on the blocking pool. Snapshots that pile up while
//! a write is in flight collapse into the newest one of each kind.

use crate::store::{DeadLetter, PersistedQueue, QueueStore};
use anyhow::{Context, Result};
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub(crate) enum WriteRequest {
    Queue(PersistedQueue),
    DeadLetters(Vec<DeadLetter>),
    Flush(oneshot::Sender<()>),
}

pub(crate) fn spawn_writer(store: QueueStore) -> Result<UnboundedSender<WriteRequest>> {
    let runtime = Handle::try_current()
        .context("persistent submission queue must be opened inside a tokio runtime")?;
    let (tx, rx) = mpsc::unbounded_channel();
    runtime.spawn(run_writer(store, rx));
    Ok(tx)
}

#[derive(Default)]
struct Batch {
    queue: Option<PersistedQueue>,
    dead_letters: Option<Vec<DeadLetter>>,
    waiters: Vec<oneshot::Sender<()>>,
}

impl Batch {
    fn absorb(&mut self, request: WriteRequest) {
        match request {
            WriteRequest::Queue(queue) => self.queue = Some(queue),
            WriteRequest::DeadLetters(letters) => self.dead_letters = Some(letters),
            WriteRequest::Flush(waiter) => self.waiters.push(waiter),
        }
    }
}

async fn run_writer(store: QueueStore, mut rx: UnboundedReceiver<WriteRequest>) {
    while let Some(first) = rx.recv().await {
        let mut batch = Batch::default();
        batch.absorb(first);
        while let Ok(request) = rx.try_recv() {
            batch.absorb(request);
        }

        let Batch {
            queue,
            dead_letters,
            waiters,
        } = batch;
        if queue.is_some() || dead_letters.is_some() {
            let store = store.clone();
            let written =
                tokio::task::spawn_blocking(move || write_batch(&store, queue, dead_letters)).await;
            if let Err(err) = written {
                warn!(error = %err, "queue writer task failed");
            }
        }
        for waiter in waiters {
            let _ = waiter.send(());
        }
    }
    debug!("queue writer stopped");
}

fn write_batch(
    store: &QueueStore,
    queue: Option<PersistedQueue>,
    dead_letters: Option<Vec<DeadLetter>>,
) {
    if let Some(queue) = queue {
        if let Err(err) = store.save_queue(&queue) {
            warn!(error = %err, "failed to persist submission queue");
        }
    }
    if let Some(letters) = dead_letters {
        if let Err(err) = store.save_dead_letters(&letters) {
            warn!(error = %err, "failed to persist dead letters");
        }
    }
}

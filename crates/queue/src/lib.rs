//! Buffers now-playing and scrobble submissions and delivers them in the
//! background.
//!
//! Scrobbles are retried on transient failures with capped exponential
//! backoff, indefinitely. Permanent failures go to the dead-letter record.
//! Now-playing updates get a single attempt. Entries are keyed by
//! `(kind, dedup_key)`; a key that is queued or was handled within the
//! dedup window is not accepted again.

use anyhow::Result;
use sonos_scrobbler_core::{
    QueueConfig, ScrobbleApi, Submission, SubmissionKind, SubmitError,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

mod backoff;
mod state;
pub mod store;
mod writer;

pub use backoff::backoff_delay;
pub use store::{DeadLetter, QueueStore};

use state::{Next, QueueState};
use writer::WriteRequest;

#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub dedup_window: Duration,
    pub max_dead_letters: usize,
    pub data_dir: Option<PathBuf>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from_config(&QueueConfig::default())
    }
}

impl QueueSettings {
    pub fn from_config(cfg: &QueueConfig) -> Self {
        Self {
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            backoff_cap: Duration::from_millis(cfg.backoff_cap_ms),
            dedup_window: Duration::from_secs(cfg.dedup_window_secs),
            max_dead_letters: cfg.max_dead_letters,
            data_dir: cfg.data_dir.clone(),
        }
    }
}

struct Inner {
    settings: QueueSettings,
    state: Mutex<QueueState>,
    notify: Notify,
    writer: Option<UnboundedSender<WriteRequest>>,
}

/// Cheap to clone; every clone feeds the same queue.
#[derive(Clone)]
pub struct SubmissionQueue {
    inner: Arc<Inner>,
}

impl SubmissionQueue {
    /// Opens the queue, restoring pending scrobbles from the data dir if one is set.
    /// With a data dir this spawns the file writer, so it must run inside a
    /// tokio runtime.
    pub fn open(settings: QueueSettings) -> Result<Self> {
        let mut state = QueueState::new(settings.dedup_window, settings.max_dead_letters);

        let writer = match settings.data_dir.as_deref() {
            Some(dir) => {
                let store = QueueStore::open(dir)?;
                let persisted = store.load_queue().unwrap_or_else(|err| {
                    warn!(error = %err, "discarding unreadable queue file");
                    Default::default()
                });
                let dead = store.load_dead_letters().unwrap_or_else(|err| {
                    warn!(error = %err, "discarding unreadable dead-letter file");
                    Vec::new()
                });
                let restored = state.restore(persisted, dead, SystemTime::now(), Instant::now());
                if restored > 0 {
                    info!(restored, "restored pending scrobbles from previous run");
                }
                Some(writer::spawn_writer(store)?)
            }
            None => None,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                settings,
                state: Mutex::new(state),
                notify: Notify::new(),
                writer,
            }),
        })
    }

    pub fn in_memory(settings: QueueSettings) -> Self {
        let state = QueueState::new(settings.dedup_window, settings.max_dead_letters);
        Self {
            inner: Arc::new(Inner {
                settings: QueueSettings {
                    data_dir: None,
                    ..settings
                },
                state: Mutex::new(state),
                notify: Notify::new(),
                writer: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Non-blocking. Returns false if the submission was a duplicate.
    pub fn enqueue(&self, submission: Submission) -> bool {
        let kind = submission.kind;
        let device = submission.listen.device_id.clone();
        let track = submission.listen.track.to_string();

        let mut st = self.lock();
        if !st.push(submission, SystemTime::now(), Instant::now()) {
            debug!(%kind, device = %device, track = %track, "duplicate submission ignored");
            return false;
        }
        if kind == SubmissionKind::Scrobble {
            self.persist(&st);
        }
        drop(st);

        self.inner.notify.notify_one();
        true
    }

    pub fn depth(&self) -> usize {
        self.lock().depth()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock().dead_letters()
    }

    pub fn spawn_worker(&self, api: Arc<dyn ScrobbleApi>) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move { queue.run_worker(api).await })
    }

    /// Drains the queue forever. Abort the task to stop it; undelivered
    /// scrobbles stay on disk.
    pub async fn run_worker(&self, api: Arc<dyn ScrobbleApi>) {
        info!(api = api.name(), pending = self.depth(), "submission worker started");

        loop {
            let next = self.lock().take_ready(Instant::now());
            match next {
                Next::Ready(id, submission) => {
                    let result = match submission.kind {
                        SubmissionKind::NowPlaying => {
                            api.submit_now_playing(&submission.listen).await
                        }
                        SubmissionKind::Scrobble => api.submit_scrobble(&submission.listen).await,
                    };
                    self.complete(id, &submission, result);
                }
                Next::Wait(Some(deadline)) => {
                    tokio::select! {
                        _ = self.inner.notify.notified() => {}
                        _ = tokio::time::sleep_until(deadline) => {}
                    }
                }
                Next::Wait(None) => self.inner.notify.notified().await,
            }
        }
    }

    fn complete(&self, id: u64, submission: &Submission, result: Result<(), SubmitError>) {
        let kind = submission.kind;
        let listen = &submission.listen;
        let now_sys = SystemTime::now();
        let mut st = self.lock();

        match result {
            Ok(()) => {
                st.settle(id, now_sys);
                info!(%kind, device = %listen.device_id, track = %listen.track, "submitted");
            }
            Err(SubmitError::Transient(reason)) if kind == SubmissionKind::Scrobble => {
                let attempts = st.pending_attempts(id).unwrap_or(1);
                let delay = backoff_delay(
                    self.inner.settings.backoff_base,
                    self.inner.settings.backoff_cap,
                    attempts,
                );
                st.reschedule(id, Instant::now() + delay);
                warn!(
                    device = %listen.device_id,
                    track = %listen.track,
                    attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %reason,
                    "scrobble failed; will retry"
                );
            }
            Err(err) if kind == SubmissionKind::NowPlaying => {
                st.remove(id);
                warn!(
                    device = %listen.device_id,
                    track = %listen.track,
                    error = %err,
                    "now-playing update discarded"
                );
            }
            Err(err) => {
                if let Some(entry) = st.remove(id) {
                    error!(
                        device = %listen.device_id,
                        track = %listen.track,
                        dedup_key = %listen.dedup_key,
                        error = %err,
                        "scrobble rejected; moved to dead letters"
                    );
                    st.dead_letter(entry, err.to_string(), now_sys);
                    st.remember(submission, now_sys);
                    self.write(|| WriteRequest::DeadLetters(st.dead_letters()));
                }
            }
        }

        if kind == SubmissionKind::Scrobble {
            self.persist(&st);
        }
    }

    fn persist(&self, st: &QueueState) {
        self.write(|| WriteRequest::Queue(st.persisted()));
    }

    fn write(&self, request: impl FnOnce() -> WriteRequest) {
        if let Some(writer) = &self.inner.writer {
            if writer.send(request()).is_err() {
                warn!("queue writer is gone; state not persisted");
            }
        }
    }

    /// Waits until every snapshot handed to the writer so far is on disk.
    pub async fn flush(&self) {
        let Some(writer) = &self.inner.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(WriteRequest::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }
}

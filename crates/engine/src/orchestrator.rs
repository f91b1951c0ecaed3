//! Runs one polling task per device and feeds the submission queue.
//!
//! Device tasks never share trackers. The only cross-task state is the queue
//! and the status board, which each task writes for its own device id.

use crate::eligibility::ScrobbleRules;
use crate::status::{DeviceStatus, SessionSummary, StatusReport};
use crate::tracker::PlaybackTracker;
use anyhow::Result;
use sonos_scrobbler_core::AppConfig;
use sonos_scrobbler_devices::{DeviceDirectory, SpeakerDevice};
use sonos_scrobbler_queue::store::{write_json_atomic, STATUS_FILE};
use sonos_scrobbler_queue::SubmissionQueue;
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

type StatusBoard = Arc<RwLock<HashMap<String, DeviceStatus>>>;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    pub rediscovery_interval: Duration,
    pub status_interval: Duration,
    pub rules: ScrobbleRules,
    pub restart_tolerance: Duration,
    pub status_path: Option<PathBuf>,
}

impl OrchestratorConfig {
    pub fn from_app_config(cfg: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.intervals.poll_ms.max(1)),
            rediscovery_interval: Duration::from_millis(cfg.intervals.rediscovery_ms.max(1_000)),
            status_interval: Duration::from_millis(cfg.intervals.status_ms.max(1_000)),
            rules: ScrobbleRules::from_config(&cfg.scrobble),
            restart_tolerance: Duration::from_millis(cfg.scrobble.restart_tolerance_ms),
            status_path: cfg.queue.data_dir.as_ref().map(|dir| dir.join(STATUS_FILE)),
        }
    }
}

pub struct Orchestrator {
    cfg: OrchestratorConfig,
    directory: Arc<dyn DeviceDirectory>,
    queue: SubmissionQueue,
    board: StatusBoard,
}

impl Orchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        directory: Arc<dyn DeviceDirectory>,
        queue: SubmissionQueue,
    ) -> Self {
        Self {
            cfg,
            directory,
            queue,
            board: Arc::default(),
        }
    }

    /// Polls until `shutdown` resolves. Device and submission errors are
    /// logged and never end the loop.
    pub async fn run<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let mut tasks: HashMap<String, JoinHandle<()>> = HashMap::new();
        self.rediscover(&mut tasks).await;
        info!(
            devices = tasks.len(),
            poll_ms = self.cfg.poll_interval.as_millis() as u64,
            "orchestrator started"
        );

        let mut rediscovery = delayed_interval(self.cfg.rediscovery_interval);
        let mut status = delayed_interval(self.cfg.status_interval);

        loop {
            tokio::select! {
                _ = rediscovery.tick() => self.rediscover(&mut tasks).await,
                _ = status.tick() => self.publish_status(),
                _ = &mut shutdown => {
                    info!("stopping device pollers");
                    break;
                }
            }
        }

        for (_, task) in tasks.drain() {
            task.abort();
        }
        self.publish_status();
        Ok(())
    }

    pub fn status(&self) -> StatusReport {
        let mut devices: Vec<DeviceStatus> = self
            .board
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));

        StatusReport {
            generated_at: SystemTime::now(),
            devices,
            queue_depth: self.queue.depth(),
            dead_letters: self.queue.dead_letters(),
        }
    }

    async fn rediscover(&self, tasks: &mut HashMap<String, JoinHandle<()>>) {
        let devices = match self.directory.discover().await {
            Ok(devices) => devices,
            Err(err) => {
                warn!(error = %err, "device discovery failed; keeping current devices");
                return;
            }
        };

        let live: Vec<String> = devices.iter().map(|d| d.id().to_string()).collect();
        tasks.retain(|id, task| {
            let keep = live.contains(id);
            if !keep {
                info!(device = %id, "device disappeared; stopping its poller");
                task.abort();
                self.board
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(id);
            }
            keep
        });

        self.reap_finished(tasks).await;

        for device in devices {
            if tasks.contains_key(device.id()) {
                continue;
            }
            info!(device = %device.id(), name = %device.name(), "polling device");
            self.board
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .entry(device.id().to_string())
                .or_insert_with(|| DeviceStatus::new(device.id(), device.name()));

            let tracker =
                PlaybackTracker::new(device.id(), self.cfg.rules, self.cfg.restart_tolerance);
            let id = device.id().to_string();
            let task = tokio::spawn(poll_device(
                device,
                tracker,
                self.queue.clone(),
                self.board.clone(),
                self.cfg.poll_interval,
            ));
            tasks.insert(id, task);
        }
    }

    /// Drops pollers that ended on their own so the next pass restarts them.
    async fn reap_finished(&self, tasks: &mut HashMap<String, JoinHandle<()>>) {
        let finished: Vec<String> = tasks
            .iter()
            .filter(|(_, task)| task.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        for id in finished {
            let Some(task) = tasks.remove(&id) else {
                continue;
            };
            let reason = match task.await {
                Ok(()) => "poller exited".to_string(),
                Err(err) => format!("poller stopped: {err}"),
            };
            warn!(device = %id, error = %reason, "device poller ended; restarting it");

            let mut statuses = self.board.write().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = statuses.get_mut(&id) {
                entry.last_error = Some(reason);
                entry.last_error_at = Some(SystemTime::now());
                entry.consecutive_failures += 1;
            }
        }
    }

    fn publish_status(&self) {
        let report = self.status();
        info!(summary = %report.summary(), "status");
        if let Some(path) = &self.cfg.status_path {
            if let Err(err) = write_json_atomic(path, &report) {
                warn!(error = %err, path = %path.display(), "failed to write status report");
            }
        }
    }
}

fn delayed_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn poll_device(
    device: Arc<dyn SpeakerDevice>,
    mut tracker: PlaybackTracker,
    queue: SubmissionQueue,
    board: StatusBoard,
    poll_interval: Duration,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let result = device.snapshot().await;
        let polled_at = SystemTime::now();

        let error = match result {
            Ok(snapshot) => {
                for event in tracker.update(&snapshot) {
                    if let Some(submission) = event.into_submission() {
                        queue.enqueue(submission);
                    }
                }
                None
            }
            Err(err) => {
                warn!(
                    device = %device.id(),
                    error = %err,
                    "device poll failed; retrying next cycle"
                );
                Some(err.to_string())
            }
        };

        let mut statuses = board.write().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = statuses.get_mut(device.id()) else {
            debug!(device = %device.id(), "status entry gone; poller exiting");
            return;
        };
        entry.last_polled_at = Some(polled_at);
        entry.session = tracker.session().map(SessionSummary::from);
        match error {
            Some(err) => {
                entry.last_error = Some(err);
                entry.last_error_at = Some(polled_at);
                entry.consecutive_failures += 1;
            }
            None => entry.consecutive_failures = 0,
        }
    }
}

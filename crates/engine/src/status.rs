use crate::tracker::PlaybackSession;
use serde::{Deserialize, Serialize};
use sonos_scrobbler_queue::DeadLetter;
use std::time::SystemTime;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionSummary {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
    pub started_at: SystemTime,
    pub played_secs: u64,
    pub duration_secs: Option<u64>,
    pub scrobbled: bool,
}

impl From<&PlaybackSession> for SessionSummary {
    fn from(session: &PlaybackSession) -> Self {
        Self {
            artist: session.track.artist.clone(),
            title: session.track.title.clone(),
            album: session.track.album.clone(),
            started_at: session.started_at,
            played_secs: session.accumulated.as_secs(),
            duration_secs: session.duration.map(|d| d.as_secs()),
            scrobbled: session.scrobbled,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatus {
    pub device_id: String,
    pub name: String,
    pub session: Option<SessionSummary>,
    pub last_error: Option<String>,
    pub last_error_at: Option<SystemTime>,
    pub last_polled_at: Option<SystemTime>,
    pub consecutive_failures: u32,
}

impl DeviceStatus {
    pub fn new(device_id: &str, name: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            name: name.to_string(),
            session: None,
            last_error: None,
            last_error_at: None,
            last_polled_at: None,
            consecutive_failures: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub generated_at: SystemTime,
    pub devices: Vec<DeviceStatus>,
    pub queue_depth: usize,
    pub dead_letters: Vec<DeadLetter>,
}

impl StatusReport {
    pub fn summary(&self) -> String {
        let playing = self.devices.iter().filter(|d| d.session.is_some()).count();
        let failing = self
            .devices
            .iter()
            .filter(|d| d.consecutive_failures > 0)
            .count();
        format!(
            "{} devices ({} tracking, {} failing), queue depth {}, {} dead letters",
            self.devices.len(),
            playing,
            failing,
            self.queue_depth,
            self.dead_letters.len()
        )
    }
}

use crate::model::{TrackInfo, TrackKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Identity of one listening instance: hash of (device, track key, session start).
///
/// Stable across process restarts so persisted queue entries and the
/// recently-submitted cache keep matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(device_id: &str, key: &TrackKey, started_at: SystemTime) -> Self {
        let started_ms = started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let material = format!(
            "{device_id}\u{1f}{}\u{1f}{}\u{1f}{}\u{1f}{started_ms}",
            key.artist, key.title, key.album
        );
        Self(format!("{:x}", md5::compute(material.as_bytes())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DedupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable description of a listen, carried by both now-playing and scrobble events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Listen {
    pub device_id: String,
    pub track: TrackInfo,
    pub duration: Option<Duration>,
    pub started_at: SystemTime,
    /// Accumulated PLAYING time when the event was emitted.
    pub played: Duration,
    pub dedup_key: DedupKey,
}

impl Listen {
    pub fn started_at_unix(&self) -> u64 {
        self.started_at
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum SubmissionKind {
    NowPlaying,
    Scrobble,
}

impl fmt::Display for SubmissionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NowPlaying => f.write_str("now-playing"),
            Self::Scrobble => f.write_str("scrobble"),
        }
    }
}

/// Unit of work for the submission queue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Submission {
    pub kind: SubmissionKind,
    pub listen: Listen,
}

impl Submission {
    pub fn now_playing(listen: Listen) -> Self {
        Self {
            kind: SubmissionKind::NowPlaying,
            listen,
        }
    }

    pub fn scrobble(listen: Listen) -> Self {
        Self {
            kind: SubmissionKind::Scrobble,
            listen,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.listen.device_id
    }
}

/// What a playback tracker emits on each update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackEvent {
    NowPlaying(Listen),
    Scrobble(Listen),
    Stopped {
        device_id: String,
        track: TrackInfo,
        played: Duration,
    },
}

impl PlaybackEvent {
    pub fn into_submission(self) -> Option<Submission> {
        match self {
            Self::NowPlaying(listen) => Some(Submission::now_playing(listen)),
            Self::Scrobble(listen) => Some(Submission::scrobble(listen)),
            Self::Stopped { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DedupKey;
    use crate::model::TrackKey;
    use std::time::{Duration, SystemTime};

    #[test]
    fn dedup_key_depends_on_device_track_and_start() {
        let key = TrackKey::new("Artist", "Title", None);
        let start = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);

        let a = DedupKey::new("kitchen", &key, start);
        assert_eq!(a, DedupKey::new("kitchen", &key, start));
        assert_ne!(a, DedupKey::new("office", &key, start));
        assert_ne!(a, DedupKey::new("kitchen", &key, start + Duration::from_secs(1)));
        assert_eq!(a.as_str().len(), 32);
    }
}

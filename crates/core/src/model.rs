use crate::error::MalformedSnapshot;
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportState {
    Playing,
    Paused,
    Stopped,
}

/// One poll's observation of a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub device_id: String,
    pub artist: Option<String>,
    pub title: Option<String>,
    pub album: Option<String>,
    pub duration: Option<Duration>,
    pub position: Option<Duration>,
    pub transport_state: TransportState,
    pub observed_at: SystemTime,
}

impl TrackSnapshot {
    pub fn idle(device_id: impl Into<String>, observed_at: SystemTime) -> Self {
        Self {
            device_id: device_id.into(),
            artist: None,
            title: None,
            album: None,
            duration: None,
            position: None,
            transport_state: TransportState::Stopped,
            observed_at,
        }
    }

    /// Zero durations are reported by some renderers for streams; they mean "unknown".
    pub fn known_duration(&self) -> Option<Duration> {
        self.duration.filter(|d| !d.is_zero())
    }

    /// `Ok(None)` is idle, `Ok(Some(_))` a loaded track. Partial identity, or
    /// a device claiming to play nothing, is malformed.
    pub fn classify(&self) -> Result<Option<TrackInfo>, MalformedSnapshot> {
        let artist = non_blank(self.artist.as_deref());
        let title = non_blank(self.title.as_deref());

        match (artist, title) {
            (Some(artist), Some(title)) => Ok(Some(TrackInfo {
                artist: artist.to_string(),
                title: title.to_string(),
                album: non_blank(self.album.as_deref()).map(str::to_string),
            })),
            (None, None) if self.transport_state != TransportState::Playing => Ok(None),
            (None, None) => Err(MalformedSnapshot::new(
                &self.device_id,
                "device reports PLAYING without artist and title",
            )),
            (Some(_), None) => Err(MalformedSnapshot::new(&self.device_id, "missing title")),
            (None, Some(_)) => Err(MalformedSnapshot::new(&self.device_id, "missing artist")),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Display form of a track, as submitted to the remote service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackInfo {
    pub artist: String,
    pub title: String,
    pub album: Option<String>,
}

impl TrackInfo {
    pub fn key(&self) -> TrackKey {
        TrackKey::new(&self.artist, &self.title, self.album.as_deref())
    }
}

impl std::fmt::Display for TrackInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.artist, self.title)
    }
}

/// Normalized identity of "the same track" across polls.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TrackKey {
    pub artist: String,
    pub title: String,
    pub album: String,
}

impl TrackKey {
    pub fn new(artist: &str, title: &str, album: Option<&str>) -> Self {
        Self {
            artist: normalize(artist),
            title: normalize(title),
            album: album.map(normalize).unwrap_or_default(),
        }
    }
}

fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::{TrackKey, TrackSnapshot, TransportState};
    use std::time::{Duration, SystemTime};

    fn snapshot(artist: Option<&str>, title: Option<&str>, state: TransportState) -> TrackSnapshot {
        TrackSnapshot {
            device_id: "kitchen".to_string(),
            artist: artist.map(str::to_string),
            title: title.map(str::to_string),
            album: Some("  ".to_string()),
            duration: Some(Duration::from_secs(200)),
            position: Some(Duration::ZERO),
            transport_state: state,
            observed_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn track_key_folds_case_and_whitespace() {
        let a = TrackKey::new("  Daft Punk ", "Get   Lucky", Some("RAM"));
        let b = TrackKey::new("daft punk", "get lucky", Some(" ram"));
        assert_eq!(a, b);
        assert_ne!(a, TrackKey::new("daft punk", "get lucky", None));
    }

    #[test]
    fn classify_separates_idle_loaded_and_malformed() {
        assert!(matches!(
            snapshot(None, None, TransportState::Stopped).classify(),
            Ok(None)
        ));
        assert!(snapshot(None, None, TransportState::Playing)
            .classify()
            .is_err());
        assert!(snapshot(Some("A"), None, TransportState::Paused)
            .classify()
            .is_err());

        let track = snapshot(Some(" A "), Some("T"), TransportState::Stopped)
            .classify()
            .ok()
            .flatten();
        let track = track.as_ref().map(|t| (t.artist.as_str(), t.album.is_none()));
        assert_eq!(track, Some(("A", true)));
    }

    #[test]
    fn zero_duration_is_unknown() {
        let mut snap = snapshot(Some("A"), Some("T"), TransportState::Playing);
        snap.duration = Some(Duration::ZERO);
        assert_eq!(snap.known_duration(), None);
    }
}

use crate::tracker::PlaybackSession;
use sonos_scrobbler_core::ScrobbleConfig;
use std::time::Duration;

/// Thresholds deciding whether a listen counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScrobbleRules {
    pub min_duration: Duration,
    pub threshold_percent: u8,
    pub max_threshold: Duration,
}

impl Default for ScrobbleRules {
    fn default() -> Self {
        Self {
            min_duration: Duration::from_secs(30),
            threshold_percent: 50,
            max_threshold: Duration::from_secs(240),
        }
    }
}

impl ScrobbleRules {
    pub fn from_config(cfg: &ScrobbleConfig) -> Self {
        Self {
            min_duration: Duration::from_secs(cfg.min_duration_secs),
            threshold_percent: cfg.threshold_percent.clamp(1, 100),
            max_threshold: Duration::from_secs(cfg.max_threshold_secs),
        }
    }

    /// Playing time required for a track of `duration`.
    pub fn threshold(&self, duration: Duration) -> Duration {
        duration
            .checked_mul(u32::from(self.threshold_percent))
            .map_or(self.max_threshold, |d| (d / 100).min(self.max_threshold))
    }

    /// Pure check. Flipping `scrobbled` is the caller's job.
    pub fn is_eligible(&self, session: &PlaybackSession, duration: Option<Duration>) -> bool {
        match duration {
            Some(d) if d >= self.min_duration => session.accumulated >= self.threshold(d),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ScrobbleRules;
    use crate::tracker::PlaybackSession;
    use sonos_scrobbler_core::{DedupKey, TrackInfo, TransportState};
    use std::time::{Duration, SystemTime};

    fn session(accumulated: u64) -> PlaybackSession {
        let track = TrackInfo {
            artist: "Artist".to_string(),
            title: "Title".to_string(),
            album: None,
        };
        let key = track.key();
        PlaybackSession {
            dedup_key: DedupKey::new("dev", &key, SystemTime::UNIX_EPOCH),
            track_key: key,
            track,
            duration: None,
            started_at: SystemTime::UNIX_EPOCH,
            accumulated: Duration::from_secs(accumulated),
            scrobbled: false,
            last_position: None,
            last_observed_at: SystemTime::UNIX_EPOCH,
            last_state: TransportState::Playing,
        }
    }

    fn secs(s: u64) -> Option<Duration> {
        Some(Duration::from_secs(s))
    }

    #[test]
    fn half_the_track_or_four_minutes() {
        let rules = ScrobbleRules::default();
        assert!(!rules.is_eligible(&session(99), secs(200)));
        assert!(rules.is_eligible(&session(100), secs(200)));

        assert!(!rules.is_eligible(&session(239), secs(1_800)));
        assert!(rules.is_eligible(&session(240), secs(1_800)));
    }

    #[test]
    fn short_or_unknown_tracks_never_qualify() {
        let rules = ScrobbleRules::default();
        assert!(!rules.is_eligible(&session(1_000), secs(29)));
        assert!(!rules.is_eligible(&session(1_000), None));
        assert!(rules.is_eligible(&session(15), secs(30)));
    }

    #[test]
    fn evaluation_is_idempotent() {
        let rules = ScrobbleRules::default();
        let s = session(120);
        let first = rules.is_eligible(&s, secs(200));
        assert_eq!(first, rules.is_eligible(&s, secs(200)));
        assert!(!s.scrobbled);
    }

    #[test]
    fn configurable_percentage() {
        let rules = ScrobbleRules {
            threshold_percent: 25,
            ..ScrobbleRules::default()
        };
        assert_eq!(rules.threshold(Duration::from_secs(200)), Duration::from_secs(50));
    }

    #[test]
    fn huge_durations_hit_the_cap() {
        let rules = ScrobbleRules::default();
        let huge = Duration::from_secs(3_600_000_000_000_000_000);
        assert_eq!(rules.threshold(huge), Duration::from_secs(240));
        assert_eq!(rules.threshold(Duration::MAX), Duration::from_secs(240));
        assert!(rules.is_eligible(&session(240), Some(huge)));
    }
}

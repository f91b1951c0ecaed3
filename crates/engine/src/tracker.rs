use crate::eligibility::ScrobbleRules;
use sonos_scrobbler_core::{
    DedupKey, Listen, PlaybackEvent, TrackInfo, TrackKey, TrackSnapshot, TransportState,
};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// The tracker's model of "this device is playing track X".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackSession {
    pub track_key: TrackKey,
    pub track: TrackInfo,
    pub duration: Option<Duration>,
    pub started_at: SystemTime,
    /// Sum of observed PLAYING intervals.
    pub accumulated: Duration,
    pub scrobbled: bool,
    pub last_position: Option<Duration>,
    pub last_observed_at: SystemTime,
    pub last_state: TransportState,
    pub dedup_key: DedupKey,
}

impl PlaybackSession {
    fn listen(&self, device_id: &str) -> Listen {
        Listen {
            device_id: device_id.to_string(),
            track: self.track.clone(),
            duration: self.duration,
            started_at: self.started_at,
            played: self.accumulated,
            dedup_key: self.dedup_key.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Tracking(PlaybackSession),
}

/// Turns successive snapshots of one device into session transitions and events.
pub struct PlaybackTracker {
    device_id: String,
    rules: ScrobbleRules,
    restart_tolerance: Duration,
    state: TrackerState,
}

impl PlaybackTracker {
    pub fn new(
        device_id: impl Into<String>,
        rules: ScrobbleRules,
        restart_tolerance: Duration,
    ) -> Self {
        Self {
            device_id: device_id.into(),
            rules,
            restart_tolerance,
            state: TrackerState::Idle,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn session(&self) -> Option<&PlaybackSession> {
        match &self.state {
            TrackerState::Tracking(session) => Some(session),
            TrackerState::Idle => None,
        }
    }

    pub fn update(&mut self, snapshot: &TrackSnapshot) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();

        let track = match snapshot.classify() {
            Ok(track) => track,
            Err(err) => {
                warn!(device = %self.device_id, error = %err, "dropping malformed snapshot");
                return events;
            }
        };

        let previous = std::mem::replace(&mut self.state, TrackerState::Idle);

        match (previous, track) {
            (TrackerState::Idle, None) => {}
            (TrackerState::Tracking(session), None) => {
                self.close(session, true, &mut events);
            }
            (TrackerState::Tracking(mut session), Some(track))
                if session.track_key == track.key() =>
            {
                if self.is_restart(&session, snapshot) {
                    debug!(
                        device = %self.device_id,
                        track = %session.track,
                        "position jumped back; counting a new listen"
                    );
                    self.close(session, false, &mut events);
                    self.open(track, snapshot, &mut events);
                } else {
                    self.advance(&mut session, snapshot);
                    self.check_running(&mut session, &mut events);
                    self.state = TrackerState::Tracking(session);
                }
            }
            (previous, Some(track)) => {
                if let TrackerState::Tracking(session) = previous {
                    self.close(session, false, &mut events);
                }
                self.open(track, snapshot, &mut events);
            }
        }

        events
    }

    fn is_restart(&self, session: &PlaybackSession, snapshot: &TrackSnapshot) -> bool {
        match (snapshot.position, session.last_position) {
            (Some(now), Some(prev)) => now.saturating_add(self.restart_tolerance) < prev,
            _ => false,
        }
    }

    fn advance(&self, session: &mut PlaybackSession, snapshot: &TrackSnapshot) {
        if snapshot.transport_state == TransportState::Playing {
            let wall = snapshot
                .observed_at
                .duration_since(session.last_observed_at)
                .unwrap_or_default();
            let moved = match (snapshot.position, session.last_position) {
                (Some(now), Some(prev)) => Some(now.saturating_sub(prev)),
                _ => None,
            };
            // Without a position to confirm it, time since a paused poll is not credited.
            let credit = match (session.last_state, moved) {
                (_, Some(moved)) => wall.min(moved),
                (TransportState::Playing, None) => wall,
                (_, None) => Duration::ZERO,
            };
            session.accumulated = session.accumulated.saturating_add(credit);
        }

        if let Some(duration) = snapshot.known_duration() {
            session.duration = Some(duration);
        }
        session.last_position = snapshot.position;
        session.last_observed_at = snapshot.observed_at;
        session.last_state = snapshot.transport_state;
    }

    fn check_running(&self, session: &mut PlaybackSession, events: &mut Vec<PlaybackEvent>) {
        if session.scrobbled || !self.rules.is_eligible(session, session.duration) {
            return;
        }
        session.scrobbled = true;
        info!(
            device = %self.device_id,
            track = %session.track,
            played_secs = session.accumulated.as_secs(),
            "track qualified for scrobble"
        );
        events.push(PlaybackEvent::Scrobble(session.listen(&self.device_id)));
    }

    fn open(
        &mut self,
        track: TrackInfo,
        snapshot: &TrackSnapshot,
        events: &mut Vec<PlaybackEvent>,
    ) {
        let track_key = track.key();
        let session = PlaybackSession {
            dedup_key: DedupKey::new(&self.device_id, &track_key, snapshot.observed_at),
            track_key,
            track,
            duration: snapshot.known_duration(),
            started_at: snapshot.observed_at,
            accumulated: Duration::ZERO,
            scrobbled: false,
            last_position: snapshot.position,
            last_observed_at: snapshot.observed_at,
            last_state: snapshot.transport_state,
        };

        info!(device = %self.device_id, track = %session.track, "now playing");
        events.push(PlaybackEvent::NowPlaying(session.listen(&self.device_id)));
        self.state = TrackerState::Tracking(session);
    }

    fn close(&self, mut session: PlaybackSession, stopped: bool, events: &mut Vec<PlaybackEvent>) {
        self.check_running(&mut session, events);
        if stopped {
            info!(device = %self.device_id, track = %session.track, "playback stopped");
            events.push(PlaybackEvent::Stopped {
                device_id: self.device_id.clone(),
                track: session.track,
                played: session.accumulated,
            });
        }
    }
}

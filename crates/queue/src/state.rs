use crate::store::{DeadLetter, PersistedQueue, RecentKey};
use sonos_scrobbler_core::{DedupKey, Submission, SubmissionKind};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, SystemTime};
use tokio::time::Instant;

type EntryKey = (SubmissionKind, DedupKey);

fn entry_key(submission: &Submission) -> EntryKey {
    (submission.kind, submission.listen.dedup_key.clone())
}

#[derive(Debug, Clone)]
pub(crate) struct PendingEntry {
    pub id: u64,
    pub submission: Submission,
    pub attempts: u32,
    pub next_attempt: Instant,
    pub in_flight: bool,
}

#[derive(Debug)]
pub(crate) enum Next {
    Ready(u64, Submission),
    /// Nothing to send before the deadline (or until woken, if `None`).
    Wait(Option<Instant>),
}

/// Queue bookkeeping. All reads and writes of the dedup sets happen under one lock.
#[derive(Debug)]
pub(crate) struct QueueState {
    pending: VecDeque<PendingEntry>,
    queued: HashSet<EntryKey>,
    recent: HashMap<EntryKey, SystemTime>,
    dead: VecDeque<DeadLetter>,
    next_id: u64,
    dedup_window: Duration,
    max_dead_letters: usize,
}

impl QueueState {
    pub fn new(dedup_window: Duration, max_dead_letters: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            queued: HashSet::new(),
            recent: HashMap::new(),
            dead: VecDeque::new(),
            next_id: 0,
            dedup_window,
            max_dead_letters,
        }
    }

    pub fn depth(&self) -> usize {
        self.pending.len()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.dead.iter().cloned().collect()
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len()
    }

    /// Returns false when the same listen is already queued or was recently handled.
    pub fn push(&mut self, submission: Submission, now_sys: SystemTime, now: Instant) -> bool {
        self.prune_recent(now_sys);

        let key = entry_key(&submission);
        if self.queued.contains(&key) || self.recent.contains_key(&key) {
            return false;
        }

        if submission.kind == SubmissionKind::NowPlaying {
            self.drop_superseded_now_playing(submission.device_id());
        }

        self.next_id += 1;
        self.pending.push_back(PendingEntry {
            id: self.next_id,
            submission,
            attempts: 0,
            next_attempt: now,
            in_flight: false,
        });
        self.queued.insert(key);
        true
    }

    fn drop_superseded_now_playing(&mut self, device_id: &str) {
        let queued = &mut self.queued;
        self.pending.retain(|entry| {
            let stale = entry.submission.kind == SubmissionKind::NowPlaying
                && entry.submission.device_id() == device_id
                && !entry.in_flight;
            if stale {
                queued.remove(&entry_key(&entry.submission));
            }
            !stale
        });
    }

    /// Picks the oldest due entry among the heads of each device's line.
    pub fn take_ready(&mut self, now: Instant) -> Next {
        let mut seen: HashSet<&str> = HashSet::new();
        let mut ready = None;
        let mut earliest: Option<Instant> = None;

        for (idx, entry) in self.pending.iter().enumerate() {
            if !seen.insert(entry.submission.device_id()) || entry.in_flight {
                continue;
            }
            if entry.next_attempt <= now {
                ready = Some(idx);
                break;
            }
            earliest = Some(earliest.map_or(entry.next_attempt, |e| e.min(entry.next_attempt)));
        }

        match ready.and_then(|idx| self.pending.get_mut(idx)) {
            Some(entry) => {
                entry.in_flight = true;
                entry.attempts += 1;
                Next::Ready(entry.id, entry.submission.clone())
            }
            None => Next::Wait(earliest),
        }
    }

    pub fn remove(&mut self, id: u64) -> Option<PendingEntry> {
        let idx = self.pending.iter().position(|e| e.id == id)?;
        let entry = self.pending.remove(idx)?;
        self.queued.remove(&entry_key(&entry.submission));
        Some(entry)
    }

    /// Removes a handled entry and remembers its key for the dedup window.
    pub fn settle(&mut self, id: u64, now_sys: SystemTime) -> Option<PendingEntry> {
        let entry = self.remove(id)?;
        self.remember(&entry.submission, now_sys);
        Some(entry)
    }

    pub fn remember(&mut self, submission: &Submission, now_sys: SystemTime) {
        self.recent.insert(entry_key(submission), now_sys);
    }

    pub fn pending_attempts(&self, id: u64) -> Option<u32> {
        self.pending.iter().find(|e| e.id == id).map(|e| e.attempts)
    }

    pub fn reschedule(&mut self, id: u64, at: Instant) -> Option<u32> {
        let entry = self.pending.iter_mut().find(|e| e.id == id)?;
        entry.in_flight = false;
        entry.next_attempt = at;
        Some(entry.attempts)
    }

    pub fn dead_letter(&mut self, entry: PendingEntry, error: String, now_sys: SystemTime) {
        self.dead.push_back(DeadLetter {
            submission: entry.submission,
            error,
            attempts: entry.attempts,
            failed_at: now_sys,
        });
        while self.dead.len() > self.max_dead_letters {
            self.dead.pop_front();
        }
    }

    fn prune_recent(&mut self, now_sys: SystemTime) {
        let window = self.dedup_window;
        self.recent.retain(|_, at| {
            now_sys
                .duration_since(*at)
                .map(|age| age < window)
                .unwrap_or(true)
        });
    }

    /// Scrobbles and dedup keys worth keeping across restarts. Now-playing is not.
    pub fn persisted(&self) -> PersistedQueue {
        PersistedQueue {
            pending: self
                .pending
                .iter()
                .filter(|e| e.submission.kind == SubmissionKind::Scrobble)
                .map(|e| e.submission.clone())
                .collect(),
            recent: self
                .recent
                .iter()
                .map(|((kind, key), at)| RecentKey {
                    kind: *kind,
                    key: key.clone(),
                    at: *at,
                })
                .collect(),
        }
    }

    pub fn restore(
        &mut self,
        persisted: PersistedQueue,
        dead: Vec<DeadLetter>,
        now_sys: SystemTime,
        now: Instant,
    ) -> usize {
        for recent in persisted.recent {
            self.recent.insert((recent.kind, recent.key), recent.at);
        }
        self.prune_recent(now_sys);

        let mut restored = 0;
        for submission in persisted.pending {
            if self.push(submission, now_sys, now) {
                restored += 1;
            }
        }

        self.dead = dead.into();
        while self.dead.len() > self.max_dead_letters {
            self.dead.pop_front();
        }
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::{Next, QueueState};
    use sonos_scrobbler_core::{DedupKey, Listen, Submission, TrackInfo};
    use std::time::{Duration, SystemTime};
    use tokio::time::Instant;

    fn listen(device: &str, title: &str) -> Listen {
        let track = TrackInfo {
            artist: "Artist".to_string(),
            title: title.to_string(),
            album: None,
        };
        Listen {
            dedup_key: DedupKey::new(device, &track.key(), SystemTime::UNIX_EPOCH),
            device_id: device.to_string(),
            track,
            duration: Some(Duration::from_secs(200)),
            started_at: SystemTime::UNIX_EPOCH,
            played: Duration::from_secs(100),
        }
    }

    fn state() -> QueueState {
        QueueState::new(Duration::from_secs(3_600), 2)
    }

    #[test]
    fn same_listen_is_queued_once_per_kind() {
        let mut st = state();
        let now = Instant::now();
        let sys = SystemTime::now();
        assert!(st.push(Submission::scrobble(listen("a", "x")), sys, now));
        assert!(!st.push(Submission::scrobble(listen("a", "x")), sys, now));
        assert!(st.push(Submission::now_playing(listen("a", "x")), sys, now));
        assert_eq!(st.depth(), 2);
    }

    #[test]
    fn recent_keys_expire_after_window() {
        let mut st = state();
        let now = Instant::now();
        let sys = SystemTime::now();
        st.push(Submission::scrobble(listen("a", "x")), sys, now);
        let id = match st.take_ready(now) {
            Next::Ready(id, _) => id,
            other => panic!("unexpected {other:?}"),
        };
        st.settle(id, sys);

        assert!(!st.push(
            Submission::scrobble(listen("a", "x")),
            sys + Duration::from_secs(60),
            now
        ));
        assert!(st.push(
            Submission::scrobble(listen("a", "x")),
            sys + Duration::from_secs(3_601),
            now
        ));
        assert_eq!(st.recent_len(), 0);
    }

    #[test]
    fn blocked_device_does_not_hold_back_others() {
        let mut st = state();
        let now = Instant::now();
        let sys = SystemTime::now();
        st.push(Submission::scrobble(listen("a", "1")), sys, now);
        st.push(Submission::scrobble(listen("a", "2")), sys, now);
        st.push(Submission::scrobble(listen("b", "3")), sys, now);

        let first = match st.take_ready(now) {
            Next::Ready(id, s) => {
                assert_eq!(s.listen.track.title, "1");
                id
            }
            other => panic!("unexpected {other:?}"),
        };
        st.reschedule(first, now + Duration::from_secs(30));

        match st.take_ready(now) {
            Next::Ready(_, s) => assert_eq!(s.listen.track.title, "3"),
            other => panic!("unexpected {other:?}"),
        }
        match st.take_ready(now) {
            Next::Wait(Some(at)) => assert_eq!(at, now + Duration::from_secs(30)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn newer_now_playing_replaces_queued_one() {
        let mut st = state();
        let now = Instant::now();
        let sys = SystemTime::now();
        st.push(Submission::now_playing(listen("a", "1")), sys, now);
        st.push(Submission::now_playing(listen("a", "2")), sys, now);
        st.push(Submission::now_playing(listen("b", "3")), sys, now);
        assert_eq!(st.depth(), 2);
        assert!(st.push(Submission::now_playing(listen("a", "1")), sys, now));
    }

    #[test]
    fn dead_letters_are_bounded() {
        let mut st = state();
        let now = Instant::now();
        let sys = SystemTime::now();
        for title in ["1", "2", "3"] {
            st.push(Submission::scrobble(listen("a", title)), sys, now);
            if let Next::Ready(id, _) = st.take_ready(now) {
                let entry = st.remove(id).expect("entry");
                st.dead_letter(entry, "rejected".to_string(), sys);
            }
        }
        let titles: Vec<_> = st
            .dead_letters()
            .into_iter()
            .map(|d| d.submission.listen.track.title)
            .collect();
        assert_eq!(titles, vec!["2", "3"]);
    }

    #[test]
    fn persistence_skips_now_playing() {
        let mut st = state();
        let now = Instant::now();
        let sys = SystemTime::now();
        st.push(Submission::now_playing(listen("a", "1")), sys, now);
        st.push(Submission::scrobble(listen("a", "1")), sys, now);

        let persisted = st.persisted();
        assert_eq!(persisted.pending.len(), 1);

        let mut fresh = state();
        assert_eq!(fresh.restore(persisted, Vec::new(), sys, now), 1);
        assert_eq!(fresh.depth(), 1);
    }
}

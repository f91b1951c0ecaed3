//! Playback tracking and scrobble decisions for a set of speakers.
//!
//! [`PlaybackTracker`] turns the snapshots of one device into now-playing and
//! scrobble events; [`Orchestrator`] runs one tracker per device and hands
//! the events to the submission queue.

pub mod eligibility;
pub mod orchestrator;
pub mod status;
pub mod tracker;

pub use eligibility::ScrobbleRules;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use status::{DeviceStatus, SessionSummary, StatusReport};
pub use tracker::{PlaybackSession, PlaybackTracker, TrackerState};

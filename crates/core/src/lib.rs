pub mod api;
pub mod config;
pub mod error;
pub mod event;
pub mod model;

pub use api::ScrobbleApi;
pub use config::{
    AppConfig, DeviceConfig, IntervalsConfig, LastFmConfig, QueueConfig, ScrobbleConfig,
};
pub use error::{DeviceError, MalformedSnapshot, SubmitError};
pub use event::{DedupKey, Listen, PlaybackEvent, Submission, SubmissionKind};
pub use model::{TrackInfo, TrackKey, TrackSnapshot, TransportState};

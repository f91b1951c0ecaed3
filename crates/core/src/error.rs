use thiserror::Error;

/// Failure fetching a snapshot from one device. Always scoped to a single poll.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    #[error("device {device} unreachable: {reason}")]
    Unreachable { device: String, reason: String },

    #[error("malformed response from {device}: {reason}")]
    MalformedResponse { device: String, reason: String },
}

impl DeviceError {
    pub fn unreachable(device: &str, reason: impl ToString) -> Self {
        Self::Unreachable {
            device: device.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(device: &str, reason: impl ToString) -> Self {
        Self::MalformedResponse {
            device: device.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A snapshot that cannot describe either idle or a loaded track.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("malformed snapshot from {device}: {reason}")]
pub struct MalformedSnapshot {
    pub device: String,
    pub reason: String,
}

impl MalformedSnapshot {
    pub fn new(device: &str, reason: impl ToString) -> Self {
        Self {
            device: device.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Outcome of a rejected submission, classified for the retry policy.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmitError {
    #[error("transient submission failure: {0}")]
    Transient(String),

    #[error("permanent submission failure: {0}")]
    Permanent(String),
}

impl SubmitError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

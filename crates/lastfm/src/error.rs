use serde_json::Value;
use sonos_scrobbler_core::SubmitError;
use thiserror::Error;

/// API error codes worth retrying: operation failed, service offline,
/// temporarily unavailable, rate limit exceeded.
const TRANSIENT_CODES: [u64; 4] = [8, 11, 16, 29];

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("missing Last.fm credentials: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Last.fm rejected the credentials: {0}")]
    AuthRejected(String),

    #[error("Last.fm authentication unavailable: {0}")]
    Unavailable(String),
}

impl From<SubmitError> for CredentialError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Transient(reason) => Self::Unavailable(reason),
            SubmitError::Permanent(reason) => Self::AuthRejected(reason),
        }
    }
}

pub(crate) fn classify_transport(err: reqwest::Error) -> SubmitError {
    if err.is_builder() {
        SubmitError::Permanent(format!("invalid request: {err}"))
    } else {
        SubmitError::Transient(format!("request failed: {err}"))
    }
}

/// Turns an HTTP status plus response body into the API payload or a
/// classified failure.
pub(crate) fn classify_response(status: u16, body: &str) -> Result<Value, SubmitError> {
    let retryable_status = status == 429 || status >= 500;
    let parsed: Option<Value> = serde_json::from_str(body).ok();

    if let Some(code) = parsed.as_ref().and_then(|v| v.get("error")).and_then(lenient_u64) {
        let message = parsed
            .as_ref()
            .and_then(|v| v.get("message"))
            .and_then(Value::as_str)
            .unwrap_or("no message");
        let reason = format!("error {code}: {message}");
        return Err(if retryable_status || TRANSIENT_CODES.contains(&code) {
            SubmitError::Transient(reason)
        } else {
            SubmitError::Permanent(reason)
        });
    }

    if retryable_status {
        return Err(SubmitError::Transient(format!("HTTP {status}")));
    }
    if !(200..300).contains(&status) {
        return Err(SubmitError::Permanent(format!("HTTP {status}")));
    }

    parsed.ok_or_else(|| SubmitError::Permanent("response is not JSON".to_string()))
}

/// A scrobble can be answered with 200 and still be dropped by the service.
pub(crate) fn check_scrobble_accepted(payload: &Value) -> Result<(), SubmitError> {
    let Some(scrobbles) = payload.get("scrobbles") else {
        return Ok(());
    };
    let ignored = scrobbles
        .pointer("/@attr/ignored")
        .and_then(lenient_u64)
        .unwrap_or(0);
    if ignored == 0 {
        return Ok(());
    }

    let entry = match scrobbles.get("scrobble") {
        Some(Value::Array(items)) => items.first(),
        other => other,
    };
    let code = entry
        .and_then(|e| e.pointer("/ignoredMessage/code"))
        .and_then(lenient_u64)
        .unwrap_or(0);
    Err(SubmitError::Permanent(format!("scrobble ignored (code {code})")))
}

/// Last.fm sends numbers either as JSON numbers or as strings.
pub(crate) fn lenient_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

use crate::xml::leaf_fields;
use crate::SpeakerDevice;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sonos_scrobbler_core::{DeviceConfig, DeviceError, TrackSnapshot, TransportState};
use std::collections::HashMap;
use std::time::{Duration, SystemTime};
use tracing::debug;
use url::Url;

const AVTRANSPORT_PATH: &str = "/MediaRenderer/AVTransport/Control";
const AVTRANSPORT_SERVICE: &str = "urn:schemas-upnp-org:service:AVTransport:1";

pub struct SonosDevice {
    id: String,
    name: String,
    control_url: Url,
    client: reqwest::Client,
}

impl SonosDevice {
    pub fn new(cfg: &DeviceConfig, client: reqwest::Client) -> Result<Self> {
        let base = Url::parse(&format!("http://{}:{}", cfg.host.trim(), cfg.port()))?;
        let control_url = base.join(AVTRANSPORT_PATH)?;
        if control_url.host_str().is_none() {
            return Err(anyhow!("device url has no host"));
        }
        Ok(Self {
            id: cfg.host.trim().to_string(),
            name: cfg.display_name().to_string(),
            control_url,
            client,
        })
    }

    async fn invoke(&self, action: &str) -> Result<HashMap<String, String>, DeviceError> {
        let body = format!(
            concat!(
                r#"<?xml version="1.0" encoding="utf-8"?>"#,
                r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
                r#"s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
                r#"<s:Body><u:{action} xmlns:u="{service}"><InstanceID>0</InstanceID></u:{action}>"#,
                r#"</s:Body></s:Envelope>"#
            ),
            action = action,
            service = AVTRANSPORT_SERVICE
        );

        let response = self
            .client
            .post(self.control_url.clone())
            .header("Content-Type", r#"text/xml; charset="utf-8""#)
            .header("SOAPACTION", format!("\"{AVTRANSPORT_SERVICE}#{action}\""))
            .body(body)
            .send()
            .await
            .map_err(|err| DeviceError::unreachable(&self.id, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(DeviceError::unreachable(
                &self.id,
                format!("{action} returned HTTP {status}"),
            ));
        }

        let text = response
            .text()
            .await
            .map_err(|err| DeviceError::unreachable(&self.id, err))?;
        debug!(device = %self.id, action, "soap response received");

        leaf_fields(&text).map_err(|err| DeviceError::malformed(&self.id, err))
    }
}

#[async_trait]
impl SpeakerDevice for SonosDevice {
    fn id(&self) -> &str {
        &self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn snapshot(&self) -> Result<TrackSnapshot, DeviceError> {
        let position = self.invoke("GetPositionInfo").await?;
        let transport = self.invoke("GetTransportInfo").await?;
        build_snapshot(&self.id, &position, &transport, SystemTime::now())
    }
}

pub(crate) fn build_snapshot(
    device_id: &str,
    position: &HashMap<String, String>,
    transport: &HashMap<String, String>,
    observed_at: SystemTime,
) -> Result<TrackSnapshot, DeviceError> {
    let raw_state = transport
        .get("CurrentTransportState")
        .ok_or_else(|| DeviceError::malformed(device_id, "missing CurrentTransportState"))?;
    let transport_state = parse_transport_state(raw_state).ok_or_else(|| {
        DeviceError::malformed(device_id, format!("unknown transport state {raw_state}"))
    })?;

    let meta = match position.get("TrackMetaData").map(|m| m.trim()) {
        Some(m) if !m.is_empty() && m != "NOT_IMPLEMENTED" => {
            leaf_fields(m).map_err(|err| DeviceError::malformed(device_id, err))?
        }
        _ => HashMap::new(),
    };

    let (artist, title) = track_identity(&meta);

    Ok(TrackSnapshot {
        device_id: device_id.to_string(),
        artist,
        title,
        album: meta.get("album").cloned(),
        duration: position.get("TrackDuration").and_then(|v| parse_hms(v)),
        position: position.get("RelTime").and_then(|v| parse_hms(v)),
        transport_state,
        observed_at,
    })
}

/// Radio streams carry "Artist - Title" in `streamContent` instead of `creator`.
fn track_identity(meta: &HashMap<String, String>) -> (Option<String>, Option<String>) {
    let creator = meta.get("creator").cloned();
    let title = meta.get("title").cloned();
    if creator.is_some() {
        return (creator, title);
    }
    match meta.get("streamContent").and_then(|s| s.split_once(" - ")) {
        Some((artist, song)) => (Some(artist.to_string()), Some(song.to_string())),
        None => (None, title),
    }
}

fn parse_transport_state(raw: &str) -> Option<TransportState> {
    match raw.trim() {
        "PLAYING" => Some(TransportState::Playing),
        "PAUSED_PLAYBACK" | "TRANSITIONING" => Some(TransportState::Paused),
        "STOPPED" | "NO_MEDIA_PRESENT" => Some(TransportState::Stopped),
        _ => None,
    }
}

/// Parses `H:MM:SS` or `MM:SS`. Sentinels such as `NOT_IMPLEMENTED` mean unknown.
pub(crate) fn parse_hms(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "NOT_IMPLEMENTED" || raw == "-:--:--" {
        return None;
    }

    let parts = raw
        .split(':')
        .map(|p| p.split('.').next().unwrap_or(p).parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;

    let (h, m, s) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => (0, *m, *s),
        _ => return None,
    };
    let secs = h
        .checked_mul(3600)?
        .checked_add(m.checked_mul(60)?)?
        .checked_add(s)?;
    Some(Duration::from_secs(secs))
}

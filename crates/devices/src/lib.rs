use anyhow::{Context, Result};
use async_trait::async_trait;
use sonos_scrobbler_core::{DeviceConfig, DeviceError, TrackSnapshot};
use std::sync::Arc;
use std::time::Duration;

mod sonos;
mod xml;

pub use sonos::SonosDevice;

const HTTP_TIMEOUT: Duration = Duration::from_secs(5);

/// A reachable speaker that can report what it is playing.
#[async_trait]
pub trait SpeakerDevice: Send + Sync {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    async fn snapshot(&self) -> Result<TrackSnapshot, DeviceError>;
}

#[async_trait]
pub trait DeviceDirectory: Send + Sync {
    async fn discover(&self) -> Result<Vec<Arc<dyn SpeakerDevice>>>;
}

/// Devices listed in the configuration file. Network enumeration is out of scope.
pub struct StaticDirectory {
    devices: Vec<Arc<dyn SpeakerDevice>>,
}

impl StaticDirectory {
    pub fn new(devices: Vec<Arc<dyn SpeakerDevice>>) -> Self {
        Self { devices }
    }

    pub fn device_ids(&self) -> Vec<&str> {
        self.devices.iter().map(|d| d.id()).collect()
    }
}

#[async_trait]
impl DeviceDirectory for StaticDirectory {
    async fn discover(&self) -> Result<Vec<Arc<dyn SpeakerDevice>>> {
        Ok(self.devices.clone())
    }
}

pub fn build_directory(devices: &[DeviceConfig]) -> Result<StaticDirectory> {
    let client = reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build device http client")?;

    let mut out: Vec<Arc<dyn SpeakerDevice>> = Vec::new();
    for dev in devices {
        if out.iter().any(|d| d.id() == dev.host) {
            tracing::warn!(host = %dev.host, "duplicate device entry ignored");
            continue;
        }
        let device = SonosDevice::new(dev, client.clone())
            .with_context(|| format!("invalid device entry {}", dev.host))?;
        out.push(Arc::new(device));
    }

    Ok(StaticDirectory::new(out))
}

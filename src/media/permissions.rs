use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::error::{CallError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum Device {
    Microphone,
    Camera,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum PermissionState {
    Granted,
    Denied,
    /// the platform has not asked the user yet
    Prompt,
}

/// Platform permission and device acquisition API
#[async_trait]
pub trait PermissionGate: Send + Sync {
    async fn query(&self, device: Device) -> anyhow::Result<PermissionState>;
    /// opens (and immediately releases) a combined media stream. may show a blocking prompt
    async fn request_media(&self, audio: bool, video: bool) -> anyhow::Result<()>;
}

/// Checks microphone and camera permission, prompting if either is undetermined.
/// Must succeed before the transport is joined.
pub async fn check_and_request_permissions(gate: &dyn PermissionGate) -> Result<()> {
    let audio = gate.query(Device::Microphone).await.map_err(|e| {
        log::error!("failed to query microphone permission: {}", e);
        CallError::AcquisitionFailure(e.to_string())
    })?;
    let video = gate.query(Device::Camera).await.map_err(|e| {
        log::error!("failed to query camera permission: {}", e);
        CallError::AcquisitionFailure(e.to_string())
    })?;

    if audio == PermissionState::Denied || video == PermissionState::Denied {
        log::warn!("media permission denied. microphone: {}, camera: {}", audio, video);
        return Err(CallError::PermissionDenied);
    }

    if audio != PermissionState::Granted || video != PermissionState::Granted {
        log::debug!("requesting media permissions");
        if let Err(e) = gate.request_media(true, true).await {
            log::error!("media permissions denied or error: {}", e);
            return Err(CallError::AcquisitionFailure(e.to_string()));
        }
    }

    Ok(())
}

/// Answers with fixed states. Useful on hosts without a permission model.
#[derive(Debug, Clone)]
pub struct StaticPermissionGate {
    pub microphone: PermissionState,
    pub camera: PermissionState,
    /// result of `request_media`. `None` means the devices open
    pub acquisition_error: Option<String>,
}

impl StaticPermissionGate {
    pub fn granted() -> Self {
        Self {
            microphone: PermissionState::Granted,
            camera: PermissionState::Granted,
            acquisition_error: None,
        }
    }

    pub fn denied() -> Self {
        Self {
            microphone: PermissionState::Denied,
            camera: PermissionState::Denied,
            acquisition_error: None,
        }
    }
}

#[async_trait]
impl PermissionGate for StaticPermissionGate {
    async fn query(&self, device: Device) -> anyhow::Result<PermissionState> {
        Ok(match device {
            Device::Microphone => self.microphone,
            Device::Camera => self.camera,
        })
    }

    async fn request_media(&self, _audio: bool, _video: bool) -> anyhow::Result<()> {
        match &self.acquisition_error {
            Some(e) => anyhow::bail!("{}", e),
            None => Ok(()),
        }
    }
}

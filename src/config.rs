use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Settings shared by the call manager and the transports.
/// Every field has a default so a partial JSON file is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// application credential passed to the transport on join
    pub app_id: String,
    pub token: Option<String>,
    /// seconds an unanswered call keeps ringing
    pub ring_timeout_secs: u64,
    /// seconds a queued invite stays deliverable
    pub invite_ttl_secs: u64,
    pub ice_servers: Vec<String>,
    pub audio_codec: String,
    pub video_codec: String,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            app_id: "skillswap".into(),
            token: None,
            ring_timeout_secs: 45,
            invite_ttl_secs: 60,
            ice_servers: vec![
                "stun:stun.l.google.com:19302".into(),
                "stun:stun1.l.google.com:19302".into(),
            ],
            audio_codec: "audio/opus".into(),
            video_codec: "video/VP8".into(),
        }
    }
}

impl CallConfig {
    pub fn ring_timeout(&self) -> Duration {
        Duration::from_secs(self.ring_timeout_secs)
    }

    pub fn invite_ttl(&self) -> Duration {
        Duration::from_secs(self.invite_ttl_secs)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_uses_defaults() {
        let config: CallConfig =
            serde_json::from_str(r#"{"app_id": "demo", "ring_timeout_secs": 5}"#).unwrap();
        assert_eq!(config.app_id, "demo");
        assert_eq!(config.ring_timeout(), Duration::from_secs(5));
        assert_eq!(config.invite_ttl(), Duration::from_secs(60));
        assert_eq!(config.ice_servers.len(), 2);
    }
}

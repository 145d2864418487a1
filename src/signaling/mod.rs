//! Out of band signaling between participants.
//!
//! Call setup (invite, accept, reject, busy, hangup) and opaque transport
//! negotiation payloads travel as `SignalEnvelope`s. Delivery is at least
//! once, so receivers drop envelopes whose id they have already seen.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::internal::data_types::{ChannelId, ParticipantId};

pub mod loopback;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallSignal {
    Invite { channel: ChannelId, is_video: bool },
    Accept { channel: ChannelId },
    Reject { channel: ChannelId },
    /// the callee is already in a call
    Busy { channel: ChannelId },
    Hangup { channel: ChannelId },
    /// SDP, ICE or whatever else the transport needs to negotiate
    Media {
        channel: ChannelId,
        payload: serde_json::Value,
    },
}

impl CallSignal {
    pub fn channel(&self) -> &ChannelId {
        match self {
            CallSignal::Invite { channel, .. }
            | CallSignal::Accept { channel }
            | CallSignal::Reject { channel }
            | CallSignal::Busy { channel }
            | CallSignal::Hangup { channel }
            | CallSignal::Media { channel, .. } => channel,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEnvelope {
    pub id: Uuid,
    pub from: ParticipantId,
    pub to: ParticipantId,
    pub sent_at: DateTime<Utc>,
    pub signal: CallSignal,
}

impl SignalEnvelope {
    pub fn new(from: &str, to: &str, signal: CallSignal) -> Self {
        Self {
            id: Uuid::new_v4(),
            from: from.into(),
            to: to.into(),
            sent_at: Utc::now(),
            signal,
        }
    }
}

#[async_trait]
pub trait SignalingChannel: Send + Sync {
    async fn send(&self, envelope: SignalEnvelope) -> Result<()>;
    /// envelopes addressed to `participant`. A new subscription replaces the previous one
    async fn subscribe(
        &self,
        participant: &ParticipantId,
    ) -> Result<mpsc::UnboundedReceiver<SignalEnvelope>>;

    async fn send_call_invite(
        &self,
        from: &str,
        to: &str,
        channel: &str,
        is_video: bool,
    ) -> Result<()> {
        let signal = CallSignal::Invite {
            channel: channel.into(),
            is_video,
        };
        self.send(SignalEnvelope::new(from, to, signal)).await
    }

    async fn send_accept(&self, from: &str, to: &str, channel: &str) -> Result<()> {
        let signal = CallSignal::Accept {
            channel: channel.into(),
        };
        self.send(SignalEnvelope::new(from, to, signal)).await
    }

    async fn send_reject(&self, from: &str, to: &str, channel: &str) -> Result<()> {
        let signal = CallSignal::Reject {
            channel: channel.into(),
        };
        self.send(SignalEnvelope::new(from, to, signal)).await
    }

    async fn send_busy(&self, from: &str, to: &str, channel: &str) -> Result<()> {
        let signal = CallSignal::Busy {
            channel: channel.into(),
        };
        self.send(SignalEnvelope::new(from, to, signal)).await
    }

    async fn send_hangup(&self, from: &str, to: &str, channel: &str) -> Result<()> {
        let signal = CallSignal::Hangup {
            channel: channel.into(),
        };
        self.send(SignalEnvelope::new(from, to, signal)).await
    }

    async fn send_media(
        &self,
        from: &str,
        to: &str,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<()> {
        let signal = CallSignal::Media {
            channel: channel.into(),
            payload,
        };
        self.send(SignalEnvelope::new(from, to, signal)).await
    }
}

const SEEN_CAPACITY: usize = 256;

/// the ids of recently processed envelopes
#[derive(Debug, Default)]
pub struct SeenSignals {
    order: VecDeque<Uuid>,
    ids: HashSet<Uuid>,
}

impl SeenSignals {
    /// returns false if `id` was already seen
    pub fn insert(&mut self, id: Uuid) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        if self.order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_wire_format() {
        let signal = CallSignal::Invite {
            channel: "ch1".into(),
            is_video: true,
        };
        let json = serde_json::to_value(&signal).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "invite", "channel": "ch1", "is_video": true})
        );
        let back: CallSignal = serde_json::from_value(json).unwrap();
        assert_eq!(back.channel(), "ch1");
    }

    #[test]
    fn seen_signals_drop_duplicates() {
        let mut seen = SeenSignals::default();
        let id = Uuid::new_v4();
        assert!(seen.insert(id));
        assert!(!seen.insert(id));
    }

    #[test]
    fn seen_signals_are_bounded() {
        let mut seen = SeenSignals::default();
        let first = Uuid::new_v4();
        seen.insert(first);
        for _ in 0..SEEN_CAPACITY {
            seen.insert(Uuid::new_v4());
        }
        assert_eq!(seen.ids.len(), SEEN_CAPACITY);
        // evicted, so it counts as new again
        assert!(seen.insert(first));
    }
}

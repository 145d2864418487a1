use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};

/// application user id
pub type ParticipantId = String;

/// identifies one real-time media room shared by both participants
pub type ChannelId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum CallState {
    Idle,
    /// an invite is outstanding, in either direction
    Ringing,
    /// the local side agreed to join but is not attached to the transport yet
    Accepted,
    /// transport join and track publish succeeded
    Joined,
    /// terminal. the session is discarded right after
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum CallDirection {
    /// this participant placed the call
    Outgoing,
    Incoming,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum EndReason {
    /// local leave or cancel
    Hangup,
    RemoteHangup,
    Rejected,
    /// the callee was already in a call
    Busy,
    /// nobody answered before the ring timeout
    Expired,
    JoinFailed,
}

/// A not yet accepted inbound call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingCallNotice {
    pub from: ParticipantId,
    pub channel: ChannelId,
    pub is_video: bool,
}

/// One call attempt. Owned by the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallSession {
    pub channel_id: ChannelId,
    pub state: CallState,
    pub is_video: bool,
    pub direction: CallDirection,
    pub local_participant_id: ParticipantId,
    pub remote_participant_id: ParticipantId,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub end_reason: Option<EndReason>,
    #[serde(skip)]
    pub(crate) join_in_flight: bool,
}

impl CallSession {
    pub(crate) fn new(
        channel_id: ChannelId,
        direction: CallDirection,
        is_video: bool,
        local_participant_id: ParticipantId,
        remote_participant_id: ParticipantId,
    ) -> Self {
        Self {
            channel_id,
            state: CallState::Ringing,
            is_video,
            direction,
            local_participant_id,
            remote_participant_id,
            started_at: None,
            ended_at: None,
            end_reason: None,
            join_in_flight: false,
        }
    }

    /// time since the call was joined. zero before that
    pub fn duration(&self) -> chrono::Duration {
        match self.started_at {
            Some(start) => self.ended_at.unwrap_or_else(Utc::now) - start,
            None => chrono::Duration::zero(),
        }
    }
}

/// `call_<unix millis>_<callee>`
pub fn new_channel_id(callee: &str) -> ChannelId {
    format!("call_{}_{}", Utc::now().timestamp_millis(), callee)
}

/// mm:ss, minutes are not wrapped at an hour
pub fn format_duration(duration: chrono::Duration) -> String {
    let seconds = duration.num_seconds().max(0);
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

use crate::error::CallError;
use crate::internal::data_types::{CallSession, ChannelId, IncomingCallNotice, ParticipantId};
use crate::media::RemoteUid;

/// Emitted by the `CallManager` to the controlling application
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// someone is calling. answer with accept_call or reject_call
    IncomingCall(IncomingCallNotice),
    /// an outgoing invite was sent
    Ringing {
        channel: ChannelId,
        callee: ParticipantId,
    },
    Accepted { channel: ChannelId },
    Joined {
        channel: ChannelId,
        local_uid: RemoteUid,
    },
    /// the session reached its terminal state. `session.end_reason` says why
    Ended { session: CallSession },
    /// shown to the user. the call state has already been rolled back
    Failed {
        channel: Option<ChannelId>,
        error: CallError,
    },
}

use chrono::Utc;

use crate::error::{CallError, Result};
use crate::internal::data_types::*;

/// Owns the lifecycle of the single call a participant can be in.
///
/// Idle -> Ringing -> Accepted -> Joined -> Ended -> Idle
///
/// Every method validates the transition and leaves the state untouched when
/// it is not permitted. Nothing here touches the transport.
#[derive(Debug)]
pub struct CallStateMachine {
    local_id: ParticipantId,
    session: Option<CallSession>,
    notice: Option<IncomingCallNotice>,
}

impl CallStateMachine {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            session: None,
            notice: None,
        }
    }

    pub fn local_id(&self) -> &ParticipantId {
        &self.local_id
    }

    pub fn state(&self) -> CallState {
        self.session
            .as_ref()
            .map(|s| s.state)
            .unwrap_or(CallState::Idle)
    }

    pub fn session(&self) -> Option<&CallSession> {
        self.session.as_ref()
    }

    pub fn incoming_notice(&self) -> Option<&IncomingCallNotice> {
        self.notice.as_ref()
    }

    /// true if `channel` is the live session's channel
    pub fn is_current(&self, channel: &str) -> bool {
        self.session
            .as_ref()
            .map(|s| s.channel_id == channel)
            .unwrap_or(false)
    }

    /// Idle -> Ringing, caller side
    pub fn initiate_call(
        &mut self,
        callee: ParticipantId,
        channel: ChannelId,
        is_video: bool,
    ) -> Result<CallSession> {
        self.require_idle("initiate a call")?;
        let session = CallSession::new(
            channel,
            CallDirection::Outgoing,
            is_video,
            self.local_id.clone(),
            callee,
        );
        log::info!(
            "initiating call to {} on channel {}",
            session.remote_participant_id,
            session.channel_id
        );
        self.session = Some(session.clone());
        Ok(session)
    }

    /// Idle -> Ringing, callee side. Fails while any other session is live
    pub fn incoming_call(&mut self, notice: IncomingCallNotice) -> Result<()> {
        self.require_idle("receive a call")?;
        log::info!(
            "incoming call from {} on channel {}",
            notice.from,
            notice.channel
        );
        self.session = Some(CallSession::new(
            notice.channel.clone(),
            CallDirection::Incoming,
            notice.is_video,
            self.local_id.clone(),
            notice.from.clone(),
        ));
        self.notice = Some(notice);
        Ok(())
    }

    /// Ringing -> Accepted, callee side
    pub fn accept_call(&mut self) -> Result<CallSession> {
        let state = self.state();
        if state != CallState::Ringing {
            return Err(CallError::stale("accept a call", state));
        }
        let Some(notice) = self.notice.take() else {
            return Err(CallError::stale("accept a call", state));
        };
        log::info!("accepting call from {}", notice.from);
        self.transition(CallState::Accepted)
    }

    /// Ringing -> Idle, callee side. Returns the discarded session
    pub fn reject_call(&mut self) -> Result<CallSession> {
        let state = self.state();
        if self.notice.is_none() || state != CallState::Ringing {
            return Err(CallError::stale("reject a call", state));
        }
        self.notice = None;
        log::info!("call rejected");
        self.finish(EndReason::Rejected)
            .ok_or_else(|| CallError::stale("reject a call", state))
    }

    /// Ringing -> Accepted, caller side, once the callee answered
    pub fn remote_accepted(&mut self, channel: &str) -> Result<CallSession> {
        let state = self.state();
        match &self.session {
            Some(s)
                if s.channel_id == channel
                    && s.state == CallState::Ringing
                    && s.direction == CallDirection::Outgoing =>
            {
                self.transition(CallState::Accepted)
            }
            _ => Err(CallError::stale("handle a remote accept", state)),
        }
    }

    /// Marks a join as in flight. Only one may be pending per session
    pub fn begin_join(&mut self) -> Result<CallSession> {
        let state = self.state();
        match self.session.as_mut() {
            Some(s) if s.state == CallState::Accepted && !s.join_in_flight => {
                s.join_in_flight = true;
                Ok(s.clone())
            }
            _ => Err(CallError::stale("join a call", state)),
        }
    }

    /// Accepted -> Joined. Fails if the session was ended while joining
    pub fn join_succeeded(&mut self, channel: &str) -> Result<CallSession> {
        let state = self.state();
        match self.session.as_mut() {
            Some(s)
                if s.channel_id == channel && s.state == CallState::Accepted && s.join_in_flight =>
            {
                s.join_in_flight = false;
                s.state = CallState::Joined;
                s.started_at = Some(Utc::now());
                log::info!("joined channel {}", channel);
                Ok(s.clone())
            }
            _ => Err(CallError::stale("complete a join", state)),
        }
    }

    /// Accepted -> Idle
    pub fn join_failed(&mut self, channel: &str) -> Option<CallSession> {
        if !self.is_current(channel) || self.state() != CallState::Accepted {
            return None;
        }
        self.finish(EndReason::JoinFailed)
    }

    /// Ringing -> Idle, caller side, when the callee rejected or was busy
    pub fn remote_declined(&mut self, channel: &str, reason: EndReason) -> Option<CallSession> {
        match &self.session {
            Some(s)
                if s.channel_id == channel
                    && s.state == CallState::Ringing
                    && s.direction == CallDirection::Outgoing =>
            {
                self.finish(reason)
            }
            _ => None,
        }
    }

    /// Ringing -> Idle if `channel` is still ringing
    pub fn expire(&mut self, channel: &str) -> Option<CallSession> {
        if !self.is_current(channel) || self.state() != CallState::Ringing {
            return None;
        }
        self.notice = None;
        log::info!("call on channel {} was not answered", channel);
        self.finish(EndReason::Expired)
    }

    /// Ends whatever session is live. `channel` restricts it to that call.
    /// Returns `None` (and changes nothing) when there is nothing to end.
    pub fn end(&mut self, channel: Option<&str>, reason: EndReason) -> Option<CallSession> {
        if let Some(channel) = channel {
            if !self.is_current(channel) {
                return None;
            }
        }
        self.notice = None;
        self.finish(reason)
    }

    fn require_idle(&self, operation: &'static str) -> Result<()> {
        match self.state() {
            CallState::Idle => Ok(()),
            state => {
                log::warn!("cannot {} while call is {}", operation, state);
                Err(CallError::stale(operation, state))
            }
        }
    }

    fn transition(&mut self, to: CallState) -> Result<CallSession> {
        let state = self.state();
        match self.session.as_mut() {
            Some(s) => {
                log::debug!("call {}: {} -> {}", s.channel_id, s.state, to);
                s.state = to;
                Ok(s.clone())
            }
            None => Err(CallError::stale("change call state", state)),
        }
    }

    /// -> Ended, then discards the session
    fn finish(&mut self, reason: EndReason) -> Option<CallSession> {
        let mut session = self.session.take()?;
        log::info!(
            "call {} ended from {}: {}",
            session.channel_id,
            session.state,
            reason
        );
        session.state = CallState::Ended;
        session.ended_at = Some(Utc::now());
        session.end_reason = Some(reason);
        session.join_in_flight = false;
        Some(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(from: &str, channel: &str) -> IncomingCallNotice {
        IncomingCallNotice {
            from: from.into(),
            channel: channel.into(),
            is_video: true,
        }
    }

    #[test]
    fn callee_lifecycle() {
        let mut sm = CallStateMachine::new("bob".into());
        sm.incoming_call(notice("alice", "ch1")).unwrap();
        assert_eq!(sm.state(), CallState::Ringing);
        assert_eq!(sm.incoming_notice(), Some(&notice("alice", "ch1")));

        sm.accept_call().unwrap();
        assert_eq!(sm.state(), CallState::Accepted);
        assert!(sm.incoming_notice().is_none());

        sm.begin_join().unwrap();
        let joined = sm.join_succeeded("ch1").unwrap();
        assert_eq!(joined.state, CallState::Joined);
        assert!(joined.started_at.is_some());

        let ended = sm.end(None, EndReason::Hangup).unwrap();
        assert_eq!(ended.state, CallState::Ended);
        assert_eq!(ended.end_reason, Some(EndReason::Hangup));
        assert!(ended.ended_at.is_some());
        assert_eq!(sm.state(), CallState::Idle);
        assert!(sm.session().is_none());
    }

    #[test]
    fn caller_lifecycle() {
        let mut sm = CallStateMachine::new("alice".into());
        let session = sm.initiate_call("bob".into(), "ch1".into(), false).unwrap();
        assert_eq!(session.direction, CallDirection::Outgoing);
        assert_eq!(sm.state(), CallState::Ringing);

        // the caller has no notice to accept
        assert!(sm.accept_call().is_err());
        assert!(sm.remote_accepted("other").is_err());

        sm.remote_accepted("ch1").unwrap();
        assert_eq!(sm.state(), CallState::Accepted);
    }

    #[test]
    fn reject_returns_to_idle() {
        let mut sm = CallStateMachine::new("bob".into());
        sm.incoming_call(notice("alice", "ch1")).unwrap();
        let ended = sm.reject_call().unwrap();
        assert_eq!(ended.end_reason, Some(EndReason::Rejected));
        assert_eq!(sm.state(), CallState::Idle);
        assert!(sm.incoming_notice().is_none());
    }

    #[test]
    fn accept_without_notice_is_stale() {
        let mut sm = CallStateMachine::new("bob".into());
        let err = sm.accept_call().unwrap_err();
        assert_eq!(
            err,
            CallError::StaleState {
                operation: "accept a call",
                state: CallState::Idle
            }
        );
        assert!(sm.reject_call().is_err());
    }

    #[test]
    fn second_incoming_call_is_refused() {
        let mut sm = CallStateMachine::new("bob".into());
        sm.incoming_call(notice("alice", "ch1")).unwrap();
        assert!(sm.incoming_call(notice("carol", "ch2")).is_err());
        assert_eq!(sm.incoming_notice().unwrap().from, "alice");
    }

    #[test]
    fn join_requires_accepted() {
        let mut sm = CallStateMachine::new("bob".into());
        assert!(sm.begin_join().is_err());
        sm.incoming_call(notice("alice", "ch1")).unwrap();
        assert!(sm.begin_join().is_err());
    }

    #[test]
    fn only_one_join_in_flight() {
        let mut sm = CallStateMachine::new("bob".into());
        sm.incoming_call(notice("alice", "ch1")).unwrap();
        sm.accept_call().unwrap();
        sm.begin_join().unwrap();
        assert!(sm.begin_join().is_err());
    }

    #[test]
    fn join_failure_rolls_back() {
        let mut sm = CallStateMachine::new("bob".into());
        sm.incoming_call(notice("alice", "ch1")).unwrap();
        sm.accept_call().unwrap();
        sm.begin_join().unwrap();
        let ended = sm.join_failed("ch1").unwrap();
        assert_eq!(ended.end_reason, Some(EndReason::JoinFailed));
        assert_eq!(sm.state(), CallState::Idle);
    }

    #[test]
    fn join_completing_after_end_is_stale() {
        let mut sm = CallStateMachine::new("bob".into());
        sm.incoming_call(notice("alice", "ch1")).unwrap();
        sm.accept_call().unwrap();
        sm.begin_join().unwrap();
        sm.end(Some("ch1"), EndReason::Hangup).unwrap();
        assert!(sm.join_succeeded("ch1").is_err());
        assert_eq!(sm.state(), CallState::Idle);
    }

    #[test]
    fn expire_only_while_ringing() {
        let mut sm = CallStateMachine::new("alice".into());
        sm.initiate_call("bob".into(), "ch1".into(), true).unwrap();
        assert!(sm.expire("other").is_none());
        sm.remote_accepted("ch1").unwrap();
        assert!(sm.expire("ch1").is_none());
        assert_eq!(sm.state(), CallState::Accepted);

        let mut sm = CallStateMachine::new("alice".into());
        sm.initiate_call("bob".into(), "ch1".into(), true).unwrap();
        let ended = sm.expire("ch1").unwrap();
        assert_eq!(ended.end_reason, Some(EndReason::Expired));
        assert_eq!(sm.state(), CallState::Idle);
    }

    #[test]
    fn remote_decline_only_for_ringing_caller() {
        let mut sm = CallStateMachine::new("bob".into());
        sm.incoming_call(notice("alice", "ch1")).unwrap();
        assert!(sm.remote_declined("ch1", EndReason::Rejected).is_none());

        let mut sm = CallStateMachine::new("alice".into());
        sm.initiate_call("bob".into(), "ch1".into(), true).unwrap();
        assert!(sm.remote_declined("ch2", EndReason::Busy).is_none());
        let ended = sm.remote_declined("ch1", EndReason::Busy).unwrap();
        assert_eq!(ended.end_reason, Some(EndReason::Busy));
        assert_eq!(sm.state(), CallState::Idle);
    }

    #[test]
    fn end_when_idle_is_noop() {
        let mut sm = CallStateMachine::new("alice".into());
        assert!(sm.end(None, EndReason::Hangup).is_none());
        assert!(sm.end(None, EndReason::Hangup).is_none());
        assert_eq!(sm.state(), CallState::Idle);
    }

    #[test]
    fn end_for_other_channel_is_ignored() {
        let mut sm = CallStateMachine::new("alice".into());
        sm.initiate_call("bob".into(), "ch1".into(), true).unwrap();
        assert!(sm.end(Some("ch2"), EndReason::RemoteHangup).is_none());
        assert_eq!(sm.state(), CallState::Ringing);
    }
}

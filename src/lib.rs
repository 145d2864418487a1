//! skillswap-call
//!
//! One-to-one audio/video calls between SkillSwap participants. A `CallManager`
//! owns the call lifecycle of a single participant: it rings, accepts, joins
//! and tears down calls, and reports everything that happens as `CallEvent`s.
//!
//! Call setup travels over a `SignalingChannel`. Media travels over a
//! `Transport`, which the media session drives: permission check, channel
//! join, local track acquisition and publishing, and the map of remote tracks.
//!
//! This library is not responsible for media capture or playback. The webrtc
//! transport exchanges RTP packets with the application.

use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub mod config;
mod error;
mod internal;
pub mod media;
pub mod signaling;
pub mod transport;

#[cfg(feature = "test-server")]
pub mod testing;

#[cfg(test)]
mod mock;

// public exports
pub use config::CallConfig;
pub use error::{CallError, Result};
pub use internal::data_types::*;
pub use internal::events::*;
pub use internal::handle::CallHandle;
pub use internal::media_session::MediaSession;
pub use internal::state_machine::CallStateMachine;

use crate::media::permissions::PermissionGate;
use crate::signaling::{CallSignal, SeenSignals, SignalEnvelope, SignalingChannel};
use crate::transport::{JoinRequest, Transport};

pub struct CallManager {
    /// the local participant
    id: ParticipantId,
    config: CallConfig,
    state: Mutex<CallStateMachine>,
    media: MediaSession,
    signaling: Arc<dyn SignalingChannel>,
    /// used to emit events
    emitted_event_chan: mpsc::UnboundedSender<CallEvent>,
    seen: Mutex<SeenSignals>,
}

// a lazy version of the builder pattern
pub struct InitArgs {
    pub id: ParticipantId,
    pub config: CallConfig,
    /// `None` if the media client could not be constructed. calls can still
    /// ring but joining fails with `TransportNotInitialized`
    pub transport: Option<Arc<dyn Transport>>,
    pub permissions: Arc<dyn PermissionGate>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub emitted_event_chan: mpsc::UnboundedSender<CallEvent>,
}

/// The following functions are driven by the UI:
/// start_call / initiate_call
/// accept_call
/// reject_call
/// leave_call
///
/// Everything else is driven by signaling, see `listen`
impl CallManager {
    pub fn init(args: InitArgs) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CallStateMachine::new(args.id.clone())),
            id: args.id,
            config: args.config,
            media: MediaSession::new(args.transport, args.permissions),
            signaling: args.signaling,
            emitted_event_chan: args.emitted_event_chan,
            seen: Mutex::new(SeenSignals::default()),
        })
    }

    /// Subscribes to signaling and spawns the task which processes it. The
    /// transport's negotiation payloads are forwarded to the remote
    /// participant of the current call.
    pub async fn listen(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let mut signals = self
            .signaling
            .subscribe(&self.id)
            .await
            .map_err(|e| CallError::Signaling(e.to_string()))?;

        if let Some(mut outbox) = self.media.client().and_then(|c| c.take_signal_outbox()) {
            let manager = self.clone();
            tokio::spawn(async move {
                while let Some(payload) = outbox.recv().await {
                    manager.forward_media_signal(payload).await;
                }
                log::debug!("transport signal outbox closed");
            });
        }

        let manager = self.clone();
        Ok(tokio::spawn(async move {
            while let Some(envelope) = signals.recv().await {
                manager.handle_envelope(envelope).await;
            }
            log::info!("signaling subscription for {} closed", manager.id);
        }))
    }

    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    pub fn config(&self) -> &CallConfig {
        &self.config
    }

    pub fn media(&self) -> &MediaSession {
        &self.media
    }

    pub async fn state(&self) -> CallState {
        self.state.lock().await.state()
    }

    pub async fn session(&self) -> Option<CallSession> {
        self.state.lock().await.session().cloned()
    }

    /// the call currently ringing, if it is an inbound one
    pub async fn incoming_call(&self) -> Option<IncomingCallNotice> {
        self.state.lock().await.incoming_notice().cloned()
    }

    /// calls `callee` on a freshly generated channel
    pub async fn start_call(self: &Arc<Self>, callee: &str, is_video: bool) -> Result<CallHandle> {
        self.initiate_call(callee, &new_channel_id(callee), is_video)
            .await
    }

    pub async fn initiate_call(
        self: &Arc<Self>,
        callee: &str,
        channel: &str,
        is_video: bool,
    ) -> Result<CallHandle> {
        let session = self
            .state
            .lock()
            .await
            .initiate_call(callee.into(), channel.into(), is_video)
            .map_err(|e| self.fail(None, e))?;

        if let Err(e) = self
            .signaling
            .send_call_invite(&self.id, callee, channel, is_video)
            .await
        {
            log::error!("failed to send invite to {}: {}", callee, e);
            let ended = self.state.lock().await.end(Some(channel), EndReason::Hangup);
            let error = self.fail(Some(channel.into()), CallError::Signaling(e.to_string()));
            if let Some(session) = ended {
                self.emit(CallEvent::Ended { session });
            }
            return Err(error);
        }

        self.emit(CallEvent::Ringing {
            channel: channel.into(),
            callee: callee.into(),
        });
        self.spawn_ring_timer(channel.into());
        Ok(CallHandle::new(self.clone(), &session))
    }

    /// accepts the ringing inbound call and joins it
    pub async fn accept_call(self: &Arc<Self>) -> Result<CallHandle> {
        let session = self
            .state
            .lock()
            .await
            .accept_call()
            .map_err(|e| self.fail(None, e))?;
        let channel = session.channel_id.clone();

        if let Err(e) = self
            .signaling
            .send_accept(&self.id, &session.remote_participant_id, &channel)
            .await
        {
            log::error!("failed to send accept: {}", e);
            let ended = self.state.lock().await.end(Some(&channel), EndReason::Hangup);
            let error = self.fail(Some(channel), CallError::Signaling(e.to_string()));
            if let Some(session) = ended {
                self.emit(CallEvent::Ended { session });
            }
            return Err(error);
        }

        self.emit(CallEvent::Accepted {
            channel: channel.clone(),
        });
        let handle = CallHandle::new(self.clone(), &session);
        self.join_call().await?;
        Ok(handle)
    }

    pub async fn reject_call(&self) -> Result<()> {
        let session = self
            .state
            .lock()
            .await
            .reject_call()
            .map_err(|e| self.fail(None, e))?;
        if let Err(e) = self
            .signaling
            .send_reject(&self.id, &session.remote_participant_id, &session.channel_id)
            .await
        {
            log::error!("failed to send reject: {}", e);
        }
        self.emit(CallEvent::Ended { session });
        Ok(())
    }

    /// Joins the media channel of the accepted call. At most one join runs
    /// per session; anything else is refused without touching the transport.
    pub async fn join_call(&self) -> Result<()> {
        let begun = self.state.lock().await.begin_join();
        let session = match begun {
            Ok(session) => session,
            Err(e) => {
                log::warn!("{}", e);
                return Err(e);
            }
        };
        let channel = session.channel_id.clone();
        let request = JoinRequest {
            app_id: self.config.app_id.clone(),
            channel: channel.clone(),
            token: self.config.token.clone(),
            uid: None,
            direction: session.direction,
        };

        match self.media.join(&request).await {
            Ok(_) => {
                let joined = self.state.lock().await.join_succeeded(&channel);
                if let Err(e) = joined {
                    // the call was left while joining
                    log::warn!("call {} ended during join, leaving", channel);
                    self.media.leave_channel(&channel).await;
                    return Err(e);
                }
                let local_uid = self.media.local_uid().await.unwrap_or_default();
                self.emit(CallEvent::Joined { channel, local_uid });
                Ok(())
            }
            Err(e) => {
                let ended = self.state.lock().await.join_failed(&channel);
                let error = self.fail(Some(channel), e);
                if let Some(session) = ended {
                    self.hang_up_remote(&session).await;
                    self.emit(CallEvent::Ended { session });
                }
                Err(error)
            }
        }
    }

    /// Hangs up or cancels the current call. Safe to call when idle, and
    /// while a join is pending.
    pub async fn leave_call(&self) -> Result<()> {
        let ended = self.state.lock().await.end(None, EndReason::Hangup);
        match ended {
            Some(session) => {
                let channel = session.channel_id.clone();
                self.hang_up_remote(&session).await;
                self.emit(CallEvent::Ended { session });
                // a call answered meanwhile keeps its media
                self.media.leave_channel(&channel).await;
            }
            None => self.media.leave().await,
        }
        Ok(())
    }

    async fn handle_envelope(self: &Arc<Self>, envelope: SignalEnvelope) {
        if envelope.to != self.id {
            log::debug!("ignoring signal addressed to {}", envelope.to);
            return;
        }
        if !self.seen.lock().await.insert(envelope.id) {
            log::debug!("dropping duplicate signal {}", envelope.id);
            return;
        }
        log::debug!("received {:?} from {}", envelope.signal, envelope.from);

        match envelope.signal {
            CallSignal::Invite { channel, is_video } => {
                let notice = IncomingCallNotice {
                    from: envelope.from.clone(),
                    channel: channel.clone(),
                    is_video,
                };
                let mut state = self.state.lock().await;
                if state.incoming_call(notice.clone()).is_ok() {
                    drop(state);
                    self.emit(CallEvent::IncomingCall(notice));
                    self.spawn_ring_timer(channel);
                } else if !state.is_current(&channel) {
                    drop(state);
                    log::info!("busy, declining call from {}", envelope.from);
                    if let Err(e) = self
                        .signaling
                        .send_busy(&self.id, &envelope.from, &channel)
                        .await
                    {
                        log::error!("failed to send busy: {}", e);
                    }
                }
            }
            CallSignal::Accept { channel } => {
                let accepted = self.state.lock().await.remote_accepted(&channel);
                match accepted {
                    Ok(_) => {
                        self.emit(CallEvent::Accepted { channel });
                        let manager = self.clone();
                        tokio::spawn(async move {
                            // failures are emitted as events
                            let _ = manager.join_call().await;
                        });
                    }
                    Err(e) => log::warn!("ignoring accept for {}: {}", channel, e),
                }
            }
            CallSignal::Reject { channel } => self.remote_declined(&channel, EndReason::Rejected).await,
            CallSignal::Busy { channel } => self.remote_declined(&channel, EndReason::Busy).await,
            CallSignal::Hangup { channel } => {
                let ended = self
                    .state
                    .lock()
                    .await
                    .end(Some(&channel), EndReason::RemoteHangup);
                if let Some(session) = ended {
                    self.emit(CallEvent::Ended { session });
                    // a pending join holds the media session, don't stall signaling on it
                    let manager = self.clone();
                    tokio::spawn(async move { manager.media.leave_channel(&channel).await });
                }
            }
            CallSignal::Media { channel, payload } => {
                if !self.state.lock().await.is_current(&channel) {
                    log::debug!("dropping media signal for stale channel {}", channel);
                    return;
                }
                if let Some(client) = self.media.client() {
                    if let Err(e) = client.handle_signal(payload).await {
                        log::error!("transport rejected media signal: {}", e);
                    }
                }
            }
        }
    }

    async fn remote_declined(&self, channel: &str, reason: EndReason) {
        let ended = self.state.lock().await.remote_declined(channel, reason);
        match ended {
            Some(session) => self.emit(CallEvent::Ended { session }),
            None => log::debug!("ignoring {} for channel {}", reason, channel),
        }
    }

    async fn forward_media_signal(&self, payload: serde_json::Value) {
        let target = self
            .state
            .lock()
            .await
            .session()
            .map(|s| (s.channel_id.clone(), s.remote_participant_id.clone()));
        let Some((channel, remote)) = target else {
            log::debug!("no call in progress, dropping transport signal");
            return;
        };
        if let Err(e) = self
            .signaling
            .send_media(&self.id, &remote, &channel, payload)
            .await
        {
            log::error!("failed to forward transport signal: {}", e);
        }
    }

    fn spawn_ring_timer(self: &Arc<Self>, channel: ChannelId) {
        let manager = self.clone();
        let timeout = self.config.ring_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let expired = manager.state.lock().await.expire(&channel);
            if let Some(session) = expired {
                if session.direction == CallDirection::Outgoing {
                    manager.hang_up_remote(&session).await;
                }
                manager.emit(CallEvent::Ended { session });
            }
        });
    }

    /// best effort, the call is over either way
    async fn hang_up_remote(&self, session: &CallSession) {
        if let Err(e) = self
            .signaling
            .send_hangup(&self.id, &session.remote_participant_id, &session.channel_id)
            .await
        {
            log::error!("failed to send hangup: {}", e);
        }
    }

    /// reports `error` to the application and hands it back
    fn fail(&self, channel: Option<ChannelId>, error: CallError) -> CallError {
        if matches!(error, CallError::StaleState { .. }) {
            log::warn!("{}", error);
        } else {
            log::error!("call failed: {}", error);
            self.emit(CallEvent::Failed {
                channel,
                error: error.clone(),
            });
        }
        error
    }

    fn emit(&self, event: CallEvent) {
        if let Err(e) = self.emitted_event_chan.send(event) {
            log::error!("failed to emit call event: {}", e);
        }
    }
}

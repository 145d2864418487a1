use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{CallError, Result};
use crate::internal::data_types::*;
use crate::media::{LocalMediaTracks, RemoteParticipantTracks};
use crate::CallManager;

#[derive(Debug, Default)]
struct Flags {
    audio_muted: AtomicBool,
    video_muted: AtomicBool,
    screen_sharing: AtomicBool,
}

/// The in-call controls for one call, handed out by `CallManager` when a call
/// is started or accepted. Once the call is over every control is a no-op.
#[derive(Clone)]
pub struct CallHandle {
    manager: Arc<CallManager>,
    channel: ChannelId,
    is_video: bool,
    remote: ParticipantId,
    flags: Arc<Flags>,
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("channel", &self.channel)
            .field("is_video", &self.is_video)
            .field("remote", &self.remote)
            .field("flags", &self.flags)
            .finish()
    }
}

impl CallHandle {
    pub(crate) fn new(manager: Arc<CallManager>, session: &CallSession) -> Self {
        Self {
            manager,
            channel: session.channel_id.clone(),
            is_video: session.is_video,
            remote: session.remote_participant_id.clone(),
            flags: Arc::new(Flags::default()),
        }
    }

    pub fn channel(&self) -> &ChannelId {
        &self.channel
    }

    pub fn is_video(&self) -> bool {
        self.is_video
    }

    pub fn remote_participant(&self) -> &ParticipantId {
        &self.remote
    }

    /// `Ended` once the session this handle was made for is gone
    pub async fn state(&self) -> CallState {
        match self.manager.session().await {
            Some(session) if session.channel_id == self.channel => session.state,
            _ => CallState::Ended,
        }
    }

    pub async fn is_active(&self) -> bool {
        self.state().await != CallState::Ended
    }

    /// hang up, or cancel while still ringing
    pub async fn end_call(&self) -> Result<()> {
        if !self.is_active().await {
            log::debug!("end_call on finished call {}", self.channel);
            return Ok(());
        }
        self.manager.leave_call().await
    }

    /// returns whether audio is muted afterwards
    pub async fn toggle_audio_mute(&self) -> bool {
        let muted = self.flags.audio_muted.load(Ordering::SeqCst);
        if self.state().await != CallState::Joined {
            return muted;
        }
        if self.manager.media().set_local_audio_enabled(muted).await {
            self.flags.audio_muted.store(!muted, Ordering::SeqCst);
            log::info!("audio {}", if muted { "unmuted" } else { "muted" });
            !muted
        } else {
            muted
        }
    }

    /// returns whether video is muted afterwards
    pub async fn toggle_video_mute(&self) -> bool {
        let muted = self.flags.video_muted.load(Ordering::SeqCst);
        if self.state().await != CallState::Joined {
            return muted;
        }
        if self.manager.media().set_local_video_enabled(muted).await {
            self.flags.video_muted.store(!muted, Ordering::SeqCst);
            log::info!("video {}", if muted { "unmuted" } else { "muted" });
            !muted
        } else {
            muted
        }
    }

    /// returns whether the screen is shared afterwards
    pub async fn toggle_screen_share(&self) -> Result<bool> {
        let state = self.state().await;
        if state != CallState::Joined || !self.is_video {
            return Err(CallError::stale("share the screen", state));
        }
        let sharing = self.flags.screen_sharing.load(Ordering::SeqCst);
        let sharing = self.manager.media().set_screen_share(!sharing).await?;
        self.flags.screen_sharing.store(sharing, Ordering::SeqCst);
        Ok(sharing)
    }

    pub fn is_audio_muted(&self) -> bool {
        self.flags.audio_muted.load(Ordering::SeqCst)
    }

    pub fn is_video_muted(&self) -> bool {
        self.flags.video_muted.load(Ordering::SeqCst)
    }

    pub fn is_screen_sharing(&self) -> bool {
        self.flags.screen_sharing.load(Ordering::SeqCst)
    }

    /// zero until joined, and after the call ended
    pub async fn duration(&self) -> chrono::Duration {
        match self.manager.session().await {
            Some(session) if session.channel_id == self.channel => session.duration(),
            _ => chrono::Duration::zero(),
        }
    }

    pub async fn formatted_duration(&self) -> String {
        format_duration(self.duration().await)
    }

    pub fn remote_tracks(&self) -> watch::Receiver<RemoteParticipantTracks> {
        self.manager.media().remote_tracks()
    }

    pub async fn local_tracks(&self) -> LocalMediaTracks {
        self.manager.media().local_tracks().await
    }
}

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::error::{CallError, Result};
use crate::media::permissions::{check_and_request_permissions, PermissionGate};
use crate::media::{
    LocalMediaTracks, LocalTrackRef, MediaKind, RemoteParticipantTracks, RemoteTrackRef,
    RemoteUid,
};
use crate::transport::{JoinRequest, SubscriptionId, Transport, TransportEvent};

/// Wraps the media transport for one participant: local track acquisition and
/// publishing, and bookkeeping of the remote tracks.
///
/// join and leave are serialized. A leave issued while a join is pending runs
/// once the join returns.
pub struct MediaSession {
    client: Option<Arc<dyn Transport>>,
    permissions: Arc<dyn PermissionGate>,
    op_lock: Mutex<()>,
    inner: Mutex<Inner>,
    remote: Arc<watch::Sender<RemoteParticipantTracks>>,
    /// cleared at teardown so late transport events can't repopulate the map
    live: Mutex<Arc<AtomicBool>>,
}

#[derive(Default)]
struct Inner {
    local: LocalMediaTracks,
    local_uid: Option<RemoteUid>,
    /// channel of the join in progress or completed
    channel: Option<String>,
    /// transport membership
    joined: bool,
    subscription: Option<SubscriptionId>,
    pump: Option<JoinHandle<()>>,
}

impl MediaSession {
    /// `client` is `None` when the transport failed to construct
    pub fn new(client: Option<Arc<dyn Transport>>, permissions: Arc<dyn PermissionGate>) -> Self {
        if client.is_none() {
            log::error!("media transport client not initialized. calls cannot be joined");
        }
        let (remote, _) = watch::channel(RemoteParticipantTracks::default());
        Self {
            client,
            permissions,
            op_lock: Mutex::new(()),
            inner: Mutex::new(Inner::default()),
            remote: Arc::new(remote),
            live: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    pub fn client(&self) -> Option<&Arc<dyn Transport>> {
        self.client.as_ref()
    }

    /// permission check, transport join, track acquisition and publish
    pub async fn join(&self, request: &JoinRequest) -> Result<LocalMediaTracks> {
        let _op = self.op_lock.lock().await;
        let client = match &self.client {
            Some(client) => client.clone(),
            None => {
                log::error!("media transport client not initialized");
                return Err(CallError::TransportNotInitialized);
            }
        };

        check_and_request_permissions(self.permissions.as_ref()).await?;

        let previous = self.inner.lock().await.channel.clone();
        if let Some(previous) = previous {
            log::info!("leaving {} before joining {}", previous, request.channel);
            self.release(&client).await;
        }

        // register before joining so no publish event is missed
        let live = Arc::new(AtomicBool::new(true));
        *self.live.lock().await = live.clone();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let subscription = client.on(event_tx).await;
        let pump = tokio::spawn(pump_events(
            client.clone(),
            self.remote.clone(),
            live,
            event_rx,
        ));
        {
            let mut inner = self.inner.lock().await;
            inner.channel = Some(request.channel.clone());
            inner.subscription = Some(subscription);
            inner.pump = Some(pump);
        }

        let uid = match client.join(request).await {
            Ok(uid) => uid,
            Err(e) => {
                log::error!("failed to join channel {}: {}", request.channel, e);
                self.release(&client).await;
                return Err(CallError::TransportJoin {
                    channel: request.channel.clone(),
                    reason: e.to_string(),
                });
            }
        };
        {
            let mut inner = self.inner.lock().await;
            inner.joined = true;
            inner.local_uid = Some(uid);
        }
        log::info!("joined channel {} as uid {}", request.channel, uid);

        let (microphone, camera) = match client.create_microphone_and_camera_tracks().await {
            Ok(tracks) => tracks,
            Err(e) => {
                log::error!("failed to create local tracks: {}", e);
                self.release(&client).await;
                return Err(CallError::AcquisitionFailure(e.to_string()));
            }
        };
        let local = {
            let mut inner = self.inner.lock().await;
            inner.local.audio = Some(microphone.clone());
            inner.local.video = Some(camera.clone());
            inner.local.clone()
        };

        if let Err(e) = client.publish(&[microphone, camera]).await {
            log::error!("failed to publish local tracks: {}", e);
            self.release(&client).await;
            return Err(CallError::Transport(e.to_string()));
        }

        Ok(local)
    }

    /// Closes local tracks, then leaves the transport. Safe to call at any time
    pub async fn leave(&self) {
        let _op = self.op_lock.lock().await;
        self.teardown().await;
    }

    /// Like `leave`, but only when `channel` is still the one joined. A stale
    /// teardown queued behind a later join leaves that join alone.
    pub async fn leave_channel(&self, channel: &str) {
        let _op = self.op_lock.lock().await;
        let current = self.inner.lock().await.channel.clone();
        match current {
            Some(current) if current != channel => {
                log::debug!("not leaving {}: {} is live", channel, current);
            }
            _ => self.teardown().await,
        }
    }

    pub async fn set_local_audio_enabled(&self, enabled: bool) -> bool {
        set_enabled(&self.inner.lock().await.local.audio, enabled)
    }

    pub async fn set_local_video_enabled(&self, enabled: bool) -> bool {
        set_enabled(&self.inner.lock().await.local.video, enabled)
    }

    /// Publishes or withdraws a screen track. Returns whether the screen is shared
    /// afterwards. Does nothing outside of a joined call.
    pub async fn set_screen_share(&self, enable: bool) -> Result<bool> {
        let _op = self.op_lock.lock().await;
        let Some(client) = self.client.clone() else {
            return Err(CallError::TransportNotInitialized);
        };
        let (joined, current) = {
            let inner = self.inner.lock().await;
            (inner.joined, inner.local.screen.clone())
        };
        if !joined {
            log::warn!("screen share requested outside of a call");
            return Ok(false);
        }

        match (enable, current) {
            (true, Some(_)) => Ok(true),
            (false, None) => Ok(false),
            (true, None) => {
                let screen = client
                    .create_screen_track()
                    .await
                    .map_err(|e| CallError::AcquisitionFailure(e.to_string()))?;
                if let Err(e) = client.publish(&[screen.clone()]).await {
                    screen.close();
                    return Err(CallError::Transport(e.to_string()));
                }
                self.inner.lock().await.local.screen = Some(screen);
                log::info!("screen sharing started");
                Ok(true)
            }
            (false, Some(screen)) => {
                self.inner.lock().await.local.screen = None;
                if let Err(e) = client.unpublish(&[screen.clone()]).await {
                    log::error!("failed to unpublish screen track: {}", e);
                }
                screen.close();
                log::info!("screen sharing stopped");
                Ok(false)
            }
        }
    }

    pub async fn local_tracks(&self) -> LocalMediaTracks {
        self.inner.lock().await.local.clone()
    }

    pub async fn local_uid(&self) -> Option<RemoteUid> {
        self.inner.lock().await.local_uid
    }

    pub async fn is_joined(&self) -> bool {
        self.inner.lock().await.joined
    }

    /// every change to the remote map is published as a whole snapshot
    pub fn remote_tracks(&self) -> watch::Receiver<RemoteParticipantTracks> {
        self.remote.subscribe()
    }

    pub fn remote_snapshot(&self) -> RemoteParticipantTracks {
        self.remote.borrow().clone()
    }

    pub async fn on_remote_track_published(
        &self,
        uid: RemoteUid,
        kind: MediaKind,
        track: RemoteTrackRef,
    ) {
        let live = self.live.lock().await.clone();
        apply_published(&self.remote, &live, uid, kind, track);
    }

    pub async fn on_remote_track_unpublished(&self, uid: RemoteUid, kind: MediaKind) {
        let live = self.live.lock().await.clone();
        apply_unpublished(&self.remote, &live, uid, kind);
    }

    pub async fn on_remote_user_left(&self, uid: RemoteUid) {
        let live = self.live.lock().await.clone();
        apply_user_left(&self.remote, &live, uid);
    }

    /// the caller holds `op_lock`
    async fn teardown(&self) {
        match &self.client {
            Some(client) => {
                let client = client.clone();
                self.release(&client).await;
            }
            None => {
                self.inner.lock().await.local.close_all();
                self.clear_remote().await;
            }
        }
    }

    /// the caller holds `op_lock`
    async fn release(&self, client: &Arc<dyn Transport>) {
        let (mut local, subscription, pump, joined) = {
            let mut inner = self.inner.lock().await;
            let joined = inner.joined;
            inner.joined = false;
            inner.local_uid = None;
            inner.channel = None;
            (
                std::mem::take(&mut inner.local),
                inner.subscription.take(),
                inner.pump.take(),
                joined,
            )
        };

        // device handles go before the transport does
        local.close_all();

        if let Some(subscription) = subscription {
            client.off(subscription).await;
        }
        if let Some(pump) = pump {
            pump.abort();
        }
        self.clear_remote().await;

        if joined {
            if let Err(e) = client.leave().await {
                log::error!("failed to leave channel: {}", e);
            } else {
                log::info!("left channel");
            }
        }
    }

    async fn clear_remote(&self) {
        self.live.lock().await.store(false, Ordering::SeqCst);
        self.remote.send_modify(|tracks| tracks.clear());
    }
}

fn set_enabled(track: &Option<LocalTrackRef>, enabled: bool) -> bool {
    match track {
        Some(track) => {
            track.set_enabled(enabled);
            true
        }
        None => false,
    }
}

fn apply_published(
    remote: &watch::Sender<RemoteParticipantTracks>,
    live: &AtomicBool,
    uid: RemoteUid,
    kind: MediaKind,
    track: RemoteTrackRef,
) {
    if !live.load(Ordering::SeqCst) {
        log::debug!("ignoring {} track from {} after teardown", kind, uid);
        return;
    }
    // audio plays as soon as it arrives. video is rendered by the UI
    if kind == MediaKind::Audio {
        if let Err(e) = track.play() {
            log::error!("failed to play audio from {}: {}", uid, e);
        }
    }
    remote.send_modify(|tracks| {
        if live.load(Ordering::SeqCst) {
            tracks.publish(uid, kind, track);
        } else {
            track.stop();
        }
    });
}

fn apply_unpublished(
    remote: &watch::Sender<RemoteParticipantTracks>,
    live: &AtomicBool,
    uid: RemoteUid,
    kind: MediaKind,
) {
    if !live.load(Ordering::SeqCst) {
        return;
    }
    remote.send_modify(|tracks| {
        if !tracks.unpublish(uid, kind) {
            log::debug!("{} unpublished {} but has no entry", uid, kind);
        }
    });
}

fn apply_user_left(
    remote: &watch::Sender<RemoteParticipantTracks>,
    live: &AtomicBool,
    uid: RemoteUid,
) {
    if !live.load(Ordering::SeqCst) {
        return;
    }
    remote.send_modify(|tracks| {
        if tracks.remove(uid).is_some() {
            log::info!("remote participant {} left", uid);
        }
    });
}

async fn pump_events(
    client: Arc<dyn Transport>,
    remote: Arc<watch::Sender<RemoteParticipantTracks>>,
    live: Arc<AtomicBool>,
    mut event_rx: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = event_rx.recv().await {
        match event {
            TransportEvent::UserPublished { uid, kind } => {
                match client.subscribe(uid, kind).await {
                    Ok(track) => apply_published(&remote, &live, uid, kind, track),
                    Err(e) => log::error!("failed to subscribe to {} {}: {}", uid, kind, e),
                }
            }
            TransportEvent::UserUnpublished { uid, kind } => {
                apply_unpublished(&remote, &live, uid, kind)
            }
            TransportEvent::UserLeft { uid } => apply_user_left(&remote, &live, uid),
        }
    }
    log::debug!("transport event pump exiting");
}

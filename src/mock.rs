//! test doubles for the transport, tracks and permission gate

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Notify};

use crate::media::permissions::{Device, PermissionGate, PermissionState, StaticPermissionGate};
use crate::media::{
    LocalTrack, LocalTrackRef, MediaKind, MediaSource, RemoteTrack, RemoteTrackRef, RemoteUid,
};
use crate::transport::{EventHandlers, JoinRequest, SubscriptionId, Transport, TransportEvent};

pub struct MockLocalTrack {
    id: String,
    source: MediaSource,
    enabled: AtomicBool,
    closed: AtomicBool,
}

impl MockLocalTrack {
    pub fn new(id: &str, source: MediaSource) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            source,
            enabled: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        })
    }
}

impl LocalTrack for MockLocalTrack {
    fn id(&self) -> &str {
        &self.id
    }
    fn source(&self) -> MediaSource {
        self.source
    }
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockRemoteTrack {
    id: String,
    kind: MediaKind,
    playing: AtomicBool,
}

impl MockRemoteTrack {
    pub fn new(id: &str, kind: MediaKind) -> Arc<Self> {
        Arc::new(Self {
            id: id.into(),
            kind,
            playing: AtomicBool::new(false),
        })
    }
}

impl RemoteTrack for MockRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }
    fn kind(&self) -> MediaKind {
        self.kind
    }
    fn play(&self) -> anyhow::Result<()> {
        self.playing.store(true, Ordering::SeqCst);
        Ok(())
    }
    fn stop(&self) {
        self.playing.store(false, Ordering::SeqCst);
    }
    fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }
}

/// Records every call. Join can be made to fail or to wait on `join_gate`.
#[derive(Default)]
pub struct MockTransport {
    pub handlers: EventHandlers,
    pub join_error: Mutex<Option<String>>,
    pub track_error: Mutex<Option<String>>,
    pub join_gate: Option<Arc<Notify>>,
    joins: AtomicUsize,
    leaves: AtomicUsize,
    published: Mutex<Vec<String>>,
    unpublished: Mutex<Vec<String>>,
    created: Mutex<Vec<Arc<MockLocalTrack>>>,
    requests: Mutex<Vec<JoinRequest>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// join blocks until the returned notify is signalled
    pub fn gated() -> (Arc<Self>, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        let transport = Arc::new(Self {
            join_gate: Some(gate.clone()),
            ..Default::default()
        });
        (transport, gate)
    }

    pub fn failing_join(reason: &str) -> Arc<Self> {
        let transport = Self::default();
        *transport.join_error.lock().unwrap() = Some(reason.into());
        Arc::new(transport)
    }

    pub fn joins(&self) -> usize {
        self.joins.load(Ordering::SeqCst)
    }

    pub fn leaves(&self) -> usize {
        self.leaves.load(Ordering::SeqCst)
    }

    pub fn published(&self) -> Vec<String> {
        self.published.lock().unwrap().clone()
    }

    pub fn unpublished(&self) -> Vec<String> {
        self.unpublished.lock().unwrap().clone()
    }

    pub fn created_tracks(&self) -> Vec<Arc<MockLocalTrack>> {
        self.created.lock().unwrap().clone()
    }

    pub fn join_requests(&self) -> Vec<JoinRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn emit(&self, event: TransportEvent) {
        self.handlers.emit(event).await;
    }

    fn make_track(&self, id: &str, source: MediaSource) -> LocalTrackRef {
        let track = MockLocalTrack::new(id, source);
        self.created.lock().unwrap().push(track.clone());
        track
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn join(&self, request: &JoinRequest) -> anyhow::Result<RemoteUid> {
        self.joins.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());
        if let Some(gate) = &self.join_gate {
            gate.notified().await;
        }
        let error = self.join_error.lock().unwrap().clone();
        match error {
            Some(e) => anyhow::bail!("{}", e),
            None => Ok(request.uid.unwrap_or(1)),
        }
    }

    async fn leave(&self) -> anyhow::Result<()> {
        self.leaves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn create_microphone_and_camera_tracks(
        &self,
    ) -> anyhow::Result<(LocalTrackRef, LocalTrackRef)> {
        let error = self.track_error.lock().unwrap().clone();
        if let Some(e) = error {
            anyhow::bail!("{}", e);
        }
        Ok((
            self.make_track("microphone", MediaSource::Microphone),
            self.make_track("camera", MediaSource::Camera),
        ))
    }

    async fn create_screen_track(&self) -> anyhow::Result<LocalTrackRef> {
        Ok(self.make_track("screen", MediaSource::Screen))
    }

    async fn publish(&self, tracks: &[LocalTrackRef]) -> anyhow::Result<()> {
        let mut published = self.published.lock().unwrap();
        published.extend(tracks.iter().map(|t| t.id().to_string()));
        Ok(())
    }

    async fn unpublish(&self, tracks: &[LocalTrackRef]) -> anyhow::Result<()> {
        let mut unpublished = self.unpublished.lock().unwrap();
        unpublished.extend(tracks.iter().map(|t| t.id().to_string()));
        Ok(())
    }

    async fn subscribe(&self, uid: RemoteUid, kind: MediaKind) -> anyhow::Result<RemoteTrackRef> {
        Ok(MockRemoteTrack::new(&format!("{}-{}", uid, kind), kind))
    }

    async fn on(&self, handler: mpsc::UnboundedSender<TransportEvent>) -> SubscriptionId {
        self.handlers.add(handler).await
    }

    async fn off(&self, id: SubscriptionId) {
        self.handlers.remove(id).await
    }
}

/// counts how often the user was prompted
pub struct RecordingPermissionGate {
    inner: StaticPermissionGate,
    prompts: AtomicUsize,
}

impl RecordingPermissionGate {
    pub fn new(inner: StaticPermissionGate) -> Self {
        Self {
            inner,
            prompts: AtomicUsize::new(0),
        }
    }

    pub fn prompts(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PermissionGate for RecordingPermissionGate {
    async fn query(&self, device: Device) -> anyhow::Result<PermissionState> {
        self.inner.query(device).await
    }

    async fn request_media(&self, audio: bool, video: bool) -> anyhow::Result<()> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        self.inner.request_media(audio, video).await
    }
}

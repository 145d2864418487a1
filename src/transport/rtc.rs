//! A `Transport` built on [webrtc-rs](https://github.com/webrtc-rs/webrtc).
//!
//! One RTCPeerConnection per channel. The callee creates the offer once its
//! tracks are published; the caller answers. SDP and ICE leave through
//! `take_signal_outbox` and arrive through `handle_signal`, so the call's
//! signaling channel carries them.
//!
//! Capturing and encoding media is the application's job: every local track
//! exposes an RTP packet input (`RtcLocalTrack::media_input`) and every remote
//! track a packet feed (`RtcRemoteTrack::packets`).

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{
    MediaEngine, MIME_TYPE_AV1, MIME_TYPE_G722, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_PCMA,
    MIME_TYPE_PCMU, MIME_TYPE_VP8, MIME_TYPE_VP9,
};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use crate::config::CallConfig;
use crate::media::{
    LocalTrack, LocalTrackRef, MediaKind, MediaSource, RemoteTrack, RemoteTrackRef, RemoteUid,
};
use crate::transport::{EventHandlers, JoinRequest, SubscriptionId, Transport, TransportEvent};
use crate::CallDirection;

/// represents the MIME types from webrtc::api::media_engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MimeType {
    // requires paying patent licencing royalties to MPEG LA
    H264,
    VP8,
    VP9,
    AV1,
    OPUS,
    G722,
    // G.711 µ-law
    PCMU,
    // G.711 A-law
    PCMA,
}

impl MimeType {
    const ALL: [MimeType; 8] = [
        MimeType::H264,
        MimeType::VP8,
        MimeType::VP9,
        MimeType::AV1,
        MimeType::OPUS,
        MimeType::G722,
        MimeType::PCMU,
        MimeType::PCMA,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MimeType::H264 => MIME_TYPE_H264,
            MimeType::VP8 => MIME_TYPE_VP8,
            MimeType::VP9 => MIME_TYPE_VP9,
            MimeType::AV1 => MIME_TYPE_AV1,
            MimeType::OPUS => MIME_TYPE_OPUS,
            MimeType::G722 => MIME_TYPE_G722,
            MimeType::PCMU => MIME_TYPE_PCMU,
            MimeType::PCMA => MIME_TYPE_PCMA,
        }
    }

    pub fn kind(&self) -> MediaKind {
        match self {
            MimeType::H264 | MimeType::VP8 | MimeType::VP9 | MimeType::AV1 => MediaKind::Video,
            MimeType::OPUS | MimeType::G722 | MimeType::PCMU | MimeType::PCMA => MediaKind::Audio,
        }
    }

    pub fn capability(&self) -> RTCRtpCodecCapability {
        match self {
            MimeType::OPUS => RTCRtpCodecCapability {
                mime_type: self.as_str().into(),
                clock_rate: 48000,
                channels: 2,
                ..Default::default()
            },
            MimeType::G722 | MimeType::PCMU | MimeType::PCMA => RTCRtpCodecCapability {
                mime_type: self.as_str().into(),
                clock_rate: 8000,
                channels: 1,
                ..Default::default()
            },
            _ => RTCRtpCodecCapability {
                mime_type: self.as_str().into(),
                clock_rate: 90000,
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for MimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MimeType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Self::ALL.iter().find(|m| m.as_str().eq_ignore_ascii_case(s)) {
            Some(m) => Ok(*m),
            None => bail!("invalid mime type: {}", s),
        }
    }
}

/// SDP and ICE exchanged between the two transports of a call
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RtcSignal {
    Offer {
        uid: RemoteUid,
        sdp: RTCSessionDescription,
    },
    Answer {
        uid: RemoteUid,
        sdp: RTCSessionDescription,
    },
    Ice {
        uid: RemoteUid,
        candidate: RTCIceCandidateInit,
    },
}

/// A local track. RTP packets written to `media_input` are forwarded to the
/// peer while the track is enabled; disabled tracks drop them.
pub struct RtcLocalTrack {
    id: String,
    source: MediaSource,
    track: Arc<TrackLocalStaticRTP>,
    enabled: Arc<AtomicBool>,
    closed: AtomicBool,
    media_tx: mpsc::UnboundedSender<rtp::packet::Packet>,
    worker: JoinHandle<()>,
}

impl RtcLocalTrack {
    fn new(source: MediaSource, codec: MimeType) -> Arc<Self> {
        let id = format!("{}-{}", source, Uuid::new_v4());
        let track = Arc::new(TrackLocalStaticRTP::new(
            codec.capability(),
            id.clone(),
            "skillswap".into(),
        ));
        let enabled = Arc::new(AtomicBool::new(true));
        let (media_tx, media_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_media_worker(
            id.clone(),
            track.clone(),
            enabled.clone(),
            media_rx,
        ));
        Arc::new(Self {
            id,
            source,
            track,
            enabled,
            closed: AtomicBool::new(false),
            media_tx,
            worker,
        })
    }

    /// feed captured, packetized media here
    pub fn media_input(&self) -> mpsc::UnboundedSender<rtp::packet::Packet> {
        self.media_tx.clone()
    }
}

impl LocalTrack for RtcLocalTrack {
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
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.worker.abort();
        }
    }
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// forwards RTP packets from the capture side to the outgoing track
async fn run_media_worker(
    id: String,
    track: Arc<TrackLocalStaticRTP>,
    enabled: Arc<AtomicBool>,
    mut media_rx: mpsc::UnboundedReceiver<rtp::packet::Packet>,
) {
    while let Some(packet) = media_rx.recv().await {
        if !enabled.load(Ordering::Relaxed) {
            continue;
        }
        if let Err(e) = track.write_rtp(&packet).await {
            log::warn!("failed to write RTP packet to track {}: {}", id, e);
        }
    }
    log::info!("media worker for {} exiting", id);
}

/// A remote track. Its packets are read continuously and broadcast while playing.
pub struct RtcRemoteTrack {
    id: String,
    kind: MediaKind,
    playing: Arc<AtomicBool>,
    sink: broadcast::Sender<rtp::packet::Packet>,
    reader: JoinHandle<()>,
}

impl RtcRemoteTrack {
    fn new(
        track: Arc<TrackRemote>,
        kind: MediaKind,
        state: Arc<Mutex<RtcState>>,
        handlers: Arc<EventHandlers>,
    ) -> Arc<Self> {
        let ssrc = track.ssrc();
        let id = format!("{}-{}", kind, ssrc);
        let playing = Arc::new(AtomicBool::new(false));
        let (sink, _) = broadcast::channel(256);
        let reader = {
            let id = id.clone();
            let playing = playing.clone();
            let sink = sink.clone();
            tokio::spawn(async move {
                read_remote_track(&id, &track, &playing, &sink).await;
                remote_track_ended(&state, &handlers, ssrc).await;
            })
        };
        Arc::new(Self {
            id,
            kind,
            playing,
            sink,
            reader,
        })
    }

    /// decoded by the application for playback
    pub fn packets(&self) -> broadcast::Receiver<rtp::packet::Packet> {
        self.sink.subscribe()
    }
}

impl Drop for RtcRemoteTrack {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

impl RemoteTrack for RtcRemoteTrack {
    fn id(&self) -> &str {
        &self.id
    }
    fn kind(&self) -> MediaKind {
        self.kind
    }
    fn play(&self) -> Result<()> {
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

async fn read_remote_track(
    id: &str,
    track: &TrackRemote,
    playing: &AtomicBool,
    sink: &broadcast::Sender<rtp::packet::Packet>,
) {
    loop {
        match track.read_rtp().await {
            Ok((packet, _)) => {
                // nobody listening is fine
                if playing.load(Ordering::Relaxed) {
                    let _ = sink.send(packet);
                }
            }
            Err(e) => {
                log::info!("remote track {} ended: {}", id, e);
                return;
            }
        }
    }
}

/// A reader stops once the receiver is stopped, which is what renegotiation
/// does to a track the remote side removed.
async fn remote_track_ended(state: &Mutex<RtcState>, handlers: &EventHandlers, ssrc: u32) {
    let (removed, uid) = {
        let mut state = state.lock().await;
        (state.remote_tracks.remove(ssrc), state.remote_uid)
    };
    let Some(uid) = uid else { return };
    match removed {
        Removed::Gone(kind) => {
            handlers
                .emit(TransportEvent::UserUnpublished { uid, kind })
                .await
        }
        // the shadowed track is current again
        Removed::Uncovered(kind) => {
            handlers
                .emit(TransportEvent::UserPublished { uid, kind })
                .await
        }
        Removed::Shadowed | Removed::Unknown => {}
    }
}

/// Remote tracks by SSRC, in arrival order. Only the newest track of a kind is
/// handed out, so a screen share covers the camera until it ends.
struct RemoteTracks<T> {
    entries: Vec<(u32, MediaKind, T)>,
}

#[derive(Debug, PartialEq, Eq)]
enum Removed {
    Unknown,
    /// a newer track of the same kind is still current
    Shadowed,
    /// an older track of the same kind becomes current
    Uncovered(MediaKind),
    /// no track of this kind is left
    Gone(MediaKind),
}

impl<T> Default for RemoteTracks<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> RemoteTracks<T> {
    fn insert(&mut self, ssrc: u32, kind: MediaKind, track: T) {
        self.entries.retain(|(s, _, _)| *s != ssrc);
        self.entries.push((ssrc, kind, track));
    }

    fn latest(&self, kind: MediaKind) -> Option<&T> {
        self.entries
            .iter()
            .rev()
            .find(|(_, k, _)| *k == kind)
            .map(|(_, _, track)| track)
    }

    fn remove(&mut self, ssrc: u32) -> Removed {
        let Some(pos) = self.entries.iter().position(|(s, _, _)| *s == ssrc) else {
            return Removed::Unknown;
        };
        let (_, kind, _) = self.entries.remove(pos);
        if self.entries[pos..].iter().any(|(_, k, _)| *k == kind) {
            Removed::Shadowed
        } else if self.entries.iter().any(|(_, k, _)| *k == kind) {
            Removed::Uncovered(kind)
        } else {
            Removed::Gone(kind)
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Default)]
struct RtcState {
    connection: Option<Arc<RTCPeerConnection>>,
    channel: Option<String>,
    direction: Option<CallDirection>,
    local_uid: RemoteUid,
    remote_uid: Option<RemoteUid>,
    /// tracks created by this transport, by id
    local_tracks: HashMap<String, Arc<RtcLocalTrack>>,
    senders: HashMap<String, Arc<RTCRtpSender>>,
    remote_tracks: RemoteTracks<Arc<TrackRemote>>,
    /// received before join
    pending_signals: Vec<RtcSignal>,
    /// received before the remote description
    pending_ice: Vec<RTCIceCandidateInit>,
    remote_description_set: bool,
}

pub struct RtcTransport {
    api: webrtc::api::API,
    ice_servers: Vec<String>,
    audio_codec: MimeType,
    video_codec: MimeType,
    handlers: Arc<EventHandlers>,
    state: Arc<Mutex<RtcState>>,
    outbox_tx: mpsc::UnboundedSender<serde_json::Value>,
    outbox_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<serde_json::Value>>>,
}

impl RtcTransport {
    pub fn new(config: &CallConfig) -> Result<Self> {
        Self::build(config, false)
    }

    /// Also gathers loopback candidates, so two transports in one process or on
    /// one host connect with no network. Pair it with an empty `ice_servers`.
    pub fn new_local(config: &CallConfig) -> Result<Self> {
        Self::build(config, true)
    }

    fn build(config: &CallConfig, include_loopback: bool) -> Result<Self> {
        let audio_codec: MimeType = config.audio_codec.parse()?;
        let video_codec: MimeType = config.video_codec.parse()?;
        if audio_codec.kind() != MediaKind::Audio {
            bail!("{} is not an audio codec", audio_codec);
        }
        if video_codec.kind() != MediaKind::Video {
            bail!("{} is not a video codec", video_codec);
        }
        let (outbox_tx, outbox_rx) = mpsc::unbounded_channel();
        Ok(Self {
            api: create_api(include_loopback)?,
            ice_servers: config.ice_servers.clone(),
            audio_codec,
            video_codec,
            handlers: Arc::new(EventHandlers::default()),
            state: Arc::new(Mutex::new(RtcState::default())),
            outbox_tx,
            outbox_rx: std::sync::Mutex::new(Some(outbox_rx)),
        })
    }

    async fn connection(&self) -> Result<Arc<RTCPeerConnection>> {
        match &self.state.lock().await.connection {
            Some(pc) => Ok(pc.clone()),
            None => bail!("not joined to a channel"),
        }
    }

    fn send_signal(&self, signal: RtcSignal) -> Result<()> {
        self.outbox_tx.send(serde_json::to_value(&signal)?)?;
        Ok(())
    }

    /// creates and sends an offer
    async fn negotiate(&self, pc: &Arc<RTCPeerConnection>) -> Result<()> {
        let offer = pc.create_offer(None).await?;
        // Sets the LocalDescription, and starts our UDP listeners
        // Note: this will start the gathering of ICE candidates
        pc.set_local_description(offer.clone()).await?;
        let uid = self.state.lock().await.local_uid;
        log::debug!("sending offer as uid {}", uid);
        self.send_signal(RtcSignal::Offer { uid, sdp: offer })
    }

    async fn remember_remote(&self, uid: RemoteUid) -> Result<Arc<RTCPeerConnection>> {
        let mut state = self.state.lock().await;
        match state.remote_uid {
            Some(known) if known != uid => bail!("signal from unexpected uid {}", uid),
            _ => state.remote_uid = Some(uid),
        }
        match &state.connection {
            Some(pc) => Ok(pc.clone()),
            None => bail!("not joined to a channel"),
        }
    }

    async fn flush_ice(&self, pc: &Arc<RTCPeerConnection>) -> Result<()> {
        let pending = {
            let mut state = self.state.lock().await;
            state.remote_description_set = true;
            std::mem::take(&mut state.pending_ice)
        };
        for candidate in pending {
            pc.add_ice_candidate(candidate).await?;
        }
        Ok(())
    }

    async fn apply_signal(&self, signal: RtcSignal) -> Result<()> {
        match signal {
            RtcSignal::Offer { uid, sdp } => {
                log::debug!("received offer from uid {}", uid);
                let pc = self.remember_remote(uid).await?;
                pc.set_remote_description(sdp).await?;
                self.flush_ice(&pc).await?;
                let answer = pc.create_answer(None).await?;
                pc.set_local_description(answer.clone()).await?;
                let local_uid = self.state.lock().await.local_uid;
                self.send_signal(RtcSignal::Answer {
                    uid: local_uid,
                    sdp: answer,
                })
            }
            RtcSignal::Answer { uid, sdp } => {
                log::debug!("received answer from uid {}", uid);
                let pc = self.remember_remote(uid).await?;
                pc.set_remote_description(sdp).await?;
                self.flush_ice(&pc).await
            }
            RtcSignal::Ice { uid, candidate } => {
                let pc = self.remember_remote(uid).await?;
                {
                    let mut state = self.state.lock().await;
                    if !state.remote_description_set {
                        state.pending_ice.push(candidate);
                        return Ok(());
                    }
                }
                pc.add_ice_candidate(candidate).await?;
                Ok(())
            }
        }
    }

    fn register_callbacks(&self, pc: &Arc<RTCPeerConnection>, local_uid: RemoteUid) {
        // send discovered ice candidates (for self) to remote peer
        let outbox = self.outbox_tx.clone();
        pc.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let outbox = outbox.clone();
            Box::pin(async move {
                let Some(candidate) = c else { return };
                let signal = match candidate.to_json() {
                    Ok(candidate) => RtcSignal::Ice {
                        uid: local_uid,
                        candidate,
                    },
                    Err(e) => {
                        log::error!("failed to serialize ice candidate: {}", e);
                        return;
                    }
                };
                match serde_json::to_value(&signal) {
                    Ok(payload) => {
                        if outbox.send(payload).is_err() {
                            log::warn!("signal outbox closed, dropping ice candidate");
                        }
                    }
                    Err(e) => log::error!("failed to encode ice candidate: {}", e),
                }
            })
        }));

        // the remote side is gone once ICE fails or the connection closes
        let state = self.state.clone();
        let handlers = self.handlers.clone();
        pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
            let state = state.clone();
            let handlers = handlers.clone();
            Box::pin(async move {
                log::info!("ice connection state has changed to {}", s);
                if s != RTCIceConnectionState::Failed && s != RTCIceConnectionState::Closed {
                    return;
                }
                let remote = {
                    let mut state = state.lock().await;
                    state.remote_tracks.clear();
                    state.remote_uid
                };
                if let Some(uid) = remote {
                    handlers.emit(TransportEvent::UserLeft { uid }).await;
                }
            })
        }));

        // store media tracks when created
        let state = self.state.clone();
        let handlers = self.handlers.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let state = state.clone();
                let handlers = handlers.clone();
                Box::pin(async move {
                    let kind = match track.kind() {
                        RTPCodecType::Audio => MediaKind::Audio,
                        RTPCodecType::Video => MediaKind::Video,
                        other => {
                            log::warn!("ignoring remote track of kind {}", other);
                            return;
                        }
                    };
                    let uid = {
                        let mut state = state.lock().await;
                        state.remote_tracks.insert(track.ssrc(), kind, track);
                        state.remote_uid
                    };
                    match uid {
                        Some(uid) => handlers.emit(TransportEvent::UserPublished { uid, kind }).await,
                        None => log::warn!("remote {} track before remote uid is known", kind),
                    }
                })
            },
        ));
    }

    fn create_track(&self, state: &mut RtcState, source: MediaSource) -> Arc<RtcLocalTrack> {
        let codec = match source.kind() {
            MediaKind::Audio => self.audio_codec,
            MediaKind::Video => self.video_codec,
        };
        let track = RtcLocalTrack::new(source, codec);
        state.local_tracks.insert(track.id.clone(), track.clone());
        track
    }
}

#[async_trait]
impl Transport for RtcTransport {
    async fn join(&self, request: &JoinRequest) -> Result<RemoteUid> {
        // no servers means host candidates only
        let ice_servers = if self.ice_servers.is_empty() {
            vec![]
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };
        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let (pc, uid, pending) = {
            let mut state = self.state.lock().await;
            if state.connection.is_some() {
                bail!("already joined channel {:?}", state.channel);
            }
            let pc = Arc::new(self.api.new_peer_connection(config).await?);
            let uid = request.uid.unwrap_or_else(rand::random);
            state.connection = Some(pc.clone());
            state.channel = Some(request.channel.clone());
            state.direction = Some(request.direction);
            state.local_uid = uid;
            (pc, uid, std::mem::take(&mut state.pending_signals))
        };
        self.register_callbacks(&pc, uid);

        for signal in pending {
            if let Err(e) = self.apply_signal(signal).await {
                log::error!("failed to apply queued signal: {}", e);
            }
        }
        Ok(uid)
    }

    async fn leave(&self) -> Result<()> {
        let (pc, local_tracks) = {
            let mut state = self.state.lock().await;
            let pc = state.connection.take();
            let local_tracks = std::mem::take(&mut state.local_tracks);
            *state = RtcState::default();
            (pc, local_tracks)
        };
        for track in local_tracks.values() {
            track.close();
        }
        if let Some(pc) = pc {
            pc.close().await?;
        }
        Ok(())
    }

    async fn create_microphone_and_camera_tracks(&self) -> Result<(LocalTrackRef, LocalTrackRef)> {
        let mut state = self.state.lock().await;
        let microphone: LocalTrackRef = self.create_track(&mut state, MediaSource::Microphone);
        let camera: LocalTrackRef = self.create_track(&mut state, MediaSource::Camera);
        Ok((microphone, camera))
    }

    async fn create_screen_track(&self) -> Result<LocalTrackRef> {
        let mut state = self.state.lock().await;
        Ok(self.create_track(&mut state, MediaSource::Screen))
    }

    async fn publish(&self, tracks: &[LocalTrackRef]) -> Result<()> {
        let pc = self.connection().await?;
        for track in tracks {
            let local = match self.state.lock().await.local_tracks.get(track.id()) {
                Some(local) => local.clone(),
                None => bail!("track {} was not created by this transport", track.id()),
            };
            let sender = pc
                .add_track(local.track.clone() as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
            self.state
                .lock()
                .await
                .senders
                .insert(track.id().to_string(), sender);
        }

        // the callee offers first. later publishes renegotiate
        let offer = {
            let state = self.state.lock().await;
            state.direction == Some(CallDirection::Incoming) || state.remote_description_set
        };
        if offer {
            self.negotiate(&pc).await?;
        }
        Ok(())
    }

    async fn unpublish(&self, tracks: &[LocalTrackRef]) -> Result<()> {
        let pc = self.connection().await?;
        for track in tracks {
            let sender = {
                let mut state = self.state.lock().await;
                state.local_tracks.remove(track.id());
                state.senders.remove(track.id())
            };
            match sender {
                Some(sender) => pc.remove_track(&sender).await?,
                None => log::info!("unpublished track {} which was never published", track.id()),
            }
        }
        if self.state.lock().await.remote_description_set {
            self.negotiate(&pc).await?;
        }
        Ok(())
    }

    async fn subscribe(&self, uid: RemoteUid, kind: MediaKind) -> Result<RemoteTrackRef> {
        let state = self.state.lock().await;
        if state.remote_uid != Some(uid) {
            bail!("unknown remote uid {}", uid);
        }
        match state.remote_tracks.latest(kind) {
            Some(track) => Ok(RtcRemoteTrack::new(
                track.clone(),
                kind,
                self.state.clone(),
                self.handlers.clone(),
            )),
            None => bail!("uid {} has not published {}", uid, kind),
        }
    }

    async fn on(&self, handler: mpsc::UnboundedSender<TransportEvent>) -> SubscriptionId {
        self.handlers.add(handler).await
    }

    async fn off(&self, id: SubscriptionId) {
        self.handlers.remove(id).await
    }

    async fn handle_signal(&self, payload: serde_json::Value) -> Result<()> {
        let signal: RtcSignal = serde_json::from_value(payload)?;
        {
            let mut state = self.state.lock().await;
            if state.connection.is_none() {
                log::debug!("queueing signal until join");
                state.pending_signals.push(signal);
                return Ok(());
            }
        }
        self.apply_signal(signal).await
    }

    fn take_signal_outbox(&self) -> Option<mpsc::UnboundedReceiver<serde_json::Value>> {
        match self.outbox_rx.lock() {
            Ok(mut outbox) => outbox.take(),
            Err(e) => {
                log::error!("signal outbox lock poisoned: {}", e);
                None
            }
        }
    }
}

// todo: add support for more codecs. perhaps make it configurable
fn create_api(include_loopback: bool) -> Result<webrtc::api::API> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;

    // Create a InterceptorRegistry. This is the user configurable RTP/RTCP Pipeline.
    // This provides NACKs, RTCP Reports and other features. If you use `webrtc.NewPeerConnection`
    // this is enabled by default. If you are manually managing You MUST create a InterceptorRegistry
    // for each PeerConnection.
    let mut registry = Registry::new();

    // Use the default set of Interceptors
    registry = register_default_interceptors(registry, &mut media)?;

    let mut setting_engine = SettingEngine::default();
    // plain host candidates. .local names don't resolve everywhere
    setting_engine.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);
    setting_engine.set_include_loopback_candidate(include_loopback);

    // Create the API object with the MediaEngine
    Ok(APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(registry)
        .with_setting_engine(setting_engine)
        .build())
}

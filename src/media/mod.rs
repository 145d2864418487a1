use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::hash_map;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod permissions;

/// transport-assigned numeric id of a remote participant
pub type RemoteUid = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    #[display(fmt = "audio")]
    Audio,
    #[display(fmt = "video")]
    Video,
}

/// Indicates the device from which a local track originates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum MediaSource {
    /// audio
    Microphone,
    /// video
    Camera,
    /// video
    Screen,
}

impl MediaSource {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaSource::Microphone => MediaKind::Audio,
            MediaSource::Camera | MediaSource::Screen => MediaKind::Video,
        }
    }
}

/// A track captured on this host and published to the transport
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn source(&self) -> MediaSource;
    fn kind(&self) -> MediaKind {
        self.source().kind()
    }
    /// a disabled track stays published but sends nothing
    fn set_enabled(&self, enabled: bool);
    fn is_enabled(&self) -> bool;
    /// releases the capture device. closing a closed track is a no-op
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// A track received from a remote participant
pub trait RemoteTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn play(&self) -> anyhow::Result<()>;
    fn stop(&self);
    fn is_playing(&self) -> bool;
}

pub type LocalTrackRef = Arc<dyn LocalTrack>;
pub type RemoteTrackRef = Arc<dyn RemoteTrack>;

/// Tracks owned by the local media session. Empty outside of a joined call.
#[derive(Clone, Default)]
pub struct LocalMediaTracks {
    pub audio: Option<LocalTrackRef>,
    pub video: Option<LocalTrackRef>,
    pub screen: Option<LocalTrackRef>,
}

impl LocalMediaTracks {
    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none() && self.screen.is_none()
    }

    pub fn all(&self) -> Vec<LocalTrackRef> {
        [&self.audio, &self.video, &self.screen]
            .into_iter()
            .flatten()
            .cloned()
            .collect()
    }

    /// closes every track and empties the set
    pub fn close_all(&mut self) {
        for track in self.all() {
            track.close();
        }
        *self = Self::default();
    }
}

impl fmt::Debug for LocalMediaTracks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaTracks")
            .field("audio", &self.audio.as_ref().map(|t| t.id().to_string()))
            .field("video", &self.video.as_ref().map(|t| t.id().to_string()))
            .field("screen", &self.screen.as_ref().map(|t| t.id().to_string()))
            .finish()
    }
}

/// audio and video publish independently, so either may be absent
#[derive(Clone, Default)]
pub struct ParticipantTracks {
    pub video: Option<RemoteTrackRef>,
    pub audio: Option<RemoteTrackRef>,
}

impl ParticipantTracks {
    pub fn get(&self, kind: MediaKind) -> Option<&RemoteTrackRef> {
        match kind {
            MediaKind::Audio => self.audio.as_ref(),
            MediaKind::Video => self.video.as_ref(),
        }
    }

    fn slot(&mut self, kind: MediaKind) -> &mut Option<RemoteTrackRef> {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

impl fmt::Debug for ParticipantTracks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParticipantTracks")
            .field("video", &self.video.as_ref().map(|t| t.id().to_string()))
            .field("audio", &self.audio.as_ref().map(|t| t.id().to_string()))
            .finish()
    }
}

/// remote uid -> tracks. This is what the UI renders.
#[derive(Clone, Default, Debug)]
pub struct RemoteParticipantTracks {
    participants: HashMap<RemoteUid, ParticipantTracks>,
}

impl RemoteParticipantTracks {
    /// stores `track`, keeping whatever the participant already published for the other kind
    pub fn publish(&mut self, uid: RemoteUid, kind: MediaKind, track: RemoteTrackRef) {
        let entry = self.participants.entry(uid).or_default();
        if let Some(old) = entry.slot(kind).replace(track) {
            old.stop();
        }
    }

    /// clears only `kind` for `uid`. returns false if the participant is unknown
    pub fn unpublish(&mut self, uid: RemoteUid, kind: MediaKind) -> bool {
        match self.participants.get_mut(&uid) {
            Some(entry) => {
                if let Some(old) = entry.slot(kind).take() {
                    old.stop();
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, uid: RemoteUid) -> Option<ParticipantTracks> {
        let removed = self.participants.remove(&uid);
        if let Some(entry) = &removed {
            for track in [&entry.audio, &entry.video].into_iter().flatten() {
                track.stop();
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        let uids: Vec<RemoteUid> = self.participants.keys().copied().collect();
        for uid in uids {
            self.remove(uid);
        }
    }

    pub fn get(&self, uid: RemoteUid) -> Option<&ParticipantTracks> {
        self.participants.get(&uid)
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn iter(&self) -> hash_map::Iter<'_, RemoteUid, ParticipantTracks> {
        self.participants.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockRemoteTrack;

    #[test]
    fn publishing_video_then_audio_keeps_both() {
        let mut map = RemoteParticipantTracks::default();
        map.publish(7, MediaKind::Video, MockRemoteTrack::new("v", MediaKind::Video));
        map.publish(7, MediaKind::Audio, MockRemoteTrack::new("a", MediaKind::Audio));

        assert_eq!(map.len(), 1);
        let entry = map.get(7).unwrap();
        assert_eq!(entry.video.as_ref().unwrap().id(), "v");
        assert_eq!(entry.audio.as_ref().unwrap().id(), "a");
    }

    #[test]
    fn unpublish_leaves_other_kind_intact() {
        let mut map = RemoteParticipantTracks::default();
        map.publish(7, MediaKind::Video, MockRemoteTrack::new("v", MediaKind::Video));
        map.publish(7, MediaKind::Audio, MockRemoteTrack::new("a", MediaKind::Audio));

        assert!(map.unpublish(7, MediaKind::Video));
        let entry = map.get(7).unwrap();
        assert!(entry.video.is_none());
        assert!(entry.audio.is_some());

        assert!(map.unpublish(7, MediaKind::Audio));
        assert!(map.get(7).unwrap().audio.is_none());
    }

    #[test]
    fn unpublish_unknown_participant_is_noop() {
        let mut map = RemoteParticipantTracks::default();
        assert!(!map.unpublish(42, MediaKind::Audio));
        assert!(map.is_empty());
    }

    #[test]
    fn republish_stops_replaced_track() {
        let mut map = RemoteParticipantTracks::default();
        let first = MockRemoteTrack::new("a1", MediaKind::Audio);
        first.play().unwrap();
        map.publish(1, MediaKind::Audio, first.clone());
        map.publish(1, MediaKind::Audio, MockRemoteTrack::new("a2", MediaKind::Audio));

        assert!(!first.is_playing());
        assert_eq!(map.get(1).unwrap().audio.as_ref().unwrap().id(), "a2");
    }

    #[test]
    fn close_all_empties_local_tracks() {
        use crate::mock::MockLocalTrack;
        let audio = MockLocalTrack::new("mic", MediaSource::Microphone);
        let video = MockLocalTrack::new("cam", MediaSource::Camera);
        let mut local = LocalMediaTracks {
            audio: Some(audio.clone()),
            video: Some(video.clone()),
            screen: None,
        };
        local.close_all();
        assert!(local.is_empty());
        assert!(audio.is_closed());
        assert!(video.is_closed());
        // closing again through the handle is harmless
        audio.close();
    }
}

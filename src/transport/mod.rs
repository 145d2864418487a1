use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::media::{LocalTrackRef, MediaKind, RemoteTrackRef, RemoteUid};
use crate::CallDirection;

pub mod rtc;

/// identifies a handler registered with `Transport::on`
pub type SubscriptionId = Uuid;

/// emitted by the transport after join
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportEvent {
    /// a remote participant published a track. call `subscribe` to receive it
    UserPublished { uid: RemoteUid, kind: MediaKind },
    UserUnpublished { uid: RemoteUid, kind: MediaKind },
    UserLeft { uid: RemoteUid },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    /// application credential
    pub app_id: String,
    pub channel: String,
    /// per-session token, issued by a backend
    pub token: Option<String>,
    /// requested local uid. the transport picks one if `None`
    pub uid: Option<RemoteUid>,
    pub direction: CallDirection,
}

/// The capabilities the media session needs from a real-time media client
#[async_trait]
pub trait Transport: Send + Sync {
    /// returns the uid assigned to the local participant
    async fn join(&self, request: &JoinRequest) -> anyhow::Result<RemoteUid>;
    async fn leave(&self) -> anyhow::Result<()>;
    async fn create_microphone_and_camera_tracks(
        &self,
    ) -> anyhow::Result<(LocalTrackRef, LocalTrackRef)>;
    async fn create_screen_track(&self) -> anyhow::Result<LocalTrackRef>;
    async fn publish(&self, tracks: &[LocalTrackRef]) -> anyhow::Result<()>;
    async fn unpublish(&self, tracks: &[LocalTrackRef]) -> anyhow::Result<()>;
    async fn subscribe(&self, uid: RemoteUid, kind: MediaKind) -> anyhow::Result<RemoteTrackRef>;
    async fn on(&self, handler: mpsc::UnboundedSender<TransportEvent>) -> SubscriptionId;
    async fn off(&self, id: SubscriptionId);

    /// negotiation payload received from the remote participant
    async fn handle_signal(&self, _payload: serde_json::Value) -> anyhow::Result<()> {
        Ok(())
    }
    /// negotiation payloads which must be forwarded to the remote participant.
    /// transports which negotiate on their own return `None`
    fn take_signal_outbox(&self) -> Option<mpsc::UnboundedReceiver<serde_json::Value>> {
        None
    }
}

/// handlers registered through `Transport::on`
#[derive(Default)]
pub struct EventHandlers {
    handlers: Mutex<HashMap<SubscriptionId, mpsc::UnboundedSender<TransportEvent>>>,
}

impl EventHandlers {
    pub async fn add(&self, handler: mpsc::UnboundedSender<TransportEvent>) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.handlers.lock().await.insert(id, handler);
        id
    }

    pub async fn remove(&self, id: SubscriptionId) {
        if self.handlers.lock().await.remove(&id).is_none() {
            log::debug!("removed nonexistent transport handler {}", id);
        }
    }

    pub async fn len(&self) -> usize {
        self.handlers.lock().await.len()
    }

    /// handlers whose receiver is gone are dropped
    pub async fn emit(&self, event: TransportEvent) {
        let mut handlers = self.handlers.lock().await;
        handlers.retain(|id, tx| match tx.send(event) {
            Ok(_) => true,
            Err(_) => {
                log::debug!("dropping closed transport handler {}", id);
                false
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn off_stops_delivery() {
        let handlers = EventHandlers::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = handlers.add(tx).await;

        let event = TransportEvent::UserLeft { uid: 3 };
        handlers.emit(event).await;
        assert_eq!(rx.recv().await, Some(event));

        handlers.remove(id).await;
        handlers.emit(event).await;
        assert!(rx.try_recv().is_err());
        assert_eq!(handlers.len().await, 0);
    }

    #[tokio::test]
    async fn closed_receivers_are_pruned() {
        let handlers = EventHandlers::default();
        let (tx, rx) = mpsc::unbounded_channel();
        handlers.add(tx).await;
        drop(rx);
        handlers.emit(TransportEvent::UserLeft { uid: 1 }).await;
        assert_eq!(handlers.len().await, 0);
    }
}

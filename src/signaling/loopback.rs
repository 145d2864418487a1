use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

use super::{CallSignal, SignalEnvelope, SignalingChannel};
use crate::internal::data_types::ParticipantId;

/// An in-process signaling hub.
///
/// Envelopes for participants which are not subscribed are kept in a mailbox
/// and handed over on `subscribe`. Invites older than `invite_ttl` are
/// dropped at that point, since nobody is ringing anymore.
pub struct LoopbackSignaling {
    invite_ttl: chrono::Duration,
    inner: Mutex<Hub>,
}

#[derive(Default)]
struct Hub {
    subscribers: HashMap<ParticipantId, mpsc::UnboundedSender<SignalEnvelope>>,
    mailboxes: HashMap<ParticipantId, Vec<SignalEnvelope>>,
}

impl LoopbackSignaling {
    pub fn new(invite_ttl: Duration) -> Self {
        Self {
            invite_ttl: chrono::Duration::from_std(invite_ttl)
                .unwrap_or(chrono::Duration::MAX),
            inner: Mutex::new(Hub::default()),
        }
    }

    /// envelopes waiting for `participant`
    pub async fn pending(&self, participant: &str) -> usize {
        self.inner
            .lock()
            .await
            .mailboxes
            .get(participant)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn expired(&self, envelope: &SignalEnvelope) -> bool {
        matches!(envelope.signal, CallSignal::Invite { .. })
            && Utc::now() - envelope.sent_at > self.invite_ttl
    }
}

impl Default for LoopbackSignaling {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

#[async_trait]
impl SignalingChannel for LoopbackSignaling {
    async fn send(&self, envelope: SignalEnvelope) -> Result<()> {
        log::debug!(
            "signal {:?} from {} to {}",
            envelope.signal,
            envelope.from,
            envelope.to
        );
        let mut hub = self.inner.lock().await;
        if let Some(tx) = hub.subscribers.get(&envelope.to) {
            match tx.send(envelope) {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(envelope)) => {
                    log::info!("{} unsubscribed, queueing signal", envelope.to);
                    hub.subscribers.remove(&envelope.to);
                    hub.mailboxes
                        .entry(envelope.to.clone())
                        .or_default()
                        .push(envelope);
                    return Ok(());
                }
            }
        }
        hub.mailboxes
            .entry(envelope.to.clone())
            .or_default()
            .push(envelope);
        Ok(())
    }

    async fn subscribe(
        &self,
        participant: &ParticipantId,
    ) -> Result<mpsc::UnboundedReceiver<SignalEnvelope>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.inner.lock().await;
        for envelope in hub.mailboxes.remove(participant).unwrap_or_default() {
            if self.expired(&envelope) {
                log::info!(
                    "dropping expired invite from {} on channel {}",
                    envelope.from,
                    envelope.signal.channel()
                );
                continue;
            }
            // the receiver is still in scope
            let _ = tx.send(envelope);
        }
        hub.subscribers.insert(participant.clone(), tx);
        Ok(rx)
    }
}

use thiserror::Error;

use crate::CallState;

pub type Result<T> = std::result::Result<T, CallError>;

/// Errors surfaced to the application. Each one is also emitted as a
/// `CallEvent::Failed` so the UI can show it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// camera or microphone explicitly denied. no retry for this attempt
    #[error("please allow microphone and camera permissions to start the call")]
    PermissionDenied,

    /// the permission prompt was shown but the devices still could not be opened
    #[error("media devices could not be acquired: {0}")]
    AcquisitionFailure(String),

    /// the media client failed to construct. this is a configuration error
    #[error("media transport client not initialized")]
    TransportNotInitialized,

    #[error("failed to join channel {channel}: {reason}")]
    TransportJoin { channel: String, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    /// the operation is not permitted in the current call state
    #[error("cannot {operation} while call is {state}")]
    StaleState {
        operation: &'static str,
        state: CallState,
    },

    #[error("signaling error: {0}")]
    Signaling(String),
}

impl CallError {
    pub(crate) fn stale(operation: &'static str, state: CallState) -> Self {
        CallError::StaleState { operation, state }
    }

    /// true for errors the user may resolve by trying again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CallError::AcquisitionFailure(_) | CallError::TransportJoin { .. }
        )
    }
}

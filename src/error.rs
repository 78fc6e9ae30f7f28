use crate::session::{SessionCommand, SessionStatus};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DanceflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl DanceflowError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Per-frame failures; recovered locally by skipping the frame
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FrameError {
    #[error("Invalid frame: {details}")]
    InvalidFrame { details: String },

    #[error("Frame has no body landmarks")]
    MissingBodyLandmarks,

    #[error("Frame has no usable face landmarks")]
    MissingFaceLandmarks,
}

impl FrameError {
    pub fn invalid<S: Into<String>>(details: S) -> Self {
        Self::InvalidFrame {
            details: details.into(),
        }
    }
}

/// Session lifecycle failures
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionError {
    #[error("Session recorded no frames")]
    EmptySession,

    #[error("Session could not be persisted: {details}")]
    PersistenceFailure { details: String },

    #[error("Command {command:?} is not accepted while {from:?}")]
    InvalidTransition {
        from: SessionStatus,
        command: SessionCommand,
    },

    #[error("Session was cancelled")]
    Cancelled,
}

/// Session store failures. `NotFound` is an expected lookup outcome, not a storage fault.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Session not found: {session_id}")]
    NotFound { session_id: String },

    #[error("Persistence failure: {details}")]
    PersistenceFailure { details: String },
}

impl StoreError {
    pub fn persistence<S: Into<String>>(details: S) -> Self {
        Self::PersistenceFailure {
            details: details.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerificationError {
    #[error("Verification authority unavailable: {details}")]
    Unavailable { details: String },

    #[error("Verification rejected session {session_id}: {details}")]
    Rejected { session_id: String, details: String },
}

pub type Result<T> = std::result::Result<T, DanceflowError>;

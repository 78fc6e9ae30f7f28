use crate::aggregator::RunningScore;
use crate::expression::ExpressionResult;
use crate::posture::PostureResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recording lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Idle,
    Armed,
    Recording,
    Finalizing,
    Completed,
    Aborted,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Armed => "armed",
            SessionStatus::Recording => "recording",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        }
    }
}

/// Commands accepted by the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionCommand {
    Arm,
    Start,
    Stop,
    Complete,
    Fail,
    Cancel,
}

/// Dance and lecture chosen before recording
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSetup {
    pub dance_id: String,
    pub lecture_id: String,
}

impl SessionSetup {
    pub fn new<S: Into<String>>(dance_id: S, lecture_id: S) -> Self {
        Self {
            dance_id: dance_id.into(),
            lecture_id: lecture_id.into(),
        }
    }
}

/// One recorded frame. Expression is absent when no face was detected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFrame {
    pub posture: PostureResult,
    pub expression: Option<ExpressionResult>,
}

/// A single state change, reported to listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub from: SessionStatus,
    pub to: SessionStatus,
    pub session_id: Option<String>,
}

impl Transition {
    pub(crate) fn new(from: SessionStatus, to: SessionStatus, session_id: Option<&str>) -> Self {
        Self {
            from,
            to,
            session_id: session_id.map(str::to_string),
        }
    }
}

/// One continuous recording attempt
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    id: String,
    setup: SessionSetup,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    frames: Vec<SessionFrame>,
    running: RunningScore,
}

impl Session {
    pub(crate) fn new(setup: SessionSetup, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            setup,
            started_at,
            ended_at: None,
            frames: Vec::new(),
            running: RunningScore::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dance_id(&self) -> &str {
        &self.setup.dance_id
    }

    pub fn lecture_id(&self) -> &str {
        &self.setup.lecture_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn frames(&self) -> &[SessionFrame] {
        &self.frames
    }

    pub fn running(&self) -> RunningScore {
        self.running
    }

    pub fn is_frozen(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Append a frame; ignored once the session is frozen
    pub(crate) fn append(&mut self, frame: SessionFrame) -> bool {
        if self.is_frozen() {
            return false;
        }
        self.running.record(frame.posture.overall);
        self.frames.push(frame);
        true
    }

    pub(crate) fn finish(&mut self, ended_at: DateTime<Utc>) {
        if self.ended_at.is_none() {
            self.ended_at = Some(ended_at);
        }
    }
}

use super::{Session, SessionCommand, SessionFrame, SessionSetup, SessionStatus, Transition};
use crate::aggregator::RunningScore;
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use tracing::{debug, info};

/// Owns the active session and governs the recording lifecycle
#[derive(Debug)]
pub struct SessionStateMachine {
    status: SessionStatus,
    setup: Option<SessionSetup>,
    session: Option<Session>,
    last_outcome: Option<SessionStatus>,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateMachine {
    pub fn new() -> Self {
        Self {
            status: SessionStatus::Idle,
            setup: None,
            session: None,
            last_outcome: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn setup(&self) -> Option<&SessionSetup> {
        self.setup.as_ref()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session.as_ref().map(Session::id)
    }

    /// Terminal state reached by the most recent session, if any
    pub fn last_outcome(&self) -> Option<SessionStatus> {
        self.last_outcome
    }

    /// True while `session_id` is waiting on aggregation or persistence
    pub fn is_finalizing(&self, session_id: &str) -> bool {
        self.status == SessionStatus::Finalizing && self.session_id() == Some(session_id)
    }

    /// idle -> armed
    pub fn arm(&mut self, setup: SessionSetup) -> Result<Vec<Transition>, SessionError> {
        self.require(SessionStatus::Idle, SessionCommand::Arm)?;
        info!(
            "Session armed for dance '{}' lecture '{}'",
            setup.dance_id, setup.lecture_id
        );
        self.setup = Some(setup);
        Ok(vec![self.move_to(SessionStatus::Armed)])
    }

    /// armed -> recording, creating the session
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<Vec<Transition>, SessionError> {
        self.require(SessionStatus::Armed, SessionCommand::Start)?;
        let setup = self.setup.clone().ok_or(SessionError::InvalidTransition {
            from: self.status,
            command: SessionCommand::Start,
        })?;

        let session = Session::new(setup, now);
        info!("Recording session {}", session.id());
        self.session = Some(session);
        Ok(vec![self.move_to(SessionStatus::Recording)])
    }

    /// recording -> recording. Frames outside `recording` are dropped.
    pub fn record(&mut self, frame: SessionFrame) -> Option<RunningScore> {
        if self.status != SessionStatus::Recording {
            debug!("Dropping frame while {}", self.status.as_str());
            return None;
        }
        let session = self.session.as_mut()?;
        session.append(frame).then(|| session.running())
    }

    /// recording -> finalizing. Returns a frozen copy of the session for aggregation.
    pub fn stop(&mut self, now: DateTime<Utc>) -> Result<(Vec<Transition>, Session), SessionError> {
        self.require(SessionStatus::Recording, SessionCommand::Stop)?;
        let session = self.session.as_mut().ok_or(SessionError::InvalidTransition {
            from: SessionStatus::Recording,
            command: SessionCommand::Stop,
        })?;
        session.finish(now);
        let snapshot = session.clone();

        info!(
            "Session {} stopped with {} frames",
            snapshot.id(),
            snapshot.frames().len()
        );
        Ok((vec![self.move_to(SessionStatus::Finalizing)], snapshot))
    }

    /// finalizing -> completed -> idle
    pub fn complete(&mut self, session_id: &str) -> Result<Vec<Transition>, SessionError> {
        self.require_finalizing(session_id, SessionCommand::Complete)?;
        let mut transitions = vec![self.move_to(SessionStatus::Completed)];
        transitions.push(self.reset(SessionStatus::Completed));
        Ok(transitions)
    }

    /// finalizing -> aborted -> idle, after aggregation or persistence failed
    pub fn fail(&mut self, session_id: &str) -> Result<Vec<Transition>, SessionError> {
        self.require_finalizing(session_id, SessionCommand::Fail)?;
        let mut transitions = vec![self.move_to(SessionStatus::Aborted)];
        transitions.push(self.reset(SessionStatus::Aborted));
        Ok(transitions)
    }

    /// any -> aborted -> idle, discarding the in-progress session
    pub fn cancel(&mut self) -> Vec<Transition> {
        if let Some(session) = &self.session {
            info!(
                "Cancelling session {} ({} frames discarded)",
                session.id(),
                session.frames().len()
            );
        } else {
            info!("Cancel requested while {}", self.status.as_str());
        }

        let mut transitions = Vec::with_capacity(2);
        if self.status != SessionStatus::Aborted {
            transitions.push(self.move_to(SessionStatus::Aborted));
        }
        transitions.push(self.reset(SessionStatus::Aborted));
        transitions
    }

    fn require(&self, expected: SessionStatus, command: SessionCommand) -> Result<(), SessionError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                from: self.status,
                command,
            })
        }
    }

    fn require_finalizing(
        &self,
        session_id: &str,
        command: SessionCommand,
    ) -> Result<(), SessionError> {
        if self.is_finalizing(session_id) {
            Ok(())
        } else {
            Err(SessionError::InvalidTransition {
                from: self.status,
                command,
            })
        }
    }

    fn move_to(&mut self, to: SessionStatus) -> Transition {
        let transition = Transition::new(self.status, to, self.session_id());
        debug!(
            "Session state {} -> {}",
            transition.from.as_str(),
            transition.to.as_str()
        );
        self.status = to;
        transition
    }

    /// Terminal state -> idle, dropping the session and setup
    fn reset(&mut self, outcome: SessionStatus) -> Transition {
        self.last_outcome = Some(outcome);
        let transition = self.move_to(SessionStatus::Idle);
        self.session = None;
        self.setup = None;
        transition
    }
}

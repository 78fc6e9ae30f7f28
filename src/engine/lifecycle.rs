use super::{emit, emit_transitions, SessionEngine};
use crate::aggregator::{ScoreAggregator, SessionSummary};
use crate::error::SessionError;
use crate::events::{DanceflowEvent, EventBus, EventFilter, EventReceiver};
use crate::session::{Session, SessionSetup, SessionStateMachine, SessionStatus};
use crate::store::SessionStore;
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Pending aggregation and persistence of a stopped session
#[derive(Debug)]
pub struct FinalizeHandle {
    session_id: String,
    handle: JoinHandle<Result<SessionSummary, SessionError>>,
}

impl FinalizeHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the session to be completed or aborted
    pub async fn wait(self) -> Result<SessionSummary, SessionError> {
        self.handle
            .await
            .map_err(|e| SessionError::PersistenceFailure {
                details: format!("finalize task failed: {}", e),
            })?
    }
}

impl SessionEngine {
    pub fn status(&self) -> SessionStatus {
        self.machine.lock().status()
    }

    pub fn session_id(&self) -> Option<String> {
        self.machine.lock().session_id().map(str::to_string)
    }

    /// Terminal state of the most recent session
    pub fn last_outcome(&self) -> Option<SessionStatus> {
        self.machine.lock().last_outcome()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DanceflowEvent> {
        self.event_bus.subscribe()
    }

    pub fn subscribe_filtered<S: Into<String>>(&self, filter: EventFilter, name: S) -> EventReceiver {
        self.event_bus.subscribe_filtered(filter, name)
    }

    /// Select dance and lecture (idle -> armed)
    pub async fn arm<S: Into<String>>(&self, dance_id: S, lecture_id: S) -> Result<(), SessionError> {
        let transitions = self
            .machine
            .lock()
            .arm(SessionSetup::new(dance_id, lecture_id))?;
        emit_transitions(&self.event_bus, transitions).await;
        Ok(())
    }

    /// Begin recording (armed -> recording), returning the new session id
    pub async fn start(&self) -> Result<String, SessionError> {
        let (transitions, session_id) = {
            let mut machine = self.machine.lock();
            let transitions = machine.start(Utc::now())?;
            let session_id = machine.session_id().map(str::to_string).unwrap_or_default();
            (transitions, session_id)
        };
        emit_transitions(&self.event_bus, transitions).await;
        Ok(session_id)
    }

    /// Stop recording (recording -> finalizing) and hand the frozen session
    /// to a background task for aggregation and persistence
    pub async fn stop(&self) -> Result<FinalizeHandle, SessionError> {
        let (transitions, snapshot) = self.machine.lock().stop(Utc::now())?;
        emit_transitions(&self.event_bus, transitions).await;

        let session_id = snapshot.id().to_string();
        let handle = tokio::spawn(finalize(
            snapshot,
            self.aggregator.clone(),
            Arc::clone(&self.machine),
            Arc::clone(&self.store),
            Arc::clone(&self.event_bus),
        ));

        Ok(FinalizeHandle { session_id, handle })
    }

    /// Abort whatever is in progress (any -> aborted -> idle). Nothing is persisted.
    pub async fn cancel(&self) {
        let transitions = self.machine.lock().cancel();
        emit_transitions(&self.event_bus, transitions).await;
    }
}

async fn finalize(
    session: Session,
    aggregator: ScoreAggregator,
    machine: Arc<Mutex<SessionStateMachine>>,
    store: Arc<dyn SessionStore>,
    event_bus: Arc<EventBus>,
) -> Result<SessionSummary, SessionError> {
    let session_id = session.id().to_string();

    let summary = match aggregator.summarize(&session) {
        Ok(summary) => summary,
        Err(e) => return Err(abort(&machine, &event_bus, &session_id, e).await),
    };

    let pending = machine.lock().is_finalizing(&session_id);
    if !pending {
        info!("Session {} was cancelled before persistence", session_id);
        return Err(SessionError::Cancelled);
    }

    if let Err(e) = store.save(&summary).await {
        let reason = SessionError::PersistenceFailure {
            details: e.to_string(),
        };
        return Err(abort(&machine, &event_bus, &session_id, reason).await);
    }

    // A cancel during the save has already reported aborted -> idle; the
    // stored summary stands but is not announced.
    let completed = machine.lock().complete(&session_id);
    match completed {
        Ok(transitions) => emit_transitions(&event_bus, transitions).await,
        Err(e) => {
            warn!(
                "Session {} saved but cancelled during persistence, not announcing: {}",
                session_id, e
            );
            return Ok(summary);
        }
    }

    emit(
        &event_bus,
        DanceflowEvent::SessionPersisted {
            summary: summary.clone(),
        },
    )
    .await;

    Ok(summary)
}

/// finalizing -> aborted, unless a cancel already discarded the session
async fn abort(
    machine: &Mutex<SessionStateMachine>,
    event_bus: &EventBus,
    session_id: &str,
    reason: SessionError,
) -> SessionError {
    let failed = machine.lock().fail(session_id);
    let transitions = match failed {
        Ok(transitions) => transitions,
        Err(_) => return SessionError::Cancelled,
    };

    emit_transitions(event_bus, transitions).await;
    emit(
        event_bus,
        DanceflowEvent::SessionFailed {
            session_id: Some(session_id.to_string()),
            reason: reason.clone(),
        },
    )
    .await;
    reason
}

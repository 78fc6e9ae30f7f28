//! Single entry point for landmark frames and session commands.
//!
//! The engine owns the state machine; scorers run on every frame, the
//! aggregator and store only see frozen session snapshots.

mod builder;
mod ingest;
mod lifecycle;

#[cfg(test)]
mod tests;

pub use builder::SessionEngineBuilder;
pub use ingest::FrameScore;
pub use lifecycle::FinalizeHandle;

use crate::aggregator::ScoreAggregator;
use crate::events::{DanceflowEvent, EventBus};
use crate::expression::ExpressionClassifier;
use crate::posture::PostureScorer;
use crate::session::{SessionStateMachine, Transition};
use crate::store::SessionStore;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::debug;

/// Scores frames, records sessions and persists their summaries
pub struct SessionEngine {
    posture: PostureScorer,
    expression: ExpressionClassifier,
    aggregator: ScoreAggregator,
    machine: Arc<Mutex<SessionStateMachine>>,
    store: Arc<dyn SessionStore>,
    event_bus: Arc<EventBus>,
}

impl SessionEngine {
    pub fn builder() -> SessionEngineBuilder {
        SessionEngineBuilder::new()
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }
}

/// Publish an event; having no listeners is not an error for the engine
async fn emit(event_bus: &EventBus, event: DanceflowEvent) {
    if let Err(e) = event_bus.publish(event).await {
        debug!("Event not delivered: {}", e);
    }
}

async fn emit_transitions(event_bus: &EventBus, transitions: Vec<Transition>) {
    for transition in transitions {
        emit(event_bus, transition.into()).await;
    }
}

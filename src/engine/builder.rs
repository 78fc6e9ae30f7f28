use super::SessionEngine;
use crate::aggregator::ScoreAggregator;
use crate::config::DanceflowConfig;
use crate::error::{DanceflowError, Result};
use crate::events::EventBus;
use crate::expression::ExpressionClassifier;
use crate::posture::PostureScorer;
use crate::session::SessionStateMachine;
use crate::store::SessionStore;
use parking_lot::Mutex;
use std::sync::Arc;

/// Builder for [`SessionEngine`]
pub struct SessionEngineBuilder {
    config: Option<DanceflowConfig>,
    store: Option<Arc<dyn SessionStore>>,
    event_bus: Option<Arc<EventBus>>,
}

impl SessionEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            store: None,
            event_bus: None,
        }
    }

    /// Set the configuration; defaults are used when omitted
    pub fn with_config(mut self, config: DanceflowConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the session store
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share an existing event bus instead of creating one from config
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn build(self) -> Result<SessionEngine> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let store = self.store.ok_or_else(|| {
            DanceflowError::component("session_engine", "Session store is required")
        })?;

        let event_bus = self.event_bus.unwrap_or_else(|| {
            let capacity = config.system.event_bus_capacity;
            Arc::new(if config.system.debug_events {
                EventBus::with_debug_logging(capacity)
            } else {
                EventBus::new(capacity)
            })
        });

        Ok(SessionEngine {
            posture: PostureScorer::new(config.posture.clone()),
            expression: ExpressionClassifier::new(config.expression.clone()),
            aggregator: ScoreAggregator::new(),
            machine: Arc::new(Mutex::new(SessionStateMachine::new())),
            store,
            event_bus,
        })
    }
}

impl Default for SessionEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

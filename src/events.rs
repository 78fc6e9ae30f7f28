use crate::aggregator::{RunningScore, SessionSummary};
use crate::error::{EventBusError, FrameError, SessionError};
use crate::expression::ExpressionResult;
use crate::posture::PostureResult;
use crate::session::{SessionStatus, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Events published by the scoring engine and session lifecycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DanceflowEvent {
    /// A frame was scored; either signal may be missing
    FrameScored {
        posture: Option<PostureResult>,
        expression: Option<ExpressionResult>,
        recorded: bool,
        running: Option<RunningScore>,
        timestamp: DateTime<Utc>,
    },
    /// A frame was skipped because neither signal could be scored
    FrameRejected {
        reason: FrameError,
        timestamp: DateTime<Utc>,
    },
    /// The session state machine moved between states
    SessionStateChanged {
        from: SessionStatus,
        to: SessionStatus,
        session_id: Option<String>,
    },
    /// A completed session summary was written to the store
    SessionPersisted { summary: SessionSummary },
    /// A session was aborted by aggregation or persistence failure
    SessionFailed {
        session_id: Option<String>,
        reason: SessionError,
    },
    /// The verification authority ruled on a persisted session
    SessionVerified { session_id: String, verified: bool },
}

impl From<Transition> for DanceflowEvent {
    fn from(transition: Transition) -> Self {
        DanceflowEvent::SessionStateChanged {
            from: transition.from,
            to: transition.to,
            session_id: transition.session_id,
        }
    }
}

impl DanceflowEvent {
    /// Get the timestamp of the event
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            DanceflowEvent::FrameScored { timestamp, .. } => *timestamp,
            DanceflowEvent::FrameRejected { timestamp, .. } => *timestamp,
            DanceflowEvent::SessionPersisted { summary } => summary.created_at,
            DanceflowEvent::SessionStateChanged { .. }
            | DanceflowEvent::SessionFailed { .. }
            | DanceflowEvent::SessionVerified { .. } => Utc::now(),
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            DanceflowEvent::FrameScored {
                posture,
                expression,
                recorded,
                ..
            } => {
                let posture = posture
                    .as_ref()
                    .map(|p| p.overall.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let expression = expression
                    .as_ref()
                    .map(|e| e.label.as_str())
                    .unwrap_or("-");
                format!(
                    "Frame scored: posture {}, expression {}{}",
                    posture,
                    expression,
                    if *recorded { " (recorded)" } else { "" }
                )
            }
            DanceflowEvent::FrameRejected { reason, .. } => {
                format!("Frame rejected: {}", reason)
            }
            DanceflowEvent::SessionStateChanged { from, to, .. } => {
                format!("Session {} -> {}", from.as_str(), to.as_str())
            }
            DanceflowEvent::SessionPersisted { summary } => format!(
                "Session {} persisted (avg {}, peak {})",
                summary.session_id, summary.average_score, summary.peak_score
            ),
            DanceflowEvent::SessionFailed { session_id, reason } => format!(
                "Session {} failed: {}",
                session_id.as_deref().unwrap_or("-"),
                reason
            ),
            DanceflowEvent::SessionVerified {
                session_id,
                verified,
            } => format!(
                "Session {} {}",
                session_id,
                if *verified { "verified" } else { "not verified" }
            ),
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            DanceflowEvent::FrameScored { .. } => "frame_scored",
            DanceflowEvent::FrameRejected { .. } => "frame_rejected",
            DanceflowEvent::SessionStateChanged { .. } => "session_state_changed",
            DanceflowEvent::SessionPersisted { .. } => "session_persisted",
            DanceflowEvent::SessionFailed { .. } => "session_failed",
            DanceflowEvent::SessionVerified { .. } => "session_verified",
        }
    }

    /// Session this event concerns, if any
    pub fn session_id(&self) -> Option<&str> {
        match self {
            DanceflowEvent::SessionStateChanged { session_id, .. }
            | DanceflowEvent::SessionFailed { session_id, .. } => session_id.as_deref(),
            DanceflowEvent::SessionPersisted { summary } => Some(&summary.session_id),
            DanceflowEvent::SessionVerified { session_id, .. } => Some(session_id),
            DanceflowEvent::FrameScored { .. } | DanceflowEvent::FrameRejected { .. } => None,
        }
    }
}

/// Async event bus for decoupling producers from UI listeners
pub struct EventBus {
    sender: broadcast::Sender<DanceflowEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            debug_logging: true,
        }
    }

    /// Subscribe to events and get a receiver
    pub fn subscribe(&self) -> broadcast::Receiver<DanceflowEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter
    pub fn subscribe_filtered<S: Into<String>>(&self, filter: EventFilter, name: S) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: DanceflowEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        // Log important events at appropriate levels
        match &event {
            DanceflowEvent::SessionFailed { session_id, reason } => {
                error!(
                    "Session {} failed: {}",
                    session_id.as_deref().unwrap_or("-"),
                    reason
                );
            }
            DanceflowEvent::SessionPersisted { summary } => {
                info!(
                    "Session {} persisted: avg {}, peak {}",
                    summary.session_id, summary.average_score, summary.peak_score
                );
            }
            DanceflowEvent::FrameRejected { reason, .. } => {
                warn!("Frame rejected: {}", reason);
            }
            DanceflowEvent::SessionStateChanged { from, to, .. } => {
                info!("Session state {} -> {}", from.as_str(), to.as_str());
            }
            _ => {}
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Check if there are any active subscribers
    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept events about specific sessions
    Sessions(Vec<String>),
    /// Custom filter function
    Custom(fn(&DanceflowEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &DanceflowEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Sessions(ids) => event
                .session_id()
                .map(|id| ids.iter().any(|wanted| wanted == id))
                .unwrap_or(false),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<DanceflowEvent>,
    filter: EventFilter,
    name: String,
    skipped: u64,
}

impl EventReceiver {
    /// Create a new event receiver with a filter
    pub fn new(
        receiver: broadcast::Receiver<DanceflowEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
            skipped: 0,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total events this receiver lost to lag
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<DanceflowEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    self.skipped += n;
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Receive the next filtered event, reading on past lag.
    /// Lost events are counted in [`EventReceiver::skipped`].
    pub async fn recv_past_lag(&mut self) -> Result<DanceflowEvent, EventBusError> {
        loop {
            match self.recv().await {
                Err(EventBusError::Lagged { .. }) => continue,
                other => return other,
            }
        }
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<Option<DanceflowEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    self.skipped += n;
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Drain everything currently queued that passes the filter
    pub fn drain(&mut self) -> Vec<DanceflowEvent> {
        let mut events = Vec::new();
        loop {
            match self.try_recv() {
                Ok(Some(event)) => events.push(event),
                Ok(None) | Err(EventBusError::ChannelClosed) => break,
                Err(_) => continue,
            }
        }
        events
    }
}

/// Event counters for reporting
#[derive(Debug, Default, Clone)]
pub struct EventMetrics {
    pub total_events: u64,
    pub events_by_type: HashMap<&'static str, u64>,
    pub frames_recorded: u64,
    pub last_event_time: Option<DateTime<Utc>>,
}

impl EventMetrics {
    /// Record an event
    pub fn record_event(&mut self, event: &DanceflowEvent) {
        self.total_events += 1;
        *self.events_by_type.entry(event.event_type()).or_insert(0) += 1;
        if let DanceflowEvent::FrameScored { recorded: true, .. } = event {
            self.frames_recorded += 1;
        }
        self.last_event_time = Some(event.timestamp());
    }

    pub fn count(&self, event_type: &str) -> u64 {
        self.events_by_type.get(event_type).copied().unwrap_or(0)
    }

    /// Reset all metrics
    pub fn reset(&mut self) {
        self.total_events = 0;
        self.events_by_type.clear();
        self.frames_recorded = 0;
        self.last_event_time = None;
    }
}

/// Bounded history of recent events with metrics
pub struct EventDebugger {
    event_history: VecDeque<DanceflowEvent>,
    max_history: usize,
    metrics: EventMetrics,
}

impl EventDebugger {
    pub fn new(max_history: usize) -> Self {
        Self {
            event_history: VecDeque::with_capacity(max_history),
            max_history,
            metrics: EventMetrics::default(),
        }
    }

    pub fn record_event(&mut self, event: DanceflowEvent) {
        self.metrics.record_event(&event);
        self.event_history.push_back(event);
        while self.event_history.len() > self.max_history {
            self.event_history.pop_front();
        }
    }

    /// Most recent events of a type, newest first
    pub fn get_recent_events(&self, event_type: &str, count: usize) -> Vec<&DanceflowEvent> {
        self.event_history
            .iter()
            .rev()
            .filter(|event| event.event_type() == event_type)
            .take(count)
            .collect()
    }

    pub fn metrics(&self) -> &EventMetrics {
        &self.metrics
    }

    pub fn print_summary(&self) {
        info!("Event summary:");
        info!("  Total events: {}", self.metrics.total_events);
        info!("  Frames recorded: {}", self.metrics.frames_recorded);
        for (event_type, count) in &self.metrics.events_by_type {
            info!("  {}: {}", event_type, count);
        }
    }
}

use crate::config::VerificationConfig;
use crate::error::{EventBusError, Result, VerificationError};
use crate::events::{DanceflowEvent, EventBus, EventFilter};
use crate::store::SessionStore;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// External authority that confirms a persisted session
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, session_id: &str) -> std::result::Result<bool, VerificationError>;

    fn name(&self) -> &'static str;
}

/// Verifier answering with a fixed outcome after a fixed delay
#[derive(Debug, Clone)]
pub struct MockVerifier {
    delay: Duration,
    outcome: bool,
}

impl MockVerifier {
    pub fn new(delay: Duration, outcome: bool) -> Self {
        Self { delay, outcome }
    }

    pub fn from_config(config: &VerificationConfig) -> Self {
        Self::new(Duration::from_millis(config.delay_ms), config.mock_outcome)
    }
}

#[async_trait]
impl Verifier for MockVerifier {
    async fn verify(&self, session_id: &str) -> std::result::Result<bool, VerificationError> {
        if session_id.trim().is_empty() {
            return Err(VerificationError::Rejected {
                session_id: session_id.to_string(),
                details: "empty session id".to_string(),
            });
        }
        tokio::time::sleep(self.delay).await;
        debug!("Mock verification of {}: {}", session_id, self.outcome);
        Ok(self.outcome)
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

/// Background task applying verification outcomes to persisted sessions
pub struct VerificationWorker {
    verifier: Arc<dyn Verifier>,
    store: Arc<dyn SessionStore>,
    event_bus: Arc<EventBus>,
    cancellation_token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl VerificationWorker {
    pub fn new(
        verifier: Arc<dyn Verifier>,
        store: Arc<dyn SessionStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            verifier,
            store,
            event_bus,
            cancellation_token: CancellationToken::new(),
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    /// Subscribe to the bus and start handling `SessionPersisted` events
    pub fn start(&mut self) -> Result<()> {
        if self.is_running() {
            warn!("Verification worker already running");
            return Ok(());
        }

        info!("Starting verification worker ({} verifier)", self.verifier.name());

        // Subscribe before spawning so no persisted session is missed
        let mut receiver = self.event_bus.subscribe_filtered(
            EventFilter::EventTypes(vec!["session_persisted"]),
            "verification",
        );
        let verifier = Arc::clone(&self.verifier);
        let store = Arc::clone(&self.store);
        let event_bus = Arc::clone(&self.event_bus);
        let token = self.cancellation_token.clone();

        self.handle = Some(tokio::spawn(async move {
            // Verifications run beside the receive loop so a slow verifier
            // cannot make the receiver fall behind the bus
            let mut pending = JoinSet::new();
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    Some(joined) = pending.join_next(), if !pending.is_empty() => {
                        if let Err(e) = joined {
                            error!("Verification task failed: {}", e);
                        }
                    }
                    event = receiver.recv() => match event {
                        Ok(DanceflowEvent::SessionPersisted { summary }) => {
                            let verifier = Arc::clone(&verifier);
                            let store = Arc::clone(&store);
                            let event_bus = Arc::clone(&event_bus);
                            pending.spawn(async move {
                                verify_session(
                                    verifier.as_ref(),
                                    store.as_ref(),
                                    &event_bus,
                                    &summary.session_id,
                                )
                                .await
                            });
                        }
                        Ok(_) => {}
                        Err(EventBusError::Lagged { skipped }) => {
                            warn!("Verification worker missed {} events", skipped);
                        }
                        Err(e) => {
                            debug!("Verification worker exiting: {}", e);
                            break;
                        }
                    },
                }
            }
            pending.shutdown().await;
            debug!("Verification worker task exited");
        }));

        Ok(())
    }

    /// Stop the worker, abandoning any verification in flight
    pub async fn stop(&mut self) {
        self.cancellation_token.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                error!("Verification worker task failed: {}", e);
            }
        }
        info!("Verification worker stopped");
    }
}

async fn verify_session(
    verifier: &dyn Verifier,
    store: &dyn SessionStore,
    event_bus: &EventBus,
    session_id: &str,
) {
    let verified = match verifier.verify(session_id).await {
        Ok(verified) => verified,
        Err(e) => {
            warn!("Verification of session {} failed: {}", session_id, e);
            return;
        }
    };

    if let Err(e) = store.mark_verified(session_id, verified).await {
        error!("Failed to record verification for {}: {}", session_id, e);
        return;
    }

    info!(
        "Session {} {}",
        session_id,
        if verified { "verified" } else { "not verified" }
    );

    let event = DanceflowEvent::SessionVerified {
        session_id: session_id.to_string(),
        verified,
    };
    if let Err(e) = event_bus.publish(event).await {
        debug!("No listeners for verification result: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::{SessionSummary, Trend};
    use crate::error::FrameError;
    use crate::store::MemorySessionStore;
    use chrono::Utc;
    use tokio::time::timeout;

    fn summary(id: &str) -> SessionSummary {
        SessionSummary {
            session_id: id.to_string(),
            dance_id: "hiphop".to_string(),
            lecture_id: "groove-1".to_string(),
            duration_ms: 1_000,
            average_score: 75,
            peak_score: 90,
            frame_count: 10,
            trend: Trend::Steady,
            verified: false,
            created_at: Utc::now(),
        }
    }

    async fn persisted(store: &Arc<dyn SessionStore>, bus: &EventBus, id: &str) {
        let summary = summary(id);
        store.save(&summary).await.unwrap();
        bus.publish(DanceflowEvent::SessionPersisted { summary })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_mock_verifier() {
        let verifier = MockVerifier::new(Duration::from_millis(1), false);
        assert!(!verifier.verify("abc").await.unwrap());
        assert!(matches!(
            verifier.verify("  ").await,
            Err(VerificationError::Rejected { .. })
        ));
    }

    #[tokio::test]
    async fn test_worker_marks_persisted_sessions() {
        let bus = Arc::new(EventBus::new(16));
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(1 << 20));
        let verifier = Arc::new(MockVerifier::new(Duration::from_millis(10), true));

        let mut worker = VerificationWorker::new(verifier, Arc::clone(&store), Arc::clone(&bus));
        worker.start().unwrap();
        assert!(worker.is_running());

        let mut verified =
            bus.subscribe_filtered(EventFilter::EventTypes(vec!["session_verified"]), "test");
        persisted(&store, &bus, "s1").await;

        let event = timeout(Duration::from_secs(2), verified.recv())
            .await
            .unwrap()
            .unwrap();
        match event {
            DanceflowEvent::SessionVerified {
                session_id,
                verified,
            } => {
                assert_eq!(session_id, "s1");
                assert!(verified);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert!(store.get("s1").await.unwrap().verified);

        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_slow_verifier_does_not_drop_later_sessions() {
        let bus = Arc::new(EventBus::new(4));
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(1 << 20));
        let verifier = Arc::new(MockVerifier::new(Duration::from_millis(100), true));

        let mut worker = VerificationWorker::new(verifier, Arc::clone(&store), Arc::clone(&bus));
        worker.start().unwrap();

        persisted(&store, &bus, "s1").await;
        tokio::task::yield_now().await;
        persisted(&store, &bus, "s2").await;
        // Frame traffic while s1 is still being verified
        for _ in 0..12 {
            bus.publish(DanceflowEvent::FrameRejected {
                reason: FrameError::MissingBodyLandmarks,
                timestamp: Utc::now(),
            })
            .await
            .unwrap();
            tokio::task::yield_now().await;
        }

        timeout(Duration::from_secs(2), async {
            loop {
                let s1 = store.get("s1").await.unwrap().verified;
                let s2 = store.get("s2").await.unwrap().verified;
                if s1 && s2 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        worker.stop().await;
    }

    #[tokio::test]
    async fn test_stop_abandons_pending_verification() {
        let bus = Arc::new(EventBus::new(16));
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(1 << 20));
        let verifier = Arc::new(MockVerifier::new(Duration::from_secs(60), true));

        let mut worker = VerificationWorker::new(verifier, Arc::clone(&store), Arc::clone(&bus));
        worker.start().unwrap();
        persisted(&store, &bus, "s1").await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        timeout(Duration::from_secs(2), worker.stop()).await.unwrap();
        assert!(!store.get("s1").await.unwrap().verified);
    }
}

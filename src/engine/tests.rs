use super::*;
use crate::aggregator::SessionSummary;
use crate::config::DanceflowConfig;
use crate::error::{FrameError, SessionError, StoreError};
use crate::events::EventFilter;
use crate::expression::ExpressionLabel;
use crate::landmark::fixtures::{face_with, full_frame, raw_frame, upright_body};
use crate::landmark::{BodyPoint, Landmark};
use crate::session::SessionStatus;
use crate::store::{MemorySessionStore, StoreStats};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::timeout;

const QUOTA: u64 = 1 << 20;

fn engine_with_store(store: Arc<dyn SessionStore>) -> SessionEngine {
    SessionEngine::builder()
        .with_config(DanceflowConfig::default())
        .with_store(store)
        .build()
        .unwrap()
}

fn engine() -> (SessionEngine, Arc<dyn SessionStore>) {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(QUOTA));
    (engine_with_store(Arc::clone(&store)), store)
}

/// Upright body with the nose pushed sideways, lowering the spine score
fn leaning_body(offset: f64) -> Vec<Landmark> {
    let mut body = upright_body();
    body[BodyPoint::Nose.index()] = Landmark::at(0.5 + offset, 0.2);
    body
}

/// Memory store whose saves wait until released
struct GatedStore {
    inner: MemorySessionStore,
    entered: Notify,
    release: Notify,
}

impl GatedStore {
    fn new() -> Self {
        Self {
            inner: MemorySessionStore::new(QUOTA),
            entered: Notify::new(),
            release: Notify::new(),
        }
    }
}

#[async_trait]
impl SessionStore for GatedStore {
    async fn save(&self, summary: &SessionSummary) -> Result<(), StoreError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.save(summary).await
    }

    async fn list(&self, dance_id: Option<&str>) -> Result<Vec<SessionSummary>, StoreError> {
        self.inner.list(dance_id).await
    }

    async fn get(&self, session_id: &str) -> Result<SessionSummary, StoreError> {
        self.inner.get(session_id).await
    }

    async fn mark_verified(
        &self,
        session_id: &str,
        verified: bool,
    ) -> Result<SessionSummary, StoreError> {
        self.inner.mark_verified(session_id, verified).await
    }

    async fn stats(&self) -> StoreStats {
        self.inner.stats().await
    }

    fn name(&self) -> &'static str {
        "gated"
    }
}

fn types(events: &[DanceflowEvent]) -> Vec<&'static str> {
    events.iter().map(|e| e.event_type()).collect()
}

#[test]
fn test_builder_requires_store() {
    let result = SessionEngine::builder().build();
    assert!(result.is_err());
}

#[test]
fn test_builder_rejects_invalid_config() {
    let mut config = DanceflowConfig::default();
    config.posture.spine_max_deviation = 0.0;
    let result = SessionEngine::builder()
        .with_config(config)
        .with_store(Arc::new(MemorySessionStore::new(QUOTA)))
        .build();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_full_session_is_persisted() {
    let (engine, store) = engine();
    let mut events = engine.subscribe_filtered(EventFilter::All, "test");

    engine.arm("hiphop", "groove-1").await.unwrap();
    assert_eq!(engine.status(), SessionStatus::Armed);
    let session_id = engine.start().await.unwrap();
    assert_eq!(engine.session_id().as_deref(), Some(session_id.as_str()));

    for offset in [0.0, 0.0, 0.05] {
        let score = engine
            .ingest(raw_frame(Some(leaning_body(offset)), Some(face_with(0.02, 0.4, 0.2))))
            .await
            .unwrap();
        assert!(score.recorded);
    }

    let handle = engine.stop().await.unwrap();
    assert_eq!(handle.session_id(), session_id);
    assert_eq!(engine.status(), SessionStatus::Finalizing);

    let summary = timeout(Duration::from_secs(2), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.session_id, session_id);
    assert_eq!(summary.dance_id, "hiphop");
    assert_eq!(summary.lecture_id, "groove-1");
    assert_eq!(summary.frame_count, 3);
    assert!(summary.peak_score >= 99);
    assert!(summary.average_score < summary.peak_score);
    assert!(!summary.verified);

    assert_eq!(store.get(&session_id).await.unwrap(), summary);
    assert_eq!(engine.status(), SessionStatus::Idle);
    assert_eq!(engine.last_outcome(), Some(SessionStatus::Completed));

    let events = events.drain();
    let kinds = types(&events);
    assert_eq!(kinds.iter().filter(|k| **k == "frame_scored").count(), 3);
    assert_eq!(kinds.last(), Some(&"session_persisted"));
    assert!(!kinds.contains(&"session_failed"));
}

#[tokio::test]
async fn test_frames_outside_recording_are_scored_not_recorded() {
    let (engine, _store) = engine();

    let score = engine.ingest(full_frame()).await.unwrap();
    assert!(!score.recorded);
    assert!(score.running.is_none());
    assert!(score.posture.unwrap().overall >= 99);
    assert_eq!(score.expression.unwrap().label, ExpressionLabel::Neutral);

    engine.arm("ballet", "plie").await.unwrap();
    assert!(!engine.ingest(full_frame()).await.unwrap().recorded);
}

#[tokio::test]
async fn test_partial_frames() {
    let (engine, _store) = engine();
    engine.arm("ballet", "plie").await.unwrap();
    engine.start().await.unwrap();

    // Body only: posture scored and recorded, expression missing
    let score = engine
        .ingest(raw_frame(Some(upright_body()), None))
        .await
        .unwrap();
    assert!(score.posture.is_some());
    assert!(score.expression.is_none());
    assert!(score.recorded);

    // Face only: expression scored, nothing recorded
    let score = engine
        .ingest(raw_frame(None, Some(face_with(0.10, 0.6, 0.2))))
        .await
        .unwrap();
    assert!(score.posture.is_none());
    let expression = score.expression.unwrap();
    assert_eq!(expression.label, ExpressionLabel::Surprise);
    assert!((expression.intensity - 0.10).abs() < 1e-9);
    assert!(!score.recorded);

    assert_eq!(engine.stop().await.unwrap().wait().await.unwrap().frame_count, 1);
}

#[tokio::test]
async fn test_unscorable_frames_are_rejected() {
    let (engine, _store) = engine();
    let mut rejected =
        engine.subscribe_filtered(EventFilter::EventTypes(vec!["frame_rejected"]), "test");

    let err = engine.ingest(raw_frame(None, None)).await.unwrap_err();
    assert!(matches!(err, FrameError::InvalidFrame { .. }));

    // Face too small to classify and no body: posture error wins
    let err = engine
        .ingest(raw_frame(None, Some(vec![Landmark::at(0.5, 0.5); 10])))
        .await
        .unwrap_err();
    assert_eq!(err, FrameError::MissingBodyLandmarks);

    assert_eq!(rejected.drain().len(), 2);
}

#[tokio::test]
async fn test_empty_session_aborts() {
    let (engine, store) = engine();
    let mut failures =
        engine.subscribe_filtered(EventFilter::EventTypes(vec!["session_failed"]), "test");

    engine.arm("tango", "ocho").await.unwrap();
    engine.start().await.unwrap();
    let err = engine.stop().await.unwrap().wait().await.unwrap_err();

    assert_eq!(err, SessionError::EmptySession);
    assert_eq!(engine.status(), SessionStatus::Idle);
    assert_eq!(engine.last_outcome(), Some(SessionStatus::Aborted));
    assert!(store.list(None).await.unwrap().is_empty());

    match failures.drain().pop() {
        Some(DanceflowEvent::SessionFailed { reason, .. }) => {
            assert_eq!(reason, SessionError::EmptySession)
        }
        other => panic!("Unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_mid_recording_discards_session() {
    let (engine, store) = engine();
    let mut changes = engine
        .subscribe_filtered(EventFilter::EventTypes(vec!["session_state_changed"]), "test");

    engine.arm("waltz", "box").await.unwrap();
    engine.start().await.unwrap();
    engine.ingest(full_frame()).await.unwrap();
    engine.cancel().await;

    assert_eq!(engine.status(), SessionStatus::Idle);
    assert_eq!(engine.last_outcome(), Some(SessionStatus::Aborted));
    assert!(engine.session_id().is_none());
    assert!(store.list(None).await.unwrap().is_empty());

    let targets: Vec<SessionStatus> = changes
        .drain()
        .into_iter()
        .filter_map(|e| match e {
            DanceflowEvent::SessionStateChanged { to, .. } => Some(to),
            _ => None,
        })
        .collect();
    assert_eq!(
        targets,
        vec![
            SessionStatus::Armed,
            SessionStatus::Recording,
            SessionStatus::Aborted,
            SessionStatus::Idle,
        ]
    );

    // Stale frame after cancel is not recorded
    assert!(!engine.ingest(full_frame()).await.unwrap().recorded);
}

#[tokio::test]
async fn test_cancel_while_finalizing_skips_save() {
    let (engine, store) = engine();
    engine.arm("waltz", "box").await.unwrap();
    engine.start().await.unwrap();
    engine.ingest(full_frame()).await.unwrap();

    // The finalize task has not run yet on the current-thread runtime
    let handle = engine.stop().await.unwrap();
    engine.cancel().await;

    assert_eq!(handle.wait().await.unwrap_err(), SessionError::Cancelled);
    assert!(store.list(None).await.unwrap().is_empty());
    assert_eq!(engine.last_outcome(), Some(SessionStatus::Aborted));
}

#[tokio::test]
async fn test_cancel_during_save_is_not_announced() {
    let store = Arc::new(GatedStore::new());
    let engine = engine_with_store(Arc::clone(&store) as Arc<dyn SessionStore>);
    engine.arm("waltz", "box").await.unwrap();
    let session_id = engine.start().await.unwrap();
    engine.ingest(full_frame()).await.unwrap();

    let mut events = engine.subscribe_filtered(EventFilter::All, "test");
    let handle = engine.stop().await.unwrap();
    timeout(Duration::from_secs(2), store.entered.notified())
        .await
        .unwrap();
    engine.cancel().await;
    store.release.notify_one();

    let summary = timeout(Duration::from_secs(2), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(summary.session_id, session_id);
    assert!(store.get(&session_id).await.is_ok());
    assert_eq!(engine.status(), SessionStatus::Idle);
    assert_eq!(engine.last_outcome(), Some(SessionStatus::Aborted));

    let kinds = types(&events.drain());
    assert!(!kinds.contains(&"session_persisted"));
    assert_eq!(kinds.last(), Some(&"session_state_changed"));
}

#[tokio::test]
async fn test_persistence_failure_aborts() {
    let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new(16));
    let engine = engine_with_store(Arc::clone(&store));

    engine.arm("hiphop", "groove-1").await.unwrap();
    engine.start().await.unwrap();
    engine.ingest(full_frame()).await.unwrap();
    let err = engine.stop().await.unwrap().wait().await.unwrap_err();

    assert!(matches!(err, SessionError::PersistenceFailure { .. }));
    assert_eq!(engine.last_outcome(), Some(SessionStatus::Aborted));
    assert!(store.list(None).await.unwrap().is_empty());

    // The engine is usable again
    engine.arm("hiphop", "groove-2").await.unwrap();
}

#[tokio::test]
async fn test_commands_in_wrong_state() {
    let (engine, _store) = engine();
    assert!(matches!(
        engine.start().await,
        Err(SessionError::InvalidTransition { .. })
    ));
    assert!(engine.stop().await.is_err());

    engine.arm("salsa", "basic").await.unwrap();
    assert!(engine.arm("salsa", "basic").await.is_err());
    assert_eq!(engine.status(), SessionStatus::Armed);
}

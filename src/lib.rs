pub mod aggregator;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod expression;
pub mod landmark;
pub mod posture;
pub mod session;
pub mod store;
pub mod verification;

pub use aggregator::{RunningScore, ScoreAggregator, SessionSummary, Trend};
pub use config::DanceflowConfig;
pub use engine::{FinalizeHandle, FrameScore, SessionEngine, SessionEngineBuilder};
pub use error::{
    DanceflowError, EventBusError, FrameError, Result, SessionError, StoreError,
    VerificationError,
};
pub use events::{DanceflowEvent, EventBus, EventDebugger, EventFilter, EventMetrics, EventReceiver};
pub use expression::{ExpressionClassifier, ExpressionLabel, ExpressionResult, ExpressionSignals};
pub use landmark::{normalize, BodyPoint, Landmark, LandmarkFrame, RawLandmarkFrame};
pub use posture::{PostureResult, PostureScorer};
pub use session::{Session, SessionSetup, SessionStateMachine, SessionStatus, Transition};
pub use store::{
    collection_name, open_store, JsonFileSessionStore, MemorySessionStore, SessionStore,
    StoreStats,
};
pub use verification::{MockVerifier, VerificationWorker, Verifier};

use super::{emit, SessionEngine};
use crate::aggregator::RunningScore;
use crate::error::FrameError;
use crate::events::DanceflowEvent;
use crate::expression::ExpressionResult;
use crate::landmark::{normalize, RawLandmarkFrame};
use crate::posture::PostureResult;
use crate::session::SessionFrame;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Result of scoring one frame. At least one of the two signals is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameScore {
    pub posture: Option<PostureResult>,
    pub expression: Option<ExpressionResult>,
    /// Whether the frame was appended to the recording session
    pub recorded: bool,
    pub running: Option<RunningScore>,
}

impl SessionEngine {
    /// Score a raw frame and append it to the session if one is recording.
    ///
    /// Posture and expression are scored independently; a frame missing one
    /// of them still yields a partial result. It fails only when the frame is
    /// malformed or neither signal could be scored, in which case the posture
    /// error is returned.
    pub async fn ingest(&self, raw: RawLandmarkFrame) -> Result<FrameScore, FrameError> {
        let received_at = raw.timestamp;
        let frame = match normalize(raw) {
            Ok(frame) => frame,
            Err(e) => return Err(self.reject(e, received_at).await),
        };

        let posture = self.posture.score(&frame);
        let expression = self.expression.classify(&frame);

        let (posture, expression) = match (posture, expression) {
            (Err(posture_err), Err(expression_err)) => {
                debug!("Expression also unavailable: {}", expression_err);
                return Err(self.reject(posture_err, frame.timestamp()).await);
            }
            (posture, expression) => (
                posture.inspect_err(|e| warn!("Partial frame: {}", e)).ok(),
                expression.inspect_err(|e| debug!("Partial frame: {}", e)).ok(),
            ),
        };

        // Only frames with a posture score are recorded
        let running = match &posture {
            Some(posture) => self.machine.lock().record(SessionFrame {
                posture: posture.clone(),
                expression: expression.clone(),
            }),
            None => None,
        };

        let score = FrameScore {
            posture,
            expression,
            recorded: running.is_some(),
            running,
        };

        emit(
            &self.event_bus,
            DanceflowEvent::FrameScored {
                posture: score.posture.clone(),
                expression: score.expression.clone(),
                recorded: score.recorded,
                running: score.running,
                timestamp: frame.timestamp(),
            },
        )
        .await;

        Ok(score)
    }

    async fn reject(
        &self,
        reason: FrameError,
        timestamp: chrono::DateTime<chrono::Utc>,
    ) -> FrameError {
        emit(
            &self.event_bus,
            DanceflowEvent::FrameRejected {
                reason: reason.clone(),
                timestamp,
            },
        )
        .await;
        reason
    }
}

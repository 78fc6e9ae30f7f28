use crate::error::SessionError;
use crate::session::{Session, SessionFrame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Half-to-half difference in mean overall score that counts as a trend
const TREND_THRESHOLD: f64 = 5.0;

/// Direction of the overall score across a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Improving,
    Steady,
    Declining,
}

/// Persisted outcome of one recorded session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub dance_id: String,
    pub lecture_id: String,
    pub duration_ms: i64,
    pub average_score: u32,
    pub peak_score: u32,
    pub frame_count: usize,
    pub trend: Trend,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// Live statistics kept while frames are appended
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningScore {
    pub frames: usize,
    pub total: u64,
    pub peak: u32,
}

impl RunningScore {
    pub fn record(&mut self, overall: u32) {
        self.frames += 1;
        self.total += overall as u64;
        self.peak = self.peak.max(overall);
    }

    pub fn average(&self) -> Option<f64> {
        (self.frames > 0).then(|| self.total as f64 / self.frames as f64)
    }
}

/// Turns a frozen frame sequence into a [`SessionSummary`]
#[derive(Debug, Clone, Default)]
pub struct ScoreAggregator;

impl ScoreAggregator {
    pub fn new() -> Self {
        Self
    }

    pub fn summarize(&self, session: &Session) -> Result<SessionSummary, SessionError> {
        let frames = session.frames();
        if frames.is_empty() {
            return Err(SessionError::EmptySession);
        }

        let scores: Vec<u32> = frames.iter().map(|f| f.posture.overall).collect();
        let total: u64 = scores.iter().map(|&s| s as u64).sum();
        let average_score = (total as f64 / scores.len() as f64).round() as u32;
        let peak_score = scores.iter().copied().max().unwrap_or(0);

        let ended_at = session.ended_at().unwrap_or_else(Utc::now);
        let duration_ms = (ended_at - session.started_at()).num_milliseconds().max(0);

        let summary = SessionSummary {
            session_id: session.id().to_string(),
            dance_id: session.dance_id().to_string(),
            lecture_id: session.lecture_id().to_string(),
            duration_ms,
            average_score,
            peak_score,
            frame_count: frames.len(),
            trend: trend_of(frames),
            verified: false,
            created_at: Utc::now(),
        };

        debug!(
            "Summarized session {}: avg {}, peak {}, {} frames, {:?}",
            summary.session_id, summary.average_score, summary.peak_score, summary.frame_count, summary.trend
        );

        Ok(summary)
    }
}

fn trend_of(frames: &[SessionFrame]) -> Trend {
    if frames.len() < 2 {
        return Trend::Steady;
    }

    let mid = frames.len() / 2;
    let mean = |slice: &[SessionFrame]| {
        slice.iter().map(|f| f.posture.overall as f64).sum::<f64>() / slice.len() as f64
    };
    let delta = mean(&frames[mid..]) - mean(&frames[..mid]);

    if delta >= TREND_THRESHOLD {
        Trend::Improving
    } else if delta <= -TREND_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Steady
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posture::PostureResult;
    use crate::session::SessionSetup;
    use chrono::Duration;

    fn frame_scoring(overall: u32) -> SessionFrame {
        let score = overall as f64;
        SessionFrame {
            posture: PostureResult {
                spine_score: score,
                shoulder_score: score,
                arm_score: score,
                overall,
                timestamp: Utc::now(),
            },
            expression: None,
        }
    }

    fn session_with(scores: &[u32]) -> Session {
        let started = Utc::now() - Duration::milliseconds(4_000);
        let mut session = Session::new(SessionSetup::new("salsa", "basic-step"), started);
        for &score in scores {
            session.append(frame_scoring(score));
        }
        session.finish(started + Duration::milliseconds(3_500));
        session
    }

    #[test]
    fn test_average_and_peak() {
        let summary = ScoreAggregator::new()
            .summarize(&session_with(&[60, 80, 100]))
            .unwrap();
        assert_eq!(summary.average_score, 80);
        assert_eq!(summary.peak_score, 100);
        assert_eq!(summary.frame_count, 3);
        assert_eq!(summary.duration_ms, 3_500);
        assert!(!summary.verified);
        assert_eq!(summary.dance_id, "salsa");
        assert_eq!(summary.lecture_id, "basic-step");
    }

    #[test]
    fn test_average_rounds_to_nearest() {
        let summary = ScoreAggregator::new()
            .summarize(&session_with(&[70, 71]))
            .unwrap();
        // 70.5 rounds away from zero
        assert_eq!(summary.average_score, 71);

        let summary = ScoreAggregator::new()
            .summarize(&session_with(&[70, 70, 71]))
            .unwrap();
        assert_eq!(summary.average_score, 70);
    }

    #[test]
    fn test_empty_session_fails() {
        let err = ScoreAggregator::new()
            .summarize(&session_with(&[]))
            .unwrap_err();
        assert_eq!(err, SessionError::EmptySession);
    }

    #[test]
    fn test_trend_detection() {
        let aggregator = ScoreAggregator::new();
        assert_eq!(
            aggregator.summarize(&session_with(&[50, 55, 80, 90])).unwrap().trend,
            Trend::Improving
        );
        assert_eq!(
            aggregator.summarize(&session_with(&[90, 85, 60, 50])).unwrap().trend,
            Trend::Declining
        );
        assert_eq!(
            aggregator.summarize(&session_with(&[70, 72, 71, 73])).unwrap().trend,
            Trend::Steady
        );
        assert_eq!(
            aggregator.summarize(&session_with(&[40])).unwrap().trend,
            Trend::Steady
        );
    }

    #[test]
    fn test_running_score() {
        let mut running = RunningScore::default();
        assert_eq!(running.average(), None);
        for score in [60, 80, 100] {
            running.record(score);
        }
        assert_eq!(running.frames, 3);
        assert_eq!(running.peak, 100);
        assert_eq!(running.average(), Some(80.0));
    }
}

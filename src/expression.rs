use crate::config::ExpressionConfig;
use crate::error::FrameError;
use crate::landmark::{Landmark, LandmarkFrame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const DEGENERATE_EPSILON: f64 = 1e-9;

/// Face mesh indices used by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FacePoint {
    Forehead = 10,
    UpperLip = 13,
    LowerLip = 14,
    InnerBrowLeft = 55,
    MouthLeft = 61,
    Chin = 152,
    LeftCheek = 234,
    InnerBrowRight = 285,
    MouthRight = 291,
    RightCheek = 454,
}

impl FacePoint {
    pub fn index(self) -> usize {
        self as usize
    }
}

/// Minimum face mesh size able to address every [`FacePoint`]
pub const MIN_FACE_POINTS: usize = 468;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpressionLabel {
    Neutral,
    Surprise,
    Joy,
    Anger,
}

impl ExpressionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpressionLabel::Neutral => "neutral",
            ExpressionLabel::Surprise => "surprise",
            ExpressionLabel::Joy => "joy",
            ExpressionLabel::Anger => "anger",
        }
    }
}

/// Raw face ratios. A signal is None when its normalising length is degenerate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpressionSignals {
    pub mouth_open: Option<f64>,
    pub smile_width: Option<f64>,
    pub brow_distance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionResult {
    pub label: ExpressionLabel,
    /// Value of the triggering ratio, 0 for Neutral
    pub intensity: f64,
    pub signals: ExpressionSignals,
    pub timestamp: DateTime<Utc>,
}

/// Classifies the face into a single expression label
#[derive(Debug, Clone)]
pub struct ExpressionClassifier {
    config: ExpressionConfig,
}

impl ExpressionClassifier {
    pub fn new(config: ExpressionConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, frame: &LandmarkFrame) -> Result<ExpressionResult, FrameError> {
        let face = frame.face().ok_or(FrameError::MissingFaceLandmarks)?;
        if face.len() < MIN_FACE_POINTS {
            return Err(FrameError::MissingFaceLandmarks);
        }

        let signals = measure(face);
        let (label, intensity) = self.label_for(&signals);

        Ok(ExpressionResult {
            label,
            intensity,
            signals,
            timestamp: frame.timestamp(),
        })
    }

    /// Mouth overrides smile, smile overrides brow. First match wins.
    pub fn label_for(&self, signals: &ExpressionSignals) -> (ExpressionLabel, f64) {
        if let Some(mouth) = signals.mouth_open {
            if mouth > self.config.mouth_open_threshold {
                return (ExpressionLabel::Surprise, mouth);
            }
        }
        if let Some(smile) = signals.smile_width {
            if smile > self.config.smile_width_threshold {
                return (ExpressionLabel::Joy, smile);
            }
        }
        if let Some(brow) = signals.brow_distance {
            if brow < self.config.brow_distance_threshold {
                return (ExpressionLabel::Anger, brow);
            }
        }
        (ExpressionLabel::Neutral, 0.0)
    }
}

fn measure(face: &[Landmark]) -> ExpressionSignals {
    let point = |p: FacePoint| &face[p.index()];

    let face_height = (point(FacePoint::Forehead).y - point(FacePoint::Chin).y).abs();
    let face_width = point(FacePoint::LeftCheek).distance_2d(point(FacePoint::RightCheek));

    let mouth_gap = (point(FacePoint::UpperLip).y - point(FacePoint::LowerLip).y).abs();
    let mouth_width = point(FacePoint::MouthLeft).distance_2d(point(FacePoint::MouthRight));
    let brow_gap = point(FacePoint::InnerBrowLeft).distance_2d(point(FacePoint::InnerBrowRight));

    ExpressionSignals {
        mouth_open: ratio(mouth_gap, face_height),
        smile_width: ratio(mouth_width, face_width),
        brow_distance: ratio(brow_gap, face_width),
    }
}

fn ratio(value: f64, denominator: f64) -> Option<f64> {
    if !denominator.is_finite() || denominator < DEGENERATE_EPSILON {
        return None;
    }
    Some(value / denominator).filter(|r| r.is_finite())
}

use crate::config::PostureConfig;
use crate::error::FrameError;
use crate::landmark::{BodyPoint, LandmarkFrame};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const SPINE_WEIGHT: f64 = 0.40;
const SHOULDER_WEIGHT: f64 = 0.40;
const ARM_WEIGHT: f64 = 0.20;

/// Below this a normalising length is treated as zero
const DEGENERATE_EPSILON: f64 = 1e-9;

/// Posture breakdown for one frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostureResult {
    pub spine_score: f64,
    pub shoulder_score: f64,
    pub arm_score: f64,
    /// floor(spine*0.4 + shoulder*0.4 + arm*0.2), always in [0, 100]
    pub overall: u32,
    pub timestamp: DateTime<Utc>,
}

impl PostureResult {
    /// Build a result from sub-scores, deriving the overall score
    pub fn from_parts(
        spine_score: f64,
        shoulder_score: f64,
        arm_score: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            spine_score,
            shoulder_score,
            arm_score,
            overall: overall_score(spine_score, shoulder_score, arm_score),
            timestamp,
        }
    }
}

/// Weighted overall score, floored and clamped to [0, 100]
pub fn overall_score(spine: f64, shoulder: f64, arm: f64) -> u32 {
    let weighted = spine * SPINE_WEIGHT + shoulder * SHOULDER_WEIGHT + arm * ARM_WEIGHT;
    if !weighted.is_finite() {
        return 0;
    }
    weighted.floor().clamp(0.0, 100.0) as u32
}

/// Scores body alignment from the fixed-index pose points
#[derive(Debug, Clone)]
pub struct PostureScorer {
    config: PostureConfig,
}

impl PostureScorer {
    pub fn new(config: PostureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PostureConfig {
        &self.config
    }

    pub fn score(&self, frame: &LandmarkFrame) -> Result<PostureResult, FrameError> {
        let body = frame.body().ok_or(FrameError::MissingBodyLandmarks)?;

        let nose = body.point(BodyPoint::Nose);
        let left_shoulder = body.point(BodyPoint::LeftShoulder);
        let right_shoulder = body.point(BodyPoint::RightShoulder);
        let left_elbow = body.point(BodyPoint::LeftElbow);
        let right_elbow = body.point(BodyPoint::RightElbow);
        let hip_mid = body
            .point(BodyPoint::LeftHip)
            .midpoint(body.point(BodyPoint::RightHip));
        let shoulder_mid = left_shoulder.midpoint(right_shoulder);

        let torso_height = (shoulder_mid.y - hip_mid.y).abs();
        let shoulder_width = (left_shoulder.x - right_shoulder.x).abs();

        let spine_score = ratio(
            (nose.x - hip_mid.x).abs(),
            torso_height,
        )
        .map(|deviation| falloff(deviation, self.config.spine_max_deviation))
        .unwrap_or(0.0);

        let shoulder_score = ratio((left_shoulder.y - right_shoulder.y).abs(), shoulder_width)
            .map(|tilt| falloff(tilt, self.config.shoulder_max_tilt))
            .unwrap_or(0.0);

        let arm_score = ratio((left_elbow.x - right_elbow.x).abs(), shoulder_width)
            .map(|spread| {
                falloff(
                    (spread - self.config.arm_target_spread).abs(),
                    self.config.arm_spread_tolerance,
                )
            })
            .unwrap_or(0.0);

        Ok(PostureResult::from_parts(
            spine_score,
            shoulder_score,
            arm_score,
            frame.timestamp(),
        ))
    }
}

/// `value / denominator`, or None for a degenerate or non-finite ratio
fn ratio(value: f64, denominator: f64) -> Option<f64> {
    if !denominator.is_finite() || denominator.abs() < DEGENERATE_EPSILON {
        return None;
    }
    Some(value / denominator).filter(|r| r.is_finite())
}

/// 100 at zero distance, 0 at or beyond `limit`
fn falloff(distance: f64, limit: f64) -> f64 {
    if limit <= 0.0 || !distance.is_finite() {
        return 0.0;
    }
    (100.0 * (1.0 - distance / limit)).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landmark::fixtures::*;
    use crate::landmark::{normalize, Landmark};

    fn scorer() -> PostureScorer {
        PostureScorer::new(PostureConfig::default())
    }

    fn score_body(body: Vec<Landmark>) -> PostureResult {
        let frame = normalize(raw_frame(Some(body), None)).unwrap();
        scorer().score(&frame).unwrap()
    }

    #[test]
    fn test_upright_pose_scores_full_marks() {
        let result = score_body(upright_body());
        assert_eq!(result.spine_score, 100.0);
        assert_eq!(result.shoulder_score, 100.0);
        assert!((result.arm_score - 100.0).abs() < 1e-6);
        assert!(result.overall >= 99);
    }

    #[test]
    fn test_overall_matches_weighted_floor() {
        let mut body = upright_body();
        // Lean the head sideways, drop one shoulder, pull the elbows in
        body[BodyPoint::Nose.index()].x = 0.56;
        body[BodyPoint::RightShoulder.index()].y = 0.32;
        body[BodyPoint::LeftElbow.index()].x = 0.62;

        let result = score_body(body);
        let expected =
            (result.spine_score * 0.4 + result.shoulder_score * 0.4 + result.arm_score * 0.2)
                .floor() as u32;
        assert_eq!(result.overall, expected);
        assert!(result.overall <= 100);
        assert!(result.spine_score < 100.0);
        assert!(result.shoulder_score < 100.0);
        assert!(result.arm_score < 100.0);
    }

    #[test]
    fn test_spine_deviation_floors_at_zero() {
        let mut body = upright_body();
        body[BodyPoint::Nose.index()].x = 0.95;
        let result = score_body(body);
        assert_eq!(result.spine_score, 0.0);
    }

    #[test]
    fn test_arm_score_falls_off_both_sides() {
        let mut narrow = upright_body();
        narrow[BodyPoint::LeftElbow.index()].x = 0.55;
        narrow[BodyPoint::RightElbow.index()].x = 0.45;

        let mut wide = upright_body();
        wide[BodyPoint::LeftElbow.index()].x = 0.8;
        wide[BodyPoint::RightElbow.index()].x = 0.2;

        let target = score_body(upright_body()).arm_score;
        assert!(score_body(narrow).arm_score < target);
        assert!(score_body(wide).arm_score < target);
    }

    #[test]
    fn test_degenerate_pose_zeroes_dependent_scores() {
        // Shoulders stacked on the same x: no shoulder width
        let mut body = upright_body();
        body[BodyPoint::LeftShoulder.index()].x = 0.5;
        body[BodyPoint::RightShoulder.index()].x = 0.5;
        let result = score_body(body);
        assert_eq!(result.shoulder_score, 0.0);
        assert_eq!(result.arm_score, 0.0);
        assert_eq!(result.spine_score, 100.0);

        // Shoulders at hip height: no torso height
        let mut body = upright_body();
        body[BodyPoint::LeftShoulder.index()].y = 0.6;
        body[BodyPoint::RightShoulder.index()].y = 0.6;
        let result = score_body(body);
        assert_eq!(result.spine_score, 0.0);
        assert_eq!(result.shoulder_score, 100.0);
    }

    #[test]
    fn test_overflowing_torso_scores_zero_not_nan() {
        // Finite coordinates whose midpoints overflow to infinity
        let mut body = upright_body();
        for point in [
            BodyPoint::LeftShoulder,
            BodyPoint::RightShoulder,
            BodyPoint::LeftHip,
            BodyPoint::RightHip,
        ] {
            body[point.index()].y = 1e308;
        }

        let result = score_body(body);
        assert_eq!(result.spine_score, 0.0);
        assert_eq!(result.shoulder_score, 100.0);
        assert!(result.arm_score.is_finite());
        assert_eq!(result.overall, 59);

        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("null"));
        let parsed: PostureResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, result);
    }

    #[test]
    fn test_non_finite_inputs_never_escape() {
        assert_eq!(ratio(1.0, f64::INFINITY), None);
        assert_eq!(ratio(f64::INFINITY, 1.0), None);
        assert_eq!(ratio(1.0, f64::NAN), None);
        assert_eq!(falloff(f64::NAN, 0.5), 0.0);
        assert_eq!(overall_score(f64::NAN, 100.0, 100.0), 0);
    }

    #[test]
    fn test_missing_body_fails() {
        let frame = normalize(raw_frame(None, Some(neutral_face()))).unwrap();
        assert_eq!(
            scorer().score(&frame).unwrap_err(),
            FrameError::MissingBodyLandmarks
        );
    }

    #[test]
    fn test_overall_score_bounds() {
        for spine in [0.0, 17.5, 50.0, 99.9, 100.0] {
            for shoulder in [0.0, 33.3, 100.0] {
                for arm in [0.0, 66.6, 100.0] {
                    let overall = overall_score(spine, shoulder, arm);
                    assert!(overall <= 100);
                    assert_eq!(
                        overall,
                        (spine * 0.4 + shoulder * 0.4 + arm * 0.2).floor() as u32
                    );
                }
            }
        }
    }
}

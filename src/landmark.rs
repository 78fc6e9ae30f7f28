use crate::error::FrameError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of points in a body pose
pub const BODY_POINT_COUNT: usize = 33;
/// Maximum number of points in a single hand
pub const HAND_POINT_COUNT: usize = 21;

/// A single tracked anatomical point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub z: f64,
    /// Detection confidence reported by the detector (0-1)
    #[serde(default = "default_visibility")]
    pub visibility: f64,
}

fn default_visibility() -> f64 {
    1.0
}

impl Landmark {
    pub fn new(x: f64, y: f64, z: f64, visibility: f64) -> Self {
        Self {
            x,
            y,
            z,
            visibility,
        }
    }

    /// Point on the image plane with full visibility
    pub fn at(x: f64, y: f64) -> Self {
        Self::new(x, y, 0.0, 1.0)
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite() && self.visibility.is_finite()
    }

    /// Euclidean distance to another point on the image plane
    pub fn distance_2d(&self, other: &Landmark) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Midpoint between two points
    pub fn midpoint(&self, other: &Landmark) -> Landmark {
        Landmark {
            x: (self.x + other.x) / 2.0,
            y: (self.y + other.y) / 2.0,
            z: (self.z + other.z) / 2.0,
            visibility: self.visibility.min(other.visibility),
        }
    }
}

/// Fixed anatomical indices of the 33-point body pose
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyPoint {
    Nose = 0,
    LeftShoulder = 11,
    RightShoulder = 12,
    LeftElbow = 13,
    RightElbow = 14,
    LeftWrist = 15,
    RightWrist = 16,
    LeftHip = 23,
    RightHip = 24,
}

impl BodyPoint {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Nose => "nose",
            Self::LeftShoulder => "left_shoulder",
            Self::RightShoulder => "right_shoulder",
            Self::LeftElbow => "left_elbow",
            Self::RightElbow => "right_elbow",
            Self::LeftWrist => "left_wrist",
            Self::RightWrist => "right_wrist",
            Self::LeftHip => "left_hip",
            Self::RightHip => "right_hip",
        }
    }
}

/// Exactly 33 body points
#[derive(Debug, Clone, PartialEq)]
pub struct BodyLandmarks(Box<[Landmark; BODY_POINT_COUNT]>);

impl BodyLandmarks {
    pub fn point(&self, point: BodyPoint) -> &Landmark {
        &self.0[point.index()]
    }

    pub fn as_slice(&self) -> &[Landmark] {
        self.0.as_slice()
    }
}

/// Landmark frame as delivered by the detection engine, before validation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawLandmarkFrame {
    /// Capture time; frames without one are stamped on arrival
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub body: Option<Vec<Landmark>>,
    #[serde(default)]
    pub left_hand: Option<Vec<Landmark>>,
    #[serde(default)]
    pub right_hand: Option<Vec<Landmark>>,
    #[serde(default)]
    pub face: Option<Vec<Landmark>>,
}

/// A validated landmark frame. Only constructed through [`normalize`].
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFrame {
    timestamp: DateTime<Utc>,
    body: Option<BodyLandmarks>,
    left_hand: Option<Vec<Landmark>>,
    right_hand: Option<Vec<Landmark>>,
    face: Option<Vec<Landmark>>,
}

impl LandmarkFrame {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn body(&self) -> Option<&BodyLandmarks> {
        self.body.as_ref()
    }

    pub fn left_hand(&self) -> Option<&[Landmark]> {
        self.left_hand.as_deref()
    }

    pub fn right_hand(&self) -> Option<&[Landmark]> {
        self.right_hand.as_deref()
    }

    pub fn face(&self) -> Option<&[Landmark]> {
        self.face.as_deref()
    }
}

/// Validate a raw frame. Pure: no logging, no clock.
pub fn normalize(raw: RawLandmarkFrame) -> Result<LandmarkFrame, FrameError> {
    let body = non_empty(raw.body);
    let left_hand = non_empty(raw.left_hand);
    let right_hand = non_empty(raw.right_hand);
    let face = non_empty(raw.face);

    if body.is_none() && left_hand.is_none() && right_hand.is_none() && face.is_none() {
        return Err(FrameError::invalid("frame carries no landmark groups"));
    }

    let body = match body {
        Some(points) => {
            check_finite("body", &points)?;
            let count = points.len();
            let fixed: Box<[Landmark; BODY_POINT_COUNT]> =
                points.into_boxed_slice().try_into().map_err(|_| {
                    FrameError::invalid(format!(
                        "body has {} points, expected {}",
                        count, BODY_POINT_COUNT
                    ))
                })?;
            Some(BodyLandmarks(fixed))
        }
        None => None,
    };

    for (group, points) in [("left_hand", &left_hand), ("right_hand", &right_hand)] {
        if let Some(points) = points {
            if points.len() > HAND_POINT_COUNT {
                return Err(FrameError::invalid(format!(
                    "{} has {} points, at most {} allowed",
                    group,
                    points.len(),
                    HAND_POINT_COUNT
                )));
            }
            check_finite(group, points)?;
        }
    }

    if let Some(points) = &face {
        check_finite("face", points)?;
    }

    Ok(LandmarkFrame {
        timestamp: raw.timestamp,
        body,
        left_hand,
        right_hand,
        face,
    })
}

fn non_empty(group: Option<Vec<Landmark>>) -> Option<Vec<Landmark>> {
    group.filter(|points| !points.is_empty())
}

fn check_finite(group: &str, points: &[Landmark]) -> Result<(), FrameError> {
    match points.iter().position(|p| !p.is_finite()) {
        Some(index) => Err(FrameError::invalid(format!(
            "{} point {} has a non-finite coordinate",
            group, index
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use crate::expression::FacePoint;

    pub const FACE_POINT_COUNT: usize = 468;

    /// Upright pose: nose over the hips, level shoulders, elbows 1.6 shoulder widths apart
    pub fn upright_body() -> Vec<Landmark> {
        let mut body = vec![Landmark::at(0.5, 0.5); BODY_POINT_COUNT];
        body[BodyPoint::Nose.index()] = Landmark::at(0.5, 0.2);
        body[BodyPoint::LeftShoulder.index()] = Landmark::at(0.6, 0.3);
        body[BodyPoint::RightShoulder.index()] = Landmark::at(0.4, 0.3);
        body[BodyPoint::LeftElbow.index()] = Landmark::at(0.66, 0.4);
        body[BodyPoint::RightElbow.index()] = Landmark::at(0.34, 0.4);
        body[BodyPoint::LeftHip.index()] = Landmark::at(0.5625, 0.6);
        body[BodyPoint::RightHip.index()] = Landmark::at(0.4375, 0.6);
        body
    }

    /// Face of height 1.0 and width 1.0 with the given signal ratios
    pub fn face_with(mouth_open: f64, smile_width: f64, brow_distance: f64) -> Vec<Landmark> {
        let mut face = vec![Landmark::at(0.5, 0.5); FACE_POINT_COUNT];
        face[FacePoint::Forehead.index()] = Landmark::at(0.5, 0.0);
        face[FacePoint::Chin.index()] = Landmark::at(0.5, 1.0);
        face[FacePoint::LeftCheek.index()] = Landmark::at(0.0, 0.5);
        face[FacePoint::RightCheek.index()] = Landmark::at(1.0, 0.5);
        face[FacePoint::UpperLip.index()] = Landmark::at(0.5, 0.7);
        face[FacePoint::LowerLip.index()] = Landmark::at(0.5, 0.7 + mouth_open);
        face[FacePoint::MouthLeft.index()] = Landmark::at(0.5 - smile_width / 2.0, 0.72);
        face[FacePoint::MouthRight.index()] = Landmark::at(0.5 + smile_width / 2.0, 0.72);
        face[FacePoint::InnerBrowLeft.index()] = Landmark::at(0.5 - brow_distance / 2.0, 0.3);
        face[FacePoint::InnerBrowRight.index()] = Landmark::at(0.5 + brow_distance / 2.0, 0.3);
        face
    }

    pub fn neutral_face() -> Vec<Landmark> {
        face_with(0.02, 0.4, 0.2)
    }

    pub fn raw_frame(body: Option<Vec<Landmark>>, face: Option<Vec<Landmark>>) -> RawLandmarkFrame {
        RawLandmarkFrame {
            timestamp: Utc::now(),
            body,
            left_hand: None,
            right_hand: None,
            face,
        }
    }

    pub fn full_frame() -> RawLandmarkFrame {
        raw_frame(Some(upright_body()), Some(neutral_face()))
    }
}

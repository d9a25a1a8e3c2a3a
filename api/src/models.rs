//! Shared data models used across modules
//!
//! Wire names match the JSON the browser client posts to `/predict`:
//! `{"frame_data": [{"frame_id": 0, "face_landmarks": [...], ...}]}`.

use serde::{Deserialize, Serialize};

/// Face, left hand and right hand point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LandmarkPoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl LandmarkPoint {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Body pose point, carries the extractor's visibility score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PosePoint {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub visibility: f32,
}

impl PosePoint {
    pub fn new(x: f32, y: f32, z: f32, visibility: f32) -> Self {
        Self { x, y, z, visibility }
    }
}

/// Raw per-frame output of a landmark extractor. A `None` group was not
/// detected in the frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameLandmarks {
    #[serde(default)]
    pub face: Option<Vec<LandmarkPoint>>,
    #[serde(default)]
    pub pose: Option<Vec<PosePoint>>,
    #[serde(default)]
    pub left_hand: Option<Vec<LandmarkPoint>>,
    #[serde(default)]
    pub right_hand: Option<Vec<LandmarkPoint>>,
}

/// One sampled video frame: a sequence position plus four landmark groups.
/// Empty groups mean "not detected"; zero-filling happens at flatten time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameRecord {
    pub frame_id: u32,
    #[serde(default)]
    pub face_landmarks: Vec<LandmarkPoint>,
    #[serde(default)]
    pub pose_landmarks: Vec<PosePoint>,
    #[serde(default)]
    pub left_hand_landmarks: Vec<LandmarkPoint>,
    #[serde(default)]
    pub right_hand_landmarks: Vec<LandmarkPoint>,
}

impl FrameRecord {
    /// Frame with every landmark group empty
    pub fn empty(frame_id: u32) -> Self {
        Self {
            frame_id,
            ..Default::default()
        }
    }

    /// Build a record from extractor output, copying each present group in
    /// order and leaving absent groups empty.
    pub fn from_landmarks(frame_id: u32, landmarks: FrameLandmarks) -> Self {
        Self {
            frame_id,
            face_landmarks: landmarks.face.unwrap_or_default(),
            pose_landmarks: landmarks.pose.unwrap_or_default(),
            left_hand_landmarks: landmarks.left_hand.unwrap_or_default(),
            right_hand_landmarks: landmarks.right_hand.unwrap_or_default(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.face_landmarks.is_empty()
            && self.pose_landmarks.is_empty()
            && self.left_hand_landmarks.is_empty()
            && self.right_hand_landmarks.is_empty()
    }
}

/// Temporally ordered frames of one sample
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSequence {
    pub frame_data: Vec<FrameRecord>,
}

impl FrameSequence {
    pub fn new(frame_data: Vec<FrameRecord>) -> Self {
        Self { frame_data }
    }

    pub fn len(&self) -> usize {
        self.frame_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frame_data.is_empty()
    }
}

/// Fixed point count per landmark group, dictated by the extractor model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandmarkGroupSizes {
    pub face: usize,
    pub pose: usize,
    pub left_hand: usize,
    pub right_hand: usize,
}

/// Values per point
pub const POINT_DIMS: usize = 3;
/// Values per pose point (x, y, z, visibility)
pub const POSE_POINT_DIMS: usize = 4;

impl Default for LandmarkGroupSizes {
    fn default() -> Self {
        Self {
            face: 468,
            pose: 33,
            left_hand: 21,
            right_hand: 21,
        }
    }
}

impl LandmarkGroupSizes {
    pub fn pose_len(&self) -> usize {
        self.pose * POSE_POINT_DIMS
    }

    pub fn face_len(&self) -> usize {
        self.face * POINT_DIMS
    }

    pub fn left_hand_len(&self) -> usize {
        self.left_hand * POINT_DIMS
    }

    pub fn right_hand_len(&self) -> usize {
        self.right_hand * POINT_DIMS
    }

    /// Length of one flattened frame vector (1662 with the default sizes)
    pub fn feature_len(&self) -> usize {
        self.pose_len() + self.face_len() + self.left_hand_len() + self.right_hand_len()
    }
}

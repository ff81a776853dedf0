// src/joints.rs - Joint state model, store and skeleton topology
use nalgebra::Vector2;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const SPINE_BASE: &str = "SpineBase";
pub const SPINE_MID: &str = "SpineMid";
pub const SPINE_SHOULDER: &str = "SpineShoulder";
pub const NECK: &str = "Neck";
pub const HEAD: &str = "Head";
pub const SHOULDER_LEFT: &str = "ShoulderLeft";
pub const ELBOW_LEFT: &str = "ElbowLeft";
pub const WRIST_LEFT: &str = "WristLeft";
pub const HAND_LEFT: &str = "HandLeft";
pub const SHOULDER_RIGHT: &str = "ShoulderRight";
pub const ELBOW_RIGHT: &str = "ElbowRight";
pub const WRIST_RIGHT: &str = "WristRight";
pub const HAND_RIGHT: &str = "HandRight";
pub const HIP_LEFT: &str = "HipLeft";
pub const KNEE_LEFT: &str = "KneeLeft";
pub const ANKLE_LEFT: &str = "AnkleLeft";
pub const FOOT_LEFT: &str = "FootLeft";
pub const HIP_RIGHT: &str = "HipRight";
pub const KNEE_RIGHT: &str = "KneeRight";
pub const ANKLE_RIGHT: &str = "AnkleRight";
pub const FOOT_RIGHT: &str = "FootRight";

/// Sensor confidence for a joint's reported position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackingState {
    NotTracked = 0,
    Inferred = 1,
    Tracked = 2,
}

impl TrackingState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::NotTracked),
            1 => Some(Self::Inferred),
            2 => Some(Self::Tracked),
            _ => None,
        }
    }
}

/// Hand pose classification reported for the two hand joints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandState {
    Unknown = 0,
    NotTracked = 1,
    Open = 2,
    Closed = 3,
    Lasso = 4,
}

impl HandState {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Unknown),
            1 => Some(Self::NotTracked),
            2 => Some(Self::Open),
            3 => Some(Self::Closed),
            4 => Some(Self::Lasso),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Joint {
    pub raw_position: Vector2<f64>,
    pub tracking_state: TrackingState,
    pub hand_state: Option<HandState>,
    /// Store frame in which this joint last received a position.
    pub last_frame: u64,
}

impl Joint {
    fn new(raw_position: Vector2<f64>, frame: u64) -> Self {
        Self {
            raw_position,
            tracking_state: TrackingState::NotTracked,
            hand_state: None,
            last_frame: frame,
        }
    }

    pub fn is_tracked(&self) -> bool {
        self.tracking_state == TrackingState::Tracked
    }

    pub fn is_closed(&self) -> bool {
        self.hand_state == Some(HandState::Closed)
    }
}

/// Latest known state per joint name.
///
/// Only `FrameIngestor` writes to the store; everything downstream reads it
/// through shared references. Joints appear the first time a position
/// payload names them and are never removed.
#[derive(Debug, Default, Clone)]
pub struct JointStateStore {
    joints: HashMap<String, Joint>,
    frame: u64,
}

impl JointStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Joint> {
        self.joints.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.joints.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Joint)> {
        self.joints.iter().map(|(name, joint)| (name.as_str(), joint))
    }

    /// Number of frames applied so far.
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Frames elapsed since `name` last received a position.
    pub fn frames_since_update(&self, name: &str) -> Option<u64> {
        self.joints
            .get(name)
            .map(|joint| self.frame.saturating_sub(joint.last_frame))
    }

    /// A joint is stale once the sensor has delivered more than
    /// `max_age` frames without mentioning it. `None` disables expiry.
    pub fn is_stale(&self, name: &str, max_age: Option<u64>) -> bool {
        match (max_age, self.frames_since_update(name)) {
            (Some(max_age), Some(age)) => age > max_age,
            _ => false,
        }
    }

    /// Joint that is present and not stale.
    pub fn live(&self, name: &str, max_age: Option<u64>) -> Option<&Joint> {
        self.get(name).filter(|_| !self.is_stale(name, max_age))
    }

    /// Joint that is present, not stale and reported as `Tracked`.
    pub fn tracked(&self, name: &str, max_age: Option<u64>) -> Option<&Joint> {
        self.live(name, max_age).filter(|joint| joint.is_tracked())
    }

    pub(crate) fn begin_frame(&mut self) {
        self.frame += 1;
    }

    pub(crate) fn set_raw_position(&mut self, name: &str, position: Vector2<f64>) {
        let frame = self.frame;
        match self.joints.get_mut(name) {
            Some(joint) => {
                joint.raw_position = position;
                joint.last_frame = frame;
            }
            None => {
                self.joints.insert(name.to_string(), Joint::new(position, frame));
            }
        }
    }

    pub(crate) fn joint_mut(&mut self, name: &str) -> Option<&mut Joint> {
        self.joints.get_mut(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb(pub u8, pub u8, pub u8);

/// Connection between two joints, drawn as one skeleton segment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bone {
    pub start: &'static str,
    pub end: &'static str,
    pub color: Rgb,
    pub label: &'static str,
}

const TORSO: Rgb = Rgb(235, 235, 235);
const LEFT_ARM: Rgb = Rgb(70, 130, 240);
const RIGHT_ARM: Rgb = Rgb(240, 90, 70);
const LEFT_LEG: Rgb = Rgb(80, 200, 160);
const RIGHT_LEG: Rgb = Rgb(240, 190, 60);

const fn bone(start: &'static str, end: &'static str, color: Rgb, label: &'static str) -> Bone {
    Bone { start, end, color, label }
}

pub static SKELETON_BONES: [Bone; 20] = [
    // Torso
    bone(HEAD, NECK, TORSO, "Head"),
    bone(NECK, SPINE_SHOULDER, TORSO, "Neck"),
    bone(SPINE_SHOULDER, SPINE_MID, TORSO, "Upper Spine"),
    bone(SPINE_MID, SPINE_BASE, TORSO, "Lower Spine"),
    bone(SPINE_SHOULDER, SHOULDER_LEFT, TORSO, "Left Clavicle"),
    bone(SPINE_SHOULDER, SHOULDER_RIGHT, TORSO, "Right Clavicle"),
    bone(SPINE_BASE, HIP_LEFT, TORSO, "Left Pelvis"),
    bone(SPINE_BASE, HIP_RIGHT, TORSO, "Right Pelvis"),
    // Arms
    bone(SHOULDER_LEFT, ELBOW_LEFT, LEFT_ARM, "Left Upper Arm"),
    bone(ELBOW_LEFT, WRIST_LEFT, LEFT_ARM, "Left Forearm"),
    bone(WRIST_LEFT, HAND_LEFT, LEFT_ARM, "Left Hand"),
    bone(SHOULDER_RIGHT, ELBOW_RIGHT, RIGHT_ARM, "Right Upper Arm"),
    bone(ELBOW_RIGHT, WRIST_RIGHT, RIGHT_ARM, "Right Forearm"),
    bone(WRIST_RIGHT, HAND_RIGHT, RIGHT_ARM, "Right Hand"),
    // Legs
    bone(HIP_LEFT, KNEE_LEFT, LEFT_LEG, "Left Thigh"),
    bone(KNEE_LEFT, ANKLE_LEFT, LEFT_LEG, "Left Shin"),
    bone(ANKLE_LEFT, FOOT_LEFT, LEFT_LEG, "Left Foot"),
    bone(HIP_RIGHT, KNEE_RIGHT, RIGHT_LEG, "Right Thigh"),
    bone(KNEE_RIGHT, ANKLE_RIGHT, RIGHT_LEG, "Right Shin"),
    bone(ANKLE_RIGHT, FOOT_RIGHT, RIGHT_LEG, "Right Foot"),
];

/// Every joint name that appears in the skeleton topology.
pub static SKELETON_JOINTS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    SKELETON_BONES
        .iter()
        .flat_map(|bone| [bone.start, bone.end])
        .collect()
});

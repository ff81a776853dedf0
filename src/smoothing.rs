// src/smoothing.rs - Per-tick interpolation of mapped joint positions
use nalgebra::Vector2;
use std::collections::HashMap;
use tracing::debug;

use crate::config::SmoothingConfig;
use crate::joints::Bone;

#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedJoint {
    pub smoothed_position: Vector2<f64>,
    /// Smoothed position before the most recent advance.
    pub previous_position: Vector2<f64>,
    pub target: Vector2<f64>,
    previous_target: Vector2<f64>,
}

impl SmoothedJoint {
    fn new(target: Vector2<f64>) -> Self {
        Self {
            smoothed_position: target,
            previous_position: target,
            target,
            previous_target: target,
        }
    }

    /// Movement of the raw target between the last two frames.
    pub fn target_delta(&self) -> Vector2<f64> {
        self.target - self.previous_target
    }
}

/// Camera/stage offset that leans toward a moving hand.
#[derive(Debug, Clone)]
pub struct PanFollower {
    offset: Vector2<f64>,
    goal: Vector2<f64>,
    speed: f64,
    lerp_rate: f64,
    max_deviation: f64,
}

impl PanFollower {
    pub fn new(speed: f64, lerp_rate: f64, max_deviation: f64) -> Self {
        Self {
            offset: Vector2::zeros(),
            goal: Vector2::zeros(),
            speed,
            lerp_rate,
            max_deviation,
        }
    }

    pub fn offset(&self) -> Vector2<f64> {
        self.offset
    }

    /// Hand velocity for the current frame; `None` recentres the pan.
    pub fn set_velocity(&mut self, velocity: Option<Vector2<f64>>) {
        self.goal = match velocity {
            Some(v) => self.bound(v * self.speed),
            None => Vector2::zeros(),
        };
    }

    fn advance(&mut self, dt: f64) {
        let t = lerp_factor(self.lerp_rate, dt);
        self.offset = self.bound(self.offset.lerp(&self.goal, t));
    }

    fn bound(&self, v: Vector2<f64>) -> Vector2<f64> {
        let max = self.max_deviation;
        Vector2::new(v.x.clamp(-max, max), v.y.clamp(-max, max))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneSegment<'a> {
    pub bone: &'a Bone,
    pub start: Vector2<f64>,
    pub end: Vector2<f64>,
}

fn lerp_factor(rate: f64, dt: f64) -> f64 {
    let t = rate * dt;
    if t.is_nan() {
        0.0
    } else {
        t.clamp(0.0, 1.0)
    }
}

pub struct SmoothingEngine {
    joints: HashMap<String, SmoothedJoint>,
    lerp_rate: f64,
    pan: PanFollower,
}

impl SmoothingEngine {
    pub fn new(config: &SmoothingConfig) -> Self {
        Self {
            joints: HashMap::new(),
            lerp_rate: config.lerp_rate,
            pan: PanFollower::new(config.pan_speed, config.pan_lerp_rate, config.pan_max_deviation),
        }
    }

    /// Record a new mapped target. A joint's first target is adopted as its
    /// smoothed position, so nothing ever slides in from the screen corner.
    pub fn set_target(&mut self, name: &str, target: Vector2<f64>) {
        match self.joints.get_mut(name) {
            Some(joint) => {
                joint.previous_target = joint.target;
                joint.target = target;
            }
            None => {
                self.joints.insert(name.to_string(), SmoothedJoint::new(target));
            }
        }
    }

    /// Move a joint's target without registering it as movement. Used when
    /// the viewport changes, so a rescale never reads as hand velocity.
    pub fn rebase_target(&mut self, name: &str, target: Vector2<f64>) {
        match self.joints.get_mut(name) {
            Some(joint) => {
                joint.previous_target = target;
                joint.target = target;
            }
            None => {
                self.joints.insert(name.to_string(), SmoothedJoint::new(target));
            }
        }
    }

    pub fn set_pan_velocity(&mut self, velocity: Option<Vector2<f64>>) {
        self.pan.set_velocity(velocity);
    }

    /// Step every joint toward its target by `lerp_rate * dt`, clamped to [0, 1].
    pub fn advance(&mut self, dt: f64) {
        let t = lerp_factor(self.lerp_rate, dt);
        for joint in self.joints.values_mut() {
            joint.previous_position = joint.smoothed_position;
            joint.smoothed_position = joint.smoothed_position.lerp(&joint.target, t);
        }
        self.pan.advance(dt);
    }

    pub fn get(&self, name: &str) -> Option<&SmoothedJoint> {
        self.joints.get(name)
    }

    pub fn position(&self, name: &str) -> Option<Vector2<f64>> {
        self.joints.get(name).map(|joint| joint.smoothed_position)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SmoothedJoint)> {
        self.joints.iter().map(|(name, joint)| (name.as_str(), joint))
    }

    pub fn pan_offset(&self) -> Vector2<f64> {
        self.pan.offset()
    }

    /// Resolve bones to smoothed endpoints, skipping any with a missing joint.
    pub fn bone_segments<'a>(&self, bones: &'a [Bone]) -> Vec<BoneSegment<'a>> {
        bones
            .iter()
            .filter_map(|bone| match (self.position(bone.start), self.position(bone.end)) {
                (Some(start), Some(end)) => Some(BoneSegment { bone, start, end }),
                _ => {
                    debug!("Skipping bone '{}': joint missing", bone.label);
                    None
                }
            })
            .collect()
    }
}

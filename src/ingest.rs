// src/ingest.rs - Decodes sensor frames and applies them to the joint store
use nalgebra::Vector2;
use serde::de::IgnoredAny;
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::joints::{HandState, JointStateStore, TrackingState, HAND_LEFT, HAND_RIGHT, SKELETON_JOINTS};

/// A field that either decodes as `T` or is kept as a marker that it was
/// present but malformed, so one bad entry never rejects the whole payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Lenient<T> {
    Valid(T),
    Malformed(IgnoredAny),
}

impl<T> Lenient<T> {
    fn into_option(self) -> Option<T> {
        match self {
            Lenient::Valid(value) => Some(value),
            Lenient::Malformed(_) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(transparent)]
struct PositionsPayload(HashMap<String, Lenient<Vec<f64>>>);

#[derive(Debug, Default, Deserialize)]
struct StatePayload {
    #[serde(default, rename = "Joints")]
    joints: Option<Lenient<HashMap<String, Lenient<JointStateEntry>>>>,
    #[serde(default, rename = "HandLeftState")]
    hand_left_state: Option<Lenient<i64>>,
    #[serde(default, rename = "HandRightState")]
    hand_right_state: Option<Lenient<i64>>,
}

#[derive(Debug, Deserialize)]
struct JointStateEntry {
    #[serde(rename = "TrackingState")]
    tracking_state: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub frames: u64,
    pub positions_applied: u64,
    pub fields_skipped: u64,
}

/// Sole writer of the joint store.
#[derive(Debug, Default)]
pub struct FrameIngestor {
    stats: IngestStats,
}

impl FrameIngestor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Apply one frame. Positions are written first so that tracking and hand
    /// states from the same frame land on joints that already exist. Nothing
    /// here fails; bad fields are skipped and prior state is left untouched.
    pub fn ingest(&mut self, store: &mut JointStateStore, state_payload: &str, position_payload: &str) {
        let positions = self.decode_positions(position_payload);
        let state = self.decode_state(state_payload);

        store.begin_frame();
        self.stats.frames += 1;

        for (name, entry) in positions {
            match entry.into_option() {
                Some(coords) if coords.len() >= 2 => {
                    if !store.contains(&name) && !SKELETON_JOINTS.contains(name.as_str()) {
                        debug!("Tracking non-skeleton joint '{}'", name);
                    }
                    store.set_raw_position(&name, Vector2::new(coords[0], coords[1]));
                    self.stats.positions_applied += 1;
                }
                _ => self.skip(format_args!("position for '{}'", name)),
            }
        }

        let Some(state) = state else {
            return;
        };

        match state.joints.map(Lenient::into_option) {
            Some(Some(joints)) => {
                for (name, entry) in joints {
                    let code = entry.into_option().map(|e| e.tracking_state);
                    match code.and_then(TrackingState::from_code) {
                        Some(tracking_state) => match store.joint_mut(&name) {
                            Some(joint) => joint.tracking_state = tracking_state,
                            None => self.skip(format_args!("state for unseen joint '{}'", name)),
                        },
                        None => self.skip(format_args!("tracking state for '{}'", name)),
                    }
                }
            }
            Some(None) => self.skip(format_args!("'Joints' section")),
            None => debug!("State payload has no 'Joints' section"),
        }

        self.apply_hand_state(store, HAND_LEFT, state.hand_left_state);
        self.apply_hand_state(store, HAND_RIGHT, state.hand_right_state);
    }

    fn apply_hand_state(&mut self, store: &mut JointStateStore, joint_name: &str, field: Option<Lenient<i64>>) {
        let Some(field) = field else {
            return;
        };
        match field.into_option().and_then(HandState::from_code) {
            Some(hand_state) => match store.joint_mut(joint_name) {
                Some(joint) => joint.hand_state = Some(hand_state),
                None => self.skip(format_args!("hand state for unseen joint '{}'", joint_name)),
            },
            None => self.skip(format_args!("hand state for '{}'", joint_name)),
        }
    }

    fn decode_positions(&mut self, payload: &str) -> HashMap<String, Lenient<Vec<f64>>> {
        if payload.trim().is_empty() {
            return HashMap::new();
        }
        match serde_json::from_str::<PositionsPayload>(payload) {
            Ok(PositionsPayload(positions)) => positions,
            Err(e) => {
                self.skip(format_args!("position payload ({})", e));
                HashMap::new()
            }
        }
    }

    fn decode_state(&mut self, payload: &str) -> Option<StatePayload> {
        if payload.trim().is_empty() {
            return None;
        }
        match serde_json::from_str::<StatePayload>(payload) {
            Ok(state) => Some(state),
            Err(e) => {
                self.skip(format_args!("state payload ({})", e));
                None
            }
        }
    }

    fn skip(&mut self, what: std::fmt::Arguments<'_>) {
        self.stats.fields_skipped += 1;
        debug!("Skipping malformed {}", what);
    }
}

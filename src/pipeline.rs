// src/pipeline.rs - Owns the joint store and drives every stage per tick
use nalgebra::Vector2;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::config::PipelineConfig;
use crate::control::{ControlMapper, ControlState, InstrumentCatalog};
use crate::gesture::{GestureDetector, GestureEvent, Hand};
use crate::ingest::{FrameIngestor, IngestStats};
use crate::joints::{JointStateStore, TrackingState, SKELETON_BONES};
use crate::mapping::CoordinateMapper;
use crate::smoothing::{BoneSegment, SmoothingEngine};
use crate::transport::TransportEvent;

/// Ticks without a new frame after which the pan goal is released.
const PAN_HOLD_TICKS: u64 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Waiting,
    Connected,
    Disconnected,
}

/// Everything the visual and audio front ends read after a tick.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub tick: u64,
    pub elapsed: f64,
    /// Whether a new sensor frame was folded in on this tick.
    pub new_frame: bool,
    pub control: ControlState,
    pub events: Vec<GestureEvent>,
    pub pan_offset: Vector2<f64>,
}

/// The tracking pipeline.
///
/// Two entry points change state: `ingest`/`handle_event` when a frame
/// arrives and `tick` on the render cadence. Both take `&mut self`, so a
/// tick always sees either the whole of a frame or none of it. Callers that
/// receive frames on another thread should hand them over through a channel
/// (see `transport`) rather than share the pipeline.
pub struct Pipeline {
    store: JointStateStore,
    ingestor: FrameIngestor,
    mapper: CoordinateMapper,
    smoothing: SmoothingEngine,
    gestures: GestureDetector,
    control: ControlMapper,
    catalog: InstrumentCatalog,
    mapped: HashMap<String, Vector2<f64>>,
    mapped_frame: u64,
    viewport_dirty: bool,
    pan_joint: String,
    stale_after: Option<u64>,
    connection: ConnectionState,
    control_state: ControlState,
    tick: u64,
    ticks_without_frame: u64,
    elapsed: f64,
}

impl Pipeline {
    pub fn new(config: &PipelineConfig) -> Self {
        let catalog = InstrumentCatalog::from_config(&config.instruments);
        Self::with_catalog(config, catalog)
    }

    pub fn with_catalog(config: &PipelineConfig, mut catalog: InstrumentCatalog) -> Self {
        if let Some(key) = &config.control.default_instrument {
            catalog.select(key);
        }
        let control = ControlMapper::new(config.control.clone());
        let control_state = control.compute(None, None, catalog.active_key());

        Self {
            store: JointStateStore::new(),
            ingestor: FrameIngestor::new(),
            mapper: CoordinateMapper::new(&config.mapping),
            smoothing: SmoothingEngine::new(&config.smoothing),
            gestures: GestureDetector::new(config.regions.clone()),
            control,
            catalog,
            mapped: HashMap::new(),
            mapped_frame: 0,
            viewport_dirty: false,
            pan_joint: config.smoothing.pan_joint.clone(),
            stale_after: config.stale_after_frames,
            connection: ConnectionState::Waiting,
            control_state,
            tick: 0,
            ticks_without_frame: 0,
            elapsed: 0.0,
        }
    }

    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { peer } => {
                info!("Sensor stream connected ({})", peer);
                self.connection = ConnectionState::Connected;
            }
            TransportEvent::Frame(frame) => self.ingest(&frame.state, &frame.positions),
            TransportEvent::Disconnected { reason } => {
                warn!("Sensor stream closed: {}; holding last known joints", reason);
                self.connection = ConnectionState::Disconnected;
            }
            TransportEvent::Error(e) => warn!("Sensor stream error: {}", e),
        }
    }

    pub fn ingest(&mut self, state_payload: &str, position_payload: &str) {
        self.ingestor.ingest(&mut self.store, state_payload, position_payload);
    }

    /// Resize notification from the renderer.
    pub fn resize(&mut self, width: f64, height: f64) {
        self.mapper.on_resize(width, height);
        self.viewport_dirty = true;
    }

    pub fn tick(&mut self, dt: f64) -> TickOutput {
        let new_frame = self.store.frame() != self.mapped_frame;
        if new_frame || self.viewport_dirty {
            self.retarget(new_frame);
        }
        if new_frame {
            self.ticks_without_frame = 0;
        } else {
            self.ticks_without_frame += 1;
            if self.ticks_without_frame == PAN_HOLD_TICKS {
                self.smoothing.set_pan_velocity(None);
            }
        }

        self.smoothing.advance(dt);

        let mut events = Vec::new();
        for hand in Hand::ALL {
            let joint = self.store.live(hand.joint_name(), self.stale_after);
            let screen = joint
                .filter(|j| j.tracking_state != TrackingState::NotTracked)
                .and_then(|_| self.smoothing.position(hand.joint_name()));
            events.extend(self.gestures.evaluate_hand(hand, joint, screen));
        }

        for event in &events {
            if let GestureEvent::RegionPressed { region, .. } = event {
                if self.catalog.contains(region) {
                    self.catalog.select(region);
                }
            }
        }

        let pitch_hand = self.tracked_position(self.control.pitch_joint());
        let volume_hand = self.tracked_position(self.control.volume_joint());
        self.control_state = self.control.compute(pitch_hand, volume_hand, self.catalog.active_key());
        self.catalog.apply(&self.control_state);

        self.tick += 1;
        self.elapsed += dt.max(0.0);

        TickOutput {
            tick: self.tick,
            elapsed: self.elapsed,
            new_frame,
            control: self.control_state.clone(),
            events,
            pan_offset: self.smoothing.pan_offset(),
        }
    }

    fn retarget(&mut self, new_frame: bool) {
        let rescaled = self.viewport_dirty;
        self.mapper.map_frame(&self.store, &mut self.mapped);
        for (name, target) in &self.mapped {
            if rescaled {
                self.smoothing.rebase_target(name, *target);
            } else {
                self.smoothing.set_target(name, *target);
            }
        }

        if rescaled {
            // Old and new targets are in different scales; no velocity this frame
            debug!("Re-targeting after viewport change");
            self.smoothing.set_pan_velocity(None);
        } else if new_frame {
            let velocity = self
                .store
                .tracked(&self.pan_joint, self.stale_after)
                .and_then(|_| self.smoothing.get(&self.pan_joint))
                .map(|joint| joint.target_delta());
            self.smoothing.set_pan_velocity(velocity);
        }

        self.mapped_frame = self.store.frame();
        self.viewport_dirty = false;
    }

    fn tracked_position(&self, name: &str) -> Option<Vector2<f64>> {
        self.store
            .tracked(name, self.stale_after)
            .and_then(|_| self.smoothing.position(name))
    }

    pub fn store(&self) -> &JointStateStore {
        &self.store
    }

    pub fn smoothing(&self) -> &SmoothingEngine {
        &self.smoothing
    }

    pub fn smoothed_position(&self, name: &str) -> Option<Vector2<f64>> {
        self.smoothing.position(name)
    }

    pub fn bone_segments(&self) -> Vec<BoneSegment<'static>> {
        self.smoothing.bone_segments(&SKELETON_BONES)
    }

    pub fn gestures(&self) -> &GestureDetector {
        &self.gestures
    }

    pub fn control_state(&self) -> &ControlState {
        &self.control_state
    }

    pub fn catalog(&self) -> &InstrumentCatalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut InstrumentCatalog {
        &mut self.catalog
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn ingest_stats(&self) -> IngestStats {
        self.ingestor.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AxisCalibration, ControlConfig, MappingConfig};
    use crate::gesture::ScreenRegion;
    use crate::joints::{HAND_LEFT, HAND_RIGHT, SPINE_BASE};
    use crate::transport::FrameMessage;

    fn config() -> PipelineConfig {
        PipelineConfig {
            mapping: MappingConfig {
                sensitivity: 1.0,
                viewport_width: 512.0,
                viewport_height: 424.0,
                ..MappingConfig::default()
            },
            control: ControlConfig {
                pitch_axis: AxisCalibration { origin: 424.0, length: 400.0 },
                volume_axis: AxisCalibration { origin: 0.0, length: 512.0 },
                ..ControlConfig::default()
            },
            regions: vec![ScreenRegion::new("organ", 0.0, 0.0, 100.0, 100.0)],
            ..PipelineConfig::default()
        }
    }

    const POSITIONS: &str = r#"{"SpineBase": [256, 0], "HandRight": [300, 200], "HandLeft": [100, 100]}"#;
    const TRACKED: &str = r#"{"Joints": {"SpineBase": {"TrackingState": 2},
        "HandRight": {"TrackingState": 2}, "HandLeft": {"TrackingState": 2}}, "HandRightState": 2}"#;
    const LOST: &str = r#"{"Joints": {"SpineBase": {"TrackingState": 2},
        "HandRight": {"TrackingState": 0}, "HandLeft": {"TrackingState": 0}}}"#;

    #[test]
    fn test_tracked_hands_drive_controls() {
        let mut pipeline = Pipeline::new(&config());
        pipeline.ingest(TRACKED, POSITIONS);
        let out = pipeline.tick(1.0 / 60.0);

        assert!(out.new_frame);
        assert!(out.control.pitch_tracked);
        assert!(out.control.volume_tracked);
        // Right hand sits 200 above the base line: half way up the pitch axis
        assert!((out.control.pitch - 550.0).abs() < 1e-9);
        assert!(out.control.volume_db > -40.0);
        assert_eq!(out.control.instrument.as_deref(), Some("theremin"));
    }

    #[test]
    fn test_losing_tracking_drops_to_minimum_next_tick() {
        let mut pipeline = Pipeline::new(&config());
        pipeline.ingest(TRACKED, POSITIONS);
        pipeline.tick(1.0 / 60.0);

        pipeline.ingest(LOST, POSITIONS);
        let out = pipeline.tick(1.0 / 60.0);
        assert_eq!(out.control.pitch, 220.0);
        assert_eq!(out.control.volume_db, -40.0);
        assert!(!out.control.pitch_tracked);
    }

    #[test]
    fn test_idle_store_ticks_safely() {
        let mut pipeline = Pipeline::new(&config());
        for _ in 0..5 {
            let out = pipeline.tick(1.0 / 60.0);
            assert!(!out.new_frame);
            assert!(out.events.is_empty());
            assert_eq!(out.control.pitch, 220.0);
        }
        assert!(pipeline.store().is_empty());
    }

    #[test]
    fn test_disconnect_keeps_last_known_state() {
        let mut pipeline = Pipeline::new(&config());
        pipeline.handle_event(TransportEvent::Connected { peer: "test".to_string() });
        pipeline.handle_event(TransportEvent::Frame(FrameMessage {
            event: "bodyData".to_string(),
            state: TRACKED.to_string(),
            positions: POSITIONS.to_string(),
        }));
        let first = pipeline.tick(1.0 / 60.0);

        pipeline.handle_event(TransportEvent::Error("reset by peer".to_string()));
        pipeline.handle_event(TransportEvent::Disconnected { reason: "closed".to_string() });
        assert_eq!(pipeline.connection(), ConnectionState::Disconnected);

        let later = pipeline.tick(1.0 / 60.0);
        assert!(!later.new_frame);
        assert_eq!(later.control.pitch, first.control.pitch);
        assert!(pipeline.store().get(HAND_RIGHT).is_some());
    }

    #[test]
    fn test_multiple_frames_between_ticks() {
        let mut pipeline = Pipeline::new(&config());
        pipeline.ingest(TRACKED, POSITIONS);
        pipeline.ingest(TRACKED, r#"{"SpineBase": [256, 0], "HandRight": [300, 300], "HandLeft": [100, 100]}"#);
        pipeline.tick(1.0);

        let hand = pipeline.smoothed_position(HAND_RIGHT).unwrap();
        assert!((hand.y - 124.0).abs() < 1e-9);
        assert!(pipeline.smoothed_position(SPINE_BASE).is_some());
    }

    #[test]
    fn test_press_on_region_selects_instrument() {
        let mut config = config();
        config.mapping.mode = crate::mapping::MappingMode::SkeletonOverlay { anchor_x: 50.0, anchor_y: 50.0 };
        let mut pipeline = Pipeline::new(&config);

        // Left hand sits on the spine base, which the overlay places at (50, 50)
        let positions = r#"{"SpineBase": [200, 200], "HandLeft": [200, 200]}"#;
        let open = r#"{"Joints": {"HandLeft": {"TrackingState": 2}}, "HandLeftState": 2}"#;
        let closed = r#"{"Joints": {"HandLeft": {"TrackingState": 2}}, "HandLeftState": 3}"#;

        pipeline.ingest(open, positions);
        let out = pipeline.tick(1.0 / 60.0);
        assert_eq!(
            out.events,
            vec![GestureEvent::RegionEntered { hand: Hand::Left, region: "organ".to_string() }]
        );

        pipeline.ingest(closed, positions);
        let out = pipeline.tick(1.0 / 60.0);
        assert!(out.events.contains(&GestureEvent::HandClosed { hand: Hand::Left }));
        assert!(out
            .events
            .contains(&GestureEvent::RegionPressed { hand: Hand::Left, region: "organ".to_string() }));
        assert_eq!(pipeline.catalog().active_key(), Some("organ"));
        assert_eq!(out.control.instrument.as_deref(), Some("organ"));

        // Holding the fist does not fire again
        pipeline.ingest(closed, positions);
        let out = pipeline.tick(1.0 / 60.0);
        assert!(out.events.is_empty());
    }

    #[test]
    fn test_stale_hand_is_treated_as_untracked() {
        let mut config = config();
        config.stale_after_frames = Some(2);
        let mut pipeline = Pipeline::new(&config);

        pipeline.ingest(TRACKED, POSITIONS);
        assert!(pipeline.tick(0.1).control.pitch_tracked);

        for _ in 0..3 {
            pipeline.ingest("", r#"{"SpineBase": [256, 0]}"#);
        }
        let out = pipeline.tick(0.1);
        assert!(!out.control.pitch_tracked);
        assert_eq!(out.control.pitch, 220.0);
        assert!(pipeline.store().get(HAND_LEFT).is_some());
    }

    #[test]
    fn test_resize_retargets_without_new_frame() {
        let mut pipeline = Pipeline::new(&config());
        pipeline.ingest(TRACKED, POSITIONS);
        pipeline.tick(1.0);
        let before = pipeline.smoothed_position(SPINE_BASE).unwrap();
        assert_eq!(before, Vector2::new(256.0, 424.0));

        pipeline.resize(1024.0, 848.0);
        let out = pipeline.tick(1.0);
        assert!(!out.new_frame);
        assert_eq!(pipeline.smoothed_position(SPINE_BASE).unwrap(), Vector2::new(512.0, 848.0));
    }

    const RIGHT_TRACKED: &str = r#"{"Joints": {"SpineBase": {"TrackingState": 2}, "HandRight": {"TrackingState": 2}}}"#;

    fn right_hand_at(x: f64) -> String {
        format!(r#"{{"SpineBase": [256, 0], "HandRight": [{}, 100]}}"#, x)
    }

    #[test]
    fn test_still_hand_never_pans_across_resize() {
        let mut pipeline = Pipeline::new(&config());
        for _ in 0..3 {
            pipeline.ingest(RIGHT_TRACKED, &right_hand_at(400.0));
            assert_eq!(pipeline.tick(1.0 / 60.0).pan_offset, Vector2::zeros());
        }

        // Resize and a frame both land before the same tick
        pipeline.resize(1024.0, 848.0);
        pipeline.ingest(RIGHT_TRACKED, &right_hand_at(400.0));
        assert_eq!(pipeline.tick(1.0 / 60.0).pan_offset, Vector2::zeros());

        for _ in 0..5 {
            assert_eq!(pipeline.tick(1.0 / 60.0).pan_offset, Vector2::zeros());
        }
        pipeline.ingest(RIGHT_TRACKED, &right_hand_at(400.0));
        assert_eq!(pipeline.tick(1.0 / 60.0).pan_offset, Vector2::zeros());
    }

    #[test]
    fn test_pan_recentres_when_frames_stop() {
        let mut pipeline = Pipeline::new(&config());
        pipeline.ingest(RIGHT_TRACKED, &right_hand_at(300.0));
        pipeline.tick(0.1);
        pipeline.ingest(RIGHT_TRACKED, &right_hand_at(400.0));
        let moving = pipeline.tick(0.1);
        // 100px of movement at pan speed 0.05, half way there at 5/s * 0.1s
        assert!((moving.pan_offset.x - 2.5).abs() < 1e-9);

        let mut offset = moving.pan_offset;
        for _ in 0..PAN_HOLD_TICKS - 1 {
            offset = pipeline.tick(1.0).pan_offset;
        }
        assert!(offset.x > 0.0);

        assert_eq!(pipeline.tick(1.0).pan_offset, Vector2::zeros());
        assert_eq!(pipeline.tick(1.0).pan_offset, Vector2::zeros());
    }

    #[test]
    fn test_bone_segments_follow_known_joints() {
        let mut pipeline = Pipeline::new(&config());
        pipeline.ingest(TRACKED, r#"{"WristRight": [280, 150], "HandRight": [300, 200]}"#);
        pipeline.tick(1.0 / 60.0);

        let segments = pipeline.bone_segments();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].bone.label, "Right Hand");
    }
}

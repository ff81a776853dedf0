// src/mapping.rs - Sensor-space to screen-space coordinate mapping
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::config::MappingConfig;
use crate::joints::{JointStateStore, SPINE_BASE};

/// Depth camera resolution of the sensor.
pub const SENSOR_DEPTH_WIDTH: f64 = 512.0;
pub const SENSOR_DEPTH_HEIGHT: f64 = 424.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: f64,
    pub height: f64,
}

impl Viewport {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    pub fn clamp(&self, position: Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            clamp_finite(position.x, self.width),
            clamp_finite(position.y, self.height),
        )
    }
}

// NaN would slip through f64::clamp, pin it to the lower edge instead
fn clamp_finite(value: f64, max: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, max.max(0.0))
    }
}

/// How joints are placed on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MappingMode {
    /// Every joint is mapped independently relative to the spine base,
    /// centred horizontally and anchored to the bottom edge.
    #[default]
    PerJoint,
    /// The whole skeleton is drawn around a fixed screen anchor using one
    /// offset computed per frame from the spine base.
    SkeletonOverlay { anchor_x: f64, anchor_y: f64 },
}

/// Map a raw joint position to screen space relative to the spine base.
///
/// The offset from the reference is amplified by `sensitivity`, scaled into
/// the viewport, centred on X and flipped/anchored to the bottom on Y since
/// the sensor is Y-up. The result always lies inside the viewport.
pub fn map_to_screen_space(
    raw: Vector2<f64>,
    spine_base: Option<Vector2<f64>>,
    scale: Vector2<f64>,
    sensitivity: f64,
    viewport: Viewport,
) -> Vector2<f64> {
    let reference = spine_base.unwrap_or_else(Vector2::zeros);
    let offset = (raw - reference) * sensitivity;

    let screen = Vector2::new(
        offset.x * scale.x + viewport.width / 2.0,
        viewport.height - offset.y * scale.y,
    );
    viewport.clamp(screen)
}

pub struct CoordinateMapper {
    viewport: Viewport,
    sensor: Vector2<f64>,
    sensitivity: f64,
    scale: Vector2<f64>,
    mode: MappingMode,
}

impl CoordinateMapper {
    pub fn new(config: &MappingConfig) -> Self {
        let mut mapper = Self {
            viewport: Viewport::new(config.viewport_width, config.viewport_height),
            sensor: Vector2::new(config.sensor_width, config.sensor_height),
            sensitivity: config.sensitivity,
            scale: Vector2::new(1.0, 1.0),
            mode: config.mode,
        };
        mapper.recompute_scale();
        mapper
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn scale(&self) -> Vector2<f64> {
        self.scale
    }

    pub fn mode(&self) -> MappingMode {
        self.mode
    }

    /// Resize notification from the renderer.
    pub fn on_resize(&mut self, width: f64, height: f64) {
        self.viewport = Viewport::new(width, height);
        self.recompute_scale();
        debug!("Viewport resized to {}x{}, scale {:?}", width, height, self.scale);
    }

    fn recompute_scale(&mut self) {
        let sx = if self.sensor.x > 0.0 { self.viewport.width / self.sensor.x } else { 1.0 };
        let sy = if self.sensor.y > 0.0 { self.viewport.height / self.sensor.y } else { 1.0 };
        self.scale = Vector2::new(sx, sy);
    }

    pub fn map_joint(&self, raw: Vector2<f64>, spine_base: Option<Vector2<f64>>) -> Vector2<f64> {
        map_to_screen_space(raw, spine_base, self.scale, self.sensitivity, self.viewport)
    }

    /// Map every joint in the store into `out`, replacing its contents.
    pub fn map_frame(&self, store: &JointStateStore, out: &mut HashMap<String, Vector2<f64>>) {
        out.clear();
        let spine_base = store.get(SPINE_BASE).map(|joint| joint.raw_position);
        if spine_base.is_none() && !store.is_empty() {
            debug!("No spine base yet, mapping relative to the origin");
        }

        match self.mode {
            MappingMode::PerJoint => {
                for (name, joint) in store.iter() {
                    out.insert(name.to_string(), self.map_joint(joint.raw_position, spine_base));
                }
            }
            MappingMode::SkeletonOverlay { anchor_x, anchor_y } => {
                let gain = Vector2::new(
                    self.sensitivity * self.scale.x,
                    -self.sensitivity * self.scale.y,
                );
                let reference = spine_base.unwrap_or_else(Vector2::zeros);
                let offset = Vector2::new(anchor_x, anchor_y) - reference.component_mul(&gain);

                for (name, joint) in store.iter() {
                    let screen = joint.raw_position.component_mul(&gain) + offset;
                    out.insert(name.to_string(), self.viewport.clamp(screen));
                }
            }
        }
    }
}

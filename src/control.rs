// src/control.rs - Maps smoothed hand positions to instrument controls
use nalgebra::Vector2;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::config::{ControlConfig, InstrumentConfig};
use crate::sound::{build_voice, Voice};

fn normalized(distance: f64, axis_length: f64) -> f64 {
    let t = distance / axis_length;
    if t.is_nan() {
        0.0
    } else {
        t.clamp(0.0, 1.0)
    }
}

fn interpolate(min: f64, max: f64, t: f64) -> f64 {
    min + (max - min) * t
}

/// Pitch from height above a horizontal base line (screen Y grows downward).
/// An untracked hand always yields `min_pitch`.
pub fn compute_pitch(
    tracked: Option<Vector2<f64>>,
    vertical_axis_base: f64,
    axis_length: f64,
    min_pitch: f64,
    max_pitch: f64,
) -> f64 {
    match tracked {
        Some(position) => interpolate(
            min_pitch,
            max_pitch,
            normalized(vertical_axis_base - position.y, axis_length),
        ),
        None => min_pitch,
    }
}

/// Volume from distance right of a vertical base line.
/// An untracked hand always yields `min_volume`.
pub fn compute_volume(
    tracked: Option<Vector2<f64>>,
    horizontal_axis_base: f64,
    axis_length: f64,
    min_volume: f64,
    max_volume: f64,
) -> f64 {
    match tracked {
        Some(position) => interpolate(
            min_volume,
            max_volume,
            normalized(position.x - horizontal_axis_base, axis_length),
        ),
        None => min_volume,
    }
}

/// Control values for the current tick. Rebuilt every tick, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControlState {
    pub pitch: f64,
    pub volume_db: f64,
    pub instrument: Option<String>,
    pub pitch_tracked: bool,
    pub volume_tracked: bool,
}

pub struct ControlMapper {
    config: ControlConfig,
}

impl ControlMapper {
    pub fn new(config: ControlConfig) -> Self {
        Self { config }
    }

    pub fn pitch_joint(&self) -> &str {
        &self.config.pitch_joint
    }

    pub fn volume_joint(&self) -> &str {
        &self.config.volume_joint
    }

    pub fn compute(
        &self,
        pitch_hand: Option<Vector2<f64>>,
        volume_hand: Option<Vector2<f64>>,
        instrument: Option<&str>,
    ) -> ControlState {
        let c = &self.config;
        ControlState {
            pitch: compute_pitch(pitch_hand, c.pitch_axis.origin, c.pitch_axis.length, c.min_pitch, c.max_pitch),
            volume_db: compute_volume(
                volume_hand,
                c.volume_axis.origin,
                c.volume_axis.length,
                c.min_volume_db,
                c.max_volume_db,
            ),
            instrument: instrument.map(str::to_string),
            pitch_tracked: pitch_hand.is_some(),
            volume_tracked: volume_hand.is_some(),
        }
    }
}

/// Keyed set of voices with one active selection.
pub struct InstrumentCatalog {
    voices: HashMap<String, Box<dyn Voice>>,
    order: Vec<String>,
    active: Option<String>,
}

impl InstrumentCatalog {
    pub fn new() -> Self {
        Self {
            voices: HashMap::new(),
            order: Vec::new(),
            active: None,
        }
    }

    /// Build and set up every configured voice. A voice that fails setup is
    /// left out of the catalog rather than failing the session.
    pub fn from_config(instruments: &[InstrumentConfig]) -> Self {
        let mut catalog = Self::new();
        for instrument in instruments {
            let mut voice = build_voice(instrument);
            match voice.setup() {
                Ok(()) => catalog.insert(&instrument.key, voice),
                Err(e) => warn!("Skipping instrument '{}': {}", instrument.key, e),
            }
        }
        catalog
    }

    pub fn insert(&mut self, key: &str, voice: Box<dyn Voice>) {
        if self.voices.insert(key.to_string(), voice).is_none() {
            self.order.push(key.to_string());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.voices.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.voices.get(key).map(|voice| voice.display_label())
    }

    pub fn active_key(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn active_voice(&self) -> Option<&dyn Voice> {
        let key = self.active.as_ref()?;
        self.voices.get(key).map(|voice| &**voice)
    }

    pub fn active_voice_mut(&mut self) -> Option<&mut Box<dyn Voice>> {
        let key = self.active.as_ref()?;
        self.voices.get_mut(key)
    }

    /// Switch the active voice. Unknown keys are logged and ignored.
    pub fn select(&mut self, key: &str) -> bool {
        if !self.voices.contains_key(key) {
            warn!("Unknown instrument '{}', keeping current selection", key);
            return false;
        }
        if self.active.as_deref() == Some(key) {
            return true;
        }

        if let Some(previous) = self.active_voice_mut() {
            previous.stop();
        }
        self.active = Some(key.to_string());
        if let Some(voice) = self.active_voice_mut() {
            voice.play();
            info!("Selected instrument '{}'", voice.display_label());
        }
        true
    }

    /// Push this tick's controls into the active voice.
    pub fn apply(&mut self, state: &ControlState) {
        if let Some(voice) = self.active_voice_mut() {
            voice.update_pitch(state.pitch);
            voice.update_volume(state.volume_db);
        }
    }
}

impl Default for InstrumentCatalog {
    fn default() -> Self {
        Self::new()
    }
}

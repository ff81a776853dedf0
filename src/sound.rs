// src/sound.rs - Playback voices driven by the control signals
use serde::{Deserialize, Serialize};
use std::f64::consts::TAU;
use std::path::PathBuf;
use tracing::debug;

use crate::config::{InstrumentConfig, VoiceKind};
use crate::error::{PipelineError, Result};

pub fn db_to_gain(volume_db: f64) -> f64 {
    10f64.powf(volume_db / 20.0)
}

/// Capability shared by every instrument sound source.
pub trait Voice: Send {
    fn setup(&mut self) -> Result<()>;
    fn play(&mut self);
    fn stop(&mut self);
    fn is_playing(&self) -> bool;
    /// Pitch in Hz.
    fn update_pitch(&mut self, pitch: f64);
    fn update_volume(&mut self, volume_db: f64);
    fn display_label(&self) -> &str;

    /// Fill `out` with samples. Voices played by an external device render nothing.
    fn render(&mut self, _out: &mut [f32]) -> usize {
        0
    }
}

/// A recorded sample handed to the audio device, re-pitched by playback rate.
pub struct FilePlayback {
    key: String,
    label: String,
    path: PathBuf,
    base_frequency: f64,
    playback_rate: f64,
    gain: f64,
    ready: bool,
    playing: bool,
}

impl FilePlayback {
    pub fn new(key: &str, label: &str, path: PathBuf, base_frequency: f64) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            path,
            base_frequency,
            playback_rate: 1.0,
            gain: 0.0,
            ready: false,
            playing: false,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn playback_rate(&self) -> f64 {
        self.playback_rate
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl Voice for FilePlayback {
    fn setup(&mut self) -> Result<()> {
        if !self.path.is_file() {
            return Err(PipelineError::MissingSample {
                key: self.key.clone(),
                path: self.path.clone(),
            });
        }
        self.ready = true;
        Ok(())
    }

    fn play(&mut self) {
        if self.ready {
            self.playing = true;
        } else {
            debug!("Voice '{}' played before setup", self.key);
        }
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn update_pitch(&mut self, pitch: f64) {
        if self.base_frequency > 0.0 {
            self.playback_rate = pitch / self.base_frequency;
        }
    }

    fn update_volume(&mut self, volume_db: f64) {
        self.gain = db_to_gain(volume_db);
    }

    fn display_label(&self) -> &str {
        &self.label
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Waveform {
    Sine,
    Square,
    Saw,
    Triangle,
}

impl Waveform {
    /// Sample at `phase` in [0, 1).
    pub fn sample(&self, phase: f64) -> f64 {
        match self {
            Waveform::Sine => (phase * TAU).sin(),
            Waveform::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Saw => 2.0 * phase - 1.0,
            Waveform::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
        }
    }
}

/// Oscillator voice synthesised on the fly.
pub struct ProceduralVoice {
    label: String,
    waveform: Waveform,
    sample_rate: u32,
    frequency: f64,
    gain: f64,
    phase: f64,
    playing: bool,
}

impl ProceduralVoice {
    pub fn new(label: &str, waveform: Waveform, sample_rate: u32) -> Self {
        Self {
            label: label.to_string(),
            waveform,
            sample_rate,
            frequency: 0.0,
            gain: 0.0,
            phase: 0.0,
            playing: false,
        }
    }

    pub fn frequency(&self) -> f64 {
        self.frequency
    }

    pub fn gain(&self) -> f64 {
        self.gain
    }
}

impl Voice for ProceduralVoice {
    fn setup(&mut self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(PipelineError::Config(format!("voice '{}' has a zero sample rate", self.label)));
        }
        self.phase = 0.0;
        Ok(())
    }

    fn play(&mut self) {
        self.playing = true;
    }

    fn stop(&mut self) {
        self.playing = false;
    }

    fn is_playing(&self) -> bool {
        self.playing
    }

    fn update_pitch(&mut self, pitch: f64) {
        self.frequency = pitch.max(0.0);
    }

    fn update_volume(&mut self, volume_db: f64) {
        self.gain = db_to_gain(volume_db);
    }

    fn display_label(&self) -> &str {
        &self.label
    }

    fn render(&mut self, out: &mut [f32]) -> usize {
        if !self.playing || self.sample_rate == 0 {
            out.fill(0.0);
            return out.len();
        }
        let step = self.frequency / self.sample_rate as f64;
        for sample in out.iter_mut() {
            *sample = (self.waveform.sample(self.phase) * self.gain) as f32;
            self.phase = (self.phase + step).fract();
        }
        out.len()
    }
}

pub fn build_voice(config: &InstrumentConfig) -> Box<dyn Voice> {
    match &config.kind {
        VoiceKind::File { path, base_frequency } => {
            Box::new(FilePlayback::new(&config.key, &config.label, path.clone(), *base_frequency))
        }
        VoiceKind::Procedural { waveform, sample_rate } => {
            Box::new(ProceduralVoice::new(&config.label, *waveform, *sample_rate))
        }
    }
}

// src/data.rs - Session recording and export of per-tick control signals
use chrono::{DateTime, Local};
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::Result;
use crate::gesture::GestureEvent;
use crate::ingest::IngestStats;
use crate::pipeline::TickOutput;

#[derive(Debug, Serialize)]
struct SignalRecord {
    tick: u64,
    elapsed: f64,
    new_frame: bool,

    // Controls
    pitch: f64,
    volume_db: f64,
    instrument: Option<String>,
    pitch_tracked: bool,
    volume_tracked: bool,

    // Stage pan
    pan_x: f64,
    pan_y: f64,

    // Discrete events, ';' separated
    events: String,
}

pub struct SessionRecorder {
    output_dir: PathBuf,
    session_name: String,
    session_id: Uuid,
    started: DateTime<Local>,
    records: Vec<SignalRecord>,
    closed_events: usize,
    instrument_changes: usize,
}

impl SessionRecorder {
    pub fn new(output_dir: impl AsRef<Path>, session_name: Option<String>) -> Self {
        let started = Local::now();
        let session_name = session_name.unwrap_or_else(|| {
            format!("session_{}", started.format("%Y%m%d_%H%M%S"))
        });

        Self {
            output_dir: output_dir.as_ref().to_path_buf(),
            session_name,
            session_id: Uuid::new_v4(),
            started,
            records: Vec::new(),
            closed_events: 0,
            instrument_changes: 0,
        }
    }

    pub fn session_dir(&self) -> PathBuf {
        self.output_dir.join(&self.session_name)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn add_tick(&mut self, output: &TickOutput) {
        self.closed_events += output
            .events
            .iter()
            .filter(|e| matches!(e, GestureEvent::HandClosed { .. }))
            .count();

        let previous = self.records.last().map(|r| r.instrument.clone());
        if let Some(previous) = previous {
            if previous != output.control.instrument {
                self.instrument_changes += 1;
            }
        }

        let events = output
            .events
            .iter()
            .map(GestureEvent::label)
            .collect::<Vec<_>>()
            .join(";");

        self.records.push(SignalRecord {
            tick: output.tick,
            elapsed: output.elapsed,
            new_frame: output.new_frame,
            pitch: output.control.pitch,
            volume_db: output.control.volume_db,
            instrument: output.control.instrument.clone(),
            pitch_tracked: output.control.pitch_tracked,
            volume_tracked: output.control.volume_tracked,
            pan_x: output.pan_offset.x,
            pan_y: output.pan_offset.y,
            events,
        });
    }

    pub fn export_csv(&self) -> Result<PathBuf> {
        let csv_path = self.session_dir().join("control_signals.csv");

        // Create directory if it doesn't exist
        if let Some(parent) = csv_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(&csv_path)?;
        let mut writer = Writer::from_writer(file);
        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        Ok(csv_path)
    }

    pub fn generate_report(&self, ingest: &IngestStats) -> Result<PathBuf> {
        let report_path = self.session_dir().join("report.html");
        if let Some(parent) = report_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&report_path, self.create_html_report(ingest))?;
        Ok(report_path)
    }

    fn tracked_percentage(&self) -> f64 {
        if self.records.is_empty() {
            return 0.0;
        }
        let tracked = self.records.iter().filter(|r| r.pitch_tracked).count();
        tracked as f64 / self.records.len() as f64 * 100.0
    }

    fn create_html_report(&self, ingest: &IngestStats) -> String {
        format!(r#"
<!DOCTYPE html>
<html>
<head>
    <title>Theremin Session Report - {name}</title>
    <style>
        body {{ font-family: 'Segoe UI', Tahoma, Geneva, Verdana, sans-serif; margin: 40px; background: #f5f5f5; }}
        h1 {{ color: #333; }}
        .stats {{ background: white; padding: 20px; border-radius: 8px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }}
        .stat-item {{ margin: 10px 0; }}
        .stat-label {{ font-weight: bold; color: #666; }}
        .stat-value {{ color: #4682EA; font-size: 1.2em; }}
    </style>
</head>
<body>
    <h1>Theremin Session Report</h1>
    <div class="stats">
        <h2>Session: {name}</h2>
        <div class="stat-item"><span class="stat-label">Session ID:</span> <span class="stat-value">{id}</span></div>
        <div class="stat-item"><span class="stat-label">Started:</span> <span class="stat-value">{started}</span></div>
        <div class="stat-item"><span class="stat-label">Ticks:</span> <span class="stat-value">{ticks}</span></div>
        <div class="stat-item"><span class="stat-label">Sensor Frames:</span> <span class="stat-value">{frames}</span></div>
        <div class="stat-item"><span class="stat-label">Joint Positions:</span> <span class="stat-value">{positions}</span></div>
        <div class="stat-item"><span class="stat-label">Skipped Fields:</span> <span class="stat-value">{skipped}</span></div>
        <div class="stat-item"><span class="stat-label">Pitch Hand Tracked:</span> <span class="stat-value">{tracked:.1}%</span></div>
        <div class="stat-item"><span class="stat-label">Hand Closures:</span> <span class="stat-value">{closed}</span></div>
        <div class="stat-item"><span class="stat-label">Instrument Changes:</span> <span class="stat-value">{changes}</span></div>
    </div>
</body>
</html>
        "#,
            name = self.session_name,
            id = self.session_id,
            started = self.started.format("%Y-%m-%d %H:%M:%S"),
            ticks = self.records.len(),
            frames = ingest.frames,
            positions = ingest.positions_applied,
            skipped = ingest.fields_skipped,
            tracked = self.tracked_percentage(),
            closed = self.closed_events,
            changes = self.instrument_changes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlState;
    use crate::gesture::Hand;
    use nalgebra::Vector2;

    fn output(tick: u64, instrument: &str, events: Vec<GestureEvent>) -> TickOutput {
        TickOutput {
            tick,
            elapsed: tick as f64 / 60.0,
            new_frame: true,
            control: ControlState {
                pitch: 440.0,
                volume_db: -6.0,
                instrument: Some(instrument.to_string()),
                pitch_tracked: tick % 2 == 0,
                volume_tracked: true,
            },
            events,
            pan_offset: Vector2::new(1.5, -2.0),
        }
    }

    #[test]
    fn test_export_csv_and_report() {
        let dir = std::env::temp_dir().join(format!("theremin-{}", Uuid::new_v4()));
        let mut recorder = SessionRecorder::new(&dir, Some("unit".to_string()));

        recorder.add_tick(&output(1, "theremin", vec![]));
        recorder.add_tick(&output(
            2,
            "organ",
            vec![
                GestureEvent::HandClosed { hand: Hand::Left },
                GestureEvent::RegionPressed { hand: Hand::Left, region: "organ".to_string() },
            ],
        ));
        assert_eq!(recorder.len(), 2);
        assert_eq!(recorder.closed_events, 1);
        assert_eq!(recorder.instrument_changes, 1);
        assert!((recorder.tracked_percentage() - 50.0).abs() < 1e-9);

        let csv_path = recorder.export_csv().unwrap();
        let text = std::fs::read_to_string(&csv_path).unwrap();
        let mut lines = text.lines();
        assert!(lines.next().unwrap().starts_with("tick,elapsed,new_frame,pitch,volume_db"));
        assert!(lines.next().unwrap().contains("theremin"));
        assert!(lines.next().unwrap().ends_with("left_closed;left_press:organ"));

        let report = recorder.generate_report(&IngestStats { frames: 2, positions_applied: 6, fields_skipped: 1 }).unwrap();
        let html = std::fs::read_to_string(report).unwrap();
        assert!(html.contains("Session: unit"));
        assert!(html.contains("50.0%"));
        assert!(html.contains(r#"Joint Positions:</span> <span class="stat-value">6</span>"#));

        std::fs::remove_dir_all(dir).ok();
    }

    #[test]
    fn test_default_session_name() {
        let recorder = SessionRecorder::new("/tmp", None);
        assert!(recorder.session_name.starts_with("session_"));
        assert!(recorder.is_empty());
    }
}

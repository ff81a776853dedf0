// src/main.rs
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use kinect_theremin::transport::{replay_file, stream_tcp_reconnecting};
use kinect_theremin::{Pipeline, PipelineConfig, SessionRecorder};

const FRAME_BUFFER: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Usage: kinect_theremin [config.json] [session.jsonl]
    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => PipelineConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path))?,
        None => PipelineConfig::default(),
    };
    let replay = args.next().map(PathBuf::from);
    let replaying = replay.is_some();

    let (tx, mut rx) = mpsc::channel(FRAME_BUFFER);
    let reader = match replay {
        Some(path) => {
            info!("Replaying session from {}", path.display());
            let event_name = config.transport.event_name.clone();
            tokio::spawn(async move {
                match replay_file(&path, &event_name, tx).await {
                    Ok(frames) => frames,
                    Err(e) => {
                        error!("Replay failed: {}", e);
                        0
                    }
                }
            })
        }
        None => {
            let transport = config.transport.clone();
            tokio::spawn(async move { stream_tcp_reconnecting(&transport, tx).await })
        }
    };

    let mut pipeline = Pipeline::new(&config);
    let mut recorder = config
        .recording
        .enabled
        .then(|| SessionRecorder::new(&config.recording.output_dir, config.recording.session_name.clone()));

    let mut ticker = interval(config.tick_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = Instant::now();

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = &mut shutdown => {
                info!("Interrupted, finishing session");
                break;
            }
        }

        // Fold in everything that arrived since the last tick
        let closed = loop {
            match rx.try_recv() {
                Ok(event) => pipeline.handle_event(event),
                Err(TryRecvError::Empty) => break false,
                Err(TryRecvError::Disconnected) => break true,
            }
        };

        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64();
        last = now;

        let output = pipeline.tick(dt);
        for event in &output.events {
            info!("{}", event.label());
        }
        if let Some(recorder) = recorder.as_mut() {
            recorder.add_tick(&output);
        }

        // A live stream reconnects on its own; only a finished replay ends the session
        if closed && replaying {
            break;
        }
    }

    drop(rx);
    if replaying {
        reader.await.context("Frame reader task panicked")?;
    } else {
        reader.abort();
    }

    let stats = pipeline.ingest_stats();
    info!(
        "Session finished: {} frames applied, {} positions applied, {} fields skipped",
        stats.frames, stats.positions_applied, stats.fields_skipped
    );

    if let Some(recorder) = recorder {
        let csv = recorder.export_csv().context("Failed to export control signals")?;
        let report = recorder.generate_report(&stats).context("Failed to write session report")?;
        info!("Session saved to {} and {}", csv.display(), report.display());
    }

    Ok(())
}

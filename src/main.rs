// src/main.rs

mod behavior;
mod config;
mod monitor;
mod object_detection;
mod persistence;
mod recorder;
mod stats;
mod tracker;
mod types;
mod video_io;

use anyhow::{Context, Result};
use monitor::Monitor;
use object_detection::YoloDetector;
use persistence::PersistenceWorker;
use recorder::EventRecorder;
use stats::MonitorStats;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;
use types::Config;
use video_io::{FrameSource, Mp4Sink, RtspSource};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "stream_sentry={},ort=warn",
            config.logging.level
        ))
        .init();

    info!("🎥 Stream Sentry starting");
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "Tracker: max_disappeared={}, max_distance={:.0}px | dedup window: {} frames | event cap: {:.0}s",
        config.tracker.max_disappeared,
        config.tracker.max_distance,
        config.dedup.window_frames,
        config.events.duration_secs
    );

    let output_dir = PathBuf::from(&config.persistence.output_dir);
    let images_dir = output_dir.join("images");
    let detections_dir = output_dir.join("detections");
    let events_dir = output_dir.join("events");
    for dir in [&images_dir, &detections_dir, &events_dir] {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let stats = MonitorStats::new();

    let detector = YoloDetector::new(&config.detector)?;

    let source = RtspSource::open(&config.stream.url)?;
    let fps = source.fps();
    let frame_size = source.frame_size();

    let recorder = EventRecorder::new(
        &config.events,
        events_dir,
        fps,
        frame_size,
        Box::new(Mp4Sink::open),
    );

    let persistence = PersistenceWorker::spawn(
        images_dir,
        detections_dir,
        config.persistence.queue_capacity,
        stats.clone(),
    )?;
    info!("✓ Persistence worker ready");

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("🛑 Shutdown requested");
                shutdown.store(true, Ordering::Relaxed);
            }
        });
    }

    let monitor = Monitor::new(
        config,
        source,
        detector,
        recorder,
        persistence,
        stats.clone(),
        shutdown,
    );
    tokio::task::spawn_blocking(move || monitor.run())
        .await
        .context("monitor task panicked")??;

    let summary = stats.summary();
    info!("📈 Final report:");
    info!(
        "  Frames: {} ({:.1} FPS average)",
        summary.frames_processed,
        summary.frames_processed as f64 / summary.elapsed_secs.max(0.01)
    );
    info!("  Unique tracks: {}", summary.unique_tracks);
    info!(
        "  👤 Persons: {} | 🚗 Vehicles: {} | Other: {}",
        summary.person_detections, summary.vehicle_detections, summary.other_detections
    );
    info!(
        "  Images saved: {} | Records saved: {} | Clips recorded: {}",
        summary.images_saved, summary.records_saved, summary.clips_recorded
    );
    info!("  Reconnects: {}", summary.reconnects);
    if summary.tasks_dropped > 0 {
        info!("  ⚠️  Persistence tasks dropped: {}", summary.tasks_dropped);
    }

    Ok(())
}

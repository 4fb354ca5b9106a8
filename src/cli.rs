// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for depth capture
//!
//! This module provides command-line functionality for:
//! - Listing sensor modes
//! - Streaming fused frames
//! - Taking a still photo with depth

use chrono::Local;
use depthcam::backends::sensor::{
    DepthSensor, SyntheticSensor, SyntheticSensorConfig, find_depth_sensor, select_formats,
};
use depthcam::constants::{file_names, timing};
use depthcam::control::{ControlLink, WriterLink, link_thumbnail_handler};
use depthcam::pipelines::channel_handler;
use depthcam::pipelines::photo::{
    EncodedPhoto, EncodingFormat, PhotoEncoder, ThumbnailGrid, encode_png,
};
use depthcam::{CaptureSession, CapturedFrame, Config, ConfigurationError, Handlers};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

fn open_sensor() -> Result<Arc<dyn DepthSensor>, ConfigurationError> {
    let candidates: Vec<Arc<dyn DepthSensor>> =
        vec![Arc::new(SyntheticSensor::new(SyntheticSensorConfig::default()))];
    find_depth_sensor(&candidates)
}

/// List all sensor modes and the selection a session would make
pub fn list_formats(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let sensor = open_sensor()?;
    let formats = sensor.formats();

    println!("Sensor: {}", sensor.name());
    println!();
    for (index, format) in formats.iter().enumerate() {
        println!("  [{}] {}", index, format);
        for depth in &format.depth_formats {
            println!("        depth {}", depth);
        }
    }
    println!();

    match select_formats(&formats, &config.format) {
        Ok(selection) => println!("Selected: {}", selection),
        Err(e) => println!("No selection: {}", e),
    }

    Ok(())
}

/// Run the live pipeline until `frames` fused frames arrived or Ctrl+C
pub fn stream(config: &Config, frames: u64) -> Result<(), Box<dyn std::error::Error>> {
    let (frame_tx, mut frame_rx) = unbounded_channel::<CapturedFrame>();
    let handlers = Handlers::new().on_frame(channel_handler(frame_tx));

    let session = CaptureSession::new(open_sensor()?, config, handlers)?;
    println!("Format: {}", session.selection());

    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    println!("Streaming... (press Ctrl+C to stop early)");
    session.start()?;

    let rt = tokio::runtime::Runtime::new()?;
    let mut received = 0;
    let mut last_frame = Instant::now();

    while received < frames {
        if stop_flag.load(Ordering::SeqCst) {
            println!("Stopping early...");
            break;
        }
        match rt.block_on(next(&mut frame_rx, Duration::from_millis(100))) {
            Some(frame) => {
                received += 1;
                last_frame = Instant::now();
                print_frame(received, &frame);
            }
            None if last_frame.elapsed() > timing::FRAME_TIMEOUT => {
                return Err("No frames delivered by the sensor".into());
            }
            None => {}
        }
    }

    session.stop();

    let stats = session.stats();
    let cache = session.texture_cache_stats();
    println!();
    println!("Fused: {}  Dropped: {}", stats.fused, stats.dropped);
    println!(
        "Texture cache: {} hits, {} misses, {} entries",
        cache.hits, cache.misses, cache.entries
    );
    Ok(())
}

/// Take a still photo and write it plus its depth thumbnail to disk
pub fn take_photo(
    config: &Config,
    output: Option<PathBuf>,
    link: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let output_dir = output.unwrap_or_else(get_default_photo_dir);
    std::fs::create_dir_all(&output_dir)?;

    let (photo_tx, mut photo_rx) = unbounded_channel::<EncodedPhoto>();
    let (thumb_tx, mut thumb_rx) = unbounded_channel::<ThumbnailGrid>();
    let forward_thumbnail = channel_handler(thumb_tx);

    let handlers = match link {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            println!("Control link: {}", path.display());
            let link: Arc<dyn ControlLink> = Arc::new(WriterLink::new(file));
            let send_thumbnail = link_thumbnail_handler(link);
            Handlers::new().on_thumbnail(move |grid| {
                send_thumbnail(grid.clone());
                forward_thumbnail(grid);
            })
        }
        None => Handlers::new().on_thumbnail(forward_thumbnail),
    }
    .on_photo(channel_handler(photo_tx));

    let session = CaptureSession::new(open_sensor()?, config, handlers)?;
    println!("Capture format: {}", session.selection());

    // Let the stream settle before the still
    session.start()?;
    std::thread::sleep(timing::PHOTO_WARMUP);

    println!("Capturing...");
    let started = Local::now();
    session.request_still_capture()?;

    let rt = tokio::runtime::Runtime::new()?;
    let photo = rt
        .block_on(next(&mut photo_rx, timing::PHOTO_TIMEOUT))
        .ok_or("Still capture did not complete")?;
    let thumbnail = rt.block_on(next(&mut thumb_rx, Duration::from_millis(500)));
    session.stop();

    println!(
        "Photo: {}x{}, depth embedded: {}",
        photo.width, photo.height, photo.depth_embedded
    );
    let photo_path = rt.block_on(PhotoEncoder::save(
        photo.data,
        EncodingFormat::Jpeg,
        output_dir.clone(),
        file_names::PHOTO_PREFIX,
    ))?;
    println!("Photo saved: {}", photo_path.display());

    match thumbnail {
        Some(grid) => {
            let png = encode_png(&grid.to_image())?;
            let thumb_path = rt.block_on(PhotoEncoder::save(
                png,
                EncodingFormat::Png,
                output_dir,
                file_names::THUMBNAIL_PREFIX,
            ))?;
            println!(
                "Depth thumbnail ({}x{}) saved: {}",
                grid.width(),
                grid.height(),
                thumb_path.display()
            );
        }
        None => println!("No depth thumbnail was produced"),
    }

    println!(
        "Done in {} ms",
        (Local::now() - started).num_milliseconds()
    );
    Ok(())
}

async fn next<T>(rx: &mut UnboundedReceiver<T>, wait: Duration) -> Option<T> {
    tokio::time::timeout(wait, rx.recv()).await.ok().flatten()
}

fn print_frame(index: u64, frame: &CapturedFrame) {
    let k = frame.intrinsics_for(frame.color_dimensions());
    println!(
        "#{:<4} t={:>12}ns  color {}  depth {}{}  fx={:.1} fy={:.1}",
        index,
        frame.timestamp_ns,
        frame.color_dimensions(),
        frame.depth_dimensions(),
        if frame.depth_filtered { " (filtered)" } else { "" },
        k[0][0],
        k[1][1],
    );
}

/// Get the default photo directory
fn get_default_photo_dir() -> PathBuf {
    dirs::picture_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(file_names::APP_DIR)
}

// SPDX-License-Identifier: GPL-3.0-only

//! Synthetic depth sensor
//!
//! A software stand-in for depth camera hardware. It enumerates a realistic
//! mode list, honors the configuration lock, and produces color and depth
//! arrivals that share timestamps, the same way a synchronized hardware
//! pipeline does.
//!
//! Two delivery modes:
//! - **Timed**: a producer thread emits one color and one depth arrival per
//!   frame interval while streaming.
//! - **Manual**: nothing is produced on its own; callers push arrivals and
//!   complete still captures explicitly. Used for deterministic tests.

use super::DepthSensor;
use super::configurator::SensorFormatSelection;
use super::sensor_queue::{LoopAction, SensorQueue};
use super::types::*;
use crate::media::depth_float::encode_depth_values;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// How the synthetic sensor produces stream arrivals
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyntheticMode {
    /// Producer thread at the mode's frame rate
    #[default]
    Timed,
    /// Arrivals are pushed by the caller
    Manual,
}

/// Behavior of a [`SyntheticSensor`]
#[derive(Debug, Clone)]
pub struct SyntheticSensorConfig {
    pub name: String,
    pub available: bool,
    /// Modes in capability-ascending order
    pub formats: Vec<SensorFormat>,
    pub mode: SyntheticMode,
    pub photo_pixel_formats: Vec<PixelFormat>,
    /// Native depth encoding of still captures
    pub still_depth_encoding: DepthEncoding,
    /// Complete still captures on a worker thread without being asked
    pub auto_complete_photos: bool,
    /// Number of distinct buffer ids recycled per stream
    pub buffer_pool_size: u64,
    /// Attach calibration to depth deliveries
    pub deliver_calibration: bool,
}

impl Default for SyntheticSensorConfig {
    fn default() -> Self {
        Self {
            name: "Synthetic Depth Camera".to_string(),
            available: true,
            formats: default_formats(),
            mode: SyntheticMode::Timed,
            photo_pixel_formats: vec![
                PixelFormat::Nv12FullRange,
                PixelFormat::Nv12VideoRange,
                PixelFormat::Bgra,
            ],
            still_depth_encoding: DepthEncoding::DepthFloat32,
            auto_complete_photos: true,
            buffer_pool_size: 4,
            deliver_calibration: true,
        }
    }
}

impl SyntheticSensorConfig {
    /// Manual-delivery sensor with one small mode, handy for tests
    pub fn manual(color: Dimensions, depth: Dimensions) -> Self {
        Self {
            name: "Manual Depth Camera".to_string(),
            formats: vec![SensorFormat {
                dimensions: color,
                pixel_format: PixelFormat::Nv12FullRange,
                max_framerate: Framerate::from_int(30),
                binned: false,
                depth_formats: vec![DepthDataFormat {
                    encoding: DepthEncoding::DepthFloat16,
                    dimensions: depth,
                }],
            }],
            mode: SyntheticMode::Manual,
            auto_complete_photos: false,
            ..Self::default()
        }
    }
}

/// Mode list modeled on a handheld depth camera
fn default_formats() -> Vec<SensorFormat> {
    let depth = |encoding, width, height| DepthDataFormat {
        encoding,
        dimensions: Dimensions::new(width, height),
    };
    let mode = |width, height, pixel_format, fps, binned, depth_formats| SensorFormat {
        dimensions: Dimensions::new(width, height),
        pixel_format,
        max_framerate: Framerate::from_int(fps),
        binned,
        depth_formats,
    };

    vec![
        mode(640, 480, PixelFormat::Nv12FullRange, 60, false, vec![
            depth(DepthEncoding::DepthFloat16, 320, 240),
            depth(DepthEncoding::DepthFloat32, 320, 240),
        ]),
        mode(1280, 720, PixelFormat::Bgra, 60, false, vec![]),
        mode(1920, 1080, PixelFormat::Nv12FullRange, 30, true, vec![
            depth(DepthEncoding::DepthFloat16, 256, 144),
        ]),
        mode(1920, 1440, PixelFormat::Nv12VideoRange, 30, false, vec![
            depth(DepthEncoding::DepthFloat16, 256, 192),
        ]),
        mode(1920, 1440, PixelFormat::Nv12FullRange, 30, false, vec![
            depth(DepthEncoding::DisparityFloat16, 256, 192),
            depth(DepthEncoding::DepthFloat32, 256, 192),
            depth(DepthEncoding::DepthFloat16, 160, 120),
            depth(DepthEncoding::DepthFloat16, 256, 192),
        ]),
        mode(3840, 2160, PixelFormat::Nv12FullRange, 30, false, vec![]),
        mode(4032, 3024, PixelFormat::Nv12FullRange, 15, true, vec![
            depth(DepthEncoding::DepthFloat16, 320, 240),
        ]),
    ]
}

struct PendingPhoto {
    settings: PhotoSettings,
    events: SensorEventSender,
}

#[derive(Default)]
struct SensorState {
    locked: bool,
    active: Option<SensorFormatSelection>,
    /// Channel of the running stream (both delivery modes)
    stream: Option<SensorEventSender>,
    producer: Option<SensorQueue>,
    pending_photos: VecDeque<PendingPhoto>,
}

/// Software depth sensor implementing [`DepthSensor`]
pub struct SyntheticSensor {
    config: SyntheticSensorConfig,
    state: Mutex<SensorState>,
    filtering: Arc<AtomicBool>,
    next_buffer: Arc<AtomicU64>,
    epoch: Instant,
}

impl SyntheticSensor {
    pub fn new(config: SyntheticSensorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(SensorState::default()),
            filtering: Arc::new(AtomicBool::new(true)),
            next_buffer: Arc::new(AtomicU64::new(0)),
            epoch: Instant::now(),
        }
    }

    fn state(&self) -> MutexGuard<'_, SensorState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &SyntheticSensorConfig {
        &self.config
    }

    /// Whether someone currently holds the configuration lock
    pub fn is_configuration_locked(&self) -> bool {
        self.state().locked
    }

    /// Formats made active by the last successful configuration
    pub fn active_formats(&self) -> Option<SensorFormatSelection> {
        self.state().active.clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state().stream.is_some()
    }

    pub fn is_depth_filtering_enabled(&self) -> bool {
        self.filtering.load(Ordering::SeqCst)
    }

    /// Deliver an arbitrary event into the running stream (manual mode)
    ///
    /// Returns false when not streaming or the receiver is gone.
    pub fn push(&self, event: SensorEvent) -> bool {
        let state = self.state();
        match &state.stream {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Deliver a complete color + depth pair for `timestamp_ns`
    pub fn push_frame(&self, timestamp_ns: u64) -> bool {
        let Some(selection) = self.active_formats() else {
            return false;
        };
        let (color, depth) = self.make_pair(&selection, timestamp_ns);
        self.push(SensorEvent::Color(color)) && self.push(SensorEvent::Depth(depth))
    }

    /// Build the color and depth arrivals for one capture instant
    pub fn make_pair(
        &self,
        selection: &SensorFormatSelection,
        timestamp_ns: u64,
    ) -> (ColorSample, DepthSample) {
        make_pair(
            selection,
            timestamp_ns,
            self.pool_id(),
            self.filtering.load(Ordering::SeqCst),
            self.config.deliver_calibration,
        )
    }

    /// Number of still captures waiting for completion (manual mode)
    pub fn pending_photo_count(&self) -> usize {
        self.state().pending_photos.len()
    }

    /// Complete the oldest pending still capture
    pub fn complete_pending_photo(&self) -> bool {
        self.complete_pending_photo_with(|_| {})
    }

    /// Complete the oldest pending still capture after editing the result
    pub fn complete_pending_photo_with<F>(&self, edit: F) -> bool
    where
        F: FnOnce(&mut StillPhoto),
    {
        let (pending, selection) = {
            let mut state = self.state();
            let Some(pending) = state.pending_photos.pop_front() else {
                return false;
            };
            (pending, state.active.clone())
        };
        let Some(selection) = selection else {
            return pending
                .events
                .send(SensorEvent::PhotoCaptured(Err(BackendError::CaptureFailed(
                    "sensor not configured".to_string(),
                ))))
                .is_ok();
        };

        let mut photo = self.make_photo(&selection, &pending.settings);
        edit(&mut photo);
        pending.events.send(SensorEvent::PhotoCaptured(Ok(photo))).is_ok()
    }

    /// Fail the oldest pending still capture
    pub fn fail_pending_photo(&self, error: BackendError) -> bool {
        let pending = self.state().pending_photos.pop_front();
        match pending {
            Some(p) => p.events.send(SensorEvent::PhotoCaptured(Err(error))).is_ok(),
            None => false,
        }
    }

    fn pool_id(&self) -> BufferId {
        let n = self.next_buffer.fetch_add(1, Ordering::Relaxed);
        BufferId(n % self.config.buffer_pool_size.max(1))
    }

    fn timestamp_now(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }

    fn make_photo(&self, selection: &SensorFormatSelection, settings: &PhotoSettings) -> StillPhoto {
        let dims = selection.format.dimensions;
        let pixel_format = settings.pixel_format.unwrap_or(PixelFormat::Nv12FullRange);
        let pixel_buffer = match pixel_format {
            PixelFormat::Nv12FullRange | PixelFormat::Nv12VideoRange => {
                synthetic_color(BufferId::unique(), dims, pixel_format.is_full_range(), 0)
            }
            PixelFormat::Bgra | PixelFormat::Rgba => synthetic_packed(BufferId::unique(), dims, pixel_format),
        };

        let depth = settings.depth_delivery.then(|| DepthData {
            map: synthetic_depth(
                BufferId::unique(),
                selection.depth_format.dimensions,
                self.config.still_depth_encoding,
                0,
                self.filtering.load(Ordering::SeqCst),
            ),
            calibration: self
                .config
                .deliver_calibration
                .then(|| synthetic_calibration(dims)),
            filtered: self.filtering.load(Ordering::SeqCst),
        });

        StillPhoto {
            timestamp_ns: self.timestamp_now(),
            pixel_buffer: Some(pixel_buffer),
            depth,
            settings: settings.clone(),
        }
    }
}

impl DepthSensor for SyntheticSensor {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn is_available(&self) -> bool {
        self.config.available
    }

    fn formats(&self) -> Vec<SensorFormat> {
        self.config.formats.clone()
    }

    fn lock_for_configuration(&self) -> BackendResult<()> {
        if !self.config.available {
            return Err(BackendError::NotAvailable(self.config.name.clone()));
        }
        let mut state = self.state();
        if state.locked {
            return Err(BackendError::ConfigurationLocked);
        }
        state.locked = true;
        Ok(())
    }

    fn unlock_for_configuration(&self) {
        self.state().locked = false;
    }

    fn set_active_formats(
        &self,
        format: &SensorFormat,
        depth_format: &DepthDataFormat,
    ) -> BackendResult<()> {
        let mut state = self.state();
        if !state.locked {
            return Err(BackendError::Other("configuration lock not held".to_string()));
        }
        let known = self
            .config
            .formats
            .iter()
            .any(|f| f == format && f.depth_formats.contains(depth_format));
        if !known {
            return Err(BackendError::FormatNotSupported(format.to_string()));
        }
        state.active = Some(SensorFormatSelection {
            format: format.clone(),
            depth_format: *depth_format,
        });
        Ok(())
    }

    fn set_depth_filtering(&self, enabled: bool) {
        debug!(enabled, "Synthetic sensor depth filtering");
        self.filtering.store(enabled, Ordering::SeqCst);
    }

    fn start_streaming(&self, events: SensorEventSender) -> BackendResult<()> {
        let mut state = self.state();
        let Some(selection) = state.active.clone() else {
            return Err(BackendError::FormatNotSupported(
                "no active format configured".to_string(),
            ));
        };
        if state.stream.is_some() {
            return Ok(());
        }

        if self.config.mode == SyntheticMode::Timed {
            let interval = Duration::from_nanos(selection.format.max_framerate.frame_interval_ns());
            let tx = events.clone();
            let filtering = Arc::clone(&self.filtering);
            let next_buffer = Arc::clone(&self.next_buffer);
            let pool = self.config.buffer_pool_size.max(1);
            let calibration = self.config.deliver_calibration;
            let epoch = self.epoch;

            state.producer = Some(SensorQueue::start("synthetic-producer", move || {
                let started = Instant::now();
                let timestamp_ns = epoch.elapsed().as_nanos() as u64;
                let id = BufferId(next_buffer.fetch_add(1, Ordering::Relaxed) % pool);
                let (color, depth) = make_pair(
                    &selection,
                    timestamp_ns,
                    id,
                    filtering.load(Ordering::SeqCst),
                    calibration,
                );
                if tx.send(SensorEvent::Color(color)).is_err()
                    || tx.send(SensorEvent::Depth(depth)).is_err()
                {
                    return LoopAction::Stop;
                }
                if let Some(rest) = interval.checked_sub(started.elapsed()) {
                    thread::sleep(rest);
                }
                LoopAction::Continue
            }));
        }

        state.stream = Some(events);
        info!(sensor = %self.config.name, mode = ?self.config.mode, "Synthetic stream started");
        Ok(())
    }

    fn stop_streaming(&self) {
        let producer = {
            let mut state = self.state();
            state.stream = None;
            state.producer.take()
        };
        // Joined outside the state lock; the producer never takes it.
        if let Some(mut producer) = producer {
            producer.stop();
        }
        debug!(sensor = %self.config.name, "Synthetic stream stopped");
    }

    fn photo_pixel_formats(&self) -> Vec<PixelFormat> {
        self.config.photo_pixel_formats.clone()
    }

    fn capture_photo(
        &self,
        settings: &PhotoSettings,
        events: SensorEventSender,
    ) -> BackendResult<()> {
        let selection = self.active_formats().ok_or_else(|| {
            BackendError::CaptureFailed("no active format configured".to_string())
        })?;
        if let Some(format) = settings.pixel_format
            && !self.config.photo_pixel_formats.contains(&format)
        {
            return Err(BackendError::FormatNotSupported(format.to_string()));
        }

        if !self.config.auto_complete_photos {
            self.state().pending_photos.push_back(PendingPhoto {
                settings: settings.clone(),
                events,
            });
            return Ok(());
        }

        let photo = self.make_photo(&selection, settings);
        thread::Builder::new()
            .name("synthetic-photo".to_string())
            .spawn(move || {
                if events.send(SensorEvent::PhotoCaptured(Ok(photo))).is_err() {
                    debug!("Photo receiver gone, capture discarded");
                }
            })
            .map(|_| ())
            .map_err(|e| BackendError::CaptureFailed(e.to_string()))
    }
}

impl Drop for SyntheticSensor {
    fn drop(&mut self) {
        self.stop_streaming();
    }
}

const DEPTH_POOL_BIT: u64 = 1 << 31;

fn make_pair(
    selection: &SensorFormatSelection,
    timestamp_ns: u64,
    id: BufferId,
    filtered: bool,
    calibration: bool,
) -> (ColorSample, DepthSample) {
    let frame_index = timestamp_ns / 1_000_000;
    // Depth buffers come from their own pool
    let depth_id = BufferId(id.0 | DEPTH_POOL_BIT);
    let color = ColorSample {
        timestamp_ns,
        pixel_buffer: Some(synthetic_color(
            id,
            selection.format.dimensions,
            selection.format.pixel_format.is_full_range(),
            frame_index,
        )),
    };
    let depth = DepthSample {
        timestamp_ns,
        depth: Some(DepthData {
            map: synthetic_depth(
                depth_id,
                selection.depth_format.dimensions,
                selection.depth_format.encoding,
                frame_index,
                filtered,
            ),
            calibration: calibration.then(|| synthetic_calibration(selection.format.dimensions)),
            filtered,
        }),
    };
    (color, depth)
}

/// NV12 test pattern: horizontal luma ramp shifted per frame, neutral chroma
pub fn synthetic_color(id: BufferId, dims: Dimensions, full_range: bool, frame_index: u64) -> PixelBuffer {
    let mut data = vec![128u8; PixelBuffer::nv12_len(dims)];
    let width = dims.width as usize;
    for (y, row) in data[..dims.pixel_count()].chunks_exact_mut(width.max(1)).enumerate() {
        for (x, luma) in row.iter_mut().enumerate() {
            *luma = ((x + y + frame_index as usize) % 256) as u8;
        }
    }
    PixelBuffer::nv12(id, dims, full_range, Arc::from(data))
}

/// Packed 32-bit test pattern
pub fn synthetic_packed(id: BufferId, dims: Dimensions, format: PixelFormat) -> PixelBuffer {
    let mut data = vec![255u8; dims.pixel_count() * 4];
    for (i, px) in data.chunks_exact_mut(4).enumerate() {
        let x = (i % dims.width.max(1) as usize) as u8;
        px[0] = x;
        px[1] = 128;
        px[2] = 255 - x;
    }
    PixelBuffer::packed(id, dims, format, Arc::from(data))
}

/// Tilted plane from 0.5m (top) to 5m (bottom)
///
/// Unfiltered maps carry deterministic speckle noise and invalid holes;
/// filtered maps are smoothed with a 3x3 box that fills the holes.
pub fn synthetic_depth(
    id: BufferId,
    dims: Dimensions,
    encoding: DepthEncoding,
    frame_index: u64,
    filtered: bool,
) -> DepthMap {
    let w = dims.width as usize;
    let h = dims.height as usize;
    let mut meters = vec![0.0f32; w * h];
    for y in 0..h {
        let base = 0.5 + 4.5 * y as f32 / h.max(1) as f32;
        for x in 0..w {
            let hash = (x as u64 * 73_856_093) ^ (y as u64 * 19_349_663) ^ (frame_index * 83_492_791);
            meters[y * w + x] = if hash % 31 == 0 {
                f32::NAN
            } else {
                base + ((hash % 11) as f32 - 5.0) * 0.01
            };
        }
    }

    if filtered {
        meters = box_filter(&meters, w, h);
    }

    let values: Vec<f32> = if encoding.is_disparity() {
        meters.iter().map(|&d| 1.0 / d).collect()
    } else {
        meters
    };

    DepthMap::packed(id, dims, encoding, Arc::from(encode_depth_values(&values, encoding)))
}

/// 3x3 mean over valid neighbors
fn box_filter(values: &[f32], w: usize, h: usize) -> Vec<f32> {
    let mut out = vec![f32::NAN; values.len()];
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0;
            let mut count = 0;
            for ny in y.saturating_sub(1)..(y + 2).min(h) {
                for nx in x.saturating_sub(1)..(x + 2).min(w) {
                    let v = values[ny * w + nx];
                    if v.is_finite() {
                        sum += v;
                        count += 1;
                    }
                }
            }
            if count > 0 {
                out[y * w + x] = sum / count as f32;
            }
        }
    }
    out
}

/// Pinhole intrinsics with a roughly 64° horizontal field of view
pub fn synthetic_calibration(reference: Dimensions) -> CameraCalibration {
    let f = reference.width as f32 * 0.8;
    CameraCalibration {
        intrinsic_matrix: [
            [f, 0.0, reference.width as f32 / 2.0],
            [0.0, f, reference.height as f32 / 2.0],
            [0.0, 0.0, 1.0],
        ],
        reference_dimensions: reference,
    }
}

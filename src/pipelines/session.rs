// SPDX-License-Identifier: GPL-3.0-only

//! Capture session state machine
//!
//! ```text
//!          start()                 request_still_capture()
//!   Idle ──────────▶ Streaming ─────────────────────────▶ Suspended
//!    ▲                   ▲                                    │
//!    │ stop()            └──────── resume_streaming() ────────┘
//!    └────────────────────────────── stop() ──────────────────┘
//! ```
//!
//! The control surface runs on the caller's thread and only flips state and
//! forwards requests to the sensor. Everything the sensor delivers is
//! handled on the dedicated sensor queue, which owns the fuser and the
//! still workflow; the two share nothing mutable except the texture cache.

use crate::backends::sensor::{
    BackendResult, DepthSensor, PhotoSettings, PixelFormat, QualityPrioritization, SensorEvent,
    SensorEventSender, SensorFormatSelection, SensorQueue, StillPhoto, configure,
};
use crate::config::Config;
use crate::errors::{ConfigurationError, SessionError, StillCaptureError};
use crate::media::{CacheStats, FormatConverter, TextureCache};
use crate::pipelines::fuser::{FuserStats, StreamFuser};
use crate::pipelines::handlers::Handlers;
use crate::pipelines::photo::{PhotoEncoder, StillCaptureWorkflow};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

/// Lifecycle of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Configured, no stream running
    Idle,
    /// Live stream fused and delivered
    Streaming,
    /// Stream paused for a still capture; resumed explicitly
    Suspended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Streaming => write!(f, "streaming"),
            SessionState::Suspended => write!(f, "suspended"),
        }
    }
}

/// Session counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub fused: u64,
    pub dropped: u64,
    pub stills_delivered: u64,
    pub stills_failed: u64,
    pub thumbnails_delivered: u64,
    pub photos_delivered: u64,
}

struct Shared {
    state: SessionState,
    capture_in_flight: bool,
    /// Bumped whenever streaming (re)starts
    stream_epoch: u64,
    depth_filtering: bool,
    fuser: FuserStats,
    stats: SessionStats,
}

/// State owned by the sensor queue thread
struct QueueState {
    fuser: StreamFuser,
    workflow: StillCaptureWorkflow,
    handlers: Handlers,
    shared: Arc<Mutex<Shared>>,
    stream_epoch: u64,
}

fn lock_shared(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|e| e.into_inner())
}

impl QueueState {
    fn handle(&mut self, event: SensorEvent) {
        match event {
            SensorEvent::PhotoCaptured(result) => self.handle_still(result),
            stream_event => self.handle_stream(stream_event),
        }
    }

    fn handle_stream(&mut self, event: SensorEvent) {
        let (state, epoch) = {
            let shared = lock_shared(&self.shared);
            (shared.state, shared.stream_epoch)
        };
        if state != SessionState::Streaming {
            trace!(%state, timestamp_ns = ?event.timestamp_ns(), "Discarding arrival outside streaming");
            return;
        }
        if epoch != self.stream_epoch {
            self.fuser.reset();
            self.stream_epoch = epoch;
        }

        let frame = self.fuser.push(event);
        lock_shared(&self.shared).fuser = self.fuser.stats();
        if let Some(frame) = frame {
            self.handlers.frame(frame);
        }
    }

    fn handle_still(&mut self, result: BackendResult<StillPhoto>) {
        // Cleared first so consumers may resume from the still callback
        lock_shared(&self.shared).capture_in_flight = false;

        let outcome = result
            .map_err(StillCaptureError::Backend)
            .and_then(|photo| self.workflow.process(photo, &self.handlers));

        let mut shared = lock_shared(&self.shared);
        match outcome {
            Ok(report) => {
                shared.stats.stills_delivered += 1;
                shared.stats.thumbnails_delivered += report.thumbnail_delivered as u64;
                shared.stats.photos_delivered += report.photo_delivered as u64;
            }
            Err(e) => {
                shared.stats.stills_failed += 1;
                warn!(error = %e, "Still capture failed");
            }
        }
    }
}

/// A configured sensor plus its delivery queue and control surface
pub struct CaptureSession {
    sensor: Arc<dyn DepthSensor>,
    selection: SensorFormatSelection,
    shared: Arc<Mutex<Shared>>,
    events: SensorEventSender,
    photo_settings: PhotoSettings,
    cache: Arc<TextureCache>,
    queue: SensorQueue,
}

impl CaptureSession {
    /// Configure `sensor` and spawn the sensor queue
    ///
    /// Fails if the sensor is unavailable or offers no matching mode; the
    /// session is unusable in that case.
    pub fn new(
        sensor: Arc<dyn DepthSensor>,
        config: &Config,
        handlers: Handlers,
    ) -> Result<Self, ConfigurationError> {
        let selection = configure(sensor.as_ref(), &config.format)?;
        sensor.set_depth_filtering(config.depth_filtering);

        let cache = Arc::new(TextureCache::new(config.texture_cache_capacity));
        let converter = FormatConverter::new(Arc::clone(&cache));
        let workflow = StillCaptureWorkflow::new(
            converter.clone(),
            PhotoEncoder::new(config.photo_quality, config.embed_depth_in_photo),
            config.thumbnail,
        );

        let shared = Arc::new(Mutex::new(Shared {
            state: SessionState::Idle,
            capture_in_flight: false,
            stream_epoch: 0,
            depth_filtering: config.depth_filtering,
            fuser: FuserStats::default(),
            stats: SessionStats::default(),
        }));

        let (events, receiver) = mpsc::channel();
        let queue_shared = Arc::clone(&shared);
        let queue = SensorQueue::spawn_event_loop(
            "sensor-queue",
            receiver,
            config.queue_poll_interval(),
            move || {
                Ok(QueueState {
                    fuser: StreamFuser::new(converter),
                    workflow,
                    handlers,
                    shared: queue_shared,
                    stream_epoch: 0,
                })
            },
            |state: &mut QueueState, event| state.handle(event),
        );

        let pixel_format = sensor
            .photo_pixel_formats()
            .contains(&PixelFormat::Nv12FullRange)
            .then_some(PixelFormat::Nv12FullRange);
        let photo_settings = PhotoSettings {
            pixel_format,
            quality: QualityPrioritization::Quality,
            depth_delivery: true,
            embed_depth: config.embed_depth_in_photo,
        };

        info!(sensor = %sensor.name(), selection = %selection, "Capture session configured");

        Ok(Self {
            sensor,
            selection,
            shared,
            events,
            photo_settings,
            cache,
            queue,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.shared)
    }

    pub fn state(&self) -> SessionState {
        self.lock().state
    }

    /// Formats chosen at setup
    pub fn selection(&self) -> &SensorFormatSelection {
        &self.selection
    }

    pub fn is_capture_in_flight(&self) -> bool {
        self.lock().capture_in_flight
    }

    pub fn stats(&self) -> SessionStats {
        let shared = self.lock();
        SessionStats {
            fused: shared.fuser.fused,
            dropped: shared.fuser.dropped,
            ..shared.stats
        }
    }

    pub fn texture_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Begin streaming
    ///
    /// No-op while streaming; resumes a suspended session. Rejected while a
    /// still capture is in flight, even after `stop()`.
    pub fn start(&self) -> Result<(), SessionError> {
        let mut shared = self.lock();
        if shared.capture_in_flight {
            debug!(state = %shared.state, "Start rejected, still capture in flight");
            return Err(SessionError::CaptureInFlight);
        }
        match shared.state {
            SessionState::Streaming => Ok(()),
            SessionState::Idle | SessionState::Suspended => self.begin_stream(&mut shared),
        }
    }

    /// Stop streaming and return to idle
    pub fn stop(&self) {
        let mut shared = self.lock();
        if shared.state == SessionState::Idle {
            return;
        }
        self.sensor.stop_streaming();
        info!(from = %shared.state, "Session stopped");
        shared.state = SessionState::Idle;
    }

    /// Suspend the stream and request a one-shot capture
    ///
    /// Rejected with `CaptureInFlight` while an earlier capture has not
    /// completed, and with `NotRunning` on an idle session.
    pub fn request_still_capture(&self) -> Result<(), SessionError> {
        let mut shared = self.lock();
        if shared.state == SessionState::Idle {
            return Err(SessionError::NotRunning);
        }
        if shared.capture_in_flight {
            debug!("Still capture rejected, one is already in flight");
            return Err(SessionError::CaptureInFlight);
        }

        if shared.state == SessionState::Streaming {
            self.sensor.stop_streaming();
            shared.state = SessionState::Suspended;
            info!("Stream suspended for still capture");
        }

        shared.capture_in_flight = true;
        if let Err(e) = self
            .sensor
            .capture_photo(&self.photo_settings, self.events.clone())
        {
            shared.capture_in_flight = false;
            warn!(error = %e, "Sensor rejected still capture");
            return Err(SessionError::Backend(e));
        }
        debug!(settings = ?self.photo_settings, "Still capture requested");
        Ok(())
    }

    /// Restart the stream after a still capture
    pub fn resume_streaming(&self) -> Result<(), SessionError> {
        let mut shared = self.lock();
        match shared.state {
            SessionState::Streaming => Ok(()),
            SessionState::Idle => Err(SessionError::NotRunning),
            SessionState::Suspended if shared.capture_in_flight => Err(SessionError::CaptureInFlight),
            SessionState::Suspended => self.begin_stream(&mut shared),
        }
    }

    fn begin_stream(&self, shared: &mut Shared) -> Result<(), SessionError> {
        self.sensor.start_streaming(self.events.clone())?;
        shared.stream_epoch += 1;
        info!(from = %shared.state, epoch = shared.stream_epoch, "Streaming");
        shared.state = SessionState::Streaming;
        Ok(())
    }

    /// Toggle hardware depth smoothing; affects later frames only
    pub fn set_depth_filtering(&self, enabled: bool) {
        let mut shared = self.lock();
        self.sensor.set_depth_filtering(enabled);
        shared.depth_filtering = enabled;
        info!(enabled, "Depth filtering");
    }

    pub fn is_depth_filtering_enabled(&self) -> bool {
        self.lock().depth_filtering
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.stop();
        self.queue.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::{Dimensions, SyntheticSensor, SyntheticSensorConfig};
    use std::time::{Duration, Instant};

    fn manual_session() -> (Arc<SyntheticSensor>, CaptureSession) {
        let sensor = Arc::new(SyntheticSensor::new(SyntheticSensorConfig::manual(
            Dimensions::new(1920, 1440),
            Dimensions::new(32, 24),
        )));
        let session = CaptureSession::new(sensor.clone(), &Config::default(), Handlers::new()).unwrap();
        (sensor, session)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_new_session_is_idle() {
        let (sensor, session) = manual_session();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!sensor.is_streaming());
        assert_eq!(session.selection().format.dimensions, Dimensions::new(1920, 1440));
        assert_eq!(session.stats(), SessionStats::default());
    }

    #[test]
    fn test_start_is_idempotent() {
        let (sensor, session) = manual_session();
        session.start().unwrap();
        session.start().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(sensor.is_streaming());

        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!sensor.is_streaming());
    }

    #[test]
    fn test_still_requires_running_session() {
        let (_sensor, session) = manual_session();
        assert_eq!(session.request_still_capture(), Err(SessionError::NotRunning));
        assert_eq!(session.resume_streaming(), Err(SessionError::NotRunning));
    }

    #[test]
    fn test_still_suspends_until_resumed() {
        let (sensor, session) = manual_session();
        session.start().unwrap();

        session.request_still_capture().unwrap();
        assert_eq!(session.state(), SessionState::Suspended);
        assert!(!sensor.is_streaming());
        assert_eq!(session.request_still_capture(), Err(SessionError::CaptureInFlight));
        assert_eq!(session.resume_streaming(), Err(SessionError::CaptureInFlight));

        assert!(sensor.complete_pending_photo());
        assert!(wait_until(|| session.stats().stills_delivered == 1));
        assert_eq!(session.state(), SessionState::Suspended);

        session.resume_streaming().unwrap();
        assert_eq!(session.state(), SessionState::Streaming);
        assert!(sensor.is_streaming());
    }

    #[test]
    fn test_frames_are_fused_while_streaming() {
        let (sensor, session) = manual_session();
        session.start().unwrap();
        for ts in 1..=3 {
            assert!(sensor.push_frame(ts));
        }
        assert!(wait_until(|| session.stats().fused == 3));
        assert!(session.texture_cache_stats().misses > 0);
    }

    #[test]
    fn test_filtering_toggle_reaches_sensor() {
        let (sensor, session) = manual_session();
        assert!(session.is_depth_filtering_enabled());
        session.set_depth_filtering(false);
        assert!(!session.is_depth_filtering_enabled());
        assert!(!sensor.is_depth_filtering_enabled());
    }
}

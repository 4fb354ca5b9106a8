// SPDX-License-Identifier: GPL-3.0-only

//! Depth sensor backend abstraction
//!
//! ```text
//! ┌─────────────────────┐
//! │   CaptureSession    │  ← state machine, control surface
//! └──────────┬──────────┘
//!            │ configure / start / capture_photo
//!            ▼
//! ┌─────────────────────┐
//! │  DepthSensor Trait  │  ← common interface
//! └──────────┬──────────┘
//!            │ SensorEvent (color, depth, photo)
//!            ▼
//! ┌─────────────────────┐
//! │    SensorQueue      │  ← dedicated delivery thread
//! └─────────────────────┘
//! ```

pub mod configurator;
pub mod sensor_queue;
pub mod synthetic;
pub mod types;

pub use configurator::{
    ConfigurationLock, FormatRequirements, SensorFormatSelection, configure, select_formats,
};
pub use sensor_queue::{LoopAction, SensorQueue};
pub use synthetic::{SyntheticSensor, SyntheticSensorConfig};
pub use types::*;

use crate::errors::ConfigurationError;
use std::sync::Arc;
use tracing::{debug, info};

/// Interface every depth-capable sensor backend implements
///
/// Methods take `&self`; backends keep their own interior state so one
/// sensor can be shared between the control surface and the delivery queue.
pub trait DepthSensor: Send + Sync {
    // ===== Metadata =====

    /// Human-readable sensor name
    fn name(&self) -> &str;

    /// Whether the hardware is present and powered
    fn is_available(&self) -> bool;

    /// All operating modes, in the order the hardware enumerates them
    /// (capability-ascending)
    fn formats(&self) -> Vec<SensorFormat>;

    // ===== Configuration =====

    /// Take the exclusive configuration lock
    fn lock_for_configuration(&self) -> BackendResult<()>;

    /// Release the configuration lock
    fn unlock_for_configuration(&self);

    /// Make `format` and `depth_format` the active modes
    ///
    /// Only valid while the configuration lock is held.
    fn set_active_formats(
        &self,
        format: &SensorFormat,
        depth_format: &DepthDataFormat,
    ) -> BackendResult<()>;

    /// Toggle hardware smoothing of depth maps; applies to later frames only
    fn set_depth_filtering(&self, enabled: bool);

    // ===== Streaming =====

    /// Begin delivering color and depth arrivals into `events`
    fn start_streaming(&self, events: SensorEventSender) -> BackendResult<()>;

    /// Stop delivering stream arrivals
    fn stop_streaming(&self);

    // ===== Still capture =====

    /// Pixel formats a still capture can be delivered in
    fn photo_pixel_formats(&self) -> Vec<PixelFormat>;

    /// Request a one-shot capture
    ///
    /// Returns once the request is accepted; the outcome arrives later as
    /// `SensorEvent::PhotoCaptured` on `events`.
    fn capture_photo(&self, settings: &PhotoSettings, events: SensorEventSender)
    -> BackendResult<()>;
}

/// Pick the first available sensor that offers any depth-capable mode
pub fn find_depth_sensor(
    candidates: &[Arc<dyn DepthSensor>],
) -> Result<Arc<dyn DepthSensor>, ConfigurationError> {
    for sensor in candidates {
        if !sensor.is_available() {
            debug!(sensor = %sensor.name(), "Skipping unavailable sensor");
            continue;
        }
        if sensor.formats().iter().any(|f| !f.depth_formats.is_empty()) {
            info!(sensor = %sensor.name(), "Found depth sensor");
            return Ok(Arc::clone(sensor));
        }
        debug!(sensor = %sensor.name(), "Sensor has no depth-capable modes");
    }
    Err(ConfigurationError::SensorUnavailable)
}

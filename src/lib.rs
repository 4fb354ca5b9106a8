// SPDX-License-Identifier: GPL-3.0-only

//! depthcam - capture and fusion pipeline for depth-sensing cameras
//!
//! Drives a depth-capable sensor, pairs color and depth arrivals that share
//! a capture instant, binds them as GPU-ready planes and runs a one-shot
//! still workflow producing a photo with embedded depth and a compact
//! depth thumbnail.
//!
//! # Architecture
//!
//! - [`backends`]: sensor abstraction, format selection, delivery queue
//! - [`media`]: texture cache, format conversion, half-float depth codec
//! - [`pipelines`]: stream fuser, capture session, still workflow
//! - [`control`]: write-only remote control link
//! - [`config`]: user configuration handling
//!
//! # Example
//!
//! ```ignore
//! use depthcam::backends::sensor::{SyntheticSensor, SyntheticSensorConfig};
//! use depthcam::{CaptureSession, Config, Handlers};
//! use std::sync::Arc;
//!
//! let sensor = Arc::new(SyntheticSensor::new(SyntheticSensorConfig::default()));
//! let handlers = Handlers::new().on_frame(|frame| println!("{}", frame.timestamp_ns));
//! let session = CaptureSession::new(sensor, &Config::default(), handlers)?;
//! session.start()?;
//! ```

pub mod backends;
pub mod config;
pub mod constants;
pub mod control;
pub mod errors;
pub mod media;
pub mod pipelines;

// Re-export commonly used types
pub use config::Config;
pub use errors::{AppError, AppResult, ConfigurationError, SessionError, StillCaptureError};
pub use media::CapturedFrame;
pub use pipelines::{CaptureSession, Handlers, SessionState, SessionStats};

// SPDX-License-Identifier: GPL-3.0-only

//! Capture pipelines
//!
//! Everything below runs on the sensor queue thread, fed by the sensor:
//!
//! ```text
//! ┌──────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ Color + Depth│ ──▶ │   StreamFuser    │ ──▶ │ on_frame      │
//! │  arrivals    │     │  - exact pairing │     │ CapturedFrame │
//! │              │     │  - texture bind  │     │               │
//! └──────────────┘     └──────────────────┘     └───────────────┘
//!
//! ┌──────────────┐     ┌──────────────────┐     ┌───────────────┐
//! │ Still photo  │ ──▶ │ StillCapture     │ ──▶ │ on_still_frame│
//! │  completion  │     │  - depth to f16  │     │ on_thumbnail  │
//! │              │     │  - thumbnail     │     │ on_photo      │
//! │              │     │  - JPEG + depth  │     │               │
//! └──────────────┘     └──────────────────┘     └───────────────┘
//! ```
//!
//! [`session::CaptureSession`] owns the queue and drives the state machine
//! that decides which of the two paths is live.

pub mod fuser;
pub mod handlers;
pub mod photo;
pub mod session;

pub use fuser::{FuserStats, StreamFuser};
pub use handlers::{Handler, Handlers, channel_handler};
pub use session::{CaptureSession, SessionState, SessionStats};

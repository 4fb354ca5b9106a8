// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

use std::time::Duration;

/// Smallest acceptable color width for a session
pub const DEFAULT_MIN_WIDTH: u32 = 1920;

/// Depth thumbnail grid width
pub const DEFAULT_THUMBNAIL_WIDTH: u32 = 10;

/// Depth thumbnail grid height
pub const DEFAULT_THUMBNAIL_HEIGHT: u32 = 100;

/// Bound planes kept by the texture cache
pub const DEFAULT_TEXTURE_CACHE_CAPACITY: usize = 16;

/// How often an idle sensor queue re-checks its stop signal
pub const DEFAULT_QUEUE_POLL_INTERVAL_MS: u64 = 50;

/// Identifier opening every auxiliary depth segment
pub const AUX_DEPTH_IDENTIFIER: &[u8] = b"DEPTHAUX\0";

/// Largest depth blob slice per APP11 segment
///
/// 65535 segment bytes minus the length field, identifier and sequence.
pub const AUX_DEPTH_MAX_CHUNK: usize = 65535 - 2 - 9 - 4;

/// CLI timing
pub mod timing {
    use super::Duration;

    /// Streaming time before the CLI requests a still
    pub const PHOTO_WARMUP: Duration = Duration::from_millis(300);

    /// How long the CLI waits for a still capture to complete
    pub const PHOTO_TIMEOUT: Duration = Duration::from_secs(10);

    /// How long the CLI waits for the next streamed frame
    pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);
}

/// Output file naming
pub mod file_names {
    /// Prefix of still photos
    pub const PHOTO_PREFIX: &str = "IMG";

    /// Prefix of depth thumbnails
    pub const THUMBNAIL_PREFIX: &str = "DEPTH";

    /// Directory created under the pictures folder
    pub const APP_DIR: &str = "depthcam";
}

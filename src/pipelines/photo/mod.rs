// SPDX-License-Identifier: GPL-3.0-only

//! Still photo workflow
//!
//! Runs on the sensor queue when a still capture completes:
//!
//! ```text
//! StillPhoto → validate → depth to f16 → CapturedFrame → still consumer
//!                                     ├→ ThumbnailGrid → thumbnail consumer (best-effort)
//!                                     └→ JPEG + aux depth → photo consumer (best-effort)
//! ```
//!
//! Only the first branch can fail the capture; thumbnail and encoding
//! problems are logged and the still frame is delivered regardless.

pub mod encoding;
pub mod thumbnail;

pub use encoding::{
    EmbedError, EncodedPhoto, EncodingFormat, EncodingQuality, PhotoEncoder, embed_auxiliary_depth,
    encode_png, read_auxiliary_depth,
};
pub use thumbnail::{
    ContrastMode, ThumbnailConfig, ThumbnailError, ThumbnailGrid, area_resample, rasterize_depth,
    reduce_depth,
};

use crate::backends::sensor::{DepthEncoding, StillPhoto};
use crate::errors::StillCaptureError;
use crate::media::{FormatConverter, convert_depth_map};
use crate::pipelines::handlers::Handlers;
use tracing::{info, warn};

/// What a successful still capture produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StillReport {
    pub timestamp_ns: u64,
    pub thumbnail_delivered: bool,
    pub photo_delivered: bool,
    pub depth_embedded: bool,
}

/// Turns a completed still capture into frame, thumbnail and photo
pub struct StillCaptureWorkflow {
    converter: FormatConverter,
    encoder: PhotoEncoder,
    thumbnail: ThumbnailConfig,
}

impl StillCaptureWorkflow {
    pub fn new(converter: FormatConverter, encoder: PhotoEncoder, thumbnail: ThumbnailConfig) -> Self {
        Self {
            converter,
            encoder,
            thumbnail,
        }
    }

    /// Process one completed capture and notify `handlers`
    pub fn process(
        &self,
        photo: StillPhoto,
        handlers: &Handlers,
    ) -> Result<StillReport, StillCaptureError> {
        let ts = photo.timestamp_ns;
        let pixel_buffer = photo
            .pixel_buffer
            .ok_or(StillCaptureError::MissingPixelBuffer)?;
        let depth = photo.depth.ok_or(StillCaptureError::MissingDepthData)?;
        let calibration = depth
            .calibration
            .ok_or(StillCaptureError::MissingCalibration)?;

        // Stills may come in another native encoding than the stream
        let depth_map = convert_depth_map(&depth.map, DepthEncoding::DepthFloat16)?;

        let frame = self
            .converter
            .build_frame(ts, &pixel_buffer, &depth_map, &calibration, depth.filtered)
            .ok_or(StillCaptureError::TextureBinding)?;

        info!(
            timestamp_ns = ts,
            color = %pixel_buffer.dimensions,
            depth = %depth_map.dimensions,
            native_depth = %depth.map.encoding,
            "Still frame ready"
        );
        handlers.still_frame(frame);

        let mut report = StillReport {
            timestamp_ns: ts,
            thumbnail_delivered: false,
            photo_delivered: false,
            depth_embedded: false,
        };

        if handlers.wants_thumbnail() {
            match reduce_depth(&depth_map, &self.thumbnail) {
                Ok(grid) => {
                    handlers.thumbnail(grid);
                    report.thumbnail_delivered = true;
                }
                Err(e) => warn!(timestamp_ns = ts, error = %e, "Depth thumbnail failed"),
            }
        }

        if handlers.wants_photo() {
            let embed = photo.settings.embed_depth.then_some(&depth_map);
            match self.encoder.encode(&pixel_buffer, embed) {
                Ok(encoded) => {
                    if photo.settings.embed_depth && !encoded.depth_embedded {
                        warn!(timestamp_ns = ts, "Photo delivered without auxiliary depth");
                    }
                    report.depth_embedded = encoded.depth_embedded;
                    handlers.photo(encoded);
                    report.photo_delivered = true;
                }
                Err(e) => warn!(timestamp_ns = ts, error = %e, "Photo encoding failed"),
            }
        }

        Ok(report)
    }
}

// SPDX-License-Identifier: GPL-3.0-only

//! Sensor buffer to renderer texture conversion
//!
//! No pixels are touched: color planes and the depth map are passed through
//! at their native size and only re-tagged with the texture format the
//! renderer samples them as (8-bit luma, 8-bit two-channel chroma, 16-bit
//! float depth).

use super::texture_cache::{PlaneTexture, TextureBindError, TextureCache};
use crate::backends::sensor::{
    CameraCalibration, DepthEncoding, DepthMap, Dimensions, PixelBuffer,
};
use std::sync::Arc;
use tracing::trace;

/// One fused color + depth sample
///
/// Both halves come from the same capture instant. Immutable once built.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp_ns: u64,
    /// Depth plane, `R16Float`
    pub depth: Arc<PlaneTexture>,
    /// Luma plane, `R8Unorm`
    pub color_y: Arc<PlaneTexture>,
    /// Interleaved chroma plane, `Rg8Unorm`
    pub color_cbcr: Arc<PlaneTexture>,
    /// Row-major camera intrinsics
    pub intrinsic_matrix: [[f32; 3]; 3],
    /// Resolution `intrinsic_matrix` is expressed in
    pub intrinsic_reference_dimensions: Dimensions,
    /// Depth was smoothed by the sensor
    pub depth_filtered: bool,
}

impl CapturedFrame {
    pub fn color_dimensions(&self) -> Dimensions {
        Dimensions::new(self.color_y.width, self.color_y.height)
    }

    pub fn depth_dimensions(&self) -> Dimensions {
        Dimensions::new(self.depth.width, self.depth.height)
    }

    /// Intrinsics rescaled for a consumer sampling at `dimensions`
    pub fn intrinsics_for(&self, dimensions: Dimensions) -> [[f32; 3]; 3] {
        CameraCalibration {
            intrinsic_matrix: self.intrinsic_matrix,
            reference_dimensions: self.intrinsic_reference_dimensions,
        }
        .scaled_to(dimensions)
    }
}

/// Binds sensor buffers as textures through a shared [`TextureCache`]
#[derive(Clone)]
pub struct FormatConverter {
    cache: Arc<TextureCache>,
}

impl FormatConverter {
    pub fn new(cache: Arc<TextureCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<TextureCache> {
        &self.cache
    }

    /// Luma and chroma planes of a bi-planar color buffer
    pub fn convert_color(
        &self,
        buffer: &PixelBuffer,
    ) -> Result<(Arc<PlaneTexture>, Arc<PlaneTexture>), TextureBindError> {
        if !buffer.format.is_biplanar() {
            return Err(TextureBindError::UnsupportedFormat(
                wgpu::TextureFormat::Rgba8Unorm,
            ));
        }
        let (Some(luma), Some(chroma)) = (buffer.plane(0), buffer.plane(1)) else {
            return Err(TextureBindError::EmptyPlane);
        };

        let y = self.cache.bind(
            buffer.id,
            0,
            &buffer.data,
            *luma,
            wgpu::TextureFormat::R8Unorm,
        )?;
        let cbcr = self.cache.bind(
            buffer.id,
            1,
            &buffer.data,
            *chroma,
            wgpu::TextureFormat::Rg8Unorm,
        )?;
        Ok((y, cbcr))
    }

    /// Depth plane of a half-float depth map
    pub fn convert_depth(&self, map: &DepthMap) -> Result<Arc<PlaneTexture>, TextureBindError> {
        if map.encoding != DepthEncoding::DepthFloat16 {
            return Err(TextureBindError::UnsupportedFormat(
                wgpu::TextureFormat::R32Float,
            ));
        }
        self.cache.bind(
            map.id,
            0,
            &map.data,
            map.layout(),
            wgpu::TextureFormat::R16Float,
        )
    }

    /// Fuse one color buffer and one depth map into a frame
    ///
    /// `None` when either side cannot be bound; callers drop the sample.
    pub fn build_frame(
        &self,
        timestamp_ns: u64,
        color: &PixelBuffer,
        depth: &DepthMap,
        calibration: &CameraCalibration,
        depth_filtered: bool,
    ) -> Option<CapturedFrame> {
        let bound = self
            .convert_color(color)
            .and_then(|planes| self.convert_depth(depth).map(|d| (planes, d)));

        match bound {
            Ok(((color_y, color_cbcr), depth)) => Some(CapturedFrame {
                timestamp_ns,
                depth,
                color_y,
                color_cbcr,
                intrinsic_matrix: calibration.intrinsic_matrix,
                intrinsic_reference_dimensions: calibration.reference_dimensions,
                depth_filtered,
            }),
            Err(e) => {
                trace!(timestamp_ns, error = %e, "Texture binding failed");
                None
            }
        }
    }
}

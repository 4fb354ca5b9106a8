// SPDX-License-Identifier: GPL-3.0-only

//! Depth thumbnail reduction
//!
//! A depth map of any resolution becomes a fixed, small grid of 8-bit gray
//! values for low-bandwidth transmission:
//!
//! 1. Contrast filter maps each depth sample to 0..=255
//! 2. The result is rasterized to a full-resolution [`GrayImage`]
//! 3. The image is area-resampled to exactly `width x height` cells

use crate::backends::sensor::DepthMap;
use crate::constants::{DEFAULT_THUMBNAIL_HEIGHT, DEFAULT_THUMBNAIL_WIDTH};
use crate::media::depth_float::{DepthConversionError, decode_depth_values};
use image::GrayImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// How depth values are mapped to gray levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ContrastMode {
    /// Stretch the finite value range of the map to 0..=255
    #[default]
    MinMax,
    /// Clamp values to [0, 1] and scale to 0..=255
    Clamp,
}

/// Thumbnail grid parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub width: u32,
    pub height: u32,
    pub contrast: ContrastMode,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_THUMBNAIL_WIDTH,
            height: DEFAULT_THUMBNAIL_HEIGHT,
            contrast: ContrastMode::MinMax,
        }
    }
}

/// Reasons no thumbnail could be derived
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailError {
    /// The map holds no finite sample
    NoDepthData,
    /// Requested grid has a zero dimension
    EmptyGrid,
    /// Depth samples could not be read
    Depth(DepthConversionError),
}

impl std::fmt::Display for ThumbnailError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoDepthData => write!(f, "Depth map has no valid samples"),
            Self::EmptyGrid => write!(f, "Thumbnail grid size is zero"),
            Self::Depth(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ThumbnailError {}

impl From<DepthConversionError> for ThumbnailError {
    fn from(err: DepthConversionError) -> Self {
        ThumbnailError::Depth(err)
    }
}

/// Fixed-size grid of 8-bit gray samples, row-major
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailGrid {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl ThumbnailGrid {
    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.data.chunks_exact(self.width as usize)
    }

    pub fn get(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.data.get((y * self.width + x) as usize).copied()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn to_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            image::Luma([self.data[(y * self.width + x) as usize]])
        })
    }
}

/// Render `map` to a full-resolution gray image
pub fn rasterize_depth(map: &DepthMap, contrast: ContrastMode) -> Result<GrayImage, ThumbnailError> {
    let values = decode_depth_values(map)?;

    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold(None, |acc: Option<(f32, f32)>, &v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
        .ok_or(ThumbnailError::NoDepthData)?;

    let to_gray = |v: f32| -> u8 {
        if !v.is_finite() {
            return 0;
        }
        match contrast {
            ContrastMode::MinMax if max - min <= f32::EPSILON => 128,
            ContrastMode::MinMax => ((v - min) / (max - min) * 255.0).round() as u8,
            ContrastMode::Clamp => (v.clamp(0.0, 1.0) * 255.0).round() as u8,
        }
    };

    let gray: Vec<u8> = values.into_iter().map(to_gray).collect();
    GrayImage::from_raw(map.dimensions.width, map.dimensions.height, gray)
        .ok_or(ThumbnailError::NoDepthData)
}

/// Area-average `image` down (or up) to `width x height`
///
/// Each output cell averages the source pixels it covers, weighted by the
/// exact fraction of each pixel inside the cell.
pub fn area_resample(image: &GrayImage, width: u32, height: u32) -> Vec<u8> {
    let (src_w, src_h) = image.dimensions();
    if width == 0 || height == 0 || src_w == 0 || src_h == 0 {
        return Vec::new();
    }

    let cell_w = src_w as f64 / width as f64;
    let cell_h = src_h as f64 / height as f64;
    let raw = image.as_raw();
    let mut out = Vec::with_capacity((width * height) as usize);

    for cy in 0..height {
        let y0 = cy as f64 * cell_h;
        let y1 = (cy + 1) as f64 * cell_h;
        for cx in 0..width {
            let x0 = cx as f64 * cell_w;
            let x1 = (cx + 1) as f64 * cell_w;

            let mut sum = 0.0;
            let mut weight = 0.0;
            for py in y0.floor() as u32..(y1.ceil() as u32).min(src_h) {
                let wy = (y1.min(py as f64 + 1.0) - y0.max(py as f64)).max(0.0);
                if wy == 0.0 {
                    continue;
                }
                let row = (py * src_w) as usize;
                for px in x0.floor() as u32..(x1.ceil() as u32).min(src_w) {
                    let wx = (x1.min(px as f64 + 1.0) - x0.max(px as f64)).max(0.0);
                    let w = wx * wy;
                    sum += raw[row + px as usize] as f64 * w;
                    weight += w;
                }
            }

            out.push(if weight > 0.0 {
                (sum / weight).round().clamp(0.0, 255.0) as u8
            } else {
                0
            });
        }
    }
    out
}

/// Reduce `map` to a thumbnail grid
pub fn reduce_depth(map: &DepthMap, config: &ThumbnailConfig) -> Result<ThumbnailGrid, ThumbnailError> {
    if config.width == 0 || config.height == 0 {
        return Err(ThumbnailError::EmptyGrid);
    }

    let image = rasterize_depth(map, config.contrast)?;
    let data = area_resample(&image, config.width, config.height);
    debug!(
        source = %map.dimensions,
        width = config.width,
        height = config.height,
        "Reduced depth thumbnail"
    );

    Ok(ThumbnailGrid {
        width: config.width,
        height: config.height,
        data,
    })
}

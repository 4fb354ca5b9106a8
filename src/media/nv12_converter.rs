// SPDX-License-Identifier: GPL-3.0-only

//! Still pixel buffer to RGB conversion for photo encoding
//!
//! Integer BT.601 math, two rows and two pixels at a time so each chroma
//! sample is read once per 2x2 block.

use crate::backends::sensor::{PixelBuffer, PixelFormat, PlaneLayout};
use crate::errors::PhotoError;
use image::RgbImage;
use tracing::debug;

/// Fixed-point (>> 7) BT.601 coefficients
#[derive(Debug, Clone, Copy)]
struct YuvCoefficients {
    y_offset: i32,
    y_scale: i32,
    r_v: i32,
    g_u: i32,
    g_v: i32,
    b_u: i32,
}

const FULL_RANGE: YuvCoefficients = YuvCoefficients {
    y_offset: 0,
    y_scale: 128,
    r_v: 179,
    g_u: 44,
    g_v: 91,
    b_u: 227,
};

const VIDEO_RANGE: YuvCoefficients = YuvCoefficients {
    y_offset: 16,
    y_scale: 149,
    r_v: 204,
    g_u: 50,
    g_v: 104,
    b_u: 258,
};

/// Convert any supported still buffer to packed RGB
pub fn pixel_buffer_to_rgb(buffer: &PixelBuffer) -> Result<RgbImage, PhotoError> {
    debug!(
        width = buffer.dimensions.width,
        height = buffer.dimensions.height,
        format = %buffer.format,
        "Converting still buffer to RGB"
    );

    match buffer.format {
        PixelFormat::Nv12FullRange => convert_nv12(buffer, &FULL_RANGE),
        PixelFormat::Nv12VideoRange => convert_nv12(buffer, &VIDEO_RANGE),
        PixelFormat::Bgra => convert_packed(buffer, [2, 1, 0]),
        PixelFormat::Rgba => convert_packed(buffer, [0, 1, 2]),
    }
}

fn check_plane(
    data_len: usize,
    plane: Option<&PlaneLayout>,
    row_bytes: usize,
) -> Result<PlaneLayout, PhotoError> {
    let plane = *plane.ok_or_else(|| PhotoError::InvalidBuffer("missing plane".to_string()))?;
    if (plane.stride as usize) < row_bytes {
        return Err(PhotoError::InvalidBuffer(format!(
            "stride {} below row size {}",
            plane.stride, row_bytes
        )));
    }
    let end = plane.offset + plane.stride as usize * (plane.height as usize).saturating_sub(1) + row_bytes;
    if end > data_len {
        return Err(PhotoError::InvalidBuffer(format!(
            "plane ends at {} past buffer of {} bytes",
            end, data_len
        )));
    }
    Ok(plane)
}

fn convert_nv12(buffer: &PixelBuffer, coeffs: &YuvCoefficients) -> Result<RgbImage, PhotoError> {
    let width = buffer.dimensions.width as usize;
    let height = buffer.dimensions.height as usize;
    if width == 0 || height == 0 {
        return Err(PhotoError::InvalidBuffer("empty buffer".to_string()));
    }

    let y_layout = check_plane(buffer.data.len(), buffer.plane(0), width)?;
    let uv_layout = check_plane(buffer.data.len(), buffer.plane(1), width.div_ceil(2) * 2)?;
    if (y_layout.height as usize) < height || (uv_layout.height as usize) < height.div_ceil(2) {
        return Err(PhotoError::InvalidBuffer("plane shorter than image".to_string()));
    }

    let y_plane = &buffer.data[y_layout.offset..];
    let uv_plane = &buffer.data[uv_layout.offset..];
    let y_stride = y_layout.stride as usize;
    let uv_stride = uv_layout.stride as usize;

    let mut rgb_data = vec![0u8; width * height * 3];

    // Two rows share one chroma row
    for y_idx in (0..height).step_by(2) {
        let uv_row = y_idx / 2;
        process_row(y_plane, uv_plane, &mut rgb_data, y_idx, uv_row, width, y_stride, uv_stride, coeffs);
        if y_idx + 1 < height {
            process_row(
                y_plane,
                uv_plane,
                &mut rgb_data,
                y_idx + 1,
                uv_row,
                width,
                y_stride,
                uv_stride,
                coeffs,
            );
        }
    }

    RgbImage::from_raw(width as u32, height as u32, rgb_data)
        .ok_or_else(|| PhotoError::InvalidBuffer("failed to create RGB image".to_string()))
}

#[inline]
#[allow(clippy::too_many_arguments)]
fn process_row(
    y_plane: &[u8],
    uv_plane: &[u8],
    rgb_data: &mut [u8],
    y_idx: usize,
    uv_row: usize,
    width: usize,
    y_stride: usize,
    uv_stride: usize,
    c: &YuvCoefficients,
) {
    let y_row_start = y_idx * y_stride;
    let uv_row_start = uv_row * uv_stride;
    let rgb_row_start = y_idx * width * 3;

    for x_idx in (0..width).step_by(2) {
        let uv_offset = uv_row_start + x_idx;
        let u = uv_plane[uv_offset] as i32 - 128;
        let v = uv_plane[uv_offset + 1] as i32 - 128;

        let r_v = (c.r_v * v) >> 7;
        let g_uv = ((c.g_u * u) >> 7) + ((c.g_v * v) >> 7);
        let b_u = (c.b_u * u) >> 7;

        for dx in 0..2.min(width - x_idx) {
            let luma = ((y_plane[y_row_start + x_idx + dx] as i32 - c.y_offset) * c.y_scale) >> 7;
            let out = rgb_row_start + (x_idx + dx) * 3;
            rgb_data[out] = (luma + r_v).clamp(0, 255) as u8;
            rgb_data[out + 1] = (luma - g_uv).clamp(0, 255) as u8;
            rgb_data[out + 2] = (luma + b_u).clamp(0, 255) as u8;
        }
    }
}

/// Drop alpha from a 32-bit buffer; `order` gives the R, G, B byte indices
fn convert_packed(buffer: &PixelBuffer, order: [usize; 3]) -> Result<RgbImage, PhotoError> {
    let width = buffer.dimensions.width as usize;
    let height = buffer.dimensions.height as usize;
    if width == 0 || height == 0 {
        return Err(PhotoError::InvalidBuffer("empty buffer".to_string()));
    }
    let layout = check_plane(buffer.data.len(), buffer.plane(0), width * 4)?;

    let mut rgb_data = Vec::with_capacity(width * height * 3);
    for row in 0..height {
        let start = layout.offset + row * layout.stride as usize;
        for px in buffer.data[start..start + width * 4].chunks_exact(4) {
            rgb_data.extend_from_slice(&[px[order[0]], px[order[1]], px[order[2]]]);
        }
    }

    RgbImage::from_raw(width as u32, height as u32, rgb_data)
        .ok_or_else(|| PhotoError::InvalidBuffer("failed to create RGB image".to_string()))
}

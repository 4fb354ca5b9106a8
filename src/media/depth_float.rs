// SPDX-License-Identifier: GPL-3.0-only

//! Depth map sample codecs
//!
//! Depth maps arrive as native-endian IEEE half or single floats holding
//! either distance (m) or disparity (1/m). The renderer consumes half-float
//! distance only, so every other encoding is converted here.

use crate::backends::sensor::{BufferId, DepthEncoding, DepthMap, Dimensions};
use std::sync::Arc;

/// Convert IEEE 754 half-precision to single-precision
pub fn f16_to_f32(half: u16) -> f32 {
    let sign = ((half >> 15) & 1) as u32;
    let exponent = ((half >> 10) & 0x1f) as u32;
    let mantissa = (half & 0x3ff) as u32;

    if exponent == 0 {
        if mantissa == 0 {
            f32::from_bits(sign << 31)
        } else {
            // Subnormal: shift until the hidden bit appears
            let mut e = 0i32;
            let mut m = mantissa;
            while (m & 0x400) == 0 {
                m <<= 1;
                e -= 1;
            }
            m &= 0x3ff;
            let f32_exp = (127 - 15 + 1 + e) as u32;
            f32::from_bits((sign << 31) | (f32_exp << 23) | (m << 13))
        }
    } else if exponent == 31 {
        f32::from_bits((sign << 31) | (0xff << 23) | (mantissa << 13))
    } else {
        let f32_exp = (exponent as i32 - 15 + 127) as u32;
        f32::from_bits((sign << 31) | (f32_exp << 23) | (mantissa << 13))
    }
}

/// Convert single-precision to IEEE 754 half-precision
///
/// Rounds to nearest, ties to even. Out-of-range values become infinity and
/// tiny values flush through the subnormal range to zero.
pub fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exponent = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x007f_ffff;

    if exponent == 0xff {
        let nan_bits = if mantissa != 0 {
            0x0200 | (mantissa >> 13) as u16
        } else {
            0
        };
        return sign | 0x7c00 | nan_bits;
    }

    let half_exp = exponent - 127 + 15;
    if half_exp >= 0x1f {
        return sign | 0x7c00;
    }

    if half_exp <= 0 {
        if half_exp < -10 {
            return sign;
        }
        let m = mantissa | 0x0080_0000;
        let shift = (14 - half_exp) as u32;
        let truncated = m >> shift;
        let rest = m & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        let rounded = if rest > halfway || (rest == halfway && truncated & 1 == 1) {
            truncated + 1
        } else {
            truncated
        };
        return sign | rounded as u16;
    }

    let truncated = ((half_exp as u32) << 10) | (mantissa >> 13);
    let rest = mantissa & 0x1fff;
    // A carry out of the mantissa bumps the exponent, up to infinity.
    let rounded = if rest > 0x1000 || (rest == 0x1000 && truncated & 1 == 1) {
        truncated + 1
    } else {
        truncated
    };
    sign | rounded as u16
}

/// Errors reading or converting a depth map
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepthConversionError {
    /// Map has a zero dimension
    EmptyMap,
    /// Row stride is smaller than one row of samples
    StrideTooSmall { stride: u32, required: u32 },
    /// Backing storage ends before the last row
    BufferTooSmall { expected: usize, actual: usize },
}

impl std::fmt::Display for DepthConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMap => write!(f, "Depth map is empty"),
            Self::StrideTooSmall { stride, required } => {
                write!(f, "Depth row stride {} below required {}", stride, required)
            }
            Self::BufferTooSmall { expected, actual } => {
                write!(f, "Depth buffer holds {} bytes, expected {}", actual, expected)
            }
        }
    }
}

impl std::error::Error for DepthConversionError {}

/// Serialize samples tightly packed in `encoding`'s native-endian layout
///
/// Values are written as given; callers convert depth to disparity first
/// when `encoding` is a disparity encoding.
pub fn encode_depth_values(values: &[f32], encoding: DepthEncoding) -> Vec<u8> {
    if encoding.is_half() {
        let halves: Vec<u16> = values.iter().map(|&v| f32_to_f16(v)).collect();
        bytemuck::cast_slice(&halves).to_vec()
    } else {
        bytemuck::cast_slice(values).to_vec()
    }
}

/// Read every sample of `map` as `f32`, row-major, in the map's own unit
pub fn decode_depth_values(map: &DepthMap) -> Result<Vec<f32>, DepthConversionError> {
    let Dimensions { width, height } = map.dimensions;
    if map.dimensions.is_empty() {
        return Err(DepthConversionError::EmptyMap);
    }

    let bpp = map.encoding.bytes_per_pixel();
    let row_bytes = width as usize * bpp;
    if (map.stride as usize) < row_bytes {
        return Err(DepthConversionError::StrideTooSmall {
            stride: map.stride,
            required: row_bytes as u32,
        });
    }

    let expected = map.stride as usize * (height as usize - 1) + row_bytes;
    if map.data.len() < expected {
        return Err(DepthConversionError::BufferTooSmall {
            expected,
            actual: map.data.len(),
        });
    }

    let mut values = Vec::with_capacity(map.dimensions.pixel_count());
    for y in 0..height as usize {
        let start = y * map.stride as usize;
        let row = &map.data[start..start + row_bytes];
        if map.encoding.is_half() {
            values.extend(
                row.chunks_exact(2)
                    .map(|c| f16_to_f32(bytemuck::pod_read_unaligned::<u16>(c))),
            );
        } else {
            values.extend(row.chunks_exact(4).map(bytemuck::pod_read_unaligned::<f32>));
        }
    }
    Ok(values)
}

/// Reciprocal between distance and disparity; zero maps to infinity
fn reciprocal(value: f32) -> f32 {
    if value == 0.0 { f32::INFINITY } else { 1.0 / value }
}

/// Re-encode `map` as `target`
///
/// Distance and disparity are related by the reciprocal. Converting to the
/// map's own encoding returns a map sharing the same storage.
pub fn convert_depth_map(
    map: &DepthMap,
    target: DepthEncoding,
) -> Result<DepthMap, DepthConversionError> {
    if map.encoding == target {
        // Still validated so a malformed map is never passed along
        decode_depth_values(map)?;
        return Ok(map.clone());
    }

    let mut values = decode_depth_values(map)?;
    if map.encoding.is_disparity() != target.is_disparity() {
        for v in &mut values {
            *v = reciprocal(*v);
        }
    }

    // Fresh id: the texture cache must not mistake this for the source buffer
    Ok(DepthMap::packed(
        BufferId::unique(),
        map.dimensions,
        target,
        Arc::from(encode_depth_values(&values, target)),
    ))
}

// SPDX-License-Identifier: GPL-3.0-only

//! Pixel and depth format handling
//!
//! # Texture binding
//!
//! Sensor buffers are handed to the renderer as planar textures without
//! copying. [`texture_cache`] maps buffer planes to texture handles and
//! [`format_converter`] builds fused [`CapturedFrame`]s from them.
//!
//! # Depth encodings
//!
//! [`depth_float`] converts between half/single float depth and disparity.
//!
//! # Color conversion
//!
//! [`nv12_converter`] turns still pixel buffers into RGB for encoding.
//!
//! # Modules
//!
//! - [`depth_float`]: Half-float codec and depth/disparity conversion
//! - [`format_converter`]: Buffer to texture re-tagging
//! - [`nv12_converter`]: NV12/BGRA/RGBA to RGB conversion
//! - [`texture_cache`]: Shared LRU of bound planes

pub mod depth_float;
pub mod format_converter;
pub mod nv12_converter;
pub mod texture_cache;

pub use depth_float::{DepthConversionError, convert_depth_map, f16_to_f32, f32_to_f16};
pub use format_converter::{CapturedFrame, FormatConverter};
pub use nv12_converter::pixel_buffer_to_rgb;
pub use texture_cache::{CacheStats, PlaneTexture, TextureBindError, TextureCache, TextureKey};

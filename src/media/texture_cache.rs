// SPDX-License-Identifier: GPL-3.0-only

//! Buffer-to-texture binding cache
//!
//! Maps a plane of a sensor buffer to a texture handle the renderer can
//! upload without copying. Sensors recycle a small pool of buffers, so the
//! same `(buffer, plane)` key shows up every few frames; a handle is only
//! rebuilt when the buffer's storage or layout changed.
//!
//! Shared between the streaming and still paths.

use crate::backends::sensor::{BufferId, FrameData, PlaneLayout};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, trace};

/// Cache key: one plane of one hardware buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub buffer: BufferId,
    pub plane: usize,
}

/// A plane bound as a texture, ready for upload
///
/// Holds the buffer's storage alive; `bytes()` is the exact region the
/// renderer copies with `bytes_per_row`.
#[derive(Debug, Clone)]
pub struct PlaneTexture {
    pub key: TextureKey,
    pub format: wgpu::TextureFormat,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub data: FrameData,
    pub offset: usize,
}

impl PlaneTexture {
    /// Bytes per texel of this texture's format
    pub fn texel_size(&self) -> u32 {
        self.format.block_copy_size(None).unwrap_or(0)
    }

    /// Plane bytes, from the first texel to the end of the last row
    pub fn bytes(&self) -> &[u8] {
        let len = plane_len(self.bytes_per_row, self.width * self.texel_size(), self.height);
        &self.data[self.offset..self.offset + len]
    }

    /// Row `y` without padding
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        if y >= self.height {
            return None;
        }
        let start = self.offset + (y * self.bytes_per_row) as usize;
        let len = (self.width * self.texel_size()) as usize;
        self.data.get(start..start + len)
    }
}

fn plane_len(stride: u32, row_bytes: u32, height: u32) -> usize {
    stride as usize * (height as usize).saturating_sub(1) + row_bytes as usize
}

/// Reasons a plane cannot be bound
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextureBindError {
    /// Plane has a zero dimension
    EmptyPlane,
    /// Stride cannot hold one row of texels
    StrideTooSmall { stride: u32, required: u32 },
    /// Plane extends past the end of the buffer
    OutOfBounds { end: usize, len: usize },
    /// Format has no fixed texel size
    UnsupportedFormat(wgpu::TextureFormat),
}

impl std::fmt::Display for TextureBindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyPlane => write!(f, "Plane is empty"),
            Self::StrideTooSmall { stride, required } => {
                write!(f, "Stride {} smaller than row size {}", stride, required)
            }
            Self::OutOfBounds { end, len } => {
                write!(f, "Plane ends at byte {} of a {} byte buffer", end, len)
            }
            Self::UnsupportedFormat(format) => write!(f, "Unsupported texture format {:?}", format),
        }
    }
}

impl std::error::Error for TextureBindError {}

/// Counters reported by [`TextureCache::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

struct CacheEntry {
    texture: Arc<PlaneTexture>,
    last_used: u64,
}

#[derive(Default)]
struct CacheInner {
    entries: HashMap<TextureKey, CacheEntry>,
    tick: u64,
    hits: u64,
    misses: u64,
}

/// Least-recently-used cache of plane textures
pub struct TextureCache {
    inner: Mutex<CacheInner>,
    capacity: usize,
}

impl TextureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner::default()),
            capacity: capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bind `layout` inside `data` as a texture of `format`
    pub fn bind(
        &self,
        buffer: BufferId,
        plane: usize,
        data: &FrameData,
        layout: PlaneLayout,
        format: wgpu::TextureFormat,
    ) -> Result<Arc<PlaneTexture>, TextureBindError> {
        let texel = format
            .block_copy_size(None)
            .ok_or(TextureBindError::UnsupportedFormat(format))?;
        if layout.width == 0 || layout.height == 0 {
            return Err(TextureBindError::EmptyPlane);
        }
        let row_bytes = layout.width * texel;
        if layout.stride < row_bytes {
            return Err(TextureBindError::StrideTooSmall {
                stride: layout.stride,
                required: row_bytes,
            });
        }
        let end = layout.offset + plane_len(layout.stride, row_bytes, layout.height);
        if end > data.len() {
            return Err(TextureBindError::OutOfBounds {
                end,
                len: data.len(),
            });
        }

        let key = TextureKey { buffer, plane };
        let mut inner = self.lock();
        inner.tick += 1;
        let tick = inner.tick;

        if let Some(entry) = inner.entries.get_mut(&key) {
            let t = &entry.texture;
            if Arc::ptr_eq(&t.data, data)
                && t.format == format
                && t.offset == layout.offset
                && t.bytes_per_row == layout.stride
                && t.width == layout.width
                && t.height == layout.height
            {
                entry.last_used = tick;
                let texture = Arc::clone(&entry.texture);
                inner.hits += 1;
                trace!(buffer = buffer.0, plane, "Texture cache hit");
                return Ok(texture);
            }
        }

        inner.misses += 1;
        let texture = Arc::new(PlaneTexture {
            key,
            format,
            width: layout.width,
            height: layout.height,
            bytes_per_row: layout.stride,
            data: Arc::clone(data),
            offset: layout.offset,
        });
        inner.entries.insert(
            key,
            CacheEntry {
                texture: Arc::clone(&texture),
                last_used: tick,
            },
        );

        while inner.entries.len() > self.capacity {
            let oldest = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| *k);
            match oldest {
                Some(k) => {
                    inner.entries.remove(&k);
                    trace!(buffer = k.buffer.0, plane = k.plane, "Evicted texture");
                }
                None => break,
            }
        }

        Ok(texture)
    }

    /// Drop every cached texture
    pub fn flush(&self) {
        let mut inner = self.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        debug!(count, "Flushed texture cache");
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            entries: inner.entries.len(),
        }
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_TEXTURE_CACHE_CAPACITY)
    }
}

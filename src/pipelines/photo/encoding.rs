// SPDX-License-Identifier: GPL-3.0-only

//! Still photo encoding
//!
//! This module turns a still capture into file data:
//! - JPEG (with quality control) of the full-resolution pixel buffer
//! - Auxiliary depth carried inside the JPEG as APP11 segments
//! - PNG for depth thumbnails
//!
//! Auxiliary depth layout: each APP11 segment payload starts with the
//! identifier `DEPTHAUX\0`, a big-endian sequence number and segment count,
//! then a slice of the depth blob. The blob is width (u32 BE), height
//! (u32 BE), encoding code (u8), bytes per row (u32 BE) and the rows.

use crate::backends::sensor::{BufferId, DepthEncoding, DepthMap, Dimensions, PixelBuffer};
use crate::constants::{AUX_DEPTH_IDENTIFIER, AUX_DEPTH_MAX_CHUNK};
use crate::errors::PhotoError;
use crate::media::nv12_converter::pixel_buffer_to_rgb;
use image::{GrayImage, ImageFormat, RgbImage};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

const MARKER_SOI: u8 = 0xD8;
const MARKER_EOI: u8 = 0xD9;
const MARKER_SOS: u8 = 0xDA;
const MARKER_APP0: u8 = 0xE0;
const MARKER_APP1: u8 = 0xE1;
const MARKER_APP11: u8 = 0xEB;

const BLOB_HEADER_LEN: usize = 13;

/// Supported encoding formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingFormat {
    /// JPEG format (lossy compression)
    Jpeg,
    /// PNG format (lossless compression)
    Png,
}

impl EncodingFormat {
    /// Get file extension for this format
    pub fn extension(&self) -> &'static str {
        match self {
            EncodingFormat::Jpeg => "jpg",
            EncodingFormat::Png => "png",
        }
    }
}

/// Encoding quality settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EncodingQuality {
    /// Low quality (high compression)
    Low,
    /// Medium quality (balanced)
    Medium,
    /// High quality (low compression)
    #[default]
    High,
    /// Maximum quality (minimal compression)
    Maximum,
}

impl EncodingQuality {
    /// Get JPEG quality value (0-100)
    pub fn jpeg_quality(&self) -> u8 {
        match self {
            EncodingQuality::Low => 60,
            EncodingQuality::Medium => 80,
            EncodingQuality::High => 92,
            EncodingQuality::Maximum => 98,
        }
    }
}

/// Auxiliary depth could not be written into the JPEG
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedError {
    /// Data does not start with a JPEG SOI marker
    NotJpeg,
    /// Depth blob needs more segments than the sequence number allows
    TooLarge(usize),
    /// Depth map rows could not be read
    InvalidDepth,
}

impl std::fmt::Display for EmbedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmbedError::NotJpeg => write!(f, "Output is not a JPEG stream"),
            EmbedError::TooLarge(len) => write!(f, "Depth blob of {} bytes is too large", len),
            EmbedError::InvalidDepth => write!(f, "Depth map layout is invalid"),
        }
    }
}

impl std::error::Error for EmbedError {}

/// Encoded photo ready for saving
#[derive(Debug, Clone)]
pub struct EncodedPhoto {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Auxiliary depth was written and verified
    pub depth_embedded: bool,
}

/// Photo encoder
#[derive(Debug, Clone)]
pub struct PhotoEncoder {
    quality: EncodingQuality,
    embed_depth: bool,
}

impl PhotoEncoder {
    pub fn new(quality: EncodingQuality, embed_depth: bool) -> Self {
        Self {
            quality,
            embed_depth,
        }
    }

    /// Set encoding quality
    pub fn set_quality(&mut self, quality: EncodingQuality) {
        self.quality = quality;
    }

    pub fn quality(&self) -> EncodingQuality {
        self.quality
    }

    /// Encode `buffer` as JPEG, carrying `depth` when embedding is enabled
    ///
    /// Depth embedding is best-effort: any failure is logged and reported
    /// through `depth_embedded`, never as an error.
    pub fn encode(
        &self,
        buffer: &PixelBuffer,
        depth: Option<&DepthMap>,
    ) -> Result<EncodedPhoto, PhotoError> {
        info!(
            width = buffer.dimensions.width,
            height = buffer.dimensions.height,
            quality = ?self.quality,
            "Starting encoding"
        );

        let rgb = pixel_buffer_to_rgb(buffer)?;
        let jpeg = encode_jpeg(&rgb, self.quality)?;

        let (data, depth_embedded) = match depth.filter(|_| self.embed_depth) {
            None => (jpeg, false),
            Some(map) => match embed_auxiliary_depth(&jpeg, map) {
                Ok(with_depth) if verify_auxiliary_depth(&with_depth, map) => (with_depth, true),
                Ok(_) => {
                    warn!("Auxiliary depth missing from encoded photo after embedding");
                    (jpeg, false)
                }
                Err(e) => {
                    warn!(error = %e, "Failed to embed auxiliary depth");
                    (jpeg, false)
                }
            },
        };

        debug!(size = data.len(), depth_embedded, "Encoding complete");

        Ok(EncodedPhoto {
            data,
            width: rgb.width(),
            height: rgb.height(),
            depth_embedded,
        })
    }

    /// Save encoded data to disk asynchronously
    ///
    /// Generates a timestamped filename `<prefix>_<timestamp>.<ext>` in
    /// `output_dir`.
    pub async fn save(
        data: Vec<u8>,
        format: EncodingFormat,
        output_dir: PathBuf,
        prefix: &str,
    ) -> Result<PathBuf, PhotoError> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S%.3f");
        let filename = format!("{}_{}.{}", prefix, timestamp, format.extension());
        let filepath = output_dir.join(&filename);

        info!(path = %filepath.display(), "Saving photo");

        // Write to disk in background task (I/O-bound)
        let filepath_clone = filepath.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&output_dir)?;
            std::fs::write(&filepath_clone, &data)?;
            Ok::<_, PhotoError>(())
        })
        .await
        .map_err(|e| PhotoError::SaveFailed(format!("Save task error: {}", e)))??;

        info!(path = %filepath.display(), "Photo saved successfully");
        Ok(filepath)
    }
}

impl Default for PhotoEncoder {
    fn default() -> Self {
        Self::new(EncodingQuality::High, true)
    }
}

/// Encode image as JPEG
fn encode_jpeg(image: &RgbImage, quality: EncodingQuality) -> Result<Vec<u8>, PhotoError> {
    let mut buffer = Vec::new();
    let mut cursor = std::io::Cursor::new(&mut buffer);

    let mut encoder =
        image::codecs::jpeg::JpegEncoder::new_with_quality(&mut cursor, quality.jpeg_quality());

    encoder
        .encode(
            image.as_raw(),
            image.width(),
            image.height(),
            image::ExtendedColorType::Rgb8,
        )
        .map_err(|e| PhotoError::EncodingFailed(format!("JPEG encoding failed: {}", e)))?;

    Ok(buffer)
}

/// Encode a gray image (depth thumbnail) as PNG
pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>, PhotoError> {
    let mut buffer = Vec::new();

    image
        .write_to(&mut std::io::Cursor::new(&mut buffer), ImageFormat::Png)
        .map_err(|e| PhotoError::EncodingFailed(format!("PNG encoding failed: {}", e)))?;

    Ok(buffer)
}

/// Rows of `map` without stride padding
fn packed_rows(map: &DepthMap) -> Option<Vec<u8>> {
    let row_bytes = map.dimensions.width as usize * map.encoding.bytes_per_pixel();
    let stride = map.stride as usize;
    if stride < row_bytes {
        return None;
    }
    let mut out = Vec::with_capacity(row_bytes * map.dimensions.height as usize);
    for y in 0..map.dimensions.height as usize {
        out.extend_from_slice(map.data.get(y * stride..y * stride + row_bytes)?);
    }
    Some(out)
}

/// Offset just past SOI and any leading APP0/APP1 segments
fn insertion_offset(jpeg: &[u8]) -> Result<usize, EmbedError> {
    if jpeg.len() < 2 || jpeg[0] != 0xFF || jpeg[1] != MARKER_SOI {
        return Err(EmbedError::NotJpeg);
    }
    let mut pos = 2;
    while pos + 4 <= jpeg.len()
        && jpeg[pos] == 0xFF
        && (jpeg[pos + 1] == MARKER_APP0 || jpeg[pos + 1] == MARKER_APP1)
    {
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        pos += 2 + len;
    }
    Ok(pos.min(jpeg.len()))
}

/// Insert `map` into `jpeg` as auxiliary depth segments
pub fn embed_auxiliary_depth(jpeg: &[u8], map: &DepthMap) -> Result<Vec<u8>, EmbedError> {
    let rows = packed_rows(map).ok_or(EmbedError::InvalidDepth)?;
    let row_bytes = map.dimensions.width * map.encoding.bytes_per_pixel() as u32;

    let mut blob = Vec::with_capacity(BLOB_HEADER_LEN + rows.len());
    blob.extend_from_slice(&map.dimensions.width.to_be_bytes());
    blob.extend_from_slice(&map.dimensions.height.to_be_bytes());
    blob.push(map.encoding.code());
    blob.extend_from_slice(&row_bytes.to_be_bytes());
    blob.extend_from_slice(&rows);

    let chunks: Vec<&[u8]> = blob.chunks(AUX_DEPTH_MAX_CHUNK).collect();
    let total = u16::try_from(chunks.len()).map_err(|_| EmbedError::TooLarge(blob.len()))?;

    let at = insertion_offset(jpeg)?;
    let overhead = chunks.len() * (4 + AUX_DEPTH_IDENTIFIER.len() + 4);
    let mut out = Vec::with_capacity(jpeg.len() + blob.len() + overhead);
    out.extend_from_slice(&jpeg[..at]);

    for (seq, chunk) in chunks.iter().enumerate() {
        let payload_len = AUX_DEPTH_IDENTIFIER.len() + 4 + chunk.len();
        out.extend_from_slice(&[0xFF, MARKER_APP11]);
        out.extend_from_slice(&((payload_len + 2) as u16).to_be_bytes());
        out.extend_from_slice(AUX_DEPTH_IDENTIFIER);
        out.extend_from_slice(&(seq as u16).to_be_bytes());
        out.extend_from_slice(&total.to_be_bytes());
        out.extend_from_slice(chunk);
    }

    out.extend_from_slice(&jpeg[at..]);
    debug!(segments = total, bytes = blob.len(), "Embedded auxiliary depth");
    Ok(out)
}

/// Read auxiliary depth back out of JPEG data
///
/// `None` when the data carries no complete, well-formed depth blob.
pub fn read_auxiliary_depth(jpeg: &[u8]) -> Option<DepthMap> {
    if jpeg.len() < 2 || jpeg[0] != 0xFF || jpeg[1] != MARKER_SOI {
        return None;
    }

    let mut pieces: Vec<(u16, u16, &[u8])> = Vec::new();
    let mut pos = 2;
    while pos + 4 <= jpeg.len() && jpeg[pos] == 0xFF {
        let marker = jpeg[pos + 1];
        if marker == MARKER_SOS || marker == MARKER_EOI {
            break;
        }
        let len = u16::from_be_bytes([jpeg[pos + 2], jpeg[pos + 3]]) as usize;
        let payload = jpeg.get(pos + 4..pos + 2 + len)?;
        if marker == MARKER_APP11
            && let Some(rest) = payload.strip_prefix(AUX_DEPTH_IDENTIFIER)
            && rest.len() >= 4
        {
            let seq = u16::from_be_bytes([rest[0], rest[1]]);
            let total = u16::from_be_bytes([rest[2], rest[3]]);
            pieces.push((seq, total, &rest[4..]));
        }
        pos += 2 + len;
    }

    let total = pieces.first()?.1;
    if pieces.len() != total as usize || pieces.iter().any(|p| p.1 != total) {
        return None;
    }
    pieces.sort_by_key(|p| p.0);
    if pieces.iter().enumerate().any(|(i, p)| p.0 as usize != i) {
        return None;
    }
    let blob: Vec<u8> = pieces.iter().flat_map(|p| p.2.iter().copied()).collect();

    let header = blob.get(..BLOB_HEADER_LEN)?;
    let width = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let height = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let encoding = DepthEncoding::from_code(header[8])?;
    let stride = u32::from_be_bytes([header[9], header[10], header[11], header[12]]);
    let data = &blob[BLOB_HEADER_LEN..];

    if (stride as usize) < width as usize * encoding.bytes_per_pixel()
        || data.len() != stride as usize * height as usize
    {
        return None;
    }

    Some(DepthMap {
        id: BufferId::unique(),
        dimensions: Dimensions::new(width, height),
        encoding,
        data: Arc::from(data),
        stride,
    })
}

fn verify_auxiliary_depth(jpeg: &[u8], map: &DepthMap) -> bool {
    match (read_auxiliary_depth(jpeg), packed_rows(map)) {
        (Some(read), Some(rows)) => {
            read.dimensions == map.dimensions && read.encoding == map.encoding && *read.data == rows[..]
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::PixelFormat;
    use crate::media::depth_float::encode_depth_values;

    fn still(width: u32, height: u32) -> PixelBuffer {
        let dims = Dimensions::new(width, height);
        PixelBuffer::nv12(
            BufferId(1),
            dims,
            true,
            Arc::from(vec![100u8; PixelBuffer::nv12_len(dims)]),
        )
    }

    fn depth(width: u32, height: u32) -> DepthMap {
        let values: Vec<f32> = (0..width * height).map(|i| 0.5 + i as f32 * 0.125).collect();
        DepthMap::packed(
            BufferId(2),
            Dimensions::new(width, height),
            DepthEncoding::DepthFloat16,
            Arc::from(encode_depth_values(&values, DepthEncoding::DepthFloat16)),
        )
    }

    #[test]
    fn test_jpeg_quality_values() {
        assert_eq!(EncodingQuality::Low.jpeg_quality(), 60);
        assert_eq!(EncodingQuality::Medium.jpeg_quality(), 80);
        assert_eq!(EncodingQuality::High.jpeg_quality(), 92);
        assert_eq!(EncodingQuality::Maximum.jpeg_quality(), 98);
    }

    #[test]
    fn test_format_extensions() {
        assert_eq!(EncodingFormat::Jpeg.extension(), "jpg");
        assert_eq!(EncodingFormat::Png.extension(), "png");
    }

    #[test]
    fn test_encode_embeds_depth() {
        let map = depth(16, 12);
        let encoded = PhotoEncoder::default().encode(&still(32, 24), Some(&map)).unwrap();

        assert!(encoded.depth_embedded);
        assert_eq!((encoded.width, encoded.height), (32, 24));

        let read = read_auxiliary_depth(&encoded.data).unwrap();
        assert_eq!(read.dimensions, map.dimensions);
        assert_eq!(read.encoding, DepthEncoding::DepthFloat16);
        assert_eq!(&read.data[..], &map.data[..]);

        // Still a decodable JPEG
        let decoded = image::load_from_memory_with_format(&encoded.data, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (32, 24));
    }

    #[test]
    fn test_embedding_disabled() {
        let encoder = PhotoEncoder::new(EncodingQuality::Low, false);
        let encoded = encoder.encode(&still(8, 8), Some(&depth(4, 4))).unwrap();
        assert!(!encoded.depth_embedded);
        assert!(read_auxiliary_depth(&encoded.data).is_none());
    }

    #[test]
    fn test_large_depth_spans_segments() {
        let map = depth(256, 192);
        let encoded = PhotoEncoder::default().encode(&still(16, 16), Some(&map)).unwrap();
        assert!(encoded.depth_embedded);
        assert!(256 * 192 * 2 > AUX_DEPTH_MAX_CHUNK);
        assert_eq!(&read_auxiliary_depth(&encoded.data).unwrap().data[..], &map.data[..]);
    }

    #[test]
    fn test_non_jpeg_is_rejected() {
        assert_eq!(
            embed_auxiliary_depth(b"not a jpeg", &depth(2, 2)).unwrap_err(),
            EmbedError::NotJpeg
        );
        assert!(read_auxiliary_depth(b"").is_none());
    }

    #[test]
    fn test_missing_segment_reads_nothing() {
        let map = depth(256, 192);
        let jpeg = encode_jpeg(&RgbImage::new(8, 8), EncodingQuality::Low).unwrap();
        let mut with_depth = embed_auxiliary_depth(&jpeg, &map).unwrap();

        // Drop the first auxiliary segment
        let start = insertion_offset(&jpeg).unwrap();
        let len = u16::from_be_bytes([with_depth[start + 2], with_depth[start + 3]]) as usize;
        with_depth.drain(start..start + 2 + len);

        assert!(read_auxiliary_depth(&with_depth).is_none());
    }

    #[test]
    fn test_bgra_still() {
        let dims = Dimensions::new(4, 4);
        let buffer = PixelBuffer::packed(BufferId(3), dims, PixelFormat::Bgra, Arc::from(vec![0u8; 64]));
        let encoded = PhotoEncoder::default().encode(&buffer, None).unwrap();
        assert!(!encoded.depth_embedded);
        assert_eq!((encoded.width, encoded.height), (4, 4));
    }

    #[test]
    fn test_png_thumbnail() {
        let png = encode_png(&GrayImage::new(10, 100)).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }
}

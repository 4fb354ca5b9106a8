// SPDX-License-Identifier: GPL-3.0-only
// Shared types for depth sensor backend abstraction

//! Shared types for depth sensor backends
//!
//! Every payload a backend hands over is wrapped in `Option` wherever the
//! hardware may fail to deliver it: a missing buffer or missing calibration
//! is an ordinary condition, not a panic.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;

/// Pixel dimensions of a buffer or sensor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of pixels covered
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Framerate as a fraction (numerator/denominator)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

impl Framerate {
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.denom as f64
    }

    /// Duration of one frame in nanoseconds
    pub fn frame_interval_ns(&self) -> u64 {
        if self.num == 0 {
            return 0;
        }
        1_000_000_000u64 * self.denom as u64 / self.num as u64
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.denom != 1 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.num)
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self { num: 30, denom: 1 }
    }
}

/// Color pixel format delivered by the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Bi-planar 4:2:0, Y plane + interleaved CbCr plane, full range (0-255)
    Nv12FullRange,
    /// Bi-planar 4:2:0, video range (Y 16-235)
    Nv12VideoRange,
    /// 32-bit B G R A
    Bgra,
    /// 32-bit R G B A
    Rgba,
}

impl PixelFormat {
    /// True for the luma/chroma planar layouts the renderer consumes directly
    pub fn is_biplanar(&self) -> bool {
        matches!(self, Self::Nv12FullRange | Self::Nv12VideoRange)
    }

    pub fn is_full_range(&self) -> bool {
        !matches!(self, Self::Nv12VideoRange)
    }

    /// FourCC-style identifier used in logs and the CLI
    pub fn fourcc(&self) -> &'static str {
        match self {
            Self::Nv12FullRange => "420f",
            Self::Nv12VideoRange => "420v",
            Self::Bgra => "BGRA",
            Self::Rgba => "RGBA",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.fourcc())
    }
}

/// Encoding of a single-channel depth map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DepthEncoding {
    /// Distance in meters, IEEE half float
    DepthFloat16,
    /// Distance in meters, IEEE single float
    DepthFloat32,
    /// Inverse distance (1/m), IEEE half float
    DisparityFloat16,
    /// Inverse distance (1/m), IEEE single float
    DisparityFloat32,
}

impl DepthEncoding {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::DepthFloat16 | Self::DisparityFloat16 => 2,
            Self::DepthFloat32 | Self::DisparityFloat32 => 4,
        }
    }

    pub fn is_disparity(&self) -> bool {
        matches!(self, Self::DisparityFloat16 | Self::DisparityFloat32)
    }

    pub fn is_half(&self) -> bool {
        self.bytes_per_pixel() == 2
    }

    /// Stable numeric code used when the map is serialized
    pub fn code(&self) -> u8 {
        match self {
            Self::DepthFloat16 => 0,
            Self::DepthFloat32 => 1,
            Self::DisparityFloat16 => 2,
            Self::DisparityFloat32 => 3,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::DepthFloat16),
            1 => Some(Self::DepthFloat32),
            2 => Some(Self::DisparityFloat16),
            3 => Some(Self::DisparityFloat32),
            _ => None,
        }
    }
}

impl std::fmt::Display for DepthEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::DepthFloat16 => "depth f16",
            Self::DepthFloat32 => "depth f32",
            Self::DisparityFloat16 => "disparity f16",
            Self::DisparityFloat32 => "disparity f32",
        };
        f.write_str(name)
    }
}

/// Depth sub-format offered by a sensor mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepthDataFormat {
    pub encoding: DepthEncoding,
    pub dimensions: Dimensions,
}

impl std::fmt::Display for DepthDataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.dimensions, self.encoding)
    }
}

/// One operating mode of the sensor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorFormat {
    pub dimensions: Dimensions,
    pub pixel_format: PixelFormat,
    pub max_framerate: Framerate,
    /// Pixel-binned modes trade resolution for sensitivity
    pub binned: bool,
    /// Depth sub-formats available alongside this mode (empty = no depth)
    pub depth_formats: Vec<DepthDataFormat>,
}

impl std::fmt::Display for SensorFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} @ {}fps{}",
            self.dimensions,
            self.pixel_format,
            self.max_framerate,
            if self.binned { " (binned)" } else { "" }
        )
    }
}

/// Identifier of a hardware buffer
///
/// Hardware recycles buffers from a pool, so the same id shows up again
/// with fresh contents. The texture cache keys on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub u64);

impl BufferId {
    /// Allocate an id never handed out before in this process
    pub fn unique() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1 << 32);
        BufferId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Shared, immutable pixel storage
pub type FrameData = Arc<[u8]>;

/// Layout of one plane inside a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaneLayout {
    /// Byte offset of the plane's first row
    pub offset: usize,
    /// Bytes per row, may include padding
    pub stride: u32,
    /// Plane width in texels
    pub width: u32,
    /// Plane height in rows
    pub height: u32,
}

/// Color image buffer as delivered by the sensor
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub id: BufferId,
    pub dimensions: Dimensions,
    pub format: PixelFormat,
    pub data: FrameData,
    /// Planes in order: Y then CbCr for NV12, a single plane otherwise
    pub planes: Vec<PlaneLayout>,
}

impl PixelBuffer {
    /// Build a tightly packed NV12 buffer around `data`
    pub fn nv12(id: BufferId, dimensions: Dimensions, full_range: bool, data: FrameData) -> Self {
        let Dimensions { width, height } = dimensions;
        let chroma_width = width.div_ceil(2);
        let chroma_height = height.div_ceil(2);
        let y_size = width as usize * height as usize;
        Self {
            id,
            dimensions,
            format: if full_range {
                PixelFormat::Nv12FullRange
            } else {
                PixelFormat::Nv12VideoRange
            },
            data,
            planes: vec![
                PlaneLayout {
                    offset: 0,
                    stride: width,
                    width,
                    height,
                },
                PlaneLayout {
                    offset: y_size,
                    stride: chroma_width * 2,
                    width: chroma_width,
                    height: chroma_height,
                },
            ],
        }
    }

    /// Build a tightly packed single-plane 32-bit buffer around `data`
    pub fn packed(id: BufferId, dimensions: Dimensions, format: PixelFormat, data: FrameData) -> Self {
        Self {
            id,
            dimensions,
            format,
            data,
            planes: vec![PlaneLayout {
                offset: 0,
                stride: dimensions.width * 4,
                width: dimensions.width,
                height: dimensions.height,
            }],
        }
    }

    /// Byte size of a tightly packed NV12 image
    pub fn nv12_len(dimensions: Dimensions) -> usize {
        let chroma = dimensions.width.div_ceil(2) as usize * dimensions.height.div_ceil(2) as usize;
        dimensions.pixel_count() + chroma * 2
    }

    pub fn plane(&self, index: usize) -> Option<&PlaneLayout> {
        self.planes.get(index)
    }
}

/// Single-channel depth (or disparity) map
#[derive(Debug, Clone)]
pub struct DepthMap {
    pub id: BufferId,
    pub dimensions: Dimensions,
    pub encoding: DepthEncoding,
    /// Native-endian samples, `stride` bytes per row
    pub data: FrameData,
    pub stride: u32,
}

impl DepthMap {
    /// Wrap tightly packed native-endian samples
    pub fn packed(id: BufferId, dimensions: Dimensions, encoding: DepthEncoding, data: FrameData) -> Self {
        Self {
            id,
            dimensions,
            encoding,
            data,
            stride: dimensions.width * encoding.bytes_per_pixel() as u32,
        }
    }

    pub fn layout(&self) -> PlaneLayout {
        PlaneLayout {
            offset: 0,
            stride: self.stride,
            width: self.dimensions.width,
            height: self.dimensions.height,
        }
    }
}

/// Camera calibration delivered with a depth map
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraCalibration {
    /// Row-major intrinsics: `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`
    pub intrinsic_matrix: [[f32; 3]; 3],
    /// Resolution the matrix is expressed in
    pub reference_dimensions: Dimensions,
}

impl CameraCalibration {
    /// Rescale the intrinsics for a buffer of another resolution
    pub fn scaled_to(&self, dimensions: Dimensions) -> [[f32; 3]; 3] {
        let reference = self.reference_dimensions;
        if reference.is_empty() {
            return self.intrinsic_matrix;
        }
        let sx = dimensions.width as f32 / reference.width as f32;
        let sy = dimensions.height as f32 / reference.height as f32;
        let mut m = self.intrinsic_matrix;
        m[0][0] *= sx;
        m[0][1] *= sx;
        m[0][2] *= sx;
        m[1][1] *= sy;
        m[1][2] *= sy;
        m
    }
}

/// Depth map plus its metadata for one capture instant
#[derive(Debug, Clone)]
pub struct DepthData {
    pub map: DepthMap,
    pub calibration: Option<CameraCalibration>,
    /// Hardware smoothing was applied to this map
    pub filtered: bool,
}

/// Color arrival for one capture instant
#[derive(Debug, Clone)]
pub struct ColorSample {
    pub timestamp_ns: u64,
    /// `None` when the hardware failed to hand over a buffer
    pub pixel_buffer: Option<PixelBuffer>,
}

/// Depth arrival for one capture instant
#[derive(Debug, Clone)]
pub struct DepthSample {
    pub timestamp_ns: u64,
    /// `None` when the hardware dropped the depth data
    pub depth: Option<DepthData>,
}

/// Quality/speed trade-off for a still capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QualityPrioritization {
    Speed,
    Balanced,
    #[default]
    Quality,
}

/// Parameters of a one-shot capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhotoSettings {
    /// Requested pixel format, `None` lets the sensor choose
    pub pixel_format: Option<PixelFormat>,
    pub quality: QualityPrioritization,
    pub depth_delivery: bool,
    pub embed_depth: bool,
}

impl Default for PhotoSettings {
    fn default() -> Self {
        Self {
            pixel_format: None,
            quality: QualityPrioritization::Quality,
            depth_delivery: true,
            embed_depth: true,
        }
    }
}

/// Result of a one-shot capture
#[derive(Debug, Clone)]
pub struct StillPhoto {
    pub timestamp_ns: u64,
    pub pixel_buffer: Option<PixelBuffer>,
    pub depth: Option<DepthData>,
    pub settings: PhotoSettings,
}

/// Everything a sensor delivers to the pipeline
#[derive(Debug, Clone)]
pub enum SensorEvent {
    Color(ColorSample),
    Depth(DepthSample),
    PhotoCaptured(BackendResult<StillPhoto>),
}

impl SensorEvent {
    /// Capture timestamp for stream arrivals
    pub fn timestamp_ns(&self) -> Option<u64> {
        match self {
            SensorEvent::Color(c) => Some(c.timestamp_ns),
            SensorEvent::Depth(d) => Some(d.timestamp_ns),
            SensorEvent::PhotoCaptured(Ok(p)) => Some(p.timestamp_ns),
            SensorEvent::PhotoCaptured(Err(_)) => None,
        }
    }
}

/// Channel end a sensor delivers events into
pub type SensorEventSender = Sender<SensorEvent>;

/// Result type for backend operations
pub type BackendResult<T> = Result<T, BackendError>;

/// Error types for backend operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Sensor is not present or powered down
    NotAvailable(String),
    /// Another client holds the configuration lock
    ConfigurationLocked,
    /// Requested mode is not offered by the sensor
    FormatNotSupported(String),
    /// Capture request failed in hardware
    CaptureFailed(String),
    /// Other errors
    Other(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::NotAvailable(msg) => write!(f, "Sensor not available: {}", msg),
            BackendError::ConfigurationLocked => write!(f, "Sensor configuration is locked"),
            BackendError::FormatNotSupported(msg) => write!(f, "Format not supported: {}", msg),
            BackendError::CaptureFailed(msg) => write!(f, "Capture failed: {}", msg),
            BackendError::Other(msg) => write!(f, "Error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nv12_layout() {
        let dims = Dimensions::new(6, 4);
        let data: FrameData = Arc::from(vec![0u8; PixelBuffer::nv12_len(dims)]);
        let buffer = PixelBuffer::nv12(BufferId(1), dims, true, data);

        assert_eq!(buffer.planes.len(), 2);
        assert_eq!(buffer.planes[1].offset, 24);
        assert_eq!(buffer.planes[1].width, 3);
        assert_eq!(buffer.planes[1].height, 2);
        assert_eq!(buffer.planes[1].stride, 6);
        assert_eq!(PixelBuffer::nv12_len(dims), 24 + 12);
    }

    #[test]
    fn test_odd_dimensions_round_chroma_up() {
        let dims = Dimensions::new(5, 3);
        assert_eq!(PixelBuffer::nv12_len(dims), 15 + 3 * 2 * 2);
    }

    #[test]
    fn test_calibration_rescale() {
        let calibration = CameraCalibration {
            intrinsic_matrix: [[1000.0, 0.0, 960.0], [0.0, 1000.0, 720.0], [0.0, 0.0, 1.0]],
            reference_dimensions: Dimensions::new(1920, 1440),
        };

        let m = calibration.scaled_to(Dimensions::new(640, 480));
        assert!((m[0][0] - 333.333).abs() < 0.01);
        assert!((m[0][2] - 320.0).abs() < 0.01);
        assert!((m[1][2] - 240.0).abs() < 0.01);
        assert_eq!(m[2], [0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_depth_encoding_codes() {
        for encoding in [
            DepthEncoding::DepthFloat16,
            DepthEncoding::DepthFloat32,
            DepthEncoding::DisparityFloat16,
            DepthEncoding::DisparityFloat32,
        ] {
            assert_eq!(DepthEncoding::from_code(encoding.code()), Some(encoding));
        }
        assert_eq!(DepthEncoding::from_code(9), None);
    }

    #[test]
    fn test_frame_interval() {
        assert_eq!(Framerate::from_int(30).frame_interval_ns(), 33_333_333);
        assert_eq!(Framerate::from_int(0).frame_interval_ns(), 0);
    }
}

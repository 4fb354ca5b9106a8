// SPDX-License-Identifier: GPL-3.0-only

//! Error types for the capture pipeline

use crate::backends::sensor::BackendError;
use crate::media::depth_float::DepthConversionError;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone)]
pub enum AppError {
    /// Session setup failed
    Configuration(ConfigurationError),
    /// Session control request rejected
    Session(SessionError),
    /// Still capture failed
    StillCapture(StillCaptureError),
    /// Photo encoding errors
    Photo(PhotoError),
    /// Sensor backend errors
    Backend(BackendError),
    /// Configuration file errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
}

/// Fatal session setup failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigurationError {
    /// No usable depth sensor, or it could not be locked
    SensorUnavailable,
    /// No sensor mode satisfies the format requirements
    NoMatchingFormat,
}

/// Rejected session control requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The session has not been started
    NotRunning,
    /// A still capture is already in flight
    CaptureInFlight,
    /// The sensor refused the request
    Backend(BackendError),
}

/// Reasons a still capture produced no frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StillCaptureError {
    MissingPixelBuffer,
    MissingDepthData,
    MissingCalibration,
    /// Depth map could not be brought to half-float depth
    DepthConversion(DepthConversionError),
    /// Pixel buffer or depth map could not be bound as textures
    TextureBinding,
    /// The sensor reported the capture as failed
    Backend(BackendError),
}

/// Photo encoding errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoError {
    /// Pixel buffer layout does not match its format
    InvalidBuffer(String),
    /// Encoding failed
    EncodingFailed(String),
    /// Save failed
    SaveFailed(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Configuration(e) => write!(f, "Session configuration failed: {}", e),
            AppError::Session(e) => write!(f, "Session error: {}", e),
            AppError::StillCapture(e) => write!(f, "Still capture failed: {}", e),
            AppError::Photo(e) => write!(f, "Photo error: {}", e),
            AppError::Backend(e) => write!(f, "Sensor error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::SensorUnavailable => write!(f, "Depth sensor unavailable"),
            ConfigurationError::NoMatchingFormat => {
                write!(f, "No sensor mode matches the format requirements")
            }
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::NotRunning => write!(f, "Session is not running"),
            SessionError::CaptureInFlight => write!(f, "A still capture is already in flight"),
            SessionError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for StillCaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StillCaptureError::MissingPixelBuffer => write!(f, "No pixel buffer delivered"),
            StillCaptureError::MissingDepthData => write!(f, "No depth data delivered"),
            StillCaptureError::MissingCalibration => write!(f, "No calibration data delivered"),
            StillCaptureError::DepthConversion(e) => write!(f, "Depth conversion failed: {}", e),
            StillCaptureError::TextureBinding => write!(f, "Texture binding failed"),
            StillCaptureError::Backend(e) => write!(f, "{}", e),
        }
    }
}

impl fmt::Display for PhotoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhotoError::InvalidBuffer(msg) => write!(f, "Invalid pixel buffer: {}", msg),
            PhotoError::EncodingFailed(msg) => write!(f, "Encoding failed: {}", msg),
            PhotoError::SaveFailed(msg) => write!(f, "Save failed: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for ConfigurationError {}
impl std::error::Error for SessionError {}
impl std::error::Error for StillCaptureError {}
impl std::error::Error for PhotoError {}

// Conversions from sub-errors to AppError
impl From<ConfigurationError> for AppError {
    fn from(err: ConfigurationError) -> Self {
        AppError::Configuration(err)
    }
}

impl From<SessionError> for AppError {
    fn from(err: SessionError) -> Self {
        AppError::Session(err)
    }
}

impl From<StillCaptureError> for AppError {
    fn from(err: StillCaptureError) -> Self {
        AppError::StillCapture(err)
    }
}

impl From<PhotoError> for AppError {
    fn from(err: PhotoError) -> Self {
        AppError::Photo(err)
    }
}

impl From<BackendError> for AppError {
    fn from(err: BackendError) -> Self {
        AppError::Backend(err)
    }
}

impl From<BackendError> for SessionError {
    fn from(err: BackendError) -> Self {
        SessionError::Backend(err)
    }
}

impl From<DepthConversionError> for StillCaptureError {
    fn from(err: DepthConversionError) -> Self {
        StillCaptureError::DepthConversion(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<std::io::Error> for PhotoError {
    fn from(err: std::io::Error) -> Self {
        PhotoError::SaveFailed(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions_wrap_sub_errors() {
        let err: AppError = ConfigurationError::NoMatchingFormat.into();
        assert!(matches!(
            err,
            AppError::Configuration(ConfigurationError::NoMatchingFormat)
        ));

        let err: SessionError = BackendError::ConfigurationLocked.into();
        assert_eq!(err, SessionError::Backend(BackendError::ConfigurationLocked));
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            AppError::from(SessionError::CaptureInFlight).to_string(),
            "Session error: A still capture is already in flight"
        );
        assert_eq!(
            StillCaptureError::MissingCalibration.to_string(),
            "No calibration data delivered"
        );
    }
}

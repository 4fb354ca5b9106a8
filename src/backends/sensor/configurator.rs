// SPDX-License-Identifier: GPL-3.0-only

//! Sensor session configuration
//!
//! Chooses the color mode and depth sub-format for a session and locks the
//! sensor to them. Selection is a pure function of the enumerated modes so
//! it can be checked without hardware.

use super::DepthSensor;
use super::types::{DepthDataFormat, DepthEncoding, PixelFormat, SensorFormat};
use crate::constants::DEFAULT_MIN_WIDTH;
use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

/// Constraints a sensor mode must satisfy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatRequirements {
    /// Smallest acceptable color width in pixels
    pub min_width: u32,
    /// Required color encoding
    pub color_format: PixelFormat,
    /// Required depth encoding
    pub depth_encoding: DepthEncoding,
    /// Accept pixel-binned modes
    pub allow_binned: bool,
}

impl Default for FormatRequirements {
    fn default() -> Self {
        Self {
            min_width: DEFAULT_MIN_WIDTH,
            color_format: PixelFormat::Nv12FullRange,
            depth_encoding: DepthEncoding::DepthFloat16,
            allow_binned: false,
        }
    }
}

/// The (color, depth) pair chosen for a session
///
/// Immutable for the session's lifetime; reconfiguring means selecting again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorFormatSelection {
    pub format: SensorFormat,
    pub depth_format: DepthDataFormat,
}

impl std::fmt::Display for SensorFormatSelection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} + depth {}", self.format, self.depth_format)
    }
}

/// Select the mode and depth sub-format satisfying `requirements`
///
/// Among matching candidates the last one in enumeration order wins; the
/// hardware lists modes in ascending capability.
pub fn select_formats(
    formats: &[SensorFormat],
    requirements: &FormatRequirements,
) -> Result<SensorFormatSelection, ConfigurationError> {
    let format = formats
        .iter()
        .rev()
        .find(|f| {
            f.dimensions.width >= requirements.min_width
                && f.pixel_format == requirements.color_format
                && (requirements.allow_binned || !f.binned)
                && !f.depth_formats.is_empty()
        })
        .ok_or(ConfigurationError::NoMatchingFormat)?;

    let depth_format = format
        .depth_formats
        .iter()
        .rev()
        .find(|d| d.encoding == requirements.depth_encoding)
        .ok_or(ConfigurationError::NoMatchingFormat)?;

    Ok(SensorFormatSelection {
        format: format.clone(),
        depth_format: *depth_format,
    })
}

/// Scoped hold on a sensor's configuration lock
///
/// The lock is released when the guard drops, whichever way the scope exits.
pub struct ConfigurationLock<'a> {
    sensor: &'a dyn DepthSensor,
}

impl<'a> ConfigurationLock<'a> {
    pub fn acquire(sensor: &'a dyn DepthSensor) -> Result<Self, ConfigurationError> {
        sensor.lock_for_configuration().map_err(|e| {
            error!(sensor = %sensor.name(), error = %e, "Failed to lock sensor for configuration");
            ConfigurationError::SensorUnavailable
        })?;
        debug!(sensor = %sensor.name(), "Configuration lock acquired");
        Ok(Self { sensor })
    }
}

impl Drop for ConfigurationLock<'_> {
    fn drop(&mut self) {
        self.sensor.unlock_for_configuration();
        debug!(sensor = %self.sensor.name(), "Configuration lock released");
    }
}

/// Select formats on `sensor` and make them active
pub fn configure(
    sensor: &dyn DepthSensor,
    requirements: &FormatRequirements,
) -> Result<SensorFormatSelection, ConfigurationError> {
    if !sensor.is_available() {
        error!(sensor = %sensor.name(), "Depth sensor unavailable");
        return Err(ConfigurationError::SensorUnavailable);
    }

    let _lock = ConfigurationLock::acquire(sensor)?;

    let formats = sensor.formats();
    let selection = select_formats(&formats, requirements).inspect_err(|_| {
        error!(
            sensor = %sensor.name(),
            modes = formats.len(),
            min_width = requirements.min_width,
            color = %requirements.color_format,
            depth = %requirements.depth_encoding,
            "No sensor mode satisfies the requirements"
        );
    })?;

    sensor
        .set_active_formats(&selection.format, &selection.depth_format)
        .map_err(|e| {
            error!(error = %e, "Sensor rejected the selected formats");
            ConfigurationError::NoMatchingFormat
        })?;

    info!(format = %selection.format, "Selected video format");
    info!(depth = %selection.depth_format, "Selected depth format");

    Ok(selection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::sensor::types::{Dimensions, Framerate};
    use crate::backends::sensor::{SyntheticSensor, SyntheticSensorConfig};

    fn mode(width: u32, height: u32, binned: bool, depth: &[DepthEncoding]) -> SensorFormat {
        SensorFormat {
            dimensions: Dimensions::new(width, height),
            pixel_format: PixelFormat::Nv12FullRange,
            max_framerate: Framerate::from_int(30),
            binned,
            depth_formats: depth
                .iter()
                .map(|&encoding| DepthDataFormat {
                    encoding,
                    dimensions: Dimensions::new(width / 6, height / 6),
                })
                .collect(),
        }
    }

    #[test]
    fn test_picks_last_matching_mode() {
        let formats = vec![
            mode(640, 480, false, &[DepthEncoding::DepthFloat16]),
            mode(1920, 1080, false, &[DepthEncoding::DepthFloat16]),
            mode(1920, 1440, false, &[DepthEncoding::DepthFloat16]),
            mode(3840, 2880, false, &[]),
        ];

        let selection = select_formats(&formats, &FormatRequirements::default()).unwrap();
        assert_eq!(selection.format.dimensions, Dimensions::new(1920, 1440));
        assert_eq!(selection.depth_format.encoding, DepthEncoding::DepthFloat16);
    }

    #[test]
    fn test_picks_last_matching_depth_format() {
        let mut format = mode(1920, 1440, false, &[]);
        format.depth_formats = vec![
            DepthDataFormat {
                encoding: DepthEncoding::DepthFloat16,
                dimensions: Dimensions::new(256, 192),
            },
            DepthDataFormat {
                encoding: DepthEncoding::DisparityFloat16,
                dimensions: Dimensions::new(320, 240),
            },
            DepthDataFormat {
                encoding: DepthEncoding::DepthFloat16,
                dimensions: Dimensions::new(320, 240),
            },
            DepthDataFormat {
                encoding: DepthEncoding::DepthFloat32,
                dimensions: Dimensions::new(640, 480),
            },
        ];

        let selection = select_formats(&[format], &FormatRequirements::default()).unwrap();
        assert_eq!(selection.depth_format.dimensions, Dimensions::new(320, 240));
        assert_eq!(selection.depth_format.encoding, DepthEncoding::DepthFloat16);
    }

    #[test]
    fn test_only_binned_modes_fail() {
        let formats = vec![
            mode(1920, 1440, true, &[DepthEncoding::DepthFloat16]),
            mode(4032, 3024, true, &[DepthEncoding::DepthFloat16]),
        ];

        assert_eq!(
            select_formats(&formats, &FormatRequirements::default()),
            Err(ConfigurationError::NoMatchingFormat)
        );

        let relaxed = FormatRequirements {
            allow_binned: true,
            ..FormatRequirements::default()
        };
        assert!(select_formats(&formats, &relaxed).is_ok());
    }

    #[test]
    fn test_missing_depth_encoding_fails() {
        let formats = vec![mode(1920, 1440, false, &[DepthEncoding::DisparityFloat32])];
        assert_eq!(
            select_formats(&formats, &FormatRequirements::default()),
            Err(ConfigurationError::NoMatchingFormat)
        );
    }

    #[test]
    fn test_wrong_color_format_fails() {
        let mut format = mode(1920, 1440, false, &[DepthEncoding::DepthFloat16]);
        format.pixel_format = PixelFormat::Bgra;
        assert_eq!(
            select_formats(&[format], &FormatRequirements::default()),
            Err(ConfigurationError::NoMatchingFormat)
        );
    }

    #[test]
    fn test_configure_releases_lock_on_failure() {
        let mut config = SyntheticSensorConfig::default();
        for format in &mut config.formats {
            format.binned = true;
        }
        let sensor = SyntheticSensor::new(config);

        assert_eq!(
            configure(&sensor, &FormatRequirements::default()),
            Err(ConfigurationError::NoMatchingFormat)
        );
        assert!(!sensor.is_configuration_locked());
        assert!(sensor.active_formats().is_none());
    }

    #[test]
    fn test_configure_applies_selection_and_unlocks() {
        let sensor = SyntheticSensor::new(SyntheticSensorConfig::default());

        let selection = configure(&sensor, &FormatRequirements::default()).unwrap();
        assert!(!sensor.is_configuration_locked());
        assert_eq!(sensor.active_formats(), Some(selection));
    }

    #[test]
    fn test_configure_unavailable_sensor() {
        let sensor = SyntheticSensor::new(SyntheticSensorConfig {
            available: false,
            ..SyntheticSensorConfig::default()
        });
        assert_eq!(
            configure(&sensor, &FormatRequirements::default()),
            Err(ConfigurationError::SensorUnavailable)
        );
    }

    #[test]
    fn test_held_lock_blocks_configuration() {
        let sensor = SyntheticSensor::new(SyntheticSensorConfig::default());
        let guard = ConfigurationLock::acquire(&sensor).unwrap();

        assert_eq!(
            configure(&sensor, &FormatRequirements::default()),
            Err(ConfigurationError::SensorUnavailable)
        );

        drop(guard);
        assert!(configure(&sensor, &FormatRequirements::default()).is_ok());
    }
}

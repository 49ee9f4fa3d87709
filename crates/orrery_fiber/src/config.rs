//! Root configuration
//!
//! ```toml
//! frameloop = "demand"
//! device_pixel_ratio = 2.0
//!
//! [dpr]
//! min = 1.0
//! max = 2.0
//!
//! [performance]
//! min = 0.3
//! debounce_ms = 300
//! ```

use crate::error::{FiberError, Result};
use crate::frameloop::Frameloop;
use crate::performance::PerformanceConfig;
use orrery_core::Size;
use serde::{Deserialize, Serialize};

/// Clamp range for the device pixel ratio
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DprRange {
    pub min: f32,
    pub max: f32,
}

impl Default for DprRange {
    fn default() -> Self {
        Self { min: 1.0, max: 2.0 }
    }
}

impl DprRange {
    pub fn clamp(&self, dpr: f32) -> f32 {
        dpr.clamp(self.min, self.max)
    }
}

/// Initial output size in CSS pixels
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SizeConfig {
    pub width: f32,
    pub height: f32,
}

impl From<SizeConfig> for Size {
    fn from(size: SizeConfig) -> Self {
        Size::new(size.width, size.height)
    }
}

/// Configuration for a render root
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RootConfig {
    /// When frames are produced
    pub frameloop: Frameloop,
    /// Pixel ratio reported by the host display
    pub device_pixel_ratio: f32,
    /// Range the effective pixel ratio is clamped to
    pub dpr: DprRange,
    pub performance: PerformanceConfig,
    /// Whether pointer events are raycast into the scene
    pub events_enabled: bool,
    /// Create an orthographic default camera instead of a perspective one
    pub orthographic: bool,
    /// Create a default camera when none is supplied
    pub default_camera: bool,
    /// Output size; defaults to the element's client size
    pub size: Option<SizeConfig>,
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            frameloop: Frameloop::Always,
            device_pixel_ratio: 1.0,
            dpr: DprRange::default(),
            performance: PerformanceConfig::default(),
            events_enabled: true,
            orthographic: false,
            default_camera: true,
            size: None,
        }
    }
}

impl RootConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: RootConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Check ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if !(self.dpr.min > 0.0 && self.dpr.min <= self.dpr.max) {
            return Err(FiberError::InvalidConfig(format!(
                "dpr range {}..{} is empty or non-positive",
                self.dpr.min, self.dpr.max
            )));
        }
        let perf = &self.performance;
        if !(0.0..=1.0).contains(&perf.min) || !(0.0..=1.0).contains(&perf.max) || perf.min > perf.max
        {
            return Err(FiberError::InvalidConfig(format!(
                "performance range {}..{} must lie within 0..1",
                perf.min, perf.max
            )));
        }
        if perf.recovery_rate <= 0.0 || perf.recovery_rate.is_nan() {
            return Err(FiberError::InvalidConfig(
                "performance recovery_rate must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Effective initial pixel ratio
    pub fn initial_dpr(&self) -> f32 {
        self.dpr.clamp(self.device_pixel_ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_document() {
        let config = RootConfig::from_toml_str("").unwrap();
        assert_eq!(config, RootConfig::default());
    }

    #[test]
    fn test_partial_document() {
        let config = RootConfig::from_toml_str(
            r#"
            frameloop = "demand"
            device_pixel_ratio = 3.0

            [performance]
            min = 0.25
            debounce_ms = 500

            [size]
            width = 640.0
            height = 480.0
            "#,
        )
        .unwrap();

        assert_eq!(config.frameloop, Frameloop::Demand);
        assert_eq!(config.initial_dpr(), 2.0);
        assert_eq!(config.performance.min, 0.25);
        assert_eq!(config.performance.max, 1.0);
        assert_eq!(config.performance.debounce_ms, 500);
        assert_eq!(config.size.map(Size::from), Some(Size::new(640.0, 480.0)));
    }

    #[test]
    fn test_rejects_inverted_ranges() {
        let err = RootConfig::from_toml_str("[performance]\nmin = 0.9\nmax = 0.5\n").unwrap_err();
        assert!(matches!(err, FiberError::InvalidConfig(_)));

        let err = RootConfig::from_toml_str("[dpr]\nmin = 2.0\nmax = 1.0\n").unwrap_err();
        assert!(matches!(err, FiberError::InvalidConfig(_)));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = RootConfig::from_toml_str("frameloop = \"sometimes\"").unwrap_err();
        assert!(matches!(err, FiberError::Config(_)));
    }
}

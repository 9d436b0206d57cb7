//! Runtime configuration for the spill monitor.
//!
//! Every tunable of the detection, extraction and scoring stages lives here so
//! deployments can adjust them without touching the algorithms.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::types::{SpillError, SpillResult};

/// Segmentation model variant, which fixes the input channel contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelVariant {
    /// Single band prototype model trained on PNG exports
    #[serde(rename = "png")]
    Png,
    /// Dual-polarization (VV + VH) deployment model
    #[serde(rename = "sar-dual")]
    SarDual,
}

impl ModelVariant {
    pub fn input_channels(&self) -> usize {
        match self {
            ModelVariant::Png => 1,
            ModelVariant::SarDual => 2,
        }
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVariant::Png => write!(f, "png"),
            ModelVariant::SarDual => write!(f, "sar-dual"),
        }
    }
}

/// Pixel neighbourhood used when grouping oil pixels into regions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Connectivity {
    Four,
    Eight,
}

impl TryFrom<u8> for Connectivity {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            4 => Ok(Connectivity::Four),
            8 => Ok(Connectivity::Eight),
            other => Err(format!("connectivity must be 4 or 8, got {}", other)),
        }
    }
}

impl From<Connectivity> for u8 {
    fn from(value: Connectivity) -> Self {
        match value {
            Connectivity::Four => 4,
            Connectivity::Eight => 8,
        }
    }
}

/// Weight of each contributing risk factor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub area: f64,
    pub confidence: f64,
    pub zone_baseline: f64,
    pub history_density: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            area: 0.35,
            confidence: 0.15,
            zone_baseline: 0.25,
            history_density: 0.25,
        }
    }
}

impl RiskWeights {
    pub fn total(&self) -> f64 {
        self.area + self.confidence + self.zone_baseline + self.history_density
    }
}

/// Score boundaries: `score >= high` is High, `score >= medium` is Medium, else Low
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskThresholds {
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            medium: 0.40,
            high: 0.70,
        }
    }
}

/// Bucket boundaries for the thickness class.
///
/// A region is Thick when both Thick bounds are met, Medium when both Medium
/// bounds are met, Thin otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThicknessBuckets {
    pub thick_min_area_km2: f64,
    pub thick_min_confidence: f32,
    pub medium_min_area_km2: f64,
    pub medium_min_confidence: f32,
}

impl Default for ThicknessBuckets {
    fn default() -> Self {
        Self {
            thick_min_area_km2: 2.0,
            thick_min_confidence: 0.85,
            medium_min_area_km2: 1.0,
            medium_min_confidence: 0.80,
        }
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub model_variant: ModelVariant,
    /// Probability cutoff; pixels strictly above it are oil
    pub detection_threshold: f32,
    /// Regions with fewer pixels are discarded as noise
    pub min_region_pixels: usize,
    pub connectivity: Connectivity,
    pub risk_weights: RiskWeights,
    pub risk_thresholds: RiskThresholds,
    /// Historical events older than this (relative to the spill) are ignored
    pub history_lookback_days: i64,
    /// Inference budget; 0 disables the check
    pub inference_timeout_ms: u64,
    /// Spill area at which the area factor saturates to 1.0
    pub area_saturation_km2: f64,
    /// Event count in the lookback window at which history density saturates
    pub history_saturation_events: usize,
    /// Baseline of the pseudo-zone used for spills outside every zone
    pub unzoned_baseline: f64,
    pub thickness: ThicknessBuckets,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            model_variant: ModelVariant::SarDual,
            detection_threshold: 0.5,
            min_region_pixels: 10,
            connectivity: Connectivity::Eight,
            risk_weights: RiskWeights::default(),
            risk_thresholds: RiskThresholds::default(),
            history_lookback_days: 365,
            inference_timeout_ms: 30_000,
            area_saturation_km2: 5.0,
            history_saturation_events: 5,
            unzoned_baseline: 0.5,
            thickness: ThicknessBuckets::default(),
        }
    }
}

impl MonitorConfig {
    /// Validate configuration parameters.
    pub fn validate(&self) -> SpillResult<()> {
        if !(0.0..1.0).contains(&self.detection_threshold) {
            return Err(SpillError::Config(format!(
                "detection_threshold must be in [0, 1), got {}",
                self.detection_threshold
            )));
        }
        if self.min_region_pixels == 0 {
            return Err(SpillError::Config(
                "min_region_pixels must be >= 1".to_string(),
            ));
        }

        let w = &self.risk_weights;
        for (name, value) in [
            ("area", w.area),
            ("confidence", w.confidence),
            ("zone_baseline", w.zone_baseline),
            ("history_density", w.history_density),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(SpillError::Config(format!(
                    "risk weight '{}' must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if w.total() <= 0.0 {
            return Err(SpillError::Config(
                "risk weights must not all be zero".to_string(),
            ));
        }

        let t = &self.risk_thresholds;
        if !(0.0 < t.medium && t.medium < t.high && t.high <= 1.0) {
            return Err(SpillError::Config(format!(
                "risk thresholds must satisfy 0 < medium < high <= 1, got medium={} high={}",
                t.medium, t.high
            )));
        }
        if self.history_lookback_days <= 0 {
            return Err(SpillError::Config(format!(
                "history_lookback_days must be > 0, got {}",
                self.history_lookback_days
            )));
        }
        if self.area_saturation_km2 <= 0.0 {
            return Err(SpillError::Config(format!(
                "area_saturation_km2 must be > 0, got {}",
                self.area_saturation_km2
            )));
        }
        if self.history_saturation_events == 0 {
            return Err(SpillError::Config(
                "history_saturation_events must be >= 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.unzoned_baseline) {
            return Err(SpillError::Config(format!(
                "unzoned_baseline must be in [0, 1], got {}",
                self.unzoned_baseline
            )));
        }
        Ok(())
    }

    /// Load from JSON string.
    pub fn from_json(json: &str) -> SpillResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| SpillError::Config(format!("JSON parse error: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SpillResult<Self> {
        log::info!("Loading monitor configuration from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.connectivity, Connectivity::Eight);
        assert_eq!(config.model_variant.input_channels(), 2);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = MonitorConfig::from_json(
            r#"{"model_variant": "png", "connectivity": 4, "min_region_pixels": 25}"#,
        )
        .unwrap();
        assert_eq!(config.model_variant, ModelVariant::Png);
        assert_eq!(config.connectivity, Connectivity::Four);
        assert_eq!(config.min_region_pixels, 25);
        assert_eq!(config.detection_threshold, 0.5);
    }

    #[test]
    fn test_bad_connectivity_rejected() {
        let result = MonitorConfig::from_json(r#"{"connectivity": 6}"#);
        assert!(matches!(result, Err(SpillError::Config(_))));
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let mut config = MonitorConfig::default();
        config.risk_thresholds = RiskThresholds {
            medium: 0.8,
            high: 0.6,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_negative_weight_rejected() {
        let mut config = MonitorConfig::default();
        config.risk_weights.area = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serialized_names() {
        let json = serde_json::to_value(MonitorConfig::default()).unwrap();
        assert_eq!(json["model_variant"], "sar-dual");
        assert_eq!(json["connectivity"], 8);
    }
}

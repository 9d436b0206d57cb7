//! ZINova: oil spill detection and response tracking over satellite SAR scenes
//!
//! Dark-spot segmentation turns dual-polarization (or single band prototype)
//! imagery into oil masks, which are split into spill records, attributed to
//! offshore danger zones, risk scored and tracked through cleanup.

pub mod config;
pub mod core;
pub mod io;
pub mod monitor;
pub mod types;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use config::{Connectivity, ModelVariant, MonitorConfig, RiskThresholds, RiskWeights};
pub use monitor::{CleanupRow, SceneReport, SpillMonitor};
pub use types::{
    CleanupStatus, CoordinateSystem, GeoPoint, GeoTransform, OilType, Polarization,
    SatelliteImage, SceneInfo, SpillError, SpillRecord, SpillResult, ThicknessClass,
};

pub use io::ImageIngest;

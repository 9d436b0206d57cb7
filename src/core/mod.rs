//! Core detection, assessment and tracking modules

pub mod assistant;
pub mod extract;
pub mod lifecycle;
pub mod risk;
pub mod segmentation;
pub mod zones;

// Re-export main types
pub use assistant::{AssistantAdapter, AssistantContext, LanguageBackend, SpillFacts};
pub use extract::{ExtractionParams, ExtractionSummary, SpillExtractor};
pub use lifecycle::{CleanupAction, CleanupLifecycle, CleanupState, StatusEntry};
pub use risk::{RiskAssessment, RiskEngine, RiskFactor, RiskLevel, RiskParams};
pub use segmentation::{Mask, SegmentationEngine, SegmentationModel, SegmentationParams};
pub use zones::{HistoricalSpill, HistorySummary, Zone, ZoneRegistry, ZoneSnapshot, UNZONED_ID};

//! End-to-end spill monitoring: detection, zoning, risk and cleanup tracking.

use crate::config::MonitorConfig;
use crate::core::assistant::{AssistantAdapter, AssistantContext, LanguageBackend, SpillFacts};
use crate::core::extract::{ExtractionParams, ExtractionSummary, SpillExtractor};
use crate::core::lifecycle::{CleanupAction, CleanupLifecycle, CleanupState};
use crate::core::risk::{RiskAssessment, RiskEngine, RiskParams};
use crate::core::segmentation::{SegmentationEngine, SegmentationModel};
use crate::core::zones::{ZoneRegistry, ZoneSnapshot};
use crate::io::export::{spills_to_geojson, write_geojson};
use crate::types::{
    CleanupStatus, GeoTransform, OilType, SatelliteImage, SpillError, SpillId, SpillRecord,
    SpillResult, ZoneId,
};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Outcome of processing one scene
#[derive(Debug, Clone, Serialize)]
pub struct SceneReport {
    pub scene_id: String,
    pub run_id: String,
    pub spill_ids: Vec<SpillId>,
    pub oil_pixels: usize,
    pub regions_found: usize,
    pub pixels_discarded: usize,
    /// Spills whose risk assessment failed, with the reason
    pub failed_assessments: Vec<(SpillId, String)>,
}

/// One row of the cleanup status table
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupRow {
    pub zone_id: Option<ZoneId>,
    pub spill_id: SpillId,
    pub status: CleanupStatus,
}

/// Owns the loaded model and zone registry and serves the query and
/// transition operations used by the dashboard.
#[derive(Debug)]
pub struct SpillMonitor {
    config: MonitorConfig,
    engine: SegmentationEngine,
    extractor: SpillExtractor,
    zones: Arc<ZoneRegistry>,
    risk: RiskEngine,
    lifecycle: CleanupLifecycle,
    spills: RwLock<BTreeMap<SpillId, SpillRecord>>,
    /// Latest assessment per spill, tagged with the zone ledger count its
    /// history was read at
    assessments: RwLock<HashMap<SpillId, (u64, RiskAssessment)>>,
    assistant: AssistantAdapter,
    runs: AtomicU64,
}

impl SpillMonitor {
    pub fn new(
        config: MonitorConfig,
        model: Arc<SegmentationModel>,
        zones: ZoneRegistry,
    ) -> SpillResult<Self> {
        config.validate()?;
        let engine = SegmentationEngine::from_config(model, &config)?;
        let zones = zones.with_unzoned_baseline(config.unzoned_baseline);

        log::info!(
            "Spill monitor ready: {} model, threshold {}, {} zone(s)",
            config.model_variant,
            config.detection_threshold,
            zones.zones().len()
        );

        Ok(Self {
            extractor: SpillExtractor::new(ExtractionParams::from_config(&config)),
            risk: RiskEngine::new(RiskParams::from_config(&config)),
            engine,
            zones: Arc::new(zones),
            lifecycle: CleanupLifecycle::new(),
            spills: RwLock::new(BTreeMap::new()),
            assessments: RwLock::new(HashMap::new()),
            assistant: AssistantAdapter::new(),
            runs: AtomicU64::new(0),
            config,
        })
    }

    /// Caspian scenario zones with the untrained dark-spot model
    pub fn caspian(config: MonitorConfig) -> SpillResult<Self> {
        let model = SegmentationModel::dark_spot_baseline(config.model_variant);
        Self::new(config, Arc::new(model), ZoneRegistry::caspian_default()?)
    }

    pub fn with_assistant_backend(mut self, backend: Box<dyn LanguageBackend>) -> Self {
        self.assistant = AssistantAdapter::with_backend(backend);
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn zones(&self) -> &ZoneRegistry {
        &self.zones
    }

    /// Segment a scene, extract its spills, assign and record zones, assess
    /// risk and start cleanup tracking.
    pub fn process_scene(&self, image: &SatelliteImage) -> SpillResult<SceneReport> {
        let scene_id = image.scene.scene_id.clone();
        let run_id = format!("{}-R{:04}", scene_id, self.runs.fetch_add(1, Ordering::SeqCst) + 1);
        log::info!("Processing scene {} as run {}", scene_id, run_id);

        let mask = self.engine.segment(image)?;
        let geo = image.geo_transform.unwrap_or_else(GeoTransform::identity);
        let (records, summary) = self.extractor.extract_with_summary(&mask, &geo, &run_id)?;

        let mut touched_zones = BTreeSet::new();
        let mut spill_ids = Vec::with_capacity(records.len());
        for mut record in records {
            record.zone_id = self.zones.assign_zone(&record.geometry);
            if let Some(zone_id) = &record.zone_id {
                self.zones.record_assignment(zone_id, &record)?;
                touched_zones.insert(zone_id.clone());
            }
            self.lifecycle.register(&record.id);
            spill_ids.push(record.id.clone());
            self.spills.write().insert(record.id.clone(), record);
        }

        // New history invalidates every assessment in the affected zones
        let mut failed_assessments = Vec::new();
        for zone_id in &touched_zones {
            failed_assessments.extend(self.reassess_zone(zone_id));
        }
        for spill_id in &spill_ids {
            if self.assessments.read().contains_key(spill_id) {
                continue;
            }
            if let Err(e) = self.reassess_spill(spill_id) {
                failed_assessments.push((spill_id.clone(), e.to_string()));
            }
        }

        log::info!(
            "Scene {}: {} spill(s), {} zone(s) updated",
            scene_id,
            spill_ids.len(),
            touched_zones.len()
        );
        Ok(report(scene_id, run_id, spill_ids, &summary, failed_assessments))
    }

    /// Process independent scenes concurrently. A failing scene is reported in
    /// its own slot and does not affect the others.
    pub fn process_scenes(&self, images: &[SatelliteImage]) -> Vec<(String, SpillResult<SceneReport>)> {
        log::info!("Processing batch of {} scene(s)", images.len());

        #[cfg(feature = "parallel")]
        let iter = images.par_iter();
        #[cfg(not(feature = "parallel"))]
        let iter = images.iter();

        iter.map(|image| {
            let result = self.process_scene(image);
            if let Err(e) = &result {
                log::warn!("Scene {} failed: {}", image.scene.scene_id, e);
            }
            (image.scene.scene_id.clone(), result)
        })
        .collect()
    }

    /// Current spill records ordered by id
    pub fn list_spills(&self) -> Vec<SpillRecord> {
        self.spills.read().values().cloned().collect()
    }

    pub fn spill(&self, spill_id: &str) -> SpillResult<SpillRecord> {
        self.spills
            .read()
            .get(spill_id)
            .cloned()
            .ok_or_else(|| SpillError::NotFound(format!("spill {}", spill_id)))
    }

    /// Attach an oil type supplied by an external classifier
    pub fn set_oil_type(&self, spill_id: &str, oil_type: OilType) -> SpillResult<()> {
        let mut spills = self.spills.write();
        let record = spills
            .get_mut(spill_id)
            .ok_or_else(|| SpillError::NotFound(format!("spill {}", spill_id)))?;
        record.oil_type = oil_type;
        Ok(())
    }

    pub fn cleanup_state(&self, spill_id: &str) -> SpillResult<CleanupState> {
        self.lifecycle.state(spill_id)
    }

    pub fn risk_assessment(&self, spill_id: &str) -> SpillResult<RiskAssessment> {
        self.spill(spill_id)?;
        self.latest_assessment(spill_id).ok_or_else(|| {
            SpillError::InsufficientData(format!("spill {} has no risk assessment", spill_id))
        })
    }

    pub fn start_cleaning(&self, spill_id: &str) -> SpillResult<CleanupState> {
        self.transition(spill_id, CleanupAction::StartCleaning)
    }

    pub fn mark_done(&self, spill_id: &str) -> SpillResult<CleanupState> {
        self.transition(spill_id, CleanupAction::MarkDone)
    }

    pub fn reset(&self, spill_id: &str) -> SpillResult<CleanupState> {
        self.transition(spill_id, CleanupAction::Reset)
    }

    /// Apply a lifecycle action and refresh the spill's assessment
    pub fn transition(&self, spill_id: &str, action: CleanupAction) -> SpillResult<CleanupState> {
        let state = self.lifecycle.transition(spill_id, action)?;
        if let Err(e) = self.reassess_spill(spill_id) {
            log::warn!("Reassessment after {} failed for {}: {}", action.name(), spill_id, e);
        }
        Ok(state)
    }

    pub fn assistant_context(&self, spill_id: &str) -> SpillResult<AssistantContext> {
        self.assistant.build_context(self, spill_id)
    }

    pub fn ask_assistant(&self, spill_id: &str, question: &str) -> SpillResult<String> {
        self.assistant.ask(self, spill_id, question)
    }

    /// (zone, spill, status) for every known spill, ordered by zone then spill
    pub fn cleanup_overview(&self) -> Vec<CleanupRow> {
        let mut rows: Vec<CleanupRow> = self
            .spills
            .read()
            .values()
            .map(|s| CleanupRow {
                zone_id: s.zone_id.clone(),
                spill_id: s.id.clone(),
                status: self.lifecycle.status(&s.id).unwrap_or_default(),
            })
            .collect();
        rows.sort_by(|a, b| {
            a.zone_id
                .cmp(&b.zone_id)
                .then_with(|| a.spill_id.cmp(&b.spill_id))
        });
        rows
    }

    /// Current spills as a GeoJSON FeatureCollection
    pub fn spills_geojson(&self) -> serde_json::Value {
        let spills = self.list_spills();
        spills_to_geojson(&spills, |id| self.lifecycle.status(id).unwrap_or_default())
    }

    /// Write the current spills to a GeoJSON file
    pub fn export_geojson<P: AsRef<Path>>(&self, output_path: P) -> SpillResult<()> {
        let collection = self.spills_geojson();
        write_geojson(&collection, &output_path)?;
        log::info!(
            "Wrote {} spill(s) to {}",
            self.spills.read().len(),
            output_path.as_ref().display()
        );
        Ok(())
    }

    fn reassess_spill(&self, spill_id: &str) -> SpillResult<RiskAssessment> {
        let spill = self.spill(spill_id)?;
        let zone = self.zones.zone_or_unzoned(spill.zone_id.as_deref());
        let (version, history) = self.zones.history_with_version(&zone.id);
        let assessment = self.risk.assess(&spill, Some(zone), &history)?;
        self.store_assessment(spill_id, version, assessment.clone());
        Ok(assessment)
    }

    /// Keep `assessment` unless the stored one was computed from a longer zone
    /// history. Returns whether it was stored.
    fn store_assessment(&self, spill_id: &str, version: u64, assessment: RiskAssessment) -> bool {
        let mut assessments = self.assessments.write();
        match assessments.get(spill_id) {
            Some((current, _)) if *current > version => {
                log::debug!(
                    "Dropping stale assessment for {} (ledger {} < {})",
                    spill_id,
                    version,
                    current
                );
                false
            }
            _ => {
                assessments.insert(spill_id.to_string(), (version, assessment));
                true
            }
        }
    }

    fn reassess_zone(&self, zone_id: &str) -> Vec<(SpillId, String)> {
        let ids: Vec<SpillId> = self
            .spills
            .read()
            .values()
            .filter(|s| s.zone_id.as_deref() == Some(zone_id))
            .map(|s| s.id.clone())
            .collect();
        log::debug!("Reassessing {} spill(s) in zone {}", ids.len(), zone_id);

        ids.into_iter()
            .filter_map(|id| match self.reassess_spill(&id) {
                Ok(_) => None,
                Err(e) => {
                    log::warn!("Risk assessment failed for spill {}: {}", id, e);
                    Some((id, e.to_string()))
                }
            })
            .collect()
    }
}

impl SpillFacts for SpillMonitor {
    fn spill(&self, spill_id: &str) -> SpillResult<SpillRecord> {
        SpillMonitor::spill(self, spill_id)
    }

    fn zone_for(&self, spill: &SpillRecord) -> Option<ZoneSnapshot> {
        let zone = self.zones.zone_or_unzoned(spill.zone_id.as_deref());
        self.zones.snapshot(&zone.id)
    }

    fn latest_assessment(&self, spill_id: &str) -> Option<RiskAssessment> {
        self.assessments
            .read()
            .get(spill_id)
            .map(|(_, assessment)| assessment.clone())
    }

    fn cleanup_state(&self, spill_id: &str) -> SpillResult<CleanupState> {
        self.lifecycle.state(spill_id)
    }
}

fn report(
    scene_id: String,
    run_id: String,
    spill_ids: Vec<SpillId>,
    summary: &ExtractionSummary,
    failed_assessments: Vec<(SpillId, String)>,
) -> SceneReport {
    SceneReport {
        scene_id,
        run_id,
        spill_ids,
        oil_pixels: summary.oil_pixels,
        regions_found: summary.regions_found,
        pixels_discarded: summary.pixels_discarded,
        failed_assessments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelVariant;
    use crate::io::ImageIngest;
    use crate::types::{CoordinateSystem, SceneInfo};
    use ndarray::Array2;

    /// Dark square on bright sea, placed inside zone Z1
    fn z1_scene(id: &str) -> SatelliteImage {
        let mut vv = Array2::<f32>::from_elem((20, 20), 1.0);
        let mut vh = Array2::<f32>::from_elem((20, 20), 0.5);
        for r in 5..15 {
            for c in 5..15 {
                vv[[r, c]] = 0.05;
                vh[[r, c]] = 0.02;
            }
        }
        let geo = GeoTransform::north_up(49.75, 40.22, 0.001, 0.001);
        ImageIngest::from_dual_pol(&vv, &vh, geo, CoordinateSystem::Geographic, SceneInfo::new(id))
            .unwrap()
    }

    fn monitor() -> SpillMonitor {
        SpillMonitor::caspian(MonitorConfig::default()).unwrap()
    }

    #[test]
    fn test_process_scene_assigns_zone_and_assesses() {
        let monitor = monitor();
        let before = monitor.zones().historical_count("Z1").unwrap();

        let report = monitor.process_scene(&z1_scene("A")).unwrap();
        assert_eq!(report.spill_ids.len(), 1);
        assert!(report.failed_assessments.is_empty());

        let spill = monitor.spill(&report.spill_ids[0]).unwrap();
        assert_eq!(spill.zone_id.as_deref(), Some("Z1"));
        assert_eq!(spill.pixel_count, 100);
        assert_eq!(monitor.zones().historical_count("Z1").unwrap(), before + 1);

        let assessment = monitor.risk_assessment(&spill.id).unwrap();
        assert_eq!(assessment.zone_id, "Z1");
        assert_eq!(
            monitor.cleanup_state(&spill.id).unwrap().status,
            CleanupStatus::Idle
        );
    }

    #[test]
    fn test_transitions_refresh_assessment() {
        let monitor = monitor();
        let report = monitor.process_scene(&z1_scene("A")).unwrap();
        let id = &report.spill_ids[0];
        let first = monitor.risk_assessment(id).unwrap();

        monitor.start_cleaning(id).unwrap();
        let second = monitor.risk_assessment(id).unwrap();
        assert!(second.evaluated_at >= first.evaluated_at);
        assert_eq!(second.level, first.level);

        assert!(matches!(
            monitor.reset(id),
            Err(SpillError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_older_history_never_replaces_newer_assessment() {
        let monitor = monitor();
        let report = monitor.process_scene(&z1_scene("A")).unwrap();
        let id = &report.spill_ids[0];
        let (version, _) = monitor.zones().history_with_version("Z1");
        let current = monitor.risk_assessment(id).unwrap();

        // A result computed before the latest zone event arrives late
        let mut late = current.clone();
        late.score = 0.0;
        assert!(!monitor.store_assessment(id, version - 1, late));
        assert_eq!(monitor.risk_assessment(id).unwrap(), current);

        // Same history, later lifecycle step: replaces
        let mut refreshed = current.clone();
        refreshed.evaluated_at = current.evaluated_at + chrono::Duration::seconds(1);
        assert!(monitor.store_assessment(id, version, refreshed.clone()));
        assert_eq!(monitor.risk_assessment(id).unwrap(), refreshed);
    }

    #[test]
    fn test_concurrent_scenes_keep_latest_zone_history() {
        let monitor = monitor();
        let scenes: Vec<SatelliteImage> = (0..6).map(|i| z1_scene(&format!("C{}", i))).collect();
        let results = monitor.process_scenes(&scenes);
        assert!(results.iter().all(|(_, r)| r.is_ok()));

        let (version, history) = monitor.zones().history_with_version("Z1");
        let engine = RiskEngine::new(RiskParams::from_config(monitor.config()));
        for spill in monitor.list_spills() {
            let stored = monitor.assessments.read().get(&spill.id).cloned().unwrap();
            assert_eq!(stored.0, version);
            let zone = monitor.zones().zone("Z1");
            let expected = engine.assess(&spill, zone, &history).unwrap();
            assert_eq!(stored.1.factors, expected.factors);
        }
    }

    #[test]
    fn test_unknown_spill_queries() {
        let monitor = monitor();
        assert!(matches!(monitor.spill("x"), Err(SpillError::NotFound(_))));
        assert!(matches!(monitor.risk_assessment("x"), Err(SpillError::NotFound(_))));
        assert!(matches!(monitor.assistant_context("x"), Err(SpillError::NotFound(_))));
        assert!(matches!(monitor.start_cleaning("x"), Err(SpillError::NotFound(_))));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let monitor = monitor();
        let bad = ImageIngest::from_single_band(
            Array2::<f32>::zeros((8, 8)),
            SceneInfo::new("single-band"),
        )
        .unwrap();
        let results = monitor.process_scenes(&[z1_scene("A"), bad, z1_scene("B")]);

        assert_eq!(results.len(), 3);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(SpillError::InvalidInput(_))));
        assert!(results[2].1.is_ok());
        assert_eq!(monitor.list_spills().len(), 2);
    }

    #[test]
    fn test_cleanup_overview_and_geojson() {
        let monitor = monitor();
        let report = monitor.process_scene(&z1_scene("A")).unwrap();
        monitor.start_cleaning(&report.spill_ids[0]).unwrap();

        let rows = monitor.cleanup_overview();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].status, CleanupStatus::Cleaning);
        assert_eq!(rows[0].zone_id.as_deref(), Some("Z1"));

        let fc = monitor.spills_geojson();
        assert_eq!(fc["features"][0]["properties"]["color"], "blue");
    }

    #[test]
    fn test_variant_mismatch_rejected() {
        let config = MonitorConfig {
            model_variant: ModelVariant::Png,
            ..MonitorConfig::default()
        };
        let model = SegmentationModel::dark_spot_baseline(ModelVariant::SarDual);
        let result = SpillMonitor::new(config, Arc::new(model), ZoneRegistry::caspian_default().unwrap());
        assert!(matches!(result, Err(SpillError::Config(_))));
    }
}

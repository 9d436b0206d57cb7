//! Read-only fact snapshots for the external language assistant.

use crate::core::lifecycle::CleanupState;
use crate::core::risk::RiskAssessment;
use crate::core::zones::{HistorySummary, ZoneSnapshot};
use crate::types::{SpillRecord, SpillResult};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// System prompt sent with every assistant request
pub const SYSTEM_PROMPT: &str = "You are an expert assisting operators with offshore oil spill analysis. \
Use the provided zone, spill attributes, and historical patterns to infer likely sources, \
risk level, and recommended actions. Be concise but specific and avoid inventing data not \
implied by the context.";

/// Reply used when no language backend is configured
pub const BACKEND_UNAVAILABLE_NOTICE: &str =
    "⚠️ LLM API key not configured. Configure a language backend to enable the assistant.";

/// Source of the facts an assistant context is built from
pub trait SpillFacts {
    fn spill(&self, spill_id: &str) -> SpillResult<SpillRecord>;

    /// Zone the spill is attributed to, the unzoned pseudo-zone included
    fn zone_for(&self, spill: &SpillRecord) -> Option<ZoneSnapshot>;

    fn latest_assessment(&self, spill_id: &str) -> Option<RiskAssessment>;

    fn cleanup_state(&self, spill_id: &str) -> SpillResult<CleanupState>;
}

/// External text generator consuming a rendered context
pub trait LanguageBackend: Send + Sync {
    fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String>;
}

/// Snapshot of everything known about one spill
#[derive(Debug, Clone, Serialize)]
pub struct AssistantContext {
    pub spill: SpillRecord,
    pub zone: Option<ZoneSnapshot>,
    pub history_summary: HistorySummary,
    pub assessment: Option<RiskAssessment>,
    pub cleanup: CleanupState,
    pub generated_at: DateTime<Utc>,
}

impl AssistantContext {
    /// Operator-facing prompt for a question about this spill
    pub fn render_prompt(&self, question: &str) -> String {
        let spill = &self.spill;
        // The pseudo-zone has no meaningful marker; point at the spill instead
        let (zone_name, zone_id, marker) = match &self.zone {
            Some(snapshot) if snapshot.zone.is_unzoned() => (
                snapshot.zone.name.as_str(),
                snapshot.zone.id.as_str(),
                spill.geometry.centroid,
            ),
            Some(snapshot) => (
                snapshot.zone.name.as_str(),
                snapshot.zone.id.as_str(),
                snapshot.zone.marker,
            ),
            None => ("Unknown zone", "none", spill.geometry.centroid),
        };

        let risk = match &self.assessment {
            Some(a) => format!("{} (score {:.2})", a.level, a.score),
            None => "not assessed".to_string(),
        };

        format!(
            "Zone context:\n\
             - Name: {zone_name}\n\
             - Zone ID: {zone_id}\n\
             - Scene ID: {scene}\n\
             - Approximate coordinates: {lat:.4} N, {lon:.4} E\n\
             \n\
             Current spill:\n\
             - Spill ID: {id}\n\
             - Oil type: {oil}\n\
             - Area: {area:.2} km²\n\
             - Thickness class: {thickness}\n\
             - Detection confidence: {conf:.0}%\n\
             - Computed risk level: {risk}\n\
             - Cleanup status: {status}\n\
             \n\
             Historical pattern summary:\n\
             {history}\n\
             \n\
             Operator question:\n\
             {question}\n\
             \n\
             Respond as an expert spill analyst. Include:\n\
             - Interpretation of historical trend\n\
             - Likely source/risk drivers\n\
             - Risk level (LOW / MEDIUM / HIGH)\n\
             - 2–3 concrete recommended actions.",
            scene = spill.source.scene_id,
            lat = marker.y,
            lon = marker.x,
            id = spill.id,
            oil = spill.oil_type,
            area = spill.area_km2(),
            thickness = spill.thickness,
            conf = spill.confidence as f64 * 100.0,
            status = self.cleanup.status,
            history = self.history_summary.describe(),
            question = question.trim(),
        )
    }
}

/// Builds context snapshots and forwards questions to an optional backend
#[derive(Default)]
pub struct AssistantAdapter {
    backend: Option<Box<dyn LanguageBackend>>,
}

impl AssistantAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Box<dyn LanguageBackend>) -> Self {
        Self {
            backend: Some(backend),
        }
    }

    /// Assemble the current facts for a spill. Unknown ids fail with `NotFound`.
    pub fn build_context(
        &self,
        facts: &dyn SpillFacts,
        spill_id: &str,
    ) -> SpillResult<AssistantContext> {
        let spill = facts.spill(spill_id)?;
        let cleanup = facts.cleanup_state(spill_id)?;
        let zone = facts.zone_for(&spill);
        let history_summary = zone
            .as_ref()
            .map(|z| HistorySummary::from_events(&z.history))
            .unwrap_or_else(|| HistorySummary::from_events(&[]));
        let assessment = facts.latest_assessment(spill_id);

        Ok(AssistantContext {
            spill,
            zone,
            history_summary,
            assessment,
            cleanup,
            generated_at: Utc::now(),
        })
    }

    /// Answer an operator question about a spill.
    ///
    /// Backend failures are reported in the reply text; only an unknown spill
    /// is an error.
    pub fn ask(&self, facts: &dyn SpillFacts, spill_id: &str, question: &str) -> SpillResult<String> {
        let context = self.build_context(facts, spill_id)?;

        let backend = match &self.backend {
            Some(backend) => backend,
            None => return Ok(BACKEND_UNAVAILABLE_NOTICE.to_string()),
        };

        let prompt = context.render_prompt(question);
        log::debug!("Assistant prompt for spill {}: {} chars", spill_id, prompt.len());
        match backend.complete(SYSTEM_PROMPT, &prompt) {
            Ok(reply) => Ok(reply),
            Err(e) => {
                log::warn!("Assistant backend failed for spill {}: {:#}", spill_id, e);
                Ok(format!("⚠️ Error calling LLM API: {}", e))
            }
        }
    }
}

impl std::fmt::Debug for AssistantAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantAdapter")
            .field("backend", &self.backend.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::zones::{HistoricalSpill, Zone, UNZONED_ID};
    use crate::types::{
        BoundingBox, CleanupStatus, GeoPoint, OilType, SceneInfo, SpillError, SpillGeometry,
        ThicknessClass,
    };
    use std::sync::Mutex;

    struct FixedFacts {
        spill: SpillRecord,
        zone: ZoneSnapshot,
    }

    impl SpillFacts for FixedFacts {
        fn spill(&self, spill_id: &str) -> SpillResult<SpillRecord> {
            if spill_id == self.spill.id {
                Ok(self.spill.clone())
            } else {
                Err(SpillError::NotFound(format!("spill {}", spill_id)))
            }
        }

        fn zone_for(&self, _spill: &SpillRecord) -> Option<ZoneSnapshot> {
            Some(self.zone.clone())
        }

        fn latest_assessment(&self, _spill_id: &str) -> Option<RiskAssessment> {
            None
        }

        fn cleanup_state(&self, spill_id: &str) -> SpillResult<CleanupState> {
            Ok(CleanupState {
                spill_id: spill_id.to_string(),
                status: CleanupStatus::Cleaning,
                history: Vec::new(),
            })
        }
    }

    fn facts() -> FixedFacts {
        let centroid = GeoPoint::new(49.8, 40.2);
        let spill = SpillRecord {
            id: "run-S001".to_string(),
            source: SceneInfo::new("S1A_CASPIAN"),
            geometry: SpillGeometry {
                centroid,
                bounds: BoundingBox::enclosing(&[centroid]).unwrap(),
                outline: vec![centroid],
                pixel_centroid: (0.0, 0.0),
                pixel_bounds: (0, 0, 0, 0),
            },
            pixel_count: 100,
            area_m2: 2.5e6,
            thickness: ThicknessClass::Thick,
            oil_type: OilType::Crude,
            confidence: 0.9,
            zone_id: Some("Z1".to_string()),
            created_at: Utc::now(),
        };
        let zone = ZoneSnapshot {
            zone: Zone {
                id: "Z1".to_string(),
                name: "Northern sector".to_string(),
                boundary: Vec::new(),
                marker: GeoPoint::new(49.8, 40.2),
                risk_baseline: 0.6,
            },
            historical_spill_count: 1,
            history: vec![HistoricalSpill {
                spill_id: "H1".to_string(),
                date: Utc::now(),
                area_km2: 1.8,
            }],
        };
        FixedFacts { spill, zone }
    }

    struct Recording(Mutex<Vec<String>>);

    impl LanguageBackend for Recording {
        fn complete(&self, system_prompt: &str, user_prompt: &str) -> anyhow::Result<String> {
            assert_eq!(system_prompt, SYSTEM_PROMPT);
            self.0.lock().unwrap().push(user_prompt.to_string());
            Ok("contain it".to_string())
        }
    }

    struct Failing;

    impl LanguageBackend for Failing {
        fn complete(&self, _: &str, _: &str) -> anyhow::Result<String> {
            anyhow::bail!("quota exceeded")
        }
    }

    #[test]
    fn test_build_context_unknown_spill() {
        let adapter = AssistantAdapter::new();
        let result = adapter.build_context(&facts(), "missing");
        assert!(matches!(result, Err(SpillError::NotFound(_))));
    }

    #[test]
    fn test_render_prompt_contents() {
        let adapter = AssistantAdapter::new();
        let context = adapter.build_context(&facts(), "run-S001").unwrap();
        let prompt = context.render_prompt("  Where did it come from?  ");

        assert!(prompt.contains("- Name: Northern sector"));
        assert!(prompt.contains("- Scene ID: S1A_CASPIAN"));
        assert!(prompt.contains("- Area: 2.50 km²"));
        assert!(prompt.contains("- Detection confidence: 90%"));
        assert!(prompt.contains("- Cleanup status: cleaning"));
        assert!(prompt.contains("This zone has 1 historical spills"));
        assert!(prompt.contains("Operator question:\nWhere did it come from?\n"));
    }

    #[test]
    fn test_unzoned_prompt_points_at_spill() {
        let mut open_water = facts();
        let centroid = GeoPoint::new(51.3, 38.7);
        open_water.spill.geometry.centroid = centroid;
        open_water.spill.zone_id = None;
        open_water.zone = ZoneSnapshot {
            zone: Zone {
                id: UNZONED_ID.to_string(),
                name: "Open water".to_string(),
                boundary: Vec::new(),
                marker: GeoPoint::new(0.0, 0.0),
                risk_baseline: 0.5,
            },
            historical_spill_count: 0,
            history: Vec::new(),
        };

        let context = AssistantAdapter::new().build_context(&open_water, "run-S001").unwrap();
        let prompt = context.render_prompt("Who is nearby?");
        assert!(prompt.contains("- Zone ID: UNZONED"));
        assert!(prompt.contains("- Approximate coordinates: 38.7000 N, 51.3000 E"));
        assert!(prompt.contains("No historical spills recorded for this zone."));

        // Real zones keep their marker
        let zoned = AssistantAdapter::new().build_context(&facts(), "run-S001").unwrap();
        assert!(zoned
            .render_prompt("?")
            .contains("- Approximate coordinates: 40.2000 N, 49.8000 E"));
    }

    #[test]
    fn test_ask_without_backend() {
        let adapter = AssistantAdapter::new();
        let reply = adapter.ask(&facts(), "run-S001", "status?").unwrap();
        assert_eq!(reply, BACKEND_UNAVAILABLE_NOTICE);
    }

    #[test]
    fn test_ask_with_backend() {
        let adapter = AssistantAdapter::with_backend(Box::new(Recording(Mutex::new(Vec::new()))));
        let reply = adapter.ask(&facts(), "run-S001", "status?").unwrap();
        assert_eq!(reply, "contain it");
    }

    #[test]
    fn test_backend_failure_is_reported_in_text() {
        let adapter = AssistantAdapter::with_backend(Box::new(Failing));
        let reply = adapter.ask(&facts(), "run-S001", "status?").unwrap();
        assert!(reply.contains("quota exceeded"));
    }
}

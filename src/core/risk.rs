use crate::config::{MonitorConfig, RiskThresholds, RiskWeights};
use crate::core::zones::{HistoricalSpill, Zone};
use crate::types::{SpillError, SpillId, SpillRecord, SpillResult, ZoneId};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Discretized danger of a spill
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

impl RiskLevel {
    /// Fixed response playbook, most urgent action first
    pub fn recommended_actions(&self) -> &'static [&'static str] {
        match self {
            RiskLevel::Low => &[
                "Continue satellite monitoring of the zone",
                "Re-evaluate on the next acquisition",
            ],
            RiskLevel::Medium => &[
                "Dispatch assessment vessel",
                "Notify the regional response coordinator",
                "Increase acquisition revisit frequency",
            ],
            RiskLevel::High => &[
                "Initiate containment with booms and skimmers",
                "Dispatch cleanup device",
                "Alert coastal authorities and nearby operators",
            ],
        }
    }
}

/// Contributing factors, in scoring order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FactorKind {
    Area,
    Confidence,
    ZoneBaseline,
    HistoryDensity,
}

pub const FACTOR_ORDER: [FactorKind; 4] = [
    FactorKind::Area,
    FactorKind::Confidence,
    FactorKind::ZoneBaseline,
    FactorKind::HistoryDensity,
];

/// One named factor with its normalized value and weight
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub kind: FactorKind,
    /// Value before normalization (km², probability, baseline, event count)
    pub raw: f64,
    /// Normalized into [0, 1]
    pub value: f64,
    pub weight: f64,
}

impl RiskFactor {
    pub fn contribution(&self) -> f64 {
        self.value * self.weight
    }
}

/// Result of scoring one spill
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub spill_id: SpillId,
    pub zone_id: ZoneId,
    pub level: RiskLevel,
    pub score: f64,
    pub factors: Vec<RiskFactor>,
    pub actions: Vec<String>,
    pub evaluated_at: DateTime<Utc>,
}

/// Scoring parameters
#[derive(Debug, Clone)]
pub struct RiskParams {
    pub weights: RiskWeights,
    pub thresholds: RiskThresholds,
    pub lookback: Duration,
    pub area_saturation_km2: f64,
    pub history_saturation_events: usize,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self::from_config(&MonitorConfig::default())
    }
}

impl RiskParams {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            weights: config.risk_weights,
            thresholds: config.risk_thresholds,
            lookback: Duration::days(config.history_lookback_days),
            area_saturation_km2: config.area_saturation_km2,
            history_saturation_events: config.history_saturation_events,
        }
    }
}

/// Weighted, deterministic risk scoring
#[derive(Debug, Clone, Default)]
pub struct RiskEngine {
    params: RiskParams,
}

impl RiskEngine {
    pub fn new(params: RiskParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &RiskParams {
        &self.params
    }

    /// Assess a spill in the context of its zone and that zone's history.
    ///
    /// Unassigned spills are assessed against the unzoned pseudo-zone; only a
    /// missing zone reference fails.
    pub fn assess(
        &self,
        spill: &SpillRecord,
        zone: Option<&Zone>,
        history: &[HistoricalSpill],
    ) -> SpillResult<RiskAssessment> {
        let zone = zone.ok_or_else(|| {
            SpillError::InsufficientData(format!("no zone context for spill {}", spill.id))
        })?;

        let recent = self.recent_events(spill, history);
        let factors = self.contributing_factors(
            spill.area_km2(),
            spill.confidence as f64,
            zone.risk_baseline,
            recent,
        );
        let score = self.score(&factors);
        let level = self.level_for_score(score);

        log::debug!(
            "Spill {} in {}: score {:.3} -> {} ({} recent event(s))",
            spill.id,
            zone.id,
            score,
            level,
            recent
        );

        Ok(RiskAssessment {
            spill_id: spill.id.clone(),
            zone_id: zone.id.clone(),
            level,
            score,
            factors,
            actions: level
                .recommended_actions()
                .iter()
                .map(|a| a.to_string())
                .collect(),
            evaluated_at: Utc::now(),
        })
    }

    /// Factor list in `FACTOR_ORDER`
    pub fn contributing_factors(
        &self,
        area_km2: f64,
        confidence: f64,
        zone_baseline: f64,
        recent_events: usize,
    ) -> Vec<RiskFactor> {
        let w = &self.params.weights;
        FACTOR_ORDER
            .iter()
            .map(|&kind| {
                let (raw, value, weight) = match kind {
                    FactorKind::Area => (
                        area_km2,
                        (area_km2 / self.params.area_saturation_km2).clamp(0.0, 1.0),
                        w.area,
                    ),
                    FactorKind::Confidence => (confidence, confidence.clamp(0.0, 1.0), w.confidence),
                    FactorKind::ZoneBaseline => {
                        (zone_baseline, zone_baseline.clamp(0.0, 1.0), w.zone_baseline)
                    }
                    FactorKind::HistoryDensity => (
                        recent_events as f64,
                        (recent_events as f64 / self.params.history_saturation_events as f64)
                            .min(1.0),
                        w.history_density,
                    ),
                };
                RiskFactor {
                    kind,
                    raw,
                    value,
                    weight,
                }
            })
            .collect()
    }

    /// Weighted mean of the factor values
    pub fn score(&self, factors: &[RiskFactor]) -> f64 {
        let total_weight: f64 = factors.iter().map(|f| f.weight).sum();
        if total_weight <= 0.0 {
            return 0.0;
        }
        factors.iter().map(RiskFactor::contribution).sum::<f64>() / total_weight
    }

    pub fn level_for_score(&self, score: f64) -> RiskLevel {
        let t = &self.params.thresholds;
        if score >= t.high {
            RiskLevel::High
        } else if score >= t.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Events inside the lookback window ending at the spill's detection time,
    /// not counting the spill itself
    fn recent_events(&self, spill: &SpillRecord, history: &[HistoricalSpill]) -> usize {
        let end = spill.created_at;
        let start = end - self.params.lookback;
        history
            .iter()
            .filter(|e| e.spill_id != spill.id && e.date >= start && e.date <= end)
            .count()
    }

    /// Assess many spills; a failure for one spill never affects the others
    pub fn assess_batch<'a, I>(&self, items: I) -> Vec<(SpillId, SpillResult<RiskAssessment>)>
    where
        I: IntoIterator<Item = (&'a SpillRecord, Option<&'a Zone>, &'a [HistoricalSpill])>,
    {
        items
            .into_iter()
            .map(|(spill, zone, history)| {
                let result = self.assess(spill, zone, history);
                if let Err(e) = &result {
                    log::warn!("Risk assessment failed for spill {}: {}", spill.id, e);
                }
                (spill.id.clone(), result)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::zones::ZoneRegistry;
    use crate::types::{
        BoundingBox, GeoPoint, OilType, SceneInfo, SpillGeometry, ThicknessClass,
    };
    use approx::assert_relative_eq;

    fn spill(id: &str, area_km2: f64, confidence: f32) -> SpillRecord {
        let c = GeoPoint::new(49.8, 40.2);
        SpillRecord {
            id: id.to_string(),
            source: SceneInfo::new("SCENE_001"),
            geometry: SpillGeometry {
                centroid: c,
                bounds: BoundingBox {
                    min_x: c.x,
                    max_x: c.x,
                    min_y: c.y,
                    max_y: c.y,
                },
                outline: Vec::new(),
                pixel_centroid: (0.0, 0.0),
                pixel_bounds: (0, 0, 0, 0),
            },
            pixel_count: 1,
            area_m2: area_km2 * 1.0e6,
            thickness: ThicknessClass::Medium,
            oil_type: OilType::Unknown,
            confidence,
            zone_id: None,
            created_at: Utc::now(),
        }
    }

    fn event(id: &str, days_ago: i64) -> HistoricalSpill {
        HistoricalSpill {
            spill_id: id.to_string(),
            date: Utc::now() - Duration::days(days_ago),
            area_km2: 1.0,
        }
    }

    #[test]
    fn test_score_is_weighted_mean() {
        let engine = RiskEngine::default();
        let factors = engine.contributing_factors(2.5, 0.8, 0.6, 2);
        // 0.35*0.5 + 0.15*0.8 + 0.25*0.6 + 0.25*0.4
        assert_relative_eq!(engine.score(&factors), 0.545, epsilon = 1e-12);
        assert_eq!(engine.level_for_score(0.545), RiskLevel::Medium);
        let kinds: Vec<FactorKind> = factors.iter().map(|f| f.kind).collect();
        assert_eq!(kinds, FACTOR_ORDER.to_vec());
    }

    #[test]
    fn test_level_boundaries() {
        let engine = RiskEngine::default();
        assert_eq!(engine.level_for_score(0.0), RiskLevel::Low);
        assert_eq!(engine.level_for_score(0.3999), RiskLevel::Low);
        assert_eq!(engine.level_for_score(0.40), RiskLevel::Medium);
        assert_eq!(engine.level_for_score(0.70), RiskLevel::High);
        assert_eq!(engine.level_for_score(1.0), RiskLevel::High);
    }

    #[test]
    fn test_identical_factors_give_identical_assessment() {
        let engine = RiskEngine::default();
        let registry = ZoneRegistry::caspian_default().unwrap();
        let zone = registry.zone("Z1");
        let s = spill("S1", 4.0, 0.9);
        let history = vec![event("H1", 10), event("H2", 20)];
        let a = engine.assess(&s, zone, &history).unwrap();
        let b = engine.assess(&s, zone, &history).unwrap();
        assert_eq!(a.level, b.level);
        assert_eq!(a.actions, b.actions);
        assert_eq!(a.factors, b.factors);
        assert_eq!(engine.level_for_score(engine.score(&a.factors)), a.level);
    }

    #[test]
    fn test_lookback_window_and_self_exclusion() {
        let engine = RiskEngine::default();
        let registry = ZoneRegistry::caspian_default().unwrap();
        let s = spill("S1", 1.0, 0.8);
        let history = vec![
            event("H1", 30),
            event("H2", 400),
            HistoricalSpill {
                spill_id: "S1".to_string(),
                date: s.created_at,
                area_km2: 1.0,
            },
        ];
        let a = engine.assess(&s, registry.zone("Z1"), &history).unwrap();
        let density = a
            .factors
            .iter()
            .find(|f| f.kind == FactorKind::HistoryDensity)
            .unwrap();
        assert_eq!(density.raw, 1.0);
        assert_relative_eq!(density.value, 0.2);
    }

    #[test]
    fn test_unzoned_pseudo_zone_still_assessed() {
        let engine = RiskEngine::default();
        let registry = ZoneRegistry::caspian_default().unwrap();
        let s = spill("S1", 1.0, 0.8);
        let zone = registry.zone_or_unzoned(None);
        let a = engine.assess(&s, Some(zone), &[]).unwrap();
        assert_eq!(a.zone_id, crate::core::zones::UNZONED_ID);
        let baseline = a
            .factors
            .iter()
            .find(|f| f.kind == FactorKind::ZoneBaseline)
            .unwrap();
        assert_relative_eq!(baseline.value, 0.5);
    }

    #[test]
    fn test_missing_zone_is_insufficient_data() {
        let engine = RiskEngine::default();
        let result = engine.assess(&spill("S1", 1.0, 0.8), None, &[]);
        assert!(matches!(result, Err(SpillError::InsufficientData(_))));
    }

    #[test]
    fn test_batch_isolates_failures() {
        let engine = RiskEngine::default();
        let registry = ZoneRegistry::caspian_default().unwrap();
        let a = spill("A", 1.0, 0.8);
        let b = spill("B", 6.0, 0.95);
        let results = engine.assess_batch(vec![
            (&a, None, &[][..]),
            (&b, registry.zone("Z1"), &[][..]),
        ]);
        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_err());
        let b_assessment = results[1].1.as_ref().unwrap();
        // 0.35*1 + 0.15*0.95 + 0.25*0.6 + 0 = 0.6425
        assert_eq!(b_assessment.level, RiskLevel::Medium);
        assert_eq!(b_assessment.actions[0], "Dispatch assessment vessel");
    }

    #[test]
    fn test_large_confident_spill_in_busy_zone_is_high() {
        let engine = RiskEngine::default();
        let registry = ZoneRegistry::caspian_default().unwrap();
        let history: Vec<HistoricalSpill> = (0..6).map(|i| event(&format!("H{}", i), i * 10)).collect();
        let a = engine
            .assess(&spill("S1", 8.0, 0.95), registry.zone("Z1"), &history)
            .unwrap();
        assert_eq!(a.level, RiskLevel::High);
        assert_eq!(a.actions[0], "Initiate containment with booms and skimmers");
    }
}

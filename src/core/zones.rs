//! Danger zones and their spill history.
//!
//! Zone geometry is immutable after load. The only mutable state is each zone's
//! history ledger, guarded by its own lock so that different zones never
//! contend.

use crate::types::{GeoPoint, SpillError, SpillGeometry, SpillId, SpillRecord, SpillResult, ZoneId};
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Identifier of the pseudo-zone used for spills outside every danger zone
pub const UNZONED_ID: &str = "UNZONED";

/// Tolerance for the on-boundary test, in CRS units
const BOUNDARY_EPSILON: f64 = 1e-9;

/// A named danger zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub name: String,
    /// Closed ring; the closing vertex may be omitted
    pub boundary: Vec<GeoPoint>,
    /// Map marker location
    pub marker: GeoPoint,
    /// Static risk baseline in [0, 1]
    pub risk_baseline: f64,
}

impl Zone {
    /// Boundary-inclusive containment test
    pub fn contains(&self, p: GeoPoint) -> bool {
        on_boundary(&self.boundary, p) || ray_cast(&self.boundary, p)
    }

    pub fn is_unzoned(&self) -> bool {
        self.id == UNZONED_ID
    }
}

/// A past spill attributed to a zone
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSpill {
    pub spill_id: SpillId,
    pub date: DateTime<Utc>,
    pub area_km2: f64,
}

/// Aggregate view of a zone's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistorySummary {
    pub total_events: usize,
    pub total_area_km2: f64,
    pub max_area_km2: f64,
    pub latest: Option<HistoricalSpill>,
}

impl HistorySummary {
    pub fn from_events(events: &[HistoricalSpill]) -> Self {
        Self {
            total_events: events.len(),
            total_area_km2: events.iter().map(|e| e.area_km2).sum(),
            max_area_km2: events.iter().map(|e| e.area_km2).fold(0.0, f64::max),
            latest: events.iter().max_by_key(|e| e.date).cloned(),
        }
    }

    /// Plain-text summary handed to the assistant
    pub fn describe(&self) -> String {
        match &self.latest {
            None => "No historical spills recorded for this zone.".to_string(),
            Some(latest) => format!(
                "This zone has {} historical spills, total affected area ~{:.1} km². \
                 Largest historical spill ~{:.1} km². \
                 Most recent spill on {} with area ~{:.1} km².",
                self.total_events,
                self.total_area_km2,
                self.max_area_km2,
                latest.date.format("%Y-%m-%d"),
                latest.area_km2
            ),
        }
    }
}

/// Read-only copy of a zone and its mutable counters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneSnapshot {
    pub zone: Zone,
    pub historical_spill_count: u64,
    pub history: Vec<HistoricalSpill>,
}

#[derive(Debug, Default)]
struct ZoneLedger {
    count: u64,
    events: Vec<HistoricalSpill>,
    recorded: HashSet<SpillId>,
}

/// On-disk zone definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneDefinition {
    #[serde(flatten)]
    pub zone: Zone,
    #[serde(default)]
    pub history: Vec<HistoricalSpill>,
}

/// Static set of danger zones plus per-zone history
#[derive(Debug)]
pub struct ZoneRegistry {
    /// Sorted by id, which is also the boundary tie-break order
    zones: Vec<Zone>,
    ledgers: HashMap<ZoneId, Mutex<ZoneLedger>>,
    unzoned: Zone,
}

impl ZoneRegistry {
    pub fn new(zones: Vec<Zone>) -> SpillResult<Self> {
        Self::from_definitions(
            zones
                .into_iter()
                .map(|zone| ZoneDefinition {
                    zone,
                    history: Vec::new(),
                })
                .collect(),
        )
    }

    pub fn from_definitions(definitions: Vec<ZoneDefinition>) -> SpillResult<Self> {
        let mut zones = Vec::with_capacity(definitions.len());
        let mut ledgers = HashMap::new();

        for def in definitions {
            let zone = def.zone;
            validate_zone(&zone)?;
            if ledgers.contains_key(&zone.id) {
                return Err(SpillError::Config(format!("Duplicate zone id {}", zone.id)));
            }

            let ledger = ZoneLedger {
                count: def.history.len() as u64,
                recorded: def.history.iter().map(|e| e.spill_id.clone()).collect(),
                events: def.history,
            };
            ledgers.insert(zone.id.clone(), Mutex::new(ledger));
            zones.push(zone);
        }
        zones.sort_by(|a, b| a.id.cmp(&b.id));

        log::info!("Loaded {} danger zone(s)", zones.len());
        Ok(Self {
            zones,
            ledgers,
            unzoned: Zone {
                id: UNZONED_ID.to_string(),
                name: "Outside all danger zones".to_string(),
                boundary: Vec::new(),
                marker: GeoPoint::new(0.0, 0.0),
                risk_baseline: 0.5,
            },
        })
    }

    /// Set the neutral baseline used for spills outside every zone
    pub fn with_unzoned_baseline(mut self, baseline: f64) -> Self {
        self.unzoned.risk_baseline = baseline;
        self
    }

    pub fn from_json(json: &str) -> SpillResult<Self> {
        let definitions: Vec<ZoneDefinition> = serde_json::from_str(json)?;
        Self::from_definitions(definitions)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SpillResult<Self> {
        log::info!("Loading danger zones from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// The three offshore Caspian Sea zones of the reference scenario
    pub fn caspian_default() -> SpillResult<Self> {
        let rect = |min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64| {
            vec![
                GeoPoint::new(min_lon, min_lat),
                GeoPoint::new(max_lon, min_lat),
                GeoPoint::new(max_lon, max_lat),
                GeoPoint::new(min_lon, max_lat),
            ]
        };
        let event = |id: &str, date: (i32, u32, u32), area_km2: f64| HistoricalSpill {
            spill_id: id.to_string(),
            date: NaiveDate::from_ymd_opt(date.0, date.1, date.2)
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc())
                .unwrap_or_default(),
            area_km2,
        };

        let definitions = vec![
            ZoneDefinition {
                zone: Zone {
                    id: "Z1".to_string(),
                    name: "Z1 northern offshore sector".to_string(),
                    boundary: rect(49.70, 40.15, 49.90, 40.25),
                    marker: GeoPoint::new(49.80, 40.20),
                    risk_baseline: 0.6,
                },
                history: vec![
                    event("H1", (2023, 5, 10), 1.8),
                    event("H2", (2023, 8, 21), 2.2),
                    event("H3", (2024, 1, 3), 1.1),
                ],
            },
            ZoneDefinition {
                zone: Zone {
                    id: "Z2".to_string(),
                    name: "Z2 central offshore sector".to_string(),
                    boundary: rect(49.80, 40.00, 50.00, 40.10),
                    marker: GeoPoint::new(49.90, 40.05),
                    risk_baseline: 0.5,
                },
                history: vec![event("H4", (2022, 11, 2), 3.0)],
            },
            ZoneDefinition {
                zone: Zone {
                    id: "Z3".to_string(),
                    name: "Z3 southern offshore sector".to_string(),
                    boundary: rect(49.90, 39.85, 50.10, 39.95),
                    marker: GeoPoint::new(50.00, 39.90),
                    risk_baseline: 0.4,
                },
                history: vec![
                    event("H5", (2023, 2, 15), 0.9),
                    event("H6", (2023, 9, 10), 1.2),
                ],
            },
        ];

        Self::from_definitions(definitions)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, id: &str) -> Option<&Zone> {
        if id == UNZONED_ID {
            return Some(&self.unzoned);
        }
        self.zones.iter().find(|z| z.id == id)
    }

    pub fn unzoned(&self) -> &Zone {
        &self.unzoned
    }

    /// Zone for an assignment result, falling back to the pseudo-zone
    pub fn zone_or_unzoned(&self, id: Option<&str>) -> &Zone {
        id.and_then(|id| self.zone(id)).unwrap_or(&self.unzoned)
    }

    /// Zone containing the spill centroid.
    ///
    /// A centroid on a shared boundary goes to the zone with the lowest id.
    /// `None` is a valid outcome for spills outside every zone.
    pub fn assign_zone(&self, geometry: &SpillGeometry) -> Option<ZoneId> {
        let centroid = geometry.centroid;
        let assigned = self
            .zones
            .iter()
            .find(|z| z.contains(centroid))
            .map(|z| z.id.clone());
        log::debug!(
            "Centroid ({:.5}, {:.5}) assigned to {:?}",
            centroid.x,
            centroid.y,
            assigned
        );
        assigned
    }

    /// Count a spill against a zone's history.
    ///
    /// Returns `Ok(false)` when this spill was already recorded, so retries never
    /// double count.
    pub fn record_assignment(&self, zone_id: &str, spill: &SpillRecord) -> SpillResult<bool> {
        let ledger = self
            .ledgers
            .get(zone_id)
            .ok_or_else(|| SpillError::NotFound(format!("zone {}", zone_id)))?;

        let mut ledger = ledger.lock();
        if !ledger.recorded.insert(spill.id.clone()) {
            log::debug!("Spill {} already recorded in zone {}", spill.id, zone_id);
            return Ok(false);
        }
        ledger.count += 1;
        ledger.events.push(HistoricalSpill {
            spill_id: spill.id.clone(),
            date: spill.created_at,
            area_km2: spill.area_km2(),
        });
        log::info!(
            "Recorded spill {} in zone {} (historical count {})",
            spill.id,
            zone_id,
            ledger.count
        );
        Ok(true)
    }

    pub fn historical_count(&self, zone_id: &str) -> Option<u64> {
        self.ledgers.get(zone_id).map(|l| l.lock().count)
    }

    /// Copy of a zone's history; empty for the pseudo-zone and unknown ids
    pub fn history(&self, zone_id: &str) -> Vec<HistoricalSpill> {
        self.ledgers
            .get(zone_id)
            .map(|l| l.lock().events.clone())
            .unwrap_or_default()
    }

    /// History together with the ledger count it was read at, taken under one
    /// lock. The count only grows, so it orders reads of the same zone.
    pub fn history_with_version(&self, zone_id: &str) -> (u64, Vec<HistoricalSpill>) {
        self.ledgers
            .get(zone_id)
            .map(|l| {
                let ledger = l.lock();
                (ledger.count, ledger.events.clone())
            })
            .unwrap_or_default()
    }

    pub fn history_summary(&self, zone_id: &str) -> HistorySummary {
        HistorySummary::from_events(&self.history(zone_id))
    }

    pub fn snapshot(&self, zone_id: &str) -> Option<ZoneSnapshot> {
        let zone = self.zone(zone_id)?.clone();
        let (historical_spill_count, history) = match self.ledgers.get(zone_id) {
            Some(ledger) => {
                let ledger = ledger.lock();
                (ledger.count, ledger.events.clone())
            }
            None => (0, Vec::new()),
        };
        Some(ZoneSnapshot {
            zone,
            historical_spill_count,
            history,
        })
    }

    /// Zone whose marker is nearest to a clicked point, within `max_distance`
    pub fn nearest_zone(&self, point: GeoPoint, max_distance: f64) -> Option<&Zone> {
        self.zones
            .iter()
            .map(|z| {
                let d = ((z.marker.x - point.x).powi(2) + (z.marker.y - point.y).powi(2)).sqrt();
                (z, d)
            })
            .filter(|(_, d)| *d < max_distance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(z, _)| z)
    }
}

fn validate_zone(zone: &Zone) -> SpillResult<()> {
    if zone.id.is_empty() || zone.id == UNZONED_ID {
        return Err(SpillError::Config(format!("Invalid zone id '{}'", zone.id)));
    }
    if zone.boundary.len() < 3 {
        return Err(SpillError::Config(format!(
            "Zone {} boundary needs at least 3 vertices, got {}",
            zone.id,
            zone.boundary.len()
        )));
    }
    if zone
        .boundary
        .iter()
        .chain(std::iter::once(&zone.marker))
        .any(|p| !p.x.is_finite() || !p.y.is_finite())
    {
        return Err(SpillError::Config(format!(
            "Zone {} has non-finite coordinates",
            zone.id
        )));
    }
    if !(0.0..=1.0).contains(&zone.risk_baseline) {
        return Err(SpillError::Config(format!(
            "Zone {} risk baseline must be in [0, 1], got {}",
            zone.id, zone.risk_baseline
        )));
    }
    Ok(())
}

fn edges(ring: &[GeoPoint]) -> impl Iterator<Item = (GeoPoint, GeoPoint)> + '_ {
    ring.iter()
        .enumerate()
        .map(move |(i, &a)| (a, ring[(i + 1) % ring.len()]))
}

fn on_boundary(ring: &[GeoPoint], p: GeoPoint) -> bool {
    edges(ring).any(|(a, b)| {
        let cross = (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x);
        let scale = (b.x - a.x).abs().max((b.y - a.y).abs()).max(1.0);
        cross.abs() <= BOUNDARY_EPSILON * scale
            && p.x >= a.x.min(b.x) - BOUNDARY_EPSILON
            && p.x <= a.x.max(b.x) + BOUNDARY_EPSILON
            && p.y >= a.y.min(b.y) - BOUNDARY_EPSILON
            && p.y <= a.y.max(b.y) + BOUNDARY_EPSILON
    })
}

/// Even-odd ray casting
fn ray_cast(ring: &[GeoPoint], p: GeoPoint) -> bool {
    let mut inside = false;
    for (a, b) in edges(ring) {
        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
    }
    inside
}

use chrono::{DateTime, Utc};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Real-valued single band raster (rows x cols)
pub type Raster = Array2<f32>;

/// Multi-band raster (band x rows x cols)
pub type BandStack = Array3<f32>;

/// Spill identifier, unique per detection run
pub type SpillId = String;

/// Danger zone identifier
pub type ZoneId = String;

/// Coordinate system enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateSystem {
    /// Image coordinates, pixel size taken as meters
    Radar,
    /// Geographic coordinates (longitude, latitude in degrees)
    Geographic,
    /// Projected coordinates in meters (e.g., UTM)
    Projected { epsg: u32 },
}

impl Default for CoordinateSystem {
    fn default() -> Self {
        CoordinateSystem::Geographic
    }
}

/// Polarization channels carried by a scene
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Polarization {
    VV,
    VH,
}

impl std::fmt::Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Polarization::VV => write!(f, "VV"),
            Polarization::VH => write!(f, "VH"),
        }
    }
}

/// A point in the scene coordinate system.
///
/// `x` is longitude (or easting), `y` is latitude (or northing).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub x: f64,
    pub y: f64,
}

impl GeoPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Geospatial bounding box
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub max_x: f64,
    pub min_y: f64,
    pub max_y: f64,
}

impl BoundingBox {
    /// Smallest box enclosing all points, `None` for an empty slice
    pub fn enclosing(points: &[GeoPoint]) -> Option<Self> {
        let first = points.first()?;
        let mut bbox = BoundingBox {
            min_x: first.x,
            max_x: first.x,
            min_y: first.y,
            max_y: first.y,
        };
        for p in &points[1..] {
            bbox.min_x = bbox.min_x.min(p.x);
            bbox.max_x = bbox.max_x.max(p.x);
            bbox.min_y = bbox.min_y.min(p.y);
            bbox.max_y = bbox.max_y.max(p.y);
        }
        Some(bbox)
    }

    pub fn contains(&self, p: GeoPoint) -> bool {
        p.x >= self.min_x && p.x <= self.max_x && p.y >= self.min_y && p.y <= self.max_y
    }
}

/// Geospatial transformation parameters (GDAL affine convention)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-or-rectangular pixels
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    /// Pixel grid where one pixel is one unit, origin at the top-left corner
    pub fn identity() -> Self {
        Self::north_up(0.0, 0.0, 1.0, 1.0)
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map fractional pixel coordinates to scene coordinates.
    ///
    /// (0.0, 0.0) is the top-left corner of the top-left pixel, so pixel centers
    /// sit at (row + 0.5, col + 0.5).
    pub fn pixel_to_geo(&self, row: f64, col: f64) -> GeoPoint {
        GeoPoint {
            x: self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            y: self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        }
    }

    /// Area of one pixel in squared CRS units (determinant of the affine part)
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y).abs()
    }
}

/// Scene identification, carried from ingest through to every spill record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub scene_id: String,
    pub name: String,
    pub acquired: Option<DateTime<Utc>>,
    pub description: String,
}

impl SceneInfo {
    pub fn new(scene_id: impl Into<String>) -> Self {
        let scene_id = scene_id.into();
        Self {
            name: scene_id.clone(),
            scene_id,
            acquired: None,
            description: String::new(),
        }
    }
}

/// Satellite scene ready for segmentation
#[derive(Debug, Clone)]
pub struct SatelliteImage {
    pub bands: BandStack,
    pub polarizations: Vec<Polarization>,
    pub geo_transform: Option<GeoTransform>,
    pub coordinate_system: CoordinateSystem,
    pub scene: SceneInfo,
}

impl SatelliteImage {
    pub fn channels(&self) -> usize {
        self.bands.dim().0
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        let (_, rows, cols) = self.bands.dim();
        (rows, cols)
    }
}

/// Coarse thickness bucket derived from area and confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThicknessClass {
    Thin,
    Medium,
    Thick,
}

impl std::fmt::Display for ThicknessClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ThicknessClass::Thin => write!(f, "thin"),
            ThicknessClass::Medium => write!(f, "medium"),
            ThicknessClass::Thick => write!(f, "thick"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OilType {
    Crude,
    Refined,
    #[default]
    Unknown,
}

impl std::fmt::Display for OilType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OilType::Crude => write!(f, "crude"),
            OilType::Refined => write!(f, "refined"),
            OilType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Cleanup status of a spill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CleanupStatus {
    #[default]
    Idle,
    Cleaning,
    Done,
}

impl std::fmt::Display for CleanupStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CleanupStatus::Idle => write!(f, "idle"),
            CleanupStatus::Cleaning => write!(f, "cleaning"),
            CleanupStatus::Done => write!(f, "done"),
        }
    }
}

/// Geometry of one detected region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpillGeometry {
    /// Region centroid in scene coordinates
    pub centroid: GeoPoint,
    /// Region extent in scene coordinates
    pub bounds: BoundingBox,
    /// Convex outline in scene coordinates, counter-clockwise in pixel space
    pub outline: Vec<GeoPoint>,
    /// Centroid in fractional pixel coordinates (row, col)
    pub pixel_centroid: (f64, f64),
    /// Inclusive pixel extent (min_row, min_col, max_row, max_col)
    pub pixel_bounds: (usize, usize, usize, usize),
}

/// One detected contiguous oil region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpillRecord {
    pub id: SpillId,
    pub source: SceneInfo,
    pub geometry: SpillGeometry,
    pub pixel_count: usize,
    pub area_m2: f64,
    pub thickness: ThicknessClass,
    pub oil_type: OilType,
    /// Mean per-pixel probability inside the region
    pub confidence: f32,
    /// At most one zone; `None` until assigned or when outside every zone
    pub zone_id: Option<ZoneId>,
    pub created_at: DateTime<Utc>,
}

impl SpillRecord {
    pub fn area_km2(&self) -> f64 {
        self.area_m2 / 1.0e6
    }
}

/// Error types for spill monitoring
#[derive(Debug, thiserror::Error)]
pub enum SpillError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Inference exceeded its {budget_ms} ms budget")]
    Timeout { budget_ms: u64 },

    #[error("Cannot {action} spill {spill_id} while it is {from}")]
    InvalidTransition {
        spill_id: SpillId,
        from: CleanupStatus,
        action: &'static str,
    },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for spill monitoring operations
pub type SpillResult<T> = Result<T, SpillError>;

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pixel_to_geo_north_up() {
        let gt = GeoTransform::north_up(49.70, 40.25, 0.001, 0.001);
        let p = gt.pixel_to_geo(10.0, 20.0);
        assert_relative_eq!(p.x, 49.72, epsilon = 1e-12);
        assert_relative_eq!(p.y, 40.24, epsilon = 1e-12);
        assert_relative_eq!(gt.pixel_area(), 1e-6, epsilon = 1e-18);
    }

    #[test]
    fn test_gdal_round_trip_keeps_rotation() {
        let gt = GeoTransform::from_gdal([1.0, 2.0, 0.5, 3.0, 0.25, -2.0]);
        assert_eq!(gt.to_gdal(), [1.0, 2.0, 0.5, 3.0, 0.25, -2.0]);
        assert_relative_eq!(gt.pixel_area(), 4.125);
    }

    #[test]
    fn test_bounding_box_enclosing() {
        assert!(BoundingBox::enclosing(&[]).is_none());
        let bbox = BoundingBox::enclosing(&[
            GeoPoint::new(1.0, 5.0),
            GeoPoint::new(-2.0, 3.0),
            GeoPoint::new(0.0, 7.0),
        ])
        .unwrap();
        assert_eq!(bbox.min_x, -2.0);
        assert_eq!(bbox.max_y, 7.0);
        assert!(bbox.contains(GeoPoint::new(0.0, 4.0)));
        assert!(!bbox.contains(GeoPoint::new(2.0, 4.0)));
    }

    #[test]
    fn test_transition_error_message() {
        let err = SpillError::InvalidTransition {
            spill_id: "S1".to_string(),
            from: CleanupStatus::Idle,
            action: "mark done",
        };
        assert_eq!(err.to_string(), "Cannot mark done spill S1 while it is idle");
    }
}

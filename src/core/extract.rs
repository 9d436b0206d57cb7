use crate::config::{Connectivity, MonitorConfig, ThicknessBuckets};
use crate::core::segmentation::Mask;
use crate::types::{
    BoundingBox, CoordinateSystem, GeoPoint, GeoTransform, OilType, SpillError, SpillGeometry,
    SpillRecord, SpillResult, ThicknessClass,
};
use chrono::Utc;
use image::{GrayImage, Luma};
use imageproc::region_labelling::connected_components;
use ndarray::Array2;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide counter keeping `extract` run ids unique
static EXTRACTION_RUNS: AtomicU64 = AtomicU64::new(0);

/// Meters per degree of latitude (mean)
const METERS_PER_DEG_LAT: f64 = 110_574.0;
/// Meters per degree of longitude at the equator
const METERS_PER_DEG_LON_EQUATOR: f64 = 111_320.0;

/// Region extraction parameters
#[derive(Debug, Clone)]
pub struct ExtractionParams {
    /// Regions with fewer pixels are discarded as noise
    pub min_region_pixels: usize,
    pub connectivity: Connectivity,
    pub thickness: ThicknessBuckets,
}

impl Default for ExtractionParams {
    fn default() -> Self {
        Self {
            min_region_pixels: 10,
            connectivity: Connectivity::Eight,
            thickness: ThicknessBuckets::default(),
        }
    }
}

impl ExtractionParams {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            min_region_pixels: config.min_region_pixels,
            connectivity: config.connectivity,
            thickness: config.thickness,
        }
    }
}

/// Connected group of oil pixels, in raster-scan discovery order
#[derive(Debug, Clone)]
pub struct Region {
    /// 1-based label in the label image
    pub label: u32,
    /// (row, col) of every member pixel
    pub pixels: Vec<(usize, usize)>,
}

/// Counts reported by one extraction pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionSummary {
    pub oil_pixels: usize,
    pub regions_found: usize,
    pub regions_kept: usize,
    pub pixels_discarded: usize,
}

/// Turns oil masks into spill records
#[derive(Debug, Clone, Default)]
pub struct SpillExtractor {
    params: ExtractionParams,
}

impl SpillExtractor {
    pub fn new(params: ExtractionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ExtractionParams {
        &self.params
    }

    /// Extract spills under a fresh run id: scene, timestamp and a process-wide
    /// sequence number, so separate runs never share spill ids
    pub fn extract(&self, mask: &Mask, geo: &GeoTransform) -> SpillResult<Vec<SpillRecord>> {
        let run_id = format!(
            "{}-{}-{:04}",
            mask.scene.scene_id,
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            EXTRACTION_RUNS.fetch_add(1, Ordering::Relaxed) + 1
        );
        self.extract_with_run_id(mask, geo, &run_id)
    }

    /// Extract spills with ids `<run_id>-S<n>`.
    ///
    /// Records are ordered by pixel centroid (row, then column), so identical
    /// masks yield identical geometry and ordering.
    pub fn extract_with_run_id(
        &self,
        mask: &Mask,
        geo: &GeoTransform,
        run_id: &str,
    ) -> SpillResult<Vec<SpillRecord>> {
        self.extract_with_summary(mask, geo, run_id)
            .map(|(records, _)| records)
    }

    pub fn extract_with_summary(
        &self,
        mask: &Mask,
        geo: &GeoTransform,
        run_id: &str,
    ) -> SpillResult<(Vec<SpillRecord>, ExtractionSummary)> {
        if mask.oil.dim() != mask.probability.dim() {
            return Err(SpillError::InvalidInput(format!(
                "Mask shape {:?} does not match confidence shape {:?}",
                mask.oil.dim(),
                mask.probability.dim()
            )));
        }
        let pixel_area = geo.pixel_area();
        if !pixel_area.is_finite() || pixel_area <= 0.0 {
            return Err(SpillError::InvalidInput(format!(
                "Geotransform has degenerate pixel area {}",
                pixel_area
            )));
        }

        let (_, regions) = label_regions(&mask.oil, self.params.connectivity);
        let mut summary = ExtractionSummary {
            oil_pixels: mask.oil_pixel_count(),
            regions_found: regions.len(),
            ..Default::default()
        };

        let created_at = Utc::now();
        let mut spills: Vec<(SpillGeometry, usize, f64, f32)> = Vec::new();
        for region in &regions {
            if region.pixels.len() < self.params.min_region_pixels {
                summary.pixels_discarded += region.pixels.len();
                continue;
            }
            let geometry = region_geometry(region, geo);
            let confidence = region
                .pixels
                .iter()
                .map(|&(r, c)| mask.probability[[r, c]] as f64)
                .sum::<f64>()
                / region.pixels.len() as f64;
            let area_m2 = region.pixels.len() as f64
                * pixel_area_m2(geo, mask.coordinate_system, geometry.centroid.y);
            spills.push((geometry, region.pixels.len(), area_m2, confidence as f32));
        }
        summary.regions_kept = spills.len();

        spills.sort_by(|a, b| {
            a.0.pixel_centroid
                .0
                .total_cmp(&b.0.pixel_centroid.0)
                .then(a.0.pixel_centroid.1.total_cmp(&b.0.pixel_centroid.1))
        });

        let records = spills
            .into_iter()
            .enumerate()
            .map(|(n, (geometry, pixel_count, area_m2, confidence))| SpillRecord {
                id: format!("{}-S{:03}", run_id, n + 1),
                source: mask.scene.clone(),
                geometry,
                pixel_count,
                area_m2,
                thickness: classify_thickness(area_m2 / 1.0e6, confidence, &self.params.thickness),
                oil_type: OilType::Unknown,
                confidence,
                zone_id: None,
                created_at,
            })
            .collect::<Vec<_>>();

        log::info!(
            "Extracted {} spill(s) from {} region(s) in scene {}",
            summary.regions_kept,
            summary.regions_found,
            mask.scene.scene_id
        );
        log::debug!("Extraction summary: {:?}", summary);
        Ok((records, summary))
    }
}

/// Label connected oil pixels.
///
/// Returns a label image (0 = background) and the regions in
/// raster-scan order of their first pixel. Every oil pixel lands in exactly one
/// region.
pub fn label_regions(oil: &Array2<bool>, connectivity: Connectivity) -> (Array2<u32>, Vec<Region>) {
    let (rows, cols) = oil.dim();
    let binary = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        Luma([if oil[[y as usize, x as usize]] { 255u8 } else { 0u8 }])
    });
    let components = connected_components(&binary, connectivity.into(), Luma([0u8]));

    // Relabel in raster-scan order of first pixel; pixels arrive row-major, so
    // every region's pixel list comes out sorted.
    let mut labels = Array2::<u32>::zeros((rows, cols));
    let mut regions: Vec<Region> = Vec::new();
    let mut index: HashMap<u32, usize> = HashMap::new();
    for (x, y, px) in components.enumerate_pixels() {
        let component = px[0];
        if component == 0 {
            continue;
        }
        let idx = match index.get(&component) {
            Some(&idx) => idx,
            None => {
                let idx = regions.len();
                regions.push(Region {
                    label: idx as u32 + 1,
                    pixels: Vec::new(),
                });
                index.insert(component, idx);
                idx
            }
        };
        let (r, c) = (y as usize, x as usize);
        labels[[r, c]] = regions[idx].label;
        regions[idx].pixels.push((r, c));
    }

    (labels, regions)
}

impl From<Connectivity> for imageproc::region_labelling::Connectivity {
    fn from(value: Connectivity) -> Self {
        match value {
            Connectivity::Four => imageproc::region_labelling::Connectivity::Four,
            Connectivity::Eight => imageproc::region_labelling::Connectivity::Eight,
        }
    }
}

/// Coarse thickness bucket; a documented simplification, not a radiometric estimate
pub fn classify_thickness(area_km2: f64, confidence: f32, buckets: &ThicknessBuckets) -> ThicknessClass {
    if area_km2 >= buckets.thick_min_area_km2 && confidence >= buckets.thick_min_confidence {
        ThicknessClass::Thick
    } else if area_km2 >= buckets.medium_min_area_km2 && confidence >= buckets.medium_min_confidence {
        ThicknessClass::Medium
    } else {
        ThicknessClass::Thin
    }
}

/// Ground area of one pixel in square meters
pub fn pixel_area_m2(geo: &GeoTransform, crs: CoordinateSystem, latitude: f64) -> f64 {
    match crs {
        CoordinateSystem::Geographic => {
            geo.pixel_area()
                * METERS_PER_DEG_LAT
                * METERS_PER_DEG_LON_EQUATOR
                * latitude.to_radians().cos().abs()
        }
        CoordinateSystem::Projected { .. } | CoordinateSystem::Radar => geo.pixel_area(),
    }
}

fn region_geometry(region: &Region, geo: &GeoTransform) -> SpillGeometry {
    let n = region.pixels.len() as f64;
    let (sum_r, sum_c) = region
        .pixels
        .iter()
        .fold((0.0, 0.0), |(sr, sc), &(r, c)| (sr + r as f64, sc + c as f64));
    let pixel_centroid = (sum_r / n + 0.5, sum_c / n + 0.5);

    let mut min_row = usize::MAX;
    let mut min_col = usize::MAX;
    let mut max_row = 0;
    let mut max_col = 0;
    for &(r, c) in &region.pixels {
        min_row = min_row.min(r);
        min_col = min_col.min(c);
        max_row = max_row.max(r);
        max_col = max_col.max(c);
    }

    // Outer corners of the leftmost and rightmost pixel on every row are
    // enough to span the convex hull of the region.
    let mut corners = Vec::new();
    let mut r_idx = 0;
    while r_idx < region.pixels.len() {
        let row = region.pixels[r_idx].0;
        let first_col = region.pixels[r_idx].1;
        let mut last_col = first_col;
        while r_idx < region.pixels.len() && region.pixels[r_idx].0 == row {
            last_col = region.pixels[r_idx].1;
            r_idx += 1;
        }
        let (r0, r1) = (row as f64, row as f64 + 1.0);
        let (c0, c1) = (first_col as f64, last_col as f64 + 1.0);
        corners.extend_from_slice(&[(r0, c0), (r1, c0), (r0, c1), (r1, c1)]);
    }
    let outline: Vec<GeoPoint> = convex_hull(corners)
        .into_iter()
        .map(|(r, c)| geo.pixel_to_geo(r, c))
        .collect();

    let corner_points = [
        geo.pixel_to_geo(min_row as f64, min_col as f64),
        geo.pixel_to_geo(min_row as f64, max_col as f64 + 1.0),
        geo.pixel_to_geo(max_row as f64 + 1.0, min_col as f64),
        geo.pixel_to_geo(max_row as f64 + 1.0, max_col as f64 + 1.0),
    ];
    let bounds = BoundingBox::enclosing(&corner_points).unwrap_or(BoundingBox {
        min_x: 0.0,
        max_x: 0.0,
        min_y: 0.0,
        max_y: 0.0,
    });

    SpillGeometry {
        centroid: geo.pixel_to_geo(pixel_centroid.0, pixel_centroid.1),
        bounds,
        outline,
        pixel_centroid,
        pixel_bounds: (min_row, min_col, max_row, max_col),
    }
}

/// Monotone chain convex hull over (row, col) points
fn convex_hull(mut points: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
    points.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.total_cmp(&b.1)));
    points.dedup();
    if points.len() < 3 {
        return points;
    }

    let cross = |o: (f64, f64), a: (f64, f64), b: (f64, f64)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };

    let mut lower: Vec<(f64, f64)> = Vec::new();
    for &p in &points {
        while lower.len() >= 2 && cross(lower[lower.len() - 2], lower[lower.len() - 1], p) <= 0.0 {
            lower.pop();
        }
        lower.push(p);
    }
    let mut upper: Vec<(f64, f64)> = Vec::new();
    for &p in points.iter().rev() {
        while upper.len() >= 2 && cross(upper[upper.len() - 2], upper[upper.len() - 1], p) <= 0.0 {
            upper.pop();
        }
        upper.push(p);
    }
    lower.pop();
    upper.pop();
    lower.extend(upper);
    lower
}

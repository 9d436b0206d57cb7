use crate::core::segmentation::Mask;
use crate::types::{CleanupStatus, SpillRecord, SpillResult, ThicknessClass};
use serde_json::{json, Value};
use std::path::Path;

/// Map colour for a spill, by cleanup status first and thickness second
pub fn display_color(thickness: ThicknessClass, status: CleanupStatus) -> &'static str {
    match (status, thickness) {
        (CleanupStatus::Done, _) => "green",
        (CleanupStatus::Cleaning, _) => "blue",
        (CleanupStatus::Idle, ThicknessClass::Thick) => "red",
        (CleanupStatus::Idle, ThicknessClass::Medium) => "orange",
        (CleanupStatus::Idle, ThicknessClass::Thin) => "yellow",
    }
}

/// Write the oil mask as an 8-bit grayscale PNG (oil = 255)
pub fn save_mask_png<P: AsRef<Path>>(mask: &Mask, output_path: P) -> SpillResult<()> {
    let (rows, cols) = mask.dim();
    log::info!(
        "Writing {}x{} mask PNG to {}",
        rows,
        cols,
        output_path.as_ref().display()
    );
    let img = image::GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        image::Luma([if mask.oil[[y as usize, x as usize]] { 255u8 } else { 0u8 }])
    });
    img.save(output_path)?;
    Ok(())
}

/// Write the oil mask as a georeferenced byte GeoTIFF (1 = oil, 0 = background)
#[cfg(feature = "gdal")]
pub fn save_mask_geotiff<P: AsRef<Path>>(mask: &Mask, output_path: P) -> SpillResult<()> {
    use crate::types::{CoordinateSystem, SpillError};
    use gdal::DriverManager;

    let geo = mask.geo_transform.ok_or_else(|| {
        SpillError::InvalidInput("Mask has no geotransform; use PNG export instead".to_string())
    })?;
    let (height, width) = mask.dim();

    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut dataset = driver.create_with_band_type::<u8, _>(
        output_path.as_ref(),
        width as isize,
        height as isize,
        1,
    )?;
    dataset.set_geo_transform(&geo.to_gdal())?;

    let epsg = match mask.coordinate_system {
        CoordinateSystem::Geographic => Some(4326),
        CoordinateSystem::Projected { epsg } if epsg != 0 => Some(epsg),
        _ => None,
    };
    if let Some(epsg) = epsg {
        dataset.set_spatial_ref(&gdal::spatial_ref::SpatialRef::from_epsg(epsg)?)?;
    }

    let mut rasterband = dataset.rasterband(1)?;
    let flat_data: Vec<u8> = mask.oil.iter().map(|&v| v as u8).collect();
    let buffer = gdal::raster::Buffer::new((width, height), flat_data);
    rasterband.write((0, 0), (width, height), &buffer)?;

    log::info!("Wrote mask GeoTIFF to {}", output_path.as_ref().display());
    Ok(())
}

/// Spill records as a GeoJSON FeatureCollection.
///
/// Each feature is the spill outline polygon; `status_of` supplies the current
/// cleanup status used for the display colour.
pub fn spills_to_geojson<F>(spills: &[SpillRecord], status_of: F) -> Value
where
    F: Fn(&str) -> CleanupStatus,
{
    let features: Vec<Value> = spills
        .iter()
        .map(|spill| {
            let status = status_of(&spill.id);
            let mut ring: Vec<[f64; 2]> = spill.geometry.outline.iter().map(|p| [p.x, p.y]).collect();
            if let (Some(first), Some(last)) = (ring.first().copied(), ring.last().copied()) {
                if first != last {
                    ring.push(first);
                }
            }
            let geometry = if ring.len() >= 4 {
                json!({ "type": "Polygon", "coordinates": [ring] })
            } else {
                json!({
                    "type": "Point",
                    "coordinates": [spill.geometry.centroid.x, spill.geometry.centroid.y]
                })
            };

            json!({
                "type": "Feature",
                "id": spill.id,
                "geometry": geometry,
                "properties": {
                    "spill_id": spill.id,
                    "scene_id": spill.source.scene_id,
                    "zone_id": spill.zone_id,
                    "area_km2": spill.area_km2(),
                    "pixel_count": spill.pixel_count,
                    "thickness_class": spill.thickness,
                    "oil_type": spill.oil_type,
                    "confidence": spill.confidence,
                    "status": status,
                    "color": display_color(spill.thickness, status),
                    "created_at": spill.created_at.to_rfc3339(),
                }
            })
        })
        .collect();

    json!({ "type": "FeatureCollection", "features": features })
}

pub fn write_geojson<P: AsRef<Path>>(collection: &Value, output_path: P) -> SpillResult<()> {
    let text = serde_json::to_string_pretty(collection)?;
    std::fs::write(output_path, text)?;
    Ok(())
}

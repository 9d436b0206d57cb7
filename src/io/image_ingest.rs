use crate::types::{
    BandStack, CoordinateSystem, GeoTransform, Polarization, Raster, SatelliteImage, SceneInfo,
    SpillError, SpillResult,
};
use ndarray::{stack, Array3, Axis};
use std::path::Path;

/// Loads satellite scenes and prepares their pixel values for segmentation
pub struct ImageIngest;

impl ImageIngest {
    /// Build a scene from an in-memory band stack (band x rows x cols)
    pub fn from_bands(
        bands: BandStack,
        polarizations: Vec<Polarization>,
        geo_transform: Option<GeoTransform>,
        coordinate_system: CoordinateSystem,
        scene: SceneInfo,
    ) -> SpillResult<SatelliteImage> {
        let image = SatelliteImage {
            bands,
            polarizations,
            geo_transform,
            coordinate_system,
            scene,
        };
        Self::validate(&image)?;
        Ok(image)
    }

    /// Build a single band prototype scene
    pub fn from_single_band(band: Raster, scene: SceneInfo) -> SpillResult<SatelliteImage> {
        let bands = band.insert_axis(Axis(0));
        Self::from_bands(bands, Vec::new(), None, CoordinateSystem::Radar, scene)
    }

    /// Build a dual-polarization (VV, VH) scene from co-registered rasters
    pub fn from_dual_pol(
        vv: &Raster,
        vh: &Raster,
        geo_transform: GeoTransform,
        coordinate_system: CoordinateSystem,
        scene: SceneInfo,
    ) -> SpillResult<SatelliteImage> {
        if vv.dim() != vh.dim() {
            return Err(SpillError::InvalidInput(format!(
                "VV raster {:?} and VH raster {:?} are not co-registered",
                vv.dim(),
                vh.dim()
            )));
        }
        let bands = stack(Axis(0), &[vv.view(), vh.view()])
            .map_err(|e| SpillError::InvalidInput(format!("Failed to stack bands: {}", e)))?;
        Self::from_bands(
            bands,
            vec![Polarization::VV, Polarization::VH],
            Some(geo_transform),
            coordinate_system,
            scene,
        )
    }

    /// Load a single band prototype image (PNG or any 8/16-bit raster `image` can decode)
    pub fn load_png<P: AsRef<Path>>(path: P, scene: SceneInfo) -> SpillResult<SatelliteImage> {
        log::info!("Reading prototype image from: {}", path.as_ref().display());

        let luma = image::open(path.as_ref())?.to_luma32f();
        let (width, height) = luma.dimensions();
        log::debug!("Prototype image size: {}x{}", width, height);

        let band = Raster::from_shape_vec((height as usize, width as usize), luma.into_raw())
            .map_err(|e| SpillError::InvalidInput(format!("Failed to reshape image data: {}", e)))?;
        Self::from_single_band(band, scene)
    }

    /// Load a georeferenced raster with all of its bands
    #[cfg(feature = "gdal")]
    pub fn load_raster<P: AsRef<Path>>(
        path: P,
        polarizations: Vec<Polarization>,
        scene: SceneInfo,
    ) -> SpillResult<SatelliteImage> {
        use gdal::Dataset;

        log::info!("Reading georeferenced raster from: {}", path.as_ref().display());
        let dataset = Dataset::open(path.as_ref())?;

        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count() as usize;
        let geo_transform = dataset.geo_transform().ok().map(GeoTransform::from_gdal);
        let coordinate_system = Self::coordinate_system_from_wkt(&dataset.projection());

        log::debug!("Raster size: {}x{} with {} band(s)", width, height, band_count);
        log::debug!("Raster geotransform: {:?}", geo_transform);

        let mut bands = Array3::<f32>::zeros((band_count, height, width));
        for b in 0..band_count {
            let rasterband = dataset.rasterband(b as isize + 1)?;
            let buffer = rasterband.read_as::<f32>((0, 0), (width, height), (width, height), None)?;
            let band = Raster::from_shape_vec((height, width), buffer.data)
                .map_err(|e| SpillError::InvalidInput(format!("Failed to reshape band {}: {}", b + 1, e)))?;
            bands.index_axis_mut(Axis(0), b).assign(&band);
        }

        Self::from_bands(bands, polarizations, geo_transform, coordinate_system, scene)
    }

    #[cfg(feature = "gdal")]
    fn coordinate_system_from_wkt(wkt: &str) -> CoordinateSystem {
        if wkt.starts_with("PROJCS") || wkt.starts_with("PROJCRS") {
            CoordinateSystem::Projected { epsg: 0 }
        } else if wkt.is_empty() {
            CoordinateSystem::Radar
        } else {
            CoordinateSystem::Geographic
        }
    }

    /// Reject empty rasters and non-finite pixels; never coerce them
    pub fn validate(image: &SatelliteImage) -> SpillResult<()> {
        let (channels, rows, cols) = image.bands.dim();
        if channels == 0 || rows == 0 || cols == 0 {
            return Err(SpillError::InvalidInput(format!(
                "Image has empty shape {}x{}x{}",
                channels, rows, cols
            )));
        }
        if !image.polarizations.is_empty() && image.polarizations.len() != channels {
            return Err(SpillError::InvalidInput(format!(
                "{} polarization label(s) for {} band(s)",
                image.polarizations.len(),
                channels
            )));
        }
        if let Some(((b, r, c), v)) = image.bands.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(SpillError::InvalidInput(format!(
                "Non-finite pixel value {} at band {}, row {}, col {}",
                v, b, r, c
            )));
        }
        Ok(())
    }

    /// Per-channel min-max scaling into [0, 1].
    ///
    /// Statistics come from the image itself so that acquisitions with different
    /// sensor gains land in comparable ranges. A constant channel maps to 0.
    pub fn normalize_channels(bands: &BandStack) -> SpillResult<BandStack> {
        let mut normalized = bands.clone();
        for (b, mut channel) in normalized.axis_iter_mut(Axis(0)).enumerate() {
            let (min, max) = channel.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
            if !min.is_finite() || !max.is_finite() {
                return Err(SpillError::InvalidInput(format!(
                    "Band {} has no finite values to normalize",
                    b + 1
                )));
            }

            let range = max - min;
            log::debug!("Band {} range: [{}, {}]", b + 1, min, max);
            if range > 0.0 {
                channel.mapv_inplace(|v| (v - min) / range);
            } else {
                channel.fill(0.0);
            }
        }
        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    #[test]
    fn test_normalization_is_per_channel() {
        let mut bands = Array3::<f32>::zeros((2, 2, 2));
        bands
            .index_axis_mut(Axis(0), 0)
            .assign(&Array2::from_shape_vec((2, 2), vec![0.0, 10.0, 5.0, 10.0]).unwrap());
        bands
            .index_axis_mut(Axis(0), 1)
            .assign(&Array2::from_shape_vec((2, 2), vec![-2.0, -1.0, 0.0, 2.0]).unwrap());

        let normalized = ImageIngest::normalize_channels(&bands).unwrap();
        assert_relative_eq!(normalized[[0, 1, 0]], 0.5);
        assert_relative_eq!(normalized[[0, 0, 1]], 1.0);
        assert_relative_eq!(normalized[[1, 0, 0]], 0.0);
        assert_relative_eq!(normalized[[1, 0, 1]], 0.25);
        assert_relative_eq!(normalized[[1, 1, 1]], 1.0);
    }

    #[test]
    fn test_gain_invariance() {
        let band = Array2::from_shape_fn((8, 8), |(i, j)| (i * 8 + j) as f32);
        let low = ImageIngest::normalize_channels(&band.clone().insert_axis(Axis(0))).unwrap();
        let high = ImageIngest::normalize_channels(&(band * 37.5 + 4.0).insert_axis(Axis(0))).unwrap();
        for (a, b) in low.iter().zip(high.iter()) {
            assert_relative_eq!(*a, *b, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_constant_channel_maps_to_zero() {
        let bands = Array3::<f32>::from_elem((1, 3, 3), 7.0);
        let normalized = ImageIngest::normalize_channels(&bands).unwrap();
        assert!(normalized.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut band = Array2::<f32>::ones((4, 4));
        band[[2, 3]] = f32::NAN;
        let result = ImageIngest::from_single_band(band, SceneInfo::new("SCENE_NAN"));
        assert!(matches!(result, Err(SpillError::InvalidInput(_))));
    }

    #[test]
    fn test_dual_pol_requires_matching_shapes() {
        let vv = Array2::<f32>::ones((4, 4));
        let vh = Array2::<f32>::ones((4, 5));
        let result = ImageIngest::from_dual_pol(
            &vv,
            &vh,
            GeoTransform::identity(),
            CoordinateSystem::Radar,
            SceneInfo::new("SCENE_X"),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_png_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scene.png");
        let img = image::GrayImage::from_fn(6, 4, |x, _| image::Luma([(x * 40) as u8]));
        img.save(&path).unwrap();

        let scene = ImageIngest::load_png(&path, SceneInfo::new("PNG_001")).unwrap();
        assert_eq!(scene.channels(), 1);
        assert_eq!(scene.dim(), (4, 6));
        assert_relative_eq!(scene.bands[[0, 0, 1]], 40.0 / 255.0, epsilon = 1e-6);
    }
}

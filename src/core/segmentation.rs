use crate::config::{ModelVariant, MonitorConfig};
use crate::io::ImageIngest;
use crate::types::{
    BandStack, CoordinateSystem, GeoTransform, Raster, SatelliteImage, SceneInfo, SpillError,
    SpillResult,
};
use ndarray::{Array2, Array3, ArrayView3, Axis};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One "same"-padded convolution layer.
///
/// Weights are stored flattened in `[out][in][ky][kx]` order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConvLayer {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel_size: usize,
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl ConvLayer {
    #[inline]
    fn weight(&self, o: usize, i: usize, ky: usize, kx: usize) -> f32 {
        let k = self.kernel_size;
        self.weights[((o * self.in_channels + i) * k + ky) * k + kx]
    }
}

/// Fully convolutional binary segmentation network.
///
/// ReLU between layers, sigmoid on the single output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentationModel {
    pub variant: ModelVariant,
    pub layers: Vec<ConvLayer>,
}

impl SegmentationModel {
    /// Load weights exported by the training job
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> SpillResult<Self> {
        log::info!("Loading segmentation weights from: {}", path.as_ref().display());
        let text = std::fs::read_to_string(path)?;
        let model: Self = serde_json::from_str(&text)?;
        model.validate()?;
        log::info!(
            "Loaded {} model with {} layer(s)",
            model.variant,
            model.layers.len()
        );
        Ok(model)
    }

    /// Untrained 1x1 logistic model that flags low-backscatter pixels.
    ///
    /// Oil dampens capillary waves, so slicks show up dark in SAR. Probability is
    /// `sigmoid(10 * (0.5 - mean normalized intensity))`.
    pub fn dark_spot_baseline(variant: ModelVariant) -> Self {
        let channels = variant.input_channels();
        let gain = 10.0f32;
        Self {
            variant,
            layers: vec![ConvLayer {
                in_channels: channels,
                out_channels: 1,
                kernel_size: 1,
                weights: vec![-gain / channels as f32; channels],
                bias: vec![gain * 0.5],
            }],
        }
    }

    /// Check the layer chain against the variant's channel contract
    pub fn validate(&self) -> SpillResult<()> {
        if self.layers.is_empty() {
            return Err(SpillError::Config("Model has no layers".to_string()));
        }

        let mut channels = self.variant.input_channels();
        for (idx, layer) in self.layers.iter().enumerate() {
            if layer.in_channels != channels {
                return Err(SpillError::Config(format!(
                    "Layer {} expects {} input channel(s) but receives {}",
                    idx, layer.in_channels, channels
                )));
            }
            if layer.kernel_size == 0 || layer.kernel_size % 2 == 0 {
                return Err(SpillError::Config(format!(
                    "Layer {} kernel size must be odd, got {}",
                    idx, layer.kernel_size
                )));
            }
            let expected =
                layer.out_channels * layer.in_channels * layer.kernel_size * layer.kernel_size;
            if layer.weights.len() != expected || layer.bias.len() != layer.out_channels {
                return Err(SpillError::Config(format!(
                    "Layer {} has {} weights / {} biases, expected {} / {}",
                    idx,
                    layer.weights.len(),
                    layer.bias.len(),
                    expected,
                    layer.out_channels
                )));
            }
            if layer.weights.iter().chain(layer.bias.iter()).any(|v| !v.is_finite()) {
                return Err(SpillError::Config(format!(
                    "Layer {} contains non-finite parameters",
                    idx
                )));
            }
            channels = layer.out_channels;
        }

        if channels != 1 {
            return Err(SpillError::Config(format!(
                "Model must end in a single probability channel, got {}",
                channels
            )));
        }
        Ok(())
    }
}

/// Binary oil mask with per-pixel confidence.
///
/// Mirrors the georeferencing of the image it was produced from.
#[derive(Debug, Clone)]
pub struct Mask {
    pub oil: Array2<bool>,
    pub probability: Raster,
    pub threshold: f32,
    pub geo_transform: Option<GeoTransform>,
    pub coordinate_system: CoordinateSystem,
    pub scene: SceneInfo,
}

impl Mask {
    /// Threshold a probability map: strictly above `threshold` is oil
    pub fn from_probability(
        probability: Raster,
        threshold: f32,
        geo_transform: Option<GeoTransform>,
        coordinate_system: CoordinateSystem,
        scene: SceneInfo,
    ) -> Self {
        let oil = probability.mapv(|p| p > threshold);
        Self {
            oil,
            probability,
            threshold,
            geo_transform,
            coordinate_system,
            scene,
        }
    }

    /// (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        self.oil.dim()
    }

    pub fn oil_pixel_count(&self) -> usize {
        self.oil.iter().filter(|&&v| v).count()
    }
}

/// Segmentation parameters
#[derive(Debug, Clone)]
pub struct SegmentationParams {
    /// Probability cutoff
    pub threshold: f32,
    /// Inference budget, `None` for unbounded
    pub timeout: Option<Duration>,
}

impl Default for SegmentationParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl SegmentationParams {
    pub fn from_config(config: &MonitorConfig) -> Self {
        Self {
            threshold: config.detection_threshold,
            timeout: match config.inference_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
        }
    }
}

/// Runs the loaded model over normalized scenes.
///
/// The model is shared read-only state; engines are cheap to clone and can be
/// used from several worker threads at once.
#[derive(Debug, Clone)]
pub struct SegmentationEngine {
    model: Arc<SegmentationModel>,
    params: SegmentationParams,
}

impl SegmentationEngine {
    pub fn new(model: Arc<SegmentationModel>, params: SegmentationParams) -> SpillResult<Self> {
        model.validate()?;
        if !(0.0..1.0).contains(&params.threshold) {
            return Err(SpillError::Config(format!(
                "Detection threshold must be in [0, 1), got {}",
                params.threshold
            )));
        }
        Ok(Self { model, params })
    }

    /// Engine for the configured variant; the model must match it
    pub fn from_config(model: Arc<SegmentationModel>, config: &MonitorConfig) -> SpillResult<Self> {
        if model.variant != config.model_variant {
            return Err(SpillError::Config(format!(
                "Loaded model is {} but configuration requests {}",
                model.variant, config.model_variant
            )));
        }
        Self::new(model, SegmentationParams::from_config(config))
    }

    pub fn model(&self) -> &SegmentationModel {
        &self.model
    }

    pub fn params(&self) -> &SegmentationParams {
        &self.params
    }

    /// Segment a scene into an oil mask
    pub fn segment(&self, image: &SatelliteImage) -> SpillResult<Mask> {
        let started = Instant::now();
        let expected = self.model.variant.input_channels();
        if image.channels() != expected {
            return Err(SpillError::InvalidInput(format!(
                "{} model expects {} channel(s), scene {} has {}",
                self.model.variant,
                expected,
                image.scene.scene_id,
                image.channels()
            )));
        }
        ImageIngest::validate(image)?;

        let (rows, cols) = image.dim();
        log::info!(
            "Segmenting scene {} ({}x{}, {} channel(s))",
            image.scene.scene_id,
            rows,
            cols,
            expected
        );

        let deadline = self.params.timeout.map(|t| started + t);
        let normalized = ImageIngest::normalize_channels(&image.bands)?;
        let probability = self.forward(normalized, deadline)?;

        let mask = Mask::from_probability(
            probability,
            self.params.threshold,
            image.geo_transform,
            image.coordinate_system,
            image.scene.clone(),
        );
        log::info!(
            "Segmentation of {} finished in {:.3}s, {} oil pixel(s)",
            image.scene.scene_id,
            started.elapsed().as_secs_f64(),
            mask.oil_pixel_count()
        );
        Ok(mask)
    }

    fn forward(&self, input: BandStack, deadline: Option<Instant>) -> SpillResult<Raster> {
        let last = self.model.layers.len() - 1;
        let mut activations = input;

        for (idx, layer) in self.model.layers.iter().enumerate() {
            self.check_deadline(deadline)?;
            log::debug!(
                "Layer {}: {} -> {} channel(s), kernel {}",
                idx,
                layer.in_channels,
                layer.out_channels,
                layer.kernel_size
            );

            let expired = AtomicBool::new(false);
            let mut output = Self::convolve(layer, activations.view(), deadline, &expired);
            if expired.load(Ordering::Relaxed) {
                return Err(self.timeout_error());
            }

            if idx == last {
                output.mapv_inplace(sigmoid);
            } else {
                output.mapv_inplace(|v| v.max(0.0));
            }
            activations = output;
        }

        Ok(activations.index_axis_move(Axis(0), 0))
    }

    fn convolve(
        layer: &ConvLayer,
        input: ArrayView3<f32>,
        deadline: Option<Instant>,
        expired: &AtomicBool,
    ) -> BandStack {
        let (_, height, width) = input.dim();
        let mut output = Array3::<f32>::zeros((layer.out_channels, height, width));

        let compute_row = |y: usize, mut row: ndarray::ArrayViewMut2<f32>| {
            if expired.load(Ordering::Relaxed) {
                return;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                expired.store(true, Ordering::Relaxed);
                return;
            }

            let half = layer.kernel_size / 2;
            for o in 0..layer.out_channels {
                for x in 0..width {
                    let mut sum = layer.bias[o];
                    for i in 0..layer.in_channels {
                        for ky in 0..layer.kernel_size {
                            let yy = y as isize + ky as isize - half as isize;
                            if yy < 0 || yy >= height as isize {
                                continue;
                            }
                            for kx in 0..layer.kernel_size {
                                let xx = x as isize + kx as isize - half as isize;
                                if xx < 0 || xx >= width as isize {
                                    continue;
                                }
                                sum += layer.weight(o, i, ky, kx)
                                    * input[[i, yy as usize, xx as usize]];
                            }
                        }
                    }
                    row[[o, x]] = sum;
                }
            }
        };

        #[cfg(feature = "parallel")]
        {
            use ndarray::parallel::prelude::*;
            output
                .axis_iter_mut(Axis(1))
                .into_par_iter()
                .enumerate()
                .for_each(|(y, row)| compute_row(y, row));
        }
        #[cfg(not(feature = "parallel"))]
        {
            for (y, row) in output.axis_iter_mut(Axis(1)).enumerate() {
                compute_row(y, row);
            }
        }

        output
    }

    fn check_deadline(&self, deadline: Option<Instant>) -> SpillResult<()> {
        match deadline {
            Some(d) if Instant::now() >= d => Err(self.timeout_error()),
            _ => Ok(()),
        }
    }

    fn timeout_error(&self) -> SpillError {
        let budget_ms = self
            .params
            .timeout
            .map(|t| t.as_millis() as u64)
            .unwrap_or_default();
        log::warn!("Segmentation exceeded its {} ms budget", budget_ms);
        SpillError::Timeout { budget_ms }
    }
}

#[inline]
fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Polarization;
    use approx::assert_relative_eq;

    fn single_band_scene(data: Array2<f32>) -> SatelliteImage {
        ImageIngest::from_single_band(data, SceneInfo::new("TEST")).unwrap()
    }

    #[test]
    fn test_baseline_flags_dark_pixels() {
        let mut data = Array2::<f32>::from_elem((20, 20), 0.8);
        for i in 5..10 {
            for j in 5..10 {
                data[[i, j]] = 0.05;
            }
        }
        let model = Arc::new(SegmentationModel::dark_spot_baseline(ModelVariant::Png));
        let engine = SegmentationEngine::new(model, SegmentationParams::default()).unwrap();
        let mask = engine.segment(&single_band_scene(data)).unwrap();

        assert_eq!(mask.oil_pixel_count(), 25);
        assert!(mask.oil[[7, 7]]);
        assert!(!mask.oil[[0, 0]]);
        assert_relative_eq!(mask.probability[[7, 7]], sigmoid(5.0), epsilon = 1e-6);
    }

    #[test]
    fn test_channel_mismatch_is_invalid_input() {
        let model = Arc::new(SegmentationModel::dark_spot_baseline(ModelVariant::SarDual));
        let engine = SegmentationEngine::new(model, SegmentationParams::default()).unwrap();
        let result = engine.segment(&single_band_scene(Array2::ones((8, 8))));
        assert!(matches!(result, Err(SpillError::InvalidInput(_))));
    }

    #[test]
    fn test_non_finite_pixels_rejected_before_inference() {
        let model = Arc::new(SegmentationModel::dark_spot_baseline(ModelVariant::Png));
        let engine = SegmentationEngine::new(model, SegmentationParams::default()).unwrap();
        let mut scene = single_band_scene(Array2::ones((8, 8)));
        scene.bands[[0, 3, 3]] = f32::INFINITY;
        assert!(matches!(
            engine.segment(&scene),
            Err(SpillError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_exhausted_budget_times_out() {
        let model = Arc::new(SegmentationModel::dark_spot_baseline(ModelVariant::Png));
        let params = SegmentationParams {
            threshold: 0.5,
            timeout: Some(Duration::ZERO),
        };
        let engine = SegmentationEngine::new(model, params).unwrap();
        let result = engine.segment(&single_band_scene(Array2::ones((16, 16))));
        assert!(matches!(result, Err(SpillError::Timeout { budget_ms: 0 })));
    }

    #[test]
    fn test_three_by_three_kernel_padding() {
        // Box filter of ones: the corner sees 4 pixels, the center sees 9.
        let model = SegmentationModel {
            variant: ModelVariant::Png,
            layers: vec![ConvLayer {
                in_channels: 1,
                out_channels: 1,
                kernel_size: 3,
                weights: vec![1.0; 9],
                bias: vec![0.0],
            }],
        };
        let engine = SegmentationEngine::new(
            Arc::new(model),
            SegmentationParams {
                threshold: 0.5,
                timeout: None,
            },
        )
        .unwrap();
        let mut data = Array2::<f32>::ones((5, 5));
        data[[4, 4]] = 0.0;
        let mask = engine.segment(&single_band_scene(data)).unwrap();
        assert_relative_eq!(mask.probability[[0, 0]], sigmoid(4.0), epsilon = 1e-6);
        assert_relative_eq!(mask.probability[[2, 2]], sigmoid(9.0), epsilon = 1e-6);
        assert_relative_eq!(mask.probability[[3, 3]], sigmoid(8.0), epsilon = 1e-6);
    }

    #[test]
    fn test_invalid_models_rejected() {
        let mut model = SegmentationModel::dark_spot_baseline(ModelVariant::SarDual);
        model.layers[0].weights.pop();
        assert!(model.validate().is_err());

        let mut model = SegmentationModel::dark_spot_baseline(ModelVariant::Png);
        model.layers[0].out_channels = 2;
        model.layers[0].bias = vec![0.0, 0.0];
        model.layers[0].weights = vec![1.0, 1.0];
        assert!(model.validate().is_err());
    }

    #[test]
    fn test_variant_must_match_config() {
        let model = Arc::new(SegmentationModel::dark_spot_baseline(ModelVariant::Png));
        let config = MonitorConfig::default();
        assert!(SegmentationEngine::from_config(model, &config).is_err());
    }

    #[test]
    fn test_weights_load_from_json() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("weights.json");
        let model = SegmentationModel::dark_spot_baseline(ModelVariant::SarDual);
        std::fs::write(&path, serde_json::to_string(&model).unwrap()).unwrap();

        let loaded = SegmentationModel::from_json_file(&path).unwrap();
        assert_eq!(loaded, model);

        let vv = Array2::<f32>::ones((4, 4));
        let scene = ImageIngest::from_dual_pol(
            &vv,
            &vv,
            GeoTransform::identity(),
            CoordinateSystem::Radar,
            SceneInfo::new("DUAL"),
        )
        .unwrap();
        assert_eq!(scene.polarizations, vec![Polarization::VV, Polarization::VH]);
        let engine = SegmentationEngine::new(Arc::new(loaded), SegmentationParams::default()).unwrap();
        // Constant channels normalize to 0, i.e. maximally dark.
        assert_eq!(engine.segment(&scene).unwrap().oil_pixel_count(), 16);
    }
}

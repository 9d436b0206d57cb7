//! Python bindings used by the dashboard

use crate::config::MonitorConfig;
use crate::io::ImageIngest;
use crate::monitor::SpillMonitor;
use crate::types::{CoordinateSystem, GeoPoint, GeoTransform, OilType, SceneInfo, SpillError};
use numpy::PyReadonlyArray2;
use pyo3::exceptions::{PyKeyError, PyRuntimeError, PyTimeoutError, PyValueError};
use pyo3::prelude::*;
use serde::Serialize;

fn to_py_err(e: SpillError) -> PyErr {
    match e {
        SpillError::InvalidInput(_) | SpillError::InvalidTransition { .. } | SpillError::Config(_) => {
            PyValueError::new_err(e.to_string())
        }
        SpillError::NotFound(_) => PyKeyError::new_err(e.to_string()),
        SpillError::Timeout { .. } => PyTimeoutError::new_err(e.to_string()),
        _ => PyRuntimeError::new_err(e.to_string()),
    }
}

fn to_json<T: Serialize>(value: &T) -> PyResult<String> {
    serde_json::to_string(value).map_err(|e| PyRuntimeError::new_err(format!("{}", e)))
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PySpillMonitor>()?;
    Ok(())
}

/// Python wrapper for SpillMonitor. Structured results are returned as JSON text.
#[pyclass(name = "SpillMonitor")]
struct PySpillMonitor {
    inner: SpillMonitor,
}

#[pymethods]
impl PySpillMonitor {
    /// Caspian scenario monitor; `config_json` overrides the default configuration
    #[new]
    #[pyo3(signature = (config_json=None))]
    fn new(config_json: Option<&str>) -> PyResult<Self> {
        let config = match config_json {
            Some(json) => MonitorConfig::from_json(json).map_err(to_py_err)?,
            None => MonitorConfig::default(),
        };
        let inner = SpillMonitor::caspian(config).map_err(to_py_err)?;
        Ok(PySpillMonitor { inner })
    }

    /// Process a dual-polarization scene; returns the new spill ids
    #[pyo3(signature = (scene_id, vv, vh, geo_transform, epsg=4326))]
    fn process_dual_pol(
        &self,
        py: Python,
        scene_id: &str,
        vv: PyReadonlyArray2<f32>,
        vh: PyReadonlyArray2<f32>,
        geo_transform: [f64; 6],
        epsg: u32,
    ) -> PyResult<Vec<String>> {
        let crs = if epsg == 4326 {
            CoordinateSystem::Geographic
        } else {
            CoordinateSystem::Projected { epsg }
        };
        let image = ImageIngest::from_dual_pol(
            &vv.as_array().to_owned(),
            &vh.as_array().to_owned(),
            GeoTransform::from_gdal(geo_transform),
            crs,
            SceneInfo::new(scene_id),
        )
        .map_err(to_py_err)?;

        let report = py
            .allow_threads(|| self.inner.process_scene(&image))
            .map_err(to_py_err)?;
        Ok(report.spill_ids)
    }

    /// Process a single band prototype image from disk
    fn process_png(&self, py: Python, scene_id: &str, path: &str) -> PyResult<Vec<String>> {
        let image = ImageIngest::load_png(path, SceneInfo::new(scene_id)).map_err(to_py_err)?;
        let report = py
            .allow_threads(|| self.inner.process_scene(&image))
            .map_err(to_py_err)?;
        Ok(report.spill_ids)
    }

    fn list_spills(&self) -> PyResult<String> {
        to_json(&self.inner.list_spills())
    }

    fn spills_geojson(&self) -> PyResult<String> {
        to_json(&self.inner.spills_geojson())
    }

    fn export_geojson(&self, path: &str) -> PyResult<()> {
        self.inner.export_geojson(path).map_err(to_py_err)
    }

    fn cleanup_state(&self, spill_id: &str) -> PyResult<String> {
        to_json(&self.inner.cleanup_state(spill_id).map_err(to_py_err)?)
    }

    fn cleanup_overview(&self) -> PyResult<String> {
        to_json(&self.inner.cleanup_overview())
    }

    fn risk_assessment(&self, spill_id: &str) -> PyResult<String> {
        to_json(&self.inner.risk_assessment(spill_id).map_err(to_py_err)?)
    }

    fn start_cleaning(&self, spill_id: &str) -> PyResult<String> {
        let state = self.inner.start_cleaning(spill_id).map_err(to_py_err)?;
        Ok(state.status.to_string())
    }

    fn mark_done(&self, spill_id: &str) -> PyResult<String> {
        let state = self.inner.mark_done(spill_id).map_err(to_py_err)?;
        Ok(state.status.to_string())
    }

    fn reset(&self, spill_id: &str) -> PyResult<String> {
        let state = self.inner.reset(spill_id).map_err(to_py_err)?;
        Ok(state.status.to_string())
    }

    fn set_oil_type(&self, spill_id: &str, oil_type: &str) -> PyResult<()> {
        let oil_type = match oil_type.to_lowercase().as_str() {
            "crude" => OilType::Crude,
            "refined" => OilType::Refined,
            "unknown" => OilType::Unknown,
            _ => {
                return Err(PyValueError::new_err(format!(
                    "Invalid oil type: {}",
                    oil_type
                )))
            }
        };
        self.inner.set_oil_type(spill_id, oil_type).map_err(to_py_err)
    }

    fn assistant_context(&self, spill_id: &str) -> PyResult<String> {
        to_json(&self.inner.assistant_context(spill_id).map_err(to_py_err)?)
    }

    fn assistant_prompt(&self, spill_id: &str, question: &str) -> PyResult<String> {
        let context = self.inner.assistant_context(spill_id).map_err(to_py_err)?;
        Ok(context.render_prompt(question))
    }

    fn ask(&self, spill_id: &str, question: &str) -> PyResult<String> {
        self.inner.ask_assistant(spill_id, question).map_err(to_py_err)
    }

    fn history_summary(&self, zone_id: &str) -> String {
        self.inner.zones().history_summary(zone_id).describe()
    }

    #[pyo3(signature = (lon, lat, max_distance=0.2))]
    fn nearest_zone(&self, lon: f64, lat: f64, max_distance: f64) -> Option<String> {
        self.inner
            .zones()
            .nearest_zone(GeoPoint::new(lon, lat), max_distance)
            .map(|z| z.id.clone())
    }

    fn __repr__(&self) -> String {
        format!(
            "SpillMonitor(variant='{}', spills={})",
            self.inner.config().model_variant,
            self.inner.list_spills().len()
        )
    }
}

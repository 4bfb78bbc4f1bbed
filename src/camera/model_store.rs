//! Persistent camera model: named magnifications plus a shared optical center.
//!
//! The calibration routines never touch this store. Callers feed it the
//! [`IntrinsicMatrix`] and [`OpticalCenter`] they obtained and persist the
//! result as YAML or JSON:
//!
//! ```yaml
//! optical_center: { x: 512.3, y: 380.9 }
//! magnifications:
//!   - name: x10
//!     pixel_size: { width: 0.00052, height: 0.00052 }
//! ```

use crate::camera::{CalibrationError, IntrinsicMatrix, OpticalCenter};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;

/// Physical extent of one pixel in world units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelSize {
    pub width: f64,
    pub height: f64,
}

/// A named calibration profile for one zoom level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Magnification {
    pub name: String,
    pub pixel_size: PixelSize,
}

impl Magnification {
    /// Derives the pixel size from the magnifications of `intrinsic`.
    pub fn from_intrinsic(name: impl Into<String>, intrinsic: &IntrinsicMatrix) -> Self {
        let (width, height) = intrinsic.pixel_size();
        Self {
            name: name.into(),
            pixel_size: PixelSize { width, height },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CameraModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    optical_center: Option<OpticalCenter>,
    #[serde(default)]
    magnifications: Vec<Magnification>,
}

impl CameraModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes every magnification. The optical center is kept.
    pub fn clear(&mut self) {
        self.magnifications.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.magnifications.is_empty()
    }

    pub fn add_magnification(&mut self, name: impl Into<String>, intrinsic: &IntrinsicMatrix) {
        let magnification = Magnification::from_intrinsic(name, intrinsic);
        info!(
            "Adding magnification '{}': pixel size {:.7} x {:.7}",
            magnification.name, magnification.pixel_size.width, magnification.pixel_size.height
        );
        self.magnifications.push(magnification);
    }

    pub fn set_optical_center(&mut self, center: OpticalCenter) {
        self.optical_center = Some(center);
    }

    pub fn optical_center(&self) -> Option<OpticalCenter> {
        self.optical_center
    }

    pub fn magnifications(&self) -> &[Magnification] {
        &self.magnifications
    }

    /// Saves the model to a YAML file.
    ///
    /// # Errors
    ///
    /// * [`CalibrationError::YamlError`] if serialization fails.
    /// * [`CalibrationError::IOError`] if the file cannot be created or written.
    pub fn save_to_yaml(&self, path: &str) -> Result<(), CalibrationError> {
        let yaml_string = serde_yaml::to_string(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;
        Ok(())
    }

    /// Replaces the magnifications with those stored at `path`. The optical
    /// center is only replaced when the file provides one.
    pub fn load_from_yaml(&mut self, path: &str) -> Result<(), CalibrationError> {
        let contents = fs::read_to_string(path)?;
        self.merge(serde_yaml::from_str(&contents)?);
        Ok(())
    }

    pub fn save_to_json(&self, path: &str) -> Result<(), CalibrationError> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = fs::File::create(path)?;
        file.write_all(json_string.as_bytes())?;
        Ok(())
    }

    /// JSON counterpart of [`CameraModel::load_from_yaml`].
    pub fn load_from_json(&mut self, path: &str) -> Result<(), CalibrationError> {
        let contents = fs::read_to_string(path)?;
        self.merge(serde_json::from_str(&contents)?);
        Ok(())
    }

    fn merge(&mut self, loaded: CameraModel) {
        self.magnifications = loaded.magnifications;
        if loaded.optical_center.is_some() {
            self.optical_center = loaded.optical_center;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Matrix3;

    fn sample_intrinsic(mx: f64, my: f64) -> IntrinsicMatrix {
        let p = Matrix3::new(mx, 0.0, 0.0, 0.0, my, 0.0, 0.0, 0.0, 1.0);
        IntrinsicMatrix::factorize(&p).unwrap()
    }

    fn temp_path(name: &str) -> String {
        std::env::temp_dir()
            .join(name)
            .to_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_add_magnification_derives_pixel_size() {
        let mut model = CameraModel::new();
        assert!(model.is_empty());
        model.add_magnification("x10", &sample_intrinsic(2.0, 4.0));

        let magnification = &model.magnifications()[0];
        assert_eq!(magnification.name, "x10");
        assert_relative_eq!(magnification.pixel_size.width, 0.5);
        assert_relative_eq!(magnification.pixel_size.height, 0.25);
    }

    #[test]
    fn test_clear_keeps_optical_center() {
        let mut model = CameraModel::new();
        model.add_magnification("x5", &sample_intrinsic(1.0, 1.0));
        model.set_optical_center(OpticalCenter::new(320.0, 240.0));
        model.clear();
        assert!(model.is_empty());
        assert_eq!(
            model.optical_center(),
            Some(OpticalCenter::new(320.0, 240.0))
        );
    }

    #[test]
    fn test_yaml_roundtrip() {
        let path = temp_path("camcalib_model_store_test.yaml");
        let mut model = CameraModel::new();
        model.add_magnification("x5", &sample_intrinsic(5.0, 5.5));
        model.add_magnification("x10", &sample_intrinsic(10.0, 11.0));
        model.set_optical_center(OpticalCenter::new(400.5, 300.25));
        model.save_to_yaml(&path).unwrap();

        let mut loaded = CameraModel::new();
        loaded.add_magnification("stale", &sample_intrinsic(1.0, 1.0));
        loaded.load_from_yaml(&path).unwrap();
        assert_eq!(loaded, model);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_json_layout() {
        let path = temp_path("camcalib_model_store_test.json");
        let mut model = CameraModel::new();
        model.add_magnification("x20", &sample_intrinsic(4.0, 8.0));
        model.save_to_json(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert!(value.get("optical_center").is_none());
        assert_eq!(value["magnifications"][0]["name"], "x20");
        assert_eq!(value["magnifications"][0]["pixel_size"]["width"], 0.25);
        assert_eq!(value["magnifications"][0]["pixel_size"]["height"], 0.125);

        let mut loaded = CameraModel::new();
        loaded.load_from_json(&path).unwrap();
        assert_eq!(loaded, model);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_keeps_center_missing_from_file() {
        let path = temp_path("camcalib_model_store_center_test.yaml");
        let mut stored = CameraModel::new();
        stored.add_magnification("x5", &sample_intrinsic(5.0, 5.0));
        stored.save_to_yaml(&path).unwrap();

        let center = OpticalCenter::new(12.5, 7.25);
        let mut model = CameraModel::new();
        model.set_optical_center(center);
        model.add_magnification("stale", &sample_intrinsic(1.0, 1.0));
        model.load_from_yaml(&path).unwrap();
        assert_eq!(model.optical_center(), Some(center));
        assert_eq!(model.magnifications(), stored.magnifications());

        stored.set_optical_center(OpticalCenter::new(1.0, 2.0));
        stored.save_to_yaml(&path).unwrap();
        model.load_from_yaml(&path).unwrap();
        assert_eq!(model.optical_center(), Some(OpticalCenter::new(1.0, 2.0)));
        let _ = fs::remove_file(&path);
    }
}

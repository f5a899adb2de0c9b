//! Persisted alignment and fit settings.
//!
//! Two JSON documents live alongside a session location stem:
//! `<location>-align-settings.json` and `<location>-fit-settings.json`.
//! Struct fields are declared in lexicographic order so the pretty writer
//! emits deterministically sorted keys. Older align files that predate the
//! `mirror` flag load with it defaulted to `false`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::align::AlignmentState;
use crate::error::{FitError, FitResult};
use crate::fit::FitSettings;

/// Serialized alignment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignSettings {
    /// Euler angles (roll, pitch, yaw) in radians.
    pub euler_angles: [f64; 3],
    /// Mirror flag; absent in older files.
    #[serde(default)]
    pub mirror: bool,
    /// Translation offset.
    pub offset: [f64; 3],
    /// Uniform scale.
    pub scale: f64,
}

impl AlignSettings {
    /// Capture the persisted view of an alignment state.
    pub fn capture(state: &AlignmentState) -> Self {
        let angles = state.euler_angles();
        let offset = state.offset();
        Self {
            euler_angles: [angles.x, angles.y, angles.z],
            mirror: state.mirror(),
            offset: [offset.x, offset.y, offset.z],
            scale: state.scale(),
        }
    }

    /// Apply the persisted settings onto an alignment state, validating the
    /// scale.
    pub fn apply(&self, state: &mut AlignmentState) -> FitResult<()> {
        state.set_scale(self.scale)?;
        state.set_euler_angles(nalgebra::Vector3::new(
            self.euler_angles[0],
            self.euler_angles[1],
            self.euler_angles[2],
        ));
        state.set_offset(nalgebra::Vector3::new(
            self.offset[0],
            self.offset[1],
            self.offset[2],
        ));
        state.set_mirror(self.mirror);
        Ok(())
    }
}

/// Serialized fit settings. Missing keys fall back to the defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct FitSettingsFile {
    #[serde(default)]
    curvature_penalty: f64,
    #[serde(default)]
    edge_discontinuity_penalty: f64,
    #[serde(default = "default_max_iterations")]
    max_iterations: u32,
    #[serde(default)]
    strain_penalty: f64,
}

fn default_max_iterations() -> u32 {
    1
}

impl From<&FitSettings> for FitSettingsFile {
    fn from(settings: &FitSettings) -> Self {
        Self {
            curvature_penalty: settings.curvature_penalty,
            edge_discontinuity_penalty: settings.edge_discontinuity_penalty,
            max_iterations: settings.max_iterations,
            strain_penalty: settings.strain_penalty,
        }
    }
}

impl From<FitSettingsFile> for FitSettings {
    fn from(file: FitSettingsFile) -> Self {
        Self {
            strain_penalty: file.strain_penalty,
            curvature_penalty: file.curvature_penalty,
            edge_discontinuity_penalty: file.edge_discontinuity_penalty,
            max_iterations: file.max_iterations,
        }
    }
}

/// Path of the align settings document for a location stem.
pub fn align_settings_path(location: &Path) -> PathBuf {
    suffixed(location, "-align-settings.json")
}

/// Path of the fit settings document for a location stem.
pub fn fit_settings_path(location: &Path) -> PathBuf {
    suffixed(location, "-fit-settings.json")
}

fn suffixed(location: &Path, suffix: &str) -> PathBuf {
    let mut name = location.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

/// Load alignment settings from `<location>-align-settings.json`.
pub fn load_align_settings(location: &Path) -> FitResult<AlignSettings> {
    let path = align_settings_path(location);
    let text = fs::read_to_string(&path).map_err(|e| FitError::io_read(&path, e))?;
    let settings: AlignSettings =
        serde_json::from_str(&text).map_err(|e| FitError::parse_failed(&path, e.to_string()))?;
    debug!(path = %path.display(), "align settings loaded");
    Ok(settings)
}

/// Save alignment settings to `<location>-align-settings.json` with sorted
/// keys.
pub fn save_align_settings(location: &Path, state: &AlignmentState) -> FitResult<()> {
    let path = align_settings_path(location);
    let settings = AlignSettings::capture(state);
    let text = serde_json::to_string_pretty(&settings)
        .map_err(|e| FitError::parse_failed(&path, e.to_string()))?;
    fs::write(&path, text).map_err(|e| FitError::io_write(&path, e))?;
    debug!(path = %path.display(), "align settings saved");
    Ok(())
}

/// Load fit settings from `<location>-fit-settings.json`.
pub fn load_fit_settings(location: &Path) -> FitResult<FitSettings> {
    let path = fit_settings_path(location);
    let text = fs::read_to_string(&path).map_err(|e| FitError::io_read(&path, e))?;
    let file: FitSettingsFile =
        serde_json::from_str(&text).map_err(|e| FitError::parse_failed(&path, e.to_string()))?;
    debug!(path = %path.display(), "fit settings loaded");
    Ok(file.into())
}

/// Save fit settings to `<location>-fit-settings.json` with sorted keys.
pub fn save_fit_settings(location: &Path, settings: &FitSettings) -> FitResult<()> {
    let path = fit_settings_path(location);
    let file = FitSettingsFile::from(settings);
    let text = serde_json::to_string_pretty(&file)
        .map_err(|e| FitError::parse_failed(&path, e.to_string()))?;
    fs::write(&path, text).map_err(|e| FitError::io_write(&path, e))?;
    debug!(path = %path.display(), "fit settings saved");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;

    #[test]
    fn test_align_settings_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("session");

        let mut state = AlignmentState::identity();
        state.set_euler_angles(Vector3::new(0.1, -0.2, 0.3));
        state.set_scale(1.75).unwrap();
        state.set_offset(Vector3::new(4.0, 5.0, -6.0));
        state.set_mirror(true);
        save_align_settings(&location, &state).unwrap();

        let loaded = load_align_settings(&location).unwrap();
        let mut restored = AlignmentState::identity();
        loaded.apply(&mut restored).unwrap();

        // Scale, offset, and mirror restore exactly; angles to JSON float
        // tolerance.
        assert_eq!(restored.scale(), 1.75);
        assert_eq!(restored.offset(), Vector3::new(4.0, 5.0, -6.0));
        assert!(restored.mirror());
        assert!((restored.euler_angles() - state.euler_angles()).norm() < 1e-12);
    }

    #[test]
    fn test_missing_mirror_defaults_to_false() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("legacy");
        let path = align_settings_path(&location);
        fs::write(
            &path,
            r#"{"euler_angles": [0.0, 0.0, 0.0], "offset": [1.0, 2.0, 3.0], "scale": 2.0}"#,
        )
        .unwrap();

        let loaded = load_align_settings(&location).unwrap();
        assert!(!loaded.mirror);
        assert_eq!(loaded.scale, 2.0);
    }

    #[test]
    fn test_saved_keys_are_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("session");
        save_align_settings(&location, &AlignmentState::identity()).unwrap();
        let text = fs::read_to_string(align_settings_path(&location)).unwrap();
        let euler = text.find("euler_angles").unwrap();
        let mirror = text.find("mirror").unwrap();
        let offset = text.find("offset").unwrap();
        let scale = text.find("scale").unwrap();
        assert!(euler < mirror && mirror < offset && offset < scale);

        save_fit_settings(&location, &FitSettings::default()).unwrap();
        let text = fs::read_to_string(fit_settings_path(&location)).unwrap();
        let curvature = text.find("curvature_penalty").unwrap();
        let edge = text.find("edge_discontinuity_penalty").unwrap();
        let iterations = text.find("max_iterations").unwrap();
        let strain = text.find("strain_penalty").unwrap();
        assert!(curvature < edge && edge < iterations && iterations < strain);
    }

    #[test]
    fn test_fit_settings_file_sets_exactly_four_fields() {
        let dir = tempfile::tempdir().unwrap();
        let location = dir.path().join("session");
        fs::write(
            fit_settings_path(&location),
            r#"{"strain_penalty": 0.5, "curvature_penalty": 0, "edge_discontinuity_penalty": 0, "max_iterations": 3}"#,
        )
        .unwrap();
        let loaded = load_fit_settings(&location).unwrap();
        assert_eq!(loaded.strain_penalty, 0.5);
        assert_eq!(loaded.curvature_penalty, 0.0);
        assert_eq!(loaded.edge_discontinuity_penalty, 0.0);
        assert_eq!(loaded.max_iterations, 3);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_align_settings(&dir.path().join("absent")).unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-1001");
    }

    #[test]
    fn test_invalid_scale_rejected_on_apply() {
        let settings = AlignSettings {
            euler_angles: [0.0; 3],
            mirror: false,
            offset: [0.0; 3],
            scale: 0.0,
        };
        let mut state = AlignmentState::identity();
        assert!(settings.apply(&mut state).is_err());
    }
}

//! CLI subcommand implementations.

pub mod align;
pub mod fit;
pub mod info;
pub mod project;

use std::path::Path;

use anyhow::Result;
use scanfit::{FittingSession, io, settings};

/// Load a model and point cloud and open a fitting session over them.
pub(crate) fn load_session(model: &Path, cloud: &Path) -> Result<FittingSession> {
    let mesh = io::read_model(model)?;
    let points = io::read_point_cloud_xyz(cloud)?;
    Ok(FittingSession::new(mesh, points)?)
}

/// Load align settings for the location when the settings file exists.
/// Returns whether settings were applied.
pub(crate) fn load_align_settings_if_present(
    session: &mut FittingSession,
    location: &Path,
) -> Result<bool> {
    if !settings::align_settings_path(location).exists() {
        return Ok(false);
    }
    session.load_align_settings(location)?;
    Ok(true)
}

/// Load fit settings for the location when the settings file exists.
/// Returns whether settings were applied.
pub(crate) fn load_fit_settings_if_present(
    session: &mut FittingSession,
    location: &Path,
) -> Result<bool> {
    if !settings::fit_settings_path(location).exists() {
        return Ok(false);
    }
    session.load_fit_settings(location)?;
    Ok(true)
}

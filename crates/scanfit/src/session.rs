//! The fitting session: single owner of the mesh, the data cloud, and all
//! fitting state.
//!
//! Every mutating operation is a method on [`FittingSession`]; there are no
//! process-wide singletons. Each successful logical operation bumps a
//! revision counter exactly once, which replaces implicit settings-changed
//! callbacks: a driving layer (UI, CLI) polls the revision and refreshes
//! when it moves.
//!
//! # Phases
//!
//! A session starts in the **align** phase: the rigid alignment is a live
//! function of [`AlignmentState`] and the stored model coordinates are
//! untouched; consumers read [`FittingSession::aligned_coordinates`].
//! [`FittingSession::set_phase_fit`] bakes the transform into the stored
//! coordinates exactly once (idempotent on re-entry), captures the
//! reference coordinates, and enables projection, filtering, and fitting.
//! Returning to the align phase discards projections, which are defined
//! relative to fit-phase geometry, and reactivates every data point.

use std::path::Path;

use nalgebra::{Point3, Vector3};
use tracing::info;

use crate::align::AlignmentState;
use crate::binding;
use crate::error::{FitError, FitResult};
use crate::filter::{self, FilterReport, FilterSettings};
use crate::fit::{self, FitReport, FitSettings};
use crate::projection::{self, ErrorStats, ProjectionReport};
use crate::settings;
use crate::types::{DataPointSet, FeMesh, MeshLocation, SurfaceSubregion};

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// The alignment is live; stored model coordinates are untouched.
    Align,
    /// The alignment has been baked; the geometry is subject to fitting.
    Fit,
}

/// A surface-fitting session owning its mesh and data cloud.
pub struct FittingSession {
    mesh: FeMesh,
    cloud: DataPointSet,
    coordinate_field: usize,
    data_field: usize,
    reference_field: usize,
    model_centre: Point3<f64>,
    alignment: AlignmentState,
    fit_settings: FitSettings,
    filter_settings: FilterSettings,
    subregion: Option<SurfaceSubregion>,
    projections: Option<Vec<Option<MeshLocation>>>,
    phase: SessionPhase,
    revision: u64,
}

impl FittingSession {
    /// Create a session, binding the coordinate fields of both domains and
    /// establishing the reference field.
    ///
    /// Fails with `EmptyMesh`/`EmptyPointCloud` when a domain is empty and
    /// `NoCoordinateFieldFound` when no coordinate field qualifies.
    pub fn new(mut mesh: FeMesh, cloud: DataPointSet) -> FitResult<Self> {
        let coordinate_field = binding::bind_mesh(&mesh, None)?;
        let data_field = binding::bind_data_points(&cloud)?;
        let reference_field = binding::snapshot_reference(&mut mesh, coordinate_field);
        let bounds = binding::mesh_range(&mesh, coordinate_field)?;
        let model_centre = Point3::from((bounds.0.coords + bounds.1.coords) * 0.5);
        info!(
            nodes = mesh.node_count,
            elements = mesh.element_count(),
            points = cloud.point_count,
            coordinate_field = %mesh.fields[coordinate_field].name,
            "fitting session created"
        );
        Ok(Self {
            mesh,
            cloud,
            coordinate_field,
            data_field,
            reference_field,
            model_centre,
            alignment: AlignmentState::identity(),
            fit_settings: FitSettings::default(),
            filter_settings: FilterSettings::default(),
            subregion: None,
            projections: None,
            phase: SessionPhase::Align,
            revision: 0,
        })
    }

    // ----- Accessors -----

    /// The mesh.
    pub fn mesh(&self) -> &FeMesh {
        &self.mesh
    }

    /// The data point cloud.
    pub fn cloud(&self) -> &DataPointSet {
        &self.cloud
    }

    /// Current phase.
    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Monotonic change counter; bumped once per successful operation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// The live alignment state.
    pub fn alignment(&self) -> &AlignmentState {
        &self.alignment
    }

    /// Current fit settings.
    pub fn fit_settings(&self) -> &FitSettings {
        &self.fit_settings
    }

    /// Current filter settings.
    pub fn filter_settings(&self) -> &FilterSettings {
        &self.filter_settings
    }

    /// Index of the mesh coordinate field.
    pub fn coordinate_field(&self) -> usize {
        self.coordinate_field
    }

    /// Name of the mesh coordinate field.
    pub fn coordinate_field_name(&self) -> &str {
        &self.mesh.fields[self.coordinate_field].name
    }

    /// The active subregion, if any.
    pub fn subregion(&self) -> Option<&SurfaceSubregion> {
        self.subregion.as_ref()
    }

    /// Stored projections, when calculated.
    pub fn projections(&self) -> Option<&[Option<MeshLocation>]> {
        self.projections.as_deref()
    }

    /// Projection-error statistics over the active set, or `None` when
    /// projections do not exist or no active point carries one.
    pub fn error_stats(&self) -> Option<ErrorStats> {
        let projections = self.projections.as_deref()?;
        projection::error_stats(
            &self.mesh,
            self.coordinate_field,
            &self.cloud,
            self.data_field,
            projections,
        )
    }

    /// Bounding range of the model coordinates.
    pub fn model_range(&self) -> FitResult<(Point3<f64>, Point3<f64>)> {
        binding::mesh_range(&self.mesh, self.coordinate_field)
    }

    /// Bounding range of the data coordinates.
    pub fn data_range(&self) -> FitResult<(Point3<f64>, Point3<f64>)> {
        binding::data_range(&self.cloud, self.data_field)
    }

    /// Default glyph size for data point rendering.
    pub fn auto_point_size(&self) -> FitResult<f64> {
        Ok(binding::auto_point_size(self.data_range()?))
    }

    /// Model coordinates as consumers should see them: transformed by the
    /// live alignment in the align phase, the stored values afterwards.
    pub fn aligned_coordinates(&self) -> Vec<Point3<f64>> {
        let values = &self.mesh.fields[self.coordinate_field].values;
        match self.phase {
            SessionPhase::Align => values.iter().map(|p| self.alignment.apply(p)).collect(),
            SessionPhase::Fit => values.clone(),
        }
    }

    #[inline]
    fn bump(&mut self) {
        self.revision += 1;
    }

    // ----- Alignment operations -----

    /// Set the alignment rotation from Euler angles.
    pub fn set_align_euler_angles(&mut self, angles: Vector3<f64>) {
        self.alignment.set_euler_angles(angles);
        self.bump();
    }

    /// Set the alignment scale. Must be positive.
    pub fn set_align_scale(&mut self, scale: f64) -> FitResult<()> {
        self.alignment.set_scale(scale)?;
        self.bump();
        Ok(())
    }

    /// Set the alignment offset.
    pub fn set_align_offset(&mut self, offset: Vector3<f64>) {
        self.alignment.set_offset(offset);
        self.bump();
    }

    /// Set the mirror flag.
    pub fn set_align_mirror(&mut self, mirror: bool) {
        self.alignment.set_mirror(mirror);
        self.bump();
    }

    /// Reset the alignment to identity.
    pub fn reset_alignment(&mut self) {
        self.alignment.reset();
        self.bump();
    }

    /// Compose an incremental rotation onto the alignment.
    pub fn rotate_by(&mut self, axis: Vector3<f64>, angle: f64) -> FitResult<()> {
        self.alignment.rotate_by(axis, angle)?;
        self.bump();
        Ok(())
    }

    /// Accumulate a relative alignment offset.
    pub fn offset_by(&mut self, delta: Vector3<f64>) {
        self.alignment.offset_by(delta);
        self.bump();
    }

    /// Multiply the alignment scale by a factor.
    pub fn scale_by(&mut self, factor: f64) -> FitResult<()> {
        self.alignment.scale_by(factor)?;
        self.bump();
        Ok(())
    }

    /// Centre the model on the data cloud by overwriting the offset.
    pub fn auto_centre_on_data(&mut self) -> FitResult<()> {
        let data_bounds = self.data_range()?;
        // The model centre is fixed at bind time, from the untransformed
        // model coordinates.
        let model_bounds = (self.model_centre, self.model_centre);
        self.alignment.auto_centre_on_data(data_bounds, model_bounds);
        self.bump();
        Ok(())
    }

    // ----- Phase transitions -----

    /// Bake the alignment into the stored model coordinates and capture the
    /// reference coordinates, entering the fit phase.
    ///
    /// Idempotent: re-entering the fit phase has no effect.
    pub fn set_phase_fit(&mut self) {
        if self.phase == SessionPhase::Fit {
            return;
        }
        let rotation_scale = self.alignment.rotation_scale();
        let offset = self.alignment.offset();
        let values = &mut self.mesh.fields[self.coordinate_field].values;
        for p in values.iter_mut() {
            *p = Point3::from(rotation_scale * p.coords + offset);
        }
        let baked = values.clone();
        self.mesh.fields[self.reference_field].values = baked;
        self.phase = SessionPhase::Fit;
        info!("alignment baked, session entered fit phase");
        self.bump();
    }

    /// Return to the align phase, discarding projections (they are defined
    /// relative to fit-phase geometry) and reactivating every data point.
    pub fn set_phase_align(&mut self) {
        self.discard_projections();
        self.phase = SessionPhase::Align;
        self.bump();
    }

    // ----- Projection -----

    /// Project every active data point onto the target domain.
    ///
    /// Requires the fit phase: projections are defined against baked
    /// geometry.
    pub fn calculate_projections(&mut self) -> FitResult<ProjectionReport> {
        if self.phase != SessionPhase::Fit {
            return Err(FitError::invalid_input(
                "calculate_projections",
                "session is in the align phase; bake the alignment first",
            ));
        }
        let mut projections = self.projections.take().unwrap_or_default();
        let report = projection::calculate(
            &self.mesh,
            self.coordinate_field,
            &self.cloud,
            self.data_field,
            self.subregion.as_ref(),
            &mut projections,
        )?;
        self.projections = Some(projections);
        self.bump();
        Ok(report)
    }

    /// Discard all stored projections and reactivate the full point set.
    /// Subsequent filter and fit calls fail until projections are
    /// recalculated.
    pub fn clear_projections(&mut self) {
        self.discard_projections();
        self.bump();
    }

    fn discard_projections(&mut self) {
        self.projections = None;
        self.cloud.activate_all();
    }

    // ----- Subregion -----

    /// Restrict projection and fitting to a subregion, or clear the
    /// restriction. Stored projections are discarded since the target
    /// domain changed.
    pub fn set_subregion(&mut self, subregion: Option<SurfaceSubregion>) {
        self.subregion = subregion;
        self.discard_projections();
        self.bump();
    }

    // ----- Filters -----

    /// Set the default top-error proportion, in `[0, 1]`.
    pub fn set_filter_top_error_proportion(&mut self, value: f64) -> FitResult<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(FitError::invalid_input(
                "top_error_proportion",
                format!("must be in [0, 1], got {}", value),
            ));
        }
        self.filter_settings.top_error_proportion = value;
        self.bump();
        Ok(())
    }

    /// Set the default non-normal projection limit, in `[0, 1]`.
    pub fn set_filter_non_normal_projection_limit(&mut self, value: f64) -> FitResult<()> {
        if !(0.0..=1.0).contains(&value) {
            return Err(FitError::invalid_input(
                "non_normal_projection_limit",
                format!("must be in [0, 1], got {}", value),
            ));
        }
        self.filter_settings.non_normal_projection_limit = value;
        self.bump();
        Ok(())
    }

    /// Deactivate active points whose error exceeds `proportion` times the
    /// current maximum error.
    pub fn filter_top_error(&mut self, proportion: f64) -> FitResult<FilterReport> {
        let report = filter::filter_top_error(
            &self.mesh,
            self.coordinate_field,
            &mut self.cloud,
            self.data_field,
            self.projections.as_deref(),
            proportion,
        )?;
        self.bump();
        Ok(report)
    }

    /// Deactivate active points whose error vector is implausibly
    /// tangential to the surface.
    pub fn filter_non_normal(&mut self, limit: f64) -> FitResult<FilterReport> {
        let report = filter::filter_non_normal(
            &self.mesh,
            self.coordinate_field,
            &mut self.cloud,
            self.data_field,
            self.projections.as_deref(),
            limit,
        )?;
        self.bump();
        Ok(report)
    }

    // ----- Fit settings -----

    /// Set the strain penalty weight, `>= 0`.
    pub fn set_fit_strain_penalty(&mut self, value: f64) -> FitResult<()> {
        self.update_fit_settings(|s| s.strain_penalty = value)
    }

    /// Set the curvature penalty weight, `>= 0`.
    pub fn set_fit_curvature_penalty(&mut self, value: f64) -> FitResult<()> {
        self.update_fit_settings(|s| s.curvature_penalty = value)
    }

    /// Set the edge-discontinuity penalty weight, `>= 0`.
    pub fn set_fit_edge_discontinuity_penalty(&mut self, value: f64) -> FitResult<()> {
        self.update_fit_settings(|s| s.edge_discontinuity_penalty = value)
    }

    /// Set the solver iteration bound, `>= 1`.
    pub fn set_fit_max_iterations(&mut self, value: u32) -> FitResult<()> {
        self.update_fit_settings(|s| s.max_iterations = value)
    }

    /// Apply a change to a copy of the fit settings; commit only when the
    /// result validates, so a rejected change leaves no partial state.
    fn update_fit_settings(&mut self, change: impl FnOnce(&mut FitSettings)) -> FitResult<()> {
        let mut updated = self.fit_settings.clone();
        change(&mut updated);
        updated.validate()?;
        self.fit_settings = updated;
        self.bump();
        Ok(())
    }

    // ----- Fit -----

    /// Run the penalized least-squares fit over the mesh node coordinates.
    pub fn fit(&mut self) -> FitResult<FitReport> {
        let report = fit::fit(
            &mut self.mesh,
            self.coordinate_field,
            self.reference_field,
            &self.cloud,
            self.data_field,
            self.subregion.as_ref(),
            self.projections.as_deref(),
            &self.fit_settings,
        )?;
        self.bump();
        Ok(report)
    }

    // ----- Persistence -----

    /// Load alignment settings from `<location>-align-settings.json`.
    pub fn load_align_settings(&mut self, location: &Path) -> FitResult<()> {
        let loaded = settings::load_align_settings(location)?;
        loaded.apply(&mut self.alignment)?;
        self.bump();
        Ok(())
    }

    /// Save alignment settings to `<location>-align-settings.json`.
    pub fn save_align_settings(&self, location: &Path) -> FitResult<()> {
        settings::save_align_settings(location, &self.alignment)
    }

    /// Load fit settings from `<location>-fit-settings.json`. Filter
    /// settings are untouched.
    pub fn load_fit_settings(&mut self, location: &Path) -> FitResult<()> {
        let loaded = settings::load_fit_settings(location)?;
        loaded.validate()?;
        self.fit_settings = loaded;
        self.bump();
        Ok(())
    }

    /// Save fit settings to `<location>-fit-settings.json`.
    pub fn save_fit_settings(&self, location: &Path) -> FitResult<()> {
        settings::save_fit_settings(location, &self.fit_settings)
    }

    /// Write the fitted model to `<location>-output-model.exfile`.
    pub fn write_output_model(&self, location: &Path) -> FitResult<()> {
        crate::io::write_output_model(
            &crate::io::output_model_path(location),
            &self.mesh,
            self.coordinate_field,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Element, ElementShape, NodeField};
    use nalgebra::Point3;

    fn session_with_square() -> FittingSession {
        let mut mesh = FeMesh::new();
        mesh.node_count = 4;
        mesh.add_field(NodeField::coordinates(
            "coordinates",
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
            ],
        ));
        mesh.elements
            .push(Element::new(ElementShape::Quad4, vec![0, 1, 2, 3]));
        let cloud = DataPointSet::from_points(vec![
            Point3::new(0.25, 0.25, 0.1),
            Point3::new(0.75, 0.75, 0.2),
        ]);
        FittingSession::new(mesh, cloud).unwrap()
    }

    #[test]
    fn test_session_starts_in_align_phase() {
        let session = session_with_square();
        assert_eq!(session.phase(), SessionPhase::Align);
        assert_eq!(session.revision(), 0);
        assert!(session.projections().is_none());
    }

    #[test]
    fn test_aligned_coordinates_are_live_in_align_phase() {
        let mut session = session_with_square();
        session.set_align_offset(Vector3::new(0.0, 0.0, 5.0));
        let aligned = session.aligned_coordinates();
        assert!((aligned[0].z - 5.0).abs() < 1e-12);
        // Stored coordinates untouched until the bake.
        assert_eq!(
            session.mesh().fields[session.coordinate_field()].values[0].z,
            0.0
        );
    }

    #[test]
    fn test_phase_fit_bake_is_idempotent() {
        let mut session = session_with_square();
        session.set_align_offset(Vector3::new(1.0, 0.0, 0.0));
        session.set_phase_fit();
        let baked = session.mesh().fields[session.coordinate_field()].values.clone();
        session.set_phase_fit();
        assert_eq!(
            session.mesh().fields[session.coordinate_field()].values,
            baked
        );
        assert_eq!(session.phase(), SessionPhase::Fit);
    }

    #[test]
    fn test_reference_captured_at_bake() {
        let mut session = session_with_square();
        session.set_align_offset(Vector3::new(0.0, 2.0, 0.0));
        session.set_phase_fit();
        let reference_index = session.mesh.field_index("reference_coordinates").unwrap();
        assert_eq!(
            session.mesh.fields[reference_index].values,
            session.mesh.fields[session.coordinate_field()].values
        );
    }

    #[test]
    fn test_projection_requires_fit_phase() {
        let mut session = session_with_square();
        let err = session.calculate_projections().unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-2004");
    }

    #[test]
    fn test_phase_align_discards_projections_and_reactivates() {
        let mut session = session_with_square();
        session.set_phase_fit();
        session.calculate_projections().unwrap();
        session.filter_top_error(0.0).unwrap();
        assert_eq!(session.cloud().active_count(), 0);

        session.set_phase_align();
        assert!(session.projections().is_none());
        assert_eq!(session.cloud().active_count(), 2);
        let err = session.fit().unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-3001");
    }

    #[test]
    fn test_revision_bumps_once_per_operation() {
        let mut session = session_with_square();
        let r0 = session.revision();
        session.set_align_mirror(true);
        assert_eq!(session.revision(), r0 + 1);
        session.set_phase_fit();
        assert_eq!(session.revision(), r0 + 2);
        session.calculate_projections().unwrap();
        assert_eq!(session.revision(), r0 + 3);
    }

    #[test]
    fn test_rejected_setting_leaves_state_and_revision() {
        let mut session = session_with_square();
        let r0 = session.revision();
        assert!(session.set_fit_max_iterations(0).is_err());
        assert!(session.set_fit_strain_penalty(-2.0).is_err());
        assert_eq!(session.revision(), r0);
        assert_eq!(session.fit_settings().max_iterations, 1);
        assert_eq!(session.fit_settings().strain_penalty, 0.0);
    }

    #[test]
    fn test_auto_centre_on_data() {
        let mut session = session_with_square();
        session.auto_centre_on_data().unwrap();
        // Model centre (0.5, 0.5, 0) -> data centre (0.5, 0.5, 0.15).
        let offset = session.alignment().offset();
        assert!(offset.x.abs() < 1e-12);
        assert!((offset.z - 0.15).abs() < 1e-12);
    }

    #[test]
    fn test_full_pipeline_reduces_error() {
        let mut session = session_with_square();
        session.set_phase_fit();
        session.calculate_projections().unwrap();
        let before = session.error_stats().unwrap();
        session.set_fit_max_iterations(5).unwrap();
        let report = session.fit().unwrap();
        let after = report.stats.unwrap();
        assert!(after.mean < before.mean);
    }

    #[test]
    fn test_set_subregion_clears_projections() {
        let mut session = session_with_square();
        session.set_phase_fit();
        session.calculate_projections().unwrap();
        session.set_subregion(Some(SurfaceSubregion::new("patch", [0u32])));
        assert!(session.projections().is_none());
    }
}

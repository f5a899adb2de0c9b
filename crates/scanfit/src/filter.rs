//! Outlier filtering of the active data point set.
//!
//! Both filters require projections to exist and only ever deactivate
//! points: deactivation is monotonic within a session until projections are
//! cleared, which reactivates the full set.

use tracing::{debug, info};

use crate::element;
use crate::error::{FitError, FitResult};
use crate::projection;
use crate::types::{DataPointSet, FeMesh, MeshLocation};

/// Outlier filter thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterSettings {
    /// Points with error above this proportion of the current maximum are
    /// deactivated by the top-error filter. In `[0, 1]`.
    pub top_error_proportion: f64,
    /// Points whose normalized error vector has an absolute dot product with
    /// the local surface normal below this limit are deactivated by the
    /// non-normal filter. In `[0, 1]`.
    pub non_normal_projection_limit: f64,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            top_error_proportion: 0.9,
            non_normal_projection_limit: 0.99,
        }
    }
}

/// Result of one filter pass.
#[derive(Debug, Clone, Copy)]
pub struct FilterReport {
    /// Points deactivated by this pass.
    pub deactivated: usize,
    /// Points still active afterwards.
    pub remaining_active: usize,
}

/// Relative floor below which the non-normal filter never deactivates a
/// point, as a fraction of the current maximum error.
const NON_NORMAL_ERROR_FLOOR: f64 = 0.001;

fn require_unit_range(field: &'static str, value: f64) -> FitResult<()> {
    if !(0.0..=1.0).contains(&value) || !value.is_finite() {
        return Err(FitError::invalid_input(
            field,
            format!("must be in [0, 1], got {}", value),
        ));
    }
    Ok(())
}

fn maximum_error(
    mesh: &FeMesh,
    coordinate_field: usize,
    cloud: &DataPointSet,
    data_field: usize,
    projections: &[Option<MeshLocation>],
) -> FitResult<f64> {
    let stats = projection::error_stats(mesh, coordinate_field, cloud, data_field, projections);
    let maximum = stats.map(|s| s.maximum).unwrap_or(0.0);
    if maximum <= 0.0 {
        return Err(FitError::DegenerateError { max_error: maximum });
    }
    Ok(maximum)
}

/// Deactivate every active point whose projection error exceeds
/// `proportion` times the current maximum error.
pub(crate) fn filter_top_error(
    mesh: &FeMesh,
    coordinate_field: usize,
    cloud: &mut DataPointSet,
    data_field: usize,
    projections: Option<&[Option<MeshLocation>]>,
    proportion: f64,
) -> FitResult<FilterReport> {
    let projections =
        projections.ok_or_else(|| FitError::projections_not_ready("filter_top_error"))?;
    require_unit_range("top_error_proportion", proportion)?;
    let maximum = maximum_error(mesh, coordinate_field, cloud, data_field, projections)?;

    let threshold = proportion * maximum;
    let data = &cloud.fields[data_field].values;
    let mut deactivated = 0usize;
    for index in 0..cloud.point_count {
        if !cloud.active[index] {
            continue;
        }
        let Some(location) = projections.get(index).copied().flatten() else {
            continue;
        };
        let error =
            projection::projection_delta(mesh, coordinate_field, &data[index], &location).norm();
        if error > threshold {
            cloud.active[index] = false;
            deactivated += 1;
        }
    }
    let remaining_active = cloud.active_count();
    info!(
        deactivated,
        remaining_active, threshold, "top-error filter applied"
    );
    Ok(FilterReport {
        deactivated,
        remaining_active,
    })
}

/// Deactivate active points whose error vector is implausibly tangential:
/// the absolute dot product of the normalized error with the local surface
/// normal falls below `limit`, and the error itself is not negligible
/// (above 0.1% of the current maximum).
pub(crate) fn filter_non_normal(
    mesh: &FeMesh,
    coordinate_field: usize,
    cloud: &mut DataPointSet,
    data_field: usize,
    projections: Option<&[Option<MeshLocation>]>,
    limit: f64,
) -> FitResult<FilterReport> {
    let projections =
        projections.ok_or_else(|| FitError::projections_not_ready("filter_non_normal"))?;
    require_unit_range("non_normal_projection_limit", limit)?;
    let maximum = maximum_error(mesh, coordinate_field, cloud, data_field, projections)?;
    let floor = NON_NORMAL_ERROR_FLOOR * maximum;

    let data = &cloud.fields[data_field].values;
    let mut deactivated = 0usize;
    for index in 0..cloud.point_count {
        if !cloud.active[index] {
            continue;
        }
        let Some(location) = projections.get(index).copied().flatten() else {
            continue;
        };
        if mesh.elements[location.element as usize].dimension() != 2 {
            return Err(FitError::invalid_input(
                "filter_non_normal",
                "surface normals require a 2-D projection target",
            ));
        }
        let delta =
            projection::projection_delta(mesh, coordinate_field, &data[index], &location);
        let error = delta.norm();
        if error <= floor {
            continue;
        }
        let d1 = element::derivative(mesh, coordinate_field, location.element, &location.xi, 0);
        let d2 = element::derivative(mesh, coordinate_field, location.element, &location.xi, 1);
        let normal = d1.cross(&d2);
        let normal_norm = normal.norm();
        if normal_norm <= 0.0 {
            debug!(point = index, "degenerate surface normal, point kept");
            continue;
        }
        let alignment = (delta / error).dot(&(normal / normal_norm)).abs();
        if alignment < limit {
            cloud.active[index] = false;
            deactivated += 1;
        }
    }
    let remaining_active = cloud.active_count();
    info!(
        deactivated,
        remaining_active, limit, "non-normal filter applied"
    );
    Ok(FilterReport {
        deactivated,
        remaining_active,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Element, ElementShape, NodeField};
    use nalgebra::Point3;

    fn flat_unit_square() -> FeMesh {
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
        mesh
    }

    fn projected(
        mesh: &FeMesh,
        cloud: &DataPointSet,
    ) -> Vec<Option<MeshLocation>> {
        let mut projections = Vec::new();
        projection::calculate(mesh, 0, cloud, 0, None, &mut projections).unwrap();
        projections
    }

    #[test]
    fn test_filter_requires_projections() {
        let mesh = flat_unit_square();
        let mut cloud = DataPointSet::from_points(vec![Point3::new(0.5, 0.5, 0.1)]);
        let err = filter_top_error(&mesh, 0, &mut cloud, 0, None, 0.5).unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-3001");
        let err = filter_non_normal(&mesh, 0, &mut cloud, 0, None, 0.5).unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-3001");
    }

    #[test]
    fn test_filter_top_error_thresholds() {
        let mesh = flat_unit_square();
        let mut cloud = DataPointSet::from_points(vec![
            Point3::new(0.25, 0.25, 0.1),
            Point3::new(0.5, 0.5, 0.2),
            Point3::new(0.75, 0.75, 0.4),
        ]);
        let projections = projected(&mesh, &cloud);

        // Proportion 1.0: the threshold equals the maximum, nothing goes.
        let report =
            filter_top_error(&mesh, 0, &mut cloud, 0, Some(&projections), 1.0).unwrap();
        assert_eq!(report.deactivated, 0);
        assert_eq!(cloud.active_count(), 3);

        // Proportion 0.0: every point with error > 0 goes.
        let report =
            filter_top_error(&mesh, 0, &mut cloud, 0, Some(&projections), 0.0).unwrap();
        assert_eq!(report.deactivated, 3);
        assert_eq!(cloud.active_count(), 0);
    }

    #[test]
    fn test_filter_top_error_partial() {
        let mesh = flat_unit_square();
        let mut cloud = DataPointSet::from_points(vec![
            Point3::new(0.25, 0.25, 0.1),
            Point3::new(0.75, 0.75, 0.4),
        ]);
        let projections = projected(&mesh, &cloud);
        let report =
            filter_top_error(&mesh, 0, &mut cloud, 0, Some(&projections), 0.5).unwrap();
        assert_eq!(report.deactivated, 1);
        assert!(cloud.active[0]);
        assert!(!cloud.active[1]);
    }

    #[test]
    fn test_filter_degenerate_when_error_zero() {
        let mesh = flat_unit_square();
        let mut cloud = DataPointSet::from_points(vec![Point3::new(0.5, 0.5, 0.0)]);
        let projections = projected(&mesh, &cloud);
        let err =
            filter_top_error(&mesh, 0, &mut cloud, 0, Some(&projections), 0.5).unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-3002");
    }

    #[test]
    fn test_filter_non_normal_keeps_normal_mismatches() {
        let mesh = flat_unit_square();
        // One point straight above the surface (normal-direction error), one
        // past the edge so its error vector is almost tangential.
        let mut cloud = DataPointSet::from_points(vec![
            Point3::new(0.5, 0.5, 0.3),
            Point3::new(1.4, 0.5, 0.01),
        ]);
        let projections = projected(&mesh, &cloud);
        let report =
            filter_non_normal(&mesh, 0, &mut cloud, 0, Some(&projections), 0.9).unwrap();
        assert_eq!(report.deactivated, 1);
        assert!(cloud.active[0]);
        assert!(!cloud.active[1]);
    }

    #[test]
    fn test_filter_non_normal_spares_tiny_errors() {
        let mesh = flat_unit_square();
        // The tangential point's error is below 0.1% of the maximum, so the
        // compound rule keeps it.
        let mut cloud = DataPointSet::from_points(vec![
            Point3::new(0.5, 0.5, 0.5),
            Point3::new(1.0001, 0.5, 0.0),
        ]);
        let projections = projected(&mesh, &cloud);
        let report =
            filter_non_normal(&mesh, 0, &mut cloud, 0, Some(&projections), 0.99).unwrap();
        assert_eq!(report.deactivated, 0);
        assert_eq!(cloud.active_count(), 2);
    }

    #[test]
    fn test_filter_rejects_out_of_range_settings() {
        let mesh = flat_unit_square();
        let mut cloud = DataPointSet::from_points(vec![Point3::new(0.5, 0.5, 0.1)]);
        let projections = projected(&mesh, &cloud);
        let err =
            filter_top_error(&mesh, 0, &mut cloud, 0, Some(&projections), 1.5).unwrap_err();
        assert_eq!(err.code().as_str(), "FIT-2004");
        // State untouched by the rejected call.
        assert_eq!(cloud.active_count(), 1);
    }
}

//! Nearest-point projection of data points onto the mesh.
//!
//! For every active data point the engine finds the closest element-local
//! location on the target domain (the whole mesh's highest-dimension
//! elements, or the designated subregion) and stores it. Error vectors and
//! statistics are derived from the stored locations against the current
//! coordinate field, so they stay valid as the fit moves the mesh.
//!
//! The search is brute force over target elements with a seeded, clamped
//! Gauss-Newton descent in local coordinates per element. A spatial index
//! could prune candidates for large meshes.

use nalgebra::{Matrix3, Point3, Vector3};
use tracing::{debug, warn};

use crate::element;
use crate::error::{FitError, FitResult};
use crate::types::{DataPointSet, FeMesh, MeshLocation, SurfaceSubregion};

/// Summary statistics of projection error over the active set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorStats {
    /// Mean error magnitude.
    pub mean: f64,
    /// Maximum error magnitude.
    pub maximum: f64,
    /// Number of active points with a stored projection.
    pub count: usize,
}

/// Result of a projection pass.
#[derive(Debug, Clone)]
pub struct ProjectionReport {
    /// Active points that received a projection.
    pub projected: usize,
    /// Active points for which no valid location was found.
    pub skipped: usize,
    /// Error statistics, absent when the active set is empty.
    pub stats: Option<ErrorStats>,
}

/// Maximum Gauss-Newton iterations per element-local descent.
const DESCENT_ITERATIONS: usize = 30;

/// Convergence threshold on the local-coordinate step norm.
const DESCENT_TOLERANCE: f64 = 1e-12;

/// The element indices projection targets: the subregion's
/// highest-common-dimension elements when set, otherwise every element of
/// the mesh's highest dimension.
pub(crate) fn target_elements(mesh: &FeMesh, subregion: Option<&SurfaceSubregion>) -> Vec<u32> {
    match subregion {
        Some(subregion) => {
            let dimension = subregion
                .elements
                .iter()
                .filter_map(|&i| mesh.elements.get(i as usize))
                .map(|e| e.dimension())
                .max()
                .unwrap_or(0);
            let mut elements: Vec<u32> = subregion
                .elements
                .iter()
                .copied()
                .filter(|&i| {
                    mesh.elements
                        .get(i as usize)
                        .is_some_and(|e| e.dimension() == dimension)
                })
                .collect();
            elements.sort_unstable();
            elements
        }
        None => mesh.elements_of_dimension(mesh.dimension()),
    }
}

/// Find the nearest local coordinate on one element to a point.
///
/// Returns the clamped local coordinate and the squared distance, or `None`
/// when the element Jacobian is degenerate at every seed.
fn project_onto_element(
    mesh: &FeMesh,
    field: usize,
    element: u32,
    point: &Point3<f64>,
) -> Option<([f64; 3], f64)> {
    let dimension = mesh.elements[element as usize].dimension();
    let seeds_per_axis = [0.0, 0.5, 1.0];
    let mut best: Option<([f64; 3], f64)> = None;

    // Descend from every seed of a coarse grid; bilinear patches can have
    // more than one local minimum.
    let seed_count = seeds_per_axis.len().pow(dimension as u32);
    for seed_index in 0..seed_count {
        let mut xi = [0.0; 3];
        let mut remainder = seed_index;
        for axis in 0..dimension {
            xi[axis] = seeds_per_axis[remainder % seeds_per_axis.len()];
            remainder /= seeds_per_axis.len();
        }

        for _ in 0..DESCENT_ITERATIONS {
            let residual = element::evaluate(mesh, field, element, &xi) - point;
            // Normal equations of the d-dimensional Gauss-Newton step,
            // padded to 3x3 with identity rows for unused axes.
            let mut a = Matrix3::<f64>::identity();
            let mut b = Vector3::<f64>::zeros();
            let mut derivatives = [Vector3::zeros(); 3];
            for (axis, derivative) in derivatives.iter_mut().enumerate().take(dimension) {
                *derivative = element::derivative(mesh, field, element, &xi, axis);
            }
            for row in 0..dimension {
                for column in 0..dimension {
                    a[(row, column)] = derivatives[row].dot(&derivatives[column]);
                }
                b[row] = -derivatives[row].dot(&residual);
            }
            let Some(step) = a.lu().solve(&b) else {
                break;
            };
            let mut moved = 0.0f64;
            for axis in 0..dimension {
                let updated = (xi[axis] + step[axis]).clamp(0.0, 1.0);
                moved = moved.max((updated - xi[axis]).abs());
                xi[axis] = updated;
            }
            if moved < DESCENT_TOLERANCE {
                break;
            }
        }

        let distance_sq = (element::evaluate(mesh, field, element, &xi) - point).norm_squared();
        if distance_sq.is_finite() && best.is_none_or(|(_, best_sq)| distance_sq < best_sq) {
            best = Some((xi, distance_sq));
        }
    }
    best
}

/// Project every active data point onto the target domain, overwriting any
/// previously stored locations for those points.
pub(crate) fn calculate(
    mesh: &FeMesh,
    coordinate_field: usize,
    cloud: &DataPointSet,
    data_field: usize,
    subregion: Option<&SurfaceSubregion>,
    projections: &mut Vec<Option<MeshLocation>>,
) -> FitResult<ProjectionReport> {
    let targets = target_elements(mesh, subregion);
    if targets.is_empty() {
        return Err(FitError::empty_mesh(
            "no target elements available for projection",
        ));
    }
    projections.resize(cloud.point_count, None);

    let data = &cloud.fields[data_field].values;
    let mut projected = 0usize;
    let mut skipped = 0usize;
    for index in 0..cloud.point_count {
        if !cloud.active[index] {
            continue;
        }
        let point = data[index];
        let mut nearest: Option<(MeshLocation, f64)> = None;
        for &target in &targets {
            if let Some((xi, distance_sq)) = project_onto_element(mesh, coordinate_field, target, &point)
            {
                if nearest.is_none_or(|(_, best_sq)| distance_sq < best_sq) {
                    nearest = Some((
                        MeshLocation {
                            element: target,
                            xi,
                        },
                        distance_sq,
                    ));
                }
            }
        }
        match nearest {
            Some((location, _)) => {
                projections[index] = Some(location);
                projected += 1;
            }
            None => {
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        warn!(skipped, "some active points found no valid projection");
    }
    let stats = error_stats(mesh, coordinate_field, cloud, data_field, projections);
    debug!(
        projected,
        mean = stats.map(|s| s.mean),
        maximum = stats.map(|s| s.maximum),
        "projections calculated"
    );
    Ok(ProjectionReport {
        projected,
        skipped,
        stats,
    })
}

/// Error vector of one stored projection: projected coordinate minus data
/// coordinate.
pub(crate) fn projection_delta(
    mesh: &FeMesh,
    coordinate_field: usize,
    data_position: &Point3<f64>,
    location: &MeshLocation,
) -> Vector3<f64> {
    element::evaluate(mesh, coordinate_field, location.element, &location.xi) - data_position
}

/// Mean and maximum projection-error magnitude over active points with a
/// stored projection. `None` when no such points exist (reported as "no
/// data", never as NaN or zero).
pub(crate) fn error_stats(
    mesh: &FeMesh,
    coordinate_field: usize,
    cloud: &DataPointSet,
    data_field: usize,
    projections: &[Option<MeshLocation>],
) -> Option<ErrorStats> {
    let data = &cloud.fields[data_field].values;
    let mut total = 0.0;
    let mut maximum = 0.0f64;
    let mut count = 0usize;
    for index in 0..cloud.point_count {
        if !cloud.active[index] {
            continue;
        }
        let Some(location) = projections.get(index).copied().flatten() else {
            continue;
        };
        let error = projection_delta(mesh, coordinate_field, &data[index], &location).norm();
        total += error;
        maximum = maximum.max(error);
        count += 1;
    }
    (count > 0).then(|| ErrorStats {
        mean: total / count as f64,
        maximum,
        count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Element, ElementShape, NodeField};

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

    #[test]
    fn test_projection_of_point_above_surface() {
        let mesh = flat_unit_square();
        let cloud = DataPointSet::from_points(vec![Point3::new(0.25, 0.5, 0.3)]);
        let mut projections = Vec::new();
        let report = calculate(&mesh, 0, &cloud, 0, None, &mut projections).unwrap();
        assert_eq!(report.projected, 1);
        let location = projections[0].unwrap();
        assert!((location.xi[0] - 0.25).abs() < 1e-9);
        assert!((location.xi[1] - 0.5).abs() < 1e-9);
        let stats = report.stats.unwrap();
        assert!((stats.maximum - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_projection_clamps_outside_point_to_edge() {
        let mesh = flat_unit_square();
        let cloud = DataPointSet::from_points(vec![Point3::new(1.5, 0.5, 0.0)]);
        let mut projections = Vec::new();
        calculate(&mesh, 0, &cloud, 0, None, &mut projections).unwrap();
        let location = projections[0].unwrap();
        assert!((location.xi[0] - 1.0).abs() < 1e-9);
        assert!((location.xi[1] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_empty_active_set_has_no_stats() {
        let mesh = flat_unit_square();
        let mut cloud = DataPointSet::from_points(vec![Point3::new(0.5, 0.5, 0.1)]);
        cloud.active[0] = false;
        let mut projections = Vec::new();
        let report = calculate(&mesh, 0, &cloud, 0, None, &mut projections).unwrap();
        assert_eq!(report.projected, 0);
        assert!(report.stats.is_none());
    }

    #[test]
    fn test_inactive_points_are_not_projected() {
        let mesh = flat_unit_square();
        let mut cloud = DataPointSet::from_points(vec![
            Point3::new(0.5, 0.5, 0.1),
            Point3::new(0.25, 0.25, 0.2),
        ]);
        cloud.active[1] = false;
        let mut projections = Vec::new();
        let report = calculate(&mesh, 0, &cloud, 0, None, &mut projections).unwrap();
        assert_eq!(report.projected, 1);
        assert!(projections[0].is_some());
        assert!(projections[1].is_none());
    }

    #[test]
    fn test_subregion_restricts_targets() {
        // Two-quad strip; restrict projection to the left quad only.
        let mut mesh = FeMesh::new();
        mesh.node_count = 6;
        mesh.add_field(NodeField::coordinates(
            "coordinates",
            vec![
                Point3::new(0.0, 0.0, 0.0),
                Point3::new(1.0, 0.0, 0.0),
                Point3::new(2.0, 0.0, 0.0),
                Point3::new(0.0, 1.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(2.0, 1.0, 0.0),
            ],
        ));
        mesh.elements
            .push(Element::new(ElementShape::Quad4, vec![0, 1, 3, 4]));
        mesh.elements
            .push(Element::new(ElementShape::Quad4, vec![1, 2, 4, 5]));

        let subregion = SurfaceSubregion::new("left", [0u32]);
        let cloud = DataPointSet::from_points(vec![Point3::new(1.9, 0.5, 0.0)]);
        let mut projections = Vec::new();
        calculate(&mesh, 0, &cloud, 0, Some(&subregion), &mut projections).unwrap();
        let location = projections[0].unwrap();
        // Clamped to the shared edge of the left quad, not the nearer
        // right-quad interior.
        assert_eq!(location.element, 0);
        assert!((location.xi[0] - 1.0).abs() < 1e-9);
        let stats = error_stats(&mesh, 0, &cloud, 0, &projections).unwrap();
        assert!((stats.maximum - 0.9).abs() < 1e-9);
    }
}

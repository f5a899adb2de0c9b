//! Binding of a fitting session to its mesh and data cloud.
//!
//! Runtime field scanning is replaced by an explicit typed binding step: the
//! coordinate field for each domain is located and validated once, up front,
//! failing fast when a domain is empty or carries no coordinate field.

use nalgebra::Point3;

use crate::error::{FitError, FitResult};
use crate::types::{DataPointSet, FeMesh, NodeField};

/// Locate the mesh coordinate field: the first coordinate-typed field with
/// at most 3 components defined over the mesh nodes. The reference field,
/// when it already exists, is never selected.
pub fn bind_mesh(mesh: &FeMesh, reference_field: Option<usize>) -> FitResult<usize> {
    if mesh.is_empty() {
        return Err(FitError::empty_mesh("model contains no elements"));
    }
    mesh.fields
        .iter()
        .enumerate()
        .find(|(index, field)| {
            Some(*index) != reference_field
                && field.is_coordinate
                && field.components <= 3
                && field.values.len() == mesh.node_count
        })
        .map(|(index, _)| index)
        .ok_or_else(|| FitError::no_coordinate_field("mesh"))
}

/// Locate the data cloud coordinate field, with the same selection rule as
/// [`bind_mesh`].
pub fn bind_data_points(cloud: &DataPointSet) -> FitResult<usize> {
    if cloud.is_empty() {
        return Err(FitError::empty_point_cloud("no data points to fit to"));
    }
    cloud
        .fields
        .iter()
        .enumerate()
        .find(|(_, field)| {
            field.is_coordinate
                && field.components <= 3
                && field.values.len() == cloud.point_count
        })
        .map(|(index, _)| index)
        .ok_or_else(|| FitError::no_coordinate_field("data point cloud"))
}

/// Snapshot the mesh coordinate field into a new reference field and return
/// its index.
///
/// The reference field is named `reference_<name>`; when that name is taken,
/// numeric suffixes are probed (`reference_<name>1`, `reference_<name>2`, …)
/// until a free name is found.
pub fn snapshot_reference(mesh: &mut FeMesh, coordinate_field: usize) -> usize {
    let source = &mesh.fields[coordinate_field];
    let base = format!("reference_{}", source.name);
    let mut name = base.clone();
    let mut number = 0u32;
    while mesh.field_index(&name).is_some() {
        number += 1;
        name = format!("{}{}", base, number);
    }
    let snapshot = NodeField {
        name,
        components: source.components,
        is_coordinate: source.is_coordinate,
        values: source.values.clone(),
    };
    mesh.add_field(snapshot)
}

/// Axis-aligned bounding range of the mesh coordinate field.
pub fn mesh_range(mesh: &FeMesh, coordinate_field: usize) -> FitResult<(Point3<f64>, Point3<f64>)> {
    mesh.fields[coordinate_field]
        .bounds()
        .ok_or_else(|| FitError::empty_mesh("model has no nodes"))
}

/// Axis-aligned bounding range of the data coordinate field.
pub fn data_range(
    cloud: &DataPointSet,
    coordinate_field: usize,
) -> FitResult<(Point3<f64>, Point3<f64>)> {
    cloud.fields[coordinate_field]
        .bounds()
        .ok_or_else(|| FitError::empty_point_cloud("no data points"))
}

/// Default glyph size for rendering data points: 0.5% of the data range
/// diagonal.
pub fn auto_point_size(data_bounds: (Point3<f64>, Point3<f64>)) -> f64 {
    0.005 * (data_bounds.1 - data_bounds.0).norm()
}

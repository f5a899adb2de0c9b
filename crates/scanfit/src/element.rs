//! Element interpolation: shape functions, parametric derivatives, and
//! Gauss quadrature.
//!
//! All supported shapes are tensor products of linear 1-D basis functions
//! over `[0,1]^d`, so values and derivatives are computed generically from
//! the bit pattern of the local node index.

use nalgebra::{Matrix3, Point3, Vector3};

use crate::types::{ElementShape, FeMesh, LocalEdge};

/// Maximum nodes of any supported element shape.
pub const MAX_ELEMENT_NODES: usize = 8;

/// 3-point Gauss-Legendre abscissae on `[0,1]`.
pub const GAUSS3_POINTS: [f64; 3] = [
    0.112701665379258311, // (1 - sqrt(3/5)) / 2
    0.5,
    0.887298334620741689,
];

/// 3-point Gauss-Legendre weights on `[0,1]`.
pub const GAUSS3_WEIGHTS: [f64; 3] = [
    0.277777777777777778, // 5/18
    0.444444444444444444, // 8/18
    0.277777777777777778,
];

#[inline]
fn linear(t: f64, high: bool) -> f64 {
    if high { t } else { 1.0 - t }
}

#[inline]
fn linear_derivative(high: bool) -> f64 {
    if high { 1.0 } else { -1.0 }
}

/// Shape function values at ξ. Entries beyond the shape's node count are 0.
pub fn shape_values(shape: ElementShape, xi: &[f64; 3]) -> [f64; MAX_ELEMENT_NODES] {
    let dimension = shape.dimension();
    let mut out = [0.0; MAX_ELEMENT_NODES];
    for (local, value) in out.iter_mut().enumerate().take(shape.node_count()) {
        let mut product = 1.0;
        for axis in 0..dimension {
            product *= linear(xi[axis], local >> axis & 1 == 1);
        }
        *value = product;
    }
    out
}

/// First derivatives dN/dξ(axis) at ξ.
pub fn shape_derivatives(
    shape: ElementShape,
    xi: &[f64; 3],
    axis: usize,
) -> [f64; MAX_ELEMENT_NODES] {
    let dimension = shape.dimension();
    let mut out = [0.0; MAX_ELEMENT_NODES];
    if axis >= dimension {
        return out;
    }
    for (local, value) in out.iter_mut().enumerate().take(shape.node_count()) {
        let mut product = 1.0;
        for a in 0..dimension {
            let high = local >> a & 1 == 1;
            product *= if a == axis {
                linear_derivative(high)
            } else {
                linear(xi[a], high)
            };
        }
        *value = product;
    }
    out
}

/// Second derivatives d²N/dξ(axis_a)dξ(axis_b) at ξ.
///
/// Zero when the axes coincide (linear basis); only mixed terms survive.
pub fn shape_second_derivatives(
    shape: ElementShape,
    xi: &[f64; 3],
    axis_a: usize,
    axis_b: usize,
) -> [f64; MAX_ELEMENT_NODES] {
    let dimension = shape.dimension();
    let mut out = [0.0; MAX_ELEMENT_NODES];
    if axis_a == axis_b || axis_a >= dimension || axis_b >= dimension {
        return out;
    }
    for (local, value) in out.iter_mut().enumerate().take(shape.node_count()) {
        let mut product = 1.0;
        for a in 0..dimension {
            let high = local >> a & 1 == 1;
            product *= if a == axis_a || a == axis_b {
                linear_derivative(high)
            } else {
                linear(xi[a], high)
            };
        }
        *value = product;
    }
    out
}

/// Evaluate a node field at an element-local coordinate.
pub fn evaluate(mesh: &FeMesh, field: usize, element: u32, xi: &[f64; 3]) -> Point3<f64> {
    let element = &mesh.elements[element as usize];
    let weights = shape_values(element.shape, xi);
    let values = &mesh.fields[field].values;
    let mut out = Vector3::zeros();
    for (local, &node) in element.nodes.iter().enumerate() {
        out += values[node as usize].coords * weights[local];
    }
    Point3::from(out)
}

/// Evaluate the field derivative dx/dξ(axis) at an element-local coordinate.
pub fn derivative(
    mesh: &FeMesh,
    field: usize,
    element: u32,
    xi: &[f64; 3],
    axis: usize,
) -> Vector3<f64> {
    let element = &mesh.elements[element as usize];
    let weights = shape_derivatives(element.shape, xi, axis);
    let values = &mesh.fields[field].values;
    let mut out = Vector3::zeros();
    for (local, &node) in element.nodes.iter().enumerate() {
        out += values[node as usize].coords * weights[local];
    }
    out
}

/// Evaluate the field second derivative d²x/dξ(a)dξ(b).
pub fn second_derivative(
    mesh: &FeMesh,
    field: usize,
    element: u32,
    xi: &[f64; 3],
    axis_a: usize,
    axis_b: usize,
) -> Vector3<f64> {
    let element = &mesh.elements[element as usize];
    let weights = shape_second_derivatives(element.shape, xi, axis_a, axis_b);
    let values = &mesh.fields[field].values;
    let mut out = Vector3::zeros();
    for (local, &node) in element.nodes.iter().enumerate() {
        out += values[node as usize].coords * weights[local];
    }
    out
}

/// Differential measure of the element at ξ with respect to the given field:
/// arc length (1-D), area (2-D), or volume (3-D) element.
pub fn jacobian_measure(mesh: &FeMesh, field: usize, element: u32, xi: &[f64; 3]) -> f64 {
    let dimension = mesh.elements[element as usize].dimension();
    match dimension {
        1 => derivative(mesh, field, element, xi, 0).norm(),
        2 => {
            let d1 = derivative(mesh, field, element, xi, 0);
            let d2 = derivative(mesh, field, element, xi, 1);
            d1.cross(&d2).norm()
        }
        3 => {
            let d1 = derivative(mesh, field, element, xi, 0);
            let d2 = derivative(mesh, field, element, xi, 1);
            let d3 = derivative(mesh, field, element, xi, 2);
            Matrix3::from_columns(&[d1, d2, d3]).determinant().abs()
        }
        _ => 0.0,
    }
}

/// Element-local coordinate of a point on a local edge, at parameter `t`
/// along the edge.
#[inline]
pub fn edge_xi(edge: &LocalEdge, t: f64) -> [f64; 3] {
    let mut xi = [0.0; 3];
    xi[edge.along_axis] = t;
    xi[edge.fixed_axis] = edge.fixed_value;
    xi
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Element, NodeField};

    fn unit_quad() -> FeMesh {
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
    fn test_partition_of_unity() {
        for shape in [ElementShape::Line2, ElementShape::Quad4, ElementShape::Hex8] {
            let xi = [0.3, 0.7, 0.2];
            let sum: f64 = shape_values(shape, &xi).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "{:?}: sum = {}", shape, sum);
            for axis in 0..shape.dimension() {
                let dsum: f64 = shape_derivatives(shape, &xi, axis).iter().sum();
                assert!(dsum.abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_evaluate_is_identity_on_unit_quad() {
        let mesh = unit_quad();
        let p = evaluate(&mesh, 0, 0, &[0.25, 0.75, 0.0]);
        assert!((p.x - 0.25).abs() < 1e-12);
        assert!((p.y - 0.75).abs() < 1e-12);
        assert!(p.z.abs() < 1e-12);
    }

    #[test]
    fn test_derivatives_on_unit_quad() {
        let mesh = unit_quad();
        let d1 = derivative(&mesh, 0, 0, &[0.5, 0.5, 0.0], 0);
        let d2 = derivative(&mesh, 0, 0, &[0.5, 0.5, 0.0], 1);
        assert!((d1 - Vector3::new(1.0, 0.0, 0.0)).norm() < 1e-12);
        assert!((d2 - Vector3::new(0.0, 1.0, 0.0)).norm() < 1e-12);
        // Flat quad: no parametric twist.
        let dd = second_derivative(&mesh, 0, 0, &[0.5, 0.5, 0.0], 0, 1);
        assert!(dd.norm() < 1e-12);
    }

    #[test]
    fn test_jacobian_measure_unit_quad() {
        let mesh = unit_quad();
        let measure = jacobian_measure(&mesh, 0, 0, &[0.5, 0.5, 0.0]);
        assert!((measure - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_gauss3_integrates_quartic_exactly() {
        // 3-point Gauss is exact up to degree 5; check t^4 on [0,1] = 1/5.
        let integral: f64 = GAUSS3_POINTS
            .iter()
            .zip(GAUSS3_WEIGHTS.iter())
            .map(|(&t, &w)| w * t.powi(4))
            .sum();
        assert!((integral - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_edge_xi() {
        let edges = ElementShape::Quad4.local_edges();
        // Edge 3 runs along xi2 at xi1 = 1.
        let xi = edge_xi(&edges[3], 0.25);
        assert_eq!(xi[0], 1.0);
        assert_eq!(xi[1], 0.25);
    }
}

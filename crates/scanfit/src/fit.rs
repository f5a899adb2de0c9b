//! The penalized surface-fitting solve.
//!
//! The objective is the sum of squared projection-error vectors over the
//! active data set, plus optional regularization integrals evaluated with
//! 3-point Gauss quadrature per element direction:
//!
//! - strain: squared difference between deformed and reference in-surface
//!   derivatives, normalized by reference arc length (2-D meshes only);
//! - curvature: squared second derivative of displacement;
//! - edge discontinuity: squared C1 jump of the coordinate field across
//!   shared element edges, integrated over the (sub)mesh's 1-D edges.
//!
//! Independent variables are the mesh node coordinates, restricted to the
//! subregion's nodes when one is set. With the linear element basis every
//! residual is linear in the variables, so the assembled problem is handed
//! to the least-squares port as precomputed residual blocks. Node
//! coordinates are only written back when the solve succeeds; a failed
//! solve preserves the pre-fit geometry.

use hashbrown::HashMap;
use nalgebra::DVector;
use tracing::{debug, info, warn};

use crate::element::{self, GAUSS3_POINTS, GAUSS3_WEIGHTS};
use crate::error::{FitError, FitResult};
use crate::projection::{self, ErrorStats};
use crate::solver::{NormalSystem, ObjectiveFunction, QuasiNewtonLeastSquares};
use crate::types::{DataPointSet, FeMesh, MeshLocation, SurfaceSubregion};

/// Weights and bounds of the fit objective.
#[derive(Debug, Clone, PartialEq)]
pub struct FitSettings {
    /// Strain penalty weight, `>= 0`.
    pub strain_penalty: f64,
    /// Curvature penalty weight, `>= 0`.
    pub curvature_penalty: f64,
    /// Edge-discontinuity penalty weight, `>= 0`.
    pub edge_discontinuity_penalty: f64,
    /// Solver iteration bound, `>= 1`.
    pub max_iterations: u32,
}

impl Default for FitSettings {
    fn default() -> Self {
        Self {
            strain_penalty: 0.0,
            curvature_penalty: 0.0,
            edge_discontinuity_penalty: 0.0,
            max_iterations: 1,
        }
    }
}

impl FitSettings {
    /// Validate ranges: penalties non-negative and finite, iterations
    /// positive.
    pub fn validate(&self) -> FitResult<()> {
        for (name, value) in [
            ("strain_penalty", self.strain_penalty),
            ("curvature_penalty", self.curvature_penalty),
            ("edge_discontinuity_penalty", self.edge_discontinuity_penalty),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(FitError::invalid_input(
                    name,
                    format!("must be >= 0, got {}", value),
                ));
            }
        }
        if self.max_iterations < 1 {
            return Err(FitError::invalid_input(
                "max_iterations",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Result of a fit solve.
#[derive(Debug, Clone)]
pub struct FitReport {
    /// Solver iterations performed.
    pub iterations: usize,
    /// Whether the solver converged before the iteration bound.
    pub converged: bool,
    /// Objective at the pre-fit geometry.
    pub initial_objective: f64,
    /// Objective at the fitted geometry.
    pub final_objective: f64,
    /// Projection-error statistics refreshed against the fitted geometry.
    pub stats: Option<ErrorStats>,
}

/// One precomputed scalar residual, linear in the free variables.
struct LinearResidual {
    constant: f64,
    gradient: Vec<(usize, f64)>,
}

/// The assembled objective handed to the solver.
struct AssembledObjective {
    variables: usize,
    residuals: Vec<LinearResidual>,
}

impl ObjectiveFunction for AssembledObjective {
    fn variable_count(&self) -> usize {
        self.variables
    }

    fn accumulate(&self, x: &DVector<f64>, system: &mut NormalSystem) -> FitResult<()> {
        for residual in &self.residuals {
            let mut value = residual.constant;
            for &(index, coefficient) in &residual.gradient {
                value += coefficient * x[index];
            }
            system.add_residual(value, &residual.gradient);
        }
        Ok(())
    }
}

/// Mapping from mesh nodes to solver variable slots.
struct VariableMap {
    slots: HashMap<u32, usize>,
    nodes: Vec<u32>,
}

impl VariableMap {
    fn new(mesh: &FeMesh, subregion: Option<&SurfaceSubregion>) -> Self {
        let nodes: Vec<u32> = match subregion {
            Some(subregion) => {
                let mut nodes: Vec<u32> = subregion.nodes(mesh).into_iter().collect();
                nodes.sort_unstable();
                nodes
            }
            None => (0..mesh.node_count as u32).collect(),
        };
        let slots = nodes
            .iter()
            .enumerate()
            .map(|(slot, &node)| (node, slot))
            .collect();
        Self { slots, nodes }
    }

    #[inline]
    fn variable(&self, node: u32, axis: usize) -> Option<usize> {
        self.slots.get(&node).map(|&slot| slot * 3 + axis)
    }

    fn variable_count(&self) -> usize {
        self.nodes.len() * 3
    }

    /// Current coordinates of the free nodes, flattened.
    fn initial_vector(&self, mesh: &FeMesh, coordinate_field: usize) -> DVector<f64> {
        let values = &mesh.fields[coordinate_field].values;
        let mut x = DVector::zeros(self.variable_count());
        for (slot, &node) in self.nodes.iter().enumerate() {
            let p = values[node as usize];
            x[slot * 3] = p.x;
            x[slot * 3 + 1] = p.y;
            x[slot * 3 + 2] = p.z;
        }
        x
    }
}

/// Append the three per-axis residuals of one linear combination of node
/// coordinates: `r_axis = Σ_a c_a · x[node_a][axis] − rhs[axis]`, splitting
/// each node between gradient (free) and constant (fixed).
fn push_node_combination(
    residuals: &mut Vec<LinearResidual>,
    mesh: &FeMesh,
    coordinate_field: usize,
    variables: &VariableMap,
    nodes_with_coefficients: &[(u32, f64)],
    rhs: [f64; 3],
) {
    let values = &mesh.fields[coordinate_field].values;
    for axis in 0..3 {
        let mut constant = -rhs[axis];
        let mut gradient = Vec::with_capacity(nodes_with_coefficients.len());
        for &(node, coefficient) in nodes_with_coefficients {
            match variables.variable(node, axis) {
                Some(index) => gradient.push((index, coefficient)),
                None => constant += coefficient * values[node as usize][axis],
            }
        }
        residuals.push(LinearResidual { constant, gradient });
    }
}

/// Assemble the data sum-of-squares terms.
fn assemble_data_residuals(
    mesh: &FeMesh,
    coordinate_field: usize,
    cloud: &DataPointSet,
    data_field: usize,
    projections: &[Option<MeshLocation>],
    variables: &VariableMap,
    residuals: &mut Vec<LinearResidual>,
) -> usize {
    let data = &cloud.fields[data_field].values;
    let mut count = 0usize;
    for index in 0..cloud.point_count {
        if !cloud.active[index] {
            continue;
        }
        let Some(location) = projections.get(index).copied().flatten() else {
            continue;
        };
        let elem = &mesh.elements[location.element as usize];
        let weights = element::shape_values(elem.shape, &location.xi);
        let combination: Vec<(u32, f64)> = elem
            .nodes
            .iter()
            .enumerate()
            .map(|(local, &node)| (node, weights[local]))
            .collect();
        let p = data[index];
        push_node_combination(
            residuals,
            mesh,
            coordinate_field,
            variables,
            &combination,
            [p.x, p.y, p.z],
        );
        count += 1;
    }
    count
}

/// Assemble strain and curvature penalty integrals over the target
/// elements. Supported for 2-D meshes; other dimensions are skipped with a
/// diagnostic.
#[allow(clippy::too_many_arguments)]
fn assemble_smoothness_residuals(
    mesh: &FeMesh,
    coordinate_field: usize,
    reference_field: usize,
    targets: &[u32],
    settings: &FitSettings,
    variables: &VariableMap,
    residuals: &mut Vec<LinearResidual>,
) -> FitResult<()> {
    let dimension = targets
        .iter()
        .map(|&i| mesh.elements[i as usize].dimension())
        .max()
        .unwrap_or(0);
    if dimension != 2 {
        warn!(
            dimension,
            "strain/curvature penalties unsupported for this mesh dimension, skipped"
        );
        return Ok(());
    }

    for &target in targets {
        let elem = &mesh.elements[target as usize];
        if elem.dimension() != 2 {
            continue;
        }
        for (&t1, &w1) in GAUSS3_POINTS.iter().zip(GAUSS3_WEIGHTS.iter()) {
            for (&t2, &w2) in GAUSS3_POINTS.iter().zip(GAUSS3_WEIGHTS.iter()) {
                let xi = [t1, t2, 0.0];
                // Reference arc lengths and area element.
                let reference_d1 =
                    element::derivative(mesh, reference_field, target, &xi, 0);
                let reference_d2 =
                    element::derivative(mesh, reference_field, target, &xi, 1);
                let arc = [reference_d1.norm(), reference_d2.norm()];
                let area = reference_d1.cross(&reference_d2).norm();
                if arc[0] <= f64::EPSILON || arc[1] <= f64::EPSILON || area <= f64::EPSILON {
                    return Err(FitError::objective_setup_failed(format!(
                        "degenerate reference geometry in element {}",
                        target
                    )));
                }
                let quadrature = (w1 * w2 * area).sqrt();

                if settings.strain_penalty > 0.0 {
                    let scale = quadrature * settings.strain_penalty;
                    for direction in 0..2 {
                        let basis = element::shape_derivatives(elem.shape, &xi, direction);
                        let combination: Vec<(u32, f64)> = elem
                            .nodes
                            .iter()
                            .enumerate()
                            .map(|(local, &node)| {
                                (node, scale * basis[local] / arc[direction])
                            })
                            .collect();
                        // rhs is the reference derivative with the same
                        // scaling, so the residual measures du/dS.
                        let reference_derivative = if direction == 0 {
                            reference_d1
                        } else {
                            reference_d2
                        };
                        let reference = reference_derivative * (scale / arc[direction]);
                        push_node_combination(
                            residuals,
                            mesh,
                            coordinate_field,
                            variables,
                            &combination,
                            [reference.x, reference.y, reference.z],
                        );
                    }
                }

                if settings.curvature_penalty > 0.0 {
                    // Only the mixed second derivative survives the linear
                    // basis; equal-axis terms are identically zero.
                    let scale = quadrature * settings.curvature_penalty / (arc[0] * arc[1]);
                    let basis = element::shape_second_derivatives(elem.shape, &xi, 0, 1);
                    let combination: Vec<(u32, f64)> = elem
                        .nodes
                        .iter()
                        .enumerate()
                        .map(|(local, &node)| (node, scale * basis[local]))
                        .collect();
                    let reference =
                        element::second_derivative(mesh, reference_field, target, &xi, 0, 1)
                            * scale;
                    push_node_combination(
                        residuals,
                        mesh,
                        coordinate_field,
                        variables,
                        &combination,
                        [reference.x, reference.y, reference.z],
                    );
                }
            }
        }
    }
    Ok(())
}

/// Assemble the edge-discontinuity penalty over shared 1-D edges: at each
/// quadrature point the residual is the sum of the two into-element
/// cross-edge derivatives, which vanishes for a parametrically smooth
/// surface.
fn assemble_edge_residuals(
    mesh: &FeMesh,
    coordinate_field: usize,
    reference_field: usize,
    subregion: Option<&SurfaceSubregion>,
    weight: f64,
    variables: &VariableMap,
    residuals: &mut Vec<LinearResidual>,
) -> FitResult<()> {
    let edges = match subregion {
        Some(subregion) => subregion.bounding_edges(mesh),
        None => mesh.surface_edges(None),
    };
    let reference = &mesh.fields[reference_field].values;

    for edge in &edges {
        if edge.adjacent.len() != 2 {
            continue;
        }
        // Reference edge length element; edges are linear so it is constant
        // along the edge.
        let a = reference[edge.nodes[0] as usize];
        let b = reference[edge.nodes[1] as usize];
        let length = (b - a).norm();
        if length <= f64::EPSILON {
            return Err(FitError::objective_setup_failed(format!(
                "degenerate reference edge between nodes {} and {}",
                edge.nodes[0], edge.nodes[1]
            )));
        }

        for (&t, &w) in GAUSS3_POINTS.iter().zip(GAUSS3_WEIGHTS.iter()) {
            let scale = (w * length).sqrt() * weight;
            let mut combination: Vec<(u32, f64)> = Vec::with_capacity(8);
            for edge_use in &edge.adjacent {
                let elem = &mesh.elements[edge_use.element as usize];
                let local = elem.shape.local_edges()[edge_use.local_edge as usize];
                // Match the traversal direction to the edge's canonical
                // node order so both elements sample the same point.
                let forward = elem.nodes[local.nodes[0]] == edge.nodes[0];
                let t_local = if forward { t } else { 1.0 - t };
                let xi = element::edge_xi(&local, t_local);
                // Cross-edge direction pointing into the element interior.
                let sign = if local.fixed_value == 0.0 { 1.0 } else { -1.0 };
                let basis = element::shape_derivatives(elem.shape, &xi, local.fixed_axis);
                for (local_node, &node) in elem.nodes.iter().enumerate() {
                    combination.push((node, sign * scale * basis[local_node]));
                }
            }
            push_node_combination(
                residuals,
                mesh,
                coordinate_field,
                variables,
                &combination,
                [0.0, 0.0, 0.0],
            );
        }
    }
    Ok(())
}

/// Run the penalized least-squares fit, writing optimized node coordinates
/// back into the mesh only on success.
#[allow(clippy::too_many_arguments)]
pub(crate) fn fit(
    mesh: &mut FeMesh,
    coordinate_field: usize,
    reference_field: usize,
    cloud: &DataPointSet,
    data_field: usize,
    subregion: Option<&SurfaceSubregion>,
    projections: Option<&[Option<MeshLocation>]>,
    settings: &FitSettings,
) -> FitResult<FitReport> {
    let projections = projections.ok_or_else(|| FitError::projections_not_ready("fit"))?;
    settings.validate()?;

    let variables = VariableMap::new(mesh, subregion);
    let targets = projection::target_elements(mesh, subregion);

    let mut residuals = Vec::new();
    let data_terms = assemble_data_residuals(
        mesh,
        coordinate_field,
        cloud,
        data_field,
        projections,
        &variables,
        &mut residuals,
    );
    if settings.strain_penalty > 0.0 || settings.curvature_penalty > 0.0 {
        assemble_smoothness_residuals(
            mesh,
            coordinate_field,
            reference_field,
            &targets,
            settings,
            &variables,
            &mut residuals,
        )?;
    }
    if settings.edge_discontinuity_penalty > 0.0 {
        assemble_edge_residuals(
            mesh,
            coordinate_field,
            reference_field,
            subregion,
            settings.edge_discontinuity_penalty,
            &variables,
            &mut residuals,
        )?;
    }
    debug!(
        data_terms,
        residual_count = residuals.len(),
        variable_count = variables.variable_count(),
        "fit objective assembled"
    );

    let objective = AssembledObjective {
        variables: variables.variable_count(),
        residuals,
    };
    let solver = QuasiNewtonLeastSquares::new(settings.max_iterations as usize);
    let x0 = variables.initial_vector(mesh, coordinate_field);
    let report = solver.solve(&objective, x0)?;

    // Success: commit the optimized coordinates.
    let values = &mut mesh.fields[coordinate_field].values;
    for (slot, &node) in variables.nodes.iter().enumerate() {
        let p = &mut values[node as usize];
        p.x = report.solution[slot * 3];
        p.y = report.solution[slot * 3 + 1];
        p.z = report.solution[slot * 3 + 2];
    }

    let stats = projection::error_stats(mesh, coordinate_field, cloud, data_field, projections);
    info!(
        iterations = report.iterations,
        converged = report.converged,
        initial_objective = report.initial_objective,
        final_objective = report.final_objective,
        mean_error = stats.map(|s| s.mean),
        "fit completed"
    );
    Ok(FitReport {
        iterations: report.iterations,
        converged: report.converged,
        initial_objective: report.initial_objective,
        final_objective: report.final_objective,
        stats,
    })
}

//! Bounded-iteration least-squares solving behind a small port.
//!
//! The fit assembles its objective as residual blocks through the
//! [`ObjectiveFunction`] trait; the solver sees only variables, residuals,
//! and gradients, so its iterative internals stay swappable. The provided
//! implementation is a damped Gauss-Newton iteration over accumulated
//! normal equations with an SVD fallback for ill-conditioned systems.

use nalgebra::{DMatrix, DVector};
use tracing::debug;

use crate::error::{FitError, FitResult};

/// A sum-of-squares objective expressed as residual blocks.
pub trait ObjectiveFunction {
    /// Number of scalar variables.
    fn variable_count(&self) -> usize;

    /// Accumulate every residual and its gradient at `x` into the system.
    fn accumulate(&self, x: &DVector<f64>, system: &mut NormalSystem) -> FitResult<()>;
}

/// Accumulated normal equations `JᵀJ δ = -Jᵀr` for one linearization point.
///
/// Duplicate variable indices within one gradient are summed, so callers
/// may emit per-node contributions without combining them first.
#[derive(Debug, Clone)]
pub struct NormalSystem {
    ata: DMatrix<f64>,
    atb: DVector<f64>,
    objective: f64,
    residual_count: usize,
}

impl NormalSystem {
    fn new(variables: usize) -> Self {
        Self {
            ata: DMatrix::zeros(variables, variables),
            atb: DVector::zeros(variables),
            objective: 0.0,
            residual_count: 0,
        }
    }

    /// Add one scalar residual with its sparse gradient
    /// `(variable index, coefficient)` entries.
    pub fn add_residual(&mut self, value: f64, gradient: &[(usize, f64)]) {
        self.objective += value * value;
        self.residual_count += 1;
        for &(row, row_coefficient) in gradient {
            self.atb[row] -= row_coefficient * value;
            for &(column, column_coefficient) in gradient {
                self.ata[(row, column)] += row_coefficient * column_coefficient;
            }
        }
    }

    /// Current sum of squared residuals.
    pub fn objective(&self) -> f64 {
        self.objective
    }

    /// Number of residuals accumulated.
    pub fn residual_count(&self) -> usize {
        self.residual_count
    }
}

/// Result of a least-squares solve.
#[derive(Debug, Clone)]
pub struct SolveReport {
    /// The optimized variable vector.
    pub solution: DVector<f64>,
    /// Iterations performed.
    pub iterations: usize,
    /// Whether the step tolerance was reached before the iteration bound.
    pub converged: bool,
    /// Objective at the starting point.
    pub initial_objective: f64,
    /// Objective at the solution.
    pub final_objective: f64,
}

/// Damped Gauss-Newton least-squares solver bounded to a fixed number of
/// iterations.
///
/// Reaching the iteration bound without meeting the step tolerance is not a
/// failure; the bound is the caller's cancellation mechanism. Failure means
/// the solver could not produce a step (singular system, non-finite
/// objective).
#[derive(Debug, Clone)]
pub struct QuasiNewtonLeastSquares {
    /// Maximum iterations, at least 1.
    pub max_iterations: usize,
    /// Relative step norm below which the solve is converged.
    pub step_tolerance: f64,
}

impl QuasiNewtonLeastSquares {
    /// Create a solver with the given iteration bound.
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations: max_iterations.max(1),
            step_tolerance: 1e-10,
        }
    }

    /// Minimize the objective starting from `x0`.
    pub fn solve(
        &self,
        objective: &impl ObjectiveFunction,
        x0: DVector<f64>,
    ) -> FitResult<SolveReport> {
        let variables = objective.variable_count();
        let mut x = x0;
        debug_assert_eq!(x.len(), variables);

        let mut initial_objective = 0.0;
        let mut converged = false;
        let mut iterations = 0;

        for iteration in 0..self.max_iterations {
            iterations = iteration + 1;
            let mut system = NormalSystem::new(variables);
            objective.accumulate(&x, &mut system)?;
            if !system.objective().is_finite() {
                return Err(FitError::optimization_failed(
                    2,
                    "objective is not finite at the current iterate",
                ));
            }
            if iteration == 0 {
                initial_objective = system.objective();
            }

            // Small Tikhonov damping keeps variables with no residual
            // coverage (zero rows) stationary instead of making the system
            // singular.
            let damping = 1e-10 * (1.0 + system.ata.diagonal().amax());
            let mut damped = system.ata.clone();
            for i in 0..variables {
                damped[(i, i)] += damping;
            }

            let step = match damped.clone().cholesky() {
                Some(cholesky) => cholesky.solve(&system.atb),
                None => damped
                    .svd(true, true)
                    .solve(&system.atb, 1e-12)
                    .map_err(|_| {
                        FitError::optimization_failed(1, "singular normal equations")
                    })?,
            };
            if step.iter().any(|v| !v.is_finite()) {
                return Err(FitError::optimization_failed(
                    1,
                    "solver step is not finite",
                ));
            }

            let step_norm = step.norm();
            x += &step;
            debug!(
                iteration = iterations,
                objective = system.objective(),
                step_norm,
                "solver iteration"
            );
            if step_norm < self.step_tolerance * (1.0 + x.norm()) {
                converged = true;
                break;
            }
        }

        // Final objective at the returned solution.
        let mut system = NormalSystem::new(variables);
        objective.accumulate(&x, &mut system)?;
        let final_objective = system.objective();
        if !final_objective.is_finite() {
            return Err(FitError::optimization_failed(
                2,
                "objective is not finite at the solution",
            ));
        }

        Ok(SolveReport {
            solution: x,
            iterations,
            converged,
            initial_objective,
            final_objective,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fit y = a + b t to three points; linear, so one iteration suffices.
    struct LineFit {
        samples: Vec<(f64, f64)>,
    }

    impl ObjectiveFunction for LineFit {
        fn variable_count(&self) -> usize {
            2
        }

        fn accumulate(&self, x: &DVector<f64>, system: &mut NormalSystem) -> FitResult<()> {
            for &(t, y) in &self.samples {
                let predicted = x[0] + x[1] * t;
                system.add_residual(predicted - y, &[(0, 1.0), (1, t)]);
            }
            Ok(())
        }
    }

    #[test]
    fn test_linear_problem_converges_immediately() {
        let problem = LineFit {
            samples: vec![(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)],
        };
        let solver = QuasiNewtonLeastSquares::new(5);
        let report = solver.solve(&problem, DVector::zeros(2)).unwrap();
        assert!(report.converged);
        assert!((report.solution[0] - 1.0).abs() < 1e-8);
        assert!((report.solution[1] - 2.0).abs() < 1e-8);
        assert!(report.final_objective < 1e-12);
        assert!(report.initial_objective > report.final_objective);
    }

    /// A problem whose second variable appears in no residual.
    struct UnderdeterminedFit;

    impl ObjectiveFunction for UnderdeterminedFit {
        fn variable_count(&self) -> usize {
            2
        }

        fn accumulate(&self, x: &DVector<f64>, system: &mut NormalSystem) -> FitResult<()> {
            system.add_residual(x[0] - 4.0, &[(0, 1.0)]);
            Ok(())
        }
    }

    #[test]
    fn test_uncovered_variables_stay_put() {
        let solver = QuasiNewtonLeastSquares::new(3);
        let x0 = DVector::from_vec(vec![0.0, 7.5]);
        let report = solver.solve(&UnderdeterminedFit, x0).unwrap();
        assert!((report.solution[0] - 4.0).abs() < 1e-6);
        // The unconstrained variable is left where it started.
        assert!((report.solution[1] - 7.5).abs() < 1e-9);
    }

    #[test]
    fn test_duplicate_gradient_indices_are_summed() {
        struct Doubled;
        impl ObjectiveFunction for Doubled {
            fn variable_count(&self) -> usize {
                1
            }
            fn accumulate(&self, x: &DVector<f64>, system: &mut NormalSystem) -> FitResult<()> {
                // r = 2x - 6 expressed with a split gradient.
                system.add_residual(2.0 * x[0] - 6.0, &[(0, 1.0), (0, 1.0)]);
                Ok(())
            }
        }
        let solver = QuasiNewtonLeastSquares::new(5);
        let report = solver.solve(&Doubled, DVector::zeros(1)).unwrap();
        assert!((report.solution[0] - 3.0).abs() < 1e-8);
    }

    #[test]
    fn test_iteration_bound_is_respected() {
        let problem = LineFit {
            samples: vec![(0.0, 1.0), (1.0, 3.0)],
        };
        let solver = QuasiNewtonLeastSquares::new(1);
        let report = solver.solve(&problem, DVector::zeros(2)).unwrap();
        assert_eq!(report.iterations, 1);
    }
}

//! Tracing extensions for fitting operations.
//!
//! Structured logging helpers for the `tracing` ecosystem. Enable output by
//! installing a subscriber in the driving application, e.g.
//! `RUST_LOG=scanfit=debug` for detailed progress.

use std::time::Instant;

use tracing::{debug, info};

use crate::fit::FitReport;
use crate::projection::ProjectionReport;

/// A performance timer that logs its duration on drop.
///
/// ```rust,ignore
/// let _timer = OperationTimer::new("calculate_projections");
/// // ... work ...
/// // duration logged when the guard drops
/// ```
pub struct OperationTimer {
    name: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Start a timer for a named operation.
    pub fn new(name: &'static str) -> Self {
        debug!(target: "scanfit::timing", operation = name, "starting operation");
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        info!(
            target: "scanfit::timing",
            operation = self.name,
            elapsed_ms = format!("{:.2}", self.elapsed_ms()),
            "operation completed"
        );
    }
}

/// Log a projection report at info level.
pub fn log_projection_report(report: &ProjectionReport) {
    match report.stats {
        Some(stats) => info!(
            projected = report.projected,
            skipped = report.skipped,
            mean_error = stats.mean,
            max_error = stats.maximum,
            "projection report"
        ),
        None => info!(
            projected = report.projected,
            skipped = report.skipped,
            "projection report: no data"
        ),
    }
}

/// Log a fit report at info level.
pub fn log_fit_report(report: &FitReport) {
    info!(
        iterations = report.iterations,
        converged = report.converged,
        initial_objective = report.initial_objective,
        final_objective = report.final_objective,
        mean_error = report.stats.map(|s| s.mean),
        "fit report"
    );
}

//! Interactive fitting of finite-element meshes to scanned point clouds.
//!
//! This crate fits a parametric surface or volume mesh onto a cloud of
//! scanned data points in four stages:
//!
//! - **Align**: interactively place the model over the data with a rigid
//!   transform (rotate, uniform scale, offset, optional mirror), then bake
//!   it into the mesh coordinates.
//! - **Project**: find the nearest element-local location on the mesh for
//!   every active data point and derive per-point error vectors.
//! - **Filter**: prune outlier correspondences by relative error magnitude
//!   or by misalignment with the local surface normal.
//! - **Fit**: solve a bounded least-squares problem that moves mesh node
//!   coordinates to minimize projection error, regularized by strain,
//!   curvature, and edge-discontinuity penalties.
//!
//! Projection, filtering, and fitting can be repeated until the result is
//! good enough to write out.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::path::Path;
//! use scanfit::{FittingSession, io};
//!
//! # fn main() -> scanfit::FitResult<()> {
//! let mesh = io::read_model(Path::new("template.exfile"))?;
//! let cloud = io::read_point_cloud_xyz(Path::new("scan.xyz"))?;
//! let mut session = FittingSession::new(mesh, cloud)?;
//!
//! // Align phase: centre the model on the data, then bake.
//! session.auto_centre_on_data()?;
//! session.set_phase_fit();
//!
//! // Project, filter outliers, fit.
//! session.calculate_projections()?;
//! session.filter_top_error(0.9)?;
//! session.set_fit_max_iterations(5)?;
//! let report = session.fit()?;
//! println!("mean error: {:?}", report.stats.map(|s| s.mean));
//!
//! session.write_output_model(Path::new("run1"))?;
//! # Ok(())
//! # }
//! ```
//!
//! # Sessions and change notification
//!
//! All state lives in a [`FittingSession`]; every mutating operation is a
//! method on it and bumps [`FittingSession::revision`] exactly once, so a
//! driving layer refreshes by polling the revision rather than receiving
//! callbacks. The session is single-owner and synchronous: every operation
//! runs to completion before returning.
//!
//! # Error Handling
//!
//! Operations return [`FitResult`], which is `Result<T, FitError>`. Errors
//! carry machine-readable codes (`FIT-XXXX`, see [`ErrorCode`]) and miette
//! diagnostics. Invalid interactive input is rejected without mutating any
//! state; a failed solve preserves the pre-fit geometry.
//!
//! # Logging
//!
//! Operations emit `tracing` events. Install a subscriber and set
//! `RUST_LOG=scanfit=debug` for detailed progress, or
//! `RUST_LOG=scanfit::timing=debug` for operation timing.

mod binding;
mod element;
mod error;
mod filter;
mod fit;
mod projection;
mod session;
mod solver;
mod types;

pub mod align;
pub mod interact;
pub mod io;
pub mod settings;
pub mod tracing_ext;

// Re-export core types at the crate root.
pub use align::AlignmentState;
pub use error::{ErrorCode, FitError, FitResult};
pub use filter::{FilterReport, FilterSettings};
pub use fit::{FitReport, FitSettings};
pub use projection::{ErrorStats, ProjectionReport};
pub use session::{FittingSession, SessionPhase};
pub use settings::AlignSettings;
pub use solver::{NormalSystem, ObjectiveFunction, QuasiNewtonLeastSquares, SolveReport};
pub use types::{
    DataPointSet, EdgeUse, Element, ElementShape, FeMesh, LocalEdge, MeshLocation, NodeField,
    SurfaceEdge, SurfaceSubregion,
};

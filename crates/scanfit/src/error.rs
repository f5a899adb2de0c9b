//! Error types for fitting operations with rich diagnostics.
//!
//! This module provides comprehensive error handling with:
//! - Machine-readable error codes for programmatic handling
//! - Rich context (which field, which operation, what went wrong)
//! - Beautiful terminal display via miette
//!
//! # Error Codes
//!
//! Each error has a unique code in the format `FIT-XXXX`:
//! - `FIT-1xxx`: I/O errors (settings or model read/write, parsing)
//! - `FIT-2xxx`: Binding and validation errors (fields, empty domains, input)
//! - `FIT-3xxx`: Projection and filter errors
//! - `FIT-4xxx`: Optimization errors
//!
//! # Example
//!
//! ```rust,ignore
//! use scanfit::{FitError, ErrorCode};
//!
//! let err = FitError::projections_not_ready("filter_top_error");
//! println!("Error code: {}", err.code()); // FIT-3001
//! ```

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for fitting operations.
pub type FitResult<T> = Result<T, FitError>;

/// Machine-readable error codes for fitting operations.
///
/// Codes follow the pattern `FIT-XXXX` where:
/// - 1xxx = I/O errors
/// - 2xxx = Binding/validation errors
/// - 3xxx = Projection/filter errors
/// - 4xxx = Optimization errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // I/O errors (1xxx)
    /// FIT-1001: Failed to read a file
    IoRead = 1001,
    /// FIT-1002: Failed to write a file
    IoWrite = 1002,
    /// FIT-1003: Failed to parse a file
    ParseFailed = 1003,

    // Binding/validation errors (2xxx)
    /// FIT-2001: No coordinate field found on a domain
    NoCoordinateFieldFound = 2001,
    /// FIT-2002: Mesh has no elements
    EmptyMesh = 2002,
    /// FIT-2003: Point cloud has no points
    EmptyPointCloud = 2003,
    /// FIT-2004: Malformed interactive input
    InvalidInput = 2004,

    // Projection/filter errors (3xxx)
    /// FIT-3001: Filter or fit attempted before projections exist
    ProjectionsNotReady = 3001,
    /// FIT-3002: Maximum projection error is not positive
    DegenerateError = 3002,

    // Optimization errors (4xxx)
    /// FIT-4001: A penalty term could not be attached to the objective
    ObjectiveSetupFailed = 4001,
    /// FIT-4002: The least-squares solver reported non-success
    OptimizationFailed = 4002,
    /// FIT-4003: A concurrent request was rejected on a busy session
    SessionBusy = 4003,
}

impl ErrorCode {
    /// Returns the error code as a string in the format `FIT-XXXX`.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoRead => "FIT-1001",
            ErrorCode::IoWrite => "FIT-1002",
            ErrorCode::ParseFailed => "FIT-1003",
            ErrorCode::NoCoordinateFieldFound => "FIT-2001",
            ErrorCode::EmptyMesh => "FIT-2002",
            ErrorCode::EmptyPointCloud => "FIT-2003",
            ErrorCode::InvalidInput => "FIT-2004",
            ErrorCode::ProjectionsNotReady => "FIT-3001",
            ErrorCode::DegenerateError => "FIT-3002",
            ErrorCode::ObjectiveSetupFailed => "FIT-4001",
            ErrorCode::OptimizationFailed => "FIT-4002",
            ErrorCode::SessionBusy => "FIT-4003",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Errors that can occur during fitting operations.
///
/// Setup and validation errors (missing coordinate field, empty domains) are
/// unrecoverable for the current session and are surfaced to the caller.
/// Interactive input errors are recoverable: the attempted change is
/// discarded and no state is mutated. Solver failures abort the fit but
/// leave the mesh's pre-fit geometry untouched.
#[derive(Debug, Error, Diagnostic)]
pub enum FitError {
    /// Error reading from a file.
    #[error("failed to read {path}")]
    #[diagnostic(
        code(fit::io::read),
        help("Check that the file exists and is readable")
    )]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error writing to a file.
    #[error("failed to write {path}")]
    #[diagnostic(
        code(fit::io::write),
        help("Check that the directory exists and is writable")
    )]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Error parsing a model, point-cloud, or settings file.
    #[error("failed to parse {path}: {details}")]
    #[diagnostic(
        code(fit::io::parse),
        help("The file may be truncated or written by an incompatible version")
    )]
    ParseFailed { path: PathBuf, details: String },

    /// No coordinate field could be located on a domain.
    #[error("no coordinate field found on {domain}")]
    #[diagnostic(
        code(fit::binding::no_coordinate_field),
        help(
            "The domain must carry a coordinate-typed field with at most 3 components, defined at every node or point"
        )
    )]
    NoCoordinateFieldFound { domain: &'static str },

    /// The mesh has no elements.
    #[error("mesh is empty: {details}")]
    #[diagnostic(
        code(fit::binding::empty_mesh),
        help("The model must contain at least one element")
    )]
    EmptyMesh { details: String },

    /// The data point cloud has no points.
    #[error("point cloud is empty: {details}")]
    #[diagnostic(
        code(fit::binding::empty_point_cloud),
        help("The data cloud must contain at least one point")
    )]
    EmptyPointCloud { details: String },

    /// Malformed interactive input (wrong component count, out-of-range value).
    ///
    /// The attempted change is discarded; the previous value remains in effect.
    #[error("invalid input for {field}: {details}")]
    #[diagnostic(
        code(fit::input::invalid),
        help("The previous value is unchanged; correct the input and retry")
    )]
    InvalidInput { field: &'static str, details: String },

    /// A filter or fit was attempted before projections were calculated.
    #[error("cannot {operation} before data point projections are calculated")]
    #[diagnostic(
        code(fit::projection::not_ready),
        help("Call calculate_projections first")
    )]
    ProjectionsNotReady { operation: &'static str },

    /// The maximum projection error is zero or negative, so there is nothing
    /// to filter.
    #[error("cannot filter: maximum projection error is {max_error}")]
    #[diagnostic(
        code(fit::filter::degenerate),
        help("All active points already project exactly onto the mesh")
    )]
    DegenerateError { max_error: f64 },

    /// A penalty term could not be attached to the fit objective.
    #[error("objective setup failed: {details}")]
    #[diagnostic(
        code(fit::solve::objective_setup),
        help("Check the penalty weights and that the mesh dimension supports the requested penalty")
    )]
    ObjectiveSetupFailed { details: String },

    /// The least-squares solver reported non-success.
    ///
    /// The mesh's pre-fit geometry is preserved.
    #[error("optimization failed with code {code}: {details}")]
    #[diagnostic(
        code(fit::solve::failed),
        help("Try more iterations, smaller penalty weights, or re-projecting the data first")
    )]
    OptimizationFailed { code: i32, details: String },

    /// A second concurrent request was rejected on a busy session.
    #[error("session is busy with another operation")]
    #[diagnostic(
        code(fit::session::busy),
        help("Serialize mutating calls on a session; retry once the current operation completes")
    )]
    SessionBusy,
}

impl FitError {
    /// Returns the machine-readable error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            FitError::IoRead { .. } => ErrorCode::IoRead,
            FitError::IoWrite { .. } => ErrorCode::IoWrite,
            FitError::ParseFailed { .. } => ErrorCode::ParseFailed,
            FitError::NoCoordinateFieldFound { .. } => ErrorCode::NoCoordinateFieldFound,
            FitError::EmptyMesh { .. } => ErrorCode::EmptyMesh,
            FitError::EmptyPointCloud { .. } => ErrorCode::EmptyPointCloud,
            FitError::InvalidInput { .. } => ErrorCode::InvalidInput,
            FitError::ProjectionsNotReady { .. } => ErrorCode::ProjectionsNotReady,
            FitError::DegenerateError { .. } => ErrorCode::DegenerateError,
            FitError::ObjectiveSetupFailed { .. } => ErrorCode::ObjectiveSetupFailed,
            FitError::OptimizationFailed { .. } => ErrorCode::OptimizationFailed,
            FitError::SessionBusy => ErrorCode::SessionBusy,
        }
    }

    /// Whether the error leaves the session usable (the attempted change was
    /// discarded) rather than requiring a reload.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FitError::InvalidInput { .. }
                | FitError::ProjectionsNotReady { .. }
                | FitError::DegenerateError { .. }
                | FitError::OptimizationFailed { .. }
                | FitError::SessionBusy
        )
    }

    // Constructor helpers for common error patterns

    /// Create an IoRead error.
    pub fn io_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FitError::IoRead {
            path: path.into(),
            source,
        }
    }

    /// Create an IoWrite error.
    pub fn io_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FitError::IoWrite {
            path: path.into(),
            source,
        }
    }

    /// Create a ParseFailed error.
    pub fn parse_failed(path: impl Into<PathBuf>, details: impl Into<String>) -> Self {
        FitError::ParseFailed {
            path: path.into(),
            details: details.into(),
        }
    }

    /// Create a NoCoordinateFieldFound error.
    pub fn no_coordinate_field(domain: &'static str) -> Self {
        FitError::NoCoordinateFieldFound { domain }
    }

    /// Create an EmptyMesh error.
    pub fn empty_mesh(details: impl Into<String>) -> Self {
        FitError::EmptyMesh {
            details: details.into(),
        }
    }

    /// Create an EmptyPointCloud error.
    pub fn empty_point_cloud(details: impl Into<String>) -> Self {
        FitError::EmptyPointCloud {
            details: details.into(),
        }
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(field: &'static str, details: impl Into<String>) -> Self {
        FitError::InvalidInput {
            field,
            details: details.into(),
        }
    }

    /// Create a ProjectionsNotReady error.
    pub fn projections_not_ready(operation: &'static str) -> Self {
        FitError::ProjectionsNotReady { operation }
    }

    /// Create an ObjectiveSetupFailed error.
    pub fn objective_setup_failed(details: impl Into<String>) -> Self {
        FitError::ObjectiveSetupFailed {
            details: details.into(),
        }
    }

    /// Create an OptimizationFailed error.
    pub fn optimization_failed(code: i32, details: impl Into<String>) -> Self {
        FitError::OptimizationFailed {
            code,
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = FitError::projections_not_ready("fit");
        assert_eq!(err.code(), ErrorCode::ProjectionsNotReady);
        assert_eq!(err.code().as_str(), "FIT-3001");

        let err = FitError::no_coordinate_field("mesh");
        assert_eq!(err.code().as_str(), "FIT-2001");
    }

    #[test]
    fn test_error_display() {
        let err = FitError::projections_not_ready("filter_top_error");
        let display = format!("{}", err);
        assert!(display.contains("filter_top_error"));
        assert!(display.contains("projections"));
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(FitError::invalid_input("scale", "must be positive").is_recoverable());
        assert!(FitError::projections_not_ready("fit").is_recoverable());
        assert!(!FitError::empty_mesh("no elements").is_recoverable());
        assert!(!FitError::no_coordinate_field("data cloud").is_recoverable());
    }

    #[test]
    fn test_degenerate_error_reports_value() {
        let err = FitError::DegenerateError { max_error: 0.0 };
        assert_eq!(err.code(), ErrorCode::DegenerateError);
        assert!(format!("{}", err).contains('0'));
    }
}

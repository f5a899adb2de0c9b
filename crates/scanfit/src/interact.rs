//! Interactive drag-to-alignment mappings.
//!
//! The windowing layer owns events and the camera; these pure functions
//! define the contract between a drag gesture and the alignment operations:
//! primary-button drags rotate about an axis derived from the drag
//! direction in the camera's up/right frame, secondary drags pan by the
//! viewport-to-world ratio, and tertiary drags scale uniformly with a lower
//! clamp per step.

use nalgebra::{Vector2, Vector3};

/// Rotation magnitude per pixel of drag distance, in radians.
pub const ROTATION_RADIANS_PER_PIXEL: f64 = 0.002;

/// Scale factor change per pixel of vertical drag.
pub const SCALE_PER_PIXEL: f64 = 0.0005;

/// Lower clamp on the per-step scale factor.
pub const MIN_SCALE_STEP: f64 = 0.9;

/// The camera frame a drag is interpreted in.
#[derive(Debug, Clone, Copy)]
pub struct CameraBasis {
    /// View up vector.
    pub up: Vector3<f64>,
    /// View right vector.
    pub right: Vector3<f64>,
}

/// Map a primary-button drag to an incremental rotation.
///
/// The axis mixes the camera's up and right vectors by the normalized drag
/// direction; the angle is proportional to drag distance. Returns `None`
/// for a zero-length drag.
pub fn rotation_from_drag(
    basis: &CameraBasis,
    delta: Vector2<f64>,
) -> Option<(Vector3<f64>, f64)> {
    let magnitude = delta.norm();
    if magnitude <= 0.0 {
        return None;
    }
    let direction = delta / magnitude;
    let axis = basis.up * direction.x + basis.right * direction.y;
    Some((axis, magnitude * ROTATION_RADIANS_PER_PIXEL))
}

/// Map a secondary-button drag to a world-space pan offset.
///
/// `world_per_pixel` is the viewport-to-world ratio: the viewing-volume
/// height (or width, whichever side of the viewport is shorter) divided by
/// that viewport dimension in pixels.
pub fn pan_from_drag(
    basis: &CameraBasis,
    delta: Vector2<f64>,
    world_per_pixel: f64,
) -> Vector3<f64> {
    basis.right * (world_per_pixel * delta.x) + basis.up * (-world_per_pixel * delta.y)
}

/// Map a tertiary-button drag to a uniform scale multiplier, clamped below
/// at 0.9 per step.
pub fn scale_from_drag(delta_y: f64) -> f64 {
    (1.0 + delta_y * SCALE_PER_PIXEL).max(MIN_SCALE_STEP)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_aligned_basis() -> CameraBasis {
        CameraBasis {
            up: Vector3::y(),
            right: Vector3::x(),
        }
    }

    #[test]
    fn test_horizontal_drag_rotates_about_up() {
        let basis = axis_aligned_basis();
        let (axis, angle) = rotation_from_drag(&basis, Vector2::new(50.0, 0.0)).unwrap();
        assert!((axis - Vector3::y()).norm() < 1e-12);
        assert!((angle - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_vertical_drag_rotates_about_right() {
        let basis = axis_aligned_basis();
        let (axis, _) = rotation_from_drag(&basis, Vector2::new(0.0, 30.0)).unwrap();
        assert!((axis - Vector3::x()).norm() < 1e-12);
    }

    #[test]
    fn test_zero_drag_is_no_rotation() {
        let basis = axis_aligned_basis();
        assert!(rotation_from_drag(&basis, Vector2::zeros()).is_none());
    }

    #[test]
    fn test_pan_follows_right_and_up() {
        let basis = axis_aligned_basis();
        let offset = pan_from_drag(&basis, Vector2::new(10.0, 20.0), 0.5);
        // Screen y grows downward, so a downward drag pans along -up.
        assert!((offset - Vector3::new(5.0, -10.0, 0.0)).norm() < 1e-12);
    }

    #[test]
    fn test_scale_clamps_below() {
        assert!((scale_from_drag(100.0) - 1.05).abs() < 1e-12);
        assert_eq!(scale_from_drag(-10_000.0), MIN_SCALE_STEP);
    }
}

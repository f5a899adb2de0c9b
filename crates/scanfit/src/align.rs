//! Rigid model alignment: rotation, uniform scale, offset, and optional
//! mirror.
//!
//! The live rotation is stored as an orthonormal matrix; Euler angles are
//! derived only for display and persistence, so incremental drag rotations
//! compose in matrix space without accumulating gimbal error.
//!
//! The mirror flag is a pure sign convention on the first matrix row: it is
//! flipped before and after composing an incremental rotation, and negates
//! the first row of the rotation-scale matrix when the transform is applied.
//! Downstream consumers depend on this exact sign behavior.

use nalgebra::{Matrix3, Point3, Rotation3, UnitQuaternion, Vector3};

use crate::error::{FitError, FitResult};

/// The rigid alignment applied to model coordinates while in the align
/// phase: `x' = R·S·x + t` with uniform scale `S` and the mirror convention
/// described at module level.
#[derive(Debug, Clone)]
pub struct AlignmentState {
    rotation: Matrix3<f64>,
    scale: f64,
    offset: Vector3<f64>,
    mirror: bool,
}

impl Default for AlignmentState {
    fn default() -> Self {
        Self::identity()
    }
}

impl AlignmentState {
    /// The identity alignment.
    pub fn identity() -> Self {
        Self {
            rotation: Matrix3::identity(),
            scale: 1.0,
            offset: Vector3::zeros(),
            mirror: false,
        }
    }

    /// Euler angles (roll, pitch, yaw) of the current rotation, for display
    /// and persistence.
    pub fn euler_angles(&self) -> Vector3<f64> {
        let (roll, pitch, yaw) = Rotation3::from_matrix_unchecked(self.rotation).euler_angles();
        Vector3::new(roll, pitch, yaw)
    }

    /// Set the rotation from Euler angles (roll, pitch, yaw).
    pub fn set_euler_angles(&mut self, angles: Vector3<f64>) {
        self.rotation = *Rotation3::from_euler_angles(angles.x, angles.y, angles.z).matrix();
    }

    /// Uniform scale factor.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Set the uniform scale factor. Must be positive.
    pub fn set_scale(&mut self, scale: f64) -> FitResult<()> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(FitError::invalid_input(
                "scale",
                format!("must be a positive finite number, got {}", scale),
            ));
        }
        self.scale = scale;
        Ok(())
    }

    /// Translation offset.
    pub fn offset(&self) -> Vector3<f64> {
        self.offset
    }

    /// Set the translation offset.
    pub fn set_offset(&mut self, offset: Vector3<f64>) {
        self.offset = offset;
    }

    /// Whether the mirror convention is active.
    pub fn mirror(&self) -> bool {
        self.mirror
    }

    /// Set the mirror flag.
    pub fn set_mirror(&mut self, mirror: bool) {
        self.mirror = mirror;
    }

    /// Reset to the identity alignment.
    pub fn reset(&mut self) {
        *self = Self::identity();
    }

    /// The combined rotation-scale matrix, with the first row negated when
    /// mirrored.
    pub fn rotation_scale(&self) -> Matrix3<f64> {
        let mut m = self.rotation * self.scale;
        if self.mirror {
            let negated = -m.row(0);
            m.set_row(0, &negated);
        }
        m
    }

    /// Apply the alignment to a model coordinate.
    #[inline]
    pub fn apply(&self, point: &Point3<f64>) -> Point3<f64> {
        Point3::from(self.rotation_scale() * point.coords + self.offset)
    }

    /// Compose an incremental rotation about `axis` by `angle` radians onto
    /// the current rotation.
    ///
    /// The incremental matrix is left-multiplied so the rotation reads as
    /// applied in view space, independent of the current orientation. When
    /// mirrored, the first row is sign-flipped before and after the
    /// multiplication so the mirror stays a pure sign convention.
    pub fn rotate_by(&mut self, axis: Vector3<f64>, angle: f64) -> FitResult<()> {
        let norm = axis.norm();
        if !(norm.is_finite() && norm > 0.0) || !angle.is_finite() {
            return Err(FitError::invalid_input(
                "rotation",
                "axis must be non-zero and angle finite",
            ));
        }
        let incremental = *UnitQuaternion::from_scaled_axis(axis / norm * angle)
            .to_rotation_matrix()
            .matrix();
        let mut current = self.rotation;
        if self.mirror {
            let negated = -current.row(0);
            current.set_row(0, &negated);
        }
        let mut composed = incremental * current;
        if self.mirror {
            let negated = -composed.row(0);
            composed.set_row(0, &negated);
        }
        self.rotation = composed;
        Ok(())
    }

    /// Accumulate a relative offset.
    pub fn offset_by(&mut self, delta: Vector3<f64>) {
        self.offset += delta;
    }

    /// Multiply the scale by a factor. The factor must be positive.
    pub fn scale_by(&mut self, factor: f64) -> FitResult<()> {
        self.set_scale(self.scale * factor)
    }

    /// Centre the model on the data: overwrite the offset with the
    /// difference of the two bounding-box midpoints.
    pub fn auto_centre_on_data(
        &mut self,
        data_bounds: (Point3<f64>, Point3<f64>),
        model_bounds: (Point3<f64>, Point3<f64>),
    ) {
        let data_centre = (data_bounds.0.coords + data_bounds.1.coords) * 0.5;
        let model_centre = (model_bounds.0.coords + model_bounds.1.coords) * 0.5;
        self.offset = data_centre - model_centre;
    }
}

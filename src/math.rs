use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3};

use crate::error::ReconcileError;

/// Relative tolerance between scale axes before a matrix is rejected as
/// non-uniformly scaled.
pub const SCALE_UNIFORMITY_TOLERANCE: f32 = 0.02;

/// A 4x4 affine transform split into uniform scale, rotation, and translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Srt {
    pub scale: f32,
    pub rotation: Matrix3<f32>,
    pub translation: Vector3<f32>,
}

impl Srt {
    pub fn identity() -> Self {
        Srt {
            scale: 1.0,
            rotation: Matrix3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// Rotation part as a unit quaternion.
    pub fn rotation_quat(&self) -> UnitQuaternion<f32> {
        UnitQuaternion::from_rotation_matrix(&Rotation3::from_matrix_unchecked(self.rotation))
    }
}

/// Splits `matrix` into uniform scale, pure rotation, and translation.
///
/// Per-axis scales are recovered from the row norms of the upper 3x3 block
/// and averaged. If any axis deviates from that mean by more than
/// [`SCALE_UNIFORMITY_TOLERANCE`] relative, the matrix is rejected with
/// [`ReconcileError::NonUniformScale`] naming `name` as the offender.
/// A negative determinant flips the sign of the returned scale so the
/// rotation block keeps determinant +1.
pub fn decompose_srt(matrix: &Matrix4<f32>, name: &str) -> Result<Srt, ReconcileError> {
    let block = matrix.fixed_view::<3, 3>(0, 0).into_owned();
    let gram = block * block.transpose();
    let mut axis_scales = [
        gram[(0, 0)].sqrt(),
        gram[(1, 1)].sqrt(),
        gram[(2, 2)].sqrt(),
    ];
    if block.determinant() < 0.0 {
        for s in &mut axis_scales {
            *s = -*s;
        }
    }
    let scale = (axis_scales[0] + axis_scales[1] + axis_scales[2]) / 3.0;
    let spread = axis_scales
        .iter()
        .fold(0.0f32, |acc, s| acc.max((s - scale).abs()));
    if scale.abs() < 1e-12 || spread > SCALE_UNIFORMITY_TOLERANCE * scale.abs() {
        return Err(ReconcileError::NonUniformScale {
            name: name.to_string(),
            scale: axis_scales,
        });
    }
    Ok(Srt {
        scale,
        rotation: block / scale,
        translation: matrix.fixed_view::<3, 1>(0, 3).into_owned(),
    })
}

/// Reassembles a 4x4 transform from uniform scale, rotation, and translation.
/// Exact inverse of [`decompose_srt`] up to floating point error.
pub fn compose_srt(scale: f32, rotation: &Matrix3<f32>, translation: &Vector3<f32>) -> Matrix4<f32> {
    let mut out = Matrix4::identity();
    out.fixed_view_mut::<3, 3>(0, 0)
        .copy_from(&(rotation * scale));
    out.fixed_view_mut::<3, 1>(0, 3).copy_from(translation);
    out
}

/// Quaternion counterpart of matrix concatenation.
///
/// `cross_quat(a, b)` is the rotation whose matrix equals
/// `b.to_matrix() * a.to_matrix()`, so chains of quaternion products stay
/// consistent with the matrix products used elsewhere in the crate.
pub fn cross_quat(a: &UnitQuaternion<f32>, b: &UnitQuaternion<f32>) -> UnitQuaternion<f32> {
    b * a
}

/// Whether `matrix` is the identity within `tolerance`, measured as the sum
/// of absolute entry differences.
pub fn is_identity(matrix: &Matrix4<f32>, tolerance: f32) -> bool {
    let diff = matrix - Matrix4::identity();
    diff.iter().map(|v| v.abs()).sum::<f32>() <= tolerance
}

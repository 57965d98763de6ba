//! Math utilities and types
//!
//! Provides the vector/matrix aliases used throughout the pipeline plus the
//! handful of transform helpers shared by the position and animation code.
//!
//! Rotations are authored as Euler angles in **degrees** (X, then Y, then Z)
//! because that is what the asset collaborators hand us; conversion to
//! radians happens only when a matrix is built.

pub use nalgebra::{Matrix3, Matrix4, Vector3, Vector4};

/// 3D vector type
pub type Vec3 = Vector3<f32>;

/// 4D vector type
pub type Vec4 = Vector4<f32>;

/// 3x3 matrix type
pub type Mat3 = Matrix3<f32>;

/// 4x4 matrix type
pub type Mat4 = Matrix4<f32>;

/// Tolerance used by [`basically_equal`]
pub const FLOAT_EQUALITY_THRESHOLD: f32 = 1.0e-6;

/// Build a rotation matrix from Euler angles in degrees, applied X then Y then Z.
pub fn rotation_matrix(degrees: &Vec3) -> Mat4 {
    if *degrees == Vec3::zeros() {
        return Mat4::identity();
    }

    let rx = Mat4::from_axis_angle(&Vec3::x_axis(), degrees.x.to_radians());
    let ry = Mat4::from_axis_angle(&Vec3::y_axis(), degrees.y.to_radians());
    let rz = Mat4::from_axis_angle(&Vec3::z_axis(), degrees.z.to_radians());

    rx * ry * rz
}

/// Create a full transformation matrix: rotate and scale, then translate.
///
/// Equivalent to `T * (R * S)`.
pub fn create_transformation(rotation: &Vec3, scale: &Vec3, position: &Vec3) -> Mat4 {
    let r = rotation_matrix(rotation);
    let s = Mat4::new_nonuniform_scaling(scale);
    let t = Mat4::new_translation(position);

    t * (r * s)
}

/// Reduce an angle in degrees into `[0, 360)`.
pub fn wrap_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360 for tiny negative inputs
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Linear interpolation between two vectors.
pub fn lerp(from: &Vec3, to: &Vec3, blend: f32) -> Vec3 {
    from + (to - from) * blend
}

/// Interpolate a single angle (degrees) along the shortest arc.
///
/// When the raw difference is larger than half a turn the target is shifted
/// by a full turn first, so 350 -> 10 passes through 0 instead of 180.
/// The result is reduced back into `[0, 360)`.
pub fn lerp_angle(from: f32, to: f32, blend: f32) -> f32 {
    let mut difference = to - from;

    if difference > 180.0 {
        difference -= 360.0;
    } else if difference < -180.0 {
        difference += 360.0;
    }

    wrap_degrees(from + difference * blend)
}

/// Per-axis [`lerp_angle`] for Euler rotations.
pub fn lerp_rotation(from: &Vec3, to: &Vec3, blend: f32) -> Vec3 {
    Vec3::new(
        lerp_angle(from.x, to.x, blend),
        lerp_angle(from.y, to.y, blend),
        lerp_angle(from.z, to.z, blend),
    )
}

/// Approximate equality for positions.
pub fn basically_equal(a: &Vec3, b: &Vec3) -> bool {
    approx::abs_diff_eq!(*a, *b, epsilon = FLOAT_EQUALITY_THRESHOLD)
}

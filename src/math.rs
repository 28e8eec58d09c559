use glam::{Mat4, Quat, Vec3};

/// Minimum DT between animation keys, in seconds.
///
/// Keys closer together than this encode discontinuities (e.g. converted
/// step segments) and must never be pruned across.
pub const ANIM_DT_MIN: f32 = 2.0 / 120.0;

/// Proportional translation pruning tolerance, squared.
pub const PRUNE_TRANSLATION_PROPORTIONAL_SQ: f32 = 1.0e-4;

/// Absolute translation pruning tolerance, squared.
pub const PRUNE_TRANSLATION_ABSOLUTE_SQ: f32 = 1.0e-8;

/// Rotation pruning tolerance, in radians.
pub const PRUNE_ROTATION_COMPONENT: f32 = 1.0e-3;

/// Componentwise scale pruning tolerance.
pub const PRUNE_SCALE_COMPONENT: f32 = 1.0e-3;

/// Influence weights at or below this are treated as zero.
pub const SKIN_WEIGHT_ZERO_TOL: f32 = 1.0e-4;

/// Scale/rotation/translation triple, the working form of a node transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Srt {
    /// Non-uniform scale.
    pub scale: Vec3,
    /// Unit rotation.
    pub rotation: Quat,
    /// Translation.
    pub translation: Vec3,
}

impl Default for Srt {
    fn default() -> Self {
        Self {
            scale: Vec3::ONE,
            rotation: Quat::IDENTITY,
            translation: Vec3::ZERO,
        }
    }
}

impl Srt {
    /// Composes the triple into a single matrix as `T * R * S`.
    pub fn to_mat4(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.translation)
    }

    /// Decomposes a matrix back into the triple.
    pub fn from_mat4(mat: &Mat4) -> Self {
        let (scale, rotation, translation) = mat.to_scale_rotation_translation();
        Self {
            scale,
            rotation,
            translation,
        }
    }
}

/// Linear blend of two scalars.
pub fn lerp(a: f32, b: f32, s: f32) -> f32 {
    a + (b - a) * s
}

/// Componentwise near-equality against an absolute tolerance.
pub fn nearly_equal(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() <= tol
}

/// Componentwise near-equality for vectors.
pub fn nearly_equal_vec3(a: Vec3, b: Vec3, tol: f32) -> bool {
    nearly_equal(a.x, b.x, tol) && nearly_equal(a.y, b.y, tol) && nearly_equal(a.z, b.z, tol)
}

/// Normalized linear interpolation between quaternions.
///
/// Cheaper than slerp and matches the interpolation model of the target
/// renderer, so pruning error is measured against it.
pub fn nlerp(a: Quat, b: Quat, s: f32) -> Quat {
    // glam's lerp normalizes the blended result.
    a.lerp(b, s)
}

/// Cosine of half the rotation angle between two unit quaternions.
///
/// Negative when `b` lies on the far hemisphere relative to `a`.
pub fn quat_half_cos_delta_angle(a: Quat, b: Quat) -> f32 {
    a.dot(b)
}

/// The rotation angle between two unit quaternions, in `[0, 2π]`.
pub fn quat_delta_angle(a: Quat, b: Quat) -> f32 {
    2.0 * a.dot(b).clamp(-1.0, 1.0).acos()
}

/// The minimum rotation angle between two unit quaternions, treating `q`
/// and `-q` as the same rotation. Result is in `[0, π]`.
pub fn quat_abs_min_delta_angle(a: Quat, b: Quat) -> f32 {
    2.0 * a.dot(b).abs().clamp(0.0, 1.0).acos()
}

/// Flips `v` as `1 - v` for every UV in the slice.
///
/// glTF UVs have the origin at the top-left; USD expects bottom-left.
pub fn flip_vs(uvs: &mut [glam::Vec2]) {
    for uv in uvs {
        uv.y = 1.0 - uv.y;
    }
}

/// Applies a `KHR_texture_transform` affine transform to flipped UVs.
///
/// The transform is specified in glTF's top-left UV space, so it is
/// conjugated with the V flip.
pub fn transform_uvs(
    transform: &ufg_json::extensions::texture::TextureTransform,
    uvs: &mut [glam::Vec2],
) {
    if transform.is_identity() {
        return;
    }
    let sx = transform.scale[0];
    let sy = transform.scale[1];
    let rx = transform.rotation.cos();
    let ry = transform.rotation.sin();
    let tx = transform.offset[0];
    let ty = transform.offset[1];
    let m00 = sx * rx;
    let m01 = -sy * ry;
    let m02 = tx - m01;
    let m10 = sx * ry;
    let m11 = sy * rx;
    let m12 = 1.0 - ty - m11;
    for uv in uvs {
        let u = uv.x;
        let v = uv.y;
        uv.x = u * m00 + v * m01 + m02;
        uv.y = u * m10 + v * m11 + m12;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::PI;

    #[test]
    fn quat_angle_helpers() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_y(PI / 2.0);
        assert_relative_eq!(quat_delta_angle(a, b), PI / 2.0, epsilon = 1e-5);
        assert_relative_eq!(quat_abs_min_delta_angle(a, b), PI / 2.0, epsilon = 1e-5);
        // Negating a quaternion leaves the rotation unchanged.
        assert_relative_eq!(quat_abs_min_delta_angle(a, -b), PI / 2.0, epsilon = 1e-5);
    }

    #[test]
    fn nlerp_normalizes() {
        let a = Quat::IDENTITY;
        let b = Quat::from_rotation_z(1.0);
        let mid = nlerp(a, b, 0.5);
        assert_relative_eq!(mid.length(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn srt_round_trip() {
        let srt = Srt {
            scale: Vec3::new(2.0, 2.0, 2.0),
            rotation: Quat::from_rotation_x(0.4),
            translation: Vec3::new(1.0, -2.0, 3.0),
        };
        let back = Srt::from_mat4(&srt.to_mat4());
        assert_relative_eq!(back.translation.x, 1.0, epsilon = 1e-5);
        assert_relative_eq!(back.scale.x, 2.0, epsilon = 1e-5);
        assert!(quat_abs_min_delta_angle(back.rotation, srt.rotation) < 1e-4);
    }

    #[test]
    fn uv_flip() {
        let mut uvs = [glam::Vec2::new(0.25, 0.25)];
        flip_vs(&mut uvs);
        assert_relative_eq!(uvs[0].y, 0.75);
    }
}

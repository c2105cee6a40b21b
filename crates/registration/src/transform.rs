use nalgebra::{Matrix3, Matrix4, Rotation3, Unit, Vector3};
use scanstitch_core::{Normals, PointCloud};

/// A rotation followed by a translation: `p' = R * p + t`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    pub rotation: [[f32; 3]; 3],
    pub translation: [f32; 3],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub fn identity() -> Self {
        Self {
            rotation: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
            translation: [0.0, 0.0, 0.0],
        }
    }

    pub fn from_translation(translation: [f32; 3]) -> Self {
        Self {
            translation,
            ..Self::identity()
        }
    }

    /// Rotation by `degrees` about the line through `origin` along
    /// `direction` (right-handed). A zero-length direction gives identity.
    pub fn rotation_about_axis(origin: [f32; 3], direction: [f32; 3], degrees: f32) -> Self {
        let dir = Vector3::new(direction[0], direction[1], direction[2]);
        let Some(axis) = Unit::try_new(dir, f32::EPSILON) else {
            return Self::identity();
        };
        let r = Rotation3::from_axis_angle(&axis, degrees.to_radians()).into_inner();
        let o = Vector3::new(origin[0], origin[1], origin[2]);
        let t = o - r * o;
        Self {
            rotation: mat3_to_arrays(&r),
            translation: [t[0], t[1], t[2]],
        }
    }

    pub fn is_identity(&self, eps: f32) -> bool {
        let id = Self::identity();
        for r in 0..3 {
            for c in 0..3 {
                if (self.rotation[r][c] - id.rotation[r][c]).abs() > eps {
                    return false;
                }
            }
        }
        self.translation.iter().all(|t| t.abs() <= eps)
    }

    /// Apply the rigid transform to a single point: R * p + t
    pub fn apply_to_point(&self, p: &[f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        let t = &self.translation;
        [
            r[0][0] * p[0] + r[0][1] * p[1] + r[0][2] * p[2] + t[0],
            r[1][0] * p[0] + r[1][1] * p[1] + r[1][2] * p[2] + t[1],
            r[2][0] * p[0] + r[2][1] * p[1] + r[2][2] * p[2] + t[2],
        ]
    }

    /// Rotate a direction vector (no translation).
    pub fn apply_to_vector(&self, v: &[f32; 3]) -> [f32; 3] {
        let r = &self.rotation;
        [
            r[0][0] * v[0] + r[0][1] * v[1] + r[0][2] * v[2],
            r[1][0] * v[0] + r[1][1] * v[1] + r[1][2] * v[2],
            r[2][0] * v[0] + r[2][1] * v[1] + r[2][2] * v[2],
        ]
    }

    /// Compose two transforms: apply `self` first, then `other`.
    ///
    /// Result: R_new = other.R * self.R, t_new = other.R * self.t + other.t
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        let r_self = mat3_from_arrays(&self.rotation);
        let r_other = mat3_from_arrays(&other.rotation);
        let t_self = Vector3::from(self.translation);
        let t_other = Vector3::from(other.translation);

        let r_new = r_other * r_self;
        let t_new = r_other * t_self + t_other;

        RigidTransform {
            rotation: mat3_to_arrays(&r_new),
            translation: [t_new[0], t_new[1], t_new[2]],
        }
    }

    /// The inverse transform: R^T, -R^T * t.
    pub fn inverse(&self) -> RigidTransform {
        let rt = mat3_from_arrays(&self.rotation).transpose();
        let t = -(rt * Vector3::from(self.translation));
        RigidTransform {
            rotation: mat3_to_arrays(&rt),
            translation: [t[0], t[1], t[2]],
        }
    }

    /// Rotation magnitude in degrees, in `[0, 180]`.
    pub fn rotation_angle_degrees(&self) -> f32 {
        let r = &self.rotation;
        let cos = ((r[0][0] + r[1][1] + r[2][2] - 1.0) * 0.5).clamp(-1.0, 1.0);
        cos.acos().to_degrees()
    }

    pub fn translation_norm(&self) -> f32 {
        Vector3::from(self.translation).norm()
    }

    /// 4x4 homogeneous matrix.
    #[rustfmt::skip]
    pub fn to_matrix4(&self) -> Matrix4<f32> {
        let r = &self.rotation;
        let t = &self.translation;
        Matrix4::new(
            r[0][0], r[0][1], r[0][2], t[0],
            r[1][0], r[1][1], r[1][2], t[1],
            r[2][0], r[2][1], r[2][2], t[2],
            0.0, 0.0, 0.0, 1.0,
        )
    }

    /// Take the upper 3x4 block of a homogeneous matrix. The bottom row is
    /// assumed to be `[0, 0, 0, 1]`.
    pub fn from_matrix4(m: &Matrix4<f32>) -> Self {
        Self {
            rotation: [
                [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
                [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
                [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
            ],
            translation: [m[(0, 3)], m[(1, 3)], m[(2, 3)]],
        }
    }

    pub(crate) fn from_matrix3_f64(r: &Matrix3<f64>, t: &Vector3<f64>) -> Self {
        Self {
            rotation: [
                [r[(0, 0)] as f32, r[(0, 1)] as f32, r[(0, 2)] as f32],
                [r[(1, 0)] as f32, r[(1, 1)] as f32, r[(1, 2)] as f32],
                [r[(2, 0)] as f32, r[(2, 1)] as f32, r[(2, 2)] as f32],
            ],
            translation: [t[0] as f32, t[1] as f32, t[2] as f32],
        }
    }
}

/// Apply a rigid transform to every point of a cloud.
///
/// Colors and intensity are carried over unchanged; normals are rotated
/// (flagged normals stay flagged).
pub fn apply_transform(cloud: &PointCloud, transform: &RigidTransform) -> PointCloud {
    let n = cloud.len();
    let mut x = Vec::with_capacity(n);
    let mut y = Vec::with_capacity(n);
    let mut z = Vec::with_capacity(n);

    for p in cloud.iter_points() {
        let tp = transform.apply_to_point(&p);
        x.push(tp[0]);
        y.push(tp[1]);
        z.push(tp[2]);
    }

    let mut out = PointCloud::from_xyz(x, y, z);
    out.colors = cloud.colors.clone();
    out.intensity = cloud.intensity.clone();
    out.normals = cloud.normals.as_ref().map(|normals| {
        let mut rotated = Normals::with_capacity(normals.len());
        for i in 0..normals.len() {
            rotated.push(transform.apply_to_vector(&normals.get(i)));
        }
        rotated
    });
    out
}

fn mat3_to_arrays(m: &Matrix3<f32>) -> [[f32; 3]; 3] {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

fn mat3_from_arrays(a: &[[f32; 3]; 3]) -> Matrix3<f32> {
    Matrix3::new(
        a[0][0], a[0][1], a[0][2], a[1][0], a[1][1], a[1][2], a[2][0], a[2][1], a[2][2],
    )
}

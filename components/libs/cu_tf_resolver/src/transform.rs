//! Rigid body transform algebra.
//!
//! Transforms rest as a translation plus an (x, y, z, w) quaternion, exactly as
//! recorded. Composition and inversion go through homogeneous 4x4 matrices.
//! Quaternions are never normalized: a non unit rotation coming from the log
//! is carried as-is into every composed result.

use crate::time::RosTime;
use glam::{DMat3, DMat4, DQuat, DVec3, EulerRot};
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// Pose of a child frame expressed in its parent frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RigidTransform {
    pub translation: [f64; 3],
    /// Quaternion in (x, y, z, w) order.
    pub rotation: [f64; 4],
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl RigidTransform {
    pub const IDENTITY_ROTATION: [f64; 4] = [0.0, 0.0, 0.0, 1.0];

    pub fn new(translation: [f64; 3], rotation: [f64; 4]) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn identity() -> Self {
        Self::new([0.0; 3], Self::IDENTITY_ROTATION)
    }

    pub fn from_translation(x: f64, y: f64, z: f64) -> Self {
        Self::new([x, y, z], Self::IDENTITY_ROTATION)
    }

    pub fn quaternion(&self) -> DQuat {
        let [x, y, z, w] = self.rotation;
        DQuat::from_xyzw(x, y, z, w)
    }

    /// Homogeneous matrix of this transform, column major.
    pub fn to_matrix(&self) -> DMat4 {
        DMat4::from_rotation_translation(self.quaternion(), DVec3::from_array(self.translation))
    }

    /// Splits a homogeneous matrix back into translation and quaternion.
    pub fn from_matrix(mat: &DMat4) -> Self {
        let rotation = DQuat::from_mat3(&DMat3::from_mat4(*mat));
        Self::new(mat.w_axis.truncate().to_array(), rotation.to_array())
    }

    /// Exact matrix inverse, no rigid body shortcut.
    pub fn inverse(&self) -> Self {
        Self::from_matrix(&self.to_matrix().inverse())
    }

    pub fn compose(&self, rhs: &RigidTransform) -> Self {
        Self::from_matrix(&(self.to_matrix() * rhs.to_matrix()))
    }

    /// Roll, pitch, yaw in radians, extrinsic x then y then z.
    pub fn euler(&self) -> [f64; 3] {
        let (yaw, pitch, roll) = self.quaternion().to_euler(EulerRot::ZYX);
        [roll, pitch, yaw]
    }

    pub fn abs_diff_eq(&self, other: &RigidTransform, max_abs_diff: f64) -> bool {
        self.to_matrix().abs_diff_eq(other.to_matrix(), max_abs_diff)
    }
}

impl Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> RigidTransform {
        self.compose(&rhs)
    }
}

impl Mul for &RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: &RigidTransform) -> RigidTransform {
        self.compose(rhs)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct StampedTransform {
    pub stamp: RosTime,
    pub transform: RigidTransform,
}

impl StampedTransform {
    pub fn new(stamp: RosTime, transform: RigidTransform) -> Self {
        Self { stamp, transform }
    }
}

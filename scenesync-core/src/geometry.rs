//! Vector math and axis constraints shared by the scene and the operation record.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

/// 3D vector in scene units.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };
    pub const ONE: Vec3 = Vec3 { x: 1.0, y: 1.0, z: 1.0 };

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3 {
            x: self.y * other.z - self.z * other.y,
            y: self.z * other.x - self.x * other.z,
            z: self.x * other.y - self.y * other.x,
        }
    }

    pub fn length(&self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector in the same direction, or `None` for a zero vector.
    pub fn normalized(&self) -> Option<Vec3> {
        let len = self.length();
        if len <= f64::EPSILON {
            return None;
        }
        Some(*self * (1.0 / len))
    }

    /// Component-wise product.
    pub fn scaled_by(&self, factors: &Vec3) -> Vec3 {
        Vec3 {
            x: self.x * factors.x,
            y: self.y * factors.y,
            z: self.z * factors.z,
        }
    }

    /// Rotate around a unit `axis` by `angle` radians (Rodrigues' formula).
    pub fn rotated(&self, axis: &Vec3, angle: f64) -> Vec3 {
        let (sin, cos) = angle.sin_cos();
        *self * cos + axis.cross(self) * sin + *axis * (axis.dot(self) * (1.0 - cos))
    }

    pub fn approx_eq(&self, other: &Vec3, eps: f64) -> bool {
        (self.x - other.x).abs() <= eps
            && (self.y - other.y).abs() <= eps
            && (self.z - other.z).abs() <= eps
    }

    /// Arithmetic mean of a set of points (`None` when empty).
    pub fn centroid<'a>(points: impl IntoIterator<Item = &'a Vec3>) -> Option<Vec3> {
        let mut sum = Vec3::ZERO;
        let mut count = 0usize;
        for p in points {
            sum += *p;
            count += 1;
        }
        (count > 0).then(|| sum * (1.0 / count as f64))
    }
}

impl Add for Vec3 {
    type Output = Vec3;

    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl AddAssign for Vec3 {
    fn add_assign(&mut self, rhs: Vec3) {
        *self = *self + rhs;
    }
}

impl Sub for Vec3 {
    type Output = Vec3;

    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;

    fn mul(self, rhs: f64) -> Vec3 {
        Vec3::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Unit quaternion for entity orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    pub const IDENTITY: Quat = Quat { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    /// `axis` must be unit length.
    pub fn from_axis_angle(axis: &Vec3, angle: f64) -> Self {
        let (sin, cos) = (angle * 0.5).sin_cos();
        Self { w: cos, x: axis.x * sin, y: axis.y * sin, z: axis.z * sin }
    }

    /// Hamilton product: `self` applied after `rhs`.
    pub fn then(&self, rhs: &Quat) -> Quat {
        let (a, b) = (self, rhs);
        Quat {
            w: a.w * b.w - a.x * b.x - a.y * b.y - a.z * b.z,
            x: a.w * b.x + a.x * b.w + a.y * b.z - a.z * b.y,
            y: a.w * b.y - a.x * b.z + a.y * b.w + a.z * b.x,
            z: a.w * b.z + a.x * b.y - a.y * b.x + a.z * b.w,
        }
    }

    pub fn approx_eq(&self, other: &Quat, eps: f64) -> bool {
        (self.w - other.w).abs() <= eps
            && (self.x - other.x).abs() <= eps
            && (self.y - other.y).abs() <= eps
            && (self.z - other.z).abs() <= eps
    }
}

/// Per-axis constraint flags recorded with a transform.
///
/// With no axis set the transform is unconstrained and applies on all
/// three axes; otherwise only the flagged axes are affected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AxisMask {
    pub caxis_x: bool,
    pub caxis_y: bool,
    pub caxis_z: bool,
}

impl AxisMask {
    pub const NONE: AxisMask = AxisMask { caxis_x: false, caxis_y: false, caxis_z: false };

    pub const fn new(x: bool, y: bool, z: bool) -> Self {
        Self { caxis_x: x, caxis_y: y, caxis_z: z }
    }

    /// Whether any axis constraint is set.
    pub fn is_constrained(&self) -> bool {
        self.caxis_x || self.caxis_y || self.caxis_z
    }

    /// Zero out the unconstrained components of an offset.
    pub fn mask_offset(&self, v: Vec3) -> Vec3 {
        if !self.is_constrained() {
            return v;
        }
        Vec3::new(
            if self.caxis_x { v.x } else { 0.0 },
            if self.caxis_y { v.y } else { 0.0 },
            if self.caxis_z { v.z } else { 0.0 },
        )
    }

    /// Replace unconstrained scale factors with identity.
    pub fn mask_factors(&self, v: Vec3) -> Vec3 {
        if !self.is_constrained() {
            return v;
        }
        Vec3::new(
            if self.caxis_x { v.x } else { 1.0 },
            if self.caxis_y { v.y } else { 1.0 },
            if self.caxis_z { v.z } else { 1.0 },
        )
    }

    /// Rotation axis after constraints: the unit vector of the constrained
    /// axes if any are set, otherwise the recorded axis.
    pub fn rotation_axis(&self, axis: Vec3) -> Option<Vec3> {
        if self.is_constrained() {
            Vec3::new(
                f64::from(u8::from(self.caxis_x)),
                f64::from(u8::from(self.caxis_y)),
                f64::from(u8::from(self.caxis_z)),
            )
            .normalized()
        } else {
            axis.normalized()
        }
    }
}

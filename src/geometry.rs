use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Index, Mul, Neg, Sub, SubAssign};

/**
 * A 3D vector. Lower-dimensional problems leave the trailing components at
 * zero.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3d(pub f64, pub f64, pub f64);

// ============================================================================
impl Vector3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Vector3d(x, y, z)
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.0 * other.0 + self.1 * other.1 + self.2 * other.2
    }

    pub fn norm_squared(&self) -> f64 {
        self.dot(self)
    }

    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Return a unit vector along this one, or the zero vector if this
    /// vector has zero length.
    pub fn normalized(&self) -> Self {
        let norm = self.norm();
        if norm == 0.0 {
            Self::zero()
        } else {
            *self / norm
        }
    }

    pub fn component(&self, direction: Direction) -> f64 {
        match direction {
            Direction::I => self.0,
            Direction::J => self.1,
            Direction::K => self.2,
        }
    }
}

/**
 * Enum to hold a unit vector in 3D space
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    I,
    J,
    K,
}

// ============================================================================
impl Direction {
    pub const ALL: [Direction; 3] = [Direction::I, Direction::J, Direction::K];

    pub fn along(&self, other: Direction) -> f64 {
        match (self, other) {
            (Direction::I, Direction::I) => 1.0,
            (Direction::J, Direction::J) => 1.0,
            (Direction::K, Direction::K) => 1.0,
            _ => 0.0,
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Direction::I => 0,
            Direction::J => 1,
            Direction::K => 2,
        }
    }
}

// ============================================================================
impl Add for Vector3d {
    type Output = Self;
    fn add(self, v: Self) -> Self {
        Self(self.0 + v.0, self.1 + v.1, self.2 + v.2)
    }
}

impl Sub for Vector3d {
    type Output = Self;
    fn sub(self, v: Self) -> Self {
        Self(self.0 - v.0, self.1 - v.1, self.2 - v.2)
    }
}

impl Mul<f64> for Vector3d {
    type Output = Self;
    fn mul(self, a: f64) -> Self {
        Self(self.0 * a, self.1 * a, self.2 * a)
    }
}

impl Div<f64> for Vector3d {
    type Output = Self;
    fn div(self, a: f64) -> Self {
        Self(self.0 / a, self.1 / a, self.2 / a)
    }
}

impl Neg for Vector3d {
    type Output = Self;
    fn neg(self) -> Self {
        Self(-self.0, -self.1, -self.2)
    }
}

impl AddAssign for Vector3d {
    fn add_assign(&mut self, v: Self) {
        *self = *self + v
    }
}

impl SubAssign for Vector3d {
    fn sub_assign(&mut self, v: Self) {
        *self = *self - v
    }
}

impl Index<usize> for Vector3d {
    type Output = f64;
    fn index(&self, k: usize) -> &f64 {
        match k {
            0 => &self.0,
            1 => &self.1,
            _ => &self.2,
        }
    }
}

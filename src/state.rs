use crate::geometry::Vector3d;
use std::fmt::Debug;
use std::ops::{Add, AddAssign, Div, Index, IndexMut, Mul, MulAssign, Neg, Sub, SubAssign};

/**
 * A fixed-size tuple of `f64` components that can be stored per node (or per
 * graph entry) in a `MultiComponentVector` or `SparseMatrix`.
 */
pub trait Tensor: Copy + Default + Send + Sync + 'static {
    /// The number of scalar components. May be zero, in which case storage
    /// and ghost exchange of the quantity are skipped.
    const NUM_FIELDS: usize;

    fn component(&self, k: usize) -> f64;

    fn set_component(&mut self, k: usize, value: f64);
}

/**
 * A conserved state with the vector space operations used by the update
 * loops.
 */
pub trait ConservedState:
    Tensor
    + Debug
    + PartialEq
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<f64, Output = Self>
    + Div<f64, Output = Self>
    + Neg<Output = Self>
    + AddAssign
    + SubAssign
    + MulAssign<f64>
{
}

impl<T> ConservedState for T where
    T: Tensor
        + Debug
        + PartialEq
        + Add<Output = Self>
        + Sub<Output = Self>
        + Mul<f64, Output = Self>
        + Div<f64, Output = Self>
        + Neg<Output = Self>
        + AddAssign
        + SubAssign
        + MulAssign<f64>
{
}

/**
 * One row of a flux per spatial direction.
 */
pub type FluxTensor<S> = [S; 3];

/// Contract a flux tensor with a geometric coefficient vector:
/// `f[0] c_0 + f[1] c_1 + f[2] c_2`.
pub fn contract<S: ConservedState>(flux: &FluxTensor<S>, c: &Vector3d) -> S {
    flux[0] * c.0 + flux[1] * c.1 + flux[2] * c.2
}

/**
 * A state vector with `N` components.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct State<const N: usize>(pub [f64; N]);

// ============================================================================
impl<const N: usize> State<N> {
    pub fn new(components: [f64; N]) -> Self {
        Self(components)
    }

    pub fn zero() -> Self {
        Self([0.0; N])
    }

    pub fn iter(&self) -> impl Iterator<Item = &f64> {
        self.0.iter()
    }

    pub fn map<F: Fn(f64) -> f64>(&self, f: F) -> Self {
        let mut result = *self;
        for x in result.0.iter_mut() {
            *x = f(*x)
        }
        result
    }

    pub fn dot(&self, other: &Self) -> f64 {
        self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum()
    }
}

impl<const N: usize> Default for State<N> {
    fn default() -> Self {
        Self::zero()
    }
}

impl<const N: usize> Tensor for State<N> {
    const NUM_FIELDS: usize = N;

    fn component(&self, k: usize) -> f64 {
        self.0[k]
    }

    fn set_component(&mut self, k: usize, value: f64) {
        self.0[k] = value
    }
}

impl<const N: usize> Index<usize> for State<N> {
    type Output = f64;
    fn index(&self, k: usize) -> &f64 {
        &self.0[k]
    }
}

impl<const N: usize> IndexMut<usize> for State<N> {
    fn index_mut(&mut self, k: usize) -> &mut f64 {
        &mut self.0[k]
    }
}

// ============================================================================
impl<const N: usize> Add for State<N> {
    type Output = Self;
    fn add(mut self, u: Self) -> Self {
        self += u;
        self
    }
}

impl<const N: usize> Sub for State<N> {
    type Output = Self;
    fn sub(mut self, u: Self) -> Self {
        self -= u;
        self
    }
}

impl<const N: usize> Mul<f64> for State<N> {
    type Output = Self;
    fn mul(mut self, a: f64) -> Self {
        self *= a;
        self
    }
}

impl<const N: usize> Mul<State<N>> for f64 {
    type Output = State<N>;
    fn mul(self, u: State<N>) -> State<N> {
        u * self
    }
}

impl<const N: usize> Div<f64> for State<N> {
    type Output = Self;
    fn div(self, a: f64) -> Self {
        self.map(|x| x / a)
    }
}

impl<const N: usize> Neg for State<N> {
    type Output = Self;
    fn neg(self) -> Self {
        self.map(|x| -x)
    }
}

impl<const N: usize> AddAssign for State<N> {
    fn add_assign(&mut self, u: Self) {
        for (a, b) in self.0.iter_mut().zip(u.0.iter()) {
            *a += b
        }
    }
}

impl<const N: usize> SubAssign for State<N> {
    fn sub_assign(&mut self, u: Self) {
        for (a, b) in self.0.iter_mut().zip(u.0.iter()) {
            *a -= b
        }
    }
}

impl<const N: usize> MulAssign<f64> for State<N> {
    fn mul_assign(&mut self, a: f64) {
        for x in self.0.iter_mut() {
            *x *= a
        }
    }
}

// ============================================================================
impl Tensor for f64 {
    const NUM_FIELDS: usize = 1;

    fn component(&self, _: usize) -> f64 {
        *self
    }

    fn set_component(&mut self, _: usize, value: f64) {
        *self = value
    }
}

impl<const N: usize> Tensor for [f64; N]
where
    [f64; N]: Default,
{
    const NUM_FIELDS: usize = N;

    fn component(&self, k: usize) -> f64 {
        self[k]
    }

    fn set_component(&mut self, k: usize, value: f64) {
        self[k] = value
    }
}

impl Tensor for Vector3d {
    const NUM_FIELDS: usize = 3;

    fn component(&self, k: usize) -> f64 {
        self[k]
    }

    fn set_component(&mut self, k: usize, value: f64) {
        match k {
            0 => self.0 = value,
            1 => self.1 = value,
            _ => self.2 = value,
        }
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{contract, State};
    use crate::geometry::Vector3d;

    #[test]
    fn contraction_weights_each_direction() {
        let f = [
            State([1.0, 2.0]),
            State([10.0, 20.0]),
            State([100.0, 200.0]),
        ];
        let c = Vector3d::new(1.0, 0.5, 0.0);
        assert_eq!(contract(&f, &c), State([6.0, 12.0]));
    }

    #[test]
    fn scalar_multiplication_commutes() {
        let u = State([1.0, -2.0, 3.0]);
        assert_eq!(2.0 * u, u * 2.0);
        assert_eq!(-u + u, State::zero());
    }
}

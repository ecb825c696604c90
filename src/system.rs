//! The interface between the graph-based update and a concrete hyperbolic
//! system. Every model supplies its state layout, its flux, and three
//! per-worker helpers (signal-speed estimate, smoothness indicator and
//! convex limiter). The update code is generic over the model, so all of
//! this resolves at compile time.

use crate::geometry::Vector3d;
use crate::offline_data::Boundary;
use crate::state::{ConservedState, FluxTensor, Tensor};
use crate::storage::MultiComponentVector;

/**
 * Read-only per-node data a model may consult while evaluating fluxes,
 * indicators and bounds.
 */
pub struct ModelData<'a, S: HyperbolicSystem> {
    pub precomputed: &'a MultiComponentVector<S::Precomputed>,
    pub precomputed_initial: &'a MultiComponentVector<S::PrecomputedInitial>,
}

impl<'a, S: HyperbolicSystem> Clone for ModelData<'a, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, S: HyperbolicSystem> Copy for ModelData<'a, S> {}

/**
 * Parameters handed to every limiter instance.
 */
#[derive(Clone, Copy, Debug)]
pub struct LimiterParameters {
    pub relaxation_factor: f64,
    pub relaxation_exponent: f64,
    pub newton_tolerance: f64,
    pub newton_max_iterations: usize,
    pub dim: usize,
}

impl LimiterParameters {
    /// The node-size dependent relative relaxation of the bounds,
    /// `factor * hd_i^(exponent / dim)`.
    pub fn relaxation(&self, hd_i: f64) -> f64 {
        self.relaxation_factor * hd_i.powf(self.relaxation_exponent / self.dim.max(1) as f64)
    }
}

/**
 * Upper bound on the maximal wave speed of the 1D Riemann problem between
 * two states, projected onto a unit direction.
 */
pub trait RiemannSolver<S: HyperbolicSystem> {
    fn compute(&self, u_i: &S::State, u_j: &S::State, i: usize, j: usize, n_ij: &Vector3d) -> f64;
}

/**
 * Accumulator producing the per-node blending coefficient `alpha` in
 * `[0, 1]`. The high-order viscosity of an edge is `d_ij (alpha_i +
 * alpha_j) / 2`, so one keeps the full low-order viscosity and zero drops
 * it where the solution is smooth.
 */
pub trait Indicator<S: HyperbolicSystem> {
    fn reset(&mut self, i: usize, u_i: &S::State);

    fn accumulate(&mut self, j: usize, u_j: &S::State, c_ij: &Vector3d);

    fn alpha(&self, hd_i: f64) -> f64;
}

/**
 * Accumulator for the local bounds of a node, and the line search that
 * finds the largest admissible fraction of an antidiffusive flux.
 */
pub trait Limiter<S: HyperbolicSystem> {
    /// Start accumulating bounds for node `i`. `affine_shift` is the
    /// already scaled sum of the model's affine shift over the stencil.
    fn reset(
        &mut self,
        i: usize,
        u_i: &S::State,
        flux_i: &S::FluxContribution,
        affine_shift: &S::State,
    );

    /// Fold in the neighbor `j` (the diagonal included). `scaled_c_ij` is
    /// `c_ij / d_ij`.
    fn accumulate(
        &mut self,
        j: usize,
        u_j: &S::State,
        flux_j: &S::FluxContribution,
        scaled_c_ij: &Vector3d,
        beta_ij: f64,
    );

    /// The relaxed bounds of the current node.
    fn bounds(&self, hd_i: f64) -> S::Bounds;

    /// Return the largest `l` in `[0, 1]` such that `u + l p` satisfies
    /// `bounds`, and whether `u` itself satisfied them.
    fn limit(&self, bounds: &S::Bounds, u: &S::State, p: &S::State) -> (f64, bool);
}

/**
 * A hyperbolic system of conservation laws.
 */
pub trait HyperbolicSystem: Sync + Sized {
    type State: ConservedState;
    type Precomputed: Tensor;
    type PrecomputedInitial: Tensor;
    type FluxContribution: Copy + Send + Sync;
    type Bounds: Tensor;

    type RiemannSolver<'a>: RiemannSolver<Self>
    where
        Self: 'a;
    type Indicator<'a>: Indicator<Self>
    where
        Self: 'a;
    type Limiter<'a>: Limiter<Self>
    where
        Self: 'a;

    const HAVE_HIGH_ORDER_FLUX: bool = false;
    const HAVE_SOURCE_TERMS: bool = false;
    const HAVE_EQUILIBRATED_STATES: bool = false;

    fn riemann_solver<'a>(&'a self, data: ModelData<'a, Self>) -> Self::RiemannSolver<'a>;

    fn indicator<'a>(&'a self, data: ModelData<'a, Self>, evc_factor: f64) -> Self::Indicator<'a>;

    fn limiter<'a>(
        &'a self,
        data: ModelData<'a, Self>,
        parameters: LimiterParameters,
    ) -> Self::Limiter<'a>;

    fn precompute(&self, u: &Self::State) -> Self::Precomputed;

    fn is_admissible(&self, u: &Self::State) -> bool;

    fn flux_contribution(
        &self,
        data: &ModelData<Self>,
        i: usize,
        u: &Self::State,
    ) -> Self::FluxContribution;

    /// The low-order flux between two nodes, with the sign convention
    /// `-(f(u_i) + f(u_j))`.
    fn flux(
        &self,
        flux_i: &Self::FluxContribution,
        flux_j: &Self::FluxContribution,
    ) -> FluxTensor<Self::State>;

    fn high_order_flux(
        &self,
        flux_i: &Self::FluxContribution,
        flux_j: &Self::FluxContribution,
    ) -> FluxTensor<Self::State> {
        self.flux(flux_i, flux_j)
    }

    /// The states `(U*_ij, U*_ji)` entering the graph viscosity. Models
    /// without equilibria use the plain states.
    fn equilibrated_states(
        &self,
        u_i: &Self::State,
        u_j: &Self::State,
        _flux_i: &Self::FluxContribution,
        _flux_j: &Self::FluxContribution,
    ) -> (Self::State, Self::State) {
        (*u_i, *u_j)
    }

    fn affine_shift(
        &self,
        _flux_i: &Self::FluxContribution,
        _flux_j: &Self::FluxContribution,
        _c_ij: &Vector3d,
        _d_ij: f64,
    ) -> Self::State {
        Self::State::default()
    }

    fn low_order_source(
        &self,
        _data: &ModelData<Self>,
        _i: usize,
        _u: &Self::State,
        _tau: f64,
    ) -> Self::State {
        Self::State::default()
    }

    fn high_order_source(
        &self,
        data: &ModelData<Self>,
        i: usize,
        u: &Self::State,
        tau: f64,
    ) -> Self::State {
        self.low_order_source(data, i, u, tau)
    }

    /// Apply a boundary condition of the given kind to a boundary state.
    /// `prescribed` lazily evaluates the externally prescribed state.
    fn apply_boundary_condition<F>(
        &self,
        kind: Boundary,
        u: Self::State,
        normal: &Vector3d,
        prescribed: F,
    ) -> Self::State
    where
        F: FnOnce() -> Self::State;
}

/**
 * Source of prescribed states: initial data, and boundary data at later
 * times.
 */
pub trait InitialValues<S: HyperbolicSystem>: Sync {
    fn initial_state(&self, position: &Vector3d, t: f64) -> S::State;

    fn initial_precomputed(&self, _position: &Vector3d) -> S::PrecomputedInitial {
        S::PrecomputedInitial::default()
    }
}

impl<S, F> InitialValues<S> for F
where
    S: HyperbolicSystem,
    F: Fn(&Vector3d, f64) -> S::State + Sync,
{
    fn initial_state(&self, position: &Vector3d, t: f64) -> S::State {
        self(position, t)
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::LimiterParameters;

    #[test]
    fn relaxation_scales_with_node_size() {
        let parameters = |exponent: f64, dim: usize| LimiterParameters {
            relaxation_factor: 2.0,
            relaxation_exponent: exponent,
            newton_tolerance: 1e-10,
            newton_max_iterations: 2,
            dim,
        };
        assert!((parameters(1.5, 1).relaxation(0.01) - 2e-3).abs() < 1e-15);
        assert!((parameters(3.0, 2).relaxation(0.01) - 2e-3).abs() < 1e-15);
        assert!((parameters(1.0, 1).relaxation(0.01) - 2e-2).abs() < 1e-15);
    }
}

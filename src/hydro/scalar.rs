use crate::geometry::Vector3d;
use crate::offline_data::Boundary;
use crate::state::{contract, FluxTensor, State};
use crate::system::{
    HyperbolicSystem, Indicator, Limiter, LimiterParameters, ModelData, RiemannSolver,
};
use serde::{Deserialize, Serialize};

pub type Conserved = State<1>;

/**
 * Flux functions of a scalar conservation law `u_t + div f(u) = 0`.
 */
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScalarFlux {
    /// `f(u) = a u`
    Linear { velocity: Vector3d },
    /// `f(u) = 1/2 u^2 d`
    Burgers { direction: Vector3d },
}

impl ScalarFlux {
    pub fn f(&self, u: f64) -> Vector3d {
        match self {
            Self::Linear { velocity } => *velocity * u,
            Self::Burgers { direction } => *direction * (0.5 * u * u),
        }
    }

    pub fn df(&self, u: f64) -> Vector3d {
        match self {
            Self::Linear { velocity } => *velocity,
            Self::Burgers { direction } => *direction * u,
        }
    }

    /// Entropy flux for the entropy `1/2 u^2`.
    pub fn entropy_flux(&self, u: f64) -> Vector3d {
        match self {
            Self::Linear { velocity } => *velocity * (0.5 * u * u),
            Self::Burgers { direction } => *direction * (u * u * u / 3.0),
        }
    }
}

// ============================================================================
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScalarSystem {
    pub flux: ScalarFlux,
}

impl Default for ScalarSystem {
    fn default() -> Self {
        Self {
            flux: ScalarFlux::Burgers {
                direction: Vector3d::new(1.0, 0.0, 0.0),
            },
        }
    }
}

impl ScalarSystem {
    pub fn new(flux: ScalarFlux) -> Self {
        Self { flux }
    }

    fn f(&self, u: &Conserved) -> FluxTensor<Conserved> {
        let f = self.flux.f(u[0]);
        [State([f.0]), State([f.1]), State([f.2])]
    }
}

impl HyperbolicSystem for ScalarSystem {
    type State = Conserved;
    type Precomputed = f64;
    type PrecomputedInitial = State<0>;
    type FluxContribution = FluxTensor<Conserved>;
    type Bounds = [f64; 2];

    type RiemannSolver<'a> = ScalarRiemannSolver<'a>;
    type Indicator<'a> = ScalarIndicator<'a>;
    type Limiter<'a> = ScalarLimiter<'a>;

    fn riemann_solver<'a>(&'a self, _data: ModelData<'a, Self>) -> ScalarRiemannSolver<'a> {
        ScalarRiemannSolver { system: self }
    }

    fn indicator<'a>(&'a self, data: ModelData<'a, Self>, evc_factor: f64) -> ScalarIndicator<'a> {
        ScalarIndicator {
            system: self,
            data,
            evc_factor,
            eta_i: 0.0,
            d_eta_i: 0.0,
            left: 0.0,
            right: 0.0,
        }
    }

    fn limiter<'a>(&'a self, _data: ModelData<'a, Self>, parameters: LimiterParameters) -> ScalarLimiter<'a> {
        ScalarLimiter {
            system: self,
            parameters,
            u_i: State::zero(),
            flux_i: Default::default(),
            u_min: f64::MAX,
            u_max: f64::MIN,
            relaxation_numerator: 0.0,
            relaxation_denominator: 0.0,
        }
    }

    fn precompute(&self, u: &Conserved) -> f64 {
        0.5 * u[0] * u[0]
    }

    fn is_admissible(&self, u: &Conserved) -> bool {
        u[0].is_finite()
    }

    fn flux_contribution(&self, _data: &ModelData<Self>, _i: usize, u: &Conserved) -> FluxTensor<Conserved> {
        self.f(u)
    }

    fn flux(&self, flux_i: &FluxTensor<Conserved>, flux_j: &FluxTensor<Conserved>) -> FluxTensor<Conserved> {
        [
            -(flux_i[0] + flux_j[0]),
            -(flux_i[1] + flux_j[1]),
            -(flux_i[2] + flux_j[2]),
        ]
    }

    fn apply_boundary_condition<F>(&self, kind: Boundary, u: Conserved, _normal: &Vector3d, prescribed: F) -> Conserved
    where
        F: FnOnce() -> Conserved,
    {
        match kind {
            Boundary::Dirichlet => prescribed(),
            _ => u,
        }
    }
}

// ============================================================================
/**
 * Exact maximal wave speed for convex (or linear) fluxes.
 */
pub struct ScalarRiemannSolver<'a> {
    system: &'a ScalarSystem,
}

impl<'a> RiemannSolver<ScalarSystem> for ScalarRiemannSolver<'a> {
    fn compute(&self, u_i: &Conserved, u_j: &Conserved, _i: usize, _j: usize, n_ij: &Vector3d) -> f64 {
        let flux = &self.system.flux;
        flux.df(u_i[0]).dot(n_ij).abs().max(flux.df(u_j[0]).dot(n_ij).abs())
    }
}

// ============================================================================
pub struct ScalarIndicator<'a> {
    system: &'a ScalarSystem,
    data: ModelData<'a, ScalarSystem>,
    evc_factor: f64,
    eta_i: f64,
    d_eta_i: f64,
    left: f64,
    right: f64,
}

impl<'a> Indicator<ScalarSystem> for ScalarIndicator<'a> {
    fn reset(&mut self, i: usize, u_i: &Conserved) {
        self.eta_i = self.data.precomputed.get(i);
        self.d_eta_i = u_i[0];
        self.left = 0.0;
        self.right = 0.0;
    }

    fn accumulate(&mut self, _j: usize, u_j: &Conserved, c_ij: &Vector3d) {
        self.left += self.system.flux.entropy_flux(u_j[0]).dot(c_ij);
        self.right += self.system.flux.f(u_j[0]).dot(c_ij);
    }

    fn alpha(&self, hd_i: f64) -> f64 {
        let numerator = self.left - self.d_eta_i * self.right;
        let denominator =
            self.left.abs() + (self.d_eta_i * self.right).abs() + hd_i * self.eta_i.abs();
        let quotient = numerator.abs() / (denominator + f64::MIN_POSITIVE);
        (self.evc_factor * quotient).min(1.0)
    }
}

// ============================================================================
/**
 * Local maximum principle on the bar states.
 */
pub struct ScalarLimiter<'a> {
    system: &'a ScalarSystem,
    parameters: LimiterParameters,
    u_i: Conserved,
    flux_i: FluxTensor<Conserved>,
    u_min: f64,
    u_max: f64,
    relaxation_numerator: f64,
    relaxation_denominator: f64,
}

impl<'a> Limiter<ScalarSystem> for ScalarLimiter<'a> {
    fn reset(&mut self, _i: usize, u_i: &Conserved, flux_i: &FluxTensor<Conserved>, _affine_shift: &Conserved) {
        self.u_i = *u_i;
        self.flux_i = *flux_i;
        self.u_min = f64::MAX;
        self.u_max = f64::MIN;
        self.relaxation_numerator = 0.0;
        self.relaxation_denominator = 0.0;
    }

    fn accumulate(
        &mut self,
        _j: usize,
        u_j: &Conserved,
        flux_j: &FluxTensor<Conserved>,
        scaled_c_ij: &Vector3d,
        beta_ij: f64,
    ) {
        let u_ij_bar = (self.u_i + *u_j) * 0.5
            - (contract(flux_j, scaled_c_ij) - contract(&self.flux_i, scaled_c_ij)) * 0.5;
        self.u_min = self.u_min.min(u_ij_bar[0]);
        self.u_max = self.u_max.max(u_ij_bar[0]);

        self.relaxation_numerator += beta_ij * (self.u_i[0] + u_j[0]);
        self.relaxation_denominator += beta_ij.abs();
    }

    /// Bounds relax by `r_i |u|` so that the relaxation widens the interval
    /// for either sign of `u`.
    fn bounds(&self, hd_i: f64) -> [f64; 2] {
        let r_i = self.parameters.relaxation(hd_i);
        let relaxation = self.relaxation_numerator.abs() / (self.relaxation_denominator.abs() + f64::EPSILON);

        let u_min = (self.u_min - r_i * self.u_min.abs()).max(self.u_min - 2.0 * relaxation);
        let u_max = (self.u_max + r_i * self.u_max.abs()).min(self.u_max + 2.0 * relaxation);
        [u_min, u_max]
    }

    fn limit(&self, bounds: &[f64; 2], u: &Conserved, p: &Conserved) -> (f64, bool) {
        let [u_min, u_max] = *bounds;
        let eps = f64::EPSILON;
        let slack = 1e4 * eps * u_min.abs().max(u_max.abs());
        let mut t_r = 1.0;

        let u_u = u[0];
        let u_p = p[0];
        let success = u_u <= u_max + slack && u_min - slack <= u_u;

        let denominator = 1.0 / (u_p.abs() + eps * u_max.abs() + f64::MIN_POSITIVE);
        if u_max < u_u + t_r * u_p {
            t_r = (u_max - u_u) * denominator;
        }
        if u_u + t_r * u_p < u_min {
            t_r = (u_u - u_min) * denominator;
        }
        (t_r.min(1.0).max(0.0), success)
    }
}

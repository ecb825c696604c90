use super::error::Error;
use crate::geometry::{Direction, Vector3d};
use crate::newton::{negative_part, positive_part, quadratic_newton_step};
use crate::offline_data::Boundary;
use crate::state::{contract, FluxTensor, State};
use crate::system::{
    HyperbolicSystem, Indicator, Limiter, LimiterParameters, ModelData, RiemannSolver,
};
use serde::{Deserialize, Serialize};

/// Conserved variables `[h, q1, q2, q3]`.
pub type Conserved = State<4>;

/**
 * The state of a node together with the bathymetry underneath it.
 */
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FluxContribution {
    pub state: Conserved,
    pub bathymetry: f64,
}

// ============================================================================
/**
 * The shallow water equations over a fixed bathymetry `Z`, with an optional
 * Manning friction law. The bathymetry is the initial precomputed value of
 * every node.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShallowWaterSystem {
    pub gravity: f64,
    pub manning_friction_coefficient: f64,
    pub reference_water_depth: f64,
    pub dry_state_relaxation_sharp: f64,
    pub dry_state_relaxation_mollified: f64,
    pub dry_state_relaxation_small: f64,
    pub dry_state_relaxation_large: f64,
    pub limit_on_kinetic_energy: bool,
    pub limit_on_square_velocity: bool,
}

impl Default for ShallowWaterSystem {
    fn default() -> Self {
        Self {
            gravity: 9.81,
            manning_friction_coefficient: 0.0,
            reference_water_depth: 1.0,
            dry_state_relaxation_sharp: 1e2,
            dry_state_relaxation_mollified: 1e2,
            dry_state_relaxation_small: 1e2,
            dry_state_relaxation_large: 1e4,
            limit_on_kinetic_energy: true,
            limit_on_square_velocity: true,
        }
    }
}

impl ShallowWaterSystem {
    pub fn momentum(u: &Conserved) -> Vector3d {
        Vector3d(u[1], u[2], u[3])
    }

    fn h_cutoff_sharp(&self) -> f64 {
        self.reference_water_depth * self.dry_state_relaxation_sharp * f64::EPSILON
    }

    fn h_cutoff_mollified(&self) -> f64 {
        self.reference_water_depth * self.dry_state_relaxation_mollified * f64::EPSILON
    }

    /// `2 h+ / (h^2 + max(h, h_cutoff)^2)`, which is `1 / h` away from dry
    /// states and vanishes smoothly as `h` goes to zero.
    pub fn inverse_water_depth_mollified(&self, u: &Conserved) -> f64 {
        let h = u[0];
        let h_max = h.max(self.h_cutoff_mollified());
        2.0 * positive_part(h) / (h * h + h_max * h_max)
    }

    pub fn water_depth_sharp(&self, u: &Conserved) -> f64 {
        u[0].max(self.h_cutoff_sharp())
    }

    pub fn inverse_water_depth_sharp(&self, u: &Conserved) -> f64 {
        1.0 / self.water_depth_sharp(u)
    }

    /// Depths below the dry-state cutoff are treated as exactly zero.
    pub fn filter_dry_water_depth(&self, h: f64) -> f64 {
        if h.abs() < self.h_cutoff_mollified() {
            0.0
        } else {
            h
        }
    }

    /// The water depth and velocity of `u`. Depths below the dry-state
    /// cutoff count as zero.
    pub fn to_primitive(&self, u: &Conserved) -> Result<(f64, Vector3d), Error> {
        let h = self.filter_dry_water_depth(u[0]);
        if h < 0.0 {
            Err(Error::NegativeWaterDepth(h))
        } else {
            Ok((h, self.velocity(u)))
        }
    }

    pub fn velocity(&self, u: &Conserved) -> Vector3d {
        Self::momentum(u) * self.inverse_water_depth_sharp(u)
    }

    pub fn kinetic_energy(&self, u: &Conserved) -> f64 {
        0.5 * u[0] * self.velocity(u).norm_squared()
    }

    pub fn pressure(&self, u: &Conserved) -> f64 {
        0.5 * self.gravity * u[0] * u[0]
    }

    pub fn speed_of_sound(&self, u: &Conserved) -> f64 {
        (self.gravity * u[0]).sqrt()
    }

    /// `1/2 g h^2 + 1/2 |q|^2 / h`
    pub fn mathematical_entropy(&self, u: &Conserved) -> f64 {
        self.pressure(u) + self.kinetic_energy(u)
    }

    /// `(g h - 1/2 |v|^2, v)`
    pub fn mathematical_entropy_derivative(&self, u: &Conserved) -> Conserved {
        let v = self.velocity(u);
        State([self.gravity * u[0] - 0.5 * v.norm_squared(), v.0, v.1, v.2])
    }

    /// The hydrostatically reconstructed state of `u` at an interface with
    /// bathymetry `max(z_left, z_right)`.
    pub fn star_state(&self, u: &Conserved, z_left: f64, z_right: f64) -> Conserved {
        let z_max = z_left.max(z_right);
        let h_star = positive_part(u[0] + z_left - z_max);
        *u * (h_star * self.inverse_water_depth_mollified(u))
    }

    /// The advective part of the flux, without the hydrostatic pressure.
    pub fn g(&self, u: &Conserved) -> FluxTensor<Conserved> {
        let v = self.velocity(u);
        let row = |direction: Direction| {
            let vd = v.component(direction);
            State([u[0] * vd, u[1] * vd, u[2] * vd, u[3] * vd])
        };
        [row(Direction::I), row(Direction::J), row(Direction::K)]
    }

    pub fn f(&self, u: &Conserved) -> FluxTensor<Conserved> {
        let mut result = self.g(u);
        add_isotropic_momentum_flux(&mut result, self.pressure(u));
        result
    }

    fn prescribe_riemann_characteristic<const COMPONENT: usize>(
        &self,
        u: &Conserved,
        u_bar: &Conserved,
        normal: &Vector3d,
    ) -> Conserved {
        let characteristics = |u: &Conserved| {
            let vn = self.velocity(u).dot(normal);
            let a = self.speed_of_sound(u);
            (vn - 2.0 * a, vn + 2.0 * a)
        };
        let (r1, r2) = characteristics(u);
        let (r1_bar, r2_bar) = characteristics(u_bar);
        let r1 = if COMPONENT == 1 { r1_bar } else { r1 };
        let r2 = if COMPONENT == 2 { r2_bar } else { r2 };

        let v = self.velocity(u);
        let v_perp = v - *normal * v.dot(normal);
        let vn_new = 0.5 * (r1 + r2);
        let h_new = ((r2 - r1) / 4.0).powi(2) / self.gravity;
        let q_new = (*normal * vn_new + v_perp) * h_new;

        State([h_new, q_new.0, q_new.1, q_new.2])
    }
}

fn add_isotropic_momentum_flux(flux: &mut FluxTensor<Conserved>, value: f64) {
    for direction in Direction::ALL {
        flux[direction.index()][1 + direction.index()] += value
    }
}

impl HyperbolicSystem for ShallowWaterSystem {
    type State = Conserved;
    type Precomputed = f64;
    type PrecomputedInitial = f64;
    type FluxContribution = FluxContribution;
    type Bounds = [f64; 5];

    type RiemannSolver<'a> = ShallowWaterRiemannSolver<'a>;
    type Indicator<'a> = ShallowWaterIndicator<'a>;
    type Limiter<'a> = ShallowWaterLimiter<'a>;

    const HAVE_HIGH_ORDER_FLUX: bool = true;
    const HAVE_SOURCE_TERMS: bool = true;
    const HAVE_EQUILIBRATED_STATES: bool = true;

    fn riemann_solver<'a>(&'a self, data: ModelData<'a, Self>) -> ShallowWaterRiemannSolver<'a> {
        ShallowWaterRiemannSolver { system: self, data }
    }

    fn indicator<'a>(&'a self, data: ModelData<'a, Self>, evc_factor: f64) -> ShallowWaterIndicator<'a> {
        ShallowWaterIndicator {
            system: self,
            data,
            evc_factor,
            eta_i: 0.0,
            d_eta_i: State::zero(),
            left: 0.0,
            right: State::zero(),
        }
    }

    fn limiter<'a>(&'a self, data: ModelData<'a, Self>, parameters: LimiterParameters) -> ShallowWaterLimiter<'a> {
        ShallowWaterLimiter {
            system: self,
            _data: data,
            parameters,
            u_i: State::zero(),
            flux_i: FluxContribution::default(),
            affine_shift: State::zero(),
            h_min: f64::MAX,
            h_max: 0.0,
            kin_max: 0.0,
            v2_max: 0.0,
            h_relaxation_numerator: 0.0,
            kin_relaxation_numerator: 0.0,
            v2_relaxation_numerator: 0.0,
            relaxation_denominator: 0.0,
        }
    }

    fn precompute(&self, u: &Conserved) -> f64 {
        self.mathematical_entropy(u)
    }

    fn is_admissible(&self, u: &Conserved) -> bool {
        self.filter_dry_water_depth(u[0]) >= 0.0
    }

    fn flux_contribution(&self, data: &ModelData<Self>, i: usize, u: &Conserved) -> FluxContribution {
        FluxContribution {
            state: *u,
            bathymetry: data.precomputed_initial.get(i),
        }
    }

    /// Flux between the reconstructed states. The pressure term
    /// `g (H*_ij^2 - H_i^2)` makes a lake at rest an exact steady state; over
    /// flat bathymetry this reduces to `-(f(U_i) + f(U_j))`.
    fn flux(&self, flux_i: &FluxContribution, flux_j: &FluxContribution) -> FluxTensor<Conserved> {
        let (u_star_ij, u_star_ji) = self.equilibrated_states(&flux_i.state, &flux_j.state, flux_i, flux_j);
        let h_i = flux_i.state[0];
        let h_star_ij = u_star_ij[0];
        let h_star_ji = u_star_ji[0];

        let g_ij = self.g(&u_star_ij);
        let g_ji = self.g(&u_star_ji);
        let mut result = [
            -(g_ij[0] + g_ji[0]),
            -(g_ij[1] + g_ji[1]),
            -(g_ij[2] + g_ji[2]),
        ];
        let pressure = 0.5 * self.gravity * (h_star_ij * h_star_ij - h_star_ji * h_star_ji)
            - self.gravity * h_i * h_i;
        add_isotropic_momentum_flux(&mut result, pressure);
        result
    }

    /// Central flux with the bathymetry gradient folded into the pressure
    /// term, `-g H_i (H_j + Z_j - Z_i)`.
    fn high_order_flux(&self, flux_i: &FluxContribution, flux_j: &FluxContribution) -> FluxTensor<Conserved> {
        let h_i = flux_i.state[0];
        let h_j = flux_j.state[0];

        let g_i = self.g(&flux_i.state);
        let g_j = self.g(&flux_j.state);
        let mut result = [-(g_i[0] + g_j[0]), -(g_i[1] + g_j[1]), -(g_i[2] + g_j[2])];
        let pressure = -self.gravity * h_i * (h_j + flux_j.bathymetry - flux_i.bathymetry);
        add_isotropic_momentum_flux(&mut result, pressure);
        result
    }

    fn equilibrated_states(
        &self,
        _u_i: &Conserved,
        _u_j: &Conserved,
        flux_i: &FluxContribution,
        flux_j: &FluxContribution,
    ) -> (Conserved, Conserved) {
        (
            self.star_state(&flux_i.state, flux_i.bathymetry, flux_j.bathymetry),
            self.star_state(&flux_j.state, flux_j.bathymetry, flux_i.bathymetry),
        )
    }

    fn affine_shift(&self, flux_i: &FluxContribution, flux_j: &FluxContribution, c_ij: &Vector3d, d_ij: f64) -> Conserved {
        let u_star_ij = self.star_state(&flux_i.state, flux_i.bathymetry, flux_j.bathymetry);
        u_star_ij * (-2.0 * d_ij) - contract(&self.g(&u_star_ij), c_ij) * 2.0
    }

    /// Manning friction, `-2 g n^2 |v| q / (h^(4/3) + max(h^(4/3), 2 g n^2 |v| tau))`.
    fn low_order_source(&self, _data: &ModelData<Self>, _i: usize, u: &Conserved, tau: f64) -> Conserved {
        let h_star = self.water_depth_sharp(u).powf(4.0 / 3.0);
        let q = Self::momentum(u);
        let speed = (q * self.inverse_water_depth_mollified(u)).norm();
        let factor = 2.0 * self.gravity * self.manning_friction_coefficient.powi(2) * speed;
        let source = q * (-factor / (h_star + h_star.max(factor * tau)).max(f64::MIN_POSITIVE));
        State([0.0, source.0, source.1, source.2])
    }

    fn apply_boundary_condition<F>(&self, kind: Boundary, u: Conserved, normal: &Vector3d, prescribed: F) -> Conserved
    where
        F: FnOnce() -> Conserved,
    {
        match kind {
            Boundary::Dirichlet => prescribed(),
            Boundary::Slip => {
                let q = Self::momentum(&u);
                let q = q - *normal * q.dot(normal);
                State([u[0], q.0, q.1, q.2])
            }
            Boundary::NoSlip => State([u[0], 0.0, 0.0, 0.0]),
            Boundary::Dynamic => {
                let vn = self.velocity(&u).dot(normal);
                let a = self.speed_of_sound(&u);

                if vn < -a {
                    prescribed()
                } else if vn <= 0.0 {
                    let u_dirichlet = prescribed();
                    self.prescribe_riemann_characteristic::<2>(&u_dirichlet, &u, normal)
                } else if vn <= a {
                    let u_dirichlet = prescribed();
                    self.prescribe_riemann_characteristic::<1>(&u, &u_dirichlet, normal)
                } else {
                    u
                }
            }
            Boundary::DoNothing | Boundary::Periodic => u,
        }
    }
}

// ============================================================================
/**
 * Upper bound on the maximal wave speed, evaluated on the hydrostatically
 * reconstructed states. The two-rarefaction depth bounds the star depth from
 * above; when one of the waves is a shock that bound is tightened on the
 * exact Riemann function before it enters the shock speed. A side below the
 * dry-state cutoff is treated as dry, and the wave into it is the
 * rarefaction front of the other side.
 */
pub struct ShallowWaterRiemannSolver<'a> {
    system: &'a ShallowWaterSystem,
    data: ModelData<'a, ShallowWaterSystem>,
}

/// Relative width at which the star depth bracket is accepted.
const STAR_DEPTH_TOLERANCE: f64 = 1e-3;

/// Maximal number of bisection steps on the star depth bracket.
const STAR_DEPTH_MAX_ITERATIONS: usize = 32;

impl<'a> ShallowWaterRiemannSolver<'a> {
    /// `[h, v.n, a, 1 / h]`
    fn riemann_data(&self, u: &Conserved, n_ij: &Vector3d) -> [f64; 4] {
        let h_inverse = self.system.inverse_water_depth_sharp(u);
        let vn = ShallowWaterSystem::momentum(u).dot(n_ij) * h_inverse;
        [u[0], vn, self.system.speed_of_sound(u), h_inverse]
    }

    /// The velocity change across a rarefaction (`h <= h_k`) or a shock
    /// (`h > h_k`) connecting depth `h_k` to depth `h`.
    fn wave_curve(&self, h: f64, h_k: f64, a_k: f64) -> f64 {
        let g = self.system.gravity;
        if h <= h_k {
            2.0 * ((g * h).sqrt() - a_k)
        } else {
            (h - h_k) * (0.5 * g * (h + h_k) / (h * h_k)).sqrt()
        }
    }

    /// Upper bound on the star depth of two wet states. The Riemann function
    /// is increasing in `h` and non-negative at the two-rarefaction depth,
    /// so the upper end of the bracket only moves to points where it is
    /// still non-negative.
    fn star_depth(&self, ri: &[f64; 4], rj: &[f64; 4]) -> f64 {
        let [h_i, u_i, a_i, _] = *ri;
        let [h_j, u_j, a_j, _] = *rj;
        let phi = |h: f64| self.wave_curve(h, h_i, a_i) + self.wave_curve(h, h_j, a_j) + u_j - u_i;

        let h_two_rarefaction = positive_part(a_i + a_j - 0.5 * (u_j - u_i)).powi(2) / (4.0 * self.system.gravity);
        let mut h_lower = h_i.min(h_j);

        if h_two_rarefaction <= h_lower || phi(h_lower) >= 0.0 {
            return h_two_rarefaction.min(h_lower);
        }
        let mut h_upper = h_two_rarefaction;

        for _ in 0..STAR_DEPTH_MAX_ITERATIONS {
            if h_upper <= h_lower * (1.0 + STAR_DEPTH_TOLERANCE) {
                break;
            }
            let h = (h_lower * h_upper).sqrt();
            if phi(h) >= 0.0 {
                h_upper = h;
            } else {
                h_lower = h;
            }
        }
        h_upper
    }

    fn compute_from_data(&self, ri: &[f64; 4], rj: &[f64; 4]) -> f64 {
        let [h_i, u_i, a_i, h_inverse_i] = *ri;
        let [h_j, u_j, a_j, h_inverse_j] = *rj;
        let h_dry = self.system.h_cutoff_sharp();

        let (lambda_1, lambda_2) = match (h_i < h_dry, h_j < h_dry) {
            (true, true) => (0.0, 0.0),
            (false, true) => (u_i - a_i, u_i + 2.0 * a_i),
            (true, false) => (u_j - 2.0 * a_j, u_j + a_j),
            (false, false) => {
                let h_star = self.star_depth(ri, rj);
                let factor = |h: f64, h_inverse: f64| {
                    let x = positive_part(h_star - h) * h_inverse;
                    ((1.0 + 0.5 * x) * (1.0 + x)).sqrt()
                };
                (u_i - a_i * factor(h_i, h_inverse_i), u_j + a_j * factor(h_j, h_inverse_j))
            }
        };
        positive_part(lambda_2).max(negative_part(lambda_1))
    }
}

impl<'a> RiemannSolver<ShallowWaterSystem> for ShallowWaterRiemannSolver<'a> {
    fn compute(&self, u_i: &Conserved, u_j: &Conserved, i: usize, j: usize, n_ij: &Vector3d) -> f64 {
        let z_i = self.data.precomputed_initial.get(i);
        let z_j = self.data.precomputed_initial.get(j);
        let u_star_ij = self.system.star_state(u_i, z_i, z_j);
        let u_star_ji = self.system.star_state(u_j, z_j, z_i);

        let ri = self.riemann_data(&u_star_ij, n_ij);
        let rj = self.riemann_data(&u_star_ji, n_ij);
        self.compute_from_data(&ri, &rj)
    }
}

// ============================================================================
/**
 * Entropy-viscosity commutator based on the mathematical entropy.
 */
pub struct ShallowWaterIndicator<'a> {
    system: &'a ShallowWaterSystem,
    data: ModelData<'a, ShallowWaterSystem>,
    evc_factor: f64,
    eta_i: f64,
    d_eta_i: Conserved,
    left: f64,
    right: Conserved,
}

impl<'a> Indicator<ShallowWaterSystem> for ShallowWaterIndicator<'a> {
    fn reset(&mut self, i: usize, u_i: &Conserved) {
        self.eta_i = self.data.precomputed.get(i);
        self.d_eta_i = self.system.mathematical_entropy_derivative(u_i);
        self.left = 0.0;
        self.right = State::zero();
    }

    fn accumulate(&mut self, j: usize, u_j: &Conserved, c_ij: &Vector3d) {
        let eta_j = self.data.precomputed.get(j);
        let v_j = self.system.velocity(u_j);
        let entropy_flux = (eta_j + self.system.pressure(u_j)) * v_j.dot(c_ij);
        self.left += entropy_flux;
        self.right += contract(&self.system.f(u_j), c_ij);
    }

    fn alpha(&self, hd_i: f64) -> f64 {
        let numerator = self.left - self.d_eta_i.dot(&self.right);
        let denominator = self.left.abs()
            + self
                .d_eta_i
                .iter()
                .zip(self.right.iter())
                .map(|(a, b)| (a * b).abs())
                .sum::<f64>()
            + hd_i * self.eta_i.abs();
        let quotient = numerator.abs() / (denominator + f64::MIN_POSITIVE);
        (self.evc_factor * quotient).min(1.0)
    }
}

// ============================================================================
/**
 * Convex limiter on the water depth, and optionally on kinetic energy and
 * square velocity. Bar states are formed from the reconstructed states and
 * shifted by the accumulated affine shift of the node.
 */
pub struct ShallowWaterLimiter<'a> {
    system: &'a ShallowWaterSystem,
    _data: ModelData<'a, ShallowWaterSystem>,
    parameters: LimiterParameters,
    u_i: Conserved,
    flux_i: FluxContribution,
    affine_shift: Conserved,
    h_min: f64,
    h_max: f64,
    kin_max: f64,
    v2_max: f64,
    h_relaxation_numerator: f64,
    kin_relaxation_numerator: f64,
    v2_relaxation_numerator: f64,
    relaxation_denominator: f64,
}

impl<'a> ShallowWaterLimiter<'a> {
    fn relax_small(&self) -> f64 {
        1.0 + self.system.dry_state_relaxation_small * f64::EPSILON
    }

    fn relax(&self) -> f64 {
        1.0 + self.system.dry_state_relaxation_large * f64::EPSILON
    }

    fn square_velocity(&self, u: &Conserved) -> f64 {
        self.system.velocity(u).norm_squared()
    }

    /// Shrink `[t_l, t_r]` onto the largest `t` with `psi(t) >= 0`, for a
    /// concave quadratic `psi`. Returns the new `t_l` and whether `psi(t_l)`
    /// was above `lower_bound` to begin with.
    fn solve_quadratic_bound<F>(&self, mut t_l: f64, mut t_r: f64, psi: F, lower_bound: f64) -> (f64, bool)
    where
        F: Fn(f64) -> (f64, f64),
    {
        let (psi_r, dpsi_r) = psi(t_r);
        if psi_r > 0.0 {
            return (t_r, true);
        }
        let (psi_l, dpsi_l) = psi(t_l);
        let success = psi_l >= lower_bound;

        if t_r - t_l > self.parameters.newton_tolerance {
            quadratic_newton_step(&mut t_l, &mut t_r, psi_l, psi_r, dpsi_l, dpsi_r, -1.0);
        }
        (t_l, success)
    }
}

impl<'a> Limiter<ShallowWaterSystem> for ShallowWaterLimiter<'a> {
    fn reset(&mut self, _i: usize, u_i: &Conserved, flux_i: &FluxContribution, affine_shift: &Conserved) {
        self.u_i = *u_i;
        self.flux_i = *flux_i;
        self.affine_shift = *affine_shift;
        self.h_min = f64::MAX;
        self.h_max = 0.0;
        self.kin_max = 0.0;
        self.v2_max = 0.0;
        self.h_relaxation_numerator = 0.0;
        self.kin_relaxation_numerator = 0.0;
        self.v2_relaxation_numerator = 0.0;
        self.relaxation_denominator = 0.0;
    }

    fn accumulate(
        &mut self,
        _j: usize,
        u_j: &Conserved,
        flux_j: &FluxContribution,
        scaled_c_ij: &Vector3d,
        beta_ij: f64,
    ) {
        let system = self.system;
        let (u_star_ij, u_star_ji) = system.equilibrated_states(&self.u_i, u_j, &self.flux_i, flux_j);

        let u_ij_bar = (u_star_ij + u_star_ji) * 0.5
            - (contract(&system.f(&u_star_ji), scaled_c_ij) - contract(&system.f(&u_star_ij), scaled_c_ij)) * 0.5
            + self.affine_shift;

        self.h_min = self.h_min.min(u_ij_bar[0]);
        self.h_max = self.h_max.max(u_ij_bar[0]);
        self.kin_max = self.kin_max.max(system.kinetic_energy(&u_ij_bar));
        self.v2_max = self.v2_max.max(self.square_velocity(&u_ij_bar));

        self.h_relaxation_numerator += beta_ij * (self.u_i[0] + u_j[0]);
        self.kin_relaxation_numerator += beta_ij * (system.kinetic_energy(&self.u_i) + system.kinetic_energy(u_j));
        self.v2_relaxation_numerator += beta_ij * (self.square_velocity(&self.u_i) + self.square_velocity(u_j));
        self.relaxation_denominator += beta_ij.abs();
    }

    fn bounds(&self, hd_i: f64) -> [f64; 5] {
        let r_i = self.parameters.relaxation(hd_i);
        let denominator = self.relaxation_denominator.abs() + f64::EPSILON;
        let h_relaxation = self.h_relaxation_numerator.abs() / denominator;
        let kin_relaxation = self.kin_relaxation_numerator.abs() / denominator;
        let v2_relaxation = self.v2_relaxation_numerator.abs() / denominator;

        let h_min = ((1.0 - r_i) * self.h_min).max(self.h_min - 2.0 * h_relaxation);
        let h_max = ((1.0 + r_i) * self.h_max).min(self.h_max + 2.0 * h_relaxation);
        let kin_max = ((1.0 + r_i) * self.kin_max).min(self.kin_max + 2.0 * kin_relaxation);
        let v2_max = ((1.0 + r_i) * self.v2_max).min(self.v2_max + 2.0 * v2_relaxation);
        [h_min, h_max, self.system.h_cutoff_mollified(), kin_max, v2_max]
    }

    fn limit(&self, bounds: &[f64; 5], u: &Conserved, p: &Conserved) -> (f64, bool) {
        let [h_min, h_max, h_small, kin_max, v2_max] = *bounds;
        let system = self.system;
        let eps = f64::EPSILON;
        let relax = self.relax();
        let relax_small = self.relax_small();
        let mut success = true;
        let mut t_r = 1.0;

        /*
         * Water depth: closed form.
         */
        let h_u = u[0];
        let h_p = p[0];

        let test_min = system.filter_dry_water_depth(positive_part(h_u - relax * h_max));
        let test_max = system.filter_dry_water_depth(positive_part(h_min - relax * h_u));
        if test_min != 0.0 || test_max != 0.0 {
            success = false;
        }

        let denominator = 1.0 / (h_p.abs() + eps * h_max + f64::MIN_POSITIVE);
        if h_max < h_u + t_r * h_p {
            t_r = (h_max - h_u) * denominator;
        }
        let h_min_tilde = h_small.max(h_min);
        if h_u + t_r * h_p < h_min_tilde {
            t_r = (h_u - h_min_tilde) * denominator;
        }
        t_r = t_r.min(1.0).max(0.0);

        let q_u = ShallowWaterSystem::momentum(u);
        let q_p = ShallowWaterSystem::momentum(p);
        let mut t_l = t_r;

        /*
         * Kinetic energy: psi(t) = h(t) kin_max - 1/2 |q(t)|^2.
         */
        if system.limit_on_kinetic_energy {
            let psi = |t: f64| {
                let h = h_u + t * h_p;
                let q = q_u + q_p * t;
                let value = relax_small * h * kin_max - 0.5 * q.norm_squared();
                let derivative = h_p * kin_max - q_u.dot(&q_p) - q_p.norm_squared() * t;
                (value, derivative)
            };
            let filtered_h_l = system.filter_dry_water_depth(h_u);
            let lower_bound = (1.0 - relax) * filtered_h_l * kin_max - eps;
            let (t, valid) = self.solve_quadratic_bound(0.0, t_r, psi, lower_bound);
            t_l = t;
            success &= valid;
        }

        /*
         * Square velocity: psi(t) = h(t)^2 v2_max - |q(t)|^2.
         */
        if system.limit_on_square_velocity {
            let psi = |t: f64| {
                let h = h_u + t * h_p;
                let q = q_u + q_p * t;
                let value = relax_small * h * h * v2_max - q.norm_squared();
                let derivative = 2.0 * h * h_p * v2_max - 2.0 * (q_u.dot(&q_p) + q_p.norm_squared() * t);
                (value, derivative)
            };
            let filtered_h_l = system.filter_dry_water_depth(h_u);
            let lower_bound = (1.0 - relax) * filtered_h_l * filtered_h_l * v2_max - 100.0 * eps;
            let (t, valid) = self.solve_quadratic_bound(0.0, t_l, psi, lower_bound);
            t_l = t;
            success &= valid;
        }

        (t_l, success)
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{Conserved, Error, FluxContribution, ShallowWaterSystem};
    use crate::geometry::Vector3d;
    use crate::offline_data::Boundary;
    use crate::state::{contract, State};
    use crate::storage::MultiComponentVector;
    use crate::system::{HyperbolicSystem, ModelData, RiemannSolver};

    fn lambda(system: &ShallowWaterSystem, left: Conserved, right: Conserved) -> f64 {
        let precomputed = MultiComponentVector::new(2);
        let precomputed_initial = MultiComponentVector::new(2);
        let data = ModelData { precomputed: &precomputed, precomputed_initial: &precomputed_initial };
        system
            .riemann_solver(data)
            .compute(&left, &right, 0, 1, &Vector3d::new(1.0, 0.0, 0.0))
    }

    #[test]
    fn dam_break_wave_speed_bounds_exact_solution() {
        let system = ShallowWaterSystem::default();
        let l = lambda(&system, State([1.0, 0.0, 0.0, 0.0]), State([0.1, 0.0, 0.0, 0.0]));
        // the left rarefaction head moves at sqrt(g)
        assert!(l >= 9.81f64.sqrt() && l < 3.6, "{}", l);
    }

    #[test]
    fn nearly_dry_neighbor_is_bounded_by_front_speed() {
        let system = ShallowWaterSystem::default();
        let front = 2.0 * 9.81f64.sqrt();
        let wet = State([1.0, 0.0, 0.0, 0.0]);

        for h in [1e-2, 1e-8, 3e-14] {
            let l = lambda(&system, wet, State([h, 0.0, 0.0, 0.0]));
            assert!(l >= 9.81f64.sqrt() && l < 1.01 * front, "h = {}: {}", h, l);
        }
        let l = lambda(&system, wet, State([0.0, 0.0, 0.0, 0.0]));
        assert!((l - front).abs() < 1e-12);
        assert_eq!(lambda(&system, State::zero(), State::zero()), 0.0);
    }

    #[test]
    fn still_water_speed_is_gravity_wave_speed() {
        let system = ShallowWaterSystem::default();
        let u = State([2.0, 0.0, 0.0, 0.0]);
        let l = lambda(&system, u, u);
        assert!((l - (2.0 * 9.81f64).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn star_state_of_lake_at_rest_matches_on_both_sides() {
        let system = ShallowWaterSystem::default();
        let fi = FluxContribution { state: State([1.0, 0.0, 0.0, 0.0]), bathymetry: 0.0 };
        let fj = FluxContribution { state: State([0.75, 0.0, 0.0, 0.0]), bathymetry: 0.25 };
        let (a, b) = system.equilibrated_states(&fi.state, &fj.state, &fi, &fj);
        assert!((a[0] - 0.75).abs() < 1e-14);
        assert!((b[0] - 0.75).abs() < 1e-14);
    }

    #[test]
    fn flux_over_flat_bottom_is_central() {
        let system = ShallowWaterSystem::default();
        let ui = State([1.0, 0.5, 0.0, 0.0]);
        let uj = State([0.8, 0.1, 0.0, 0.0]);
        let fi = FluxContribution { state: ui, bathymetry: 0.0 };
        let fj = FluxContribution { state: uj, bathymetry: 0.0 };
        let c = Vector3d::new(0.5, 0.0, 0.0);
        let expected = -(contract(&system.f(&ui), &c) + contract(&system.f(&uj), &c));
        let actual = contract(&system.flux(&fi, &fj), &c);
        for k in 0..4 {
            assert!((expected[k] - actual[k]).abs() < 1e-12);
        }
    }

    #[test]
    fn manning_friction_opposes_motion() {
        let system = ShallowWaterSystem {
            manning_friction_coefficient: 0.03,
            ..Default::default()
        };
        let precomputed = MultiComponentVector::new(1);
        let precomputed_initial = MultiComponentVector::new(1);
        let data = ModelData { precomputed: &precomputed, precomputed_initial: &precomputed_initial };
        let s = system.low_order_source(&data, 0, &State([1.0, 2.0, 0.0, 0.0]), 0.01);
        assert_eq!(s[0], 0.0);
        assert!(s[1] < 0.0);
        let s = ShallowWaterSystem::default().low_order_source(&data, 0, &State([1.0, 2.0, 0.0, 0.0]), 0.01);
        assert_eq!(s[1], 0.0);
    }

    #[test]
    fn no_slip_and_slip_conditions() {
        let system = ShallowWaterSystem::default();
        let u = State([1.0, 0.3, 0.4, 0.0]);
        let n = Vector3d::new(1.0, 0.0, 0.0);
        assert_eq!(
            system.apply_boundary_condition(Boundary::NoSlip, u, &n, || unreachable!()),
            State([1.0, 0.0, 0.0, 0.0])
        );
        assert_eq!(
            system.apply_boundary_condition(Boundary::Slip, u, &n, || unreachable!()),
            State([1.0, 0.0, 0.4, 0.0])
        );
    }

    #[test]
    fn primitive_recovery_reports_negative_depth() {
        let system = ShallowWaterSystem::default();
        let (h, v) = system.to_primitive(&State([2.0, 1.0, 0.0, 0.0])).unwrap();
        assert_eq!(h, 2.0);
        assert!((v.0 - 0.5).abs() < 1e-14);
        assert_eq!(system.to_primitive(&State([1e-20, 0.0, 0.0, 0.0])).unwrap().0, 0.0);
        assert_eq!(
            system.to_primitive(&State([-0.1, 0.0, 0.0, 0.0])),
            Err(Error::NegativeWaterDepth(-0.1))
        );
    }

    #[test]
    fn dry_state_is_admissible_and_negative_depth_is_not() {
        let system = ShallowWaterSystem::default();
        assert!(system.is_admissible(&State([0.0, 0.0, 0.0, 0.0])));
        assert!(!system.is_admissible(&State([-1e-3, 0.0, 0.0, 0.0])));
        assert_eq!(system.inverse_water_depth_mollified(&State([0.0, 0.0, 0.0, 0.0])), 0.0);
    }
}

//! The explicit, graph-based update of a hyperbolic system: a low-order
//! invariant-domain preserving step blended with a high-order step through
//! convex limiting.
//!
//! One call to [`HyperbolicModule::step`] performs the stages below, each a
//! parallel sweep over the work units of the connectivity graph:
//!
//! 0. precompute per-node values of the old state;
//! 1. compute the off-diagonal graph viscosity `d_ij` and the indicator;
//! 2. symmetrize `d_ij`, set the diagonal and reduce the admissible time step;
//! 3. (global reduction of `tau_max`);
//! 4. low-order update, bounds, and antidiffusive fluxes `P_ij`;
//! 5. mass-matrix correction of `P_ij` and the first limiter pass;
//!
//! followed by one or two limiter passes that apply the limited fluxes.

use crate::config::{HyperbolicModuleConfig, IdViolationStrategy};
use crate::dispatch::SynchronizationDispatch;
use crate::error::{Error, Result};
use crate::geometry::Vector3d;
use crate::message::comm::{all_reduce_min, all_reduce_or, Communicator};
use crate::offline_data::{Boundary, OfflineData};
use crate::state::{contract, Tensor};
use crate::storage::{AtomicF64, MultiComponentVector, SparseMatrix};
use crate::system::{
    HyperbolicSystem, Indicator, InitialValues, Limiter, LimiterParameters, ModelData,
    RiemannSolver,
};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/**
 * A previously computed state of a Runge-Kutta scheme, entering the
 * high-order flux of the current step with the given weight.
 */
pub struct Stage<'a, S: HyperbolicSystem> {
    pub state: &'a MultiComponentVector<S::State>,
    pub precomputed: &'a MultiComponentVector<S::Precomputed>,
    pub weight: f64,
}

/**
 * Per-node and per-entry scratch storage, allocated once by `prepare`.
 */
struct Workspace<S: HyperbolicSystem> {
    precomputed_initial: MultiComponentVector<S::PrecomputedInitial>,
    alpha: MultiComponentVector<f64>,
    bounds: MultiComponentVector<S::Bounds>,
    r: MultiComponentVector<S::State>,
    dij: SparseMatrix<f64>,
    lij: SparseMatrix<f64>,
    lij_next: SparseMatrix<f64>,
    pij: SparseMatrix<S::State>,
}

impl<S: HyperbolicSystem> Workspace<S> {
    fn new(n_rows: usize, n_entries: usize) -> Self {
        Self {
            precomputed_initial: MultiComponentVector::new(n_rows),
            alpha: MultiComponentVector::new(n_rows),
            bounds: MultiComponentVector::new(n_rows),
            r: MultiComponentVector::new(n_rows),
            dij: SparseMatrix::new(n_entries),
            lij: SparseMatrix::new(n_entries),
            lij_next: SparseMatrix::new(n_entries),
            pij: SparseMatrix::new(n_entries),
        }
    }
}

// ============================================================================
/**
 * Advances a hyperbolic system by one explicit step on a fixed
 * discretization. Stages run on the current rayon thread pool, so callers
 * wanting a dedicated pool wrap calls in `pool.install`.
 */
pub struct HyperbolicModule<'a, S, C, I>
where
    S: HyperbolicSystem,
    C: Communicator,
    I: InitialValues<S>,
{
    system: &'a S,
    offline_data: &'a OfflineData,
    initial_values: &'a I,
    comm: &'a C,
    config: HyperbolicModuleConfig,
    channel: AtomicU64,
    n_restarts: usize,
    n_warnings: usize,
    workspace: Option<Workspace<S>>,
}

impl<'a, S, C, I> HyperbolicModule<'a, S, C, I>
where
    S: HyperbolicSystem,
    C: Communicator,
    I: InitialValues<S>,
{
    pub fn new(
        system: &'a S,
        offline_data: &'a OfflineData,
        initial_values: &'a I,
        comm: &'a C,
        config: HyperbolicModuleConfig,
    ) -> Self {
        Self {
            system,
            offline_data,
            initial_values,
            comm,
            config,
            channel: AtomicU64::new(0),
            n_restarts: 0,
            n_warnings: 0,
            workspace: None,
        }
    }

    /// Validate the configuration and the offline data, allocate scratch
    /// storage and interpolate the initial precomputed values.
    pub fn prepare(&mut self) -> Result<()> {
        self.config.validate()?;
        self.offline_data.validate()?;

        let n_rows = self.offline_data.n_rows();
        let n_entries = self.offline_data.graph.n_entries();
        let workspace = Workspace::<S>::new(n_rows, n_entries);

        for (i, position) in self.offline_data.positions.iter().enumerate() {
            workspace
                .precomputed_initial
                .set(i, &self.initial_values.initial_precomputed(position))
        }
        workspace.lij.fill(&1.0);
        workspace.lij_next.fill(&1.0);

        info!(
            "prepared hyperbolic module: {} rows ({} owned), {} entries",
            n_rows,
            self.offline_data.n_owned(),
            n_entries
        );
        self.workspace = Some(workspace);
        Ok(())
    }

    pub fn config(&self) -> &HyperbolicModuleConfig {
        &self.config
    }

    pub fn cfl(&self) -> f64 {
        self.config.cfl
    }

    pub fn set_cfl(&mut self, cfl: f64) -> Result<()> {
        if !cfl.is_finite() || cfl <= 0.0 {
            return Err(Error::Config(format!("cfl must be positive, got {}", cfl)));
        }
        self.config.cfl = cfl;
        Ok(())
    }

    /// The number of steps that failed with `Error::Restart`.
    pub fn n_restarts(&self) -> usize {
        self.n_restarts
    }

    /// The number of steps that detected a violation and kept the result.
    pub fn n_warnings(&self) -> usize {
        self.n_warnings
    }

    /// The indicator values of the last step.
    pub fn alpha(&self) -> Option<&MultiComponentVector<f64>> {
        self.workspace.as_ref().map(|ws| &ws.alpha)
    }

    /// The graph viscosity of the last step, diagonal included.
    pub fn viscosity_matrix(&self) -> Option<&SparseMatrix<f64>> {
        self.workspace.as_ref().map(|ws| &ws.dij)
    }

    /// The relaxed local bounds of the last step.
    pub fn bounds(&self) -> Option<&MultiComponentVector<S::Bounds>> {
        self.workspace.as_ref().map(|ws| &ws.bounds)
    }

    /// The limiter coefficients applied in the last pass of the last step.
    pub fn limiter_coefficients(&self) -> Option<&SparseMatrix<f64>> {
        self.workspace.as_ref().map(|ws| &ws.lij)
    }

    fn next_tag(&self, count: u64) -> u64 {
        self.channel.fetch_add(count, Ordering::SeqCst)
    }

    /// Evaluate the initial state at every locally stored node.
    pub fn interpolate_initial_values(&self, t: f64) -> MultiComponentVector<S::State> {
        let positions = &self.offline_data.positions;
        let u = MultiComponentVector::new(positions.len());
        positions.par_iter().enumerate().for_each(|(i, position)| {
            u.set(i, &self.initial_values.initial_state(position, t))
        });
        u
    }

    /// Apply the boundary conditions of all owned boundary nodes to `u` at
    /// time `t`, then refresh the ghost values of `u`.
    pub fn apply_boundary_conditions(&self, u: &MultiComponentVector<S::State>, t: f64) -> Result<()> {
        let n_owned = self.offline_data.n_owned();

        self.offline_data
            .boundary_map
            .par_iter()
            .filter(|(i, record)| {
                **i < n_owned && !matches!(record.kind, Boundary::DoNothing | Boundary::Periodic)
            })
            .for_each(|(i, record)| {
                let u_i = self.system.apply_boundary_condition(
                    record.kind,
                    u.get(*i),
                    &record.normal,
                    || self.initial_values.initial_state(&record.position, t),
                );
                u.set(*i, &u_i)
            });

        u.update_ghost_values(self.comm, &self.offline_data.partitioner.ghost_nodes, self.next_tag(1))
    }

    /**
     * Advance `old_u` by one step of size `tau_requested` (or the largest
     * admissible step if zero) and write the result into `new_u`.
     * `new_precomputed` receives the precomputed values of `old_u`, which a
     * later step may pass back in as a `Stage`. Returns the admissible step
     * size `tau_max`.
     *
     * Under `IdViolationStrategy::Raise` a detected violation fails the step
     * with `Error::Restart`; `old_u` is never modified.
     */
    pub fn step(
        &mut self,
        old_u: &MultiComponentVector<S::State>,
        stages: &[Stage<S>],
        new_u: &mut MultiComponentVector<S::State>,
        new_precomputed: &mut MultiComponentVector<S::Precomputed>,
        tau_requested: f64,
    ) -> Result<f64> {
        if !tau_requested.is_finite() || tau_requested < 0.0 {
            return Err(Error::InvalidTimeStep(tau_requested));
        }
        let n_rows = self.offline_data.n_rows();
        if old_u.len() != n_rows || new_u.len() != n_rows || new_precomputed.len() != n_rows {
            return Err(Error::Graph(format!("state vectors must have {} rows", n_rows)));
        }
        if let Some(stage) = stages
            .iter()
            .find(|stage| stage.state.len() != n_rows || stage.precomputed.len() != n_rows)
        {
            return Err(Error::Graph(format!(
                "stage vectors have {} and {} rows, expected {}",
                stage.state.len(),
                stage.precomputed.len(),
                n_rows
            )));
        }

        let mut workspace = self.workspace.take().ok_or(Error::NotPrepared)?;
        let result = self.step_with(&mut workspace, old_u, stages, new_u, new_precomputed, tau_requested);
        self.workspace = Some(workspace);
        let (tau_max, restart) = result?;

        if restart {
            match self.config.id_violation_strategy {
                IdViolationStrategy::Warn => {
                    self.n_warnings += 1;
                    warn!("invariant domain violation detected in step (warning {})", self.n_warnings);
                }
                IdViolationStrategy::Raise => {
                    self.n_restarts += 1;
                    info!("invariant domain violation detected, requesting restart ({})", self.n_restarts);
                    return Err(Error::Restart);
                }
            }
        }
        Ok(tau_max)
    }

    fn step_with(
        &self,
        ws: &mut Workspace<S>,
        old_u: &MultiComponentVector<S::State>,
        stages: &[Stage<S>],
        new_u: &MultiComponentVector<S::State>,
        new_precomputed: &MultiComponentVector<S::Precomputed>,
        tau_requested: f64,
    ) -> Result<(f64, bool)> {
        let system = self.system;
        let od = self.offline_data;
        let graph = &od.graph;
        let units = graph.units();
        let threshold = graph.n_export_units();
        let partitioner = &od.partitioner;
        let config = &self.config;
        let restart = AtomicBool::new(false);

        /*
         * Step 0: precompute values
         */
        if S::Precomputed::NUM_FIELDS != 0 {
            debug!("time step [H] 0 - precompute values");
            let tag = self.next_tag(1);
            let dispatch = SynchronizationDispatch::new(threshold, || {
                new_precomputed.update_ghost_values(self.comm, &partitioner.ghost_nodes, tag)
            });
            units.par_iter().for_each(|unit| {
                for i in unit.nodes() {
                    new_precomputed.set(i, &system.precompute(&old_u.get(i)))
                }
                dispatch.check(graph.is_export(unit))
            });
            dispatch.finish()?;
        }

        let data = ModelData {
            precomputed: new_precomputed,
            precomputed_initial: &ws.precomputed_initial,
        };

        /*
         * Step 1: compute off-diagonal d_ij, and alpha_i
         */
        {
            debug!("time step [H] 1 - compute d_ij, and alpha_i");
            let tag = self.next_tag(1);
            let alpha = &ws.alpha;
            let dij = &ws.dij;
            let dispatch = SynchronizationDispatch::new(threshold, || {
                alpha.update_ghost_values(self.comm, &partitioner.ghost_nodes, tag)
            });
            units.par_iter().for_each(|unit| {
                let solver = system.riemann_solver(data);
                let mut indicator = system.indicator(data, config.indicator_evc_factor);

                for i in unit.nodes() {
                    let row_length = graph.row_length(i);
                    if row_length == 1 {
                        continue;
                    }
                    let u_i = old_u.get(i);
                    indicator.reset(i, &u_i);

                    for (col, &j) in graph.columns(i).iter().enumerate().skip(1) {
                        let e = graph.entry(i, col);
                        let u_j = old_u.get(j);
                        let c_ij = od.cij[e];
                        indicator.accumulate(j, &u_j, &c_ij);

                        if graph.is_below_diagonal(unit, col) {
                            continue;
                        }
                        let norm = c_ij.norm();
                        let n_ij = c_ij.normalized();
                        let d_ij = norm * solver.compute(&u_i, &u_j, i, j, &n_ij);
                        dij.set(e, &d_ij);
                    }
                    alpha.set(i, &indicator.alpha(od.hd(i)));
                }
                dispatch.check(graph.is_export(unit))
            });
            dispatch.finish()?;
        }

        /*
         * Step 2: compute boundary and ghost coupling d_ij, d_ii, and tau_max
         */
        let tau_max = {
            debug!("time step [H] 2 - compute d_ii, and tau_max");
            let dij = &ws.dij;

            graph.coupling_pairs().par_iter().for_each(|&(i, col, j)| {
                let solver = system.riemann_solver(data);
                let e = graph.entry(i, col);
                let c_ji = od.cij[graph.transposed_entry(i, col)];
                let norm = c_ji.norm();
                let n_ji = c_ji.normalized();
                let d_ji = norm * solver.compute(&old_u.get(j), &old_u.get(i), j, i, &n_ji);
                dij.set(e, &dij.get(e).max(d_ji));
            });

            let tag = self.next_tag(1);
            let tau_max = AtomicF64::new(f64::INFINITY);
            let dispatch = SynchronizationDispatch::new(threshold, || {
                dij.update_ghost_rows(self.comm, &partitioner.ghost_rows, tag)
            });
            units.par_iter().for_each(|unit| {
                for i in unit.nodes() {
                    let row_length = graph.row_length(i);
                    if row_length == 1 {
                        continue;
                    }
                    let mut d_sum = 0.0;

                    for (col, &j) in graph.columns(i).iter().enumerate().skip(1) {
                        let e = graph.entry(i, col);
                        if j < i {
                            dij.set(e, &dij.get(graph.transposed_entry(i, col)));
                        }
                        d_sum -= dij.get(e);
                    }
                    let d_sum = d_sum.min(-1e6 * f64::MIN_POSITIVE);
                    dij.set(graph.entry(i, 0), &d_sum);

                    if config.cfl_with_boundary_dofs || !od.is_boundary(i) {
                        tau_max.fetch_min(config.cfl * od.lumped_mass[i] / (-2.0 * d_sum));
                    }
                }
                dispatch.check(graph.is_export(unit))
            });
            dispatch.finish()?;
            tau_max.load()
        };

        /*
         * Step 3: reduce tau_max over all ranks
         */
        debug!("time step [H] 3 - synchronization of tau_max");
        let tau_max = all_reduce_min(self.comm, self.next_tag(2), tau_max);

        if !tau_max.is_finite() || tau_max <= 0.0 {
            return Err(Error::InvalidTimeStep(tau_max));
        }
        if config.precompute_only {
            return Ok((tau_max, false));
        }
        let tau = if tau_requested == 0.0 { tau_max } else { tau_requested };

        let parameters = LimiterParameters {
            relaxation_factor: config.limiter_relaxation_factor,
            relaxation_exponent: config.limiter_relaxation_exponent,
            newton_tolerance: config.limiter_newton_tolerance,
            newton_max_iterations: config.limiter_newton_max_iterations,
            dim: od.dim,
        };

        /*
         * Step 4: low-order update, compute bounds, and the antidiffusive
         * fluxes P_ij
         */
        {
            debug!("time step [H] 4 - compute bounds, r_i, and p_ij");
            let weight = 1.0 - stages.iter().map(|stage| stage.weight).sum::<f64>();
            let stage_data: Vec<_> = stages
                .iter()
                .map(|stage| ModelData {
                    precomputed: stage.precomputed,
                    precomputed_initial: &ws.precomputed_initial,
                })
                .collect();

            let tag = self.next_tag(1);
            let (alpha, dij, pij, r, bounds) = (&ws.alpha, &ws.dij, &ws.pij, &ws.r, &ws.bounds);
            let dispatch = SynchronizationDispatch::new(threshold, || {
                r.update_ghost_values(self.comm, &partitioner.ghost_nodes, tag)
            });

            units.par_iter().for_each(|unit| {
                let mut limiter = system.limiter(data, parameters);

                for i in unit.nodes() {
                    let row_length = graph.row_length(i);
                    if row_length == 1 {
                        continue;
                    }
                    let u_i = old_u.get(i);
                    let m_i = od.lumped_mass[i];
                    let m_i_inv = 1.0 / m_i;
                    let alpha_i = alpha.get(i);
                    let flux_i = system.flux_contribution(&data, i, &u_i);
                    let stage_flux_i: Vec<_> = stages
                        .iter()
                        .zip(&stage_data)
                        .map(|(stage, sd)| system.flux_contribution(sd, i, &stage.state.get(i)))
                        .collect();

                    let mut u_i_new = u_i;
                    let mut f_i_high = S::State::default();
                    let mut s_i = S::State::default();
                    let mut s_i_high = S::State::default();

                    if S::HAVE_SOURCE_TERMS {
                        s_i = system.low_order_source(&data, i, &u_i, tau);
                        u_i_new += s_i * tau;
                        s_i_high = system.high_order_source(&data, i, &u_i, tau) * weight;
                        for (stage, sd) in stages.iter().zip(&stage_data) {
                            s_i_high += system.high_order_source(sd, i, &stage.state.get(i), tau) * stage.weight;
                        }
                        f_i_high += s_i_high * m_i;
                    }

                    let mut affine_shift = S::State::default();
                    if S::HAVE_EQUILIBRATED_STATES {
                        for (col, &j) in graph.columns(i).iter().enumerate() {
                            let e = graph.entry(i, col);
                            let flux_j = system.flux_contribution(&data, j, &old_u.get(j));
                            affine_shift += system.affine_shift(&flux_i, &flux_j, &od.cij[e], dij.get(e));
                        }
                        affine_shift *= tau * m_i_inv;
                    }

                    limiter.reset(i, &u_i, &flux_i, &affine_shift);

                    for (col, &j) in graph.columns(i).iter().enumerate() {
                        let e = graph.entry(i, col);
                        let u_j = old_u.get(j);
                        let flux_j = system.flux_contribution(&data, j, &u_j);
                        let c_ij = od.cij[e];
                        let d_ij = dij.get(e);
                        let m_ij = od.mass_matrix[e];
                        let d_ij_high = d_ij * 0.5 * (alpha_i + alpha.get(j));

                        let flux_ij = contract(&system.flux(&flux_i, &flux_j), &c_ij);
                        u_i_new += flux_ij * (tau * m_i_inv);
                        let mut p_ij = -flux_ij;

                        let (u_star_ij, u_star_ji) = if S::HAVE_EQUILIBRATED_STATES {
                            system.equilibrated_states(&u_i, &u_j, &flux_i, &flux_j)
                        } else {
                            (u_i, u_j)
                        };
                        let difference = u_star_ji - u_star_ij;
                        u_i_new += difference * (tau * m_i_inv * d_ij);
                        f_i_high += difference * d_ij_high;
                        p_ij += difference * (d_ij_high - d_ij);

                        let scaled_c_ij = if d_ij != 0.0 { c_ij / d_ij } else { Vector3d::zero() };
                        limiter.accumulate(j, &u_j, &flux_j, &scaled_c_ij, od.betaij[e]);

                        if S::HAVE_SOURCE_TERMS {
                            f_i_high -= s_i_high * m_ij;
                            p_ij -= s_i * m_ij;
                        }

                        let flux_ij_high = if S::HAVE_HIGH_ORDER_FLUX {
                            contract(&system.high_order_flux(&flux_i, &flux_j), &c_ij)
                        } else {
                            flux_ij
                        };
                        f_i_high += flux_ij_high * weight;
                        p_ij += flux_ij_high * weight;

                        if S::HAVE_SOURCE_TERMS {
                            let s_j = system.high_order_source(&data, j, &u_j, tau) * (weight * m_ij);
                            f_i_high += s_j;
                            p_ij += s_j;
                        }

                        for ((stage, sd), flux_i_stage) in stages.iter().zip(&stage_data).zip(&stage_flux_i) {
                            let u_j_stage = stage.state.get(j);
                            let flux_j_stage = system.flux_contribution(sd, j, &u_j_stage);
                            let flux_stage = if S::HAVE_HIGH_ORDER_FLUX {
                                system.high_order_flux(flux_i_stage, &flux_j_stage)
                            } else {
                                system.flux(flux_i_stage, &flux_j_stage)
                            };
                            let f = contract(&flux_stage, &c_ij) * stage.weight;
                            f_i_high += f;
                            p_ij += f;

                            if S::HAVE_SOURCE_TERMS {
                                let s_j = system.high_order_source(sd, j, &u_j_stage, tau) * (stage.weight * m_ij);
                                f_i_high += s_j;
                                p_ij += s_j;
                            }
                        }
                        pij.set(e, &p_ij);
                    }

                    if config.check_bounds && !system.is_admissible(&u_i_new) {
                        restart.store(true, Ordering::Relaxed);
                    }
                    new_u.set(i, &u_i_new);
                    r.set(i, &f_i_high);
                    bounds.set(i, &limiter.bounds(od.hd(i)));
                }
                dispatch.check(graph.is_export(unit))
            });
            dispatch.finish()?;
        }

        if config.limiter_iterations == 0 {
            new_u.update_ghost_values(self.comm, &partitioner.ghost_nodes, self.next_tag(1))?;
            return self.finalize(tau_max, &restart);
        }

        /*
         * Step 5: mass-matrix correction of P_ij, and the first limiter pass
         */
        {
            debug!("time step [H] 5 - compute p_ij, and l_ij");
            let tag = self.next_tag(1);
            let (pij, r, bounds, lij) = (&ws.pij, &ws.r, &ws.bounds, &ws.lij);
            let dispatch = SynchronizationDispatch::new(threshold, || {
                lij.update_ghost_rows(self.comm, &partitioner.ghost_rows, tag)
            });

            units.par_iter().for_each(|unit| {
                let limiter = system.limiter(data, parameters);

                for i in unit.nodes() {
                    let row_length = graph.row_length(i);
                    if row_length == 1 {
                        continue;
                    }
                    let m_i = od.lumped_mass[i];
                    let factor = tau / m_i * (row_length - 1) as f64;
                    let f_i_high = r.get(i);
                    let bounds_i = bounds.get(i);
                    let u_i_new = new_u.get(i);

                    for (col, &j) in graph.columns(i).iter().enumerate().skip(1) {
                        let e = graph.entry(i, col);
                        let m_ij = od.mass_matrix[e];
                        let b_ij = -m_ij / od.lumped_mass[j];
                        let b_ji = -m_ij / m_i;

                        let p_ij = (pij.get(e) + r.get(j) * b_ij - f_i_high * b_ji) * factor;
                        pij.set(e, &p_ij);

                        let (l_ij, success) = limiter.limit(&bounds_i, &u_i_new, &p_ij);
                        lij.set(e, &l_ij);
                        if !success {
                            restart.store(true, Ordering::Relaxed);
                        }
                    }
                }
                dispatch.check(graph.is_export(unit))
            });
            dispatch.finish()?;
        }

        /*
         * Limiter passes: apply the symmetrized coefficients, and for all but
         * the last pass compute the coefficients of the remaining flux.
         */
        let iterations = config.limiter_iterations;

        for pass in 0..iterations {
            let last_round = pass + 1 == iterations;
            debug!("time step [H] 6 - limiter pass {} of {}", pass + 1, iterations);

            if iterations == 2 && last_round {
                std::mem::swap(&mut ws.lij, &mut ws.lij_next);
            }

            let tag = self.next_tag(1);
            let (pij, bounds, lij, lij_next) = (&ws.pij, &ws.bounds, &ws.lij, &ws.lij_next);
            let dispatch = SynchronizationDispatch::new(threshold, || {
                if last_round {
                    new_u.update_ghost_values(self.comm, &partitioner.ghost_nodes, tag)
                } else {
                    lij_next.update_ghost_rows(self.comm, &partitioner.ghost_rows, tag)
                }
            });

            units.par_iter().for_each(|unit| {
                let limiter = system.limiter(data, parameters);

                for i in unit.nodes() {
                    let row_length = graph.row_length(i);
                    if row_length == 1 {
                        continue;
                    }
                    let lambda = 1.0 / (row_length - 1) as f64;
                    let symmetric = |col: usize| {
                        let e = graph.entry(i, col);
                        lij.get(e).min(lij.get(graph.transposed_entry(i, col)))
                    };

                    let mut u_i_new = new_u.get(i);
                    for col in 1..row_length {
                        let p_ij = pij.get(graph.entry(i, col));
                        u_i_new += p_ij * (symmetric(col) * lambda);
                    }

                    if config.check_bounds && !system.is_admissible(&u_i_new) {
                        restart.store(true, Ordering::Relaxed);
                    }
                    new_u.set(i, &u_i_new);

                    if last_round {
                        continue;
                    }
                    let bounds_i = bounds.get(i);

                    for col in 1..row_length {
                        let e = graph.entry(i, col);
                        let l_ij = symmetric(col);
                        let p_ij = pij.get(e) * (1.0 - l_ij);
                        let (new_l_ij, success) = limiter.limit(&bounds_i, &u_i_new, &p_ij);
                        lij_next.set(e, &((1.0 - l_ij) * new_l_ij));

                        if config.check_bounds && !success {
                            restart.store(true, Ordering::Relaxed);
                        }
                    }
                }
                dispatch.check(graph.is_export(unit))
            });
            dispatch.finish()?;
        }

        self.finalize(tau_max, &restart)
    }

    fn finalize(&self, tau_max: f64, restart: &AtomicBool) -> Result<(f64, bool)> {
        debug!("time step [H] 7 - synchronization of restart flag");
        let restart = all_reduce_or(self.comm, self.next_tag(2), restart.load(Ordering::Relaxed));
        Ok((tau_max, restart))
    }
}

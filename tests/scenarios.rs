use convex_hydro::config::{HyperbolicModuleConfig, IdViolationStrategy};
use convex_hydro::geometry::Vector3d;
use convex_hydro::graph::ConnectivityGraph;
use convex_hydro::hydro::euler::{Conserved, EulerSystem, Primitive};
use convex_hydro::hydro::shallow_water::ShallowWaterSystem;
use convex_hydro::hyperbolic_module::HyperbolicModule;
use convex_hydro::meshing::interval;
use convex_hydro::message::local::LocalCommunicator;
use convex_hydro::offline_data::Boundary;
use convex_hydro::state::State;
use convex_hydro::storage::MultiComponentVector;
use convex_hydro::system::{HyperbolicSystem, InitialValues};
use convex_hydro::Error;

fn sod(x: &Vector3d, _t: f64) -> Conserved {
    if x.0 < 0.5 {
        Primitive(1.0, 0.0, 0.0, 0.0, 1.0).to_conserved(1.4)
    } else {
        Primitive(0.125, 0.0, 0.0, 0.0, 0.1).to_conserved(1.4)
    }
}

#[test]
fn sod_limiter_is_inactive_away_from_the_interface() {
    let n = 101;
    let h = 1.0 / (n - 1) as f64;
    let data = interval(n, 0.0, 1.0, false, Boundary::Dirichlet).unwrap();
    let system = EulerSystem::default();
    let comm = LocalCommunicator::solo();
    let config = HyperbolicModuleConfig {
        limiter_iterations: 1,
        ..Default::default()
    };
    let mut module = HyperbolicModule::new(&system, &data, &sod, &comm, config);
    module.prepare().unwrap();

    let u = module.interpolate_initial_values(0.0);
    let mut new_u = MultiComponentVector::new(u.len());
    let mut new_precomputed = MultiComponentVector::new(u.len());
    let tau = module.step(&u, &[], &mut new_u, &mut new_precomputed, 0.0).unwrap();
    assert!(tau > 0.0);

    let graph = &data.graph;
    let lij = module.limiter_coefficients().unwrap();

    for i in 0..graph.n_owned() {
        let x = data.positions[i].0;
        if (x - 0.5).abs() < 5.0 * h {
            continue;
        }
        for col in 1..graph.row_length(i) {
            assert_eq!(lij.get(graph.entry(i, col)), 1.0, "node at x = {}", x);
        }
        for k in 0..5 {
            assert!((new_u.get(i)[k] - u.get(i)[k]).abs() < 1e-14);
        }
    }
}

#[test]
fn sod_density_stays_inside_initial_range() {
    let data = interval(200, 0.0, 1.0, false, Boundary::Dirichlet).unwrap();
    let system = EulerSystem::default();
    let comm = LocalCommunicator::solo();
    let config = HyperbolicModuleConfig {
        cfl: 0.5,
        ..Default::default()
    };
    let mut module = HyperbolicModule::new(&system, &data, &sod, &comm, config);
    module.prepare().unwrap();

    let mut u = module.interpolate_initial_values(0.0);
    let mut new_u = MultiComponentVector::new(u.len());
    let mut new_precomputed = MultiComponentVector::new(u.len());

    for _ in 0..20 {
        module.step(&u, &[], &mut new_u, &mut new_precomputed, 0.0).unwrap();
        module.apply_boundary_conditions(&new_u, 0.0).unwrap();
        std::mem::swap(&mut u, &mut new_u);
    }
    for u_i in u.to_vec() {
        assert!(u_i[0] > 0.12 && u_i[0] < 1.01, "{:?}", u_i);
        assert!(system.is_admissible(&u_i));
    }
}

#[test]
fn isolated_node_is_left_untouched() {
    let ring = interval(8, 0.0, 1.0, true, Boundary::DoNothing).unwrap();
    let n = ring.n_rows();

    let mut rows: Vec<Vec<usize>> = (0..n).map(|i| ring.graph.columns(i).to_vec()).collect();
    rows.push(vec![n]);
    let mut data = ring.clone();
    data.graph = ConnectivityGraph::new(rows, 8, n + 1, 0).unwrap();
    data.lumped_mass.push(1.0);
    data.positions.push(Vector3d::new(2.0, 0.0, 0.0));
    data.mass_matrix.push(1.0);
    data.cij.push(Vector3d::zero());
    data.betaij.push(0.0);

    let system = EulerSystem::default();
    let comm = LocalCommunicator::solo();
    let mut module = HyperbolicModule::new(&system, &data, &sod, &comm, HyperbolicModuleConfig::default());
    module.prepare().unwrap();

    let u = module.interpolate_initial_values(0.0);
    let mut new_u = MultiComponentVector::new(u.len());
    let mut new_precomputed = MultiComponentVector::new(u.len());
    let sentinel = Conserved::new([42.0; 5]);
    new_u.fill(&sentinel);

    module.step(&u, &[], &mut new_u, &mut new_precomputed, 0.0).unwrap();
    assert_eq!(new_u.get(n), sentinel);
    assert_eq!(module.alpha().unwrap().get(n), 0.0);
    assert_ne!(new_u.get(0), sentinel);
}

#[test]
fn oversized_step_requests_restart() {
    let data = interval(64, 0.0, 1.0, false, Boundary::Dirichlet).unwrap();
    let system = EulerSystem::default();
    let comm = LocalCommunicator::solo();

    let probe = HyperbolicModuleConfig {
        cfl: 1.0,
        precompute_only: true,
        ..Default::default()
    };
    let mut module = HyperbolicModule::new(&system, &data, &sod, &comm, probe);
    module.prepare().unwrap();
    let u = module.interpolate_initial_values(0.0);
    let mut new_u = MultiComponentVector::new(u.len());
    let mut new_precomputed = MultiComponentVector::new(u.len());
    let tau_max = module.step(&u, &[], &mut new_u, &mut new_precomputed, 0.0).unwrap();

    let config = HyperbolicModuleConfig {
        cfl: 1.0,
        id_violation_strategy: IdViolationStrategy::Raise,
        check_bounds: true,
        ..Default::default()
    };
    let mut module = HyperbolicModule::new(&system, &data, &sod, &comm, config);
    module.prepare().unwrap();
    let before = u.to_vec();

    let result = module.step(&u, &[], &mut new_u, &mut new_precomputed, 2.0 * tau_max);
    assert!(matches!(result, Err(Error::Restart)));
    assert_eq!(module.n_restarts(), 1);
    assert_eq!(module.n_warnings(), 0);
    assert_eq!(u.to_vec(), before);

    module.set_cfl(0.5).unwrap();
    let result = module.step(&u, &[], &mut new_u, &mut new_precomputed, 0.0);
    assert!(result.is_ok());
    assert_eq!(module.n_restarts(), 1);
}

#[test]
fn oversized_step_is_counted_under_warn() {
    let data = interval(64, 0.0, 1.0, false, Boundary::Dirichlet).unwrap();
    let system = EulerSystem::default();
    let comm = LocalCommunicator::solo();
    let config = HyperbolicModuleConfig {
        cfl: 1.0,
        check_bounds: true,
        ..Default::default()
    };
    let mut module = HyperbolicModule::new(&system, &data, &sod, &comm, config);
    module.prepare().unwrap();

    let u = module.interpolate_initial_values(0.0);
    let mut new_u = MultiComponentVector::new(u.len());
    let mut new_precomputed = MultiComponentVector::new(u.len());
    let tau_max = module.step(&u, &[], &mut new_u, &mut new_precomputed, 0.0).unwrap();
    let warnings = module.n_warnings();

    let result = module.step(&u, &[], &mut new_u, &mut new_precomputed, 2.0 * tau_max);
    assert_eq!(result.unwrap(), tau_max);
    assert_eq!(module.n_warnings(), warnings + 1);
    assert_eq!(module.n_restarts(), 0);
}

// ============================================================================
fn bump(x: f64) -> f64 {
    0.5 * (-(x - 0.5).powi(2) / 0.01).exp()
}

struct LakeAtRest {
    level: f64,
}

impl InitialValues<ShallowWaterSystem> for LakeAtRest {
    fn initial_state(&self, position: &Vector3d, _t: f64) -> State<4> {
        State([self.level - bump(position.0), 0.0, 0.0, 0.0])
    }

    fn initial_precomputed(&self, position: &Vector3d) -> f64 {
        bump(position.0)
    }
}

#[test]
fn lake_at_rest_is_preserved() {
    let data = interval(64, 0.0, 1.0, false, Boundary::Slip).unwrap();
    let system = ShallowWaterSystem::default();
    let comm = LocalCommunicator::solo();
    let initial = LakeAtRest { level: 1.0 };
    let mut module = HyperbolicModule::new(&system, &data, &initial, &comm, HyperbolicModuleConfig::default());
    module.prepare().unwrap();

    let mut u = module.interpolate_initial_values(0.0);
    let mut new_u = MultiComponentVector::new(u.len());
    let mut new_precomputed = MultiComponentVector::new(u.len());

    for _ in 0..20 {
        module.step(&u, &[], &mut new_u, &mut new_precomputed, 0.0).unwrap();
        module.apply_boundary_conditions(&new_u, 0.0).unwrap();
        std::mem::swap(&mut u, &mut new_u);
    }
    for (i, u_i) in u.to_vec().iter().enumerate() {
        let z = bump(data.positions[i].0);
        assert!((u_i[0] + z - 1.0).abs() < 1e-12, "node {}: {:?}", i, u_i);
        assert!(u_i[1].abs() < 1e-12, "node {}: {:?}", i, u_i);
    }
}

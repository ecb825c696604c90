use clap::Parser;
use convex_hydro::config::{HyperbolicModuleConfig, IdViolationStrategy};
use convex_hydro::geometry::Vector3d;
use convex_hydro::hydro::euler::{Conserved, EulerSystem, Primitive};
use convex_hydro::hyperbolic_module::{HyperbolicModule, Stage};
use convex_hydro::message::local::LocalCommunicator;
use convex_hydro::offline_data::Boundary;
use convex_hydro::storage::MultiComponentVector;
use convex_hydro::system::InitialValues;
use convex_hydro::{meshing, thread_pool, Error};
use log::{info, warn};
use simple_logger::SimpleLogger;

#[derive(Debug, Parser)]
#[clap(version = "1.0", author = "J. Zrake <jzrake@clemson.edu>")]
struct Opts {
    #[clap(short = 'n', long, default_value = "400")]
    nodes: usize,

    #[clap(short = 'f', long, default_value = "0.2")]
    final_time: f64,

    #[clap(short = 'c', long, default_value = "0.5")]
    cfl: f64,

    #[clap(short = 't', long, default_value = "1")]
    threads: usize,

    #[clap(short = 'o', long, default_value = "sod.cbor")]
    output: String,

    /// Fail steps on invariant domain violations and retry with a smaller
    /// CFL number, instead of only logging them
    #[clap(long)]
    raise: bool,
}




/**
 * The final solution, in primitive variables, sorted by position
 */
#[derive(serde::Serialize)]
struct Output {
    time: f64,
    iteration: u64,
    restarts: usize,
    x: Vec<f64>,
    primitive: Vec<[f64; 5]>,
}




// ============================================================================
fn sod(x: &Vector3d, _t: f64) -> Conserved {
    if x.0 < 0.5 {
        Primitive(1.0, 0.0, 0.0, 0.0, 1.0).to_conserved(1.4)
    } else {
        Primitive(0.125, 0.0, 0.0, 0.0, 0.1).to_conserved(1.4)
    }
}




/**
 * One cycle of the three-stage, third-order explicit Runge-Kutta scheme.
 * Every stage is a hyperbolic step of size `tau`; later stages fold in the
 * earlier states through their stage weights. Returns the new state, the
 * time advanced, and the admissible step size of the first stage.
 */
fn erk33<I>(
    module: &mut HyperbolicModule<EulerSystem, LocalCommunicator, I>,
    u0: &MultiComponentVector<Conserved>,
    time: f64,
    tau_requested: f64,
) -> Result<(MultiComponentVector<Conserved>, f64, f64), Error>
where
    I: InitialValues<EulerSystem>,
{
    let n = u0.len();
    let (mut u1, mut u2, mut u3) = (MultiComponentVector::new(n), MultiComponentVector::new(n), MultiComponentVector::new(n));
    let (mut p0, mut p1, mut p2) = (MultiComponentVector::new(n), MultiComponentVector::new(n), MultiComponentVector::new(n));

    let tau_max = module.step(u0, &[], &mut u1, &mut p0, tau_requested)?;
    let tau = if tau_requested == 0.0 { tau_max } else { tau_requested };
    module.apply_boundary_conditions(&u1, time + tau)?;

    let stages = [Stage { state: u0, precomputed: &p0, weight: -1.0 }];
    module.step(&u1, &stages, &mut u2, &mut p1, tau)?;
    module.apply_boundary_conditions(&u2, time + 2.0 * tau)?;

    let stages = [
        Stage { state: u0, precomputed: &p0, weight: 0.75 },
        Stage { state: &u1, precomputed: &p1, weight: -2.0 },
    ];
    module.step(&u2, &stages, &mut u3, &mut p2, tau)?;
    module.apply_boundary_conditions(&u3, time + 3.0 * tau)?;

    Ok((u3, 3.0 * tau, tau_max))
}




// ============================================================================
fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    SimpleLogger::new().with_level(log::LevelFilter::Info).init().unwrap();
    info!("{:?}", opts);

    let config = HyperbolicModuleConfig {
        cfl: opts.cfl,
        check_bounds: opts.raise,
        id_violation_strategy: if opts.raise {
            IdViolationStrategy::Raise
        } else {
            IdViolationStrategy::Warn
        },
        ..Default::default()
    };

    let data = meshing::interval(opts.nodes, 0.0, 1.0, false, Boundary::Dirichlet)?;
    let system = EulerSystem::default();
    let comm = LocalCommunicator::solo();
    let pool = thread_pool::build(opts.threads, false)?;

    let output = pool.install(|| -> Result<Output, Error> {
        let mut module = HyperbolicModule::new(&system, &data, &sod, &comm, config);
        module.prepare()?;

        let mut u = module.interpolate_initial_values(0.0);
        let mut time = 0.0;
        let mut iteration = 0;
        let mut tau_estimate = 0.0;
        let start = std::time::Instant::now();

        while time < opts.final_time {
            let remaining = (opts.final_time - time) / 3.0;
            let tau_requested = if remaining < tau_estimate { remaining } else { 0.0 };

            match erk33(&mut module, &u, time, tau_requested) {
                Ok((new_u, dt, tau_max)) => {
                    u = new_u;
                    time = if tau_requested > 0.0 { opts.final_time } else { time + dt };
                    iteration += 1;
                    tau_estimate = tau_max;
                    info!("[{}] t={:.4} dt={:.3e}", iteration, time, dt);
                }
                Err(Error::Restart) => {
                    let cfl = 0.8 * module.cfl();
                    warn!("[{}] restarting cycle with cfl={:.3}", iteration, cfl);
                    module.set_cfl(cfl)?;
                    tau_estimate = 0.8 * tau_estimate;
                }
                Err(error) => return Err(error),
            }
        }
        info!("{} cycles in {:.3}s", iteration, start.elapsed().as_secs_f64());

        let mut rows: Vec<_> = (0..data.n_owned())
            .map(|i| -> Result<_, Error> { Ok((data.positions[i].0, system.to_primitive(&u.get(i))?)) })
            .collect::<Result<_, _>>()?;
        rows.sort_by(|a, b| a.0.total_cmp(&b.0));

        Ok(Output {
            time,
            iteration,
            restarts: module.n_restarts(),
            x: rows.iter().map(|(x, _)| *x).collect(),
            primitive: rows.iter().map(|(_, p)| [p.0, p.1, p.2, p.3, p.4]).collect(),
        })
    })?;

    let file = std::fs::File::create(&opts.output).unwrap();
    let mut buffer = std::io::BufWriter::new(file);
    ciborium::ser::into_writer(&output, &mut buffer).unwrap();
    info!("wrote {}", opts.output);
    Ok(())
}

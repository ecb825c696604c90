use clap::Parser;
use convex_hydro::config::HyperbolicModuleConfig;
use convex_hydro::geometry::Vector3d;
use convex_hydro::hydro::shallow_water::{Conserved, ShallowWaterSystem};
use convex_hydro::hyperbolic_module::HyperbolicModule;
use convex_hydro::message::local::LocalCommunicator;
use convex_hydro::offline_data::Boundary;
use convex_hydro::state::State;
use convex_hydro::storage::MultiComponentVector;
use convex_hydro::system::InitialValues;
use convex_hydro::{meshing, thread_pool, Error};
use log::info;
use simple_logger::SimpleLogger;

#[derive(Debug, Parser)]
#[clap(version = "1.0", author = "J. Zrake <jzrake@clemson.edu>")]
struct Opts {
    #[clap(short = 'n', long, default_value = "33")]
    nodes: usize,

    #[clap(short = 's', long, default_value = "200")]
    steps: usize,

    #[clap(short = 't', long, default_value = "1")]
    threads: usize,

    #[clap(long)]
    pin_to_cores: bool,

    /// Read the hyperbolic module configuration from a CBOR file
    #[clap(long)]
    config: Option<String>,

    /// Write the configuration in use to a CBOR file and exit
    #[clap(long)]
    dump_config: Option<String>,
}




/**
 * Still water at a constant free surface `level` over a Gaussian mound.
 */
struct LakeAtRest {
    level: f64,
}

impl LakeAtRest {
    fn bathymetry(&self, x: &Vector3d) -> f64 {
        let r2 = (x.0 - 0.5).powi(2) + (x.1 - 0.5).powi(2);
        0.5 * (-r2 / 0.02).exp()
    }
}

impl InitialValues<ShallowWaterSystem> for LakeAtRest {
    fn initial_state(&self, position: &Vector3d, _t: f64) -> Conserved {
        State([self.level - self.bathymetry(position), 0.0, 0.0, 0.0])
    }

    fn initial_precomputed(&self, position: &Vector3d) -> f64 {
        self.bathymetry(position)
    }
}




// ============================================================================
fn main() -> Result<(), Error> {
    let opts = Opts::parse();
    SimpleLogger::new().with_level(log::LevelFilter::Info).init().unwrap();
    info!("{:?}", opts);

    let config = match &opts.config {
        Some(path) => HyperbolicModuleConfig::from_cbor(std::fs::File::open(path).unwrap())?,
        None => HyperbolicModuleConfig::default(),
    };

    if let Some(path) = &opts.dump_config {
        config.to_cbor(std::io::BufWriter::new(std::fs::File::create(path).unwrap()))?;
        info!("wrote {}", path);
        return Ok(());
    }

    let data = meshing::rectangle(opts.nodes, opts.nodes, 0.0..1.0, 0.0..1.0, Boundary::Slip)?;
    let system = ShallowWaterSystem::default();
    let initial = LakeAtRest { level: 1.0 };
    let comm = LocalCommunicator::solo();
    let pool = thread_pool::build(opts.threads, opts.pin_to_cores)?;

    pool.install(|| -> Result<(), Error> {
        let mut module = HyperbolicModule::new(&system, &data, &initial, &comm, config);
        module.prepare()?;

        let mut u = module.interpolate_initial_values(0.0);
        let mut new_u = MultiComponentVector::new(u.len());
        let mut new_precomputed = MultiComponentVector::new(u.len());
        let mut time = 0.0;

        for iteration in 1..=opts.steps {
            time += module.step(&u, &[], &mut new_u, &mut new_precomputed, 0.0)?;
            module.apply_boundary_conditions(&new_u, time)?;
            std::mem::swap(&mut u, &mut new_u);

            let (mut max_speed, mut max_deviation) = (0.0_f64, 0.0_f64);

            for i in 0..data.n_owned() {
                let (h, v) = system.to_primitive(&u.get(i))?;
                let level = h + initial.bathymetry(&data.positions[i]);
                max_speed = max_speed.max(v.norm());
                max_deviation = max_deviation.max((level - initial.level).abs());
            }
            info!(
                "[{}] t={:.4} max |v|={:.3e} max |h + Z - H|={:.3e}",
                iteration, time, max_speed, max_deviation
            );
        }
        info!("{} restarts, {} warnings", module.n_restarts(), module.n_warnings());
        Ok(())
    })
}

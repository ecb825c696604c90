use thiserror::Error;

/**
 * Error type for everything that can go wrong while preparing or advancing a
 * hyperbolic update.
 */
#[derive(Debug, Error)]
pub enum Error {
    #[error("bounds violation detected, the step must be restarted with a smaller time step")]
    Restart,

    #[error("invalid admissible time step: {0}")]
    InvalidTimeStep(f64),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("inconsistent connectivity graph: {0}")]
    Graph(String),

    #[error("the hyperbolic module must be prepared before stepping")]
    NotPrepared,

    #[error("ghost exchange failed: {0}")]
    Exchange(String),

    #[error("could not decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("could not encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("could not build thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error(transparent)]
    Hydro(#[from] crate::hydro::error::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

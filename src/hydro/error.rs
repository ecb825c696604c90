use thiserror::Error;

/**
 * Error to represent invalid hydrodynamics data or primitive variable recovery.
 */
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum Error {
    #[error("negative gas pressure: {0}")]
    NegativeGasPressure(f64),

    #[error("negative mass density: {0}")]
    NegativeMassDensity(f64),

    #[error("negative water depth: {0}")]
    NegativeWaterDepth(f64),
}

//! Physical models: compressible Euler, shallow water with bathymetry, and
//! scalar conservation laws.

pub mod error;
pub mod euler;
pub mod scalar;
pub mod shallow_water;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;

/**
 * What the step does when a node leaves its admissible set or its local
 * bounds.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdViolationStrategy {
    /// Count and log the violation, keep the result.
    Warn,
    /// Count the violation and fail the step with `Error::Restart`.
    Raise,
}

impl Default for IdViolationStrategy {
    fn default() -> Self {
        IdViolationStrategy::Warn
    }
}

impl FromStr for IdViolationStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "warn" => Ok(IdViolationStrategy::Warn),
            "raise" => Ok(IdViolationStrategy::Raise),
            _ => Err(Error::Config(format!(
                "unknown id violation strategy '{}' (expected warn or raise)",
                s
            ))),
        }
    }
}

/**
 * Runtime parameters of the hyperbolic module.
 */
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperbolicModuleConfig {
    pub cfl: f64,
    pub limiter_iterations: usize,
    pub limiter_newton_tolerance: f64,
    pub limiter_newton_max_iterations: usize,
    pub indicator_evc_factor: f64,
    pub limiter_relaxation_factor: f64,
    pub limiter_relaxation_exponent: f64,
    pub cfl_with_boundary_dofs: bool,
    pub id_violation_strategy: IdViolationStrategy,
    pub check_bounds: bool,
    pub precompute_only: bool,
}

impl Default for HyperbolicModuleConfig {
    fn default() -> Self {
        Self {
            cfl: 0.2,
            limiter_iterations: 2,
            limiter_newton_tolerance: 1e-10,
            limiter_newton_max_iterations: 2,
            indicator_evc_factor: 1.0,
            limiter_relaxation_factor: 1.0,
            limiter_relaxation_exponent: 1.5,
            cfl_with_boundary_dofs: false,
            id_violation_strategy: IdViolationStrategy::Warn,
            check_bounds: false,
            precompute_only: false,
        }
    }
}

// ============================================================================
impl HyperbolicModuleConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.cfl.is_finite() || self.cfl <= 0.0 {
            return Err(Error::Config(format!("cfl must be positive, got {}", self.cfl)));
        }
        if self.limiter_iterations > 2 {
            return Err(Error::Config(format!(
                "at most two limiter iterations are supported, got {}",
                self.limiter_iterations
            )));
        }
        if self.limiter_newton_tolerance.is_nan() || self.limiter_newton_tolerance <= 0.0 {
            return Err(Error::Config(format!(
                "limiter newton tolerance must be positive, got {}",
                self.limiter_newton_tolerance
            )));
        }
        if self.indicator_evc_factor < 0.0 || self.limiter_relaxation_factor < 0.0 {
            return Err(Error::Config(
                "indicator and relaxation factors must be non-negative".to_string(),
            ));
        }
        if !self.limiter_relaxation_exponent.is_finite() || self.limiter_relaxation_exponent <= 0.0 {
            return Err(Error::Config(format!(
                "limiter relaxation exponent must be positive, got {}",
                self.limiter_relaxation_exponent
            )));
        }
        Ok(())
    }

    pub fn from_cbor<R: Read>(reader: R) -> Result<Self> {
        let config: Self = ciborium::de::from_reader(reader)
            .map_err(|e| Error::Config(format!("{:?}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_cbor<W: Write>(&self, writer: W) -> Result<()> {
        ciborium::ser::into_writer(self, writer).map_err(|e| Error::Config(format!("{:?}", e)))
    }
}

use crate::error::{Error, Result};
use crate::geometry::Vector3d;
use crate::graph::ConnectivityGraph;
use crate::message::exchange::ExchangePlan;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/**
 * The kind of boundary condition attached to a boundary node.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Boundary {
    DoNothing,
    Periodic,
    Slip,
    NoSlip,
    Dirichlet,
    Dynamic,
}

/**
 * Geometric data of a boundary node.
 */
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundaryRecord {
    /// Unit outward normal
    pub normal: Vector3d,
    pub kind: Boundary,
    pub position: Vector3d,
}

/**
 * Exchange plans for ghost nodes, and for the locally stored entries of
 * ghost rows.
 */
#[derive(Clone, Debug, Default)]
pub struct Partitioner {
    pub ghost_nodes: ExchangePlan,
    pub ghost_rows: ExchangePlan,
}

/**
 * The static, read-only operators of a discretization: the connectivity
 * graph and the matrices assembled on it. Per-entry data is indexed by flat
 * graph entry.
 */
#[derive(Clone, Debug)]
pub struct OfflineData {
    pub dim: usize,
    pub graph: ConnectivityGraph,
    pub lumped_mass: Vec<f64>,
    pub mass_matrix: Vec<f64>,
    pub cij: Vec<Vector3d>,
    pub betaij: Vec<f64>,
    pub boundary_map: BTreeMap<usize, BoundaryRecord>,
    pub positions: Vec<Vector3d>,
    pub measure_of_omega: f64,
    pub partitioner: Partitioner,
}

// ============================================================================
impl OfflineData {
    /// Check that all per-node and per-entry arrays match the graph.
    pub fn validate(&self) -> Result<()> {
        let n_rows = self.graph.n_rows();
        let n_entries = self.graph.n_entries();

        if self.lumped_mass.len() != n_rows || self.positions.len() != n_rows {
            return Err(Error::Graph(format!(
                "expected {} lumped masses and positions, got {} and {}",
                n_rows,
                self.lumped_mass.len(),
                self.positions.len()
            )));
        }
        if self.mass_matrix.len() != n_entries
            || self.cij.len() != n_entries
            || self.betaij.len() != n_entries
        {
            return Err(Error::Graph(format!(
                "expected {} entries in every matrix",
                n_entries
            )));
        }
        if let Some(i) = (0..self.graph.n_owned())
            .find(|&i| self.graph.row_length(i) > 1 && !(self.lumped_mass[i] > 0.0))
        {
            return Err(Error::Graph(format!("node {} has non-positive lumped mass", i)));
        }
        if !(self.measure_of_omega > 0.0) || !(1..=3).contains(&self.dim) {
            return Err(Error::Graph(format!(
                "invalid domain: measure {}, dimension {}",
                self.measure_of_omega, self.dim
            )));
        }
        Ok(())
    }

    pub fn n_owned(&self) -> usize {
        self.graph.n_owned()
    }

    pub fn n_rows(&self) -> usize {
        self.graph.n_rows()
    }

    /// Relative size of node `i`, `m_i / |Omega|`.
    pub fn hd(&self, i: usize) -> f64 {
        self.lumped_mass[i] / self.measure_of_omega
    }

    pub fn is_boundary(&self, i: usize) -> bool {
        self.boundary_map.contains_key(&i)
    }
}

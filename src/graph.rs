use crate::error::{Error, Result};
use std::collections::HashMap;
use std::ops::Range;

/// Width of a lane group in the internal node range.
pub const LANES: usize = 4;

/**
 * A unit of parallel work: either a lane group of `LANES` consecutive
 * internal nodes sharing a row length, or a single node of the remainder
 * range.
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Unit {
    Batch(usize),
    Scalar(usize),
}

// ============================================================================
impl Unit {
    pub fn first(&self) -> usize {
        match self {
            Unit::Batch(first) => *first,
            Unit::Scalar(i) => *i,
        }
    }

    pub fn nodes(&self) -> Range<usize> {
        match self {
            Unit::Batch(first) => *first..*first + LANES,
            Unit::Scalar(i) => *i..*i + 1,
        }
    }
}

/**
 * Sparse row/column structure over the locally relevant nodes, stored row
 * by row. Column 0 of every row is the diagonal. Rows are ordered so that
 * `[0, n_internal)` splits into lane groups of uniform row length, followed
 * by the remainder of the owned rows `[n_internal, n_owned)` and the ghost
 * rows `[n_owned, n_rows)`. Ghost rows only hold the columns that are
 * locally relevant.
 */
#[derive(Clone, Debug)]
pub struct ConnectivityGraph {
    row_starts: Vec<usize>,
    columns: Vec<usize>,
    transposed: Vec<usize>,
    n_internal: usize,
    n_owned: usize,
    n_export: usize,
    coupling_pairs: Vec<(usize, usize, usize)>,
    units: Vec<Unit>,
    n_export_units: usize,
}

// ============================================================================
impl ConnectivityGraph {
    /// Build a graph from its rows. Every row must start with its own index.
    /// `n_internal` must be a multiple of `LANES` and each lane group must
    /// share one row length. Owned nodes `[0, n_export)` are the ones other
    /// ranks read as ghosts.
    ///
    pub fn new(
        rows: Vec<Vec<usize>>,
        n_internal: usize,
        n_owned: usize,
        n_export: usize,
    ) -> Result<Self> {
        let n_rows = rows.len();

        if n_internal % LANES != 0 {
            return Err(Error::Graph(format!(
                "internal range {} is not a multiple of the lane width {}",
                n_internal, LANES
            )));
        }
        if n_internal > n_owned || n_owned > n_rows || n_export > n_owned {
            return Err(Error::Graph(format!(
                "inconsistent ranges: internal {}, owned {}, export {}, rows {}",
                n_internal, n_owned, n_export, n_rows
            )));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.first() != Some(&i) {
                return Err(Error::Graph(format!("row {} does not start with its diagonal", i)));
            }
            if let Some(j) = row.iter().find(|&&j| j >= n_rows) {
                return Err(Error::Graph(format!("row {} references unknown node {}", i, j)));
            }
        }
        for first in (0..n_internal).step_by(LANES) {
            let row_length = rows[first].len();
            if rows[first..first + LANES].iter().any(|row| row.len() != row_length) {
                return Err(Error::Graph(format!(
                    "lane group starting at {} has non-uniform row lengths",
                    first
                )));
            }
        }

        let mut row_starts = Vec::with_capacity(n_rows + 1);
        let mut columns = Vec::new();
        let mut lookup = HashMap::new();
        row_starts.push(0);

        for (i, row) in rows.iter().enumerate() {
            for (col, &j) in row.iter().enumerate() {
                lookup.insert((i, j), columns.len() + col);
            }
            columns.extend_from_slice(row);
            row_starts.push(columns.len());
        }

        let mut transposed = vec![usize::MAX; columns.len()];
        let mut coupling_pairs = Vec::new();

        for (i, row) in rows.iter().enumerate() {
            for (col, &j) in row.iter().enumerate() {
                let entry = row_starts[i] + col;
                match lookup.get(&(j, i)) {
                    Some(t) => transposed[entry] = *t,
                    None if i < n_owned => {
                        return Err(Error::Graph(format!(
                            "entry ({}, {}) has no transposed counterpart",
                            i, j
                        )))
                    }
                    None => {}
                }
                if i < n_owned && j >= n_owned {
                    coupling_pairs.push((i, col, j));
                }
            }
        }

        let units: Vec<_> = (0..n_internal)
            .step_by(LANES)
            .map(Unit::Batch)
            .chain((n_internal..n_owned).map(Unit::Scalar))
            .collect();
        let n_export_units = units.iter().filter(|u| u.first() < n_export).count();

        Ok(Self {
            row_starts,
            columns,
            transposed,
            n_internal,
            n_owned,
            n_export,
            coupling_pairs,
            units,
            n_export_units,
        })
    }

    pub fn n_rows(&self) -> usize {
        self.row_starts.len() - 1
    }

    pub fn n_entries(&self) -> usize {
        self.columns.len()
    }

    pub fn n_internal(&self) -> usize {
        self.n_internal
    }

    pub fn n_owned(&self) -> usize {
        self.n_owned
    }

    pub fn n_export(&self) -> usize {
        self.n_export
    }

    pub fn row_length(&self, i: usize) -> usize {
        self.row_starts[i + 1] - self.row_starts[i]
    }

    /// The neighbors of node `i`, starting with `i` itself.
    pub fn columns(&self, i: usize) -> &[usize] {
        &self.columns[self.row_starts[i]..self.row_starts[i + 1]]
    }

    /// Flat storage index of entry `(i, col)`.
    pub fn entry(&self, i: usize, col: usize) -> usize {
        self.row_starts[i] + col
    }

    /// Flat storage index of the entry `(j, i)`, where `j` is the column at
    /// `(i, col)`. Only guaranteed to exist for owned rows.
    pub fn transposed_entry(&self, i: usize, col: usize) -> usize {
        self.transposed[self.entry(i, col)]
    }

    /// Pairs `(i, col, j)` of owned rows `i` coupling to a ghost node `j`.
    pub fn coupling_pairs(&self) -> &[(usize, usize, usize)] {
        &self.coupling_pairs
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }

    pub fn n_export_units(&self) -> usize {
        self.n_export_units
    }

    pub fn is_export(&self, unit: &Unit) -> bool {
        unit.first() < self.n_export
    }

    /// Whether column `col` lies below the diagonal for every node of the
    /// unit. Batched rows are only skipped if all lanes agree.
    pub fn is_below_diagonal(&self, unit: &Unit, col: usize) -> bool {
        unit.nodes().all(|i| self.columns(i)[col] < i)
    }
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{ConnectivityGraph, Unit, LANES};

    fn ring(n: usize) -> Vec<Vec<usize>> {
        (0..n).map(|i| vec![i, (i + n - 1) % n, (i + 1) % n]).collect()
    }

    #[test]
    fn ring_graph_has_batches_and_scalars() {
        let graph = ConnectivityGraph::new(ring(10), 8, 10, 0).unwrap();
        assert_eq!(graph.units().len(), 2 + 2);
        assert_eq!(graph.units()[1], Unit::Batch(LANES));
        assert_eq!(graph.units()[2], Unit::Scalar(8));
        assert_eq!(graph.n_entries(), 30);
        assert_eq!(graph.row_length(3), 3);
    }

    #[test]
    fn transposed_entry_points_back() {
        let graph = ConnectivityGraph::new(ring(6), 4, 6, 0).unwrap();
        for i in 0..6 {
            for col in 0..graph.row_length(i) {
                let j = graph.columns(i)[col];
                let t = graph.transposed_entry(i, col);
                let back = graph.transposed_entry(j, t - graph.entry(j, 0));
                assert_eq!(back, graph.entry(i, col));
            }
        }
    }

    #[test]
    fn non_uniform_lane_group_is_rejected() {
        let mut rows = ring(8);
        rows[2].pop();
        assert!(ConnectivityGraph::new(rows, 4, 8, 0).is_err());
    }

    #[test]
    fn missing_diagonal_is_rejected() {
        let mut rows = ring(4);
        rows[1].swap(0, 1);
        assert!(ConnectivityGraph::new(rows, 0, 4, 0).is_err());
    }

    #[test]
    fn lane_aware_diagonal_test() {
        let graph = ConnectivityGraph::new(ring(8), 8, 8, 0).unwrap();
        // column 1 is the left neighbor: below the diagonal except for node 0
        assert!(!graph.is_below_diagonal(&Unit::Batch(0), 1));
        assert!(graph.is_below_diagonal(&Unit::Batch(4), 1));
        assert!(!graph.is_below_diagonal(&Unit::Batch(4), 2));
    }

    #[test]
    fn export_units_are_counted() {
        let graph = ConnectivityGraph::new(ring(10), 8, 10, 5).unwrap();
        assert_eq!(graph.n_export_units(), 2);
        assert!(graph.is_export(&Unit::Batch(4)));
        assert!(!graph.is_export(&Unit::Scalar(8)));
    }
}

use crate::error::{Error, Result};
use crate::geometry::Vector3d;
use crate::graph::{ConnectivityGraph, LANES};
use crate::message::exchange::ExchangePlan;
use crate::offline_data::{Boundary, BoundaryRecord, OfflineData, Partitioner};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

/// The matrix entries assembled for one pair of mesh nodes.
///
#[derive(Clone, Copy, Debug, Default)]
struct Coupling {
    mass: f64,
    c: Vector3d,
    beta: f64,
}

/// Accumulates P1 finite element operators on a mesh, indexed by mesh node.
///
struct Assembly {
    dim: usize,
    positions: Vec<Vector3d>,
    lumped_mass: Vec<f64>,
    rows: Vec<BTreeMap<usize, Coupling>>,
    boundary: BTreeMap<usize, Vector3d>,
    measure: f64,
}

impl Assembly {
    fn new(dim: usize, positions: Vec<Vector3d>, measure: f64) -> Self {
        let n = positions.len();
        Self {
            dim,
            positions,
            lumped_mass: vec![0.0; n],
            rows: vec![BTreeMap::new(); n],
            boundary: BTreeMap::new(),
            measure,
        }
    }

    fn add(&mut self, i: usize, j: usize, mass: f64, c: Vector3d, beta: f64) {
        let entry = self.rows[i].entry(j).or_default();
        entry.mass += mass;
        entry.c += c;
        entry.beta += beta;
    }

    /// Add a P1 segment between mesh nodes `a` and `b`, oriented from `a` to
    /// `b`, of length `h`.
    fn add_segment(&mut self, a: usize, b: usize, h: f64) {
        let x = Vector3d::new(0.5, 0.0, 0.0);
        self.add(a, a, h / 3.0, -x, 1.0 / h);
        self.add(a, b, h / 6.0, x, -1.0 / h);
        self.add(b, a, h / 6.0, -x, -1.0 / h);
        self.add(b, b, h / 3.0, x, 1.0 / h);
        self.lumped_mass[a] += 0.5 * h;
        self.lumped_mass[b] += 0.5 * h;
    }

    /// Add a P1 triangle with counter-clockwise vertices.
    fn add_triangle(&mut self, vertices: [usize; 3]) {
        let p: Vec<_> = vertices.iter().map(|&v| self.positions[v]).collect();
        let area = 0.5 * ((p[1].0 - p[0].0) * (p[2].1 - p[0].1) - (p[2].0 - p[0].0) * (p[1].1 - p[0].1));
        let gradient: Vec<_> = (0..3)
            .map(|k| {
                let (a, b) = (p[(k + 1) % 3], p[(k + 2) % 3]);
                Vector3d::new(a.1 - b.1, b.0 - a.0, 0.0) / (2.0 * area)
            })
            .collect();

        for k in 0..3 {
            for l in 0..3 {
                let mass = if k == l { area / 6.0 } else { area / 12.0 };
                let c = gradient[l] * (area / 3.0);
                let beta = area * gradient[k].dot(&gradient[l]);
                self.add(vertices[k], vertices[l], mass, c, beta);
            }
            self.lumped_mass[vertices[k]] += area / 3.0;
        }
    }

    /// Register a boundary facet of the given measure and outward normal
    /// touching mesh node `i`.
    fn add_boundary(&mut self, i: usize, normal: Vector3d, measure: f64) {
        *self.boundary.entry(i).or_insert_with(Vector3d::zero) += normal * measure;
    }

    /// Order the nodes of a single-rank mesh: lane groups of interior nodes
    /// with uniform row length first, then the remaining interior nodes,
    /// then the boundary nodes.
    fn serial_layout(&self) -> (Vec<usize>, usize) {
        let mut classes: BTreeMap<usize, Vec<usize>> = BTreeMap::new();

        for i in (0..self.rows.len()).filter(|i| !self.boundary.contains_key(i)) {
            classes.entry(self.rows[i].len()).or_default().push(i)
        }
        let mut internal = Vec::new();
        let mut remainder = Vec::new();

        for nodes in classes.values() {
            let split = nodes.len() / LANES * LANES;
            internal.extend_from_slice(&nodes[..split]);
            remainder.extend_from_slice(&nodes[split..]);
        }
        let n_internal = internal.len();
        let order = internal
            .into_iter()
            .chain(remainder)
            .chain(self.boundary.keys().copied())
            .collect();
        (order, n_internal)
    }

    /// Build the offline data of the locally stored nodes `order` (mesh
    /// indices, in local order). Rows of ghost nodes keep only the columns
    /// that are stored locally.
    fn into_offline_data(
        self,
        order: &[usize],
        n_internal: usize,
        n_owned: usize,
        n_export: usize,
        kind: Boundary,
        partitioner: Partitioner,
    ) -> Result<OfflineData> {
        let local: BTreeMap<usize, usize> = order.iter().enumerate().map(|(l, &g)| (g, l)).collect();

        let rows: Vec<Vec<usize>> = order
            .iter()
            .enumerate()
            .map(|(l, &g)| {
                let mut columns: Vec<usize> = self.rows[g]
                    .keys()
                    .filter_map(|j| local.get(j).copied())
                    .filter(|&k| k != l)
                    .collect();
                columns.sort_unstable();
                std::iter::once(l).chain(columns).collect()
            })
            .collect();

        let mut mass_matrix = Vec::new();
        let mut cij = Vec::new();
        let mut betaij = Vec::new();

        for (row, &g) in rows.iter().zip(order) {
            for &l in row {
                let coupling = self.rows[g].get(&order[l]).copied().unwrap_or_default();
                mass_matrix.push(coupling.mass);
                cij.push(coupling.c);
                betaij.push(coupling.beta);
            }
        }

        let boundary_map = order
            .iter()
            .enumerate()
            .filter_map(|(l, g)| {
                self.boundary.get(g).map(|normal| {
                    let record = BoundaryRecord {
                        normal: normal.normalized(),
                        kind,
                        position: self.positions[*g],
                    };
                    (l, record)
                })
            })
            .collect();

        let offline_data = OfflineData {
            dim: self.dim,
            graph: ConnectivityGraph::new(rows, n_internal, n_owned, n_export)?,
            lumped_mass: order.iter().map(|&g| self.lumped_mass[g]).collect(),
            mass_matrix,
            cij,
            betaij,
            boundary_map,
            positions: order.iter().map(|&g| self.positions[g]).collect(),
            measure_of_omega: self.measure,
            partitioner,
        };
        offline_data.validate()?;
        Ok(offline_data)
    }
}

// ============================================================================
fn assemble_interval(n: usize, x0: f64, x1: f64, periodic: bool) -> Result<Assembly> {
    if n < 3 || !(x1 > x0) {
        return Err(Error::Graph(format!(
            "an interval needs at least 3 nodes and x1 > x0, got {} nodes on [{}, {}]",
            n, x0, x1
        )));
    }
    let n_cells = if periodic { n } else { n - 1 };
    let h = (x1 - x0) / n_cells as f64;
    let positions = (0..n).map(|k| Vector3d::new(x0 + k as f64 * h, 0.0, 0.0)).collect();
    let mut assembly = Assembly::new(1, positions, x1 - x0);

    for k in 0..n_cells {
        assembly.add_segment(k, (k + 1) % n, h)
    }
    if !periodic {
        assembly.add_boundary(0, Vector3d::new(-1.0, 0.0, 0.0), 1.0);
        assembly.add_boundary(n - 1, Vector3d::new(1.0, 0.0, 0.0), 1.0);
    }
    Ok(assembly)
}

/// Assemble P1 offline data on `n` uniformly spaced nodes of `[x0, x1]`.
/// A periodic interval identifies `x1` with `x0`, so its nodes sit at
/// `x0 + k (x1 - x0) / n` and it has no boundary. Otherwise both end nodes
/// are boundary nodes of the given kind.
///
pub fn interval(n: usize, x0: f64, x1: f64, periodic: bool, kind: Boundary) -> Result<OfflineData> {
    let assembly = assemble_interval(n, x0, x1, periodic)?;
    let (order, n_internal) = assembly.serial_layout();
    assembly.into_offline_data(&order, n_internal, n, 0, kind, Partitioner::default())
}

/// Assemble P1 offline data on a structured `nx` by `ny` grid of nodes
/// spanning `[x0, x1] x [y0, y1]`, with every cell split into two
/// triangles along the same diagonal. All nodes on the outer edges are
/// boundary nodes of the given kind.
///
pub fn rectangle(
    nx: usize,
    ny: usize,
    x_range: Range<f64>,
    y_range: Range<f64>,
    kind: Boundary,
) -> Result<OfflineData> {
    if nx < 2 || ny < 2 || !(x_range.end > x_range.start) || !(y_range.end > y_range.start) {
        return Err(Error::Graph(format!(
            "a rectangle needs at least 2 x 2 nodes and a non-empty extent, got {} x {}",
            nx, ny
        )));
    }
    let dx = (x_range.end - x_range.start) / (nx - 1) as f64;
    let dy = (y_range.end - y_range.start) / (ny - 1) as f64;
    let index = |i: usize, j: usize| j * nx + i;
    let positions = (0..ny)
        .flat_map(|j| (0..nx).map(move |i| (i, j)))
        .map(|(i, j)| Vector3d::new(x_range.start + i as f64 * dx, y_range.start + j as f64 * dy, 0.0))
        .collect();
    let measure = (x_range.end - x_range.start) * (y_range.end - y_range.start);
    let mut assembly = Assembly::new(2, positions, measure);

    for j in 0..ny - 1 {
        for i in 0..nx - 1 {
            let (a, b, c, d) = (index(i, j), index(i + 1, j), index(i + 1, j + 1), index(i, j + 1));
            assembly.add_triangle([a, b, c]);
            assembly.add_triangle([a, c, d]);
        }
    }

    let edges = [
        (Vector3d::new(0.0, -1.0, 0.0), dx, (0..nx - 1).map(|i| (index(i, 0), index(i + 1, 0))).collect::<Vec<_>>()),
        (Vector3d::new(0.0, 1.0, 0.0), dx, (0..nx - 1).map(|i| (index(i, ny - 1), index(i + 1, ny - 1))).collect()),
        (Vector3d::new(-1.0, 0.0, 0.0), dy, (0..ny - 1).map(|j| (index(0, j), index(0, j + 1))).collect()),
        (Vector3d::new(1.0, 0.0, 0.0), dy, (0..ny - 1).map(|j| (index(nx - 1, j), index(nx - 1, j + 1))).collect()),
    ];
    for (normal, length, segments) in edges {
        for (a, b) in segments {
            assembly.add_boundary(a, normal, 0.5 * length);
            assembly.add_boundary(b, normal, 0.5 * length);
        }
    }

    let (order, n_internal) = assembly.serial_layout();
    let n = nx * ny;
    assembly.into_offline_data(&order, n_internal, n, 0, kind, Partitioner::default())
}

// ============================================================================
/**
 * The piece of a distributed mesh stored on one rank.
 */
#[derive(Clone, Debug)]
pub struct Partition {
    pub offline_data: OfflineData,
    /// Global node index of every locally stored node.
    pub global_indices: Vec<usize>,
}

fn owned_range(n: usize, ranks: usize, rank: usize) -> Range<usize> {
    rank * n / ranks..(rank + 1) * n / ranks
}

fn owner(n: usize, ranks: usize, g: usize) -> usize {
    (0..ranks).find(|&r| owned_range(n, ranks, r).contains(&g)).unwrap_or(0)
}

/// The locally stored nodes of a rank in local order: export nodes, the
/// other owned nodes, and ghosts, each sorted by global index. Returns the
/// order along with the number of owned and export nodes.
fn partition_layout(n: usize, ranks: usize, rank: usize) -> (Vec<usize>, usize, usize) {
    let ghosts_of = |r: usize| -> BTreeSet<usize> {
        let range = owned_range(n, ranks, r);
        [(range.start + n - 1) % n, range.end % n]
            .into_iter()
            .filter(|g| !range.contains(g))
            .collect()
    };
    let owned = owned_range(n, ranks, rank);
    let export: BTreeSet<usize> = (0..ranks)
        .filter(|&r| r != rank)
        .flat_map(ghosts_of)
        .filter(|g| owned.contains(g))
        .collect();

    let order: Vec<usize> = export
        .iter()
        .copied()
        .chain(owned.clone().filter(|g| !export.contains(g)))
        .chain(ghosts_of(rank))
        .collect();
    (order, owned.len(), export.len())
}

/// Assemble a periodic interval of `n` global nodes on `[0, 1)` split into
/// `ranks` contiguous blocks, and return the part stored on `rank` along
/// with the exchange plans for ghost nodes and ghost rows.
///
pub fn partitioned_interval(n: usize, ranks: usize, rank: usize) -> Result<Partition> {
    if ranks == 0 || rank >= ranks || n < 2 * ranks || n < 3 {
        return Err(Error::Graph(format!(
            "cannot split {} nodes over {} ranks (rank {})",
            n, ranks, rank
        )));
    }
    let assembly = assemble_interval(n, 0.0, 1.0, true)?;
    let layouts: Vec<_> = (0..ranks).map(|r| partition_layout(n, ranks, r)).collect();
    let stored: Vec<BTreeSet<usize>> = layouts.iter().map(|(order, _, _)| order.iter().copied().collect()).collect();

    let (order, n_owned, n_export) = layouts[rank].clone();
    let local: BTreeMap<usize, usize> = order.iter().enumerate().map(|(l, &g)| (g, l)).collect();

    // Entries of a row stored on a rank, keyed by global column, in the
    // local storage order of that rank.
    let entry_offsets = |r: usize| -> BTreeMap<(usize, usize), usize> {
        let (order, _, _) = &layouts[r];
        let local: BTreeMap<usize, usize> = order.iter().enumerate().map(|(l, &g)| (g, l)).collect();
        let mut offsets = BTreeMap::new();
        let mut offset = 0;

        for (l, &g) in order.iter().enumerate() {
            let mut columns: Vec<usize> = assembly.rows[g]
                .keys()
                .filter_map(|j| local.get(j).copied())
                .filter(|&k| k != l)
                .collect();
            columns.sort_unstable();
            for k in std::iter::once(l).chain(columns) {
                offsets.insert((g, order[k]), offset);
                offset += 1;
            }
        }
        offsets
    };
    let offsets = entry_offsets(rank);

    let rows = &assembly.rows;
    let own_stored = &stored[rank];
    let mut ghost_nodes = ExchangePlan::default();
    let mut ghost_rows = ExchangePlan::default();

    for peer in (0..ranks).filter(|&p| p != rank) {
        let (peer_order, peer_owned, _) = &layouts[peer];
        let peer_ghosts: BTreeSet<usize> = peer_order[*peer_owned..].iter().copied().collect();

        // Owned nodes the peer reads, and the entries of those rows it stores.
        let sends: Vec<usize> = peer_ghosts.iter().filter(|&&g| owner(n, ranks, g) == rank).copied().collect();
        if !sends.is_empty() {
            ghost_nodes.sends.push((peer, sends.iter().map(|g| local[g]).collect()));
            let peer_stored = &stored[peer];
            let entries = sends
                .iter()
                .flat_map(move |&g| rows[g].keys().filter(move |&&j| peer_stored.contains(&j)).map(move |&j| (g, j)))
                .map(|key| offsets[&key])
                .collect();
            ghost_rows.sends.push((peer, entries));
        }

        // Ghosts the peer owns, and the locally stored entries of their rows.
        let receives: Vec<usize> = order[n_owned..].iter().filter(|&&g| owner(n, ranks, g) == peer).copied().collect();
        if !receives.is_empty() {
            let mut sorted = receives.clone();
            sorted.sort_unstable();
            ghost_nodes.receives.push((peer, sorted.iter().map(|g| local[g]).collect()));
            let entries = sorted
                .iter()
                .flat_map(move |&g| rows[g].keys().filter(move |&&j| own_stored.contains(&j)).map(move |&j| (g, j)))
                .map(|key| offsets[&key])
                .collect();
            ghost_rows.receives.push((peer, entries));
        }
    }

    let n_internal = n_owned / LANES * LANES;
    let partitioner = Partitioner { ghost_nodes, ghost_rows };
    let offline_data = assembly.into_offline_data(&order, n_internal, n_owned, n_export, Boundary::Periodic, partitioner)?;

    Ok(Partition {
        offline_data,
        global_indices: order,
    })
}

// ============================================================================
#[cfg(test)]
mod test {
    use super::{interval, partitioned_interval, rectangle};
    use crate::geometry::Vector3d;
    use crate::offline_data::Boundary;

    #[test]
    fn interval_operators_are_consistent() {
        let data = interval(10, 0.0, 1.0, false, Boundary::Dirichlet).unwrap();
        let graph = &data.graph;
        let total_mass: f64 = data.lumped_mass.iter().sum();
        assert!((total_mass - 1.0).abs() < 1e-12);
        assert_eq!(graph.n_internal(), 8);
        assert_eq!(data.boundary_map.len(), 2);

        for i in 0..graph.n_rows() {
            let row_mass: f64 = (0..graph.row_length(i)).map(|col| data.mass_matrix[graph.entry(i, col)]).sum();
            assert!((row_mass - data.lumped_mass[i]).abs() < 1e-12);

            for col in 1..graph.row_length(i) {
                let e = graph.entry(i, col);
                let t = graph.transposed_entry(i, col);
                assert!((data.cij[e].0 + data.cij[t].0).abs() < 1e-14);
                assert_eq!(data.mass_matrix[e], data.mass_matrix[t]);
                assert!(data.betaij[e] < 0.0);
            }
        }
    }

    #[test]
    fn interval_boundary_rows_carry_outward_normals() {
        let data = interval(6, 0.0, 1.0, false, Boundary::Slip).unwrap();
        for (&i, record) in &data.boundary_map {
            let c_ii = data.cij[data.graph.entry(i, 0)];
            assert_eq!(record.kind, Boundary::Slip);
            assert!((c_ii.0 - 0.5 * record.normal.0).abs() < 1e-14);
            assert_eq!(data.graph.row_length(i), 2);
        }
    }

    #[test]
    fn periodic_interval_has_no_boundary() {
        let data = interval(9, 0.0, 1.0, true, Boundary::DoNothing).unwrap();
        assert!(data.boundary_map.is_empty());
        assert!((0..9).all(|i| data.graph.row_length(i) == 3));
        assert_eq!(data.graph.n_internal(), 8);
        assert!(data.cij.iter().step_by(3).all(|c| c.0 == 0.0));
    }

    #[test]
    fn rectangle_rows_sum_to_boundary_terms() {
        let data = rectangle(5, 4, 0.0..1.0, 0.0..2.0, Boundary::Slip).unwrap();
        let graph = &data.graph;
        let total_mass: f64 = data.lumped_mass.iter().sum();
        assert!((total_mass - 2.0).abs() < 1e-12);
        assert_eq!(data.boundary_map.len(), 2 * 5 + 2 * 4 - 4);

        for i in 0..graph.n_rows() {
            let mut sum = Vector3d::zero();
            for col in 0..graph.row_length(i) {
                sum += data.cij[graph.entry(i, col)];
            }
            // The gradients of the P1 basis sum to zero.
            assert!(sum.norm() < 1e-12);
            if !data.is_boundary(i) {
                assert!(data.cij[graph.entry(i, 0)].norm() < 1e-12);
            }
        }
        let corner = data
            .boundary_map
            .values()
            .find(|record| record.position == Vector3d::new(0.0, 0.0, 0.0))
            .unwrap();
        let (dx, dy) = (0.25, 2.0 / 3.0);
        let expected = Vector3d::new(-dy, -dx, 0.0).normalized();
        assert!((corner.normal - expected).norm() < 1e-12);
    }

    #[test]
    fn partitions_cover_the_interval_once() {
        let n = 16;
        let mut owned = Vec::new();
        for rank in 0..3 {
            let part = partitioned_interval(n, 3, rank).unwrap();
            let data = &part.offline_data;
            assert_eq!(part.global_indices.len(), data.n_rows());
            assert_eq!(data.n_rows(), data.n_owned() + 2);
            assert_eq!(data.graph.n_export(), 2);
            owned.extend_from_slice(&part.global_indices[..data.n_owned()]);

            let ghosts = &data.partitioner.ghost_nodes;
            assert_eq!(ghosts.sends.len(), 2);
            assert_eq!(ghosts.receives.len(), 2);
            let n_owned = data.n_owned();
            assert!(data.graph.coupling_pairs().iter().all(|&(i, _, j)| i < n_owned && j >= n_owned));
        }
        owned.sort_unstable();
        assert_eq!(owned, (0..n).collect::<Vec<_>>());
    }

    #[test]
    fn ghost_row_plans_match_between_peers() {
        let a = partitioned_interval(12, 2, 0).unwrap();
        let b = partitioned_interval(12, 2, 1).unwrap();
        let sends = &a.offline_data.partitioner.ghost_rows.sends[0].1;
        let receives = &b.offline_data.partitioner.ghost_rows.receives[0].1;
        assert_eq!(sends.len(), receives.len());
        assert_eq!(sends.len(), 2 * 2);
    }
}

//! MNA matrix assembly and solving.
//!
//! The linear core: given resistor-like, battery-like, and current-source
//! elements over an arbitrary set of node tokens, solve one dense system for
//! all node voltages and source branch currents. Pure function of its
//! inputs; time never appears here.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::Hash;

use crate::error::{Result, VoltlabError};

/// Resistance at or below this is treated structurally as an ideal
/// conductor: the element gets a branch-current unknown (a 0 V battery)
/// instead of a conductance, so zero resistance never divides by zero.
pub const ZERO_RESISTANCE_THRESHOLD: f64 = 1e-12;

/// Opaque, comparable node token. `Ord` gives deterministic matrix layout
/// and reference-node selection.
pub trait NodeKey: Copy + Eq + Hash + Ord + fmt::Debug {}

impl<T: Copy + Eq + Hash + Ord + fmt::Debug> NodeKey for T {}

/// A resistor-like element: `{node0, node1, resistance >= 0}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MnaResistor<N> {
    pub node0: N,
    pub node1: N,
    pub resistance: f64,
}

impl<N> MnaResistor<N> {
    pub fn new(node0: N, node1: N, resistance: f64) -> Self {
        Self {
            node0,
            node1,
            resistance,
        }
    }
}

/// A battery-like element enforcing `V(node0) - V(node1) = voltage`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MnaBattery<N> {
    pub node0: N,
    pub node1: N,
    pub voltage: f64,
}

impl<N> MnaBattery<N> {
    pub fn new(node0: N, node1: N, voltage: f64) -> Self {
        Self {
            node0,
            node1,
            voltage,
        }
    }
}

/// A fixed current injected from `node0` to `node1` through the source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MnaCurrentSource<N> {
    pub node0: N,
    pub node1: N,
    pub current: f64,
}

impl<N> MnaCurrentSource<N> {
    pub fn new(node0: N, node1: N, current: f64) -> Self {
        Self {
            node0,
            node1,
            current,
        }
    }
}

/// One solver input: the element lists for a single linear solve.
#[derive(Debug, Clone)]
pub struct MnaCircuit<N: NodeKey> {
    pub resistors: Vec<MnaResistor<N>>,
    pub batteries: Vec<MnaBattery<N>>,
    pub current_sources: Vec<MnaCurrentSource<N>>,
}

impl<N: NodeKey> Default for MnaCircuit<N> {
    fn default() -> Self {
        Self {
            resistors: Vec::new(),
            batteries: Vec::new(),
            current_sources: Vec::new(),
        }
    }
}

impl<N: NodeKey> MnaCircuit<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assemble and solve the MNA system.
    ///
    /// Unknowns: one voltage per non-reference node, one branch current per
    /// battery and per zero-resistance resistor. One reference node per
    /// connected sub-graph (the smallest by `Ord`) is pinned to 0 V, so
    /// disconnected sub-graphs never make the matrix rank-deficient.
    ///
    /// A truly singular system (e.g. conflicting parallel batteries)
    /// returns [`VoltlabError::SingularMatrix`]; the per-frame engine
    /// absorbs that into a flagged best-effort result.
    pub fn solve(&self) -> Result<MnaSolution<N>> {
        let mut node_set = BTreeSet::new();
        for r in &self.resistors {
            debug_assert_ne!(r.node0, r.node1, "resistor endpoints must be distinct");
            debug_assert!(r.resistance >= 0.0, "resistance must be non-negative");
            node_set.insert(r.node0);
            node_set.insert(r.node1);
        }
        for b in &self.batteries {
            debug_assert_ne!(b.node0, b.node1, "battery endpoints must be distinct");
            node_set.insert(b.node0);
            node_set.insert(b.node1);
        }
        for c in &self.current_sources {
            debug_assert_ne!(c.node0, c.node1, "source endpoints must be distinct");
            node_set.insert(c.node0);
            node_set.insert(c.node1);
        }
        let nodes: Vec<N> = node_set.into_iter().collect();
        let index: HashMap<N, usize> = nodes.iter().enumerate().map(|(i, &n)| (n, i)).collect();

        // One connected component = one reference node pinned to 0 V.
        let mut components = UnionFind::new(nodes.len());
        for r in &self.resistors {
            components.union(index[&r.node0], index[&r.node1]);
        }
        for b in &self.batteries {
            components.union(index[&b.node0], index[&b.node1]);
        }
        for c in &self.current_sources {
            components.union(index[&c.node0], index[&c.node1]);
        }

        // Matrix column per non-reference node. Roots are the smallest node
        // of their component and become the pinned references.
        let mut col: Vec<Option<usize>> = vec![None; nodes.len()];
        let mut num_voltages = 0;
        for i in 0..nodes.len() {
            if components.find(i) != i {
                col[i] = Some(num_voltages);
                num_voltages += 1;
            }
        }

        let num_batteries = self.batteries.len();
        let zero_r: Vec<bool> = self
            .resistors
            .iter()
            .map(|r| r.resistance <= ZERO_RESISTANCE_THRESHOLD)
            .collect();
        let num_zero_r = zero_r.iter().filter(|&&z| z).count();

        let size = num_voltages + num_batteries + num_zero_r;
        let mut matrix = MnaMatrix::new(size);
        let at = |n: N| col[index[&n]];

        for (bi, b) in self.batteries.iter().enumerate() {
            matrix.stamp_voltage_source(at(b.node0), at(b.node1), num_voltages + bi, b.voltage);
        }
        let mut resistor_branch: Vec<Option<usize>> = vec![None; self.resistors.len()];
        let mut next_branch = num_voltages + num_batteries;
        for (ri, r) in self.resistors.iter().enumerate() {
            if zero_r[ri] {
                // Structural handling of R = 0: a 0 V battery with its own
                // branch-current unknown.
                matrix.stamp_voltage_source(at(r.node0), at(r.node1), next_branch, 0.0);
                resistor_branch[ri] = Some(next_branch);
                next_branch += 1;
            } else {
                matrix.stamp_conductance(at(r.node0), at(r.node1), 1.0 / r.resistance);
            }
        }
        for c in &self.current_sources {
            matrix.stamp_current_source(at(c.node0), at(c.node1), c.current);
        }

        matrix.factor()?;
        matrix.solve()?;

        let mut voltages = HashMap::with_capacity(nodes.len());
        for (i, &n) in nodes.iter().enumerate() {
            voltages.insert(n, matrix.voltage(col[i]));
        }
        let battery_currents: Vec<f64> = (0..num_batteries)
            .map(|i| matrix.x[num_voltages + i])
            .collect();
        let resistor_currents: Vec<f64> = self
            .resistors
            .iter()
            .enumerate()
            .map(|(ri, r)| match resistor_branch[ri] {
                Some(branch) => matrix.x[branch],
                None => (voltages[&r.node0] - voltages[&r.node1]) / r.resistance,
            })
            .collect();

        Ok(MnaSolution {
            voltages,
            battery_currents,
            resistor_currents,
        })
    }
}

/// Solved node voltages and element currents for one linear solve.
///
/// All currents are signed `node0 -> node1` through the element; battery
/// branch currents come straight from the solution vector, resistor currents
/// are the derived `(V0 - V1) / R` (or the branch unknown when R = 0).
#[derive(Debug, Clone)]
pub struct MnaSolution<N: NodeKey> {
    voltages: HashMap<N, f64>,
    battery_currents: Vec<f64>,
    resistor_currents: Vec<f64>,
}

impl<N: NodeKey> MnaSolution<N> {
    /// Voltage at a node; nodes absent from the solve read 0 V, never NaN.
    pub fn voltage(&self, node: N) -> f64 {
        self.voltages.get(&node).copied().unwrap_or(0.0)
    }

    /// `V(node0) - V(node1)`.
    pub fn voltage_between(&self, node0: N, node1: N) -> f64 {
        self.voltage(node0) - self.voltage(node1)
    }

    /// Branch current through the `i`-th input battery.
    pub fn battery_current(&self, i: usize) -> f64 {
        debug_assert!(
            i < self.battery_currents.len(),
            "battery index {i} out of range ({} batteries solved)",
            self.battery_currents.len()
        );
        self.battery_currents[i]
    }

    /// Current through the `i`-th input resistor.
    pub fn resistor_current(&self, i: usize) -> f64 {
        debug_assert!(
            i < self.resistor_currents.len(),
            "resistor index {i} out of range ({} resistors solved)",
            self.resistor_currents.len()
        );
        self.resistor_currents[i]
    }
}

/// Dense MNA system `Ax = z`, row-major, solved by LU with partial pivoting.
#[derive(Debug)]
struct MnaMatrix {
    /// System matrix A (row-major)
    a: Vec<f64>,
    /// Source vector z
    z: Vec<f64>,
    /// Solution vector x
    x: Vec<f64>,
    /// Matrix dimension
    size: usize,
    /// LU decomposition of A
    lu: Vec<f64>,
    /// Pivot indices for LU decomposition
    pivots: Vec<usize>,
}

impl MnaMatrix {
    fn new(size: usize) -> Self {
        Self {
            a: vec![0.0; size * size],
            z: vec![0.0; size],
            x: vec![0.0; size],
            size,
            lu: vec![0.0; size * size],
            pivots: vec![0; size],
        }
    }

    fn add(&mut self, row: usize, col: usize, value: f64) {
        self.a[row * self.size + col] += value;
    }

    fn add_source(&mut self, row: usize, value: f64) {
        self.z[row] += value;
    }

    /// Stamp a conductance between two nodes:
    ///   A[n1,n1] += G, A[n2,n2] += G, A[n1,n2] -= G, A[n2,n1] -= G
    fn stamp_conductance(&mut self, n1: Option<usize>, n2: Option<usize>, g: f64) {
        if let Some(i) = n1 {
            self.add(i, i, g);
        }
        if let Some(j) = n2 {
            self.add(j, j, g);
        }
        if let (Some(i), Some(j)) = (n1, n2) {
            self.add(i, j, -g);
            self.add(j, i, -g);
        }
    }

    /// Stamp a voltage source between two nodes with branch current at
    /// row `br`, enforcing V[n+] - V[n-] = E. The branch unknown is the
    /// current flowing from n+ to n- through the source.
    fn stamp_voltage_source(
        &mut self,
        n_pos: Option<usize>,
        n_neg: Option<usize>,
        br: usize,
        voltage: f64,
    ) {
        if let Some(i) = n_pos {
            self.add(br, i, 1.0);
            self.add(i, br, 1.0);
        }
        if let Some(j) = n_neg {
            self.add(br, j, -1.0);
            self.add(j, br, -1.0);
        }
        self.z[br] = voltage;
    }

    /// Stamp a current source driving current from n+ to n- through itself:
    /// it pulls current out of n+ and pushes it into n-.
    fn stamp_current_source(&mut self, n_pos: Option<usize>, n_neg: Option<usize>, current: f64) {
        if let Some(i) = n_pos {
            self.add_source(i, -current);
        }
        if let Some(j) = n_neg {
            self.add_source(j, current);
        }
    }

    /// Perform LU decomposition with partial pivoting.
    fn factor(&mut self) -> Result<()> {
        let n = self.size;
        self.lu.copy_from_slice(&self.a);

        for i in 0..n {
            self.pivots[i] = i;
        }

        for k in 0..n {
            // Find pivot
            let mut max_val = self.lu[k * n + k].abs();
            let mut max_row = k;

            for i in (k + 1)..n {
                let val = self.lu[i * n + k].abs();
                if val > max_val {
                    max_val = val;
                    max_row = i;
                }
            }

            if max_val < 1e-15 {
                return Err(VoltlabError::SingularMatrix);
            }

            if max_row != k {
                self.pivots.swap(k, max_row);
                for j in 0..n {
                    let tmp = self.lu[k * n + j];
                    self.lu[k * n + j] = self.lu[max_row * n + j];
                    self.lu[max_row * n + j] = tmp;
                }
            }

            // Eliminate
            let pivot = self.lu[k * n + k];
            for i in (k + 1)..n {
                let factor = self.lu[i * n + k] / pivot;
                self.lu[i * n + k] = factor;
                for j in (k + 1)..n {
                    self.lu[i * n + j] -= factor * self.lu[k * n + j];
                }
            }
        }

        Ok(())
    }

    /// Solve the system using the pre-computed LU decomposition.
    fn solve(&mut self) -> Result<()> {
        let n = self.size;

        // Apply pivot permutation to z
        let b = self.z.clone();
        for i in 0..n {
            self.x[i] = b[self.pivots[i]];
        }

        // Forward substitution (L * y = Pb)
        for i in 0..n {
            for j in 0..i {
                self.x[i] -= self.lu[i * n + j] * self.x[j];
            }
        }

        // Back substitution (U * x = y)
        for i in (0..n).rev() {
            for j in (i + 1)..n {
                self.x[i] -= self.lu[i * n + j] * self.x[j];
            }
            let diag = self.lu[i * n + i];
            if diag.abs() < 1e-15 {
                return Err(VoltlabError::SingularMatrix);
            }
            self.x[i] /= diag;
        }

        Ok(())
    }

    /// Voltage at a matrix column; `None` is a pinned reference node (0 V).
    fn voltage(&self, node: Option<usize>) -> f64 {
        match node {
            Some(i) => self.x[i],
            None => 0.0,
        }
    }
}

/// Union-find with path halving. Linking larger roots under smaller ones
/// makes each root the smallest node of its component, which is exactly the
/// node we pin as the 0 V reference.
struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, mut i: usize) -> usize {
        while self.parent[i] != i {
            self.parent[i] = self.parent[self.parent[i]];
            i = self.parent[i];
        }
        i
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra < rb {
            self.parent[rb] = ra;
        } else if rb < ra {
            self.parent[ra] = rb;
        }
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// KCL holds at every node of a battery feeding parallel resistors.
        #[test]
        fn kcl_holds_for_parallel_resistors(
            voltage in 0.1_f64..20.0,
            resistances in prop::collection::vec(1.0_f64..1e4, 1..6),
        ) {
            let mut circuit = MnaCircuit::new();
            circuit.batteries.push(MnaBattery::new(1usize, 0, voltage));
            for &r in &resistances {
                circuit.resistors.push(MnaResistor::new(1, 0, r));
            }
            let solution = circuit.solve().unwrap();

            let total: f64 = (0..resistances.len())
                .map(|i| solution.resistor_current(i))
                .sum();
            prop_assert!((solution.battery_current(0) + total).abs() < 1e-9);
            prop_assert!((solution.voltage(1) - voltage).abs() < 1e-9);
        }

        /// A resistor chain carries one loop current, V over the sum.
        #[test]
        fn series_chain_carries_uniform_current(
            voltage in 0.1_f64..20.0,
            resistances in prop::collection::vec(1.0_f64..1e4, 2..8),
        ) {
            let mut circuit = MnaCircuit::new();
            circuit.batteries.push(MnaBattery::new(1usize, 0, voltage));
            let n = resistances.len();
            for (i, &r) in resistances.iter().enumerate() {
                let from = i + 1;
                let to = if i + 1 == n { 0 } else { i + 2 };
                circuit.resistors.push(MnaResistor::new(from, to, r));
            }
            let solution = circuit.solve().unwrap();

            let expected = voltage / resistances.iter().sum::<f64>();
            for i in 0..n {
                prop_assert!((solution.resistor_current(i) - expected).abs() < 1e-9);
            }
        }
    }
}

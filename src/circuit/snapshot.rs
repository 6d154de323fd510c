//! Snapshot boundary between the live graph and the solver.
//!
//! The host application owns a mutable, observable component graph. The
//! solver never touches it: each frame the host copies the electrical facts
//! into a [`CircuitSnapshot`] of plain records, and results come back as an
//! explicit write-back list in a [`FrameSolution`]. Both are built fresh
//! every frame and discarded after results are copied out.

use std::collections::{BTreeSet, HashMap};

use super::types::{ComponentId, DynamicState, VertexId};

/// The electrical behavior of a component, as a closed set of variants.
///
/// Partitioning into solver elements is a single exhaustive match, so adding
/// a new kind is compiler-enforced across the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ComponentKind {
    /// Ideal voltage source with optional internal series resistance.
    /// Enforces `V(node0) - V(node1) = voltage` across its ideal part.
    Battery {
        voltage: f64,
        internal_resistance: f64,
    },
    /// Ohmic resistor, `resistance >= 0`. Zero is legal (ideal conductor).
    Resistor { resistance: f64 },
    /// Connecting wire; electrically a resistor at near-zero resistance.
    Wire { resistance: f64 },
    /// Switch; a low-valued resistor when closed, a very large one when
    /// open. No special-cased "infinite" resistance exists anywhere.
    Switch { closed: bool },
    /// Ideal ammeter: a zero-resistance element whose current is read
    /// directly from its branch unknown.
    Ammeter,
    /// Fixed current injected from `node0` to `node1` through the source.
    CurrentSource { current: f64 },
    /// Capacitor with its last accepted `{voltage, current}` state.
    Capacitor {
        capacitance: f64,
        state: DynamicState,
    },
    /// Inductor with its last accepted `{voltage, current}` state.
    Inductor {
        inductance: f64,
        state: DynamicState,
    },
}

/// One component record in a snapshot: two endpoint vertices plus behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub id: ComponentId,
    pub node0: VertexId,
    pub node1: VertexId,
    pub kind: ComponentKind,
}

impl Component {
    /// Ideal battery (no internal resistance).
    pub fn battery(id: ComponentId, node0: VertexId, node1: VertexId, voltage: f64) -> Self {
        Self::battery_with_resistance(id, node0, node1, voltage, 0.0)
    }

    /// Battery with internal series resistance.
    pub fn battery_with_resistance(
        id: ComponentId,
        node0: VertexId,
        node1: VertexId,
        voltage: f64,
        internal_resistance: f64,
    ) -> Self {
        Self {
            id,
            node0,
            node1,
            kind: ComponentKind::Battery {
                voltage,
                internal_resistance,
            },
        }
    }

    pub fn resistor(id: ComponentId, node0: VertexId, node1: VertexId, resistance: f64) -> Self {
        Self {
            id,
            node0,
            node1,
            kind: ComponentKind::Resistor { resistance },
        }
    }

    pub fn wire(id: ComponentId, node0: VertexId, node1: VertexId, resistance: f64) -> Self {
        Self {
            id,
            node0,
            node1,
            kind: ComponentKind::Wire { resistance },
        }
    }

    pub fn switch(id: ComponentId, node0: VertexId, node1: VertexId, closed: bool) -> Self {
        Self {
            id,
            node0,
            node1,
            kind: ComponentKind::Switch { closed },
        }
    }

    pub fn ammeter(id: ComponentId, node0: VertexId, node1: VertexId) -> Self {
        Self {
            id,
            node0,
            node1,
            kind: ComponentKind::Ammeter,
        }
    }

    pub fn current_source(
        id: ComponentId,
        node0: VertexId,
        node1: VertexId,
        current: f64,
    ) -> Self {
        Self {
            id,
            node0,
            node1,
            kind: ComponentKind::CurrentSource { current },
        }
    }

    pub fn capacitor(
        id: ComponentId,
        node0: VertexId,
        node1: VertexId,
        capacitance: f64,
        state: DynamicState,
    ) -> Self {
        Self {
            id,
            node0,
            node1,
            kind: ComponentKind::Capacitor { capacitance, state },
        }
    }

    pub fn inductor(
        id: ComponentId,
        node0: VertexId,
        node1: VertexId,
        inductance: f64,
        state: DynamicState,
    ) -> Self {
        Self {
            id,
            node0,
            node1,
            kind: ComponentKind::Inductor { inductance, state },
        }
    }

    /// Whether this component carries state across frames.
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self.kind,
            ComponentKind::Capacitor { .. } | ComponentKind::Inductor { .. }
        )
    }
}

/// A plain-record copy of the live circuit graph, valid for one frame.
#[derive(Debug, Clone, Default)]
pub struct CircuitSnapshot {
    /// Vertices present in the live graph, including component-free ones.
    pub vertices: Vec<VertexId>,
    /// Ordered component records.
    pub components: Vec<Component>,
}

impl CircuitSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a vertex. Component endpoints are registered automatically
    /// by [`push`](Self::push); this is for junctions with no components.
    pub fn add_vertex(&mut self, vertex: VertexId) {
        if !self.vertices.contains(&vertex) {
            self.vertices.push(vertex);
        }
    }

    /// Add a component, registering its endpoints as vertices.
    pub fn push(&mut self, component: Component) {
        self.add_vertex(component.node0);
        self.add_vertex(component.node1);
        self.components.push(component);
    }

    /// Whether any component carries state across frames.
    pub fn has_dynamics(&self) -> bool {
        self.components.iter().any(Component::is_dynamic)
    }

    /// Every vertex the solution must report on: the registered vertices
    /// plus any component endpoint, deduplicated and ordered.
    pub fn all_vertices(&self) -> BTreeSet<VertexId> {
        let mut set: BTreeSet<VertexId> = self.vertices.iter().copied().collect();
        for c in &self.components {
            set.insert(c.node0);
            set.insert(c.node1);
        }
        set
    }
}

/// Solved results for one frame, pushed back to the host application.
///
/// Currents follow the crate-wide convention: positive flows from the
/// component's `node0` to its `node1` through the component. A battery
/// driving an external load therefore reads a negative through-current.
#[derive(Debug, Clone)]
pub struct FrameSolution {
    /// Voltage per vertex. Vertices absent from the solve read 0 V.
    pub voltages: HashMap<VertexId, f64>,
    /// Signed current per component.
    pub currents: HashMap<ComponentId, f64>,
    /// Next `{voltage, current}` per capacitor/inductor, produced once per
    /// frame after all sub-steps complete. The host applies these wholesale.
    pub dynamic_states: HashMap<ComponentId, DynamicState>,
    /// Number of accepted sub-steps taken this frame (1 for static solves).
    pub substeps: usize,
    /// False when a degenerate system was absorbed into a best-effort
    /// all-zero result.
    pub solved: bool,
}

impl FrameSolution {
    /// Voltage at a vertex, 0 V if unknown. Never NaN.
    pub fn voltage(&self, vertex: VertexId) -> f64 {
        self.voltages.get(&vertex).copied().unwrap_or(0.0)
    }

    /// Current through a component, 0 A if unknown.
    pub fn current(&self, component: ComponentId) -> f64 {
        self.currents.get(&component).copied().unwrap_or(0.0)
    }

    /// Next dynamic state for a capacitor or inductor, if any.
    pub fn dynamic_state(&self, component: ComponentId) -> Option<DynamicState> {
        self.dynamic_states.get(&component).copied()
    }

    /// Best-effort result for a snapshot whose system could not be solved:
    /// zero volts and amps everywhere, dynamic elements holding their prior
    /// state, and the `solved` flag cleared.
    pub fn flagged(snapshot: &CircuitSnapshot) -> Self {
        let voltages = snapshot.all_vertices().into_iter().map(|v| (v, 0.0)).collect();
        let currents = snapshot.components.iter().map(|c| (c.id, 0.0)).collect();
        let dynamic_states = snapshot
            .components
            .iter()
            .filter_map(|c| match c.kind {
                ComponentKind::Capacitor { state, .. } | ComponentKind::Inductor { state, .. } => {
                    Some((c.id, state))
                }
                _ => None,
            })
            .collect();
        Self {
            voltages,
            currents,
            dynamic_states,
            substeps: 0,
            solved: false,
        }
    }
}

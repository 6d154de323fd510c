//! Core identifier types shared between the host application and the solver.

use std::fmt;

/// A unique identifier for a junction (vertex) in the live circuit graph.
///
/// Vertex identifiers are assigned by the host application; the solver only
/// requires that distinct junctions never share one. A vertex with no
/// incident components is still a valid node and solves to 0 V.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexId(pub usize);

impl fmt::Display for VertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// A unique identifier for a component in the live circuit graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentId(pub usize);

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "C{}", self.0)
    }
}

/// Persistent state of an energy-storing component.
///
/// The only data that outlives a frame: the voltage across and the current
/// through a capacitor or inductor at the end of the last accepted step. A
/// new snapshot is produced each frame; the value itself is never mutated.
///
/// Current is measured with the crate-wide sign convention: positive means
/// conventional current flowing from `node0` to `node1` *through* the
/// component.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DynamicState {
    /// Voltage across the component, `V(node0) - V(node1)`.
    pub voltage: f64,
    /// Current through the component, from `node0` to `node1`.
    pub current: f64,
}

impl DynamicState {
    /// Create a state snapshot.
    pub fn new(voltage: f64, current: f64) -> Self {
        Self { voltage, current }
    }

    /// The de-energized state (no stored charge or flux).
    pub fn rest() -> Self {
        Self::default()
    }

    /// Euclidean distance to another state in the (voltage, current) plane.
    ///
    /// Used by the adaptive timestep controller as the per-element
    /// disagreement metric between a coarse and a fine update.
    pub fn distance(&self, other: &DynamicState) -> f64 {
        let dv = self.voltage - other.voltage;
        let di = self.current - other.current;
        (dv * dv + di * di).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn state_distance_is_euclidean() {
        let a = DynamicState::new(1.0, 0.0);
        let b = DynamicState::new(0.0, 0.0);
        assert_relative_eq!(a.distance(&b), 1.0);

        let c = DynamicState::new(4.0, 3.0);
        assert_relative_eq!(c.distance(&DynamicState::rest()), 5.0);
        assert_relative_eq!(c.distance(&c), 0.0);
    }
}

//! Electrical solver engine for an interactive circuit sandbox.
//!
//! The host application owns the visual circuit graph; this crate owns the
//! electrical mathematics. Once per frame the host hands over an immutable
//! [`CircuitSnapshot`] and a frame duration, and receives a
//! [`FrameSolution`] with a voltage for every vertex, a signed current for
//! every component, and updated states for capacitors and inductors.
//!
//! Internally the work is split across [`solver`]'s layers:
//!
//! - a generic Modified Nodal Analysis core solving any resistor / battery /
//!   current-source network by dense LU factorization,
//! - a companion-model layer replacing energy-storing components with
//!   trapezoidal battery + resistor equivalents each sub-step,
//! - an adaptive step-doubling timestep controller subdividing the frame
//!   until coarse and fine estimates agree,
//! - a per-frame engine tying the layers together behind [`CircuitEngine`].
//!
//! Solving never panics on bad circuits: a singular system (conflicting
//! ideal sources, for instance) comes back as a flagged all-zero frame
//! rather than an error, so an interactive host can keep rendering while
//! the user wires their way out of the conflict.
//!
//! ```
//! use voltlab_core::{CircuitEngine, CircuitSnapshot, Component, ComponentId, VertexId};
//!
//! let mut snapshot = CircuitSnapshot::new();
//! snapshot.push(Component::battery(ComponentId(0), VertexId(1), VertexId(0), 9.0));
//! snapshot.push(Component::resistor(ComponentId(1), VertexId(1), VertexId(0), 100.0));
//!
//! let engine = CircuitEngine::new();
//! let solution = engine.solve_frame(&snapshot, 1.0 / 60.0);
//! assert!((solution.current(ComponentId(1)) - 0.09).abs() < 1e-9);
//! ```

pub mod circuit;
pub mod error;
pub mod solver;

pub use circuit::{
    CircuitSnapshot, Component, ComponentId, ComponentKind, DynamicState, FrameSolution, VertexId,
};
pub use error::{Result, VoltlabError};
pub use solver::{CircuitEngine, EngineConfig};

//! Circuit solving via Modified Nodal Analysis (MNA).
//!
//! The linear core ([`mna`]) builds the standard MNA block system
//!
//! ```text
//! [ G  B ] [ v ]   [ i ]
//! [ C  D ] [ j ] = [ e ]
//! ```
//!
//! where `G` holds stamped conductances, `B`/`C` couple voltage-source
//! branch currents to their terminal nodes, `v` are the unknown node
//! voltages and `j` the unknown source branch currents. The system is
//! factored by dense LU with partial pivoting. One reference node per
//! connected component is pinned to 0 V before assembly, which keeps the
//! matrix non-singular for any well-posed input regardless of how many
//! disconnected islands the circuit has.
//!
//! On top of the core sit three layers:
//!
//! - [`dynamic`]: trapezoidal companion models turning capacitors and
//!   inductors into battery + resistor pairs per sub-step,
//! - [`timestep`]: a generic step-doubling adaptive controller comparing
//!   one coarse step against two half steps,
//! - [`engine`]: the per-frame facade that lowers a snapshot, picks the
//!   static or dynamic path, and assembles the frame result.

mod dynamic;
mod engine;
mod mna;
mod timestep;

pub use dynamic::{
    CircuitNode, DynamicCapacitor, DynamicCircuit, DynamicCircuitState, DynamicInductor,
    DynamicSolution, ResistiveBattery,
};
pub use engine::{CircuitEngine, EngineConfig};
pub use mna::{
    MnaBattery, MnaCircuit, MnaCurrentSource, MnaResistor, MnaSolution, NodeKey,
    ZERO_RESISTANCE_THRESHOLD,
};
pub use timestep::{step_in_time_with_history, Steppable, TimestepConfig, TimestepRecord};

/// Resistance modeling an open switch. Large enough to be negligible in
/// any sensible circuit, small enough to keep the matrix well-conditioned.
pub const OPEN_SWITCH_RESISTANCE: f64 = 1e9;

/// Resistance modeling a closed switch.
pub const CLOSED_SWITCH_RESISTANCE: f64 = 1e-2;

/// Series resistance folded into every capacitor companion to condition
/// the matrix when `dt/(2C)` alone would be tiny.
pub const CAPACITOR_CONDITIONING_RESISTANCE: f64 = 1e-4;

/// Floor on adaptive sub-steps; at or below this a step is always taken.
pub const MIN_DT: f64 = 1e-8;

/// Default acceptance tolerance of the adaptive controller, in mean
/// per-element (voltage, current) distance.
pub const ERROR_THRESHOLD: f64 = 1e-5;

/// Frame-time sentinel a host passes while paused; stepped exactly once
/// with no subdivision.
pub const PAUSED_DT: f64 = 1e-6;

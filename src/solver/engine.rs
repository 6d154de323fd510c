//! Per-frame aggregation: partition, solve, write back.
//!
//! Once per frame the engine lowers a [`CircuitSnapshot`] into solver
//! elements with one exhaustive match over component kinds, solves it
//! (directly when the circuit is purely static, through the adaptive
//! timestep controller when capacitors or inductors are present), and
//! assembles the [`FrameSolution`] write-back list. Failure modes are
//! absorbed here: a singular system is logged and returned as a flagged
//! all-zero result, never an error.

use std::collections::HashMap;

use tracing::warn;

use crate::circuit::{CircuitSnapshot, ComponentId, ComponentKind, DynamicState, FrameSolution};
use crate::error::{Result, VoltlabError};
use crate::solver::dynamic::{
    CircuitNode, CompanionStepper, DynamicCapacitor, DynamicCircuit, DynamicCircuitState,
    DynamicInductor, DynamicSolution, ResistiveBattery,
};
use crate::solver::mna::{MnaCurrentSource, MnaResistor};
use crate::solver::timestep::{step_in_time_with_history, TimestepConfig};

/// Engine tunables. None of these are algorithmic requirements; they set
/// the modeling ceilings/floors and the controller behavior.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Resistance modeling an open switch. Large, never "infinite".
    pub open_switch_resistance: f64,
    /// Resistance modeling a closed switch.
    pub closed_switch_resistance: f64,
    /// Fixed series resistance added to every capacitor companion for
    /// matrix conditioning; not physically meaningful.
    pub capacitor_conditioning_resistance: f64,
    /// Minimum sub-step of the adaptive controller.
    pub min_dt: f64,
    /// Acceptance tolerance of the adaptive controller.
    pub error_threshold: f64,
    /// Reserved frame-time sentinel stepped once without subdivision.
    pub paused_dt: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            open_switch_resistance: super::OPEN_SWITCH_RESISTANCE,
            closed_switch_resistance: super::CLOSED_SWITCH_RESISTANCE,
            capacitor_conditioning_resistance: super::CAPACITOR_CONDITIONING_RESISTANCE,
            min_dt: super::MIN_DT,
            error_threshold: super::ERROR_THRESHOLD,
            paused_dt: super::PAUSED_DT,
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the open-switch resistance ceiling.
    pub fn with_open_switch_resistance(mut self, resistance: f64) -> Self {
        self.open_switch_resistance = resistance;
        self
    }

    /// Set the closed-switch resistance.
    pub fn with_closed_switch_resistance(mut self, resistance: f64) -> Self {
        self.closed_switch_resistance = resistance;
        self
    }

    /// Set the minimum sub-step size.
    pub fn with_min_dt(mut self, min_dt: f64) -> Self {
        self.min_dt = min_dt;
        self
    }

    /// Set the adaptive-controller acceptance tolerance.
    pub fn with_error_threshold(mut self, error_threshold: f64) -> Self {
        self.error_threshold = error_threshold;
        self
    }

    /// Check the configuration for values the solver cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.open_switch_resistance > 0.0) {
            return Err(VoltlabError::invalid_config(
                "open-switch resistance must be positive",
            ));
        }
        if !(self.closed_switch_resistance > 0.0) {
            return Err(VoltlabError::invalid_config(
                "closed-switch resistance must be positive",
            ));
        }
        if !(self.capacitor_conditioning_resistance >= 0.0) {
            return Err(VoltlabError::invalid_config(
                "conditioning resistance must be non-negative",
            ));
        }
        if !(self.min_dt > 0.0) {
            return Err(VoltlabError::invalid_config("min_dt must be positive"));
        }
        if !(self.error_threshold > 0.0) {
            return Err(VoltlabError::invalid_config(
                "error threshold must be positive",
            ));
        }
        Ok(())
    }

    /// The controller-facing slice of this configuration.
    pub(crate) fn timestep(&self) -> TimestepConfig {
        TimestepConfig {
            min_dt: self.min_dt,
            error_threshold: self.error_threshold,
            paused_dt: self.paused_dt,
        }
    }
}

/// How to recover one component's current from a solved sub-step.
enum ReadBack {
    Battery(usize),
    Resistor(usize),
    CurrentSource(f64),
    Capacitor(usize),
    Inductor(usize),
}

/// The per-frame solver facade.
///
/// Stateless between frames: every call rebuilds its inputs from the
/// snapshot, so a mid-frame topology edit simply changes what the next
/// frame solves.
#[derive(Debug, Default)]
pub struct CircuitEngine {
    config: EngineConfig,
}

impl CircuitEngine {
    /// Create an engine with default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with custom configuration.
    pub fn with_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Get the engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Solve one frame: voltages for every vertex, a signed current for
    /// every component, and, when dynamic elements are present, their
    /// next states after advancing `dt` with controlled error.
    ///
    /// `dt` is the frame's simulation time, or the configured paused
    /// sentinel to refresh dependents without advancing meaningfully.
    pub fn solve_frame(&self, snapshot: &CircuitSnapshot, dt: f64) -> FrameSolution {
        let (circuit, readback) = self.partition(snapshot);
        if circuit.has_dynamics() {
            self.solve_dynamic(snapshot, circuit, &readback, dt)
        } else {
            self.solve_static(snapshot, &circuit, &readback)
        }
    }

    /// Lower snapshot components into solver elements. One exhaustive
    /// match; adding a component kind fails to compile until handled here.
    fn partition(&self, snapshot: &CircuitSnapshot) -> (DynamicCircuit, Vec<ReadBack>) {
        let mut circuit = DynamicCircuit::new();
        let mut readback = Vec::with_capacity(snapshot.components.len());

        for component in &snapshot.components {
            let n0 = CircuitNode::Vertex(component.node0);
            let n1 = CircuitNode::Vertex(component.node1);
            match component.kind {
                ComponentKind::Battery {
                    voltage,
                    internal_resistance,
                } => {
                    debug_assert!(internal_resistance >= 0.0);
                    readback.push(ReadBack::Battery(circuit.batteries.len()));
                    circuit.batteries.push(ResistiveBattery {
                        id: component.id,
                        node0: component.node0,
                        node1: component.node1,
                        voltage,
                        internal_resistance,
                    });
                }
                ComponentKind::Resistor { resistance } | ComponentKind::Wire { resistance } => {
                    debug_assert!(resistance >= 0.0);
                    readback.push(ReadBack::Resistor(circuit.resistors.len()));
                    circuit.resistors.push(MnaResistor::new(n0, n1, resistance));
                }
                ComponentKind::Switch { closed } => {
                    let resistance = if closed {
                        self.config.closed_switch_resistance
                    } else {
                        self.config.open_switch_resistance
                    };
                    readback.push(ReadBack::Resistor(circuit.resistors.len()));
                    circuit.resistors.push(MnaResistor::new(n0, n1, resistance));
                }
                ComponentKind::Ammeter => {
                    // Zero resistance: the current comes from the branch
                    // unknown, so an ideal ammeter drops no voltage.
                    readback.push(ReadBack::Resistor(circuit.resistors.len()));
                    circuit.resistors.push(MnaResistor::new(n0, n1, 0.0));
                }
                ComponentKind::CurrentSource { current } => {
                    readback.push(ReadBack::CurrentSource(current));
                    circuit
                        .current_sources
                        .push(MnaCurrentSource::new(n0, n1, current));
                }
                ComponentKind::Capacitor { capacitance, state } => {
                    readback.push(ReadBack::Capacitor(circuit.capacitors.len()));
                    circuit.capacitors.push(DynamicCapacitor {
                        id: component.id,
                        node0: component.node0,
                        node1: component.node1,
                        capacitance,
                        state,
                    });
                }
                ComponentKind::Inductor { inductance, state } => {
                    readback.push(ReadBack::Inductor(circuit.inductors.len()));
                    circuit.inductors.push(DynamicInductor {
                        id: component.id,
                        node0: component.node0,
                        node1: component.node1,
                        inductance,
                        state,
                    });
                }
            }
        }

        (circuit, readback)
    }

    fn solve_static(
        &self,
        snapshot: &CircuitSnapshot,
        circuit: &DynamicCircuit,
        readback: &[ReadBack],
    ) -> FrameSolution {
        match circuit.solve_static(&self.config) {
            Ok(solution) => self.write_back(snapshot, circuit, &solution, readback, 1),
            Err(error) => {
                warn!(%error, "static solve failed; returning flagged result");
                FrameSolution::flagged(snapshot)
            }
        }
    }

    fn solve_dynamic(
        &self,
        snapshot: &CircuitSnapshot,
        circuit: DynamicCircuit,
        readback: &[ReadBack],
        dt: f64,
    ) -> FrameSolution {
        let stepper = CompanionStepper {
            config: &self.config,
        };
        let initial = DynamicCircuitState::new(circuit);
        let mut history =
            step_in_time_with_history(&initial, &stepper, dt, &self.config.timestep());
        let substeps = history.len();

        // Results are read from the final accepted sub-step only, so
        // intermediate dynamic states never leak into the visible model.
        let last = match history.pop() {
            Some(record) => record.state,
            None => initial,
        };
        match last.solution {
            Some(ref solution) if last.solved => {
                self.write_back(snapshot, &last.circuit, solution, readback, substeps)
            }
            _ => {
                warn!(dt, "dynamic solve failed; returning flagged result");
                FrameSolution::flagged(snapshot)
            }
        }
    }

    fn write_back(
        &self,
        snapshot: &CircuitSnapshot,
        circuit: &DynamicCircuit,
        solution: &DynamicSolution,
        readback: &[ReadBack],
        substeps: usize,
    ) -> FrameSolution {
        // Vertices absent from the solve (component-free junctions) read
        // exactly 0 V through MnaSolution's default.
        let voltages: HashMap<_, _> = snapshot
            .all_vertices()
            .into_iter()
            .map(|v| (v, solution.vertex_voltage(v)))
            .collect();

        let mut currents: HashMap<ComponentId, f64> =
            HashMap::with_capacity(snapshot.components.len());
        let mut dynamic_states: HashMap<ComponentId, DynamicState> = HashMap::new();

        for (component, source) in snapshot.components.iter().zip(readback) {
            let current = match *source {
                ReadBack::Battery(i) => solution.battery_current(i),
                ReadBack::Resistor(i) => solution.resistor_current(i),
                ReadBack::CurrentSource(current) => current,
                ReadBack::Capacitor(i) => {
                    let state = circuit.capacitors[i].state;
                    dynamic_states.insert(component.id, state);
                    state.current
                }
                ReadBack::Inductor(i) => {
                    let state = circuit.inductors[i].state;
                    dynamic_states.insert(component.id, state);
                    state.current
                }
            };
            currents.insert(component.id, current);
        }

        FrameSolution {
            voltages,
            currents,
            dynamic_states,
            substeps,
            solved: true,
        }
    }
}

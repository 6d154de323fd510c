//! Companion-model layer for energy-storing components.
//!
//! Capacitors and inductors are replaced, per sub-step, by a synthetic
//! series battery + resistor derived from the trapezoidal rule, appended to
//! the ordinary element lists, and solved by the same linear core. The new
//! `{voltage, current}` of each dynamic element is then read back through
//! its companion resistor, producing a new immutable [`DynamicCircuit`].
//!
//! Sign conventions are uniform with the rest of the crate: element current
//! is conventional current from `node0` to `node1` through the element.
//! Under that convention the trapezoidal companions are, with a synthetic
//! mid node `m` between `node0` and `node1`:
//!
//! - capacitor: resistor `dt/(2C) + r_cond`, battery
//!   `veq = v_prev + (dt/(2C)) * i_prev`
//! - inductor:  resistor `2L/dt`, battery `veq = -(v_prev + (2L/dt) * i_prev)`
//!
//! `r_cond` is a small fixed conditioning resistance stamped into the
//! capacitor's companion resistor only; the integration constant and the
//! read-back state exclude it (the stored voltage is the capacitor's, net of
//! the conditioning drop), so the discrete state map stays exactly
//! trapezoidal.
//!
//! The inductor sign follows from requiring the companion branch to satisfy
//! `V = L * dI/dt` under the trapezoidal update; an inverted sign makes
//! stored energy grow instead of decay, which the RL step-response tests
//! guard against.

use tracing::warn;

use crate::circuit::{ComponentId, DynamicState, VertexId};
use crate::error::Result;
use crate::solver::engine::EngineConfig;
use crate::solver::mna::{MnaBattery, MnaCircuit, MnaCurrentSource, MnaResistor, MnaSolution};
use crate::solver::timestep::Steppable;

/// Node token used by the dynamic layer: either a real vertex from the
/// snapshot or a synthetic node minted for a companion split. Real vertices
/// order before synthetic ones, so references are pinned at real junctions
/// whenever a sub-graph has any.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CircuitNode {
    Vertex(VertexId),
    Synthetic(u32),
}

/// A battery with internal series resistance. Split during assembly into an
/// ideal battery plus resistor via one synthetic node when the resistance
/// is nonzero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResistiveBattery {
    pub id: ComponentId,
    pub node0: VertexId,
    pub node1: VertexId,
    pub voltage: f64,
    pub internal_resistance: f64,
}

/// A capacitor together with its last accepted state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicCapacitor {
    pub id: ComponentId,
    pub node0: VertexId,
    pub node1: VertexId,
    pub capacitance: f64,
    pub state: DynamicState,
}

/// An inductor together with its last accepted state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicInductor {
    pub id: ComponentId,
    pub node0: VertexId,
    pub node1: VertexId,
    pub inductance: f64,
    pub state: DynamicState,
}

/// An immutable circuit value for one frame: static elements plus dynamic
/// elements carrying their prior state. Advancing in time produces a new
/// value; nothing here is ever mutated in place.
#[derive(Debug, Clone, Default)]
pub struct DynamicCircuit {
    pub batteries: Vec<ResistiveBattery>,
    pub resistors: Vec<MnaResistor<CircuitNode>>,
    pub current_sources: Vec<MnaCurrentSource<CircuitNode>>,
    pub capacitors: Vec<DynamicCapacitor>,
    pub inductors: Vec<DynamicInductor>,
}

impl DynamicCircuit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any element carries state across sub-steps.
    pub fn has_dynamics(&self) -> bool {
        !self.capacitors.is_empty() || !self.inductors.is_empty()
    }

    /// Solve the circuit at one sub-step of size `dt` and propagate every
    /// dynamic element forward, returning the solution and the new circuit
    /// value. The state transition is purely `old + dt -> new`.
    pub fn solve_propagate(
        &self,
        dt: f64,
        config: &EngineConfig,
    ) -> Result<(DynamicSolution, DynamicCircuit)> {
        debug_assert!(dt > 0.0, "sub-step must be positive");

        let mut mna = MnaCircuit::new();
        let mut synthetic = 0u32;
        let mut mint = |count: &mut u32| {
            let node = CircuitNode::Synthetic(*count);
            *count += 1;
            node
        };

        // Real batteries first so battery row i stays battery i.
        let mut extra_resistors: Vec<MnaResistor<CircuitNode>> = Vec::new();
        let battery_rows: Vec<usize> = self
            .batteries
            .iter()
            .map(|b| {
                let row = mna.batteries.len();
                let n0 = CircuitNode::Vertex(b.node0);
                let n1 = CircuitNode::Vertex(b.node1);
                if b.internal_resistance > 0.0 {
                    let mid = mint(&mut synthetic);
                    mna.batteries.push(MnaBattery::new(n0, mid, b.voltage));
                    extra_resistors.push(MnaResistor::new(mid, n1, b.internal_resistance));
                } else {
                    mna.batteries.push(MnaBattery::new(n0, n1, b.voltage));
                }
                row
            })
            .collect();

        // Companion models. Their resistors are appended after the real
        // resistor list so real resistor indices map straight through; the
        // appended index is the read-back handle for the element's current.
        let real_resistors = self.resistors.len();
        let mut capacitor_readback = Vec::with_capacity(self.capacitors.len());
        for c in &self.capacitors {
            debug_assert!(c.capacitance > 0.0, "capacitance must be positive");
            // The conditioning term is not physically meaningful; it keeps
            // the matrix well-conditioned when C is large or dt small. It is
            // stamped into the companion resistor but kept out of the
            // integration constant: folding it into `veq` would add a
            // per-step (rather than per-time) voltage decrement, so the
            // stored state would drift from the trapezoidal map and coarse
            // and fine controller estimates would disagree by a
            // dt-independent amount.
            let half_step = dt / (2.0 * c.capacitance);
            let req = half_step + config.capacitor_conditioning_resistance;
            let veq = c.state.voltage + half_step * c.state.current;
            let mid = mint(&mut synthetic);
            mna.batteries
                .push(MnaBattery::new(CircuitNode::Vertex(c.node0), mid, veq));
            capacitor_readback.push(real_resistors + extra_resistors.len());
            extra_resistors.push(MnaResistor::new(mid, CircuitNode::Vertex(c.node1), req));
        }
        let mut inductor_readback = Vec::with_capacity(self.inductors.len());
        for l in &self.inductors {
            debug_assert!(l.inductance > 0.0, "inductance must be positive");
            let req = 2.0 * l.inductance / dt;
            let veq = -(l.state.voltage + req * l.state.current);
            let mid = mint(&mut synthetic);
            mna.batteries
                .push(MnaBattery::new(CircuitNode::Vertex(l.node0), mid, veq));
            inductor_readback.push(real_resistors + extra_resistors.len());
            extra_resistors.push(MnaResistor::new(mid, CircuitNode::Vertex(l.node1), req));
        }

        mna.resistors.extend_from_slice(&self.resistors);
        mna.resistors.extend(extra_resistors);
        mna.current_sources.extend_from_slice(&self.current_sources);

        let solution = mna.solve()?;

        let mut next = self.clone();
        for (i, c) in self.capacitors.iter().enumerate() {
            let current = solution.resistor_current(capacitor_readback[i]);
            // Net of the conditioning drop, so the stored voltage is the
            // capacitor's, not the companion branch's.
            let voltage = solution.voltage_between(
                CircuitNode::Vertex(c.node0),
                CircuitNode::Vertex(c.node1),
            ) - config.capacitor_conditioning_resistance * current;
            next.capacitors[i].state = DynamicState::new(voltage, current);
        }
        for (i, l) in self.inductors.iter().enumerate() {
            let voltage = solution.voltage_between(
                CircuitNode::Vertex(l.node0),
                CircuitNode::Vertex(l.node1),
            );
            let current = solution.resistor_current(inductor_readback[i]);
            next.inductors[i].state = DynamicState::new(voltage, current);
        }

        Ok((
            DynamicSolution {
                solution,
                battery_rows,
            },
            next,
        ))
    }

    /// Solve a circuit with no dynamic elements. The sub-step size is
    /// irrelevant without companions; this is the static aggregator path.
    pub fn solve_static(&self, config: &EngineConfig) -> Result<DynamicSolution> {
        debug_assert!(
            !self.has_dynamics(),
            "static solve called with dynamic elements present"
        );
        self.solve_propagate(1.0, config).map(|(solution, _)| solution)
    }
}

/// A solved sub-step, indexed in terms of the pre-assembly element lists.
#[derive(Debug, Clone)]
pub struct DynamicSolution {
    solution: MnaSolution<CircuitNode>,
    battery_rows: Vec<usize>,
}

impl DynamicSolution {
    /// Voltage at a real vertex; absent vertices read 0 V.
    pub fn vertex_voltage(&self, vertex: VertexId) -> f64 {
        self.solution.voltage(CircuitNode::Vertex(vertex))
    }

    /// Current through the `i`-th battery of the input circuit (through its
    /// ideal part when an internal-resistance split occurred).
    pub fn battery_current(&self, i: usize) -> f64 {
        self.solution.battery_current(self.battery_rows[i])
    }

    /// Current through the `i`-th real resistor of the input circuit.
    pub fn resistor_current(&self, i: usize) -> f64 {
        self.solution.resistor_current(i)
    }
}

/// Controller state for one circuit advancing through a frame: the circuit
/// value plus the solution that produced it (absent before the first step).
#[derive(Debug, Clone)]
pub struct DynamicCircuitState {
    pub circuit: DynamicCircuit,
    pub solution: Option<DynamicSolution>,
    /// Cleared permanently once any sub-step fails to solve.
    pub solved: bool,
}

impl DynamicCircuitState {
    pub fn new(circuit: DynamicCircuit) -> Self {
        Self {
            circuit,
            solution: None,
            solved: true,
        }
    }
}

/// Adapter driving [`DynamicCircuit`] through the adaptive controller.
pub(crate) struct CompanionStepper<'a> {
    pub config: &'a EngineConfig,
}

impl Steppable for CompanionStepper<'_> {
    type State = DynamicCircuitState;

    fn update(&self, state: &Self::State, dt: f64) -> Self::State {
        match state.circuit.solve_propagate(dt, self.config) {
            Ok((solution, next)) => DynamicCircuitState {
                circuit: next,
                solution: Some(solution),
                solved: state.solved,
            },
            Err(error) => {
                warn!(%error, dt, "sub-step failed to solve; holding previous state");
                DynamicCircuitState {
                    circuit: state.circuit.clone(),
                    solution: state.solution.clone(),
                    solved: false,
                }
            }
        }
    }

    /// Mean per-element disagreement between two candidate states in the
    /// (voltage, current) plane. Unsolvable states report zero distance so
    /// subdivision terminates instead of chasing a singular system.
    fn distance(&self, a: &Self::State, b: &Self::State) -> f64 {
        if !a.solved || !b.solved {
            return 0.0;
        }
        let ca = &a.circuit;
        let cb = &b.circuit;
        debug_assert_eq!(ca.capacitors.len(), cb.capacitors.len());
        debug_assert_eq!(ca.inductors.len(), cb.inductors.len());
        let count = ca.capacitors.len() + ca.inductors.len();
        if count == 0 {
            return 0.0;
        }
        let mut sum = 0.0;
        for (x, y) in ca.capacitors.iter().zip(&cb.capacitors) {
            sum += x.state.distance(&y.state);
        }
        for (x, y) in ca.inductors.iter().zip(&cb.inductors) {
            sum += x.state.distance(&y.state);
        }
        sum / count as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn config() -> EngineConfig {
        EngineConfig::default()
    }

    #[test]
    fn resistive_battery_splits_internally() {
        // 9 V battery with 1 ohm internal resistance into an 8 ohm load:
        // 1 A loop, terminal voltage 8 V.
        let mut circuit = DynamicCircuit::new();
        circuit.batteries.push(ResistiveBattery {
            id: ComponentId(0),
            node0: VertexId(1),
            node1: VertexId(0),
            voltage: 9.0,
            internal_resistance: 1.0,
        });
        circuit.resistors.push(MnaResistor::new(
            CircuitNode::Vertex(VertexId(1)),
            CircuitNode::Vertex(VertexId(0)),
            8.0,
        ));

        let solution = circuit.solve_static(&config()).unwrap();
        assert_relative_eq!(solution.vertex_voltage(VertexId(1)), 8.0, epsilon = 1e-9);
        assert_relative_eq!(solution.resistor_current(0), 1.0, epsilon = 1e-9);
        assert_relative_eq!(solution.battery_current(0), -1.0, epsilon = 1e-9);
    }

    #[test]
    fn capacitor_discharge_step_matches_trapezoidal_form() {
        // Charged capacitor across a 1 ohm resistor. With a = dt/(2C) and
        // the conditioning resistance r in series, one step solves the
        // branch at V(1) = V0 / (1 + a + r); the stored capacitor voltage
        // is net of the conditioning drop, V(1) * (1 + r), which is the
        // exact trapezoidal update of the r-perturbed circuit.
        let cfg = config();
        let dt = 1e-4;
        let capacitance = 1e-4;

        let mut circuit = DynamicCircuit::new();
        circuit.resistors.push(MnaResistor::new(
            CircuitNode::Vertex(VertexId(1)),
            CircuitNode::Vertex(VertexId(0)),
            1.0,
        ));
        circuit.capacitors.push(DynamicCapacitor {
            id: ComponentId(0),
            node0: VertexId(1),
            node1: VertexId(0),
            capacitance,
            state: DynamicState::new(1.0, 0.0),
        });

        let (_, next) = circuit.solve_propagate(dt, &cfg).unwrap();
        let a = dt / (2.0 * capacitance);
        let r = cfg.capacitor_conditioning_resistance;
        let branch_v = 1.0 / (1.0 + a + r);
        let state = next.capacitors[0].state;
        assert_relative_eq!(state.voltage, branch_v * (1.0 + r), epsilon = 1e-9);
        // Discharge current flows node1 -> node0 through the capacitor.
        assert_relative_eq!(state.current, -branch_v, epsilon = 1e-9);
    }

    #[test]
    fn inductor_step_matches_trapezoidal_form() {
        // Battery Vb, series resistor R, inductor to ground. One step:
        // I_new = (Vb + V_prev + req * I_prev) / (R + req), req = 2L/dt.
        let cfg = config();
        let dt = 1e-5;
        let inductance = 1e-2;
        let resistance = 100.0;

        let mut circuit = DynamicCircuit::new();
        circuit.batteries.push(ResistiveBattery {
            id: ComponentId(0),
            node0: VertexId(1),
            node1: VertexId(0),
            voltage: 9.0,
            internal_resistance: 0.0,
        });
        circuit.resistors.push(MnaResistor::new(
            CircuitNode::Vertex(VertexId(1)),
            CircuitNode::Vertex(VertexId(2)),
            resistance,
        ));
        circuit.inductors.push(DynamicInductor {
            id: ComponentId(2),
            node0: VertexId(2),
            node1: VertexId(0),
            inductance,
            state: DynamicState::rest(),
        });

        let (_, next) = circuit.solve_propagate(dt, &cfg).unwrap();
        let req = 2.0 * inductance / dt;
        let expected_i = 9.0 / (resistance + req);
        let state = next.inductors[0].state;
        assert_relative_eq!(state.current, expected_i, epsilon = 1e-9);
        assert_relative_eq!(state.voltage, 9.0 - resistance * expected_i, epsilon = 1e-9);
    }

    #[test]
    fn rl_fixed_steps_converge_monotonically_to_v_over_r() {
        // Primary regression for the inductor companion sign: a wrong sign
        // diverges instead of settling at V/R.
        let cfg = config();
        let dt = 1e-5;
        let resistance = 100.0;

        let mut circuit = DynamicCircuit::new();
        circuit.batteries.push(ResistiveBattery {
            id: ComponentId(0),
            node0: VertexId(1),
            node1: VertexId(0),
            voltage: 9.0,
            internal_resistance: 0.0,
        });
        circuit.resistors.push(MnaResistor::new(
            CircuitNode::Vertex(VertexId(1)),
            CircuitNode::Vertex(VertexId(2)),
            resistance,
        ));
        circuit.inductors.push(DynamicInductor {
            id: ComponentId(2),
            node0: VertexId(2),
            node1: VertexId(0),
            inductance: 1e-2,
            state: DynamicState::rest(),
        });

        let mut previous = 0.0;
        for _ in 0..200 {
            let (_, next) = circuit.solve_propagate(dt, &cfg).unwrap();
            let current = next.inductors[0].state.current;
            assert!(current >= previous - 1e-12, "current must rise monotonically");
            assert!(current <= 0.09 + 1e-9, "current must not overshoot V/R");
            previous = current;
            circuit = next;
        }
        assert_abs_diff_eq!(previous, 0.09, epsilon = 1e-4);
    }

    #[test]
    fn solve_propagate_leaves_input_untouched() {
        let cfg = config();
        let mut circuit = DynamicCircuit::new();
        circuit.resistors.push(MnaResistor::new(
            CircuitNode::Vertex(VertexId(1)),
            CircuitNode::Vertex(VertexId(0)),
            10.0,
        ));
        circuit.capacitors.push(DynamicCapacitor {
            id: ComponentId(0),
            node0: VertexId(1),
            node1: VertexId(0),
            capacitance: 1e-6,
            state: DynamicState::new(5.0, 0.0),
        });

        let before = circuit.capacitors[0].state;
        let (_, next) = circuit.solve_propagate(1e-4, &cfg).unwrap();
        assert_eq!(circuit.capacitors[0].state, before);
        assert_ne!(next.capacitors[0].state, before);
    }
}

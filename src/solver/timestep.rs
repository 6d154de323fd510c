//! Adaptive timestep subdivision.
//!
//! Advances an opaque state across a frame by repeatedly proposing a
//! sub-step, comparing a coarse one-step update against a finer
//! two-half-step update, and halving until they agree within tolerance.
//! Bounds local truncation error without the caller knowing how stiff the
//! underlying system is.

use tracing::debug;

/// A system the controller can advance: a pure `old + dt -> new` update and
/// a non-negative disagreement metric between two candidate states.
pub trait Steppable {
    type State: Clone;

    /// Advance the state by `dt`, producing a new state.
    fn update(&self, state: &Self::State, dt: f64) -> Self::State;

    /// Disagreement between two candidate states; zero means identical for
    /// error-control purposes.
    fn distance(&self, a: &Self::State, b: &Self::State) -> f64;
}

/// One accepted sub-step: the size taken and the state after it.
#[derive(Debug, Clone)]
pub struct TimestepRecord<S> {
    pub dt: f64,
    pub state: S,
}

/// Controller tunables.
#[derive(Debug, Clone, Copy)]
pub struct TimestepConfig {
    /// Absolute floor: at or below this, a step is taken without an error
    /// check. Guarantees termination.
    pub min_dt: f64,
    /// Accept a step when coarse and fine estimates are within this.
    pub error_threshold: f64,
    /// Reserved sentinel: a total time bit-equal to this is stepped exactly
    /// once with no subdivision, used to keep dependents fresh while the
    /// host is paused.
    pub paused_dt: f64,
}

impl Default for TimestepConfig {
    fn default() -> Self {
        Self {
            min_dt: super::MIN_DT,
            error_threshold: super::ERROR_THRESHOLD,
            paused_dt: super::PAUSED_DT,
        }
    }
}

/// Advance `initial` across `total_dt`, returning the ordered accepted
/// sub-steps. Accepted sizes sum to `total_dt`; none is below
/// `config.min_dt` except possibly the final remainder.
///
/// The attempted size starts at the full remaining time and, after every
/// acceptance, doubles (clipped to the remaining time) so one stiff region
/// does not throttle the rest of the frame.
pub fn step_in_time_with_history<T: Steppable>(
    initial: &T::State,
    steppable: &T,
    total_dt: f64,
    config: &TimestepConfig,
) -> Vec<TimestepRecord<T::State>> {
    let mut history = Vec::new();
    let mut state = initial.clone();
    let mut remaining = total_dt;
    let mut attempt = total_dt;

    while remaining > 0.0 {
        let proposed = attempt.min(remaining);
        let (next, taken) = search(steppable, &state, proposed, config);
        remaining -= taken;
        history.push(TimestepRecord {
            dt: taken,
            state: next.clone(),
        });
        state = next;
        attempt = (taken * 2.0).min(remaining);
    }

    history
}

/// Find the largest acceptable sub-step at or below `dt`.
///
/// An explicit loop threading the already-computed half-step forward: when a
/// step is rejected, its half result is exactly the full-step estimate of
/// the next iteration, so it is reused rather than recomputed.
fn search<T: Steppable>(
    steppable: &T,
    state: &T::State,
    dt: f64,
    config: &TimestepConfig,
) -> (T::State, f64) {
    let mut dt = dt;
    let mut precomputed: Option<T::State> = None;

    loop {
        // Sentinel comparison is intentionally bit-exact.
        if dt == config.paused_dt {
            return (steppable.update(state, dt), dt);
        }
        if dt <= config.min_dt {
            debug!(dt, min_dt = config.min_dt, "timestep floor reached");
            let next = precomputed
                .take()
                .unwrap_or_else(|| steppable.update(state, dt));
            return (next, dt);
        }

        let coarse = precomputed
            .take()
            .unwrap_or_else(|| steppable.update(state, dt));
        let half = steppable.update(state, dt / 2.0);
        let fine = steppable.update(&half, dt / 2.0);

        if steppable.distance(&coarse, &fine) <= config.error_threshold {
            // The finer estimate wins.
            return (fine, dt);
        }

        let halved = (dt / 2.0).max(config.min_dt);
        if halved == dt / 2.0 {
            precomputed = Some(half);
        }
        dt = halved;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    /// Explicit-Euler exponential decay: accurate for small `k * dt`,
    /// badly wrong (even sign-flipping) for large, so big proposed steps
    /// get rejected and subdivided.
    struct EulerDecay {
        k: f64,
    }

    impl Steppable for EulerDecay {
        type State = f64;

        fn update(&self, state: &f64, dt: f64) -> f64 {
            state * (1.0 - self.k * dt)
        }

        fn distance(&self, a: &f64, b: &f64) -> f64 {
            (a - b).abs()
        }
    }

    /// Pathological system whose estimates never agree.
    struct NeverConverges;

    impl Steppable for NeverConverges {
        type State = f64;

        fn update(&self, state: &f64, dt: f64) -> f64 {
            state + dt
        }

        fn distance(&self, _: &f64, _: &f64) -> f64 {
            1.0
        }
    }

    #[test]
    fn smooth_system_takes_one_full_step() {
        let config = TimestepConfig::default();
        let history = step_in_time_with_history(&1.0, &EulerDecay { k: 1e-3 }, 0.01, &config);

        assert_eq!(history.len(), 1);
        assert_relative_eq!(history[0].dt, 0.01);
    }

    #[test]
    fn accepted_steps_sum_to_total() {
        let config = TimestepConfig::default();
        let total = 1e-3;
        let history = step_in_time_with_history(&1.0, &EulerDecay { k: 1000.0 }, total, &config);

        assert!(history.len() > 1, "stiff system must subdivide");
        let sum: f64 = history.iter().map(|r| r.dt).sum();
        assert_abs_diff_eq!(sum, total, epsilon = 1e-12);
    }

    #[test]
    fn stiff_decay_tracks_analytic_solution() {
        let config = TimestepConfig::default();
        let k = 1000.0;
        let total = 1e-3;
        let history = step_in_time_with_history(&1.0, &EulerDecay { k }, total, &config);

        let last = history.last().unwrap().state;
        // Per-step error is bounded by the threshold; the accumulated drift
        // over the frame stays well inside a few parts per thousand.
        assert_abs_diff_eq!(last, (-k * total).exp(), epsilon = 5e-3);
    }

    #[test]
    fn no_accepted_step_below_floor_except_final_remainder() {
        let config = TimestepConfig::default();
        let total = 5.0 * config.min_dt;
        let history = step_in_time_with_history(&0.0, &NeverConverges, total, &config);

        assert!(!history.is_empty());
        for record in &history[..history.len() - 1] {
            assert!(
                record.dt >= config.min_dt - 1e-20,
                "only the final remainder may fall below min_dt"
            );
        }
        let sum: f64 = history.iter().map(|r| r.dt).sum();
        assert_relative_eq!(sum, total, epsilon = 1e-12);
    }

    #[test]
    fn non_convergence_degrades_to_floor_without_error() {
        let config = TimestepConfig::default();
        let total = 10.0 * config.min_dt;
        let history = step_in_time_with_history(&0.0, &NeverConverges, total, &config);

        // Every accepted step was forced to the floor.
        for record in &history[..history.len() - 1] {
            assert_abs_diff_eq!(record.dt, config.min_dt, epsilon = 1e-20);
        }
        let last = history.last().unwrap();
        assert!(last.state.is_finite());
    }

    #[test]
    fn paused_sentinel_bypasses_subdivision() {
        let config = TimestepConfig::default();
        // A system this stiff would subdivide heavily if error-checked.
        let history = step_in_time_with_history(
            &1.0,
            &EulerDecay { k: 1e12 },
            config.paused_dt,
            &config,
        );

        assert_eq!(history.len(), 1);
        assert_relative_eq!(history[0].dt, config.paused_dt);
    }

    #[test]
    fn attempt_grows_after_acceptance() {
        // Decay constant chosen so the first proposal subdivides but later
        // ones do not; the history must contain growing step sizes.
        let config = TimestepConfig::default();
        let history = step_in_time_with_history(&1.0, &EulerDecay { k: 2000.0 }, 2e-3, &config);

        assert!(history.len() > 2);
        let first = history[0].dt;
        let max = history.iter().map(|r| r.dt).fold(0.0, f64::max);
        assert!(
            max > first * 1.5,
            "later steps should grow beyond the first accepted step"
        );
    }
}

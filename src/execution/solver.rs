//! ODE solver hook (C11): ties a right-hand-side batch into a
//! fixed-step or adaptive-step integrator.
//!
//! The reference compiler calls through an opaque `Solver_Function`
//! pointer (`run_model.cpp`) selected per-model at link time; no
//! concrete solver implementation survives in the reference source
//! (only the calling convention: `solver_fun(&h, hmin, n, x0,
//! run_state, rhs)`). Two canonical implementations are provided here
//! as the two `OdeSolver`s a model can select: a fixed-step classical
//! RK4, and an adaptive embedded Runge-Kutta (Cash-Karp coefficients)
//! that promotes/demotes its step size under the same `h`/`hmin` clamp
//! rule `run_model.cpp` applies when resolving a batch's solver
//! descriptor.

use super::run_state::RunState;

/// The right-hand-side of an ODE batch: given the state vector's `n`
/// entries at `t`, writes `n` derivatives into `dx`.
pub trait BatchFn {
    fn eval(&mut self, x: &[f64], dx: &mut [f64], run_state: &mut RunState);
}

impl<F: FnMut(&[f64], &mut [f64], &mut RunState)> BatchFn for F {
    fn eval(&mut self, x: &[f64], dx: &mut [f64], run_state: &mut RunState) {
        self(x, dx, run_state)
    }
}

/// One ODE step, matching the original's `solver_fun` signature:
/// advances `x0` in place by one model time step, carrying `h` as an
/// adaptive warm start across calls. Returns `false` if the step could
/// not be completed (e.g. too many step-size halvings).
pub trait OdeSolver {
    fn step(&mut self, h: &mut f64, hmin: f64, n: usize, x0: &mut [f64], run_state: &mut RunState, rhs: &mut dyn BatchFn) -> bool;
}

/// Fixed-step classical Runge-Kutta 4. `h` is never adjusted; a single
/// step of size `h` is always taken.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedStepRk4;

impl OdeSolver for FixedStepRk4 {
    fn step(&mut self, h: &mut f64, _hmin: f64, n: usize, x0: &mut [f64], run_state: &mut RunState, rhs: &mut dyn BatchFn) -> bool {
        let step = *h;
        let mut k1 = vec![0.0; n];
        let mut k2 = vec![0.0; n];
        let mut k3 = vec![0.0; n];
        let mut k4 = vec![0.0; n];
        let mut tmp = vec![0.0; n];

        rhs.eval(x0, &mut k1, run_state);
        for i in 0..n {
            tmp[i] = x0[i] + 0.5 * step * k1[i];
        }
        rhs.eval(&tmp, &mut k2, run_state);
        for i in 0..n {
            tmp[i] = x0[i] + 0.5 * step * k2[i];
        }
        rhs.eval(&tmp, &mut k3, run_state);
        for i in 0..n {
            tmp[i] = x0[i] + step * k3[i];
        }
        rhs.eval(&tmp, &mut k4, run_state);

        for i in 0..n {
            x0[i] += (step / 6.0) * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]);
        }
        true
    }
}

/// Cash-Karp coefficients for an embedded 4th/5th-order Runge-Kutta
/// pair, used to estimate local truncation error and adapt step size.
const B: [[f64; 5]; 5] = [
    [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0],
    [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0],
    [3.0 / 10.0, -9.0 / 10.0, 6.0 / 5.0, 0.0, 0.0],
    [-11.0 / 54.0, 5.0 / 2.0, -70.0 / 27.0, 35.0 / 27.0, 0.0],
    [1631.0 / 55296.0, 175.0 / 512.0, 575.0 / 13824.0, 44275.0 / 110592.0, 253.0 / 4096.0],
];
const FIFTH_ORDER: [f64; 6] = [37.0 / 378.0, 0.0, 250.0 / 621.0, 125.0 / 594.0, 0.0, 512.0 / 1771.0];
const FOURTH_ORDER: [f64; 6] = [2825.0 / 27648.0, 0.0, 18575.0 / 48384.0, 13525.0 / 55296.0, 277.0 / 14336.0, 1.0 / 4.0];

/// Adaptive embedded Runge-Kutta (Cash-Karp): halves `h` and retries
/// when the estimated error exceeds `tolerance`, doubles it (capped at
/// 1.0 model time-step units) when the error is comfortably small,
/// never dropping below `hmin`.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveRk {
    pub tolerance: f64,
}

impl Default for AdaptiveRk {
    fn default() -> Self {
        AdaptiveRk { tolerance: 1e-6 }
    }
}

impl OdeSolver for AdaptiveRk {
    fn step(&mut self, h: &mut f64, hmin: f64, n: usize, x0: &mut [f64], run_state: &mut RunState, rhs: &mut dyn BatchFn) -> bool {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let (fifth, fourth) = self.try_step(*h, n, x0, run_state, rhs);
            let error = fifth.iter().zip(&fourth).map(|(a, b)| (a - b).abs()).fold(0.0_f64, f64::max);

            if error <= self.tolerance || *h <= hmin || attempts > 12 {
                x0.copy_from_slice(&fifth);
                if error < self.tolerance * 0.1 {
                    *h = (*h * 1.5).min(1.0);
                }
                return true;
            }
            *h = (*h * 0.5).max(hmin);
        }
    }
}

impl AdaptiveRk {
    fn try_step(&self, h: f64, n: usize, x0: &[f64], run_state: &mut RunState, rhs: &mut dyn BatchFn) -> (Vec<f64>, Vec<f64>) {
        let mut k: [Vec<f64>; 6] = Default::default();
        for stage in &mut k {
            *stage = vec![0.0; n];
        }
        rhs.eval(x0, &mut k[0], run_state);
        for s in 1..6 {
            let mut xi = x0.to_vec();
            for j in 0..s {
                for i in 0..n {
                    xi[i] += h * B[s - 1][j] * k[j][i];
                }
            }
            rhs.eval(&xi, &mut k[s], run_state);
        }

        let mut fifth = x0.to_vec();
        let mut fourth = x0.to_vec();
        for i in 0..n {
            for s in 0..6 {
                fifth[i] += h * FIFTH_ORDER[s] * k[s][i];
                fourth[i] += h * FOURTH_ORDER[s] * k[s][i];
            }
        }
        (fifth, fourth)
    }
}

/// Resolves a batch's `h`/`hmin` from either a parameter value or a
/// literal, per the model-run protocol: clamp `h` to `[0,1]`, clamp the
/// relative `hmin` to `[1e-10,1]`, then convert it to an absolute value
/// (`hmin *= h`) since `h` can change over the course of a run.
#[must_use]
pub fn resolve_step_bounds(h: f64, relative_hmin: f64) -> (f64, f64) {
    let h = h.clamp(0.0, 1.0);
    let hmin_relative = relative_hmin.clamp(1e-10, 1.0);
    (h, hmin_relative * h)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::{DateTime, TimeStepSize};

    fn run_state() -> RunState {
        RunState::new(1, 1, vec![], vec![], 0, DateTime::epoch(), TimeStepSize::default())
    }

    #[test]
    fn resolve_step_bounds_clamps_and_converts_to_absolute() {
        let (h, hmin) = resolve_step_bounds(2.0, 0.05);
        assert_eq!(h, 1.0);
        assert_eq!(hmin, 0.05);

        let (h, hmin) = resolve_step_bounds(0.5, 1e-20);
        assert_eq!(h, 0.5);
        assert!((hmin - 1e-10 * 0.5).abs() < 1e-18);
    }

    #[test]
    fn fixed_rk4_integrates_exponential_decay() {
        let mut solver = FixedStepRk4;
        let mut x = [1.0];
        let mut h = 0.1;
        let mut rs = run_state();
        for _ in 0..10 {
            solver.step(&mut h, 1e-6, 1, &mut x, &mut rs, &mut |xs: &[f64], dx: &mut [f64], _rs: &mut RunState| {
                dx[0] = -xs[0];
            });
        }
        // after one model time unit of decay at rate 1, x ~= e^-1
        assert!((x[0] - (-1.0_f64).exp()).abs() < 1e-4);
    }

    #[test]
    fn adaptive_rk_shrinks_step_on_stiff_input() {
        let mut solver = AdaptiveRk { tolerance: 1e-8 };
        let mut x = [1.0];
        let mut h = 1.0;
        let mut rs = run_state();
        let ok = solver.step(&mut h, 1e-10, 1, &mut x, &mut rs, &mut |xs: &[f64], dx: &mut [f64], _rs: &mut RunState| {
            dx[0] = -50.0 * xs[0];
        });
        assert!(ok);
        assert!(h < 1.0);
    }
}

//! Run state (C11): the buffers and step cursor a model run threads
//! through every batch invocation.
//!
//! Grounded in the reference compiler's `Model_Run_State`: one struct
//! bundling every pointer a compiled batch function closes over, plus
//! the step counter and expanded calendar the time loop advances.

use crate::datetime::{DateTime, ExpandedDateTime, TimeStepSize};

/// Per-batch solver configuration, resolved once before the time loop
/// starts (model-run protocol step 4): the ODE step-size bounds and
/// the offset/count of the state variables it integrates.
#[derive(Debug, Clone, Copy)]
pub struct SolverDescriptor {
    pub first_ode_offset: usize,
    pub n_ode: usize,
    /// Current step size, carried across steps as an adaptive warm
    /// start; clamped to `[0, 1]` model time-step units.
    pub h: f64,
    /// Absolute minimum step size (`hmin * h` at resolution time, per
    /// the model-run protocol), clamped to `[1e-10, 1]`.
    pub hmin: f64,
}

/// One closed code region executed either directly (no solver) or as
/// the right-hand side of an ODE solver, per batch.
pub struct Batch {
    pub name: String,
    pub ir: mobius_ir::MathExpr,
    pub solver: Option<SolverDescriptor>,
}

/// All mutable state a run owns across its lifetime: numeric buffers,
/// the step cursor, and every batch to be invoked each step.
pub struct RunState {
    pub parameters: Vec<f64>,
    pub series: Vec<f64>,
    pub series_stride: usize,
    pub state_vars: Vec<f64>,
    pub temp_vars: Vec<f64>,
    pub connection_info: Vec<i32>,
    pub index_counts: Vec<i32>,

    /// `time_steps x state_var_count`, time-major.
    pub results: Vec<f64>,
    /// One-step scratch buffer, `state_var_count` wide.
    pub temp_results: Vec<f64>,

    pub time_steps: usize,
    pub state_var_count: usize,
    pub date_time: ExpandedDateTime,
    /// `-1` during the initial batch, `0..time_steps` during the loop.
    pub step: i64,
}

impl RunState {
    #[must_use]
    pub fn new(
        state_var_count: usize,
        time_steps: usize,
        parameters: Vec<f64>,
        series: Vec<f64>,
        series_stride: usize,
        start: DateTime,
        time_step_size: TimeStepSize,
    ) -> Self {
        RunState {
            parameters,
            series,
            series_stride,
            state_vars: vec![0.0; state_var_count],
            temp_vars: vec![0.0; state_var_count],
            connection_info: Vec::new(),
            index_counts: Vec::new(),
            results: vec![0.0; time_steps * state_var_count],
            temp_results: vec![0.0; state_var_count],
            time_steps,
            state_var_count,
            date_time: ExpandedDateTime::new(start, time_step_size),
            step: -1,
        }
    }

    /// The series row for the current step (advanced by
    /// [`RunState::advance_series`]); `series` is laid out time-major
    /// with `series_stride` columns per row.
    #[must_use]
    pub fn current_series_row(&self) -> &[f64] {
        let row = self.step.max(0) as usize;
        let start = row * self.series_stride;
        &self.series[start..start + self.series_stride]
    }

    pub fn advance_series(&mut self) {
        // Series rows are addressed directly by `self.step`; nothing to
        // mutate here beyond the step counter itself, which the caller
        // advances. Kept as an explicit method (rather than folded into
        // the loop body) because the protocol calls it out as its own
        // ordering step.
    }

    /// Copies the previous step's state slice forward to seed the
    /// current step, matching the model-run protocol's per-step rule
    /// that a step's initial state is the prior step's final state.
    pub fn copy_previous_state_forward(&mut self) {
        if self.step > 0 {
            let prev_row = (self.step as usize - 1) * self.state_var_count;
            let prev = self.results[prev_row..prev_row + self.state_var_count].to_vec();
            self.state_vars.copy_from_slice(&prev);
        }
    }

    /// Writes `state_vars` into the current step's row of `results`.
    pub fn commit_step(&mut self) {
        if self.step >= 0 {
            let row = self.step as usize * self.state_var_count;
            self.results[row..row + self.state_var_count].copy_from_slice(&self.state_vars);
        }
    }

    /// Scans the just-committed row for non-finite values. Returns the
    /// index of the first one found, for the caller to format into a
    /// diagnostic naming the variable and index-tuple.
    #[must_use]
    pub fn first_non_finite_in_current_row(&self) -> Option<usize> {
        if self.step < 0 {
            return None;
        }
        let row = self.step as usize * self.state_var_count;
        self.results[row..row + self.state_var_count].iter().position(|v| !v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datetime::DateTime;

    #[test]
    fn commit_step_writes_current_row() {
        let mut rs = RunState::new(2, 3, vec![], vec![0.0; 6], 2, DateTime::epoch(), TimeStepSize::default());
        rs.step = 0;
        rs.state_vars = vec![1.0, 2.0];
        rs.commit_step();
        assert_eq!(&rs.results[0..2], &[1.0, 2.0]);
    }

    #[test]
    fn copy_previous_state_forward_seeds_next_step() {
        let mut rs = RunState::new(2, 3, vec![], vec![0.0; 6], 2, DateTime::epoch(), TimeStepSize::default());
        rs.step = 0;
        rs.state_vars = vec![5.0, 6.0];
        rs.commit_step();
        rs.step = 1;
        rs.copy_previous_state_forward();
        assert_eq!(rs.state_vars, vec![5.0, 6.0]);
    }

    #[test]
    fn detects_non_finite_result() {
        let mut rs = RunState::new(2, 1, vec![], vec![0.0; 2], 2, DateTime::epoch(), TimeStepSize::default());
        rs.step = 0;
        rs.state_vars = vec![1.0, f64::NAN];
        rs.commit_step();
        assert_eq!(rs.first_non_finite_in_current_row(), Some(1));
    }
}

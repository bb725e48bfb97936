//! Run state and batch executor (C11): the model-run protocol tying
//! [`run_state::RunState`], [`solver::OdeSolver`], and a
//! [`crate::jit::BatchBackend`] together into the per-step time loop.
//!
//! Grounded in the reference compiler's `run_model.cpp`: validate,
//! allocate, initialize, resolve step bounds, run the initial batch,
//! then iterate the time loop copying state forward, invoking each
//! batch (directly or through its solver), advancing the series
//! pointer, and checking for non-finite results and wall-clock timeout.

pub mod run_state;
pub mod solver;
pub mod timeout;

use crate::diagnostics::{DiagResult, Diagnostic, ErrorKind};
use crate::external_computation::ExternalRegistry;
use crate::jit::{BatchBackend, CompiledBatch};
use run_state::{Batch, RunState};
use solver::{BatchFn, OdeSolver};
use timeout::RunTimeout;

/// Why a run stopped before reaching `time_steps`.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed,
    /// Carries the step, the state variable index, and a
    /// human-readable name for it, per the diagnostic contract: "name
    /// the variable, include the step, list the index-tuple names".
    NonFiniteResult { step: i64, state_var: usize, name: String },
    TimedOut,
}

impl RunOutcome {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        matches!(self, RunOutcome::Completed)
    }
}

/// Names state variables for diagnostics; a bare index-based fallback
/// is used when none is available (tests, or a model run started
/// without the catalog's naming). Supplied by the caller so this
/// module doesn't depend on [`crate::catalog`] directly.
pub trait StateVarNames {
    fn name_of(&self, index: usize) -> String;
}

impl StateVarNames for () {
    fn name_of(&self, index: usize) -> String {
        format!("state_var[{index}]")
    }
}

/// Runs every batch once, outside the time loop, matching the
/// protocol's "run the initial batch once with `step = -1`" rule —
/// batches without a derivative contribute their initial values here.
fn run_initial_batch(
    batches: &[CompiledBatch],
    run_state: &mut RunState,
    backend: &dyn BatchBackend,
    externals: &ExternalRegistry,
) -> DiagResult<()> {
    for batch in batches {
        let mut buffers = crate::emulator::RuntimeBuffers {
            parameters: &run_state.parameters,
            series: run_state.current_series_row(),
            state_vars: &mut run_state.state_vars,
            temp_vars: &mut run_state.temp_vars,
            derivatives: None,
            connection_info: &run_state.connection_info,
            index_counts: &run_state.index_counts,
            fractional_step: 0.0,
        };
        backend.invoke(batch, &mut buffers, externals)?;
    }
    Ok(())
}

fn invoke_solverless(
    batch: &CompiledBatch,
    run_state: &mut RunState,
    backend: &dyn BatchBackend,
    externals: &ExternalRegistry,
) -> DiagResult<()> {
    let mut buffers = crate::emulator::RuntimeBuffers {
        parameters: &run_state.parameters,
        series: run_state.current_series_row(),
        state_vars: &mut run_state.state_vars,
        temp_vars: &mut run_state.temp_vars,
        derivatives: None,
        connection_info: &run_state.connection_info,
        index_counts: &run_state.index_counts,
        fractional_step: 0.0,
    };
    backend.invoke(batch, &mut buffers, externals)?;
    Ok(())
}

struct RhsAdapter<'a> {
    batch: &'a CompiledBatch,
    backend: &'a dyn BatchBackend,
    externals: &'a ExternalRegistry,
    first_ode_offset: usize,
}

impl<'a> BatchFn for RhsAdapter<'a> {
    fn eval(&mut self, x: &[f64], dx: &mut [f64], run_state: &mut RunState) {
        run_state.state_vars[self.first_ode_offset..self.first_ode_offset + x.len()].copy_from_slice(x);
        let mut buffers = crate::emulator::RuntimeBuffers {
            parameters: &run_state.parameters,
            series: &run_state.series,
            state_vars: &mut run_state.state_vars,
            temp_vars: &mut run_state.temp_vars,
            derivatives: Some(dx),
            connection_info: &run_state.connection_info,
            index_counts: &run_state.index_counts,
            fractional_step: 0.0,
        };
        let _ = self.backend.invoke(self.batch, &mut buffers, self.externals);
    }
}

/// Runs one batch for the current step: directly if it has no solver,
/// otherwise through `solver`, adapting `run_state.state_vars` as the
/// solver's `x0` slice per the batch's `SolverDescriptor`.
fn run_batch_for_step(
    batch: &Batch,
    compiled: &CompiledBatch,
    run_state: &mut RunState,
    backend: &dyn BatchBackend,
    externals: &ExternalRegistry,
    solver: &mut dyn OdeSolver,
) -> DiagResult<()> {
    let Some(desc) = batch.solver else {
        return invoke_solverless(compiled, run_state, backend, externals);
    };
    let mut h = desc.h;
    let mut x0 = run_state.state_vars[desc.first_ode_offset..desc.first_ode_offset + desc.n_ode].to_vec();
    {
        let mut rhs = RhsAdapter { batch: compiled, backend, externals, first_ode_offset: desc.first_ode_offset };
        solver.step(&mut h, desc.hmin, desc.n_ode, &mut x0, run_state, &mut rhs);
    }
    run_state.state_vars[desc.first_ode_offset..desc.first_ode_offset + desc.n_ode].copy_from_slice(&x0);
    Ok(())
}

/// Runs the full model-run protocol. `batches` supplies both the IR
/// and, for ODE batches, a resolved [`run_state::SolverDescriptor`];
/// pass `solver` as the integrator every such batch shares (the
/// original dispatches to a per-batch `solver_fun`, but a single
/// `OdeSolver` instance suffices for every batch this crate runs
/// end-to-end). Returns the [`RunOutcome`] describing how the run
/// ended rather than a bare `bool`, so the CLI and a harness like the
/// MCMC evaluator can tell NaN apart from timeout.
pub fn run_model(
    batches: &[Batch],
    run_state: &mut RunState,
    backend: &dyn BatchBackend,
    externals: &ExternalRegistry,
    solver: &mut dyn OdeSolver,
    names: &dyn StateVarNames,
    check_for_nan: bool,
    wall_clock_timeout: Option<&RunTimeout>,
) -> DiagResult<RunOutcome> {
    if run_state.time_steps == 0 {
        return Err(Diagnostic::new(ErrorKind::ApiUsage, mobius_ast::SourceLocation::Internal, "run declares zero time steps"));
    }

    let compiled: Vec<CompiledBatch> = batches.iter().map(|b| backend.compile(&b.ir, &b.name)).collect::<Result<_, _>>().map_err(|e| {
        Diagnostic::new(ErrorKind::Internal, mobius_ast::SourceLocation::Internal, e.to_string())
    })?;

    run_initial_batch(&compiled, run_state, backend, externals)?;

    for step in 0..run_state.time_steps {
        run_state.step = step as i64;
        run_state.copy_previous_state_forward();

        for (batch, compiled_batch) in batches.iter().zip(&compiled) {
            run_batch_for_step(batch, compiled_batch, run_state, backend, externals, solver)?;
        }

        run_state.commit_step();
        run_state.advance_series();
        run_state.date_time.advance();

        if check_for_nan {
            if let Some(idx) = run_state.first_non_finite_in_current_row() {
                return Ok(RunOutcome::NonFiniteResult { step: run_state.step, state_var: idx, name: names.name_of(idx) });
            }
        }

        if let Some(timeout) = wall_clock_timeout {
            if timeout.check().is_err() {
                return Ok(RunOutcome::TimedOut);
            }
        }
    }

    Ok(RunOutcome::Completed)
}

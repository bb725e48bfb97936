//! JIT backend contract (C10): the module lifecycle and intrinsic
//! mapping table a native code generator would implement, plus a stub
//! implementation that models the lifecycle without emitting code.
//!
//! Grounded in the reference compiler's `llvm_jit.cpp/h`: modules are
//! built up with `add_global_constants`/`add_batch`, then `compile`d
//! into an immutable, lookup-able unit, then `free`d. A production
//! native backend (`cranelift`/`inkwell`) is an out-of-scope
//! collaborator per the purpose-and-scope note; [`BatchBackend`] is the
//! deliverable, with [`crate::emulator`] and [`StubJitBackend`] as its
//! two shipped implementations.

use std::sync::atomic::{AtomicU64, Ordering};

use mobius_ir::MathExpr;
use thiserror::Error;

use crate::emulator::{self, RuntimeBuffers};
use crate::external_computation::ExternalRegistry;

#[derive(Debug, Error)]
pub enum JitError {
    #[error("batch '{0}' was looked up before the module was compiled")]
    NotCompiled(String),
    #[error("batch '{0}' was not found in this module")]
    UnknownBatch(String),
    #[error("module was used after being freed")]
    UseAfterFree,
}

/// Names, by arity, every intrinsic a native backend must bind to a
/// target instruction or externally linked math-library symbol.
/// Unknown function names fall back to an externally linked
/// double-argument, double-return symbol.
pub const INTRINSIC_TABLE: &[(&str, u32)] = &[
    ("sqrt", 1),
    ("cbrt", 1),
    ("exp", 1),
    ("log", 1),
    ("log10", 1),
    ("log2", 1),
    ("sin", 1),
    ("cos", 1),
    ("tan", 1),
    ("asin", 1),
    ("acos", 1),
    ("atan", 1),
    ("sinh", 1),
    ("cosh", 1),
    ("tanh", 1),
    ("floor", 1),
    ("ceil", 1),
    ("abs", 1),
    ("fabs", 1),
    ("round", 1),
    ("copysign", 2),
    ("min", 2),
    ("max", 2),
    ("pow", 2),
    ("pow2", 1),
    ("is_finite", 1),
];

#[must_use]
pub fn intrinsic_arity(name: &str) -> Option<u32> {
    INTRINSIC_TABLE.iter().find(|(n, _)| *n == name).map(|(_, arity)| *arity)
}

/// A compiled, ready-to-invoke batch. The emulator's compiled form is
/// just the IR root; a native backend's would instead be a function
/// pointer plus a retained module handle.
pub struct CompiledBatch {
    name: String,
    ir: MathExpr,
}

/// The module lifecycle every backend exposes, matching the original's
/// `create_module` / `add_batch` / `compile` / `lookup` / `free` shape.
/// `compile(&self, ir, name)` and `invoke` are the two operations a
/// caller actually drives; the rest is lifecycle bookkeeping internal
/// to each implementation.
pub trait BatchBackend {
    fn compile(&self, ir: &MathExpr, name: &str) -> Result<CompiledBatch, JitError>;
    fn invoke(&self, batch: &CompiledBatch, buffers: &mut RuntimeBuffers, externals: &ExternalRegistry) -> crate::DiagResult<f64>;
}

/// The reference backend: `compile` is a clone of the IR root, `invoke`
/// runs [`crate::emulator::eval`] directly.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmulatorBackend;

impl BatchBackend for EmulatorBackend {
    fn compile(&self, ir: &MathExpr, name: &str) -> Result<CompiledBatch, JitError> {
        Ok(CompiledBatch { name: name.to_string(), ir: ir.clone() })
    }

    fn invoke(&self, batch: &CompiledBatch, buffers: &mut RuntimeBuffers, externals: &ExternalRegistry) -> crate::DiagResult<f64> {
        emulator::eval(&batch.ir, buffers, externals)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModuleState {
    Built,
    Compiled,
    Freed,
}

/// Demonstrates the module lifecycle (`Uninitialized → Built →
/// Compiled → Freed`) and the intrinsic-name table a real native
/// backend would need, while internally delegating every `invoke` to
/// the emulator so it stays observably equivalent to
/// [`EmulatorBackend`]. Does not emit native code; see the module doc
/// for why that is out of scope.
pub struct StubJitBackend {
    state: std::sync::Mutex<ModuleState>,
}

static MODULE_COUNTER: AtomicU64 = AtomicU64::new(0);

impl StubJitBackend {
    /// Process-wide idempotent one-time setup, matching the original's
    /// `initialize()`. A real backend would initialize LLVM targets
    /// here; this stub only tracks that a module was ever created.
    pub fn create_module() -> Self {
        MODULE_COUNTER.fetch_add(1, Ordering::Relaxed);
        StubJitBackend { state: std::sync::Mutex::new(ModuleState::Built) }
    }

    /// Materializes the read-only `connection_info`/`index_count`
    /// global arrays a batch's identifiers of type `connection_info`
    /// and `index_count` resolve against. The stub backend has nothing
    /// to materialize ahead of time (the emulator reads these arrays
    /// straight out of `RuntimeBuffers` at invocation time), so this
    /// only validates the module hasn't been compiled or freed yet.
    pub fn add_global_constants(&self, _connection_data: &[i32], _index_count_data: &[i32]) -> Result<(), JitError> {
        match *self.state.lock().unwrap() {
            ModuleState::Built => Ok(()),
            ModuleState::Compiled | ModuleState::Freed => Err(JitError::UseAfterFree),
        }
    }

    pub fn free(&self) {
        *self.state.lock().unwrap() = ModuleState::Freed;
    }
}

impl Default for StubJitBackend {
    fn default() -> Self {
        StubJitBackend::create_module()
    }
}

impl BatchBackend for StubJitBackend {
    fn compile(&self, ir: &MathExpr, name: &str) -> Result<CompiledBatch, JitError> {
        let mut state = self.state.lock().unwrap();
        match *state {
            ModuleState::Freed => return Err(JitError::UseAfterFree),
            ModuleState::Built | ModuleState::Compiled => {}
        }
        *state = ModuleState::Compiled;
        Ok(CompiledBatch { name: name.to_string(), ir: ir.clone() })
    }

    fn invoke(&self, batch: &CompiledBatch, buffers: &mut RuntimeBuffers, externals: &ExternalRegistry) -> crate::DiagResult<f64> {
        if *self.state.lock().unwrap() == ModuleState::Freed {
            return Err(crate::Diagnostic::internal(format!("invoked batch '{}' after module free", batch.name)));
        }
        emulator::eval(&batch.ir, buffers, externals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobius_ast::SourceLocation;
    use mobius_ir::{Literal, ValueType};

    fn literal_ir(value: f64) -> MathExpr {
        MathExpr::literal(Literal::Real(value), SourceLocation::Internal)
    }

    fn empty_buffers<'a>(state: &'a mut [f64], temp: &'a mut [f64]) -> RuntimeBuffers<'a> {
        RuntimeBuffers {
            parameters: &[],
            series: &[],
            state_vars: state,
            temp_vars: temp,
            derivatives: None,
            connection_info: &[],
            index_counts: &[],
            fractional_step: 0.0,
        }
    }

    #[test]
    fn intrinsic_table_knows_pow_arity() {
        assert_eq!(intrinsic_arity("pow"), Some(2));
        assert_eq!(intrinsic_arity("sqrt"), Some(1));
        assert_eq!(intrinsic_arity("not_a_real_function"), None);
    }

    #[test]
    fn stub_backend_matches_emulator_backend() {
        let ir = literal_ir(3.5);
        let externals = ExternalRegistry::new();
        let mut state = [];
        let mut temp = [];

        let stub = StubJitBackend::create_module();
        let compiled = stub.compile(&ir, "batch").unwrap();
        let mut buf = empty_buffers(&mut state, &mut temp);
        let stub_result = stub.invoke(&compiled, &mut buf, &externals).unwrap();

        let reference = EmulatorBackend;
        let compiled_ref = reference.compile(&ir, "batch").unwrap();
        let mut state2 = [];
        let mut temp2 = [];
        let mut buf2 = empty_buffers(&mut state2, &mut temp2);
        let reference_result = reference.invoke(&compiled_ref, &mut buf2, &externals).unwrap();

        assert_eq!(stub_result, reference_result);
    }

    #[test]
    fn invoking_after_free_fails() {
        let ir = literal_ir(1.0);
        let externals = ExternalRegistry::new();
        let stub = StubJitBackend::create_module();
        let compiled = stub.compile(&ir, "batch").unwrap();
        stub.free();
        let mut state = [];
        let mut temp = [];
        let mut buf = empty_buffers(&mut state, &mut temp);
        assert!(stub.invoke(&compiled, &mut buf, &externals).is_err());
    }
}

//! Tree-walking interpreter (C9): the reference execution backend a
//! compiled batch can run against without going through the JIT.
//!
//! Grounded in the reference compiler's `emulate.h`/`emulate.cpp` virtual
//! machine, which walks a `Math_Expr_FT` tree directly rather than
//! compiling it; this module is the Rust analogue, evaluating
//! `mobius_ir::MathExpr` nodes against a set of runtime buffers. It is
//! also the backend [`crate::jit::StubJitBackend`] delegates to, so the
//! two stay observably equivalent by construction.
//!
//! ## Block identity convention
//!
//! [`mobius_ir::MathExprKind::Block`] carries no id of its own; a
//! for-loop block's identity is the `block_id` of its first
//! [`mobius_ir::LocalVarDecl`] (index 0), and any
//! [`mobius_ir::Identifier::IterationIndex`] inside its body refers back
//! to that same id. [`crate::ir_builder`] is responsible for populating
//! `local_vars[0]` on every for-loop block it emits, even when the loop
//! declares no other locals.

use std::collections::HashMap;

use mobius_ir::{BinaryOp, FunctionRef, Identifier, Intrinsic, Literal, MathExpr, MathExprKind, UnaryOp};

use crate::diagnostics::{DiagResult, Diagnostic, ErrorKind};
use crate::external_computation::ExternalRegistry;

/// The read/write numeric buffers a batch function closes over, matching
/// the shared batch-function contract: `(parameters, series, state_vars,
/// temp_vars, solver_workspace, connection_info, index_counts, date_time,
/// fractional_step)`.
pub struct RuntimeBuffers<'a> {
    pub parameters: &'a [f64],
    pub series: &'a [f64],
    pub state_vars: &'a mut [f64],
    pub temp_vars: &'a mut [f64],
    /// Set only while evaluating an ODE right-hand-side batch; a
    /// `derivative_assignment` node writes here instead of `state_vars`.
    pub derivatives: Option<&'a mut [f64]>,
    pub connection_info: &'a [i32],
    pub index_counts: &'a [i32],
    pub fractional_step: f64,
}

/// Lexical environment for local variables and iteration indices,
/// keyed by `block_id` (unique across a whole IR tree, so entries are
/// never popped; see the module-level block-identity convention).
#[derive(Default)]
struct Env {
    locals: HashMap<u32, Vec<f64>>,
    iter_index: HashMap<u32, i64>,
}

impl Env {
    fn local(&self, block_id: u32, index: u32) -> f64 {
        self.locals.get(&block_id).and_then(|v| v.get(index as usize)).copied().unwrap_or(0.0)
    }

    fn set_local(&mut self, block_id: u32, index: u32, value: f64) {
        let slot = self.locals.entry(block_id).or_default();
        if slot.len() <= index as usize {
            slot.resize(index as usize + 1, 0.0);
        }
        slot[index as usize] = value;
    }

    fn iter_index(&self, block_id: u32) -> i64 {
        self.iter_index.get(&block_id).copied().unwrap_or(0)
    }
}

/// Evaluates `expr` against `buffers`, returning its scalar result.
/// Fails only on a malformed tree (an intrinsic called with the wrong
/// arity, an external function not registered); every well-formed IR
/// tree produced by [`crate::ir_builder`] evaluates without error.
pub fn eval(expr: &MathExpr, buffers: &mut RuntimeBuffers, externals: &ExternalRegistry) -> DiagResult<f64> {
    let mut env = Env::default();
    eval_inner(expr, buffers, externals, &mut env)
}

fn eval_inner(expr: &MathExpr, buf: &mut RuntimeBuffers, externals: &ExternalRegistry, env: &mut Env) -> DiagResult<f64> {
    match &expr.kind {
        MathExprKind::NoOp => Ok(0.0),
        MathExprKind::Literal(lit) => Ok(lit.as_f64()),
        MathExprKind::Identifier(id) => eval_identifier(*id, buf, env),
        MathExprKind::UnaryOp { op, operand } => {
            let v = eval_inner(operand, buf, externals, env)?;
            Ok(match op {
                UnaryOp::Negate => -v,
                UnaryOp::Not => f64::from(v == 0.0),
            })
        }
        MathExprKind::BinaryOp { op, lhs, rhs } => {
            let a = eval_inner(lhs, buf, externals, env)?;
            let b = eval_inner(rhs, buf, externals, env)?;
            Ok(eval_binary(*op, a, b))
        }
        MathExprKind::FunctionCall { function, args } => {
            let values: Vec<f64> = args.iter().map(|a| eval_inner(a, buf, externals, env)).collect::<DiagResult<_>>()?;
            match function {
                FunctionRef::Intrinsic(i) => eval_intrinsic(*i, &values),
                FunctionRef::User(_) => Err(Diagnostic::internal("user-defined function calls are inlined before evaluation")),
            }
        }
        MathExprKind::IfChain { branches } => {
            for branch in branches {
                let taken = match &branch.condition {
                    None => true,
                    Some(cond) => eval_inner(cond, buf, externals, env)? != 0.0,
                };
                if taken {
                    return eval_inner(&branch.value, buf, externals, env);
                }
            }
            Ok(0.0)
        }
        MathExprKind::Cast { operand, .. } => eval_inner(operand, buf, externals, env),
        MathExprKind::Block { local_vars, exprs, is_for_loop, loop_count } => {
            if *is_for_loop {
                eval_for_loop(local_vars, exprs, loop_count.as_deref(), buf, externals, env)
            } else {
                for decl in local_vars {
                    let v = eval_inner(&decl.initializer, buf, externals, env)?;
                    env.set_local(decl.block_id, decl.index, v);
                }
                let mut last = 0.0;
                for stmt in exprs {
                    last = eval_inner(stmt, buf, externals, env)?;
                }
                Ok(last)
            }
        }
        MathExprKind::Iterate { local_var_block_id, body } => {
            env.iter_index.insert(*local_var_block_id, 0);
            eval_inner(body, buf, externals, env)
        }
        MathExprKind::StateVarAssignment { target, value } => {
            let v = eval_inner(value, buf, externals, env)?;
            buf.state_vars[*target as usize] = v;
            Ok(v)
        }
        MathExprKind::DerivativeAssignment { target, value } => {
            let v = eval_inner(value, buf, externals, env)?;
            match buf.derivatives.as_deref_mut() {
                Some(d) => d[*target as usize] = v,
                None => return Err(Diagnostic::internal("derivative_assignment evaluated outside an ODE right-hand-side batch")),
            }
            Ok(v)
        }
        MathExprKind::ExternalComputation { function_name, args } => {
            eval_external(function_name, args, buf, externals, env)
        }
    }
}

fn eval_identifier(id: Identifier, buf: &RuntimeBuffers, env: &Env) -> DiagResult<f64> {
    Ok(match id {
        Identifier::Parameter(i) => buf.parameters[i as usize],
        Identifier::Series(i) => buf.series[i as usize],
        Identifier::StateVar(i) => buf.state_vars[i as usize],
        Identifier::LocalVar { block_id, index } => env.local(block_id, index),
        Identifier::IterationIndex(block_id) => env.iter_index(block_id) as f64,
    })
}

fn eval_for_loop(
    local_vars: &[mobius_ir::LocalVarDecl],
    body: &[MathExpr],
    loop_count: Option<&MathExpr>,
    buf: &mut RuntimeBuffers,
    externals: &ExternalRegistry,
    env: &mut Env,
) -> DiagResult<f64> {
    let Some(count_expr) = loop_count else {
        return Err(Diagnostic::internal("for-loop block is missing its iteration count"));
    };
    let count = eval_inner(count_expr, buf, externals, env)? as i64;
    let block_id = local_vars.first().map(|d| d.block_id);

    // Loop-invariant locals (beyond the iteration-index carrier at
    // index 0) are evaluated once, outside the iteration loop.
    for decl in local_vars.iter().skip(1) {
        let v = eval_inner(&decl.initializer, buf, externals, env)?;
        env.set_local(decl.block_id, decl.index, v);
    }

    let mut last = 0.0;
    for i in 0..count {
        if let Some(id) = block_id {
            env.iter_index.insert(id, i);
        }
        for stmt in body {
            last = eval_inner(stmt, buf, externals, env)?;
        }
    }
    Ok(last)
}

fn eval_binary(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Lt => f64::from(a < b),
        BinaryOp::Le => f64::from(a <= b),
        BinaryOp::Gt => f64::from(a > b),
        BinaryOp::Ge => f64::from(a >= b),
        BinaryOp::Eq => f64::from(a == b),
        BinaryOp::Ne => f64::from(a != b),
        BinaryOp::And => f64::from(a != 0.0 && b != 0.0),
        BinaryOp::Or => f64::from(a != 0.0 || b != 0.0),
    }
}

/// `is_finite` is checked bit-exactly against the IEEE-754 exponent
/// field rather than via `f64::is_finite`, matching the JIT backend's
/// specified lowering so the two stay bit-identical on this predicate.
fn is_finite_bitwise(x: f64) -> bool {
    (x.to_bits() & 0x7ff0_0000_0000_0000) != 0x7ff0_0000_0000_0000
}

fn eval_intrinsic(i: Intrinsic, args: &[f64]) -> DiagResult<f64> {
    let arg = |idx: usize| {
        args.get(idx).copied().ok_or_else(|| Diagnostic::internal(format!("intrinsic {i:?} missing argument {idx}")))
    };
    Ok(match i {
        Intrinsic::Abs => arg(0)?.abs(),
        Intrinsic::Min => arg(0)?.min(arg(1)?),
        Intrinsic::Max => arg(0)?.max(arg(1)?),
        Intrinsic::Exp => arg(0)?.exp(),
        Intrinsic::Ln => arg(0)?.ln(),
        Intrinsic::Log10 => arg(0)?.log10(),
        Intrinsic::Log2 => arg(0)?.log2(),
        Intrinsic::Cbrt => arg(0)?.cbrt(),
        Intrinsic::Sqrt => arg(0)?.sqrt(),
        Intrinsic::Sin => arg(0)?.sin(),
        Intrinsic::Cos => arg(0)?.cos(),
        Intrinsic::Tan => arg(0)?.tan(),
        Intrinsic::Asin => arg(0)?.asin(),
        Intrinsic::Acos => arg(0)?.acos(),
        Intrinsic::Atan => arg(0)?.atan(),
        Intrinsic::Sinh => arg(0)?.sinh(),
        Intrinsic::Cosh => arg(0)?.cosh(),
        Intrinsic::Tanh => arg(0)?.tanh(),
        Intrinsic::Round => arg(0)?.round(),
        Intrinsic::Copysign => arg(0)?.copysign(arg(1)?),
        Intrinsic::IsFinite => f64::from(is_finite_bitwise(arg(0)?)),
        Intrinsic::Pow2 => 2f64.powf(arg(0)?),
        Intrinsic::PowI => arg(0)?.powi(arg(1)? as i32),
        Intrinsic::Floor => arg(0)?.floor(),
        Intrinsic::Ceil => arg(0)?.ceil(),
        Intrinsic::Step => f64::from(is_finite_bitwise(arg(0)?) && arg(0)? >= 0.0),
    })
}

fn eval_external(
    function_name: &str,
    args: &[MathExpr],
    buf: &mut RuntimeBuffers,
    externals: &ExternalRegistry,
    env: &mut Env,
) -> DiagResult<f64> {
    use crate::external_computation::ValueAccess;

    if args.len() % 3 != 0 {
        return Err(Diagnostic::internal(format!(
            "external_computation '{function_name}' has a malformed argument list (expected offset/stride/count triples)"
        )));
    }
    let mut triples = Vec::with_capacity(args.len() / 3);
    for chunk in args.chunks_exact(3) {
        let offset = eval_inner(&chunk[0], buf, externals, env)? as usize;
        let stride = eval_inner(&chunk[1], buf, externals, env)? as usize;
        let count = eval_inner(&chunk[2], buf, externals, env)? as usize;
        triples.push((offset, stride, count));
    }

    let func = externals
        .get(function_name)
        .ok_or_else(|| Diagnostic::internal(format!("external function '{function_name}' is not registered")))?;

    let mut views: Vec<ValueAccess<'_>> =
        triples.into_iter().map(|(offset, stride, count)| ValueAccess::new(&mut buf.temp_vars[offset..], stride, count)).collect();
    func(&mut views);
    Ok(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobius_ast::SourceLocation;
    use mobius_ir::{IfBranch, LocalVarDecl, ValueType};

    fn loc() -> SourceLocation {
        SourceLocation::Internal
    }

    fn empty_buffers<'a>(
        parameters: &'a [f64],
        series: &'a [f64],
        state_vars: &'a mut [f64],
        temp_vars: &'a mut [f64],
    ) -> RuntimeBuffers<'a> {
        RuntimeBuffers {
            parameters,
            series,
            state_vars,
            temp_vars,
            derivatives: None,
            connection_info: &[],
            index_counts: &[],
            fractional_step: 0.0,
        }
    }

    #[test]
    fn evaluates_binary_arithmetic() {
        let expr = MathExpr::new(
            MathExprKind::BinaryOp {
                op: BinaryOp::Add,
                lhs: Box::new(MathExpr::literal(Literal::Real(2.0), loc())),
                rhs: Box::new(MathExpr::literal(Literal::Real(3.0), loc())),
            },
            ValueType::Real,
            loc(),
        );
        let mut state = [];
        let mut temp = [];
        let mut buf = empty_buffers(&[], &[], &mut state, &mut temp);
        let externals = ExternalRegistry::new();
        assert_eq!(eval(&expr, &mut buf, &externals).unwrap(), 5.0);
    }

    #[test]
    fn reads_parameters_and_state_vars() {
        let parameters = [10.0];
        let mut state = [1.0, 2.0];
        let mut temp = [];
        let expr = MathExpr::new(
            MathExprKind::BinaryOp {
                op: BinaryOp::Mul,
                lhs: Box::new(MathExpr::new(MathExprKind::Identifier(Identifier::Parameter(0)), ValueType::Real, loc())),
                rhs: Box::new(MathExpr::new(MathExprKind::Identifier(Identifier::StateVar(1)), ValueType::Real, loc())),
            },
            ValueType::Real,
            loc(),
        );
        let mut buf = empty_buffers(&parameters, &[], &mut state, &mut temp);
        let externals = ExternalRegistry::new();
        assert_eq!(eval(&expr, &mut buf, &externals).unwrap(), 20.0);
    }

    #[test]
    fn state_var_assignment_writes_through() {
        let mut state = [0.0];
        let mut temp = [];
        let expr = MathExpr::new(
            MathExprKind::StateVarAssignment { target: 0, value: Box::new(MathExpr::literal(Literal::Real(7.0), loc())) },
            ValueType::Real,
            loc(),
        );
        let mut buf = empty_buffers(&[], &[], &mut state, &mut temp);
        let externals = ExternalRegistry::new();
        eval(&expr, &mut buf, &externals).unwrap();
        assert_eq!(buf.state_vars[0], 7.0);
    }

    #[test]
    fn for_loop_sums_iteration_indices() {
        let block_id = 1;
        let iter_ref = MathExpr::new(MathExprKind::Identifier(Identifier::IterationIndex(block_id)), ValueType::Integer, loc());
        let running_total = MathExpr::new(
            MathExprKind::BinaryOp {
                op: BinaryOp::Add,
                lhs: Box::new(MathExpr::new(MathExprKind::Identifier(Identifier::StateVar(0)), ValueType::Real, loc())),
                rhs: Box::new(iter_ref),
            },
            ValueType::Real,
            loc(),
        );
        let assign = MathExpr::new(MathExprKind::StateVarAssignment { target: 0, value: Box::new(running_total) }, ValueType::Real, loc());
        let sentinel_local = LocalVarDecl { block_id, index: 0, is_used: true, initializer: Box::new(MathExpr::literal(Literal::Integer(0), loc())) };
        let for_loop = MathExpr::new(
            MathExprKind::Block {
                local_vars: vec![sentinel_local],
                exprs: vec![assign],
                is_for_loop: true,
                loop_count: Some(Box::new(MathExpr::literal(Literal::Integer(4), loc()))),
            },
            ValueType::Real,
            loc(),
        );
        let mut state = [0.0];
        let mut temp = [];
        let mut buf = empty_buffers(&[], &[], &mut state, &mut temp);
        let externals = ExternalRegistry::new();
        eval(&for_loop, &mut buf, &externals).unwrap();
        assert_eq!(buf.state_vars[0], 0.0 + 1.0 + 2.0 + 3.0);
    }

    #[test]
    fn if_chain_takes_first_true_branch() {
        let branches = vec![
            IfBranch {
                condition: Some(Box::new(MathExpr::literal(Literal::Bool(false), loc()))),
                value: Box::new(MathExpr::literal(Literal::Real(1.0), loc())),
            },
            IfBranch { condition: None, value: Box::new(MathExpr::literal(Literal::Real(2.0), loc())) },
        ];
        let expr = MathExpr::new(MathExprKind::IfChain { branches }, ValueType::Real, loc());
        let mut state = [];
        let mut temp = [];
        let mut buf = empty_buffers(&[], &[], &mut state, &mut temp);
        let externals = ExternalRegistry::new();
        assert_eq!(eval(&expr, &mut buf, &externals).unwrap(), 2.0);
    }
}

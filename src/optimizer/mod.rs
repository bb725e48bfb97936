//! Tree pruning / constant folding (C8).
//!
//! Grounded in the reference compiler's `tree_pruning.cpp`: a single
//! bottom-up pass (`prune_helper`) rather than a fixpoint loop, folding
//! literals, applying algebraic identities, specializing `^`, and
//! collapsing single-iteration loops and single-statement blocks. The
//! original mutates its `Math_Expr_FT` tree in place through raw
//! pointers; here `prune` takes the tree by value and returns the
//! rewritten one, since owned-tree recursion is the natural Rust
//! equivalent (see the design note on substituting ownership for
//! mutation-in-place).
//!
//! The original threads a `Function_Scope` pointer through pruning so it
//! can look up whether a local is referenced from an enclosing scope;
//! that bookkeeping already lives in [`LocalVarDecl::is_used`](mobius_ir::LocalVarDecl)
//! on the IR itself here, so `prune` takes no separate scope argument.

use mobius_ir::{
    BinaryOp, FunctionRef, Identifier, IfBranch, Intrinsic, Literal, LocalVarDecl, MathExpr, MathExprKind, UnaryOp, ValueType,
};

/// Generates fresh block ids for synthetic locals the pow-unrolling
/// rewrite introduces (e.g. `let L = x; L*L`), disjoint from any id
/// assigned by the IR builder.
pub struct FreshBlockIds {
    next: u32,
}

impl FreshBlockIds {
    #[must_use]
    pub fn starting_after(highest_used: u32) -> Self {
        FreshBlockIds { next: highest_used + 1 }
    }

    fn take(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

/// Bottom-up constant folding and algebraic simplification of `expr`.
/// Never reorders or removes a side-effecting node (`state_var_assignment`,
/// `derivative_assignment`, `external_computation`, `iterate`), and never
/// re-visits a node it has already rewritten (single pass, not a
/// fixpoint: a fold that creates a further folding opportunity is left
/// for the next full optimizer invocation, per the reference compiler's
/// own single-pass `prune_helper`).
#[must_use]
pub fn prune(expr: MathExpr, ids: &mut FreshBlockIds) -> MathExpr {
    let MathExpr { kind, value_type, source_loc } = expr;
    match kind {
        MathExprKind::Block { local_vars, exprs, is_for_loop, loop_count } => {
            prune_block(local_vars, exprs, is_for_loop, loop_count, value_type, source_loc, ids)
        }
        MathExprKind::Identifier(_) | MathExprKind::Literal(_) | MathExprKind::NoOp => {
            MathExpr::new(kind, value_type, source_loc)
        }
        MathExprKind::UnaryOp { op, operand } => {
            let operand = prune(*operand, ids);
            prune_unary(op, operand, value_type, source_loc)
        }
        MathExprKind::BinaryOp { op, lhs, rhs } => {
            let lhs = prune(*lhs, ids);
            let rhs = prune(*rhs, ids);
            prune_binary(op, lhs, rhs, value_type, source_loc, ids)
        }
        MathExprKind::FunctionCall { function, args } => {
            let args: Vec<MathExpr> = args.into_iter().map(|a| prune(a, ids)).collect();
            prune_call(function, args, value_type, source_loc)
        }
        MathExprKind::IfChain { branches } => prune_if_chain(branches, value_type, source_loc, ids),
        MathExprKind::StateVarAssignment { target, value } => {
            let value = Box::new(prune(*value, ids));
            MathExpr::new(MathExprKind::StateVarAssignment { target, value }, value_type, source_loc)
        }
        MathExprKind::DerivativeAssignment { target, value } => {
            let value = Box::new(prune(*value, ids));
            MathExpr::new(MathExprKind::DerivativeAssignment { target, value }, value_type, source_loc)
        }
        MathExprKind::Cast { target_type, operand } => {
            let operand = prune(*operand, ids);
            prune_cast(target_type, operand, source_loc)
        }
        MathExprKind::ExternalComputation { function_name, args } => {
            let args: Vec<MathExpr> = args.into_iter().map(|a| prune(a, ids)).collect();
            MathExpr::new(MathExprKind::ExternalComputation { function_name, args }, value_type, source_loc)
        }
        MathExprKind::Iterate { local_var_block_id, body } => {
            let body = Box::new(prune(*body, ids));
            MathExpr::new(MathExprKind::Iterate { local_var_block_id, body }, value_type, source_loc)
        }
    }
}

// ============================================================================
// Blocks: local-to-literal folding, for-loop-of-one, single-statement collapse
// ============================================================================

fn prune_block(
    local_vars: Vec<LocalVarDecl>,
    exprs: Vec<MathExpr>,
    is_for_loop: bool,
    loop_count: Option<Box<MathExpr>>,
    value_type: ValueType,
    source_loc: mobius_ast::SourceLocation,
    ids: &mut FreshBlockIds,
) -> MathExpr {
    let mut local_vars: Vec<LocalVarDecl> = local_vars
        .into_iter()
        .map(|mut decl| {
            decl.initializer = Box::new(prune(*decl.initializer, ids));
            decl
        })
        .collect();
    let mut exprs: Vec<MathExpr> = exprs.into_iter().map(|e| prune(e, ids)).collect();
    let loop_count = loop_count.map(|lc| Box::new(prune(*lc, ids)));

    // Identifier -> literal: fold any local whose initializer is now a
    // literal into every later reference, then mark it dead.
    for i in 0..local_vars.len() {
        let Some(lit) = local_vars[i].initializer.as_literal() else { continue };
        let target = Identifier::LocalVar { block_id: local_vars[i].block_id, index: local_vars[i].index };
        for later in &mut local_vars[i + 1..] {
            *later.initializer = substitute(std::mem::replace(&mut *later.initializer, MathExpr::no_op(source_loc)), target, lit);
        }
        for stmt in &mut exprs {
            *stmt = substitute(std::mem::replace(stmt, MathExpr::no_op(source_loc)), target, lit);
        }
        local_vars[i].is_used = false;
    }

    // A for-loop with a literal count of one becomes an `iterate` node:
    // the single statement with its iteration index folded to 0.
    if is_for_loop {
        if let Some(count) = loop_count.as_ref().and_then(|c| c.as_literal()) {
            if matches!(count, Literal::Integer(1)) && exprs.len() == 1 {
                let block_id = local_vars.first().map(|d| d.block_id).unwrap_or_else(|| ids.take());
                let stmt = exprs.into_iter().next().unwrap();
                let stmt = substitute(stmt, Identifier::IterationIndex(block_id), Literal::Integer(0));
                return MathExpr::new(
                    MathExprKind::Iterate { local_var_block_id: block_id, body: Box::new(stmt) },
                    value_type,
                    source_loc,
                );
            }
        }
    }

    local_vars.retain(|d| d.is_used);

    // A non-loop block with no remaining locals and one statement
    // collapses to that statement directly.
    if !is_for_loop && local_vars.is_empty() && exprs.len() == 1 {
        return exprs.into_iter().next().unwrap();
    }

    MathExpr::new(
        MathExprKind::Block { local_vars, exprs, is_for_loop, loop_count },
        value_type,
        source_loc,
    )
}

/// Rewrites every occurrence of `target` inside `expr` into `literal`,
/// rebuilding every node on the path to it. Used both for local-variable
/// constant propagation and for folding a collapsed loop's iteration
/// index to zero.
fn substitute(expr: MathExpr, target: Identifier, literal: Literal) -> MathExpr {
    let MathExpr { kind, value_type, source_loc } = expr;
    let kind = match kind {
        MathExprKind::Identifier(id) if id == target => {
            return MathExpr::literal(literal, source_loc);
        }
        MathExprKind::Identifier(_) | MathExprKind::Literal(_) | MathExprKind::NoOp => kind,
        MathExprKind::Block { local_vars, exprs, is_for_loop, loop_count } => MathExprKind::Block {
            local_vars: local_vars
                .into_iter()
                .map(|mut d| {
                    d.initializer = Box::new(substitute(*d.initializer, target, literal));
                    d
                })
                .collect(),
            exprs: exprs.into_iter().map(|e| substitute(e, target, literal)).collect(),
            is_for_loop,
            loop_count: loop_count.map(|lc| Box::new(substitute(*lc, target, literal))),
        },
        MathExprKind::UnaryOp { op, operand } => {
            MathExprKind::UnaryOp { op, operand: Box::new(substitute(*operand, target, literal)) }
        }
        MathExprKind::BinaryOp { op, lhs, rhs } => MathExprKind::BinaryOp {
            op,
            lhs: Box::new(substitute(*lhs, target, literal)),
            rhs: Box::new(substitute(*rhs, target, literal)),
        },
        MathExprKind::FunctionCall { function, args } => {
            MathExprKind::FunctionCall { function, args: args.into_iter().map(|a| substitute(a, target, literal)).collect() }
        }
        MathExprKind::IfChain { branches } => MathExprKind::IfChain {
            branches: branches
                .into_iter()
                .map(|b| IfBranch {
                    condition: b.condition.map(|c| Box::new(substitute(*c, target, literal))),
                    value: Box::new(substitute(*b.value, target, literal)),
                })
                .collect(),
        },
        MathExprKind::StateVarAssignment { target: t, value } => {
            MathExprKind::StateVarAssignment { target: t, value: Box::new(substitute(*value, target, literal)) }
        }
        MathExprKind::DerivativeAssignment { target: t, value } => {
            MathExprKind::DerivativeAssignment { target: t, value: Box::new(substitute(*value, target, literal)) }
        }
        MathExprKind::Cast { target_type, operand } => {
            MathExprKind::Cast { target_type, operand: Box::new(substitute(*operand, target, literal)) }
        }
        MathExprKind::ExternalComputation { function_name, args } => MathExprKind::ExternalComputation {
            function_name,
            args: args.into_iter().map(|a| substitute(a, target, literal)).collect(),
        },
        MathExprKind::Iterate { local_var_block_id, body } => {
            MathExprKind::Iterate { local_var_block_id, body: Box::new(substitute(*body, target, literal)) }
        }
    };
    MathExpr::new(kind, value_type, source_loc)
}

// ============================================================================
// Unary / binary / cast / intrinsic folding
// ============================================================================

fn prune_unary(op: UnaryOp, operand: MathExpr, value_type: ValueType, loc: mobius_ast::SourceLocation) -> MathExpr {
    if let Some(lit) = operand.as_literal() {
        let folded = match (op, lit) {
            (UnaryOp::Negate, Literal::Integer(i)) => Some(Literal::Integer(-i)),
            (UnaryOp::Negate, Literal::Real(r)) => Some(Literal::Real(-r)),
            (UnaryOp::Not, Literal::Bool(b)) => Some(Literal::Bool(!b)),
            _ => None,
        };
        if let Some(lit) = folded {
            return MathExpr::literal(lit, loc);
        }
    }
    MathExpr::new(MathExprKind::UnaryOp { op, operand: Box::new(operand) }, value_type, loc)
}

fn apply_binary(op: BinaryOp, lhs: Literal, rhs: Literal) -> Option<Literal> {
    use BinaryOp::*;
    if let (Literal::Bool(a), Literal::Bool(b)) = (lhs, rhs) {
        return match op {
            And => Some(Literal::Bool(a && b)),
            Or => Some(Literal::Bool(a || b)),
            Eq => Some(Literal::Bool(a == b)),
            Ne => Some(Literal::Bool(a != b)),
            _ => None,
        };
    }
    if let (Literal::Integer(a), Literal::Integer(b)) = (lhs, rhs) {
        return match op {
            Add => Some(Literal::Integer(a.wrapping_add(b))),
            Sub => Some(Literal::Integer(a.wrapping_sub(b))),
            Mul => Some(Literal::Integer(a.wrapping_mul(b))),
            Div if b != 0 => Some(Literal::Integer(a / b)),
            Mod if b != 0 => Some(Literal::Integer(a % b)),
            Pow if b >= 0 => Some(Literal::Integer(a.pow(b as u32))),
            Lt => Some(Literal::Bool(a < b)),
            Le => Some(Literal::Bool(a <= b)),
            Gt => Some(Literal::Bool(a > b)),
            Ge => Some(Literal::Bool(a >= b)),
            Eq => Some(Literal::Bool(a == b)),
            Ne => Some(Literal::Bool(a != b)),
            _ => None,
        };
    }
    let (a, b) = (lhs.as_f64(), rhs.as_f64());
    match op {
        Add => Some(Literal::Real(a + b)),
        Sub => Some(Literal::Real(a - b)),
        Mul => Some(Literal::Real(a * b)),
        Div => Some(Literal::Real(a / b)),
        Mod => Some(Literal::Real(a % b)),
        Pow => Some(Literal::Real(a.powf(b))),
        Lt => Some(Literal::Bool(a < b)),
        Le => Some(Literal::Bool(a <= b)),
        Gt => Some(Literal::Bool(a > b)),
        Ge => Some(Literal::Bool(a >= b)),
        Eq => Some(Literal::Bool(a == b)),
        Ne => Some(Literal::Bool(a != b)),
        _ => None,
    }
}

/// Algebraic identities applied when only one operand is a literal:
/// `x+0`, `0+x`, `x*1`, `1*x`, `x*0`, `0*x`, `x/1`, `x-0`.
fn check_binop_reduction(op: BinaryOp, lhs: &MathExpr, rhs: &MathExpr) -> Option<MathExpr> {
    let lhs_lit = lhs.as_literal();
    let rhs_lit = rhs.as_literal();
    let is_zero = |l: Literal| l.as_f64() == 0.0;
    let is_one = |l: Literal| l.as_f64() == 1.0;

    match op {
        BinaryOp::Add => {
            if rhs_lit.is_some_and(is_zero) {
                return Some(lhs.clone());
            }
            if lhs_lit.is_some_and(is_zero) {
                return Some(rhs.clone());
            }
        }
        BinaryOp::Sub => {
            if rhs_lit.is_some_and(is_zero) {
                return Some(lhs.clone());
            }
        }
        BinaryOp::Mul => {
            if rhs_lit.is_some_and(is_one) {
                return Some(lhs.clone());
            }
            if lhs_lit.is_some_and(is_one) {
                return Some(rhs.clone());
            }
            if rhs_lit.is_some_and(is_zero) {
                return Some(rhs.clone());
            }
            if lhs_lit.is_some_and(is_zero) {
                return Some(lhs.clone());
            }
        }
        BinaryOp::Div => {
            if rhs_lit.is_some_and(is_one) {
                return Some(lhs.clone());
            }
        }
        _ => {}
    }
    None
}

fn prune_binary(
    op: BinaryOp,
    lhs: MathExpr,
    rhs: MathExpr,
    value_type: ValueType,
    loc: mobius_ast::SourceLocation,
    ids: &mut FreshBlockIds,
) -> MathExpr {
    if let (Some(a), Some(b)) = (lhs.as_literal(), rhs.as_literal()) {
        if let Some(folded) = apply_binary(op, a, b) {
            return MathExpr::literal(folded, loc);
        }
    }
    if let Some(reduced) = check_binop_reduction(op, &lhs, &rhs) {
        return reduced;
    }
    if op == BinaryOp::Pow {
        if let Some(specialized) = specialize_pow(&lhs, &rhs, value_type, loc, ids) {
            return specialized;
        }
    }
    if let Some(reassociated) = reassociate_literal_chain(op, &lhs, &rhs, loc) {
        return reassociated;
    }
    MathExpr::new(MathExprKind::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, value_type, loc)
}

/// `(literal op A) op' literal'` reassociates to `literal'' op' A` for
/// `+ - * /`, tracking sign/reciprocal parity through the divisive ops.
fn reassociate_literal_chain(outer_op: BinaryOp, lhs: &MathExpr, rhs: &MathExpr, loc: mobius_ast::SourceLocation) -> Option<MathExpr> {
    if !matches!(outer_op, BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div) {
        return None;
    }
    let outer_lit = rhs.as_literal()?;
    let MathExprKind::BinaryOp { op: inner_op, lhs: inner_lhs, rhs: inner_rhs } = &lhs.kind else { return None };
    if *inner_op != outer_op {
        return None;
    }
    let inner_lit = inner_lhs.as_literal()?;
    let combined = apply_binary(outer_op, inner_lit, outer_lit)?;
    Some(MathExpr::new(
        MathExprKind::BinaryOp { op: outer_op, lhs: Box::new(MathExpr::literal(combined, loc)), rhs: inner_rhs.clone() },
        lhs.value_type,
        loc,
    ))
}

fn call(function: FunctionRef, args: Vec<MathExpr>, value_type: ValueType, loc: mobius_ast::SourceLocation) -> MathExpr {
    MathExpr::new(MathExprKind::FunctionCall { function, args }, value_type, loc)
}

fn intrinsic_call(i: Intrinsic, args: Vec<MathExpr>, value_type: ValueType, loc: mobius_ast::SourceLocation) -> MathExpr {
    call(FunctionRef::Intrinsic(i), args, value_type, loc)
}

/// The `^` specialization cascade: `x^0.5` to `sqrt`, half-integer
/// exponents to `sqrt(x) * x^k`, small integer exponents to an unrolled
/// multiplication behind a synthetic local (to avoid recomputing `x`),
/// a literal base to `exp(ln(c)*x)`, and base `2.0` to the `pow2` intrinsic.
fn specialize_pow(
    lhs: &MathExpr,
    rhs: &MathExpr,
    value_type: ValueType,
    loc: mobius_ast::SourceLocation,
    ids: &mut FreshBlockIds,
) -> Option<MathExpr> {
    if let Some(exp) = rhs.as_literal() {
        let exp = exp.as_f64();
        if exp == 0.5 {
            return Some(intrinsic_call(Intrinsic::Sqrt, vec![lhs.clone()], value_type, loc));
        }
        if exp.fract() == 0.5 {
            let k = (exp - 0.5) as i64;
            if k.unsigned_abs() <= 6 {
                let sqrt = intrinsic_call(Intrinsic::Sqrt, vec![lhs.clone()], value_type, loc);
                let x_pow_k = unrolled_integer_pow(lhs, k, value_type, loc, ids)?;
                return Some(MathExpr::new(MathExprKind::BinaryOp { op: BinaryOp::Mul, lhs: Box::new(sqrt), rhs: Box::new(x_pow_k) }, value_type, loc));
            }
        }
        if let Some(n) = exact_small_integer(exp) {
            if let Some(unrolled) = unrolled_integer_pow(lhs, n, value_type, loc, ids) {
                return Some(unrolled);
            }
        }
    }
    if let Some(base) = lhs.as_literal() {
        let base = base.as_f64();
        if (base - 2.0).abs() < f64::EPSILON {
            return Some(intrinsic_call(Intrinsic::Pow2, vec![rhs.clone()], value_type, loc));
        }
        if base > f64::EPSILON {
            let ln_c = MathExpr::literal(Literal::Real(base.ln()), loc);
            let product = MathExpr::new(MathExprKind::BinaryOp { op: BinaryOp::Mul, lhs: Box::new(ln_c), rhs: Box::new(rhs.clone()) }, value_type, loc);
            return Some(intrinsic_call(Intrinsic::Exp, vec![product], value_type, loc));
        }
    }
    None
}

fn exact_small_integer(exp: f64) -> Option<i64> {
    if exp.fract() != 0.0 {
        return None;
    }
    let n = exp as i64;
    matches!(n, -2..=4).then_some(n)
}

/// Builds a one-statement synthetic block `{ let L = x; L^n-shaped-product }`
/// so `x` is evaluated exactly once regardless of how many times the
/// expansion repeats it.
fn unrolled_integer_pow(x: &MathExpr, n: i64, value_type: ValueType, loc: mobius_ast::SourceLocation, ids: &mut FreshBlockIds) -> Option<MathExpr> {
    if n == 1 {
        return Some(x.clone());
    }
    if n == 0 {
        return Some(MathExpr::literal(Literal::Real(1.0), loc));
    }
    let block_id = ids.take();
    let local = Identifier::LocalVar { block_id, index: 0 };
    let l = |loc| MathExpr::new(MathExprKind::Identifier(local), value_type, loc);
    let mul = |a: MathExpr, b: MathExpr| MathExpr::new(MathExprKind::BinaryOp { op: BinaryOp::Mul, lhs: Box::new(a), rhs: Box::new(b) }, value_type, loc);

    let body = match n {
        2 => mul(l(loc), l(loc)),
        3 => mul(mul(l(loc), l(loc)), l(loc)),
        4 => {
            let squared = mul(l(loc), l(loc));
            mul(squared.clone(), squared)
        }
        -1 => MathExpr::new(MathExprKind::BinaryOp { op: BinaryOp::Div, lhs: Box::new(MathExpr::literal(Literal::Real(1.0), loc)), rhs: Box::new(l(loc)) }, value_type, loc),
        -2 => {
            let squared = mul(l(loc), l(loc));
            MathExpr::new(MathExprKind::BinaryOp { op: BinaryOp::Div, lhs: Box::new(MathExpr::literal(Literal::Real(1.0), loc)), rhs: Box::new(squared) }, value_type, loc)
        }
        _ => return None,
    };

    let local_decl = LocalVarDecl { block_id, index: 0, is_used: true, initializer: Box::new(x.clone()) };
    Some(MathExpr::new(
        MathExprKind::Block { local_vars: vec![local_decl], exprs: vec![body], is_for_loop: false, loop_count: None },
        value_type,
        loc,
    ))
}

/// Matches the emulator's `is_finite_bitwise`: checked against the
/// IEEE-754 exponent field rather than `f64::is_finite`, so constant
/// folding agrees bit-exactly with runtime evaluation of the same call.
fn is_finite_bitwise(x: f64) -> bool {
    (x.to_bits() & 0x7ff0_0000_0000_0000) != 0x7ff0_0000_0000_0000
}

fn apply_intrinsic(i: Intrinsic, args: &[Literal]) -> Option<Literal> {
    let f = |idx: usize| args.get(idx).map(|l| l.as_f64());
    let r = match i {
        Intrinsic::Abs => f(0)?.abs(),
        Intrinsic::Min => f(0)?.min(f(1)?),
        Intrinsic::Max => f(0)?.max(f(1)?),
        Intrinsic::Exp => f(0)?.exp(),
        Intrinsic::Ln => f(0)?.ln(),
        Intrinsic::Log10 => f(0)?.log10(),
        Intrinsic::Log2 => f(0)?.log2(),
        Intrinsic::Cbrt => f(0)?.cbrt(),
        Intrinsic::Sqrt => f(0)?.sqrt(),
        Intrinsic::Sin => f(0)?.sin(),
        Intrinsic::Cos => f(0)?.cos(),
        Intrinsic::Tan => f(0)?.tan(),
        Intrinsic::Asin => f(0)?.asin(),
        Intrinsic::Acos => f(0)?.acos(),
        Intrinsic::Atan => f(0)?.atan(),
        Intrinsic::Sinh => f(0)?.sinh(),
        Intrinsic::Cosh => f(0)?.cosh(),
        Intrinsic::Tanh => f(0)?.tanh(),
        Intrinsic::Round => f(0)?.round(),
        Intrinsic::Copysign => f(0)?.copysign(f(1)?),
        Intrinsic::IsFinite => f64::from(is_finite_bitwise(f(0)?)),
        Intrinsic::Pow2 => 2f64.powf(f(0)?),
        Intrinsic::PowI => f(0)?.powi(f(1)? as i32),
        Intrinsic::Floor => f(0)?.floor(),
        Intrinsic::Ceil => f(0)?.ceil(),
        Intrinsic::Step => {
            if f(0)? >= 0.0 {
                1.0
            } else {
                0.0
            }
        }
    };
    Some(Literal::Real(r))
}

fn prune_call(function: FunctionRef, args: Vec<MathExpr>, value_type: ValueType, loc: mobius_ast::SourceLocation) -> MathExpr {
    if let FunctionRef::Intrinsic(i) = function {
        if let Some(literals) = args.iter().map(MathExpr::as_literal).collect::<Option<Vec<_>>>() {
            if let Some(folded) = apply_intrinsic(i, &literals) {
                return MathExpr::literal(folded, loc);
            }
        }
    }
    call(function, args, value_type, loc)
}

fn prune_cast(target_type: ValueType, operand: MathExpr, loc: mobius_ast::SourceLocation) -> MathExpr {
    if let Some(lit) = operand.as_literal() {
        let folded = match target_type {
            ValueType::Real => Some(Literal::Real(lit.as_f64())),
            ValueType::Integer => Some(Literal::Integer(lit.as_f64() as i64)),
            ValueType::Bool => Some(Literal::Bool(lit.as_f64() != 0.0)),
            ValueType::None => None,
        };
        if let Some(lit) = folded {
            return MathExpr::literal(lit, loc);
        }
    }
    MathExpr::new(MathExprKind::Cast { target_type, operand: Box::new(operand) }, target_type, loc)
}

// ============================================================================
// If-chains
// ============================================================================

fn prune_if_chain(branches: Vec<IfBranch>, value_type: ValueType, loc: mobius_ast::SourceLocation, ids: &mut FreshBlockIds) -> MathExpr {
    let mut out: Vec<IfBranch> = Vec::new();
    for branch in branches {
        let condition = branch.condition.map(|c| Box::new(prune(*c, ids)));
        let value = Box::new(prune(*branch.value, ids));
        match condition.as_ref().and_then(|c| c.as_literal()) {
            Some(Literal::Bool(false)) => continue,
            Some(Literal::Bool(true)) => {
                out.push(IfBranch { condition: None, value });
                break;
            }
            _ if condition.is_none() => {
                out.push(IfBranch { condition: None, value });
                break;
            }
            _ => out.push(IfBranch { condition, value }),
        }
    }
    if out.len() == 1 && out[0].condition.is_none() {
        return *out.into_iter().next().unwrap().value;
    }
    MathExpr::new(MathExprKind::IfChain { branches: out }, value_type, loc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobius_ast::SourceLocation;

    fn loc() -> SourceLocation {
        SourceLocation::Internal
    }

    fn lit_real(x: f64) -> MathExpr {
        MathExpr::literal(Literal::Real(x), loc())
    }

    fn ids() -> FreshBlockIds {
        FreshBlockIds::starting_after(1000)
    }

    #[test]
    fn folds_two_literal_operands() {
        let expr = MathExpr::new(
            MathExprKind::BinaryOp { op: BinaryOp::Add, lhs: Box::new(lit_real(2.0)), rhs: Box::new(lit_real(3.0)) },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(expr, &mut ids());
        assert_eq!(pruned.as_literal(), Some(Literal::Real(5.0)));
    }

    #[test]
    fn x_plus_zero_collapses_to_x() {
        let x = MathExpr::new(MathExprKind::Identifier(Identifier::Parameter(0)), ValueType::Real, loc());
        let expr = MathExpr::new(
            MathExprKind::BinaryOp { op: BinaryOp::Add, lhs: Box::new(x.clone()), rhs: Box::new(lit_real(0.0)) },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(expr, &mut ids());
        assert_eq!(pruned, x);
    }

    #[test]
    fn x_times_zero_collapses_to_zero() {
        let x = MathExpr::new(MathExprKind::Identifier(Identifier::Parameter(0)), ValueType::Real, loc());
        let expr = MathExpr::new(
            MathExprKind::BinaryOp { op: BinaryOp::Mul, lhs: Box::new(x), rhs: Box::new(lit_real(0.0)) },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(expr, &mut ids());
        assert_eq!(pruned.as_literal(), Some(Literal::Real(0.0)));
    }

    #[test]
    fn pow_half_becomes_sqrt() {
        let x = MathExpr::new(MathExprKind::Identifier(Identifier::Parameter(0)), ValueType::Real, loc());
        let expr = MathExpr::new(
            MathExprKind::BinaryOp { op: BinaryOp::Pow, lhs: Box::new(x), rhs: Box::new(lit_real(0.5)) },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(expr, &mut ids());
        assert!(matches!(pruned.kind, MathExprKind::FunctionCall { function: FunctionRef::Intrinsic(Intrinsic::Sqrt), .. }));
    }

    #[test]
    fn pow_two_unrolls_behind_a_synthetic_local() {
        let x = MathExpr::new(MathExprKind::Identifier(Identifier::Parameter(0)), ValueType::Real, loc());
        let expr = MathExpr::new(
            MathExprKind::BinaryOp { op: BinaryOp::Pow, lhs: Box::new(x), rhs: Box::new(lit_real(2.0)) },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(expr, &mut ids());
        match pruned.kind {
            MathExprKind::Block { local_vars, exprs, .. } => {
                assert_eq!(local_vars.len(), 1);
                assert_eq!(exprs.len(), 1);
            }
            other => panic!("expected a synthetic block, got {other:?}"),
        }
    }

    #[test]
    fn literal_base_pow_becomes_exp_ln() {
        let x = MathExpr::new(MathExprKind::Identifier(Identifier::Parameter(0)), ValueType::Real, loc());
        let expr = MathExpr::new(
            MathExprKind::BinaryOp { op: BinaryOp::Pow, lhs: Box::new(lit_real(3.0)), rhs: Box::new(x) },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(expr, &mut ids());
        assert!(matches!(pruned.kind, MathExprKind::FunctionCall { function: FunctionRef::Intrinsic(Intrinsic::Exp), .. }));
    }

    #[test]
    fn base_two_pow_becomes_pow2_intrinsic() {
        let x = MathExpr::new(MathExprKind::Identifier(Identifier::Parameter(0)), ValueType::Real, loc());
        let expr = MathExpr::new(
            MathExprKind::BinaryOp { op: BinaryOp::Pow, lhs: Box::new(lit_real(2.0)), rhs: Box::new(x) },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(expr, &mut ids());
        assert!(matches!(pruned.kind, MathExprKind::FunctionCall { function: FunctionRef::Intrinsic(Intrinsic::Pow2), .. }));
    }

    #[test]
    fn if_chain_drops_false_branch_and_collapses_true_branch() {
        let branches = vec![
            IfBranch { condition: Some(Box::new(MathExpr::literal(Literal::Bool(false), loc()))), value: Box::new(lit_real(1.0)) },
            IfBranch { condition: Some(Box::new(MathExpr::literal(Literal::Bool(true), loc()))), value: Box::new(lit_real(2.0)) },
            IfBranch { condition: None, value: Box::new(lit_real(3.0)) },
        ];
        let expr = MathExpr::new(MathExprKind::IfChain { branches }, ValueType::Real, loc());
        let pruned = prune(expr, &mut ids());
        assert_eq!(pruned.as_literal(), Some(Literal::Real(2.0)));
    }

    #[test]
    fn for_loop_of_one_collapses_to_iterate() {
        let body_identifier = MathExpr::new(MathExprKind::Identifier(Identifier::IterationIndex(7)), ValueType::Integer, loc());
        let block = MathExpr::new(
            MathExprKind::Block { local_vars: vec![], exprs: vec![body_identifier], is_for_loop: true, loop_count: Some(Box::new(MathExpr::literal(Literal::Integer(1), loc()))) },
            ValueType::Integer,
            loc(),
        );
        let pruned = prune(block, &mut ids());
        match pruned.kind {
            MathExprKind::Iterate { local_var_block_id, body } => {
                assert_eq!(local_var_block_id, 7);
                assert_eq!(body.as_literal(), Some(Literal::Integer(0)));
            }
            other => panic!("expected Iterate, got {other:?}"),
        }
    }

    #[test]
    fn single_statement_block_collapses() {
        let block = MathExpr::new(
            MathExprKind::Block { local_vars: vec![], exprs: vec![lit_real(4.0)], is_for_loop: false, loop_count: None },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(block, &mut ids());
        assert_eq!(pruned.as_literal(), Some(Literal::Real(4.0)));
    }

    #[test]
    fn unused_local_is_removed_after_folding() {
        let local_decl = LocalVarDecl { block_id: 1, index: 0, is_used: true, initializer: Box::new(lit_real(9.0)) };
        let use_of_local = MathExpr::new(MathExprKind::Identifier(Identifier::LocalVar { block_id: 1, index: 0 }), ValueType::Real, loc());
        let block = MathExpr::new(
            MathExprKind::Block { local_vars: vec![local_decl], exprs: vec![use_of_local, lit_real(1.0)], is_for_loop: false, loop_count: None },
            ValueType::Real,
            loc(),
        );
        let pruned = prune(block, &mut ids());
        match pruned.kind {
            MathExprKind::Block { local_vars, exprs, .. } => {
                assert!(local_vars.is_empty());
                assert_eq!(exprs[0].as_literal(), Some(Literal::Real(9.0)));
            }
            other => panic!("expected a block with the local folded away, got {other:?}"),
        }
    }
}

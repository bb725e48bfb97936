//! Math IR builder (C7 Build phase): lowers a [`crate::parser::ExprAst`]
//! tree into a [`mobius_ir::MathExpr`] tree, resolving identifiers
//! against the [`crate::catalog::Catalog`]/[`crate::catalog::Scope`] the
//! declarations were registered into and index arguments against
//! [`crate::index_data::IndexData`].
//!
//! Grounded in the reference compiler's expression-building pass
//! (`function_tree.cpp`'s `Function_Scope` stack): one lexical frame per
//! block, each assigning monotonic local ids as `let` bindings and
//! for-loop counters are declared; a name resolves against the nearest
//! enclosing frame before falling back to the declaration scope.
//!
//! `block_id` is allocated from a single counter shared by the whole
//! tree being built (not reset per frame), matching
//! [`crate::emulator`]'s block-identity convention: a for-loop's id is
//! its first local's `block_id`, and nothing else needs to distinguish
//! one block from another.
//!
//! Resolving a named flux/parameter/series reference to a flat buffer
//! offset needs to know how that entity is laid out across its index
//! sets — a detail owned by whichever pass assigns the run's buffer
//! layout, not by this module. [`Layout`] is the seam: the caller
//! (typically the same pass that built the catalog and ran [`IndexData`]
//! initialization) supplies one implementation per run.

use std::collections::HashMap;

use mobius_ast::SourceLocation;
use mobius_ir::{FunctionRef, Intrinsic, Literal, LocalVarDecl, MathExpr, MathExprKind, UnaryOp as IrUnaryOp, ValueType};

use crate::catalog::{Catalog, EntityId, RegType};
use crate::diagnostics::{DiagResult, Diagnostic, ErrorKind};
use crate::index_data::IndexData;
use crate::parser::ExprAst;

/// Resolves a declared entity, together with the literal index
/// arguments it was referenced with (in source order, not yet matched
/// up against the entity's distribution), to its offset in the run's
/// flat numeric buffer.
///
/// Matching each literal to the index set it addresses requires
/// knowing the entity's distribution (the ordered list of index sets
/// it's declared over) — a detail recorded by whichever pass assigns
/// the run's buffer layout, not by the catalog types this module reads.
/// Implemented by that pass; this module only needs to read the
/// result, never derive it.
pub trait Layout {
    fn parameter_offset(&self, entity: EntityId, index_args: &[mobius_ast::TokenKind]) -> DiagResult<u32>;
    fn series_offset(&self, entity: EntityId, index_args: &[mobius_ast::TokenKind]) -> DiagResult<u32>;
    fn state_var_offset(&self, entity: EntityId, index_args: &[mobius_ast::TokenKind]) -> DiagResult<u32>;
}

/// What kind of node a flux/quantity/constant's top-level expression
/// should lower into, selected by the declaration context the
/// expression came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// A plain value (a `constant`, a `function` body, a nested
    /// sub-expression): the lowered tree is returned as-is.
    Value,
    /// A discrete-update flux or a `property`'s non-ODE value: wraps
    /// the lowered expression in a [`MathExprKind::StateVarAssignment`].
    StateVar(EntityId),
    /// An ODE-governed `quantity`'s flux contribution: wraps the
    /// lowered expression in a [`MathExprKind::DerivativeAssignment`].
    Derivative(EntityId),
}

#[derive(Debug, Clone, Copy)]
struct LocalSlot {
    block_id: u32,
    index: u32,
    value_type: ValueType,
}

/// One lexical frame: the locals declared so far in the innermost
/// enclosing block (a `{ let ...; expr }` block or a `for` loop body),
/// plus that block's own `block_id`.
struct Frame {
    block_id: u32,
    locals: HashMap<String, LocalSlot>,
}

/// Builds `MathExpr` trees against one catalog/index-data/layout triple.
/// One `Builder` is reused across every flux/constant/function body in a
/// model so `block_id`s stay unique across the whole IR forest, matching
/// the emulator's global block-identity convention.
pub struct Builder<'a> {
    catalog: &'a Catalog,
    index_data: &'a IndexData,
    layout: &'a dyn Layout,
    next_block_id: u32,
    frames: Vec<Frame>,
}

impl<'a> Builder<'a> {
    #[must_use]
    pub fn new(catalog: &'a Catalog, index_data: &'a IndexData, layout: &'a dyn Layout) -> Self {
        Builder { catalog, index_data, layout, next_block_id: 0, frames: Vec::new() }
    }

    fn fresh_block_id(&mut self) -> u32 {
        let id = self.next_block_id;
        self.next_block_id += 1;
        id
    }

    /// Lowers one declaration's expression body, wrapping it per
    /// `target`. Each call starts with an empty lexical frame stack, so
    /// two different declarations' local names never collide even
    /// though their `block_id`s are drawn from the same counter.
    pub fn build(&mut self, expr: &ExprAst, target: Target) -> DiagResult<MathExpr> {
        self.frames.clear();
        let value = self.lower(expr)?;
        Ok(match target {
            Target::Value => value,
            Target::StateVar(entity) => {
                let idx = self.layout.state_var_offset(entity, &[])?;
                let loc = value.source_loc;
                MathExpr::new(MathExprKind::StateVarAssignment { target: idx, value: Box::new(value) }, ValueType::None, loc)
            }
            Target::Derivative(entity) => {
                let idx = self.layout.state_var_offset(entity, &[])?;
                let loc = value.source_loc;
                MathExpr::new(MathExprKind::DerivativeAssignment { target: idx, value: Box::new(value) }, ValueType::None, loc)
            }
        })
    }

    fn lower(&mut self, expr: &ExprAst) -> DiagResult<MathExpr> {
        match expr {
            ExprAst::Literal(kind) => self.lower_literal(kind, expr.loc()),
            ExprAst::Identifier { chain, index_args, loc } => self.lower_identifier(chain, index_args, *loc),
            ExprAst::Unary { op, operand, loc } => self.lower_unary(*op, operand, *loc),
            ExprAst::Binary { op, lhs, rhs, loc } => self.lower_binary(*op, lhs, rhs, *loc),
            ExprAst::Call { name, args, loc } => self.lower_call(name, args, *loc),
            ExprAst::External { function_name, args, loc } => self.lower_external(function_name, args, *loc),
            ExprAst::If { branches, loc } => self.lower_if(branches, *loc),
            ExprAst::For { index_set, body, loc } => self.lower_for(index_set, body, *loc),
            ExprAst::Block { lets, value, loc } => self.lower_block(lets, value, *loc),
        }
    }

    fn lower_literal(&self, kind: &mobius_ast::TokenKind, loc: SourceLocation) -> DiagResult<MathExpr> {
        use mobius_ast::TokenKind;
        let lit = match kind {
            TokenKind::IntLiteral(n) => Literal::Integer(*n),
            TokenKind::RealLiteral(x) => Literal::Real(*x),
            TokenKind::BoolLiteral(b) => Literal::Bool(*b),
            TokenKind::Identifier(_) | TokenKind::QuotedString(_) => {
                return Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, "expected a numeric or boolean literal here"));
            }
        };
        Ok(MathExpr::literal(lit, loc))
    }

    /// Resolves a dotted identifier chain: a single-segment chain first
    /// checks the lexical frame stack (innermost first) for a local
    /// binding, then falls back to the declaration scope; a multi-segment
    /// chain is looked up as a serialized `a\b\c` path via
    /// [`Catalog::deserialize`], trying each candidate register type in
    /// turn since the chain alone doesn't say which kind of entity it
    /// names.
    fn lower_identifier(&mut self, chain: &[String], index_args: &[ExprAst], loc: SourceLocation) -> DiagResult<MathExpr> {
        if chain.len() == 1 {
            if let Some(local) = self.lookup_local(&chain[0]) {
                if !index_args.is_empty() {
                    return Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("'{}' is a local variable and cannot take index arguments", chain[0])));
                }
                return Ok(MathExpr::new(MathExprKind::Identifier(mobius_ir::Identifier::LocalVar { block_id: local.block_id, index: local.index }), local.value_type, loc));
            }
        }

        let entity = self.resolve_chain(chain, loc)?;
        let tokens = self.literal_index_args(index_args, loc)?;

        match entity.reg_type {
            RegType::Parameter | RegType::Constant => {
                let offset = self.layout.parameter_offset(entity, &tokens)?;
                Ok(MathExpr::new(MathExprKind::Identifier(mobius_ir::Identifier::Parameter(offset)), ValueType::Real, loc))
            }
            RegType::Series => {
                let offset = self.layout.series_offset(entity, &tokens)?;
                Ok(MathExpr::new(MathExprKind::Identifier(mobius_ir::Identifier::Series(offset)), ValueType::Real, loc))
            }
            RegType::StateVar => {
                let offset = self.layout.state_var_offset(entity, &tokens)?;
                Ok(MathExpr::new(MathExprKind::Identifier(mobius_ir::Identifier::StateVar(offset)), ValueType::Real, loc))
            }
            other => Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("'{}' names a {other:?}, which cannot appear in an expression", chain.join(".")))),
        }
    }

    fn lookup_local(&self, name: &str) -> Option<LocalSlot> {
        self.frames.iter().rev().find_map(|frame| frame.locals.get(name).copied())
    }

    fn resolve_chain(&self, chain: &[String], loc: SourceLocation) -> DiagResult<EntityId> {
        if chain.len() == 1 {
            if let Some(id) = lookup_visible(self.catalog, self.catalog.root_scope, &chain[0]) {
                return Ok(id);
            }
            return Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("undeclared identifier '{}'", chain[0])));
        }

        let path = chain.join("\\");
        for candidate in [RegType::StateVar, RegType::Parameter, RegType::Series, RegType::Constant] {
            let id = self.catalog.deserialize(&path, candidate);
            if id.is_valid() {
                return Ok(id);
            }
        }
        Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("undeclared identifier '{path}'")))
    }

    /// Index arguments in this language are always literals (a quoted
    /// index name or an integer ordinal); which index set each one
    /// addresses depends on the referenced entity's own distribution,
    /// which [`Layout`] resolves, so this step only validates shape and
    /// passes the raw tokens through.
    fn literal_index_args(&self, index_args: &[ExprAst], loc: SourceLocation) -> DiagResult<Vec<mobius_ast::TokenKind>> {
        index_args
            .iter()
            .map(|arg| match arg {
                ExprAst::Literal(kind) => Ok(kind.clone()),
                _ => Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, "index arguments must be literals (a quoted name or an integer)")),
            })
            .collect()
    }

    fn lower_unary(&mut self, op: IrUnaryOp, operand: &ExprAst, loc: SourceLocation) -> DiagResult<MathExpr> {
        let operand = self.lower(operand)?;
        let value_type = operand.value_type;
        Ok(MathExpr::new(MathExprKind::UnaryOp { op, operand: Box::new(operand) }, value_type, loc))
    }

    fn lower_binary(&mut self, op: mobius_ir::BinaryOp, lhs: &ExprAst, rhs: &ExprAst, loc: SourceLocation) -> DiagResult<MathExpr> {
        use mobius_ir::BinaryOp;
        let lhs = self.lower(lhs)?;
        let rhs = self.lower(rhs)?;
        let value_type = match op {
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq | BinaryOp::Ne | BinaryOp::And | BinaryOp::Or => ValueType::Bool,
            _ if lhs.value_type == ValueType::Integer && rhs.value_type == ValueType::Integer => ValueType::Integer,
            _ => ValueType::Real,
        };
        Ok(MathExpr::new(MathExprKind::BinaryOp { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }, value_type, loc))
    }

    /// A call resolves against the fixed intrinsic table first, by
    /// name; anything else is an error, since user-defined `function`
    /// bodies are inlined at the call site rather than represented as a
    /// standing `FunctionRef::User` (the reference compiler's own
    /// `function_tree.cpp` inlines for the same reason: a function body
    /// may itself reference the caller's index arguments).
    fn lower_call(&mut self, name: &str, args: &[ExprAst], loc: SourceLocation) -> DiagResult<MathExpr> {
        if let Some(intrinsic) = intrinsic_by_name(name) {
            let lowered: Vec<MathExpr> = args.iter().map(|a| self.lower(a)).collect::<DiagResult<_>>()?;
            return Ok(MathExpr::new(MathExprKind::FunctionCall { function: FunctionRef::Intrinsic(intrinsic), args: lowered }, ValueType::Real, loc));
        }
        self.lower_user_function_call(name, args, loc)
    }

    fn lower_user_function_call(&mut self, name: &str, args: &[ExprAst], loc: SourceLocation) -> DiagResult<MathExpr> {
        let Some(_entity) = lookup_visible(self.catalog, self.catalog.root_scope, name) else {
            return Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("'{name}' is not a known function")));
        };
        // Inlining a user function's body requires the function's own
        // parsed expression and parameter names, which the caller
        // resolves and splices in before this node is reached (the
        // pipeline stage that owns `ParsedFile.expressions`); here we
        // only lower the call's arguments so the splice has something
        // fully-formed to substitute into.
        let _lowered_args: Vec<MathExpr> = args.iter().map(|a| self.lower(a)).collect::<DiagResult<_>>()?;
        Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("calling user-defined function '{name}' requires inlining its body before IR building; this builder only lowers intrinsic calls directly")))
    }

    fn lower_external(&mut self, function_name: &str, args: &[ExprAst], loc: SourceLocation) -> DiagResult<MathExpr> {
        let lowered: Vec<MathExpr> = args.iter().map(|a| self.lower(a)).collect::<DiagResult<_>>()?;
        Ok(MathExpr::new(MathExprKind::ExternalComputation { function_name: function_name.to_string(), args: lowered }, ValueType::None, loc))
    }

    fn lower_if(&mut self, branches: &[(Option<ExprAst>, ExprAst)], loc: SourceLocation) -> DiagResult<MathExpr> {
        let mut lowered = Vec::with_capacity(branches.len());
        let mut value_type = ValueType::None;
        for (cond, value) in branches {
            let cond = cond.as_ref().map(|c| self.lower(c)).transpose()?.map(Box::new);
            let value = self.lower(value)?;
            value_type = value.value_type;
            lowered.push(mobius_ir::IfBranch { condition: cond, value: Box::new(value) });
        }
        Ok(MathExpr::new(MathExprKind::IfChain { branches: lowered }, value_type, loc))
    }

    /// Lowers a `for <index_set> { ... }` loop into a
    /// [`MathExprKind::Block`] with `is_for_loop: true`. The loop's
    /// iteration count is the target index set's instance count,
    /// resolved once since for-loop bodies in this language always
    /// iterate over a whole index set rather than a computed range.
    /// Per the emulator's block-identity convention, local 0 of this
    /// block is a sentinel carrying the iteration count so
    /// `Identifier::IterationIndex` always has a `block_id` to key on,
    /// even when the body declares no other locals.
    fn lower_for(&mut self, index_set: &str, body: &ExprAst, loc: SourceLocation) -> DiagResult<MathExpr> {
        let set_id = lookup_visible(self.catalog, self.catalog.root_scope, index_set)
            .filter(|id| id.reg_type == RegType::IndexSet)
            .ok_or_else(|| Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("'{index_set}' is not a known index set")))?;
        let count = self.index_data.get_max_count(self.catalog, set_id);

        let block_id = self.fresh_block_id();
        self.frames.push(Frame { block_id, locals: HashMap::new() });
        let lowered_body = self.lower(body);
        self.frames.pop();
        let lowered_body = lowered_body?;

        let sentinel = LocalVarDecl { block_id, index: 0, is_used: true, initializer: Box::new(MathExpr::literal(Literal::Integer(0), loc)) };
        let value_type = lowered_body.value_type;
        Ok(MathExpr::new(
            MathExprKind::Block {
                local_vars: vec![sentinel],
                exprs: vec![lowered_body],
                is_for_loop: true,
                loop_count: Some(Box::new(MathExpr::literal(Literal::Integer(i64::from(count)), loc))),
            },
            value_type,
            loc,
        ))
    }

    /// Lowers a `{ let a = ...; let b = ...; value }` block: a fresh
    /// lexical frame, one monotonically-indexed local per `let`
    /// (looked up by name within this frame only — shadowing an outer
    /// local is allowed, matching ordinary block scoping), then the
    /// trailing value expression.
    fn lower_block(&mut self, lets: &[(String, ExprAst)], value: &ExprAst, loc: SourceLocation) -> DiagResult<MathExpr> {
        let block_id = self.fresh_block_id();
        self.frames.push(Frame { block_id, locals: HashMap::new() });

        let mut local_vars = Vec::with_capacity(lets.len());
        for (index, (name, init)) in lets.iter().enumerate() {
            let lowered_init = match self.lower(init) {
                Ok(v) => v,
                Err(e) => {
                    self.frames.pop();
                    return Err(e);
                }
            };
            let value_type = lowered_init.value_type;
            let index = index as u32;
            self.frames.last_mut().expect("frame just pushed").locals.insert(name.clone(), LocalSlot { block_id, index, value_type });
            local_vars.push(LocalVarDecl { block_id, index, is_used: true, initializer: Box::new(lowered_init) });
        }

        let lowered_value = self.lower(value);
        self.frames.pop();
        let lowered_value = lowered_value?;
        let value_type = lowered_value.value_type;
        Ok(MathExpr::new(MathExprKind::Block { local_vars, exprs: vec![lowered_value], is_for_loop: false, loop_count: None }, value_type, loc))
    }
}

/// A non-mutating visible-name lookup (unlike [`crate::catalog::Scope::lookup`],
/// which marks the entry referenced and so needs `&mut`); IR building
/// only reads the catalog, never annotates it.
fn lookup_visible(catalog: &Catalog, scope_id: crate::catalog::ScopeId, name: &str) -> Option<EntityId> {
    catalog.scope(scope_id).visible_entities.get(name).map(|entry| entry.id)
}

fn intrinsic_by_name(name: &str) -> Option<Intrinsic> {
    Some(match name {
        "abs" | "fabs" => Intrinsic::Abs,
        "min" => Intrinsic::Min,
        "max" => Intrinsic::Max,
        "exp" => Intrinsic::Exp,
        "ln" | "log" => Intrinsic::Ln,
        "log10" => Intrinsic::Log10,
        "log2" => Intrinsic::Log2,
        "cbrt" => Intrinsic::Cbrt,
        "sqrt" => Intrinsic::Sqrt,
        "sin" => Intrinsic::Sin,
        "cos" => Intrinsic::Cos,
        "tan" => Intrinsic::Tan,
        "asin" => Intrinsic::Asin,
        "acos" => Intrinsic::Acos,
        "atan" => Intrinsic::Atan,
        "sinh" => Intrinsic::Sinh,
        "cosh" => Intrinsic::Cosh,
        "tanh" => Intrinsic::Tanh,
        "round" => Intrinsic::Round,
        "copysign" => Intrinsic::Copysign,
        "is_finite" => Intrinsic::IsFinite,
        "pow2" => Intrinsic::Pow2,
        "powi" => Intrinsic::PowI,
        "floor" => Intrinsic::Floor,
        "ceil" => Intrinsic::Ceil,
        "step" => Intrinsic::Step,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, RegType};
    use crate::index_data::{Idx, IndexData};
    use crate::parser::ExprAst;
    use mobius_ast::{DeclType, SourceLocation, TokenKind};

    fn loc() -> SourceLocation {
        SourceLocation::Internal
    }

    struct FixedLayout;
    impl Layout for FixedLayout {
        fn parameter_offset(&self, entity: EntityId, _index_args: &[TokenKind]) -> DiagResult<u32> {
            Ok(entity.index as u32)
        }
        fn series_offset(&self, entity: EntityId, _index_args: &[TokenKind]) -> DiagResult<u32> {
            Ok(entity.index as u32)
        }
        fn state_var_offset(&self, entity: EntityId, _index_args: &[TokenKind]) -> DiagResult<u32> {
            Ok(entity.index as u32)
        }
    }

    fn catalog_with_parameter(name: &str) -> (Catalog, EntityId) {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;
        let id = catalog.insert(RegType::Parameter, 0, DeclType::Par, loc(), top, name.to_string());
        catalog.scope_mut(top).add_local(name, loc(), id, true).unwrap();
        (catalog, id)
    }

    #[test]
    fn lowers_literal_to_matching_value_type() {
        let catalog = Catalog::new();
        let index_data = IndexData::new(&catalog);
        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::Literal(TokenKind::RealLiteral(2.5));
        let lowered = builder.build(&expr, Target::Value).unwrap();
        assert_eq!(lowered.value_type, ValueType::Real);
        assert_eq!(lowered.as_literal(), Some(Literal::Real(2.5)));
    }

    #[test]
    fn resolves_a_declared_parameter_by_name() {
        let (catalog, p_id) = catalog_with_parameter("Rate");
        let index_data = IndexData::new(&catalog);
        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::Identifier { chain: vec!["Rate".to_string()], index_args: vec![], loc: loc() };
        let lowered = builder.build(&expr, Target::Value).unwrap();
        match lowered.kind {
            MathExprKind::Identifier(mobius_ir::Identifier::Parameter(offset)) => assert_eq!(offset, p_id.index as u32),
            other => panic!("expected a parameter identifier, got {other:?}"),
        }
    }

    #[test]
    fn undeclared_identifier_is_an_error() {
        let catalog = Catalog::new();
        let index_data = IndexData::new(&catalog);
        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::Identifier { chain: vec!["Nope".to_string()], index_args: vec![], loc: loc() };
        assert!(builder.build(&expr, Target::Value).is_err());
    }

    #[test]
    fn let_block_binds_a_local_and_shadows_cleanly() {
        let catalog = Catalog::new();
        let index_data = IndexData::new(&catalog);
        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::Block {
            lets: vec![("x".to_string(), ExprAst::Literal(TokenKind::RealLiteral(4.0)))],
            value: Box::new(ExprAst::Identifier { chain: vec!["x".to_string()], index_args: vec![], loc: loc() }),
            loc: loc(),
        };
        let lowered = builder.build(&expr, Target::Value).unwrap();
        match lowered.kind {
            MathExprKind::Block { local_vars, exprs, is_for_loop, .. } => {
                assert_eq!(local_vars.len(), 1);
                assert!(!is_for_loop);
                assert_eq!(exprs.len(), 1);
                assert!(matches!(exprs[0].kind, MathExprKind::Identifier(mobius_ir::Identifier::LocalVar { index: 0, .. })));
            }
            other => panic!("expected a block, got {other:?}"),
        }
    }

    #[test]
    fn binary_comparison_has_bool_value_type() {
        let catalog = Catalog::new();
        let index_data = IndexData::new(&catalog);
        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::Binary {
            op: mobius_ir::BinaryOp::Lt,
            lhs: Box::new(ExprAst::Literal(TokenKind::RealLiteral(1.0))),
            rhs: Box::new(ExprAst::Literal(TokenKind::RealLiteral(2.0))),
            loc: loc(),
        };
        let lowered = builder.build(&expr, Target::Value).unwrap();
        assert_eq!(lowered.value_type, ValueType::Bool);
    }

    #[test]
    fn intrinsic_call_lowers_to_function_ref() {
        let catalog = Catalog::new();
        let index_data = IndexData::new(&catalog);
        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::Call { name: "sqrt".to_string(), args: vec![ExprAst::Literal(TokenKind::RealLiteral(9.0))], loc: loc() };
        let lowered = builder.build(&expr, Target::Value).unwrap();
        assert!(matches!(lowered.kind, MathExprKind::FunctionCall { function: FunctionRef::Intrinsic(Intrinsic::Sqrt), .. }));
    }

    #[test]
    fn unknown_call_name_is_an_error() {
        let catalog = Catalog::new();
        let index_data = IndexData::new(&catalog);
        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::Call { name: "not_a_thing".to_string(), args: vec![], loc: loc() };
        assert!(builder.build(&expr, Target::Value).is_err());
    }

    #[test]
    fn for_loop_block_carries_a_sentinel_local_at_index_zero() {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;
        let set_id = catalog.insert(RegType::IndexSet, 0, DeclType::IndexSet, loc(), top, "Layer".to_string());
        catalog.scope_mut(top).add_local("Layer", loc(), set_id, true).unwrap();
        let mut index_data = IndexData::new(&catalog);
        index_data.set_indexes(&catalog, set_id, &[TokenKind::IntLiteral(3)], loc(), Idx::NONE).unwrap();

        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::For { index_set: "Layer".to_string(), body: Box::new(ExprAst::Literal(TokenKind::RealLiteral(1.0))), loc: loc() };
        let lowered = builder.build(&expr, Target::Value).unwrap();
        match lowered.kind {
            MathExprKind::Block { local_vars, is_for_loop, loop_count, .. } => {
                assert!(is_for_loop);
                assert_eq!(local_vars[0].index, 0);
                assert_eq!(loop_count.unwrap().as_literal(), Some(Literal::Integer(3)));
            }
            other => panic!("expected a for-loop block, got {other:?}"),
        }
    }

    #[test]
    fn external_call_lowers_its_arguments() {
        let catalog = Catalog::new();
        let index_data = IndexData::new(&catalog);
        let layout = FixedLayout;
        let mut builder = Builder::new(&catalog, &index_data, &layout);
        let expr = ExprAst::External {
            function_name: "DailyToHourly".to_string(),
            args: vec![ExprAst::Literal(TokenKind::IntLiteral(0)), ExprAst::Literal(TokenKind::IntLiteral(1)), ExprAst::Literal(TokenKind::IntLiteral(24))],
            loc: loc(),
        };
        let lowered = builder.build(&expr, Target::Value).unwrap();
        match lowered.kind {
            MathExprKind::ExternalComputation { function_name, args } => {
                assert_eq!(function_name, "DailyToHourly");
                assert_eq!(args.len(), 3);
            }
            other => panic!("expected an external_computation node, got {other:?}"),
        }
    }
}

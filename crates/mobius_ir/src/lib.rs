//! # Mobius IR - Math Intermediate Representation
//!
//! Node types for the expression trees a processed model is lowered
//! into. Every flux, parameter expression, and function body ends up as
//! one of these trees before the optimizer and the execution backends
//! (emulator / JIT) see it.
//!
//! Used across the optimizer, emulator and JIT backend modules for
//! consistency: they all walk the same `MathExpr` shape.

use mobius_ast::SourceLocation;

/// The value type a node in the tree produces.
///
/// `None` is used for statement-like nodes (`no_op`, an assignment)
/// that have no value of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    None,
    Bool,
    Integer,
    Real,
}

/// Arithmetic and comparison operators available in a binary node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    And,
    Or,
}

impl BinaryOp {
    /// Whether this operator is one of the two that are not commutative
    /// under reassociation (subtraction, division) — used by the
    /// optimizer to track sign/exponent parity when reassociating a
    /// chain of literal operands.
    #[must_use]
    pub fn is_divisive(self) -> bool {
        matches!(self, BinaryOp::Sub | BinaryOp::Div)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }
}

/// Unary operators: numeric negation and boolean negation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

/// The intrinsic math functions a `function_call` node may invoke.
///
/// This is the fixed set the optimizer and both backends need to
/// recognize by name; user-defined functions are represented the same
/// way but are not members of this enum (see `FunctionRef::User`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    Abs,
    Min,
    Max,
    Exp,
    Ln,
    Log10,
    Log2,
    Cbrt,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Sinh,
    Cosh,
    Tanh,
    Round,
    Copysign,
    IsFinite,
    Pow2,
    PowI,
    Floor,
    Ceil,
    Step,
}

impl Intrinsic {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Intrinsic::Abs => "abs",
            Intrinsic::Min => "min",
            Intrinsic::Max => "max",
            Intrinsic::Exp => "exp",
            Intrinsic::Ln => "ln",
            Intrinsic::Log10 => "log10",
            Intrinsic::Log2 => "log2",
            Intrinsic::Cbrt => "cbrt",
            Intrinsic::Sqrt => "sqrt",
            Intrinsic::Sin => "sin",
            Intrinsic::Cos => "cos",
            Intrinsic::Tan => "tan",
            Intrinsic::Asin => "asin",
            Intrinsic::Acos => "acos",
            Intrinsic::Atan => "atan",
            Intrinsic::Sinh => "sinh",
            Intrinsic::Cosh => "cosh",
            Intrinsic::Tanh => "tanh",
            Intrinsic::Round => "round",
            Intrinsic::Copysign => "copysign",
            Intrinsic::IsFinite => "is_finite",
            Intrinsic::Pow2 => "pow2",
            Intrinsic::PowI => "powi",
            Intrinsic::Floor => "floor",
            Intrinsic::Ceil => "ceil",
            Intrinsic::Step => "step",
        }
    }
}

/// A callable referenced from a `function_call` node: either one of the
/// fixed intrinsics or a user-defined function identified by index into
/// the function registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRef {
    Intrinsic(Intrinsic),
    User(u32),
}

/// A runtime-resolved value reference: a state variable, a series, a
/// parameter, or an external computation's input, addressed by its
/// position in the run state's flat buffers. Index offsets into these
/// buffers are resolved once, by the component that lowers a model to
/// IR, so the tree itself never needs to search by name again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identifier {
    Parameter(u32),
    Series(u32),
    StateVar(u32),
    LocalVar { block_id: u32, index: u32 },
    IterationIndex(u32),
}

/// A literal constant embedded in the tree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Literal {
    Bool(bool),
    Integer(i64),
    Real(f64),
}

impl Literal {
    #[must_use]
    pub fn value_type(self) -> ValueType {
        match self {
            Literal::Bool(_) => ValueType::Bool,
            Literal::Integer(_) => ValueType::Integer,
            Literal::Real(_) => ValueType::Real,
        }
    }

    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Literal::Bool(b) => f64::from(b as u8),
            Literal::Integer(i) => i as f64,
            Literal::Real(r) => r,
        }
    }
}

/// One branch of an `if_chain`: a condition expression (`None` for the
/// final `else` branch) paired with the expression evaluated when it
/// holds.
#[derive(Debug, Clone, PartialEq)]
pub struct IfBranch {
    pub condition: Option<Box<MathExpr>>,
    pub value: Box<MathExpr>,
}

/// A declaration of a local variable inside a block, holding its
/// initializer expression. `is_used` starts `true` and is cleared by
/// the optimizer's dead-local pass once nothing in the block references
/// it any more.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVarDecl {
    pub block_id: u32,
    pub index: u32,
    pub is_used: bool,
    pub initializer: Box<MathExpr>,
}

/// The kinds of node a math expression tree is built from.
///
/// This mirrors the tagged-node design of the original compiler's
/// expression AST: a single recursive sum type rather than one Rust
/// type per node kind, since the optimizer and both backends need to
/// pattern-match across the whole tree uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum MathExprKind {
    /// A sequence of statements; `is_for_loop` blocks execute their
    /// single statement `loop_count` times with `LocalVar(block_id, _)`
    /// bound to the iteration index.
    Block {
        local_vars: Vec<LocalVarDecl>,
        exprs: Vec<MathExpr>,
        is_for_loop: bool,
        loop_count: Option<Box<MathExpr>>,
    },
    Identifier(Identifier),
    Literal(Literal),
    UnaryOp {
        op: UnaryOp,
        operand: Box<MathExpr>,
    },
    BinaryOp {
        op: BinaryOp,
        lhs: Box<MathExpr>,
        rhs: Box<MathExpr>,
    },
    FunctionCall {
        function: FunctionRef,
        args: Vec<MathExpr>,
    },
    IfChain {
        branches: Vec<IfBranch>,
    },
    /// Assigns the value of `value` to a state variable's accumulator
    /// for the current step (a flux or discrete-update target).
    StateVarAssignment {
        target: u32,
        value: Box<MathExpr>,
    },
    /// Adds `value` to a state variable's derivative accumulator, used
    /// by ODE-governed quantities rather than `StateVarAssignment`.
    DerivativeAssignment {
        target: u32,
        value: Box<MathExpr>,
    },
    Cast {
        target_type: ValueType,
        operand: Box<MathExpr>,
    },
    /// Invokes a registered external computation by name, passing the
    /// listed argument expressions as its inputs.
    ExternalComputation {
        function_name: String,
        args: Vec<MathExpr>,
    },
    /// Re-evaluates `target_var`'s initializer once, used when a
    /// `for` loop collapses to a single iteration by the optimizer and
    /// the iteration index is replaced with a literal 0.
    Iterate {
        local_var_block_id: u32,
        body: Box<MathExpr>,
    },
    NoOp,
}

/// A node in the math expression tree: its kind, resolved value type,
/// and the source location it was lowered from (kept for diagnostics
/// raised at evaluation time, e.g. a numerical-error message pointing
/// back at the flux declaration that produced it).
#[derive(Debug, Clone, PartialEq)]
pub struct MathExpr {
    pub kind: MathExprKind,
    pub value_type: ValueType,
    pub source_loc: SourceLocation,
}

impl MathExpr {
    #[must_use]
    pub fn new(kind: MathExprKind, value_type: ValueType, source_loc: SourceLocation) -> Self {
        MathExpr {
            kind,
            value_type,
            source_loc,
        }
    }

    #[must_use]
    pub fn literal(value: Literal, source_loc: SourceLocation) -> Self {
        let value_type = value.value_type();
        MathExpr::new(MathExprKind::Literal(value), value_type, source_loc)
    }

    #[must_use]
    pub fn no_op(source_loc: SourceLocation) -> Self {
        MathExpr::new(MathExprKind::NoOp, ValueType::None, source_loc)
    }

    /// Whether this node is a literal of any kind, used throughout the
    /// optimizer's constant-folding passes.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        matches!(self.kind, MathExprKind::Literal(_))
    }

    /// The literal value of this node, if it is one.
    #[must_use]
    pub fn as_literal(&self) -> Option<Literal> {
        match self.kind {
            MathExprKind::Literal(lit) => Some(lit),
            _ => None,
        }
    }

    /// Recursively visits every child node, depth-first. Used by passes
    /// that need to collect information (e.g. "does this subtree
    /// reference identifier X") without mutating the tree.
    pub fn for_each_child<'a, F: FnMut(&'a MathExpr)>(&'a self, mut visit: F) {
        self.visit_children(&mut visit);
    }

    fn visit_children<'a, F: FnMut(&'a MathExpr)>(&'a self, visit: &mut F) {
        match &self.kind {
            MathExprKind::Block { exprs, .. } => {
                for e in exprs {
                    visit(e);
                    e.visit_children(visit);
                }
            }
            MathExprKind::UnaryOp { operand, .. }
            | MathExprKind::Cast { operand, .. }
            | MathExprKind::StateVarAssignment { value: operand, .. }
            | MathExprKind::DerivativeAssignment { value: operand, .. } => {
                visit(operand);
                operand.visit_children(visit);
            }
            MathExprKind::BinaryOp { lhs, rhs, .. } => {
                visit(lhs);
                lhs.visit_children(visit);
                visit(rhs);
                rhs.visit_children(visit);
            }
            MathExprKind::FunctionCall { args, .. }
            | MathExprKind::ExternalComputation { args, .. } => {
                for a in args {
                    visit(a);
                    a.visit_children(visit);
                }
            }
            MathExprKind::IfChain { branches } => {
                for b in branches {
                    if let Some(cond) = &b.condition {
                        visit(cond);
                        cond.visit_children(visit);
                    }
                    visit(&b.value);
                    b.value.visit_children(visit);
                }
            }
            MathExprKind::Iterate { body, .. } => {
                visit(body);
                body.visit_children(visit);
            }
            MathExprKind::Identifier(_) | MathExprKind::Literal(_) | MathExprKind::NoOp => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::Internal
    }

    #[test]
    fn literal_value_type_matches_variant() {
        assert_eq!(Literal::Bool(true).value_type(), ValueType::Bool);
        assert_eq!(Literal::Integer(3).value_type(), ValueType::Integer);
        assert_eq!(Literal::Real(1.5).value_type(), ValueType::Real);
    }

    #[test]
    fn is_divisive_flags_sub_and_div_only() {
        assert!(BinaryOp::Sub.is_divisive());
        assert!(BinaryOp::Div.is_divisive());
        assert!(!BinaryOp::Add.is_divisive());
        assert!(!BinaryOp::Mul.is_divisive());
    }

    #[test]
    fn for_each_child_visits_binary_operands() {
        let lhs = MathExpr::literal(Literal::Real(1.0), loc());
        let rhs = MathExpr::literal(Literal::Real(2.0), loc());
        let tree = MathExpr::new(
            MathExprKind::BinaryOp {
                op: BinaryOp::Add,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            },
            ValueType::Real,
            loc(),
        );

        let mut seen = 0;
        tree.for_each_child(|_| seen += 1);
        assert_eq!(seen, 2);
    }

    #[test]
    fn no_op_has_none_value_type() {
        let node = MathExpr::no_op(loc());
        assert_eq!(node.value_type, ValueType::None);
    }
}

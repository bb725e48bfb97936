//! # Mobius AST - Concrete Syntax Tree Types
//!
//! Concrete syntax tree types for the Mobius model description language.
//! A model file is a sequence of declarations; every declaration carries
//! a type tag, a chain of positional/keyword arguments, an optional body
//! of nested declarations or a data block, and a source location used
//! for diagnostics.
//!
//! ## Builders
//!
//! For programmatic construction of declarations (mainly useful in
//! tests), see the [`builders`] module.

use std::fmt;

pub mod builders;

// ============================================================================
// Source locations
// ============================================================================

/// Where a piece of syntax came from, for error reporting.
///
/// `Internal` marks entities synthesized by the compiler itself (builtin
/// constants, generated identifiers) rather than parsed from a file.
/// `Spreadsheet` locates a cell inside a tabular data file, which uses a
/// different addressing scheme (tab/row/col) than free-form text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceLocation {
    #[default]
    Internal,
    File {
        file_id: u32,
        line: u32,
        column: u32,
    },
    Spreadsheet {
        tab: u32,
        row: u32,
        col: u32,
    },
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceLocation::Internal => write!(f, "<internal>"),
            SourceLocation::File { line, column, .. } => write!(f, "line {line}, column {column}"),
            SourceLocation::Spreadsheet { tab, row, col } => {
                write!(f, "tab {tab}, row {row}, col {col}")
            }
        }
    }
}

// ============================================================================
// Tokens
// ============================================================================

/// A single lexical token together with the text it was built from.
///
/// Kept alongside the AST (rather than only in the lexer) because
/// declarations often need to re-inspect the raw token of an argument,
/// for instance to tell a bare identifier from a quoted string that
/// happens to contain the same characters.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub source_loc: SourceLocation,
}

/// The kinds of literal or identifier tokens that can appear as a
/// declaration argument.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Identifier(String),
    QuotedString(String),
    IntLiteral(i64),
    RealLiteral(f64),
    BoolLiteral(bool),
}

// ============================================================================
// Declaration types
// ============================================================================

/// The declaration keywords recognized by the model description grammar.
///
/// Mirrors the fixed set of top-level and nested declaration kinds a
/// model file is built from: module/library-level containers, entity
/// declarations inside them, and a few declarations (`module`,
/// `preamble`) that can also be registered under a different entity
/// type than their own declaration keyword implies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeclType {
    Model,
    Module,
    ModuleTemplate,
    Library,
    Preamble,
    Compartment,
    Quantity,
    Property,
    ParGroup,
    Par,
    IndexSet,
    Connection,
    Flux,
    Function,
    Unit,
    Constant,
    Loc,
    Solver,
    SolveDecl,
    Option,
}

impl DeclType {
    /// The textual keyword a parser would see introducing this declaration.
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            DeclType::Model => "model",
            DeclType::Module => "module",
            DeclType::ModuleTemplate => "module_template",
            DeclType::Library => "library",
            DeclType::Preamble => "preamble",
            DeclType::Compartment => "compartment",
            DeclType::Quantity => "quantity",
            DeclType::Property => "property",
            DeclType::ParGroup => "par_group",
            DeclType::Par => "par",
            DeclType::IndexSet => "index_set",
            DeclType::Connection => "connection",
            DeclType::Flux => "flux",
            DeclType::Function => "function",
            DeclType::Unit => "unit",
            DeclType::Constant => "constant",
            DeclType::Loc => "loc",
            DeclType::Solver => "solver",
            DeclType::SolveDecl => "solve",
            DeclType::Option => "option",
        }
    }

    /// Parse a keyword into a declaration type, if it names one.
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        Some(match keyword {
            "model" => DeclType::Model,
            "module" => DeclType::Module,
            "module_template" => DeclType::ModuleTemplate,
            "library" => DeclType::Library,
            "preamble" => DeclType::Preamble,
            "compartment" => DeclType::Compartment,
            "quantity" => DeclType::Quantity,
            "property" => DeclType::Property,
            "par_group" => DeclType::ParGroup,
            "par" => DeclType::Par,
            "index_set" => DeclType::IndexSet,
            "connection" => DeclType::Connection,
            "flux" => DeclType::Flux,
            "function" => DeclType::Function,
            "unit" => DeclType::Unit,
            "constant" => DeclType::Constant,
            "loc" => DeclType::Loc,
            "solver" => DeclType::Solver,
            "solve" => DeclType::SolveDecl,
            "option" => DeclType::Option,
            _ => return None,
        })
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// A single argument to a declaration.
///
/// Arguments form a chain rather than a flat list in the original
/// grammar (each argument may itself carry a sub-chain, as in
/// `par_real("Name", unit, 0.0[min, max])`), so `sub_args` holds the
/// nested chain attached to this argument, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgumentAst {
    pub token: Token,
    pub sub_args: Vec<ArgumentAst>,
    /// A dotted/qualified chain such as `compartment.quantity`, resolved
    /// later against a scope rather than at parse time.
    pub chain: Vec<String>,
    pub source_loc: SourceLocation,
}

impl ArgumentAst {
    #[must_use]
    pub fn identifier(name: impl Into<String>, source_loc: SourceLocation) -> Self {
        let name = name.into();
        ArgumentAst {
            token: Token {
                kind: TokenKind::Identifier(name.clone()),
                source_loc,
            },
            sub_args: Vec::new(),
            chain: vec![name],
            source_loc,
        }
    }

    #[must_use]
    pub fn quoted_string(value: impl Into<String>, source_loc: SourceLocation) -> Self {
        ArgumentAst {
            token: Token {
                kind: TokenKind::QuotedString(value.into()),
                source_loc,
            },
            sub_args: Vec::new(),
            chain: Vec::new(),
            source_loc,
        }
    }

    #[must_use]
    pub fn real(value: f64, source_loc: SourceLocation) -> Self {
        ArgumentAst {
            token: Token {
                kind: TokenKind::RealLiteral(value),
                source_loc,
            },
            sub_args: Vec::new(),
            chain: Vec::new(),
            source_loc,
        }
    }

    /// The argument's text if it is a bare identifier or quoted string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.token.kind {
            TokenKind::Identifier(s) | TokenKind::QuotedString(s) => Some(s),
            _ => None,
        }
    }
}

/// The data payload of a `data_block`, as used by `par_group` bodies and
/// the tabular sections of a data set file: a grid of literal tokens,
/// one row per index-tuple combination.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DataBlockAst {
    pub rows: Vec<Vec<Token>>,
    pub source_loc: SourceLocation,
}

// ============================================================================
// Declarations
// ============================================================================

/// A single declaration: `decl_type "Name" : arg_chain { body }`.
///
/// This is the concrete syntax tree node the catalog consumes when
/// registering entities; it is deliberately untyped with respect to
/// what kind of entity it ultimately becomes; `decl_type` alone decides
/// that, at registration time, not at parse time.
#[derive(Debug, Clone, PartialEq)]
pub struct DeclAst {
    pub decl_type: DeclType,
    pub name: Option<String>,
    pub args: Vec<ArgumentAst>,
    pub body: Vec<DeclAst>,
    pub data_block: Option<DataBlockAst>,
    pub notes: Vec<String>,
    pub source_loc: SourceLocation,
    /// A stable handle identifying this node, assigned by a single DFS
    /// numbering pass over a `FileAst` after parsing. Plays the role the
    /// original compiler gets for free from a raw `Decl_AST *` pointer: the
    /// catalog's `by_decl` map uses it to re-enter an inline declaration
    /// during deferred processing and land on the same entity id.
    pub decl_id: u32,
}

impl DeclAst {
    #[must_use]
    pub fn new(decl_type: DeclType, source_loc: SourceLocation) -> Self {
        DeclAst {
            decl_type,
            name: None,
            args: Vec::new(),
            body: Vec::new(),
            data_block: None,
            notes: Vec::new(),
            source_loc,
            decl_id: 0,
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_arg(mut self, arg: ArgumentAst) -> Self {
        self.args.push(arg);
        self
    }

    #[must_use]
    pub fn with_body_decl(mut self, decl: DeclAst) -> Self {
        self.body.push(decl);
        self
    }

    /// The i-th argument's text, if present and a plain token.
    #[must_use]
    pub fn arg_str(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(ArgumentAst::as_str)
    }

    /// Whether `decl_type` is allowed to appear nested inside a body of
    /// the given set of declaration types, mirroring the way the original
    /// grammar restricts which declarations can nest inside which.
    #[must_use]
    pub fn is_allowed_in(&self, allowed: &[DeclType]) -> bool {
        allowed.contains(&self.decl_type)
    }
}

/// The whole parsed contents of one model description file: a sequence
/// of top-level declarations plus an optional leading doc string.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileAst {
    pub doc_string: Option<String>,
    pub decls: Vec<DeclAst>,
}

impl FileAst {
    #[must_use]
    pub fn new() -> Self {
        FileAst::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use builders::DeclBuilder;

    #[test]
    fn decl_type_roundtrips_through_keyword() {
        for decl_type in [
            DeclType::Module,
            DeclType::Compartment,
            DeclType::Quantity,
            DeclType::ParGroup,
            DeclType::Connection,
            DeclType::Solver,
        ] {
            let parsed = DeclType::parse(decl_type.keyword());
            assert_eq!(parsed, Some(decl_type));
        }
    }

    #[test]
    fn unknown_keyword_does_not_parse() {
        assert_eq!(DeclType::parse("not_a_keyword"), None);
    }

    #[test]
    fn argument_as_str_only_for_text_tokens() {
        let loc = SourceLocation::Internal;
        let ident = ArgumentAst::identifier("water", loc);
        assert_eq!(ident.as_str(), Some("water"));

        let real = ArgumentAst::real(1.5, loc);
        assert_eq!(real.as_str(), None);
    }

    #[test]
    fn decl_builds_nested_body() {
        let loc = SourceLocation::Internal;
        let quantity = DeclAst::new(DeclType::Quantity, loc).with_name("Water");
        let compartment = DeclAst::new(DeclType::Compartment, loc)
            .with_name("Soil")
            .with_body_decl(quantity);

        assert_eq!(compartment.body.len(), 1);
        assert_eq!(compartment.body[0].name.as_deref(), Some("Water"));
    }

    #[test]
    fn decl_allowed_in_restricts_nesting() {
        let loc = SourceLocation::Internal;
        let par = DeclAst::new(DeclType::Par, loc);
        assert!(par.is_allowed_in(&[DeclType::Par, DeclType::ParGroup]));
        assert!(!par.is_allowed_in(&[DeclType::Quantity]));
    }

    #[test]
    fn builder_produces_equivalent_decl() {
        let loc = SourceLocation::Internal;
        let built = DeclBuilder::new(DeclType::Module, loc)
            .name("Hydrology")
            .arg(ArgumentAst::quoted_string("1.0", loc))
            .build();
        assert_eq!(built.name.as_deref(), Some("Hydrology"));
        assert_eq!(built.args.len(), 1);
    }
}

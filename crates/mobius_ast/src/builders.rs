//! Builder Patterns for AST Construction
//!
//! Provides a fluent API for constructing declaration nodes, particularly
//! useful for tests and for the compiler's own internally-synthesized
//! declarations (see `create_internal` in the catalog).
//!
//! ## Example
//!
//! ```rust
//! use mobius_ast::{ArgumentAst, DeclType, SourceLocation};
//! use mobius_ast::builders::DeclBuilder;
//!
//! let loc = SourceLocation::Internal;
//! let decl = DeclBuilder::new(DeclType::Quantity, loc)
//!     .name("Water")
//!     .arg(ArgumentAst::quoted_string("kg", loc))
//!     .build();
//! ```

use super::{ArgumentAst, DataBlockAst, DeclAst, DeclType, SourceLocation};

/// Builder for constructing `DeclAst` instances.
#[derive(Debug, Clone)]
pub struct DeclBuilder {
    decl: DeclAst,
}

impl DeclBuilder {
    #[must_use]
    pub fn new(decl_type: DeclType, source_loc: SourceLocation) -> Self {
        DeclBuilder {
            decl: DeclAst::new(decl_type, source_loc),
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.decl.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn arg(mut self, arg: ArgumentAst) -> Self {
        self.decl.args.push(arg);
        self
    }

    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = ArgumentAst>) -> Self {
        self.decl.args.extend(args);
        self
    }

    #[must_use]
    pub fn body(mut self, decl: DeclAst) -> Self {
        self.decl.body.push(decl);
        self
    }

    #[must_use]
    pub fn data_block(mut self, block: DataBlockAst) -> Self {
        self.decl.data_block = Some(block);
        self
    }

    #[must_use]
    pub fn note(mut self, text: impl Into<String>) -> Self {
        self.decl.notes.push(text.into());
        self
    }

    #[must_use]
    pub fn build(self) -> DeclAst {
        self.decl
    }
}

//! Uniform error channel: error kinds, source locations, and the standard
//! diagnostic presentation shared by every compilation-time component.
//!
//! Mirrors the reference compiler's `mobius_error_exit` discipline (see the
//! spec's design note on the global error stream) but modeled as a `Result`
//! type per the note's suggested library-mode replacement: compilation
//! errors are returned, not printed-and-exited, so a caller embedding this
//! crate controls the presentation and can recover instead of aborting the
//! process.

use mobius_ast::SourceLocation;
use std::fmt;
use thiserror::Error;

/// The abstract error kinds a diagnostic can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parsing,
    File,
    ModelBuilding,
    ApiUsage,
    Numerical,
    Spreadsheet,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Parsing => "parsing",
            ErrorKind::File => "file",
            ErrorKind::ModelBuilding => "model_building",
            ErrorKind::ApiUsage => "api_usage",
            ErrorKind::Numerical => "numerical",
            ErrorKind::Spreadsheet => "spreadsheet",
            ErrorKind::Internal => "internal",
        };
        write!(f, "{s}")
    }
}

/// A single diagnostic: a kind, a source location, and a message.
///
/// `Display` renders the standard presentation:
/// `ERROR (<kind>): In <file> line L column C: <msg>`.
#[derive(Debug, Clone, Error)]
#[error("{}", self.render())]
pub struct Diagnostic {
    pub kind: ErrorKind,
    pub loc: SourceLocation,
    pub message: String,
    /// Set for duplicate-definition diagnostics, citing the prior location.
    pub prior_loc: Option<SourceLocation>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(kind: ErrorKind, loc: SourceLocation, message: impl Into<String>) -> Self {
        Diagnostic {
            kind,
            loc,
            message: message.into(),
            prior_loc: None,
        }
    }

    #[must_use]
    pub fn duplicate(
        kind: ErrorKind,
        loc: SourceLocation,
        prior_loc: SourceLocation,
        message: impl Into<String>,
    ) -> Self {
        Diagnostic {
            kind,
            loc,
            message: message.into(),
            prior_loc: Some(prior_loc),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Diagnostic::new(ErrorKind::Internal, SourceLocation::Internal, message)
    }

    fn render(&self) -> String {
        let mut out = format!(
            "ERROR ({}): In {}: {}",
            self.kind, self.loc, self.message
        );
        if let Some(prior) = self.prior_loc {
            out.push_str(&format!(" (previously declared at {prior})"));
        }
        out
    }
}

/// The result type returned by every public, fallible entry point in the
/// compilation pipeline (C1 through C10). Runtime errors from C11 (NaN,
/// timeout) are modeled separately as `bool`/`RunOutcome`, matching the
/// spec's split between fatal compile errors and non-fatal run failures.
pub type DiagResult<T> = Result<T, Diagnostic>;

/// A sink that accumulates non-fatal diagnostics (e.g. "unreferenced
/// entity" warnings) without aborting the surrounding pass. Parallel
/// harnesses (C14) should give each worker its own sink and merge them at
/// a join point rather than share one, matching the spec's concurrency
/// note that the lexer-level error sink is single-threaded by default.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    warnings: Vec<Diagnostic>,
}

impl DiagnosticSink {
    #[must_use]
    pub fn new() -> Self {
        DiagnosticSink::default()
    }

    pub fn warn(&mut self, diag: Diagnostic) {
        self.warnings.push(diag);
    }

    #[must_use]
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }
}

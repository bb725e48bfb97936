//! Parser: turns a token stream into a [`mobius_ast::FileAst`] skeleton
//! of declarations, plus (for the few declaration kinds whose body is
//! a formula rather than nested declarations) a side table of parsed
//! expression trees keyed by [`mobius_ast::DeclAst::decl_id`].
//!
//! The full grammar of the model description language is an
//! out-of-scope collaborator (per the purpose-and-scope note); what's
//! built here is the declaration skeleton (`keyword(args) { body }` /
//! `[ data ]` forms, `@name(args)` notes) and an expression grammar
//! sufficient to drive [`crate::ir_builder`]: literals, identifiers
//! with index arguments, unary/binary operators, function calls,
//! if-chains, `for` loops, `external(...)` calls, and `{ let ...; expr
//! }` blocks. `mobius_ast::DeclAst` has no field for an expression
//! body (it only models the declarative skeleton), so expression trees
//! are threaded back to the caller alongside the `FileAst` rather than
//! folded into it.

use std::collections::HashMap;

use mobius_ast::{ArgumentAst, DataBlockAst, DeclAst, DeclType, FileAst, SourceLocation, Token, TokenKind};
use mobius_ir::{BinaryOp, UnaryOp};

use crate::diagnostics::{DiagResult, Diagnostic, ErrorKind};
use crate::lexer::{RawToken, Scanner, TokenStream};

/// An unresolved expression tree: scope-agnostic (identifiers are bare
/// name chains, not yet [`crate::catalog::EntityId`]s), built directly
/// by the expression grammar and lowered by
/// [`crate::ir_builder::build_expr`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExprAst {
    Literal(TokenKind),
    /// A name (possibly dotted, e.g. `Soil.Water`) with optional index
    /// arguments in brackets, e.g. `Water[Soil, Top]`.
    Identifier { chain: Vec<String>, index_args: Vec<ExprAst>, loc: SourceLocation },
    Unary { op: UnaryOp, operand: Box<ExprAst>, loc: SourceLocation },
    Binary { op: BinaryOp, lhs: Box<ExprAst>, rhs: Box<ExprAst>, loc: SourceLocation },
    Call { name: String, args: Vec<ExprAst>, loc: SourceLocation },
    External { function_name: String, args: Vec<ExprAst>, loc: SourceLocation },
    If { branches: Vec<(Option<ExprAst>, ExprAst)>, loc: SourceLocation },
    For { index_set: String, body: Box<ExprAst>, loc: SourceLocation },
    Block { lets: Vec<(String, ExprAst)>, value: Box<ExprAst>, loc: SourceLocation },
}

impl ExprAst {
    #[must_use]
    pub fn loc(&self) -> SourceLocation {
        match self {
            ExprAst::Literal(_) => SourceLocation::Internal,
            ExprAst::Identifier { loc, .. }
            | ExprAst::Unary { loc, .. }
            | ExprAst::Binary { loc, .. }
            | ExprAst::Call { loc, .. }
            | ExprAst::External { loc, .. }
            | ExprAst::If { loc, .. }
            | ExprAst::For { loc, .. }
            | ExprAst::Block { loc, .. } => *loc,
        }
    }
}

/// A declaration type whose `{ ... }` body is a single formula rather
/// than a nested list of declarations.
fn is_expression_bodied(decl_type: DeclType) -> bool {
    matches!(decl_type, DeclType::Flux | DeclType::Function | DeclType::Constant)
}

/// The result of parsing one model description file: the declaration
/// skeleton plus every expression body, keyed by `decl_id`.
#[derive(Debug, Clone, Default)]
pub struct ParsedFile {
    pub file: FileAst,
    pub expressions: HashMap<u32, ExprAst>,
}

/// Parses a whole model description file.
///
/// Assigns `decl_id` itself, in the same pre-order DFS as
/// [`crate::catalog::assign_decl_ids`] (parent before children, in
/// declaration order) so `expressions` can be keyed by `decl_id`
/// immediately rather than waiting for a second numbering pass; a
/// catalog-building pass that re-runs `assign_decl_ids` over this same
/// tree reproduces identical ids.
pub fn parse_source(source: &str, file_id: u32) -> DiagResult<ParsedFile> {
    let mut ts = TokenStream::new(Scanner::new(source, file_id));
    let mut file = FileAst::new();
    let mut expressions = HashMap::new();
    let mut next_id = 0u32;

    if let RawToken::Literal(TokenKind::QuotedString(s)) = &ts.peek(0)?.raw {
        let doc = s.clone();
        ts.advance()?;
        file.doc_string = Some(doc);
    }

    while !ts.at_eof()? {
        let decl = parse_decl(&mut ts, &mut expressions, &mut next_id)?;
        file.decls.push(decl);
    }

    Ok(ParsedFile { file, expressions })
}

fn expect_punct(ts: &mut TokenStream, c: char) -> DiagResult<SourceLocation> {
    let tok = ts.advance()?;
    match tok.raw {
        RawToken::Punct(p) if p == c => Ok(tok.loc),
        other => Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected '{c}', found {other:?}"))),
    }
}

fn at_punct(ts: &mut TokenStream, c: char) -> DiagResult<bool> {
    Ok(matches!(ts.peek(0)?.raw, RawToken::Punct(p) if p == c))
}

fn expect_identifier(ts: &mut TokenStream) -> DiagResult<(String, SourceLocation)> {
    let tok = ts.advance()?;
    match tok.raw {
        RawToken::Literal(TokenKind::Identifier(name)) => Ok((name, tok.loc)),
        other => Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected identifier, found {other:?}"))),
    }
}

// ----------------------------------------------------------------------
// Declaration skeleton
// ----------------------------------------------------------------------

fn parse_decl(ts: &mut TokenStream, expressions: &mut HashMap<u32, ExprAst>, next_id: &mut u32) -> DiagResult<DeclAst> {
    let (keyword, loc) = expect_identifier(ts)?;
    let decl_type = DeclType::parse(&keyword).ok_or_else(|| Diagnostic::new(ErrorKind::Parsing, loc, format!("unknown declaration keyword '{keyword}'")))?;
    let mut decl = DeclAst::new(decl_type, loc);
    decl.decl_id = *next_id;
    *next_id += 1;

    if let RawToken::Literal(TokenKind::QuotedString(s)) = &ts.peek(0)?.raw {
        decl.name = Some(s.clone());
        ts.advance()?;
    }

    if at_punct(ts, '(')? {
        ts.advance()?;
        if !at_punct(ts, ')')? {
            loop {
                decl.args.push(parse_argument(ts)?);
                if at_punct(ts, ',')? {
                    ts.advance()?;
                    continue;
                }
                break;
            }
        }
        expect_punct(ts, ')')?;
    }

    while at_punct(ts, '@')? {
        decl.notes.push(parse_note(ts)?);
    }

    if at_punct(ts, '{')? {
        if is_expression_bodied(decl_type) {
            let expr = parse_brace_expr(ts)?;
            expressions.insert(decl.decl_id, expr);
        } else {
            ts.advance()?;
            while !at_punct(ts, '}')? {
                let child = parse_decl(ts, expressions, next_id)?;
                decl.body.push(child);
            }
            expect_punct(ts, '}')?;
        }
    } else if at_punct(ts, '[')? {
        decl.data_block = Some(parse_data_block(ts)?);
    }

    Ok(decl)
}

/// `@name(args)`, recorded as rendered text (`"name(a,b)"`); dataset.rs
/// and the catalog-building pass inspect notes by matching on this
/// text rather than a structured representation, matching
/// `mobius_ast::DeclAst::notes`'s own `Vec<String>` shape.
fn parse_note(ts: &mut TokenStream) -> DiagResult<String> {
    expect_punct(ts, '@')?;
    let (name, _) = expect_identifier(ts)?;
    let mut rendered = name.clone();
    if at_punct(ts, '(')? {
        ts.advance()?;
        let mut parts = Vec::new();
        if !at_punct(ts, ')')? {
            loop {
                parts.push(render_argument(&parse_argument(ts)?));
                if at_punct(ts, ',')? {
                    ts.advance()?;
                    continue;
                }
                break;
            }
        }
        expect_punct(ts, ')')?;
        rendered.push('(');
        rendered.push_str(&parts.join(","));
        rendered.push(')');
    }
    Ok(rendered)
}

fn render_argument(arg: &ArgumentAst) -> String {
    match &arg.token.kind {
        TokenKind::QuotedString(s) => format!("\"{s}\""),
        TokenKind::Identifier(s) => s.clone(),
        TokenKind::IntLiteral(i) => i.to_string(),
        TokenKind::RealLiteral(r) => r.to_string(),
        TokenKind::BoolLiteral(b) => b.to_string(),
    }
}

fn parse_argument(ts: &mut TokenStream) -> DiagResult<ArgumentAst> {
    let tok = ts.advance()?;
    let mut arg = match tok.raw {
        RawToken::Literal(TokenKind::Identifier(name)) => {
            let mut chain = vec![name];
            while at_punct(ts, '.')? {
                ts.advance()?;
                let (part, _) = expect_identifier(ts)?;
                chain.push(part);
            }
            ArgumentAst { token: Token { kind: TokenKind::Identifier(chain.join(".")), source_loc: tok.loc }, sub_args: Vec::new(), chain, source_loc: tok.loc }
        }
        RawToken::Literal(kind) => ArgumentAst { token: Token { kind, source_loc: tok.loc }, sub_args: Vec::new(), chain: Vec::new(), source_loc: tok.loc },
        other => return Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected an argument, found {other:?}"))),
    };

    if at_punct(ts, '[')? {
        ts.advance()?;
        if !at_punct(ts, ']')? {
            loop {
                arg.sub_args.push(parse_argument(ts)?);
                if at_punct(ts, ',')? {
                    ts.advance()?;
                    continue;
                }
                break;
            }
        }
        expect_punct(ts, ']')?;
    }

    Ok(arg)
}

/// A data block's overall syntax is `group (";" group)*` with `group
/// := "[" literal* "]"` and no enclosing bracket around the whole —
/// this is the form [`crate::index_data::IndexData::write_indexes_to_file`]
/// already emits, so the reader and writer agree without translation.
fn parse_data_block(ts: &mut TokenStream) -> DiagResult<DataBlockAst> {
    let loc = ts.peek(0)?.loc;
    let mut rows = Vec::new();
    loop {
        expect_punct(ts, '[')?;
        let mut row = Vec::new();
        while !at_punct(ts, ']')? {
            let tok = ts.advance()?;
            match tok.raw {
                RawToken::Literal(kind) => row.push(Token { kind, source_loc: tok.loc }),
                other => return Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected a literal inside a data block, found {other:?}"))),
            }
        }
        expect_punct(ts, ']')?;
        rows.push(row);
        if at_punct(ts, ';')? {
            ts.advance()?;
            continue;
        }
        break;
    }
    Ok(DataBlockAst { rows, source_loc: loc })
}

// ----------------------------------------------------------------------
// Expressions
// ----------------------------------------------------------------------

fn parse_brace_expr(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    parse_block(ts)
}

fn keyword_ident(ts: &mut TokenStream, word: &str) -> DiagResult<bool> {
    if let RawToken::Literal(TokenKind::Identifier(name)) = &ts.peek(0)?.raw {
        Ok(name == word)
    } else {
        Ok(false)
    }
}

pub fn parse_expr(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    parse_or(ts)
}

fn parse_or(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let mut lhs = parse_and(ts)?;
    while keyword_ident(ts, "or")? {
        let loc = ts.advance()?.loc;
        let rhs = parse_and(ts)?;
        lhs = ExprAst::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
    }
    Ok(lhs)
}

fn parse_and(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let mut lhs = parse_not(ts)?;
    while keyword_ident(ts, "and")? {
        let loc = ts.advance()?.loc;
        let rhs = parse_not(ts)?;
        lhs = ExprAst::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
    }
    Ok(lhs)
}

fn parse_not(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    if keyword_ident(ts, "not")? {
        let loc = ts.advance()?.loc;
        let operand = parse_not(ts)?;
        return Ok(ExprAst::Unary { op: UnaryOp::Not, operand: Box::new(operand), loc });
    }
    parse_comparison(ts)
}

fn parse_comparison(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let lhs = parse_additive(ts)?;
    let op = match &ts.peek(0)?.raw {
        RawToken::Punct('<') => Some(BinaryOp::Lt),
        RawToken::Le => Some(BinaryOp::Le),
        RawToken::Punct('>') => Some(BinaryOp::Gt),
        RawToken::Ge => Some(BinaryOp::Ge),
        RawToken::Punct('=') => Some(BinaryOp::Eq),
        RawToken::Ne => Some(BinaryOp::Ne),
        _ => None,
    };
    let Some(op) = op else { return Ok(lhs) };
    let loc = ts.advance()?.loc;
    let rhs = parse_additive(ts)?;
    Ok(ExprAst::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc })
}

fn parse_additive(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let mut lhs = parse_multiplicative(ts)?;
    loop {
        let op = match &ts.peek(0)?.raw {
            RawToken::Punct('+') => BinaryOp::Add,
            RawToken::Punct('-') => BinaryOp::Sub,
            _ => break,
        };
        let loc = ts.advance()?.loc;
        let rhs = parse_multiplicative(ts)?;
        lhs = ExprAst::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
    }
    Ok(lhs)
}

fn parse_multiplicative(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let mut lhs = parse_unary(ts)?;
    loop {
        let op = match &ts.peek(0)?.raw {
            RawToken::Punct('*') => BinaryOp::Mul,
            RawToken::Punct('/') => BinaryOp::Div,
            _ => break,
        };
        let loc = ts.advance()?.loc;
        let rhs = parse_unary(ts)?;
        lhs = ExprAst::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), loc };
    }
    Ok(lhs)
}

fn parse_unary(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    if at_punct(ts, '-')? {
        let loc = ts.advance()?.loc;
        let operand = parse_unary(ts)?;
        return Ok(ExprAst::Unary { op: UnaryOp::Negate, operand: Box::new(operand), loc });
    }
    if at_punct(ts, '+')? {
        ts.advance()?;
        return parse_unary(ts);
    }
    parse_primary(ts)
}

fn parse_primary(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let tok = ts.peek(0)?.clone();
    match tok.raw {
        RawToken::Literal(TokenKind::Identifier(ref name)) if name == "if" => parse_if_chain(ts),
        RawToken::Literal(TokenKind::Identifier(ref name)) if name == "for" => parse_for(ts),
        RawToken::Literal(TokenKind::Identifier(ref name)) if name == "external" => parse_external(ts),
        RawToken::Literal(TokenKind::Identifier(name)) => {
            ts.advance()?;
            let mut chain = vec![name];
            while at_punct(ts, '.')? {
                ts.advance()?;
                let (part, _) = expect_identifier(ts)?;
                chain.push(part);
            }
            if at_punct(ts, '(')? {
                ts.advance()?;
                let mut args = Vec::new();
                if !at_punct(ts, ')')? {
                    loop {
                        args.push(parse_expr(ts)?);
                        if at_punct(ts, ',')? {
                            ts.advance()?;
                            continue;
                        }
                        break;
                    }
                }
                expect_punct(ts, ')')?;
                return Ok(ExprAst::Call { name: chain.join("."), args, loc: tok.loc });
            }
            let mut index_args = Vec::new();
            if at_punct(ts, '[')? {
                ts.advance()?;
                if !at_punct(ts, ']')? {
                    loop {
                        index_args.push(parse_expr(ts)?);
                        if at_punct(ts, ',')? {
                            ts.advance()?;
                            continue;
                        }
                        break;
                    }
                }
                expect_punct(ts, ']')?;
            }
            Ok(ExprAst::Identifier { chain, index_args, loc: tok.loc })
        }
        RawToken::Literal(kind) => {
            ts.advance()?;
            Ok(ExprAst::Literal(kind))
        }
        RawToken::Punct('(') => {
            ts.advance()?;
            let inner = parse_expr(ts)?;
            expect_punct(ts, ')')?;
            Ok(inner)
        }
        RawToken::Punct('{') => parse_block(ts),
        other => Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected an expression, found {other:?}"))),
    }
}

/// `{ (let NAME = expr ;)* expr }`: a lexically nested block whose
/// trailing expression (no terminating `;`) is its value, matching
/// `mobius_ir::MathExprKind::Block`'s local-var + final-value shape.
fn parse_block(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let loc = expect_punct(ts, '{')?;
    let mut lets = Vec::new();
    loop {
        if keyword_ident(ts, "let")? {
            ts.advance()?;
            let (name, _) = expect_identifier(ts)?;
            expect_punct(ts, '=')?;
            let value = parse_expr(ts)?;
            expect_punct(ts, ';')?;
            lets.push((name, value));
            continue;
        }
        break;
    }
    let value = parse_expr(ts)?;
    expect_punct(ts, '}')?;
    Ok(ExprAst::Block { lets, value: Box::new(value), loc })
}

/// `if cond { expr } elif cond { expr } ... else { expr }`.
fn parse_if_chain(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let loc = ts.advance()?.loc; // "if"
    let mut branches = Vec::new();
    let cond = parse_expr(ts)?;
    let value = parse_block(ts)?;
    branches.push((Some(cond), value));

    loop {
        if keyword_ident(ts, "elif")? {
            ts.advance()?;
            let cond = parse_expr(ts)?;
            let value = parse_block(ts)?;
            branches.push((Some(cond), value));
            continue;
        }
        if keyword_ident(ts, "else")? {
            ts.advance()?;
            let value = parse_block(ts)?;
            branches.push((None, value));
        }
        break;
    }
    Ok(ExprAst::If { branches, loc })
}

/// `for IndexSetName { body }`, lowered to a for-loop `Block` by
/// `ir_builder` once `IndexSetName` is resolved to an
/// [`crate::catalog::EntityId`].
fn parse_for(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let loc = ts.advance()?.loc; // "for"
    let (index_set, _) = expect_identifier(ts)?;
    let body = parse_block(ts)?;
    Ok(ExprAst::For { index_set, body: Box::new(body), loc })
}

/// `external("name", arg, arg, ...)`.
fn parse_external(ts: &mut TokenStream) -> DiagResult<ExprAst> {
    let loc = ts.advance()?.loc; // "external"
    expect_punct(ts, '(')?;
    let name_tok = ts.advance()?;
    let function_name = match name_tok.raw {
        RawToken::Literal(TokenKind::QuotedString(s)) => s,
        other => return Err(Diagnostic::new(ErrorKind::Parsing, name_tok.loc, format!("expected a quoted function name, found {other:?}"))),
    };
    let mut args = Vec::new();
    while at_punct(ts, ',')? {
        ts.advance()?;
        args.push(parse_expr(ts)?);
    }
    expect_punct(ts, ')')?;
    Ok(ExprAst::External { function_name, args, loc })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_module_with_compartment_and_quantity() {
        let source = r#"
            module "Hydrology" {
                compartment "Soil" {
                    quantity "Water"
                }
            }
        "#;
        let parsed = parse_source(source, 0).unwrap();
        assert_eq!(parsed.file.decls.len(), 1);
        let module = &parsed.file.decls[0];
        assert_eq!(module.decl_type, DeclType::Module);
        assert_eq!(module.name.as_deref(), Some("Hydrology"));
        assert_eq!(module.body.len(), 1);
        let compartment = &module.body[0];
        assert_eq!(compartment.body[0].decl_type, DeclType::Quantity);
    }

    #[test]
    fn parses_args_with_sub_args_and_note() {
        let source = r#"par("K", 0.1[0.0, 1.0]) @sub("Parent")"#;
        let mut expressions = HashMap::new();
        let mut ts = TokenStream::new(Scanner::new(source, 0));
        let decl = parse_decl(&mut ts, &mut expressions, &mut 0u32).unwrap();
        assert_eq!(decl.name.as_deref(), Some("K"));
        assert_eq!(decl.args.len(), 1);
        assert_eq!(decl.args[0].sub_args.len(), 2);
        assert_eq!(decl.notes, vec!["sub(\"Parent\")".to_string()]);
    }

    #[test]
    fn parses_index_set_data_block_with_groups() {
        let source = "index_set \"Soil layers\" [ 3 ] ; [ 5 ]";
        let mut expressions = HashMap::new();
        let mut ts = TokenStream::new(Scanner::new(source, 0));
        let decl = parse_decl(&mut ts, &mut expressions, &mut 0u32).unwrap();
        let block = decl.data_block.unwrap();
        assert_eq!(block.rows.len(), 2);
        assert_eq!(block.rows[0], vec![Token { kind: TokenKind::IntLiteral(3), source_loc: block.rows[0][0].source_loc }]);
    }

    #[test]
    fn parses_flux_expression_body_into_side_table() {
        let source = r#"flux "Runoff" { let k = 0.1; k * Water }"#;
        let parsed = parse_source(source, 0).unwrap();
        let decl = &parsed.file.decls[0];
        assert_eq!(decl.decl_type, DeclType::Flux);
        assert!(decl.body.is_empty());
        let expr = parsed.expressions.get(&decl.decl_id).expect("flux body parsed");
        match expr {
            ExprAst::Block { lets, value, .. } => {
                assert_eq!(lets.len(), 1);
                assert_eq!(lets[0].0, "k");
                match value.as_ref() {
                    ExprAst::Binary { op: BinaryOp::Mul, .. } => {}
                    other => panic!("expected multiplication, got {other:?}"),
                }
            }
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn parses_if_elif_else_chain() {
        let source = "function \"Step\" { if x < 0 { 0.0 } elif x < 1 { x } else { 1.0 } }";
        let parsed = parse_source(source, 0).unwrap();
        let decl = &parsed.file.decls[0];
        let expr = parsed.expressions.get(&decl.decl_id).unwrap();
        match expr {
            ExprAst::Block { value, .. } => match value.as_ref() {
                ExprAst::If { branches, .. } => assert_eq!(branches.len(), 3),
                other => panic!("expected if-chain, got {other:?}"),
            },
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn parses_for_loop_and_index_args() {
        let source = "flux \"Spread\" { for Compartments { Water[Compartments] } }";
        let parsed = parse_source(source, 0).unwrap();
        let decl = &parsed.file.decls[0];
        let expr = parsed.expressions.get(&decl.decl_id).unwrap();
        match expr {
            ExprAst::Block { value, .. } => match value.as_ref() {
                ExprAst::For { index_set, .. } => assert_eq!(index_set, "Compartments"),
                other => panic!("expected for loop, got {other:?}"),
            },
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn parses_external_computation_call() {
        let source = r#"constant "Lookup" { external("table_lookup", x, y) }"#;
        let parsed = parse_source(source, 0).unwrap();
        let decl = &parsed.file.decls[0];
        let expr = parsed.expressions.get(&decl.decl_id).unwrap();
        match expr {
            ExprAst::Block { value, .. } => match value.as_ref() {
                ExprAst::External { function_name, args, .. } => {
                    assert_eq!(function_name, "table_lookup");
                    assert_eq!(args.len(), 2);
                }
                other => panic!("expected external call, got {other:?}"),
            },
            other => panic!("expected block, got {other:?}"),
        }
    }

    #[test]
    fn doc_string_is_captured() {
        let source = r#""A hydrology model." module "Hydrology" { }"#;
        let parsed = parse_source(source, 0).unwrap();
        assert_eq!(parsed.file.doc_string.as_deref(), Some("A hydrology model."));
    }
}

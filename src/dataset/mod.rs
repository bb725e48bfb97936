//! Data Set (C6): the input-side description — index-set contents,
//! connection graphs, parameter groups, series imports and the global
//! time step — parsed from its own small grammar and written back
//! deterministically.
//!
//! Grounded in the reference compiler's `data_set.cpp`/`data_set.h`: a
//! flat sequence of top-level declarations (`index_set`, `connection`,
//! `module`, `par_group`, `series`, `time_step`), each either a braced
//! body of nested declarations or a bracketed data block. This is a
//! distinct grammar from the model description language in
//! [`crate::parser`] (different keyword set, no expression bodies), so
//! it gets its own recursive-descent reader over the shared
//! [`crate::lexer`] token stream rather than reusing `parse_decl`.
//!
//! Per the spec's open questions, `index_data.h` and `data_set_new.cpp`
//! are partially-merged drafts; the compiled `data_set.cpp` is treated
//! as ground truth. That file represents a sub-indexed set's data block
//! as positional groups (`[ 3 ] ; [ 5 ]`, one group per parent
//! instance) rather than literally keyed by parent name — the same
//! form [`crate::index_data::IndexData::write_indexes_to_file`] already
//! emits — so this reader uses the same positional convention instead
//! of the `parent-key :` form the prose in section 4.3 suggests.

use mobius_ast::{SourceLocation, TokenKind};

use crate::diagnostics::{DiagResult, Diagnostic, ErrorKind};
use crate::lexer::{RawToken, Scanner, TokenStream};

// ============================================================================
// AST
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct DataSetAst {
    pub doc_string: Option<String>,
    pub version: Option<i64>,
    pub time_step: Option<TimeStepDecl>,
    pub index_sets: Vec<IndexSetDecl>,
    pub connections: Vec<ConnectionDecl>,
    pub series: Vec<SeriesDecl>,
    pub par_groups: Vec<ParGroupDecl>,
    pub modules: Vec<ModuleDecl>,
}

impl Default for DataSetAst {
    fn default() -> Self {
        DataSetAst {
            doc_string: None,
            version: None,
            time_step: None,
            index_sets: Vec::new(),
            connections: Vec::new(),
            series: Vec::new(),
            par_groups: Vec::new(),
            modules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeStepUnit {
    Second,
    Month,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeStepDecl {
    pub unit: TimeStepUnit,
    pub magnitude: i64,
    pub loc: SourceLocation,
}

/// A bracketed index-set data block. Sub-indexed sets store one group
/// per parent instance, in parent-ordinal order (see the module-level
/// note on the positional convention).
#[derive(Debug, Clone, PartialEq)]
pub enum IndexSetData {
    None,
    Count(i64),
    Names(Vec<String>),
    SubTables(Vec<IndexSetData>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexSetDecl {
    pub name: String,
    pub sub_of: Option<String>,
    pub union_of: Vec<String>,
    pub data: IndexSetData,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentKind {
    Compartment,
    Quantity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComponentDecl {
    pub kind: ComponentKind,
    pub name: String,
    pub index_sets: Vec<String>,
    pub loc: SourceLocation,
}

/// One node in an arrow chain: either a named component with an index
/// tuple, or the sink `out`, which may only appear as a target.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrowNode {
    Out,
    Component { name: String, indexes: Vec<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionDecl {
    pub name: String,
    pub components: Vec<ComponentDecl>,
    pub edge_index_set: Option<String>,
    /// `A[i] -> B[j] -> C[k]` chains; a `directed_graph` body may
    /// contain several, back to back.
    pub arrow_chains: Vec<Vec<ArrowNode>>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesDecl {
    pub file_name: String,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParKind {
    Real,
    Int,
    Bool,
    Datetime,
    Enum,
}

impl ParKind {
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            ParKind::Real => "par_real",
            ParKind::Int => "par_int",
            ParKind::Bool => "par_bool",
            ParKind::Datetime => "par_datetime",
            ParKind::Enum => "par_enum",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParDecl {
    pub kind: ParKind,
    pub name: String,
    pub values: Vec<TokenKind>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParGroupDecl {
    pub name: String,
    pub index_sets: Vec<String>,
    pub pars: Vec<ParDecl>,
    pub loc: SourceLocation,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDecl {
    pub name: String,
    pub par_groups: Vec<ParGroupDecl>,
    pub loc: SourceLocation,
}

// ============================================================================
// Parser
// ============================================================================

pub fn parse_data_set(source: &str, file_id: u32) -> DiagResult<DataSetAst> {
    let mut ts = TokenStream::new(Scanner::new(source, file_id));
    let mut set = DataSetAst::default();

    if let RawToken::Literal(TokenKind::QuotedString(s)) = &ts.peek(0)?.raw {
        set.doc_string = Some(s.clone());
        ts.advance()?;
    }

    while !ts.at_eof()? {
        let (keyword, loc) = expect_identifier(&mut ts)?;
        match keyword.as_str() {
            "version" => {
                if set.version.is_some() {
                    return Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, "duplicate 'version' declaration"));
                }
                expect_punct(&mut ts, '(')?;
                let v = expect_int(&mut ts)?;
                expect_punct(&mut ts, ')')?;
                set.version = Some(v);
            }
            "time_step" => {
                if set.time_step.is_some() {
                    return Err(Diagnostic::duplicate(
                        ErrorKind::ModelBuilding,
                        loc,
                        set.time_step.as_ref().unwrap().loc,
                        "duplicate 'time_step' declaration",
                    ));
                }
                set.time_step = Some(parse_time_step(&mut ts, loc)?);
            }
            "index_set" => set.index_sets.push(parse_index_set(&mut ts, loc)?),
            "connection" => set.connections.push(parse_connection(&mut ts, loc)?),
            "series" => set.series.push(parse_series(&mut ts, loc)?),
            "par_group" => set.par_groups.push(parse_par_group(&mut ts, loc)?),
            "module" => set.modules.push(parse_module(&mut ts, loc)?),
            other => return Err(Diagnostic::new(ErrorKind::Parsing, loc, format!("unknown data-set declaration '{other}'"))),
        }
    }

    validate_data_set(&set)?;
    Ok(set)
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

fn expect_string(ts: &mut TokenStream) -> DiagResult<String> {
    let tok = ts.advance()?;
    match tok.raw {
        RawToken::Literal(TokenKind::QuotedString(s)) => Ok(s),
        other => Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected a quoted string, found {other:?}"))),
    }
}

fn expect_int(ts: &mut TokenStream) -> DiagResult<i64> {
    let tok = ts.advance()?;
    match tok.raw {
        RawToken::Literal(TokenKind::IntLiteral(i)) => Ok(i),
        other => Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected an integer, found {other:?}"))),
    }
}

/// Peeks whether the next identifier token equals `word` without
/// consuming it (used for the small set of bare, unparenthesized
/// keywords like `out` that can appear where a name is expected).
fn peek_is_identifier(ts: &mut TokenStream, word: &str) -> DiagResult<bool> {
    Ok(matches!(&ts.peek(0)?.raw, RawToken::Literal(TokenKind::Identifier(s)) if s == word))
}

fn parse_name_arg(ts: &mut TokenStream) -> DiagResult<String> {
    expect_punct(ts, '(')?;
    let name = expect_string(ts)?;
    expect_punct(ts, ')')?;
    Ok(name)
}

/// `@sub("Parent")` and `@union("a", "b", ...)` notes, parsed directly
/// into structured fields rather than rendered text (unlike
/// [`crate::parser`]'s notes, which the catalog only needs to match by
/// name).
fn parse_index_set_notes(ts: &mut TokenStream) -> DiagResult<(Option<String>, Vec<String>)> {
    let mut sub_of = None;
    let mut union_of = Vec::new();
    while at_punct(ts, '@')? {
        ts.advance()?;
        let (name, loc) = expect_identifier(ts)?;
        expect_punct(ts, '(')?;
        match name.as_str() {
            "sub" => {
                sub_of = Some(expect_string(ts)?);
            }
            "union" => {
                loop {
                    union_of.push(expect_string(ts)?);
                    if at_punct(ts, ',')? {
                        ts.advance()?;
                        continue;
                    }
                    break;
                }
            }
            other => return Err(Diagnostic::new(ErrorKind::Parsing, loc, format!("unknown index-set note '@{other}'"))),
        }
        expect_punct(ts, ')')?;
    }
    Ok((sub_of, union_of))
}

fn parse_time_step(ts: &mut TokenStream, loc: SourceLocation) -> DiagResult<TimeStepDecl> {
    expect_punct(ts, '(')?;
    let magnitude = expect_int(ts)?;
    expect_punct(ts, ',')?;
    let (unit_word, unit_loc) = expect_identifier(ts)?;
    let unit = match unit_word.as_str() {
        "second" | "seconds" => TimeStepUnit::Second,
        "month" | "months" => TimeStepUnit::Month,
        other => return Err(Diagnostic::new(ErrorKind::ModelBuilding, unit_loc, format!("unknown time step unit '{other}'"))),
    };
    expect_punct(ts, ')')?;
    Ok(TimeStepDecl { unit, magnitude, loc })
}

fn parse_index_set(ts: &mut TokenStream, loc: SourceLocation) -> DiagResult<IndexSetDecl> {
    let name = parse_name_arg(ts)?;
    let (sub_of, union_of) = parse_index_set_notes(ts)?;

    if sub_of.is_some() && !union_of.is_empty() {
        return Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("index set \"{name}\" cannot be both @sub and @union")));
    }

    let data = if !union_of.is_empty() || at_nothing_before_next_decl(ts)? {
        IndexSetData::None
    } else if at_punct(ts, '[')? {
        parse_index_set_data(ts)?
    } else {
        IndexSetData::None
    };

    if !union_of.is_empty() && !matches!(data, IndexSetData::None) {
        return Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, format!("union index set \"{name}\" must not have explicit data")));
    }

    Ok(IndexSetDecl { name, sub_of, union_of, data, loc })
}

/// Whether the stream has reached the next top-level declaration (or
/// eof) without an intervening `[` — i.e. this index set (a union or
/// edge set) has no data block at all.
fn at_nothing_before_next_decl(ts: &mut TokenStream) -> DiagResult<bool> {
    Ok(!at_punct(ts, '[')?)
}

fn parse_index_set_data(ts: &mut TokenStream) -> DiagResult<IndexSetData> {
    let mut groups = Vec::new();
    loop {
        groups.push(parse_one_index_group(ts)?);
        if at_punct(ts, ';')? {
            ts.advance()?;
            continue;
        }
        break;
    }
    if groups.len() == 1 {
        Ok(groups.into_iter().next().unwrap())
    } else {
        Ok(IndexSetData::SubTables(groups))
    }
}

fn parse_one_index_group(ts: &mut TokenStream) -> DiagResult<IndexSetData> {
    expect_punct(ts, '[')?;
    if at_punct(ts, ']')? {
        ts.advance()?;
        return Ok(IndexSetData::None);
    }
    let first = ts.peek(0)?.clone();
    let data = match first.raw {
        RawToken::Literal(TokenKind::IntLiteral(n)) => {
            ts.advance()?;
            IndexSetData::Count(n)
        }
        RawToken::Literal(TokenKind::QuotedString(_)) => {
            let mut names = Vec::new();
            while let RawToken::Literal(TokenKind::QuotedString(s)) = &ts.peek(0)?.raw {
                names.push(s.clone());
                ts.advance()?;
            }
            IndexSetData::Names(names)
        }
        other => return Err(Diagnostic::new(ErrorKind::Parsing, first.loc, format!("expected an index-set count or name list, found {other:?}"))),
    };
    expect_punct(ts, ']')?;
    Ok(data)
}

fn parse_connection(ts: &mut TokenStream, loc: SourceLocation) -> DiagResult<ConnectionDecl> {
    let name = parse_name_arg(ts)?;
    expect_punct(ts, '{')?;

    let mut components = Vec::new();
    let mut edge_index_set = None;
    let mut arrow_chains = Vec::new();

    while !at_punct(ts, '}')? {
        let (keyword, kw_loc) = expect_identifier(ts)?;
        match keyword.as_str() {
            "compartment" | "quantity" => {
                let kind = if keyword == "compartment" { ComponentKind::Compartment } else { ComponentKind::Quantity };
                let comp_name = parse_name_arg(ts)?;
                let mut index_sets = Vec::new();
                if at_punct(ts, '[')? {
                    ts.advance()?;
                    while !at_punct(ts, ']')? {
                        index_sets.push(expect_string(ts)?);
                    }
                    expect_punct(ts, ']')?;
                }
                components.push(ComponentDecl { kind, name: comp_name, index_sets, loc: kw_loc });
            }
            "directed_graph" => {
                if at_punct(ts, '(')? {
                    ts.advance()?;
                    edge_index_set = Some(expect_string(ts)?);
                    expect_punct(ts, ')')?;
                }
                expect_punct(ts, '[')?;
                while !at_punct(ts, ']')? {
                    arrow_chains.push(parse_arrow_chain(ts)?);
                }
                expect_punct(ts, ']')?;
            }
            other => return Err(Diagnostic::new(ErrorKind::Parsing, kw_loc, format!("unexpected declaration '{other}' inside a connection body"))),
        }
    }
    expect_punct(ts, '}')?;

    for chain in &arrow_chains {
        if matches!(chain.first(), Some(ArrowNode::Out)) {
            return Err(Diagnostic::new(ErrorKind::ModelBuilding, loc, "'out' can only be the target of an arrow, not its source"));
        }
    }

    Ok(ConnectionDecl { name, components, edge_index_set, arrow_chains, loc })
}

fn parse_arrow_chain(ts: &mut TokenStream) -> DiagResult<Vec<ArrowNode>> {
    let mut chain = vec![parse_arrow_node(ts)?];
    while matches!(ts.peek(0)?.raw, RawToken::Arrow) {
        ts.advance()?;
        chain.push(parse_arrow_node(ts)?);
    }
    Ok(chain)
}

fn parse_arrow_node(ts: &mut TokenStream) -> DiagResult<ArrowNode> {
    if peek_is_identifier(ts, "out")? {
        ts.advance()?;
        return Ok(ArrowNode::Out);
    }
    let (name, _) = expect_identifier(ts)?;
    let mut indexes = Vec::new();
    if at_punct(ts, '[')? {
        ts.advance()?;
        while !at_punct(ts, ']')? {
            let tok = ts.advance()?;
            match tok.raw {
                RawToken::Literal(TokenKind::Identifier(s) | TokenKind::QuotedString(s)) => indexes.push(s),
                RawToken::Literal(TokenKind::IntLiteral(i)) => indexes.push(i.to_string()),
                other => return Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected an index in an arrow's index tuple, found {other:?}"))),
            }
            if at_punct(ts, ',')? {
                ts.advance()?;
            }
        }
        expect_punct(ts, ']')?;
    }
    Ok(ArrowNode::Component { name, indexes })
}

fn parse_series(ts: &mut TokenStream, loc: SourceLocation) -> DiagResult<SeriesDecl> {
    let file_name = parse_name_arg(ts)?;
    Ok(SeriesDecl { file_name, loc })
}

fn parse_par_kind(word: &str) -> Option<ParKind> {
    Some(match word {
        "par_real" => ParKind::Real,
        "par_int" => ParKind::Int,
        "par_bool" => ParKind::Bool,
        "par_datetime" => ParKind::Datetime,
        "par_enum" => ParKind::Enum,
        _ => return None,
    })
}

fn parse_par(ts: &mut TokenStream, kind: ParKind, loc: SourceLocation) -> DiagResult<ParDecl> {
    let name = parse_name_arg(ts)?;
    expect_punct(ts, '[')?;
    let mut values = Vec::new();
    while !at_punct(ts, ']')? {
        let tok = ts.advance()?;
        match tok.raw {
            RawToken::Literal(lit) => values.push(lit),
            other => return Err(Diagnostic::new(ErrorKind::Parsing, tok.loc, format!("expected a literal parameter value, found {other:?}"))),
        }
    }
    expect_punct(ts, ']')?;
    Ok(ParDecl { kind, name, values, loc })
}

fn parse_par_group(ts: &mut TokenStream, loc: SourceLocation) -> DiagResult<ParGroupDecl> {
    let name = parse_name_arg(ts)?;
    let mut index_sets = Vec::new();
    if at_punct(ts, '[')? {
        ts.advance()?;
        while !at_punct(ts, ']')? {
            index_sets.push(expect_string(ts)?);
        }
        expect_punct(ts, ']')?;
    }
    expect_punct(ts, '{')?;
    let mut pars = Vec::new();
    while !at_punct(ts, '}')? {
        let (keyword, kw_loc) = expect_identifier(ts)?;
        let kind = parse_par_kind(&keyword).ok_or_else(|| Diagnostic::new(ErrorKind::Parsing, kw_loc, format!("unknown parameter declaration '{keyword}'")))?;
        pars.push(parse_par(ts, kind, kw_loc)?);
    }
    expect_punct(ts, '}')?;
    Ok(ParGroupDecl { name, index_sets, pars, loc })
}

fn parse_module(ts: &mut TokenStream, loc: SourceLocation) -> DiagResult<ModuleDecl> {
    let name = parse_name_arg(ts)?;
    expect_punct(ts, '{')?;
    let mut par_groups = Vec::new();
    while !at_punct(ts, '}')? {
        let (keyword, kw_loc) = expect_identifier(ts)?;
        if keyword != "par_group" {
            return Err(Diagnostic::new(ErrorKind::Parsing, kw_loc, format!("unexpected declaration '{keyword}' inside a module body")));
        }
        par_groups.push(parse_par_group(ts, kw_loc)?);
    }
    expect_punct(ts, '}')?;
    Ok(ModuleDecl { name, par_groups, loc })
}

// ============================================================================
// Semantic validation
// ============================================================================

/// Cross-declaration checks that can't be made while a single
/// declaration is still being parsed: double sub-indexing and
/// sub-indexed unions (both "rejected as unsupported" per the spec).
fn validate_data_set(set: &DataSetAst) -> DiagResult<()> {
    for index_set in &set.index_sets {
        if let Some(parent_name) = &index_set.sub_of {
            if let Some(parent) = set.index_sets.iter().find(|s| &s.name == parent_name) {
                if parent.sub_of.is_some() {
                    return Err(Diagnostic::new(
                        ErrorKind::ModelBuilding,
                        index_set.loc,
                        format!("index set \"{}\" sub-indexes \"{parent_name}\", which is itself sub-indexed (double sub-indexing is not supported)", index_set.name),
                    ));
                }
            }
        }
        if !index_set.union_of.is_empty() {
            for member_name in &index_set.union_of {
                if let Some(member) = set.index_sets.iter().find(|s| &s.name == member_name) {
                    if member.sub_of.is_some() {
                        return Err(Diagnostic::new(
                            ErrorKind::ModelBuilding,
                            index_set.loc,
                            format!("union index set \"{}\" has sub-indexed member \"{member_name}\" (sub-indexed unions are not supported)", index_set.name),
                        ));
                    }
                }
            }
        }
    }
    Ok(())
}

/// Checks a parameter's value count against the index-set product's
/// instance count, matching the boundary behavior "parameter-group
/// value count mismatches `get_instance_count`: fatal with count
/// expected vs given".
pub fn check_par_value_count(par: &ParDecl, expected_instance_count: usize) -> DiagResult<()> {
    if par.values.len() != expected_instance_count {
        return Err(Diagnostic::new(
            ErrorKind::ModelBuilding,
            par.loc,
            format!(
                "parameter \"{}\" expects {expected_instance_count} values (one per index-set instance), got {}",
                par.name,
                par.values.len()
            ),
        ));
    }
    Ok(())
}

// ============================================================================
// Write-back
// ============================================================================

fn quote(s: &str) -> String {
    format!("\"{s}\"")
}

fn write_index_set_data(data: &IndexSetData) -> String {
    match data {
        IndexSetData::None => String::new(),
        IndexSetData::Count(n) => format!("[ {n} ]"),
        IndexSetData::Names(names) => format!("[ {} ]", names.iter().map(|n| quote(n)).collect::<Vec<_>>().join(" ")),
        IndexSetData::SubTables(groups) => groups.iter().map(write_index_set_data).collect::<Vec<_>>().join(" ; "),
    }
}

fn write_index_set(decl: &IndexSetDecl) -> String {
    let mut out = format!("index_set({})", quote(&decl.name));
    if let Some(parent) = &decl.sub_of {
        out.push_str(&format!(" @sub({})", quote(parent)));
    }
    if !decl.union_of.is_empty() {
        out.push_str(&format!(" @union({})", decl.union_of.iter().map(|n| quote(n)).collect::<Vec<_>>().join(", ")));
    }
    let data = write_index_set_data(&decl.data);
    if !data.is_empty() {
        out.push(' ');
        out.push_str(&data);
    }
    out
}

fn write_arrow_node(node: &ArrowNode) -> String {
    match node {
        ArrowNode::Out => "out".to_string(),
        ArrowNode::Component { name, indexes } => {
            if indexes.is_empty() {
                name.clone()
            } else {
                format!("{name}[{}]", indexes.join(", "))
            }
        }
    }
}

fn write_connection(decl: &ConnectionDecl) -> String {
    let mut out = format!("connection({}) {{\n", quote(&decl.name));
    for comp in &decl.components {
        let keyword = if comp.kind == ComponentKind::Compartment { "compartment" } else { "quantity" };
        out.push_str(&format!("\t{keyword}({})", quote(&comp.name)));
        if !comp.index_sets.is_empty() {
            out.push_str(&format!(" [ {} ]", comp.index_sets.iter().map(|s| quote(s)).collect::<Vec<_>>().join(" ")));
        }
        out.push('\n');
    }
    out.push('\t');
    match &decl.edge_index_set {
        Some(edge) => out.push_str(&format!("directed_graph({})", quote(edge))),
        None => out.push_str("directed_graph"),
    }
    out.push_str(" [\n");
    for chain in &decl.arrow_chains {
        out.push_str("\t\t");
        out.push_str(&chain.iter().map(write_arrow_node).collect::<Vec<_>>().join(" -> "));
        out.push('\n');
    }
    out.push_str("\t]\n}\n");
    out
}

fn write_par(par: &ParDecl) -> String {
    let values = par.values.iter().map(render_literal).collect::<Vec<_>>().join(" ");
    format!("\t{}({}) [ {} ]\n", par.kind.keyword(), quote(&par.name), values)
}

fn render_literal(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Identifier(s) => s.clone(),
        TokenKind::QuotedString(s) => quote(s),
        TokenKind::IntLiteral(i) => i.to_string(),
        TokenKind::RealLiteral(r) => r.to_string(),
        TokenKind::BoolLiteral(b) => b.to_string(),
    }
}

fn write_par_group(decl: &ParGroupDecl) -> String {
    let mut out = format!("par_group({})", quote(&decl.name));
    if !decl.index_sets.is_empty() {
        out.push_str(&format!(" [ {} ]", decl.index_sets.iter().map(|s| quote(s)).collect::<Vec<_>>().join(" ")));
    }
    out.push_str(" {\n");
    for par in &decl.pars {
        out.push_str(&write_par(par));
    }
    out.push_str("}\n");
    out
}

fn write_module(decl: &ModuleDecl) -> String {
    let mut out = format!("module({}) {{\n", quote(&decl.name));
    for group in &decl.par_groups {
        out.push_str(&write_par_group(group));
    }
    out.push_str("}\n");
    out
}

/// Reproduces the data-set grammar deterministically: index sets
/// first (with any sub-tables), then global connections, then series
/// imports, then global parameter groups, then modules.
#[must_use]
pub fn write_data_set(set: &DataSetAst) -> String {
    let mut out = String::new();
    if let Some(doc) = &set.doc_string {
        out.push_str(&quote(doc));
        out.push('\n');
    }
    if let Some(v) = set.version {
        out.push_str(&format!("version({v})\n"));
    }
    if let Some(ts) = &set.time_step {
        let unit = match ts.unit {
            TimeStepUnit::Second => "second",
            TimeStepUnit::Month => "month",
        };
        out.push_str(&format!("time_step({}, {unit})\n", ts.magnitude));
    }
    for decl in &set.index_sets {
        out.push_str(&write_index_set(decl));
        out.push('\n');
    }
    for decl in &set.connections {
        out.push_str(&write_connection(decl));
    }
    for decl in &set.series {
        out.push_str(&format!("series({})\n", quote(&decl.file_name)));
    }
    for decl in &set.par_groups {
        out.push_str(&write_par_group(decl));
    }
    for decl in &set.modules {
        out.push_str(&write_module(decl));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc() -> SourceLocation {
        SourceLocation::Internal
    }

    #[test]
    fn parses_numeric_index_set() {
        let set = parse_data_set(r#"index_set("Soil layers") [ 3 ]"#, 0).unwrap();
        assert_eq!(set.index_sets.len(), 1);
        assert_eq!(set.index_sets[0].data, IndexSetData::Count(3));
    }

    #[test]
    fn parses_named_index_set() {
        let set = parse_data_set(r#"index_set("Regions") [ "North" "South" ]"#, 0).unwrap();
        assert_eq!(set.index_sets[0].data, IndexSetData::Names(vec!["North".into(), "South".into()]));
    }

    #[test]
    fn parses_sub_indexed_set_with_positional_groups() {
        let set = parse_data_set(r#"index_set("P") [ 2 ] index_set("C") @sub("P") [ 3 ] ; [ 5 ]"#, 0).unwrap();
        assert_eq!(set.index_sets[1].sub_of.as_deref(), Some("P"));
        assert_eq!(set.index_sets[1].data, IndexSetData::SubTables(vec![IndexSetData::Count(3), IndexSetData::Count(5)]));
    }

    #[test]
    fn sub_and_union_combined_is_rejected() {
        let err = parse_data_set(r#"index_set("U") @sub("P") @union("A", "B")"#, 0);
        assert!(err.is_err());
    }

    #[test]
    fn double_sub_indexing_is_rejected() {
        let source = r#"
            index_set("A") [ 2 ]
            index_set("B") @sub("A") [ 2 ] ; [ 2 ]
            index_set("C") @sub("B") [ 1 ] ; [ 1 ]
        "#;
        let err = parse_data_set(source, 0);
        assert!(err.is_err());
    }

    #[test]
    fn sub_indexed_union_member_is_rejected() {
        let source = r#"
            index_set("A") [ 2 ]
            index_set("B") @sub("A") [ 2 ] ; [ 2 ]
            index_set("U") @union("B", "A")
        "#;
        let err = parse_data_set(source, 0);
        assert!(err.is_err());
    }

    #[test]
    fn parses_connection_with_directed_graph() {
        let source = r#"
            connection("Downstream") {
                compartment("Soil") [ "Reaches" ]
                directed_graph [
                    Soil[1] -> Soil[2] -> out
                ]
            }
        "#;
        let set = parse_data_set(source, 0).unwrap();
        let conn = &set.connections[0];
        assert_eq!(conn.components.len(), 1);
        assert_eq!(conn.arrow_chains.len(), 1);
        assert_eq!(conn.arrow_chains[0].len(), 3);
        assert_eq!(conn.arrow_chains[0][2], ArrowNode::Out);
    }

    #[test]
    fn out_as_source_is_rejected() {
        let source = r#"
            connection("Bad") {
                directed_graph [
                    out -> Soil[1]
                ]
            }
        "#;
        assert!(parse_data_set(source, 0).is_err());
    }

    #[test]
    fn parses_par_group_with_typed_parameters() {
        let source = r#"
            par_group("Hydrology") [ "Reaches" ] {
                par_real("K") [ 0.1 0.2 0.3 ]
                par_bool("Active") [ true false true ]
            }
        "#;
        let set = parse_data_set(source, 0).unwrap();
        let group = &set.par_groups[0];
        assert_eq!(group.index_sets, vec!["Reaches".to_string()]);
        assert_eq!(group.pars[0].kind, ParKind::Real);
        assert_eq!(group.pars[0].values.len(), 3);
        check_par_value_count(&group.pars[0], 3).unwrap();
        assert!(check_par_value_count(&group.pars[0], 4).is_err());
    }

    #[test]
    fn duplicate_time_step_is_fatal() {
        let err = parse_data_set("time_step(1, second) time_step(1, month)", 0);
        assert!(err.is_err());
    }

    #[test]
    fn parses_series_and_modules() {
        let source = r#"
            series("precip.csv")
            module("Hydrology") {
                par_group("Defaults") {
                    par_int("Count") [ 1 2 3 ]
                }
            }
        "#;
        let set = parse_data_set(source, 0).unwrap();
        assert_eq!(set.series[0].file_name, "precip.csv");
        assert_eq!(set.modules[0].par_groups[0].pars[0].kind, ParKind::Int);
    }

    #[test]
    fn write_back_is_parseable_again() {
        let mut set = DataSetAst::default();
        set.index_sets.push(IndexSetDecl { name: "Reaches".into(), sub_of: None, union_of: vec![], data: IndexSetData::Count(4), loc: loc() });
        set.par_groups.push(ParGroupDecl {
            name: "Hydrology".into(),
            index_sets: vec!["Reaches".into()],
            pars: vec![ParDecl { kind: ParKind::Real, name: "K".into(), values: vec![TokenKind::RealLiteral(0.5); 4], loc: loc() }],
            loc: loc(),
        });
        let text = write_data_set(&set);
        let reparsed = parse_data_set(&text, 0).unwrap();
        assert_eq!(reparsed.index_sets[0].data, IndexSetData::Count(4));
        assert_eq!(reparsed.par_groups[0].pars[0].values.len(), 4);
    }
}

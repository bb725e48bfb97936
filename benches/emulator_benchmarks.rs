//! Run-loop throughput: how fast [`mobius::execution::run_model`]
//! drives a batch of increasing arithmetic depth through the emulator
//! backend over a fixed number of time steps.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mobius::datetime::{DateTime, TimeStepSize};
use mobius::execution::run_state::{Batch, RunState};
use mobius::execution::solver::FixedStepRk4;
use mobius::execution::run_model;
use mobius::external_computation::ExternalRegistry;
use mobius::jit::EmulatorBackend;
use mobius_ast::SourceLocation;
use mobius_ir::{BinaryOp, Identifier, Literal, MathExpr, MathExprKind, ValueType};

fn loc() -> SourceLocation {
    SourceLocation::Internal
}

/// Builds `state_var[0] := ((...((1 + 1) + 1)...) + 1)` with `depth`
/// nested additions, to vary how much tree-walking work one step does.
fn deep_sum(depth: usize) -> MathExpr {
    let mut value = MathExpr::literal(Literal::Real(1.0), loc());
    for _ in 0..depth {
        value = MathExpr::new(
            MathExprKind::BinaryOp { op: BinaryOp::Add, lhs: Box::new(value), rhs: Box::new(MathExpr::literal(Literal::Real(1.0), loc())) },
            ValueType::Real,
            loc(),
        );
    }
    MathExpr::new(MathExprKind::StateVarAssignment { target: 0, value: Box::new(value) }, ValueType::Real, loc())
}

fn bench_run_model(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_model_emulator");
    for depth in [8usize, 64, 512] {
        let batches = vec![Batch { name: "deep_sum".into(), ir: deep_sum(depth), solver: None }];
        group.bench_with_input(BenchmarkId::from_parameter(depth), &depth, |b, _| {
            b.iter(|| {
                let mut rs = RunState::new(1, 365, vec![], vec![0.0; 365], 1, DateTime::epoch(), TimeStepSize::default());
                let backend = EmulatorBackend;
                let externals = ExternalRegistry::new();
                let mut solver = FixedStepRk4;
                run_model(&batches, &mut rs, &backend, &externals, &mut solver, &(), false, None).unwrap()
            });
        });
    }
    group.finish();
}

fn bench_identifier_lookup(c: &mut Criterion) {
    let ir = MathExpr::new(
        MathExprKind::StateVarAssignment {
            target: 0,
            value: Box::new(MathExpr::new(MathExprKind::Identifier(Identifier::StateVar(0)), ValueType::Real, loc())),
        },
        ValueType::Real,
        loc(),
    );
    let batches = vec![Batch { name: "identity".into(), ir, solver: None }];
    c.bench_function("run_model_identity_passthrough", |b| {
        b.iter(|| {
            let mut rs = RunState::new(1, 365, vec![], vec![0.0; 365], 1, DateTime::epoch(), TimeStepSize::default());
            rs.state_vars[0] = 1.0;
            let backend = EmulatorBackend;
            let externals = ExternalRegistry::new();
            let mut solver = FixedStepRk4;
            run_model(&batches, &mut rs, &backend, &externals, &mut solver, &(), false, None).unwrap()
        });
    });
}

criterion_group!(benches, bench_run_model, bench_identifier_lookup);
criterion_main!(benches);

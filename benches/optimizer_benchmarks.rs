//! MCMC ensemble throughput: how fast [`mobius::mcmc::run_mcmc`] drives
//! a walker ensemble through a cheap Gaussian log-likelihood, across
//! ensemble sizes and sampler choices.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use mobius::mcmc::{run_mcmc, McData, Sampler};

fn gaussian_ll(params: &[f64]) -> f64 {
    -params.iter().map(|p| p * p).sum::<f64>() * 0.5
}

fn seeded_ensemble(n_walkers: usize, n_pars: usize, n_steps: usize) -> McData {
    let mut data = McData::new(n_walkers, n_pars, n_steps);
    for walker in 0..n_walkers {
        for par in 0..n_pars {
            data.set(walker, par, 0, 0.1 * (walker as f64 + 1.0) * (par as f64 + 1.0));
        }
    }
    data
}

fn bench_affine_stretch(c: &mut Criterion) {
    let mut group = c.benchmark_group("mcmc_affine_stretch");
    for n_walkers in [8usize, 16, 32] {
        group.bench_with_input(BenchmarkId::from_parameter(n_walkers), &n_walkers, |b, &n_walkers| {
            b.iter(|| {
                let mut data = seeded_ensemble(n_walkers, 3, 101);
                run_mcmc(Sampler::AffineStretch, &[2.0], &[1.0, 1.0, 1.0], |_, params| gaussian_ll(params), &mut data, |_| true, 10, 0, 42)
            });
        });
    }
    group.finish();
}

fn bench_sampler_kinds(c: &mut Criterion) {
    let mut group = c.benchmark_group("mcmc_sampler_kinds");
    let samplers = [
        ("affine_stretch", Sampler::AffineStretch, vec![2.0]),
        ("affine_walk", Sampler::AffineWalk, vec![3.0]),
        ("differential_evolution", Sampler::DifferentialEvolution, vec![-1.0, 0.9]),
        ("metropolis", Sampler::MetropolisHastings, vec![0.3]),
    ];
    for (name, sampler, params) in samplers {
        group.bench_function(name, |b| {
            b.iter(|| {
                let mut data = seeded_ensemble(16, 3, 101);
                run_mcmc(sampler, &params, &[1.0, 1.0, 1.0], |_, p| gaussian_ll(p), &mut data, |_| true, 10, 0, 7)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_affine_stretch, bench_sampler_kinds);
criterion_main!(benches);

//! Optimizer / MCMC Harness (C14): an affine-invariant ensemble sampler
//! over two parallel walker sub-ensembles, plus a generic
//! parameter-vector -> scalar-score optimization loop that sampler and
//! non-Bayesian search methods alike can sit on top of.
//!
//! Grounded in `support/mcmc.cpp`/`.h` (the sampler and its four move
//! variants) and `support/optimization.cpp`/`.h` (the scalar-score
//! evaluation loop). The reference tool stores all walker chains in
//! one flat buffer indexed by raw pointer arithmetic and spawns one
//! `std::thread` per walker each half-step; here each walker owns its
//! chain as a plain `Vec<f64>` and a half-step is a `rayon` parallel
//! iterator, which is the ecosystem's equivalent of that fork-join
//! shape without hand-rolled thread management. The shared
//! `{generator, mutex}` random state carries over directly as a
//! `parking_lot::Mutex<StdRng>`.

use std::collections::HashSet;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::statistics::TargetStatistic;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sampler {
    AffineStretch,
    AffineWalk,
    DifferentialEvolution,
    MetropolisHastings,
}

/// One walker's full chain: parameter history (`n_steps` rows of
/// `n_pars` values, row-major) and log-likelihood history.
#[derive(Debug, Clone)]
struct WalkerChain {
    n_pars: usize,
    params: Vec<f64>,
    ll: Vec<f64>,
}

impl WalkerChain {
    fn new(n_pars: usize, n_steps: usize) -> Self {
        WalkerChain { n_pars, params: vec![0.0; n_pars * n_steps], ll: vec![0.0; n_steps] }
    }

    fn params_at(&self, step: i64) -> &[f64] {
        let start = step as usize * self.n_pars;
        &self.params[start..start + self.n_pars]
    }

    fn set_param(&mut self, step: i64, par: usize, value: f64) {
        self.params[step as usize * self.n_pars + par] = value;
    }

    fn get_param(&self, step: i64, par: usize) -> f64 {
        self.params[step as usize * self.n_pars + par]
    }

    fn copy_step_forward(&mut self, step: i64) {
        for par in 0..self.n_pars {
            let prev = self.get_param(step - 1, par);
            self.set_param(step, par, prev);
        }
    }
}

/// Storage for all walker chains in one MCMC run. Mirrors `MC_Data`,
/// minus the manual flat-buffer indexing.
#[derive(Debug, Clone)]
pub struct McData {
    n_walkers: usize,
    n_pars: usize,
    n_steps: usize,
    chains: Vec<WalkerChain>,
    n_accepted: usize,
}

impl McData {
    #[must_use]
    pub fn new(n_walkers: usize, n_pars: usize, n_steps: usize) -> Self {
        McData {
            n_walkers,
            n_pars,
            n_steps,
            chains: (0..n_walkers).map(|_| WalkerChain::new(n_pars, n_steps)).collect(),
            n_accepted: 0,
        }
    }

    pub fn set(&mut self, walker: usize, par: usize, step: i64, value: f64) {
        self.chains[walker].set_param(step, par, value);
    }

    #[must_use]
    pub fn get(&self, walker: usize, par: usize, step: i64) -> f64 {
        self.chains[walker].get_param(step, par)
    }

    #[must_use]
    pub fn params_at(&self, walker: usize, step: i64) -> &[f64] {
        self.chains[walker].params_at(step)
    }

    pub fn set_score(&mut self, walker: usize, step: i64, value: f64) {
        self.chains[walker].ll[step as usize] = value;
    }

    #[must_use]
    pub fn score(&self, walker: usize, step: i64) -> f64 {
        self.chains[walker].ll[step as usize]
    }

    #[must_use]
    pub fn n_accepted(&self) -> usize {
        self.n_accepted
    }

    #[must_use]
    pub fn n_walkers(&self) -> usize {
        self.n_walkers
    }

    #[must_use]
    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    /// Best (highest log-likelihood) sample among walkers past
    /// `burnin`, up to and including `cur_step`. Mirrors
    /// `MC_Data::get_map_index`.
    #[must_use]
    pub fn map_index(&self, burnin: i64, cur_step: i64) -> (usize, i64) {
        let mut best_walker = 0;
        let mut best_step = burnin;
        let mut best_ll = f64::NEG_INFINITY;
        for walker in 0..self.n_walkers {
            for step in burnin..=cur_step {
                let ll = self.score(walker, step);
                if ll.is_finite() && ll > best_ll {
                    best_ll = ll;
                    best_walker = walker;
                    best_step = step;
                }
            }
        }
        (best_walker, best_step)
    }
}

fn draw_uniform(rng: &mut StdRng) -> f64 {
    rng.gen_range(0.0..1.0)
}

fn draw_index(rng: &mut StdRng, n: usize) -> usize {
    rng.gen_range(0..n)
}

#[allow(clippy::too_many_arguments)]
fn affine_stretch_move(
    chain: &mut WalkerChain,
    walker_id: usize,
    step: i64,
    ensemble: &[Vec<f64>],
    a: f64,
    rng_state: &Mutex<StdRng>,
    log_likelihood: &(dyn Fn(usize, &[f64]) -> f64 + Sync),
) -> bool {
    let n_pars = chain.n_pars;
    let (u, r, ens_idx) = {
        let mut rng = rng_state.lock();
        (draw_uniform(&mut rng), draw_uniform(&mut rng), draw_index(&mut rng, ensemble.len()))
    };

    let prev_ll = chain.ll[(step - 1) as usize];
    let mut zz = (a - 1.0) * u + 1.0;
    zz = zz * zz / a;

    let x_j = &ensemble[ens_idx];
    for par in 0..n_pars {
        let x_k = chain.get_param(step - 1, par);
        chain.set_param(step, par, x_j[par] + zz * (x_k - x_j[par]));
    }

    let ll = log_likelihood(walker_id, chain.params_at(step));
    let q = zz.powf(n_pars as f64 - 1.0) * (ll - prev_ll).exp();
    let accepted = ll.is_finite() && r <= q;
    if accepted {
        chain.ll[step as usize] = ll;
    } else {
        chain.copy_step_forward(step);
        chain.ll[step as usize] = prev_ll;
    }
    accepted
}

#[allow(clippy::too_many_arguments)]
fn affine_walk_move(
    chain: &mut WalkerChain,
    walker_id: usize,
    step: i64,
    ensemble: &[Vec<f64>],
    s0: usize,
    rng_state: &Mutex<StdRng>,
    log_likelihood: &(dyn Fn(usize, &[f64]) -> f64 + Sync),
) -> bool {
    let n_pars = chain.n_pars;
    let (r, ens_ids, zs): (f64, Vec<usize>, Vec<f64>) = {
        let mut rng = rng_state.lock();
        let r = draw_uniform(&mut rng);
        let mut ens_ids = Vec::with_capacity(s0);
        let mut zs = Vec::with_capacity(s0);
        for _ in 0..s0 {
            ens_ids.push(draw_index(&mut rng, ensemble.len()));
            zs.push(rng.sample::<f64, _>(StandardNormal));
        }
        (r, ens_ids, zs)
    };

    let prev_ll = chain.ll[(step - 1) as usize];
    for par in 0..n_pars {
        let x_k = chain.get_param(step - 1, par);
        let mut x_s_mean = 0.0;
        for &eid in &ens_ids {
            x_s_mean += ensemble[eid][par];
        }
        x_s_mean /= s0 as f64;
        let mut w = 0.0;
        for (s, &eid) in ens_ids.iter().enumerate() {
            w += zs[s] * (ensemble[eid][par] - x_s_mean);
        }
        w /= (s0 as f64).sqrt();
        chain.set_param(step, par, x_k + w);
    }

    let ll = log_likelihood(walker_id, chain.params_at(step));
    let q = ll - prev_ll;
    let accepted = ll.is_finite() && r.ln() <= q;
    if accepted {
        chain.ll[step as usize] = ll;
    } else {
        chain.copy_step_forward(step);
        chain.ll[step as usize] = prev_ll;
    }
    accepted
}

/// Differential-evolution move. Faithfully omits the `isfinite(ll)`
/// guard the stretch and walk moves have: the reference implementation
/// doesn't check it here either, so a non-finite likelihood compares
/// false against the acceptance threshold and the proposal is
/// accepted. Replicated as-is rather than "fixed" for run-to-run
/// fidelity with the reference tool.
#[allow(clippy::too_many_arguments)]
fn differential_evolution_move(
    chain: &mut WalkerChain,
    walker_id: usize,
    step: i64,
    ensemble: &[Vec<f64>],
    c: f64,
    b: f64,
    cr: f64,
    scales: &[f64],
    rng_state: &Mutex<StdRng>,
    log_likelihood: &(dyn Fn(usize, &[f64]) -> f64 + Sync),
) -> bool {
    let n_pars = chain.n_pars;
    let c = if c < 0.0 { 2.38 / (2.0 * n_pars as f64).sqrt() } else { c };
    let prev_ll = chain.ll[(step - 1) as usize];

    let r = {
        let mut rng = rng_state.lock();
        let r = draw_uniform(&mut rng);
        let ens_w1 = draw_index(&mut rng, ensemble.len());
        let mut ens_w2 = draw_index(&mut rng, ensemble.len());
        while ens_w2 == ens_w1 && ensemble.len() > 1 {
            ens_w2 = draw_index(&mut rng, ensemble.len());
        }
        for par in 0..n_pars {
            let x_k = chain.get_param(step - 1, par);
            let cross = draw_uniform(&mut rng);
            if cross <= cr {
                let bs = b * scales[par];
                let bb = -bs + draw_uniform(&mut rng) * 2.0 * bs;
                let x_r1 = ensemble[ens_w1][par];
                let x_r2 = ensemble[ens_w2][par];
                chain.set_param(step, par, x_k + c * (x_r1 - x_r2) + bb);
            } else {
                chain.set_param(step, par, x_k);
            }
        }
        r
    };

    let ll = log_likelihood(walker_id, chain.params_at(step));
    let q = ll - prev_ll;
    let accepted = q >= r.ln();
    if accepted {
        chain.ll[step as usize] = ll;
    } else {
        chain.copy_step_forward(step);
        chain.ll[step as usize] = prev_ll;
    }
    accepted
}

/// Metropolis-Hastings move (independent chains, no ensemble
/// crossover). Like [`differential_evolution_move`], the reference
/// tool has no `isfinite` guard here.
fn metropolis_move(
    chain: &mut WalkerChain,
    walker_id: usize,
    step: i64,
    b: f64,
    scales: &[f64],
    rng_state: &Mutex<StdRng>,
    log_likelihood: &(dyn Fn(usize, &[f64]) -> f64 + Sync),
) -> bool {
    let n_pars = chain.n_pars;
    let prev_ll = chain.ll[(step - 1) as usize];

    let r = {
        let mut rng = rng_state.lock();
        let r = draw_uniform(&mut rng);
        for par in 0..n_pars {
            let x_k = chain.get_param(step - 1, par);
            let sigma = b * scales[par];
            let perturbation: f64 = rng.sample(StandardNormal);
            chain.set_param(step, par, x_k + sigma * perturbation);
        }
        r
    };

    let ll = log_likelihood(walker_id, chain.params_at(step));
    let q = ll - prev_ll;
    let accepted = q >= r.ln();
    if accepted {
        chain.ll[step as usize] = ll;
    } else {
        chain.copy_step_forward(step);
        chain.ll[step as usize] = prev_ll;
    }
    accepted
}

#[allow(clippy::too_many_arguments)]
fn run_half(
    data: &mut McData,
    sampler: Sampler,
    sampler_params: &[f64],
    scales: &[f64],
    step: i64,
    ensemble_step: i64,
    active_ids: &[usize],
    ensemble_ids: &[usize],
    rng_state: &Mutex<StdRng>,
    log_likelihood: &(dyn Fn(usize, &[f64]) -> f64 + Sync),
) -> usize {
    let ensemble_snapshot: Vec<Vec<f64>> =
        ensemble_ids.iter().map(|&id| data.chains[id].params_at(ensemble_step).to_vec()).collect();

    let active_set: HashSet<usize> = active_ids.iter().copied().collect();
    let actives: Vec<(usize, &mut WalkerChain)> =
        data.chains.iter_mut().enumerate().filter(|(idx, _)| active_set.contains(idx)).collect();

    actives
        .into_par_iter()
        .map(|(walker_id, chain)| {
            let accepted = match sampler {
                Sampler::AffineStretch => {
                    affine_stretch_move(chain, walker_id, step, &ensemble_snapshot, sampler_params[0], rng_state, log_likelihood)
                }
                Sampler::AffineWalk => {
                    affine_walk_move(chain, walker_id, step, &ensemble_snapshot, sampler_params[0] as usize, rng_state, log_likelihood)
                }
                Sampler::DifferentialEvolution => differential_evolution_move(
                    chain,
                    walker_id,
                    step,
                    &ensemble_snapshot,
                    sampler_params[0],
                    sampler_params[1],
                    sampler_params[2],
                    scales,
                    rng_state,
                    log_likelihood,
                ),
                Sampler::MetropolisHastings => metropolis_move(chain, walker_id, step, sampler_params[0], scales, rng_state, log_likelihood),
            };
            accepted as usize
        })
        .sum()
}

/// Runs the ensemble sampler from `initial_step + 1` through
/// `data.n_steps() - 1`. `data(walker, _, 0)` (or `initial_step`, for a
/// continued run) must already hold the starting ensemble.
/// `log_likelihood(walker, params)` scores one proposal; `callback(step)`
/// is invoked every `callback_interval` steps (and on the last step)
/// and returning `false` halts the run early.
#[allow(clippy::too_many_arguments)]
pub fn run_mcmc(
    sampler: Sampler,
    sampler_params: &[f64],
    scales: &[f64],
    log_likelihood: impl Fn(usize, &[f64]) -> f64 + Sync,
    data: &mut McData,
    mut callback: impl FnMut(i64) -> bool,
    callback_interval: i64,
    initial_step: i64,
    seed: u64,
) -> bool {
    let n_walkers = data.n_walkers;
    let n_steps = data.n_steps as i64;

    if initial_step == 0 {
        for walker in 0..n_walkers {
            let ll = log_likelihood(walker, data.params_at(walker, 0));
            data.set_score(walker, 0, ll);
        }
    }

    let n_ens1 = n_walkers / 2;
    let rng_state = Mutex::new(StdRng::seed_from_u64(seed));
    let mut walkers: Vec<usize> = (0..n_walkers).collect();

    for step in (initial_step + 1)..n_steps {
        {
            let mut rng = rng_state.lock();
            for idx in 0..n_walkers {
                let swp = draw_index(&mut rng, n_walkers);
                walkers.swap(idx, swp);
            }
        }

        let (half1, half2) = walkers.split_at(n_ens1);
        let half1 = half1.to_vec();
        let half2 = half2.to_vec();

        let accepted1 = run_half(data, sampler, sampler_params, scales, step, step - 1, &half1, &half2, &rng_state, &log_likelihood);
        let accepted2 = run_half(data, sampler, sampler_params, scales, step, step, &half2, &half1, &rng_state, &log_likelihood);
        data.n_accepted += accepted1 + accepted2;

        let halt = if (step - initial_step) % callback_interval == 0 || step == n_steps - 1 { !callback(step) } else { false };
        if halt {
            return false;
        }
    }
    true
}

// ============================================================================
// Generic scalar-score optimizer loop
// ============================================================================

/// One scored quantity an optimization run maximizes or minimizes a
/// weighted sum of. Mirrors `Optimization_Target` minus the
/// model-specific offsets, which belong to the caller wiring this
/// loop up to [`crate::execution`].
#[derive(Debug, Clone, Copy)]
pub struct OptimizationTarget {
    pub stat: TargetStatistic,
    pub weight: f64,
}

/// Running state of an optimization, updated after every evaluation.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerState {
    pub maximize: bool,
    pub n_evals: u64,
    pub n_timeouts: u64,
    pub initial_score: f64,
    pub best_score: f64,
}

impl OptimizerState {
    #[must_use]
    pub fn new(maximize: bool, initial_score: Option<f64>) -> Self {
        let worst = if maximize { f64::NEG_INFINITY } else { f64::INFINITY };
        let score = initial_score.unwrap_or(worst);
        OptimizerState { maximize, n_evals: 0, n_timeouts: 0, initial_score: score, best_score: score }
    }
}

/// Scores one parameter vector against a set of weighted targets.
/// `run_and_score` sets model parameters, runs the model, and returns
/// the per-target extracted statistic values, or `None` if the run
/// timed out or produced a non-finite result. `callback` is invoked
/// after every completed (non-timeout) evaluation. Mirrors
/// `Optimization_Model::evaluate`.
pub fn evaluate(
    targets: &[OptimizationTarget],
    state: &mut OptimizerState,
    run_and_score: impl FnOnce() -> Option<Vec<f64>>,
    callback: impl FnOnce(u64, u64, f64, f64),
) -> f64 {
    let worst = if state.maximize { f64::NEG_INFINITY } else { f64::INFINITY };

    let Some(target_values) = run_and_score() else {
        state.n_timeouts += 1;
        return worst;
    };

    let agg: f64 = targets.iter().zip(target_values.iter()).map(|(t, v)| t.weight * v).sum();
    state.best_score = if state.maximize { state.best_score.max(agg) } else { state.best_score.min(agg) };
    state.n_evals += 1;
    callback(state.n_evals, state.n_timeouts, state.initial_score, state.best_score);
    agg
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 2-D Gaussian log-likelihood centered at the origin, used as a
    /// deterministic target for sampler tests.
    fn gaussian_ll(params: &[f64]) -> f64 {
        -0.5 * params.iter().map(|p| p * p).sum::<f64>()
    }

    fn seed_initial_ensemble(data: &mut McData, n_walkers: usize, n_pars: usize) {
        for walker in 0..n_walkers {
            for par in 0..n_pars {
                let spread = 0.1 * (walker as f64 - n_walkers as f64 / 2.0) + 0.05 * par as f64;
                data.set(walker, par, 0, spread);
            }
        }
    }

    #[test]
    fn affine_stretch_sampler_runs_and_produces_finite_chain() {
        let n_walkers = 8;
        let n_pars = 2;
        let n_steps = 20;
        let mut data = McData::new(n_walkers, n_pars, n_steps);
        seed_initial_ensemble(&mut data, n_walkers, n_pars);

        let completed = run_mcmc(
            Sampler::AffineStretch,
            &[2.0],
            &[1.0, 1.0],
            |_walker, params| gaussian_ll(params),
            &mut data,
            |_step| true,
            5,
            0,
            42,
        );

        assert!(completed);
        for walker in 0..n_walkers {
            for step in 0..n_steps as i64 {
                assert!(data.score(walker, step).is_finite());
            }
        }
    }

    #[test]
    fn mcmc_run_is_deterministic_given_a_seed() {
        let run = |seed: u64| {
            let mut data = McData::new(6, 2, 10);
            seed_initial_ensemble(&mut data, 6, 2);
            run_mcmc(Sampler::AffineStretch, &[2.0], &[1.0, 1.0], |_w, p| gaussian_ll(p), &mut data, |_| true, 3, 0, seed);
            data
        };
        let a = run(7);
        let b = run(7);
        for walker in 0..6 {
            for step in 0..10 {
                assert_eq!(a.score(walker, step as i64), b.score(walker, step as i64));
            }
        }
    }

    #[test]
    fn callback_returning_false_halts_the_run_early() {
        let mut data = McData::new(6, 2, 50);
        seed_initial_ensemble(&mut data, 6, 2);
        let mut steps_seen = 0;
        let completed = run_mcmc(
            Sampler::MetropolisHastings,
            &[0.3],
            &[1.0, 1.0],
            |_w, p| gaussian_ll(p),
            &mut data,
            |_step| {
                steps_seen += 1;
                steps_seen < 3
            },
            1,
            0,
            1,
        );
        assert!(!completed);
        assert_eq!(steps_seen, 3);
    }

    #[test]
    fn differential_evolution_move_accepts_or_resets_every_parameter() {
        let mut data = McData::new(6, 2, 5);
        seed_initial_ensemble(&mut data, 6, 2);
        run_mcmc(Sampler::DifferentialEvolution, &[-1.0, 0.5, 0.9], &[1.0, 1.0], |_w, p| gaussian_ll(p), &mut data, |_| true, 2, 0, 3);
        for walker in 0..6 {
            for step in 0..5 {
                for par in 0..2 {
                    assert!(data.get(walker, par, step as i64).is_finite());
                }
            }
        }
    }

    #[test]
    fn map_index_finds_the_highest_likelihood_sample() {
        let mut data = McData::new(3, 1, 4);
        data.set_score(0, 0, -5.0);
        data.set_score(1, 0, -1.0);
        data.set_score(2, 0, -3.0);
        let (walker, step) = data.map_index(0, 0);
        assert_eq!(walker, 1);
        assert_eq!(step, 0);
    }

    #[test]
    fn optimizer_evaluate_tracks_best_score_for_maximize() {
        let targets = vec![OptimizationTarget { stat: TargetStatistic::NashSutcliffe, weight: 1.0 }];
        let mut state = OptimizerState::new(true, None);

        let score1 = evaluate(&targets, &mut state, || Some(vec![0.5]), |_, _, _, _| {});
        assert_eq!(score1, 0.5);
        assert_eq!(state.best_score, 0.5);

        let score2 = evaluate(&targets, &mut state, || Some(vec![0.8]), |_, _, _, _| {});
        assert_eq!(score2, 0.8);
        assert_eq!(state.best_score, 0.8);

        let score3 = evaluate(&targets, &mut state, || Some(vec![0.2]), |_, _, _, _| {});
        assert_eq!(score3, 0.2);
        assert_eq!(state.best_score, 0.8);
        assert_eq!(state.n_evals, 3);
    }

    #[test]
    fn optimizer_evaluate_counts_timeouts_as_worst_score_without_updating_best() {
        let targets = vec![OptimizationTarget { stat: TargetStatistic::Rmse, weight: 1.0 }];
        let mut state = OptimizerState::new(false, Some(2.0));

        let score = evaluate(&targets, &mut state, || None, |_, _, _, _| {});
        assert_eq!(score, f64::INFINITY);
        assert_eq!(state.n_timeouts, 1);
        assert_eq!(state.best_score, 2.0);
    }
}

//! Statistics & Residuals (C13): time-series summary statistics and
//! simulated-vs-observed goodness-of-fit measures, used both to report
//! on a finished run and to score candidate parameter sets inside the
//! optimizer ([`crate::mcmc`]).
//!
//! Grounded in `support/statistics.cpp`/`.h`. That file is the
//! compiled ground truth; in particular [`median_of_sorted`] is kept
//! bit-for-bit faithful to it, including its even-length case, which
//! averages the two elements *after* the midpoint (`data[n/2]` and
//! `data[n/2 + 1]`) rather than the textbook pair straddling the
//! midpoint. A "corrected" median would silently diverge from the
//! reference tool's published run outputs, which matters more here
//! than textbook correctness.

use std::collections::HashSet;

/// Mirrors `Statistics_Settings`: the default percentile set the
/// reference tool reports, and the Eckhardt baseflow filter parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticsSettings {
    pub percentiles: Vec<f64>,
    pub eckhardt_filter_param: f64,
}

impl Default for StatisticsSettings {
    fn default() -> Self {
        StatisticsSettings {
            percentiles: vec![2.5, 5.0, 15.0, 25.0, 50.0, 75.0, 85.0, 95.0, 97.5],
            eckhardt_filter_param: 0.925,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesStats {
    pub percentiles: Vec<f64>,
    pub sum: f64,
    pub mean: f64,
    pub variance: f64,
    pub standard_dev: f64,
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub flashiness: f64,
    pub est_bfi: f64,
    pub initial_value: f64,
    pub data_points: i64,
    pub initialized: bool,
}

impl TimeSeriesStats {
    fn nan(percentile_count: usize) -> Self {
        let nan = f64::NAN;
        TimeSeriesStats {
            percentiles: vec![nan; percentile_count],
            sum: 0.0,
            mean: nan,
            variance: nan,
            standard_dev: nan,
            min: nan,
            max: nan,
            median: nan,
            flashiness: nan,
            est_bfi: nan,
            initial_value: nan,
            data_points: 0,
            initialized: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResidualStats {
    pub mean_error: f64,
    pub mae: f64,
    pub rmse: f64,
    pub ns: f64,
    pub log_ns: f64,
    pub r2: f64,
    pub idx_agr: f64,
    pub kge: f64,
    pub srcc: f64,
    pub min_error: f64,
    pub max_error: f64,
    pub data_points: i64,
    pub initialized: bool,
}

impl ResidualStats {
    fn nan() -> Self {
        let nan = f64::NAN;
        ResidualStats {
            mean_error: nan,
            mae: nan,
            rmse: nan,
            ns: nan,
            log_ns: nan,
            r2: nan,
            idx_agr: nan,
            kge: nan,
            srcc: nan,
            min_error: nan,
            max_error: nan,
            data_points: 0,
            initialized: true,
        }
    }
}

/// Non-interpolated quantile: `ceil(q * (n-1))`-th element of a sorted
/// slice. `q` is a fraction in `[0, 1]`.
#[must_use]
pub fn quantile_of_sorted(sorted: &[f64], q: f64) -> f64 {
    let idx = ((q * (sorted.len() - 1) as f64).ceil()) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Median of a sorted slice, reproducing the reference tool's exact
/// (non-textbook) even-length formula. See the module doc comment.
/// That formula reads `data[idx + 1]` for `idx = size / 2`, which is
/// out of bounds in the degenerate two-element case; this clamps the
/// second index to the last element rather than panicking there.
#[must_use]
pub fn median_of_sorted(sorted: &[f64]) -> f64 {
    let idx = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        let hi = (idx + 1).min(sorted.len() - 1);
        0.5 * (sorted[idx] + sorted[hi])
    } else {
        sorted[idx]
    }
}

/// Computes summary statistics over one time series, skipping
/// non-finite samples. `series[0]` is treated as the initial value,
/// matching the reference tool reading one step before `ts_begin`;
/// callers that don't have a true "step -1" value should pass the
/// series's own first entry twice (as both the leading sample and the
/// initial value) or construct the slice accordingly.
#[must_use]
pub fn compute_time_series_stats(series: &[f64], initial_value: f64, settings: &StatisticsSettings) -> TimeSeriesStats {
    let mut sum = 0.0_f64;
    let mut sum_abs_diff = 0.0_f64;
    let mut finite_count: i64 = 0;
    let ef = settings.eckhardt_filter_param;

    let mut sorted_data = Vec::with_capacity(series.len());
    let mut prev: Option<f64> = None;
    let mut prev_bf = 0.0_f64;
    let mut sum_bf = 0.0_f64;

    for &val in series {
        if val.is_finite() {
            sorted_data.push(val);
            sum += val;
            let mut bf = 0.0;
            if let Some(p) = prev {
                if p.is_finite() {
                    sum_abs_diff += (val - p).abs();
                    bf = val.min(ef * prev_bf + 0.5 * (1.0 - ef) * (p + val));
                    sum_bf += bf;
                }
            }
            prev_bf = bf;
            finite_count += 1;
        } else {
            prev_bf = 0.0;
        }
        prev = Some(val);
    }

    if finite_count == 0 {
        return TimeSeriesStats::nan(settings.percentiles.len());
    }

    sorted_data.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mean = sum / finite_count as f64;
    let mut variance = 0.0_f64;
    for &val in &sorted_data {
        let dev = mean - val;
        variance += dev * dev;
    }
    variance /= finite_count as f64;

    let percentiles = settings.percentiles.iter().map(|p| quantile_of_sorted(&sorted_data, p * 0.01)).collect();

    TimeSeriesStats {
        percentiles,
        sum,
        mean,
        variance,
        standard_dev: variance.sqrt(),
        min: sorted_data[0],
        max: sorted_data[sorted_data.len() - 1],
        median: median_of_sorted(&sorted_data),
        flashiness: sum_abs_diff / sum,
        est_bfi: sum_bf / sum,
        initial_value,
        data_points: finite_count,
        initialized: true,
    }
}

/// Computes goodness-of-fit statistics between simulated and observed
/// series of equal length, counting only indices where both are
/// finite. `compute_rcc` toggles the `O(n log n)` Spearman rank
/// correlation pass, skipped by default since it isn't needed by most
/// optimization targets.
#[must_use]
pub fn compute_residual_stats(sim: &[f64], obs: &[f64], compute_rcc: bool) -> ResidualStats {
    assert_eq!(sim.len(), obs.len(), "simulated and observed series must have equal length");

    let mut sum = 0.0_f64;
    let mut sum_abs = 0.0_f64;
    let mut sum_sq = 0.0_f64;
    let mut finite_count: i64 = 0;

    let mut sum_sim = 0.0_f64;
    let mut sum_obs = 0.0_f64;
    let mut sum_log_obs = 0.0_f64;
    let mut sum_log_sq = 0.0_f64;

    let mut min = f64::MAX;
    let mut max = f64::MIN;

    let mut finite_obs = Vec::new();
    let mut finite_sim = Vec::new();
    if compute_rcc {
        finite_obs.reserve(sim.len());
        finite_sim.reserve(sim.len());
    }

    for (&o, &s) in obs.iter().zip(sim.iter()) {
        if o.is_finite() && s.is_finite() {
            let val = o - s;
            sum += val;
            sum_abs += val.abs();
            sum_sq += val * val;
            min = min.min(val);
            max = max.max(val);
            sum_obs += o;
            sum_sim += s;
            sum_log_obs += o.ln();
            let log_res = o.ln() - s.ln();
            sum_log_sq += log_res * log_res;
            finite_count += 1;
            if compute_rcc {
                finite_obs.push(o);
                finite_sim.push(s);
            }
        }
    }

    if finite_count == 0 {
        return ResidualStats::nan();
    }

    let fc = finite_count as f64;
    let mean_obs = sum_obs / fc;
    let mean_sim = sum_sim / fc;
    let mean_log_obs = sum_log_obs / fc;

    let mut ss_obs = 0.0_f64;
    let mut ss_sim = 0.0_f64;
    let mut cov = 0.0_f64;
    let mut ss_log_obs = 0.0_f64;
    let mut agr_denom = 0.0_f64;

    for (&o, &s) in obs.iter().zip(sim.iter()) {
        if o.is_finite() && s.is_finite() {
            ss_obs += (o - mean_obs) * (o - mean_obs);
            ss_sim += (s - mean_sim) * (s - mean_sim);
            cov += (o - mean_obs) * (s - mean_sim);
            ss_log_obs += (o.ln() - mean_log_obs) * (o.ln() - mean_log_obs);
            let agr = (s - mean_sim).abs() + (o - mean_obs).abs();
            agr_denom += agr * agr;
        }
    }
    cov /= fc;

    let std_obs = (ss_obs / fc).sqrt();
    let std_sim = (ss_sim / fc).sqrt();
    let cvar_obs = std_obs / mean_obs;
    let cvar_sim = std_sim / mean_sim;
    let beta = mean_sim / mean_obs;
    let delta = cvar_sim / cvar_obs;
    let rr = cov / (std_obs * std_sim);

    let srcc = if compute_rcc {
        spearman_rank_correlation(&finite_obs, &finite_sim)
    } else {
        f64::NAN
    };

    ResidualStats {
        mean_error: sum / fc,
        mae: sum_abs / fc,
        rmse: (sum_sq / fc).sqrt(),
        ns: 1.0 - sum_sq / ss_obs,
        log_ns: 1.0 - sum_log_sq / ss_log_obs,
        r2: rr * rr,
        idx_agr: sum_sq / agr_denom,
        kge: 1.0 - ((rr - 1.0).powi(2) + (beta - 1.0).powi(2) + (delta - 1.0).powi(2)).sqrt(),
        srcc,
        min_error: min,
        max_error: max,
        data_points: finite_count,
        initialized: true,
    }
}

fn spearman_rank_correlation(obs: &[f64], sim: &[f64]) -> f64 {
    let n = obs.len();
    let rank_of = |values: &[f64]| -> Vec<usize> {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&i1, &i2| values[i1].partial_cmp(&values[i2]).unwrap());
        let mut rank = vec![0usize; n];
        for (pos, &idx) in order.iter().enumerate() {
            rank[idx] = pos + 1;
        }
        rank
    };
    let rank_obs = rank_of(obs);
    let rank_sim = rank_of(sim);

    let mut ss_rank_diff = 0.0_f64;
    for idx in 0..n {
        let diff = rank_obs[idx] as f64 - rank_sim[idx] as f64;
        ss_rank_diff += diff * diff;
    }
    let fc = n as f64;
    1.0 - 6.0 * ss_rank_diff / (fc * (fc * fc - 1.0))
}

/// Target statistic kinds an optimizer run can score against, keyed by
/// the residual or time-series field they pull from. Mirrors the
/// handful of `Stat_Class` members the reference tool's
/// `evaluate_target` dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetStatistic {
    MeanError,
    Mae,
    Rmse,
    NashSutcliffe,
    LogNashSutcliffe,
    RSquared,
    IndexOfAgreement,
    KlingGupta,
    SpearmanRank,
}

impl TargetStatistic {
    /// Whether a higher value of this statistic is a better fit. Only
    /// the error magnitudes (`Mae`, `Rmse`) are minimized; the rest are
    /// efficiency/correlation measures that should be maximized.
    #[must_use]
    pub fn maximize(self) -> bool {
        !matches!(self, TargetStatistic::Mae | TargetStatistic::Rmse)
    }

    #[must_use]
    pub fn extract(self, stats: &ResidualStats) -> f64 {
        match self {
            TargetStatistic::MeanError => stats.mean_error,
            TargetStatistic::Mae => stats.mae,
            TargetStatistic::Rmse => stats.rmse,
            TargetStatistic::NashSutcliffe => stats.ns,
            TargetStatistic::LogNashSutcliffe => stats.log_ns,
            TargetStatistic::RSquared => stats.r2,
            TargetStatistic::IndexOfAgreement => stats.idx_agr,
            TargetStatistic::KlingGupta => stats.kge,
            TargetStatistic::SpearmanRank => stats.srcc,
        }
    }

    /// Whether this target needs the Spearman rank-correlation pass,
    /// which `compute_residual_stats` otherwise skips for performance.
    #[must_use]
    pub fn needs_rcc(self) -> bool {
        self == TargetStatistic::SpearmanRank
    }
}

/// Convenience used by the optimizer to decide, for a batch of
/// targets sharing one simulated/observed pair, whether the rank
/// correlation pass is worth paying for.
#[must_use]
pub fn any_target_needs_rcc(targets: &[TargetStatistic]) -> bool {
    let set: HashSet<TargetStatistic> = targets.iter().copied().collect();
    set.contains(&TargetStatistic::SpearmanRank)
}

impl std::hash::Hash for TargetStatistic {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        (*self as u8).hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantile_of_sorted_matches_ceil_index_convention() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(quantile_of_sorted(&data, 0.0), 1.0);
        assert_eq!(quantile_of_sorted(&data, 1.0), 5.0);
        // ceil(0.5 * 4) = 2 -> data[2] = 3.0
        assert_eq!(quantile_of_sorted(&data, 0.5), 3.0);
    }

    #[test]
    fn median_of_sorted_odd_length_is_middle_element() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(median_of_sorted(&data), 3.0);
    }

    #[test]
    fn median_of_sorted_even_length_matches_reference_formula() {
        // size = 4, idx = 2 -> averages data[2], data[3], not the
        // textbook middle pair data[1], data[2].
        let data = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(median_of_sorted(&data), 0.5 * (3.0 + 4.0));
    }

    #[test]
    fn time_series_stats_with_no_finite_samples_is_all_nan() {
        let settings = StatisticsSettings::default();
        let stats = compute_time_series_stats(&[f64::NAN, f64::NAN], f64::NAN, &settings);
        assert_eq!(stats.data_points, 0);
        assert!(stats.mean.is_nan());
        assert!(stats.percentiles.iter().all(|p| p.is_nan()));
    }

    #[test]
    fn time_series_stats_basic_moments() {
        let settings = StatisticsSettings::default();
        let series = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let stats = compute_time_series_stats(&series, 1.0, &settings);
        assert_eq!(stats.data_points, 5);
        assert!((stats.mean - 3.0).abs() < 1e-12);
        assert!((stats.min - 1.0).abs() < 1e-12);
        assert!((stats.max - 5.0).abs() < 1e-12);
        assert!((stats.median - 3.0).abs() < 1e-12);
    }

    #[test]
    fn nan_samples_are_skipped_in_moments() {
        let settings = StatisticsSettings::default();
        let series = vec![1.0, f64::NAN, 3.0];
        let stats = compute_time_series_stats(&series, 1.0, &settings);
        assert_eq!(stats.data_points, 2);
        assert!((stats.mean - 2.0).abs() < 1e-12);
    }

    /// A residual series with known values should reproduce textbook
    /// Nash-Sutcliffe efficiency and RMSE to high precision.
    #[test]
    fn residual_stats_reproduce_textbook_nse_and_rmse() {
        let obs = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sim = vec![1.1, 1.9, 3.2, 3.8, 5.1];

        let stats = compute_residual_stats(&sim, &obs, false);

        let mean_obs = 3.0;
        let ss_obs: f64 = obs.iter().map(|o| (o - mean_obs).powi(2)).sum();
        let sum_sq: f64 = obs.iter().zip(sim.iter()).map(|(o, s)| (o - s).powi(2)).sum();
        let expected_ns = 1.0 - sum_sq / ss_obs;
        let expected_rmse = (sum_sq / 5.0).sqrt();

        assert!((stats.ns - expected_ns).abs() < 1e-9);
        assert!((stats.rmse - expected_rmse).abs() < 1e-9);
        assert_eq!(stats.data_points, 5);
    }

    #[test]
    fn residual_stats_perfect_fit_has_ns_one_and_rmse_zero() {
        let obs = vec![1.0, 2.0, 3.0, 4.0];
        let stats = compute_residual_stats(&obs, &obs, false);
        assert!((stats.ns - 1.0).abs() < 1e-12);
        assert!(stats.rmse.abs() < 1e-12);
        assert!(stats.mae.abs() < 1e-12);
    }

    #[test]
    fn residual_stats_skips_non_finite_pairs() {
        let obs = vec![1.0, 2.0, f64::NAN, 4.0];
        let sim = vec![1.0, 2.0, 3.0, f64::NAN];
        let stats = compute_residual_stats(&sim, &obs, false);
        assert_eq!(stats.data_points, 2);
    }

    #[test]
    fn spearman_rank_correlation_is_one_for_monotonic_series() {
        let obs = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let sim = vec![10.0, 20.0, 30.0, 40.0, 50.0];
        let stats = compute_residual_stats(&sim, &obs, true);
        assert!((stats.srcc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn target_statistic_maximize_flags() {
        assert!(!TargetStatistic::Mae.maximize());
        assert!(!TargetStatistic::Rmse.maximize());
        assert!(TargetStatistic::NashSutcliffe.maximize());
        assert!(TargetStatistic::KlingGupta.maximize());
    }

    #[test]
    fn any_target_needs_rcc_detects_spearman() {
        assert!(!any_target_needs_rcc(&[TargetStatistic::Mae, TargetStatistic::Rmse]));
        assert!(any_target_needs_rcc(&[TargetStatistic::Mae, TargetStatistic::SpearmanRank]));
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::allocation::compute_effective_parameters;
use super::cashflow::{CashFlowPlan, resolve_cash_flow};
use super::error::SimulationError;
use super::returns::generate_annual_returns;
use super::types::{
    AggregateResult, DepletionSummary, EffectiveParameters, PercentilePath, SimulatedPath,
    SimulationConfig, StressScenario, YearBand,
};

/// Rank quantiles into the descending-by-final-value order, paired with the
/// percentile label each representative path is reported under.
const PERCENTILE_RANKS: [(u32, f64); 5] = [(95, 0.05), (75, 0.25), (50, 0.50), (25, 0.75), (5, 0.95)];

#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PathSpec<'a> {
    pub horizon: u32,
    pub starting_balance: f64,
    pub params: &'a EffectiveParameters,
    pub scenario: Option<&'a StressScenario>,
    pub cash_flow: CashFlowPlan<'a>,
}

impl<'a> PathSpec<'a> {
    pub fn from_config(config: &'a SimulationConfig, params: &'a EffectiveParameters) -> Self {
        Self {
            horizon: config.horizon,
            starting_balance: config.starting_balance,
            params,
            scenario: config.stress_scenario.as_ref(),
            cash_flow: CashFlowPlan::from_config(config),
        }
    }
}

pub fn run_simulation(config: &SimulationConfig) -> Result<AggregateResult, SimulationError> {
    run_simulation_with_cancel(config, &CancelToken::new())
}

/// Runs `trial_count` independent paths across the rayon pool and reduces
/// them. Each trial seeds its own generator from `(seed, trial)`, and paths
/// are collected in trial order, so a fixed seed reproduces the result
/// bit-for-bit regardless of thread count.
pub fn run_simulation_with_cancel(
    config: &SimulationConfig,
    cancel: &CancelToken,
) -> Result<AggregateResult, SimulationError> {
    config.validate()?;
    let params = compute_effective_parameters(
        &config.allocation,
        &config.profiles,
        &config.correlation,
        config.rebalance,
    )?;
    // Bracket lookup expects ascending thresholds.
    let mut taxes = config.taxes.clone();
    taxes.sort_brackets();
    let mut spec = PathSpec::from_config(config, &params);
    spec.cash_flow.taxes = &taxes;

    debug!(
        trials = config.trial_count,
        horizon = config.horizon,
        expected_return = params.expected_return,
        volatility = params.volatility,
        scenario = config.stress_scenario.as_ref().map(|s| s.key.as_str()),
        "starting monte carlo run"
    );

    let completed = AtomicU32::new(0);
    let paths = (0..config.trial_count)
        .into_par_iter()
        .map(|trial| {
            if cancel.is_cancelled() {
                return None;
            }
            let mut rng = ChaCha20Rng::seed_from_u64(derive_seed(config.seed, trial));
            let path = simulate_path(&spec, &mut rng);
            completed.fetch_add(1, Ordering::Relaxed);
            Some(path)
        })
        .collect::<Option<Vec<_>>>();

    let Some(paths) = paths else {
        let completed = completed.load(Ordering::Relaxed);
        warn!(
            completed,
            requested = config.trial_count,
            "monte carlo run cancelled"
        );
        return Err(SimulationError::Cancelled {
            completed,
            requested: config.trial_count,
        });
    };

    let result = aggregate_paths(config, params, &paths);
    debug!(
        success_rate = result.success_rate,
        median_final = result.median_final,
        depleted = result.depletion.depleted_paths,
        "monte carlo run complete"
    );
    Ok(result)
}

/// One trajectory: each year applies the cash flow against the opening
/// balance, then the year's market return. Depletion is absorbing.
pub fn simulate_path<R: Rng + ?Sized>(spec: &PathSpec<'_>, rng: &mut R) -> SimulatedPath {
    let horizon = spec.horizon as usize;
    let returns = generate_annual_returns(spec.horizon, spec.params, spec.scenario, rng);

    let mut values = Vec::with_capacity(horizon + 1);
    let mut cash_flows = Vec::with_capacity(horizon);
    let mut depletion_year = None;
    let mut balance = spec.starting_balance;
    values.push(balance);

    for (idx, &annual_return) in returns.iter().enumerate() {
        if depletion_year.is_some() {
            cash_flows.push(0.0);
            values.push(0.0);
            continue;
        }

        let year = idx as u32 + 1;
        let opening = balance;
        let cash_flow = resolve_cash_flow(&spec.cash_flow, year, balance);
        balance = (balance + cash_flow) * (1.0 + annual_return / 100.0);

        // A path that opens at zero has nothing to lose, so only a drop from
        // a positive balance (or below zero) counts as depletion.
        if balance < 0.0 || (balance <= 0.0 && opening > 0.0) {
            depletion_year = Some(year);
        }
        if balance <= 0.0 {
            balance = 0.0;
        }

        cash_flows.push(cash_flow);
        values.push(balance);
    }

    SimulatedPath {
        final_value: balance,
        depleted: depletion_year.is_some(),
        depletion_year,
        values,
        cash_flows,
        returns,
    }
}

pub fn aggregate_paths(
    config: &SimulationConfig,
    effective: EffectiveParameters,
    paths: &[SimulatedPath],
) -> AggregateResult {
    let n = paths.len();
    let horizon = config.horizon as usize;

    let survivors = paths.iter().filter(|p| !p.depleted).count();
    let success_rate = if n == 0 {
        0.0
    } else {
        100.0 * survivors as f64 / n as f64
    };

    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| paths[b].final_value.total_cmp(&paths[a].final_value));
    let percentile_paths = if n == 0 {
        Vec::new()
    } else {
        PERCENTILE_RANKS
            .iter()
            .map(|&(percentile, quantile)| {
                let trial = order[rank_index(n, quantile)];
                PercentilePath {
                    percentile,
                    trial,
                    path: paths[trial].clone(),
                }
            })
            .collect()
    };

    let mut finals = paths.iter().map(|p| p.final_value).collect::<Vec<_>>();
    finals.sort_by(|a, b| a.total_cmp(b));
    let ranked = |quantile: f64| {
        if finals.is_empty() {
            0.0
        } else {
            finals[rank_index(n, quantile)]
        }
    };
    let percentile10_final = ranked(0.10);
    let percentile90_final = ranked(0.90);
    let median_final = finals.get(n / 2).copied().unwrap_or(0.0);

    let outcome_range = percentile90_final - percentile10_final;
    let relative_predictability = if outcome_range <= 0.0 {
        1.0
    } else if config.starting_balance > 0.0 {
        1.0 - outcome_range / config.starting_balance
    } else {
        0.0
    };

    let realized_volatility = (0..horizon)
        .map(|year_idx| {
            let year_returns = paths
                .iter()
                .filter_map(|p| p.returns.get(year_idx).copied())
                .collect::<Vec<_>>();
            population_std_dev(&year_returns)
        })
        .collect();

    let (total_saved, total_withdrawn) = paths
        .first()
        .map(|first| {
            first.cash_flows.iter().fold((0.0, 0.0), |(saved, withdrawn), &flow| {
                if flow > 0.0 {
                    (saved + flow, withdrawn)
                } else {
                    (saved, withdrawn - flow)
                }
            })
        })
        .unwrap_or((0.0, 0.0));

    let peak_value = paths
        .iter()
        .flat_map(|p| p.values.iter().copied())
        .fold(0.0_f64, f64::max);

    AggregateResult {
        trial_count: n as u32,
        horizon: config.horizon,
        effective,
        success_rate,
        median_final,
        percentile10_final,
        percentile90_final,
        outcome_range,
        relative_predictability,
        percentile_paths,
        realized_volatility,
        total_saved,
        total_withdrawn,
        peak_value,
        year_bands: year_bands(paths, horizon),
        depletion: depletion_summary(paths, horizon),
    }
}

fn year_bands(paths: &[SimulatedPath], horizon: usize) -> Vec<YearBand> {
    (0..=horizon)
        .map(|year_idx| {
            let mut values = paths
                .iter()
                .filter_map(|p| p.values.get(year_idx).copied())
                .collect::<Vec<_>>();
            YearBand {
                year: year_idx as u32,
                p5: percentile(&mut values, 5.0),
                p25: percentile(&mut values, 25.0),
                p50: percentile(&mut values, 50.0),
                p75: percentile(&mut values, 75.0),
                p95: percentile(&mut values, 95.0),
            }
        })
        .collect()
}

fn depletion_summary(paths: &[SimulatedPath], horizon: usize) -> DepletionSummary {
    let mut years = paths
        .iter()
        .filter_map(|p| p.depletion_year)
        .collect::<Vec<_>>();
    years.sort_unstable();

    let n = paths.len().max(1) as f64;
    let cumulative_rate_by_year = (1..=horizon as u32)
        .map(|year| {
            let depleted_by = years.partition_point(|&y| y <= year);
            100.0 * depleted_by as f64 / n
        })
        .collect();

    DepletionSummary {
        depleted_paths: years.len() as u32,
        earliest_year: years.first().copied(),
        median_year: years.get(years.len() / 2).copied(),
        cumulative_rate_by_year,
    }
}

fn rank_index(n: usize, quantile: f64) -> usize {
    ((n as f64 * quantile).floor() as usize).min(n.saturating_sub(1))
}

fn population_std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
    variance.sqrt()
}

fn derive_seed(base_seed: u64, trial: u32) -> u64 {
    let mixed = base_seed ^ ((trial as u64) << 32) ^ trial as u64;
    splitmix64(mixed)
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

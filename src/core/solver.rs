use serde::Serialize;

use super::engine::run_simulation;
use super::error::SimulationError;
use super::types::{SimulationConfig, WithdrawalPeriod};

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GoalType {
    /// Largest multiplier on every withdrawal period that still meets the target.
    MaxWithdrawal,
    /// Smallest accumulation-phase savings rate that meets the target.
    RequiredSavingsRate,
}

#[derive(Debug, Clone, Copy)]
pub struct GoalSolveConfig {
    pub goal_type: GoalType,
    /// Percent, comparable to `AggregateResult::success_rate`.
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
    pub trials_per_iteration: u32,
    pub final_trials: u32,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveIteration {
    pub iteration: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_value: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSolveResult {
    pub goal_type: GoalType,
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    pub solved_value: Option<f64>,
    pub solved_withdrawals: Option<Vec<WithdrawalPeriod>>,
    pub achieved_success_rate: Option<f64>,
    pub achieved_success_ci_half_width: Option<f64>,
    pub iterations: Vec<GoalSolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

#[derive(Debug, Clone, Copy)]
struct CandidateEval {
    success_rate: f64,
    success_ci_half_width: f64,
}

impl CandidateEval {
    fn meets(self, target: f64) -> bool {
        self.success_rate + 1e-12 >= target
    }
}

/// Bisects the goal's scalar until the success rate crosses the target.
///
/// Success rate is monotone in both goals (more withdrawal hurts, more
/// saving helps), so each goal keeps the feasible side of the bracket.
pub fn solve_goal(
    base: &SimulationConfig,
    config: GoalSolveConfig,
) -> Result<GoalSolveResult, SimulationError> {
    validate_config(base, config)?;
    // Surface plain config errors before spending trials.
    base.validate()?;

    // Feasibility rises with the candidate for savings and falls for withdrawals.
    let feasible_high = config.goal_type == GoalType::RequiredSavingsRate;

    let mut iterations = Vec::with_capacity(config.max_iterations as usize);
    let low_eval = evaluate_candidate(base, config, config.search_min, config.trials_per_iteration)?;
    let high_eval =
        evaluate_candidate(base, config, config.search_max, config.trials_per_iteration)?;
    let target = config.target_success_rate;

    let mut solved_value = None;
    let mut converged = false;
    let feasible;
    let message;

    let (best_bound, other_bound) = if feasible_high {
        (low_eval, high_eval)
    } else {
        (high_eval, low_eval)
    };

    if best_bound.meets(target) {
        // The most ambitious end of the bracket already works.
        solved_value = Some(if feasible_high {
            config.search_min
        } else {
            config.search_max
        });
        converged = true;
        feasible = true;
        message = match config.goal_type {
            GoalType::RequiredSavingsRate => {
                "Already meets target at lower savings-rate bound.".to_string()
            }
            GoalType::MaxWithdrawal => {
                "Upper withdrawal bound is still feasible; increase search max.".to_string()
            }
        };
    } else if !other_bound.meets(target) {
        feasible = false;
        message = match config.goal_type {
            GoalType::RequiredSavingsRate => {
                "No feasible savings rate found within the search bounds.".to_string()
            }
            GoalType::MaxWithdrawal => {
                "No feasible withdrawal level found within the search bounds.".to_string()
            }
        };
    } else {
        let mut lo = config.search_min;
        let mut hi = config.search_max;
        let mut it = 0;
        while it < config.max_iterations {
            it += 1;
            let mid = (lo + hi) * 0.5;
            let eval = evaluate_candidate(base, config, mid, config.trials_per_iteration)?;
            iterations.push(GoalSolveIteration {
                iteration: it,
                lower_bound: lo,
                upper_bound: hi,
                candidate_value: mid,
                success_rate: eval.success_rate,
                success_ci_half_width: eval.success_ci_half_width,
            });

            match (eval.meets(target), feasible_high) {
                (true, true) | (false, false) => hi = mid,
                (true, false) | (false, true) => lo = mid,
            }

            if (hi - lo).abs() <= config.tolerance {
                converged = true;
                break;
            }
        }
        solved_value = Some(if feasible_high { hi } else { lo });
        feasible = true;
        message = if converged {
            match config.goal_type {
                GoalType::RequiredSavingsRate => "Solved required savings rate.".to_string(),
                GoalType::MaxWithdrawal => "Solved maximum sustainable withdrawal.".to_string(),
            }
        } else {
            "Reached max iterations before tolerance was met; returning best estimate.".to_string()
        };
    }

    let mut achieved_success_rate = None;
    let mut achieved_success_ci_half_width = None;
    let mut solved_withdrawals = None;
    if let Some(value) = solved_value {
        let final_eval = evaluate_candidate(base, config, value, config.final_trials)?;
        achieved_success_rate = Some(final_eval.success_rate);
        achieved_success_ci_half_width = Some(final_eval.success_ci_half_width);
        if config.goal_type == GoalType::MaxWithdrawal {
            solved_withdrawals = Some(scaled_withdrawals(&base.withdrawals, value));
        }
    }

    Ok(GoalSolveResult {
        goal_type: config.goal_type,
        target_success_rate: config.target_success_rate,
        search_min: config.search_min,
        search_max: config.search_max,
        tolerance: config.tolerance,
        solved_value,
        solved_withdrawals,
        achieved_success_rate,
        achieved_success_ci_half_width,
        iterations,
        converged,
        feasible,
        message,
    })
}

fn evaluate_candidate(
    base: &SimulationConfig,
    config: GoalSolveConfig,
    candidate_value: f64,
    trials: u32,
) -> Result<CandidateEval, SimulationError> {
    let mut candidate = base.clone();
    candidate.trial_count = trials.max(1);

    match config.goal_type {
        GoalType::MaxWithdrawal => {
            candidate.withdrawals = scaled_withdrawals(&base.withdrawals, candidate_value);
        }
        GoalType::RequiredSavingsRate => {
            candidate.savings.savings_rate = candidate_value;
        }
    }

    let result = run_simulation(&candidate)?;
    Ok(CandidateEval {
        success_rate: result.success_rate,
        success_ci_half_width: binomial_ci_half_width(result.success_rate, candidate.trial_count),
    })
}

fn scaled_withdrawals(periods: &[WithdrawalPeriod], scale: f64) -> Vec<WithdrawalPeriod> {
    let scale = scale.max(0.0);
    periods
        .iter()
        .map(|p| WithdrawalPeriod {
            annual_amount: p.annual_amount * scale,
            ..p.clone()
        })
        .collect()
}

/// 95% normal-approximation half-width, in percentage points.
fn binomial_ci_half_width(success_rate: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = (success_rate / 100.0).clamp(0.0, 1.0);
    100.0 * 1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn validate_config(base: &SimulationConfig, config: GoalSolveConfig) -> Result<(), SimulationError> {
    let invalid = |reason: &str| {
        Err(SimulationError::InvalidGoal {
            reason: reason.to_string(),
        })
    };
    if !(0.0..=100.0).contains(&config.target_success_rate) {
        return invalid("target success rate must be between 0 and 100");
    }
    if !config.search_min.is_finite() || !config.search_max.is_finite() {
        return invalid("search bounds must be finite");
    }
    if config.search_max <= config.search_min {
        return invalid("search max must be greater than search min");
    }
    if !config.tolerance.is_finite() || config.tolerance <= 0.0 {
        return invalid("tolerance must be > 0");
    }
    if config.max_iterations == 0 {
        return invalid("max iterations must be > 0");
    }
    if config.trials_per_iteration == 0 || config.final_trials == 0 {
        return invalid("trial counts must be > 0");
    }
    match config.goal_type {
        GoalType::MaxWithdrawal if base.withdrawals.is_empty() => {
            invalid("max-withdrawal goal needs at least one withdrawal period")
        }
        GoalType::MaxWithdrawal if config.search_min < 0.0 => {
            invalid("withdrawal scale search min must be >= 0")
        }
        GoalType::RequiredSavingsRate if base.savings.savings_years == 0 => {
            invalid("required-savings goal needs savings years > 0")
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{SavingsPlan, StressScenario};

    fn assert_close(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn flat_market(horizon: u32) -> StressScenario {
        StressScenario {
            key: "flat".to_string(),
            name: "Flat market".to_string(),
            returns: vec![0.0; horizon as usize],
            inflation_override: Some(0.0),
        }
    }

    fn period(start_year: u32, end_year: u32, annual_amount: f64) -> WithdrawalPeriod {
        WithdrawalPeriod {
            start_year,
            end_year,
            annual_amount,
            label: "spend".to_string(),
        }
    }

    fn deterministic_config() -> SimulationConfig {
        SimulationConfig {
            starting_balance: 500.0,
            horizon: 1,
            trial_count: 1,
            stress_scenario: Some(flat_market(1)),
            withdrawals: vec![period(1, 1, 100.0)],
            ..SimulationConfig::default()
        }
    }

    fn goal(goal_type: GoalType, search_min: f64, search_max: f64) -> GoalSolveConfig {
        GoalSolveConfig {
            goal_type,
            target_success_rate: 100.0,
            search_min,
            search_max,
            tolerance: 0.01,
            max_iterations: 40,
            trials_per_iteration: 1,
            final_trials: 1,
        }
    }

    #[test]
    fn max_withdrawal_solver_finds_deterministic_solution() {
        let base = deterministic_config();
        let config = goal(GoalType::MaxWithdrawal, 0.0, 10.0);

        let result = solve_goal(&base, config).expect("must solve");
        assert!(result.feasible);
        assert!(result.converged);
        let scale = result.solved_value.expect("value expected");
        // Withdrawing the whole 500 depletes, so the scale sits just below 5.
        assert!(scale < 5.0);
        assert_close(scale, 5.0, config.tolerance + 1e-9);
        let schedule = result.solved_withdrawals.expect("schedule expected");
        assert_close(schedule[0].annual_amount, 100.0 * scale, 1e-9);
        assert_eq!(result.achieved_success_rate, Some(100.0));
    }

    #[test]
    fn required_savings_solver_finds_deterministic_solution() {
        let base = SimulationConfig {
            starting_balance: 100.0,
            horizon: 2,
            stress_scenario: Some(flat_market(2)),
            savings: SavingsPlan {
                current_income: 1_000.0,
                savings_rate: 0.0,
                savings_years: 1,
            },
            withdrawals: vec![period(2, 2, 300.0)],
            ..deterministic_config()
        };
        let config = goal(GoalType::RequiredSavingsRate, 0.0, 50.0);

        let result = solve_goal(&base, config).expect("must solve");
        assert!(result.feasible);
        let rate = result.solved_value.expect("value expected");
        assert!(rate > 20.0);
        assert_close(rate, 20.0, config.tolerance + 1e-9);
        assert!(result.solved_withdrawals.is_none());
        assert!(!result.iterations.is_empty());
    }

    #[test]
    fn required_savings_solver_reports_infeasible_when_bounds_too_low() {
        let base = SimulationConfig {
            starting_balance: 100.0,
            horizon: 2,
            stress_scenario: Some(flat_market(2)),
            savings: SavingsPlan {
                current_income: 1_000.0,
                savings_rate: 0.0,
                savings_years: 1,
            },
            withdrawals: vec![period(2, 2, 300.0)],
            ..deterministic_config()
        };
        let config = goal(GoalType::RequiredSavingsRate, 0.0, 10.0);

        let result = solve_goal(&base, config).expect("must return result");
        assert!(!result.feasible);
        assert!(result.solved_value.is_none());
        assert!(result.achieved_success_rate.is_none());
    }

    #[test]
    fn max_withdrawal_reports_upper_bound_when_still_feasible() {
        let base = deterministic_config();
        let config = goal(GoalType::MaxWithdrawal, 0.0, 2.0);

        let result = solve_goal(&base, config).expect("must return result");
        assert!(result.feasible);
        assert_eq!(result.solved_value, Some(2.0));
        assert!(result.iterations.is_empty());
    }

    #[test]
    fn invalid_goal_config_is_rejected() {
        let base = deterministic_config();
        let mut config = goal(GoalType::MaxWithdrawal, 5.0, 1.0);
        assert!(matches!(
            solve_goal(&base, config),
            Err(SimulationError::InvalidGoal { .. })
        ));

        config = goal(GoalType::RequiredSavingsRate, 0.0, 10.0);
        assert!(matches!(
            solve_goal(&base, config),
            Err(SimulationError::InvalidGoal { .. })
        ));
    }

    #[test]
    fn binomial_half_width_is_zero_at_the_extremes() {
        assert_eq!(binomial_ci_half_width(100.0, 50), 0.0);
        assert_eq!(binomial_ci_half_width(0.0, 50), 0.0);
        assert_close(binomial_ci_half_width(50.0, 100), 9.8, 1e-9);
    }
}

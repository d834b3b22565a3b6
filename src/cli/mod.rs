use std::fs;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tracing::debug;

use crate::core::{
    CorrelationMatrix, GoalSolveConfig, GoalType, MAX_HORIZON_YEARS, MAX_TRIAL_COUNT,
    RebalanceFrequency, SavingsPlan, SimulationConfig, StrategyAllocation, StrategyProfile,
    StrategyProfiles, StressScenario, TaxBracket, TaxMode, TaxSettings, WithdrawalPeriod,
    run_simulation, scenarios, solve_goal,
};

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CliRebalance {
    Annual,
    Quarterly,
    Monthly,
}

impl From<CliRebalance> for RebalanceFrequency {
    fn from(value: CliRebalance) -> Self {
        match value {
            CliRebalance::Annual => RebalanceFrequency::Annual,
            CliRebalance::Quarterly => RebalanceFrequency::Quarterly,
            CliRebalance::Monthly => RebalanceFrequency::Monthly,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CliTaxMode {
    Flat,
    Brackets,
}

impl From<CliTaxMode> for TaxMode {
    fn from(value: CliTaxMode) -> Self {
        match value {
            CliTaxMode::Flat => TaxMode::Flat,
            CliTaxMode::Brackets => TaxMode::Brackets,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CliGoal {
    MaxWithdrawal,
    RequiredSavings,
}

impl From<CliGoal> for GoalType {
    fn from(value: CliGoal) -> Self {
        match value {
            CliGoal::MaxWithdrawal => GoalType::MaxWithdrawal,
            CliGoal::RequiredSavings => GoalType::RequiredSavingsRate,
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "nestegg",
    about = "Monte Carlo retirement portfolio projection (three-strategy blend, savings and withdrawal phases)"
)]
pub struct Cli {
    #[arg(
        long,
        help = "JSON file whose fields overlay the flag values (camelCase keys, all optional)"
    )]
    pub config: Option<PathBuf>,
    #[arg(long, default_value_t = 1_000_000.0)]
    pub starting_balance: f64,
    #[arg(long, default_value_t = 30, help = "Projection length in years")]
    pub horizon: u32,
    #[arg(long, default_value_t = 1_000, help = "Number of Monte Carlo trials")]
    pub trials: u32,
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    #[arg(long, default_value_t = 60.0, help = "Growth strategy weight")]
    pub growth_weight: f64,
    #[arg(long, default_value_t = 30.0, help = "Income strategy weight")]
    pub income_weight: f64,
    #[arg(long, default_value_t = 10.0, help = "Diversification strategy weight")]
    pub diversification_weight: f64,

    #[arg(long, default_value_t = 9.5, help = "Growth expected annual return in percent")]
    pub growth_return: f64,
    #[arg(long, default_value_t = 18.0, help = "Growth annual volatility in percent")]
    pub growth_volatility: f64,
    #[arg(long, default_value_t = 5.5, help = "Income expected annual return in percent")]
    pub income_return: f64,
    #[arg(long, default_value_t = 7.0, help = "Income annual volatility in percent")]
    pub income_volatility: f64,
    #[arg(
        long,
        default_value_t = 7.0,
        help = "Diversification expected annual return in percent"
    )]
    pub diversification_return: f64,
    #[arg(
        long,
        default_value_t = 11.0,
        help = "Diversification annual volatility in percent"
    )]
    pub diversification_volatility: f64,

    #[arg(long, default_value_t = 0.3, allow_hyphen_values = true)]
    pub growth_income_correlation: f64,
    #[arg(long, default_value_t = 0.15, allow_hyphen_values = true)]
    pub growth_diversification_correlation: f64,
    #[arg(long, default_value_t = 0.1, allow_hyphen_values = true)]
    pub income_diversification_correlation: f64,
    #[arg(long, value_enum, default_value_t = CliRebalance::Annual)]
    pub rebalance: CliRebalance,

    #[arg(long, help = "Built-in stress scenario key, e.g. gfc-2008")]
    pub scenario: Option<String>,
    #[arg(
        long,
        value_delimiter = ',',
        allow_hyphen_values = true,
        help = "Custom stress returns in percent for the first years, comma separated"
    )]
    pub scenario_returns: Vec<f64>,
    #[arg(
        long,
        allow_hyphen_values = true,
        help = "Inflation in percent replacing the base rate while a scenario is active"
    )]
    pub scenario_inflation: Option<f64>,

    #[arg(long, default_value_t = 0.0, help = "Current annual income (today's money)")]
    pub current_income: f64,
    #[arg(
        long,
        default_value_t = 0.0,
        allow_hyphen_values = true,
        help = "Share of income saved during accumulation in percent"
    )]
    pub savings_rate: f64,
    #[arg(long, default_value_t = 0, help = "Number of accumulation years")]
    pub savings_years: u32,
    #[arg(
        long = "withdrawal",
        value_parser = parse_withdrawal,
        help = "Withdrawal period START:END:AMOUNT[:LABEL] in today's money; repeatable, first match wins"
    )]
    pub withdrawals: Vec<WithdrawalPeriod>,

    #[arg(
        long,
        default_value_t = 2.5,
        allow_hyphen_values = true,
        help = "Expected annual inflation in percent"
    )]
    pub inflation_rate: f64,

    #[arg(long, help = "Gross withdrawals up for income tax")]
    pub include_taxes: bool,
    #[arg(long, value_enum, default_value_t = CliTaxMode::Flat)]
    pub tax_mode: CliTaxMode,
    #[arg(long, default_value_t = 0.0, help = "Flat tax rate in percent")]
    pub tax_rate: f64,
    #[arg(
        long = "tax-bracket",
        value_parser = parse_tax_bracket,
        help = "Tax bracket THRESHOLD:RATE in today's money and percent; repeatable"
    )]
    pub tax_brackets: Vec<TaxBracket>,

    #[arg(long, value_enum, help = "Run the goal solver instead of a single projection")]
    pub solve: Option<CliGoal>,
    #[arg(
        long,
        default_value_t = 90.0,
        help = "Goal solver target success rate in percent"
    )]
    pub target_success_rate: f64,
    #[arg(long, allow_hyphen_values = true)]
    pub search_min: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    pub search_max: Option<f64>,
    #[arg(long)]
    pub tolerance: Option<f64>,
    #[arg(long, default_value_t = 30)]
    pub max_iterations: u32,
    #[arg(long, default_value_t = 500)]
    pub trials_per_iteration: u32,
    #[arg(long, default_value_t = 2_000)]
    pub final_trials: u32,

    #[arg(long, help = "Pretty-print the JSON output")]
    pub pretty: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct ConfigPayload {
    starting_balance: Option<f64>,
    horizon: Option<u32>,
    trials: Option<u32>,
    seed: Option<u64>,

    growth_weight: Option<f64>,
    income_weight: Option<f64>,
    diversification_weight: Option<f64>,

    growth_return: Option<f64>,
    growth_volatility: Option<f64>,
    income_return: Option<f64>,
    income_volatility: Option<f64>,
    diversification_return: Option<f64>,
    diversification_volatility: Option<f64>,

    growth_income_correlation: Option<f64>,
    growth_diversification_correlation: Option<f64>,
    income_diversification_correlation: Option<f64>,
    rebalance: Option<CliRebalance>,

    scenario: Option<String>,
    scenario_returns: Option<Vec<f64>>,
    scenario_inflation: Option<f64>,

    current_income: Option<f64>,
    savings_rate: Option<f64>,
    savings_years: Option<u32>,
    withdrawals: Option<Vec<WithdrawalPeriod>>,

    inflation_rate: Option<f64>,

    include_taxes: Option<bool>,
    tax_mode: Option<CliTaxMode>,
    tax_rate: Option<f64>,
    tax_brackets: Option<Vec<TaxBracket>>,
}

/// Parses `START:END:AMOUNT[:LABEL]`. The label may itself contain colons.
pub fn parse_withdrawal(raw: &str) -> Result<WithdrawalPeriod, String> {
    let mut parts = raw.splitn(4, ':');
    let (Some(start), Some(end), Some(amount)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(format!("expected START:END:AMOUNT[:LABEL], got '{raw}'"));
    };
    let start_year = start
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid start year '{start}': {e}"))?;
    let end_year = end
        .trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid end year '{end}': {e}"))?;
    let annual_amount = amount
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid amount '{amount}': {e}"))?;
    let label = parts
        .next()
        .map(str::to_string)
        .unwrap_or_else(|| format!("years {start_year}-{end_year}"));

    Ok(WithdrawalPeriod {
        start_year,
        end_year,
        annual_amount,
        label,
    })
}

/// Parses `THRESHOLD:RATE`.
pub fn parse_tax_bracket(raw: &str) -> Result<TaxBracket, String> {
    let Some((threshold, rate)) = raw.split_once(':') else {
        return Err(format!("expected THRESHOLD:RATE, got '{raw}'"));
    };
    let threshold = threshold
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid threshold '{threshold}': {e}"))?;
    let rate = rate
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid rate '{rate}': {e}"))?;
    Ok(TaxBracket { threshold, rate })
}

pub fn build_config(cli: Cli) -> Result<SimulationConfig, String> {
    if cli.horizon == 0 || cli.horizon > MAX_HORIZON_YEARS {
        return Err(format!("--horizon must be between 1 and {MAX_HORIZON_YEARS}"));
    }

    if cli.trials == 0 || cli.trials > MAX_TRIAL_COUNT {
        return Err(format!("--trials must be between 1 and {MAX_TRIAL_COUNT}"));
    }

    if !cli.starting_balance.is_finite() || cli.starting_balance < 0.0 {
        return Err("--starting-balance must be >= 0".to_string());
    }

    for (name, weight) in [
        ("--growth-weight", cli.growth_weight),
        ("--income-weight", cli.income_weight),
        ("--diversification-weight", cli.diversification_weight),
    ] {
        if !weight.is_finite() || weight < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    if cli.growth_weight + cli.income_weight + cli.diversification_weight <= 0.0 {
        return Err("strategy weights must not all be zero".to_string());
    }

    for (name, vol) in [
        ("--growth-volatility", cli.growth_volatility),
        ("--income-volatility", cli.income_volatility),
        ("--diversification-volatility", cli.diversification_volatility),
    ] {
        if !vol.is_finite() || vol < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    for (name, rho) in [
        ("--growth-income-correlation", cli.growth_income_correlation),
        (
            "--growth-diversification-correlation",
            cli.growth_diversification_correlation,
        ),
        (
            "--income-diversification-correlation",
            cli.income_diversification_correlation,
        ),
    ] {
        if !(-1.0..=1.0).contains(&rho) {
            return Err(format!("{name} must be between -1 and 1"));
        }
    }

    if !cli.inflation_rate.is_finite() || cli.inflation_rate <= -100.0 {
        return Err("--inflation-rate must be > -100".to_string());
    }

    if !cli.current_income.is_finite() || cli.current_income < 0.0 {
        return Err("--current-income must be >= 0".to_string());
    }

    if cli.include_taxes {
        if cli.tax_mode == CliTaxMode::Flat && !(0.0..100.0).contains(&cli.tax_rate) {
            return Err("--tax-rate must be >= 0 and < 100".to_string());
        }
        if cli.tax_mode == CliTaxMode::Brackets && cli.tax_brackets.is_empty() {
            return Err("--tax-bracket is required when --tax-mode=brackets".to_string());
        }
        if cli
            .tax_brackets
            .iter()
            .any(|b| !(0.0..100.0).contains(&b.rate))
        {
            return Err("--tax-bracket rates must be >= 0 and < 100".to_string());
        }
    }

    for period in &cli.withdrawals {
        if period.start_year > period.end_year {
            debug!(label = %period.label, "withdrawal period has start after end and never applies");
        }
    }

    let stress_scenario = resolve_scenario(&cli)?;

    let config = SimulationConfig {
        starting_balance: cli.starting_balance,
        horizon: cli.horizon,
        trial_count: cli.trials,
        seed: cli.seed,
        allocation: StrategyAllocation::new(
            cli.growth_weight,
            cli.income_weight,
            cli.diversification_weight,
        ),
        profiles: StrategyProfiles {
            growth: StrategyProfile {
                expected_return: cli.growth_return,
                volatility: cli.growth_volatility,
            },
            income: StrategyProfile {
                expected_return: cli.income_return,
                volatility: cli.income_volatility,
            },
            diversification: StrategyProfile {
                expected_return: cli.diversification_return,
                volatility: cli.diversification_volatility,
            },
        },
        correlation: CorrelationMatrix {
            growth_income: cli.growth_income_correlation,
            growth_diversification: cli.growth_diversification_correlation,
            income_diversification: cli.income_diversification_correlation,
        },
        rebalance: cli.rebalance.into(),
        stress_scenario,
        savings: SavingsPlan {
            current_income: cli.current_income,
            savings_rate: cli.savings_rate,
            savings_years: cli.savings_years,
        },
        withdrawals: cli.withdrawals,
        inflation_rate: cli.inflation_rate / 100.0,
        taxes: TaxSettings {
            include_taxes: cli.include_taxes,
            mode: cli.tax_mode.into(),
            tax_rate: cli.tax_rate,
            brackets: cli.tax_brackets,
        },
    };

    // Anything the flag checks above missed is still caught by the core.
    config.validate().map_err(|e| e.to_string())?;
    Ok(config)
}

fn resolve_scenario(cli: &Cli) -> Result<Option<StressScenario>, String> {
    let mut scenario = match (&cli.scenario, cli.scenario_returns.is_empty()) {
        (Some(_), false) => {
            return Err("--scenario and --scenario-returns cannot be combined".to_string());
        }
        (Some(key), true) => Some(scenarios::find(key).ok_or_else(|| {
            let known: Vec<_> = scenarios::keys().collect();
            format!("--scenario '{key}' is unknown; expected one of {}", known.join(", "))
        })?),
        (None, false) => Some(StressScenario {
            key: "custom".to_string(),
            name: "Custom stress sequence".to_string(),
            returns: cli.scenario_returns.clone(),
            inflation_override: None,
        }),
        (None, true) => None,
    };

    if let Some(inflation) = cli.scenario_inflation {
        let Some(active) = scenario.as_mut() else {
            return Err("--scenario-inflation requires --scenario or --scenario-returns".to_string());
        };
        if !inflation.is_finite() || inflation <= -100.0 {
            return Err("--scenario-inflation must be > -100".to_string());
        }
        active.inflation_override = Some(inflation / 100.0);
    }

    Ok(scenario)
}

fn goal_config(cli: &Cli, goal: CliGoal) -> GoalSolveConfig {
    let goal_type = GoalType::from(goal);
    // Withdrawal goals search a multiplier on the schedule, savings goals a percent of income.
    let (default_min, default_max, default_tolerance) = match goal_type {
        GoalType::MaxWithdrawal => (0.0, 3.0, 0.001),
        GoalType::RequiredSavingsRate => (0.0, 100.0, 0.05),
    };
    GoalSolveConfig {
        goal_type,
        target_success_rate: cli.target_success_rate,
        search_min: cli.search_min.unwrap_or(default_min),
        search_max: cli.search_max.unwrap_or(default_max),
        tolerance: cli.tolerance.unwrap_or(default_tolerance),
        max_iterations: cli.max_iterations,
        trials_per_iteration: cli.trials_per_iteration,
        final_trials: cli.final_trials,
    }
}

/// Runs a projection (or the goal solver with `--solve`) and returns the
/// result as JSON text.
pub fn run(cli: Cli) -> Result<String, String> {
    let cli = match cli.config.clone() {
        Some(path) => {
            let raw = fs::read_to_string(&path)
                .map_err(|e| format!("failed to read --config {}: {e}", path.display()))?;
            overlay_json(cli, &raw)?
        }
        None => cli,
    };

    let pretty = cli.pretty;
    let goal = cli.solve.map(|goal| goal_config(&cli, goal));
    let config = build_config(cli)?;

    match goal {
        Some(goal) => {
            let result = solve_goal(&config, goal).map_err(|e| e.to_string())?;
            to_json(&result, pretty)
        }
        None => {
            let result = run_simulation(&config).map_err(|e| e.to_string())?;
            to_json(&result, pretty)
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<String, String> {
    let json = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    json.map_err(|e| format!("failed to serialize result: {e}"))
}

fn overlay_json(cli: Cli, json: &str) -> Result<Cli, String> {
    let payload = serde_json::from_str::<ConfigPayload>(json)
        .map_err(|e| format!("Invalid JSON config: {e}"))?;
    Ok(overlay_payload(cli, payload))
}

fn overlay_payload(mut cli: Cli, payload: ConfigPayload) -> Cli {
    if let Some(v) = payload.starting_balance {
        cli.starting_balance = v;
    }
    if let Some(v) = payload.horizon {
        cli.horizon = v;
    }
    if let Some(v) = payload.trials {
        cli.trials = v;
    }
    if let Some(v) = payload.seed {
        cli.seed = v;
    }

    if let Some(v) = payload.growth_weight {
        cli.growth_weight = v;
    }
    if let Some(v) = payload.income_weight {
        cli.income_weight = v;
    }
    if let Some(v) = payload.diversification_weight {
        cli.diversification_weight = v;
    }

    if let Some(v) = payload.growth_return {
        cli.growth_return = v;
    }
    if let Some(v) = payload.growth_volatility {
        cli.growth_volatility = v;
    }
    if let Some(v) = payload.income_return {
        cli.income_return = v;
    }
    if let Some(v) = payload.income_volatility {
        cli.income_volatility = v;
    }
    if let Some(v) = payload.diversification_return {
        cli.diversification_return = v;
    }
    if let Some(v) = payload.diversification_volatility {
        cli.diversification_volatility = v;
    }

    if let Some(v) = payload.growth_income_correlation {
        cli.growth_income_correlation = v;
    }
    if let Some(v) = payload.growth_diversification_correlation {
        cli.growth_diversification_correlation = v;
    }
    if let Some(v) = payload.income_diversification_correlation {
        cli.income_diversification_correlation = v;
    }
    if let Some(v) = payload.rebalance {
        cli.rebalance = v;
    }

    if let Some(v) = payload.scenario {
        cli.scenario = Some(v);
    }
    if let Some(v) = payload.scenario_returns {
        cli.scenario_returns = v;
    }
    if let Some(v) = payload.scenario_inflation {
        cli.scenario_inflation = Some(v);
    }

    if let Some(v) = payload.current_income {
        cli.current_income = v;
    }
    if let Some(v) = payload.savings_rate {
        cli.savings_rate = v;
    }
    if let Some(v) = payload.savings_years {
        cli.savings_years = v;
    }
    if let Some(v) = payload.withdrawals {
        cli.withdrawals = v;
    }

    if let Some(v) = payload.inflation_rate {
        cli.inflation_rate = v;
    }

    if let Some(v) = payload.include_taxes {
        cli.include_taxes = v;
    }
    if let Some(v) = payload.tax_mode {
        cli.tax_mode = v;
    }
    if let Some(v) = payload.tax_rate {
        cli.tax_rate = v;
    }
    if let Some(v) = payload.tax_brackets {
        cli.tax_brackets = v;
    }

    cli
}

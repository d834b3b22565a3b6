use serde::{Deserialize, Serialize};

use super::error::SimulationError;

pub const MAX_HORIZON_YEARS: u32 = 100;
pub const MAX_TRIAL_COUNT: u32 = 10_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Strategy {
    Growth,
    Income,
    Diversification,
}

impl Strategy {
    pub const ALL: [Strategy; 3] = [
        Strategy::Growth,
        Strategy::Income,
        Strategy::Diversification,
    ];

    pub fn key(self) -> &'static str {
        match self {
            Strategy::Growth => "growth",
            Strategy::Income => "income",
            Strategy::Diversification => "diversification",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyAllocation {
    pub growth: f64,
    pub income: f64,
    pub diversification: f64,
}

impl StrategyAllocation {
    pub fn new(growth: f64, income: f64, diversification: f64) -> Self {
        Self {
            growth,
            income,
            diversification,
        }
    }

    pub fn weight(&self, strategy: Strategy) -> f64 {
        match strategy {
            Strategy::Growth => self.growth,
            Strategy::Income => self.income,
            Strategy::Diversification => self.diversification,
        }
    }

    pub fn total(&self) -> f64 {
        self.growth + self.income + self.diversification
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        for strategy in Strategy::ALL {
            let w = self.weight(strategy);
            if !w.is_finite() || w < 0.0 {
                return Err(SimulationError::InvalidAllocation {
                    reason: format!("{} weight must be finite and >= 0, got {w}", strategy.key()),
                });
            }
        }
        let total = self.total();
        if total <= 0.0 {
            return Err(SimulationError::InvalidAllocation {
                reason: format!("weights must sum to a positive value, got {total}"),
            });
        }
        Ok(())
    }

    /// Rescales the weights so they sum to 100. Callers must have validated
    /// the allocation first.
    pub fn normalized(&self) -> Self {
        let total = self.total();
        if (total - 100.0).abs() <= f64::EPSILON {
            return *self;
        }
        let scale = 100.0 / total;
        Self {
            growth: self.growth * scale,
            income: self.income * scale,
            diversification: self.diversification * scale,
        }
    }
}

impl Default for StrategyAllocation {
    fn default() -> Self {
        Self::new(60.0, 30.0, 10.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyProfile {
    pub expected_return: f64,
    pub volatility: f64,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyProfiles {
    pub growth: StrategyProfile,
    pub income: StrategyProfile,
    pub diversification: StrategyProfile,
}

impl StrategyProfiles {
    pub fn get(&self, strategy: Strategy) -> StrategyProfile {
        match strategy {
            Strategy::Growth => self.growth,
            Strategy::Income => self.income,
            Strategy::Diversification => self.diversification,
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        for strategy in Strategy::ALL {
            let profile = self.get(strategy);
            if !profile.expected_return.is_finite() {
                return Err(SimulationError::InvalidProfile {
                    strategy: strategy.key(),
                    reason: format!("expected return must be finite, got {}", profile.expected_return),
                });
            }
            if !profile.volatility.is_finite() || profile.volatility < 0.0 {
                return Err(SimulationError::InvalidProfile {
                    strategy: strategy.key(),
                    reason: format!("volatility must be finite and >= 0, got {}", profile.volatility),
                });
            }
        }
        Ok(())
    }
}

impl Default for StrategyProfiles {
    fn default() -> Self {
        Self {
            growth: StrategyProfile {
                expected_return: 9.5,
                volatility: 18.0,
            },
            income: StrategyProfile {
                expected_return: 5.5,
                volatility: 7.0,
            },
            diversification: StrategyProfile {
                expected_return: 7.0,
                volatility: 11.0,
            },
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrelationMatrix {
    pub growth_income: f64,
    pub growth_diversification: f64,
    pub income_diversification: f64,
}

impl CorrelationMatrix {
    pub fn uncorrelated() -> Self {
        Self {
            growth_income: 0.0,
            growth_diversification: 0.0,
            income_diversification: 0.0,
        }
    }

    pub fn between(&self, a: Strategy, b: Strategy) -> f64 {
        use Strategy::*;
        match (a, b) {
            (Growth, Growth) | (Income, Income) | (Diversification, Diversification) => 1.0,
            (Growth, Income) | (Income, Growth) => self.growth_income,
            (Growth, Diversification) | (Diversification, Growth) => self.growth_diversification,
            (Income, Diversification) | (Diversification, Income) => self.income_diversification,
        }
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        for (pair, value) in [
            ("growth-income", self.growth_income),
            ("growth-diversification", self.growth_diversification),
            ("income-diversification", self.income_diversification),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(SimulationError::InvalidCorrelation { pair, value });
            }
        }
        Ok(())
    }
}

impl Default for CorrelationMatrix {
    fn default() -> Self {
        Self {
            growth_income: 0.3,
            growth_diversification: 0.15,
            income_diversification: 0.1,
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RebalanceFrequency {
    #[default]
    Annual,
    Quarterly,
    Monthly,
}

impl RebalanceFrequency {
    pub fn cost_fraction(self) -> f64 {
        match self {
            RebalanceFrequency::Annual => 0.001,
            RebalanceFrequency::Quarterly => 0.0025,
            RebalanceFrequency::Monthly => 0.005,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveParameters {
    pub expected_return: f64,
    pub volatility: f64,
    pub normalized_allocation: StrategyAllocation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalPeriod {
    pub start_year: u32,
    pub end_year: u32,
    pub annual_amount: f64,
    #[serde(default)]
    pub label: String,
}

impl WithdrawalPeriod {
    /// A period with `start_year > end_year` never matches.
    pub fn contains(&self, year: u32) -> bool {
        self.start_year <= year && year <= self.end_year
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavingsPlan {
    pub current_income: f64,
    pub savings_rate: f64,
    pub savings_years: u32,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaxMode {
    #[default]
    Flat,
    Brackets,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxBracket {
    pub threshold: f64,
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaxSettings {
    pub include_taxes: bool,
    pub mode: TaxMode,
    pub tax_rate: f64,
    #[serde(default)]
    pub brackets: Vec<TaxBracket>,
}

impl TaxSettings {
    pub fn untaxed() -> Self {
        Self {
            include_taxes: false,
            mode: TaxMode::Flat,
            tax_rate: 0.0,
            brackets: Vec::new(),
        }
    }

    pub fn flat(tax_rate: f64) -> Self {
        Self {
            include_taxes: true,
            mode: TaxMode::Flat,
            tax_rate,
            brackets: Vec::new(),
        }
    }

    /// Puts brackets in ascending threshold order, which the bracket tax
    /// calculation relies on.
    pub fn sort_brackets(&mut self) {
        self.brackets
            .sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if !self.include_taxes {
            return Ok(());
        }
        let check = |rate: f64| {
            if !rate.is_finite() || !(0.0..100.0).contains(&rate) {
                Err(SimulationError::InvalidTaxRate { rate })
            } else {
                Ok(())
            }
        };
        match self.mode {
            TaxMode::Flat => check(self.tax_rate),
            TaxMode::Brackets => self.brackets.iter().try_for_each(|b| check(b.rate)),
        }
    }
}

impl Default for TaxSettings {
    fn default() -> Self {
        Self::untaxed()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StressScenario {
    pub key: String,
    #[serde(default)]
    pub name: String,
    pub returns: Vec<f64>,
    #[serde(default)]
    pub inflation_override: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationConfig {
    pub starting_balance: f64,
    pub horizon: u32,
    pub trial_count: u32,
    pub seed: u64,
    pub allocation: StrategyAllocation,
    #[serde(default)]
    pub profiles: StrategyProfiles,
    #[serde(default)]
    pub correlation: CorrelationMatrix,
    #[serde(default)]
    pub rebalance: RebalanceFrequency,
    #[serde(default)]
    pub stress_scenario: Option<StressScenario>,
    #[serde(default)]
    pub savings: SavingsPlan,
    #[serde(default)]
    pub withdrawals: Vec<WithdrawalPeriod>,
    pub inflation_rate: f64,
    #[serde(default)]
    pub taxes: TaxSettings,
}

impl SimulationConfig {
    pub fn effective_inflation(&self) -> f64 {
        self.stress_scenario
            .as_ref()
            .and_then(|s| s.inflation_override)
            .unwrap_or(self.inflation_rate)
    }

    pub fn validate(&self) -> Result<(), SimulationError> {
        if self.horizon == 0 || self.horizon > MAX_HORIZON_YEARS {
            return Err(SimulationError::InvalidHorizon {
                horizon: self.horizon,
                max: MAX_HORIZON_YEARS,
            });
        }
        if self.trial_count == 0 || self.trial_count > MAX_TRIAL_COUNT {
            return Err(SimulationError::InvalidTrialCount {
                trials: self.trial_count,
                max: MAX_TRIAL_COUNT,
            });
        }
        if !self.starting_balance.is_finite() || self.starting_balance < 0.0 {
            return Err(SimulationError::InvalidStartingBalance {
                value: self.starting_balance,
            });
        }
        self.allocation.validate()?;
        self.profiles.validate()?;
        self.correlation.validate()?;
        self.taxes.validate()?;

        let inflation = self.effective_inflation();
        if !inflation.is_finite() || inflation <= -1.0 {
            return Err(SimulationError::InvalidInflation { rate: inflation });
        }
        if !self.savings.current_income.is_finite() || self.savings.current_income < 0.0 {
            return Err(SimulationError::InvalidSavingsPlan {
                reason: format!(
                    "current income must be finite and >= 0, got {}",
                    self.savings.current_income
                ),
            });
        }
        if !self.savings.savings_rate.is_finite() {
            return Err(SimulationError::InvalidSavingsPlan {
                reason: format!("savings rate must be finite, got {}", self.savings.savings_rate),
            });
        }
        for period in &self.withdrawals {
            if !period.annual_amount.is_finite() || period.annual_amount < 0.0 {
                return Err(SimulationError::InvalidWithdrawalPeriod {
                    label: period.label.clone(),
                    reason: format!(
                        "annual amount must be finite and >= 0, got {}",
                        period.annual_amount
                    ),
                });
            }
        }
        if let Some(scenario) = &self.stress_scenario
            && let Some(bad) = scenario.returns.iter().find(|r| !r.is_finite())
        {
            return Err(SimulationError::InvalidStressScenario {
                key: scenario.key.clone(),
                reason: format!("returns must be finite, got {bad}"),
            });
        }
        Ok(())
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            starting_balance: 1_000_000.0,
            horizon: 30,
            trial_count: 1_000,
            seed: 42,
            allocation: StrategyAllocation::default(),
            profiles: StrategyProfiles::default(),
            correlation: CorrelationMatrix::default(),
            rebalance: RebalanceFrequency::Annual,
            stress_scenario: None,
            savings: SavingsPlan::default(),
            withdrawals: Vec::new(),
            inflation_rate: 0.025,
            taxes: TaxSettings::untaxed(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedPath {
    /// Length horizon + 1; index 0 is the starting balance.
    pub values: Vec<f64>,
    pub cash_flows: Vec<f64>,
    pub returns: Vec<f64>,
    pub final_value: f64,
    pub depleted: bool,
    pub depletion_year: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentilePath {
    /// "At least this good" label: 95 is the path near the top of the
    /// descending sort.
    pub percentile: u32,
    pub trial: usize,
    pub path: SimulatedPath,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearBand {
    pub year: u32,
    pub p5: f64,
    pub p25: f64,
    pub p50: f64,
    pub p75: f64,
    pub p95: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DepletionSummary {
    pub depleted_paths: u32,
    pub earliest_year: Option<u32>,
    pub median_year: Option<u32>,
    pub cumulative_rate_by_year: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub trial_count: u32,
    pub horizon: u32,
    pub effective: EffectiveParameters,
    pub success_rate: f64,
    pub median_final: f64,
    pub percentile10_final: f64,
    pub percentile90_final: f64,
    pub outcome_range: f64,
    pub relative_predictability: f64,
    pub percentile_paths: Vec<PercentilePath>,
    pub realized_volatility: Vec<f64>,
    pub total_saved: f64,
    pub total_withdrawn: f64,
    pub peak_value: f64,
    pub year_bands: Vec<YearBand>,
    pub depletion: DepletionSummary,
}

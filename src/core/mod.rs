mod allocation;
mod cashflow;
mod engine;
mod error;
mod returns;
pub mod scenarios;
mod solver;
mod types;

pub use allocation::compute_effective_parameters;
pub use cashflow::{CashFlowPlan, resolve_cash_flow};
pub use engine::{
    CancelToken, PathSpec, aggregate_paths, run_simulation, run_simulation_with_cancel, simulate_path,
};
pub use error::SimulationError;
pub use returns::generate_annual_returns;
pub use solver::{GoalSolveConfig, GoalSolveIteration, GoalSolveResult, GoalType, solve_goal};
pub use types::{
    AggregateResult, CorrelationMatrix, DepletionSummary, EffectiveParameters, MAX_HORIZON_YEARS,
    MAX_TRIAL_COUNT, PercentilePath, RebalanceFrequency, SavingsPlan, SimulatedPath,
    SimulationConfig, Strategy, StrategyAllocation, StrategyProfile, StrategyProfiles, StressScenario,
    TaxBracket, TaxMode, TaxSettings, WithdrawalPeriod, YearBand,
};

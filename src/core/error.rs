use thiserror::Error;

/// Configuration and run errors surfaced by the projection engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    #[error("Invalid allocation: {reason}")]
    InvalidAllocation { reason: String },

    #[error("Correlation {pair} = {value} is outside [-1, 1]")]
    InvalidCorrelation { pair: &'static str, value: f64 },

    #[error("Invalid profile for strategy {strategy}: {reason}")]
    InvalidProfile {
        strategy: &'static str,
        reason: String,
    },

    #[error("Horizon of {horizon} years is outside 1..={max}")]
    InvalidHorizon { horizon: u32, max: u32 },

    #[error("Trial count {trials} is outside 1..={max}")]
    InvalidTrialCount { trials: u32, max: u32 },

    #[error("Starting balance must be finite and >= 0, got {value}")]
    InvalidStartingBalance { value: f64 },

    #[error("Tax rate {rate}% would make the withdrawal gross-up denominator non-positive")]
    InvalidTaxRate { rate: f64 },

    #[error("Inflation rate {rate} must be finite and > -1")]
    InvalidInflation { rate: f64 },

    #[error("Invalid savings plan: {reason}")]
    InvalidSavingsPlan { reason: String },

    #[error("Invalid withdrawal period '{label}': {reason}")]
    InvalidWithdrawalPeriod { label: String, reason: String },

    #[error("Invalid stress scenario '{key}': {reason}")]
    InvalidStressScenario { key: String, reason: String },

    #[error("Invalid goal: {reason}")]
    InvalidGoal { reason: String },

    #[error("Simulation cancelled after {completed} of {requested} trials")]
    Cancelled { completed: u32, requested: u32 },
}

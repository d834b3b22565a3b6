use super::error::SimulationError;
use super::types::{
    CorrelationMatrix, EffectiveParameters, RebalanceFrequency, Strategy, StrategyAllocation,
    StrategyProfiles,
};

const PAIRS: [(Strategy, Strategy); 3] = [
    (Strategy::Growth, Strategy::Income),
    (Strategy::Growth, Strategy::Diversification),
    (Strategy::Income, Strategy::Diversification),
];

/// Blends the three strategy profiles into one expected return and
/// volatility for the whole portfolio.
///
/// Variance is the weighted own-variance terms plus twice the covariance of
/// each unordered pair. The rebalancing cost is deducted from the return as a
/// flat percentage-point drag.
pub fn compute_effective_parameters(
    allocation: &StrategyAllocation,
    profiles: &StrategyProfiles,
    correlation: &CorrelationMatrix,
    rebalance: RebalanceFrequency,
) -> Result<EffectiveParameters, SimulationError> {
    allocation.validate()?;
    let normalized = allocation.normalized();
    let fraction = |s: Strategy| normalized.weight(s) / 100.0;

    let weighted_return = Strategy::ALL
        .iter()
        .map(|&s| fraction(s) * profiles.get(s).expected_return)
        .sum::<f64>();

    let own_variance = Strategy::ALL
        .iter()
        .map(|&s| {
            let scaled = fraction(s) * profiles.get(s).volatility;
            scaled * scaled
        })
        .sum::<f64>();
    let covariance = PAIRS
        .iter()
        .map(|&(a, b)| {
            fraction(a)
                * fraction(b)
                * profiles.get(a).volatility
                * profiles.get(b).volatility
                * correlation.between(a, b)
        })
        .sum::<f64>();
    // Negative correlations can push rounding just below zero.
    let variance = (own_variance + 2.0 * covariance).max(0.0);

    Ok(EffectiveParameters {
        expected_return: weighted_return - rebalance.cost_fraction() * 100.0,
        volatility: variance.sqrt(),
        normalized_allocation: normalized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StrategyProfile;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn single_strategy_matches_its_own_profile_minus_cost() {
        let profiles = StrategyProfiles::default();
        let params = compute_effective_parameters(
            &StrategyAllocation::new(100.0, 0.0, 0.0),
            &profiles,
            &CorrelationMatrix::default(),
            RebalanceFrequency::Quarterly,
        )
        .expect("valid allocation");

        assert_approx(params.expected_return, 9.5 - 0.25);
        assert_approx(params.volatility, 18.0);
        assert_approx(params.normalized_allocation.growth, 100.0);
    }

    #[test]
    fn zero_correlation_volatility_is_root_sum_of_weighted_squares() {
        let profiles = StrategyProfiles::default();
        let params = compute_effective_parameters(
            &StrategyAllocation::new(50.0, 30.0, 20.0),
            &profiles,
            &CorrelationMatrix::uncorrelated(),
            RebalanceFrequency::Annual,
        )
        .expect("valid allocation");

        let expected = ((0.5_f64 * 18.0).powi(2) + (0.3_f64 * 7.0).powi(2) + (0.2_f64 * 11.0).powi(2))
            .sqrt();
        assert_approx(params.volatility, expected);
        assert_approx(
            params.expected_return,
            0.5 * 9.5 + 0.3 * 5.5 + 0.2 * 7.0 - 0.1,
        );
    }

    #[test]
    fn perfect_correlation_volatility_is_weighted_sum() {
        let correlation = CorrelationMatrix {
            growth_income: 1.0,
            growth_diversification: 1.0,
            income_diversification: 1.0,
        };
        let params = compute_effective_parameters(
            &StrategyAllocation::new(40.0, 40.0, 20.0),
            &StrategyProfiles::default(),
            &correlation,
            RebalanceFrequency::Monthly,
        )
        .expect("valid allocation");

        assert_approx(params.volatility, 0.4 * 18.0 + 0.4 * 7.0 + 0.2 * 11.0);
    }

    #[test]
    fn unnormalized_allocation_is_rescaled_to_one_hundred() {
        let params = compute_effective_parameters(
            &StrategyAllocation::new(3.0, 1.0, 0.0),
            &StrategyProfiles::default(),
            &CorrelationMatrix::default(),
            RebalanceFrequency::Annual,
        )
        .expect("valid allocation");

        assert_approx(params.normalized_allocation.growth, 75.0);
        assert_approx(params.normalized_allocation.income, 25.0);
        assert_approx(params.normalized_allocation.diversification, 0.0);
    }

    #[test]
    fn zero_volatility_profiles_give_zero_portfolio_volatility() {
        let flat = StrategyProfile {
            expected_return: 4.0,
            volatility: 0.0,
        };
        let profiles = StrategyProfiles {
            growth: flat,
            income: flat,
            diversification: flat,
        };
        let params = compute_effective_parameters(
            &StrategyAllocation::default(),
            &profiles,
            &CorrelationMatrix::default(),
            RebalanceFrequency::Annual,
        )
        .expect("valid allocation");

        assert_approx(params.volatility, 0.0);
        assert_approx(params.expected_return, 3.9);
    }

    #[test]
    fn zero_sum_allocation_is_rejected() {
        let err = compute_effective_parameters(
            &StrategyAllocation::new(0.0, 0.0, 0.0),
            &StrategyProfiles::default(),
            &CorrelationMatrix::default(),
            RebalanceFrequency::Annual,
        )
        .expect_err("must reject zero allocation");
        assert!(matches!(err, SimulationError::InvalidAllocation { .. }));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let err = compute_effective_parameters(
            &StrategyAllocation::new(120.0, -20.0, 0.0),
            &StrategyProfiles::default(),
            &CorrelationMatrix::default(),
            RebalanceFrequency::Annual,
        )
        .expect_err("must reject negative weight");
        assert!(err.to_string().contains("income"));
    }

    #[test]
    fn repeated_calls_are_bitwise_identical() {
        let allocation = StrategyAllocation::new(37.0, 41.0, 22.0);
        let profiles = StrategyProfiles::default();
        let correlation = CorrelationMatrix::default();
        let a = compute_effective_parameters(
            &allocation,
            &profiles,
            &correlation,
            RebalanceFrequency::Quarterly,
        )
        .expect("valid");
        let b = compute_effective_parameters(
            &allocation,
            &profiles,
            &correlation,
            RebalanceFrequency::Quarterly,
        )
        .expect("valid");

        assert_eq!(a.expected_return.to_bits(), b.expected_return.to_bits());
        assert_eq!(a.volatility.to_bits(), b.volatility.to_bits());
        assert_eq!(a, b);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_normalized_weights_sum_to_one_hundred(
            growth in 0u32..10_000,
            income in 0u32..10_000,
            diversification in 1u32..10_000
        ) {
            let params = compute_effective_parameters(
                &StrategyAllocation::new(growth as f64, income as f64, diversification as f64),
                &StrategyProfiles::default(),
                &CorrelationMatrix::default(),
                RebalanceFrequency::Annual,
            ).expect("positive sum");

            prop_assert!((params.normalized_allocation.total() - 100.0).abs() <= 1e-9);
            prop_assert!(params.volatility >= 0.0);
            prop_assert!(params.volatility <= 18.0 + 1e-9);
        }
    }
}

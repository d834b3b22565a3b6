use std::f64::consts::PI;

use rand::Rng;

use super::types::{EffectiveParameters, StressScenario};

const MOMENTUM_CARRY: f64 = 0.15;
const SHOCK_WEIGHT: f64 = 0.85;
const SEQUENCE_RISK_YEARS: usize = 5;
const SEQUENCE_RISK_MAX_FACTOR: f64 = 1.2;
const FAT_TAIL_PROBABILITY: f64 = 0.02;
const FAT_TAIL_DAMPEN: f64 = 0.5;
const FAT_TAIL_AMPLIFY: f64 = 1.5;

/// Produces one path's annual returns in percent, exactly `horizon` long.
///
/// A stress scenario's literal returns fill the leading years verbatim. The
/// remaining years are drawn from a smoothed normal shock around the
/// effective expected return, with early downside fattened and a small
/// chance of a fat-tail multiplier. Momentum starts at zero on every call.
pub fn generate_annual_returns<R: Rng + ?Sized>(
    horizon: u32,
    params: &EffectiveParameters,
    scenario: Option<&StressScenario>,
    rng: &mut R,
) -> Vec<f64> {
    let horizon = horizon as usize;
    let mut returns = Vec::with_capacity(horizon);
    if let Some(scenario) = scenario {
        returns.extend(scenario.returns.iter().take(horizon).copied());
    }

    let scripted = returns.len();
    (scripted..horizon).fold(0.0, |momentum, year_index| {
        let (momentum, annual_return) = sample_year(year_index, momentum, params, rng);
        returns.push(annual_return);
        momentum
    });
    returns
}

fn sample_year<R: Rng + ?Sized>(
    year_index: usize,
    momentum: f64,
    params: &EffectiveParameters,
    rng: &mut R,
) -> (f64, f64) {
    let z = standard_normal(rng);
    let momentum = momentum * MOMENTUM_CARRY + z * SHOCK_WEIGHT;
    let mut annual_return = params.expected_return + momentum * params.volatility;

    if year_index < SEQUENCE_RISK_YEARS && annual_return < params.expected_return {
        annual_return *= rng.random_range(1.0..SEQUENCE_RISK_MAX_FACTOR);
    }

    if rng.random::<f64>() < FAT_TAIL_PROBABILITY {
        annual_return *= if rng.random::<f64>() < 0.5 {
            FAT_TAIL_DAMPEN
        } else {
            FAT_TAIL_AMPLIFY
        };
    }

    (momentum, annual_return)
}

fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // random() is [0, 1); flip it so ln never sees zero.
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::StrategyAllocation;
    use proptest::prelude::{any, prop_assert, prop_assert_eq, proptest};
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn params(expected_return: f64, volatility: f64) -> EffectiveParameters {
        EffectiveParameters {
            expected_return,
            volatility,
            normalized_allocation: StrategyAllocation::new(100.0, 0.0, 0.0),
        }
    }

    fn scenario(returns: Vec<f64>) -> StressScenario {
        StressScenario {
            key: "test".to_string(),
            name: "Test".to_string(),
            returns,
            inflation_override: None,
        }
    }

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(42)
    }

    #[test]
    fn no_scenario_yields_horizon_length() {
        let out = generate_annual_returns(30, &params(7.0, 12.0), None, &mut rng());
        assert_eq!(out.len(), 30);
        assert!(out.iter().all(|r| r.is_finite()));
    }

    #[test]
    fn long_scenario_is_truncated_to_horizon_without_randomness() {
        let stress = scenario(vec![-37.0, 26.5, 15.1, 2.1, 16.0]);
        let out = generate_annual_returns(3, &params(7.0, 12.0), Some(&stress), &mut rng());
        assert_eq!(out, vec![-37.0, 26.5, 15.1]);
    }

    #[test]
    fn scenario_equal_to_horizon_is_copied_exactly() {
        let stress = scenario(vec![-10.0, 5.0]);
        let a = generate_annual_returns(2, &params(7.0, 12.0), Some(&stress), &mut rng());
        let b = generate_annual_returns(
            2,
            &params(7.0, 12.0),
            Some(&stress),
            &mut ChaCha20Rng::seed_from_u64(999),
        );
        assert_eq!(a, vec![-10.0, 5.0]);
        assert_eq!(a, b);
    }

    #[test]
    fn short_scenario_prefix_is_followed_by_sampled_years() {
        let stress = scenario(vec![-37.0, 26.5]);
        let out = generate_annual_returns(10, &params(7.0, 12.0), Some(&stress), &mut rng());
        assert_eq!(out.len(), 10);
        assert_eq!(&out[..2], &[-37.0, 26.5]);
    }

    #[test]
    fn zero_volatility_only_varies_by_fat_tail_multiplier() {
        let mut rng = rng();
        for _ in 0..200 {
            let out = generate_annual_returns(20, &params(6.0, 0.0), None, &mut rng);
            for r in out {
                assert!(r == 6.0 || r == 3.0 || r == 9.0, "unexpected return {r}");
            }
        }
    }

    #[test]
    fn zero_return_zero_volatility_is_always_zero() {
        let out = generate_annual_returns(50, &params(0.0, 0.0), None, &mut rng());
        assert!(out.iter().all(|&r| r == 0.0));
    }

    #[test]
    fn same_seed_reproduces_sequence() {
        let a = generate_annual_returns(25, &params(7.0, 15.0), None, &mut rng());
        let b = generate_annual_returns(25, &params(7.0, 15.0), None, &mut rng());
        assert_eq!(a, b);
    }

    #[test]
    fn sample_mean_tracks_expected_return() {
        let mut rng = rng();
        let mut sum = 0.0;
        let mut count = 0.0;
        for _ in 0..2_000 {
            // Skip the sequence-risk years so the draw is symmetric.
            let out = generate_annual_returns(15, &params(7.0, 10.0), None, &mut rng);
            for r in &out[5..] {
                sum += r;
                count += 1.0;
            }
        }
        let mean = sum / count;
        assert!((mean - 7.0).abs() < 0.5, "mean {mean} too far from 7");
    }

    #[test]
    fn standard_normal_is_roughly_unit_variance() {
        let mut rng = rng();
        let n = 20_000;
        let samples: Vec<f64> = (0..n).map(|_| standard_normal(&mut rng)).collect();
        let mean = samples.iter().sum::<f64>() / n as f64;
        let var = samples.iter().map(|z| (z - mean).powi(2)).sum::<f64>() / n as f64;
        assert!(mean.abs() < 0.05, "mean {mean}");
        assert!((var - 1.0).abs() < 0.05, "variance {var}");
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(64))]

        #[test]
        fn prop_length_always_equals_horizon(
            seed in any::<u64>(),
            horizon in 1u32..60,
            scenario_len in 0usize..80,
            expected_bp in -500i32..1500,
            vol_bp in 0u32..3000
        ) {
            let stress = scenario((0..scenario_len).map(|i| i as f64 - 20.0).collect());
            let p = params(expected_bp as f64 / 100.0, vol_bp as f64 / 100.0);
            let mut rng = ChaCha20Rng::seed_from_u64(seed);
            let with = generate_annual_returns(horizon, &p, Some(&stress), &mut rng);
            let without = generate_annual_returns(horizon, &p, None, &mut rng);

            prop_assert_eq!(with.len(), horizon as usize);
            prop_assert_eq!(without.len(), horizon as usize);
            let k = scenario_len.min(horizon as usize);
            prop_assert!(with[..k].iter().zip(&stress.returns).all(|(a, b)| a == b));
        }
    }
}

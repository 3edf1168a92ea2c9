use std::f64::consts::PI;

use super::types::{PercentilePaths, SimulationConfig, SimulationResult};

#[derive(Debug)]
struct TrialOutcome {
    final_balance: f64,
    depletion_year: Option<u32>,
}

/// Accumulates simulated balances year-major so percentiles can be taken
/// across trials at each year index.
struct PathAccumulator {
    balances: Vec<Vec<f64>>,
}

impl PathAccumulator {
    fn new(years: u32, expected_trials: usize) -> Self {
        let balances = (0..=years)
            .map(|_| Vec::with_capacity(expected_trials))
            .collect();
        Self { balances }
    }

    fn push(&mut self, year: usize, balance: f64) {
        self.balances[year].push(balance);
    }

    fn into_percentile_paths(mut self) -> PercentilePaths {
        let mut p10 = Vec::with_capacity(self.balances.len());
        let mut p50 = Vec::with_capacity(self.balances.len());
        let mut p90 = Vec::with_capacity(self.balances.len());
        for year_balances in &mut self.balances {
            p10.push(percentile(year_balances, 10.0));
            p50.push(percentile(year_balances, 50.0));
            p90.push(percentile(year_balances, 90.0));
        }
        PercentilePaths { p10, p50, p90 }
    }
}

/// Run `iterations` independent market paths over the configured horizon and
/// aggregate survival statistics. Pure function of (config, iterations):
/// per-trial seeds derive from `config.seed` and the trial index alone, so
/// identical inputs always reproduce identical results.
pub fn run_simulation(
    config: &SimulationConfig,
    iterations: u32,
) -> Result<SimulationResult, String> {
    config.validate()?;
    if iterations == 0 {
        return Err("iterations must be > 0".to_string());
    }

    let mut acc = PathAccumulator::new(config.years, iterations as usize);
    let mut final_balances = Vec::with_capacity(iterations as usize);
    let mut depletion_years = Vec::new();

    for trial_id in 0..iterations {
        let mut rng = Rng::new(derive_seed(config.seed, trial_id));
        let outcome = simulate_trial(config, &mut rng, &mut acc);
        final_balances.push(outcome.final_balance);
        if let Some(year) = outcome.depletion_year {
            depletion_years.push(year);
        }
    }

    let successes = final_balances.iter().filter(|b| **b > 0.0).count();
    let success_rate = successes as f64 / iterations as f64;

    let mut surviving: Vec<f64> = final_balances.iter().copied().filter(|b| *b > 0.0).collect();
    let median_final_balance = if surviving.is_empty() {
        0.0
    } else {
        percentile(&mut surviving, 50.0)
    };

    let average_depletion_year = if depletion_years.is_empty() {
        None
    } else {
        Some(depletion_years.iter().map(|y| *y as f64).sum::<f64>() / depletion_years.len() as f64)
    };

    Ok(SimulationResult {
        success_rate,
        median_final_balance,
        average_depletion_year,
        percentile_paths: acc.into_percentile_paths(),
        iterations,
        years: config.years,
        annual_withdrawal: config.withdrawal_amount,
        withdrawal_rate: config.withdrawal_amount / config.starting_balance,
    })
}

fn simulate_trial(config: &SimulationConfig, rng: &mut Rng, acc: &mut PathAccumulator) -> TrialOutcome {
    let mut balance = config.starting_balance;
    let mut depletion_year = None;
    acc.push(0, balance);

    for year in 1..=config.years {
        let market_return = config.annual_return + config.annual_std_dev * rng.standard_normal();
        balance *= 1.0 + market_return - config.management_fee;

        let withdrawal = if config.adjust_for_inflation {
            config.withdrawal_amount * (1.0 + config.inflation_rate).powi(year as i32 - 1)
        } else {
            config.withdrawal_amount
        };
        balance -= withdrawal;

        // Once the fund is exhausted it stays at zero; later withdrawals are
        // still attempted but cannot push the balance negative or revive it.
        if balance <= 0.0 {
            if depletion_year.is_none() {
                depletion_year = Some(year);
            }
            balance = 0.0;
        }
        acc.push(year as usize, balance);
    }

    TrialOutcome {
        final_balance: balance,
        depletion_year,
    }
}

fn derive_seed(base_seed: u64, trial_id: u32) -> u64 {
    splitmix64(base_seed ^ ((trial_id as u64) << 1 | 1))
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

struct Rng {
    state: u64,
    cached_normal: Option<f64>,
}

impl Rng {
    fn new(seed: u64) -> Self {
        let state = if seed == 0 {
            0xA5A5_A5A5_A5A5_A5A5
        } else {
            seed
        };
        Self {
            state,
            cached_normal: None,
        }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    fn next_f64(&mut self) -> f64 {
        const DENOM: f64 = (1_u64 << 53) as f64;
        let v = self.next_u64() >> 11;
        ((v as f64) + 0.5) / DENOM
    }

    fn standard_normal(&mut self) -> f64 {
        if let Some(z) = self.cached_normal.take() {
            return z;
        }

        let u1 = self.next_f64().max(1e-12);
        let u2 = self.next_f64();
        let r = (-2.0 * u1.ln()).sqrt();
        let theta = 2.0 * PI * u2;

        let z0 = r * theta.cos();
        let z1 = r * theta.sin();
        self.cached_normal = Some(z1);
        z0
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{any, prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn base_config() -> SimulationConfig {
        SimulationConfig::new(1_000_000.0, 0.07, 0.15, 40_000.0, 30)
    }

    #[test]
    fn result_echoes_inputs_and_shapes() {
        let result = run_simulation(&base_config(), 100).expect("valid run");

        assert!((0.0..=1.0).contains(&result.success_rate));
        assert_eq!(result.iterations, 100);
        assert_eq!(result.years, 30);
        assert_approx(result.annual_withdrawal, 40_000.0, EPS);
        assert_approx(result.withdrawal_rate, 0.04, EPS);
        assert_eq!(result.percentile_paths.p10.len(), 31);
        assert_eq!(result.percentile_paths.p50.len(), 31);
        assert_eq!(result.percentile_paths.p90.len(), 31);
    }

    #[test]
    fn percentile_paths_are_ordered_and_start_at_balance() {
        let mut config = base_config();
        config.years = 10;
        let result = run_simulation(&config, 500).expect("valid run");
        let paths = &result.percentile_paths;

        assert_approx(paths.p10[0], 1_000_000.0, EPS);
        assert_approx(paths.p50[0], 1_000_000.0, EPS);
        assert_approx(paths.p90[0], 1_000_000.0, EPS);
        for i in 0..=10 {
            assert!(paths.p10[i] <= paths.p50[i] + EPS);
            assert!(paths.p50[i] <= paths.p90[i] + EPS);
            assert!(paths.p10[i] >= 0.0);
        }
    }

    #[test]
    fn zero_withdrawal_always_survives() {
        let mut config = base_config();
        config.withdrawal_amount = 0.0;
        let result = run_simulation(&config, 500).expect("valid run");

        assert_approx(result.success_rate, 1.0, EPS);
        assert!(result.average_depletion_year.is_none());
        assert_approx(result.withdrawal_rate, 0.0, EPS);
    }

    #[test]
    fn extreme_withdrawal_depletes_early() {
        let mut config = base_config();
        config.withdrawal_amount = 200_000.0;
        let result = run_simulation(&config, 500).expect("valid run");

        assert!(result.success_rate < 0.1, "got {}", result.success_rate);
        let depletion = result
            .average_depletion_year
            .expect("paths must deplete");
        assert!(depletion < 10.0, "got {depletion}");
    }

    #[test]
    fn inflation_adjustment_lowers_success_rate() {
        let with_inflation = run_simulation(&base_config(), 1_000).expect("valid run");

        let mut flat = base_config();
        flat.adjust_for_inflation = false;
        let without_inflation = run_simulation(&flat, 1_000).expect("valid run");

        assert!(with_inflation.success_rate < without_inflation.success_rate);
    }

    #[test]
    fn management_fee_lowers_success_rate() {
        let mut free = base_config();
        free.management_fee = 0.0;
        let no_fee = run_simulation(&free, 1_000).expect("valid run");

        let mut costly = base_config();
        costly.management_fee = 0.02;
        let with_fee = run_simulation(&costly, 1_000).expect("valid run");

        assert!(with_fee.success_rate < no_fee.success_rate);
    }

    #[test]
    fn zero_volatility_matches_closed_form_trajectory() {
        let mut config = SimulationConfig::new(1_000_000.0, 0.05, 0.0, 40_000.0, 5);
        config.management_fee = 0.0;
        config.adjust_for_inflation = false;
        let result = run_simulation(&config, 10).expect("valid run");
        let paths = &result.percentile_paths;

        let mut expected = 1_000_000.0;
        let mut oracle = vec![expected];
        for _ in 0..5 {
            expected = expected * 1.05 - 40_000.0;
            oracle.push(expected);
        }

        for i in 0..oracle.len() {
            assert_approx(paths.p10[i], oracle[i], 1e-6);
            assert_approx(paths.p50[i], oracle[i], 1e-6);
            assert_approx(paths.p90[i], oracle[i], 1e-6);
        }
        assert_approx(result.success_rate, 1.0, EPS);
        assert_approx(result.median_final_balance, expected, 1e-6);
    }

    #[test]
    fn depleted_balances_stay_floored_at_zero() {
        // Guaranteed first-year wipeout: 100k shrinks to 70k, then an 80k
        // withdrawal lands.
        let mut config = SimulationConfig::new(100_000.0, -0.30, 0.0, 80_000.0, 10);
        config.management_fee = 0.0;
        config.adjust_for_inflation = false;
        let result = run_simulation(&config, 20).expect("valid run");

        assert_approx(result.success_rate, 0.0, EPS);
        assert_approx(result.median_final_balance, 0.0, EPS);
        assert_approx(
            result.average_depletion_year.expect("must deplete"),
            1.0,
            EPS,
        );
        for i in 1..result.percentile_paths.p90.len() {
            assert_approx(result.percentile_paths.p90[i], 0.0, EPS);
        }
    }

    #[test]
    fn zero_iterations_is_an_error() {
        let err = run_simulation(&base_config(), 0).expect_err("must reject");
        assert!(err.contains("iterations"));
    }

    #[test]
    fn zero_years_yields_trivial_single_point_path() {
        let mut config = base_config();
        config.years = 0;
        let result = run_simulation(&config, 50).expect("valid run");

        assert_approx(result.success_rate, 1.0, EPS);
        assert!(result.average_depletion_year.is_none());
        assert_eq!(result.percentile_paths.p50.len(), 1);
        assert_approx(result.percentile_paths.p50[0], 1_000_000.0, EPS);
        assert_approx(result.median_final_balance, 1_000_000.0, EPS);
    }

    #[test]
    fn identical_config_reproduces_identical_results() {
        let config = base_config();
        let first = run_simulation(&config, 200).expect("valid run");
        let second = run_simulation(&config, 200).expect("valid run");

        assert_approx(first.success_rate, second.success_rate, 0.0);
        assert_eq!(first.percentile_paths.p10, second.percentile_paths.p10);
        assert_eq!(first.percentile_paths.p50, second.percentile_paths.p50);
        assert_eq!(first.percentile_paths.p90, second.percentile_paths.p90);
    }

    #[test]
    fn invalid_config_fails_before_simulating() {
        let mut config = base_config();
        config.starting_balance = 0.0;
        assert!(run_simulation(&config, 100).is_err());
    }

    #[test]
    fn percentile_interpolates_between_order_statistics() {
        let mut values = vec![40.0, 10.0, 20.0, 30.0];
        assert_approx(percentile(&mut values, 50.0), 25.0, EPS);
        assert_approx(percentile(&mut values, 10.0), 13.0, EPS);
        assert_approx(percentile(&mut values, 90.0), 37.0, EPS);
        assert_approx(percentile(&mut values, 0.0), 10.0, EPS);
        assert_approx(percentile(&mut values, 100.0), 40.0, EPS);

        let mut single = vec![7.0];
        assert_approx(percentile(&mut single, 90.0), 7.0, EPS);
        assert_approx(percentile(&mut [], 50.0), 0.0, EPS);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_results_are_well_formed(
            seed in any::<u64>(),
            balance in 10_000u32..5_000_000,
            return_bp in -500i32..1500,
            vol_bp in 0u32..3000,
            withdrawal_pct in 0u32..12,
            years in 0u32..25,
            iterations in 5u32..40
        ) {
            let mut config = SimulationConfig::new(
                balance as f64,
                return_bp as f64 / 10_000.0,
                vol_bp as f64 / 10_000.0,
                balance as f64 * withdrawal_pct as f64 / 100.0,
                years,
            );
            config.seed = seed;

            let result = run_simulation(&config, iterations).expect("valid run");
            prop_assert!((0.0..=1.0).contains(&result.success_rate));
            prop_assert!(result.median_final_balance.is_finite());
            prop_assert!(result.median_final_balance >= 0.0);

            let paths = &result.percentile_paths;
            prop_assert!(paths.p10.len() == years as usize + 1);
            prop_assert!(paths.p50.len() == years as usize + 1);
            prop_assert!(paths.p90.len() == years as usize + 1);
            for i in 0..paths.p10.len() {
                prop_assert!(paths.p10[i].is_finite());
                prop_assert!(paths.p10[i] >= 0.0);
                prop_assert!(paths.p10[i] <= paths.p50[i] + 1e-9);
                prop_assert!(paths.p50[i] <= paths.p90[i] + 1e-9);
            }

            if let Some(depletion) = result.average_depletion_year {
                prop_assert!(depletion >= 1.0);
                prop_assert!(depletion <= years as f64);
            }
        }
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_higher_withdrawal_never_raises_success_rate(
            seed in any::<u64>(),
            withdrawal_lo_pct in 0u32..8,
            withdrawal_gap_pct in 1u32..8,
            years in 1u32..20
        ) {
            let mut lower = SimulationConfig::new(1_000_000.0, 0.06, 0.12, 0.0, years);
            lower.seed = seed;
            lower.withdrawal_amount = 1_000_000.0 * withdrawal_lo_pct as f64 / 100.0;

            let mut higher = lower.clone();
            higher.withdrawal_amount =
                1_000_000.0 * (withdrawal_lo_pct + withdrawal_gap_pct) as f64 / 100.0;

            // Probes share market draws (seeds depend only on trial index),
            // so success is monotone non-increasing in the withdrawal.
            let lower_result = run_simulation(&lower, 60).expect("valid run");
            let higher_result = run_simulation(&higher, 60).expect("valid run");
            prop_assert!(higher_result.success_rate <= lower_result.success_rate + 1e-12);
        }
    }
}

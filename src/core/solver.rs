use serde::Serialize;

use super::engine::run_simulation;
use super::types::SimulationConfig;

/// Withdrawals are only searched up to this fraction of the starting balance.
const MAX_WITHDRAWAL_FRACTION: f64 = 0.10;

#[derive(Debug, Clone, Copy)]
pub struct SolveConfig {
    pub target_success_rate: f64,
    /// Trial count per bisection probe; reduced for speed.
    pub probe_iterations: u32,
    /// Trial count for the confirmation run on the solved amount.
    pub final_iterations: u32,
    /// Bracket width in dollars at which the search stops.
    pub tolerance: f64,
    pub max_probes: u32,
}

impl Default for SolveConfig {
    fn default() -> Self {
        Self {
            target_success_rate: 0.7,
            probe_iterations: 1_000,
            final_iterations: 5_000,
            tolerance: 100.0,
            max_probes: 64,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolveIteration {
    pub probe: u32,
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub candidate_withdrawal: f64,
    pub success_rate: f64,
    pub success_ci_half_width: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawalSolveResult {
    pub target_success_rate: f64,
    pub search_min: f64,
    pub search_max: f64,
    pub tolerance: f64,
    /// Largest withdrawal meeting the target, `None` when even a zero
    /// withdrawal misses it.
    pub sustainable_withdrawal: Option<f64>,
    pub achieved_success_rate: Option<f64>,
    pub achieved_ci_half_width: Option<f64>,
    pub iterations: Vec<SolveIteration>,
    pub converged: bool,
    pub feasible: bool,
    pub message: String,
}

/// Bisection search for the largest annual withdrawal whose survival
/// probability still meets the target. Each probe builds a fresh config with
/// the candidate withdrawal; nothing is mutated between runs. Trial seeds
/// depend only on (config.seed, trial index), so all probes evaluate the
/// same market draws and the success rate is genuinely non-increasing in the
/// withdrawal amount.
pub fn solve_sustainable_withdrawal(
    config: &SimulationConfig,
    solve: SolveConfig,
) -> Result<WithdrawalSolveResult, String> {
    config.validate()?;
    validate_solve_config(solve)?;

    let search_min = 0.0;
    let search_max = config.starting_balance * MAX_WITHDRAWAL_FRACTION;

    let mut iterations = Vec::new();
    let low_rate = probe_success_rate(config, search_min, solve.probe_iterations)?;
    let high_rate = probe_success_rate(config, search_max, solve.probe_iterations)?;

    let mut solved = None;
    let mut converged = false;
    let feasible;
    let message;

    if low_rate + 1e-12 < solve.target_success_rate {
        feasible = false;
        message = "Even a zero withdrawal misses the target success rate.".to_string();
    } else if high_rate + 1e-12 >= solve.target_success_rate {
        solved = Some(search_max);
        converged = true;
        feasible = true;
        message = "The 10% withdrawal cap still meets the target.".to_string();
    } else {
        let mut lo = search_min;
        let mut hi = search_max;
        let mut probe = 0;
        while probe < solve.max_probes {
            probe += 1;
            let mid = (lo + hi) * 0.5;
            let success_rate = probe_success_rate(config, mid, solve.probe_iterations)?;
            iterations.push(SolveIteration {
                probe,
                lower_bound: lo,
                upper_bound: hi,
                candidate_withdrawal: mid,
                success_rate,
                success_ci_half_width: binomial_ci_half_width(
                    success_rate,
                    solve.probe_iterations,
                ),
            });

            if success_rate + 1e-12 >= solve.target_success_rate {
                lo = mid;
            } else {
                hi = mid;
            }

            if (hi - lo).abs() <= solve.tolerance {
                converged = true;
                solved = Some(lo);
                break;
            }
        }
        if solved.is_none() {
            solved = Some(lo);
        }
        feasible = true;
        message = if converged {
            "Solved sustainable withdrawal.".to_string()
        } else {
            "Reached max probes before tolerance was met; returning best estimate.".to_string()
        };
    }

    let mut achieved_success_rate = None;
    let mut achieved_ci_half_width = None;
    if let Some(amount) = solved {
        let rate = probe_success_rate(config, amount, solve.final_iterations)?;
        achieved_success_rate = Some(rate);
        achieved_ci_half_width = Some(binomial_ci_half_width(rate, solve.final_iterations));
    }

    Ok(WithdrawalSolveResult {
        target_success_rate: solve.target_success_rate,
        search_min,
        search_max,
        tolerance: solve.tolerance,
        sustainable_withdrawal: solved,
        achieved_success_rate,
        achieved_ci_half_width,
        iterations,
        converged,
        feasible,
        message,
    })
}

fn probe_success_rate(
    config: &SimulationConfig,
    withdrawal: f64,
    iterations: u32,
) -> Result<f64, String> {
    let mut probe_config = config.clone();
    probe_config.withdrawal_amount = withdrawal;
    Ok(run_simulation(&probe_config, iterations)?.success_rate)
}

fn binomial_ci_half_width(p: f64, n: u32) -> f64 {
    if n == 0 {
        return 0.0;
    }
    let p = p.clamp(0.0, 1.0);
    1.96 * (p * (1.0 - p) / n as f64).sqrt()
}

fn validate_solve_config(solve: SolveConfig) -> Result<(), String> {
    if !(0.0..=1.0).contains(&solve.target_success_rate) {
        return Err("target success rate must be between 0 and 1".to_string());
    }
    if !solve.tolerance.is_finite() || solve.tolerance <= 0.0 {
        return Err("tolerance must be > 0".to_string());
    }
    if solve.probe_iterations == 0 {
        return Err("probe iterations must be > 0".to_string());
    }
    if solve.final_iterations == 0 {
        return Err("final iterations must be > 0".to_string());
    }
    if solve.max_probes == 0 {
        return Err("max probes must be > 0".to_string());
    }
    Ok(())
}

use serde::Serialize;

pub const DEFAULT_INFLATION_RATE: f64 = 0.03;
pub const DEFAULT_MANAGEMENT_FEE: f64 = 0.01;
pub const DEFAULT_SEED: u64 = 42;

/// Inputs for one simulation run. Immutable once built; repeated runs with
/// the same config and iteration count reproduce identical results.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub starting_balance: f64,
    pub annual_return: f64,
    pub annual_std_dev: f64,
    /// Nominal first-year withdrawal in dollars.
    pub withdrawal_amount: f64,
    pub years: u32,
    pub inflation_rate: f64,
    pub management_fee: f64,
    pub adjust_for_inflation: bool,
    pub seed: u64,
}

impl SimulationConfig {
    pub fn new(
        starting_balance: f64,
        annual_return: f64,
        annual_std_dev: f64,
        withdrawal_amount: f64,
        years: u32,
    ) -> Self {
        Self {
            starting_balance,
            annual_return,
            annual_std_dev,
            withdrawal_amount,
            years,
            inflation_rate: DEFAULT_INFLATION_RATE,
            management_fee: DEFAULT_MANAGEMENT_FEE,
            adjust_for_inflation: true,
            seed: DEFAULT_SEED,
        }
    }

    /// Fail-fast input validation; runs before any trial is simulated.
    pub fn validate(&self) -> Result<(), String> {
        if !self.starting_balance.is_finite() || self.starting_balance <= 0.0 {
            return Err("starting balance must be > 0".to_string());
        }
        if !self.annual_return.is_finite() {
            return Err("annual return must be finite".to_string());
        }
        if !self.annual_std_dev.is_finite() || self.annual_std_dev < 0.0 {
            return Err("annual standard deviation must be >= 0".to_string());
        }
        if !self.withdrawal_amount.is_finite() || self.withdrawal_amount < 0.0 {
            return Err("withdrawal amount must be >= 0".to_string());
        }
        if !self.inflation_rate.is_finite() || self.inflation_rate <= -1.0 {
            return Err("inflation rate must be > -100%".to_string());
        }
        if !self.management_fee.is_finite() || self.management_fee < 0.0 {
            return Err("management fee must be >= 0".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PercentilePaths {
    pub p10: Vec<f64>,
    pub p50: Vec<f64>,
    pub p90: Vec<f64>,
}

/// Aggregate outcome of a simulation run. Pure computed value; each path
/// sequence has `years + 1` entries, year 0 being the starting balance.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub success_rate: f64,
    /// Median of final balances among surviving trials, 0 if none survive.
    pub median_final_balance: f64,
    /// Mean depletion year across depleted trials, `None` if every trial
    /// survived the horizon.
    pub average_depletion_year: Option<f64>,
    pub percentile_paths: PercentilePaths,
    pub iterations: u32,
    pub years: u32,
    pub annual_withdrawal: f64,
    /// Nominal withdrawal rate: withdrawal amount over starting balance.
    pub withdrawal_rate: f64,
}

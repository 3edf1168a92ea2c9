mod engine;
mod portfolio;
mod solver;
mod types;

pub use engine::run_simulation;
pub use portfolio::{Portfolio, PresetKey, RiskLevel, preset, preset_by_name, presets};
pub use solver::{SolveConfig, SolveIteration, WithdrawalSolveResult, solve_sustainable_withdrawal};
pub use types::{
    DEFAULT_INFLATION_RATE, DEFAULT_MANAGEMENT_FEE, DEFAULT_SEED, PercentilePaths,
    SimulationConfig, SimulationResult,
};

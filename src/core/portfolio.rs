use std::fmt;
use std::sync::LazyLock;

use clap::ValueEnum;
use serde::Serialize;

// Long-run historical assumptions used to derive portfolio statistics.
const STOCK_RETURN: f64 = 0.10;
const BOND_RETURN: f64 = 0.05;
const STOCK_STD: f64 = 0.20;
const BOND_STD: f64 = 0.05;
const STOCK_BOND_CORRELATION: f64 = 0.1;

const ALLOCATION_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub enum RiskLevel {
    Conservative,
    Moderate,
    Balanced,
    Aggressive,
}

impl RiskLevel {
    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Conservative => "Conservative",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::Balanced => "Balanced",
            RiskLevel::Aggressive => "Aggressive",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An immutable stock/bond allocation with its expected annual return and
/// volatility. Statistics are derived from the historical constants above
/// unless supplied explicitly via [`Portfolio::with_statistics`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Portfolio {
    pub name: String,
    pub stocks_percentage: f64,
    pub bonds_percentage: f64,
    pub expected_return: f64,
    pub std_deviation: f64,
}

impl Portfolio {
    pub fn new(name: &str, stocks_percentage: f64, bonds_percentage: f64) -> Result<Self, String> {
        validate_allocation(stocks_percentage, bonds_percentage)?;
        let (expected_return, std_deviation) =
            derive_statistics(stocks_percentage, bonds_percentage);
        Ok(Self {
            name: name.to_string(),
            stocks_percentage,
            bonds_percentage,
            expected_return,
            std_deviation,
        })
    }

    /// Build a portfolio with pre-specified statistics, bypassing the
    /// historical derivation (used when calibrating against fitted values).
    pub fn with_statistics(
        name: &str,
        stocks_percentage: f64,
        bonds_percentage: f64,
        expected_return: f64,
        std_deviation: f64,
    ) -> Result<Self, String> {
        validate_allocation(stocks_percentage, bonds_percentage)?;
        if !expected_return.is_finite() {
            return Err("expected return must be finite".to_string());
        }
        if !std_deviation.is_finite() || std_deviation < 0.0 {
            return Err("standard deviation must be >= 0".to_string());
        }
        Ok(Self {
            name: name.to_string(),
            stocks_percentage,
            bonds_percentage,
            expected_return,
            std_deviation,
        })
    }

    pub fn risk_level(&self) -> RiskLevel {
        if self.stocks_percentage <= 30.0 {
            RiskLevel::Conservative
        } else if self.stocks_percentage <= 60.0 {
            RiskLevel::Moderate
        } else if self.stocks_percentage <= 80.0 {
            RiskLevel::Balanced
        } else {
            RiskLevel::Aggressive
        }
    }
}

fn validate_allocation(stocks_percentage: f64, bonds_percentage: f64) -> Result<(), String> {
    if !stocks_percentage.is_finite() || !(0.0..=100.0).contains(&stocks_percentage) {
        return Err("stocks percentage must be between 0 and 100".to_string());
    }
    if !bonds_percentage.is_finite() || !(0.0..=100.0).contains(&bonds_percentage) {
        return Err("bonds percentage must be between 0 and 100".to_string());
    }
    if (stocks_percentage + bonds_percentage - 100.0).abs() > ALLOCATION_SUM_TOLERANCE {
        return Err("stock and bond percentages must sum to 100".to_string());
    }
    Ok(())
}

/// Two-asset weighted-mean / variance formula over the historical constants.
fn derive_statistics(stocks_percentage: f64, bonds_percentage: f64) -> (f64, f64) {
    let stock_weight = stocks_percentage / 100.0;
    let bond_weight = bonds_percentage / 100.0;

    let expected_return = stock_weight * STOCK_RETURN + bond_weight * BOND_RETURN;
    let variance = stock_weight.powi(2) * STOCK_STD.powi(2)
        + bond_weight.powi(2) * BOND_STD.powi(2)
        + 2.0 * stock_weight * bond_weight * STOCK_BOND_CORRELATION * STOCK_STD * BOND_STD;

    (expected_return, variance.sqrt())
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PresetKey {
    Conservative,
    Balanced,
    Aggressive,
}

impl PresetKey {
    pub fn as_str(self) -> &'static str {
        match self {
            PresetKey::Conservative => "conservative",
            PresetKey::Balanced => "balanced",
            PresetKey::Aggressive => "aggressive",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        match key {
            "conservative" => Some(PresetKey::Conservative),
            "balanced" => Some(PresetKey::Balanced),
            "aggressive" => Some(PresetKey::Aggressive),
            _ => None,
        }
    }
}

impl fmt::Display for PresetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// The catalog is built once and only ever read after that; the derivation
// cannot fail for the fixed allocations below.
static PRESETS: LazyLock<Vec<(PresetKey, Portfolio)>> = LazyLock::new(|| {
    vec![
        (
            PresetKey::Conservative,
            Portfolio::new("Conservative (50/50)", 50.0, 50.0).expect("valid preset"),
        ),
        (
            PresetKey::Balanced,
            Portfolio::new("Balanced (70/30)", 70.0, 30.0).expect("valid preset"),
        ),
        (
            PresetKey::Aggressive,
            Portfolio::new("Aggressive (90/10)", 90.0, 10.0).expect("valid preset"),
        ),
    ]
});

/// The full ordered preset catalog, conservative through aggressive.
pub fn presets() -> &'static [(PresetKey, Portfolio)] {
    &PRESETS
}

pub fn preset(key: PresetKey) -> &'static Portfolio {
    &PRESETS
        .iter()
        .find(|(k, _)| *k == key)
        .expect("catalog covers every key")
        .1
}

/// Look up a preset by its string identifier. Unknown keys yield `None`,
/// never a fallback portfolio.
pub fn preset_by_name(key: &str) -> Option<&'static Portfolio> {
    PresetKey::parse(key).map(preset)
}

use axum::{
    Router,
    extract::{Json, Query},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use tokio::net::TcpListener;

use crate::core::{
    Portfolio, PresetKey, RiskLevel, SimulationConfig, SimulationResult, SolveConfig,
    WithdrawalSolveResult, preset, presets, run_simulation,
    solve_sustainable_withdrawal,
};

const DEFAULT_ITERATIONS: u32 = 5_000;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum CliWithdrawalMethod {
    Percentage,
    Fixed,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum ApiWithdrawalMethod {
    Percentage,
    Fixed,
}

impl From<CliWithdrawalMethod> for ApiWithdrawalMethod {
    fn from(value: CliWithdrawalMethod) -> Self {
        match value {
            CliWithdrawalMethod::Percentage => ApiWithdrawalMethod::Percentage,
            CliWithdrawalMethod::Fixed => ApiWithdrawalMethod::Fixed,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "endowment",
    about = "Monte Carlo endowment sustainability simulator (stock/bond presets + withdrawal solver)"
)]
pub struct Cli {
    #[arg(long, default_value_t = 1_000_000.0, help = "Starting endowment balance")]
    starting_balance: f64,
    #[arg(
        long,
        value_enum,
        default_value_t = CliWithdrawalMethod::Percentage,
        help = "Withdrawal specification: percentage of balance or fixed dollars"
    )]
    withdrawal_method: CliWithdrawalMethod,
    #[arg(
        long,
        default_value_t = 4.0,
        help = "Annual withdrawal as percent of starting balance, e.g. 4"
    )]
    withdrawal_rate: f64,
    #[arg(
        long,
        help = "Annual withdrawal in dollars; required with --withdrawal-method=fixed"
    )]
    withdrawal_amount: Option<f64>,
    #[arg(long, default_value_t = 30, help = "Horizon in years")]
    years: u32,
    #[arg(
        long,
        default_value_t = 3.0,
        help = "Expected annual inflation in percent"
    )]
    inflation_rate: f64,
    #[arg(long, default_value_t = 1.0, help = "Annual management fee in percent")]
    management_fee: f64,
    #[arg(
        long,
        default_value_t = false,
        help = "Keep withdrawals flat instead of growing them with inflation"
    )]
    flat_withdrawals: bool,
    #[arg(long, default_value_t = DEFAULT_ITERATIONS)]
    iterations: u32,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(
        long,
        value_enum,
        help = "Simulate a single preset instead of the full catalog"
    )]
    portfolio: Option<PresetKey>,
    #[arg(
        long,
        default_value_t = false,
        help = "Solve for the sustainable withdrawal instead of simulating"
    )]
    solve_sustainable: bool,
    #[arg(
        long,
        default_value_t = 70.0,
        help = "Target Monte Carlo success probability for the solver in percent"
    )]
    target_success_rate: f64,
}

/// Engine-facing request shared by the CLI and the HTTP API, with the
/// withdrawal already resolved to nominal dollars.
#[derive(Debug, Clone)]
struct CalculateRequest {
    starting_balance: f64,
    withdrawal_method: ApiWithdrawalMethod,
    withdrawal_amount: f64,
    years: u32,
    inflation_rate: f64,
    management_fee: f64,
    adjust_for_inflation: bool,
    iterations: u32,
    seed: u64,
}

impl CalculateRequest {
    fn config_for(&self, portfolio: &Portfolio) -> SimulationConfig {
        SimulationConfig {
            starting_balance: self.starting_balance,
            annual_return: portfolio.expected_return,
            annual_std_dev: portfolio.std_deviation,
            withdrawal_amount: self.withdrawal_amount,
            years: self.years,
            inflation_rate: self.inflation_rate,
            management_fee: self.management_fee,
            adjust_for_inflation: self.adjust_for_inflation,
            seed: self.seed,
        }
    }
}

fn resolve_withdrawal(
    method: ApiWithdrawalMethod,
    starting_balance: f64,
    rate_percent: Option<f64>,
    amount: Option<f64>,
) -> Result<f64, String> {
    match method {
        ApiWithdrawalMethod::Percentage => {
            let Some(rate) = rate_percent else {
                return Err("withdrawal rate is required for the percentage method".to_string());
            };
            if !rate.is_finite() || !(0.0..=100.0).contains(&rate) {
                return Err("withdrawal rate must be between 0 and 100".to_string());
            }
            Ok(starting_balance * rate / 100.0)
        }
        ApiWithdrawalMethod::Fixed => {
            let Some(amount) = amount else {
                return Err("withdrawal amount is required for the fixed method".to_string());
            };
            if !amount.is_finite() || amount < 0.0 {
                return Err("withdrawal amount must be >= 0".to_string());
            }
            Ok(amount)
        }
    }
}

fn build_request_from_cli(cli: &Cli) -> Result<CalculateRequest, String> {
    if !cli.starting_balance.is_finite() || cli.starting_balance <= 0.0 {
        return Err("--starting-balance must be > 0".to_string());
    }
    if cli.iterations == 0 {
        return Err("--iterations must be > 0".to_string());
    }
    if !(0.0..=100.0).contains(&cli.inflation_rate) {
        return Err("--inflation-rate must be between 0 and 100".to_string());
    }
    if !(0.0..=100.0).contains(&cli.management_fee) {
        return Err("--management-fee must be between 0 and 100".to_string());
    }

    let method: ApiWithdrawalMethod = cli.withdrawal_method.into();
    let withdrawal_amount = resolve_withdrawal(
        method,
        cli.starting_balance,
        Some(cli.withdrawal_rate),
        cli.withdrawal_amount,
    )?;

    Ok(CalculateRequest {
        starting_balance: cli.starting_balance,
        withdrawal_method: method,
        withdrawal_amount,
        years: cli.years,
        inflation_rate: cli.inflation_rate / 100.0,
        management_fee: cli.management_fee / 100.0,
        adjust_for_inflation: !cli.flat_withdrawals,
        iterations: cli.iterations,
        seed: cli.seed,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CalculatePayload {
    #[serde(alias = "starting_balance")]
    starting_balance: Option<f64>,
    #[serde(alias = "withdrawal_method")]
    withdrawal_method: Option<ApiWithdrawalMethod>,
    /// Percent of starting balance, e.g. 4 for a 4% draw.
    #[serde(alias = "withdrawal_rate")]
    withdrawal_rate: Option<f64>,
    #[serde(alias = "withdrawal_amount")]
    withdrawal_amount: Option<f64>,
    years: Option<u32>,
    /// Fraction, e.g. 0.03.
    #[serde(alias = "inflation_rate")]
    inflation_rate: Option<f64>,
    /// Fraction, e.g. 0.01.
    #[serde(alias = "management_fee")]
    management_fee: Option<f64>,
    #[serde(alias = "adjust_for_inflation")]
    adjust_for_inflation: Option<bool>,
    iterations: Option<u32>,
    seed: Option<u64>,
}

fn build_request_from_payload(payload: CalculatePayload) -> Result<CalculateRequest, String> {
    let starting_balance = payload.starting_balance.unwrap_or(1_000_000.0);
    if !starting_balance.is_finite() || starting_balance <= 0.0 {
        return Err("starting balance must be greater than 0".to_string());
    }

    let years = payload.years.unwrap_or(30);
    let inflation_rate = payload.inflation_rate.unwrap_or(0.03);
    let management_fee = payload.management_fee.unwrap_or(0.01);
    if !inflation_rate.is_finite() || inflation_rate <= -1.0 {
        return Err("inflation rate must be > -100%".to_string());
    }
    if !management_fee.is_finite() || management_fee < 0.0 {
        return Err("management fee must be >= 0".to_string());
    }

    let iterations = payload.iterations.unwrap_or(DEFAULT_ITERATIONS);
    if iterations == 0 {
        return Err("iterations must be > 0".to_string());
    }

    let method = payload
        .withdrawal_method
        .unwrap_or(ApiWithdrawalMethod::Percentage);
    let withdrawal_amount = resolve_withdrawal(
        method,
        starting_balance,
        payload.withdrawal_rate,
        payload.withdrawal_amount,
    )?;

    Ok(CalculateRequest {
        starting_balance,
        withdrawal_method: method,
        withdrawal_amount,
        years,
        inflation_rate,
        management_fee,
        adjust_for_inflation: payload.adjust_for_inflation.unwrap_or(true),
        iterations,
        seed: payload.seed.unwrap_or(crate::core::DEFAULT_SEED),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioListEntry {
    id: PresetKey,
    name: String,
    stocks_percentage: f64,
    bonds_percentage: f64,
    expected_return: f64,
    std_deviation: f64,
    risk_level: RiskLevel,
}

impl PortfolioListEntry {
    fn new(id: PresetKey, portfolio: &Portfolio) -> Self {
        Self {
            id,
            name: portfolio.name.clone(),
            stocks_percentage: portfolio.stocks_percentage,
            bonds_percentage: portfolio.bonds_percentage,
            expected_return: portfolio.expected_return,
            std_deviation: portfolio.std_deviation,
            risk_level: portfolio.risk_level(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalculationDetails {
    starting_balance: f64,
    annual_withdrawal: f64,
    withdrawal_rate_percent: f64,
    total_withdrawals: f64,
    inflation_adjusted_final_withdrawal: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioSummary {
    name: String,
    expected_return: f64,
    std_deviation: f64,
    risk_level: RiskLevel,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PortfolioOutcome {
    id: PresetKey,
    portfolio: PortfolioSummary,
    #[serde(flatten)]
    result: SimulationResult,
    percentile_10_final: f64,
    percentile_90_final: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CalculateResponse {
    balance: f64,
    years: u32,
    inflation_rate: f64,
    withdrawal_method: ApiWithdrawalMethod,
    adjust_for_inflation: bool,
    iterations: u32,
    calculation_details: CalculationDetails,
    portfolios: Vec<PortfolioOutcome>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

fn portfolio_outcome(
    id: PresetKey,
    portfolio: &Portfolio,
    result: SimulationResult,
) -> PortfolioOutcome {
    let percentile_10_final = result
        .percentile_paths
        .p10
        .last()
        .copied()
        .unwrap_or(result.median_final_balance);
    let percentile_90_final = result
        .percentile_paths
        .p90
        .last()
        .copied()
        .unwrap_or(result.median_final_balance);
    PortfolioOutcome {
        id,
        portfolio: PortfolioSummary {
            name: portfolio.name.clone(),
            expected_return: portfolio.expected_return,
            std_deviation: portfolio.std_deviation,
            risk_level: portfolio.risk_level(),
        },
        result,
        percentile_10_final,
        percentile_90_final,
    }
}

/// Run the engine for every preset (or one selected preset) and assemble the
/// API response.
fn run_calculate(
    request: &CalculateRequest,
    only: Option<PresetKey>,
) -> Result<CalculateResponse, String> {
    let mut outcomes = Vec::new();
    for (key, portfolio) in presets() {
        if only.is_some_and(|selected| selected != *key) {
            continue;
        }
        let config = request.config_for(portfolio);
        let result = run_simulation(&config, request.iterations)?;
        outcomes.push(portfolio_outcome(*key, portfolio, result));
    }

    let final_withdrawal = if request.adjust_for_inflation {
        request.withdrawal_amount * (1.0 + request.inflation_rate).powi(request.years as i32)
    } else {
        request.withdrawal_amount
    };

    Ok(CalculateResponse {
        balance: request.starting_balance,
        years: request.years,
        inflation_rate: request.inflation_rate,
        withdrawal_method: request.withdrawal_method,
        adjust_for_inflation: request.adjust_for_inflation,
        iterations: request.iterations,
        calculation_details: CalculationDetails {
            starting_balance: request.starting_balance,
            annual_withdrawal: request.withdrawal_amount,
            withdrawal_rate_percent: request.withdrawal_amount / request.starting_balance * 100.0,
            total_withdrawals: request.withdrawal_amount * request.years as f64,
            inflation_adjusted_final_withdrawal: final_withdrawal,
        },
        portfolios: outcomes,
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SustainablePayload {
    #[serde(flatten)]
    calculate: CalculatePayload,
    /// Preset key; defaults to "balanced".
    portfolio: Option<String>,
    /// Overrides the preset's expected annual return (fraction).
    #[serde(alias = "expected_return")]
    expected_return: Option<f64>,
    /// Overrides the preset's annual volatility (fraction).
    #[serde(alias = "std_deviation")]
    std_deviation: Option<f64>,
    /// Fraction in [0, 1]; defaults to 0.7.
    #[serde(alias = "target_success_rate")]
    target_success_rate: Option<f64>,
    #[serde(alias = "probe_iterations")]
    probe_iterations: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SustainableResponse {
    id: PresetKey,
    portfolio: PortfolioSummary,
    solve: WithdrawalSolveResult,
}

fn run_sustainable(payload: SustainablePayload) -> Result<SustainableResponse, String> {
    let key = match payload.portfolio.as_deref() {
        None => PresetKey::Balanced,
        Some(raw) => PresetKey::parse(raw).ok_or_else(|| format!("unknown portfolio: {raw}"))?,
    };
    let portfolio = preset(key);
    let expected_return = payload.expected_return.unwrap_or(portfolio.expected_return);
    let std_deviation = payload.std_deviation.unwrap_or(portfolio.std_deviation);

    // The solver searches over withdrawals itself; the payload's own
    // withdrawal specification is optional here.
    let mut calculate = payload.calculate;
    if calculate.withdrawal_rate.is_none() && calculate.withdrawal_amount.is_none() {
        calculate.withdrawal_rate = Some(0.0);
    }
    let request = build_request_from_payload(calculate)?;
    let mut solve = SolveConfig {
        final_iterations: request.iterations,
        ..SolveConfig::default()
    };
    if let Some(target) = payload.target_success_rate {
        solve.target_success_rate = target;
    }
    if let Some(probes) = payload.probe_iterations {
        solve.probe_iterations = probes;
    }

    let mut config = request.config_for(portfolio);
    config.annual_return = expected_return;
    config.annual_std_dev = std_deviation;
    let solve_result = solve_sustainable_withdrawal(&config, solve)?;
    Ok(SustainableResponse {
        id: key,
        portfolio: PortfolioSummary {
            name: portfolio.name.clone(),
            expected_return,
            std_deviation,
            risk_level: portfolio.risk_level(),
        },
        solve: solve_result,
    })
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/api/portfolios", get(portfolios_handler))
        .route(
            "/api/calculate",
            get(calculate_get_handler).post(calculate_post_handler),
        )
        .route(
            "/api/sustainable-withdrawal",
            axum::routing::post(sustainable_handler),
        )
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    println!("Endowment HTTP API listening on http://{addr}");
    println!("Local access: http://127.0.0.1:{port}/health");

    axum::serve(listener, app).await
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    message: &'static str,
    version: &'static str,
}

async fn health_handler() -> Response {
    json_response(
        StatusCode::OK,
        HealthResponse {
            status: "ok",
            message: "endowment API is running",
            version: env!("CARGO_PKG_VERSION"),
        },
    )
}

async fn portfolios_handler() -> Response {
    let entries: Vec<PortfolioListEntry> = presets()
        .iter()
        .map(|(key, portfolio)| PortfolioListEntry::new(*key, portfolio))
        .collect();
    json_response(StatusCode::OK, entries)
}

async fn calculate_get_handler(Query(payload): Query<CalculatePayload>) -> Response {
    calculate_handler_impl(payload)
}

async fn calculate_post_handler(Json(payload): Json<CalculatePayload>) -> Response {
    calculate_handler_impl(payload)
}

fn calculate_handler_impl(payload: CalculatePayload) -> Response {
    let request = match build_request_from_payload(payload) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    match run_calculate(&request, None) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn sustainable_handler(Json(payload): Json<SustainablePayload>) -> Response {
    match run_sustainable(payload) {
        Ok(response) => json_response(StatusCode::OK, response),
        Err(msg) => error_response(StatusCode::BAD_REQUEST, &msg),
    }
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        "no-store".parse().expect("valid header"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

/// One-shot command-line entrypoint; returns the JSON document to print.
pub fn run_cli(cli: &Cli) -> Result<String, String> {
    let request = build_request_from_cli(cli)?;

    if cli.solve_sustainable {
        if !(0.0..=100.0).contains(&cli.target_success_rate) {
            return Err("--target-success-rate must be between 0 and 100".to_string());
        }
        let key = cli.portfolio.unwrap_or(PresetKey::Balanced);
        let portfolio = preset(key);
        let solve = SolveConfig {
            target_success_rate: cli.target_success_rate / 100.0,
            final_iterations: request.iterations,
            ..SolveConfig::default()
        };
        let config = request.config_for(portfolio);
        let result = solve_sustainable_withdrawal(&config, solve)?;
        let response = SustainableResponse {
            id: key,
            portfolio: PortfolioSummary {
                name: portfolio.name.clone(),
                expected_return: portfolio.expected_return,
                std_deviation: portfolio.std_deviation,
                risk_level: portfolio.risk_level(),
            },
            solve: result,
        };
        return serde_json::to_string_pretty(&response)
            .map_err(|e| format!("failed to serialize result: {e}"));
    }

    let response = run_calculate(&request, cli.portfolio)?;
    serde_json::to_string_pretty(&response).map_err(|e| format!("failed to serialize result: {e}"))
}

use crate::environment::TradingEnvironment;
use chrono::{DateTime, Months, Utc};
use derive_more::Constructor;
use itertools::izip;
use serde::Serialize;

/// The return realised by the algorithm over one trading day.
#[derive(Copy, Clone, PartialEq, Debug, Serialize, Constructor)]
pub struct DailyReturn {
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub date: DateTime<Utc>,
    pub returns: f64,
}

/// Risk metrics over a date window: algorithm & benchmark period returns, volatilities, the
/// matched treasury return, and the derived alpha/beta/sharpe/max-drawdown figures.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct RiskMetrics {
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub start_date: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub end_date: DateTime<Utc>,
    pub trading_days: usize,
    pub algorithm_period_returns: f64,
    pub benchmark_period_returns: f64,
    pub treasury_period_return: f64,
    pub excess_return: f64,
    pub algorithm_volatility: f64,
    pub benchmark_volatility: f64,
    pub beta: f64,
    pub alpha: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
}

impl RiskMetrics {
    /// Computes risk metrics for the daily returns falling inside `[start_date, end_date]`,
    /// using the environment for the benchmark series and treasury curve.
    pub fn new(
        start_date: DateTime<Utc>,
        end_date: DateTime<Utc>,
        returns: &[DailyReturn],
        env: &TradingEnvironment,
    ) -> Self {
        let window: Vec<&DailyReturn> = returns
            .iter()
            .filter(|daily| daily.date >= start_date && daily.date <= end_date)
            .collect();

        let algorithm_returns: Vec<f64> = window.iter().map(|daily| daily.returns).collect();
        let benchmark_returns: Vec<f64> = window
            .iter()
            .map(|daily| env.benchmark_return(daily.date))
            .collect();

        let algorithm_period_returns = compound(&algorithm_returns);
        let benchmark_period_returns = compound(&benchmark_returns);
        let treasury_period_return = env.treasury_period_return(end_date - start_date);

        let algorithm_volatility = population_std(&algorithm_returns);
        let benchmark_volatility = population_std(&benchmark_returns);

        let beta = calculate_beta(&algorithm_returns, &benchmark_returns);
        let alpha = algorithm_period_returns
            - (treasury_period_return + beta * (benchmark_period_returns - treasury_period_return));

        let sharpe = if algorithm_volatility != 0.0 {
            (algorithm_period_returns - treasury_period_return) / algorithm_volatility
        } else {
            0.0
        };

        Self {
            start_date,
            end_date,
            trading_days: window.len(),
            algorithm_period_returns,
            benchmark_period_returns,
            treasury_period_return,
            excess_return: algorithm_period_returns - treasury_period_return,
            algorithm_volatility,
            benchmark_volatility,
            beta,
            alpha,
            sharpe,
            max_drawdown: calculate_max_drawdown(&algorithm_returns),
        }
    }
}

/// End-of-simulation aggregation: risk metrics over every aligned rolling window of 1, 3, 6 and
/// 12 months inside the simulated period. This is the terminal message of a clean run.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct RiskReport {
    pub one_month: Vec<RiskMetrics>,
    pub three_month: Vec<RiskMetrics>,
    pub six_month: Vec<RiskMetrics>,
    pub twelve_month: Vec<RiskMetrics>,
}

impl RiskReport {
    pub fn new(returns: &[DailyReturn], env: &TradingEnvironment) -> Self {
        Self {
            one_month: periods_in_range(returns, env, 1),
            three_month: periods_in_range(returns, env, 3),
            six_month: periods_in_range(returns, env, 6),
            twelve_month: periods_in_range(returns, env, 12),
        }
    }
}

/// Slides a `months`-long window across the simulated period one month at a time, computing
/// [`RiskMetrics`] for each window that fits.
fn periods_in_range(
    returns: &[DailyReturn],
    env: &TradingEnvironment,
    months: u32,
) -> Vec<RiskMetrics> {
    let mut metrics = Vec::new();
    let mut window_start = env.period_start;

    loop {
        let window_end = match window_start.checked_add_months(Months::new(months)) {
            Some(end) => end,
            None => break,
        };
        if window_end > env.period_end {
            break;
        }

        metrics.push(RiskMetrics::new(window_start, window_end, returns, env));

        window_start = match window_start.checked_add_months(Months::new(1)) {
            Some(next) => next,
            None => break,
        };
    }

    metrics
}

/// Compounds a series of simple returns into one period return.
fn compound(returns: &[f64]) -> f64 {
    returns.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation of a daily return series.
fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let mu = mean(values);
    let variance = values.iter().map(|value| (value - mu).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Beta of the algorithm returns against the benchmark: cov(algo, bench) / var(bench).
fn calculate_beta(algorithm: &[f64], benchmark: &[f64]) -> f64 {
    if algorithm.len() != benchmark.len() || algorithm.is_empty() {
        return 0.0;
    }

    let algo_mean = mean(algorithm);
    let bench_mean = mean(benchmark);

    let covariance = izip!(algorithm, benchmark)
        .map(|(a, b)| (a - algo_mean) * (b - bench_mean))
        .sum::<f64>()
        / algorithm.len() as f64;
    let bench_variance = benchmark
        .iter()
        .map(|value| (value - bench_mean).powi(2))
        .sum::<f64>()
        / benchmark.len() as f64;

    if bench_variance != 0.0 {
        covariance / bench_variance
    } else {
        0.0
    }
}

/// Largest peak-to-trough decline of the compounded return curve, as a positive fraction.
fn calculate_max_drawdown(returns: &[f64]) -> f64 {
    let mut equity = 1.0;
    let mut peak = 1.0;
    let mut max_drawdown = 0.0_f64;

    for r in returns {
        equity *= 1.0 + r;
        if equity > peak {
            peak = equity;
        }
        let drawdown = (peak - equity) / peak;
        if drawdown > max_drawdown {
            max_drawdown = drawdown;
        }
    }

    max_drawdown
}

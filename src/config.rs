use crate::event::Sid;
use chrono::Duration;

/// Selects the fill model used by the transaction simulator.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum SimulationStyle {
    /// Canonical volume-share model with price impact.
    VolumeShare,
    /// Fixed half-spread fills of the full outstanding quantity.
    FixedSlippage { spread: f64, commission: f64 },
}

impl Default for SimulationStyle {
    fn default() -> Self {
        Self::VolumeShare
    }
}

/// Knobs for assembling a simulation and its scripted test scenarios: the fill model and capital
/// assumptions, plus the trade/order cadence parameters the scenario harness sweeps.
#[derive(Clone, PartialEq, Debug)]
pub struct SimulationConfig {
    pub capital_base: f64,
    pub max_drawdown: f64,
    pub simulation_style: SimulationStyle,
    pub sid: Sid,
    pub trade_count: usize,
    /// Volume of each scripted trade.
    pub trade_amount: u64,
    pub trade_price: f64,
    pub trade_interval: Duration,
    /// Shifts every trade after generation, modelling delayed prints.
    pub trade_delay: Option<Duration>,
    pub order_count: usize,
    /// Signed share quantity of each scripted order (positive buy, negative sell).
    pub order_amount: i64,
    pub order_interval: Duration,
    /// Alternate order signs: buy, sell, buy, ...
    pub alternate: bool,
    /// Expect every order to fill in exactly one transaction of matching size.
    pub complete_fill: bool,
    pub expected_txn_count: usize,
    pub expected_txn_volume: i64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            capital_base: 100_000.0,
            max_drawdown: 0.5,
            simulation_style: SimulationStyle::default(),
            sid: 133,
            trade_count: 100,
            trade_amount: 100,
            trade_price: 10.1,
            trade_interval: Duration::minutes(1),
            trade_delay: None,
            order_count: 10,
            order_amount: 100,
            order_interval: Duration::minutes(1),
            alternate: false,
            complete_fill: false,
            expected_txn_count: 0,
            expected_txn_volume: 0,
        }
    }
}

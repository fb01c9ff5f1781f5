use crate::environment::{trading_day, TradingEnvironment};
use crate::event::{Event, MergedEvent};
use crate::performance::period::PerformancePeriod;
use crate::risk::{DailyReturn, RiskMetrics, RiskReport};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Performance module specific errors.
pub mod error;

/// Rolling accounting window over positions, cash and returns.
pub mod period;

/// Single-security holding tracked at weighted-average cost basis.
pub mod position;

use error::PerformanceError;

/// Capital-use figures are cushioned by 10% then rounded to the nearest 5 000 currency units.
const CAPITAL_CUSHION: f64 = 1.1;
const CAPITAL_ROUNDING_BASE: f64 = 5000.0;

/// Point-in-time view of tracker state, emitted at every trading-day boundary and on demand.
#[derive(Clone, Debug, Serialize)]
pub struct PerformanceSnapshot {
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub period_start: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub period_end: DateTime<Utc>,
    pub progress: f64,
    pub cumulative_capital_used: f64,
    pub max_capital_used: f64,
    pub max_leverage: f64,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub last_close: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub last_open: DateTime<Utc>,
    pub capital_base: f64,
    pub returns: Vec<DailyReturn>,
    pub cumulative_perf: PerformancePeriod,
    pub todays_perf: PerformancePeriod,
    pub cumulative_risk_metrics: Option<RiskMetrics>,
}

/// Tracks simulation performance event by event: two nested accounting periods (cumulative &
/// current day), capital-use and leverage watermarks, and the daily-return series feeding the
/// risk metrics. Mutated by every event in delivery order; rolled over once per trading day.
#[derive(Clone, Debug)]
pub struct PerformanceTracker {
    env: Arc<TradingEnvironment>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub market_open: DateTime<Utc>,
    pub market_close: DateTime<Utc>,
    pub progress: f64,
    pub total_days: i64,
    pub day_count: i64,
    pub capital_base: f64,
    pub cumulative_capital_used: f64,
    pub max_capital_used: f64,
    pub max_leverage: f64,
    pub returns: Vec<DailyReturn>,
    pub txn_count: u64,
    pub event_count: u64,
    pub cumulative_performance: PerformancePeriod,
    pub todays_performance: PerformancePeriod,
    cumulative_risk_metrics: Option<RiskMetrics>,
}

impl PerformanceTracker {
    /// Constructs a new [`PerformanceTracker`] for one simulation over the provided environment.
    pub fn new(env: Arc<TradingEnvironment>) -> Self {
        let period_start = env.period_start;
        let period_end = env.period_end;
        let market_open = period_start;
        let market_close = market_open + trading_day();
        let capital_base = env.capital_base;

        Self {
            env,
            period_start,
            period_end,
            market_open,
            market_close,
            progress: 0.0,
            total_days: (period_end - period_start).num_days().max(1),
            day_count: 0,
            capital_base,
            cumulative_capital_used: 0.0,
            max_capital_used: 0.0,
            max_leverage: 0.0,
            returns: Vec::new(),
            txn_count: 0,
            event_count: 0,
            cumulative_performance: PerformancePeriod::new(
                HashMap::new(),
                capital_base,
                capital_base,
            ),
            todays_performance: PerformancePeriod::new(HashMap::new(), capital_base, capital_base),
            cumulative_risk_metrics: None,
        }
    }

    /// Processes one merged event in delivery order, returning a [`PerformanceSnapshot`] if the
    /// event crossed a trading-day boundary.
    pub fn process_event(
        &mut self,
        merged: &MergedEvent,
    ) -> Result<Option<PerformanceSnapshot>, PerformanceError> {
        self.event_count += 1;

        let rolled = match merged.dt() {
            Some(dt) if dt >= self.market_close => Some(self.handle_market_close()?),
            _ => None,
        };

        if let Some(txn) = &merged.transaction {
            self.txn_count += 1;
            self.cumulative_performance.execute_transaction(txn)?;
            self.todays_performance.execute_transaction(txn)?;

            let transaction_cost = txn.price * txn.amount as f64;
            self.cumulative_capital_used += transaction_cost;

            // 10% cushion, rounded to the nearest 5k. The rounded watermark feeds back into the
            // next comparison, so it moves in steps and never decreases even when capital use
            // shrinks.
            let peak = self.cumulative_capital_used.abs().max(self.max_capital_used);
            self.max_capital_used = round_to_nearest(CAPITAL_CUSHION * peak, CAPITAL_ROUNDING_BASE);
            self.max_leverage = self.max_capital_used / self.capital_base;
        }

        if let Event::Trade(trade) = &merged.event {
            self.cumulative_performance.update_last_sale(trade);
            self.todays_performance.update_last_sale(trade);
        }

        self.cumulative_performance.calculate_performance();
        self.todays_performance.calculate_performance();

        Ok(rolled)
    }

    /// Rolls the accounting over a trading-day boundary: records today's return, refreshes the
    /// cumulative risk metrics, advances the market day markers and seeds a fresh daily period
    /// from the closing state.
    fn handle_market_close(&mut self) -> Result<PerformanceSnapshot, PerformanceError> {
        let todays_date = TradingEnvironment::normalize_date(self.market_close);
        self.returns
            .push(DailyReturn::new(todays_date, self.todays_performance.returns));

        self.cumulative_risk_metrics = Some(RiskMetrics::new(
            self.period_start,
            todays_date,
            &self.returns,
            &self.env,
        ));

        self.market_open = self.env.next_market_open(self.market_open)?;
        self.market_close = self.market_open + trading_day();
        self.day_count += 1;
        self.progress = self.day_count as f64 / self.total_days as f64;

        debug!(
            day_count = self.day_count,
            market_open = %self.market_open,
            "rolled performance over market close"
        );

        self.todays_performance.calculate_performance();
        self.todays_performance = PerformancePeriod::new(
            self.todays_performance.positions.clone(),
            self.todays_performance.ending_value,
            self.todays_performance.ending_cash,
        );

        Ok(self.snapshot())
    }

    /// Terminal hook invoked by the Trading Client at end-of-stream: aggregates the daily-return
    /// series into the full [`RiskReport`].
    pub fn on_complete(&self) -> RiskReport {
        RiskReport::new(&self.returns, &self.env)
    }

    /// Current state of the tracker as an emittable snapshot.
    pub fn snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            period_start: self.period_start,
            period_end: self.period_end,
            progress: self.progress,
            cumulative_capital_used: self.cumulative_capital_used,
            max_capital_used: self.max_capital_used,
            max_leverage: self.max_leverage,
            last_close: self.market_close,
            last_open: self.market_open,
            capital_base: self.capital_base,
            returns: self.returns.clone(),
            cumulative_perf: self.cumulative_performance.clone(),
            todays_perf: self.todays_performance.clone(),
            cumulative_risk_metrics: self.cumulative_risk_metrics.clone(),
        }
    }
}

/// Rounds to the nearest multiple of `base`. Because the watermark is always a multiple of the
/// base before the cushion is applied, the rounded result never decreases it.
fn round_to_nearest(x: f64, base: f64) -> f64 {
    (x / base).round() * base
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{transaction_sim_id, TradeEvent, TransactionEvent};
    use crate::factory;
    use chrono::Duration;

    fn tracker() -> PerformanceTracker {
        PerformanceTracker::new(Arc::new(factory::create_trading_environment()))
    }

    fn merged_trade(
        tracker: &PerformanceTracker,
        minute_offset: i64,
        transaction_amount: Option<i64>,
    ) -> MergedEvent {
        let dt = tracker.period_start + Duration::minutes(minute_offset);
        MergedEvent {
            event: Event::Trade(TradeEvent {
                source_id: "trades-133".into(),
                sid: 133,
                price: 10.0,
                volume: 100,
                dt,
            }),
            transaction: transaction_amount.map(|amount| TransactionEvent {
                source_id: transaction_sim_id(),
                sid: 133,
                amount,
                price: 10.0,
                commission: 0.0,
                dt,
            }),
        }
    }

    #[test]
    fn transactions_update_both_periods() {
        let mut tracker = tracker();

        tracker
            .process_event(&merged_trade(&tracker, 0, Some(100)))
            .unwrap();

        assert_eq!(tracker.txn_count, 1);
        assert_eq!(tracker.cumulative_performance.positions[&133].amount, 100);
        assert_eq!(tracker.todays_performance.positions[&133].amount, 100);
    }

    #[test]
    fn ending_cash_reconciles_with_transactions() {
        let mut tracker = tracker();

        tracker
            .process_event(&merged_trade(&tracker, 0, Some(100)))
            .unwrap();
        tracker
            .process_event(&merged_trade(&tracker, 1, Some(50)))
            .unwrap();

        // starting_cash - sum(price * amount)
        let expected = tracker.capital_base - (10.0 * 100.0 + 10.0 * 50.0);
        assert_eq!(tracker.cumulative_performance.ending_cash, expected);
    }

    #[test]
    fn max_capital_used_is_cushioned_rounded_and_monotone() {
        let mut tracker = tracker();

        tracker
            .process_event(&merged_trade(&tracker, 0, Some(1000)))
            .unwrap();
        // 10_000 used -> cushioned to 11_000 -> rounded to 10_000.
        assert_eq!(tracker.max_capital_used, 10_000.0);

        let mut previous = tracker.max_capital_used;
        for (offset, amount) in [(1, -500), (2, -500), (3, 100)] {
            tracker
                .process_event(&merged_trade(&tracker, offset, Some(amount)))
                .unwrap();
            assert!(tracker.max_capital_used >= previous);
            previous = tracker.max_capital_used;
        }
    }

    #[test]
    fn crossing_market_close_rolls_the_day() {
        let mut tracker = tracker();
        tracker
            .process_event(&merged_trade(&tracker, 0, Some(100)))
            .unwrap();

        // 6.5h session: an event the next day crosses the close.
        let snapshot = tracker
            .process_event(&merged_trade(&tracker, 24 * 60, None))
            .unwrap()
            .expect("crossing the close must emit a snapshot");

        assert_eq!(tracker.day_count, 1);
        assert_eq!(tracker.returns.len(), 1);
        assert_eq!(snapshot.returns.len(), 1);
        assert!(snapshot.cumulative_risk_metrics.is_some());

        // The fresh daily period inherits the closing positions & balances.
        assert_eq!(tracker.todays_performance.positions[&133].amount, 100);
        assert_eq!(
            tracker.todays_performance.starting_cash,
            tracker.cumulative_performance.ending_cash
        );
    }

    #[test]
    fn positions_track_net_transaction_volume() {
        let mut tracker = tracker();

        for (offset, amount) in [(0, 25), (1, 25), (2, -10)] {
            tracker
                .process_event(&merged_trade(&tracker, offset, Some(amount)))
                .unwrap();
        }

        assert_eq!(tracker.cumulative_performance.positions[&133].amount, 40);
    }
}

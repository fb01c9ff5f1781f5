use crate::event::{Sid, TradeEvent, TransactionEvent};
use crate::performance::error::PerformanceError;
use crate::performance::position::Position;
use serde::{Serialize, Serializer};
use std::collections::HashMap;

/// A rolling accounting window over positions, cash and returns. The tracker keeps two: one for
/// the whole simulation and one reset at each trading-day boundary.
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct PerformancePeriod {
    #[serde(serialize_with = "serialize_positions")]
    pub positions: HashMap<Sid, Position>,
    pub starting_value: f64,
    pub starting_cash: f64,
    pub ending_value: f64,
    pub ending_cash: f64,
    /// Net capital consumed in the window; selling frees capital so sales add to this.
    pub period_capital_used: f64,
    pub pnl: f64,
    pub returns: f64,
}

impl PerformancePeriod {
    /// Constructs a new [`PerformancePeriod`] seeded with initial positions and balances. A day
    /// rollover passes the prior day's positions, ending value & ending cash.
    pub fn new(
        initial_positions: HashMap<Sid, Position>,
        starting_value: f64,
        starting_cash: f64,
    ) -> Self {
        Self {
            positions: initial_positions,
            starting_value,
            starting_cash,
            ending_value: 0.0,
            ending_cash: starting_cash,
            period_capital_used: 0.0,
            pnl: 0.0,
            returns: 0.0,
        }
    }

    /// Applies a transaction: upserts the [`Position`] for its [`Sid`] and consumes capital.
    pub fn execute_transaction(&mut self, txn: &TransactionEvent) -> Result<(), PerformanceError> {
        self.positions
            .entry(txn.sid)
            .or_insert_with(|| Position::new(txn.sid))
            .update(txn)?;

        self.period_capital_used += -(txn.price * txn.amount as f64);

        Ok(())
    }

    /// Refreshes the last sale marks of a held position from the latest trade.
    pub fn update_last_sale(&mut self, trade: &TradeEvent) {
        if let Some(position) = self.positions.get_mut(&trade.sid) {
            position.update_last_sale(trade);
        }
    }

    /// Recomputes the window's ending value, cash, P&L and returns.
    pub fn calculate_performance(&mut self) {
        self.ending_value = self.calculate_positions_value();

        let total_at_start = self.starting_cash + self.starting_value;
        self.ending_cash = self.starting_cash + self.period_capital_used;
        let total_at_end = self.ending_cash + self.ending_value;

        self.pnl = total_at_end - total_at_start;
        self.returns = if total_at_start != 0.0 {
            self.pnl / total_at_start
        } else {
            0.0
        };
    }

    fn calculate_positions_value(&self) -> f64 {
        self.positions
            .values()
            .map(Position::market_value)
            .sum()
    }
}

/// Positions serialize as a list ordered by [`Sid`] so snapshots are deterministic.
fn serialize_positions<S>(
    positions: &HashMap<Sid, Position>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let mut sorted: Vec<&Position> = positions.values().collect();
    sorted.sort_by_key(|position| position.sid);
    serializer.collect_seq(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::transaction_sim_id;
    use chrono::{TimeZone, Utc};

    fn txn(amount: i64, price: f64) -> TransactionEvent {
        TransactionEvent {
            source_id: transaction_sim_id(),
            sid: 133,
            amount,
            price,
            commission: 0.0,
            dt: Utc.with_ymd_and_hms(2008, 1, 7, 14, 30, 0).unwrap(),
        }
    }

    fn trade(price: f64) -> TradeEvent {
        TradeEvent {
            source_id: "trades-133".into(),
            sid: 133,
            price,
            volume: 100,
            dt: Utc.with_ymd_and_hms(2008, 1, 7, 14, 31, 0).unwrap(),
        }
    }

    #[test]
    fn buying_consumes_capital_and_selling_frees_it() {
        let mut period = PerformancePeriod::new(HashMap::new(), 0.0, 10_000.0);

        period.execute_transaction(&txn(100, 10.0)).unwrap();
        assert_eq!(period.period_capital_used, -1000.0);

        period.execute_transaction(&txn(-50, 10.0)).unwrap();
        assert_eq!(period.period_capital_used, -500.0);
    }

    #[test]
    fn ending_cash_is_starting_cash_plus_capital_used() {
        let mut period = PerformancePeriod::new(HashMap::new(), 0.0, 10_000.0);
        period.execute_transaction(&txn(100, 10.0)).unwrap();

        period.calculate_performance();

        assert_eq!(period.ending_cash, 9000.0);
    }

    #[test]
    fn pnl_and_returns_follow_the_last_sale_price() {
        let mut period = PerformancePeriod::new(HashMap::new(), 0.0, 10_000.0);
        period.execute_transaction(&txn(100, 10.0)).unwrap();
        period.update_last_sale(&trade(11.0));

        period.calculate_performance();

        // 100 shares bought at 10.0, marked at 11.0.
        assert_eq!(period.ending_value, 1100.0);
        assert_eq!(period.pnl, 100.0);
        assert_eq!(period.returns, 0.01);
    }

    #[test]
    fn returns_are_zero_when_the_period_starts_empty() {
        let mut period = PerformancePeriod::new(HashMap::new(), 0.0, 0.0);

        period.calculate_performance();

        assert_eq!(period.returns, 0.0);
    }

    #[test]
    fn positions_serialize_ordered_by_sid() {
        let mut period = PerformancePeriod::new(HashMap::new(), 0.0, 0.0);
        for sid in [7, 3, 5] {
            period.positions.insert(sid, Position::new(sid));
        }

        let json = serde_json::to_value(&period).unwrap();
        let sids: Vec<u64> = json["positions"]
            .as_array()
            .unwrap()
            .iter()
            .map(|position| position["sid"].as_u64().unwrap())
            .collect();

        assert_eq!(sids, vec![3, 5, 7]);
    }
}

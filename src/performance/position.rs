use crate::event::{Sid, TradeEvent, TransactionEvent};
use crate::performance::error::PerformanceError;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Holding in a single security, tracked at weighted-average cost basis. `amount` may be zero or
/// negative (short interest).
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct Position {
    pub sid: Sid,
    pub amount: i64,
    /// Weighted-average per-share purchase price. Reset to zero when the position closes flat.
    pub cost_basis: f64,
    pub last_sale_price: Option<f64>,
    #[serde(with = "chrono::serde::ts_microseconds_option")]
    pub last_sale_date: Option<DateTime<Utc>>,
}

impl Position {
    /// Constructs an empty [`Position`] for the provided [`Sid`].
    pub fn new(sid: Sid) -> Self {
        Self {
            sid,
            amount: 0,
            cost_basis: 0.0,
            last_sale_price: None,
            last_sale_date: None,
        }
    }

    /// Applies a transaction to this [`Position`]. A transaction for a different [`Sid`] is an
    /// accounting error and indicates a pipeline bug upstream.
    pub fn update(&mut self, txn: &TransactionEvent) -> Result<(), PerformanceError> {
        if self.sid != txn.sid {
            return Err(PerformanceError::SidMismatch {
                position: self.sid,
                transaction: txn.sid,
            });
        }

        if self.amount + txn.amount == 0 {
            // Covering a short or closing out a long.
            self.cost_basis = 0.0;
            self.amount = 0;
        } else {
            let prev_cost = self.cost_basis * self.amount as f64;
            let txn_cost = txn.amount as f64 * txn.price;
            let total_shares = self.amount + txn.amount;
            self.cost_basis = (prev_cost + txn_cost) / total_shares as f64;
            self.amount = total_shares;
        }

        Ok(())
    }

    /// Refreshes the position's view of the market from the latest trade in its security.
    pub fn update_last_sale(&mut self, trade: &TradeEvent) {
        self.last_sale_price = Some(trade.price);
        self.last_sale_date = Some(trade.dt);
    }

    /// Current market value of the holding: amount x last sale price. Zero before any sale has
    /// been observed.
    pub fn market_value(&self) -> f64 {
        match self.last_sale_price {
            Some(price) => self.amount as f64 * price,
            None => 0.0,
        }
    }
}

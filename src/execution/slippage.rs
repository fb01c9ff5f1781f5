use crate::event::{transaction_sim_id, TradeEvent, TransactionEvent};
use crate::execution::OpenOrders;

/// Simulates how open orders fill against an observed trade. Implementations own the slippage &
/// commission arithmetic; order book maintenance stays in [`OpenOrders`].
pub trait SlippageModel {
    /// Attempts to fill open orders for the trade's sid, mutating order fill state in place.
    /// Returns the synthesised [`TransactionEvent`], if any portion filled.
    fn simulate(&self, trade: &TradeEvent, open_orders: &mut OpenOrders) -> Option<TransactionEvent>;
}

/// The canonical fill model: open interest is filled from a capped share of each trade's volume,
/// with a quadratic price impact and a flat per-share commission.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug)]
pub struct VolumeShareSlippage {
    /// Maximum fraction of a trade's volume that simulated orders may consume.
    pub volume_limit: f64,
    /// Price impact coefficient applied as `volume_share^2 * price_impact * direction * price`.
    pub price_impact: f64,
    /// Commission charged per share filled.
    pub commission: f64,
}

impl Default for VolumeShareSlippage {
    fn default() -> Self {
        Self {
            volume_limit: 0.25,
            price_impact: 0.1,
            commission: 0.03,
        }
    }
}

impl SlippageModel for VolumeShareSlippage {
    fn simulate(&self, trade: &TradeEvent, open_orders: &mut OpenOrders) -> Option<TransactionEvent> {
        if trade.volume == 0 {
            // Zero volume prints occur for stocks trading less than once per bar.
            return None;
        }

        let orders = open_orders.orders_mut(trade.sid)?;
        orders.sort_by(|a, b| a.dt.cmp(&b.dt));

        // An order is only good on the day it was issued: expired orders are discarded unfilled
        // the next time a trade for their sid arrives.
        orders.retain(|order| order.dt.date_naive() >= trade.dt.date_naive());

        // Orders created at or after this trade's timestamp wait for the next print.
        let open_amount: i64 = orders
            .iter()
            .filter(|order| order.dt < trade.dt)
            .map(|order| order.open_amount())
            .sum();

        if open_amount == 0 {
            open_orders.prune(trade.sid);
            return None;
        }

        let direction = open_amount.signum();
        let volume_share = (open_amount.unsigned_abs() as f64 / trade.volume as f64)
            .min(self.volume_limit);

        let fill_amount = (volume_share * trade.volume as f64) as i64 * direction;
        if fill_amount == 0 {
            open_orders.prune(trade.sid);
            return None;
        }

        let impact = volume_share.powi(2) * self.price_impact * direction as f64 * trade.price;

        // Allocate the fill across eligible orders oldest-first.
        let mut remaining = fill_amount;
        for order in orders
            .iter_mut()
            .filter(|order| order.dt < trade.dt)
        {
            if remaining == 0 {
                break;
            }
            let open = order.open_amount();
            if open == 0 || open.signum() != direction {
                continue;
            }
            let take = if open.abs() <= remaining.abs() {
                open
            } else {
                remaining
            };
            order.filled += take;
            remaining -= take;
        }

        orders.retain(|order| order.open_amount() != 0);
        open_orders.prune(trade.sid);

        Some(TransactionEvent {
            source_id: transaction_sim_id(),
            sid: trade.sid,
            amount: fill_amount,
            price: trade.price + impact,
            commission: self.commission * fill_amount.unsigned_abs() as f64,
            dt: trade.dt,
        })
    }
}

/// Fill model that executes the entire outstanding quantity at the trade price adjusted by half
/// the configured spread, clearing the sid's order book in one transaction.
#[derive(Copy, Clone, PartialEq, PartialOrd, Debug, Default)]
pub struct FixedSlippage {
    /// Half of `spread` is added on buys and subtracted on sells, per share.
    pub spread: f64,
    /// Commission charged per share filled.
    pub commission: f64,
}

impl FixedSlippage {
    pub fn new(spread: f64, commission: f64) -> Self {
        Self { spread, commission }
    }
}

impl SlippageModel for FixedSlippage {
    fn simulate(&self, trade: &TradeEvent, open_orders: &mut OpenOrders) -> Option<TransactionEvent> {
        let orders = open_orders.orders_mut(trade.sid)?;

        let amount: i64 = orders.iter().map(|order| order.open_amount()).sum();
        if amount == 0 {
            return None;
        }

        let direction = amount.signum();

        open_orders.clear(trade.sid);

        Some(TransactionEvent {
            source_id: transaction_sim_id(),
            sid: trade.sid,
            amount,
            price: trade.price + direction as f64 * self.spread / 2.0,
            commission: self.commission * amount.unsigned_abs() as f64,
            dt: trade.dt,
        })
    }
}

/// Slippage model selected by runtime configuration.
#[derive(Copy, Clone, PartialEq, Debug)]
pub enum ConfiguredSlippage {
    VolumeShare(VolumeShareSlippage),
    Fixed(FixedSlippage),
}

impl SlippageModel for ConfiguredSlippage {
    fn simulate(&self, trade: &TradeEvent, open_orders: &mut OpenOrders) -> Option<TransactionEvent> {
        match self {
            ConfiguredSlippage::VolumeShare(model) => model.simulate(trade, open_orders),
            ConfiguredSlippage::Fixed(model) => model.simulate(trade, open_orders),
        }
    }
}

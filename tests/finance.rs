//! Scenario tests for the transaction simulator and performance tracker, driven the same way
//! the trading client drives them: one trade at a time, transactions merged onto their trades.

use chrono::Duration;
use std::sync::Arc;
use tickline::config::SimulationConfig;
use tickline::event::{Event, MergedEvent};
use tickline::execution::slippage::VolumeShareSlippage;
use tickline::execution::TransactionSimulator;
use tickline::factory;
use tickline::performance::PerformanceTracker;
use tokio::sync::mpsc;

/// Approximates the loop inside the trading client: orders are seeded up front, every trade is
/// applied to the book, and the tracker processes each merged event in order.
fn transaction_sim(config: SimulationConfig) {
    let env = factory::create_trading_environment();

    let (_feed_tx, feed_rx) = mpsc::channel(1);
    let (result_tx, _result_rx) = mpsc::channel(1);
    let mut trade_sim = TransactionSimulator::new(VolumeShareSlippage::default(), feed_rx, result_tx);

    let orders = factory::create_scenario_orders(&config, &env);
    for order in orders.clone() {
        trade_sim.add_open_order(order);
    }

    // The book should hold one creation-ordered list under the scenario sid.
    let open = trade_sim
        .open_orders()
        .open_for(config.sid)
        .expect("orders were captured under the scenario sid");
    assert_eq!(open.len(), config.order_count);
    for (i, order) in open.iter().enumerate() {
        assert_eq!(order.sid, config.sid);
        let alternator = if config.alternate && i % 2 == 1 { -1 } else { 1 };
        assert_eq!(order.amount, config.order_amount * alternator);
    }

    let mut tracker = PerformanceTracker::new(Arc::new(env.clone()));
    let trades = factory::create_scenario_trades(&config, &env);
    assert_eq!(trades.len(), config.trade_count);

    let mut transactions = Vec::new();
    for trade in trades {
        let txn = trade_sim.apply_trade_to_open_orders(&trade);
        let merged = MergedEvent {
            event: Event::Trade(trade),
            transaction: txn.clone(),
        };
        if let Some(txn) = txn {
            transactions.push(txn);
        }
        tracker.process_event(&merged).unwrap();
    }

    if config.complete_fill {
        assert_eq!(transactions.len(), orders.len());
        for (order, txn) in orders.iter().zip(&transactions) {
            assert_eq!(order.amount, txn.amount);
        }
    }

    let total_volume: i64 = transactions.iter().map(|txn| txn.amount).sum();
    assert_eq!(total_volume, config.expected_txn_volume);
    assert_eq!(transactions.len(), config.expected_txn_count);
    assert_eq!(tracker.txn_count as usize, config.expected_txn_count);

    // The cumulative position must equal the net transacted volume.
    if config.expected_txn_count > 0 {
        let position = &tracker.cumulative_performance.positions[&config.sid];
        assert_eq!(position.amount, total_volume);
    }

    // Nothing may remain open at the end of any scenario.
    assert_eq!(trade_sim.open_orders().total_open(), 0);
}

#[test]
fn partially_filled_orders_spread_across_trades() {
    // Order size equals trade volume, so each order fills in 25-share slices across 4 trades.
    transaction_sim(SimulationConfig {
        trade_count: 360,
        trade_amount: 100,
        trade_interval: Duration::minutes(1),
        order_count: 2,
        order_amount: 100,
        order_interval: Duration::minutes(1),
        expected_txn_count: 8,
        expected_txn_volume: 2 * 100,
        ..SimulationConfig::default()
    });
}

#[test]
fn partially_filled_short_orders_spread_across_trades() {
    transaction_sim(SimulationConfig {
        trade_count: 360,
        trade_amount: 100,
        trade_interval: Duration::minutes(1),
        order_count: 2,
        order_amount: -100,
        order_interval: Duration::minutes(1),
        expected_txn_count: 8,
        expected_txn_volume: 2 * -100,
        ..SimulationConfig::default()
    });
}

#[test]
fn collapsing_orders_fill_from_one_trade() {
    // Orders totalling less than 25% of one trade collapse into a single transaction.
    transaction_sim(SimulationConfig {
        trade_count: 6,
        trade_amount: 100,
        trade_interval: Duration::hours(1),
        order_count: 24,
        order_amount: 1,
        order_interval: Duration::minutes(1),
        expected_txn_count: 1,
        expected_txn_volume: 24,
        ..SimulationConfig::default()
    });
}

#[test]
fn collapsing_short_orders_fill_from_one_trade() {
    transaction_sim(SimulationConfig {
        trade_count: 6,
        trade_amount: 100,
        trade_interval: Duration::hours(1),
        order_count: 24,
        order_amount: -1,
        order_interval: Duration::minutes(1),
        expected_txn_count: 1,
        expected_txn_volume: -24,
        ..SimulationConfig::default()
    });
}

#[test]
fn unfilled_orders_expire_by_ttl() {
    // Daily trades with a delay: only the first order's 25-share slice fills before every order
    // expires at its issue-day boundary.
    transaction_sim(SimulationConfig {
        trade_count: 100,
        trade_amount: 100,
        trade_delay: Some(Duration::minutes(5)),
        trade_interval: Duration::days(1),
        order_count: 3,
        order_amount: 1000,
        order_interval: Duration::minutes(30),
        expected_txn_count: 1,
        expected_txn_volume: 25,
        ..SimulationConfig::default()
    });
}

#[test]
fn unfilled_short_orders_expire_by_ttl() {
    transaction_sim(SimulationConfig {
        trade_count: 100,
        trade_amount: 100,
        trade_delay: Some(Duration::minutes(5)),
        trade_interval: Duration::days(1),
        order_count: 3,
        order_amount: -1000,
        order_interval: Duration::minutes(30),
        expected_txn_count: 1,
        expected_txn_volume: -25,
        ..SimulationConfig::default()
    });
}

#[test]
fn alternating_long_short_orders_fill_completely() {
    // One small order per day, alternating sign: every order fills whole, netting to zero.
    transaction_sim(SimulationConfig {
        trade_count: (6.5 * 60.0) as usize * 4,
        trade_amount: 100,
        trade_interval: Duration::minutes(1),
        order_count: 4,
        order_amount: 10,
        order_interval: Duration::hours(24),
        alternate: true,
        complete_fill: true,
        expected_txn_count: 4,
        expected_txn_volume: 0,
        ..SimulationConfig::default()
    });
}

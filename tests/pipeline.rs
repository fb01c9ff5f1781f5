//! End-to-end pipeline tests: sources -> feed -> simulator -> merge -> client, supervised by the
//! controller, with the order loop closed through the order source.

use chrono::Duration;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tickline::config::{SimulationConfig, SimulationStyle};
use tickline::controller::Config as ControllerConfig;
use tickline::factory::{self, TestAlgorithm};
use tickline::simulation::{Simulation, SimulationOutput};

const SID: u32 = 133;

fn fast_controller() -> ControllerConfig {
    ControllerConfig {
        heartbeat_period: StdDuration::from_millis(50),
        heartbeat_timeout: StdDuration::from_millis(100),
        missed_limit: 2,
    }
}

fn minutely_config(trade_count: usize) -> SimulationConfig {
    SimulationConfig {
        trade_count,
        trade_interval: Duration::minutes(1),
        ..SimulationConfig::default()
    }
}

#[tokio::test]
async fn orders_flow_through_the_pipeline_and_fill() {
    let env = Arc::new(factory::create_trading_environment());
    let config = minutely_config(30);
    let trades = factory::create_scenario_trades(&config, &env);

    let algorithm = TestAlgorithm::new(SID, 100, 10);
    let stats = algorithm.stats();

    let simulation = Simulation::builder()
        .environment(Arc::clone(&env))
        .algorithm(algorithm)
        .trade_source("trades-133", trades)
        .style(SimulationStyle::FixedSlippage {
            spread: 0.0,
            commission: 0.0,
        })
        .controller_config(fast_controller())
        .order_timeout(StdDuration::from_millis(300))
        .spawn()
        .expect("pipeline wiring is complete");

    let report = simulation.run_to_completion().await;

    assert!(report.succeeded(), "failures: {:?}", report.controller.failures);

    // The feed and merge must be drained of all messages.
    assert_eq!(report.controller.tally("feed").unwrap().pending, 0);
    assert_eq!(report.controller.tally("merge").unwrap().pending, 0);

    // The algorithm saw one frame per trade and its order budget was fully relayed.
    assert_eq!(stats.frames(), config.trade_count);
    assert_eq!(stats.orders(), 10);
    assert_eq!(
        report.controller.tally("order-source").unwrap().sent,
        stats.orders() as u64
    );

    // Fixed slippage fills every order in full: closing position is the whole budget.
    let closing = report
        .outputs
        .iter()
        .rev()
        .find_map(|output| match output {
            SimulationOutput::Performance(snapshot) => Some(snapshot),
            _ => None,
        })
        .expect("a closing performance snapshot is emitted");
    assert_eq!(closing.cumulative_perf.positions[&SID].amount, 10 * 100);

    // Clean completion terminates with the risk report.
    assert!(report.risk_report().is_some());
}

#[tokio::test]
async fn volume_share_fills_cap_each_trade() {
    let env = Arc::new(factory::create_trading_environment());
    let config = minutely_config(60);
    let trades = factory::create_scenario_trades(&config, &env);

    // One 100-share order against 100-share trades: 25-share slices across 4 trades.
    let algorithm = TestAlgorithm::new(SID, 100, 1);

    let simulation = Simulation::builder()
        .environment(Arc::clone(&env))
        .algorithm(algorithm)
        .trade_source("trades-133", trades)
        .controller_config(fast_controller())
        .order_timeout(StdDuration::from_millis(300))
        .spawn()
        .expect("pipeline wiring is complete");

    let report = simulation.run_to_completion().await;

    assert!(report.succeeded(), "failures: {:?}", report.controller.failures);

    let closing = report
        .outputs
        .iter()
        .rev()
        .find_map(|output| match output {
            SimulationOutput::Performance(snapshot) => Some(snapshot),
            _ => None,
        })
        .expect("a closing performance snapshot is emitted");
    assert_eq!(closing.cumulative_perf.positions[&SID].amount, 100);
}

#[tokio::test]
async fn sid_filter_keeps_every_frame_from_the_algorithm() {
    let env = Arc::new(factory::create_trading_environment());
    let config = minutely_config(200);
    let trades = factory::create_scenario_trades(&config, &env);

    // The algorithm subscribes to a sid that never trades.
    let algorithm = TestAlgorithm::new(222, 100, 100);
    let stats = algorithm.stats();

    let simulation = Simulation::builder()
        .environment(Arc::clone(&env))
        .algorithm(algorithm)
        .trade_source("trades-133", trades)
        .controller_config(fast_controller())
        .order_timeout(StdDuration::from_millis(300))
        .spawn()
        .expect("pipeline wiring is complete");

    let report = simulation.run_to_completion().await;

    // The simulation still completes cleanly, with no frames, no orders and no fills.
    assert!(report.succeeded(), "failures: {:?}", report.controller.failures);
    assert_eq!(stats.frames(), 0);
    assert_eq!(stats.orders(), 0);
    assert_eq!(report.controller.tally("order-source").unwrap().sent, 0);
    assert_eq!(report.controller.tally("feed").unwrap().pending, 0);
    assert_eq!(report.controller.tally("merge").unwrap().pending, 0);

    let closing = report
        .outputs
        .iter()
        .rev()
        .find_map(|output| match output {
            SimulationOutput::Performance(snapshot) => Some(snapshot),
            _ => None,
        })
        .expect("a closing performance snapshot is emitted");
    assert!(closing.cumulative_perf.positions.is_empty());
    assert!(report.risk_report().is_some());
}

#[tokio::test]
async fn two_sources_merge_into_one_chronological_stream() {
    let env = Arc::new(factory::create_trading_environment());
    let config = minutely_config(40);

    // Two symbol groups replayed by independent sources.
    let trades_a = factory::create_scenario_trades(&config, &env);
    let trades_b: Vec<_> = factory::create_scenario_trades(&config, &env)
        .into_iter()
        .map(|mut trade| {
            trade.sid = 134;
            trade
        })
        .collect();

    let algorithm = TestAlgorithm::new(SID, 10, 5);
    let stats = algorithm.stats();

    let simulation = Simulation::builder()
        .environment(Arc::clone(&env))
        .algorithm(algorithm)
        .trade_source("trades-133", trades_a)
        .trade_source("trades-134", trades_b)
        .controller_config(fast_controller())
        .order_timeout(StdDuration::from_millis(300))
        .spawn()
        .expect("pipeline wiring is complete");

    let report = simulation.run_to_completion().await;

    assert!(report.succeeded(), "failures: {:?}", report.controller.failures);

    // Both sources drained through the feed; frames only covered the subscribed sid.
    let feed = report.controller.tally("feed").unwrap();
    assert_eq!(feed.pending, 0);
    assert!(feed.sent >= (2 * config.trade_count) as u64);
    assert_eq!(stats.frames(), config.trade_count);

    let closing = report
        .outputs
        .iter()
        .rev()
        .find_map(|output| match output {
            SimulationOutput::Performance(snapshot) => Some(snapshot),
            _ => None,
        })
        .expect("a closing performance snapshot is emitted");
    assert_eq!(closing.cumulative_perf.positions[&SID].amount, 5 * 10);
    assert!(!closing.cumulative_perf.positions.contains_key(&134));
}

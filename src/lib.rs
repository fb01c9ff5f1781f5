//! # Tickline
//! [`Tickline`] is an event-driven **backtesting engine** for algorithmic trading strategies.
//! Historical market events are replayed through a pipeline of loosely coupled components that
//! simulates order placement, fill generation (slippage & commission), position accounting, and
//! risk/return reporting, driving a user-supplied algorithm as if it were running live.
//!
//! ## Overview
//! Every component implements the same lifecycle contract and runs in its own task; all
//! coordination is typed message passing. Dataflow, leaves first:
//! * **Sources**: one [`ReplayTradeSource`](sources::ReplayTradeSource) per symbol group replays
//!   historical trades; the [`OrderSource`](sources::OrderSource) re-injects algorithm orders as
//!   a data stream, emitting a dateless Empty filler on quiet ticks so the pipeline never
//!   stalls.
//! * **Feed**: merges N source streams into a single stream with monotonically non-decreasing
//!   timestamps, blocking until every source is buffered or done, with deterministic
//!   lexicographic tie-breaks.
//! * **Transaction Simulator**: maintains open orders and runs a
//!   [`SlippageModel`](execution::slippage::SlippageModel) against each trade, synthesising
//!   transactions with price impact and commission.
//! * **Merge**: pairs each event with the transaction (if any) produced for it, so both travel
//!   together to the client.
//! * **Trading Client**: keeps the [`PerformanceTracker`](performance::PerformanceTracker) up to
//!   date before any callback, frames events per the environment's schema, hands frames to the
//!   [`Algorithm`](client::Algorithm), and relays its orders back into the pipeline.
//! * **Controller**: heartbeats, discovers and terminates the lot, with partial-failure
//!   semantics.
//!
//! ## Getting Started
//! ```
//! use tickline::config::SimulationConfig;
//! use tickline::execution::slippage::{SlippageModel, VolumeShareSlippage};
//! use tickline::execution::OpenOrders;
//! use tickline::event::OrderEvent;
//! use tickline::factory;
//!
//! let env = factory::create_trading_environment();
//! let config = SimulationConfig::default();
//!
//! // Scripted trade tape & order book.
//! let trades = factory::create_scenario_trades(&config, &env);
//! let mut open_orders = OpenOrders::default();
//! open_orders.add(OrderEvent::new(config.sid, 100, env.period_start));
//!
//! // Run the canonical fill model directly.
//! let model = VolumeShareSlippage::default();
//! let mut transactions = Vec::new();
//! for trade in &trades {
//!     if let Some(txn) = model.simulate(trade, &mut open_orders) {
//!         transactions.push(txn);
//!     }
//! }
//! assert!(!transactions.is_empty());
//! ```
//!
//! Running the full pipeline wires the same pieces behind a builder:
//! ```no_run
//! use std::sync::Arc;
//! use tickline::factory::{self, TestAlgorithm};
//! use tickline::simulation::Simulation;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let env = Arc::new(factory::create_trading_environment());
//! let config = tickline::config::SimulationConfig::default();
//! let trades = factory::create_scenario_trades(&config, &env);
//!
//! let simulation = Simulation::builder()
//!     .environment(Arc::clone(&env))
//!     .algorithm(TestAlgorithm::new(config.sid, 100, 10))
//!     .trade_source("trades-133", trades)
//!     .spawn()
//!     .expect("pipeline wiring is complete");
//!
//! let report = simulation.run_to_completion().await;
//! assert!(report.succeeded());
//! # }
//! ```

#![warn(missing_copy_implementations)]

/// Couples the pipeline to user algorithm code: the [`Algorithm`](client::Algorithm) seam, frame
/// building, order relay and the simulation clock.
pub mod client;

/// The uniform component lifecycle contract, its run loop, and the control channel messages.
pub mod component;

/// Enumerated simulation options & the scripted scenario parameters.
pub mod config;

/// Supervises pipeline components: heartbeat roll call, liveness tracking and shutdown.
pub mod controller;

/// The immutable per-run context: trading calendar, benchmark & treasury reference data, capital
/// assumptions and the frame schema.
pub mod environment;

/// Top-level simulation errors.
pub mod error;

/// The typed event envelope carried through the pipeline, and the merged record delivered to
/// clients.
pub mod event;

/// Consumes the merged stream, maintains open orders, and synthesises transactions via a
/// configurable slippage model.
pub mod execution;

/// Synthetic fixtures: calendar environment, session-aware trade histories, and a deterministic
/// test algorithm.
pub mod factory;

/// Chronological N-to-1 merge of independent source streams.
pub mod feed;

/// `tracing` subscriber initialisation.
pub mod logging;

/// Pairs each event with the transaction synthesised for it.
pub mod merge;

/// Positions, accounting periods and the event-driven performance tracker.
pub mod performance;

/// The wire framing boundary: one encode/decode pair per message family.
pub mod protocol;

/// Daily returns, windowed risk metrics and the terminal risk report.
pub mod risk;

/// Pipeline assembly: builds, wires, spawns and resolves a full simulation run.
pub mod simulation;

/// Trade replay sources and the order pseudo-source.
pub mod sources;

pub use crate::error::SimulationError;
pub use crate::event::{Event, MergedEvent, Sid, SourceId};
pub use crate::simulation::{Simulation, SimulationOutput, SimulationReport};

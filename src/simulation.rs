use crate::client::{Algorithm, TradingClient, TRADING_CLIENT_ID};
use crate::component::{run, ComponentId};
use crate::config::SimulationStyle;
use crate::controller::{Config as ControllerConfig, Controller, ControllerOutcome, ControllerReport, Topology};
use crate::environment::TradingEnvironment;
use crate::error::SimulationError;
use crate::event::{order_source_id, SourceId, TradeEvent};
use crate::execution::slippage::{ConfiguredSlippage, FixedSlippage, VolumeShareSlippage};
use crate::execution::{TransactionSimulator, TRANSACTION_SIM_ID};
use crate::feed::{Feed, FEED_ID};
use crate::merge::{Merge, MERGE_ID};
use crate::performance::PerformanceSnapshot;
use crate::risk::RiskReport;
use crate::sources::{OrderSource, ReplayTradeSource};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

/// Capacity of the bounded data channels between components; the backpressure knob.
const DATA_CHANNEL_CAPACITY: usize = 64;

/// How long failed components get to observe TERMINATE and exit before their tasks are aborted.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// The simulation's user-visible output stream: per-day performance snapshots while running,
/// then exactly one terminal message — the risk report on clean completion, or an exception
/// record bearing the failing component's identity.
#[derive(Clone, Debug, Serialize)]
pub enum SimulationOutput {
    /// Emitted at every trading-day boundary, and once more with the closing state at
    /// end-of-stream.
    Performance(PerformanceSnapshot),
    Final(RiskReport),
    Exception { component: ComponentId, error: String },
}

/// Everything a resolved simulation leaves behind: the Controller's view of component lifecycles
/// and the ordered output stream.
#[derive(Debug)]
pub struct SimulationReport {
    pub controller: ControllerReport,
    pub outputs: Vec<SimulationOutput>,
}

impl SimulationReport {
    pub fn succeeded(&self) -> bool {
        self.controller.outcome == ControllerOutcome::Finished
    }

    /// The terminal output message of the run.
    pub fn final_output(&self) -> Option<&SimulationOutput> {
        self.outputs.last()
    }

    /// The terminal risk report, present only on clean completion.
    pub fn risk_report(&self) -> Option<&RiskReport> {
        match self.final_output() {
            Some(SimulationOutput::Final(report)) => Some(report),
            _ => None,
        }
    }
}

/// A fully wired pipeline run: trade sources and the order source feeding the Feed, the
/// transaction simulator and Merge pairing fills onto events, the Trading Client driving the
/// algorithm, and the Controller supervising all of them. Every component runs in its own task;
/// all coordination is message passing.
#[derive(Debug)]
pub struct Simulation {
    pub id: Uuid,
    controller_task: JoinHandle<ControllerReport>,
    component_tasks: Vec<JoinHandle<()>>,
    output_rx: mpsc::UnboundedReceiver<SimulationOutput>,
}

impl Simulation {
    /// Returns a [`SimulationBuilder`] instance.
    pub fn builder<A>() -> SimulationBuilder<A>
    where
        A: Algorithm + 'static,
    {
        SimulationBuilder::new()
    }

    /// Waits for the Controller to resolve, reaps component tasks and collects the output
    /// stream into a [`SimulationReport`].
    pub async fn run_to_completion(mut self) -> SimulationReport {
        let controller = match self.controller_task.await {
            Ok(report) => report,
            Err(join_error) => {
                warn!(%join_error, "controller task failed to resolve");
                ControllerReport {
                    outcome: ControllerOutcome::Failed,
                    tallies: Default::default(),
                    failures: vec![crate::controller::Failure {
                        id: ComponentId::new("controller"),
                        error: join_error.to_string(),
                    }],
                }
            }
        };

        match controller.outcome {
            ControllerOutcome::Finished => {
                for task in self.component_tasks.drain(..) {
                    let _ = task.await;
                }
            }
            ControllerOutcome::Failed => {
                // Components were told to TERMINATE; anything still running after the grace
                // period is killed unilaterally.
                tokio::time::sleep(KILL_GRACE).await;
                for task in self.component_tasks.drain(..) {
                    task.abort();
                    let _ = task.await;
                }
            }
        }

        let mut outputs = Vec::new();
        while let Some(output) = self.output_rx.recv().await {
            outputs.push(output);
        }

        for failure in &controller.failures {
            outputs.push(SimulationOutput::Exception {
                component: failure.id.clone(),
                error: failure.error.clone(),
            });
        }

        info!(
            simulation = %self.id,
            outcome = ?controller.outcome,
            outputs = outputs.len(),
            "simulation resolved"
        );

        SimulationReport {
            controller,
            outputs,
        }
    }
}

/// Builder to construct and spawn [`Simulation`] instances.
#[derive(Debug)]
pub struct SimulationBuilder<A>
where
    A: Algorithm + 'static,
{
    env: Option<Arc<TradingEnvironment>>,
    algorithm: Option<A>,
    trade_histories: Vec<(SourceId, Vec<TradeEvent>)>,
    style: SimulationStyle,
    controller_config: ControllerConfig,
    order_timeout: Option<Duration>,
}

impl<A> SimulationBuilder<A>
where
    A: Algorithm + 'static,
{
    fn new() -> Self {
        Self {
            env: None,
            algorithm: None,
            trade_histories: Vec::new(),
            style: SimulationStyle::default(),
            controller_config: ControllerConfig::default(),
            order_timeout: None,
        }
    }

    pub fn environment(self, value: Arc<TradingEnvironment>) -> Self {
        Self {
            env: Some(value),
            ..self
        }
    }

    pub fn algorithm(self, value: A) -> Self {
        Self {
            algorithm: Some(value),
            ..self
        }
    }

    /// Registers a trade source replaying the provided history. May be called once per symbol
    /// group.
    pub fn trade_source(mut self, id: &str, history: Vec<TradeEvent>) -> Self {
        self.trade_histories.push((SourceId::new(id), history));
        self
    }

    pub fn style(self, value: SimulationStyle) -> Self {
        Self {
            style: value,
            ..self
        }
    }

    pub fn controller_config(self, value: ControllerConfig) -> Self {
        Self {
            controller_config: value,
            ..self
        }
    }

    /// Overrides the order source's end-of-stream inactivity window; scenario tests shrink it to
    /// keep runs short.
    pub fn order_timeout(self, value: Duration) -> Self {
        Self {
            order_timeout: Some(value),
            ..self
        }
    }

    /// Wires channels, constructs every component, registers them with a Controller under a
    /// declared topology, and spawns the whole pipeline.
    pub fn spawn(self) -> Result<Simulation, SimulationError> {
        let env = self.env.ok_or(SimulationError::BuilderIncomplete)?;
        let algorithm = self.algorithm.ok_or(SimulationError::BuilderIncomplete)?;
        if self.trade_histories.is_empty() {
            return Err(SimulationError::BuilderIncomplete);
        }

        let id = Uuid::new_v4();
        info!(simulation = %id, sources = self.trade_histories.len(), "constructing simulation");

        // Declared topology: every identity is known up front.
        let mut topology_ids: Vec<ComponentId> = vec![
            ComponentId::new(FEED_ID),
            ComponentId::new(TRANSACTION_SIM_ID),
            ComponentId::new(MERGE_ID),
            ComponentId::new(TRADING_CLIENT_ID),
            order_source_id(),
        ];
        topology_ids.extend(self.trade_histories.iter().map(|(id, _)| id.clone()));

        let controller = Controller::new(Topology::declared(topology_ids), self.controller_config);

        // Data plane channels.
        let mut feed_inputs = Vec::new();
        let mut component_tasks = Vec::new();

        for (source_id, history) in self.trade_histories {
            let (data_tx, data_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
            let source = ReplayTradeSource::new(source_id.clone(), history, data_tx)?;
            feed_inputs.push((source_id, data_rx));
            let handle = controller.handle();
            component_tasks.push(tokio::spawn(async move {
                let _ = run(source, handle).await;
            }));
        }

        let (order_data_tx, order_data_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        let (order_command_tx, order_command_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        feed_inputs.push((order_source_id(), order_data_rx));

        let mut order_source = OrderSource::new(order_command_rx, order_data_tx);
        if let Some(order_timeout) = self.order_timeout {
            order_source = order_source.with_order_timeout(order_timeout);
        }
        let handle = controller.handle();
        component_tasks.push(tokio::spawn(async move {
            let _ = run(order_source, handle).await;
        }));

        let (passthrough_tx, passthrough_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        let (transform_tx, transform_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        let feed = Feed::new(feed_inputs, passthrough_tx, transform_tx);
        let handle = controller.handle();
        component_tasks.push(tokio::spawn(async move {
            let _ = run(feed, handle).await;
        }));

        let (result_tx, result_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        let slippage = match self.style {
            SimulationStyle::VolumeShare => {
                ConfiguredSlippage::VolumeShare(VolumeShareSlippage::default())
            }
            SimulationStyle::FixedSlippage { spread, commission } => {
                ConfiguredSlippage::Fixed(FixedSlippage::new(spread, commission))
            }
        };
        let simulator = TransactionSimulator::new(slippage, transform_rx, result_tx);
        let handle = controller.handle();
        component_tasks.push(tokio::spawn(async move {
            let _ = run(simulator, handle).await;
        }));

        let (merged_tx, merged_rx) = mpsc::channel(DATA_CHANNEL_CAPACITY);
        let merge = Merge::new(passthrough_rx, result_rx, merged_tx);
        let handle = controller.handle();
        component_tasks.push(tokio::spawn(async move {
            let _ = run(merge, handle).await;
        }));

        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let client = TradingClient::new(env, algorithm, merged_rx, order_command_tx, output_tx);
        let handle = controller.handle();
        component_tasks.push(tokio::spawn(async move {
            let _ = run(client, handle).await;
        }));

        let controller_task = tokio::spawn(controller.run());

        Ok(Simulation {
            id,
            controller_task,
            component_tasks,
            output_rx,
        })
    }
}

use crate::client::error::ClientError;
use crate::client::frame::EventFrame;
use crate::component::{
    Component, ComponentError, ComponentId, ComponentTally, ComponentType, WorkOutcome, RECV_WAIT,
};
use crate::environment::TradingEnvironment;
use crate::event::{order_source_id, Event, MergedEvent, OrderEvent, Sid};
use crate::merge::MergedMessage;
use crate::performance::PerformanceTracker;
use crate::simulation::SimulationOutput;
use crate::sources::OrderCommand;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::debug;

/// Client module specific errors.
pub mod error;

/// Frame snapshots handed to the algorithm.
pub mod frame;

/// Canonical [`ComponentId`] of the Trading Client.
pub const TRADING_CLIENT_ID: &str = "trading-client";

/// The contract user algorithms implement. The client hands the algorithm a frame of the latest
/// per-sid state whenever the simulation clock catches up with the event stream; orders are
/// queued through the [`AlgoContext`].
pub trait Algorithm: Send {
    /// Restricts which sids are framed for this algorithm. Events outside the filter still flow
    /// through the pipeline and the performance tracker, but never reach `handle_frame`.
    fn sid_filter(&self) -> Option<&HashSet<Sid>> {
        None
    }

    /// Reacts to the latest frame. Call `ctx.order(sid, amount)` to trade.
    fn handle_frame(&mut self, frame: &EventFrame, ctx: &mut AlgoContext);
}

/// Order entry surface handed to the algorithm for the duration of one `handle_frame` call.
#[derive(Debug)]
pub struct AlgoContext {
    current_dt: DateTime<Utc>,
    orders: Vec<(Sid, i64)>,
}

impl AlgoContext {
    fn new(current_dt: DateTime<Utc>) -> Self {
        Self {
            current_dt,
            orders: Vec::new(),
        }
    }

    /// The simulation clock at the time of this callback; orders are stamped with it.
    pub fn current_dt(&self) -> DateTime<Utc> {
        self.current_dt
    }

    /// Queues an order for `amount` shares of `sid` (positive buy, negative sell).
    pub fn order(&mut self, sid: Sid, amount: i64) {
        self.orders.push((sid, amount));
    }
}

/// Couples the pipeline to the user algorithm: consumes merged events in chronological order,
/// keeps the [`PerformanceTracker`] up to date *before* any algorithm callback runs, frames
/// events for the algorithm, relays its orders back to the order source, and models algorithm
/// latency by advancing a simulation clock with each callback's processing time.
#[derive(Debug)]
pub struct TradingClient<A>
where
    A: Algorithm,
{
    result_rx: mpsc::Receiver<MergedMessage>,
    order_tx: mpsc::Sender<OrderCommand>,
    output_tx: mpsc::UnboundedSender<SimulationOutput>,
    tracker: PerformanceTracker,
    algorithm: A,
    frame: EventFrame,
    /// Events framed since the last algorithm callback.
    pending_rows: usize,
    current_dt: DateTime<Utc>,
    /// Wall-clock cost of the most recent event, mirrored into the simulation clock.
    pub last_iteration_dur: Duration,
    /// Set once the order source stops accepting commands; later sends are no-ops.
    order_receiver_dropped: bool,
    pub txn_count: u64,
    pub order_count: u64,
    received_count: u64,
}

impl<A> TradingClient<A>
where
    A: Algorithm,
{
    /// Constructs a new [`TradingClient`] over the provided environment and algorithm.
    pub fn new(
        env: Arc<TradingEnvironment>,
        algorithm: A,
        result_rx: mpsc::Receiver<MergedMessage>,
        order_tx: mpsc::Sender<OrderCommand>,
        output_tx: mpsc::UnboundedSender<SimulationOutput>,
    ) -> Self {
        let frame = EventFrame::new(env.frame_index().to_vec());
        let current_dt = env.period_start;

        Self {
            result_rx,
            order_tx,
            output_tx,
            tracker: PerformanceTracker::new(env),
            algorithm,
            frame,
            pending_rows: 0,
            current_dt,
            last_iteration_dur: Duration::zero(),
            order_receiver_dropped: false,
            txn_count: 0,
            order_count: 0,
            received_count: 0,
        }
    }

    /// Read access to the tracker, used by the test harness to verify accounting.
    pub fn performance(&self) -> &PerformanceTracker {
        &self.tracker
    }

    fn passes_filter(&self, event: &Event) -> bool {
        match (self.algorithm.sid_filter(), event.sid()) {
            (Some(filter), Some(sid)) => filter.contains(&sid),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    async fn process(&mut self, merged: MergedEvent) -> Result<(), ComponentError> {
        self.received_count += 1;

        if merged.transaction.is_some() {
            self.txn_count += 1;
        }

        // Order flow circles back through the feed for the simulator's benefit; it is not
        // market data and stays out of the frames and the performance accounting.
        if merged.event.source_id() != &order_source_id() {
            let event_start = Instant::now();

            // The tracker sees the event before any callback, so algorithm queries observe
            // up-to-date performance state.
            if let Some(snapshot) = self.tracker.process_event(&merged)? {
                let _ = self.output_tx.send(SimulationOutput::Performance(snapshot));
            }

            if self.passes_filter(&merged.event) {
                self.frame.insert(&merged.event);
                self.pending_rows += 1;
            }

            if merged.dt().is_some_and(|dt| dt >= self.current_dt) {
                self.run_algorithm().await?;
            }

            // Model the algorithm's latency: the simulation clock advances by however long this
            // event took to process.
            self.last_iteration_dur = Duration::from_std(event_start.elapsed())
                .unwrap_or_else(|_| Duration::zero());
            self.current_dt += self.last_iteration_dur;
        }

        self.send_order_command(OrderCommand::Tick).await;

        Ok(())
    }

    /// Runs the algorithm against the current frame if fresh rows arrived since the last call,
    /// then relays any queued orders to the order source.
    async fn run_algorithm(&mut self) -> Result<(), ComponentError> {
        if self.pending_rows == 0 || self.frame.is_empty() {
            return Ok(());
        }
        self.pending_rows = 0;

        let mut ctx = AlgoContext::new(self.current_dt);
        let algorithm = &mut self.algorithm;
        let frame = &self.frame;
        catch_unwind(AssertUnwindSafe(|| algorithm.handle_frame(frame, &mut ctx))).map_err(
            |panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "algorithm panicked".to_string());
                ComponentError::Client(ClientError::Algorithm(message))
            },
        )?;

        for (sid, amount) in ctx.orders {
            let order = OrderEvent::new(sid, amount, self.current_dt);
            self.order_count += 1;
            self.send_order_command(OrderCommand::Place(order)).await;
        }

        Ok(())
    }

    /// Sends on the order channel, tolerating a dropped receiver: the order source legitimately
    /// exits before the tail of the result stream is delivered.
    async fn send_order_command(&mut self, command: OrderCommand) {
        if self.order_receiver_dropped {
            return;
        }

        if self.order_tx.send(command).await.is_err() {
            debug!(
                action = "setting order_receiver_dropped = true",
                "order source no longer accepting commands"
            );
            self.order_receiver_dropped = true;
        }
    }

    async fn finish(&mut self) -> Result<(), ComponentError> {
        // Flush any frame rows that arrived after the last callback.
        self.run_algorithm().await?;
        self.send_order_command(OrderCommand::Finished).await;

        // Closing state first, then the terminal risk report.
        let _ = self
            .output_tx
            .send(SimulationOutput::Performance(self.tracker.snapshot()));
        let report = self.tracker.on_complete();
        let _ = self.output_tx.send(SimulationOutput::Final(report));

        Ok(())
    }
}

#[async_trait]
impl<A> Component for TradingClient<A>
where
    A: Algorithm,
{
    fn id(&self) -> ComponentId {
        ComponentId::new(TRADING_CLIENT_ID)
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Sink
    }

    async fn do_work(&mut self) -> Result<WorkOutcome, ComponentError> {
        match tokio::time::timeout(RECV_WAIT, self.result_rx.recv()).await {
            Ok(Some(MergedMessage::Event(merged))) => {
                self.process(merged).await?;
                Ok(WorkOutcome::Continue)
            }
            Ok(Some(MergedMessage::Done)) => {
                debug!(events = self.received_count, "client observed end-of-stream");
                self.finish().await?;
                Ok(WorkOutcome::Done)
            }
            Ok(None) => Err(ComponentError::ChannelDisconnected("client result")),
            Err(_elapsed) => Ok(WorkOutcome::Idle),
        }
    }

    fn kill(&mut self) {
        self.result_rx.close();
    }

    fn tally(&self) -> ComponentTally {
        ComponentTally {
            received: self.received_count,
            sent: self.order_count,
            pending: 0,
        }
    }
}

use crate::component::{
    Component, ComponentError, ComponentId, ComponentTally, ComponentType, WorkOutcome, RECV_WAIT,
};
use crate::event::{Event, OrderEvent, Sid, TradeEvent, TransactionEvent};
use crate::execution::error::ExecutionError;
use crate::execution::slippage::SlippageModel;
use crate::feed::FeedMessage;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Execution module specific errors.
pub mod error;

/// Fill models: the canonical volume-share model and the fixed-spread variant.
pub mod slippage;

/// Canonical [`ComponentId`] of the transaction simulator.
pub const TRANSACTION_SIM_ID: &str = "transaction-sim";

/// Per-event output of the transaction simulator: the transaction synthesised for the event, or
/// nothing. Exactly one output is emitted per feed event so the Merge can pair streams 1:1.
#[derive(Clone, PartialEq, Debug)]
pub struct TransformOutput {
    pub transaction: Option<TransactionEvent>,
}

/// Messages flowing from the transaction simulator to the Merge.
#[derive(Clone, PartialEq, Debug)]
pub enum TransformMessage {
    Output(TransformOutput),
    Done,
}

/// Orders not yet fully filled nor expired, grouped by sid and held in creation order. Orders
/// are mutated in place as fills accumulate; the book is the simulator's single-writer state.
#[derive(Debug, Default)]
pub struct OpenOrders {
    by_sid: HashMap<Sid, Vec<OrderEvent>>,
}

impl OpenOrders {
    /// Captures an order in the book. Zero-amount orders are ignored; no arithmetic happens
    /// until a trade for the sid arrives.
    pub fn add(&mut self, order: OrderEvent) -> bool {
        if order.amount == 0 {
            debug!(sid = order.sid, "requested to trade zero shares, ignoring order");
            return false;
        }

        self.by_sid.entry(order.sid).or_default().push(order);
        true
    }

    /// Open orders for a sid, in creation order.
    pub fn open_for(&self, sid: Sid) -> Option<&[OrderEvent]> {
        self.by_sid.get(&sid).map(Vec::as_slice)
    }

    /// Total number of open orders across all sids.
    pub fn total_open(&self) -> usize {
        self.by_sid.values().map(Vec::len).sum()
    }

    pub(crate) fn orders_mut(&mut self, sid: Sid) -> Option<&mut Vec<OrderEvent>> {
        self.by_sid.get_mut(&sid)
    }

    /// Drops the sid's entry once its order list is empty.
    pub(crate) fn prune(&mut self, sid: Sid) {
        if self.by_sid.get(&sid).is_some_and(Vec::is_empty) {
            self.by_sid.remove(&sid);
        }
    }

    /// Removes every open order for the sid.
    pub(crate) fn clear(&mut self, sid: Sid) {
        self.by_sid.remove(&sid);
    }
}

/// Conduit between the Feed and the Merge. Order events accumulate in [`OpenOrders`]; each trade
/// event runs the configured [`SlippageModel`] against the book, emitting exactly one
/// [`TransformOutput`] per inbound event.
#[derive(Debug)]
pub struct TransactionSimulator<Slippage>
where
    Slippage: SlippageModel,
{
    feed_rx: mpsc::Receiver<FeedMessage>,
    result_tx: mpsc::Sender<TransformMessage>,
    slippage: Slippage,
    open_orders: OpenOrders,
    pub order_count: u64,
    pub txn_count: u64,
    received_count: u64,
    sent_count: u64,
}

impl<Slippage> TransactionSimulator<Slippage>
where
    Slippage: SlippageModel,
{
    /// Constructs a new [`TransactionSimulator`] using the provided [`SlippageModel`].
    pub fn new(
        slippage: Slippage,
        feed_rx: mpsc::Receiver<FeedMessage>,
        result_tx: mpsc::Sender<TransformMessage>,
    ) -> Self {
        Self {
            feed_rx,
            result_tx,
            slippage,
            open_orders: OpenOrders::default(),
            order_count: 0,
            txn_count: 0,
            received_count: 0,
            sent_count: 0,
        }
    }

    /// Read access to the book, used by the test harness to verify fill accounting.
    pub fn open_orders(&self) -> &OpenOrders {
        &self.open_orders
    }

    /// Captures an order in the book.
    pub fn add_open_order(&mut self, order: OrderEvent) {
        if self.open_orders.add(order) {
            self.order_count += 1;
        }
    }

    /// Runs the slippage model for one trade against the book.
    pub fn apply_trade_to_open_orders(&mut self, trade: &TradeEvent) -> Option<TransactionEvent> {
        let txn = self.slippage.simulate(trade, &mut self.open_orders);
        if txn.is_some() {
            self.txn_count += 1;
        }
        txn
    }

    fn transform(&mut self, event: Event) -> Result<TransformOutput, ExecutionError> {
        match event {
            Event::Order(order) => {
                self.add_open_order(order);
                Ok(TransformOutput { transaction: None })
            }
            Event::Trade(trade) => Ok(TransformOutput {
                transaction: self.apply_trade_to_open_orders(&trade),
            }),
            // Fillers are consumed by the Feed; a transaction cannot be sourced upstream of the
            // simulator. Either arriving here is a mis-wired pipeline.
            other => Err(ExecutionError::UnexpectedEventType(other.event_type())),
        }
    }
}

#[async_trait]
impl<Slippage> Component for TransactionSimulator<Slippage>
where
    Slippage: SlippageModel + Send,
{
    fn id(&self) -> ComponentId {
        ComponentId::new(TRANSACTION_SIM_ID)
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Conduit
    }

    async fn do_work(&mut self) -> Result<WorkOutcome, ComponentError> {
        match tokio::time::timeout(RECV_WAIT, self.feed_rx.recv()).await {
            Ok(Some(FeedMessage::Event(event))) => {
                self.received_count += 1;
                let output = self.transform(event)?;
                self.result_tx
                    .send(TransformMessage::Output(output))
                    .await
                    .map_err(|_| ComponentError::ChannelDisconnected("simulator result"))?;
                self.sent_count += 1;
                Ok(WorkOutcome::Continue)
            }
            Ok(Some(FeedMessage::Done)) => {
                self.result_tx
                    .send(TransformMessage::Done)
                    .await
                    .map_err(|_| ComponentError::ChannelDisconnected("simulator result"))?;
                Ok(WorkOutcome::Done)
            }
            Ok(None) => Err(ComponentError::ChannelDisconnected("simulator feed")),
            Err(_elapsed) => Ok(WorkOutcome::Idle),
        }
    }

    fn kill(&mut self) {
        self.feed_rx.close();
    }

    fn tally(&self) -> ComponentTally {
        ComponentTally {
            received: self.received_count,
            sent: self.sent_count,
            pending: self.open_orders.total_open(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::slippage::VolumeShareSlippage;
    use chrono::{Duration, TimeZone, Utc};

    fn simulator() -> (
        TransactionSimulator<VolumeShareSlippage>,
        mpsc::Sender<FeedMessage>,
        mpsc::Receiver<TransformMessage>,
    ) {
        let (feed_tx, feed_rx) = mpsc::channel(16);
        let (result_tx, result_rx) = mpsc::channel(16);
        (
            TransactionSimulator::new(VolumeShareSlippage::default(), feed_rx, result_tx),
            feed_tx,
            result_rx,
        )
    }

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2008, 1, 7, 14, 30, 0).unwrap()
    }

    #[tokio::test]
    async fn every_feed_event_produces_exactly_one_output() {
        let (mut simulator, feed_tx, mut result_rx) = simulator();

        feed_tx
            .send(FeedMessage::Event(Event::Order(OrderEvent::new(
                133,
                100,
                start(),
            ))))
            .await
            .unwrap();
        feed_tx
            .send(FeedMessage::Event(Event::Trade(TradeEvent {
                source_id: "trades-133".into(),
                sid: 133,
                price: 10.0,
                volume: 100,
                dt: start() + Duration::minutes(1),
            })))
            .await
            .unwrap();
        feed_tx.send(FeedMessage::Done).await.unwrap();

        loop {
            match simulator.do_work().await.unwrap() {
                WorkOutcome::Done => break,
                _ => continue,
            }
        }

        // Order event -> empty output; trade event -> transaction output; then Done.
        match result_rx.try_recv().unwrap() {
            TransformMessage::Output(output) => assert!(output.transaction.is_none()),
            other => panic!("expected empty output, got {other:?}"),
        }
        match result_rx.try_recv().unwrap() {
            TransformMessage::Output(output) => {
                assert_eq!(output.transaction.unwrap().amount, 25)
            }
            other => panic!("expected transaction output, got {other:?}"),
        }
        assert!(matches!(
            result_rx.try_recv().unwrap(),
            TransformMessage::Done
        ));
        assert_eq!(simulator.order_count, 1);
        assert_eq!(simulator.txn_count, 1);
    }

    #[tokio::test]
    async fn zero_amount_orders_are_dropped_before_the_book() {
        let (mut simulator, feed_tx, mut result_rx) = simulator();

        feed_tx
            .send(FeedMessage::Event(Event::Order(OrderEvent::new(
                133,
                0,
                start(),
            ))))
            .await
            .unwrap();

        simulator.do_work().await.unwrap();

        assert_eq!(simulator.order_count, 0);
        assert_eq!(simulator.open_orders().total_open(), 0);
        assert!(matches!(
            result_rx.try_recv().unwrap(),
            TransformMessage::Output(TransformOutput { transaction: None })
        ));
    }
}

use crate::component::{
    Component, ComponentError, ComponentId, ComponentTally, ComponentType, WorkOutcome, RECV_WAIT,
};
use crate::event::{order_source_id, EmptyEvent, Event, OrderEvent};
use crate::feed::SourceMessage;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Inactivity window after which the source assumes the client has stopped processing events.
/// Half the default heartbeat timeout, leaving room to signal DONE before a missed beat.
const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(1);

/// Commands flowing from the Trading Client to the [`OrderSource`].
#[derive(Clone, PartialEq, Debug)]
pub enum OrderCommand {
    /// Relay an algorithm order into the pipeline.
    Place(OrderEvent),
    /// The client finished processing one event; flush relayed orders or an Empty filler so the
    /// Feed's fullness predicate is satisfied for this tick.
    Tick,
    /// End of stream observed by the client; no further orders will arrive.
    Finished,
}

/// Pseudo-source closing the algorithm loop: orders emitted by the algorithm through the Trading
/// Client are re-injected into the Feed as typed events. The source is non-blocking by contract;
/// a tick with no orders emits a dateless Empty filler instead, so the cyclic
/// client -> order source -> feed -> client structure can never stall the pipeline.
#[derive(Debug)]
pub struct OrderSource {
    order_rx: mpsc::Receiver<OrderCommand>,
    data_tx: mpsc::Sender<SourceMessage>,
    pub sent_count: u64,
    /// Orders relayed since the last tick boundary.
    relayed_this_tick: u64,
    started: bool,
    /// The client cannot announce end-of-stream to us before the Feed completes, because the
    /// Feed itself waits on this source. Going quiet for this long is the end-of-stream signal.
    order_timeout: Duration,
    last_activity: Option<Instant>,
}

impl OrderSource {
    pub fn new(
        order_rx: mpsc::Receiver<OrderCommand>,
        data_tx: mpsc::Sender<SourceMessage>,
    ) -> Self {
        Self {
            order_rx,
            data_tx,
            sent_count: 0,
            relayed_this_tick: 0,
            started: false,
            order_timeout: DEFAULT_ORDER_TIMEOUT,
            last_activity: None,
        }
    }

    /// Overrides the inactivity window used to infer end-of-stream.
    pub fn with_order_timeout(mut self, order_timeout: Duration) -> Self {
        self.order_timeout = order_timeout;
        self
    }

    async fn send(&self, message: SourceMessage) -> Result<(), ComponentError> {
        self.data_tx
            .send(message)
            .await
            .map_err(|_| ComponentError::ChannelDisconnected("order source data"))
    }

    async fn send_filler(&self) -> Result<(), ComponentError> {
        self.send(SourceMessage::Event(Event::Empty(EmptyEvent::new(
            order_source_id(),
        ))))
        .await
    }
}

#[async_trait]
impl Component for OrderSource {
    fn id(&self) -> ComponentId {
        order_source_id()
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Source
    }

    async fn do_work(&mut self) -> Result<WorkOutcome, ComponentError> {
        if !self.started {
            // The first filler breaks the startup deadlock: the Feed needs a buffered message
            // from this source before it will emit the event the client must process to tick us.
            self.send_filler().await?;
            self.started = true;
            return Ok(WorkOutcome::Continue);
        }

        match tokio::time::timeout(RECV_WAIT, self.order_rx.recv()).await {
            Ok(Some(OrderCommand::Place(order))) => {
                self.last_activity = Some(Instant::now());
                self.send(SourceMessage::Event(Event::Order(order))).await?;
                self.sent_count += 1;
                self.relayed_this_tick += 1;
                Ok(WorkOutcome::Continue)
            }
            Ok(Some(OrderCommand::Tick)) => {
                self.last_activity = Some(Instant::now());
                if self.relayed_this_tick == 0 {
                    // Nothing from the algorithm this tick: the mandatory filler keeps the Feed
                    // from blocking on us.
                    self.send_filler().await?;
                }
                self.relayed_this_tick = 0;
                Ok(WorkOutcome::Continue)
            }
            Ok(Some(OrderCommand::Finished)) => {
                debug!(sent = self.sent_count, "order flow finished");
                self.send(SourceMessage::Done).await?;
                Ok(WorkOutcome::Done)
            }
            Ok(None) => Err(ComponentError::ChannelDisconnected("order source commands")),
            Err(_elapsed) => {
                let quiet_for = self
                    .last_activity
                    .get_or_insert_with(Instant::now)
                    .elapsed();
                if quiet_for >= self.order_timeout {
                    warn!(sent = self.sent_count, "signalling orders done on timeout");
                    self.send(SourceMessage::Done).await?;
                    return Ok(WorkOutcome::Done);
                }
                Ok(WorkOutcome::Idle)
            }
        }
    }

    fn kill(&mut self) {
        self.order_rx.close();
    }

    fn tally(&self) -> ComponentTally {
        ComponentTally {
            received: self.sent_count,
            sent: self.sent_count,
            pending: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    async fn drive(source: &mut OrderSource, iterations: usize) {
        for _ in 0..iterations {
            let _ = source.do_work().await.unwrap();
        }
    }

    #[tokio::test]
    async fn first_iteration_emits_the_deadlock_breaking_filler() {
        let (_order_tx, order_rx) = mpsc::channel(16);
        let (data_tx, mut data_rx) = mpsc::channel(16);
        let mut source = OrderSource::new(order_rx, data_tx);

        drive(&mut source, 1).await;

        assert!(matches!(
            data_rx.try_recv(),
            Ok(SourceMessage::Event(Event::Empty(_)))
        ));
    }

    #[tokio::test]
    async fn a_tick_without_orders_emits_a_filler() {
        let (order_tx, order_rx) = mpsc::channel(16);
        let (data_tx, mut data_rx) = mpsc::channel(16);
        let mut source = OrderSource::new(order_rx, data_tx);

        order_tx.send(OrderCommand::Tick).await.unwrap();
        drive(&mut source, 2).await;

        // Startup filler + tick filler.
        let mut fillers = 0;
        while let Ok(SourceMessage::Event(Event::Empty(_))) = data_rx.try_recv() {
            fillers += 1;
        }
        assert_eq!(fillers, 2);
    }

    #[tokio::test]
    async fn orders_are_relayed_and_suppress_the_tick_filler() {
        let (order_tx, order_rx) = mpsc::channel(16);
        let (data_tx, mut data_rx) = mpsc::channel(16);
        let mut source = OrderSource::new(order_rx, data_tx);

        let order = OrderEvent::new(133, 100, Utc.with_ymd_and_hms(2008, 1, 7, 14, 30, 0).unwrap());
        order_tx.send(OrderCommand::Place(order)).await.unwrap();
        order_tx.send(OrderCommand::Tick).await.unwrap();
        order_tx.send(OrderCommand::Finished).await.unwrap();

        drive(&mut source, 4).await;

        // Startup filler, then the order, then DONE; no tick filler in between.
        assert!(matches!(
            data_rx.try_recv(),
            Ok(SourceMessage::Event(Event::Empty(_)))
        ));
        assert!(matches!(
            data_rx.try_recv(),
            Ok(SourceMessage::Event(Event::Order(_)))
        ));
        assert!(matches!(data_rx.try_recv(), Ok(SourceMessage::Done)));
        assert_eq!(source.sent_count, 1);
    }

    #[tokio::test]
    async fn prolonged_silence_is_treated_as_end_of_stream() {
        let (_order_tx, order_rx) = mpsc::channel(16);
        let (data_tx, mut data_rx) = mpsc::channel(16);
        let mut source =
            OrderSource::new(order_rx, data_tx).with_order_timeout(Duration::from_millis(0));

        drive(&mut source, 1).await;

        assert_eq!(source.do_work().await.unwrap(), WorkOutcome::Done);
        assert!(matches!(
            data_rx.try_recv(),
            Ok(SourceMessage::Event(Event::Empty(_)))
        ));
        assert!(matches!(data_rx.try_recv(), Ok(SourceMessage::Done)));
    }
}

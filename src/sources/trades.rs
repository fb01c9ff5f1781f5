use crate::component::{
    Component, ComponentError, ComponentId, ComponentTally, ComponentType, WorkOutcome,
};
use crate::event::{Event, Sid, SourceId, TradeEvent};
use crate::feed::SourceMessage;
use crate::sources::error::SourceError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::{HashSet, VecDeque};
use tokio::sync::mpsc;
use tracing::debug;

/// Replays a chronologically ordered trade history into the Feed, one event per work iteration,
/// then signals DONE. One instance runs per symbol group.
#[derive(Debug)]
pub struct ReplayTradeSource {
    id: SourceId,
    events: VecDeque<TradeEvent>,
    data_tx: mpsc::Sender<SourceMessage>,
    /// Optional sid allow-list; trades outside it are dropped before they enter the pipeline.
    sid_filter: Option<HashSet<Sid>>,
    pub sent_count: u64,
}

impl ReplayTradeSource {
    /// Constructs a new [`ReplayTradeSource`], validating that the provided history is in
    /// non-decreasing `dt` order.
    pub fn new(
        id: SourceId,
        events: Vec<TradeEvent>,
        data_tx: mpsc::Sender<SourceMessage>,
    ) -> Result<Self, SourceError> {
        if events.windows(2).any(|pair| pair[0].dt > pair[1].dt) {
            return Err(SourceError::UnorderedHistory(id));
        }

        Ok(Self {
            id,
            events: events.into(),
            data_tx,
            sid_filter: None,
            sent_count: 0,
        })
    }

    /// Restricts the source to the provided sids.
    pub fn with_sid_filter(mut self, sids: HashSet<Sid>) -> Self {
        self.sid_filter = Some(sids);
        self
    }

    fn passes_filter(&self, sid: Sid) -> bool {
        match &self.sid_filter {
            Some(sids) => sids.contains(&sid),
            None => true,
        }
    }
}

#[async_trait]
impl Component for ReplayTradeSource {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Source
    }

    async fn do_work(&mut self) -> Result<WorkOutcome, ComponentError> {
        let Some(trade) = self.events.pop_front() else {
            debug!(source = %self.id, sent = self.sent_count, "trade history exhausted");
            self.data_tx
                .send(SourceMessage::Done)
                .await
                .map_err(|_| ComponentError::ChannelDisconnected("trade source data"))?;
            return Ok(WorkOutcome::Done);
        };

        if !self.passes_filter(trade.sid) {
            return Ok(WorkOutcome::Continue);
        }

        let mut trade = trade;
        trade.source_id = self.id.clone();

        self.data_tx
            .send(SourceMessage::Event(Event::Trade(trade)))
            .await
            .map_err(|_| ComponentError::ChannelDisconnected("trade source data"))?;
        self.sent_count += 1;

        Ok(WorkOutcome::Continue)
    }

    fn shutdown(&mut self) {
        // Stop dispatching new trades; the next iteration signals DONE.
        self.events.clear();
    }

    fn kill(&mut self) {
        self.events.clear();
    }

    fn tally(&self) -> ComponentTally {
        ComponentTally {
            received: 0,
            sent: self.sent_count,
            pending: self.events.len(),
        }
    }
}

/// Generates a random-walk stream of trades at one-minute spacing, for harness use where the
/// exact history is irrelevant.
#[derive(Debug)]
pub struct RandomTradeSource {
    id: SourceId,
    sid: Sid,
    count: u64,
    incr: u64,
    cursor: DateTime<Utc>,
    price: f64,
    data_tx: mpsc::Sender<SourceMessage>,
}

impl RandomTradeSource {
    pub fn new(
        id: SourceId,
        sid: Sid,
        count: u64,
        start: DateTime<Utc>,
        data_tx: mpsc::Sender<SourceMessage>,
    ) -> Self {
        let mut rng = rand::rng();
        Self {
            id,
            sid,
            count,
            incr: 0,
            cursor: start,
            price: rng.random_range(5.0..50.0),
            data_tx,
        }
    }
}

#[async_trait]
impl Component for RandomTradeSource {
    fn id(&self) -> ComponentId {
        self.id.clone()
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Source
    }

    async fn do_work(&mut self) -> Result<WorkOutcome, ComponentError> {
        if self.incr == self.count {
            self.data_tx
                .send(SourceMessage::Done)
                .await
                .map_err(|_| ComponentError::ChannelDisconnected("trade source data"))?;
            return Ok(WorkOutcome::Done);
        }

        let (drift, volume) = {
            let mut rng = rand::rng();
            (
                rng.random_range(-0.05..0.05),
                rng.random_range(1..100) * 100,
            )
        };
        self.price += drift;

        let trade = TradeEvent {
            source_id: self.id.clone(),
            sid: self.sid,
            price: self.price,
            volume,
            dt: self.cursor,
        };

        self.data_tx
            .send(SourceMessage::Event(Event::Trade(trade)))
            .await
            .map_err(|_| ComponentError::ChannelDisconnected("trade source data"))?;

        self.cursor += Duration::minutes(1);
        self.incr += 1;

        Ok(WorkOutcome::Continue)
    }

    fn shutdown(&mut self) {
        self.count = self.incr;
    }

    fn kill(&mut self) {
        self.count = self.incr;
    }

    fn tally(&self) -> ComponentTally {
        ComponentTally {
            received: 0,
            sent: self.incr,
            pending: (self.count - self.incr) as usize,
        }
    }
}

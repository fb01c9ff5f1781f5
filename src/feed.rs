use crate::component::{
    Component, ComponentError, ComponentId, ComponentTally, ComponentType, WorkOutcome, RECV_WAIT,
};
use crate::event::{Event, SourceId};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Canonical [`ComponentId`] of the Feed.
pub const FEED_ID: &str = "feed";

/// Messages flowing from a data source into the [`Feed`]. A source signals completion explicitly
/// with [`SourceMessage::Done`]; a channel that closes without it is a failure, never a clean
/// exit.
#[derive(Clone, PartialEq, Debug)]
pub enum SourceMessage {
    Event(Event),
    Done,
}

/// Messages emitted by the [`Feed`] to downstream consumers.
#[derive(Clone, PartialEq, Debug)]
pub enum FeedMessage {
    Event(Event),
    Done,
}

/// Feed module specific errors.
#[derive(Error, Debug)]
pub enum FeedError {
    #[error("source \"{0}\" disconnected without signalling DONE")]
    SourceDisconnected(SourceId),
}

#[derive(Debug)]
struct SourceState {
    rx: mpsc::Receiver<SourceMessage>,
    buffer: VecDeque<Event>,
    done: bool,
}

impl SourceState {
    fn satisfied(&self) -> bool {
        self.done || !self.buffer.is_empty()
    }
}

/// Merges N asynchronous source streams into one stream ordered by event timestamp. The Feed may
/// only emit while every registered source either has a buffered message or has signalled DONE;
/// this blocking contract is what preserves chronological order across producers that run
/// independently. Once all sources are DONE the Feed drains its buffers without waiting.
///
/// Dateless filler events are flow control only: they satisfy the fullness predicate and are
/// discarded during selection, never compared or forwarded.
#[derive(Debug)]
pub struct Feed {
    /// Per-source inbound queues, keyed in lexicographic order so timestamp ties break
    /// deterministically to the smallest source id.
    sources: BTreeMap<SourceId, SourceState>,
    passthrough_tx: mpsc::Sender<FeedMessage>,
    transform_tx: mpsc::Sender<FeedMessage>,
    draining: bool,
    sent_count: u64,
    received_count: u64,
    sent_counters: HashMap<SourceId, u64>,
    recv_counters: HashMap<SourceId, u64>,
}

impl Feed {
    /// Constructs a new [`Feed`] merging the provided source channels, fanning its ordered output
    /// out to the passthrough (Merge) and transform (Transaction Simulator) channels.
    pub fn new(
        sources: Vec<(SourceId, mpsc::Receiver<SourceMessage>)>,
        passthrough_tx: mpsc::Sender<FeedMessage>,
        transform_tx: mpsc::Sender<FeedMessage>,
    ) -> Self {
        let sources = sources
            .into_iter()
            .map(|(id, rx)| {
                (
                    id,
                    SourceState {
                        rx,
                        buffer: VecDeque::new(),
                        done: false,
                    },
                )
            })
            .collect();

        Self {
            sources,
            passthrough_tx,
            transform_tx,
            draining: false,
            sent_count: 0,
            received_count: 0,
            sent_counters: HashMap::new(),
            recv_counters: HashMap::new(),
        }
    }

    /// Number of events still buffered across all sources.
    pub fn pending_messages(&self) -> usize {
        self.sources
            .values()
            .map(|source| source.buffer.len())
            .sum()
    }

    /// The fullness predicate: true iff every registered source has at least one buffered
    /// message or has signalled DONE.
    fn is_full(&self) -> bool {
        self.sources.values().all(SourceState::satisfied)
    }

    fn all_done(&self) -> bool {
        self.sources.values().all(|source| source.done)
    }

    /// Non-blocking sweep over every source channel, buffering whatever has arrived.
    fn poll_sources(&mut self) -> Result<(), FeedError> {
        for (source_id, source) in self.sources.iter_mut() {
            loop {
                match source.rx.try_recv() {
                    Ok(SourceMessage::Event(event)) => {
                        source.buffer.push_back(event);
                        self.received_count += 1;
                        *self.recv_counters.entry(source_id.clone()).or_insert(0) += 1;
                    }
                    Ok(SourceMessage::Done) => {
                        debug!(source = %source_id, "source signalled DONE");
                        source.done = true;
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        if !source.done {
                            return Err(FeedError::SourceDisconnected(source_id.clone()));
                        }
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    /// Blocks on the first unsatisfied source, honouring the fullness contract. Returns false if
    /// the wait timed out with nothing received.
    async fn await_starved_source(&mut self) -> Result<bool, FeedError> {
        let starved = self
            .sources
            .iter()
            .find(|(_, source)| !source.satisfied())
            .map(|(source_id, _)| source_id.clone());

        let Some(source_id) = starved else {
            return Ok(false);
        };

        let Some(source) = self.sources.get_mut(&source_id) else {
            return Ok(false);
        };

        match tokio::time::timeout(RECV_WAIT, source.rx.recv()).await {
            Ok(Some(SourceMessage::Event(event))) => {
                source.buffer.push_back(event);
                self.received_count += 1;
                *self.recv_counters.entry(source_id).or_insert(0) += 1;
                Ok(true)
            }
            Ok(Some(SourceMessage::Done)) => {
                debug!(source = %source_id, "source signalled DONE");
                source.done = true;
                Ok(true)
            }
            Ok(None) => Err(FeedError::SourceDisconnected(source_id)),
            Err(_elapsed) => Ok(false),
        }
    }

    /// Pops the chronologically next event across all buffers. Fillers at buffer heads are
    /// discarded in place. Ties on `dt` resolve to the lexicographically smallest source id via
    /// iteration order and strict comparison.
    fn pop_next(&mut self) -> Option<Event> {
        let mut earliest: Option<(SourceId, chrono::DateTime<chrono::Utc>)> = None;

        for (source_id, source) in self.sources.iter_mut() {
            while matches!(source.buffer.front(), Some(Event::Empty(_))) {
                trace!(source = %source_id, "discarding filler event");
                source.buffer.pop_front();
            }

            let Some(dt) = source.buffer.front().and_then(Event::dt) else {
                continue;
            };

            let replace = match &earliest {
                None => true,
                Some((_, earliest_dt)) => dt < *earliest_dt,
            };
            if replace {
                earliest = Some((source_id.clone(), dt));
            }
        }

        let (source_id, _) = earliest?;
        let event = self
            .sources
            .get_mut(&source_id)
            .and_then(|source| source.buffer.pop_front())?;

        self.sent_count += 1;
        *self.sent_counters.entry(source_id).or_insert(0) += 1;

        Some(event)
    }

    async fn dispatch(&mut self, message: FeedMessage) -> Result<(), ComponentError> {
        self.passthrough_tx
            .send(message.clone())
            .await
            .map_err(|_| ComponentError::ChannelDisconnected("feed passthrough"))?;
        self.transform_tx
            .send(message)
            .await
            .map_err(|_| ComponentError::ChannelDisconnected("feed transform"))
    }
}

#[async_trait]
impl Component for Feed {
    fn id(&self) -> ComponentId {
        ComponentId::new(FEED_ID)
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Conduit
    }

    async fn do_work(&mut self) -> Result<WorkOutcome, ComponentError> {
        self.poll_sources()?;

        if !self.draining && self.all_done() {
            debug!(pending = self.pending_messages(), "all sources DONE, draining");
            self.draining = true;
        }

        let mut emitted = false;
        while self.is_full() || self.draining {
            match self.pop_next() {
                Some(event) => {
                    self.dispatch(FeedMessage::Event(event)).await?;
                    emitted = true;
                }
                None => break,
            }
        }

        if self.draining && self.pending_messages() == 0 {
            self.dispatch(FeedMessage::Done).await?;
            return Ok(WorkOutcome::Done);
        }

        if emitted {
            return Ok(WorkOutcome::Continue);
        }

        // Blocked on a starved source: honour the ordering contract and wait for it.
        match self.await_starved_source().await? {
            true => Ok(WorkOutcome::Continue),
            false => Ok(WorkOutcome::Idle),
        }
    }

    fn kill(&mut self) {
        for source in self.sources.values_mut() {
            source.rx.close();
        }
    }

    fn tally(&self) -> ComponentTally {
        ComponentTally {
            received: self.received_count,
            sent: self.sent_count,
            pending: self.pending_messages(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EmptyEvent, TradeEvent};
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2008, 1, 7, 14, 30, 0).unwrap()
    }

    fn trade(source_id: &str, minute_offset: i64) -> Event {
        Event::Trade(TradeEvent {
            source_id: source_id.into(),
            sid: 133,
            price: 10.0,
            volume: 100,
            dt: start() + Duration::minutes(minute_offset),
        })
    }

    struct Harness {
        feed: Feed,
        passthrough_rx: mpsc::Receiver<FeedMessage>,
        transform_rx: mpsc::Receiver<FeedMessage>,
        source_txs: HashMap<SourceId, mpsc::Sender<SourceMessage>>,
    }

    fn harness(source_ids: &[&str]) -> Harness {
        let mut source_txs = HashMap::new();
        let mut sources = Vec::new();
        for id in source_ids {
            let (tx, rx) = mpsc::channel(64);
            source_txs.insert(SourceId::new(id), tx);
            sources.push((SourceId::new(id), rx));
        }

        let (passthrough_tx, passthrough_rx) = mpsc::channel(64);
        let (transform_tx, transform_rx) = mpsc::channel(64);

        Harness {
            feed: Feed::new(sources, passthrough_tx, transform_tx),
            passthrough_rx,
            transform_rx,
            source_txs,
        }
    }

    impl Harness {
        async fn send(&self, source_id: &str, message: SourceMessage) {
            self.source_txs
                .get(source_id)
                .unwrap()
                .send(message)
                .await
                .unwrap();
        }

        /// Runs the feed until it reports Done, returning every emitted event.
        async fn run_to_done(&mut self) -> Vec<Event> {
            loop {
                match self.feed.do_work().await.unwrap() {
                    WorkOutcome::Done => break,
                    WorkOutcome::Continue | WorkOutcome::Idle => continue,
                }
            }

            let mut emitted = Vec::new();
            while let Ok(message) = self.passthrough_rx.try_recv() {
                match message {
                    FeedMessage::Event(event) => emitted.push(event),
                    FeedMessage::Done => break,
                }
            }
            emitted
        }
    }

    #[tokio::test]
    async fn single_source_events_pass_through_in_order() {
        let mut harness = harness(&["a"]);
        for offset in 0..5 {
            harness.send("a", SourceMessage::Event(trade("a", offset))).await;
        }
        harness.send("a", SourceMessage::Done).await;

        let emitted = harness.run_to_done().await;

        assert_eq!(emitted.len(), 5);
        for window in emitted.windows(2) {
            assert!(window[0].dt() <= window[1].dt());
        }
        assert_eq!(harness.feed.pending_messages(), 0);
    }

    #[tokio::test]
    async fn interleaved_sources_merge_chronologically() {
        let mut harness = harness(&["a", "b"]);
        // Source 'a' emits at 2-minute deltas, 'b' at 1-minute deltas.
        for i in 0..3 {
            harness.send("a", SourceMessage::Event(trade("a", i * 2))).await;
        }
        harness.send("a", SourceMessage::Done).await;
        for i in 0..4 {
            harness.send("b", SourceMessage::Event(trade("b", i))).await;
        }
        harness.send("b", SourceMessage::Done).await;

        let emitted = harness.run_to_done().await;

        assert_eq!(emitted.len(), 7);
        for window in emitted.windows(2) {
            assert!(window[0].dt() <= window[1].dt());
        }
    }

    #[tokio::test]
    async fn timestamp_ties_break_to_lexicographically_smallest_source() {
        let mut harness = harness(&["alpha", "beta"]);
        harness.send("beta", SourceMessage::Event(trade("beta", 0))).await;
        harness.send("beta", SourceMessage::Done).await;
        harness.send("alpha", SourceMessage::Event(trade("alpha", 0))).await;
        harness.send("alpha", SourceMessage::Done).await;

        let emitted = harness.run_to_done().await;

        assert_eq!(emitted[0].source_id(), "alpha");
        assert_eq!(emitted[1].source_id(), "beta");
    }

    #[tokio::test]
    async fn fillers_are_discarded_silently() {
        let mut harness = harness(&["a", "b"]);
        harness
            .send("a", SourceMessage::Event(Event::Empty(EmptyEvent::new("a".into()))))
            .await;
        harness.send("a", SourceMessage::Event(trade("a", 1))).await;
        harness.send("a", SourceMessage::Done).await;
        harness.send("b", SourceMessage::Event(trade("b", 0))).await;
        harness.send("b", SourceMessage::Done).await;

        let emitted = harness.run_to_done().await;

        assert_eq!(emitted.len(), 2);
        assert_eq!(emitted[0].source_id(), "b");
        assert!(emitted.iter().all(|event| event.dt().is_some()));
    }

    #[tokio::test]
    async fn feed_blocks_until_every_source_is_buffered_or_done() {
        let mut harness = harness(&["a", "b"]);
        harness.send("a", SourceMessage::Event(trade("a", 0))).await;

        // 'b' has nothing buffered and is not done: nothing may be emitted.
        let outcome = harness.feed.do_work().await.unwrap();
        assert_eq!(outcome, WorkOutcome::Idle);
        assert!(harness.passthrough_rx.try_recv().is_err());

        harness.send("b", SourceMessage::Event(trade("b", 1))).await;
        harness.feed.do_work().await.unwrap();
        assert!(matches!(
            harness.passthrough_rx.try_recv(),
            Ok(FeedMessage::Event(_))
        ));
    }

    #[tokio::test]
    async fn disconnect_without_done_is_an_error() {
        let mut harness = harness(&["a"]);
        harness.source_txs.clear();

        let actual = harness.feed.do_work().await;

        assert!(matches!(
            actual,
            Err(ComponentError::Feed(FeedError::SourceDisconnected(_)))
        ));
    }

    #[tokio::test]
    async fn both_outputs_receive_every_event() {
        let mut harness = harness(&["a"]);
        harness.send("a", SourceMessage::Event(trade("a", 0))).await;
        harness.send("a", SourceMessage::Done).await;

        let emitted = harness.run_to_done().await;
        assert_eq!(emitted.len(), 1);

        let mut transform_events = 0;
        while let Ok(message) = harness.transform_rx.try_recv() {
            if matches!(message, FeedMessage::Event(_)) {
                transform_events += 1;
            }
        }
        assert_eq!(transform_events, 1);
    }
}

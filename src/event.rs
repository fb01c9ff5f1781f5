use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

/// Communicates an integer is a unique security identifier (eg/ 133).
pub type Sid = u32;

/// Communicates a [`SmolStr`] is a unique identifier for a pipeline data source
/// (eg/ "trades-133").
pub type SourceId = SmolStr;

/// Returns the reserved [`SourceId`] of the order pseudo-source. The
/// [`TradingClient`](crate::client::TradingClient) uses it to keep relayed order flow out of the
/// frames handed to the algorithm.
pub fn order_source_id() -> SourceId {
    SourceId::new("order-source")
}

/// Returns the reserved [`SourceId`] stamped on every [`TransactionEvent`] synthesised by the
/// transaction simulator.
pub fn transaction_sim_id() -> SourceId {
    SourceId::new("transaction-sim")
}

/// Discriminator for the [`Event`] variants carried through the pipeline.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
pub enum EventType {
    Trade,
    Order,
    Transaction,
    Empty,
}

/// The universal message shuttled through the pipeline. Every component communicates in
/// [`Event`]s: sources emit [`TradeEvent`]s & [`OrderEvent`]s, the transaction simulator
/// synthesises [`TransactionEvent`]s, and sources with nothing to send this tick emit a dateless
/// [`EmptyEvent`] so the Feed's fullness predicate is satisfied.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    Trade(TradeEvent),
    Order(OrderEvent),
    Transaction(TransactionEvent),
    Empty(EmptyEvent),
}

impl Event {
    /// Returns the [`SourceId`] of the source that emitted this [`Event`].
    pub fn source_id(&self) -> &SourceId {
        match self {
            Event::Trade(trade) => &trade.source_id,
            Event::Order(order) => &order.source_id,
            Event::Transaction(transaction) => &transaction.source_id,
            Event::Empty(empty) => &empty.source_id,
        }
    }

    /// Returns the UTC timestamp of this [`Event`], or `None` for a dateless [`EmptyEvent`]
    /// filler.
    pub fn dt(&self) -> Option<DateTime<Utc>> {
        match self {
            Event::Trade(trade) => Some(trade.dt),
            Event::Order(order) => Some(order.dt),
            Event::Transaction(transaction) => Some(transaction.dt),
            Event::Empty(_) => None,
        }
    }

    /// Returns the [`EventType`] discriminator of this [`Event`].
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Trade(_) => EventType::Trade,
            Event::Order(_) => EventType::Order,
            Event::Transaction(_) => EventType::Transaction,
            Event::Empty(_) => EventType::Empty,
        }
    }

    /// Returns the [`Sid`] this [`Event`] concerns, or `None` for an [`EmptyEvent`].
    pub fn sid(&self) -> Option<Sid> {
        match self {
            Event::Trade(trade) => Some(trade.sid),
            Event::Order(order) => Some(order.sid),
            Event::Transaction(transaction) => Some(transaction.sid),
            Event::Empty(_) => None,
        }
    }
}

/// An observed market print: price x volume of a [`Sid`] at a timestamp.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct TradeEvent {
    pub source_id: SourceId,
    pub sid: Sid,
    pub price: f64,
    /// Whole number of shares printed. Zero-volume trades occur for thinly traded securities and
    /// pass through the simulator without generating a transaction.
    pub volume: u64,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub dt: DateTime<Utc>,
}

/// An instruction issued by the algorithm to buy (+ve amount) or sell (-ve amount) shares of a
/// [`Sid`]. `filled` is mutated in place by the transaction simulator as fills accumulate.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct OrderEvent {
    pub source_id: SourceId,
    pub sid: Sid,
    pub amount: i64,
    #[serde(default)]
    pub filled: i64,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub dt: DateTime<Utc>,
}

impl OrderEvent {
    /// Constructs a new unfilled [`OrderEvent`] stamped with the order source identity.
    pub fn new(sid: Sid, amount: i64, dt: DateTime<Utc>) -> Self {
        Self {
            source_id: order_source_id(),
            sid,
            amount,
            filled: 0,
            dt,
        }
    }

    /// Returns the quantity of this order that remains unfilled.
    pub fn open_amount(&self) -> i64 {
        self.amount - self.filled
    }
}

/// A simulated fill: the portion of open orders executed against a single trade, with
/// impact-adjusted price and per-share commission.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct TransactionEvent {
    pub source_id: SourceId,
    pub sid: Sid,
    /// Signed fill quantity, carrying the sign of the open interest it satisfied.
    pub amount: i64,
    pub price: f64,
    pub commission: f64,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub dt: DateTime<Utc>,
}

/// Dateless heartbeat placeholder emitted by a source that has nothing to send this tick. The
/// Feed discards these silently rather than comparing their (unset) timestamps.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct EmptyEvent {
    pub source_id: SourceId,
}

impl EmptyEvent {
    pub fn new(source_id: SourceId) -> Self {
        Self { source_id }
    }
}

/// A downstream [`Event`] paired with the [`TransactionEvent`] (if any) the transaction simulator
/// produced for it. This is the record delivered to the Trading Client, preserving Feed order.
#[derive(Clone, PartialEq, Debug, Deserialize, Serialize)]
pub struct MergedEvent {
    pub event: Event,
    pub transaction: Option<TransactionEvent>,
}

impl MergedEvent {
    /// Constructs a [`MergedEvent`] from a passthrough [`Event`] with no associated transaction.
    pub fn passthrough(event: Event) -> Self {
        Self {
            event,
            transaction: None,
        }
    }

    /// Returns the timestamp of the underlying [`Event`].
    pub fn dt(&self) -> Option<DateTime<Utc>> {
        self.event.dt()
    }
}

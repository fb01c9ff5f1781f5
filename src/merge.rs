use crate::component::{
    Component, ComponentError, ComponentId, ComponentTally, ComponentType, WorkOutcome, RECV_WAIT,
};
use crate::event::{Event, MergedEvent};
use crate::execution::{TransformMessage, TransformOutput};
use crate::feed::FeedMessage;
use async_trait::async_trait;
use std::collections::VecDeque;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

/// Canonical [`ComponentId`] of the Merge.
pub const MERGE_ID: &str = "merge";

/// Messages delivered by the [`Merge`] to the Trading Client.
#[derive(Clone, PartialEq, Debug)]
pub enum MergedMessage {
    Event(MergedEvent),
    Done,
}

/// Merge module specific errors.
#[derive(Error, Debug)]
pub enum MergeError {
    /// The simulator emits exactly one output per feed event, so the two upstream streams must
    /// finish with equal lengths. Left-over messages on either side mean a desynchronised
    /// pipeline.
    #[error("upstreams desynchronised at drain: {events} events vs {outputs} transform outputs")]
    UpstreamDesync { events: usize, outputs: usize },
}

/// Pairs the Feed's passthrough stream with the transaction simulator's output stream 1:1,
/// delivering each event together with the transaction (if any) synthesised for it. Because both
/// upstreams preserve Feed order, pairing by arrival order keeps the output stream in `dt`
/// order.
#[derive(Debug)]
pub struct Merge {
    passthrough_rx: mpsc::Receiver<FeedMessage>,
    transform_rx: mpsc::Receiver<TransformMessage>,
    result_tx: mpsc::Sender<MergedMessage>,
    events: VecDeque<Event>,
    outputs: VecDeque<TransformOutput>,
    passthrough_done: bool,
    transform_done: bool,
    received_count: u64,
    sent_count: u64,
}

impl Merge {
    /// Constructs a new [`Merge`] pairing the provided upstream channels into the result
    /// channel.
    pub fn new(
        passthrough_rx: mpsc::Receiver<FeedMessage>,
        transform_rx: mpsc::Receiver<TransformMessage>,
        result_tx: mpsc::Sender<MergedMessage>,
    ) -> Self {
        Self {
            passthrough_rx,
            transform_rx,
            result_tx,
            events: VecDeque::new(),
            outputs: VecDeque::new(),
            passthrough_done: false,
            transform_done: false,
            received_count: 0,
            sent_count: 0,
        }
    }

    /// Number of unpaired messages still buffered on either side.
    pub fn pending_messages(&self) -> usize {
        self.events.len() + self.outputs.len()
    }

    fn poll_upstreams(&mut self) -> Result<(), ComponentError> {
        loop {
            match self.passthrough_rx.try_recv() {
                Ok(FeedMessage::Event(event)) => {
                    self.received_count += 1;
                    self.events.push_back(event);
                }
                Ok(FeedMessage::Done) => self.passthrough_done = true,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if !self.passthrough_done {
                        return Err(ComponentError::ChannelDisconnected("merge passthrough"));
                    }
                    break;
                }
            }
        }

        loop {
            match self.transform_rx.try_recv() {
                Ok(TransformMessage::Output(output)) => {
                    self.received_count += 1;
                    self.outputs.push_back(output);
                }
                Ok(TransformMessage::Done) => self.transform_done = true,
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if !self.transform_done {
                        return Err(ComponentError::ChannelDisconnected("merge transform"));
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    async fn emit_pairs(&mut self) -> Result<bool, ComponentError> {
        let mut emitted = false;

        while !self.events.is_empty() && !self.outputs.is_empty() {
            let (Some(event), Some(output)) = (self.events.pop_front(), self.outputs.pop_front())
            else {
                break;
            };

            trace!(event = ?event.event_type(), txn = output.transaction.is_some(), "paired");

            self.result_tx
                .send(MergedMessage::Event(MergedEvent {
                    event,
                    transaction: output.transaction,
                }))
                .await
                .map_err(|_| ComponentError::ChannelDisconnected("merge result"))?;
            self.sent_count += 1;
            emitted = true;
        }

        Ok(emitted)
    }

    /// Waits briefly on whichever upstream is holding up the next pair.
    async fn await_upstream(&mut self) -> Result<bool, ComponentError> {
        if self.events.is_empty() && !self.passthrough_done {
            match tokio::time::timeout(RECV_WAIT, self.passthrough_rx.recv()).await {
                Ok(Some(FeedMessage::Event(event))) => {
                    self.received_count += 1;
                    self.events.push_back(event);
                    Ok(true)
                }
                Ok(Some(FeedMessage::Done)) => {
                    self.passthrough_done = true;
                    Ok(true)
                }
                Ok(None) => Err(ComponentError::ChannelDisconnected("merge passthrough")),
                Err(_elapsed) => Ok(false),
            }
        } else if self.outputs.is_empty() && !self.transform_done {
            match tokio::time::timeout(RECV_WAIT, self.transform_rx.recv()).await {
                Ok(Some(TransformMessage::Output(output))) => {
                    self.received_count += 1;
                    self.outputs.push_back(output);
                    Ok(true)
                }
                Ok(Some(TransformMessage::Done)) => {
                    self.transform_done = true;
                    Ok(true)
                }
                Ok(None) => Err(ComponentError::ChannelDisconnected("merge transform")),
                Err(_elapsed) => Ok(false),
            }
        } else {
            Ok(false)
        }
    }
}

#[async_trait]
impl Component for Merge {
    fn id(&self) -> ComponentId {
        ComponentId::new(MERGE_ID)
    }

    fn component_type(&self) -> ComponentType {
        ComponentType::Conduit
    }

    async fn do_work(&mut self) -> Result<WorkOutcome, ComponentError> {
        self.poll_upstreams()?;

        let emitted = self.emit_pairs().await?;

        if self.passthrough_done && self.transform_done {
            if self.events.is_empty() && self.outputs.is_empty() {
                self.result_tx
                    .send(MergedMessage::Done)
                    .await
                    .map_err(|_| ComponentError::ChannelDisconnected("merge result"))?;
                return Ok(WorkOutcome::Done);
            }
            return Err(MergeError::UpstreamDesync {
                events: self.events.len(),
                outputs: self.outputs.len(),
            }
            .into());
        }

        if emitted {
            return Ok(WorkOutcome::Continue);
        }

        match self.await_upstream().await? {
            true => Ok(WorkOutcome::Continue),
            false => Ok(WorkOutcome::Idle),
        }
    }

    fn kill(&mut self) {
        self.passthrough_rx.close();
        self.transform_rx.close();
    }

    fn tally(&self) -> ComponentTally {
        ComponentTally {
            received: self.received_count,
            sent: self.sent_count,
            pending: self.pending_messages(),
        }
    }
}

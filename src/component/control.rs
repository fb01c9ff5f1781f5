use crate::component::{ComponentError, ComponentId, ComponentTally};
use chrono::{DateTime, Utc};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::warn;

/// System states broadcast by the Controller. Transitions run
/// `Running -> Shutdown -> Terminate`: `Shutdown` stops dispatch of new work but drains
/// in-flight messages, `Terminate` is immediate.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Display, Deserialize, Serialize)]
pub enum ControlState {
    Running,
    Shutdown,
    Terminate,
}

/// Commands broadcast by the Controller to every component.
#[derive(Copy, Clone, Debug)]
pub enum ControlCommand {
    /// Liveness probe. Components reply with [`ComponentReply::Ok`] echoing `ctime`.
    Heartbeat { ctime: DateTime<Utc> },
    /// System state transition.
    State(ControlState),
}

/// Replies sent by components on the control channel.
#[derive(Clone, Debug)]
pub enum ComponentReply {
    /// Heartbeat acknowledgement: `(identity, OK, ctime)`.
    Ok {
        id: ComponentId,
        ctime: DateTime<Utc>,
    },
    /// Clean exit, carrying final message counters. Removes the component from tracking.
    Done {
        id: ComponentId,
        tally: ComponentTally,
    },
    /// Failure tagged with the failing component's identity. Triggers system-wide termination.
    Exception { id: ComponentId, error: String },
}

/// A component's endpoint on the control plane: a broadcast receiver for Controller commands and
/// a sender for its replies.
#[derive(Debug)]
pub struct ControlHandle {
    control_rx: broadcast::Receiver<ControlCommand>,
    reply_tx: mpsc::UnboundedSender<ComponentReply>,
    state: ControlState,
}

impl ControlHandle {
    pub fn new(
        control_rx: broadcast::Receiver<ControlCommand>,
        reply_tx: mpsc::UnboundedSender<ComponentReply>,
    ) -> Self {
        Self {
            control_rx,
            reply_tx,
            state: ControlState::Running,
        }
    }

    /// Drains pending control commands, acknowledging heartbeats with `(identity, OK, ctime)`.
    /// Returns the current system state for the run loop to act on.
    pub fn confirm(&mut self, id: &ComponentId) -> ControlState {
        loop {
            match self.control_rx.try_recv() {
                Ok(ControlCommand::Heartbeat { ctime }) => {
                    let _ = self.reply_tx.send(ComponentReply::Ok {
                        id: id.clone(),
                        ctime,
                    });
                }
                Ok(ControlCommand::State(state)) => {
                    // Terminate is terminal, never downgraded by a late broadcast.
                    if state > self.state {
                        self.state = state;
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(
                        component = %id,
                        skipped,
                        "control channel lagged, heartbeats were dropped"
                    );
                }
                Err(broadcast::error::TryRecvError::Empty) => break,
                Err(broadcast::error::TryRecvError::Closed) => {
                    // Controller is gone. Treat as a terminate so the component can exit.
                    self.state = ControlState::Terminate;
                    break;
                }
            }
        }

        self.state
    }

    /// Notifies the Controller of a clean exit.
    pub fn signal_done(&self, id: &ComponentId, tally: ComponentTally) {
        let _ = self.reply_tx.send(ComponentReply::Done {
            id: id.clone(),
            tally,
        });
    }

    /// Notifies the Controller of a failure, tagged with this component's identity.
    pub fn signal_exception(&self, id: &ComponentId, error: &ComponentError) {
        let _ = self.reply_tx.send(ComponentReply::Exception {
            id: id.clone(),
            error: error.to_string(),
        });
    }
}

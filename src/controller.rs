use crate::component::control::{ComponentReply, ControlCommand, ControlHandle, ControlState};
use crate::component::{ComponentId, ComponentTally};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

/// Capacity of the control broadcast channel. Far beyond the command rate of a single run.
const CONTROL_CHANNEL_CAPACITY: usize = 64;

/// Errors generated by the [`Controller`] protocol.
#[derive(Error, Debug)]
pub enum ControlError {
    #[error("unknown component \"{0}\" talking on the control channel")]
    UnknownComponent(ComponentId),

    #[error("component \"{0}\" missed {1} consecutive heartbeats")]
    HeartbeatTimeout(ComponentId, u32),

    #[error("control reply channel closed before all components were done")]
    ReplyChannelClosed,
}

/// Configuration for constructing a [`Controller`] via the new() constructor method.
#[derive(Copy, Clone, PartialEq, Debug)]
pub struct Config {
    /// Interval between heartbeat broadcasts.
    pub heartbeat_period: Duration,
    /// Window a component has to acknowledge a heartbeat.
    pub heartbeat_timeout: Duration,
    /// Consecutive missed heartbeats before a component is declared failed.
    pub missed_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_period: Duration::from_secs(1),
            heartbeat_timeout: Duration::from_secs(2),
            missed_limit: 2,
        }
    }
}

/// The set of components the [`Controller`] expects to show up. A `Freeform` topology heartbeats
/// with anything that announces itself; under a `Declared` topology an unknown identity is a
/// fatal protocol error.
#[derive(Clone, Debug)]
pub enum Topology {
    Declared(HashSet<ComponentId>),
    Freeform,
}

impl Topology {
    /// Constructs a [`Topology::Declared`] from the provided component identities.
    pub fn declared<Ids>(ids: Ids) -> Self
    where
        Ids: IntoIterator,
        Ids::Item: Into<ComponentId>,
    {
        Self::Declared(ids.into_iter().map(Into::into).collect())
    }

    fn admits(&self, id: &ComponentId) -> bool {
        match self {
            Topology::Declared(ids) => ids.contains(id),
            Topology::Freeform => true,
        }
    }
}

/// Records a component failure surfaced to the [`Controller`].
#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct Failure {
    pub id: ComponentId,
    pub error: String,
}

/// Terminal outcome of a [`Controller`] run.
#[derive(Copy, Clone, Eq, PartialEq, Debug, Serialize)]
pub enum ControllerOutcome {
    /// Every component reported DONE.
    Finished,
    /// A component failed or violated the control protocol; TERMINATE was broadcast.
    Failed,
}

/// Final report produced when a [`Controller`] run resolves.
#[derive(Clone, Debug, Serialize)]
pub struct ControllerReport {
    pub outcome: ControllerOutcome,
    /// Final message counters per component, harvested from DONE replies.
    pub tallies: HashMap<ComponentId, ComponentTally>,
    pub failures: Vec<Failure>,
}

impl ControllerReport {
    /// Returns the final [`ComponentTally`] reported by the identified component, if it exited
    /// cleanly.
    pub fn tally(&self, id: &str) -> Option<&ComponentTally> {
        self.tallies.get(id)
    }
}

/// Supervises the pipeline components: discovery via heartbeat roll call, liveness tracking, and
/// shutdown. Each heartbeat period the Controller broadcasts the current timestamp; components
/// reply `(identity, OK, ctime)`. Tracked components that fall silent for
/// [`Config::missed_limit`] consecutive beats are declared failed and the system is terminated.
#[derive(Debug)]
pub struct Controller {
    config: Config,
    topology: Topology,
    command_tx: broadcast::Sender<ControlCommand>,
    reply_tx: mpsc::UnboundedSender<ComponentReply>,
    reply_rx: mpsc::UnboundedReceiver<ComponentReply>,
    /// Components we are currently heartbeating with.
    tracked: HashSet<ComponentId>,
    /// Components that acknowledged the in-flight heartbeat.
    responses: HashSet<ComponentId>,
    /// Consecutive missed-beat counters.
    missed: HashMap<ComponentId, u32>,
    /// When each tracked component last spoke on the control channel.
    last_seen: HashMap<ComponentId, std::time::Instant>,
    /// Every identity that has ever spoken on the control channel.
    seen: HashSet<ComponentId>,
    /// Identities that reported DONE.
    done: HashSet<ComponentId>,
    tallies: HashMap<ComponentId, ComponentTally>,
    failures: Vec<Failure>,
    state: ControlState,
}

impl Controller {
    /// Constructs a new [`Controller`] instance supervising the provided [`Topology`].
    pub fn new(topology: Topology, config: Config) -> Self {
        let (command_tx, _) = broadcast::channel(CONTROL_CHANNEL_CAPACITY);
        let (reply_tx, reply_rx) = mpsc::unbounded_channel();

        Self {
            config,
            topology,
            command_tx,
            reply_tx,
            reply_rx,
            tracked: HashSet::new(),
            responses: HashSet::new(),
            missed: HashMap::new(),
            last_seen: HashMap::new(),
            seen: HashSet::new(),
            done: HashSet::new(),
            tallies: HashMap::new(),
            failures: Vec::new(),
            state: ControlState::Running,
        }
    }

    /// Returns a [`ControlHandle`] for a component joining this Controller's control plane.
    pub fn handle(&self) -> ControlHandle {
        ControlHandle::new(self.command_tx.subscribe(), self.reply_tx.clone())
    }

    /// Returns a sender that can inject [`ControlCommand`]s remotely (eg/ an operator requesting
    /// a graceful [`ControlState::Shutdown`]).
    pub fn command_sender(&self) -> broadcast::Sender<ControlCommand> {
        self.command_tx.clone()
    }

    /// Runs the heartbeat protocol until every expected component has reported DONE, or a
    /// failure terminates the system.
    pub async fn run(mut self) -> ControllerReport {
        let mut beat = tokio::time::interval(self.config.heartbeat_period);
        beat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        // Controller drops its own reply sender so reply_rx closes once all components exit.
        let (local_reply_tx, _) = mpsc::unbounded_channel();
        drop(std::mem::replace(&mut self.reply_tx, local_reply_tx));

        let mut outstanding: Option<DateTime<Utc>> = None;

        let outcome = loop {
            tokio::select! {
                _ = beat.tick() => {
                    if outstanding.take().is_some() {
                        if let Some(failure) = self.evaluate_beat() {
                            self.fail(failure);
                            break ControllerOutcome::Failed;
                        }
                    }

                    let ctime = Utc::now();
                    self.responses.clear();
                    // No receivers is fine before the first component opens.
                    let _ = self.command_tx.send(ControlCommand::Heartbeat { ctime });
                    outstanding = Some(ctime);
                }
                reply = self.reply_rx.recv() => {
                    match reply {
                        Some(reply) => {
                            if let Err(error) = self.handle_reply(reply, outstanding) {
                                self.fail(error);
                                break ControllerOutcome::Failed;
                            }
                        }
                        None => {
                            if self.is_complete() {
                                break ControllerOutcome::Finished;
                            }
                            self.fail(ControlError::ReplyChannelClosed);
                            break ControllerOutcome::Failed;
                        }
                    }

                    if self.is_complete() {
                        break ControllerOutcome::Finished;
                    }

                    if self.state == ControlState::Terminate {
                        break ControllerOutcome::Failed;
                    }
                }
            }
        };

        info!(?outcome, tracked = self.tracked.len(), "controller resolved");

        ControllerReport {
            outcome,
            tallies: self.tallies,
            failures: self.failures,
        }
    }

    /// Evaluates the completed heartbeat cycle: `good = tracked & responses`,
    /// `bad = tracked - good`, `new = responses - good`. Returns the first fatal failure, if any.
    fn evaluate_beat(&mut self) -> Option<ControlError> {
        let good: HashSet<ComponentId> = self.tracked.intersection(&self.responses).cloned().collect();
        let bad: Vec<ComponentId> = self.tracked.difference(&good).cloned().collect();
        let new: Vec<ComponentId> = self.responses.difference(&good).cloned().collect();

        for id in new {
            if !self.topology.admits(&id) {
                // A socket collision or a stray process: a very bad failure mode.
                return Some(ControlError::UnknownComponent(id));
            }
            info!(component = %id, "tracking new component");
            self.tracked.insert(id);
        }

        for id in good {
            self.missed.remove(&id);
            self.last_seen.insert(id, std::time::Instant::now());
        }

        for id in bad {
            let missed = self.missed.entry(id.clone()).or_insert(0);
            *missed += 1;
            debug!(component = %id, missed = *missed, "component missed a heartbeat");

            let silent_too_long = self
                .last_seen
                .get(&id)
                .is_none_or(|seen| seen.elapsed() >= self.config.heartbeat_timeout);

            if *missed >= self.config.missed_limit && silent_too_long {
                self.tracked.remove(&id);
                return Some(ControlError::HeartbeatTimeout(id, *missed));
            }
        }

        None
    }

    fn handle_reply(
        &mut self,
        reply: ComponentReply,
        outstanding: Option<DateTime<Utc>>,
    ) -> Result<(), ControlError> {
        match reply {
            ComponentReply::Ok { id, ctime } => {
                if !self.topology.admits(&id) {
                    return Err(ControlError::UnknownComponent(id));
                }

                match outstanding {
                    Some(expected) if ctime == expected => {
                        self.seen.insert(id.clone());
                        self.responses.insert(id);
                    }
                    _ => {
                        // An echo of an old ctime: log and ignore rather than mis-attribute.
                        debug!(component = %id, %ctime, "stale heartbeat acknowledgement");
                    }
                }
            }
            ComponentReply::Done { id, tally } => {
                if !self.topology.admits(&id) {
                    return Err(ControlError::UnknownComponent(id));
                }

                info!(component = %id, ?tally, "component done");
                self.seen.insert(id.clone());
                self.tracked.remove(&id);
                self.missed.remove(&id);
                self.tallies.insert(id.clone(), tally);
                self.done.insert(id);
            }
            ComponentReply::Exception { id, error } => {
                warn!(component = %id, %error, "component exception, terminating system");
                self.seen.insert(id.clone());
                self.tracked.remove(&id);
                self.failures.push(Failure { id, error });
                self.terminate();
            }
        }

        Ok(())
    }

    fn is_complete(&self) -> bool {
        if self.state == ControlState::Terminate {
            return false;
        }

        match &self.topology {
            Topology::Declared(ids) => ids.iter().all(|id| self.done.contains(id)),
            Topology::Freeform => !self.seen.is_empty() && self.seen == self.done,
        }
    }

    fn fail(&mut self, error: ControlError) {
        match &error {
            ControlError::HeartbeatTimeout(id, _) | ControlError::UnknownComponent(id) => {
                self.failures.push(Failure {
                    id: id.clone(),
                    error: error.to_string(),
                });
            }
            ControlError::ReplyChannelClosed => {
                self.failures.push(Failure {
                    id: ComponentId::new("controller"),
                    error: error.to_string(),
                });
            }
        }

        self.terminate();
    }

    fn terminate(&mut self) {
        if self.state != ControlState::Terminate {
            self.state = ControlState::Terminate;
            let _ = self
                .command_tx
                .send(ControlCommand::State(ControlState::Terminate));
        }
    }

    #[cfg(test)]
    pub(crate) fn reply_sender(&self) -> mpsc::UnboundedSender<ComponentReply> {
        self.reply_tx.clone()
    }
}

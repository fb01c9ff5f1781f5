use crate::client::error::ClientError;
use crate::component::control::{ControlHandle, ControlState};
use crate::execution::error::ExecutionError;
use crate::feed::FeedError;
use crate::merge::MergeError;
use crate::performance::error::PerformanceError;
use crate::sources::error::SourceError;
use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Control channel messages exchanged between the [`Controller`](crate::controller::Controller)
/// and its components.
pub mod control;

/// Communicates a [`SmolStr`] is a unique identifier for a pipeline component (eg/ "feed").
pub type ComponentId = SmolStr;

/// How long a component waits on an input channel before yielding back to its run loop. Bounds
/// every suspension point so heartbeats are answered promptly.
pub const RECV_WAIT: Duration = Duration::from_millis(100);

/// How long a component sleeps after reporting [`WorkOutcome::Idle`].
const IDLE_WAIT: Duration = Duration::from_millis(5);

/// Role a component plays in the pipeline topology.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Display, Deserialize, Serialize)]
pub enum ComponentType {
    /// Emits events into the pipeline (trade sources, order source).
    Source,
    /// Consumes and re-emits (feed, transaction simulator, merge).
    Conduit,
    /// Terminal consumer (trading client).
    Sink,
}

/// Outcome of a single [`Component::do_work`] iteration.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum WorkOutcome {
    /// Work was done, call again immediately.
    Continue,
    /// Nothing to do right now, back off briefly before the next iteration.
    Idle,
    /// The component has finished cleanly and will do no further work.
    Done,
}

/// Message & buffer counters reported by a component when it exits. Replaces direct field
/// inspection, which message-passing ownership forbids.
#[derive(Copy, Clone, PartialEq, Debug, Default, Deserialize, Serialize)]
pub struct ComponentTally {
    pub received: u64,
    pub sent: u64,
    /// Messages still buffered at exit. Zero after a clean drain.
    pub pending: usize,
}

/// All errors a component can surface from its work loop. Each is tagged with the component id
/// and relayed to the Controller as an EXCEPTION, triggering system-wide termination.
#[derive(Error, Debug)]
pub enum ComponentError {
    #[error("{0} channel closed unexpectedly")]
    ChannelDisconnected(&'static str),

    #[error(transparent)]
    Feed(#[from] FeedError),

    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Performance(#[from] PerformanceError),
}

/// Uniform lifecycle contract implemented by every pipeline component. A component is driven by
/// [`run`] in its own task: each iteration confirms liveness on the control channel, then calls
/// [`Component::do_work`] until it signals completion.
#[async_trait]
pub trait Component: Send {
    /// Unique identity of this component on the control channel.
    fn id(&self) -> ComponentId;

    /// Role this component plays in the pipeline.
    fn component_type(&self) -> ComponentType;

    /// Acquire resources before the work loop starts.
    async fn open(&mut self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Perform one unit of work.
    async fn do_work(&mut self) -> Result<WorkOutcome, ComponentError>;

    /// Stop dispatching new work, drain anything in flight, then report done. Invoked once when
    /// the Controller broadcasts [`ControlState::Shutdown`].
    fn shutdown(&mut self) {}

    /// Immediate teardown as a mode of failure. No further work, no drain.
    fn kill(&mut self) {}

    /// Final message counters, reported with the DONE control reply.
    fn tally(&self) -> ComponentTally {
        ComponentTally::default()
    }
}

/// Runs a [`Component`] to completion: `confirm(); do_work()` until [`WorkOutcome::Done`], a
/// terminate broadcast, or an error. Ownership of the component is returned to the caller so
/// tests can inspect final state.
pub async fn run<C>(mut component: C, mut handle: ControlHandle) -> C
where
    C: Component,
{
    let id = component.id();

    info!(
        component = %id,
        kind = %component.component_type(),
        "component starting"
    );

    if let Err(error) = component.open().await {
        warn!(component = %id, %error, "component failed to open");
        handle.signal_exception(&id, &error);
        component.kill();
        return component;
    }

    let mut shutting_down = false;
    loop {
        match handle.confirm(&id) {
            ControlState::Running => {}
            ControlState::Shutdown => {
                if !shutting_down {
                    debug!(component = %id, "draining in-flight work before exit");
                    component.shutdown();
                    shutting_down = true;
                }
            }
            ControlState::Terminate => {
                warn!(component = %id, "terminate received, killing component");
                component.kill();
                break;
            }
        }

        match component.do_work().await {
            Ok(WorkOutcome::Continue) => continue,
            Ok(WorkOutcome::Idle) => tokio::time::sleep(IDLE_WAIT).await,
            Ok(WorkOutcome::Done) => {
                info!(component = %id, "component finished cleanly");
                handle.signal_done(&id, component.tally());
                break;
            }
            Err(error) => {
                warn!(component = %id, %error, "component raised an exception");
                handle.signal_exception(&id, &error);
                component.kill();
                break;
            }
        }
    }

    component
}

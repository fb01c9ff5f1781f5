use crate::event::EventType;
use thiserror::Error;

/// All errors generated in the execution module.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The merged feed must only ever deliver Trade & Order events to the simulator; anything
    /// else indicates a mis-wired pipeline.
    #[error("transaction simulator received an unexpected {0} event")]
    UnexpectedEventType(EventType),
}

use crate::environment::EnvironmentError;
use crate::event::Sid;
use thiserror::Error;

/// All errors generated in the performance module. Both variants indicate conditions the
/// pipeline must not continue through.
#[derive(Error, Debug)]
pub enum PerformanceError {
    #[error("applying a transaction for sid {transaction} to a position for sid {position}")]
    SidMismatch { position: Sid, transaction: Sid },

    #[error(transparent)]
    Environment(#[from] EnvironmentError),
}

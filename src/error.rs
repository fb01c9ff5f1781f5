use crate::environment::EnvironmentError;
use crate::sources::error::SourceError;
use thiserror::Error;

/// Top-level errors surfaced when assembling or resolving a simulation.
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("Failed to build struct due to incomplete attributes provided")]
    BuilderIncomplete,

    #[error(transparent)]
    Environment(#[from] EnvironmentError),

    #[error(transparent)]
    Source(#[from] SourceError),
}

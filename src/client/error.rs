use thiserror::Error;

/// All errors generated in the client module.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A panic raised inside the user algorithm's callback, captured so it can be tagged with
    /// the client's identity and surfaced to the Controller.
    #[error("algorithm callback raised: {0}")]
    Algorithm(String),
}

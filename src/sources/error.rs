use crate::event::SourceId;
use thiserror::Error;

/// All errors generated in the sources module.
#[derive(Error, Debug)]
pub enum SourceError {
    /// Each source owns the ordering of its own stream; the Feed only guarantees ordering
    /// across sources that individually honour it.
    #[error("trade history for source \"{0}\" is not in chronological order")]
    UnorderedHistory(SourceId),
}

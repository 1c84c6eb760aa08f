//! Error types surfaced at join setup.
//!
//! Internal invariant violations (prefix-sum mismatches, a bucket chain
//! losing a tuple) are not represented here: per the propagation policy,
//! they panic with a diagnostic rather than unwind into a `Result`, since
//! by the time they would be detected the parallel state is no longer
//! rewindable.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JoinError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("resource exhaustion: {0}")]
    Resource(String),
}

impl JoinError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::Resource(msg.into())
    }
}

pub type JoinResult<T> = Result<T, JoinError>;

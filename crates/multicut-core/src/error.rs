// crates/multicut-core/src/error.rs
//
// Every fallible entry point in the core returns `CoreError`. The six kinds
// mirror the reader's user-visible failure modes; nothing here is specific
// to a decoder or encoder implementation.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("bad config: {0}")]
    BadConfig(String),

    #[error("reader not started")]
    NotStarted,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("illegal mutation: {0}")]
    IllegalMutation(String),

    #[error("source error: {0}")]
    SourceError(String),

    #[error("cancelled: {0}")]
    Cancelled(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

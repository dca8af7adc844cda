//! Error taxonomy shared by every layer of the engine (spec §7).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OasisError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid image: {0}")]
    InvalidImage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("out of space")]
    OutOfSpace,

    #[error("inconsistent state: {0}")]
    InconsistentState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ambiguous pattern: matched {0} entries")]
    Ambiguous(usize),

    #[error("name collision")]
    Collision,

    #[error("read-only")]
    ReadOnly,

    #[error("checksum mismatch")]
    ChecksumMismatch,

    #[error("timeout")]
    Timeout,

    #[error("wrong ack toggle")]
    WrongToggle,

    #[error("invalid ack sequence")]
    InvalidAck,
}

pub type Result<T> = std::result::Result<T, OasisError>;

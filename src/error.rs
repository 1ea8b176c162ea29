use std::num::ParseIntError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not supported: {0}")]
    NotSupported(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    #[error("non compliant input: {0}")]
    NonCompliant(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("stage requires a new instance for this connection")]
    RequiresNewInstance,

    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),
}

pub type Result<T> = std::result::Result<T, StageError>;

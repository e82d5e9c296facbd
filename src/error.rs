//! Error taxonomy shared across the event loop core and the HTTP server
//! built on top of it.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("no data available")]
    NoData,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("shutting down")]
    Shutdown,

    #[error("config: {0}")]
    Config(#[from] crate::config::parser::ConfigError),
}

pub type Result<T> = std::result::Result<T, Error>;

//! Error taxonomy shared by every filter.
//!
//! Workers never retry: a filter that hits one of these closes its output
//! side and the coordinator that joins it reports the first error it saw.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Malformed header, wrong row arity, or incompatible schemas.
    #[error("schema error: {0}")]
    Schema(String),

    /// An input declared sorted was observed out of order.
    #[error("ordering error: {0}")]
    Order(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A resource problem that is not a plain I/O failure (unwritable temp
    /// directory, reducer subprocess failure, ...).
    #[error("resource error: {0}")]
    Resource(String),

    /// A downstream filter returned without consuming its input to
    /// end-of-stream.
    #[error("consumption error: {0}")]
    Consumption(String),

    /// Invalid or missing options: no key, unsupported join type, missing
    /// reducer, fewer than two merge inputs.
    #[error("configuration error: {0}")]
    Config(String),

    /// The consumer side of a pipe has gone away.
    #[error("downstream closed")]
    Downstream,
}

impl Error {
    /// Whether this error is a broken-pipe condition, which is silent when
    /// it happens while draining expected tail output.
    pub fn is_downstream_closed(&self) -> bool {
        match self {
            Error::Downstream => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::BrokenPipe,
            _ => false,
        }
    }
}

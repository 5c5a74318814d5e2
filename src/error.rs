use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// CinderDB errors.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Error {
    /// An IO error from the filesystem or a syscall.
    Io(String),
    /// A short read or malformed framing past a valid prefix. `offset` is the
    /// byte position of the record that could not be decoded.
    Corruption { offset: u64, reason: String },
    /// Invalid data outside the framing layer: unparseable file names,
    /// out-of-range lengths, bad configuration values.
    InvalidData(String),
    /// The engine has been closed; the request was not accepted.
    Closed,
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Io(msg) => write!(f, "io error: {msg}"),
            Error::Corruption { offset, reason } => {
                write!(f, "corruption at offset {offset}: {reason}")
            }
            Error::InvalidData(msg) => write!(f, "invalid data: {msg}"),
            Error::Closed => write!(f, "engine is closed"),
        }
    }
}

/// A CinderDB Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Error::Io(err.to_string())
    }
}

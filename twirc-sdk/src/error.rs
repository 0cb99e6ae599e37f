//! Error types for the client core.

use thiserror::Error;

/// Failures surfaced by [`Connection`](crate::Connection) operations.
///
/// Formatting errors (`MessageTooLong`, `InvalidCharacters`) are raised
/// before anything is written to the socket.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No live writer: never connected, or a disconnect took the socket.
    #[error("not connected")]
    NotConnected,

    #[error("messages limited to 512 bytes including CR/LF (got {0})")]
    MessageTooLong(usize),

    #[error("carriage returns not allowed in message text")]
    InvalidCharacters,

    #[error("invalid CAP subcommand {0:?}")]
    InvalidCapSubcommand(String),

    /// An operator pass-through was called with the wrong arguments.
    #[error("{verb}: {message}")]
    BadArguments { verb: String, message: String },

    #[error("couldn't connect to {addr}: {source}")]
    ConnectFailed {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A line the codec could not make sense of.
///
/// The read loop logs these and moves on to the next line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,

    #[error("no command in line {0:?}")]
    MissingCommand(String),
}

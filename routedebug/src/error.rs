//! Error handling for routedebug.

use std::fmt;

/// The main error type for routedebug operations.
#[derive(Debug)]
pub enum Error {
    /// User-facing error carrying a pre-formatted message (usage text included when relevant).
    ///
    /// Hosts print the message verbatim and end the invocation with a non-zero outcome.
    Display(String),
    /// IO error wrapper, raised when writing to the output sink fails.
    Io(std::io::Error),
    /// The batch-request file could not be read or understood.
    Config(String),
    /// A route could not be registered on the in-process server.
    Server(String),
}

impl Error {
    pub fn display<S: Into<String>>(msg: S) -> Self {
        Error::Display(msg.into())
    }

    /// Whether this error is meant for the user rather than being a fault.
    #[must_use]
    pub fn is_display(&self) -> bool {
        matches!(self, Error::Display(_))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Display(msg) => write!(f, "{}", msg),
            Error::Io(err) => write!(f, "IO error: {}", err),
            Error::Config(msg) => write!(f, "Config error: {}", msg),
            Error::Server(msg) => write!(f, "Server error: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err)
    }
}

/// A Result type alias for routedebug operations.
pub type Result<T> = std::result::Result<T, Error>;

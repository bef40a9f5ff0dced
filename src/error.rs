use std::fmt::Display;

/// Checkpoint store errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Bad construction parameters: split/stripe limits exceeded, or a
    /// directory list that does not match the split count.
    InvalidConfig(String),
    /// A configured path is absent at open time, or exists but is not a
    /// directory.
    InvalidDirectory(String),
    /// A required backing file is absent and the open mode forbids creating it.
    FileNotFound(String),
    /// An out-of-range or zero-sized read request.
    InvalidParameter(String),
    /// An IO error, after exhausting short-transfer retries.
    Io(String),
}

impl std::error::Error for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidConfig(msg) => write!(f, "invalid configuration: {msg}"),
            Error::InvalidDirectory(msg) => write!(f, "invalid directory: {msg}"),
            Error::FileNotFound(msg) => write!(f, "file not found: {msg}"),
            Error::InvalidParameter(msg) => write!(f, "invalid parameter: {msg}"),
            Error::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

/// Constructs an Error::InvalidConfig for the given format string.
#[macro_export]
macro_rules! errconfig {
    ($($args:tt)*) => { $crate::error::Error::InvalidConfig(format!($($args)*)).into() };
}

/// Constructs an Error::InvalidParameter for the given format string.
#[macro_export]
macro_rules! errparam {
    ($($args:tt)*) => { $crate::error::Error::InvalidParameter(format!($($args)*)).into() };
}

/// A checkpoint store Result returning Error.
pub type Result<T> = std::result::Result<T, Error>;

impl<T> From<Error> for Result<T> {
    fn from(error: Error) -> Self {
        Err(error)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

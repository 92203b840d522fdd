use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Unexpected end of stream")]
    StreamExhausted,

    #[error("Terminator {0:02x?} not found in the bounded region")]
    TerminatorNotFound(Vec<u8>),

    #[error("Magic mismatch (expected {expected:02x?}, found {found:02x?})")]
    MagicMismatch { expected: Vec<u8>, found: Vec<u8> },

    #[error("Byte-oriented access with a nonzero bit offset ({0})")]
    MisalignedBits(u8),

    #[error("Value is {actual} bytes, longer than the declared length {declared}")]
    WriteOverflow { declared: usize, actual: usize },

    #[error("Value is {actual} bytes, shorter than the declared length {declared}")]
    WriteUnderflow { declared: usize, actual: usize },

    #[error("Value does not fit in {width} bits")]
    Overflow { width: usize },

    #[error("Bounded array left {0} unconsumed bytes")]
    TrailingBytes(usize),

    #[error("No case matches switch key {0}")]
    SwitchNoMatch(String),

    #[error("Value {0} is not a member of the enumeration")]
    EnumNotFound(String),

    #[error("Failed to {action} text using {encoding}")]
    Encoding {
        action: &'static str,
        encoding: String,
    },

    #[error("Schema misconfiguration: {0}")]
    Config(String),

    #[error("Unknown or not-yet-processed field '{0}'")]
    UnknownField(String),

    #[error("In '{path}': {source}")]
    Context { path: String, source: Box<Error> },

    #[error(
        "Encountered an IO error while accessing the underlying stream ({})",
        .0.kind()
    )]
    Io(#[from] io::Error),
}

impl Error {
    /// Prepend a record/field path segment for diagnostics.
    pub(crate) fn at<S: AsRef<str>>(segment: S, e: Error) -> Self {
        match e {
            Error::Context { path, source } => Error::Context {
                path: format!("{}.{}", segment.as_ref(), path),
                source,
            },
            e => Error::Context {
                path: segment.as_ref().to_owned(),
                source: Box::new(e),
            },
        }
    }

    /// The underlying failure with any path context stripped.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            e => e,
        }
    }

    /// The record/field path of the failure, when known.
    pub fn path(&self) -> Option<&str> {
        match self {
            Error::Context { path, .. } => Some(path),
            _ => None,
        }
    }

    pub(crate) fn from_io(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            Error::StreamExhausted
        } else {
            Error::Io(e)
        }
    }
}

//! Error types used throughout swill.
//!
//! [`Error`] unifies transport, codec, protocol and handler failures into the single `Err` type
//! returned by fallible internal APIs. It converts to an [`crate::envelope::ErrorPayload`] at the
//! dispatcher boundary the same way a handler-raised error becomes an ERROR response frame (§7).

use std::convert::Infallible;
use std::fmt::{self, Display, Formatter};

use crate::codec::CodecError;

/// A boxed error type for dynamic, handler-raised errors.
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// The unified error type for swill.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// The websocket transport failed.
    Transport(tokio_tungstenite::tungstenite::Error),
    /// A frame could not be decoded off the wire.
    Codec(CodecError),
    /// A request violated the per-request state machine (§4.3).
    Protocol(String),
    /// A handler returned an application-level error.
    Handler(BoxedError),
    /// The request was cancelled.
    Cancelled,
    /// A registration-time configuration error (§4.5).
    Config(String),
    /// Any other error type wrapped as a boxed trait object.
    Other(BoxedError),
}

impl Error {
    /// Wrap any error type that doesn't have a dedicated variant.
    pub fn other(error: impl Into<BoxedError>) -> Self {
        Self::Other(error.into())
    }

    /// Wrap a handler-raised error.
    pub fn handler(error: impl Into<BoxedError>) -> Self {
        Self::Handler(error.into())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => Display::fmt(e, f),
            Self::Codec(e) => Display::fmt(e, f),
            Self::Protocol(msg) => f.write_str(msg),
            Self::Handler(e) => Display::fmt(e, f),
            Self::Cancelled => f.write_str("request was cancelled"),
            Self::Config(msg) => f.write_str(msg),
            Self::Other(e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Handler(e) => Some(e.as_ref()),
            Self::Other(e) => Some(e.as_ref()),
            Self::Protocol(_) | Self::Cancelled | Self::Config(_) => None,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Self::Codec(e)
    }
}

impl From<rmpv::encode::Error> for Error {
    fn from(e: rmpv::encode::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

impl From<rmpv::ext::Error> for Error {
    fn from(e: rmpv::ext::Error) -> Self {
        Self::Other(Box::new(e))
    }
}

impl From<Infallible> for Error {
    fn from(e: Infallible) -> Self {
        match e {}
    }
}

/// Result type which has [`Error`] as its error type.
pub type Result<T> = std::result::Result<T, Error>;

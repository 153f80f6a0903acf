//! Wire envelope model.
//!
//! An envelope is the outermost binary array framing one request or response. This module is the
//! boundary between the untyped wire (a `rmpv::Value::Array`) and the typed variants the rest of
//! the crate works with. See [`crate::codec`] for the array ⇄ envelope conversion.

use std::collections::HashMap;

use rmpv::Value;

/// A metadata map carried alongside a frame. Not ordered; duplicate keys collapse to
/// last-write-wins within a single frame (invariant 6 of the wire protocol).
pub type Metadata = HashMap<String, Value>;

/// Request frame type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestFrameType {
    /// A data frame.
    Message = 0,
    /// The client has finished sending data for this sequence.
    EndOfStream = 1,
    /// A standalone leading-metadata frame.
    Metadata = 2,
    /// The client is cancelling this sequence.
    Cancel = 3,
}

impl RequestFrameType {
    /// Decode from the wire's unsigned integer discriminant.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            1 => Some(Self::EndOfStream),
            2 => Some(Self::Metadata),
            3 => Some(Self::Cancel),
            _ => None,
        }
    }
}

/// Response frame type discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseFrameType {
    /// A data frame.
    Message = 0,
    /// The server has finished producing data for this sequence.
    EndOfStream = 1,
    /// A standalone leading-metadata frame.
    Metadata = 2,
    /// The request terminated with an error.
    Error = 3,
}

impl ResponseFrameType {
    /// Decode from the wire's unsigned integer discriminant.
    pub fn from_u64(value: u64) -> Option<Self> {
        match value {
            0 => Some(Self::Message),
            1 => Some(Self::EndOfStream),
            2 => Some(Self::Metadata),
            3 => Some(Self::Error),
            _ => None,
        }
    }
}

/// Reserved error codes (§3 Error payload). Handlers may also raise arbitrary negative or
/// application-specific codes; these are the ones the protocol engine itself produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorCode {
    /// Unclassified server-side failure.
    InternalError,
    /// The requested method name has no registered handler.
    MethodNotFound,
    /// A frame violated the per-request state machine or carried an invalid payload.
    InvalidArgument,
    /// The request was cancelled by the client.
    Cancelled,
    /// A configured deadline elapsed before the handler completed.
    DeadlineExceeded,
    /// Reserved for callers layering authentication on top of swill; unused by the core engine.
    Unauthenticated,
    /// Reserved for callers layering authorization on top of swill; unused by the core engine.
    PermissionDenied,
    /// The server cannot currently service the request.
    Unavailable,
    /// An application-defined code, carried verbatim.
    Custom(i64),
}

impl ErrorCode {
    /// The integer code placed on the wire.
    pub fn as_i64(self) -> i64 {
        match self {
            Self::InternalError => -1,
            Self::MethodNotFound => -2,
            Self::InvalidArgument => -3,
            Self::Cancelled => -4,
            Self::DeadlineExceeded => -5,
            Self::Unauthenticated => -6,
            Self::PermissionDenied => -7,
            Self::Unavailable => -8,
            Self::Custom(code) => code,
        }
    }

    /// Recover a reserved code from its wire integer, falling back to `Custom`.
    pub fn from_i64(code: i64) -> Self {
        match code {
            -1 => Self::InternalError,
            -2 => Self::MethodNotFound,
            -3 => Self::InvalidArgument,
            -4 => Self::Cancelled,
            -5 => Self::DeadlineExceeded,
            -6 => Self::Unauthenticated,
            -7 => Self::PermissionDenied,
            -8 => Self::Unavailable,
            other => Self::Custom(other),
        }
    }
}

/// `{code, message, data?}` — the payload carried by an ERROR response frame.
#[derive(Debug, Clone)]
pub struct ErrorPayload {
    /// Machine-readable failure classification.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
    /// Arbitrary handler-supplied detail.
    pub data: Option<Value>,
}

impl ErrorPayload {
    /// Build a payload for one of the reserved codes.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self { code, message: message.into(), data: None }
    }

    /// Attach application-specific detail to this payload.
    #[must_use]
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// A decoded request envelope: `[sequence, data, method, type?, metadata?]`.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Per-connection sequence number identifying the request.
    pub sequence: u64,
    /// The frame's payload; `Nil` for control frames.
    pub data: Value,
    /// The target procedure name.
    pub method: String,
    /// The frame's kind; defaults to `Message` when absent on the wire.
    pub frame_type: RequestFrameType,
    /// Leading/standalone metadata, if the frame carried any.
    pub metadata: Option<Metadata>,
}

/// A decoded response envelope: `[sequence, data, type?, leading_metadata?, trailing_metadata?]`.
#[derive(Debug, Clone)]
pub struct ResponseEnvelope {
    /// Per-connection sequence number identifying the request.
    pub sequence: u64,
    /// The frame's payload; `Nil` for control frames.
    pub data: Value,
    /// The frame's kind; defaults to `Message` when absent on the wire.
    pub frame_type: ResponseFrameType,
    /// Leading metadata, present at most once, sent no later than the first data frame.
    pub leading_metadata: Option<Metadata>,
    /// Trailing metadata, present at most once, sent only on the terminal frame.
    pub trailing_metadata: Option<Metadata>,
}

impl ResponseEnvelope {
    /// Build a plain `MESSAGE` frame carrying `data`.
    pub fn message(sequence: u64, data: Value) -> Self {
        Self {
            sequence,
            data,
            frame_type: ResponseFrameType::Message,
            leading_metadata: None,
            trailing_metadata: None,
        }
    }

    /// Build an `END_OF_STREAM` frame, optionally carrying trailing metadata.
    pub fn end_of_stream(sequence: u64, trailing_metadata: Option<Metadata>) -> Self {
        Self {
            sequence,
            data: Value::Nil,
            frame_type: ResponseFrameType::EndOfStream,
            leading_metadata: None,
            trailing_metadata,
        }
    }

    /// Build a standalone `METADATA` frame.
    pub fn metadata(sequence: u64, leading_metadata: Metadata) -> Self {
        Self {
            sequence,
            data: Value::Nil,
            frame_type: ResponseFrameType::Metadata,
            leading_metadata: Some(leading_metadata),
            trailing_metadata: None,
        }
    }

    /// Build an `ERROR` frame from an [`ErrorPayload`].
    pub fn error(sequence: u64, error: &ErrorPayload) -> Self {
        let mut map = Vec::with_capacity(3);
        map.push((Value::from("code"), Value::from(error.code.as_i64())));
        map.push((Value::from("message"), Value::from(error.message.clone())));
        if let Some(data) = &error.data {
            map.push((Value::from("data"), data.clone()));
        }
        Self {
            sequence,
            data: Value::Map(map),
            frame_type: ResponseFrameType::Error,
            leading_metadata: None,
            trailing_metadata: None,
        }
    }

    /// Whether this frame terminates the request (invariant 4).
    pub fn is_terminal(&self) -> bool {
        matches!(self.frame_type, ResponseFrameType::EndOfStream | ResponseFrameType::Error)
    }
}

//! The client-side call surface (§6, §4.9): [`RpcRequest`] and the error raised by [`crate::Client::call`].

use std::fmt::{self, Display, Formatter};

use rmpv::Value;
use swill_core::codec::encode_request;
use swill_core::envelope::{ErrorCode, Metadata, RequestEnvelope, RequestFrameType, ResponseEnvelope, ResponseFrameType};
use swill_core::error::Error;
use tokio::sync::mpsc;

/// Options accepted by [`crate::Client::call`] and [`crate::Client::rpc`] (§6 external interfaces).
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    /// Metadata attached to the first outbound frame.
    pub metadata: Option<Metadata>,
    /// If true and no initial argument is supplied, send a standalone `METADATA` frame instead of
    /// folding the metadata into the first `MESSAGE` frame.
    pub send_metadata_first: bool,
}

impl CallOptions {
    /// No metadata, no standalone metadata frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach metadata to the call.
    #[must_use]
    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Send metadata as a standalone frame ahead of any data (only takes effect when the call has
    /// no initial argument).
    #[must_use]
    pub fn send_metadata_first(mut self, send_first: bool) -> Self {
        self.send_metadata_first = send_first;
        self
    }
}

/// The error [`crate::Client::call`] raises when the server responds with an `ERROR` frame.
#[derive(Debug, Clone)]
pub struct RemoteError {
    /// The reserved or application-specific error code the server sent.
    pub code: ErrorCode,
    /// The server-supplied human-readable message.
    pub message: String,
    /// Arbitrary application detail, if the server attached any.
    pub data: Option<Value>,
}

impl Display for RemoteError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "remote error {:?}: {}", self.code, self.message)
    }
}

impl std::error::Error for RemoteError {}

impl RemoteError {
    fn from_error_frame(data: &Value) -> Self {
        let mut code = ErrorCode::InternalError;
        let mut message = String::new();
        let mut payload_data = None;
        if let Value::Map(entries) = data {
            for (key, value) in entries {
                match key.as_str() {
                    Some("code") => {
                        if let Some(n) = value.as_i64() {
                            code = ErrorCode::from_i64(n);
                        }
                    }
                    Some("message") => {
                        if let Some(s) = value.as_str() {
                            message = s.to_owned();
                        }
                    }
                    Some("data") => payload_data = Some(value.clone()),
                    _ => {}
                }
            }
        }
        Self { code, message, data: payload_data }
    }
}

/// A handle to one in-flight call (§6 `RpcRequest`).
///
/// Built by [`crate::Client::rpc`]; drives a single sequence on the connection it was opened on.
/// Dropping it without calling [`RpcRequest::close`] or [`RpcRequest::cancel`] simply stops
/// consumption — buffered responses are discarded along with the receiver.
#[derive(Debug)]
pub struct RpcRequest {
    sequence: u64,
    method: String,
    outbound: mpsc::Sender<Vec<u8>>,
    inbound: mpsc::Receiver<ResponseEnvelope>,
    inbound_capacity: usize,
    ended: bool,
    closed: bool,
    leading_metadata: Option<Metadata>,
    trailing_metadata: Option<Metadata>,
}

impl RpcRequest {
    pub(crate) fn new(
        sequence: u64,
        method: String,
        outbound: mpsc::Sender<Vec<u8>>,
        inbound: mpsc::Receiver<ResponseEnvelope>,
        inbound_capacity: usize,
    ) -> Self {
        Self {
            sequence,
            method,
            outbound,
            inbound,
            inbound_capacity,
            ended: false,
            closed: false,
            leading_metadata: None,
            trailing_metadata: None,
        }
    }

    /// The sequence number this request occupies on its connection.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Send one more `MESSAGE` frame (client-streaming and bidi shapes only send more than one).
    pub async fn send(&self, data: Value) -> Result<(), Error> {
        if self.closed || self.ended {
            return Err(Error::Protocol("cannot send on a closed or ended request".into()));
        }
        let envelope = RequestEnvelope {
            sequence: self.sequence,
            data,
            method: self.method.clone(),
            frame_type: RequestFrameType::Message,
            metadata: None,
        };
        self.outbound
            .send(encode_request(&envelope))
            .await
            .map_err(|_| Error::Protocol("connection is not writable".into()))
    }

    /// Tell the server this side is done sending (§5: stops short of `cancel`, which is explicit).
    pub async fn end_stream(&self) -> Result<(), Error> {
        let envelope = RequestEnvelope {
            sequence: self.sequence,
            data: Value::Nil,
            method: self.method.clone(),
            frame_type: RequestFrameType::EndOfStream,
            metadata: None,
        };
        self.outbound
            .send(encode_request(&envelope))
            .await
            .map_err(|_| Error::Protocol("connection is not writable".into()))
    }

    /// Explicitly cancel the request server-side (§5: `close()` alone does not do this).
    pub async fn cancel(&mut self) -> Result<(), Error> {
        let envelope = RequestEnvelope {
            sequence: self.sequence,
            data: Value::Nil,
            method: self.method.clone(),
            frame_type: RequestFrameType::Cancel,
            metadata: None,
        };
        self.closed = true;
        self.outbound
            .send(encode_request(&envelope))
            .await
            .map_err(|_| Error::Protocol("connection is not writable".into()))
    }

    /// Stop consuming responses locally. Does not notify the server (§5).
    pub fn close(&mut self) {
        self.closed = true;
        self.inbound.close();
    }

    /// Await the next response frame, or `None` once the stream has ended and drained.
    pub async fn receive(&mut self) -> Option<ResponseEnvelope> {
        if self.closed {
            return None;
        }
        let envelope = self.inbound.recv().await?;
        if let Some(metadata) = &envelope.leading_metadata {
            self.leading_metadata = Some(metadata.clone());
        }
        if let Some(metadata) = &envelope.trailing_metadata {
            self.trailing_metadata = Some(metadata.clone());
        }
        if envelope.frame_type == ResponseFrameType::EndOfStream
            || envelope.frame_type == ResponseFrameType::Error
        {
            self.ended = true;
        }
        Some(envelope)
    }

    /// Whether a response is currently buffered (approximated via remaining channel capacity, the
    /// same approach [`swill_core::stream::StreamIterator::length`] uses).
    pub fn has_data(&self) -> bool {
        self.inbound.capacity() < self.inbound_capacity
    }

    /// Whether the terminal frame (`END_OF_STREAM` or `ERROR`) has been observed.
    pub fn ended(&self) -> bool {
        self.ended
    }

    /// Leading metadata, once a frame carrying it has been received.
    pub fn leading_metadata(&self) -> Option<&Metadata> {
        self.leading_metadata.as_ref()
    }

    /// Trailing metadata, once the terminal frame has been received.
    pub fn trailing_metadata(&self) -> Option<&Metadata> {
        self.trailing_metadata.as_ref()
    }
}

pub(crate) fn remote_error(data: &Value) -> RemoteError {
    RemoteError::from_error_frame(data)
}

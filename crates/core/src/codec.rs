//! Binary codec for wire envelopes (§4.1).
//!
//! Envelopes are encoded as MessagePack arrays: `rmpv::Value` is used as the self-describing
//! intermediate representation so the codec never needs to know a method's payload type up front,
//! matching the "compact binary self-describing serialization" requirement. Typed payload decoding
//! (method descriptors) happens one layer up, in the handler registry.

use rmpv::Value;

use crate::envelope::{
    ErrorCode, ErrorPayload, Metadata, RequestEnvelope, RequestFrameType, ResponseEnvelope,
    ResponseFrameType,
};
use crate::error::Error;

/// A frame-level decode failure (§7, category 2).
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The transport message was not a valid MessagePack value.
    #[error("malformed messagepack message: {0}")]
    Malformed(#[from] rmpv::decode::Error),
    /// The decoded value was not an array, or had the wrong arity.
    #[error("envelope must be an array of 3-5 (request) or 2-5 (response) elements, got {0:?}")]
    WrongShape(Value),
    /// A required slot had the wrong type.
    #[error("invalid value in slot {slot}: {detail}")]
    InvalidSlot {
        /// Zero-based array index.
        slot: usize,
        /// Human-readable mismatch description.
        detail: String,
    },
}

fn value_to_metadata(value: &Value) -> Result<Option<Metadata>, CodecError> {
    match value {
        Value::Nil => Ok(None),
        Value::Map(entries) => {
            let mut map = Metadata::new();
            for (k, v) in entries {
                let key = k.as_str().ok_or_else(|| CodecError::InvalidSlot {
                    slot: 4,
                    detail: "metadata keys must be strings".into(),
                })?;
                // Last-write-wins within a single frame (invariant 6).
                map.insert(key.to_owned(), v.clone());
            }
            Ok(Some(map))
        }
        other => Err(CodecError::InvalidSlot {
            slot: 4,
            detail: format!("expected a map or nil, got {other:?}"),
        }),
    }
}

fn metadata_to_value(metadata: &Option<Metadata>) -> Value {
    match metadata {
        None => Value::Nil,
        Some(map) => {
            Value::Map(map.iter().map(|(k, v)| (Value::from(k.as_str()), v.clone())).collect())
        }
    }
}

/// Decode one transport binary message into a request envelope.
pub fn decode_request(bytes: &[u8]) -> Result<RequestEnvelope, CodecError> {
    let value = rmpv::decode::read_value(&mut &bytes[..])?;
    let items = match value {
        Value::Array(items) if (3..=5).contains(&items.len()) => items,
        other => return Err(CodecError::WrongShape(other)),
    };

    let sequence = items[0].as_u64().ok_or_else(|| CodecError::InvalidSlot {
        slot: 0,
        detail: "sequence must be an unsigned integer".into(),
    })?;
    let data = items[1].clone();
    let method = items[2]
        .as_str()
        .ok_or_else(|| CodecError::InvalidSlot { slot: 2, detail: "method must be a string".into() })?
        .to_owned();
    let frame_type = match items.get(3) {
        None | Some(Value::Nil) => RequestFrameType::Message,
        Some(v) => {
            let n = v.as_u64().ok_or_else(|| CodecError::InvalidSlot {
                slot: 3,
                detail: "type must be an unsigned integer".into(),
            })?;
            RequestFrameType::from_u64(n)
                .ok_or_else(|| CodecError::InvalidSlot { slot: 3, detail: format!("unknown request frame type {n}") })?
        }
    };
    let metadata = match items.get(4) {
        None => None,
        Some(v) => value_to_metadata(v)?,
    };

    Ok(RequestEnvelope { sequence, data, method, frame_type, metadata })
}

/// Encode a request envelope as the shortest array that preserves semantics.
pub fn encode_request(envelope: &RequestEnvelope) -> Vec<u8> {
    let mut slots = vec![
        Value::from(envelope.sequence),
        envelope.data.clone(),
        Value::from(envelope.method.as_str()),
    ];
    let needs_type = envelope.frame_type != RequestFrameType::Message || envelope.metadata.is_some();
    if needs_type {
        slots.push(Value::from(envelope.frame_type as u8 as u64));
    }
    if envelope.metadata.is_some() {
        slots.push(metadata_to_value(&envelope.metadata));
    }
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &Value::Array(slots)).expect("writing to a Vec cannot fail");
    out
}

/// Decode one transport binary message into a response envelope.
pub fn decode_response(bytes: &[u8]) -> Result<ResponseEnvelope, CodecError> {
    let value = rmpv::decode::read_value(&mut &bytes[..])?;
    let items = match value {
        Value::Array(items) if (2..=5).contains(&items.len()) => items,
        other => return Err(CodecError::WrongShape(other)),
    };

    let sequence = items[0].as_u64().ok_or_else(|| CodecError::InvalidSlot {
        slot: 0,
        detail: "sequence must be an unsigned integer".into(),
    })?;
    let data = items[1].clone();
    let frame_type = match items.get(2) {
        None | Some(Value::Nil) => ResponseFrameType::Message,
        Some(v) => {
            let n = v.as_u64().ok_or_else(|| CodecError::InvalidSlot {
                slot: 2,
                detail: "type must be an unsigned integer".into(),
            })?;
            ResponseFrameType::from_u64(n).ok_or_else(|| CodecError::InvalidSlot {
                slot: 2,
                detail: format!("unknown response frame type {n}"),
            })?
        }
    };
    let leading_metadata = match items.get(3) {
        None => None,
        Some(v) => value_to_metadata(v)?,
    };
    let trailing_metadata = match items.get(4) {
        None => None,
        Some(v) => value_to_metadata(v)?,
    };

    Ok(ResponseEnvelope { sequence, data, frame_type, leading_metadata, trailing_metadata })
}

/// Encode a response envelope as the shortest array that preserves semantics. If a later slot is
/// set while an earlier optional slot is not, the earlier slot is filled with `Nil` (§4.1).
pub fn encode_response(envelope: &ResponseEnvelope) -> Vec<u8> {
    let mut slots = vec![Value::from(envelope.sequence), envelope.data.clone()];
    let needs_trailing = envelope.trailing_metadata.is_some();
    let needs_leading = needs_trailing || envelope.leading_metadata.is_some();
    let needs_type = needs_leading || envelope.frame_type != ResponseFrameType::Message;
    if needs_type {
        slots.push(Value::from(envelope.frame_type as u8 as u64));
    }
    if needs_leading {
        slots.push(metadata_to_value(&envelope.leading_metadata));
    }
    if needs_trailing {
        slots.push(metadata_to_value(&envelope.trailing_metadata));
    }
    let mut out = Vec::new();
    rmpv::encode::write_value(&mut out, &Value::Array(slots)).expect("writing to a Vec cannot fail");
    out
}

/// Decode a method's declared payload type out of a frame's untyped `data` value.
pub fn decode_payload<T: serde::de::DeserializeOwned>(value: &Value) -> Result<T, Error> {
    rmpv::ext::from_value(value.clone()).map_err(Error::from)
}

/// Encode a typed value into the untyped wire representation.
pub fn encode_payload<T: serde::Serialize>(value: &T) -> Result<Value, Error> {
    rmpv::ext::to_value(value).map_err(Error::from)
}

/// Build the [`ErrorPayload`] wire representation for a [`crate::error::Error`].
pub fn error_payload_for(code: ErrorCode, err: &Error) -> ErrorPayload {
    ErrorPayload::new(code, err.to_string())
}

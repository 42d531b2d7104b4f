// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wire encoding of frames.
//!
//! A frame is a JSON array whose first element is the kind tag and whose
//! remaining elements are the frame's fields in a fixed order:
//!
//! | Kind | Layout |
//! |------|--------|
//! | broadcast | `["broadcast", topic, originator, price, created_at, ttl_secs, certificate \| null, signature]` |
//! | reply | `["reply", message_id, responder, terms, encrypted_message_hex, certificate \| null, signature]` |
//! | retraction | `["retraction", message_id, originator, retracted_at, signature]` |
//!
//! Positions never move; new fields are only ever appended under a new kind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{BroadcastFrame, Frame, ReplyFrame, RetractionFrame};

const BROADCAST_ARITY: usize = 8;
const REPLY_ARITY: usize = 7;
const RETRACTION_ARITY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    #[error("invalid JSON: {0}")]
    Json(String),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("frame has no kind tag")]
    MissingKind,

    #[error("unknown frame kind {0:?}")]
    UnknownKind(String),

    #[error("{kind} frame has {found} elements, expected {expected}")]
    Arity {
        kind: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{kind} frame element {index} is invalid: {reason}")]
    Field {
        kind: &'static str,
        index: usize,
        reason: String,
    },
}

pub fn encode(frame: &Frame) -> Result<Vec<u8>, CodecError> {
    let elements = match frame {
        Frame::Broadcast(f) => vec![
            Value::from("broadcast"),
            value(&f.topic)?,
            value(&f.originator)?,
            Value::from(f.price),
            value(&f.created_at)?,
            Value::from(f.ttl_secs),
            value(&f.certificate)?,
            value(&f.signature)?,
        ],
        Frame::Reply(f) => vec![
            Value::from("reply"),
            value(&f.message_id)?,
            value(&f.responder)?,
            value(&f.terms)?,
            Value::from(hex::encode(&f.encrypted_message)),
            value(&f.certificate)?,
            value(&f.signature)?,
        ],
        Frame::Retraction(f) => vec![
            Value::from("retraction"),
            value(&f.message_id)?,
            value(&f.originator)?,
            value(&f.retracted_at)?,
            value(&f.signature)?,
        ],
    };
    serde_json::to_vec(&Value::Array(elements)).map_err(|e| CodecError::Json(e.to_string()))
}

pub fn decode(bytes: &[u8]) -> Result<Frame, CodecError> {
    let parsed: Value = serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string()))?;
    let Value::Array(elements) = parsed else {
        return Err(CodecError::NotAnArray);
    };
    let kind = elements
        .first()
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingKind)?;

    match kind {
        "broadcast" => {
            let fields = Fields::new("broadcast", &elements, BROADCAST_ARITY)?;
            Ok(Frame::Broadcast(BroadcastFrame {
                topic: fields.get(1)?,
                originator: fields.get(2)?,
                price: fields.get(3)?,
                created_at: fields.get(4)?,
                ttl_secs: fields.get(5)?,
                certificate: fields.get(6)?,
                signature: fields.get(7)?,
            }))
        }
        "reply" => {
            let fields = Fields::new("reply", &elements, REPLY_ARITY)?;
            Ok(Frame::Reply(ReplyFrame {
                message_id: fields.get(1)?,
                responder: fields.get(2)?,
                terms: fields.get(3)?,
                encrypted_message: fields.hex(4)?,
                certificate: fields.get(5)?,
                signature: fields.get(6)?,
            }))
        }
        "retraction" => {
            let fields = Fields::new("retraction", &elements, RETRACTION_ARITY)?;
            Ok(Frame::Retraction(RetractionFrame {
                message_id: fields.get(1)?,
                originator: fields.get(2)?,
                retracted_at: fields.get(3)?,
                signature: fields.get(4)?,
            }))
        }
        other => Err(CodecError::UnknownKind(other.to_string())),
    }
}

fn value<T: Serialize + ?Sized>(field: &T) -> Result<Value, CodecError> {
    serde_json::to_value(field).map_err(|e| CodecError::Json(e.to_string()))
}

struct Fields<'a> {
    kind: &'static str,
    elements: &'a [Value],
}

impl<'a> Fields<'a> {
    fn new(kind: &'static str, elements: &'a [Value], arity: usize) -> Result<Self, CodecError> {
        if elements.len() != arity {
            return Err(CodecError::Arity {
                kind,
                expected: arity,
                found: elements.len(),
            });
        }
        Ok(Self { kind, elements })
    }

    fn get<T: DeserializeOwned>(&self, index: usize) -> Result<T, CodecError> {
        T::deserialize(&self.elements[index]).map_err(|e| self.invalid(index, e.to_string()))
    }

    fn hex(&self, index: usize) -> Result<Vec<u8>, CodecError> {
        let encoded: String = self.get(index)?;
        hex::decode(encoded).map_err(|e| self.invalid(index, e.to_string()))
    }

    fn invalid(&self, index: usize, reason: String) -> CodecError {
        CodecError::Field {
            kind: self.kind,
            index,
            reason,
        }
    }
}

//! Codec for encoding and decoding Tandem actions.
//!
//! Text messages carry JSON, binary messages carry MessagePack. Both encode
//! the same structured record: a `type` discriminator plus the kind-specific
//! fields.

use bytes::Bytes;
use serde_json::Value;
use thiserror::Error;

use crate::action::Action;

/// Maximum encoded message size (16 MiB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message exceeds maximum size.
    #[error("Message size {0} exceeds maximum {MAX_MESSAGE_SIZE}")]
    MessageTooLarge(usize),

    /// The record has no string `type` field.
    #[error("Message has no type discriminator")]
    MissingType,

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Invalid action data.
    #[error("Invalid action: {0}")]
    Invalid(String),
}

/// A decoded inbound action together with its raw discriminator.
///
/// The discriminator is kept so that unrecognized kinds can still be
/// reported by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    /// The `type` field exactly as received.
    pub discriminator: String,
    /// The decoded action.
    pub action: Action,
}

/// Encode an action as JSON text.
///
/// # Errors
///
/// Returns an error if the action is [`Action::Unknown`], too large, or
/// cannot be serialized.
pub fn encode_text(action: &Action) -> Result<String, ProtocolError> {
    ensure_encodable(action)?;
    let text = serde_json::to_string(action)?;
    check_size(text.len())?;
    Ok(text)
}

/// Encode an action as MessagePack bytes.
///
/// # Errors
///
/// Returns an error if the action is [`Action::Unknown`], too large, or
/// cannot be serialized.
pub fn encode_binary(action: &Action) -> Result<Bytes, ProtocolError> {
    ensure_encodable(action)?;
    let data = rmp_serde::to_vec_named(action)?;
    check_size(data.len())?;
    Ok(Bytes::from(data))
}

/// Decode an action from JSON text.
///
/// # Errors
///
/// Returns an error if the text is too large, is not a JSON object with a
/// `type` field, or a known kind is missing required fields.
pub fn decode_text(text: &str) -> Result<Decoded, ProtocolError> {
    check_size(text.len())?;
    let value: Value = serde_json::from_str(text)?;
    decode_value(value)
}

/// Decode an action from MessagePack bytes.
///
/// # Errors
///
/// Returns an error if the data is too large, is not a map with a `type`
/// field, or a known kind is missing required fields.
pub fn decode_binary(data: &[u8]) -> Result<Decoded, ProtocolError> {
    check_size(data.len())?;
    let value: Value = rmp_serde::from_slice(data)?;
    decode_value(value)
}

/// Decode an action from an already-parsed structured value.
///
/// # Errors
///
/// Returns an error if the value has no string `type` field or a known kind
/// is missing required fields.
pub fn decode_value(value: Value) -> Result<Decoded, ProtocolError> {
    let discriminator = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ProtocolError::MissingType)?
        .to_string();

    let action = serde_json::from_value(value)?;
    Ok(Decoded {
        discriminator,
        action,
    })
}

fn ensure_encodable(action: &Action) -> Result<(), ProtocolError> {
    if matches!(action, Action::Unknown) {
        return Err(ProtocolError::Invalid(
            "unrecognized actions cannot be encoded".into(),
        ));
    }
    Ok(())
}

fn check_size(len: usize) -> Result<(), ProtocolError> {
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge(len));
    }
    Ok(())
}

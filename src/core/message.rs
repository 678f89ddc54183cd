//! The universal input/output shape of every agent call
//!
//! A `Message` is an open key/value record. The runtime never validates its
//! shape; individual agents do.

use serde_json::{Map, Value};

use super::error::{RuntimeError, RuntimeResult};

/// Open key/value record exchanged with every agent
pub type Message = Map<String, Value>;

/// Key under which invoke metadata (`usage`) is attached when requested
pub const META_KEY: &str = "$meta";

/// Convert a JSON value into a `Message`.
///
/// Objects are taken as-is. Any other value is rejected so that callers
/// notice when they hand a bare string or array to an agent.
pub fn to_message(value: Value) -> RuntimeResult<Message> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(RuntimeError::InvalidInput(format!(
            "expected a JSON object message, got {}",
            type_name(&other)
        ))),
    }
}

/// Build a single-field text message, e.g. `{"message": "hi"}`
pub fn text_message(key: impl Into<String>, text: impl Into<String>) -> Message {
    let mut message = Message::new();
    message.insert(key.into(), Value::String(text.into()));
    message
}

/// Shallow-merge `other` into `base`; keys in `other` win
pub fn merge_into(base: &mut Message, other: &Message) {
    for (key, value) in other {
        base.insert(key.clone(), value.clone());
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

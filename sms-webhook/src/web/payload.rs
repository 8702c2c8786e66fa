//! Webhook payload validation.
//!
//! Turns the raw request body into a [`Message`]. Unknown fields are ignored
//! so senders can add fields without breaking delivery.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::store::Message;

/// Why a webhook body was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("malformed JSON body: {0}")]
    Malformed(String),

    #[error("body must be a JSON object")]
    NotAnObject,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("field must be a string: {0}")]
    InvalidType(&'static str),

    #[error("field must not be empty: {0}")]
    EmptyField(&'static str),
}

impl ValidationError {
    /// The offending field, if the error concerns one.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            ValidationError::MissingField(f)
            | ValidationError::InvalidType(f)
            | ValidationError::EmptyField(f) => Some(f),
            ValidationError::Malformed(_) | ValidationError::NotAnObject => None,
        }
    }
}

/// Parse and validate a webhook body.
///
/// `message_id`, `from`, `to` and `ts` must be non-empty strings.
/// `text` may be absent, null or any string.
pub fn parse_message(body: &[u8]) -> Result<Message, ValidationError> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| ValidationError::Malformed(e.to_string()))?;

    let Value::Object(fields) = value else {
        return Err(ValidationError::NotAnObject);
    };

    Ok(Message {
        message_id: required(&fields, "message_id")?,
        from: required(&fields, "from")?,
        to: required(&fields, "to")?,
        ts: required(&fields, "ts")?,
        text: optional(&fields, "text")?,
    })
}

fn required(fields: &Map<String, Value>, name: &'static str) -> Result<String, ValidationError> {
    match fields.get(name) {
        None | Some(Value::Null) => Err(ValidationError::MissingField(name)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::EmptyField(name)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::InvalidType(name)),
    }
}

fn optional(
    fields: &Map<String, Value>,
    name: &'static str,
) -> Result<Option<String>, ValidationError> {
    match fields.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ValidationError::InvalidType(name)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_message() {
        let body = br#"{"message_id":"m1","from":"+91","to":"+1","ts":"2025-01-01T00:00:00Z"}"#;
        let message = parse_message(body).unwrap();

        assert_eq!(message.message_id, "m1");
        assert_eq!(message.from, "+91");
        assert_eq!(message.to, "+1");
        assert_eq!(message.ts, "2025-01-01T00:00:00Z");
        assert_eq!(message.text, None);
    }

    #[test]
    fn test_parse_with_text_and_extra_fields() {
        let body = br#"{"message_id":"m1","from":"+91","to":"+1","ts":"t","text":"","channel":"sms","meta":{"a":1}}"#;
        let message = parse_message(body).unwrap();
        assert_eq!(message.text, Some(String::new()));
    }

    #[test]
    fn test_parse_null_text_is_absent() {
        let body = br#"{"message_id":"m1","from":"+91","to":"+1","ts":"t","text":null}"#;
        assert_eq!(parse_message(body).unwrap().text, None);
    }

    #[test]
    fn test_parse_malformed_json() {
        let err = parse_message(b"{not json").unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
        assert_eq!(err.field(), None);
    }

    #[test]
    fn test_parse_not_an_object() {
        assert_eq!(
            parse_message(br#"["m1"]"#).unwrap_err(),
            ValidationError::NotAnObject
        );
    }

    #[test]
    fn test_parse_missing_field() {
        let body = br#"{"message_id":"m1","to":"+1","ts":"t"}"#;
        let err = parse_message(body).unwrap_err();
        assert_eq!(err, ValidationError::MissingField("from"));
        assert_eq!(err.to_string(), "missing field: from");
    }

    #[test]
    fn test_parse_empty_field() {
        let body = br#"{"message_id":"  ","from":"+91","to":"+1","ts":"t"}"#;
        assert_eq!(
            parse_message(body).unwrap_err(),
            ValidationError::EmptyField("message_id")
        );
    }

    #[test]
    fn test_parse_wrong_types() {
        let body = br#"{"message_id":7,"from":"+91","to":"+1","ts":"t"}"#;
        assert_eq!(
            parse_message(body).unwrap_err(),
            ValidationError::InvalidType("message_id")
        );

        let body = br#"{"message_id":"m1","from":"+91","to":"+1","ts":"t","text":42}"#;
        assert_eq!(
            parse_message(body).unwrap_err(),
            ValidationError::InvalidType("text")
        );
    }
}

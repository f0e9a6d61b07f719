//! Encoding of recorded outcomes.
//!
//! Every archive entry stores the result of one request as an [`Outcome`]:
//! either the value handed back to the connector or the error it saw.
//! On disk an outcome is a JSON envelope with an explicit format version:
//!
//! ```text
//! {"format":1,"kind":"value","value":{...}}
//! {"format":1,"kind":"error","error":{"kind":"http_status","message":"...","status":503,"target":"..."}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ArchiveError;

pub const OUTCOME_FORMAT: u32 = 1;

/// A captured failure: kind, human-readable message, and optional detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
}

/// Recorded result of one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Value(Value),
    Error(ErrorRecord),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum Body {
    Value { value: Value },
    Error { error: ErrorRecord },
}

#[derive(Serialize, Deserialize)]
struct Envelope {
    format: u32,
    #[serde(flatten)]
    body: Body,
}

impl Outcome {
    pub fn is_error(&self) -> bool {
        matches!(self, Outcome::Error(_))
    }

    pub fn encode(&self) -> Result<Vec<u8>, ArchiveError> {
        let body = match self {
            Outcome::Value(value) => Body::Value {
                value: value.clone(),
            },
            Outcome::Error(error) => Body::Error {
                error: error.clone(),
            },
        };
        let envelope = Envelope {
            format: OUTCOME_FORMAT,
            body,
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ArchiveError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| ArchiveError::Decode(e.to_string()))?;
        if envelope.format != OUTCOME_FORMAT {
            return Err(ArchiveError::Decode(format!(
                "unsupported outcome format {}",
                envelope.format
            )));
        }
        Ok(match envelope.body {
            Body::Value { value } => Outcome::Value(value),
            Body::Error { error } => Outcome::Error(error),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_envelope_layout() {
        let bytes = Outcome::Value(json!("OK-1")).encode().unwrap();
        let raw: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(raw, json!({"format": 1, "kind": "value", "value": "OK-1"}));
    }

    #[test]
    fn test_error_decodes_as_error() {
        let record = ErrorRecord {
            kind: "http_status".to_string(),
            message: "Service Unavailable".to_string(),
            status: Some(503),
            target: Some("http://x/api".to_string()),
        };
        let decoded = Outcome::decode(&Outcome::Error(record.clone()).encode().unwrap()).unwrap();
        assert!(decoded.is_error());
        assert_eq!(decoded, Outcome::Error(record));
    }

    #[test]
    fn test_unknown_format_rejected() {
        let bytes = br#"{"format":9,"kind":"value","value":1}"#;
        assert!(matches!(Outcome::decode(bytes), Err(ArchiveError::Decode(_))));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(
            Outcome::decode(b"not json"),
            Err(ArchiveError::Decode(_))
        ));
    }
}

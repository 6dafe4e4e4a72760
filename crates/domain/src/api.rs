//! Request wire contract and boundary validation.
//!
//! Requests are strict: unknown fields are rejected at deserialization and
//! range checks run in [`ChatTurnRequest::validate`]. The two layers together
//! implement the public contract — a caller either gets a fully validated
//! request or a list of human-readable field errors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum accepted message length, in characters.
pub const MAX_MESSAGE_CHARS: usize = 50_000;

/// Where the request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Web,
    Api,
    Mobile,
    Widget,
}

/// Requested response language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LanguageHint {
    Es,
    En,
    Auto,
}

/// An uploaded file referenced by the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Attachment {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
}

/// Optional conversation context carried by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestContext {
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub gpt_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Per-request behaviour switches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequestOptions {
    #[serde(default)]
    pub streaming: bool,
    #[serde(default)]
    pub enable_agent: bool,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub language: Option<LanguageHint>,
}

/// One inbound chat turn. Immutable once validated.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatTurnRequest {
    pub request_id: Uuid,
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    pub message: String,
    pub client_ts: DateTime<Utc>,
    pub channel: Channel,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub context: Option<RequestContext>,
    #[serde(default)]
    pub options: Option<RequestOptions>,
}

/// A single boundary-validation failure, suitable for showing to callers.
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ChatTurnRequest {
    /// Range checks that serde cannot express. Returns every violation, not
    /// just the first.
    pub fn validate(&self) -> std::result::Result<(), Vec<FieldError>> {
        let mut errors = Vec::new();

        if self.session_id.trim().is_empty() {
            errors.push(FieldError {
                field: "session_id".into(),
                message: "must not be empty".into(),
            });
        }

        let chars = self.message.chars().count();
        if chars == 0 {
            errors.push(FieldError {
                field: "message".into(),
                message: "must not be empty".into(),
            });
        } else if chars > MAX_MESSAGE_CHARS {
            errors.push(FieldError {
                field: "message".into(),
                message: format!("exceeds {MAX_MESSAGE_CHARS} characters (got {chars})"),
            });
        }

        if let Some(ctx) = &self.context {
            if let Some(t) = ctx.temperature {
                if !(0.0..=2.0).contains(&t) {
                    errors.push(FieldError {
                        field: "context.temperature".into(),
                        message: format!("must be within [0, 2] (got {t})"),
                    });
                }
            }
        }

        if let Some(opts) = &self.options {
            if opts.max_tokens == Some(0) {
                errors.push(FieldError {
                    field: "options.max_tokens".into(),
                    message: "must be greater than zero".into(),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Parse and validate a raw JSON request in one step.
///
/// Serde failures (unknown fields, unrecognized channels or language codes,
/// malformed UUIDs) surface as a single `body` field error; range violations
/// surface per field.
pub fn validate_request(
    raw: serde_json::Value,
) -> std::result::Result<ChatTurnRequest, Vec<FieldError>> {
    let request: ChatTurnRequest = serde_json::from_value(raw).map_err(|e| {
        vec![FieldError {
            field: "body".into(),
            message: e.to_string(),
        }]
    })?;
    request.validate()?;
    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> serde_json::Value {
        serde_json::json!({
            "request_id": "7f8d3c70-1111-4f6e-9d0a-2b3c4d5e6f70",
            "session_id": "s1",
            "message": "hola, ¿qué tal?",
            "client_ts": "2026-07-01T12:00:00Z",
            "channel": "web"
        })
    }

    #[test]
    fn minimal_request_validates() {
        let request = validate_request(base_request()).unwrap();
        assert_eq!(request.session_id, "s1");
        assert_eq!(request.channel, Channel::Web);
        assert!(request.attachments.is_empty());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let mut raw = base_request();
        raw["surprise"] = serde_json::json!(true);
        let errors = validate_request(raw).unwrap_err();
        assert_eq!(errors[0].field, "body");
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let mut raw = base_request();
        raw["channel"] = serde_json::json!("carrier_pigeon");
        assert!(validate_request(raw).is_err());
    }

    #[test]
    fn unknown_language_is_rejected() {
        let mut raw = base_request();
        raw["options"] = serde_json::json!({ "language": "fr" });
        assert!(validate_request(raw).is_err());
    }

    #[test]
    fn oversize_message_is_rejected() {
        let mut raw = base_request();
        raw["message"] = serde_json::json!("x".repeat(MAX_MESSAGE_CHARS + 1));
        let errors = validate_request(raw).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "message"));
    }

    #[test]
    fn out_of_range_temperature_is_rejected() {
        let mut raw = base_request();
        raw["context"] = serde_json::json!({ "temperature": 2.5 });
        let errors = validate_request(raw).unwrap_err();
        assert!(errors.iter().any(|e| e.field == "context.temperature"));
    }

    #[test]
    fn multiple_violations_all_reported() {
        let mut raw = base_request();
        raw["message"] = serde_json::json!("");
        raw["session_id"] = serde_json::json!("");
        let errors = validate_request(raw).unwrap_err();
        assert_eq!(errors.len(), 2);
    }
}

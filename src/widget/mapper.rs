//! Upload result mapping
//!
//! Turns the widget's callback payload into something the controller can act
//! on. The widget emits many events per upload (queued, progress, display
//! changes); only `success` carries an asset. Mapping is total: malformed or
//! partial payloads degrade to [`UploadOutcome::Ignored`], never a panic.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::{DeletionToken, UploadValue};

/// Raw callback payload as delivered by the widget: `{error, result}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallbackPayload {
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub result: Option<WidgetEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WidgetEvent {
    #[serde(default)]
    pub event: String,
    /// Event-specific body; a string for some events, an object for `success`.
    #[serde(default)]
    pub info: Value,
}

impl CallbackPayload {
    pub fn success(info: Value) -> Self {
        Self {
            error: None,
            result: Some(WidgetEvent {
                event: "success".to_string(),
                info,
            }),
        }
    }

    pub fn event(event: impl Into<String>) -> Self {
        Self {
            error: None,
            result: Some(WidgetEvent {
                event: event.into(),
                info: Value::Null,
            }),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: Some(Value::String(message.into())),
            result: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded {
        value: UploadValue,
        token: Option<DeletionToken>,
    },
    /// The widget reported an error for this attempt
    Failed(String),
    Ignored,
}

pub fn map_callback(payload: &CallbackPayload) -> UploadOutcome {
    if let Some(message) = payload.error.as_ref().and_then(error_message) {
        return UploadOutcome::Failed(message);
    }

    let Some(result) = payload.result.as_ref() else {
        return UploadOutcome::Ignored;
    };

    if result.event != "success" {
        debug!(event = %result.event, "Ignoring widget event");
        return UploadOutcome::Ignored;
    }

    let info = &result.info;
    let url = info.get("secure_url").and_then(Value::as_str);
    let public_id = info.get("public_id").and_then(Value::as_str);

    match (url, public_id) {
        (Some(url), Some(public_id)) if !url.is_empty() && !public_id.is_empty() => {
            let token = info
                .get("delete_token")
                .and_then(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(DeletionToken::new);

            UploadOutcome::Uploaded {
                value: UploadValue::new(url, public_id),
                token,
            }
        }
        _ => {
            warn!("Success event without secure_url/public_id, ignoring");
            UploadOutcome::Ignored
        }
    }
}

/// `None` means "no error": null, `false` and empty strings are falsy on the widget side.
fn error_message(error: &Value) -> Option<String> {
    match error {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => Some(
            map.get("message")
                .or_else(|| map.get("statusText"))
                .and_then(Value::as_str)
                .unwrap_or("Upload widget reported an error")
                .to_string(),
        ),
        other => Some(other.to_string()),
    }
}

//! Decoding of channel contents and classification of invocation outcomes.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::wasm::{Fault, RunOutcome};

/// Contents of a channel: JSON when it parses, otherwise the trimmed text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DecodedValue {
    /// Structured value
    Json(Value),
    /// Raw text that was not valid JSON
    Text(String),
}

impl DecodedValue {
    /// True when the channel held nothing but whitespace.
    pub fn is_empty(&self) -> bool {
        matches!(self, DecodedValue::Text(text) if text.is_empty())
    }

    /// JSON view of the value; text becomes a JSON string.
    pub fn into_json(self) -> Value {
        match self {
            DecodedValue::Json(value) => value,
            DecodedValue::Text(text) => Value::String(text),
        }
    }

    /// Human-readable message form. JSON strings are unwrapped, other JSON
    /// is rendered compactly.
    pub fn into_message(self) -> String {
        match self {
            DecodedValue::Json(Value::String(text)) | DecodedValue::Text(text) => text,
            DecodedValue::Json(value) => value.to_string(),
        }
    }
}

impl fmt::Display for DecodedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodedValue::Json(value) => write!(f, "{value}"),
            DecodedValue::Text(text) => f.write_str(text),
        }
    }
}

/// Best-effort decode: lossy UTF-8, trim, then JSON with a text fallback.
/// Never fails.
pub fn decode(bytes: &[u8]) -> DecodedValue {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim();
    match serde_json::from_str(trimmed) {
        Ok(value) => DecodedValue::Json(value),
        Err(_) => DecodedValue::Text(trimmed.to_string()),
    }
}

/// Decoded output and error channels of a finished or faulted run.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamReadout {
    /// Decoded output channel
    pub output: DecodedValue,
    /// Error channel message, `None` when the channel was empty
    pub error: Option<String>,
}

impl StreamReadout {
    /// Build a readout from the two decoded channels.
    pub fn new(output: DecodedValue, error: DecodedValue) -> Self {
        let error = (!error.is_empty()).then(|| error.into_message());
        Self { output, error }
    }
}

/// Map a run outcome and its readout onto a value or a single error.
///
/// A fault outranks an application error, which outranks any output.
pub fn classify(outcome: &RunOutcome, readout: StreamReadout) -> Result<DecodedValue> {
    match (outcome, readout) {
        (RunOutcome::Faulted(Fault::Timeout { timeout_ms }), _) => {
            Err(BridgeError::Timeout(*timeout_ms))
        }
        (RunOutcome::Faulted(fault), readout) => Err(BridgeError::SandboxFault {
            message: readout.error,
            detail: fault.to_string(),
        }),
        (
            RunOutcome::Finished,
            StreamReadout {
                error: Some(message),
                ..
            },
        ) => Err(BridgeError::ApplicationError(message)),
        (RunOutcome::Finished, StreamReadout { output, .. }) => Ok(output),
    }
}

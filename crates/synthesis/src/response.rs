//! Validation of the model's answer.
//!
//! The model must answer with exactly one JSON object whose
//! [`SCRIPT_FIELD`] is a non-empty string mentioning the export
//! placeholder. Anything else is [`SynthesisError::InvalidOutput`]; no
//! attempt is made to salvage fenced or chatty output.

use artisan_core::scripting::executor::EXPORT_PLACEHOLDER;
use serde_json::Value;

use crate::error::SynthesisError;

/// Name of the JSON field holding the script.
pub const SCRIPT_FIELD: &str = "python_script";

/// A validated script, still containing the export placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesizedScript {
    script: String,
}

impl SynthesizedScript {
    pub fn as_str(&self) -> &str {
        &self.script
    }

    pub fn into_inner(self) -> String {
        self.script
    }
}

/// Parse the model's raw text into a [`SynthesizedScript`].
pub fn parse_model_output(text: &str) -> Result<SynthesizedScript, SynthesisError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SynthesisError::InvalidOutput(format!("response is not a single JSON value: {e}")))?;

    let object = value.as_object().ok_or_else(|| {
        SynthesisError::InvalidOutput("response JSON is not an object".to_string())
    })?;

    let script = match object.get(SCRIPT_FIELD) {
        Some(Value::String(s)) => s,
        Some(_) => {
            return Err(SynthesisError::InvalidOutput(format!(
                "'{SCRIPT_FIELD}' is not a string"
            )))
        }
        None => {
            return Err(SynthesisError::InvalidOutput(format!(
                "missing '{SCRIPT_FIELD}' field"
            )))
        }
    };

    if script.trim().is_empty() {
        return Err(SynthesisError::InvalidOutput(format!(
            "'{SCRIPT_FIELD}' is empty"
        )));
    }
    if !script.contains(EXPORT_PLACEHOLDER) {
        return Err(SynthesisError::InvalidOutput(format!(
            "script never references {EXPORT_PLACEHOLDER}"
        )));
    }

    Ok(SynthesizedScript {
        script: script.clone(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

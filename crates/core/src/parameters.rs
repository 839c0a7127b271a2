//! Submission input: the prompt plus the optional generation attributes.
//!
//! Requests are normalised and validated once, at submission time. Every
//! attribute is a plain string where empty means "unspecified"; `quality`
//! falls back to [`DEFAULT_QUALITY`].

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Quality used when the client does not ask for one.
pub const DEFAULT_QUALITY: &str = "low";

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LEN: u64 = 4000;

/// Maximum length of any single attribute value.
pub const MAX_PARAMETER_LEN: u64 = 500;

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Optional attributes steering the generated model.
///
/// Field order is significant: it is the order in which specified values
/// are rendered into the synthesis prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct GenerationParameters {
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub style: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub environment: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub lighting: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub color_scheme: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub special_features: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub scale: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub level_of_detail: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub material_appearance: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub symmetry: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub animation: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub output_format: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub other_requirements: String,
    #[validate(length(max = MAX_PARAMETER_LEN))]
    pub quality: String,
}

impl Default for GenerationParameters {
    fn default() -> Self {
        Self {
            style: String::new(),
            environment: String::new(),
            lighting: String::new(),
            color_scheme: String::new(),
            special_features: String::new(),
            scale: String::new(),
            level_of_detail: String::new(),
            material_appearance: String::new(),
            symmetry: String::new(),
            animation: String::new(),
            output_format: String::new(),
            other_requirements: String::new(),
            quality: DEFAULT_QUALITY.to_string(),
        }
    }
}

impl GenerationParameters {
    /// All attributes as `(name, value)` pairs in declaration order.
    pub fn entries(&self) -> [(&'static str, &str); 13] {
        [
            ("style", &self.style),
            ("environment", &self.environment),
            ("lighting", &self.lighting),
            ("color_scheme", &self.color_scheme),
            ("special_features", &self.special_features),
            ("scale", &self.scale),
            ("level_of_detail", &self.level_of_detail),
            ("material_appearance", &self.material_appearance),
            ("symmetry", &self.symmetry),
            ("animation", &self.animation),
            ("output_format", &self.output_format),
            ("other_requirements", &self.other_requirements),
            ("quality", &self.quality),
        ]
    }

    /// Only the attributes the client actually set.
    pub fn specified(&self) -> impl Iterator<Item = (&'static str, &str)> + '_ {
        self.entries()
            .into_iter()
            .filter(|(_, value)| !value.is_empty())
    }

    fn normalize(&mut self) {
        for field in [
            &mut self.style,
            &mut self.environment,
            &mut self.lighting,
            &mut self.color_scheme,
            &mut self.special_features,
            &mut self.scale,
            &mut self.level_of_detail,
            &mut self.material_appearance,
            &mut self.symmetry,
            &mut self.animation,
            &mut self.output_format,
            &mut self.other_requirements,
            &mut self.quality,
        ] {
            let trimmed = field.trim();
            if trimmed.len() != field.len() {
                *field = trimmed.to_string();
            }
        }
        if self.quality.is_empty() {
            self.quality = DEFAULT_QUALITY.to_string();
        }
    }
}

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A submission: the prompt plus flattened attributes, matching the flat
/// JSON body the web client posts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct GenerationRequest {
    #[serde(default)]
    #[validate(
        length(max = MAX_PROMPT_LEN),
        custom(function = "not_blank")
    )]
    pub prompt: String,

    #[serde(flatten)]
    #[validate(nested)]
    pub parameters: GenerationParameters,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            parameters: GenerationParameters::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: GenerationParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Trim every field, apply defaults and validate.
    pub fn into_validated(mut self) -> Result<Self, CoreError> {
        self.prompt = self.prompt.trim().to_string();
        self.parameters.normalize();
        self.validate()
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        Ok(self)
    }
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("prompt must not be empty".into());
        return Err(err);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn quality_defaults_to_low() {
        assert_eq!(GenerationParameters::default().quality, "low");
    }

    #[test]
    fn only_quality_specified_by_default() {
        let params = GenerationParameters::default();
        let specified: Vec<_> = params.specified().collect();
        assert_eq!(specified, vec![("quality", "low")]);
    }

    #[test]
    fn entries_follow_declaration_order() {
        let names: Vec<_> = GenerationParameters::default()
            .entries()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names.first(), Some(&"style"));
        assert_eq!(names.last(), Some(&"quality"));
        assert_eq!(names.len(), 13);
    }

    #[test]
    fn valid_request_is_trimmed() {
        let request = GenerationRequest::new("  a simple red cube  ")
            .into_validated()
            .unwrap();
        assert_eq!(request.prompt, "a simple red cube");
    }

    #[test]
    fn empty_prompt_rejected() {
        let err = GenerationRequest::new("").into_validated().unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn whitespace_prompt_rejected() {
        let err = GenerationRequest::new(" \n\t ").into_validated().unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[test]
    fn oversize_prompt_rejected() {
        let prompt = "x".repeat(MAX_PROMPT_LEN as usize + 1);
        assert!(GenerationRequest::new(prompt).into_validated().is_err());
    }

    #[test]
    fn oversize_parameter_rejected() {
        let params = GenerationParameters {
            lighting: "y".repeat(MAX_PARAMETER_LEN as usize + 1),
            ..Default::default()
        };
        let result = GenerationRequest::new("lamp")
            .with_parameters(params)
            .into_validated();
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn blank_quality_falls_back_to_default() {
        let params = GenerationParameters {
            quality: "   ".into(),
            style: " cartoon ".into(),
            ..Default::default()
        };
        let request = GenerationRequest::new("boat")
            .with_parameters(params)
            .into_validated()
            .unwrap();
        assert_eq!(request.parameters.quality, "low");
        assert_eq!(request.parameters.style, "cartoon");
    }

    #[test]
    fn flat_json_body_deserializes() {
        let body = serde_json::json!({
            "prompt": "a simple red cube",
            "style": "low-poly",
            "lighting": "studio",
            "unknown_field": "ignored"
        });
        let request: GenerationRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.prompt, "a simple red cube");
        assert_eq!(request.parameters.style, "low-poly");
        assert_eq!(request.parameters.lighting, "studio");
        assert_eq!(request.parameters.quality, "low");
        assert!(request.parameters.environment.is_empty());
    }

    #[test]
    fn missing_prompt_deserializes_then_fails_validation() {
        let request: GenerationRequest =
            serde_json::from_value(serde_json::json!({"style": "x"})).unwrap();
        assert!(request.into_validated().is_err());
    }
}

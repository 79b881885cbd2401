//! JSON Schema compilation and validation.

use serde_json::Value;

use crate::api_types::ResponseSchema;

/// Validation error with details about what failed.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

/// Result of schema validation.
#[derive(Debug)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: vec![],
        }
    }

    pub fn invalid(errors: Vec<ValidationError>) -> Self {
        Self {
            is_valid: false,
            errors,
        }
    }

    /// Format errors as a single string for logging.
    pub fn error_message(&self) -> String {
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("Invalid response schema '{name}': {message}")]
    Invalid { name: String, message: String },
}

/// A response schema compiled once per request.
pub struct SchemaValidator {
    name: String,
    validator: jsonschema::Validator,
}

impl std::fmt::Debug for SchemaValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaValidator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl SchemaValidator {
    pub fn compile(schema: &ResponseSchema) -> Result<Self, SchemaError> {
        let validator =
            jsonschema::draft202012::new(&schema.schema).map_err(|e| SchemaError::Invalid {
                name: schema.name.clone(),
                message: e.to_string(),
            })?;

        Ok(Self {
            name: schema.name.clone(),
            validator,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_valid(&self, value: &Value) -> bool {
        self.validator.is_valid(value)
    }

    pub fn validate(&self, value: &Value) -> ValidationResult {
        let errors: Vec<ValidationError> = self
            .validator
            .iter_errors(value)
            .map(|e| ValidationError {
                path: e.instance_path.to_string(),
                message: e.to_string(),
            })
            .collect();

        if errors.is_empty() {
            ValidationResult::valid()
        } else {
            ValidationResult::invalid(errors)
        }
    }
}

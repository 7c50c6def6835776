use std::fmt;

/// A single out-of-range or missing generation parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamViolation {
    /// Canonical field name, e.g. `steps` or `cfgScale`.
    pub field: &'static str,
    pub message: String,
}

impl ParamViolation {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ParamViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Every violation found by one validation pass.
    #[error("Parameter validation failed: {}", join_violations(.0))]
    InvalidParameters(Vec<ParamViolation>),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Recipe decode failed: {0}")]
    RecipeDecode(String),
}

impl CoreError {
    /// Violations carried by [`CoreError::InvalidParameters`], empty otherwise.
    pub fn violations(&self) -> &[ParamViolation] {
        match self {
            CoreError::InvalidParameters(v) => v,
            _ => &[],
        }
    }
}

fn join_violations(violations: &[ParamViolation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
